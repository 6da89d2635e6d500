//! Ledger-wide assertions shared by the scenario and property tests.

use sqlx::SqlitePool;

use crate::types::{Amount, Project, Tiers};

/// No wallet may ever hold a negative balance.
pub async fn assert_balances_non_negative(pool: &SqlitePool) {
    let negative: Vec<(i64, Amount)> =
        sqlx::query_as("SELECT id, balance FROM wallets WHERE balance < 0")
            .fetch_all(pool)
            .await
            .unwrap();
    assert!(
        negative.is_empty(),
        "wallets with negative balance: {negative:?}"
    );
}

/// Sum of every wallet balance on the platform.
pub async fn total_money(pool: &SqlitePool) -> Amount {
    sqlx::query_scalar("SELECT COALESCE(SUM(balance), 0) FROM wallets")
        .fetch_one(pool)
        .await
        .unwrap()
}

/// Internal transfers neither create nor destroy money.
pub async fn assert_conserved(pool: &SqlitePool, expected: Amount) {
    let actual = total_money(pool).await;
    assert_eq!(
        actual, expected,
        "money not conserved: wallets hold {actual}, expected {expected}"
    );
}

/// A tier flag, once raised, stays raised.
pub fn assert_tiers_monotonic(before: Tiers, after: Tiers) {
    assert!(
        !before.seed_met || after.seed_met,
        "seed tier dropped: {before:?} -> {after:?}"
    );
    assert!(
        !before.production_met || after.production_met,
        "production tier dropped: {before:?} -> {after:?}"
    );
    assert!(
        !before.success_met || after.success_met,
        "success tier dropped: {before:?} -> {after:?}"
    );
}

/// `current_funding` equals the sum of the project's completed contributions.
pub async fn assert_funding_matches_contributions(pool: &SqlitePool, project: &Project) {
    let completed: Amount = sqlx::query_scalar(
        "SELECT COALESCE(SUM(amount), 0) FROM contributions WHERE project_id = ?1 AND status = 'COMPLETED'",
    )
    .bind(project.id)
    .fetch_one(pool)
    .await
    .unwrap();
    assert_eq!(
        project.current_funding, completed,
        "project {} reports {} funding but completed contributions sum to {completed}",
        project.id, project.current_funding
    );
}

/// Milestones with a released tranche never exceed 100% of the funding.
pub async fn assert_released_within_funding(pool: &SqlitePool, project: &Project) {
    let released: i64 = sqlx::query_scalar(
        "SELECT COALESCE(SUM(tranche_percent), 0) FROM milestones WHERE project_id = ?1 AND status = 'APPROVED'",
    )
    .bind(project.id)
    .fetch_one(pool)
    .await
    .unwrap();
    assert!(
        released <= 100,
        "project {} released {released}% of its funding",
        project.id
    );
}

/// Run every stateless ledger invariant.
pub async fn assert_all_ledger_invariants(pool: &SqlitePool, project: &Project) {
    assert_balances_non_negative(pool).await;
    assert_funding_matches_contributions(pool, project).await;
    assert_released_within_funding(pool, project).await;
}
