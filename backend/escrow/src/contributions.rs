//! Contribution and escrow engine.
//!
//! A contribution is a debit on the contributor's wallet and a credit on the
//! project escrow in one transaction, followed by the funding total, tier
//! flags and (when the goal is crossed) the ACTIVE → FUNDED transition.

use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::info;
use uuid::Uuid;

use crate::audit::{self, AuditActor, AuditEntry, AuditEvent, Resource};
use crate::db::{begin_write, unix_now};
use crate::errors::{PlatformError, Result};
use crate::ledger;
use crate::projects;
use crate::types::{
    Actor, Amount, Contribution, ContributionStatus, Owner, Project, ProjectId, ProjectStatus,
    UserId, CURRENCY,
};
use crate::wallets;

const SELECT_CONTRIBUTION: &str = r#"
    SELECT id, contributor_id, project_id, amount, status, transaction_ref, created_at
    FROM   contributions
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RefundSummary {
    pub project_id: ProjectId,
    pub refunded_count: usize,
    pub total_refunded: Amount,
}

fn transaction_ref() -> String {
    format!("txn_{}", Uuid::new_v4().simple())
}

// ─────────────────────────────────────────────────────────
// Contribute
// ─────────────────────────────────────────────────────────

pub async fn contribute(
    pool: &SqlitePool,
    actor: &Actor,
    project_id: ProjectId,
    amount: Amount,
    currency: &str,
) -> Result<Contribution> {
    ledger::ensure_positive(amount)?;
    if currency != CURRENCY {
        return Err(PlatformError::RuleViolation(format!(
            "unsupported currency {currency}, only {CURRENCY} is accepted"
        )));
    }

    let mut tx = begin_write(pool).await?;
    let project = projects::load_project(&mut tx, project_id).await?;
    if !project.status.is_spend_eligible() {
        return Err(PlatformError::ProjectNotAcceptingFunds(project.status));
    }

    let wallet = wallets::actor_wallet(&mut tx, actor).await?;
    let contributor_change = ledger::debit(&mut tx, wallet.id, amount).await?;

    let reference = transaction_ref();
    let contribution_id = sqlx::query(
        r#"
        INSERT INTO contributions (contributor_id, project_id, amount, status, transaction_ref, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
    )
    .bind(actor.id)
    .bind(project_id)
    .bind(amount)
    .bind(ContributionStatus::Completed)
    .bind(&reference)
    .bind(unix_now())
    .execute(&mut *tx)
    .await?
    .last_insert_rowid();

    let escrow_change = ledger::credit(&mut tx, project.wallet_id, amount).await?;

    let funding = project
        .current_funding
        .checked_add(amount)
        .ok_or(PlatformError::InvalidAmount(amount))?;
    let tiers = project.tiers().advance(funding, project.funding_goal);
    projects::set_funding(&mut tx, project_id, funding, tiers).await?;

    audit::append(
        &mut tx,
        AuditEntry::new(
            actor.into(),
            Resource::Contribution(contribution_id),
            AuditEvent::Contribution {
                contribution_id,
                amount,
                currency: CURRENCY.to_string(),
                contributor_wallet_id: wallet.id,
                escrow_wallet_id: project.wallet_id,
                contributor_old_balance: contributor_change.old_balance,
                contributor_new_balance: contributor_change.new_balance,
                escrow_old_balance: escrow_change.old_balance,
                escrow_new_balance: escrow_change.new_balance,
                transaction_ref: reference.clone(),
            },
        )
        .project(project_id),
    )
    .await?;

    let goal_reached = funding >= project.funding_goal;
    if goal_reached && project.status == ProjectStatus::Active {
        projects::set_status(&mut tx, project_id, ProjectStatus::Funded).await?;
        audit::append(
            &mut tx,
            AuditEntry::new(
                AuditActor::System,
                Resource::Project(project_id),
                AuditEvent::ProjectAutoFunded {
                    final_funding: funding,
                    funding_percent: funding as f64 / project.funding_goal as f64 * 100.0,
                    reason: "funding goal reached".to_string(),
                },
            ),
        )
        .await?;
    }

    let contribution = load_contribution(&mut tx, contribution_id).await?;
    tx.commit().await?;

    info!(
        "Contribution {reference}: user {} -> project {project_id}, amount {amount}",
        actor.id
    );
    if goal_reached && project.status == ProjectStatus::Active {
        info!("Project {project_id} reached its goal and is now FUNDED");
    }
    Ok(contribution)
}

async fn load_contribution(
    conn: &mut SqliteConnection,
    contribution_id: i64,
) -> Result<Contribution> {
    let sql = format!("{SELECT_CONTRIBUTION} WHERE id = ?1");
    let contribution = sqlx::query_as::<_, Contribution>(&sql)
        .bind(contribution_id)
        .fetch_one(&mut *conn)
        .await?;
    Ok(contribution)
}

// ─────────────────────────────────────────────────────────
// Refund
// ─────────────────────────────────────────────────────────

/// Return every COMPLETED contribution of `project` and cancel it.
///
/// Runs on the caller's transaction; the admin path and the trust worker
/// both commit it themselves.
pub(crate) async fn refund_in_tx(
    conn: &mut SqliteConnection,
    actor: AuditActor,
    project: &Project,
    reason: &str,
) -> Result<RefundSummary> {
    let contributions = completed_in_tx(conn, project.id).await?;

    let mut total_refunded: Amount = 0;
    for contribution in &contributions {
        let wallet = ledger::get_or_create(conn, Owner::User(contribution.contributor_id)).await?;
        ledger::debit_escrow(conn, project.wallet_id, contribution.amount).await?;
        ledger::credit(conn, wallet.id, contribution.amount).await?;

        sqlx::query("UPDATE contributions SET status = ?1 WHERE id = ?2")
            .bind(ContributionStatus::Refunded)
            .bind(contribution.id)
            .execute(&mut *conn)
            .await?;

        audit::append(
            conn,
            AuditEntry::new(
                actor,
                Resource::Contribution(contribution.id),
                AuditEvent::Refund {
                    contribution_id: contribution.id,
                    contributor_id: contribution.contributor_id,
                    contributor_wallet_id: wallet.id,
                    escrow_wallet_id: project.wallet_id,
                    amount: contribution.amount,
                    reason: reason.to_string(),
                },
            )
            .project(project.id),
        )
        .await?;
        total_refunded += contribution.amount;
    }

    let remaining = (project.current_funding - total_refunded).max(0);
    projects::set_funding(conn, project.id, remaining, project.tiers()).await?;
    projects::set_status(conn, project.id, ProjectStatus::Cancelled).await?;

    audit::append(
        conn,
        AuditEntry::new(
            actor,
            Resource::Project(project.id),
            AuditEvent::ProjectRefunded {
                refunded_count: contributions.len(),
                total_refunded,
                escrow_wallet_id: project.wallet_id,
                reason: reason.to_string(),
            },
        ),
    )
    .await?;

    Ok(RefundSummary {
        project_id: project.id,
        refunded_count: contributions.len(),
        total_refunded,
    })
}

/// Admin refund of a whole project.
pub async fn refund_project(
    pool: &SqlitePool,
    actor: &Actor,
    project_id: ProjectId,
    reason: &str,
) -> Result<RefundSummary> {
    if !actor.is_admin() {
        return Err(PlatformError::Unauthorized(
            "only admins can refund projects".to_string(),
        ));
    }

    let mut tx = begin_write(pool).await?;
    let project = projects::load_project(&mut tx, project_id).await?;
    let summary = refund_in_tx(&mut tx, actor.into(), &project, reason).await?;
    tx.commit().await?;

    info!(
        "Project {project_id} refunded: {} contributions, {} total",
        summary.refunded_count, summary.total_refunded
    );
    Ok(summary)
}

// ─────────────────────────────────────────────────────────
// Reads and voting weight
// ─────────────────────────────────────────────────────────

pub(crate) async fn completed_in_tx(
    conn: &mut SqliteConnection,
    project_id: ProjectId,
) -> Result<Vec<Contribution>> {
    let sql = format!("{SELECT_CONTRIBUTION} WHERE project_id = ?1 AND status = ?2 ORDER BY id ASC");
    let rows = sqlx::query_as::<_, Contribution>(&sql)
        .bind(project_id)
        .bind(ContributionStatus::Completed)
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows)
}

pub(crate) async fn completed_total(
    conn: &mut SqliteConnection,
    project_id: ProjectId,
    user_id: UserId,
) -> Result<Amount> {
    let total: i64 = sqlx::query_scalar(
        r#"
        SELECT COALESCE(SUM(amount), 0) FROM contributions
        WHERE  project_id = ?1 AND contributor_id = ?2 AND status = ?3
        "#,
    )
    .bind(project_id)
    .bind(user_id)
    .bind(ContributionStatus::Completed)
    .fetch_one(&mut *conn)
    .await?;
    Ok(total)
}

/// A voter's share of the funds raised, as a percentage.
///
/// Computed fresh against the project's current funding; weights across
/// voters are not normalised against each other.
pub(crate) async fn voting_weight(
    conn: &mut SqliteConnection,
    project: &Project,
    voter_id: UserId,
) -> Result<f64> {
    let contributed = completed_total(conn, project.id, voter_id).await?;
    if contributed <= 0 || project.current_funding <= 0 {
        return Err(PlatformError::NotAContributor(project.id));
    }
    Ok(contributed as f64 * 100.0 / project.current_funding as f64)
}

pub async fn project_contributions(
    pool: &SqlitePool,
    project_id: ProjectId,
) -> Result<Vec<Contribution>> {
    let sql = format!("{SELECT_CONTRIBUTION} WHERE project_id = ?1 ORDER BY id ASC");
    let rows = sqlx::query_as::<_, Contribution>(&sql)
        .bind(project_id)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

pub async fn user_contributions(pool: &SqlitePool, user_id: UserId) -> Result<Vec<Contribution>> {
    let sql = format!("{SELECT_CONTRIBUTION} WHERE contributor_id = ?1 ORDER BY id DESC");
    let rows = sqlx::query_as::<_, Contribution>(&sql)
        .bind(user_id)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

pub async fn contributor_total(
    pool: &SqlitePool,
    project_id: ProjectId,
    user_id: UserId,
) -> Result<Amount> {
    let mut conn = pool.acquire().await?;
    completed_total(&mut conn, project_id, user_id).await
}
