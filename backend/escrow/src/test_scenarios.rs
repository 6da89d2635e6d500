//! End-to-end flows across wallets, contributions, milestones, expenses and
//! revenue.

use crate::audit;
use crate::config::ExpenseFundingSource;
use crate::contributions::contribute;
use crate::db::memory_pool;
use crate::errors::ErrorKind;
use crate::expenses::{
    get_expense, review_expense, submit_expense, ExpenseSubmission, ReviewDecision,
};
use crate::invariants::{assert_all_ledger_invariants, assert_conserved, assert_tiers_monotonic};
use crate::milestones::{project_milestones, submit_milestone_proof, vote_on_milestone};
use crate::projects::get_project;
use crate::revenue::{distribute_revenue, submit_revenue, RevenueSubmission};
use crate::test_support::{
    admin, backed_project, balance_of, contributor, creator, fund_creator, funded_user,
    kickoff_proof, production_proof, project_in, project_with_rules, CREATOR_ID,
};
use crate::types::{ExpenseStatus, MilestoneStatus, Owner, ProjectStatus, VoteChoice};
use crate::wallets::withdraw;

#[tokio::test]
async fn contribution_crossing_seed_then_success_tier() {
    let pool = memory_pool().await.unwrap();
    let project = project_in(&pool, ProjectStatus::Active, 100_000).await;
    let early = funded_user(&pool, 10, 30_000).await;
    let late = funded_user(&pool, 11, 70_000).await;

    contribute(&pool, &early, project.id, 30_000, "INR").await.unwrap();
    let seeded = get_project(&pool, project.id).await.unwrap();
    assert!(seeded.seed_met);
    assert!(!seeded.production_met);
    assert_eq!(seeded.status, ProjectStatus::Active);
    assert_tiers_monotonic(project.tiers(), seeded.tiers());

    contribute(&pool, &late, project.id, 70_000, "INR").await.unwrap();
    let funded = get_project(&pool, project.id).await.unwrap();
    assert!(funded.production_met && funded.success_met);
    assert_eq!(funded.status, ProjectStatus::Funded);
    assert_tiers_monotonic(seeded.tiers(), funded.tiers());

    let auto = audit::by_action(&pool, "PROJECT_AUTO_FUNDED").await.unwrap();
    assert_eq!(auto.len(), 1);
    assert_eq!(auto[0].actor_kind, "SYSTEM");

    assert_all_ledger_invariants(&pool, &funded).await;
    assert_conserved(&pool, 100_000).await;
}

#[tokio::test]
async fn milestone_approval_releases_the_tranche() {
    // Three voters at 20/20/15 percent; the remaining 45 percent abstains.
    let (pool, project) =
        backed_project(&[(20, 20_000), (21, 20_000), (22, 15_000), (23, 45_000)]).await;
    assert_eq!(project.current_funding, 100_000);
    assert_eq!(balance_of(&pool, Owner::Project(project.id)).await, 100_000);

    submit_milestone_proof(&pool, &creator(), project.id, 0, kickoff_proof())
        .await
        .unwrap();

    let first = vote_on_milestone(&pool, &contributor(20), project.id, 0, VoteChoice::Yes)
        .await
        .unwrap();
    assert!(first.release.is_none());
    let second = vote_on_milestone(&pool, &contributor(21), project.id, 0, VoteChoice::Yes)
        .await
        .unwrap();
    assert!(second.release.is_none());
    assert_eq!(second.milestone.status, MilestoneStatus::Submitted);

    let third = vote_on_milestone(&pool, &contributor(22), project.id, 0, VoteChoice::Yes)
        .await
        .unwrap();
    assert_eq!(third.milestone.yes_weight, 55.0);
    assert_eq!(third.milestone.status, MilestoneStatus::Approved);
    let release = third.release.unwrap();
    assert_eq!(release.amount, 20_000);

    assert_eq!(balance_of(&pool, Owner::Project(project.id)).await, 80_000);
    assert_eq!(balance_of(&pool, Owner::User(CREATOR_ID)).await, 20_000);

    // The next milestone opens only now.
    submit_milestone_proof(&pool, &creator(), project.id, 1, production_proof())
        .await
        .unwrap();
    let milestones = project_milestones(&pool, project.id).await.unwrap();
    assert_eq!(milestones[1].status, MilestoneStatus::Submitted);

    let project = get_project(&pool, project.id).await.unwrap();
    assert_all_ledger_invariants(&pool, &project).await;
    assert_conserved(&pool, 100_000).await;
}

#[tokio::test]
async fn expense_approval_fails_without_creator_funds() {
    let (pool, project) = project_with_rules(ProjectStatus::Active, vec![]).await;
    let owner = fund_creator(&pool, 2_000).await;
    let source = ExpenseFundingSource::CreatorWallet;

    let expense = submit_expense(
        &pool,
        &creator(),
        project.id,
        ExpenseSubmission {
            title: "Lighting kit".to_string(),
            description: None,
            amount: 1_000,
            category: "Equipment".to_string(),
            receipt_url: Some("https://receipts.example/42".to_string()),
        },
        source,
    )
    .await
    .unwrap();

    // Balance drops to 500 before the review.
    withdraw(&pool, &owner, 1_500).await.unwrap();
    assert_eq!(balance_of(&pool, Owner::User(CREATOR_ID)).await, 500);

    let err = review_expense(&pool, &admin(), expense.id, ReviewDecision::Approve, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientFunds);

    let stored = get_expense(&pool, Some(&admin()), expense.id).await.unwrap();
    assert_eq!(stored.status, ExpenseStatus::Pending);
    assert_eq!(balance_of(&pool, Owner::User(CREATOR_ID)).await, 500);
    assert!(audit::by_action(&pool, "EXPENSE_APPROVED")
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn revenue_distribution_honours_creator_stake() {
    let (pool, project) = backed_project(&[(20, 30_000), (21, 70_000)]).await;
    assert_eq!(project.creator_stake, 10);

    let revenue = submit_revenue(
        &pool,
        &creator(),
        project.id,
        RevenueSubmission {
            source: "Streaming".to_string(),
            amount: 100_000,
            period_start: None,
            period_end: None,
            external_ref: Some("stmt-2025-06".to_string()),
        },
    )
    .await
    .unwrap();

    let outcome = distribute_revenue(&pool, &creator(), revenue.id).await.unwrap();
    assert_eq!(outcome.creator_share, 10_000);
    assert_eq!(outcome.contributor_total, 90_000);
    assert_eq!(outcome.remainder, 0);

    assert_eq!(balance_of(&pool, Owner::User(CREATOR_ID)).await, 10_000);
    assert_eq!(balance_of(&pool, Owner::User(20)).await, 27_000);
    assert_eq!(balance_of(&pool, Owner::User(21)).await, 63_000);
    assert_eq!(balance_of(&pool, Owner::Project(project.id)).await, 100_000);
}
