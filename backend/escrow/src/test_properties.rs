//! Ledger properties exercised over longer operation sequences.

use crate::contributions::{contribute, project_contributions, refund_project};
use crate::db::memory_pool;
use crate::errors::Result;
use crate::errors::ErrorKind;
use crate::governance::{request_extension, vote_on_request};
use crate::invariants::{
    assert_all_ledger_invariants, assert_balances_non_negative, assert_conserved,
    assert_tiers_monotonic, total_money,
};
use crate::milestones::{release_tranche, submit_milestone_proof, vote_on_milestone};
use crate::projects::get_project;
use crate::test_support::{
    admin, backed_project, balance_of, contributor, creator, file_pool, funded_user,
    kickoff_proof, production_proof, project_in, NOW,
};
use crate::types::{Owner, ProjectStatus, VoteChoice};
use crate::wallets::{set_project_wallet_frozen, withdraw};

/// Deterministic amounts, some larger than any wallet can cover.
fn amounts(seed: u64, count: usize) -> Vec<i64> {
    let mut state = seed;
    (0..count)
        .map(|_| {
            state = state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
            ((state >> 33) % 9_000) as i64 + 1
        })
        .collect()
}

#[tokio::test]
async fn balances_never_go_negative() {
    let pool = memory_pool().await.unwrap();
    let project = project_in(&pool, ProjectStatus::Active, 1_000_000).await;
    let users = [
        funded_user(&pool, 10, 5_000).await,
        funded_user(&pool, 11, 2_000).await,
        funded_user(&pool, 12, 8_000).await,
    ];

    for (i, amount) in amounts(7, 60).into_iter().enumerate() {
        let user = &users[i % users.len()];
        let before = balance_of(&pool, Owner::User(user.id)).await;
        let result = if i % 2 == 0 {
            contribute(&pool, user, project.id, amount, "INR").await.map(|_| ())
        } else {
            withdraw(&pool, user, amount).await.map(|_| ())
        };
        match result {
            Ok(()) => assert!(amount <= before),
            Err(e) => {
                assert_eq!(e.kind(), ErrorKind::InsufficientFunds);
                assert!(amount > before);
                assert_eq!(balance_of(&pool, Owner::User(user.id)).await, before);
            }
        }
        assert_balances_non_negative(&pool).await;
    }

    let project = get_project(&pool, project.id).await.unwrap();
    assert_all_ledger_invariants(&pool, &project).await;
}

#[tokio::test]
async fn failed_contribution_applies_neither_leg() {
    let pool = memory_pool().await.unwrap();
    let project = project_in(&pool, ProjectStatus::Active, 100_000).await;
    let user = funded_user(&pool, 10, 10_000).await;
    set_project_wallet_frozen(&pool, &admin(), project.id, true, "investigation")
        .await
        .unwrap();

    let err = contribute(&pool, &user, project.id, 4_000, "INR")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::WalletFrozen);

    assert_eq!(balance_of(&pool, Owner::User(10)).await, 10_000);
    assert_eq!(balance_of(&pool, Owner::Project(project.id)).await, 0);
    assert!(project_contributions(&pool, project.id)
        .await
        .unwrap()
        .is_empty());
    let project = get_project(&pool, project.id).await.unwrap();
    assert_eq!(project.current_funding, 0);
    assert_conserved(&pool, 10_000).await;
}

#[tokio::test]
async fn frozen_escrow_moves_nothing_until_unfrozen() {
    let (pool, project) = backed_project(&[(20, 40_000), (21, 60_000)]).await;
    set_project_wallet_frozen(&pool, &admin(), project.id, true, "dispute")
        .await
        .unwrap();

    let err = release_tranche(&pool, &admin(), project.id, 0).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::WalletFrozen);
    let err = refund_project(&pool, &admin(), project.id, "dispute")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::WalletFrozen);
    assert_eq!(balance_of(&pool, Owner::Project(project.id)).await, 100_000);

    // Freezing leaves the lifecycle alone.
    let frozen = get_project(&pool, project.id).await.unwrap();
    assert_eq!(frozen.status, project.status);

    set_project_wallet_frozen(&pool, &admin(), project.id, false, "resolved")
        .await
        .unwrap();
    let release = release_tranche(&pool, &admin(), project.id, 0).await.unwrap();
    assert_eq!(release.amount, 20_000);
    assert_eq!(balance_of(&pool, Owner::Project(project.id)).await, 80_000);
}

#[tokio::test]
async fn tiers_survive_refunds() {
    let pool = memory_pool().await.unwrap();
    let project = project_in(&pool, ProjectStatus::Active, 100_000).await;
    let user = funded_user(&pool, 10, 100_000).await;

    let mut previous = project.tiers();
    for amount in [10_000, 25_000, 40_000] {
        contribute(&pool, &user, project.id, amount, "INR").await.unwrap();
        let current = get_project(&pool, project.id).await.unwrap().tiers();
        assert_tiers_monotonic(previous, current);
        previous = current;
    }
    assert!(previous.seed_met && previous.production_met && !previous.success_met);

    refund_project(&pool, &admin(), project.id, "creator withdrew")
        .await
        .unwrap();
    let refunded = get_project(&pool, project.id).await.unwrap();
    assert_eq!(refunded.status, ProjectStatus::Cancelled);
    assert_eq!(refunded.current_funding, 0);
    assert_tiers_monotonic(previous, refunded.tiers());
    assert_all_ledger_invariants(&pool, &refunded).await;
}

#[tokio::test]
async fn internal_transfers_conserve_money() {
    let (pool, project) = backed_project(&[(20, 40_000), (21, 35_000), (22, 25_000)]).await;
    let total = total_money(&pool).await;
    assert_eq!(total, 100_000);

    submit_milestone_proof(&pool, &creator(), project.id, 0, kickoff_proof())
        .await
        .unwrap();
    vote_on_milestone(&pool, &contributor(20), project.id, 0, VoteChoice::Yes)
        .await
        .unwrap();
    vote_on_milestone(&pool, &contributor(21), project.id, 0, VoteChoice::Yes)
        .await
        .unwrap();
    assert_eq!(balance_of(&pool, Owner::Project(project.id)).await, 80_000);
    assert_conserved(&pool, total).await;

    // Escrow no longer covers every contribution; the refund rolls back whole.
    let err = refund_project(&pool, &admin(), project.id, "production collapsed")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientEscrow);
    assert_eq!(balance_of(&pool, Owner::User(20)).await, 0);
    assert_conserved(&pool, total).await;

    assert_balances_non_negative(&pool).await;
}

#[tokio::test]
async fn each_voter_counts_once() {
    let (pool, project) = backed_project(&[(20, 40_000), (21, 60_000)]).await;
    submit_milestone_proof(&pool, &creator(), project.id, 0, kickoff_proof())
        .await
        .unwrap();

    let outcome = vote_on_milestone(&pool, &contributor(20), project.id, 0, VoteChoice::No)
        .await
        .unwrap();
    assert_eq!(outcome.milestone.no_weight, 40.0);
    for choice in [VoteChoice::No, VoteChoice::Yes] {
        let err = vote_on_milestone(&pool, &contributor(20), project.id, 0, choice)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyVoted);
    }

    let request = request_extension(&pool, &creator(), project.id, 5, "reshoots", NOW)
        .await
        .unwrap();
    vote_on_request(&pool, &contributor(20), request.id, VoteChoice::Yes, NOW)
        .await
        .unwrap();
    let err = vote_on_request(&pool, &contributor(20), request.id, VoteChoice::Yes, NOW)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyVoted);
}

#[tokio::test]
async fn milestones_open_in_order() {
    let (pool, project) = backed_project(&[(20, 100_000)]).await;

    let err = submit_milestone_proof(&pool, &creator(), project.id, 1, production_proof())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    submit_milestone_proof(&pool, &creator(), project.id, 0, kickoff_proof())
        .await
        .unwrap();
    let err = submit_milestone_proof(&pool, &creator(), project.id, 1, production_proof())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    vote_on_milestone(&pool, &contributor(20), project.id, 0, VoteChoice::Yes)
        .await
        .unwrap();
    submit_milestone_proof(&pool, &creator(), project.id, 1, production_proof())
        .await
        .unwrap();
}

fn outcome<T>(result: Result<T>) -> std::result::Result<(), ErrorKind> {
    result.map(|_| ()).map_err(|e| e.kind())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_operations_on_one_wallet_serialize() {
    let (pool, _db) = file_pool(5).await;
    let project = project_in(&pool, ProjectStatus::Active, 1_000_000).await;
    let backer = funded_user(&pool, 11, 50_000).await;
    contribute(&pool, &backer, project.id, 50_000, "INR").await.unwrap();
    let user = funded_user(&pool, 10, 10_000).await;
    let project_id = project.id;

    let mut spends = Vec::new();
    for i in 0..12 {
        let (pool, user) = (pool.clone(), user.clone());
        spends.push(tokio::spawn(async move {
            if i % 3 == 0 {
                (false, outcome(withdraw(&pool, &user, 1_000).await))
            } else {
                (true, outcome(contribute(&pool, &user, project_id, 1_000, "INR").await))
            }
        }));
    }
    let mut releases = Vec::new();
    for _ in 0..2 {
        let pool = pool.clone();
        releases.push(tokio::spawn(async move {
            release_tranche(&pool, &admin(), project_id, 0).await
        }));
    }

    let (mut contributed, mut withdrawn, mut short) = (0, 0, 0);
    for handle in spends {
        match handle.await.unwrap() {
            (true, Ok(())) => contributed += 1,
            (false, Ok(())) => withdrawn += 1,
            (_, Err(kind)) => {
                assert_eq!(kind, ErrorKind::InsufficientFunds);
                short += 1;
            }
        }
    }
    assert_eq!(contributed + withdrawn, 10);
    assert_eq!(short, 2);

    let mut released = Vec::new();
    for handle in releases {
        match handle.await.unwrap() {
            Ok(release) => released.push(release),
            Err(e) => assert_eq!(e.kind(), ErrorKind::AlreadyReleased),
        }
    }
    assert_eq!(released.len(), 1);

    let project = get_project(&pool, project_id).await.unwrap();
    assert_eq!(project.current_funding, 50_000 + contributed * 1_000);
    assert_eq!(balance_of(&pool, Owner::User(10)).await, 0);
    assert_eq!(
        balance_of(&pool, Owner::Project(project.id)).await,
        project.current_funding - released[0].amount
    );
    assert_all_ledger_invariants(&pool, &project).await;
    assert_conserved(&pool, 60_000 - withdrawn * 1_000).await;
    pool.close().await;
}
