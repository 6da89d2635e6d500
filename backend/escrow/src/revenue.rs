//! Revenue distribution engine.
//!
//! Reported revenue is split between the creator (by stake) and every
//! completed contribution (pro rata). Shares are floored in minor units and
//! the rounding dust goes back to the project escrow, so the credited total
//! always equals the revenue amount.

use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::info;

use crate::audit::{self, AuditEntry, AuditEvent, PayoutReason, Resource};
use crate::contributions;
use crate::db::{begin_write, unix_now};
use crate::errors::{PlatformError, Result};
use crate::ledger;
use crate::projects;
use crate::types::{Actor, Amount, Owner, ProjectId, Revenue, RevenueId, RevenueStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevenueSubmission {
    pub source: String,
    pub amount: Amount,
    pub period_start: Option<i64>,
    pub period_end: Option<i64>,
    pub external_ref: Option<String>,
}

/// How one revenue amount divides up. `shares` is index-aligned with the
/// contribution amounts it was computed from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RevenueSplit {
    pub creator_share: Amount,
    pub shares: Vec<Amount>,
    pub remainder: Amount,
}

impl RevenueSplit {
    pub fn total(&self) -> Amount {
        self.creator_share + self.shares.iter().sum::<Amount>() + self.remainder
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Distribution {
    pub revenue_id: RevenueId,
    pub creator_share: Amount,
    pub contributor_total: Amount,
    pub remainder: Amount,
    pub recipient_count: usize,
}

/// Split `amount` by a whole-percent creator stake and contribution weights.
pub fn split_revenue(amount: Amount, creator_stake: i64, contributions: &[Amount]) -> RevenueSplit {
    let amount = amount.max(0);
    let stake = creator_stake.clamp(0, 100);
    let creator_share = ((amount as i128 * stake as i128) / 100) as Amount;
    let distributable = amount - creator_share;

    let total: i128 = contributions.iter().map(|&c| c.max(0) as i128).sum();
    let shares: Vec<Amount> = contributions
        .iter()
        .map(|&c| {
            if total == 0 {
                0
            } else {
                ((c.max(0) as i128 * distributable as i128) / total) as Amount
            }
        })
        .collect();
    let remainder = distributable - shares.iter().sum::<Amount>();

    RevenueSplit {
        creator_share,
        shares,
        remainder,
    }
}

const SELECT_REVENUE: &str = r#"
    SELECT id, project_id, source, amount, period_start, period_end, external_ref, status,
           distributed_at, created_at
    FROM   revenues
"#;

async fn load_revenue(conn: &mut SqliteConnection, revenue_id: RevenueId) -> Result<Revenue> {
    let sql = format!("{SELECT_REVENUE} WHERE id = ?1");
    sqlx::query_as::<_, Revenue>(&sql)
        .bind(revenue_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(PlatformError::RevenueNotFound(revenue_id))
}

pub async fn submit_revenue(
    pool: &SqlitePool,
    actor: &Actor,
    project_id: ProjectId,
    submission: RevenueSubmission,
) -> Result<Revenue> {
    ledger::ensure_positive(submission.amount)?;
    if let (Some(start), Some(end)) = (submission.period_start, submission.period_end) {
        if start > end {
            return Err(PlatformError::RuleViolation(
                "revenue period ends before it starts".to_string(),
            ));
        }
    }

    let mut tx = begin_write(pool).await?;
    let project = projects::load_project(&mut tx, project_id).await?;
    projects::require_creator(&project, actor, "report revenue")?;

    let revenue_id = sqlx::query(
        r#"
        INSERT INTO revenues
            (project_id, source, amount, period_start, period_end, external_ref, status, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
    )
    .bind(project_id)
    .bind(&submission.source)
    .bind(submission.amount)
    .bind(submission.period_start)
    .bind(submission.period_end)
    .bind(&submission.external_ref)
    .bind(RevenueStatus::Received)
    .bind(unix_now())
    .execute(&mut *tx)
    .await?
    .last_insert_rowid();

    audit::append(
        &mut tx,
        AuditEntry::new(
            actor.into(),
            Resource::Revenue(revenue_id),
            AuditEvent::RevenueReceived {
                project_id,
                amount: submission.amount,
                source: submission.source.clone(),
            },
        )
        .project(project_id),
    )
    .await?;
    let revenue = load_revenue(&mut tx, revenue_id).await?;
    tx.commit().await?;

    info!(
        "Revenue {revenue_id} of {} reported for project {project_id}",
        submission.amount
    );
    Ok(revenue)
}

/// Pay out a RECEIVED revenue record. All payouts commit together or not at all.
pub async fn distribute_revenue(
    pool: &SqlitePool,
    actor: &Actor,
    revenue_id: RevenueId,
) -> Result<Distribution> {
    let mut tx = begin_write(pool).await?;
    let revenue = load_revenue(&mut tx, revenue_id).await?;
    let project = projects::load_project(&mut tx, revenue.project_id).await?;
    projects::require_creator_or_admin(&project, actor, "distribute revenue")?;

    if revenue.status == RevenueStatus::Distributed {
        return Err(PlatformError::AlreadyDistributed(revenue_id));
    }
    let escrow = ledger::load(&mut tx, project.wallet_id).await?;
    if escrow.frozen {
        return Err(PlatformError::WalletFrozen(escrow.id));
    }
    let contributions = contributions::completed_in_tx(&mut tx, project.id).await?;
    if contributions.is_empty() {
        return Err(PlatformError::NoContributors(project.id));
    }

    let amounts: Vec<Amount> = contributions.iter().map(|c| c.amount).collect();
    let split = split_revenue(revenue.amount, project.creator_stake, &amounts);
    let mut recipient_count = 0;

    if split.creator_share > 0 {
        let wallet = ledger::get_or_create(&mut tx, Owner::User(project.creator_id)).await?;
        let change = ledger::credit(&mut tx, wallet.id, split.creator_share).await?;
        audit::append(
            &mut tx,
            AuditEntry::new(
                actor.into(),
                Resource::Revenue(revenue_id),
                AuditEvent::Payout {
                    revenue_id,
                    amount: split.creator_share,
                    reason: PayoutReason::CreatorStake,
                    stake_percent: Some(project.creator_stake),
                    wallet_id: wallet.id,
                    old_balance: change.old_balance,
                    new_balance: change.new_balance,
                },
            )
            .project(project.id),
        )
        .await?;
        recipient_count += 1;
    }

    for (contribution, &share) in contributions.iter().zip(&split.shares) {
        if share == 0 {
            continue;
        }
        let wallet =
            ledger::get_or_create(&mut tx, Owner::User(contribution.contributor_id)).await?;
        let change = ledger::credit(&mut tx, wallet.id, share).await?;
        audit::append(
            &mut tx,
            AuditEntry::new(
                actor.into(),
                Resource::Revenue(revenue_id),
                AuditEvent::Payout {
                    revenue_id,
                    amount: share,
                    reason: PayoutReason::RevenueShare,
                    stake_percent: None,
                    wallet_id: wallet.id,
                    old_balance: change.old_balance,
                    new_balance: change.new_balance,
                },
            )
            .project(project.id),
        )
        .await?;
        recipient_count += 1;
    }

    if split.remainder > 0 {
        ledger::credit(&mut tx, escrow.id, split.remainder).await?;
        audit::append(
            &mut tx,
            AuditEntry::new(
                actor.into(),
                Resource::Revenue(revenue_id),
                AuditEvent::PayoutRemainder {
                    revenue_id,
                    amount: split.remainder,
                    escrow_wallet_id: escrow.id,
                },
            )
            .project(project.id),
        )
        .await?;
    }

    sqlx::query("UPDATE revenues SET status = ?1, distributed_at = ?2 WHERE id = ?3")
        .bind(RevenueStatus::Distributed)
        .bind(unix_now())
        .bind(revenue_id)
        .execute(&mut *tx)
        .await?;
    audit::append(
        &mut tx,
        AuditEntry::new(
            actor.into(),
            Resource::Revenue(revenue_id),
            AuditEvent::RevenueDistributed {
                revenue_id,
                total: revenue.amount,
                recipient_count,
            },
        )
        .project(project.id),
    )
    .await?;
    tx.commit().await?;

    let contributor_total: Amount = split.shares.iter().sum();
    info!(
        "Revenue {revenue_id} distributed: creator {}, contributors {contributor_total}, remainder {}",
        split.creator_share, split.remainder
    );
    Ok(Distribution {
        revenue_id,
        creator_share: split.creator_share,
        contributor_total,
        remainder: split.remainder,
        recipient_count,
    })
}

pub async fn project_revenues(pool: &SqlitePool, project_id: ProjectId) -> Result<Vec<Revenue>> {
    let sql = format!("{SELECT_REVENUE} WHERE project_id = ?1 ORDER BY id DESC");
    let rows = sqlx::query_as::<_, Revenue>(&sql)
        .bind(project_id)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}
