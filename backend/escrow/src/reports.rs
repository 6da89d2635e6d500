//! Read-only transparency and oversight reports.

use std::collections::BTreeMap;

use serde::Serialize;
use sqlx::SqlitePool;

use crate::audit::{self, AuditRecord};
use crate::errors::Result;
use crate::ledger;
use crate::projects;
use crate::types::{
    Amount, ContributionStatus, ExpenseStatus, OwnerKind, ProjectId, ProjectStatus, Tiers,
    CURRENCY,
};

/// Projects need more than this many expenses before their rejection rate counts.
pub const RISK_MIN_EXPENSES: i64 = 5;
pub const RISK_REJECTION_RATE: f64 = 0.3;
const RISK_REJECTION_SCORE: i64 = 50;
const RECENT_ACTIVITY: i64 = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FundSummary {
    pub project_id: ProjectId,
    pub title: String,
    pub status: ProjectStatus,
    pub funding_goal: Amount,
    pub total_raised: Amount,
    pub percentage_funded: f64,
    pub total_contributors: i64,
    pub currency: &'static str,
    pub tiers: Tiers,
    pub escrow_balance: Amount,
    pub escrow_frozen: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskEntry {
    pub project_id: ProjectId,
    pub title: String,
    pub status: ProjectStatus,
    pub expense_count: i64,
    pub rejected_count: i64,
    pub risk_score: i64,
    pub signals: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskReport {
    pub generated_at: i64,
    pub risky_projects: Vec<RiskEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlatformAnalytics {
    pub total_projects: i64,
    pub status_distribution: BTreeMap<String, i64>,
    pub total_funding: Amount,
    pub average_funding: f64,
    /// Money currently sitting in project escrow wallets.
    pub escrow_held: Amount,
    pub recent_activity: Vec<AuditRecord>,
}

pub async fn fund_summary(pool: &SqlitePool, project_id: ProjectId) -> Result<FundSummary> {
    let mut conn = pool.acquire().await?;
    let project = projects::load_project(&mut conn, project_id).await?;
    let escrow = ledger::load(&mut conn, project.wallet_id).await?;
    let total_contributors: i64 = sqlx::query_scalar(
        "SELECT COUNT(DISTINCT contributor_id) FROM contributions WHERE project_id = ?1 AND status = ?2",
    )
    .bind(project_id)
    .bind(ContributionStatus::Completed)
    .fetch_one(&mut *conn)
    .await?;

    Ok(FundSummary {
        project_id,
        percentage_funded: (project.funding_percent() * 100.0).round() / 100.0,
        tiers: project.tiers(),
        title: project.title,
        status: project.status,
        funding_goal: project.funding_goal,
        total_raised: project.current_funding,
        total_contributors,
        currency: CURRENCY,
        escrow_balance: escrow.balance,
        escrow_frozen: escrow.frozen,
    })
}

/// Everything that happened to a project, newest first.
pub async fn project_timeline(pool: &SqlitePool, project_id: ProjectId) -> Result<Vec<AuditRecord>> {
    projects::get_project(pool, project_id).await?;
    audit::project_timeline(pool, project_id).await
}

pub async fn recent_audit_logs(pool: &SqlitePool, limit: i64) -> Result<Vec<AuditRecord>> {
    audit::recent(pool, limit).await
}

#[derive(sqlx::FromRow)]
struct ExpenseStats {
    id: ProjectId,
    title: String,
    status: ProjectStatus,
    expense_count: i64,
    rejected_count: i64,
}

/// Flag live projects whose expense submissions are mostly being rejected.
/// Reporting only; nothing is blocked.
pub async fn risk_report(pool: &SqlitePool, now: i64) -> Result<RiskReport> {
    let stats = sqlx::query_as::<_, ExpenseStats>(
        r#"
        SELECT p.id, p.title, p.status,
               COUNT(e.id) AS expense_count,
               COALESCE(SUM(CASE WHEN e.status = ?1 THEN 1 ELSE 0 END), 0) AS rejected_count
        FROM   projects p
        LEFT JOIN expenses e ON e.project_id = p.id
        WHERE  p.status IN (?2, ?3)
        GROUP  BY p.id, p.title, p.status
        ORDER  BY p.id
        "#,
    )
    .bind(ExpenseStatus::Rejected)
    .bind(ProjectStatus::Active)
    .bind(ProjectStatus::Funded)
    .fetch_all(pool)
    .await?;

    let risky_projects = stats
        .into_iter()
        .filter_map(|row| {
            let mut risk_score = 0;
            let mut signals = Vec::new();
            if row.expense_count > RISK_MIN_EXPENSES
                && row.rejected_count as f64 / row.expense_count as f64 > RISK_REJECTION_RATE
            {
                risk_score += RISK_REJECTION_SCORE;
                signals.push("High expense rejection rate".to_string());
            }
            (risk_score > 0).then(|| RiskEntry {
                project_id: row.id,
                title: row.title,
                status: row.status,
                expense_count: row.expense_count,
                rejected_count: row.rejected_count,
                risk_score,
                signals,
            })
        })
        .collect();

    Ok(RiskReport {
        generated_at: now,
        risky_projects,
    })
}

pub async fn platform_analytics(pool: &SqlitePool) -> Result<PlatformAnalytics> {
    let rows: Vec<(ProjectStatus, i64)> =
        sqlx::query_as("SELECT status, COUNT(*) FROM projects GROUP BY status")
            .fetch_all(pool)
            .await?;
    let status_distribution: BTreeMap<String, i64> = rows
        .into_iter()
        .map(|(status, count)| (status.as_str().to_string(), count))
        .collect();

    let (total_projects, total_funding): (i64, i64) =
        sqlx::query_as("SELECT COUNT(*), COALESCE(SUM(current_funding), 0) FROM projects")
            .fetch_one(pool)
            .await?;
    let average_funding = if total_projects > 0 {
        total_funding as f64 / total_projects as f64
    } else {
        0.0
    };
    let mut conn = pool.acquire().await?;
    let escrow_held = ledger::total_held(&mut conn, OwnerKind::Project).await?;
    drop(conn);

    Ok(PlatformAnalytics {
        total_projects,
        status_distribution,
        total_funding,
        average_funding,
        escrow_held,
        recent_activity: audit::recent(pool, RECENT_ACTIVITY).await?,
    })
}
