//! Long-running background task that enforces deadline policy.
//!
//! Each pass looks at ACTIVE projects whose deadline has passed. Projects
//! that reached the seed tier become FUNDED; the rest are refunded and
//! cancelled. Every project is handled in its own transaction, so one
//! failure is logged and the sweep moves on.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use sqlx::SqlitePool;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::audit::{self, AuditActor, AuditEntry, AuditEvent, Resource};
use crate::contributions;
use crate::db::{begin_write, unix_now};
use crate::errors::{PlatformError, Result};
use crate::projects;
use crate::types::{reaches, ProjectId, ProjectStatus, SEED_TIER_PERCENT};

pub struct WorkerState {
    pub pool: SqlitePool,
    pub interval: Duration,
}

/// What one enforcement pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub examined: usize,
    pub refunded: Vec<ProjectId>,
    pub funded: Vec<ProjectId>,
    pub failed: Vec<ProjectId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Enforcement {
    Refunded,
    Funded,
    Skipped,
}

/// Spawn the enforcement loop as a background [`tokio`] task.
pub async fn run(state: Arc<WorkerState>, shutdown: CancellationToken) {
    info!("Trust worker starting, interval {:?}", state.interval);

    let mut ticker = tokio::time::interval(state.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Trust worker stopping");
                break;
            }
            _ = ticker.tick() => {
                match run_pass(&state.pool, unix_now()).await {
                    Ok(report) if report.examined > 0 => info!(
                        "Trust pass: {} examined, {} funded, {} refunded, {} failed",
                        report.examined,
                        report.funded.len(),
                        report.refunded.len(),
                        report.failed.len()
                    ),
                    Ok(_) => {}
                    Err(e) => error!("Trust pass error: {e}"),
                }
            }
        }
    }
}

/// Run one enforcement pass against projects whose deadline is before `now`.
pub async fn run_pass(pool: &SqlitePool, now: i64) -> Result<PassReport> {
    let candidates = projects::expired_active(pool, now).await?;
    let mut report = PassReport {
        examined: candidates.len(),
        ..Default::default()
    };

    for project in candidates {
        match enforce(pool, project.id, now).await {
            Ok(Enforcement::Refunded) => report.refunded.push(project.id),
            Ok(Enforcement::Funded) => report.funded.push(project.id),
            Ok(Enforcement::Skipped) => {}
            Err(e) => {
                report.failed.push(project.id);
                match record_failure(pool, project.id, &e).await {
                    Ok(true) => error!("Trust worker failed on project {}: {e}", project.id),
                    Ok(false) => warn!("Project {} still failing enforcement: {e}", project.id),
                    Err(audit_err) => {
                        error!("Trust worker failed on project {}: {e}", project.id);
                        warn!(
                            "Could not audit enforcement failure on project {}: {audit_err}",
                            project.id
                        );
                    }
                }
            }
        }
    }
    Ok(report)
}

async fn enforce(pool: &SqlitePool, project_id: ProjectId, now: i64) -> Result<Enforcement> {
    let mut tx = begin_write(pool).await?;
    // Re-read inside the transaction: a request may have moved it meanwhile.
    let project = projects::load_project(&mut tx, project_id).await?;
    if project.status != ProjectStatus::Active || project.deadline >= now {
        return Ok(Enforcement::Skipped);
    }

    let percent = project.funding_percent();
    let outcome = if reaches(project.current_funding, project.funding_goal, SEED_TIER_PERCENT) {
        projects::set_status(&mut tx, project_id, ProjectStatus::Funded).await?;
        audit::append(
            &mut tx,
            AuditEntry::new(
                AuditActor::System,
                Resource::Project(project_id),
                AuditEvent::ProjectAutoFunded {
                    final_funding: project.current_funding,
                    funding_percent: percent,
                    reason: format!(
                        "Deadline reached with {percent:.1}% funding, seed tier met"
                    ),
                },
            ),
        )
        .await?;
        Enforcement::Funded
    } else {
        let reason = format!(
            "Deadline passed with {percent:.1}% funding, below the {SEED_TIER_PERCENT}% seed tier"
        );
        contributions::refund_in_tx(&mut tx, AuditActor::System, &project, &reason).await?;
        Enforcement::Refunded
    };
    tx.commit().await?;

    match outcome {
        Enforcement::Funded => info!("Project {project_id} auto-funded at {percent:.1}%"),
        _ => info!("Project {project_id} refunded at {percent:.1}%"),
    }
    Ok(outcome)
}

/// Audit an enforcement failure unless this project already has one of the
/// same kind on record. Returns whether a new entry was written.
async fn record_failure(
    pool: &SqlitePool,
    project_id: ProjectId,
    error: &PlatformError,
) -> Result<bool> {
    let kind = error.kind();
    let mut tx = begin_write(pool).await?;
    let earlier = audit::project_actions(&mut tx, project_id, "ENFORCEMENT_FAILED").await?;
    let seen = earlier.iter().any(|record| {
        matches!(
            record.event(),
            Ok(AuditEvent::EnforcementFailed { kind: recorded, .. }) if recorded == kind
        )
    });
    if seen {
        return Ok(false);
    }

    audit::append(
        &mut tx,
        AuditEntry::new(
            AuditActor::System,
            Resource::Project(project_id),
            AuditEvent::EnforcementFailed {
                kind,
                error: error.to_string(),
            },
        )
        .failed(),
    )
    .await?;
    tx.commit().await?;
    Ok(true)
}
