//! Contributor governance over deadline extensions.
//!
//! A creator may ask for up to 30 extra days. Contributors vote with the
//! same funding-share weight used for milestones during a 48 hour window.
//! Expiry is enforced lazily, whenever the request is next touched.

use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{info, warn};

use crate::audit::{self, AuditActor, AuditEntry, AuditEvent, Resource};
use crate::contributions;
use crate::db::begin_write;
use crate::errors::{PlatformError, Result};
use crate::projects;
use crate::types::{
    Actor, GovernanceKind, GovernanceRequest, GovernanceStatus, ProjectId, RequestId, Vote,
    VoteChoice,
};

pub const MAX_EXTENSION_DAYS: i64 = 30;
pub const VOTING_WINDOW_SECS: i64 = 48 * 60 * 60;
const SECS_PER_DAY: i64 = 24 * 60 * 60;

/// Yes weight strictly above this approves an extension.
pub const APPROVAL_THRESHOLD: f64 = 51.0;
/// No weight at or above this rejects it.
pub const REJECTION_THRESHOLD: f64 = 50.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GovernanceVoteOutcome {
    pub request: GovernanceRequest,
    pub weight: f64,
    pub yes_weight: f64,
    pub no_weight: f64,
}

const SELECT_REQUEST: &str = r#"
    SELECT id, project_id, creator_id, request_type, extension_days, reason, status,
           expires_at, created_at
    FROM   governance_requests
"#;

async fn load_request(conn: &mut SqliteConnection, request_id: RequestId) -> Result<GovernanceRequest> {
    let sql = format!("{SELECT_REQUEST} WHERE id = ?1");
    sqlx::query_as::<_, GovernanceRequest>(&sql)
        .bind(request_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(PlatformError::RequestNotFound(request_id))
}

async fn set_request_status(
    conn: &mut SqliteConnection,
    request_id: RequestId,
    status: GovernanceStatus,
) -> Result<()> {
    sqlx::query("UPDATE governance_requests SET status = ?1 WHERE id = ?2")
        .bind(status)
        .bind(request_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Close a request whose window has lapsed.
async fn expire(conn: &mut SqliteConnection, request: &GovernanceRequest) -> Result<()> {
    set_request_status(conn, request.id, GovernanceStatus::Rejected).await?;
    audit::append(
        conn,
        AuditEntry::new(
            AuditActor::System,
            Resource::GovernanceRequest(request.id),
            AuditEvent::GovernanceRejected {
                request_id: request.id,
                expired: true,
            },
        )
        .project(request.project_id),
    )
    .await?;
    Ok(())
}

async fn tallies(conn: &mut SqliteConnection, request_id: RequestId) -> Result<(f64, f64)> {
    let (yes, no): (f64, f64) = sqlx::query_as(
        r#"
        SELECT COALESCE(SUM(CASE WHEN choice = 'YES' THEN weight ELSE 0.0 END), 0.0),
               COALESCE(SUM(CASE WHEN choice = 'NO'  THEN weight ELSE 0.0 END), 0.0)
        FROM   governance_votes
        WHERE  request_id = ?1
        "#,
    )
    .bind(request_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok((yes, no))
}

pub async fn request_extension(
    pool: &SqlitePool,
    actor: &Actor,
    project_id: ProjectId,
    extension_days: i64,
    reason: &str,
    now: i64,
) -> Result<GovernanceRequest> {
    if extension_days <= 0 || extension_days > MAX_EXTENSION_DAYS {
        return Err(PlatformError::RuleViolation(format!(
            "extension must be between 1 and {MAX_EXTENSION_DAYS} days (got {extension_days})"
        )));
    }

    let mut tx = begin_write(pool).await?;
    let project = projects::load_project(&mut tx, project_id).await?;
    projects::require_creator(&project, actor, "request a deadline extension")?;

    let sql = format!("{SELECT_REQUEST} WHERE project_id = ?1 AND status = ?2");
    let pending = sqlx::query_as::<_, GovernanceRequest>(&sql)
        .bind(project_id)
        .bind(GovernanceStatus::Pending)
        .fetch_all(&mut *tx)
        .await?;
    for request in &pending {
        if now > request.expires_at {
            expire(&mut tx, request).await?;
        } else {
            return Err(PlatformError::RequestAlreadyPending(project_id));
        }
    }

    let expires_at = now + VOTING_WINDOW_SECS;
    let request_id = sqlx::query(
        r#"
        INSERT INTO governance_requests
            (project_id, creator_id, request_type, extension_days, reason, status, expires_at, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
    )
    .bind(project_id)
    .bind(actor.id)
    .bind(GovernanceKind::DeadlineExtension)
    .bind(extension_days)
    .bind(reason)
    .bind(GovernanceStatus::Pending)
    .bind(expires_at)
    .bind(now)
    .execute(&mut *tx)
    .await?
    .last_insert_rowid();

    audit::append(
        &mut tx,
        AuditEntry::new(
            actor.into(),
            Resource::GovernanceRequest(request_id),
            AuditEvent::GovernanceRequestCreated {
                project_id,
                extension_days,
                reason: reason.to_string(),
                expires_at,
            },
        )
        .project(project_id),
    )
    .await?;
    let request = load_request(&mut tx, request_id).await?;
    tx.commit().await?;

    info!("Extension request {request_id} opened on project {project_id}: {extension_days} days");
    Ok(request)
}

pub async fn vote_on_request(
    pool: &SqlitePool,
    actor: &Actor,
    request_id: RequestId,
    choice: VoteChoice,
    now: i64,
) -> Result<GovernanceVoteOutcome> {
    let mut tx = begin_write(pool).await?;
    let request = load_request(&mut tx, request_id).await?;
    if request.status != GovernanceStatus::Pending {
        return Err(PlatformError::InvalidState(format!(
            "governance request {request_id} is already closed"
        )));
    }
    if now > request.expires_at {
        expire(&mut tx, &request).await?;
        tx.commit().await?;
        warn!("Governance request {request_id} expired before this vote");
        return Err(PlatformError::VotingClosed(request_id));
    }

    let already: Option<i64> = sqlx::query_scalar(
        "SELECT voter_id FROM governance_votes WHERE request_id = ?1 AND voter_id = ?2",
    )
    .bind(request_id)
    .bind(actor.id)
    .fetch_optional(&mut *tx)
    .await?;
    if already.is_some() {
        return Err(PlatformError::AlreadyVoted(actor.id));
    }

    let project = projects::load_project(&mut tx, request.project_id).await?;
    let weight = contributions::voting_weight(&mut tx, &project, actor.id).await?;
    sqlx::query(
        r#"
        INSERT INTO governance_votes (request_id, voter_id, choice, weight, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
    )
    .bind(request_id)
    .bind(actor.id)
    .bind(choice)
    .bind(weight)
    .bind(now)
    .execute(&mut *tx)
    .await?;
    audit::append(
        &mut tx,
        AuditEntry::new(
            actor.into(),
            Resource::GovernanceRequest(request_id),
            AuditEvent::GovernanceVoteCast {
                request_id,
                choice,
                weight,
            },
        )
        .project(project.id),
    )
    .await?;

    let (yes_weight, no_weight) = tallies(&mut tx, request_id).await?;
    if yes_weight > APPROVAL_THRESHOLD {
        let new_deadline = project.deadline + request.extension_days * SECS_PER_DAY;
        sqlx::query("UPDATE projects SET deadline = ?1 WHERE id = ?2")
            .bind(new_deadline)
            .bind(project.id)
            .execute(&mut *tx)
            .await?;
        set_request_status(&mut tx, request_id, GovernanceStatus::Approved).await?;
        audit::append(
            &mut tx,
            AuditEntry::new(
                AuditActor::System,
                Resource::Project(project.id),
                AuditEvent::GovernanceApproved {
                    request_id,
                    extension_days: request.extension_days,
                    old_deadline: project.deadline,
                    new_deadline,
                },
            ),
        )
        .await?;
    } else if no_weight >= REJECTION_THRESHOLD {
        set_request_status(&mut tx, request_id, GovernanceStatus::Rejected).await?;
        audit::append(
            &mut tx,
            AuditEntry::new(
                AuditActor::System,
                Resource::GovernanceRequest(request_id),
                AuditEvent::GovernanceRejected {
                    request_id,
                    expired: false,
                },
            )
            .project(project.id),
        )
        .await?;
    }

    let request = load_request(&mut tx, request_id).await?;
    tx.commit().await?;

    match request.status {
        GovernanceStatus::Approved => info!(
            "Extension request {request_id} approved, project {} deadline extended by {} days",
            project.id, request.extension_days
        ),
        GovernanceStatus::Rejected => info!("Extension request {request_id} rejected by vote"),
        GovernanceStatus::Pending => {}
    }

    Ok(GovernanceVoteOutcome {
        request,
        weight,
        yes_weight,
        no_weight,
    })
}

pub async fn project_requests(
    pool: &SqlitePool,
    project_id: ProjectId,
) -> Result<Vec<GovernanceRequest>> {
    let sql = format!("{SELECT_REQUEST} WHERE project_id = ?1 ORDER BY id DESC");
    let rows = sqlx::query_as::<_, GovernanceRequest>(&sql)
        .bind(project_id)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

pub async fn request_votes(pool: &SqlitePool, request_id: RequestId) -> Result<Vec<Vote>> {
    let votes = sqlx::query_as::<_, Vote>(
        "SELECT voter_id, choice, weight FROM governance_votes WHERE request_id = ?1 ORDER BY created_at, voter_id",
    )
    .bind(request_id)
    .fetch_all(pool)
    .await?;
    Ok(votes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::test_support::{backed_project, contributor, creator, NOW};
    use std::io;
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::fmt::MakeWriter;

    /// Collects formatted log lines for assertions.
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl CapturedLogs {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for CapturedLogs {
        type Writer = CapturedLogs;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[tokio::test]
    async fn extension_days_are_bounded() {
        let (pool, project) = backed_project(&[(20, 60_000)]).await;
        for days in [0, -3, 31] {
            let err = request_extension(&pool, &creator(), project.id, days, "late", NOW)
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::RuleViolation);
        }
        let err = request_extension(&pool, &contributor(20), project.id, 7, "late", NOW)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
    }

    #[tokio::test]
    async fn one_open_request_per_project() {
        let (pool, project) = backed_project(&[(20, 60_000)]).await;
        let request = request_extension(&pool, &creator(), project.id, 10, "weather", NOW)
            .await
            .unwrap();
        assert_eq!(request.status, GovernanceStatus::Pending);
        assert_eq!(request.expires_at, NOW + VOTING_WINDOW_SECS);

        let err = request_extension(&pool, &creator(), project.id, 5, "again", NOW + 60)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RequestAlreadyPending);

        // A lapsed request no longer blocks a new one.
        let later = NOW + VOTING_WINDOW_SECS + 1;
        let fresh = request_extension(&pool, &creator(), project.id, 5, "again", later)
            .await
            .unwrap();
        let requests = project_requests(&pool, project.id).await.unwrap();
        assert_eq!(requests.len(), 2);
        let stale = requests.iter().find(|r| r.id == request.id).unwrap();
        assert_eq!(stale.status, GovernanceStatus::Rejected);
        assert_eq!(fresh.status, GovernanceStatus::Pending);
    }

    #[tokio::test]
    async fn fifty_one_percent_is_not_enough() {
        let (pool, project) = backed_project(&[(20, 51_000), (21, 49_000)]).await;
        let request = request_extension(&pool, &creator(), project.id, 10, "weather", NOW)
            .await
            .unwrap();

        let outcome = vote_on_request(&pool, &contributor(20), request.id, VoteChoice::Yes, NOW + 1)
            .await
            .unwrap();
        assert!((outcome.yes_weight - 51.0).abs() < 1e-9);
        assert_eq!(outcome.request.status, GovernanceStatus::Pending);

        let outcome = vote_on_request(&pool, &contributor(21), request.id, VoteChoice::Yes, NOW + 2)
            .await
            .unwrap();
        assert_eq!(outcome.request.status, GovernanceStatus::Approved);

        let updated = projects::get_project(&pool, project.id).await.unwrap();
        assert_eq!(updated.deadline, project.deadline + 10 * SECS_PER_DAY);
    }

    #[tokio::test]
    async fn half_the_weight_voting_no_rejects() {
        let (pool, project) = backed_project(&[(20, 50_000), (21, 50_000)]).await;
        let request = request_extension(&pool, &creator(), project.id, 10, "weather", NOW)
            .await
            .unwrap();

        let outcome = vote_on_request(&pool, &contributor(20), request.id, VoteChoice::No, NOW + 1)
            .await
            .unwrap();
        assert_eq!(outcome.request.status, GovernanceStatus::Rejected);

        let err = vote_on_request(&pool, &contributor(21), request.id, VoteChoice::Yes, NOW + 2)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert_eq!(
            projects::get_project(&pool, project.id).await.unwrap().deadline,
            project.deadline
        );
    }

    #[tokio::test]
    async fn duplicate_votes_leave_tallies_alone() {
        let (pool, project) = backed_project(&[(20, 30_000), (21, 70_000)]).await;
        let request = request_extension(&pool, &creator(), project.id, 3, "post", NOW)
            .await
            .unwrap();
        vote_on_request(&pool, &contributor(20), request.id, VoteChoice::Yes, NOW + 1)
            .await
            .unwrap();
        let err = vote_on_request(&pool, &contributor(20), request.id, VoteChoice::No, NOW + 2)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyVoted);

        let votes = request_votes(&pool, request.id).await.unwrap();
        assert_eq!(votes.len(), 1);
        assert_eq!(votes[0].choice, VoteChoice::Yes);

        let err = vote_on_request(&pool, &contributor(99), request.id, VoteChoice::Yes, NOW + 3)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
    }

    #[tokio::test]
    async fn late_vote_closes_the_request() {
        let (pool, project) = backed_project(&[(20, 100_000)]).await;
        let request = request_extension(&pool, &creator(), project.id, 3, "post", NOW)
            .await
            .unwrap();

        let late = NOW + VOTING_WINDOW_SECS + 1;
        let err = vote_on_request(&pool, &contributor(20), request.id, VoteChoice::Yes, late)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::VotingClosed);

        let requests = project_requests(&pool, project.id).await.unwrap();
        assert_eq!(requests[0].status, GovernanceStatus::Rejected);
        let rejected = audit::by_action(&pool, "GOVERNANCE_REJECTED").await.unwrap();
        assert_eq!(rejected.len(), 1);
        assert_eq!(
            rejected[0].event().unwrap(),
            AuditEvent::GovernanceRejected {
                request_id: request.id,
                expired: true,
            }
        );
    }

    #[tokio::test]
    async fn approval_is_logged_once_committed() {
        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let (pool, project) = backed_project(&[(20, 60_000), (21, 40_000)]).await;
        let request = request_extension(&pool, &creator(), project.id, 7, "festival", NOW)
            .await
            .unwrap();

        vote_on_request(&pool, &contributor(21), request.id, VoteChoice::Yes, NOW + 1)
            .await
            .unwrap();
        assert!(!logs.text().contains("approved"));

        let outcome = vote_on_request(&pool, &contributor(20), request.id, VoteChoice::Yes, NOW + 2)
            .await
            .unwrap();
        assert_eq!(outcome.request.status, GovernanceStatus::Approved);
        let stored = project_requests(&pool, project.id).await.unwrap();
        assert_eq!(stored[0].status, GovernanceStatus::Approved);
        assert!(logs
            .text()
            .contains(&format!("Extension request {} approved", request.id)));
    }
}
