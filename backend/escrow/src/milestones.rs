//! Milestone tranche engine.
//!
//! Milestones are addressed by `(project_id, position)` and only change
//! through the operations here. They form a sequential gate: proof for
//! position `i` is accepted only once every earlier milestone is APPROVED.
//!
//! Contributors vote with a weight equal to their share of the funds raised.
//! A yes tally above 50 approves and releases the tranche in the same
//! transaction; a no tally of 50 or more rejects. A rejected milestone can be
//! resubmitted, which starts a fresh round of votes.

use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::info;

use crate::audit::{self, AuditActor, AuditEntry, AuditEvent, ReleaseTrigger, Resource};
use crate::contributions;
use crate::db::{begin_write, unix_now};
use crate::errors::{PlatformError, Result};
use crate::ledger;
use crate::projects;
use crate::types::{
    Actor, Amount, Milestone, MilestoneProof, MilestoneStatus, MilestoneType, Owner, Project,
    ProjectId, Vote, VoteChoice, WalletId,
};

/// Yes weight strictly above this approves.
pub const APPROVAL_THRESHOLD: f64 = 50.0;
/// No weight at or above this rejects.
pub const REJECTION_THRESHOLD: f64 = 50.0;

#[derive(sqlx::FromRow)]
struct MilestoneRow {
    project_id: ProjectId,
    position: i64,
    title: String,
    milestone_type: MilestoneType,
    text_proof: Option<String>,
    media_urls: String,
    final_link: Option<String>,
    status: MilestoneStatus,
    tranche_percent: i64,
    yes_weight: f64,
    no_weight: f64,
}

impl TryFrom<MilestoneRow> for Milestone {
    type Error = PlatformError;

    fn try_from(row: MilestoneRow) -> Result<Self> {
        Ok(Milestone {
            project_id: row.project_id,
            position: row.position,
            title: row.title,
            milestone_type: row.milestone_type,
            proof: MilestoneProof {
                text: row.text_proof,
                media_urls: serde_json::from_str(&row.media_urls)?,
                final_link: row.final_link,
            },
            status: row.status,
            tranche_percent: row.tranche_percent,
            yes_weight: row.yes_weight,
            no_weight: row.no_weight,
        })
    }
}

/// A completed tranche payout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrancheRelease {
    pub project_id: ProjectId,
    pub position: i64,
    pub amount: Amount,
    pub creator_wallet_id: WalletId,
}

/// Result of a single milestone vote.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoteOutcome {
    pub milestone: Milestone,
    pub weight: f64,
    pub release: Option<TrancheRelease>,
}

const SELECT_MILESTONE: &str = r#"
    SELECT project_id, position, title, milestone_type, text_proof, media_urls, final_link,
           status, tranche_percent, yes_weight, no_weight
    FROM   milestones
"#;

// ─────────────────────────────────────────────────────────
// Loading
// ─────────────────────────────────────────────────────────

async fn load_all(conn: &mut SqliteConnection, project_id: ProjectId) -> Result<Vec<Milestone>> {
    let sql = format!("{SELECT_MILESTONE} WHERE project_id = ?1 ORDER BY position ASC");
    sqlx::query_as::<_, MilestoneRow>(&sql)
        .bind(project_id)
        .fetch_all(&mut *conn)
        .await?
        .into_iter()
        .map(Milestone::try_from)
        .collect()
}

async fn load_one(
    conn: &mut SqliteConnection,
    project_id: ProjectId,
    position: i64,
) -> Result<Milestone> {
    let sql = format!("{SELECT_MILESTONE} WHERE project_id = ?1 AND position = ?2");
    let row = sqlx::query_as::<_, MilestoneRow>(&sql)
        .bind(project_id)
        .bind(position)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(PlatformError::MilestoneNotFound {
            project_id,
            position,
        })?;
    Milestone::try_from(row)
}

fn non_blank(value: Option<&str>) -> bool {
    value.is_some_and(|v| !v.trim().is_empty())
}

/// Each milestone type demands its own kind of evidence.
fn check_proof_shape(milestone_type: MilestoneType, proof: &MilestoneProof) -> Result<()> {
    let ok = match milestone_type {
        MilestoneType::Kickoff => non_blank(proof.text.as_deref()),
        MilestoneType::Production | MilestoneType::FinalDelivery => {
            proof.media_urls.iter().any(|url| !url.trim().is_empty())
        }
        MilestoneType::Release => non_blank(proof.final_link.as_deref()),
    };
    if ok {
        return Ok(());
    }
    let needed = match milestone_type {
        MilestoneType::Kickoff => "a text update",
        MilestoneType::Production | MilestoneType::FinalDelivery => "at least one media URL",
        MilestoneType::Release => "a final link",
    };
    Err(PlatformError::RuleViolation(format!(
        "{milestone_type:?} milestones require {needed}"
    )))
}

// ─────────────────────────────────────────────────────────
// Proof submission
// ─────────────────────────────────────────────────────────

pub async fn submit_milestone_proof(
    pool: &SqlitePool,
    actor: &Actor,
    project_id: ProjectId,
    position: i64,
    proof: MilestoneProof,
) -> Result<Milestone> {
    let mut tx = begin_write(pool).await?;
    let project = projects::load_project(&mut tx, project_id).await?;
    projects::require_creator(&project, actor, "submit milestone proof")?;

    let milestones = load_all(&mut tx, project_id).await?;
    let milestone = milestones
        .iter()
        .find(|m| m.position == position)
        .ok_or(PlatformError::MilestoneNotFound {
            project_id,
            position,
        })?;

    match milestone.status {
        MilestoneStatus::Pending | MilestoneStatus::Rejected => {}
        MilestoneStatus::Submitted => {
            return Err(PlatformError::InvalidState(format!(
                "milestone {position} is already under review"
            )))
        }
        MilestoneStatus::Approved => {
            return Err(PlatformError::InvalidState(format!(
                "milestone {position} is already approved"
            )))
        }
    }
    if let Some(blocking) = milestones
        .iter()
        .take_while(|m| m.position < position)
        .find(|m| m.status != MilestoneStatus::Approved)
    {
        return Err(PlatformError::InvalidState(format!(
            "milestone {} must be approved before milestone {position}",
            blocking.position
        )));
    }
    check_proof_shape(milestone.milestone_type, &proof)?;

    if milestone.status == MilestoneStatus::Rejected {
        sqlx::query("DELETE FROM milestone_votes WHERE project_id = ?1 AND position = ?2")
            .bind(project_id)
            .bind(position)
            .execute(&mut *tx)
            .await?;
    }

    sqlx::query(
        r#"
        UPDATE milestones
        SET    text_proof = ?1, media_urls = ?2, final_link = ?3, status = ?4,
               yes_weight = 0, no_weight = 0
        WHERE  project_id = ?5 AND position = ?6
        "#,
    )
    .bind(&proof.text)
    .bind(serde_json::to_string(&proof.media_urls)?)
    .bind(&proof.final_link)
    .bind(MilestoneStatus::Submitted)
    .bind(project_id)
    .bind(position)
    .execute(&mut *tx)
    .await?;

    audit::append(
        &mut tx,
        AuditEntry::new(
            actor.into(),
            Resource::Project(project_id),
            AuditEvent::MilestoneProofSubmitted {
                position,
                title: milestone.title.clone(),
                milestone_type: milestone.milestone_type,
            },
        ),
    )
    .await?;
    let submitted = load_one(&mut tx, project_id, position).await?;
    tx.commit().await?;

    info!("Milestone {position} of project {project_id} submitted for review");
    Ok(submitted)
}

// ─────────────────────────────────────────────────────────
// Tranche release
// ─────────────────────────────────────────────────────────

/// `current_funding * percent / 100`, floored.
pub fn tranche_amount(current_funding: Amount, percent: i64) -> Amount {
    ((current_funding as i128 * percent as i128) / 100) as Amount
}

/// Pay a milestone's tranche from escrow to the creator and mark it APPROVED.
async fn release_in_tx(
    conn: &mut SqliteConnection,
    actor: AuditActor,
    project: &Project,
    milestone: &Milestone,
    trigger: ReleaseTrigger,
) -> Result<TrancheRelease> {
    if milestone.status == MilestoneStatus::Approved {
        return Err(PlatformError::AlreadyReleased {
            project_id: project.id,
            position: milestone.position,
        });
    }

    let amount = tranche_amount(project.current_funding, milestone.tranche_percent);
    let creator_wallet = ledger::get_or_create(conn, Owner::User(project.creator_id)).await?;
    if amount > 0 {
        ledger::debit_escrow(conn, project.wallet_id, amount).await?;
        ledger::credit(conn, creator_wallet.id, amount).await?;
    }

    sqlx::query("UPDATE milestones SET status = ?1 WHERE project_id = ?2 AND position = ?3")
        .bind(MilestoneStatus::Approved)
        .bind(project.id)
        .bind(milestone.position)
        .execute(&mut *conn)
        .await?;

    audit::append(
        conn,
        AuditEntry::new(
            actor,
            Resource::Project(project.id),
            AuditEvent::TrancheReleased {
                position: milestone.position,
                amount,
                percent: milestone.tranche_percent,
                escrow_wallet_id: project.wallet_id,
                creator_wallet_id: creator_wallet.id,
                trigger,
            },
        ),
    )
    .await?;

    Ok(TrancheRelease {
        project_id: project.id,
        position: milestone.position,
        amount,
        creator_wallet_id: creator_wallet.id,
    })
}

/// Admin release of a milestone that has not been approved by vote.
pub async fn release_tranche(
    pool: &SqlitePool,
    actor: &Actor,
    project_id: ProjectId,
    position: i64,
) -> Result<TrancheRelease> {
    if !actor.is_admin() {
        return Err(PlatformError::Unauthorized(
            "only admins can release tranches directly".to_string(),
        ));
    }

    let mut tx = begin_write(pool).await?;
    let project = projects::load_project(&mut tx, project_id).await?;
    let milestone = load_one(&mut tx, project_id, position).await?;
    let release =
        release_in_tx(&mut tx, actor.into(), &project, &milestone, ReleaseTrigger::Admin).await?;
    tx.commit().await?;

    info!(
        "Tranche for milestone {position} of project {project_id} released by admin: {}",
        release.amount
    );
    Ok(release)
}

// ─────────────────────────────────────────────────────────
// Voting
// ─────────────────────────────────────────────────────────

pub async fn vote_on_milestone(
    pool: &SqlitePool,
    actor: &Actor,
    project_id: ProjectId,
    position: i64,
    choice: VoteChoice,
) -> Result<VoteOutcome> {
    let mut tx = begin_write(pool).await?;
    let project = projects::load_project(&mut tx, project_id).await?;
    let milestone = load_one(&mut tx, project_id, position).await?;
    if milestone.status != MilestoneStatus::Submitted {
        return Err(PlatformError::InvalidState(format!(
            "milestone {position} is not open for voting"
        )));
    }

    let already: Option<i64> = sqlx::query_scalar(
        "SELECT voter_id FROM milestone_votes WHERE project_id = ?1 AND position = ?2 AND voter_id = ?3",
    )
    .bind(project_id)
    .bind(position)
    .bind(actor.id)
    .fetch_optional(&mut *tx)
    .await?;
    if already.is_some() {
        return Err(PlatformError::AlreadyVoted(actor.id));
    }

    let weight = contributions::voting_weight(&mut tx, &project, actor.id).await?;
    sqlx::query(
        r#"
        INSERT INTO milestone_votes (project_id, position, voter_id, choice, weight, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
    )
    .bind(project_id)
    .bind(position)
    .bind(actor.id)
    .bind(choice)
    .bind(weight)
    .bind(unix_now())
    .execute(&mut *tx)
    .await?;

    let (yes_weight, no_weight) = match choice {
        VoteChoice::Yes => (milestone.yes_weight + weight, milestone.no_weight),
        VoteChoice::No => (milestone.yes_weight, milestone.no_weight + weight),
    };
    let outcome = if yes_weight > APPROVAL_THRESHOLD {
        MilestoneStatus::Approved
    } else if no_weight >= REJECTION_THRESHOLD {
        MilestoneStatus::Rejected
    } else {
        MilestoneStatus::Submitted
    };

    // Approval is persisted by the release itself.
    let persisted = match outcome {
        MilestoneStatus::Approved => MilestoneStatus::Submitted,
        other => other,
    };
    sqlx::query(
        r#"
        UPDATE milestones SET yes_weight = ?1, no_weight = ?2, status = ?3
        WHERE  project_id = ?4 AND position = ?5
        "#,
    )
    .bind(yes_weight)
    .bind(no_weight)
    .bind(persisted)
    .bind(project_id)
    .bind(position)
    .execute(&mut *tx)
    .await?;

    audit::append(
        &mut tx,
        AuditEntry::new(
            actor.into(),
            Resource::Project(project_id),
            AuditEvent::MilestoneVoteCast {
                position,
                choice,
                weight,
                yes_weight,
                no_weight,
                outcome,
            },
        ),
    )
    .await?;

    let release = if outcome == MilestoneStatus::Approved {
        Some(
            release_in_tx(
                &mut tx,
                AuditActor::System,
                &project,
                &milestone,
                ReleaseTrigger::Vote,
            )
            .await?,
        )
    } else {
        None
    };

    let milestone = load_one(&mut tx, project_id, position).await?;
    tx.commit().await?;

    info!(
        "Vote on milestone {position} of project {project_id}: {choice:?} weight {weight:.2} \
         (yes {yes_weight:.2}, no {no_weight:.2})"
    );
    if let Some(release) = &release {
        info!(
            "Milestone {position} of project {project_id} approved, released {}",
            release.amount
        );
    }
    Ok(VoteOutcome {
        milestone,
        weight,
        release,
    })
}

pub async fn project_milestones(
    pool: &SqlitePool,
    project_id: ProjectId,
) -> Result<Vec<Milestone>> {
    let mut conn = pool.acquire().await?;
    projects::load_project(&mut conn, project_id).await?;
    load_all(&mut conn, project_id).await
}

pub async fn milestone_votes(
    pool: &SqlitePool,
    project_id: ProjectId,
    position: i64,
) -> Result<Vec<Vote>> {
    let votes = sqlx::query_as::<_, Vote>(
        r#"
        SELECT voter_id, choice, weight FROM milestone_votes
        WHERE  project_id = ?1 AND position = ?2
        ORDER  BY created_at ASC, voter_id ASC
        "#,
    )
    .bind(project_id)
    .bind(position)
    .fetch_all(pool)
    .await?;
    Ok(votes)
}
