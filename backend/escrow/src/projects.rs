//! Project aggregate: creation, lookups and the status state machine.
//!
//! A project owns its escrow wallet, its ordered milestones and its spending
//! rules. All three are created together with the project row.

use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::info;

use crate::audit::{self, AuditActor, AuditEntry, AuditEvent, Resource};
use crate::db::begin_write;
use crate::errors::{PlatformError, Result};
use crate::ledger;
use crate::types::{
    Actor, Amount, MilestoneType, Owner, Project, ProjectId, ProjectStatus, Role, SpendingRule,
    Tiers,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMilestone {
    pub title: String,
    pub milestone_type: MilestoneType,
    pub tranche_percent: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProject {
    pub title: String,
    pub funding_goal: Amount,
    pub creator_stake: i64,
    pub deadline: i64,
    pub milestones: Vec<NewMilestone>,
    pub spending_rules: Vec<SpendingRule>,
}

const SELECT_PROJECT: &str = r#"
    SELECT id, creator_id, title, funding_goal, current_funding, creator_stake, wallet_id,
           deadline, status, seed_met, production_met, success_met, created_at
    FROM   projects
"#;

// ─────────────────────────────────────────────────────────
// Transaction-scoped helpers
// ─────────────────────────────────────────────────────────

pub(crate) async fn load_project(
    conn: &mut SqliteConnection,
    project_id: ProjectId,
) -> Result<Project> {
    let sql = format!("{SELECT_PROJECT} WHERE id = ?1");
    sqlx::query_as::<_, Project>(&sql)
        .bind(project_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(PlatformError::ProjectNotFound(project_id))
}

pub(crate) async fn load_rules(
    conn: &mut SqliteConnection,
    project_id: ProjectId,
) -> Result<Vec<SpendingRule>> {
    let rules = sqlx::query_as::<_, SpendingRule>(
        r#"
        SELECT category, max_amount, requires_receipt
        FROM   spending_rules
        WHERE  project_id = ?1
        ORDER  BY category
        "#,
    )
    .bind(project_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rules)
}

pub(crate) async fn set_status(
    conn: &mut SqliteConnection,
    project_id: ProjectId,
    status: ProjectStatus,
) -> Result<()> {
    sqlx::query("UPDATE projects SET status = ?1 WHERE id = ?2")
        .bind(status)
        .bind(project_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Persist a new funding total together with the (monotonic) tier flags.
pub(crate) async fn set_funding(
    conn: &mut SqliteConnection,
    project_id: ProjectId,
    current_funding: Amount,
    tiers: Tiers,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE projects
        SET    current_funding = ?1, seed_met = ?2, production_met = ?3, success_met = ?4
        WHERE  id = ?5
        "#,
    )
    .bind(current_funding)
    .bind(tiers.seed_met)
    .bind(tiers.production_met)
    .bind(tiers.success_met)
    .bind(project_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub(crate) fn require_creator(project: &Project, actor: &Actor, action: &str) -> Result<()> {
    if project.creator_id != actor.id {
        return Err(PlatformError::Unauthorized(format!(
            "only the creator of project {} can {action}",
            project.id
        )));
    }
    Ok(())
}

pub(crate) fn require_creator_or_admin(
    project: &Project,
    actor: &Actor,
    action: &str,
) -> Result<()> {
    if actor.is_admin() {
        return Ok(());
    }
    require_creator(project, actor, action)
}

// ─────────────────────────────────────────────────────────
// Operations
// ─────────────────────────────────────────────────────────

fn validate(new: &NewProject, now: i64) -> Result<()> {
    if new.title.trim().is_empty() {
        return Err(PlatformError::RuleViolation("title is required".to_string()));
    }
    if new.funding_goal <= 0 {
        return Err(PlatformError::InvalidAmount(new.funding_goal));
    }
    if !(0..=100).contains(&new.creator_stake) {
        return Err(PlatformError::RuleViolation(format!(
            "creator stake must be between 0 and 100 (got {})",
            new.creator_stake
        )));
    }
    if new.deadline <= now {
        return Err(PlatformError::RuleViolation(
            "deadline must be in the future".to_string(),
        ));
    }

    let mut tranche_total = 0;
    for milestone in &new.milestones {
        if !(1..=100).contains(&milestone.tranche_percent) {
            return Err(PlatformError::RuleViolation(format!(
                "tranche for milestone '{}' must be between 1 and 100",
                milestone.title
            )));
        }
        tranche_total += milestone.tranche_percent;
    }
    if tranche_total > 100 {
        return Err(PlatformError::RuleViolation(format!(
            "milestone tranches sum to {tranche_total}%, above 100%"
        )));
    }

    for (i, rule) in new.spending_rules.iter().enumerate() {
        if rule.max_amount <= 0 {
            return Err(PlatformError::InvalidAmount(rule.max_amount));
        }
        if new.spending_rules[..i]
            .iter()
            .any(|earlier| earlier.category == rule.category)
        {
            return Err(PlatformError::RuleViolation(format!(
                "duplicate spending rule for {}",
                rule.category.as_str()
            )));
        }
    }
    Ok(())
}

/// Create a DRAFT project with its escrow wallet, milestones and rules.
pub async fn create_project(
    pool: &SqlitePool,
    actor: &Actor,
    new: NewProject,
    now: i64,
) -> Result<Project> {
    if !matches!(actor.role, Role::Creator | Role::Admin) {
        return Err(PlatformError::Unauthorized(
            "only creators can create projects".to_string(),
        ));
    }
    validate(&new, now)?;

    let mut tx = begin_write(pool).await?;
    let project_id = sqlx::query(
        r#"
        INSERT INTO projects (creator_id, title, funding_goal, creator_stake, deadline, status, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
    )
    .bind(actor.id)
    .bind(new.title.trim())
    .bind(new.funding_goal)
    .bind(new.creator_stake)
    .bind(new.deadline)
    .bind(ProjectStatus::Draft)
    .bind(now)
    .execute(&mut *tx)
    .await?
    .last_insert_rowid();

    let (wallet, _) = ledger::create(&mut tx, Owner::Project(project_id)).await?;
    sqlx::query("UPDATE projects SET wallet_id = ?1 WHERE id = ?2")
        .bind(wallet.id)
        .bind(project_id)
        .execute(&mut *tx)
        .await?;

    for (position, milestone) in new.milestones.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO milestones (project_id, position, title, milestone_type, tranche_percent)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(project_id)
        .bind(position as i64)
        .bind(&milestone.title)
        .bind(milestone.milestone_type)
        .bind(milestone.tranche_percent)
        .execute(&mut *tx)
        .await?;
    }

    for rule in &new.spending_rules {
        sqlx::query(
            r#"
            INSERT INTO spending_rules (project_id, category, max_amount, requires_receipt)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(project_id)
        .bind(rule.category)
        .bind(rule.max_amount)
        .bind(rule.requires_receipt)
        .execute(&mut *tx)
        .await?;
    }

    audit::append(
        &mut tx,
        AuditEntry::new(
            actor.into(),
            Resource::Wallet(wallet.id),
            AuditEvent::WalletCreated {
                wallet_id: wallet.id,
                owner: wallet.owner(),
            },
        )
        .project(project_id),
    )
    .await?;
    audit::append(
        &mut tx,
        AuditEntry::new(
            actor.into(),
            Resource::Project(project_id),
            AuditEvent::ProjectCreated {
                title: new.title.trim().to_string(),
                funding_goal: new.funding_goal,
                escrow_wallet_id: wallet.id,
                milestones: new.milestones.len(),
            },
        ),
    )
    .await?;

    let project = load_project(&mut tx, project_id).await?;
    tx.commit().await?;

    info!(
        "Project {project_id} created by user {} with goal {}",
        actor.id, project.funding_goal
    );
    Ok(project)
}

/// Explicit status change by the project's creator or an admin.
pub async fn update_project_status(
    pool: &SqlitePool,
    actor: &Actor,
    project_id: ProjectId,
    status: ProjectStatus,
) -> Result<Project> {
    let mut tx = begin_write(pool).await?;
    let project = load_project(&mut tx, project_id).await?;
    require_creator_or_admin(&project, actor, "change its status")?;

    set_status(&mut tx, project_id, status).await?;
    audit::append(
        &mut tx,
        AuditEntry::new(
            AuditActor::from(actor),
            Resource::Project(project_id),
            AuditEvent::ProjectStatusUpdated {
                old_status: project.status,
                new_status: status,
            },
        ),
    )
    .await?;
    let project = load_project(&mut tx, project_id).await?;
    tx.commit().await?;

    info!("Project {project_id} status -> {status}");
    Ok(project)
}

pub async fn get_project(pool: &SqlitePool, project_id: ProjectId) -> Result<Project> {
    let mut conn = pool.acquire().await?;
    load_project(&mut conn, project_id).await
}

/// All projects, optionally filtered by status, newest first.
pub async fn list_projects(
    pool: &SqlitePool,
    status: Option<ProjectStatus>,
) -> Result<Vec<Project>> {
    let projects = match status {
        Some(status) => {
            let sql = format!("{SELECT_PROJECT} WHERE status = ?1 ORDER BY id DESC");
            sqlx::query_as::<_, Project>(&sql)
                .bind(status)
                .fetch_all(pool)
                .await?
        }
        None => {
            let sql = format!("{SELECT_PROJECT} ORDER BY id DESC");
            sqlx::query_as::<_, Project>(&sql).fetch_all(pool).await?
        }
    };
    Ok(projects)
}

/// ACTIVE projects whose deadline is strictly before `now`.
pub(crate) async fn expired_active(pool: &SqlitePool, now: i64) -> Result<Vec<Project>> {
    let sql = format!("{SELECT_PROJECT} WHERE status = ?1 AND deadline < ?2 ORDER BY id ASC");
    let projects = sqlx::query_as::<_, Project>(&sql)
        .bind(ProjectStatus::Active)
        .bind(now)
        .fetch_all(pool)
        .await?;
    Ok(projects)
}

pub async fn project_rules(pool: &SqlitePool, project_id: ProjectId) -> Result<Vec<SpendingRule>> {
    let mut conn = pool.acquire().await?;
    load_project(&mut conn, project_id).await?;
    load_rules(&mut conn, project_id).await
}
