//! Append-only audit trail.
//!
//! Every state-changing operation appends one or more entries inside its own
//! transaction, so an audit failure aborts the mutation it describes. Rows are
//! protected from `UPDATE` and `DELETE` by triggers in the schema.

use serde::{Deserialize, Serialize, Serializer};
use sqlx::{SqliteConnection, SqlitePool};

use crate::db::unix_now;
use crate::errors::{ErrorKind, Result};
use crate::types::{
    Actor, Amount, AuditId, ContributionId, ExpenseCategory, MilestoneStatus, MilestoneType,
    Owner, ProjectId, ProjectStatus, RequestId, RevenueId, UserId, VoteChoice, WalletId,
};

/// Who performed an audited action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditActor {
    User(UserId),
    System,
}

impl From<&Actor> for AuditActor {
    fn from(actor: &Actor) -> Self {
        Self::User(actor.id)
    }
}

/// The record an entry is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Project(ProjectId),
    Wallet(WalletId),
    Contribution(ContributionId),
    Expense(i64),
    Revenue(RevenueId),
    GovernanceRequest(RequestId),
}

impl Resource {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Project(_) => "PROJECT",
            Self::Wallet(_) => "WALLET",
            Self::Contribution(_) => "CONTRIBUTION",
            Self::Expense(_) => "EXPENSE",
            Self::Revenue(_) => "REVENUE",
            Self::GovernanceRequest(_) => "GOVERNANCE_REQUEST",
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            Self::Project(id)
            | Self::Wallet(id)
            | Self::Contribution(id)
            | Self::Expense(id)
            | Self::Revenue(id)
            | Self::GovernanceRequest(id) => *id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReleaseTrigger {
    Vote,
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PayoutReason {
    CreatorStake,
    RevenueShare,
}

/// Structured detail payload, one variant per audited action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "details", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEvent {
    WalletCreated {
        wallet_id: WalletId,
        owner: Owner,
    },
    FundsAdded {
        wallet_id: WalletId,
        amount: Amount,
        old_balance: Amount,
        new_balance: Amount,
    },
    FundsWithdrawn {
        wallet_id: WalletId,
        amount: Amount,
        old_balance: Amount,
        new_balance: Amount,
    },
    GovernanceFreeze {
        project_id: ProjectId,
        wallet_id: WalletId,
        reason: String,
    },
    GovernanceUnfreeze {
        project_id: ProjectId,
        wallet_id: WalletId,
        reason: String,
    },
    ProjectCreated {
        title: String,
        funding_goal: Amount,
        escrow_wallet_id: WalletId,
        milestones: usize,
    },
    ProjectStatusUpdated {
        old_status: ProjectStatus,
        new_status: ProjectStatus,
    },
    Contribution {
        contribution_id: ContributionId,
        amount: Amount,
        currency: String,
        contributor_wallet_id: WalletId,
        escrow_wallet_id: WalletId,
        contributor_old_balance: Amount,
        contributor_new_balance: Amount,
        escrow_old_balance: Amount,
        escrow_new_balance: Amount,
        transaction_ref: String,
    },
    ProjectAutoFunded {
        final_funding: Amount,
        funding_percent: f64,
        reason: String,
    },
    Refund {
        contribution_id: ContributionId,
        contributor_id: UserId,
        contributor_wallet_id: WalletId,
        escrow_wallet_id: WalletId,
        amount: Amount,
        reason: String,
    },
    ProjectRefunded {
        refunded_count: usize,
        total_refunded: Amount,
        escrow_wallet_id: WalletId,
        reason: String,
    },
    ExpenseSubmitted {
        project_id: ProjectId,
        amount: Amount,
        category: ExpenseCategory,
    },
    ExpenseApproved {
        project_id: ProjectId,
        wallet_id: WalletId,
        amount: Amount,
        old_balance: Amount,
        new_balance: Amount,
    },
    ExpenseRejected {
        project_id: ProjectId,
        reason: Option<String>,
    },
    MilestoneProofSubmitted {
        position: i64,
        title: String,
        milestone_type: MilestoneType,
    },
    MilestoneVoteCast {
        position: i64,
        choice: VoteChoice,
        weight: f64,
        yes_weight: f64,
        no_weight: f64,
        outcome: MilestoneStatus,
    },
    TrancheReleased {
        position: i64,
        amount: Amount,
        percent: i64,
        escrow_wallet_id: WalletId,
        creator_wallet_id: WalletId,
        trigger: ReleaseTrigger,
    },
    RevenueReceived {
        project_id: ProjectId,
        amount: Amount,
        source: String,
    },
    Payout {
        revenue_id: RevenueId,
        amount: Amount,
        reason: PayoutReason,
        stake_percent: Option<i64>,
        wallet_id: WalletId,
        old_balance: Amount,
        new_balance: Amount,
    },
    PayoutRemainder {
        revenue_id: RevenueId,
        amount: Amount,
        escrow_wallet_id: WalletId,
    },
    RevenueDistributed {
        revenue_id: RevenueId,
        total: Amount,
        recipient_count: usize,
    },
    GovernanceRequestCreated {
        project_id: ProjectId,
        extension_days: i64,
        reason: String,
        expires_at: i64,
    },
    GovernanceVoteCast {
        request_id: RequestId,
        choice: VoteChoice,
        weight: f64,
    },
    GovernanceApproved {
        request_id: RequestId,
        extension_days: i64,
        old_deadline: i64,
        new_deadline: i64,
    },
    GovernanceRejected {
        request_id: RequestId,
        expired: bool,
    },
    EnforcementFailed {
        kind: ErrorKind,
        error: String,
    },
}

impl AuditEvent {
    /// The action tag stored alongside the payload.
    pub fn action(&self) -> &'static str {
        match self {
            Self::WalletCreated { .. } => "WALLET_CREATED",
            Self::FundsAdded { .. } => "FUNDS_ADDED",
            Self::FundsWithdrawn { .. } => "FUNDS_WITHDRAWN",
            Self::GovernanceFreeze { .. } => "GOVERNANCE_FREEZE",
            Self::GovernanceUnfreeze { .. } => "GOVERNANCE_UNFREEZE",
            Self::ProjectCreated { .. } => "PROJECT_CREATED",
            Self::ProjectStatusUpdated { .. } => "PROJECT_STATUS_UPDATED",
            Self::Contribution { .. } => "CONTRIBUTION",
            Self::ProjectAutoFunded { .. } => "PROJECT_AUTO_FUNDED",
            Self::Refund { .. } => "REFUND",
            Self::ProjectRefunded { .. } => "PROJECT_REFUNDED",
            Self::ExpenseSubmitted { .. } => "EXPENSE_SUBMITTED",
            Self::ExpenseApproved { .. } => "EXPENSE_APPROVED",
            Self::ExpenseRejected { .. } => "EXPENSE_REJECTED",
            Self::MilestoneProofSubmitted { .. } => "MILESTONE_PROOF_SUBMITTED",
            Self::MilestoneVoteCast { .. } => "MILESTONE_VOTE_CAST",
            Self::TrancheReleased { .. } => "TRANCHE_RELEASED",
            Self::RevenueReceived { .. } => "REVENUE_RECEIVED",
            Self::Payout { .. } => "PAYOUT",
            Self::PayoutRemainder { .. } => "PAYOUT_REMAINDER",
            Self::RevenueDistributed { .. } => "REVENUE_DISTRIBUTED",
            Self::GovernanceRequestCreated { .. } => "GOVERNANCE_REQUEST_CREATED",
            Self::GovernanceVoteCast { .. } => "GOVERNANCE_VOTE_CAST",
            Self::GovernanceApproved { .. } => "GOVERNANCE_APPROVED",
            Self::GovernanceRejected { .. } => "GOVERNANCE_REJECTED",
            Self::EnforcementFailed { .. } => "ENFORCEMENT_FAILED",
        }
    }
}

/// An entry waiting to be appended.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub actor: AuditActor,
    pub resource: Resource,
    pub project_id: Option<ProjectId>,
    pub event: AuditEvent,
    pub success: bool,
}

impl AuditEntry {
    pub fn new(actor: AuditActor, resource: Resource, event: AuditEvent) -> Self {
        let project_id = match resource {
            Resource::Project(id) => Some(id),
            _ => None,
        };
        Self {
            actor,
            resource,
            project_id,
            event,
            success: true,
        }
    }

    /// Attach the entry to a project's timeline.
    pub fn project(mut self, project_id: ProjectId) -> Self {
        self.project_id = Some(project_id);
        self
    }

    pub fn failed(mut self) -> Self {
        self.success = false;
        self
    }
}

/// A persisted audit row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct AuditRecord {
    pub id: AuditId,
    pub action: String,
    pub actor_kind: String,
    pub actor_id: Option<UserId>,
    pub resource_kind: String,
    pub resource_id: i64,
    pub project_id: Option<ProjectId>,
    #[serde(serialize_with = "as_raw_json")]
    pub details: String,
    pub status: String,
    pub created_at: i64,
}

impl AuditRecord {
    pub fn event(&self) -> Result<AuditEvent> {
        Ok(serde_json::from_str(&self.details)?)
    }
}

fn as_raw_json<S: Serializer>(details: &str, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    match serde_json::from_str::<serde_json::Value>(details) {
        Ok(value) => value.serialize(serializer),
        Err(_) => serializer.serialize_str(details),
    }
}

// ─────────────────────────────────────────────────────────
// Writes
// ─────────────────────────────────────────────────────────

/// Append one entry on the caller's connection (normally a transaction).
pub async fn append(conn: &mut SqliteConnection, entry: AuditEntry) -> Result<AuditId> {
    let details = serde_json::to_string(&entry.event)?;
    let (actor_kind, actor_id) = match entry.actor {
        AuditActor::User(id) => ("USER", Some(id)),
        AuditActor::System => ("SYSTEM", None),
    };

    let id = sqlx::query(
        r#"
        INSERT INTO audit_logs
            (action, actor_kind, actor_id, resource_kind, resource_id, project_id,
             details, status, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
    )
    .bind(entry.event.action())
    .bind(actor_kind)
    .bind(actor_id)
    .bind(entry.resource.kind())
    .bind(entry.resource.id())
    .bind(entry.project_id)
    .bind(details)
    .bind(if entry.success { "SUCCESS" } else { "FAILURE" })
    .bind(unix_now())
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    Ok(id)
}

// ─────────────────────────────────────────────────────────
// Reads
// ─────────────────────────────────────────────────────────

const SELECT_AUDIT: &str = r#"
    SELECT id, action, actor_kind, actor_id, resource_kind, resource_id, project_id,
           details, status, created_at
    FROM   audit_logs
"#;

/// Entries about a project or attached to its timeline, newest first.
pub async fn project_timeline(pool: &SqlitePool, project_id: ProjectId) -> Result<Vec<AuditRecord>> {
    let sql = format!(
        "{SELECT_AUDIT} WHERE (resource_kind = 'PROJECT' AND resource_id = ?1) OR project_id = ?1 \
         ORDER BY created_at DESC, id DESC"
    );
    let rows = sqlx::query_as::<_, AuditRecord>(&sql)
        .bind(project_id)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

/// The latest `limit` entries across the platform.
pub async fn recent(pool: &SqlitePool, limit: i64) -> Result<Vec<AuditRecord>> {
    let sql = format!("{SELECT_AUDIT} ORDER BY created_at DESC, id DESC LIMIT ?1");
    let rows = sqlx::query_as::<_, AuditRecord>(&sql)
        .bind(limit.max(0))
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

/// Entries carrying `action` on one project's timeline, oldest first.
pub async fn project_actions(
    conn: &mut SqliteConnection,
    project_id: ProjectId,
    action: &str,
) -> Result<Vec<AuditRecord>> {
    let sql = format!("{SELECT_AUDIT} WHERE project_id = ?1 AND action = ?2 ORDER BY id ASC");
    let rows = sqlx::query_as::<_, AuditRecord>(&sql)
        .bind(project_id)
        .bind(action)
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows)
}

/// All entries carrying `action`, oldest first.
pub async fn by_action(pool: &SqlitePool, action: &str) -> Result<Vec<AuditRecord>> {
    let sql = format!("{SELECT_AUDIT} WHERE action = ?1 ORDER BY id ASC");
    let rows = sqlx::query_as::<_, AuditRecord>(&sql)
        .bind(action)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}
