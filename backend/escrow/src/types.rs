//! # Types
//!
//! Domain records shared by every engine.
//!
//! Money is held in integer minor units ([`Amount`], paise for INR) so that
//! floor-rounded splits conserve value exactly. Percentages (creator stake,
//! tranche share) are whole numbers in `0..=100`; voting weights are `f64`
//! percentages of the funds raised.
//!
//! ## Project lifecycle
//!
//! ```text
//! Draft ──► Active ──► Funded ──► Completed
//!             │  └────► Frozen
//!             └───────► Cancelled (refund)
//! ```
//!
//! Explicit status updates by the creator or an admin may move a project
//! between any two states; the automatic transitions are `Active → Funded`
//! (goal crossed, or seed tier met at deadline) and `Active → Cancelled`
//! (seed tier missed at deadline).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::ExpenseFundingSource;

pub type UserId = i64;
pub type ProjectId = i64;
pub type WalletId = i64;
pub type ContributionId = i64;
pub type ExpenseId = i64;
pub type RevenueId = i64;
pub type RequestId = i64;
pub type AuditId = i64;

/// Integer minor units of [`CURRENCY`].
pub type Amount = i64;

/// The single supported currency.
pub const CURRENCY: &str = "INR";

// ─────────────────────────────────────────────────────────
// Identity
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Creator,
    Contributor,
    Admin,
}

/// An already-authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: UserId,
    pub role: Role,
    pub wallet_id: Option<WalletId>,
}

impl Actor {
    pub fn new(id: UserId, role: Role) -> Self {
        Self {
            id,
            role,
            wallet_id: None,
        }
    }

    pub fn with_wallet(mut self, wallet_id: WalletId) -> Self {
        self.wallet_id = Some(wallet_id);
        self
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Admins and creators see unredacted expense records.
    pub fn is_privileged(&self) -> bool {
        matches!(self.role, Role::Admin | Role::Creator)
    }
}

// ─────────────────────────────────────────────────────────
// Wallets
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OwnerKind {
    User,
    Project,
}

/// Who a wallet belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Owner {
    User(UserId),
    Project(ProjectId),
}

impl Owner {
    pub fn kind(&self) -> OwnerKind {
        match self {
            Self::User(_) => OwnerKind::User,
            Self::Project(_) => OwnerKind::Project,
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            Self::User(id) | Self::Project(id) => *id,
        }
    }

    pub fn from_parts(kind: OwnerKind, id: i64) -> Self {
        match kind {
            OwnerKind::User => Self::User(id),
            OwnerKind::Project => Self::Project(id),
        }
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id) => write!(f, "user {id}"),
            Self::Project(id) => write!(f, "project {id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Wallet {
    pub id: WalletId,
    pub owner_kind: OwnerKind,
    pub owner_id: i64,
    pub currency: String,
    pub balance: Amount,
    pub frozen: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Wallet {
    pub fn owner(&self) -> Owner {
        Owner::from_parts(self.owner_kind, self.owner_id)
    }
}

// ─────────────────────────────────────────────────────────
// Projects
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectStatus {
    Draft,
    Active,
    Funded,
    Frozen,
    Cancelled,
    Completed,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::Active => "ACTIVE",
            Self::Funded => "FUNDED",
            Self::Frozen => "FROZEN",
            Self::Cancelled => "CANCELLED",
            Self::Completed => "COMPLETED",
        }
    }

    /// Contributions and expense submissions are accepted in these states.
    pub fn is_spend_eligible(&self) -> bool {
        matches!(self, Self::Active | Self::Funded)
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Seed / production / success thresholds, as a percentage of the goal.
pub const SEED_TIER_PERCENT: i64 = 30;
pub const PRODUCTION_TIER_PERCENT: i64 = 70;
pub const SUCCESS_TIER_PERCENT: i64 = 100;

/// One-way funding tier flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tiers {
    pub seed_met: bool,
    pub production_met: bool,
    pub success_met: bool,
}

impl Tiers {
    /// Raise any flag whose threshold `funding` has crossed. Flags never drop.
    pub fn advance(self, funding: Amount, goal: Amount) -> Self {
        Self {
            seed_met: self.seed_met || reaches(funding, goal, SEED_TIER_PERCENT),
            production_met: self.production_met
                || reaches(funding, goal, PRODUCTION_TIER_PERCENT),
            success_met: self.success_met || reaches(funding, goal, SUCCESS_TIER_PERCENT),
        }
    }
}

/// `funding / goal * 100 >= percent`, without floating point.
pub fn reaches(funding: Amount, goal: Amount, percent: i64) -> bool {
    goal > 0 && (funding as i128) * 100 >= (goal as i128) * (percent as i128)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Project {
    pub id: ProjectId,
    pub creator_id: UserId,
    pub title: String,
    pub funding_goal: Amount,
    pub current_funding: Amount,
    pub creator_stake: i64,
    pub wallet_id: WalletId,
    pub deadline: i64,
    pub status: ProjectStatus,
    pub seed_met: bool,
    pub production_met: bool,
    pub success_met: bool,
    pub created_at: i64,
}

impl Project {
    pub fn tiers(&self) -> Tiers {
        Tiers {
            seed_met: self.seed_met,
            production_met: self.production_met,
            success_met: self.success_met,
        }
    }

    pub fn funding_percent(&self) -> f64 {
        if self.funding_goal <= 0 {
            return 0.0;
        }
        self.current_funding as f64 / self.funding_goal as f64 * 100.0
    }
}

// ─────────────────────────────────────────────────────────
// Milestones
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MilestoneType {
    Kickoff,
    Production,
    FinalDelivery,
    Release,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MilestoneStatus {
    Pending,
    Submitted,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VoteChoice {
    Yes,
    No,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MilestoneProof {
    pub text: Option<String>,
    pub media_urls: Vec<String>,
    pub final_link: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    pub project_id: ProjectId,
    pub position: i64,
    pub title: String,
    pub milestone_type: MilestoneType,
    pub proof: MilestoneProof,
    pub status: MilestoneStatus,
    pub tranche_percent: i64,
    pub yes_weight: f64,
    pub no_weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Vote {
    pub voter_id: UserId,
    pub choice: VoteChoice,
    pub weight: f64,
}

// ─────────────────────────────────────────────────────────
// Contributions
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContributionStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Contribution {
    pub id: ContributionId,
    pub contributor_id: UserId,
    pub project_id: ProjectId,
    pub amount: Amount,
    pub status: ContributionStatus,
    pub transaction_ref: String,
    pub created_at: i64,
}

// ─────────────────────────────────────────────────────────
// Expenses
// ─────────────────────────────────────────────────────────

/// The fixed, platform-wide set of spending categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExpenseCategory {
    Equipment,
    Travel,
    Production,
    Marketing,
    Miscellaneous,
}

impl ExpenseCategory {
    /// Parse a category name, case-insensitively.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "EQUIPMENT" => Some(Self::Equipment),
            "TRAVEL" => Some(Self::Travel),
            "PRODUCTION" => Some(Self::Production),
            "MARKETING" => Some(Self::Marketing),
            "MISCELLANEOUS" => Some(Self::Miscellaneous),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Equipment => "EQUIPMENT",
            Self::Travel => "TRAVEL",
            Self::Production => "PRODUCTION",
            Self::Marketing => "MARKETING",
            Self::Miscellaneous => "MISCELLANEOUS",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct SpendingRule {
    pub category: ExpenseCategory,
    pub max_amount: Amount,
    pub requires_receipt: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExpenseStatus {
    Pending,
    Approved,
    Rejected,
    Paid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Expense {
    pub id: ExpenseId,
    pub project_id: ProjectId,
    pub title: String,
    pub description: Option<String>,
    pub amount: Amount,
    pub category: ExpenseCategory,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt_url: Option<String>,
    pub funding_source: ExpenseFundingSource,
    pub status: ExpenseStatus,
    pub submitted_by: UserId,
    pub approved_by: Option<UserId>,
    pub review_reason: Option<String>,
    pub created_at: i64,
}

impl Expense {
    /// The public view: identical, minus the receipt.
    pub fn redacted(mut self) -> Self {
        self.receipt_url = None;
        self
    }
}

// ─────────────────────────────────────────────────────────
// Revenue
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RevenueStatus {
    Received,
    Distributed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Revenue {
    pub id: RevenueId,
    pub project_id: ProjectId,
    pub source: String,
    pub amount: Amount,
    pub period_start: Option<i64>,
    pub period_end: Option<i64>,
    pub external_ref: Option<String>,
    pub status: RevenueStatus,
    pub distributed_at: Option<i64>,
    pub created_at: i64,
}

// ─────────────────────────────────────────────────────────
// Governance
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GovernanceKind {
    DeadlineExtension,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GovernanceStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct GovernanceRequest {
    pub id: RequestId,
    pub project_id: ProjectId,
    pub creator_id: UserId,
    pub request_type: GovernanceKind,
    pub extension_days: i64,
    pub reason: String,
    pub status: GovernanceStatus,
    pub expires_at: i64,
    pub created_at: i64,
}
