//! Application-wide error types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Amount, ProjectId, ProjectStatus, RequestId, RevenueId, WalletId};

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    // ── Lookups ──────────────────────────────────────────────
    #[error("Project {0} not found")]
    ProjectNotFound(ProjectId),

    #[error("Milestone {position} not found on project {project_id}")]
    MilestoneNotFound { project_id: ProjectId, position: i64 },

    #[error("Wallet {0} not found")]
    WalletNotFound(WalletId),

    #[error("No wallet linked to {0}")]
    NoWallet(String),

    #[error("Expense {0} not found")]
    ExpenseNotFound(i64),

    #[error("Revenue record {0} not found")]
    RevenueNotFound(RevenueId),

    #[error("Governance request {0} not found")]
    RequestNotFound(RequestId),

    // ── Authorization ────────────────────────────────────────
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    // ── Money ────────────────────────────────────────────────
    #[error("Amount must be positive (got {0})")]
    InvalidAmount(Amount),

    #[error("Insufficient funds in wallet {wallet_id}: balance {balance}, requested {requested}")]
    InsufficientFunds {
        wallet_id: WalletId,
        balance: Amount,
        requested: Amount,
    },

    #[error("Insufficient escrow in wallet {wallet_id}: balance {balance}, required {required}")]
    InsufficientEscrow {
        wallet_id: WalletId,
        balance: Amount,
        required: Amount,
    },

    #[error("Wallet {0} is frozen")]
    WalletFrozen(WalletId),

    // ── State machine ────────────────────────────────────────
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Project is not accepting funds (status: {0})")]
    ProjectNotAcceptingFunds(ProjectStatus),

    #[error("Revenue record {0} was already distributed")]
    AlreadyDistributed(RevenueId),

    #[error("No completed contributions on project {0} to distribute to")]
    NoContributors(ProjectId),

    #[error("Only contributors of project {0} can vote")]
    NotAContributor(ProjectId),

    // ── Duplicate guards ─────────────────────────────────────
    #[error("Voter {0} has already voted")]
    AlreadyVoted(i64),

    #[error("Milestone {position} of project {project_id} was already released")]
    AlreadyReleased { project_id: ProjectId, position: i64 },

    #[error("A governance request is already pending for project {0}")]
    RequestAlreadyPending(ProjectId),

    #[error("Voting window for request {0} has closed")]
    VotingClosed(RequestId),

    // ── Business rules ───────────────────────────────────────
    #[error("Rule violation: {0}")]
    RuleViolation(String),
}

pub type Result<T> = std::result::Result<T, PlatformError>;

/// Stable, caller-facing classification of a [`PlatformError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    NotFound,
    Unauthorized,
    InvalidAmount,
    InsufficientFunds,
    InsufficientEscrow,
    WalletFrozen,
    InvalidState,
    AlreadyVoted,
    AlreadyReleased,
    RequestAlreadyPending,
    RuleViolation,
    VotingClosed,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::InvalidAmount => "INVALID_AMOUNT",
            Self::InsufficientFunds => "INSUFFICIENT_FUNDS",
            Self::InsufficientEscrow => "INSUFFICIENT_ESCROW",
            Self::WalletFrozen => "WALLET_FROZEN",
            Self::InvalidState => "INVALID_STATE",
            Self::AlreadyVoted => "ALREADY_VOTED",
            Self::AlreadyReleased => "ALREADY_RELEASED",
            Self::RequestAlreadyPending => "REQUEST_ALREADY_PENDING",
            Self::RuleViolation => "RULE_VIOLATION",
            Self::VotingClosed => "VOTING_CLOSED",
            Self::Internal => "INTERNAL",
        }
    }
}

impl PlatformError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Database(_) | Self::Migrate(_) | Self::Json(_) | Self::Config(_) => {
                ErrorKind::Internal
            }
            Self::ProjectNotFound(_)
            | Self::MilestoneNotFound { .. }
            | Self::WalletNotFound(_)
            | Self::NoWallet(_)
            | Self::ExpenseNotFound(_)
            | Self::RevenueNotFound(_)
            | Self::RequestNotFound(_)
            | Self::NoContributors(_) => ErrorKind::NotFound,
            Self::Unauthorized(_) | Self::NotAContributor(_) => ErrorKind::Unauthorized,
            Self::InvalidAmount(_) => ErrorKind::InvalidAmount,
            Self::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            Self::InsufficientEscrow { .. } => ErrorKind::InsufficientEscrow,
            Self::WalletFrozen(_) => ErrorKind::WalletFrozen,
            Self::InvalidState(_)
            | Self::ProjectNotAcceptingFunds(_)
            | Self::AlreadyDistributed(_) => ErrorKind::InvalidState,
            Self::AlreadyVoted(_) => ErrorKind::AlreadyVoted,
            Self::AlreadyReleased { .. } => ErrorKind::AlreadyReleased,
            Self::RequestAlreadyPending(_) => ErrorKind::RequestAlreadyPending,
            Self::VotingClosed(_) => ErrorKind::VotingClosed,
            Self::RuleViolation(_) => ErrorKind::RuleViolation,
        }
    }
}
