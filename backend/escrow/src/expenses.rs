//! Expense engine: creator submissions under category rules, admin review.

use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{info, warn};

use crate::audit::{self, AuditEntry, AuditEvent, Resource};
use crate::config::ExpenseFundingSource;
use crate::db::{begin_write, unix_now};
use crate::errors::{PlatformError, Result};
use crate::ledger;
use crate::projects;
use crate::types::{
    Actor, Amount, Expense, ExpenseCategory, ExpenseId, ExpenseStatus, Owner, Project, ProjectId,
    Wallet,
};
use crate::wallets;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpenseSubmission {
    pub title: String,
    pub description: Option<String>,
    pub amount: Amount,
    /// Category name, matched case-insensitively against the global set.
    pub category: String,
    pub receipt_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewDecision {
    Approve,
    Reject,
}

const SELECT_EXPENSE: &str = r#"
    SELECT id, project_id, title, description, amount, category, receipt_url, funding_source,
           status, submitted_by, approved_by, review_reason, created_at
    FROM   expenses
"#;

async fn load_expense(conn: &mut SqliteConnection, expense_id: ExpenseId) -> Result<Expense> {
    let sql = format!("{SELECT_EXPENSE} WHERE id = ?1");
    sqlx::query_as::<_, Expense>(&sql)
        .bind(expense_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(PlatformError::ExpenseNotFound(expense_id))
}

/// The wallet an expense is paid from under `source`.
async fn funding_wallet(
    conn: &mut SqliteConnection,
    project: &Project,
    source: ExpenseFundingSource,
) -> Result<Wallet> {
    match source {
        ExpenseFundingSource::CreatorWallet => {
            ledger::require_by_owner(conn, Owner::User(project.creator_id)).await
        }
        ExpenseFundingSource::Escrow => ledger::load(conn, project.wallet_id).await,
    }
}

async fn check_rules(
    conn: &mut SqliteConnection,
    project_id: ProjectId,
    category: ExpenseCategory,
    submission: &ExpenseSubmission,
) -> Result<()> {
    let rules = projects::load_rules(conn, project_id).await?;
    if rules.is_empty() {
        return Ok(());
    }

    let rule = rules
        .iter()
        .find(|rule| rule.category == category)
        .ok_or_else(|| {
            PlatformError::RuleViolation(format!(
                "category {} is not allowed for project {project_id}",
                category.as_str()
            ))
        })?;
    if submission.amount > rule.max_amount {
        return Err(PlatformError::RuleViolation(format!(
            "{} expenses are capped at {} (got {})",
            category.as_str(),
            rule.max_amount,
            submission.amount
        )));
    }
    let has_receipt = submission
        .receipt_url
        .as_deref()
        .is_some_and(|url| !url.trim().is_empty());
    if rule.requires_receipt && !has_receipt {
        return Err(PlatformError::RuleViolation(format!(
            "{} expenses require a receipt",
            category.as_str()
        )));
    }
    Ok(())
}

pub async fn submit_expense(
    pool: &SqlitePool,
    actor: &Actor,
    project_id: ProjectId,
    submission: ExpenseSubmission,
    source: ExpenseFundingSource,
) -> Result<Expense> {
    ledger::ensure_positive(submission.amount)?;
    let category = ExpenseCategory::parse(&submission.category).ok_or_else(|| {
        PlatformError::RuleViolation(format!("unknown expense category {}", submission.category))
    })?;

    let mut tx = begin_write(pool).await?;
    let project = projects::load_project(&mut tx, project_id).await?;
    projects::require_creator(&project, actor, "submit expenses")?;
    if !project.status.is_spend_eligible() {
        return Err(PlatformError::InvalidState(format!(
            "project {project_id} is {} and cannot take expenses",
            project.status
        )));
    }
    check_rules(&mut tx, project_id, category, &submission).await?;

    // Funds are checked, not held, at submission time.
    let wallet = match source {
        ExpenseFundingSource::CreatorWallet => wallets::actor_wallet(&mut tx, actor).await?,
        ExpenseFundingSource::Escrow => ledger::load(&mut tx, project.wallet_id).await?,
    };
    if wallet.balance < submission.amount {
        return Err(match source {
            ExpenseFundingSource::CreatorWallet => PlatformError::InsufficientFunds {
                wallet_id: wallet.id,
                balance: wallet.balance,
                requested: submission.amount,
            },
            ExpenseFundingSource::Escrow => PlatformError::InsufficientEscrow {
                wallet_id: wallet.id,
                balance: wallet.balance,
                required: submission.amount,
            },
        });
    }

    let expense_id = sqlx::query(
        r#"
        INSERT INTO expenses
            (project_id, title, description, amount, category, receipt_url, funding_source,
             status, submitted_by, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        "#,
    )
    .bind(project_id)
    .bind(&submission.title)
    .bind(&submission.description)
    .bind(submission.amount)
    .bind(category)
    .bind(&submission.receipt_url)
    .bind(source)
    .bind(ExpenseStatus::Pending)
    .bind(actor.id)
    .bind(unix_now())
    .execute(&mut *tx)
    .await?
    .last_insert_rowid();

    audit::append(
        &mut tx,
        AuditEntry::new(
            actor.into(),
            Resource::Expense(expense_id),
            AuditEvent::ExpenseSubmitted {
                project_id,
                amount: submission.amount,
                category,
            },
        )
        .project(project_id),
    )
    .await?;
    let expense = load_expense(&mut tx, expense_id).await?;
    tx.commit().await?;

    info!(
        "Expense {expense_id} submitted on project {project_id}: {} {}",
        category.as_str(),
        submission.amount
    );
    Ok(expense)
}

/// Admin decision on a PENDING expense.
///
/// Approval pays the expense from the source recorded at submission: the
/// creator's own wallet is debited, or the escrow reimburses the creator's
/// wallet.
pub async fn review_expense(
    pool: &SqlitePool,
    actor: &Actor,
    expense_id: ExpenseId,
    decision: ReviewDecision,
    reason: Option<&str>,
) -> Result<Expense> {
    if !actor.is_admin() {
        return Err(PlatformError::Unauthorized(
            "only admins can review expenses".to_string(),
        ));
    }

    let mut tx = begin_write(pool).await?;
    let expense = load_expense(&mut tx, expense_id).await?;
    if expense.status != ExpenseStatus::Pending {
        return Err(PlatformError::InvalidState(format!(
            "expense {expense_id} was already reviewed"
        )));
    }

    let event = match decision {
        ReviewDecision::Reject => {
            sqlx::query("UPDATE expenses SET status = ?1, review_reason = ?2 WHERE id = ?3")
                .bind(ExpenseStatus::Rejected)
                .bind(reason)
                .bind(expense_id)
                .execute(&mut *tx)
                .await?;
            AuditEvent::ExpenseRejected {
                project_id: expense.project_id,
                reason: reason.map(str::to_string),
            }
        }
        ReviewDecision::Approve => {
            let project = projects::load_project(&mut tx, expense.project_id).await?;
            let source = expense.funding_source;
            let wallet = funding_wallet(&mut tx, &project, source).await?;
            let change = match source {
                ExpenseFundingSource::CreatorWallet => {
                    ledger::debit(&mut tx, wallet.id, expense.amount).await?
                }
                ExpenseFundingSource::Escrow => {
                    let change = ledger::debit_escrow(&mut tx, wallet.id, expense.amount).await?;
                    let creator =
                        ledger::get_or_create(&mut tx, Owner::User(project.creator_id)).await?;
                    ledger::credit(&mut tx, creator.id, expense.amount).await?;
                    change
                }
            };

            sqlx::query(
                "UPDATE expenses SET status = ?1, approved_by = ?2, review_reason = ?3 WHERE id = ?4",
            )
            .bind(ExpenseStatus::Approved)
            .bind(actor.id)
            .bind(reason)
            .bind(expense_id)
            .execute(&mut *tx)
            .await?;
            AuditEvent::ExpenseApproved {
                project_id: expense.project_id,
                wallet_id: wallet.id,
                amount: expense.amount,
                old_balance: change.old_balance,
                new_balance: change.new_balance,
            }
        }
    };

    audit::append(
        &mut tx,
        AuditEntry::new(actor.into(), Resource::Expense(expense_id), event)
            .project(expense.project_id),
    )
    .await?;
    let reviewed = load_expense(&mut tx, expense_id).await?;
    tx.commit().await?;

    match decision {
        ReviewDecision::Approve => info!("Expense {expense_id} approved: {}", expense.amount),
        ReviewDecision::Reject => warn!("Expense {expense_id} rejected: {reason:?}"),
    }
    Ok(reviewed)
}

fn visible_to(viewer: Option<&Actor>, expense: Expense) -> Expense {
    match viewer {
        Some(actor) if actor.is_privileged() => expense,
        _ => expense.redacted(),
    }
}

/// Expenses of a project. Receipts are stripped unless `viewer` is an
/// admin or creator.
pub async fn project_expenses(
    pool: &SqlitePool,
    viewer: Option<&Actor>,
    project_id: ProjectId,
) -> Result<Vec<Expense>> {
    let sql = format!("{SELECT_EXPENSE} WHERE project_id = ?1 ORDER BY id DESC");
    let rows = sqlx::query_as::<_, Expense>(&sql)
        .bind(project_id)
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(|e| visible_to(viewer, e)).collect())
}

pub async fn get_expense(
    pool: &SqlitePool,
    viewer: Option<&Actor>,
    expense_id: ExpenseId,
) -> Result<Expense> {
    let mut conn = pool.acquire().await?;
    let expense = load_expense(&mut conn, expense_id).await?;
    Ok(visible_to(viewer, expense))
}
