//! User-facing wallet operations.
//!
//! Deposits and withdrawals simulate a payment gateway: they move nothing
//! outside the ledger, but are audited like every other balance change.

use sqlx::{SqliteConnection, SqlitePool};
use tracing::info;

use crate::audit::{self, AuditActor, AuditEntry, AuditEvent, Resource};
use crate::db::begin_write;
use crate::errors::{PlatformError, Result};
use crate::ledger;
use crate::projects;
use crate::types::{Actor, Amount, Owner, ProjectId, Wallet};

/// The actor's personal wallet.
///
/// A wallet id carried on the actor must belong to that actor.
pub(crate) async fn actor_wallet(conn: &mut SqliteConnection, actor: &Actor) -> Result<Wallet> {
    match actor.wallet_id {
        Some(wallet_id) => {
            let wallet = ledger::load(conn, wallet_id).await?;
            if wallet.owner() != Owner::User(actor.id) {
                return Err(PlatformError::Unauthorized(format!(
                    "wallet {wallet_id} does not belong to user {}",
                    actor.id
                )));
            }
            Ok(wallet)
        }
        None => ledger::require_by_owner(conn, Owner::User(actor.id)).await,
    }
}

/// Create the actor's wallet, or return the one they already have.
pub async fn open_wallet(pool: &SqlitePool, actor: &Actor) -> Result<Wallet> {
    let mut tx = begin_write(pool).await?;
    let (wallet, created) = ledger::create(&mut tx, Owner::User(actor.id)).await?;
    if created {
        audit::append(
            &mut tx,
            AuditEntry::new(
                actor.into(),
                Resource::Wallet(wallet.id),
                AuditEvent::WalletCreated {
                    wallet_id: wallet.id,
                    owner: wallet.owner(),
                },
            ),
        )
        .await?;
    }
    tx.commit().await?;

    if created {
        info!("Opened wallet {} for user {}", wallet.id, actor.id);
    }
    Ok(wallet)
}

pub async fn my_wallet(pool: &SqlitePool, actor: &Actor) -> Result<Wallet> {
    let mut conn = pool.acquire().await?;
    actor_wallet(&mut conn, actor).await
}

/// Simulated gateway deposit.
pub async fn add_funds(pool: &SqlitePool, actor: &Actor, amount: Amount) -> Result<Wallet> {
    ledger::ensure_positive(amount)?;
    let mut tx = begin_write(pool).await?;
    let wallet = actor_wallet(&mut tx, actor).await?;
    let change = ledger::credit(&mut tx, wallet.id, amount).await?;
    audit::append(
        &mut tx,
        AuditEntry::new(
            actor.into(),
            Resource::Wallet(wallet.id),
            AuditEvent::FundsAdded {
                wallet_id: wallet.id,
                amount,
                old_balance: change.old_balance,
                new_balance: change.new_balance,
            },
        ),
    )
    .await?;
    let wallet = ledger::load(&mut tx, wallet.id).await?;
    tx.commit().await?;

    info!("Wallet {} funded with {amount}", wallet.id);
    Ok(wallet)
}

/// Simulated gateway withdrawal.
pub async fn withdraw(pool: &SqlitePool, actor: &Actor, amount: Amount) -> Result<Wallet> {
    ledger::ensure_positive(amount)?;
    let mut tx = begin_write(pool).await?;
    let wallet = actor_wallet(&mut tx, actor).await?;
    let change = ledger::debit(&mut tx, wallet.id, amount).await?;
    audit::append(
        &mut tx,
        AuditEntry::new(
            actor.into(),
            Resource::Wallet(wallet.id),
            AuditEvent::FundsWithdrawn {
                wallet_id: wallet.id,
                amount,
                old_balance: change.old_balance,
                new_balance: change.new_balance,
            },
        ),
    )
    .await?;
    let wallet = ledger::load(&mut tx, wallet.id).await?;
    tx.commit().await?;

    info!("Wallet {} withdrew {amount}", wallet.id);
    Ok(wallet)
}

/// Admin freeze or unfreeze of a project's escrow wallet.
///
/// The project status is untouched; a frozen escrow blocks every movement
/// in or out while the project stays where it is in its lifecycle.
pub async fn set_project_wallet_frozen(
    pool: &SqlitePool,
    actor: &Actor,
    project_id: ProjectId,
    frozen: bool,
    reason: &str,
) -> Result<Wallet> {
    if !actor.is_admin() {
        return Err(PlatformError::Unauthorized(
            "only admins can freeze project wallets".to_string(),
        ));
    }

    let mut tx = begin_write(pool).await?;
    let project = projects::load_project(&mut tx, project_id).await?;
    let wallet = ledger::load(&mut tx, project.wallet_id).await?;
    if wallet.frozen == frozen {
        return Err(PlatformError::InvalidState(format!(
            "escrow wallet {} is already {}",
            wallet.id,
            if frozen { "frozen" } else { "unfrozen" }
        )));
    }

    let wallet = ledger::set_frozen(&mut tx, wallet.id, frozen).await?;
    let reason = reason.to_string();
    let event = if frozen {
        AuditEvent::GovernanceFreeze {
            project_id,
            wallet_id: wallet.id,
            reason,
        }
    } else {
        AuditEvent::GovernanceUnfreeze {
            project_id,
            wallet_id: wallet.id,
            reason,
        }
    };
    audit::append(
        &mut tx,
        AuditEntry::new(AuditActor::from(actor), Resource::Wallet(wallet.id), event)
            .project(project_id),
    )
    .await?;
    tx.commit().await?;

    info!(
        "Escrow wallet {} of project {project_id} {}",
        wallet.id,
        if frozen { "frozen" } else { "unfrozen" }
    );
    Ok(wallet)
}

/// The project's escrow wallet.
pub async fn project_wallet(pool: &SqlitePool, project_id: ProjectId) -> Result<Wallet> {
    let mut conn = pool.acquire().await?;
    let project = projects::load_project(&mut conn, project_id).await?;
    ledger::load(&mut conn, project.wallet_id).await
}

/// The personal wallet of the project's creator.
pub async fn creator_wallet(pool: &SqlitePool, project_id: ProjectId) -> Result<Wallet> {
    let mut conn = pool.acquire().await?;
    let project = projects::load_project(&mut conn, project_id).await?;
    ledger::require_by_owner(&mut conn, Owner::User(project.creator_id)).await
}
