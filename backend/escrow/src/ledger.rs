//! Wallet ledger primitives.
//!
//! These functions take the caller's connection, which is always an open
//! transaction in the engines. There is no transfer primitive: a movement
//! between wallets is a [`debit`] and a [`credit`] issued on the same
//! transaction, so an error on either leg rolls back both.

use serde::Serialize;
use sqlx::SqliteConnection;

use crate::db::unix_now;
use crate::errors::{PlatformError, Result};
use crate::types::{Amount, Owner, OwnerKind, Wallet, WalletId, CURRENCY};

/// Balance before and after a single mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BalanceChange {
    pub wallet_id: WalletId,
    pub old_balance: Amount,
    pub new_balance: Amount,
}

const SELECT_WALLET: &str = r#"
    SELECT id, owner_kind, owner_id, currency, balance, frozen, created_at, updated_at
    FROM   wallets
"#;

/// Reject zero and negative amounts.
pub fn ensure_positive(amount: Amount) -> Result<Amount> {
    if amount <= 0 {
        return Err(PlatformError::InvalidAmount(amount));
    }
    Ok(amount)
}

pub async fn load(conn: &mut SqliteConnection, wallet_id: WalletId) -> Result<Wallet> {
    let sql = format!("{SELECT_WALLET} WHERE id = ?1");
    sqlx::query_as::<_, Wallet>(&sql)
        .bind(wallet_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(PlatformError::WalletNotFound(wallet_id))
}

pub async fn find_by_owner(conn: &mut SqliteConnection, owner: Owner) -> Result<Option<Wallet>> {
    let sql = format!("{SELECT_WALLET} WHERE owner_kind = ?1 AND owner_id = ?2");
    let wallet = sqlx::query_as::<_, Wallet>(&sql)
        .bind(owner.kind())
        .bind(owner.id())
        .fetch_optional(&mut *conn)
        .await?;
    Ok(wallet)
}

/// Like [`find_by_owner`], failing with `NoWallet` when absent.
pub async fn require_by_owner(conn: &mut SqliteConnection, owner: Owner) -> Result<Wallet> {
    find_by_owner(conn, owner)
        .await?
        .ok_or_else(|| PlatformError::NoWallet(owner.to_string()))
}

/// Insert a zero-balance wallet for `owner`. Returns `(wallet, created)`;
/// an existing wallet is returned untouched.
pub async fn create(conn: &mut SqliteConnection, owner: Owner) -> Result<(Wallet, bool)> {
    if let Some(existing) = find_by_owner(conn, owner).await? {
        return Ok((existing, false));
    }

    let now = unix_now();
    let id = sqlx::query(
        r#"
        INSERT INTO wallets (owner_kind, owner_id, currency, balance, frozen, created_at, updated_at)
        VALUES (?1, ?2, ?3, 0, 0, ?4, ?4)
        "#,
    )
    .bind(owner.kind())
    .bind(owner.id())
    .bind(CURRENCY)
    .bind(now)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    Ok((load(conn, id).await?, true))
}

/// The owner's wallet, created on first need.
pub async fn get_or_create(conn: &mut SqliteConnection, owner: Owner) -> Result<Wallet> {
    Ok(create(conn, owner).await?.0)
}

pub async fn credit(
    conn: &mut SqliteConnection,
    wallet_id: WalletId,
    amount: Amount,
) -> Result<BalanceChange> {
    ensure_positive(amount)?;
    let wallet = load(conn, wallet_id).await?;
    if wallet.frozen {
        return Err(PlatformError::WalletFrozen(wallet_id));
    }
    let new_balance = wallet
        .balance
        .checked_add(amount)
        .ok_or(PlatformError::InvalidAmount(amount))?;

    let updated = sqlx::query(
        "UPDATE wallets SET balance = balance + ?1, updated_at = ?2 WHERE id = ?3 AND frozen = 0",
    )
    .bind(amount)
    .bind(unix_now())
    .bind(wallet_id)
    .execute(&mut *conn)
    .await?
    .rows_affected();
    if updated != 1 {
        return Err(PlatformError::WalletFrozen(wallet_id));
    }

    Ok(BalanceChange {
        wallet_id,
        old_balance: wallet.balance,
        new_balance,
    })
}

pub async fn debit(
    conn: &mut SqliteConnection,
    wallet_id: WalletId,
    amount: Amount,
) -> Result<BalanceChange> {
    ensure_positive(amount)?;
    let wallet = load(conn, wallet_id).await?;
    if wallet.frozen {
        return Err(PlatformError::WalletFrozen(wallet_id));
    }
    if wallet.balance < amount {
        return Err(PlatformError::InsufficientFunds {
            wallet_id,
            balance: wallet.balance,
            requested: amount,
        });
    }

    let updated = sqlx::query(
        r#"
        UPDATE wallets SET balance = balance - ?1, updated_at = ?2
        WHERE  id = ?3 AND frozen = 0 AND balance >= ?1
        "#,
    )
    .bind(amount)
    .bind(unix_now())
    .bind(wallet_id)
    .execute(&mut *conn)
    .await?
    .rows_affected();
    if updated != 1 {
        return Err(PlatformError::InsufficientFunds {
            wallet_id,
            balance: wallet.balance,
            requested: amount,
        });
    }

    Ok(BalanceChange {
        wallet_id,
        old_balance: wallet.balance,
        new_balance: wallet.balance - amount,
    })
}

/// Debit an escrow wallet, reporting a shortfall as `InsufficientEscrow`.
pub async fn debit_escrow(
    conn: &mut SqliteConnection,
    wallet_id: WalletId,
    amount: Amount,
) -> Result<BalanceChange> {
    debit(conn, wallet_id, amount).await.map_err(|err| match err {
        PlatformError::InsufficientFunds {
            wallet_id,
            balance,
            requested,
        } => PlatformError::InsufficientEscrow {
            wallet_id,
            balance,
            required: requested,
        },
        other => other,
    })
}

/// Administrative freeze toggle. Not subject to the frozen check itself.
pub async fn set_frozen(
    conn: &mut SqliteConnection,
    wallet_id: WalletId,
    frozen: bool,
) -> Result<Wallet> {
    let updated = sqlx::query("UPDATE wallets SET frozen = ?1, updated_at = ?2 WHERE id = ?3")
        .bind(frozen)
        .bind(unix_now())
        .bind(wallet_id)
        .execute(&mut *conn)
        .await?
        .rows_affected();
    if updated != 1 {
        return Err(PlatformError::WalletNotFound(wallet_id));
    }
    load(conn, wallet_id).await
}

/// Sum of every balance held by owners of `kind`.
pub async fn total_held(conn: &mut SqliteConnection, kind: OwnerKind) -> Result<Amount> {
    let total: i64 =
        sqlx::query_scalar("SELECT COALESCE(SUM(balance), 0) FROM wallets WHERE owner_kind = ?1")
            .bind(kind)
            .fetch_one(&mut *conn)
            .await?;
    Ok(total)
}
