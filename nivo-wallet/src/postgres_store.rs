//! `WalletService` backed by PostgreSQL.
//!
//! # Schema
//! ```sql
//! CREATE TABLE wallets (
//!     id UUID PRIMARY KEY,
//!     user_id TEXT NOT NULL,
//!     wallet_type TEXT NOT NULL,
//!     currency TEXT NOT NULL,
//!     balance_minor BIGINT NOT NULL DEFAULT 0,
//!     available_balance_minor BIGINT NOT NULL DEFAULT 0,
//!     status TEXT NOT NULL DEFAULT 'active',
//!     ledger_account_id UUID NOT NULL,
//!     upi_virtual_address TEXT UNIQUE,
//!     closed_at TIMESTAMPTZ,
//!     close_reason TEXT,
//!     UNIQUE (user_id, wallet_type, currency)
//! );
//!
//! CREATE TABLE wallet_limits (
//!     wallet_id UUID PRIMARY KEY REFERENCES wallets(id),
//!     daily_limit_minor BIGINT NOT NULL,
//!     daily_spent_minor BIGINT NOT NULL DEFAULT 0,
//!     daily_reset_at TIMESTAMPTZ NOT NULL,
//!     monthly_limit_minor BIGINT NOT NULL,
//!     monthly_spent_minor BIGINT NOT NULL DEFAULT 0,
//!     monthly_reset_at TIMESTAMPTZ NOT NULL
//! );
//!
//! CREATE TABLE processed_transfer_receipts (
//!     transaction_id UUID PRIMARY KEY,
//!     source_wallet_id UUID NOT NULL,
//!     destination_wallet_id UUID NOT NULL,
//!     amount_minor BIGINT NOT NULL,
//!     processed_at TIMESTAMPTZ NOT NULL
//! );
//!
//! CREATE TABLE beneficiaries (
//!     id UUID PRIMARY KEY,
//!     owner_user_id TEXT NOT NULL,
//!     beneficiary_user_id TEXT NOT NULL,
//!     target_wallet_id UUID NOT NULL,
//!     nickname TEXT NOT NULL
//! );
//! -- nicknames are unique per owner case-insensitively
//! CREATE UNIQUE INDEX ON beneficiaries (owner_user_id, lower(nickname));
//! ```
//!
//! The receipt insert uses `ON CONFLICT DO NOTHING` followed by a
//! read-back, which is what gives [`WalletService::reserve_and_move`] its
//! at-most-once property under concurrent retries of the same transaction
//! id.

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use sqlx::PgPool;
use sqlx::Postgres;
use sqlx::Row;
use sqlx::Transaction;
use uuid::Uuid;

use crate::AddBeneficiaryRequest;
use crate::Beneficiary;
use crate::CreateWalletRequest;
use crate::IdentityLookup;
use crate::OneSidedMoveRequest;
use crate::OneSidedOutcome;
use crate::ProcessedTransferReceipt;
use crate::TransferOutcome;
use crate::TransferRequest;
use crate::Wallet;
use crate::WalletError;
use crate::WalletId;
use crate::WalletLimits;
use crate::WalletResult;
use crate::WalletService;
use crate::WalletStatus;
use crate::WalletType;

enum OneSidedKind {
    Credit,
    Debit,
}

#[derive(Clone)]
pub struct PostgresWalletService {
    pool: PgPool,
    identity: std::sync::Arc<dyn IdentityLookup>,
}

impl PostgresWalletService {
    #[must_use]
    pub fn new(pool: PgPool, identity: std::sync::Arc<dyn IdentityLookup>) -> Self {
        Self { pool, identity }
    }

    fn classify(err: sqlx::Error) -> WalletError {
        WalletError::Storage(nivo_persistence::pg::classify(err).to_string())
    }

    async fn load_wallet_for_update(
        tx: &mut Transaction<'_, Postgres>,
        id: WalletId,
    ) -> WalletResult<Wallet> {
        let row = sqlx::query("SELECT * FROM wallets WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(Self::classify)?
            .ok_or(WalletError::NotFound(id))?;
        Ok(row_to_wallet(&row))
    }

    /// Single-wallet credit/debit, reusing `processed_transfer_receipts` with
    /// both wallet-id columns set to the same wallet rather than a dedicated
    /// table.
    async fn apply_one_sided(&self, request: OneSidedMoveRequest, kind: OneSidedKind) -> WalletResult<OneSidedOutcome> {
        let mut tx = self.pool.begin().await.map_err(Self::classify)?;

        let inserted = sqlx::query(
            "INSERT INTO processed_transfer_receipts
                (transaction_id, source_wallet_id, destination_wallet_id, amount_minor, processed_at)
             VALUES ($1, $2, $2, $3, $4)
             ON CONFLICT (transaction_id) DO NOTHING",
        )
        .bind(request.transaction_id)
        .bind(request.wallet_id)
        .bind(request.amount_minor)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(Self::classify)?;

        if inserted.rows_affected() == 0 {
            let row = sqlx::query("SELECT * FROM processed_transfer_receipts WHERE transaction_id = $1")
                .bind(request.transaction_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(Self::classify)?;
            let receipt = row_to_receipt(&row);
            tx.commit().await.map_err(Self::classify)?;
            return Ok(OneSidedOutcome {
                wallet_id: receipt.source_wallet_id,
                amount_minor: receipt.amount_minor,
                replayed: true,
            });
        }

        let wallet = Self::load_wallet_for_update(&mut tx, request.wallet_id).await?;
        match kind {
            OneSidedKind::Credit => {
                if !wallet.status.can_credit() {
                    return Err(WalletError::WalletNotUsable(wallet.id));
                }
            }
            OneSidedKind::Debit => {
                if !wallet.status.can_debit() {
                    return Err(WalletError::WalletNotUsable(wallet.id));
                }
                if wallet.available_balance_minor < request.amount_minor {
                    return Err(WalletError::InsufficientFunds);
                }
            }
        }

        let sign = match kind {
            OneSidedKind::Credit => 1,
            OneSidedKind::Debit => -1,
        };
        let signed_amount = request.amount_minor * sign;
        sqlx::query(
            "UPDATE wallets SET balance_minor = balance_minor + $2, available_balance_minor = available_balance_minor + $2 WHERE id = $1",
        )
        .bind(request.wallet_id)
        .bind(signed_amount)
        .execute(&mut *tx)
        .await
        .map_err(Self::classify)?;

        tx.commit().await.map_err(Self::classify)?;
        Ok(OneSidedOutcome {
            wallet_id: request.wallet_id,
            amount_minor: request.amount_minor,
            replayed: false,
        })
    }
}

#[async_trait]
impl WalletService for PostgresWalletService {
    async fn create_wallet(&self, request: CreateWalletRequest) -> WalletResult<Wallet> {
        let wallet = Wallet {
            id: Uuid::new_v4(),
            user_id: request.user_id,
            wallet_type: request.wallet_type,
            currency: request.currency,
            balance_minor: 0,
            available_balance_minor: 0,
            status: WalletStatus::Active,
            ledger_account_id: request.ledger_account_id,
            upi_virtual_address: None,
            closed_at: None,
            close_reason: None,
        };
        let now = Utc::now();
        let limits = WalletLimits::new(wallet.id, request.daily_limit_minor, request.monthly_limit_minor, now);

        let mut tx = self.pool.begin().await.map_err(Self::classify)?;
        sqlx::query(
            "INSERT INTO wallets
                (id, user_id, wallet_type, currency, balance_minor, available_balance_minor,
                 status, ledger_account_id)
             VALUES ($1, $2, $3, $4, 0, 0, 'active', $5)",
        )
        .bind(wallet.id)
        .bind(&wallet.user_id)
        .bind(wallet_type_label(wallet.wallet_type))
        .bind(&wallet.currency)
        .bind(wallet.ledger_account_id)
        .execute(&mut *tx)
        .await
        .map_err(|err| match err {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => WalletError::DuplicateWallet,
            other => Self::classify(other),
        })?;
        sqlx::query(
            "INSERT INTO wallet_limits
                (wallet_id, daily_limit_minor, daily_spent_minor, daily_reset_at,
                 monthly_limit_minor, monthly_spent_minor, monthly_reset_at)
             VALUES ($1, $2, 0, $3, $4, 0, $5)",
        )
        .bind(limits.wallet_id)
        .bind(limits.daily_limit_minor)
        .bind(limits.daily_reset_at)
        .bind(limits.monthly_limit_minor)
        .bind(limits.monthly_reset_at)
        .execute(&mut *tx)
        .await
        .map_err(Self::classify)?;

        tx.commit().await.map_err(Self::classify)?;
        Ok(wallet)
    }

    async fn get_wallet(&self, id: WalletId) -> WalletResult<Wallet> {
        let row = sqlx::query("SELECT * FROM wallets WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Self::classify)?
            .ok_or(WalletError::NotFound(id))?;
        Ok(row_to_wallet(&row))
    }

    async fn activate_wallet(&self, id: WalletId) -> WalletResult<Wallet> {
        let mut tx = self.pool.begin().await.map_err(Self::classify)?;
        let row = sqlx::query("SELECT * FROM wallets WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(Self::classify)?
            .ok_or(WalletError::NotFound(id))?;
        let wallet = row_to_wallet(&row);
        match wallet.status {
            WalletStatus::Active => {
                tx.commit().await.map_err(Self::classify)?;
                return Ok(wallet);
            }
            WalletStatus::Inactive => {}
            WalletStatus::Frozen | WalletStatus::Closed => return Err(WalletError::WalletNotUsable(id)),
        }

        let row = sqlx::query("UPDATE wallets SET status = 'active' WHERE id = $1 RETURNING *")
            .bind(id)
            .fetch_one(&mut *tx)
            .await
            .map_err(Self::classify)?;
        tx.commit().await.map_err(Self::classify)?;
        Ok(row_to_wallet(&row))
    }

    async fn get_limits(&self, id: WalletId, now: DateTime<Utc>) -> WalletResult<WalletLimits> {
        let mut tx = self.pool.begin().await.map_err(Self::classify)?;
        let row = sqlx::query("SELECT * FROM wallet_limits WHERE wallet_id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(Self::classify)?
            .ok_or(WalletError::NotFound(id))?;
        let mut limits = row_to_limits(&row);
        limits.apply_lazy_reset(now);

        sqlx::query(
            "UPDATE wallet_limits
             SET daily_spent_minor = $2, daily_reset_at = $3,
                 monthly_spent_minor = $4, monthly_reset_at = $5
             WHERE wallet_id = $1",
        )
        .bind(id)
        .bind(limits.daily_spent_minor)
        .bind(limits.daily_reset_at)
        .bind(limits.monthly_spent_minor)
        .bind(limits.monthly_reset_at)
        .execute(&mut *tx)
        .await
        .map_err(Self::classify)?;
        tx.commit().await.map_err(Self::classify)?;
        Ok(limits)
    }

    async fn reserve_and_move(&self, request: TransferRequest) -> WalletResult<TransferOutcome> {
        let mut tx = self.pool.begin().await.map_err(Self::classify)?;

        let inserted = sqlx::query(
            "INSERT INTO processed_transfer_receipts
                (transaction_id, source_wallet_id, destination_wallet_id, amount_minor, processed_at)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (transaction_id) DO NOTHING",
        )
        .bind(request.transaction_id)
        .bind(request.source_wallet_id)
        .bind(request.destination_wallet_id)
        .bind(request.amount_minor)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(Self::classify)?;

        if inserted.rows_affected() == 0 {
            let row = sqlx::query("SELECT * FROM processed_transfer_receipts WHERE transaction_id = $1")
                .bind(request.transaction_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(Self::classify)?;
            let receipt = row_to_receipt(&row);
            tx.commit().await.map_err(Self::classify)?;
            return Ok(TransferOutcome {
                source_wallet_id: receipt.source_wallet_id,
                destination_wallet_id: receipt.destination_wallet_id,
                amount_minor: receipt.amount_minor,
                replayed: true,
            });
        }

        let (first_id, second_id) = if request.source_wallet_id <= request.destination_wallet_id {
            (request.source_wallet_id, request.destination_wallet_id)
        } else {
            (request.destination_wallet_id, request.source_wallet_id)
        };
        let first = Self::load_wallet_for_update(&mut tx, first_id).await?;
        let second = Self::load_wallet_for_update(&mut tx, second_id).await?;
        let (source, destination) = if first.id == request.source_wallet_id {
            (first, second)
        } else {
            (second, first)
        };

        if !source.status.can_debit() {
            return Err(WalletError::WalletNotUsable(source.id));
        }
        if !destination.status.can_credit() {
            return Err(WalletError::WalletNotUsable(destination.id));
        }
        if source.available_balance_minor < request.amount_minor {
            return Err(WalletError::InsufficientFunds);
        }

        let limits_row = sqlx::query("SELECT * FROM wallet_limits WHERE wallet_id = $1 FOR UPDATE")
            .bind(request.source_wallet_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(Self::classify)?
            .ok_or(WalletError::NotFound(request.source_wallet_id))?;
        let mut limits = row_to_limits(&limits_row);
        limits.check_and_reserve(request.amount_minor, Utc::now())?;

        sqlx::query(
            "UPDATE wallet_limits
             SET daily_spent_minor = $2, daily_reset_at = $3,
                 monthly_spent_minor = $4, monthly_reset_at = $5
             WHERE wallet_id = $1",
        )
        .bind(request.source_wallet_id)
        .bind(limits.daily_spent_minor)
        .bind(limits.daily_reset_at)
        .bind(limits.monthly_spent_minor)
        .bind(limits.monthly_reset_at)
        .execute(&mut *tx)
        .await
        .map_err(Self::classify)?;

        sqlx::query(
            "UPDATE wallets SET balance_minor = balance_minor - $2, available_balance_minor = available_balance_minor - $2 WHERE id = $1",
        )
        .bind(request.source_wallet_id)
        .bind(request.amount_minor)
        .execute(&mut *tx)
        .await
        .map_err(Self::classify)?;
        sqlx::query(
            "UPDATE wallets SET balance_minor = balance_minor + $2, available_balance_minor = available_balance_minor + $2 WHERE id = $1",
        )
        .bind(request.destination_wallet_id)
        .bind(request.amount_minor)
        .execute(&mut *tx)
        .await
        .map_err(Self::classify)?;

        tx.commit().await.map_err(Self::classify)?;
        Ok(TransferOutcome {
            source_wallet_id: request.source_wallet_id,
            destination_wallet_id: request.destination_wallet_id,
            amount_minor: request.amount_minor,
            replayed: false,
        })
    }

    async fn apply_deposit(&self, request: OneSidedMoveRequest) -> WalletResult<OneSidedOutcome> {
        self.apply_one_sided(request, OneSidedKind::Credit).await
    }

    async fn apply_withdrawal(&self, request: OneSidedMoveRequest) -> WalletResult<OneSidedOutcome> {
        self.apply_one_sided(request, OneSidedKind::Debit).await
    }

    async fn add_beneficiary(&self, request: AddBeneficiaryRequest) -> WalletResult<Beneficiary> {
        let (beneficiary_user_id, target_wallet_id) = self
            .identity
            .find_user_and_default_wallet(&request.phone)
            .await?
            .ok_or_else(|| WalletError::IdentityLookup(format!("no user with phone {}", request.phone)))?;
        if beneficiary_user_id == request.owner_user_id {
            return Err(WalletError::SelfBeneficiary);
        }

        let beneficiary = Beneficiary {
            id: Uuid::new_v4(),
            owner_user_id: request.owner_user_id,
            beneficiary_user_id,
            target_wallet_id,
            nickname: request.nickname,
        };
        sqlx::query(
            "INSERT INTO beneficiaries (id, owner_user_id, beneficiary_user_id, target_wallet_id, nickname)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(beneficiary.id)
        .bind(&beneficiary.owner_user_id)
        .bind(&beneficiary.beneficiary_user_id)
        .bind(beneficiary.target_wallet_id)
        .bind(&beneficiary.nickname)
        .execute(&self.pool)
        .await
        .map_err(|err| match err {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                WalletError::DuplicateNickname(beneficiary.nickname.clone())
            }
            other => Self::classify(other),
        })?;
        Ok(beneficiary)
    }

    async fn list_beneficiaries(&self, owner_user_id: &crate::UserId) -> WalletResult<Vec<Beneficiary>> {
        let rows = sqlx::query("SELECT * FROM beneficiaries WHERE owner_user_id = $1")
            .bind(owner_user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(Self::classify)?;
        Ok(rows.into_iter().map(|row| row_to_beneficiary(&row)).collect())
    }
}

fn wallet_type_label(wallet_type: WalletType) -> &'static str {
    match wallet_type {
        WalletType::Default => "default",
        WalletType::Savings => "savings",
        WalletType::Current => "current",
        WalletType::Fixed => "fixed",
    }
}

fn wallet_status_from_label(label: &str) -> WalletStatus {
    match label {
        "frozen" => WalletStatus::Frozen,
        "closed" => WalletStatus::Closed,
        "inactive" => WalletStatus::Inactive,
        _ => WalletStatus::Active,
    }
}

fn row_to_wallet(row: &sqlx::postgres::PgRow) -> Wallet {
    let wallet_type: String = row.get("wallet_type");
    let status: String = row.get("status");
    Wallet {
        id: row.get("id"),
        user_id: row.get("user_id"),
        wallet_type: match wallet_type.as_str() {
            "savings" => WalletType::Savings,
            "current" => WalletType::Current,
            "fixed" => WalletType::Fixed,
            _ => WalletType::Default,
        },
        currency: row.get("currency"),
        balance_minor: row.get("balance_minor"),
        available_balance_minor: row.get("available_balance_minor"),
        status: wallet_status_from_label(&status),
        ledger_account_id: row.get("ledger_account_id"),
        upi_virtual_address: row.get("upi_virtual_address"),
        closed_at: row.get("closed_at"),
        close_reason: row.get("close_reason"),
    }
}

fn row_to_limits(row: &sqlx::postgres::PgRow) -> WalletLimits {
    WalletLimits {
        wallet_id: row.get("wallet_id"),
        daily_limit_minor: row.get("daily_limit_minor"),
        daily_spent_minor: row.get("daily_spent_minor"),
        daily_reset_at: row.get("daily_reset_at"),
        monthly_limit_minor: row.get("monthly_limit_minor"),
        monthly_spent_minor: row.get("monthly_spent_minor"),
        monthly_reset_at: row.get("monthly_reset_at"),
    }
}

fn row_to_receipt(row: &sqlx::postgres::PgRow) -> ProcessedTransferReceipt {
    ProcessedTransferReceipt {
        transaction_id: row.get("transaction_id"),
        source_wallet_id: row.get("source_wallet_id"),
        destination_wallet_id: row.get("destination_wallet_id"),
        amount_minor: row.get("amount_minor"),
        processed_at: row.get("processed_at"),
    }
}

fn row_to_beneficiary(row: &sqlx::postgres::PgRow) -> Beneficiary {
    Beneficiary {
        id: row.get("id"),
        owner_user_id: row.get("owner_user_id"),
        beneficiary_user_id: row.get("beneficiary_user_id"),
        target_wallet_id: row.get("target_wallet_id"),
        nickname: row.get("nickname"),
    }
}
