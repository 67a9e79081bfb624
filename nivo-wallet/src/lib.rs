#![deny(clippy::print_stdout, clippy::print_stderr)]

//! User-scoped balance containers with daily/monthly spend limits and
//! idempotent transfer execution.
//!
//! [`WalletService::reserve_and_move`], [`WalletService::apply_deposit`],
//! and [`WalletService::apply_withdrawal`] are the only places balances
//! change. Each is built around a processed-transfer receipt: the
//! transaction id is the idempotency key, and a primary-key conflict on
//! that receipt is treated as success, not an error — the caller gets back
//! the original outcome instead of moving money twice.

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Datelike;
use chrono::Duration;
use chrono::TimeZone;
use chrono::Utc;
use nivo_envelope::ErrorCode;
use nivo_envelope::IntoEnvelopeError;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

pub mod http;
mod memory;
#[cfg(feature = "postgres")]
pub mod postgres_store;

pub use memory::InMemoryWalletService;

pub type WalletId = Uuid;
pub type UserId = String;
pub type BeneficiaryId = Uuid;
pub type WalletResult<T> = Result<T, WalletError>;

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("wallet {0} not found")]
    NotFound(WalletId),
    #[error("wallet already exists for this user/type/currency combination")]
    DuplicateWallet,
    #[error("wallet {0} is not usable for this operation")]
    WalletNotUsable(WalletId),
    #[error("insufficient available balance")]
    InsufficientFunds,
    #[error("spend limit exceeded")]
    LimitExceeded,
    #[error("a beneficiary cannot reference its own owner")]
    SelfBeneficiary,
    #[error("nickname {0:?} is already in use for this owner")]
    DuplicateNickname(String),
    #[error("identity lookup failed: {0}")]
    IdentityLookup(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl IntoEnvelopeError for WalletError {
    fn code(&self) -> ErrorCode {
        match self {
            WalletError::NotFound(_) => ErrorCode::NotFound,
            WalletError::DuplicateWallet | WalletError::DuplicateNickname(_) => ErrorCode::Conflict,
            WalletError::WalletNotUsable(_) => ErrorCode::WalletFrozen,
            WalletError::InsufficientFunds => ErrorCode::InsufficientFunds,
            WalletError::LimitExceeded => ErrorCode::LimitExceeded,
            WalletError::SelfBeneficiary | WalletError::Validation(_) => ErrorCode::Validation,
            WalletError::IdentityLookup(_) => ErrorCode::NotFound,
            WalletError::Storage(_) => ErrorCode::Internal,
        }
    }

    fn message(&self) -> String {
        self.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WalletType {
    Default,
    Savings,
    Current,
    Fixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WalletStatus {
    Active,
    Frozen,
    Closed,
    Inactive,
}

impl WalletStatus {
    /// Transfers may debit only an `Active` wallet.
    #[must_use]
    pub fn can_debit(self) -> bool {
        matches!(self, WalletStatus::Active)
    }

    /// Transfers may credit an `Active` or `Inactive` wallet (spec §9:
    /// an inactive destination still accepts incoming money; only a
    /// frozen or closed destination rejects it).
    #[must_use]
    pub fn can_credit(self) -> bool {
        matches!(self, WalletStatus::Active | WalletStatus::Inactive)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    pub id: WalletId,
    pub user_id: UserId,
    pub wallet_type: WalletType,
    pub currency: String,
    pub balance_minor: i64,
    pub available_balance_minor: i64,
    pub status: WalletStatus,
    pub ledger_account_id: Uuid,
    pub upi_virtual_address: Option<String>,
    pub closed_at: Option<DateTime<Utc>>,
    pub close_reason: Option<String>,
}

impl Wallet {
    #[must_use]
    pub fn is_balanced(&self) -> bool {
        self.available_balance_minor >= 0 && self.available_balance_minor <= self.balance_minor
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletLimits {
    pub wallet_id: WalletId,
    pub daily_limit_minor: i64,
    pub daily_spent_minor: i64,
    pub daily_reset_at: DateTime<Utc>,
    pub monthly_limit_minor: i64,
    pub monthly_spent_minor: i64,
    pub monthly_reset_at: DateTime<Utc>,
}

impl WalletLimits {
    #[must_use]
    pub fn new(wallet_id: WalletId, daily_limit_minor: i64, monthly_limit_minor: i64, now: DateTime<Utc>) -> Self {
        Self {
            wallet_id,
            daily_limit_minor,
            daily_spent_minor: 0,
            daily_reset_at: next_midnight(now),
            monthly_limit_minor,
            monthly_spent_minor: 0,
            monthly_reset_at: next_month_start(now),
        }
    }

    /// Zeroes spent counters whose window has elapsed, as of `now`.
    /// Idempotent: calling this repeatedly with a `now` inside the current
    /// window is a no-op.
    pub fn apply_lazy_reset(&mut self, now: DateTime<Utc>) {
        if now >= self.daily_reset_at {
            self.daily_spent_minor = 0;
            self.daily_reset_at = next_midnight(now);
        }
        if now >= self.monthly_reset_at {
            self.monthly_spent_minor = 0;
            self.monthly_reset_at = next_month_start(now);
        }
    }

    pub fn check_and_reserve(&mut self, amount_minor: i64, now: DateTime<Utc>) -> WalletResult<()> {
        self.apply_lazy_reset(now);
        if self.daily_spent_minor + amount_minor > self.daily_limit_minor {
            return Err(WalletError::LimitExceeded);
        }
        if self.monthly_spent_minor + amount_minor > self.monthly_limit_minor {
            return Err(WalletError::LimitExceeded);
        }
        self.daily_spent_minor += amount_minor;
        self.monthly_spent_minor += amount_minor;
        Ok(())
    }
}

fn next_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    let tomorrow = (now + Duration::days(1)).date_naive();
    Utc.from_utc_datetime(&tomorrow.and_time(chrono::NaiveTime::MIN))
}

fn next_month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let (year, month) = (now.year(), now.month());
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    // `from_ymd_opt` only returns `None` outside chrono's representable
    // year range; falling back to today rather than panicking just means
    // the next `apply_lazy_reset` call sees a reset window that hasn't
    // moved and tries again.
    let date = chrono::NaiveDate::from_ymd_opt(next_year, next_month, 1).unwrap_or_else(|| now.date_naive());
    Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedTransferReceipt {
    pub transaction_id: Uuid,
    pub source_wallet_id: WalletId,
    pub destination_wallet_id: WalletId,
    pub amount_minor: i64,
    pub processed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Beneficiary {
    pub id: BeneficiaryId,
    pub owner_user_id: UserId,
    pub beneficiary_user_id: UserId,
    pub target_wallet_id: WalletId,
    pub nickname: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateWalletRequest {
    pub user_id: UserId,
    pub wallet_type: WalletType,
    pub currency: String,
    pub ledger_account_id: Uuid,
    pub daily_limit_minor: i64,
    pub monthly_limit_minor: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TransferRequest {
    pub transaction_id: Uuid,
    pub source_wallet_id: WalletId,
    pub destination_wallet_id: WalletId,
    pub amount_minor: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferOutcome {
    pub source_wallet_id: WalletId,
    pub destination_wallet_id: WalletId,
    pub amount_minor: i64,
    /// `true` when this call observed a pre-existing receipt rather than
    /// moving balances itself.
    pub replayed: bool,
}

/// A deposit or withdrawal: exactly one wallet moves, with the orchestrator's
/// transaction id as the idempotency key (same discipline as
/// [`TransferRequest`], just against a single wallet instead of a pair).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OneSidedMoveRequest {
    pub transaction_id: Uuid,
    pub wallet_id: WalletId,
    pub amount_minor: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OneSidedOutcome {
    pub wallet_id: WalletId,
    pub amount_minor: i64,
    /// `true` when this call observed a pre-existing receipt rather than
    /// moving balances itself.
    pub replayed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddBeneficiaryRequest {
    pub owner_user_id: UserId,
    pub phone: String,
    pub nickname: String,
}

/// Looks up a user by phone and their default INR wallet; modeled as an
/// injected seam rather than a direct HTTP dependency on identity.
#[async_trait]
pub trait IdentityLookup: Send + Sync {
    async fn find_user_and_default_wallet(
        &self,
        phone: &str,
    ) -> WalletResult<Option<(UserId, WalletId)>>;

    /// Tells identity which wallet is `user_id`'s default, so a later phone
    /// lookup for this user can resolve one. A no-op by default: only the
    /// HTTP-backed implementation used by the real binary needs to do this.
    async fn record_default_wallet(&self, _user_id: &UserId, _wallet_id: WalletId) -> WalletResult<()> {
        Ok(())
    }
}

#[async_trait]
pub trait WalletService: Send + Sync {
    async fn create_wallet(&self, request: CreateWalletRequest) -> WalletResult<Wallet>;
    async fn get_wallet(&self, id: WalletId) -> WalletResult<Wallet>;
    /// Flips an `Inactive` wallet back to `Active` so it can debit again.
    /// A no-op that returns the wallet unchanged if it is already active;
    /// any other status (`Frozen`, `Closed`) is rejected.
    async fn activate_wallet(&self, id: WalletId) -> WalletResult<Wallet>;
    async fn get_limits(&self, id: WalletId, now: DateTime<Utc>) -> WalletResult<WalletLimits>;
    async fn reserve_and_move(&self, request: TransferRequest) -> WalletResult<TransferOutcome>;
    /// Credits a wallet for a deposit. Rejects a wallet that cannot accept
    /// credits (frozen or closed); an inactive wallet may still be credited,
    /// per [`WalletStatus::can_credit`].
    async fn apply_deposit(&self, request: OneSidedMoveRequest) -> WalletResult<OneSidedOutcome>;
    /// Debits a wallet for a withdrawal. Rejects a wallet that cannot debit
    /// or one without enough available balance.
    async fn apply_withdrawal(&self, request: OneSidedMoveRequest) -> WalletResult<OneSidedOutcome>;
    async fn add_beneficiary(&self, request: AddBeneficiaryRequest) -> WalletResult<Beneficiary>;
    async fn list_beneficiaries(&self, owner_user_id: &UserId) -> WalletResult<Vec<Beneficiary>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lazy_reset_zeroes_spent_once_window_elapses() {
        let now = Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).single().expect("valid time");
        let mut limits = WalletLimits::new(Uuid::new_v4(), 10_000, 100_000, now);
        limits.daily_spent_minor = 5_000;
        limits.monthly_spent_minor = 5_000;

        let still_same_day = now + Duration::hours(2);
        limits.apply_lazy_reset(still_same_day);
        assert_eq!(limits.daily_spent_minor, 5_000);

        let next_day = now + Duration::days(1) + Duration::hours(1);
        limits.apply_lazy_reset(next_day);
        assert_eq!(limits.daily_spent_minor, 0);
        assert_eq!(limits.monthly_spent_minor, 5_000);
    }

    #[test]
    fn reset_is_idempotent_within_the_new_window() {
        let now = Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).single().expect("valid time");
        let mut limits = WalletLimits::new(Uuid::new_v4(), 10_000, 100_000, now);
        let next_day = now + Duration::days(1);
        limits.apply_lazy_reset(next_day);
        let reset_at_first = limits.daily_reset_at;
        limits.apply_lazy_reset(next_day + Duration::hours(1));
        assert_eq!(limits.daily_reset_at, reset_at_first);
    }

    #[test]
    fn check_and_reserve_rejects_amount_over_daily_limit() {
        let now = Utc::now();
        let mut limits = WalletLimits::new(Uuid::new_v4(), 1_000, 100_000, now);
        let result = limits.check_and_reserve(1_500, now);
        assert!(matches!(result, Err(WalletError::LimitExceeded)));
    }

    #[test]
    fn wallet_status_debit_credit_rules() {
        assert!(WalletStatus::Active.can_debit());
        assert!(!WalletStatus::Inactive.can_debit());
        assert!(WalletStatus::Active.can_credit());
        assert!(WalletStatus::Inactive.can_credit());
        assert!(!WalletStatus::Frozen.can_credit());
        assert!(!WalletStatus::Closed.can_credit());
    }
}
