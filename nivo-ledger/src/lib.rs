#![deny(clippy::print_stdout, clippy::print_stderr)]

//! Chart of accounts and double-entry journal posting.
//!
//! Every balance-affecting operation runs inside a single relational
//! transaction; accounts are locked row-by-row in posting order, never in
//! bulk. Voiding an entry is an audit marker only — it never touches
//! balances. Unwinding a posted entry's effect always goes through
//! [`LedgerService::reverse_entry`], which posts a fresh mirror-image entry
//! rather than mutating the original.

use async_trait::async_trait;
use chrono::DateTime;
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

pub use memory::InMemoryLedgerService;

pub type AccountId = Uuid;
pub type EntryId = Uuid;
pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("account {0} not found")]
    AccountNotFound(AccountId),
    #[error("journal entry {0} not found")]
    EntryNotFound(EntryId),
    #[error("account code {0:?} is already in use")]
    DuplicateCode(String),
    #[error("parent account {0} does not exist")]
    ParentNotFound(AccountId),
    #[error("account {0} is not active and cannot be posted to")]
    AccountInactive(AccountId),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("entry {0} is not in draft status")]
    NotDraft(EntryId),
    #[error("entry {0} is not posted")]
    NotPosted(EntryId),
    #[error("storage error: {0}")]
    Storage(String),
}

impl IntoEnvelopeError for LedgerError {
    fn code(&self) -> ErrorCode {
        match self {
            LedgerError::AccountNotFound(_) | LedgerError::EntryNotFound(_) => ErrorCode::NotFound,
            LedgerError::DuplicateCode(_) => ErrorCode::Conflict,
            LedgerError::ParentNotFound(_) => ErrorCode::BadRequest,
            LedgerError::AccountInactive(_) => ErrorCode::AccountFrozen,
            LedgerError::Validation(_) | LedgerError::NotDraft(_) | LedgerError::NotPosted(_) => {
                ErrorCode::Validation
            }
            LedgerError::Storage(_) => ErrorCode::Internal,
        }
    }

    fn message(&self) -> String {
        self.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountType {
    Asset,
    Liability,
    Equity,
    Revenue,
    Expense,
}

impl AccountType {
    /// Debit-normal account types increase their balance on a debit;
    /// credit-normal types increase on a credit.
    #[must_use]
    pub fn is_debit_normal(self) -> bool {
        matches!(self, AccountType::Asset | AccountType::Expense)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountStatus {
    Active,
    Inactive,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub code: String,
    pub name: String,
    pub account_type: AccountType,
    pub currency: String,
    pub parent_account_id: Option<AccountId>,
    pub balance_minor: i64,
    pub debit_total_minor: i64,
    pub credit_total_minor: i64,
    pub status: AccountStatus,
}

impl Account {
    #[must_use]
    pub fn new(code: impl Into<String>, name: impl Into<String>, account_type: AccountType, currency: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            code: code.into(),
            name: name.into(),
            account_type,
            currency: currency.into(),
            parent_account_id: None,
            balance_minor: 0,
            debit_total_minor: 0,
            credit_total_minor: 0,
            status: AccountStatus::Active,
        }
    }

    #[must_use]
    pub fn with_parent(mut self, parent_account_id: AccountId) -> Self {
        self.parent_account_id = Some(parent_account_id);
        self
    }

    /// Applies one posting line to this account's running totals, per the
    /// account type's normal-balance sign rule.
    fn apply_line(&mut self, side: PostingSide, amount_minor: i64) {
        match side {
            PostingSide::Debit => self.debit_total_minor += amount_minor,
            PostingSide::Credit => self.credit_total_minor += amount_minor,
        }
        let signed = match side {
            PostingSide::Debit => amount_minor,
            PostingSide::Credit => -amount_minor,
        };
        self.balance_minor += if self.account_type.is_debit_normal() {
            signed
        } else {
            -signed
        };
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PostingSide {
    Debit,
    Credit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryType {
    Standard,
    Opening,
    Closing,
    Adjusting,
    Reversing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryStatus {
    Draft,
    Posted,
    Voided,
    Reversed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryReference {
    pub reference_type: String,
    pub reference_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalLine {
    pub id: Uuid,
    pub account_id: AccountId,
    pub side: PostingSide,
    pub amount_minor: i64,
    pub description: Option<String>,
}

impl JournalLine {
    #[must_use]
    pub fn debit(account_id: AccountId, amount_minor: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id,
            side: PostingSide::Debit,
            amount_minor,
            description: None,
        }
    }

    #[must_use]
    pub fn credit(account_id: AccountId, amount_minor: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id,
            side: PostingSide::Credit,
            amount_minor,
            description: None,
        }
    }

    /// A line mirroring this one with the posting side swapped, used to
    /// build a reversal entry.
    #[must_use]
    fn mirrored(&self) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id: self.account_id,
            side: match self.side {
                PostingSide::Debit => PostingSide::Credit,
                PostingSide::Credit => PostingSide::Debit,
            },
            amount_minor: self.amount_minor,
            description: self.description.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: EntryId,
    pub entry_number: String,
    pub entry_type: EntryType,
    pub status: EntryStatus,
    pub description: String,
    pub reference: Option<EntryReference>,
    pub lines: Vec<JournalLine>,
    pub posted_at: Option<DateTime<Utc>>,
    pub posted_by: Option<String>,
    pub voided_at: Option<DateTime<Utc>>,
    pub voided_by: Option<String>,
    pub void_reason: Option<String>,
    pub reversal_entry_id: Option<EntryId>,
}

impl JournalEntry {
    /// Validates the structural invariants a draft must satisfy before it
    /// may be posted: at least two lines, every line with exactly one
    /// positive side, and a balanced sum.
    pub fn validate_structure(&self) -> LedgerResult<()> {
        if self.lines.len() < 2 {
            return Err(LedgerError::Validation(
                "a journal entry must have at least two lines".into(),
            ));
        }
        if self.lines.iter().any(|line| line.amount_minor <= 0) {
            return Err(LedgerError::Validation(
                "every journal line must carry a positive amount".into(),
            ));
        }
        let (debits, credits) = self.totals();
        if debits != credits {
            return Err(LedgerError::Validation(format!(
                "entry is not balanced: debits={debits} credits={credits}"
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn totals(&self) -> (i64, i64) {
        self.lines
            .iter()
            .fold((0_i64, 0_i64), |(debits, credits), line| match line.side {
                PostingSide::Debit => (debits + line.amount_minor, credits),
                PostingSide::Credit => (debits, credits + line.amount_minor),
            })
    }

    #[must_use]
    pub fn is_balanced(&self) -> bool {
        let (debits, credits) = self.totals();
        debits == credits
    }

    /// Builds the mirror-image draft entry used by reversal: same lines,
    /// sides swapped, linked back via `reference`.
    #[must_use]
    fn build_reversal(&self, entry_number: String, reason: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            entry_number,
            entry_type: EntryType::Reversing,
            status: EntryStatus::Draft,
            description: format!("Reversal of {}: {reason}", self.entry_number),
            reference: Some(EntryReference {
                reference_type: "reversal_of".into(),
                reference_id: self.id.to_string(),
            }),
            lines: self.lines.iter().map(JournalLine::mirrored).collect(),
            posted_at: None,
            posted_by: None,
            voided_at: None,
            voided_by: None,
            void_reason: None,
            reversal_entry_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAccountRequest {
    pub code: String,
    pub name: String,
    pub account_type: AccountType,
    pub currency: String,
    pub parent_account_id: Option<AccountId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateEntryRequest {
    pub entry_type: EntryType,
    pub description: String,
    pub reference: Option<EntryReference>,
    pub lines: Vec<JournalLine>,
}

#[async_trait]
pub trait LedgerService: Send + Sync {
    async fn create_account(&self, request: CreateAccountRequest) -> LedgerResult<Account>;
    async fn get_account(&self, id: AccountId) -> LedgerResult<Account>;
    async fn create_entry(&self, request: CreateEntryRequest) -> LedgerResult<JournalEntry>;
    async fn post_entry(&self, entry_id: EntryId, posted_by: &str) -> LedgerResult<JournalEntry>;
    async fn void_entry(
        &self,
        entry_id: EntryId,
        voided_by: &str,
        reason: &str,
    ) -> LedgerResult<JournalEntry>;
    async fn reverse_entry(
        &self,
        entry_id: EntryId,
        reversed_by: &str,
        reason: &str,
    ) -> LedgerResult<JournalEntry>;
    async fn get_entry(&self, entry_id: EntryId) -> LedgerResult<JournalEntry>;
    /// Looks up a posted entry by its `(reference_type, reference_id)`
    /// pair, the mechanism callers use to detect and reuse a prior posting
    /// instead of posting the same originating event twice.
    async fn find_entry_by_reference(
        &self,
        reference_type: &str,
        reference_id: &str,
    ) -> LedgerResult<Option<JournalEntry>>;
    /// Offline audit check: recomputes an account's balance purely from its
    /// posted lines and compares it against the maintained `balance_minor`
    /// column, returning the recomputed value.
    async fn recompute_balance(&self, account_id: AccountId) -> LedgerResult<i64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset() -> Account {
        Account::new("1000", "Cash", AccountType::Asset, "INR")
    }

    fn revenue() -> Account {
        Account::new("4000", "Fees", AccountType::Revenue, "INR")
    }

    fn draft_entry(cash: AccountId, fees: AccountId) -> JournalEntry {
        JournalEntry {
            id: Uuid::new_v4(),
            entry_number: "JE-2026-00001".into(),
            entry_type: EntryType::Standard,
            status: EntryStatus::Draft,
            description: "test entry".into(),
            reference: None,
            lines: vec![
                JournalLine::debit(cash, 10_000),
                JournalLine::credit(fees, 10_000),
            ],
            posted_at: None,
            posted_by: None,
            voided_at: None,
            voided_by: None,
            void_reason: None,
            reversal_entry_id: None,
        }
    }

    #[test]
    fn balanced_entry_validates() {
        let cash = asset();
        let fees = revenue();
        let entry = draft_entry(cash.id, fees.id);
        assert!(entry.is_balanced());
        assert!(entry.validate_structure().is_ok());
    }

    #[test]
    fn unbalanced_entry_rejected() {
        let cash = asset();
        let fees = revenue();
        let mut entry = draft_entry(cash.id, fees.id);
        entry.lines[1].amount_minor = 9_000;
        assert!(!entry.is_balanced());
        assert!(matches!(
            entry.validate_structure(),
            Err(LedgerError::Validation(_))
        ));
    }

    #[test]
    fn single_line_entry_rejected() {
        let cash = asset();
        let entry = JournalEntry {
            lines: vec![JournalLine::debit(cash.id, 100)],
            ..draft_entry(cash.id, Uuid::new_v4())
        };
        assert!(matches!(
            entry.validate_structure(),
            Err(LedgerError::Validation(_))
        ));
    }

    #[test]
    fn debit_normal_account_balance_sign_rule() {
        let mut cash = asset();
        cash.apply_line(PostingSide::Debit, 10_000);
        assert_eq!(cash.balance_minor, 10_000);
        cash.apply_line(PostingSide::Credit, 4_000);
        assert_eq!(cash.balance_minor, 6_000);
    }

    #[test]
    fn credit_normal_account_balance_sign_rule() {
        let mut fees = revenue();
        fees.apply_line(PostingSide::Credit, 10_000);
        assert_eq!(fees.balance_minor, 10_000);
        fees.apply_line(PostingSide::Debit, 3_000);
        assert_eq!(fees.balance_minor, 7_000);
    }

    #[test]
    fn reversal_mirrors_and_swaps_sides() {
        let cash = asset();
        let fees = revenue();
        let entry = draft_entry(cash.id, fees.id);
        let reversal = entry.build_reversal("JE-2026-00002".into(), "customer dispute");
        assert_eq!(reversal.entry_type, EntryType::Reversing);
        assert_eq!(reversal.status, EntryStatus::Draft);
        assert_eq!(reversal.lines.len(), entry.lines.len());
        assert_eq!(reversal.lines[0].side, PostingSide::Credit);
        assert_eq!(reversal.lines[1].side, PostingSide::Debit);
        assert_eq!(reversal.lines[0].amount_minor, entry.lines[0].amount_minor);
    }
}
