#![deny(clippy::print_stdout, clippy::print_stderr)]

//! Orchestrates money movement across [`nivo_wallet`] and [`nivo_ledger`],
//! driving each transaction through its state machine and keeping the two
//! services consistent under retry.
//!
//! A transfer moves through `pending -> processing -> completed|failed`.
//! A ledger failure after the wallet balances have already moved leaves the
//! transaction `processing` rather than `failed`: [`ReconciliationSweep`]
//! retries the ledger posting later, detecting a prior posting by its
//! `(reference_type, reference_id)` pair so a retry never posts twice.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use nivo_envelope::ErrorCode;
use nivo_envelope::IntoEnvelopeError;
use nivo_envelope::PageMeta;
use nivo_ledger::CreateEntryRequest;
use nivo_ledger::EntryReference;
use nivo_ledger::EntryType;
use nivo_ledger::JournalLine;
use nivo_ledger::LedgerService;
use nivo_rbac::RbacEngine;
use nivo_wallet::OneSidedMoveRequest;
use nivo_wallet::TransferRequest;
use nivo_wallet::WalletService;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

pub mod http;
mod memory;
#[cfg(feature = "postgres")]
pub mod postgres_store;

pub use memory::InMemoryTransactionStore;

pub type TransactionId = Uuid;
pub type UserId = String;
pub type TransactionResult<T> = Result<T, TransactionError>;

#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("transaction {0} not found")]
    NotFound(TransactionId),
    #[error("permission denied: {0}")]
    Forbidden(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("transaction is not in a state that allows this operation")]
    InvalidState,
    #[error(transparent)]
    Wallet(#[from] nivo_wallet::WalletError),
    #[error(transparent)]
    Ledger(#[from] nivo_ledger::LedgerError),
    #[error("storage error: {0}")]
    Storage(String),
}

impl IntoEnvelopeError for TransactionError {
    fn code(&self) -> ErrorCode {
        match self {
            TransactionError::NotFound(_) => ErrorCode::NotFound,
            TransactionError::Forbidden(_) => ErrorCode::Forbidden,
            TransactionError::Validation(_) | TransactionError::InvalidState => {
                ErrorCode::Validation
            }
            TransactionError::Wallet(err) => err.code(),
            TransactionError::Ledger(err) => err.code(),
            TransactionError::Storage(_) => ErrorCode::Internal,
        }
    }

    fn message(&self) -> String {
        self.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Transfer,
    Deposit,
    Withdrawal,
    Reversal,
    Fee,
    Refund,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Reversed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub transaction_type: TransactionType,
    pub status: TransactionStatus,
    pub source_wallet_id: Option<Uuid>,
    pub destination_wallet_id: Option<Uuid>,
    pub amount_minor: i64,
    pub currency: String,
    pub description: String,
    pub external_reference: Option<String>,
    pub ledger_entry_id: Option<Uuid>,
    pub parent_transaction_id: Option<TransactionId>,
    pub initiated_by: UserId,
    pub processed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
}

impl Transaction {
    fn new(
        transaction_type: TransactionType,
        initiated_by: UserId,
        amount_minor: i64,
        currency: String,
        description: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            transaction_type,
            status: TransactionStatus::Pending,
            source_wallet_id: None,
            destination_wallet_id: None,
            amount_minor,
            currency,
            description,
            external_reference: None,
            ledger_entry_id: None,
            parent_transaction_id: None,
            initiated_by,
            processed_at: None,
            completed_at: None,
            failure_reason: None,
        }
    }

    fn reference(&self) -> EntryReference {
        EntryReference {
            reference_type: "transaction".to_string(),
            reference_id: self.id.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTransferRequest {
    pub initiated_by: UserId,
    pub source_wallet_id: Uuid,
    pub destination_wallet_id: Uuid,
    pub amount_minor: i64,
    pub currency: String,
    pub description: String,
    pub external_reference: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TransactionFilter {
    pub wallet_id: Option<Uuid>,
    pub status: Option<TransactionStatus>,
    pub transaction_type: Option<TransactionType>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub search: Option<String>,
    pub page: u32,
    pub page_size: u32,
}

impl Default for TransactionFilter {
    fn default() -> Self {
        Self {
            wallet_id: None,
            status: None,
            transaction_type: None,
            from: None,
            to: None,
            search: None,
            page: 1,
            page_size: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TransactionPage {
    pub items: Vec<Transaction>,
    pub meta: PageMeta,
}

/// Escapes `%`, `_`, and `\` so a user-supplied search term can be used
/// safely as the operand of a `LIKE ... ESCAPE '\\'` clause.
#[must_use]
pub fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for ch in term.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// Persistence seam for transaction rows, independent of the ledger/wallet
/// side effects the orchestrator also drives.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn insert(&self, transaction: Transaction) -> TransactionResult<Transaction>;
    async fn update(&self, transaction: Transaction) -> TransactionResult<Transaction>;
    async fn get(&self, id: TransactionId) -> TransactionResult<Transaction>;
    async fn find_completed_by_reference(
        &self,
        source_wallet_id: Uuid,
        external_reference: &str,
    ) -> TransactionResult<Option<Transaction>>;
    async fn list(&self, filter: TransactionFilter) -> TransactionResult<TransactionPage>;
    async fn list_stuck_processing(
        &self,
        older_than: DateTime<Utc>,
    ) -> TransactionResult<Vec<Transaction>>;
}

/// Which side of a one-sided move the orchestrator is driving, and which
/// ledger account stands on the other side of the wallet being moved.
#[derive(Debug, Clone, Copy)]
enum OneSidedDirection {
    Deposit { destination_wallet: Uuid, destination_account: Uuid },
    Withdrawal { source_wallet: Uuid, source_account: Uuid },
}

impl OneSidedDirection {
    fn wallet_id(&self) -> Uuid {
        match *self {
            OneSidedDirection::Deposit { destination_wallet, .. } => destination_wallet,
            OneSidedDirection::Withdrawal { source_wallet, .. } => source_wallet,
        }
    }
}

pub struct TransactionOrchestrator {
    store: Arc<dyn TransactionStore>,
    wallets: Arc<dyn WalletService>,
    ledger: Arc<dyn LedgerService>,
    rbac: Arc<RbacEngine>,
    /// External clearing account that supplies the other side of a
    /// deposit's or withdrawal's balanced ledger entry, since those only
    /// move one wallet.
    suspense_account_id: Uuid,
}

impl TransactionOrchestrator {
    #[must_use]
    pub fn new(
        store: Arc<dyn TransactionStore>,
        wallets: Arc<dyn WalletService>,
        ledger: Arc<dyn LedgerService>,
        rbac: Arc<RbacEngine>,
        suspense_account_id: Uuid,
    ) -> Self {
        Self {
            store,
            wallets,
            suspense_account_id,
            ledger,
            rbac,
        }
    }

    async fn require_permission(&self, user_id: &UserId, permission: &str) -> TransactionResult<()> {
        let allowed = self.rbac.check(user_id, permission, Utc::now()).await.map_err(|err| {
            TransactionError::Storage(err.to_string())
        })?;
        if !allowed {
            return Err(TransactionError::Forbidden(format!(
                "{user_id} lacks permission {permission}"
            )));
        }
        Ok(())
    }

    /// Posts a balanced ledger entry debiting `source_account` and
    /// crediting `destination_account`, reusing a prior posting for the
    /// same transaction reference instead of posting twice.
    async fn post_ledger_entry(
        &self,
        transaction: &Transaction,
        source_account: Uuid,
        destination_account: Uuid,
        posted_by: &str,
    ) -> TransactionResult<Uuid> {
        let reference = transaction.reference();
        if let Some(existing) = self
            .ledger
            .find_entry_by_reference(&reference.reference_type, &reference.reference_id)
            .await?
        {
            return Ok(existing.id);
        }

        let entry = self
            .ledger
            .create_entry(CreateEntryRequest {
                entry_type: EntryType::Standard,
                description: transaction.description.clone(),
                reference: Some(reference),
                lines: vec![
                    JournalLine::debit(source_account, transaction.amount_minor),
                    JournalLine::credit(destination_account, transaction.amount_minor),
                ],
            })
            .await?;
        let posted = self.ledger.post_entry(entry.id, posted_by).await?;
        Ok(posted.id)
    }

    /// Drives a transfer through the full `pending -> processing ->
    /// completed|failed` lifecycle described at the module level.
    pub async fn create_transfer(&self, request: CreateTransferRequest) -> TransactionResult<Transaction> {
        if request.amount_minor <= 0 {
            return Err(TransactionError::Validation("amount must be positive".into()));
        }
        if request.currency.trim().is_empty() {
            return Err(TransactionError::Validation("currency is required".into()));
        }
        if request.source_wallet_id == request.destination_wallet_id {
            return Err(TransactionError::Validation(
                "source and destination wallets must differ".into(),
            ));
        }

        self.require_permission(&request.initiated_by, "transaction:transfer:create").await?;

        if let Some(external_reference) = request.external_reference.as_deref() {
            if let Some(existing) = self
                .store
                .find_completed_by_reference(request.source_wallet_id, external_reference)
                .await?
            {
                return Ok(existing);
            }
        }

        let source = self.wallets.get_wallet(request.source_wallet_id).await?;
        let destination = self.wallets.get_wallet(request.destination_wallet_id).await?;
        if source.currency != destination.currency || source.currency != request.currency {
            return Err(TransactionError::Validation(
                "cross-currency transfers are not supported".into(),
            ));
        }

        let mut transaction = Transaction::new(
            TransactionType::Transfer,
            request.initiated_by.clone(),
            request.amount_minor,
            request.currency,
            request.description,
        );
        transaction.source_wallet_id = Some(request.source_wallet_id);
        transaction.destination_wallet_id = Some(request.destination_wallet_id);
        transaction.external_reference = request.external_reference;
        transaction = self.store.insert(transaction).await?;

        self.run_transfer(transaction, source.ledger_account_id, destination.ledger_account_id)
            .await
    }

    async fn run_transfer(
        &self,
        mut transaction: Transaction,
        source_account: Uuid,
        destination_account: Uuid,
    ) -> TransactionResult<Transaction> {
        transaction.status = TransactionStatus::Processing;
        transaction.processed_at = Some(Utc::now());
        transaction = self.store.update(transaction).await?;

        let source_wallet_id = transaction
            .source_wallet_id
            .ok_or_else(|| TransactionError::Validation("transfer has no source wallet".into()))?;
        let destination_wallet_id = transaction
            .destination_wallet_id
            .ok_or_else(|| TransactionError::Validation("transfer has no destination wallet".into()))?;

        let move_result = self
            .wallets
            .reserve_and_move(TransferRequest {
                transaction_id: transaction.id,
                source_wallet_id,
                destination_wallet_id,
                amount_minor: transaction.amount_minor,
            })
            .await;

        let moved = match move_result {
            Ok(outcome) => outcome,
            Err(err) => {
                transaction.status = TransactionStatus::Failed;
                transaction.failure_reason = Some(err.to_string());
                return Ok(self.store.update(transaction).await?);
            }
        };
        let _ = moved;

        match self
            .post_ledger_entry(&transaction, source_account, destination_account, &transaction.initiated_by.clone())
            .await
        {
            Ok(ledger_entry_id) => {
                transaction.status = TransactionStatus::Completed;
                transaction.ledger_entry_id = Some(ledger_entry_id);
                transaction.completed_at = Some(Utc::now());
            }
            Err(err) => {
                // Wallet balances already moved; stay in `processing` so a
                // reconciliation sweep can retry the ledger posting.
                tracing::error!(
                    transaction_id = %transaction.id,
                    error = %err,
                    "ledger posting failed after transfer moved wallet balances; left in processing for reconciliation"
                );
            }
        }
        Ok(self.store.update(transaction).await?)
    }

    pub async fn create_deposit(
        &self,
        initiated_by: UserId,
        destination_wallet_id: Uuid,
        amount_minor: i64,
        currency: String,
        description: String,
    ) -> TransactionResult<Transaction> {
        self.require_permission(&initiated_by, "transaction:deposit:create").await?;
        if amount_minor <= 0 {
            return Err(TransactionError::Validation("amount must be positive".into()));
        }
        let destination = self.wallets.get_wallet(destination_wallet_id).await?;
        if destination.currency != currency {
            return Err(TransactionError::Validation("currency mismatch".into()));
        }
        let mut transaction = Transaction::new(
            TransactionType::Deposit,
            initiated_by,
            amount_minor,
            currency,
            description,
        );
        transaction.destination_wallet_id = Some(destination_wallet_id);
        transaction = self.store.insert(transaction).await?;
        self.run_one_sided(
            transaction,
            OneSidedDirection::Deposit {
                destination_wallet: destination_wallet_id,
                destination_account: destination.ledger_account_id,
            },
        )
        .await
    }

    pub async fn create_withdrawal(
        &self,
        initiated_by: UserId,
        source_wallet_id: Uuid,
        amount_minor: i64,
        currency: String,
        description: String,
    ) -> TransactionResult<Transaction> {
        self.require_permission(&initiated_by, "transaction:withdrawal:create").await?;
        if amount_minor <= 0 {
            return Err(TransactionError::Validation("amount must be positive".into()));
        }
        let source = self.wallets.get_wallet(source_wallet_id).await?;
        if source.currency != currency {
            return Err(TransactionError::Validation("currency mismatch".into()));
        }
        let mut transaction = Transaction::new(
            TransactionType::Withdrawal,
            initiated_by,
            amount_minor,
            currency,
            description,
        );
        transaction.source_wallet_id = Some(source_wallet_id);
        transaction = self.store.insert(transaction).await?;
        self.run_one_sided(
            transaction,
            OneSidedDirection::Withdrawal { source_wallet: source_wallet_id, source_account: source.ledger_account_id },
        )
        .await
    }

    /// Deposits and withdrawals only move one wallet; the suspense account
    /// supplies the other side of the balanced ledger entry.
    async fn run_one_sided(
        &self,
        mut transaction: Transaction,
        direction: OneSidedDirection,
    ) -> TransactionResult<Transaction> {
        transaction.status = TransactionStatus::Processing;
        transaction.processed_at = Some(Utc::now());
        transaction = self.store.update(transaction).await?;

        let move_request = OneSidedMoveRequest {
            transaction_id: transaction.id,
            wallet_id: direction.wallet_id(),
            amount_minor: transaction.amount_minor,
        };
        let move_result = match direction {
            OneSidedDirection::Deposit { .. } => self.wallets.apply_deposit(move_request).await,
            OneSidedDirection::Withdrawal { .. } => self.wallets.apply_withdrawal(move_request).await,
        };
        if let Err(err) = move_result {
            transaction.status = TransactionStatus::Failed;
            transaction.failure_reason = Some(err.to_string());
            return Ok(self.store.update(transaction).await?);
        }

        let (debit_account, credit_account) = match direction {
            OneSidedDirection::Deposit { destination_account, .. } => (self.suspense_account_id, destination_account),
            OneSidedDirection::Withdrawal { source_account, .. } => (source_account, self.suspense_account_id),
        };

        match self
            .post_ledger_entry(&transaction, debit_account, credit_account, &transaction.initiated_by.clone())
            .await
        {
            Ok(ledger_entry_id) => {
                transaction.status = TransactionStatus::Completed;
                transaction.ledger_entry_id = Some(ledger_entry_id);
                transaction.completed_at = Some(Utc::now());
            }
            Err(err) => {
                tracing::error!(
                    transaction_id = %transaction.id,
                    error = %err,
                    "ledger posting failed after one-sided wallet move; left in processing for reconciliation"
                );
            }
        }
        Ok(self.store.update(transaction).await?)
    }

    /// Admin-only. Reverses a completed transfer: moves the wallet balances
    /// back, then reverses the original ledger entry.
    pub async fn reverse_transaction(
        &self,
        reversed_by: UserId,
        transaction_id: TransactionId,
        reason: String,
    ) -> TransactionResult<Transaction> {
        self.require_permission(&reversed_by, "transaction:reversal:create").await?;
        let original = self.store.get(transaction_id).await?;
        if original.status != TransactionStatus::Completed {
            return Err(TransactionError::InvalidState);
        }
        let (Some(source_wallet_id), Some(destination_wallet_id)) =
            (original.source_wallet_id, original.destination_wallet_id)
        else {
            return Err(TransactionError::Validation(
                "only two-sided transactions can be reversed through this path".into(),
            ));
        };
        let ledger_entry_id = original
            .ledger_entry_id
            .ok_or_else(|| TransactionError::Validation("transaction has no posted ledger entry".into()))?;

        let mut reversal = Transaction::new(
            TransactionType::Reversal,
            reversed_by.clone(),
            original.amount_minor,
            original.currency.clone(),
            format!("reversal of {}: {reason}", original.id),
        );
        reversal.source_wallet_id = Some(destination_wallet_id);
        reversal.destination_wallet_id = Some(source_wallet_id);
        reversal.parent_transaction_id = Some(original.id);
        reversal = self.store.insert(reversal).await?;

        reversal.status = TransactionStatus::Processing;
        reversal.processed_at = Some(Utc::now());
        reversal = self.store.update(reversal).await?;

        self.wallets
            .reserve_and_move(TransferRequest {
                transaction_id: reversal.id,
                source_wallet_id: destination_wallet_id,
                destination_wallet_id: source_wallet_id,
                amount_minor: reversal.amount_minor,
            })
            .await?;

        let reversed_entry = self.ledger.reverse_entry(ledger_entry_id, &reversed_by, &reason).await?;

        reversal.status = TransactionStatus::Completed;
        reversal.ledger_entry_id = Some(reversed_entry.id);
        reversal.completed_at = Some(Utc::now());
        reversal = self.store.update(reversal).await?;

        let mut original = original;
        original.status = TransactionStatus::Reversed;
        self.store.update(original).await?;

        Ok(reversal)
    }

    pub async fn get_transaction(&self, id: TransactionId) -> TransactionResult<Transaction> {
        self.store.get(id).await
    }

    pub async fn list_transactions(&self, filter: TransactionFilter) -> TransactionResult<TransactionPage> {
        self.store.list(filter).await
    }
}

/// Retries ledger posting for transfers stuck in `processing` because the
/// wallet move succeeded but the ledger post failed or was interrupted.
/// Grounded in the same "sweep open sessions, resolve or leave open"
/// pattern used for reconciliation of unmatched external records.
pub struct ReconciliationSweep {
    store: Arc<dyn TransactionStore>,
    wallets: Arc<dyn WalletService>,
    ledger: Arc<dyn LedgerService>,
    grace_period: chrono::Duration,
}

impl ReconciliationSweep {
    #[must_use]
    pub fn new(
        store: Arc<dyn TransactionStore>,
        wallets: Arc<dyn WalletService>,
        ledger: Arc<dyn LedgerService>,
        grace_period: chrono::Duration,
    ) -> Self {
        Self {
            store,
            wallets,
            ledger,
            grace_period,
        }
    }

    /// Returns the ids of transactions it successfully moved to `completed`.
    pub async fn run_once(&self, now: DateTime<Utc>) -> TransactionResult<Vec<TransactionId>> {
        let cutoff = now - self.grace_period;
        let stuck = self.store.list_stuck_processing(cutoff).await?;
        let mut resolved = Vec::new();

        for mut transaction in stuck {
            let (Some(source_wallet_id), Some(destination_wallet_id)) =
                (transaction.source_wallet_id, transaction.destination_wallet_id)
            else {
                continue;
            };
            let source = self.wallets.get_wallet(source_wallet_id).await?;
            let destination = self.wallets.get_wallet(destination_wallet_id).await?;

            let reference = transaction.reference();
            let entry = match self
                .ledger
                .find_entry_by_reference(&reference.reference_type, &reference.reference_id)
                .await?
            {
                Some(entry) => entry,
                None => {
                    let created = self
                        .ledger
                        .create_entry(CreateEntryRequest {
                            entry_type: EntryType::Standard,
                            description: transaction.description.clone(),
                            reference: Some(reference),
                            lines: vec![
                                JournalLine::debit(source.ledger_account_id, transaction.amount_minor),
                                JournalLine::credit(destination.ledger_account_id, transaction.amount_minor),
                            ],
                        })
                        .await?;
                    self.ledger.post_entry(created.id, "reconciliation-sweep").await?
                }
            };

            transaction.status = TransactionStatus::Completed;
            transaction.ledger_entry_id = Some(entry.id);
            transaction.completed_at = Some(now);
            self.store.update(transaction.clone()).await?;
            resolved.push(transaction.id);
        }

        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_like_escapes_wildcards_and_backslash() {
        assert_eq!(escape_like("50%_off"), "50\\%\\_off");
        assert_eq!(escape_like("a\\b"), "a\\\\b");
        assert_eq!(escape_like("plain"), "plain");
    }

    #[test]
    fn default_filter_starts_on_page_one() {
        let filter = TransactionFilter::default();
        assert_eq!(filter.page, 1);
        assert_eq!(filter.page_size, 20);
    }
}
