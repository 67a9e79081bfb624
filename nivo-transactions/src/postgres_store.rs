//! `TransactionStore` backed by PostgreSQL.
//!
//! # Schema
//! ```sql
//! CREATE TABLE transactions (
//!     id UUID PRIMARY KEY,
//!     transaction_type TEXT NOT NULL,
//!     status TEXT NOT NULL DEFAULT 'pending',
//!     source_wallet_id UUID,
//!     destination_wallet_id UUID,
//!     amount_minor BIGINT NOT NULL,
//!     currency TEXT NOT NULL,
//!     description TEXT NOT NULL,
//!     external_reference TEXT,
//!     ledger_entry_id UUID,
//!     parent_transaction_id UUID,
//!     initiated_by TEXT NOT NULL,
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
//!     processed_at TIMESTAMPTZ,
//!     completed_at TIMESTAMPTZ,
//!     failure_reason TEXT
//! );
//! CREATE INDEX transactions_wallet_idx ON transactions (source_wallet_id, destination_wallet_id);
//! CREATE INDEX transactions_status_idx ON transactions (status);
//! ```
//!
//! Search filters translate to an escaped `LIKE ... ESCAPE '\\'` clause
//! built from [`crate::escape_like`]; callers never interpolate raw user
//! input into the query text.

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use sqlx::PgPool;
use sqlx::QueryBuilder;
use sqlx::Row;
use uuid::Uuid;

use crate::TransactionError;
use crate::escape_like;
use crate::Transaction;
use crate::TransactionFilter;
use crate::TransactionId;
use crate::TransactionPage;
use crate::TransactionResult;
use crate::TransactionStatus;
use crate::TransactionStore;
use crate::TransactionType;
use nivo_envelope::PageMeta;

#[derive(Clone)]
pub struct PostgresTransactionStore {
    pool: PgPool,
}

impl PostgresTransactionStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn classify(err: sqlx::Error) -> TransactionError {
        TransactionError::Storage(nivo_persistence::pg::classify(err).to_string())
    }
}

#[async_trait]
impl TransactionStore for PostgresTransactionStore {
    async fn insert(&self, transaction: Transaction) -> TransactionResult<Transaction> {
        sqlx::query(
            "INSERT INTO transactions
                (id, transaction_type, status, source_wallet_id, destination_wallet_id,
                 amount_minor, currency, description, external_reference, ledger_entry_id,
                 parent_transaction_id, initiated_by, processed_at, completed_at, failure_reason)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
        )
        .bind(transaction.id)
        .bind(type_label(transaction.transaction_type))
        .bind(status_label(transaction.status))
        .bind(transaction.source_wallet_id)
        .bind(transaction.destination_wallet_id)
        .bind(transaction.amount_minor)
        .bind(&transaction.currency)
        .bind(&transaction.description)
        .bind(&transaction.external_reference)
        .bind(transaction.ledger_entry_id)
        .bind(transaction.parent_transaction_id)
        .bind(&transaction.initiated_by)
        .bind(transaction.processed_at)
        .bind(transaction.completed_at)
        .bind(&transaction.failure_reason)
        .execute(&self.pool)
        .await
        .map_err(Self::classify)?;
        Ok(transaction)
    }

    async fn update(&self, transaction: Transaction) -> TransactionResult<Transaction> {
        sqlx::query(
            "UPDATE transactions
             SET status = $2, ledger_entry_id = $3, processed_at = $4, completed_at = $5,
                 failure_reason = $6
             WHERE id = $1",
        )
        .bind(transaction.id)
        .bind(status_label(transaction.status))
        .bind(transaction.ledger_entry_id)
        .bind(transaction.processed_at)
        .bind(transaction.completed_at)
        .bind(&transaction.failure_reason)
        .execute(&self.pool)
        .await
        .map_err(Self::classify)?;
        Ok(transaction)
    }

    async fn get(&self, id: TransactionId) -> TransactionResult<Transaction> {
        let row = sqlx::query("SELECT * FROM transactions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Self::classify)?
            .ok_or(TransactionError::NotFound(id))?;
        Ok(row_to_transaction(&row))
    }

    async fn find_completed_by_reference(
        &self,
        source_wallet_id: Uuid,
        external_reference: &str,
    ) -> TransactionResult<Option<Transaction>> {
        let row = sqlx::query(
            "SELECT * FROM transactions
             WHERE source_wallet_id = $1 AND external_reference = $2 AND status = 'completed'
             LIMIT 1",
        )
        .bind(source_wallet_id)
        .bind(external_reference)
        .fetch_optional(&self.pool)
        .await
        .map_err(Self::classify)?;
        Ok(row.map(|row| row_to_transaction(&row)))
    }

    async fn list(&self, filter: TransactionFilter) -> TransactionResult<TransactionPage> {
        let page = filter.page.max(1);
        let page_size = filter.page_size.max(1);
        let offset = i64::from(page - 1) * i64::from(page_size);

        let mut count_builder = QueryBuilder::new("SELECT count(*) FROM transactions WHERE 1 = 1");
        let mut select_builder =
            QueryBuilder::new("SELECT * FROM transactions WHERE 1 = 1");

        for builder in [&mut count_builder, &mut select_builder] {
            if let Some(wallet_id) = filter.wallet_id {
                builder
                    .push(" AND (source_wallet_id = ")
                    .push_bind(wallet_id)
                    .push(" OR destination_wallet_id = ")
                    .push_bind(wallet_id)
                    .push(")");
            }
            if let Some(status) = filter.status {
                builder.push(" AND status = ").push_bind(status_label(status));
            }
            if let Some(transaction_type) = filter.transaction_type {
                builder
                    .push(" AND transaction_type = ")
                    .push_bind(type_label(transaction_type));
            }
            if let Some(from) = filter.from {
                builder.push(" AND processed_at >= ").push_bind(from);
            }
            if let Some(to) = filter.to {
                builder.push(" AND processed_at <= ").push_bind(to);
            }
            if let Some(search) = filter.search.as_deref() {
                let escaped = format!("%{}%", escape_like(search));
                builder
                    .push(" AND (description LIKE ")
                    .push_bind(escaped.clone())
                    .push(" ESCAPE '\\' OR external_reference LIKE ")
                    .push_bind(escaped)
                    .push(" ESCAPE '\\')");
            }
        }

        let total_items: i64 = count_builder
            .build()
            .fetch_one(&self.pool)
            .await
            .map_err(Self::classify)?
            .try_get(0)
            .map_err(Self::classify)?;

        select_builder
            .push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(i64::from(page_size))
            .push(" OFFSET ")
            .push_bind(offset);
        let rows = select_builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(Self::classify)?;
        let items = rows.iter().map(row_to_transaction).collect();

        Ok(TransactionPage {
            items,
            meta: PageMeta::new(page, page_size, total_items.max(0) as u64),
        })
    }

    async fn list_stuck_processing(&self, older_than: DateTime<Utc>) -> TransactionResult<Vec<Transaction>> {
        let rows = sqlx::query(
            "SELECT * FROM transactions WHERE status = 'processing' AND processed_at <= $1",
        )
        .bind(older_than)
        .fetch_all(&self.pool)
        .await
        .map_err(Self::classify)?;
        Ok(rows.iter().map(row_to_transaction).collect())
    }
}

fn type_label(transaction_type: TransactionType) -> &'static str {
    match transaction_type {
        TransactionType::Transfer => "transfer",
        TransactionType::Deposit => "deposit",
        TransactionType::Withdrawal => "withdrawal",
        TransactionType::Reversal => "reversal",
        TransactionType::Fee => "fee",
        TransactionType::Refund => "refund",
    }
}

fn type_from_label(label: &str) -> TransactionType {
    match label {
        "deposit" => TransactionType::Deposit,
        "withdrawal" => TransactionType::Withdrawal,
        "reversal" => TransactionType::Reversal,
        "fee" => TransactionType::Fee,
        "refund" => TransactionType::Refund,
        _ => TransactionType::Transfer,
    }
}

fn status_label(status: TransactionStatus) -> &'static str {
    match status {
        TransactionStatus::Pending => "pending",
        TransactionStatus::Processing => "processing",
        TransactionStatus::Completed => "completed",
        TransactionStatus::Failed => "failed",
        TransactionStatus::Reversed => "reversed",
        TransactionStatus::Cancelled => "cancelled",
    }
}

fn status_from_label(label: &str) -> TransactionStatus {
    match label {
        "processing" => TransactionStatus::Processing,
        "completed" => TransactionStatus::Completed,
        "failed" => TransactionStatus::Failed,
        "reversed" => TransactionStatus::Reversed,
        "cancelled" => TransactionStatus::Cancelled,
        _ => TransactionStatus::Pending,
    }
}

fn row_to_transaction(row: &sqlx::postgres::PgRow) -> Transaction {
    let transaction_type: String = row.get("transaction_type");
    let status: String = row.get("status");
    Transaction {
        id: row.get("id"),
        transaction_type: type_from_label(&transaction_type),
        status: status_from_label(&status),
        source_wallet_id: row.get("source_wallet_id"),
        destination_wallet_id: row.get("destination_wallet_id"),
        amount_minor: row.get("amount_minor"),
        currency: row.get("currency"),
        description: row.get("description"),
        external_reference: row.get("external_reference"),
        ledger_entry_id: row.get("ledger_entry_id"),
        parent_transaction_id: row.get("parent_transaction_id"),
        initiated_by: row.get("initiated_by"),
        processed_at: row.get("processed_at"),
        completed_at: row.get("completed_at"),
        failure_reason: row.get("failure_reason"),
    }
}
