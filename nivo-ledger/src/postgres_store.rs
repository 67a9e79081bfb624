//! `LedgerService` backed by PostgreSQL.
//!
//! # Schema
//! ```sql
//! CREATE TABLE accounts (
//!     id UUID PRIMARY KEY,
//!     code TEXT NOT NULL UNIQUE,
//!     name TEXT NOT NULL,
//!     account_type TEXT NOT NULL,
//!     currency TEXT NOT NULL,
//!     parent_account_id UUID REFERENCES accounts(id),
//!     balance_minor BIGINT NOT NULL DEFAULT 0,
//!     debit_total_minor BIGINT NOT NULL DEFAULT 0,
//!     credit_total_minor BIGINT NOT NULL DEFAULT 0,
//!     status TEXT NOT NULL DEFAULT 'active'
//! );
//!
//! CREATE TABLE journal_entries (
//!     id UUID PRIMARY KEY,
//!     entry_number TEXT NOT NULL UNIQUE,
//!     entry_type TEXT NOT NULL,
//!     status TEXT NOT NULL,
//!     description TEXT NOT NULL,
//!     reference_type TEXT,
//!     reference_id TEXT,
//!     posted_at TIMESTAMPTZ,
//!     posted_by TEXT,
//!     voided_at TIMESTAMPTZ,
//!     voided_by TEXT,
//!     void_reason TEXT,
//!     reversal_entry_id UUID REFERENCES journal_entries(id)
//! );
//!
//! CREATE TABLE journal_lines (
//!     id UUID PRIMARY KEY,
//!     entry_id UUID NOT NULL REFERENCES journal_entries(id),
//!     account_id UUID NOT NULL REFERENCES accounts(id),
//!     side TEXT NOT NULL,
//!     amount_minor BIGINT NOT NULL,
//!     description TEXT
//! );
//!
//! CREATE TABLE entry_number_sequences (
//!     fiscal_year INT PRIMARY KEY,
//!     next_value INT NOT NULL DEFAULT 1
//! );
//! ```
//!
//! Posting locks every referenced account row with `SELECT ... FOR UPDATE`
//! in ascending `account_id` order, so two entries that touch the same pair
//! of accounts in different orders never deadlock.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use sqlx::Postgres;
use sqlx::Row;
use sqlx::Transaction;

use crate::Account;
use crate::AccountId;
use crate::AccountStatus;
use crate::AccountType;
use crate::CreateAccountRequest;
use crate::CreateEntryRequest;
use crate::EntryId;
use crate::EntryReference;
use crate::EntryStatus;
use crate::EntryType;
use crate::JournalEntry;
use crate::JournalLine;
use crate::LedgerError;
use crate::LedgerResult;
use crate::LedgerService;
use crate::PostingSide;

#[derive(Clone)]
pub struct PostgresLedgerService {
    pool: PgPool,
}

impl PostgresLedgerService {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn classify(err: sqlx::Error) -> LedgerError {
        LedgerError::Storage(nivo_persistence::pg::classify(err).to_string())
    }

    async fn load_account(
        tx: &mut Transaction<'_, Postgres>,
        id: AccountId,
        for_update: bool,
    ) -> LedgerResult<Account> {
        let query = if for_update {
            "SELECT * FROM accounts WHERE id = $1 FOR UPDATE"
        } else {
            "SELECT * FROM accounts WHERE id = $1"
        };
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(Self::classify)?
            .ok_or(LedgerError::AccountNotFound(id))?;
        Ok(row_to_account(&row))
    }

    async fn load_entry(
        tx: &mut Transaction<'_, Postgres>,
        id: EntryId,
        for_update: bool,
    ) -> LedgerResult<JournalEntry> {
        let query = if for_update {
            "SELECT * FROM journal_entries WHERE id = $1 FOR UPDATE"
        } else {
            "SELECT * FROM journal_entries WHERE id = $1"
        };
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(Self::classify)?
            .ok_or(LedgerError::EntryNotFound(id))?;
        let lines = sqlx::query("SELECT * FROM journal_lines WHERE entry_id = $1 ORDER BY id")
            .bind(id)
            .fetch_all(&mut **tx)
            .await
            .map_err(Self::classify)?
            .into_iter()
            .map(|line_row| row_to_line(&line_row))
            .collect();
        Ok(row_to_entry(&row, lines))
    }

    async fn insert_lines(
        tx: &mut Transaction<'_, Postgres>,
        entry_id: EntryId,
        lines: &[JournalLine],
    ) -> LedgerResult<()> {
        for line in lines {
            sqlx::query(
                "INSERT INTO journal_lines (id, entry_id, account_id, side, amount_minor, description)
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(line.id)
            .bind(entry_id)
            .bind(line.account_id)
            .bind(side_label(line.side))
            .bind(line.amount_minor)
            .bind(&line.description)
            .execute(&mut **tx)
            .await
            .map_err(Self::classify)?;
        }
        Ok(())
    }

    async fn next_entry_number(tx: &mut Transaction<'_, Postgres>) -> LedgerResult<String> {
        let year = Utc::now().format("%Y").to_string().parse::<i32>().unwrap_or(0);
        let row = sqlx::query(
            "INSERT INTO entry_number_sequences (fiscal_year, next_value)
             VALUES ($1, 2)
             ON CONFLICT (fiscal_year) DO UPDATE
             SET next_value = entry_number_sequences.next_value + 1
             RETURNING next_value - 1",
        )
        .bind(year)
        .fetch_one(&mut **tx)
        .await
        .map_err(Self::classify)?;
        let value: i32 = row.get(0);
        Ok(format!("JE-{year}-{value:05}"))
    }

    /// Applies every line of `entry` to its account, locking accounts in
    /// ascending id order, then stamps and persists the entry as posted.
    async fn post_locked(
        tx: &mut Transaction<'_, Postgres>,
        mut entry: JournalEntry,
        posted_by: &str,
    ) -> LedgerResult<JournalEntry> {
        if entry.status != EntryStatus::Draft {
            return Err(LedgerError::NotDraft(entry.id));
        }
        entry.validate_structure()?;

        let mut account_ids: Vec<AccountId> =
            entry.lines.iter().map(|line| line.account_id).collect();
        account_ids.sort();
        account_ids.dedup();

        let mut accounts = Vec::with_capacity(account_ids.len());
        for account_id in account_ids {
            accounts.push(Self::load_account(tx, account_id, true).await?);
        }
        for account in &accounts {
            if account.status != AccountStatus::Active {
                return Err(LedgerError::AccountInactive(account.id));
            }
        }

        for line in &entry.lines {
            let account = accounts
                .iter_mut()
                .find(|candidate| candidate.id == line.account_id)
                .expect("account was loaded for every referenced line above");
            account.apply_line(line.side, line.amount_minor);
        }

        for account in &accounts {
            sqlx::query(
                "UPDATE accounts
                 SET balance_minor = $2, debit_total_minor = $3, credit_total_minor = $4
                 WHERE id = $1",
            )
            .bind(account.id)
            .bind(account.balance_minor)
            .bind(account.debit_total_minor)
            .bind(account.credit_total_minor)
            .execute(&mut **tx)
            .await
            .map_err(PostgresLedgerService::classify)?;
        }

        entry.status = EntryStatus::Posted;
        entry.posted_at = Some(Utc::now());
        entry.posted_by = Some(posted_by.to_string());

        sqlx::query(
            "UPDATE journal_entries SET status = $2, posted_at = $3, posted_by = $4 WHERE id = $1",
        )
        .bind(entry.id)
        .bind("posted")
        .bind(entry.posted_at)
        .bind(&entry.posted_by)
        .execute(&mut **tx)
        .await
        .map_err(PostgresLedgerService::classify)?;

        Ok(entry)
    }
}

#[async_trait]
impl LedgerService for PostgresLedgerService {
    async fn create_account(&self, request: CreateAccountRequest) -> LedgerResult<Account> {
        let account = Account {
            id: uuid::Uuid::new_v4(),
            code: request.code,
            name: request.name,
            account_type: request.account_type,
            currency: request.currency,
            parent_account_id: request.parent_account_id,
            balance_minor: 0,
            debit_total_minor: 0,
            credit_total_minor: 0,
            status: AccountStatus::Active,
        };

        let mut tx = self.pool.begin().await.map_err(Self::classify)?;
        if let Some(parent_id) = account.parent_account_id {
            let exists = sqlx::query("SELECT 1 FROM accounts WHERE id = $1")
                .bind(parent_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(Self::classify)?;
            if exists.is_none() {
                return Err(LedgerError::ParentNotFound(parent_id));
            }
        }
        sqlx::query(
            "INSERT INTO accounts
                (id, code, name, account_type, currency, parent_account_id,
                 balance_minor, debit_total_minor, credit_total_minor, status)
             VALUES ($1, $2, $3, $4, $5, $6, 0, 0, 0, 'active')",
        )
        .bind(account.id)
        .bind(&account.code)
        .bind(&account.name)
        .bind(account_type_label(account.account_type))
        .bind(&account.currency)
        .bind(account.parent_account_id)
        .execute(&mut *tx)
        .await
        .map_err(|err| match err {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                LedgerError::DuplicateCode(account.code.clone())
            }
            other => Self::classify(other),
        })?;
        tx.commit().await.map_err(Self::classify)?;
        Ok(account)
    }

    async fn get_account(&self, id: AccountId) -> LedgerResult<Account> {
        let row = sqlx::query("SELECT * FROM accounts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Self::classify)?
            .ok_or(LedgerError::AccountNotFound(id))?;
        Ok(row_to_account(&row))
    }

    async fn create_entry(&self, request: CreateEntryRequest) -> LedgerResult<JournalEntry> {
        let mut tx = self.pool.begin().await.map_err(Self::classify)?;
        for line in &request.lines {
            let account = Self::load_account(&mut tx, line.account_id, false).await?;
            if account.status != AccountStatus::Active {
                return Err(LedgerError::AccountInactive(line.account_id));
            }
        }

        let entry_number = Self::next_entry_number(&mut tx).await?;
        let entry = JournalEntry {
            id: uuid::Uuid::new_v4(),
            entry_number,
            entry_type: request.entry_type,
            status: EntryStatus::Draft,
            description: request.description,
            reference: request.reference,
            lines: request.lines,
            posted_at: None,
            posted_by: None,
            voided_at: None,
            voided_by: None,
            void_reason: None,
            reversal_entry_id: None,
        };
        entry.validate_structure()?;

        sqlx::query(
            "INSERT INTO journal_entries
                (id, entry_number, entry_type, status, description, reference_type, reference_id)
             VALUES ($1, $2, $3, 'draft', $4, $5, $6)",
        )
        .bind(entry.id)
        .bind(&entry.entry_number)
        .bind(entry_type_label(entry.entry_type))
        .bind(&entry.description)
        .bind(entry.reference.as_ref().map(|r| r.reference_type.clone()))
        .bind(entry.reference.as_ref().map(|r| r.reference_id.clone()))
        .execute(&mut *tx)
        .await
        .map_err(Self::classify)?;
        Self::insert_lines(&mut tx, entry.id, &entry.lines).await?;

        tx.commit().await.map_err(Self::classify)?;
        Ok(entry)
    }

    async fn post_entry(&self, entry_id: EntryId, posted_by: &str) -> LedgerResult<JournalEntry> {
        let mut tx = self.pool.begin().await.map_err(Self::classify)?;
        let entry = Self::load_entry(&mut tx, entry_id, true).await?;
        let posted = Self::post_locked(&mut tx, entry, posted_by).await?;
        tx.commit().await.map_err(Self::classify)?;
        Ok(posted)
    }

    async fn void_entry(
        &self,
        entry_id: EntryId,
        voided_by: &str,
        reason: &str,
    ) -> LedgerResult<JournalEntry> {
        let mut tx = self.pool.begin().await.map_err(Self::classify)?;
        let mut entry = Self::load_entry(&mut tx, entry_id, true).await?;
        if entry.status != EntryStatus::Posted {
            return Err(LedgerError::NotPosted(entry_id));
        }
        entry.status = EntryStatus::Voided;
        entry.voided_at = Some(Utc::now());
        entry.voided_by = Some(voided_by.to_string());
        entry.void_reason = Some(reason.to_string());

        sqlx::query(
            "UPDATE journal_entries
             SET status = 'voided', voided_at = $2, voided_by = $3, void_reason = $4
             WHERE id = $1",
        )
        .bind(entry.id)
        .bind(entry.voided_at)
        .bind(&entry.voided_by)
        .bind(&entry.void_reason)
        .execute(&mut *tx)
        .await
        .map_err(Self::classify)?;
        tx.commit().await.map_err(Self::classify)?;
        Ok(entry)
    }

    async fn reverse_entry(
        &self,
        entry_id: EntryId,
        reversed_by: &str,
        reason: &str,
    ) -> LedgerResult<JournalEntry> {
        let mut tx = self.pool.begin().await.map_err(Self::classify)?;
        let original = Self::load_entry(&mut tx, entry_id, true).await?;
        if original.status != EntryStatus::Posted {
            return Err(LedgerError::NotPosted(entry_id));
        }

        let entry_number = Self::next_entry_number(&mut tx).await?;
        let draft = original.build_reversal(entry_number, reason);

        sqlx::query(
            "INSERT INTO journal_entries
                (id, entry_number, entry_type, status, description, reference_type, reference_id)
             VALUES ($1, $2, $3, 'draft', $4, $5, $6)",
        )
        .bind(draft.id)
        .bind(&draft.entry_number)
        .bind(entry_type_label(draft.entry_type))
        .bind(&draft.description)
        .bind(draft.reference.as_ref().map(|r| r.reference_type.clone()))
        .bind(draft.reference.as_ref().map(|r| r.reference_id.clone()))
        .execute(&mut *tx)
        .await
        .map_err(Self::classify)?;
        Self::insert_lines(&mut tx, draft.id, &draft.lines).await?;

        let posted = Self::post_locked(&mut tx, draft, reversed_by).await?;

        sqlx::query(
            "UPDATE journal_entries SET status = 'reversed', reversal_entry_id = $2 WHERE id = $1",
        )
        .bind(entry_id)
        .bind(posted.id)
        .execute(&mut *tx)
        .await
        .map_err(Self::classify)?;

        tx.commit().await.map_err(Self::classify)?;
        Ok(posted)
    }

    async fn get_entry(&self, entry_id: EntryId) -> LedgerResult<JournalEntry> {
        let row = sqlx::query("SELECT * FROM journal_entries WHERE id = $1")
            .bind(entry_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Self::classify)?
            .ok_or(LedgerError::EntryNotFound(entry_id))?;
        let lines = sqlx::query("SELECT * FROM journal_lines WHERE entry_id = $1 ORDER BY id")
            .bind(entry_id)
            .fetch_all(&self.pool)
            .await
            .map_err(Self::classify)?
            .into_iter()
            .map(|line_row| row_to_line(&line_row))
            .collect();
        Ok(row_to_entry(&row, lines))
    }

    async fn find_entry_by_reference(
        &self,
        reference_type: &str,
        reference_id: &str,
    ) -> LedgerResult<Option<JournalEntry>> {
        let row = sqlx::query(
            "SELECT * FROM journal_entries WHERE reference_type = $1 AND reference_id = $2",
        )
        .bind(reference_type)
        .bind(reference_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Self::classify)?;
        let Some(row) = row else {
            return Ok(None);
        };
        let entry_id: EntryId = row.get("id");
        let lines = sqlx::query("SELECT * FROM journal_lines WHERE entry_id = $1 ORDER BY id")
            .bind(entry_id)
            .fetch_all(&self.pool)
            .await
            .map_err(Self::classify)?
            .into_iter()
            .map(|line_row| row_to_line(&line_row))
            .collect();
        Ok(Some(row_to_entry(&row, lines)))
    }

    async fn recompute_balance(&self, account_id: AccountId) -> LedgerResult<i64> {
        let account = self.get_account(account_id).await?;
        let rows = sqlx::query(
            "SELECT jl.side, jl.amount_minor
             FROM journal_lines jl
             JOIN journal_entries je ON je.id = jl.entry_id
             WHERE jl.account_id = $1 AND je.status IN ('posted', 'reversed')",
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Self::classify)?;

        let mut balance = 0_i64;
        for row in rows {
            let side: String = row.get("side");
            let amount_minor: i64 = row.get("amount_minor");
            let signed = if side == "debit" { amount_minor } else { -amount_minor };
            balance += if account.account_type.is_debit_normal() {
                signed
            } else {
                -signed
            };
        }
        Ok(balance)
    }
}

fn account_type_label(account_type: AccountType) -> &'static str {
    match account_type {
        AccountType::Asset => "asset",
        AccountType::Liability => "liability",
        AccountType::Equity => "equity",
        AccountType::Revenue => "revenue",
        AccountType::Expense => "expense",
    }
}

fn account_status_from_label(label: &str) -> AccountStatus {
    match label {
        "inactive" => AccountStatus::Inactive,
        "closed" => AccountStatus::Closed,
        _ => AccountStatus::Active,
    }
}

fn side_label(side: PostingSide) -> &'static str {
    match side {
        PostingSide::Debit => "debit",
        PostingSide::Credit => "credit",
    }
}

fn entry_type_label(entry_type: EntryType) -> &'static str {
    match entry_type {
        EntryType::Standard => "standard",
        EntryType::Opening => "opening",
        EntryType::Closing => "closing",
        EntryType::Adjusting => "adjusting",
        EntryType::Reversing => "reversing",
    }
}

fn row_to_account(row: &sqlx::postgres::PgRow) -> Account {
    let account_type: String = row.get("account_type");
    let status: String = row.get("status");
    Account {
        id: row.get("id"),
        code: row.get("code"),
        name: row.get("name"),
        account_type: match account_type.as_str() {
            "liability" => AccountType::Liability,
            "equity" => AccountType::Equity,
            "revenue" => AccountType::Revenue,
            "expense" => AccountType::Expense,
            _ => AccountType::Asset,
        },
        currency: row.get("currency"),
        parent_account_id: row.get("parent_account_id"),
        balance_minor: row.get("balance_minor"),
        debit_total_minor: row.get("debit_total_minor"),
        credit_total_minor: row.get("credit_total_minor"),
        status: account_status_from_label(&status),
    }
}

fn row_to_line(row: &sqlx::postgres::PgRow) -> JournalLine {
    let side: String = row.get("side");
    JournalLine {
        id: row.get("id"),
        account_id: row.get("account_id"),
        side: if side == "debit" { PostingSide::Debit } else { PostingSide::Credit },
        amount_minor: row.get("amount_minor"),
        description: row.get("description"),
    }
}

fn row_to_entry(row: &sqlx::postgres::PgRow, lines: Vec<JournalLine>) -> JournalEntry {
    let entry_type: String = row.get("entry_type");
    let status: String = row.get("status");
    let reference_type: Option<String> = row.get("reference_type");
    let reference_id: Option<String> = row.get("reference_id");
    JournalEntry {
        id: row.get("id"),
        entry_number: row.get("entry_number"),
        entry_type: match entry_type.as_str() {
            "opening" => EntryType::Opening,
            "closing" => EntryType::Closing,
            "adjusting" => EntryType::Adjusting,
            "reversing" => EntryType::Reversing,
            _ => EntryType::Standard,
        },
        status: match status.as_str() {
            "posted" => EntryStatus::Posted,
            "voided" => EntryStatus::Voided,
            "reversed" => EntryStatus::Reversed,
            _ => EntryStatus::Draft,
        },
        description: row.get("description"),
        reference: reference_type.zip(reference_id).map(|(reference_type, reference_id)| {
            EntryReference { reference_type, reference_id }
        }),
        lines,
        posted_at: row.get("posted_at"),
        posted_by: row.get("posted_by"),
        voided_at: row.get("voided_at"),
        voided_by: row.get("voided_by"),
        void_reason: row.get("void_reason"),
        reversal_entry_id: row.get("reversal_entry_id"),
    }
}
