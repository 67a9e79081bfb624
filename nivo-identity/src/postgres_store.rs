//! `IdentityStore` backed by PostgreSQL.
//!
//! # Schema
//! ```sql
//! CREATE TABLE users (
//!     id UUID PRIMARY KEY,
//!     email TEXT NOT NULL UNIQUE,
//!     phone TEXT NOT NULL,
//!     account_type TEXT NOT NULL DEFAULT 'regular',
//!     password_hash TEXT NOT NULL,
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
//!     default_wallet_id UUID
//! );
//! CREATE INDEX users_phone_idx ON users (phone);
//! ```

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::Row;

use crate::AccountType;
use crate::IdentityError;
use crate::IdentityResult;
use crate::IdentityStore;
use crate::User;
use crate::UserId;

#[derive(Clone)]
pub struct PostgresIdentityStore {
    pool: PgPool,
}

impl PostgresIdentityStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn classify(err: sqlx::Error) -> IdentityError {
        IdentityError::Storage(nivo_persistence::pg::classify(err).to_string())
    }
}

#[async_trait]
impl IdentityStore for PostgresIdentityStore {
    async fn insert(&self, user: User) -> IdentityResult<User> {
        sqlx::query(
            "INSERT INTO users (id, email, phone, account_type, password_hash, created_at, default_wallet_id)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.phone)
        .bind(account_type_label(user.account_type))
        .bind(&user.password_hash)
        .bind(user.created_at)
        .bind(user.default_wallet_id)
        .execute(&self.pool)
        .await
        .map_err(|err| match err {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                IdentityError::DuplicateEmail(user.email.clone())
            }
            other => Self::classify(other),
        })?;
        Ok(user)
    }

    async fn update(&self, user: User) -> IdentityResult<User> {
        let result = sqlx::query("UPDATE users SET default_wallet_id = $2 WHERE id = $1")
            .bind(user.id)
            .bind(user.default_wallet_id)
            .execute(&self.pool)
            .await
            .map_err(Self::classify)?;
        if result.rows_affected() == 0 {
            return Err(IdentityError::NotFound(user.id));
        }
        Ok(user)
    }

    async fn get(&self, id: UserId) -> IdentityResult<User> {
        let row = sqlx::query("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Self::classify)?
            .ok_or(IdentityError::NotFound(id))?;
        Ok(row_to_user(&row))
    }

    async fn find_by_email(&self, email: &str) -> IdentityResult<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(Self::classify)?;
        Ok(row.map(|row| row_to_user(&row)))
    }

    async fn find_by_phone(&self, phone: &str) -> IdentityResult<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE phone = $1 LIMIT 1")
            .bind(phone)
            .fetch_optional(&self.pool)
            .await
            .map_err(Self::classify)?;
        Ok(row.map(|row| row_to_user(&row)))
    }
}

fn account_type_label(account_type: AccountType) -> &'static str {
    match account_type {
        AccountType::Regular => "regular",
        AccountType::Admin => "admin",
    }
}

fn row_to_user(row: &sqlx::postgres::PgRow) -> User {
    let account_type: String = row.get("account_type");
    User {
        id: row.get("id"),
        email: row.get("email"),
        phone: row.get("phone"),
        account_type: if account_type == "admin" {
            AccountType::Admin
        } else {
            AccountType::Regular
        },
        password_hash: row.get("password_hash"),
        created_at: row.get("created_at"),
        default_wallet_id: row.get("default_wallet_id"),
    }
}
