#![deny(clippy::print_stdout, clippy::print_stderr)]

//! Connection pooling, transactional helpers, and PostgreSQL error
//! classification shared by every Nivo service that talks to the
//! relational store.
//!
//! Built behind the `postgres` feature so domain crates can depend on this
//! crate for its error-classification types in tests without pulling in
//! `sqlx` and a live database.

use nivo_envelope::ErrorCode;
use nivo_envelope::IntoEnvelopeError;
use thiserror::Error;

pub type PersistenceResult<T> = Result<T, PersistenceError>;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("duplicate key: {0}")]
    Conflict(String),
    #[error("referenced row does not exist: {0}")]
    BadRequest(String),
    #[error("constraint violated: {0}")]
    Validation(String),
    #[error("database unavailable: {0}")]
    Unavailable(String),
    #[error("internal database error: {0}")]
    Internal(String),
}

impl IntoEnvelopeError for PersistenceError {
    fn code(&self) -> ErrorCode {
        match self {
            PersistenceError::Conflict(_) => ErrorCode::Conflict,
            PersistenceError::BadRequest(_) => ErrorCode::BadRequest,
            PersistenceError::Validation(_) => ErrorCode::Validation,
            PersistenceError::Unavailable(_) => ErrorCode::Unavailable,
            PersistenceError::Internal(_) => ErrorCode::Internal,
        }
    }

    fn message(&self) -> String {
        self.to_string()
    }
}

/// Connection pool configuration read from the environment (spec §6):
/// `DATABASE_URL` is required, everything else has a sane default.
#[derive(Debug, Clone)]
pub struct PgPoolConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub idle_timeout_secs: u64,
}

impl PgPoolConfig {
    pub fn from_env() -> PersistenceResult<Self> {
        let database_url = std::env::var("DATABASE_URL").map_err(|_| {
            PersistenceError::Internal("DATABASE_URL is required but was not set".into())
        })?;
        let max_connections = std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10);
        let idle_timeout_secs = std::env::var("DATABASE_IDLE_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(300);
        Ok(Self {
            database_url,
            max_connections,
            idle_timeout_secs,
        })
    }
}

#[cfg(feature = "postgres")]
pub mod pg {
    use std::future::Future;
    use std::time::Duration;

    use sqlx::PgPool;
    use sqlx::Postgres;
    use sqlx::Transaction;
    use sqlx::error::ErrorKind;
    use sqlx::postgres::PgPoolOptions;

    use super::PersistenceError;
    use super::PersistenceResult;
    use super::PgPoolConfig;

    pub async fn connect(cfg: &PgPoolConfig) -> PersistenceResult<PgPool> {
        PgPoolOptions::new()
            .max_connections(cfg.max_connections)
            .idle_timeout(Duration::from_secs(cfg.idle_timeout_secs))
            .connect(&cfg.database_url)
            .await
            .map_err(|err| PersistenceError::Unavailable(err.to_string()))
    }

    pub async fn run_migrations(
        pool: &PgPool,
        migrations_dir: &std::path::Path,
    ) -> PersistenceResult<()> {
        sqlx::migrate::Migrator::new(migrations_dir)
            .await
            .map_err(|err| PersistenceError::Internal(err.to_string()))?
            .run(pool)
            .await
            .map_err(|err| PersistenceError::Internal(err.to_string()))
    }

    /// Classifies a driver error into the closed taxonomy by inspecting the
    /// PostgreSQL SQLSTATE code (spec §7): unique violation (`23505`) maps
    /// to `Conflict`, foreign-key violation (`23503`) to `BadRequest`, check
    /// violation (`23514`) to `Validation`. Anything else is `Internal`,
    /// except connectivity failures, which are `Unavailable`.
    pub fn classify(err: sqlx::Error) -> PersistenceError {
        match &err {
            sqlx::Error::Database(db_err) => match db_err.kind() {
                ErrorKind::UniqueViolation => PersistenceError::Conflict(db_err.to_string()),
                ErrorKind::ForeignKeyViolation => PersistenceError::BadRequest(db_err.to_string()),
                ErrorKind::CheckViolation | ErrorKind::NotNullViolation => {
                    PersistenceError::Validation(db_err.to_string())
                }
                _ => PersistenceError::Internal(db_err.to_string()),
            },
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
                PersistenceError::Unavailable(err.to_string())
            }
            sqlx::Error::RowNotFound => PersistenceError::Internal("row not found".into()),
            other => PersistenceError::Internal(other.to_string()),
        }
    }

    /// Runs `f` inside a single transaction, committing on `Ok` and rolling
    /// back on `Err` — the mechanism behind every "single relational
    /// transaction" state-changing operation in spec §4.3/§4.4.
    pub async fn with_transaction<T, F, Fut>(pool: &PgPool, f: F) -> PersistenceResult<T>
    where
        F: FnOnce(Transaction<'_, Postgres>) -> Fut,
        Fut: Future<Output = PersistenceResult<(Transaction<'_, Postgres>, T)>>,
    {
        let tx = pool
            .begin()
            .await
            .map_err(|err| PersistenceError::Unavailable(err.to_string()))?;
        match f(tx).await {
            Ok((tx, value)) => {
                tx.commit()
                    .await
                    .map_err(|err| PersistenceError::Unavailable(err.to_string()))?;
                Ok(value)
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_database_url_fails_fast() {
        // SAFETY: test runs serially within this crate's own process; no
        // other test in this module reads DATABASE_URL concurrently.
        unsafe {
            std::env::remove_var("DATABASE_URL");
        }
        let result = PgPoolConfig::from_env();
        assert!(result.is_err());
    }

    #[test]
    fn persistence_error_maps_to_expected_codes() {
        assert_eq!(
            PersistenceError::Conflict("dup".into()).code(),
            ErrorCode::Conflict
        );
        assert_eq!(
            PersistenceError::BadRequest("fk".into()).code(),
            ErrorCode::BadRequest
        );
        assert_eq!(
            PersistenceError::Validation("chk".into()).code(),
            ErrorCode::Validation
        );
        assert_eq!(
            PersistenceError::Unavailable("down".into()).code(),
            ErrorCode::Unavailable
        );
    }
}
