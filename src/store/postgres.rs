//! PostgreSQL account store
//!
//! Accounts live in `bank_accounts (id UUID, balance NUMERIC, version BIGINT)`.
//! Saves are a single conditional UPDATE keyed on `(id, version)`; zero rows
//! affected means another writer got there first.
//!
//! The deadline is enforced by the server through `statement_timeout`, so an
//! expired statement is cancelled (`57014`) and never commits. The client-side
//! timer only fires after an extra grace period, for a server that stopped
//! answering; that expiry is ambiguous and the processor reads the row back.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::Row;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use super::{Account, AccountStore, StoreError};
use crate::core_types::AccountId;

/// Extra time the client waits past the server-side statement timeout
const CLIENT_GRACE: Duration = Duration::from_millis(500);

pub struct PostgresAccountStore {
    pool: PgPool,
    /// Server-side statement timeout
    timeout: Duration,
}

/// `statement_timeout` value for a deadline, at least 1ms (0 disables it)
fn statement_timeout(timeout: Duration) -> String {
    format!("{}ms", timeout.as_millis().max(1))
}

impl PostgresAccountStore {
    /// Create a new connection pool whose sessions run under `timeout`
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        let options = PgConnectOptions::from_str(database_url)?
            .options([("statement_timeout", statement_timeout(timeout))]);
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(timeout)
            .connect_with(options)
            .await?;

        tracing::info!(
            max_connections,
            statement_timeout = %statement_timeout(timeout),
            "PostgreSQL connection pool established"
        );
        Ok(Self { pool, timeout })
    }

    /// Wrap an existing pool. Its sessions keep whatever `statement_timeout`
    /// they were opened with.
    pub fn from_pool(pool: PgPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the accounts table if it is missing
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        self.bounded(
            sqlx::query(
                r#"CREATE TABLE IF NOT EXISTS bank_accounts (
                       id UUID PRIMARY KEY,
                       balance NUMERIC NOT NULL,
                       version BIGINT NOT NULL DEFAULT 0
                   )"#,
            )
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    /// Insert an account unless one with the same id already exists.
    ///
    /// Returns `true` when a row was inserted.
    pub async fn insert_account(&self, id: AccountId, balance: Decimal) -> Result<bool, StoreError> {
        let result = self
            .bounded(
                sqlx::query(
                    r#"INSERT INTO bank_accounts (id, balance, version) VALUES ($1, $2, 0)
                       ON CONFLICT (id) DO NOTHING"#,
                )
                .bind(id)
                .bind(balance)
                .execute(&self.pool),
            )
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Run a query, giving up once the server has had its full deadline
    /// plus [`CLIENT_GRACE`]
    async fn bounded<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, sqlx::Error>>,
    {
        let deadline = self.timeout + CLIENT_GRACE;
        match tokio::time::timeout(deadline, fut).await {
            Ok(result) => result.map_err(StoreError::from),
            Err(_) => Err(StoreError::Timeout(format!(
                "no response within {}ms",
                deadline.as_millis()
            ))),
        }
    }
}

#[async_trait]
impl AccountStore for PostgresAccountStore {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn find_account(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        let row = self
            .bounded(
                sqlx::query(r#"SELECT id, balance, version FROM bank_accounts WHERE id = $1"#)
                    .bind(id)
                    .fetch_optional(&self.pool),
            )
            .await?;

        Ok(row.map(|r| Account {
            id: r.get("id"),
            balance: r.get("balance"),
            version: r.get("version"),
        }))
    }

    async fn save_account(&self, account: &Account) -> Result<Account, StoreError> {
        let result = self
            .bounded(
                sqlx::query(
                    r#"UPDATE bank_accounts SET balance = $1, version = version + 1
                       WHERE id = $2 AND version = $3"#,
                )
                .bind(account.balance)
                .bind(account.id)
                .bind(account.version)
                .execute(&self.pool),
            )
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::ConcurrencyConflict(format!(
                "account {} changed since version {}",
                account.id, account.version
            )));
        }

        Ok(Account {
            id: account.id,
            balance: account.balance,
            version: account.version + 1,
        })
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        let message = err.to_string();
        match &err {
            sqlx::Error::PoolTimedOut => StoreError::Timeout(message),
            sqlx::Error::Io(io) if io.kind() == std::io::ErrorKind::TimedOut => {
                StoreError::Timeout(message)
            }
            sqlx::Error::PoolClosed | sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
                StoreError::Unavailable(message)
            }
            sqlx::Error::Protocol(_) | sqlx::Error::WorkerCrashed => {
                StoreError::InvalidOperation(message)
            }
            sqlx::Error::Database(db) => match db.code().as_deref() {
                // serialization_failure, deadlock_detected
                Some("40001") | Some("40P01") => StoreError::ConcurrencyConflict(message),
                // query_canceled (statement_timeout)
                Some("57014") => StoreError::Timeout(message),
                Some(code)
                    if code.starts_with("08") || code.starts_with("53") || code.starts_with("57P") =>
                {
                    StoreError::Unavailable(message)
                }
                _ => StoreError::Other(message),
            },
            _ => StoreError::Other(message),
        }
    }
}
