//! Database session layer.
//!
//! Thin wrapper around one `tokio_postgres` connection. This is the seam
//! between the rebuild engine's orchestration logic and the database driver:
//! every other module executes SQL through [`SqlExecutor`] rather than
//! holding a `tokio_postgres::Client` directly, so the orchestration in
//! [`crate::swap`] can be exercised against a real database in integration
//! tests without the rest of the crate caring how the connection was made.
//!
//! Connection establishment (host/port/TLS/credentials) is intentionally
//! thin and not covered by unit tests here — see `tests/` for the
//! testcontainers-backed integration suite that exercises it end to end.

use async_trait::async_trait;
use tokio_postgres::{Client, NoTls, Row, Transaction};

use crate::config::ConnectionArgs;
use crate::error::RebuildError;

/// Narrow interface the rebuild engine issues SQL through.
///
/// Implemented by [`RebuildSession`] against a live connection, and by
/// `tokio_postgres::Transaction` directly so a single phase's statements can
/// run inside one transaction without the caller branching on which it has.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Execute a statement, returning the affected row count. Used for DDL
    /// and single-statement DML where no result set is needed.
    async fn execute(&self, sql: &str) -> Result<u64, RebuildError>;

    /// Execute a (possibly multi-statement) block with no parameters and no
    /// result set, e.g. a batch of joined `DROP ... IF EXISTS` fragments.
    async fn batch_execute(&self, sql: &str) -> Result<(), RebuildError>;

    /// Execute a query expected to return at most one row.
    async fn query_opt(&self, sql: &str) -> Result<Option<Row>, RebuildError>;
}

#[async_trait]
impl SqlExecutor for Client {
    async fn execute(&self, sql: &str) -> Result<u64, RebuildError> {
        Ok(Client::execute(self, sql, &[]).await?)
    }

    async fn batch_execute(&self, sql: &str) -> Result<(), RebuildError> {
        if sql.trim().is_empty() {
            return Ok(());
        }
        Ok(Client::batch_execute(self, sql).await?)
    }

    async fn query_opt(&self, sql: &str) -> Result<Option<Row>, RebuildError> {
        Ok(Client::query_opt(self, sql, &[]).await?)
    }
}

#[async_trait]
impl SqlExecutor for Transaction<'_> {
    async fn execute(&self, sql: &str) -> Result<u64, RebuildError> {
        Ok(Transaction::execute(self, sql, &[]).await?)
    }

    async fn batch_execute(&self, sql: &str) -> Result<(), RebuildError> {
        if sql.trim().is_empty() {
            return Ok(());
        }
        Ok(Transaction::batch_execute(self, sql).await?)
    }

    async fn query_opt(&self, sql: &str) -> Result<Option<Row>, RebuildError> {
        Ok(Transaction::query_opt(self, sql, &[]).await?)
    }
}

/// Owns the single connection a rebuild run operates over.
pub struct RebuildSession {
    client: Client,
}

impl RebuildSession {
    /// Connect with the per-session settings the original tool applies:
    /// `application_name` identifies the session in `pg_stat_activity` so
    /// `SELECT pg_cancel_backend(...)` style autovacuum cancellation and
    /// operator monitoring can find it; `search_path` is pinned to `public`
    /// so unqualified identifiers in rendered DDL can't resolve against
    /// whatever schemas the connecting role happens to have ahead of it.
    pub async fn connect(conn: &ConnectionArgs) -> Result<Self, RebuildError> {
        let mut config = tokio_postgres::Config::new();
        if let Some(host) = &conn.host {
            config.host(host);
        }
        if let Some(port) = conn.port {
            config.port(port);
        }
        if let Some(user) = &conn.username {
            config.user(user);
        }
        if let Some(password) = &conn.password {
            config.password(password);
        }
        if let Some(dbname) = &conn.dbname {
            config.dbname(dbname);
        }
        config.application_name("pg_rebuild_table");
        config.options("-c search_path=public");

        let (client, connection) = config.connect(NoTls).await?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                tracing::error!(error = %err, "database connection closed with error");
            }
        });

        tracing::info!("database connection open");
        Ok(Self { client })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Run `body` inside one transaction, committing on success and rolling
    /// back (implicitly, via `Transaction`'s drop) on error.
    pub async fn transaction<'a, F, Fut, T>(&'a mut self, body: F) -> Result<T, RebuildError>
    where
        F: FnOnce(Transaction<'a>) -> Fut,
        Fut: std::future::Future<Output = Result<(T, Transaction<'a>), RebuildError>>,
    {
        let txn = self.client.transaction().await?;
        let (value, txn) = body(txn).await?;
        txn.commit().await?;
        Ok(value)
    }
}

#[async_trait]
impl SqlExecutor for RebuildSession {
    async fn execute(&self, sql: &str) -> Result<u64, RebuildError> {
        self.client.execute(sql, &[]).await.map_err(RebuildError::from)
    }

    async fn batch_execute(&self, sql: &str) -> Result<(), RebuildError> {
        if sql.trim().is_empty() {
            return Ok(());
        }
        self.client.batch_execute(sql).await.map_err(RebuildError::from)
    }

    async fn query_opt(&self, sql: &str) -> Result<Option<Row>, RebuildError> {
        self.client.query_opt(sql, &[]).await.map_err(RebuildError::from)
    }
}
