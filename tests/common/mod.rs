//! Shared test helpers for integration tests using Testcontainers.

use pg_rebuild_table::config::ConnectionArgs;
use pg_rebuild_table::session::{RebuildSession, SqlExecutor};
use testcontainers::{ContainerAsync, ImageExt, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;

/// A test database backed by a Testcontainers PostgreSQL instance.
///
/// The container is automatically cleaned up when `TestDb` is dropped.
pub struct TestDb {
    pub session: RebuildSession,
    pub connection: ConnectionArgs,
    _container: ContainerAsync<Postgres>,
}

#[allow(dead_code)]
impl TestDb {
    /// Start a fresh PostgreSQL container and connect to it.
    pub async fn new() -> Self {
        let container = Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .expect("failed to start postgres container");

        let port = container.get_host_port_ipv4(5432).await.expect("failed to get mapped port");

        let connection = ConnectionArgs {
            host: Some("127.0.0.1".to_string()),
            port: Some(port),
            username: Some("postgres".to_string()),
            password: Some("postgres".to_string()),
            dbname: Some("postgres".to_string()),
        };

        let session = RebuildSession::connect(&connection)
            .await
            .expect("failed to connect to test database");

        TestDb {
            session,
            connection,
            _container: container,
        }
    }

    /// Open a second connection against the same container, e.g. to simulate
    /// a concurrent writer mutating rows while a rebuild is in flight.
    pub async fn second_session(&self) -> RebuildSession {
        RebuildSession::connect(&self.connection).await.expect("failed to open second session")
    }

    pub async fn execute(&self, sql: &str) {
        self.session
            .execute(sql)
            .await
            .unwrap_or_else(|e| panic!("SQL execution failed: {e}\nSQL: {sql}"));
    }

    pub async fn batch_execute(&self, sql: &str) {
        self.session
            .batch_execute(sql)
            .await
            .unwrap_or_else(|e| panic!("SQL batch execution failed: {e}\nSQL: {sql}"));
    }

    pub async fn count(&self, table: &str) -> i64 {
        let row = self
            .session
            .query_opt(&format!("select count(*) as n from {table}"))
            .await
            .expect("count query failed")
            .expect("count query returned no row");
        row.get("n")
    }
}
