//! Command-line configuration for a single rebuild run.
//!
//! Every flag below controls behavior documented in the component design;
//! defaults match the values the tool has shipped with historically so an
//! operator's existing invocations keep working unchanged.

use clap::{Args, Parser};

/// Online, non-blocking rebuild of a single PostgreSQL table.
#[derive(Debug, Parser)]
#[command(name = "pg_rebuild_table", version, about)]
pub struct RebuildArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Fully-qualified table name, e.g. `public.orders` or just `orders`
    /// (schema defaults to `public`).
    #[arg(short = 'T', long = "table-full-name", env = "PG_REBUILD_TABLE")]
    pub table_full_name: Option<String>,

    /// Boolean expression appended to the copy query's WHERE clause, e.g.
    /// to rebuild only rows matching a retention window.
    #[arg(short = 'a', long = "additional-condition")]
    pub additional_condition: Option<String>,

    /// Row count per copy chunk. When unset, the table is copied in a
    /// single `INSERT ... SELECT` with no chunk boundary.
    #[arg(short = 'c', long = "chunk-limit")]
    pub chunk_limit: Option<i64>,

    /// `statement_timeout` (milliseconds) applied via `SET LOCAL` to every
    /// copy chunk and DDL statement.
    #[arg(short = 's', long = "statement-timeout", default_value_t = 900_000)]
    pub statement_timeout_ms: i64,

    /// `lock_timeout` applied via `SET LOCAL` to the trigger-install and
    /// swap transactions (PostgreSQL interval syntax, e.g. `1s`, `30s`).
    #[arg(short = 'l', long = "lock-timeout", default_value = "1s")]
    pub lock_timeout: String,

    /// Rename the source table into the service schema instead of dropping
    /// it once the swap completes.
    #[arg(long)]
    pub make_backup: bool,

    /// Drop the shadow table, delta table, and capture functions/trigger,
    /// then exit without rebuilding.
    #[arg(long)]
    pub clean: bool,

    /// Skip straight to the swap phase, assuming the shadow and delta were
    /// already populated by a prior run.
    #[arg(long)]
    pub only_switch: bool,

    /// Run only the post-swap constraint validation phase.
    #[arg(long)]
    pub only_validate_constraints: bool,

    /// Reorder columns by descending storage alignment before building the
    /// shadow table, to reduce per-row padding.
    #[arg(long)]
    pub reorder_columns: bool,

    /// Explicit column order for the shadow table, comma-separated. Must
    /// name exactly the columns the source table has.
    #[arg(long, value_delimiter = ',')]
    pub set_column_order: Option<Vec<String>>,

    /// Column type overrides as JSON, e.g. `[{"name":"id","type":"bigint"}]`.
    #[arg(long, value_parser = parse_type_overrides)]
    pub set_data_type: Option<Vec<ColumnTypeOverride>>,

    /// Log verbosity; also respected via `RUST_LOG` if set.
    #[arg(long, default_value = "info")]
    pub logging_level: String,
}

#[derive(Debug, Args)]
pub struct ConnectionArgs {
    /// Database host.
    #[arg(short = 'H', long, env = "PGHOST")]
    pub host: Option<String>,

    /// Database port.
    #[arg(short = 'p', long, env = "PGPORT")]
    pub port: Option<u16>,

    /// Database role used to connect.
    #[arg(short = 'U', long, env = "PGUSER")]
    pub username: Option<String>,

    /// Password for `username`. Prefer `PGPASSWORD` or a `.pgpass` file
    /// over passing this on the command line.
    #[arg(short = 'W', long, env = "PGPASSWORD")]
    pub password: Option<String>,

    /// Database name.
    #[arg(short = 'd', long, env = "PGDATABASE")]
    pub dbname: Option<String>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ColumnTypeOverride {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: String,
}

fn parse_type_overrides(raw: &str) -> Result<Vec<ColumnTypeOverride>, String> {
    serde_json::from_str(raw).map_err(|e| format!("invalid --set-data-type JSON: {e}"))
}

/// Effective settings the rebuild engine reads from, distinct from the raw
/// CLI surface so unit tests can construct one without going through
/// `clap::Parser::parse`.
#[derive(Debug, Clone)]
pub struct RebuildConfig {
    pub schema_name: String,
    pub table_name: String,
    pub additional_condition: Option<String>,
    pub make_backup: bool,
    pub clean: bool,
    pub only_switch: bool,
    pub only_validate_constraints: bool,
    pub chunk_limit: Option<i64>,
    pub statement_timeout_ms: i64,
    pub lock_timeout: String,
    pub reorder_columns: bool,
    pub set_column_order: Option<Vec<String>>,
    pub set_data_type: Option<Vec<ColumnTypeOverride>>,
}

/// Name of the schema holding the progress log and backup tables.
pub const SERVICE_SCHEMA: &str = "rebuild_table";

/// Delta row count at or below which the swap coordinator proceeds to take
/// the exclusive lock rather than draining another pre-quiesce round.
pub const MIN_DELTA_ROWS: i64 = 10_000;

/// `work_mem` applied via `SET LOCAL` during bulk copy and delta apply.
pub const WORK_MEM: &str = "1GB";

/// Fixed delay between lock-acquisition retries (trigger install, swap).
pub const LOCK_RETRY_DELAY_SECS: u64 = 20;

impl RebuildConfig {
    pub fn from_args(args: &RebuildArgs) -> Result<Self, crate::error::RebuildError> {
        let table_full_name = args
            .table_full_name
            .as_ref()
            .ok_or_else(|| crate::error::RebuildError::ConfigInvalid("--table-full-name is required".into()))?;

        let (schema_name, table_name) = match table_full_name.split_once('.') {
            Some((schema, table)) => (schema.to_string(), table.to_string()),
            None => ("public".to_string(), table_full_name.clone()),
        };

        Ok(Self {
            schema_name,
            table_name,
            additional_condition: args.additional_condition.clone(),
            make_backup: args.make_backup,
            clean: args.clean,
            only_switch: args.only_switch,
            only_validate_constraints: args.only_validate_constraints,
            chunk_limit: args.chunk_limit,
            statement_timeout_ms: args.statement_timeout_ms,
            lock_timeout: args.lock_timeout.clone(),
            reorder_columns: args.reorder_columns,
            set_column_order: args.set_column_order.clone(),
            set_data_type: args.set_data_type.clone(),
        })
    }

    pub fn table_full_name(&self) -> String {
        format!("\"{}\".\"{}\"", self.schema_name, self.table_name)
    }

    pub fn shadow_table_full_name(&self) -> String {
        format!("\"{}\".\"{}__new\"", self.schema_name, self.table_name)
    }

    pub fn delta_table_full_name(&self) -> String {
        format!("\"{}\".\"{}__delta\"", self.schema_name, self.table_name)
    }

    /// Whether this run is restricted to a subset of phases (`--only-switch`
    /// and/or `--only-validate-constraints`), skipping table creation.
    pub fn has_only_steps(&self) -> bool {
        self.only_switch || self.only_validate_constraints
    }
}
