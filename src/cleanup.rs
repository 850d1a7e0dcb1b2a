//! Teardown of rebuild-owned objects.
//!
//! Two call sites, same statements, different trigger location: a full
//! `--clean` run drops the trigger from the live source table, while the
//! mid-swap cleanup (after the source has already been renamed aside or
//! dropped) drops it from the backup table in the service schema instead.
//! Every statement is `IF EXISTS`, so this is safe to run against whatever
//! a previous aborted run left behind.

use crate::config::SERVICE_SCHEMA;
use crate::error::RebuildError;
use crate::metadata::TableInfo;
use crate::session::SqlExecutor;

/// Drop the shadow table, delta table, delta/apply functions, and the
/// capture trigger — from the live source when `full` is true, or from the
/// renamed backup table (mid-swap) otherwise.
pub async fn cleanup(session: &impl SqlExecutor, table: &TableInfo, lock_timeout: &str, full: bool) -> Result<(), RebuildError> {
    let shadow = table.shadow_table_full_name();
    let delta = table.delta_table_full_name();
    let delta_fn = format!("\"{}\".\"{}__delta\"", table.schema_name, table.table_name);
    let apply_fn = format!("\"{}\".\"{}__apply_delta\"", table.schema_name, table.table_name);

    let trigger_drop = if full {
        format!(
            "drop trigger if exists z_rebuild_table__delta on {};",
            table.table_full_name()
        )
    } else {
        format!(
            "drop trigger if exists z_rebuild_table__delta on \"{SERVICE_SCHEMA}\".\"{}\";",
            table.backup_table_name()
        )
    };

    let mut statements = vec![format!("set local lock_timeout = '{lock_timeout}';"), trigger_drop];
    if full {
        statements.push(format!("drop table if exists {shadow};"));
    }
    statements.push(format!("drop function if exists {apply_fn};"));
    statements.push(format!("drop function if exists {delta_fn};"));
    statements.push(format!("drop table if exists {delta};"));

    session.batch_execute(&statements.join("\n")).await
}
