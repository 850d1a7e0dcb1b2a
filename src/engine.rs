//! Top-level orchestration for one rebuild run.
//!
//! Mirrors the phase sequence of the component design: fetch metadata,
//! check preconditions, optionally handle `--clean` and early-return, apply
//! column transforms, bootstrap the service schema and progress row, then
//! run the full build (or just the phases `--only-switch` /
//! `--only-validate-constraints` select).

use crate::config::RebuildConfig;
use crate::error::RebuildError;
use crate::metadata::TableInfo;
use crate::session::{RebuildSession, SqlExecutor};
use crate::{cleanup, copier, delta, introspect, object_builder, progress, swap};
use std::time::Duration;

fn retry_delay() -> Duration {
    Duration::from_secs(crate::config::LOCK_RETRY_DELAY_SECS)
}

/// Run a rebuild to completion per `config`. Returns normally once every
/// selected phase has finished; precondition failures and `--clean` both
/// return `Ok(())` without doing further work, matching the original tool's
/// "log and return" behavior rather than treating them as hard errors.
pub async fn run(session: &mut RebuildSession, config: &RebuildConfig) -> Result<(), RebuildError> {
    tracing::info!(schema = %config.schema_name, table = %config.table_name, "fetching table metadata");
    let Some(mut table) = introspect::fetch_table_info(session, &config.schema_name, &config.table_name).await? else {
        tracing::warn!("metadata for table is not defined");
        return Ok(());
    };

    if table.is_child_exists {
        tracing::warn!("table is a partition parent, refusing to rebuild");
        return Ok(());
    }

    if table.pk_columns.is_empty() {
        tracing::error!("table does not have a primary key");
        return Ok(());
    }

    if config.clean {
        cleanup::cleanup(session, &table, &config.lock_timeout, true).await?;
        return Ok(());
    }

    if config.reorder_columns {
        table.apply_reorder_columns();
    }

    if let Some(order) = &config.set_column_order {
        table.apply_set_column_order(order)?;
    }

    if let Some(overrides) = &config.set_data_type {
        table.apply_set_data_type(overrides);
    }

    progress::ensure_service_schema(session).await?;

    if !config.has_only_steps() {
        run_full_build(session, config, &table).await?;
    }

    if config.only_switch || !config.has_only_steps() {
        swap::switch_table(session, config, &table, retry_delay()).await?;
        progress::record_after_sizes(session, &table.schema_name, &table.table_name, &table.table_full_name()).await?;
    }

    if config.only_validate_constraints || !config.has_only_steps() {
        swap::validate_constraints(session, &table).await?;
    }

    progress::record_stop(session, &table.schema_name, &table.table_name).await?;

    Ok(())
}

/// The "build the shadow from scratch" phases: create the shadow table,
/// install the delta-capture machinery, bulk-copy existing rows, then
/// create indexes and analyze. Skipped entirely on `--only-switch` /
/// `--only-validate-constraints` runs, which assume this already happened.
async fn run_full_build(session: &mut RebuildSession, config: &RebuildConfig, table: &TableInfo) -> Result<(), RebuildError> {
    progress::record_start(session, &table.schema_name, &table.table_name, &table.table_full_name()).await?;

    let shadow_statements = object_builder::build_shadow_table_statements(table);
    session.batch_execute(&shadow_statements.join("\n")).await?;
    tracing::info!(shadow = %table.shadow_table_full_name(), "shadow table created");

    let delta_statements = delta::build_delta_object_statements(table);
    session.batch_execute(&delta_statements.join("\n")).await?;
    tracing::info!(delta = %table.delta_table_full_name(), "delta objects created");

    delta::install_capture_trigger(session, table, &config.lock_timeout, retry_delay()).await?;

    copier::copy_data(session, config, table).await?;
    tracing::info!("bulk copy complete");

    create_indexes(session, table.create_indexes.clone()).await?;

    session.execute(&format!("analyze {};", table.shadow_table_full_name())).await?;
    tracing::info!("shadow table analyzed");

    Ok(())
}

/// Pop the index-creation stack one statement at a time so a retried run
/// resumes instead of re-creating indexes the prior attempt already built.
async fn create_indexes(session: &mut RebuildSession, mut pending: Vec<String>) -> Result<(), RebuildError> {
    while let Some(index_def) = pending.pop() {
        tracing::info!(index = %index_def, "creating index");
        session.execute(&index_def).await?;
    }
    Ok(())
}
