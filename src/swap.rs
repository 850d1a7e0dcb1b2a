//! The cut-over: draining the delta to quiescence, then renaming the shadow
//! into place under a brief exclusive lock.
//!
//! This is the one phase where correctness is pinned to statement order —
//! see the doc comment on [`switch_table`] for why each step is where it is.

use crate::cleanup;
use crate::config::RebuildConfig;
use crate::delta;
use crate::error::RebuildError;
use crate::grants::{render_column_grants, render_grants_batch};
use crate::metadata::{PartitionRelation, TableInfo};
use crate::session::{RebuildSession, SqlExecutor};

/// Drain the delta repeatedly, outside any lock, until the row count drops
/// to or below `min_delta_rows`. Bounds how much work the exclusive-lock
/// transaction has left to do.
pub async fn pre_quiesce(session: &impl SqlExecutor, table: &TableInfo, min_delta_rows: i64) -> Result<(), RebuildError> {
    loop {
        let rows = delta::apply_delta(session, table).await?;
        if rows <= min_delta_rows {
            return Ok(());
        }
    }
}

/// Add a temporary check constraint mirroring the partition bound, so the
/// shadow can be `ATTACH PARTITION`ed later without a full validation scan
/// (PostgreSQL skips the scan when it can prove the constraint already
/// implies the partition bound).
fn declarative_partition_guard_statements(table: &TableInfo) -> Vec<String> {
    match &table.partition {
        PartitionRelation::Declarative { constraint_def, .. } => vec![format!(
            "alter table {} add constraint rebuild_table__partition_constraintdef check {constraint_def};",
            table.shadow_table_full_name()
        )],
        _ => vec![],
    }
}

fn inheritance_detach_statement(table: &TableInfo) -> Option<String> {
    match &table.partition {
        PartitionRelation::Declarative { parent, .. } => Some(format!(
            "alter table {parent} detach partition {};",
            table.table_full_name()
        )),
        PartitionRelation::Legacy { parent } => Some(format!(
            "alter table {} no inherit {parent};",
            table.table_full_name()
        )),
        PartitionRelation::None => None,
    }
}

fn inheritance_reattach_statements(table: &TableInfo) -> Vec<String> {
    match &table.partition {
        PartitionRelation::Declarative { parent, partition_expr, .. } => vec![
            format!("alter table {parent} attach partition {} {partition_expr};", table.table_full_name()),
            format!(
                "alter table {} drop constraint rebuild_table__partition_constraintdef;",
                table.table_full_name()
            ),
        ],
        PartitionRelation::Legacy { parent } => vec![format!(
            "alter table {} inherit {parent};",
            table.table_full_name()
        )],
        PartitionRelation::None => vec![],
    }
}

fn backup_or_drop_statements(config: &RebuildConfig, table: &TableInfo) -> Vec<String> {
    if config.make_backup {
        vec![
            format!(
                "alter table {} rename to \"{}\";",
                table.table_full_name(),
                table.backup_table_name()
            ),
            format!(
                "alter table \"{}\".\"{}\" set schema {};",
                table.schema_name,
                table.backup_table_name(),
                crate::config::SERVICE_SCHEMA
            ),
        ]
    } else {
        vec![format!("drop table {};", table.table_full_name())]
    }
}

/// Everything executed once inside the exclusive-lock transaction, after the
/// lock is held and the final `apply_delta()` has run. Split out from
/// [`switch_table`] so the retry loop doesn't duplicate this long sequence.
///
/// Order matters: dependent objects are dropped before the rename so their
/// dependency on the old OID doesn't block it; partition reattachment
/// happens after rename because the parent must see the final identifier;
/// grants, views, and functions are rebuilt after rename for the same
/// reason; publications and autovacuum re-enable are last because they act
/// on the now-complete, now-visible table.
async fn run_swap_body(txn: &tokio_postgres::Transaction<'_>, config: &RebuildConfig, table: &TableInfo) -> Result<(), RebuildError> {
    txn.batch_execute(&table.drop_functions.join("\n")).await?;
    txn.batch_execute(&table.drop_views.join("\n")).await?;
    txn.batch_execute(&table.drop_constraints.join("\n")).await?;
    txn.batch_execute(&table.alter_sequences.join("\n")).await?;

    if let Some(detach) = inheritance_detach_statement(table) {
        txn.batch_execute(&detach).await?;
    }

    txn.batch_execute(&backup_or_drop_statements(config, table).join("\n")).await?;

    cleanup::cleanup(txn, table, &config.lock_timeout, false).await?;

    txn.batch_execute(&format!(
        "alter table {} rename to \"{}\";",
        table.shadow_table_full_name(),
        table.table_name
    ))
    .await?;

    let reattach = inheritance_reattach_statements(table);
    if !reattach.is_empty() {
        txn.batch_execute(&reattach.join("\n")).await?;
    }

    txn.batch_execute(&table.rename_indexes.join("\n")).await?;
    txn.batch_execute(&table.create_constraints.join("\n")).await?;
    txn.batch_execute(&table.create_rules.join("\n")).await?;
    txn.batch_execute(&table.create_triggers.join("\n")).await?;
    txn.batch_execute(&table.create_views.join("\n")).await?;
    txn.batch_execute(&table.comment_views.join("\n")).await?;

    let column_grants = render_column_grants(&table.column_acls(), &table.table_full_name());
    txn.batch_execute(&column_grants).await?;

    let view_grants = render_grants_batch(&table.view_acl_to_grants_params);
    txn.batch_execute(&view_grants).await?;

    txn.batch_execute(&table.create_functions.join("\n")).await?;

    let function_grants = render_grants_batch(&table.function_acl_to_grants_params);
    txn.batch_execute(&function_grants).await?;

    txn.batch_execute(&table.add_publication_names.join("\n")).await?;

    txn.batch_execute(&format!(
        "alter table {} reset (autovacuum_enabled);",
        table.table_full_name()
    ))
    .await?;

    Ok(())
}

/// The full cut-over: pre-quiesce, optionally guard the partition bound,
/// then retry the exclusive-lock swap transaction until it commits.
pub async fn switch_table(
    session: &mut RebuildSession,
    config: &RebuildConfig,
    table: &TableInfo,
    retry_delay: std::time::Duration,
) -> Result<(), RebuildError> {
    pre_quiesce(session, table, crate::config::MIN_DELTA_ROWS).await?;

    let guard_statements = declarative_partition_guard_statements(table);
    if !guard_statements.is_empty() {
        session.batch_execute(&guard_statements.join("\n")).await?;
    }

    loop {
        let lock_timeout = config.lock_timeout.clone();
        let table_for_txn = table.clone();
        let config = config.clone();
        let result = session
            .transaction(move |txn| {
                let lock_timeout = lock_timeout.clone();
                let table = table_for_txn.clone();
                let config = config.clone();
                async move {
                    txn.batch_execute(&format!("set local lock_timeout = '{lock_timeout}';")).await?;
                    delta::apply_delta(&txn, &table).await?;
                    txn.batch_execute(&delta::cancel_autovacuum_sql(&table.table_name)).await?;
                    tracing::info!(table = %table.table_full_name(), "acquiring exclusive lock");
                    txn.batch_execute(&format!(
                        "lock table {} in access exclusive mode;",
                        table.table_full_name()
                    ))
                    .await?;
                    delta::apply_delta(&txn, &table).await?;
                    run_swap_body(&txn, &config, &table).await?;
                    Ok(((), txn))
                }
            })
            .await;

        match result {
            Ok(()) => {
                tracing::info!("switch table done");
                return Ok(());
            }
            Err(RebuildError::LockNotAvailable(msg)) => {
                tracing::warn!(error = %msg, "lock table failed, retrying");
                tokio::time::sleep(retry_delay).await;
                delta::apply_delta(session, table).await?;
            }
            Err(other) => {
                tracing::error!(error = %other, "switch table failed");
                return Err(other);
            }
        }
    }
}

/// Run `VALIDATE CONSTRAINT` for every pending validation, logging and
/// continuing past failures rather than aborting the whole run — a
/// constraint that can't validate yet (e.g. data added concurrently that
/// violates it) shouldn't block the table from otherwise being usable.
pub async fn validate_constraints(session: &impl SqlExecutor, table: &TableInfo) -> Result<(), RebuildError> {
    for stmt in &table.validate_constraints {
        match session.batch_execute(stmt).await {
            Ok(()) => {}
            Err(err) => {
                tracing::warn!(statement = %stmt, error = %err, "constraint validation failed");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::Column;

    fn base_table() -> TableInfo {
        TableInfo {
            schema_name: "public".to_string(),
            table_name: "orders".to_string(),
            columns: vec![Column {
                name: "id".to_string(),
                sql_type: "bigint".to_string(),
                collate: None,
                not_null: true,
                default: None,
                comment: None,
                statistics: None,
                acl: vec![],
            }],
            ordered_columns: vec![],
            pk_columns: vec!["id".to_string()],
            storage_parameters: vec![],
            replica_identity: "default".to_string(),
            comment: None,
            create_check_constraints: vec![],
            grant_privileges: vec![],
            create_indexes: vec![],
            rename_indexes: vec![],
            create_constraints: vec![],
            validate_constraints: vec![],
            drop_constraints: vec![],
            create_triggers: vec![],
            create_rules: vec![],
            create_views: vec![],
            comment_views: vec![],
            drop_views: vec![],
            create_functions: vec![],
            drop_functions: vec![],
            alter_sequences: vec![],
            add_publication_names: vec![],
            view_acl_to_grants_params: vec![],
            function_acl_to_grants_params: vec![],
            partition: PartitionRelation::None,
            is_child_exists: false,
        }
    }

    #[test]
    fn no_partition_guard_for_non_partitioned_table() {
        assert!(declarative_partition_guard_statements(&base_table()).is_empty());
    }

    #[test]
    fn declarative_partition_guard_adds_check_constraint() {
        let mut t = base_table();
        t.partition = PartitionRelation::Declarative {
            parent: "\"public\".\"orders_parent\"".to_string(),
            partition_expr: "for values from ('2024-01-01') to ('2024-02-01')".to_string(),
            constraint_def: "(created_at >= '2024-01-01' and created_at < '2024-02-01')".to_string(),
        };
        let stmts = declarative_partition_guard_statements(&t);
        assert_eq!(stmts.len(), 1);
        assert!(stmts[0].contains("rebuild_table__partition_constraintdef"));
    }

    #[test]
    fn legacy_inheritance_detach_uses_no_inherit() {
        let mut t = base_table();
        t.partition = PartitionRelation::Legacy {
            parent: "\"public\".\"orders_parent\"".to_string(),
        };
        let stmt = inheritance_detach_statement(&t).unwrap();
        assert!(stmt.contains("no inherit"));
    }

    #[test]
    fn declarative_detach_uses_detach_partition() {
        let mut t = base_table();
        t.partition = PartitionRelation::Declarative {
            parent: "\"public\".\"orders_parent\"".to_string(),
            partition_expr: "for values from ('2024-01-01') to ('2024-02-01')".to_string(),
            constraint_def: "true".to_string(),
        };
        let stmt = inheritance_detach_statement(&t).unwrap();
        assert!(stmt.contains("detach partition"));
    }

    #[test]
    fn backup_mode_renames_into_service_schema() {
        let mut cfg_like = base_table();
        let _ = &mut cfg_like;
        let t = base_table();
        let stmts = backup_or_drop_statements(
            &RebuildConfig {
                schema_name: "public".into(),
                table_name: "orders".into(),
                additional_condition: None,
                make_backup: true,
                clean: false,
                only_switch: false,
                only_validate_constraints: false,
                chunk_limit: None,
                statement_timeout_ms: 900_000,
                lock_timeout: "1s".into(),
                reorder_columns: false,
                set_column_order: None,
                set_data_type: None,
            },
            &t,
        );
        assert_eq!(stmts.len(), 2);
        assert!(stmts[1].contains("set schema rebuild_table"));
    }

    #[test]
    fn non_backup_mode_drops_table() {
        let t = base_table();
        let stmts = backup_or_drop_statements(
            &RebuildConfig {
                schema_name: "public".into(),
                table_name: "orders".into(),
                additional_condition: None,
                make_backup: false,
                clean: false,
                only_switch: false,
                only_validate_constraints: false,
                chunk_limit: None,
                statement_timeout_ms: 900_000,
                lock_timeout: "1s".into(),
                reorder_columns: false,
                set_column_order: None,
                set_data_type: None,
            },
            &t,
        );
        assert_eq!(stmts, vec!["drop table \"public\".\"orders\";".to_string()]);
    }
}
