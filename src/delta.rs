//! Change capture via row-level triggers.
//!
//! # Prior Art
//!
//! Row-level AFTER triggers writing into a side table are the same
//! technique `pg_repack` and `pg_squeeze` use to make an online table
//! rewrite safe: a trigger installed on the live table forwards every
//! mutation into an unlogged buffer, the bulk copy runs concurrently
//! against a snapshot, and the buffer is drained into the new table before
//! the final rename. The trigger fires last (name prefix `z_`) so any
//! user-defined triggers on the source see their normal execution order
//! undisturbed by the capture mechanism.
//!
//! Unlike logical-replication-slot CDC, this requires no `wal_level =
//! logical` and captures changes at commit time within the same session,
//! which keeps the whole rebuild self-contained in one connection.

use crate::error::RebuildError;
use crate::metadata::TableInfo;
use crate::session::SqlExecutor;

/// Render the statements that create the delta table, the row-trigger
/// function, and the apply function. All run inside one transaction.
pub fn build_delta_object_statements(table: &TableInfo) -> Vec<String> {
    let source = table.table_full_name();
    let shadow = table.shadow_table_full_name();
    let delta = table.delta_table_full_name();
    let delta_fn = format!("\"{}\".\"{}__delta\"", table.schema_name, table.table_name);
    let apply_fn = format!("\"{}\".\"{}__apply_delta\"", table.schema_name, table.table_name);

    let mut statements = vec![
        format!("create unlogged table {delta}(like {source} excluding all)"),
        format!("alter table {delta} set (autovacuum_enabled = false);"),
        format!(
            "alter table {delta} add column delta_id serial; alter table {delta} add column delta_op \"char\";"
        ),
        format!(
            r#"create or replace function {delta_fn}() returns trigger as $$
begin
  if tg_op = 'INSERT' then
    insert into {delta} values (new.*, default, 'i');
  elsif tg_op = 'UPDATE' then
    insert into {delta} values (new.*, default, 'u');
  elsif tg_op = 'DELETE' then
    insert into {delta} values (old.*, default, 'd');
    return old;
  end if;
  return new;
end;
$$ language plpgsql security definer;"#
        ),
    ];

    statements.push(build_apply_delta_function_sql(table, &apply_fn, &delta, &shadow));
    statements
}

fn build_apply_delta_function_sql(table: &TableInfo, apply_fn: &str, delta: &str, shadow: &str) -> String {
    let pk_columns = &table.pk_columns;
    let columns: String = table.columns.iter().map(|c| c.name.as_str()).collect::<Vec<_>>().join(", ");
    let val_columns: String = table
        .columns
        .iter()
        .map(|c| format!("r.{}", c.name))
        .collect::<Vec<_>>()
        .join(", ");
    let where_pk: String = pk_columns
        .iter()
        .map(|c| format!("t.{c} = r.{c}"))
        .collect::<Vec<_>>()
        .join(" and ");
    let set_columns: String = table
        .columns
        .iter()
        .filter(|c| !pk_columns.contains(&c.name))
        .map(|c| format!("{} = r.{}", c.name, c.name))
        .collect::<Vec<_>>()
        .join(", ");

    let update_branch = if set_columns.is_empty() {
        String::new()
    } else {
        format!(
            "\n        elsif r.delta_op = 'u' then\n          update {shadow} t set {set_columns} where {where_pk};"
        )
    };

    format!(
        r#"create or replace function {apply_fn}() returns integer as $$
declare
  r record;
  rows integer := 0;
begin
  for r in with d as (
             delete from {delta}
             returning *
           )
           select * from d order by delta_id
  loop
    if r.delta_op = 'i' then
      insert into {shadow}({columns}) values ({val_columns}) on conflict do nothing;{update_branch}
    elsif r.delta_op = 'd' then
      delete from {shadow} t where {where_pk};
    end if;
    rows := rows + 1;
  end loop;
  return rows;
end;
$$ language plpgsql security definer;"#
    )
}

/// Install the `z_rebuild_table__delta` capture trigger on the source
/// table, retrying forever on lock contention. Runs `lock_timeout` and
/// autovacuum cancellation inside the same transaction as the `CREATE
/// TRIGGER` so a lock-timeout failure leaves nothing half-applied.
pub async fn install_capture_trigger(
    session: &impl SqlExecutor,
    table: &TableInfo,
    lock_timeout: &str,
    retry_delay: std::time::Duration,
) -> Result<(), RebuildError> {
    let source = table.table_full_name();
    let delta_fn = format!("\"{}\".\"{}__delta\"", table.schema_name, table.table_name);

    loop {
        let statements = format!(
            "set local lock_timeout = '{lock_timeout}';\n{}\ncreate trigger \"z_rebuild_table__delta\" after insert or delete or update on {source} for each row execute procedure {delta_fn}();",
            cancel_autovacuum_sql(&table.table_name)
        );

        match session.batch_execute(&statements).await {
            Ok(()) => {
                tracing::info!(table = %source, "capture trigger installed");
                return Ok(());
            }
            Err(RebuildError::LockNotAvailable(msg)) => {
                tracing::warn!(table = %source, error = %msg, "create trigger failed, retrying");
                tokio::time::sleep(retry_delay).await;
            }
            Err(other) => return Err(other),
        }
    }
}

/// `pg_cancel_backend` every autovacuum worker whose query text mentions
/// this table name, clearing the way for a lock that would otherwise
/// starve behind a long-running autovacuum.
pub fn cancel_autovacuum_sql(table_name: &str) -> String {
    format!(
        "select pg_cancel_backend(pid) from pg_stat_activity where state = 'active' and backend_type = 'autovacuum worker' and query ~ '{table_name}';"
    )
}

/// Invoke `<schema>.<table>__apply_delta()` once, returning the number of
/// delta rows consumed.
pub async fn apply_delta(session: &impl SqlExecutor, table: &TableInfo) -> Result<i64, RebuildError> {
    let apply_fn = format!("\"{}\".\"{}__apply_delta\"", table.schema_name, table.table_name);
    let row = session
        .query_opt(&format!("select {apply_fn}() as rows;"))
        .await?
        .ok_or_else(|| RebuildError::Internal("apply_delta returned no row".to_string()))?;
    Ok(row.get::<_, i32>("rows") as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{Column, PartitionRelation};

    fn table_with_pk_and_other_column() -> TableInfo {
        TableInfo {
            schema_name: "public".to_string(),
            table_name: "orders".to_string(),
            columns: vec![
                Column {
                    name: "id".to_string(),
                    sql_type: "bigint".to_string(),
                    collate: None,
                    not_null: true,
                    default: None,
                    comment: None,
                    statistics: None,
                    acl: vec![],
                },
                Column {
                    name: "status".to_string(),
                    sql_type: "text".to_string(),
                    collate: None,
                    not_null: false,
                    default: None,
                    comment: None,
                    statistics: None,
                    acl: vec![],
                },
            ],
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
    fn apply_delta_function_includes_update_branch_when_non_pk_columns_exist() {
        let table = table_with_pk_and_other_column();
        let stmts = build_delta_object_statements(&table);
        let apply_fn_sql = stmts.last().unwrap();
        assert!(apply_fn_sql.contains("update \"public\".\"orders__new\" t set status = r.status"));
    }

    #[test]
    fn apply_delta_function_omits_update_branch_when_table_is_pk_only() {
        let mut table = table_with_pk_and_other_column();
        table.columns.truncate(1);
        let stmts = build_delta_object_statements(&table);
        let apply_fn_sql = stmts.last().unwrap();
        assert!(!apply_fn_sql.contains("elsif r.delta_op = 'u'"));
    }

    #[test]
    fn delta_table_statement_excludes_all_source_attributes() {
        let table = table_with_pk_and_other_column();
        let stmts = build_delta_object_statements(&table);
        assert_eq!(
            stmts[0],
            "create unlogged table \"public\".\"orders__delta\"(like \"public\".\"orders\" excluding all)"
        );
    }

    #[test]
    fn cancel_autovacuum_filters_on_table_name() {
        let sql = cancel_autovacuum_sql("orders");
        assert!(sql.contains("query ~ 'orders'"));
        assert!(sql.contains("backend_type = 'autovacuum worker'"));
    }
}
