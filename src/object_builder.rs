//! Shadow table construction.
//!
//! Builds the physical structure of `"<schema>"."<table>__new"` — columns,
//! comments, statistics targets, storage parameters, grants, replica
//! identity, and check constraints. Everything else that depends on the
//! source table's *name* (indexes, foreign keys, triggers, views,
//! publications) is deliberately left for the swap coordinator, since those
//! objects only make sense once the shadow has taken the source's identity.

use crate::grants::{render_column_grants, ObjectKind};
use crate::metadata::TableInfo;

/// Render the full sequence of DDL statements that create the shadow table,
/// in the order the original tool issues them: the table, comments,
/// statistics, storage params, autovacuum disable, grants, replica
/// identity, table comment, then check constraints. All run inside one
/// transaction by the caller.
pub fn build_shadow_table_statements(table: &TableInfo) -> Vec<String> {
    let shadow = table.shadow_table_full_name();
    let mut statements = Vec::new();

    let columns: Vec<String> = table.columns.iter().map(|c| c.definition_sql()).collect();
    statements.push(format!("create table {shadow}({})", columns.join(", ")));

    for c in &table.columns {
        if let Some(comment) = &c.comment {
            statements.push(format!("comment on column {shadow}.{} is {comment};", c.name));
        }
    }

    for c in &table.columns {
        if let Some(stats) = c.statistics {
            statements.push(format!(
                "alter table only {shadow} alter {} set statistics {stats};",
                c.name
            ));
        }
    }

    for stmt in &table.storage_parameters {
        statements.push(stmt.clone());
    }

    statements.push(format!("alter table {shadow} set (autovacuum_enabled = false);"));

    for stmt in &table.grant_privileges {
        statements.push(stmt.clone());
    }

    statements.push(format!(
        "alter table {shadow} replica identity {};",
        table.replica_identity
    ));

    if let Some(comment) = &table.comment {
        statements.push(comment.clone());
    }

    for stmt in &table.create_check_constraints {
        statements.push(stmt.clone());
    }

    statements
}

/// Render the per-column grant statements for columns carrying an ACL,
/// addressed against `table_full_name` (the live name at the time these are
/// executed — called post-rename during the swap, not here).
pub fn build_column_grant_statements(table: &TableInfo, table_full_name: &str) -> String {
    render_column_grants(&table.column_acls(), table_full_name)
}

pub fn object_kind_for(table: &TableInfo) -> ObjectKind {
    let _ = table;
    ObjectKind::Table
}
