//! Metadata introspection.
//!
//! Runs the out-of-scope `table_info_query.sql` collaborator and
//! deserializes its single JSONB result into [`TableInfo`]. The query text
//! itself is loaded verbatim via `include_str!` and treated as opaque; this
//! module's only job is the JSON-to-struct mapping at the boundary.

use serde::Deserialize;

use crate::error::RebuildError;
use crate::metadata::{Column, PartitionRelation, TableInfo};
use crate::session::SqlExecutor;

const TABLE_INFO_QUERY: &str = include_str!("../resources/table_info_query.sql");

#[derive(Debug, Deserialize)]
struct ColumnRaw {
    name: String,
    #[serde(rename = "type")]
    type_: String,
    collate: Option<String>,
    not_null: bool,
    default: Option<String>,
    comment: Option<String>,
    statistics: Option<i32>,
    #[serde(default)]
    acl: Vec<String>,
}

impl From<ColumnRaw> for Column {
    fn from(raw: ColumnRaw) -> Self {
        Column {
            name: raw.name,
            sql_type: raw.type_,
            collate: raw.collate,
            not_null: raw.not_null,
            default: raw.default,
            comment: raw.comment,
            statistics: raw.statistics,
            acl: raw.acl,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PartitionRaw {
    parent: String,
    partition_expr: Option<String>,
    constraint_def: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AclGrantParamsRaw {
    acl: Vec<String>,
    obj_type: String,
    obj_name: String,
}

#[derive(Debug, Deserialize)]
struct TableInfoRaw {
    schema_name: String,
    table_name: String,
    columns: Vec<ColumnRaw>,
    ordered_columns: Vec<ColumnRaw>,
    #[serde(default)]
    pk_columns: Vec<String>,
    #[serde(default)]
    storage_parameters: Vec<String>,
    replica_identity: String,
    comment: Option<String>,
    #[serde(default)]
    create_check_constraints: Vec<String>,
    #[serde(default)]
    grant_privileges: Vec<String>,
    #[serde(default)]
    create_indexes: Vec<String>,
    #[serde(default)]
    rename_indexes: Vec<String>,
    #[serde(default)]
    create_constraints: Vec<String>,
    #[serde(default)]
    validate_constraints: Vec<String>,
    #[serde(default)]
    drop_constraints: Vec<String>,
    #[serde(default)]
    create_triggers: Vec<String>,
    #[serde(default)]
    create_rules: Vec<String>,
    #[serde(default)]
    create_views: Vec<String>,
    #[serde(default)]
    comment_views: Vec<String>,
    #[serde(default)]
    drop_views: Vec<String>,
    #[serde(default)]
    create_functions: Vec<String>,
    #[serde(default)]
    drop_functions: Vec<String>,
    #[serde(default)]
    alter_sequences: Vec<String>,
    #[serde(default)]
    add_publication_names: Vec<String>,
    #[serde(default)]
    view_acl_to_grants_params: Vec<AclGrantParamsRaw>,
    #[serde(default)]
    function_acl_to_grants_params: Vec<AclGrantParamsRaw>,
    partition: Option<PartitionRaw>,
    is_child_exists: bool,
}

fn object_kind_from_str(s: &str) -> crate::grants::ObjectKind {
    use crate::grants::ObjectKind::*;
    match s {
        "view" | "table" => Table,
        "function" => Function,
        "procedure" => Procedure,
        "sequence" => Sequence,
        _ => Table,
    }
}

impl From<TableInfoRaw> for TableInfo {
    fn from(raw: TableInfoRaw) -> Self {
        let partition = match raw.partition {
            None => PartitionRelation::None,
            Some(p) => match (p.partition_expr, p.constraint_def) {
                (Some(expr), Some(def)) => PartitionRelation::Declarative {
                    parent: p.parent,
                    partition_expr: expr,
                    constraint_def: def,
                },
                _ => PartitionRelation::Legacy { parent: p.parent },
            },
        };

        TableInfo {
            schema_name: raw.schema_name,
            table_name: raw.table_name,
            columns: raw.columns.into_iter().map(Column::from).collect(),
            ordered_columns: raw.ordered_columns.into_iter().map(Column::from).collect(),
            pk_columns: raw.pk_columns,
            storage_parameters: raw.storage_parameters,
            replica_identity: raw.replica_identity,
            comment: raw.comment,
            create_check_constraints: raw.create_check_constraints,
            grant_privileges: raw.grant_privileges,
            create_indexes: raw.create_indexes,
            rename_indexes: raw.rename_indexes,
            create_constraints: raw.create_constraints,
            validate_constraints: raw.validate_constraints,
            drop_constraints: raw.drop_constraints,
            create_triggers: raw.create_triggers,
            create_rules: raw.create_rules,
            create_views: raw.create_views,
            comment_views: raw.comment_views,
            drop_views: raw.drop_views,
            create_functions: raw.create_functions,
            drop_functions: raw.drop_functions,
            alter_sequences: raw.alter_sequences,
            add_publication_names: raw.add_publication_names,
            view_acl_to_grants_params: raw
                .view_acl_to_grants_params
                .into_iter()
                .map(|p| crate::grants::AclGrantParams {
                    acl: p.acl,
                    kind: object_kind_from_str(&p.obj_type),
                    object_name: p.obj_name,
                })
                .collect(),
            function_acl_to_grants_params: raw
                .function_acl_to_grants_params
                .into_iter()
                .map(|p| crate::grants::AclGrantParams {
                    acl: p.acl,
                    kind: object_kind_from_str(&p.obj_type),
                    object_name: p.obj_name,
                })
                .collect(),
            partition,
            is_child_exists: raw.is_child_exists,
        }
    }
}

/// Fetch and parse the full metadata snapshot for `(schema_name, table_name)`.
/// Returns `Ok(None)` when the table doesn't exist.
pub async fn fetch_table_info(
    session: &impl SqlExecutor,
    schema_name: &str,
    table_name: &str,
) -> Result<Option<TableInfo>, RebuildError> {
    // $1/$2 placeholders are baked into the resource file; substitute here
    // since SqlExecutor's narrow interface doesn't carry parameter binding.
    let query = TABLE_INFO_QUERY
        .replace("$1", &format!("'{}'", schema_name.replace('\'', "''")))
        .replace("$2", &format!("'{}'", table_name.replace('\'', "''")));

    let Some(row) = session.query_opt(&query).await? else {
        return Ok(None);
    };
    let info_json: serde_json::Value = row.get("info");
    let raw: TableInfoRaw = serde_json::from_value(info_json)
        .map_err(|e| RebuildError::Internal(format!("malformed table_info_query result: {e}")))?;
    Ok(Some(TableInfo::from(raw)))
}
