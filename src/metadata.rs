//! Table metadata model.
//!
//! A single snapshot of everything needed to rebuild a table: its columns,
//! its dependent objects (indexes, constraints, views, triggers, sequences),
//! and the ACLs that must be re-applied once the shadow takes the source's
//! name. Fetched once via [`crate::session::RebuildSession::fetch_table_info`]
//! and then mutated in place by column-reorder/retype steps before any DDL
//! is issued.

use crate::grants::AclGrantParams;
use std::collections::HashMap;

/// One column of the source table, as introspected from the system catalog.
#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub sql_type: String,
    pub collate: Option<String>,
    pub not_null: bool,
    pub default: Option<String>,
    pub comment: Option<String>,
    pub statistics: Option<i32>,
    pub acl: Vec<String>,
}

impl Column {
    /// Render this column's definition for a `CREATE TABLE` statement,
    /// stripping the default expression's own-type cast decoration (e.g.
    /// `'active'::status` becomes `'active'` when the column type is
    /// `status`) so the literal isn't tied to a type OID that won't exist on
    /// the shadow until this statement creates it.
    pub fn definition_sql(&self) -> String {
        let mut def = format!("{} {}", self.name, self.sql_type);
        if let Some(collate) = &self.collate {
            def.push_str(&format!(" collate {collate}"));
        }
        if self.not_null {
            def.push_str(" not null");
        }
        if let Some(default) = &self.default {
            def.push_str(&format!(" default {}", untype_default(default, &self.sql_type)));
        }
        def
    }
}

/// Strip a trailing `::<type>` cast from a default expression when it
/// matches the column's own declared type, under the three spellings
/// PostgreSQL's `pg_get_expr` is known to emit: the bare type name, the
/// `public.`-qualified leaf, and the bare leaf (schema-qualified types like
/// `myschema.status` are rendered with their last path segment).
pub fn untype_default(default: &str, column_type: &str) -> String {
    let leaf = column_type.rsplit('.').next().unwrap_or(column_type);
    default
        .replace(&format!("'::{column_type}"), "'")
        .replace(&format!("'::public.{leaf}"), "'")
        .replace(&format!("'::{leaf}"), "'")
}

/// Partition relationship of the source table, if any.
#[derive(Debug, Clone)]
pub enum PartitionRelation {
    /// Not part of any inheritance/partition hierarchy.
    None,
    /// Plain table inheritance (`INHERITS`).
    Legacy { parent: String },
    /// Declarative partitioning (`PARTITION OF`).
    Declarative {
        parent: String,
        partition_expr: String,
        constraint_def: String,
    },
}

/// Full snapshot of a source table and everything that must survive the
/// rebuild.
#[derive(Debug, Clone)]
pub struct TableInfo {
    pub schema_name: String,
    pub table_name: String,
    pub columns: Vec<Column>,
    pub ordered_columns: Vec<Column>,
    pub pk_columns: Vec<String>,
    pub storage_parameters: Vec<String>,
    pub replica_identity: String,
    pub comment: Option<String>,
    pub create_check_constraints: Vec<String>,
    pub grant_privileges: Vec<String>,

    /// Stack of `CREATE INDEX` statements; consumed one at a time so a
    /// retried run doesn't recreate an index the prior attempt already
    /// built.
    pub create_indexes: Vec<String>,
    pub rename_indexes: Vec<String>,
    pub create_constraints: Vec<String>,
    pub validate_constraints: Vec<String>,
    pub drop_constraints: Vec<String>,
    pub create_triggers: Vec<String>,
    pub create_rules: Vec<String>,
    pub create_views: Vec<String>,
    pub comment_views: Vec<String>,
    pub drop_views: Vec<String>,
    pub create_functions: Vec<String>,
    pub drop_functions: Vec<String>,
    pub alter_sequences: Vec<String>,
    pub add_publication_names: Vec<String>,

    pub view_acl_to_grants_params: Vec<AclGrantParams>,
    pub function_acl_to_grants_params: Vec<AclGrantParams>,

    pub partition: PartitionRelation,
    /// True when this table is itself a partitioned parent with children —
    /// rebuilding a parent is unsupported, checked as a precondition.
    pub is_child_exists: bool,
}

impl TableInfo {
    pub fn table_full_name(&self) -> String {
        format!("\"{}\".\"{}\"", self.schema_name, self.table_name)
    }

    pub fn shadow_table_full_name(&self) -> String {
        format!("\"{}\".\"{}__new\"", self.schema_name, self.table_name)
    }

    pub fn delta_table_full_name(&self) -> String {
        format!("\"{}\".\"{}__delta\"", self.schema_name, self.table_name)
    }

    pub fn backup_table_name(&self) -> String {
        format!("{}__{}", self.schema_name, self.table_name)
    }

    /// Column ACLs keyed by column name, for [`crate::grants::render_column_grants`].
    pub fn column_acls(&self) -> HashMap<String, Vec<String>> {
        self.columns
            .iter()
            .filter(|c| !c.acl.is_empty())
            .map(|c| (c.name.clone(), c.acl.clone()))
            .collect()
    }

    /// Apply `--reorder-columns`: substitute the pre-computed
    /// alignment-ordered column list.
    pub fn apply_reorder_columns(&mut self) {
        self.columns = self.ordered_columns.clone();
    }

    /// Apply `--set-column-order`. Fails if the requested names aren't
    /// exactly the table's current column set (same cardinality, matched by
    /// name) — a partial or misspelled list must not silently drop columns.
    pub fn apply_set_column_order(&mut self, order: &[String]) -> Result<(), crate::error::RebuildError> {
        let mut new_columns = Vec::with_capacity(order.len());
        for name in order {
            match self.columns.iter().find(|c| &c.name == name) {
                Some(col) => new_columns.push(col.clone()),
                None => {
                    return Err(crate::error::RebuildError::ConfigInvalid(format!(
                        "set_column_order names unknown column '{name}'"
                    )));
                }
            }
        }
        if new_columns.len() != self.columns.len() {
            return Err(crate::error::RebuildError::ConfigInvalid(
                "set_column_order must name every column exactly once".to_string(),
            ));
        }
        self.columns = new_columns;
        Ok(())
    }

    /// Apply `--set-data-type` overrides in place.
    pub fn apply_set_data_type(&mut self, overrides: &[crate::config::ColumnTypeOverride]) {
        for ov in overrides {
            if let Some(col) = self.columns.iter_mut().find(|c| c.name == ov.name) {
                if col.sql_type != ov.type_ {
                    col.sql_type = ov.type_.clone();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(name: &str, ty: &str) -> Column {
        Column {
            name: name.to_string(),
            sql_type: ty.to_string(),
            collate: None,
            not_null: false,
            default: None,
            comment: None,
            statistics: None,
            acl: vec![],
        }
    }

    #[test]
    fn untype_default_strips_bare_type_cast() {
        assert_eq!(untype_default("'active'::status", "status"), "'active'");
    }

    #[test]
    fn untype_default_strips_public_qualified_cast() {
        assert_eq!(untype_default("'open'::public.leaf_status", "leaf_status"), "'open'");
    }

    #[test]
    fn untype_default_strips_schema_qualified_leaf_cast() {
        assert_eq!(
            untype_default("'open'::myschema.leaf_status", "myschema.leaf_status"),
            "'open'"
        );
    }

    #[test]
    fn untype_default_leaves_unrelated_expression_untouched() {
        assert_eq!(untype_default("now()", "timestamp"), "now()");
    }

    #[test]
    fn column_definition_includes_collate_and_default() {
        let mut c = col("name", "text");
        c.collate = Some("\"C\"".to_string());
        c.not_null = true;
        c.default = Some("'x'::text".to_string());
        assert_eq!(c.definition_sql(), "name text collate \"C\" not null default 'x'");
    }

    #[test]
    fn set_column_order_rejects_unknown_column() {
        let mut t = make_table(vec![col("a", "int"), col("b", "int")]);
        let err = t.apply_set_column_order(&["a".to_string(), "z".to_string()]).unwrap_err();
        assert!(matches!(err, crate::error::RebuildError::ConfigInvalid(_)));
    }

    #[test]
    fn set_column_order_rejects_partial_list() {
        let mut t = make_table(vec![col("a", "int"), col("b", "int")]);
        let err = t.apply_set_column_order(&["a".to_string()]).unwrap_err();
        assert!(matches!(err, crate::error::RebuildError::ConfigInvalid(_)));
    }

    #[test]
    fn set_column_order_reorders_in_place() {
        let mut t = make_table(vec![col("a", "int"), col("b", "int")]);
        t.apply_set_column_order(&["b".to_string(), "a".to_string()]).unwrap();
        assert_eq!(t.columns[0].name, "b");
        assert_eq!(t.columns[1].name, "a");
    }

    #[test]
    fn set_data_type_overrides_matching_column_only() {
        let mut t = make_table(vec![col("a", "int"), col("b", "int")]);
        t.apply_set_data_type(&[crate::config::ColumnTypeOverride {
            name: "a".to_string(),
            type_: "bigint".to_string(),
        }]);
        assert_eq!(t.columns[0].sql_type, "bigint");
        assert_eq!(t.columns[1].sql_type, "int");
    }

    fn make_table(columns: Vec<Column>) -> TableInfo {
        TableInfo {
            schema_name: "public".to_string(),
            table_name: "t".to_string(),
            ordered_columns: columns.clone(),
            columns,
            pk_columns: vec!["a".to_string()],
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
}
