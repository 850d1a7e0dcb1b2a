//! ACL-to-GRANT rendering.
//!
//! PostgreSQL's `aclitem[]` columns (`pg_class.relacl`, `pg_proc.proacl`, …)
//! encode privileges as strings like `alice=arw/bob` (role `alice` holds
//! append/read/write, granted by `bob`) or `=r/bob` (PUBLIC holds read). This
//! module turns a snapshot of those strings, captured by the introspection
//! query, back into `GRANT` statements to re-apply after the swap rename —
//! `pg_dump` does this same translation for the same reason: privileges are
//! attached to an OID, and the shadow table is a new OID.

use std::collections::HashMap;

/// Single-letter privilege codes as they appear inside an aclitem, in the
/// canonical display order PostgreSQL itself uses.
const ACL_ORDER: &str = "rawdDxtXUCTc";

fn acl_verb(code: char) -> Option<&'static str> {
    Some(match code {
        'a' => "insert",
        'r' => "select",
        'w' => "update",
        'd' => "delete",
        'D' => "truncate",
        'x' => "references",
        't' => "trigger",
        'X' => "execute",
        'U' => "usage",
        'C' => "create",
        'T' => "temp",
        'c' => "connect",
        _ => return None,
    })
}

/// The object kind an ACL entry is being rendered for. Determines both the
/// "all privileges" shorthand and the `GRANT ... ON <kind> ...` keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Column,
    Database,
    Function,
    Procedure,
    Language,
    LargeObject,
    Namespace,
    Table,
    Sequence,
    Schema,
    Tablespace,
    Type,
    Domain,
}

impl ObjectKind {
    fn keyword(self) -> &'static str {
        match self {
            ObjectKind::Column | ObjectKind::Table => "table",
            ObjectKind::Database => "database",
            ObjectKind::Function => "function",
            ObjectKind::Procedure => "procedure",
            ObjectKind::Language => "language",
            ObjectKind::LargeObject => "largeobject",
            ObjectKind::Namespace => "namespace",
            ObjectKind::Sequence => "sequence",
            ObjectKind::Schema => "schema",
            ObjectKind::Tablespace => "tablespace",
            ObjectKind::Type => "type",
            ObjectKind::Domain => "domain",
        }
    }

    /// The privilege-code set that means "all privileges" for this kind.
    fn all_privileges(self) -> &'static str {
        match self {
            ObjectKind::Column => "arwx",
            ObjectKind::Database => "CTc",
            ObjectKind::Function | ObjectKind::Procedure => "X",
            ObjectKind::Language => "U",
            ObjectKind::LargeObject => "rw",
            ObjectKind::Namespace | ObjectKind::Schema => "UC",
            ObjectKind::Table => "arwdDxt",
            ObjectKind::Sequence => "Urw",
            ObjectKind::Tablespace => "C",
            ObjectKind::Type | ObjectKind::Domain => "U",
        }
    }
}

/// Roles whose privileges are never re-granted explicitly — they hold every
/// privilege implicitly as the owning role and re-granting to them produces
/// noise (and, on some managed platforms, an error).
const IMPLICIT_OWNER_ROLES: &[&str] = &["postgres", "gpadmin"];

/// PUBLIC's default execute grant on a function/procedure. Carried over as a
/// no-op marker: if present, it's consumed silently instead of producing a
/// `revoke all from public` statement.
const FUNCTION_PUBLIC_ACL: &[&str] = &["=X/postgres", "=X/gpadmin"];

fn resolve_perm(kind: ObjectKind, perm: &str) -> (String, &'static str) {
    let all = kind.all_privileges();
    if perm == all {
        return ("all".to_string(), "");
    }
    let all_with_grant: String = all.chars().map(|c| format!("{c}*")).collect();
    if perm == all_with_grant {
        return ("all".to_string(), " with grant option");
    }
    let mut chars: Vec<char> = perm.chars().collect();
    chars.sort_by_key(|c| ACL_ORDER.find(*c).unwrap_or(usize::MAX));
    let verbs: Vec<&str> = chars.iter().filter_map(|c| acl_verb(*c)).collect();
    (verbs.join(", "), "")
}

/// Parse one aclitem string `role=perm/grantor` (or `=perm/grantor` for
/// PUBLIC) into `(role, perm)`. Returns `None` for malformed entries.
fn parse_acl_entry(entry: &str) -> Option<(String, String)> {
    let role_perm = entry.split('/').next()?;
    let (role, perm) = role_perm.split_once('=')?;
    let role = if role.is_empty() { "public" } else { role };
    Some((role.to_string(), perm.to_string()))
}

/// Render a snapshot of ACL entries into `GRANT` statements.
///
/// `sub_object` names the column when `kind` is [`ObjectKind::Column`]; it
/// is rendered as `(col) ` between the privilege list and `ON`.
pub fn render_grants(acl: &[String], kind: ObjectKind, object_name: &str, sub_object: &str) -> String {
    if acl.is_empty() {
        return String::new();
    }

    let mut acl: Vec<String> = acl.to_vec();
    let mut statements = Vec::new();

    if matches!(kind, ObjectKind::Function | ObjectKind::Procedure) {
        let had_default_public = FUNCTION_PUBLIC_ACL
            .iter()
            .find_map(|fpa| acl.iter().position(|e| e == fpa));
        if let Some(idx) = had_default_public {
            acl.remove(idx);
        } else {
            statements.push(format!(
                "revoke all on {} {} from public;",
                kind.keyword(),
                object_name
            ));
        }
    }

    // PostgreSQL orders PUBLIC entries (leading `=`) first among equals.
    let mut sorted = acl;
    sorted.sort_by(|a, b| sort_key(a).cmp(&sort_key(b)));

    let sub_object_prefix = if sub_object.is_empty() {
        String::new()
    } else {
        format!("({sub_object}) ")
    };

    for entry in &sorted {
        let Some((role, perm)) = parse_acl_entry(entry) else {
            continue;
        };
        if IMPLICIT_OWNER_ROLES.contains(&role.as_str()) {
            continue;
        }
        let render_kind = if kind == ObjectKind::Column {
            ObjectKind::Table
        } else {
            kind
        };
        let (perm_sql, grant_option) = resolve_perm(kind, &perm);
        statements.push(format!(
            "grant {perm_sql} {sub_object_prefix}on {} {object_name} to {role}{grant_option};",
            render_kind.keyword()
        ));
    }

    statements.join("\n")
}

fn sort_key(entry: &str) -> String {
    if let Some(rest) = entry.strip_prefix('=') {
        format!("public{rest}")
    } else {
        entry.to_string()
    }
}

/// A pending grants-render request captured by the introspection query for
/// an object (view or function) whose ACL is rendered independently of the
/// table's own column grants.
#[derive(Debug, Clone)]
pub struct AclGrantParams {
    pub acl: Vec<String>,
    pub kind: ObjectKind,
    pub object_name: String,
}

/// Render a batch of [`AclGrantParams`], joining non-empty results with a
/// newline — mirrors looping over `view_acl_to_grants_params` /
/// `function_acl_to_grants_params` and concatenating each rendered block.
pub fn render_grants_batch(params: &[AclGrantParams]) -> String {
    params
        .iter()
        .map(|p| render_grants(&p.acl, p.kind, &p.object_name, ""))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render per-column grants for every column in `acl_by_column` that carries
/// a non-empty ACL, addressed against the table identifier `table_name`.
pub fn render_column_grants(acl_by_column: &HashMap<String, Vec<String>>, table_name: &str) -> String {
    let mut names: Vec<&String> = acl_by_column.keys().collect();
    names.sort();
    names
        .into_iter()
        .map(|col| render_grants(&acl_by_column[col], ObjectKind::Column, table_name, col))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
