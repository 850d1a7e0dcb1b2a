//! Bulk and chunked copy of existing rows into the shadow table.
//!
//! The chunked path walks the source in primary-key order using a
//! lexicographic "strictly greater than the last row seen" predicate, the
//! same pattern a keyset-paginated API endpoint uses to avoid `OFFSET`'s
//! linear rescan cost. Each chunk commits independently so a `statement_timeout`
//! on one chunk doesn't unwind work already durably copied, and the cursor
//! (the last row's primary key) is exactly what the next chunk's predicate
//! needs — no separate bookkeeping table.

use crate::config::RebuildConfig;
use crate::error::RebuildError;
use crate::metadata::TableInfo;
use tokio_postgres::Row;

/// One row's primary-key values, in `pk_columns` order, as raw text —
/// extracted via an explicit `::text` cast in the copy query (see
/// `build_chunk_query`'s `___pk_cursor_N` columns) so this works for any PK
/// type, not just ones `tokio_postgres` maps from a textual wire format.
/// Quoting for re-use as a SQL literal happens in [`build_pk_predicate`],
/// not here — this type carries unquoted text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkCursor(pub Vec<String>);

/// Render a cursor value as a single-quoted SQL string literal, escaping
/// embedded quotes. Relies on Postgres's untyped-literal coercion to compare
/// correctly against the PK column's real type, the same as the original
/// tool's `t.{k} > '{pk_value[k]}'` (`main.py`'s `_get_copy_query`).
fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Build the lexicographic strict-greater-than predicate over a compound
/// primary key: `(k1 > v1) OR (k1 = v1 AND k2 > v2) OR ...`. Requires
/// `cursor.0.len() == pk_columns.len()`.
pub fn build_pk_predicate(pk_columns: &[String], cursor: &PkCursor) -> String {
    assert_eq!(pk_columns.len(), cursor.0.len());
    let mut groups = Vec::with_capacity(pk_columns.len());
    for i in 0..pk_columns.len() {
        let mut clauses: Vec<String> = (0..i)
            .map(|j| format!("t.{} = {}", pk_columns[j], quote_literal(&cursor.0[j])))
            .collect();
        clauses.push(format!("t.{} > {}", pk_columns[i], quote_literal(&cursor.0[i])));
        groups.push(format!("({})", clauses.join(" and ")));
    }
    format!("where ({})", groups.join(" or "))
}

/// Build one chunked-copy statement. When `cursor` is `None`, the predicate
/// is omitted (first chunk). Returns the full CTE statement described in the
/// component design: it inserts up to `chunk_limit` rows and returns the
/// last row copied (by PK order) alongside the count inserted.
pub fn build_chunk_query(config: &RebuildConfig, table: &TableInfo, cursor: Option<&PkCursor>) -> String {
    let source = table.table_full_name();
    let shadow = table.shadow_table_full_name();
    let pk_predicate = cursor
        .map(|c| build_pk_predicate(&table.pk_columns, c))
        .unwrap_or_default();
    let additional_condition = config
        .additional_condition
        .as_ref()
        .map(|c| format!("where {c}"))
        .unwrap_or_default();
    let pk_order: String = table
        .pk_columns
        .iter()
        .map(|c| format!("t.{c}"))
        .collect::<Vec<_>>()
        .join(", ");
    let ins_columns: String = table.columns.iter().map(|c| c.name.as_str()).collect::<Vec<_>>().join(", ");
    let columns: String = table
        .columns
        .iter()
        .map(|c| format!("t.{}", c.name))
        .collect::<Vec<_>>()
        .join(", ");
    let chunk_limit = config.chunk_limit.expect("build_chunk_query requires chunk_limit");

    // Cast each PK column to text explicitly rather than relying on
    // `extract_cursor` to decode it as whatever native type it is — a
    // bigint/uuid/etc PK would panic `tokio_postgres::Row::get::<_, String>`
    // otherwise, since only TEXT/VARCHAR/NAME/BPCHAR implement `FromSql<String>`.
    let cursor_columns: String = table
        .pk_columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!(", t.{c}::text as {}", cursor_alias(i)))
        .collect();

    format!(
        r#"with w_t as (
  select t.*, max(t.___rn) over() ___max_rn
    from (select t.*, row_number() over() as ___rn
            from (select t.*
                    from {source} t
                   {pk_predicate}
                   order by {pk_order}
                   limit {chunk_limit}) t) t
),
w_i as (
  insert into {shadow}({ins_columns})
    select {columns}
      from w_t t
     {additional_condition}
     order by {pk_order}
  returning *
)
select (select count(1) from w_i) as inserted_count,
       t.*{cursor_columns}
  from w_t t
 where t.___max_rn = t.___rn;"#
    )
}

fn cursor_alias(index: usize) -> String {
    format!("___pk_cursor_{index}")
}

/// Build the unbounded single-statement copy used when no `chunk_limit` is
/// configured or the table has no primary key to page by.
pub fn build_unbounded_copy_query(config: &RebuildConfig, table: &TableInfo) -> String {
    let source = table.table_full_name();
    let shadow = table.shadow_table_full_name();
    let ins_columns: String = table.columns.iter().map(|c| c.name.as_str()).collect::<Vec<_>>().join(", ");
    let columns: String = table
        .columns
        .iter()
        .map(|c| format!("t.{}", c.name))
        .collect::<Vec<_>>()
        .join(", ");
    let additional_condition = config
        .additional_condition
        .as_ref()
        .map(|c| format!("where {c}"))
        .unwrap_or_default();

    format!(
        "insert into {shadow}({ins_columns}) select {columns} from {source} t {additional_condition}"
    )
}

fn session_settings_sql(config: &RebuildConfig) -> String {
    format!(
        "set local statement_timeout = {};\nset local work_mem = '{}';",
        config.statement_timeout_ms,
        crate::config::WORK_MEM
    )
}

fn extract_cursor(row: &Row, pk_columns: &[String]) -> PkCursor {
    PkCursor(
        (0..pk_columns.len())
            .map(|i| row.get::<_, String>(cursor_alias(i).as_str()))
            .collect(),
    )
}

/// Copy all existing rows into the shadow table. Chunked mode loops,
/// committing each chunk in its own transaction, until the database reports
/// no further rows; unbounded mode runs one statement.
pub async fn copy_data(
    session: &mut crate::session::RebuildSession,
    config: &RebuildConfig,
    table: &TableInfo,
) -> Result<(), RebuildError> {
    if config.chunk_limit.is_some() && !table.pk_columns.is_empty() {
        let mut cursor: Option<PkCursor> = None;
        loop {
            let query = build_chunk_query(config, table, cursor.as_ref());
            let settings = session_settings_sql(config);
            let pk_columns = table.pk_columns.clone();
            let row = session
                .transaction(|txn| {
                    let query = query.clone();
                    let settings = settings.clone();
                    async move {
                        txn.batch_execute(&settings).await?;
                        let row = txn.query_opt(&query, &[]).await?;
                        Ok((row, txn))
                    }
                })
                .await?;
            match row {
                None => break,
                Some(row) => cursor = Some(extract_cursor(&row, &pk_columns)),
            }
        }
    } else {
        let query = build_unbounded_copy_query(config, table);
        let settings = session_settings_sql(config);
        session
            .transaction(|txn| {
                let query = query.clone();
                let settings = settings.clone();
                async move {
                    txn.batch_execute(&settings).await?;
                    txn.execute(&query, &[]).await?;
                    Ok(((), txn))
                }
            })
            .await?;
    }
    Ok(())
}
