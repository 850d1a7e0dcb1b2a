//! Progress-log bookkeeping in the service schema.
//!
//! One row per `(schema_name, table_name)` in `rebuild_table."table"`,
//! recording when a run started/stopped and the table's size before and
//! after. Read with `psql` by an operator watching a long rebuild, not
//! consumed by this crate itself after the run completes — there's no
//! `get_by_name` here because nothing in the engine needs to read it back
//! mid-run, unlike the teacher's catalog rows which gate scheduler decisions.

use crate::config::SERVICE_SCHEMA;
use crate::error::RebuildError;
use crate::session::SqlExecutor;

/// Ensure the service schema and progress table exist. Idempotent — safe to
/// call on every run, including `--only-switch`/`--clean` runs.
pub async fn ensure_service_schema(session: &impl SqlExecutor) -> Result<(), RebuildError> {
    session
        .batch_execute(&format!(
            r#"create schema if not exists "{SERVICE_SCHEMA}";
create table if not exists "{SERVICE_SCHEMA}"."table"(
  schema_name text,
  table_name text,
  last_start_time timestamp,
  last_stop_time timestamp,
  before_table_size bigint,
  before_total_size bigint,
  after_table_size bigint,
  after_total_size bigint,
  constraint pk_table primary key(schema_name, table_name));"#
        ))
        .await
}

/// Record the start of a full run (not `--only-switch`/`--only-validate-constraints`),
/// upserting on the `(schema_name, table_name)` key so a retried run updates
/// `last_start_time` rather than erroring on the primary key.
pub async fn record_start(session: &impl SqlExecutor, schema_name: &str, table_name: &str, table_full_name: &str) -> Result<(), RebuildError> {
    session
        .execute(&format!(
            r#"insert into "{SERVICE_SCHEMA}"."table"(schema_name, table_name, last_start_time, before_table_size, before_total_size)
  values ('{schema_name}', '{table_name}', now(), pg_table_size('{table_full_name}'), pg_total_relation_size('{table_full_name}'))
on conflict on constraint pk_table
do update set last_start_time = now();"#
        ))
        .await
        .map(|_| ())
}

/// Record the post-swap table size once the rename has taken effect.
pub async fn record_after_sizes(session: &impl SqlExecutor, schema_name: &str, table_name: &str, table_full_name: &str) -> Result<(), RebuildError> {
    session
        .execute(&format!(
            r#"update "{SERVICE_SCHEMA}"."table" t
   set after_table_size = pg_table_size('{table_full_name}'),
       after_total_size = pg_total_relation_size('{table_full_name}')
 where t.schema_name = '{schema_name}' and t.table_name = '{table_name}';"#
        ))
        .await
        .map(|_| ())
}

/// Record the end of the run, regardless of which phases executed.
pub async fn record_stop(session: &impl SqlExecutor, schema_name: &str, table_name: &str) -> Result<(), RebuildError> {
    session
        .execute(&format!(
            r#"update "{SERVICE_SCHEMA}"."table" t
   set last_stop_time = now()
 where t.schema_name = '{schema_name}' and t.table_name = '{table_name}';"#
        ))
        .await
        .map(|_| ())
}
