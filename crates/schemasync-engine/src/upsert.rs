//! Upsert execution
//!
//! Existence check plus insert-or-update for one row, inside the entity's
//! target transaction. Statements are assembled from plan fields only —
//! identifiers come from introspected metadata, values are bound as typed
//! parameters, and cleared fields are written as literal NULL.

use sqlx::PgConnection;
use tracing::debug;

use schemasync_core::descriptor::{ConflictPolicy, EntityDescriptor};
use schemasync_core::error::{SyncError, SyncResult};
use schemasync_core::record::{FieldValue, Record};

use crate::plan::SyncPlan;
use crate::report::RowOutcome;
use crate::sql::{bind_value, decode_field, quote_identifier};

/// Executes the insert-or-update decision for single rows of one entity.
pub struct UpsertExecutor<'a> {
    descriptor: &'a EntityDescriptor,
    plan: &'a SyncPlan,
}

impl<'a> UpsertExecutor<'a> {
    /// Create an executor for one entity's plan.
    #[must_use]
    pub fn new(descriptor: &'a EntityDescriptor, plan: &'a SyncPlan) -> Self {
        Self { descriptor, plan }
    }

    /// Upsert one record. Returns the row outcome; any failure is a
    /// recovered [`SyncError::RowWrite`] carrying the row's identity.
    pub async fn upsert(
        &self,
        conn: &mut PgConnection,
        record: &Record,
    ) -> SyncResult<RowOutcome> {
        let entity = self.descriptor.entity.as_str();
        let identity = self.row_identity(record);

        let match_column = self.descriptor.match_column();
        let match_value = match record.get(match_column) {
            Some(value) if !value.is_null() => value,
            _ => {
                return Err(SyncError::row_write(
                    entity,
                    identity,
                    format!("no value for match column '{match_column}'"),
                ))
            }
        };

        let lookup_sql = build_lookup_statement(
            &self.descriptor.table,
            match_column,
            &self.descriptor.identity_column,
            self.plan.recency_column.as_deref(),
        );
        let existing = bind_value(sqlx::query(&lookup_sql), match_value)
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| {
                SyncError::row_write_with_source(entity, &identity, "existence check failed", e)
            })?;

        match existing {
            None => self.insert(conn, record, &identity).await,
            Some(row) => {
                let existing_identity =
                    decode_field(&row, &self.descriptor.identity_column).ok_or_else(|| {
                        SyncError::row_write(entity, &identity, "matched row has no identity")
                    })?;
                let target_recency = self
                    .plan
                    .recency_column
                    .as_deref()
                    .and_then(|column| decode_field(&row, column))
                    .and_then(|value| value.as_timestamp());
                let source_recency = self
                    .plan
                    .recency_column
                    .as_deref()
                    .and_then(|column| record.get(column))
                    .and_then(FieldValue::as_timestamp);

                if !should_write(self.descriptor.conflict_policy, source_recency, target_recency) {
                    debug!(entity = %entity, identity = %identity, "Target row is at least as recent, skipping");
                    return Ok(RowOutcome::SkippedUnchanged);
                }

                self.update(conn, record, &existing_identity, &identity).await
            }
        }
    }

    async fn insert(
        &self,
        conn: &mut PgConnection,
        record: &Record,
        identity: &str,
    ) -> SyncResult<RowOutcome> {
        let entity = self.descriptor.entity.as_str();
        let columns = insert_columns(self.plan, record);
        let sql = build_insert_statement(&self.descriptor.table, &columns);

        let mut query = sqlx::query(&sql);
        for column in &columns {
            // Planned and non-null by construction of `insert_columns`.
            if let Some(value) = record.get(column) {
                query = bind_value(query, value);
            }
        }

        query.execute(&mut *conn).await.map_err(|e| {
            SyncError::row_write_with_source(entity, identity, "insert failed", e)
        })?;

        debug!(entity = %entity, identity = %identity, "Row inserted");
        Ok(RowOutcome::Inserted)
    }

    async fn update(
        &self,
        conn: &mut PgConnection,
        record: &Record,
        existing_identity: &FieldValue,
        identity: &str,
    ) -> SyncResult<RowOutcome> {
        let entity = self.descriptor.entity.as_str();
        let assignments = update_assignments(self.plan, record);
        let sql = build_update_statement(
            &self.descriptor.table,
            &self.descriptor.identity_column,
            &assignments,
        );

        let mut query = sqlx::query(&sql);
        for column in &assignments.bound_columns {
            if let Some(value) = record.get(column) {
                query = bind_value(query, value);
            }
        }
        query = bind_value(query, existing_identity);

        let result = query.execute(&mut *conn).await.map_err(|e| {
            SyncError::row_write_with_source(entity, identity, "update failed", e)
        })?;

        if result.rows_affected() == 0 {
            return Err(SyncError::row_write(
                entity,
                identity,
                "matched row disappeared during update",
            ));
        }

        debug!(entity = %entity, identity = %identity, "Row updated");
        Ok(RowOutcome::Updated)
    }

    /// The row's identity as text, for reports and logs.
    fn row_identity(&self, record: &Record) -> String {
        record
            .get(&self.descriptor.identity_column)
            .map(ToString::to_string)
            .unwrap_or_else(|| "<unknown>".to_string())
    }
}

/// Decide whether a matched target row should be overwritten.
///
/// A target without a recency marker treats every incoming row as
/// authoritative; with one, the source must be strictly newer.
#[must_use]
pub fn should_write(
    policy: ConflictPolicy,
    source_recency: Option<chrono::NaiveDateTime>,
    target_recency: Option<chrono::NaiveDateTime>,
) -> bool {
    match policy {
        ConflictPolicy::Overwrite => true,
        ConflictPolicy::IfNewer => match (source_recency, target_recency) {
            (_, None) => true,
            (Some(source), Some(target)) => source > target,
            (None, Some(_)) => false,
        },
    }
}

/// Build the existence-check statement for one row.
fn build_lookup_statement(
    table: &str,
    match_column: &str,
    identity_column: &str,
    recency_column: Option<&str>,
) -> String {
    let mut select = quote_identifier(identity_column);
    if let Some(recency) = recency_column.filter(|c| *c != identity_column) {
        select.push_str(", ");
        select.push_str(&quote_identifier(recency));
    }
    format!(
        "SELECT {} FROM {} WHERE {} = $1 LIMIT 1",
        select,
        quote_identifier(table),
        quote_identifier(match_column)
    )
}

/// Planned columns carrying an actual value, in stable (sorted) order.
fn insert_columns(plan: &SyncPlan, record: &Record) -> Vec<String> {
    plan.planned_columns()
        .into_iter()
        .filter(|column| !record.is_unset(column))
        .collect()
}

/// Build an INSERT over the given columns.
fn build_insert_statement(table: &str, columns: &[String]) -> String {
    let column_list: Vec<String> = columns.iter().map(|c| quote_identifier(c)).collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("${i}")).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_identifier(table),
        column_list.join(", "),
        placeholders.join(", ")
    )
}

/// SET-clause assignments for an update: placeholders for valued fields,
/// literal NULL for cleared ones, identity never assigned.
struct UpdateAssignments {
    set_clauses: Vec<String>,
    bound_columns: Vec<String>,
}

fn update_assignments(plan: &SyncPlan, record: &Record) -> UpdateAssignments {
    let mut set_clauses = Vec::new();
    let mut bound_columns = Vec::new();
    let mut placeholder = 0usize;

    for column in plan.planned_columns() {
        if column == plan.identity_column {
            continue;
        }
        match record.get(&column) {
            None => {}
            Some(FieldValue::Null) => {
                set_clauses.push(format!("{} = NULL", quote_identifier(&column)));
            }
            Some(_) => {
                placeholder += 1;
                set_clauses.push(format!("{} = ${placeholder}", quote_identifier(&column)));
                bound_columns.push(column);
            }
        }
    }

    UpdateAssignments {
        set_clauses,
        bound_columns,
    }
}

/// Build the UPDATE statement; a record reduced to its identity still
/// produces an observable (no-op) statement rather than being dropped.
fn build_update_statement(
    table: &str,
    identity_column: &str,
    assignments: &UpdateAssignments,
) -> String {
    let identity = quote_identifier(identity_column);
    let set_sql = if assignments.set_clauses.is_empty() {
        format!("{identity} = {identity}")
    } else {
        assignments.set_clauses.join(", ")
    };
    let where_placeholder = assignments.bound_columns.len() + 1;
    format!(
        "UPDATE {} SET {} WHERE {} = ${}",
        quote_identifier(table),
        set_sql,
        identity,
        where_placeholder
    )
}
