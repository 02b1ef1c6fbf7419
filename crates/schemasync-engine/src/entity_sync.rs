//! Entity synchronization
//!
//! Replicates one entity's table end to end: snapshot both schemas,
//! reconcile the field set, stream source rows in pages, clear broken
//! references, upsert into the target transaction, and ledger the
//! field-level decisions. One malformed row never aborts the entity; any
//! failure before row iteration begins does.

use chrono::NaiveDateTime;
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::BTreeMap;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use schemasync_core::descriptor::EntityDescriptor;
use schemasync_core::error::{SyncError, SyncResult};
use schemasync_core::record::{FieldValue, Record};

use crate::introspect;
use crate::ledger::{records_for_plan, LedgerSink};
use crate::orchestrator::{CancelFlag, EngineConfig};
use crate::plan::{reconcile, SyncPlan};
use crate::refcheck::{ReferenceCheckResult, ReferenceValidator};
use crate::report::{EntityRunReport, RowOutcome};
use crate::sql::{quote_identifier, record_from_row};
use crate::upsert::UpsertExecutor;

/// Shared run state threaded explicitly through every entity run: pools,
/// ledger, run identifier, cancellation. No component reaches for ambient
/// globals, so independent runs (and tests) never share state.
pub struct SyncContext<'a> {
    /// Source database pool.
    pub source: &'a PgPool,
    /// Target database pool.
    pub target: &'a PgPool,
    /// Source database identifier, for snapshots and logs.
    pub source_db: &'a str,
    /// Target database identifier, for snapshots and logs.
    pub target_db: &'a str,
    /// Field-registry table in the source, when configured.
    pub source_registry: Option<&'a str>,
    /// Field-registry table in the target, when configured.
    pub target_registry: Option<&'a str>,
    /// Where field statuses are ledgered.
    pub ledger: &'a dyn LedgerSink,
    /// Run identifier, also the ledger key.
    pub run_id: Uuid,
    /// Engine tuning.
    pub config: &'a EngineConfig,
    /// Checked between rows; set from outside to stop the run.
    pub cancel: &'a CancelFlag,
}

/// Synchronizes one entity's table from source to target.
pub struct EntitySynchronizer<'a> {
    descriptor: &'a EntityDescriptor,
    ctx: &'a SyncContext<'a>,
}

impl<'a> EntitySynchronizer<'a> {
    /// Create a synchronizer for one entity.
    #[must_use]
    pub fn new(descriptor: &'a EntityDescriptor, ctx: &'a SyncContext<'a>) -> Self {
        Self { descriptor, ctx }
    }

    /// Run the entity's synchronization inside the given target
    /// transaction. The caller owns commit/rollback.
    #[instrument(skip(self, tx), fields(entity = %self.descriptor.entity, run_id = %self.ctx.run_id))]
    pub async fn sync(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        since: Option<NaiveDateTime>,
    ) -> SyncResult<EntityRunReport> {
        let ctx = self.ctx;

        let source_snapshot = introspect::snapshot(
            self.descriptor,
            ctx.source,
            ctx.source_db,
            ctx.source_registry,
        )
        .await?;
        let target_snapshot = introspect::snapshot(
            self.descriptor,
            ctx.target,
            ctx.target_db,
            ctx.target_registry,
        )
        .await?;

        let plan = reconcile(&source_snapshot, &target_snapshot, self.descriptor);
        info!(
            planned = plan.len(),
            relational = plan.relational_fields.len(),
            ignored = plan.ignored.len(),
            recency = plan.recency_column.as_deref().unwrap_or("-"),
            "Sync plan computed"
        );

        let validator =
            ReferenceValidator::prefetch(ctx.target, &plan, ctx.config.max_cached_references)
                .await?;
        let executor = UpsertExecutor::new(self.descriptor, &plan);

        let mut report = EntityRunReport::new(self.descriptor.entity);
        let mut sanitized: BTreeMap<String, String> = BTreeMap::new();
        let select_columns = plan.select_columns();
        // The incremental filter needs a recency column on both sides;
        // without one the read degrades to a full scan.
        let since = since.filter(|_| plan.recency_column.is_some());
        let mut offset = 0usize;

        loop {
            if ctx.cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            let page_sql = build_source_query(
                &plan,
                &self.descriptor.table,
                since.is_some(),
                ctx.config.batch_size,
                offset,
            );
            let mut page_query = sqlx::query(&page_sql);
            if let Some(since) = since {
                page_query = page_query.bind(since);
            }
            let rows = page_query.fetch_all(ctx.source).await.map_err(|e| {
                SyncError::database_with_source(
                    format!("failed to read source rows for {}", self.descriptor.table),
                    e,
                )
            })?;

            let page_len = rows.len();
            report.rows_read += page_len as u64;

            for row in &rows {
                if ctx.cancel.is_cancelled() {
                    return Err(SyncError::Cancelled);
                }

                let mut record = record_from_row(row, &select_columns);

                match self
                    .process_row(tx, &executor, &validator, &plan, &mut record, &mut sanitized)
                    .await
                {
                    Ok(outcome) => report.record_outcome(outcome),
                    Err(SyncError::Cancelled) => return Err(SyncError::Cancelled),
                    Err(e) => {
                        let identity = record
                            .get(&plan.identity_column)
                            .map(ToString::to_string)
                            .unwrap_or_else(|| "<unknown>".to_string());
                        warn!(identity = %identity, error = %e, "Row failed, continuing");
                        report.record_failure(identity, e.to_string());
                    }
                }
            }

            if page_len < ctx.config.batch_size {
                break;
            }
            offset += ctx.config.batch_size;
        }

        let records = records_for_plan(
            ctx.run_id,
            &plan,
            &source_snapshot,
            &target_snapshot,
            &sanitized,
        );
        if let Err(e) = ctx.ledger.record(&records).await {
            // Audit must never block the sync itself.
            warn!(error = %e, "Ledger write failed, sync result unaffected");
        }

        info!(
            rows_read = report.rows_read,
            inserted = report.inserted,
            updated = report.updated,
            skipped = report.skipped,
            failures = report.failures.len(),
            "Entity synchronized"
        );

        Ok(report)
    }

    /// Sanitize one record's relational fields and upsert it.
    async fn process_row(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        executor: &UpsertExecutor<'_>,
        validator: &ReferenceValidator,
        plan: &SyncPlan,
        record: &mut Record,
        sanitized: &mut BTreeMap<String, String>,
    ) -> SyncResult<RowOutcome> {
        for field in &plan.relational_fields {
            let Some(value) = record.get(&field.column) else {
                continue;
            };
            if value.is_null() {
                continue;
            }

            match validator.validate(field, value).await? {
                ReferenceCheckResult::Valid => {}
                ReferenceCheckResult::Invalid { reason } => {
                    debug!(field = %field.column, reason = %reason, "Clearing broken reference");
                    record.set(field.column.clone(), FieldValue::Null);
                    sanitized.entry(field.column.clone()).or_insert(reason);
                }
            }
        }

        executor.upsert(&mut **tx, record).await
    }
}

/// Build one page of the source read. Only plan columns (plus the recency
/// marker) are ever selected; ordering by the identity column keeps the
/// pagination stable.
fn build_source_query(
    plan: &SyncPlan,
    table: &str,
    with_since: bool,
    batch_size: usize,
    offset: usize,
) -> String {
    let columns: Vec<String> = plan
        .select_columns()
        .iter()
        .map(|c| quote_identifier(c))
        .collect();

    let mut sql = format!(
        "SELECT {} FROM {}",
        columns.join(", "),
        quote_identifier(table)
    );

    if with_since {
        if let Some(ref recency) = plan.recency_column {
            sql.push_str(&format!(" WHERE {} >= $1", quote_identifier(recency)));
        }
    }

    sql.push_str(&format!(
        " ORDER BY {} LIMIT {} OFFSET {}",
        quote_identifier(&plan.identity_column),
        batch_size,
        offset
    ));

    sql
}
