//! Sync status ledger
//!
//! Per-field audit records: which fields were synchronized, which were
//! ignored and why. Write-only from the engine's perspective — operators
//! read the table, the engine never does. A ledger failure must never fail
//! the sync; callers log and continue.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::BTreeMap;
use tracing::debug;
use uuid::Uuid;

use schemasync_core::descriptor::Entity;
use schemasync_core::error::{SyncError, SyncResult};
use schemasync_core::schema::SchemaSnapshot;

use crate::plan::SyncPlan;
use crate::sql::quote_identifier;

/// Synchronization status of one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldStatus {
    /// The field was part of the plan and carried through.
    Synced,
    /// The field was excluded, or cleared during the run.
    Ignored,
}

impl FieldStatus {
    /// Convert to string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldStatus::Synced => "synced",
            FieldStatus::Ignored => "ignored",
        }
    }
}

/// One persisted ledger row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldStatusRecord {
    /// Run this record belongs to.
    pub run_id: Uuid,
    /// Entity the field belongs to.
    pub entity: Entity,
    /// Field name.
    pub field_name: String,
    /// Declared type in whichever schema carried the field.
    pub field_type: String,
    /// Referenced table, for relational fields.
    pub relation_target: Option<String>,
    /// Synced or ignored.
    pub status: FieldStatus,
    /// Human-readable reason, for ignored fields.
    pub ignore_reason: Option<String>,
    /// When the record was produced.
    pub recorded_at: DateTime<Utc>,
}

/// Build the ledger records for one entity's run: one `synced` record per
/// planned field, one `ignored` record per excluded field, and an
/// `ignored` record (replacing `synced`) for every relational field whose
/// values had to be cleared during the run.
#[must_use]
pub fn records_for_plan(
    run_id: Uuid,
    plan: &SyncPlan,
    source: &SchemaSnapshot,
    target: &SchemaSnapshot,
    sanitized: &BTreeMap<String, String>,
) -> Vec<FieldStatusRecord> {
    let recorded_at = Utc::now();
    let declared_type = |name: &str| {
        target
            .column(name)
            .or_else(|| source.column(name))
            .map(|c| c.declared_type.clone())
            .unwrap_or_default()
    };

    let mut records = Vec::with_capacity(plan.len() + plan.ignored.len());

    for field in &plan.scalar_fields {
        records.push(FieldStatusRecord {
            run_id,
            entity: plan.entity,
            field_name: field.clone(),
            field_type: declared_type(field),
            relation_target: None,
            status: FieldStatus::Synced,
            ignore_reason: None,
            recorded_at,
        });
    }

    for field in &plan.relational_fields {
        let (status, ignore_reason) = match sanitized.get(&field.column) {
            Some(reason) => (FieldStatus::Ignored, Some(reason.clone())),
            None => (FieldStatus::Synced, None),
        };
        records.push(FieldStatusRecord {
            run_id,
            entity: plan.entity,
            field_name: field.column.clone(),
            field_type: declared_type(&field.column),
            relation_target: Some(field.target_table.clone()),
            status,
            ignore_reason,
            recorded_at,
        });
    }

    for field in &plan.ignored {
        records.push(FieldStatusRecord {
            run_id,
            entity: plan.entity,
            field_name: field.name.clone(),
            field_type: field.declared_type.clone(),
            relation_target: field.relation_target.clone(),
            status: FieldStatus::Ignored,
            ignore_reason: Some(field.reason.clone()),
            recorded_at,
        });
    }

    records
}

/// Destination for ledger records.
#[async_trait]
pub trait LedgerSink: Send + Sync {
    /// Persist a batch of records.
    async fn record(&self, records: &[FieldStatusRecord]) -> SyncResult<()>;
}

/// Ledger writing to the target database's status table.
pub struct PgLedger {
    pool: PgPool,
    table: String,
}

impl PgLedger {
    /// Default ledger table name.
    pub const DEFAULT_TABLE: &'static str = "sync_field_status";

    /// Create a ledger writing to the default table.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            table: Self::DEFAULT_TABLE.to_string(),
        }
    }

    /// Create a ledger writing to a custom table.
    pub fn with_table(pool: PgPool, table: impl Into<String>) -> Self {
        Self {
            pool,
            table: table.into(),
        }
    }
}

#[async_trait]
impl LedgerSink for PgLedger {
    async fn record(&self, records: &[FieldStatusRecord]) -> SyncResult<()> {
        let sql = format!(
            "INSERT INTO {} \
             (run_id, entity, field_name, field_type, relation_target, status, ignore_reason, recorded_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            quote_identifier(&self.table)
        );

        for record in records {
            sqlx::query(&sql)
                .bind(record.run_id)
                .bind(record.entity.as_str())
                .bind(&record.field_name)
                .bind(&record.field_type)
                .bind(record.relation_target.as_deref())
                .bind(record.status.as_str())
                .bind(record.ignore_reason.as_deref())
                .bind(record.recorded_at)
                .execute(&self.pool)
                .await
                .map_err(|e| SyncError::database_with_source("ledger insert failed", e))?;
        }

        debug!(records = records.len(), table = %self.table, "Field statuses ledgered");
        Ok(())
    }
}

/// Discards every record. Used when auditing is disabled and in tests.
#[derive(Debug, Default)]
pub struct NullLedger;

#[async_trait]
impl LedgerSink for NullLedger {
    async fn record(&self, _records: &[FieldStatusRecord]) -> SyncResult<()> {
        Ok(())
    }
}
