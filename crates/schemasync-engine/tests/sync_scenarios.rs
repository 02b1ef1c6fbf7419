//! Synchronization Scenario Tests
//!
//! End-to-end checks of the decision pipeline without a live database:
//! plan computation from drifted snapshots, reference sanitization, the
//! insert/update/skip decision, and the field statuses that reach the
//! ledger sink.

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::PgPool;
use std::collections::BTreeMap;
use std::sync::Mutex;
use uuid::Uuid;

use schemasync_core::descriptor::{ConflictPolicy, Entity};
use schemasync_core::error::SyncResult;
use schemasync_core::record::{FieldValue, Record};
use schemasync_core::schema::{ColumnMeta, ScalarKind, SchemaSnapshot};
use schemasync_engine::ledger::records_for_plan;
use schemasync_engine::refcheck::ReferenceIndex;
use schemasync_engine::upsert::should_write;
use schemasync_engine::{
    reconcile, FieldStatus, FieldStatusRecord, LedgerSink, ReferenceCheckResult,
    ReferenceValidator, SyncPlan,
};

// =============================================================================
// Fixtures
// =============================================================================

/// Ledger sink that captures everything it is handed.
#[derive(Default)]
struct CapturingLedger {
    records: Mutex<Vec<FieldStatusRecord>>,
}

#[async_trait]
impl LedgerSink for CapturingLedger {
    async fn record(&self, records: &[FieldStatusRecord]) -> SyncResult<()> {
        self.records.lock().unwrap().extend_from_slice(records);
        Ok(())
    }
}

fn source_snapshot() -> SchemaSnapshot {
    SchemaSnapshot::new(
        Entity::Partner,
        "erp_v16",
        vec![
            ColumnMeta::scalar("id", "integer", ScalarKind::Integer),
            ColumnMeta::scalar("name", "character varying", ScalarKind::Text),
            ColumnMeta::scalar("mobile", "character varying", ScalarKind::Text),
            ColumnMeta::scalar("write_date", "timestamp without time zone", ScalarKind::DateTime),
            ColumnMeta::relation("currency_id", "integer", "res_currency", "id"),
        ],
    )
}

fn target_snapshot() -> SchemaSnapshot {
    SchemaSnapshot::new(
        Entity::Partner,
        "erp_v18",
        vec![
            ColumnMeta::scalar("id", "integer", ScalarKind::Integer),
            ColumnMeta::scalar("name", "character varying", ScalarKind::Text),
            ColumnMeta::scalar("write_date", "timestamp without time zone", ScalarKind::DateTime),
            ColumnMeta::relation("currency_id", "integer", "res_currency", "id"),
            ColumnMeta::scalar("display_name", "character varying", ScalarKind::Text).computed(),
        ],
    )
}

fn partner_plan() -> SyncPlan {
    reconcile(
        &source_snapshot(),
        &target_snapshot(),
        &Entity::Partner.descriptor(),
    )
}

fn validator_with_currencies(keys: &[&str]) -> ReferenceValidator {
    let mut index = ReferenceIndex::new();
    index.insert(
        "res_currency",
        "id",
        Some(keys.iter().map(|k| (*k).to_string()).collect()),
    );
    // The pool is lazy and never touched: the index answers every lookup.
    let pool = PgPool::connect_lazy("postgres://sync@localhost/unused").unwrap();
    ReferenceValidator::from_parts(pool, index)
}

fn timestamp(day: u32) -> chrono::NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 3, day)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap()
}

// =============================================================================
// Scenario: new target row
// =============================================================================

#[tokio::test]
async fn new_row_keeps_resolvable_reference() {
    let validator = validator_with_currencies(&["3"]);
    let plan = partner_plan();

    let record = Record::new()
        .with("id", 7i64)
        .with("name", "Acme")
        .with("currency_id", 3i64);

    let field = &plan.relational_fields[0];
    let result = validator
        .validate(field, record.get("currency_id").unwrap())
        .await
        .unwrap();
    assert_eq!(result, ReferenceCheckResult::Valid);
}

// =============================================================================
// Scenario: stale update skipped
// =============================================================================

#[test]
fn stale_source_row_is_skipped() {
    let t1 = Some(timestamp(1));
    let t2 = Some(timestamp(2));

    // Target row is fresher: nothing is written.
    assert!(!should_write(ConflictPolicy::IfNewer, t1, t2));
}

#[test]
fn second_run_against_unchanged_data_is_a_no_op() {
    // After a successful write both sides carry the same timestamp, and
    // "not strictly newer" means every row skips on the next run.
    let written = Some(timestamp(2));
    assert!(!should_write(ConflictPolicy::IfNewer, written, written));
}

// =============================================================================
// Scenario: dangling reference
// =============================================================================

#[tokio::test]
async fn dangling_reference_is_cleared_and_ledgered() {
    let validator = validator_with_currencies(&["1", "2", "3"]);
    let plan = partner_plan();
    let field = &plan.relational_fields[0];

    let mut record = Record::new().with("id", 9i64).with("currency_id", 999i64);

    let result = validator
        .validate(field, record.get("currency_id").unwrap())
        .await
        .unwrap();
    let ReferenceCheckResult::Invalid { reason } = result else {
        panic!("Expected the dangling reference to be invalid");
    };

    // The synchronizer clears the field and remembers the reason.
    record.set("currency_id", FieldValue::Null);
    let mut sanitized = BTreeMap::new();
    sanitized.insert("currency_id".to_string(), reason);

    let ledger = CapturingLedger::default();
    let records = records_for_plan(
        Uuid::new_v4(),
        &plan,
        &source_snapshot(),
        &target_snapshot(),
        &sanitized,
    );
    ledger.record(&records).await.unwrap();

    let captured = ledger.records.lock().unwrap();
    let currency = captured
        .iter()
        .find(|r| r.field_name == "currency_id")
        .unwrap();
    assert_eq!(currency.status, FieldStatus::Ignored);
    assert!(currency
        .ignore_reason
        .as_deref()
        .unwrap()
        .contains("referenced row not found"));
    assert_eq!(currency.relation_target.as_deref(), Some("res_currency"));

    // The row itself still syncs, with the reference unset.
    assert!(record.get("currency_id").unwrap().is_null());
}

// =============================================================================
// Scenario: schema drift
// =============================================================================

#[tokio::test]
async fn drifted_column_is_excluded_and_ledgered() {
    let plan = partner_plan();
    assert!(!plan.is_planned("mobile"));
    assert!(!plan.is_planned("display_name"));

    let ledger = CapturingLedger::default();
    let records = records_for_plan(
        Uuid::new_v4(),
        &plan,
        &source_snapshot(),
        &target_snapshot(),
        &BTreeMap::new(),
    );
    ledger.record(&records).await.unwrap();

    let captured = ledger.records.lock().unwrap();
    let mobile = captured.iter().find(|r| r.field_name == "mobile").unwrap();
    assert_eq!(mobile.status, FieldStatus::Ignored);
    assert_eq!(mobile.ignore_reason.as_deref(), Some("absent in target schema"));

    let display = captured
        .iter()
        .find(|r| r.field_name == "display_name")
        .unwrap();
    assert_eq!(display.status, FieldStatus::Ignored);

    let synced: Vec<&str> = captured
        .iter()
        .filter(|r| r.status == FieldStatus::Synced)
        .map(|r| r.field_name.as_str())
        .collect();
    assert_eq!(synced, vec!["id", "name", "write_date", "currency_id"]);
}

// =============================================================================
// Field-set safety
// =============================================================================

#[test]
fn no_statement_ever_references_a_drifted_column() {
    let plan = partner_plan();

    for column in plan.select_columns() {
        assert!(
            source_snapshot().has_column(&column) && target_snapshot().has_column(&column),
            "column '{column}' is outside the schema intersection"
        );
    }
}
