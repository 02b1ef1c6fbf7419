//! # Schemasync Engine
//!
//! Schema-aware differential synchronization between two relational
//! databases whose schemas have drifted apart. Rows move one way, source to
//! target, preserving row identity; the transferable field set is derived
//! fresh every run from both schemas rather than enumerated by hand.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   snapshots    ┌─────────────┐
//! │ Introspector │───────────────►│ Reconciler  │──► SyncPlan
//! └──────┬───────┘                └─────────────┘       │
//!        │ source rows                                  ▼
//!        │                ┌───────────────┐    ┌────────────────┐
//!        └───────────────►│  Entity Sync  │───►│ Upsert Executor│──► target
//!                         └──────┬────────┘    └────────────────┘
//!                                │ relational values      ▲
//!                         ┌──────▼────────┐               │
//!                         │ Ref Validator │ target ids────┘
//!                         └──────┬────────┘
//!                                ▼
//!                         ┌───────────────┐
//!                         │ Status Ledger │ (audit only)
//!                         └───────────────┘
//! ```
//!
//! The [`SyncOrchestrator`] sequences entities in dependency order
//! (organizations → partners → products → sales), wraps each in its own
//! target transaction, and aggregates every outcome into one
//! [`OrchestratorReport`].
//!
//! ## Example
//!
//! ```ignore
//! use schemasync_core::{DatabaseConfig, Entity};
//! use schemasync_engine::{ConnectionProvider, SyncOrchestrator};
//!
//! let provider = ConnectionProvider::new()
//!     .with_database("erp_v16", DatabaseConfig::new("v16.internal", "erp", "sync"))
//!     .with_database("erp_v18", DatabaseConfig::new("v18.internal", "erp", "sync")
//!         .with_field_registry("ir_model_fields"));
//!
//! let orchestrator = SyncOrchestrator::new(provider, "erp_v16", "erp_v18");
//! let report = orchestrator.run_sync(&Entity::ordered(), None).await?;
//!
//! for entity in report.completed() {
//!     println!("{}: +{} ~{} ={}", entity.entity, entity.inserted, entity.updated, entity.skipped);
//! }
//! ```
//!
//! ## Crate Organization
//!
//! - [`provider`] - named databases to connection pools
//! - [`introspect`] - per-run schema snapshots
//! - [`plan`] - field reconciliation between two snapshots
//! - [`refcheck`] - relational value validation against target data
//! - [`upsert`] - insert-or-update decision per row
//! - [`entity_sync`] - one entity end to end
//! - [`orchestrator`] - dependency ordering, transactions, aggregation
//! - [`ledger`] - field-level audit trail
//! - [`report`] - run outcome types
//! - [`sql`] - identifier quoting, value binding, row decoding

pub mod entity_sync;
pub mod introspect;
pub mod ledger;
pub mod orchestrator;
pub mod plan;
pub mod provider;
pub mod refcheck;
pub mod report;
pub mod sql;
pub mod upsert;

pub use entity_sync::{EntitySynchronizer, SyncContext};
pub use ledger::{FieldStatus, FieldStatusRecord, LedgerSink, NullLedger, PgLedger};
pub use orchestrator::{CancelFlag, EngineConfig, SyncOrchestrator};
pub use plan::{reconcile, IgnoredField, RelationalField, SyncPlan};
pub use provider::ConnectionProvider;
pub use refcheck::{ReferenceCheckResult, ReferenceValidator};
pub use report::{EntityOutcome, EntityRunReport, OrchestratorReport, RowFailure, RowOutcome};
pub use upsert::UpsertExecutor;
