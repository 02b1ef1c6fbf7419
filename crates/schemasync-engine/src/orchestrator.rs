//! Sync orchestration
//!
//! Runs entity synchronizers in dependency order, owns the per-entity
//! transaction boundary, and aggregates the outcome. One entity's fatal
//! failure never blocks its siblings; the aggregated report is the single
//! surface the caller inspects, and it only errors when the run cannot
//! start at all.

use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use schemasync_core::descriptor::{Entity, EntityDescriptor};
use schemasync_core::error::{SyncError, SyncResult};

use crate::entity_sync::{EntitySynchronizer, SyncContext};
use crate::ledger::PgLedger;
use crate::provider::ConnectionProvider;
use crate::report::{EntityOutcome, OrchestratorReport};

/// Engine tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Source rows read per page.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Per-table cap on prefetched reference identifier sets; larger
    /// tables are probed per value instead.
    #[serde(default = "default_max_cached_references")]
    pub max_cached_references: usize,
    /// Ledger table name in the target database.
    #[serde(default = "default_ledger_table")]
    pub ledger_table: String,
}

fn default_batch_size() -> usize {
    500
}

fn default_max_cached_references() -> usize {
    100_000
}

fn default_ledger_table() -> String {
    PgLedger::DEFAULT_TABLE.to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_cached_references: default_max_cached_references(),
            ledger_table: default_ledger_table(),
        }
    }
}

/// Cooperative cancellation signal, checked between rows so every row's
/// write stays atomic.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Create a new, unset flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Check whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Sequences entity synchronizers against one source and one target
/// database.
pub struct SyncOrchestrator {
    provider: ConnectionProvider,
    source_db: String,
    target_db: String,
    descriptors: BTreeMap<Entity, EntityDescriptor>,
    config: EngineConfig,
    cancel: CancelFlag,
}

impl SyncOrchestrator {
    /// Create an orchestrator with the default per-entity descriptors.
    pub fn new(
        provider: ConnectionProvider,
        source_db: impl Into<String>,
        target_db: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            source_db: source_db.into(),
            target_db: target_db.into(),
            descriptors: Entity::ordered()
                .into_iter()
                .map(|entity| (entity, entity.descriptor()))
                .collect(),
            config: EngineConfig::default(),
            cancel: CancelFlag::new(),
        }
    }

    /// Replace the engine configuration.
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Override one entity's descriptor.
    #[must_use]
    pub fn with_descriptor(mut self, descriptor: EntityDescriptor) -> Self {
        self.descriptors.insert(descriptor.entity, descriptor);
        self
    }

    /// The flag external callers use to cancel a running sync.
    #[must_use]
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Run one synchronization pass over the requested entities.
    ///
    /// Entities always execute in dependency order (organizations →
    /// partners → products → sales) regardless of the order requested,
    /// since later entities' references validate against rows the earlier
    /// ones write. `since` restricts the source read to rows modified at
    /// or after the given instant, where the schema carries a recency
    /// marker.
    ///
    /// Errors only when the run cannot start at all; partial failure is
    /// reported, not raised.
    #[instrument(skip(self, entities), fields(source = %self.source_db, target = %self.target_db))]
    pub async fn run_sync(
        &self,
        entities: &[Entity],
        since: Option<NaiveDateTime>,
    ) -> SyncResult<OrchestratorReport> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();

        let source = self.provider.open(&self.source_db).await?;
        let target = self.provider.open(&self.target_db).await?;
        let ledger = PgLedger::with_table(target.clone(), &self.config.ledger_table);

        let source_registry = self
            .provider
            .config(&self.source_db)
            .and_then(|c| c.field_registry.as_deref());
        let target_registry = self
            .provider
            .config(&self.target_db)
            .and_then(|c| c.field_registry.as_deref());

        info!(run_id = %run_id, entities = entities.len(), "Synchronization run started");

        let mut outcomes = Vec::new();
        let mut cancelled = false;

        for entity in requested_in_order(entities) {
            if cancelled || self.cancel.is_cancelled() {
                outcomes.push(EntityOutcome::Skipped {
                    entity,
                    reason: "run cancelled".to_string(),
                });
                continue;
            }

            let descriptor = &self.descriptors[&entity];
            let ctx = SyncContext {
                source: &source,
                target: &target,
                source_db: &self.source_db,
                target_db: &self.target_db,
                source_registry,
                target_registry,
                ledger: &ledger,
                run_id,
                config: &self.config,
                cancel: &self.cancel,
            };
            let synchronizer = EntitySynchronizer::new(descriptor, &ctx);

            let mut tx = match target.begin().await {
                Ok(tx) => tx,
                Err(e) => {
                    error!(entity = %entity, error = %e, "Could not open entity transaction");
                    outcomes.push(EntityOutcome::Failed {
                        entity,
                        error: SyncError::database_with_source("transaction begin failed", e)
                            .to_string(),
                    });
                    continue;
                }
            };

            match synchronizer.sync(&mut tx, since).await {
                Ok(report) => match tx.commit().await {
                    Ok(()) => {
                        info!(entity = %entity, "Entity transaction committed");
                        outcomes.push(EntityOutcome::Completed { report });
                    }
                    Err(e) => {
                        error!(entity = %entity, error = %e, "Entity transaction commit failed");
                        outcomes.push(EntityOutcome::Failed {
                            entity,
                            error: SyncError::database_with_source("commit failed", e).to_string(),
                        });
                    }
                },
                Err(SyncError::Cancelled) => {
                    warn!(entity = %entity, "Cancelled mid-entity, rolling back");
                    rollback_quietly(tx, entity).await;
                    outcomes.push(EntityOutcome::Failed {
                        entity,
                        error: SyncError::Cancelled.to_string(),
                    });
                    cancelled = true;
                }
                Err(e) => {
                    error!(entity = %entity, error = %e, "Entity failed, rolling back");
                    rollback_quietly(tx, entity).await;
                    outcomes.push(EntityOutcome::Failed {
                        entity,
                        error: e.to_string(),
                    });
                }
            }
        }

        let report = OrchestratorReport {
            run_id,
            started_at,
            completed_at: Utc::now(),
            entities: outcomes,
        };

        info!(
            run_id = %run_id,
            inserted = report.total_inserted(),
            updated = report.total_updated(),
            skipped = report.total_skipped(),
            partial = !report.is_clean(),
            "Synchronization run finished"
        );

        Ok(report)
    }
}

/// Filter the requested entities into canonical dependency order,
/// deduplicated.
fn requested_in_order(requested: &[Entity]) -> Vec<Entity> {
    Entity::ordered()
        .into_iter()
        .filter(|entity| requested.contains(entity))
        .collect()
}

async fn rollback_quietly(tx: sqlx::Transaction<'_, sqlx::Postgres>, entity: Entity) {
    if let Err(e) = tx.rollback().await {
        warn!(entity = %entity, error = %e, "Rollback failed");
    }
}
