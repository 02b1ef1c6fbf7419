//! Run reports
//!
//! Per-row outcomes, per-entity run reports, and the aggregated report the
//! orchestrator hands back to the caller. The report is the single surface
//! a caller inspects: partial failure is data here, never an error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use schemasync_core::descriptor::Entity;

/// Outcome of upserting one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowOutcome {
    /// No matching target row existed; one was inserted.
    Inserted,
    /// A matching target row existed and was overwritten.
    Updated,
    /// A matching target row existed and was at least as recent; nothing
    /// was written.
    SkippedUnchanged,
}

impl RowOutcome {
    /// Convert to string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            RowOutcome::Inserted => "inserted",
            RowOutcome::Updated => "updated",
            RowOutcome::SkippedUnchanged => "skipped_unchanged",
        }
    }
}

impl std::fmt::Display for RowOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One row that could not be written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowFailure {
    /// The row's identity value, as text.
    pub identity: String,
    /// The underlying error, as text.
    pub error: String,
}

/// Report for one entity's run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRunReport {
    /// The entity that was synchronized.
    pub entity: Entity,
    /// Rows read from the source.
    #[serde(default)]
    pub rows_read: u64,
    /// Rows inserted into the target.
    #[serde(default)]
    pub inserted: u64,
    /// Rows updated in the target.
    #[serde(default)]
    pub updated: u64,
    /// Rows skipped because the target was at least as recent.
    #[serde(default)]
    pub skipped: u64,
    /// Rows that failed to write.
    #[serde(default)]
    pub failures: Vec<RowFailure>,
}

impl EntityRunReport {
    /// Create an empty report.
    #[must_use]
    pub fn new(entity: Entity) -> Self {
        Self {
            entity,
            rows_read: 0,
            inserted: 0,
            updated: 0,
            skipped: 0,
            failures: Vec::new(),
        }
    }

    /// Count one row outcome.
    pub fn record_outcome(&mut self, outcome: RowOutcome) {
        match outcome {
            RowOutcome::Inserted => self.inserted += 1,
            RowOutcome::Updated => self.updated += 1,
            RowOutcome::SkippedUnchanged => self.skipped += 1,
        }
    }

    /// Record one failed row.
    pub fn record_failure(&mut self, identity: impl Into<String>, error: impl Into<String>) {
        self.failures.push(RowFailure {
            identity: identity.into(),
            error: error.into(),
        });
    }

    /// Check whether any row failed.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Rows that reached the upsert executor and produced an outcome.
    #[must_use]
    pub fn rows_written_or_skipped(&self) -> u64 {
        self.inserted + self.updated + self.skipped
    }
}

/// Outcome of one entity within an orchestrated run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EntityOutcome {
    /// The entity ran to completion (possibly with row-level failures) and
    /// its transaction committed.
    Completed { report: EntityRunReport },
    /// The entity failed before or during its run; its transaction rolled
    /// back.
    Failed { entity: Entity, error: String },
    /// The entity never ran (cancellation earlier in the sequence).
    Skipped { entity: Entity, reason: String },
}

impl EntityOutcome {
    /// The entity this outcome belongs to.
    #[must_use]
    pub fn entity(&self) -> Entity {
        match self {
            EntityOutcome::Completed { report } => report.entity,
            EntityOutcome::Failed { entity, .. } | EntityOutcome::Skipped { entity, .. } => *entity,
        }
    }

    /// Check if the entity completed.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, EntityOutcome::Completed { .. })
    }
}

/// Aggregated report for one orchestrated run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorReport {
    /// Run identifier, also the ledger key.
    pub run_id: Uuid,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub completed_at: DateTime<Utc>,
    /// Per-entity outcomes in execution order.
    pub entities: Vec<EntityOutcome>,
}

impl OrchestratorReport {
    /// Reports of entities that completed.
    pub fn completed(&self) -> impl Iterator<Item = &EntityRunReport> {
        self.entities.iter().filter_map(|outcome| match outcome {
            EntityOutcome::Completed { report } => Some(report),
            _ => None,
        })
    }

    /// Check if at least one entity completed.
    #[must_use]
    pub fn is_partial_success(&self) -> bool {
        self.entities.iter().any(EntityOutcome::is_completed)
    }

    /// Check if every requested entity completed without row failures.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.entities.iter().all(EntityOutcome::is_completed)
            && self.completed().all(|report| !report.has_failures())
    }

    /// Total rows inserted across entities.
    #[must_use]
    pub fn total_inserted(&self) -> u64 {
        self.completed().map(|r| r.inserted).sum()
    }

    /// Total rows updated across entities.
    #[must_use]
    pub fn total_updated(&self) -> u64 {
        self.completed().map(|r| r.updated).sum()
    }

    /// Total rows skipped as unchanged across entities.
    #[must_use]
    pub fn total_skipped(&self) -> u64 {
        self.completed().map(|r| r.skipped).sum()
    }
}
