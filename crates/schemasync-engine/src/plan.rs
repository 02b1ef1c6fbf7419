//! Field reconciliation
//!
//! Derives the synchronizable field set for one entity from the source and
//! target schema snapshots. Only the intersection of column names is ever
//! transferred; the target decides which of those are relational and which
//! are computed. Output ordering is sorted so the statements generated from
//! a plan are reproducible run to run.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use schemasync_core::descriptor::{Entity, EntityDescriptor};
use schemasync_core::schema::{ColumnMeta, FieldKind, SchemaSnapshot};

/// A planned field whose value references a row in another target table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationalField {
    /// Column name in the entity's table.
    pub column: String,
    /// Referenced table in the target database.
    pub target_table: String,
    /// Referenced column (the referenced table's identity).
    pub target_column: String,
}

/// A field excluded from the plan, with the reason recorded for audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IgnoredField {
    /// Column name.
    pub name: String,
    /// Declared type in whichever snapshot carried the column.
    pub declared_type: String,
    /// Referenced table, when the column was relational.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation_target: Option<String>,
    /// Human-readable exclusion reason.
    pub reason: String,
}

/// The agreed field set to transfer for one entity in one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncPlan {
    /// The entity the plan is for.
    pub entity: Entity,
    /// The stable row identity column. Always planned, always scalar.
    pub identity_column: String,
    /// Directly copyable fields, sorted.
    pub scalar_fields: Vec<String>,
    /// Fields requiring reference validation, sorted by column.
    pub relational_fields: Vec<RelationalField>,
    /// Recency marker column, present only when both schemas carry it.
    pub recency_column: Option<String>,
    /// Fields excluded from the plan, with reasons.
    pub ignored: Vec<IgnoredField>,
}

impl SyncPlan {
    /// All planned column names (scalar + relational), sorted.
    #[must_use]
    pub fn planned_columns(&self) -> Vec<String> {
        let mut columns: BTreeSet<String> = self.scalar_fields.iter().cloned().collect();
        columns.extend(self.relational_fields.iter().map(|f| f.column.clone()));
        columns.into_iter().collect()
    }

    /// Columns to read from the source: every planned column plus the
    /// recency marker (which may itself be unwritable in the target but is
    /// still needed for comparison).
    #[must_use]
    pub fn select_columns(&self) -> Vec<String> {
        let mut columns: BTreeSet<String> = self.planned_columns().into_iter().collect();
        if let Some(ref recency) = self.recency_column {
            columns.insert(recency.clone());
        }
        columns.into_iter().collect()
    }

    /// Check whether a column is part of the plan.
    #[must_use]
    pub fn is_planned(&self, column: &str) -> bool {
        self.scalar_fields.iter().any(|c| c == column)
            || self.relational_fields.iter().any(|f| f.column == column)
    }

    /// Distinct referenced (table, column) pairs across relational fields.
    #[must_use]
    pub fn referenced_tables(&self) -> BTreeSet<(String, String)> {
        self.relational_fields
            .iter()
            .map(|f| (f.target_table.clone(), f.target_column.clone()))
            .collect()
    }

    /// Number of planned fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.scalar_fields.len() + self.relational_fields.len()
    }

    /// Check if nothing beyond the identity is planned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Compute the sync plan for one entity from its two schema snapshots.
///
/// Rules, in order:
/// - only columns present in both snapshots are planned;
/// - columns the target marks computed/non-storable are excluded even when
///   the source also has them;
/// - the identity column is always planned, always as a scalar;
/// - relational classification follows the target snapshot (its references
///   are the ones that must hold).
pub fn reconcile(
    source: &SchemaSnapshot,
    target: &SchemaSnapshot,
    descriptor: &EntityDescriptor,
) -> SyncPlan {
    let source_columns: BTreeMap<&str, &ColumnMeta> = source
        .columns
        .iter()
        .map(|c| (c.name.as_str(), c))
        .collect();
    let target_columns: BTreeMap<&str, &ColumnMeta> = target
        .columns
        .iter()
        .map(|c| (c.name.as_str(), c))
        .collect();

    let identity = descriptor.identity_column.as_str();
    let mut scalar_fields: BTreeSet<String> = BTreeSet::new();
    let mut relational_fields: Vec<RelationalField> = Vec::new();
    let mut ignored: Vec<IgnoredField> = Vec::new();

    for (name, source_column) in &source_columns {
        if *name == identity {
            // Forced scalar regardless of what either side's metadata says.
            scalar_fields.insert((*name).to_string());
            continue;
        }

        let Some(target_column) = target_columns.get(name) else {
            ignored.push(ignored_field(source_column, "absent in target schema"));
            continue;
        };

        if !target_column.storable {
            ignored.push(ignored_field(target_column, "computed in target"));
            continue;
        }

        match &target_column.kind {
            FieldKind::Relation {
                target_table,
                target_column: referenced,
            } => relational_fields.push(RelationalField {
                column: (*name).to_string(),
                target_table: target_table.clone(),
                target_column: referenced.clone(),
            }),
            FieldKind::Scalar { .. } => {
                scalar_fields.insert((*name).to_string());
            }
        }
    }

    for (name, target_column) in &target_columns {
        if *name != identity && !source_columns.contains_key(name) {
            ignored.push(ignored_field(target_column, "absent in source schema"));
        }
    }

    // The identity column is planned even when a snapshot failed to report
    // it; row matching is impossible without it.
    scalar_fields.insert(identity.to_string());

    relational_fields.sort_by(|a, b| a.column.cmp(&b.column));
    ignored.sort_by(|a, b| a.name.cmp(&b.name));

    let recency_column = descriptor
        .recency_column
        .as_ref()
        .filter(|column| source.has_column(column) && target.has_column(column))
        .cloned();

    SyncPlan {
        entity: descriptor.entity,
        identity_column: identity.to_string(),
        scalar_fields: scalar_fields.into_iter().collect(),
        relational_fields,
        recency_column,
        ignored,
    }
}

fn ignored_field(column: &ColumnMeta, reason: &str) -> IgnoredField {
    IgnoredField {
        name: column.name.clone(),
        declared_type: column.declared_type.clone(),
        relation_target: column.relation_target().map(str::to_string),
        reason: reason.to_string(),
    }
}
