//! Reference validation
//!
//! Checks relational field values against the rows that actually exist in
//! the target database. The identifier sets of referenced tables are
//! prefetched concurrently (one read task per table) and held in memory;
//! tables whose identifier count exceeds the configured cap fall back to a
//! per-value probe query. A broken reference never fails a row — the caller
//! clears the field and records the reason.

use sqlx::PgPool;
use std::collections::{HashMap, HashSet};
use tokio::task::JoinSet;
use tracing::{debug, instrument, warn};

use schemasync_core::error::{SyncError, SyncResult};
use schemasync_core::record::FieldValue;

use crate::plan::{RelationalField, SyncPlan};
use crate::sql::quote_identifier;

/// Result of validating one relational field value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceCheckResult {
    /// The value references an existing target row (or is empty).
    Valid,
    /// The value references nothing; the field must be cleared.
    Invalid { reason: String },
}

impl ReferenceCheckResult {
    /// Check if the value may be carried through.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, ReferenceCheckResult::Valid)
    }
}

/// Identifier sets per referenced (table, column).
#[derive(Debug, Default)]
pub struct ReferenceIndex {
    tables: HashMap<(String, String), TableKeys>,
}

#[derive(Debug)]
enum TableKeys {
    /// Full identifier set held in memory.
    Cached(HashSet<String>),
    /// Identifier set exceeded the cap; each value needs a probe query.
    Oversized,
}

/// Outcome of an in-memory lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// The index answers definitively.
    Known(bool),
    /// The table is not cached; a probe query is required.
    Probe,
}

impl ReferenceIndex {
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a table's identifier set, or mark it oversized.
    pub fn insert(
        &mut self,
        table: impl Into<String>,
        column: impl Into<String>,
        keys: Option<HashSet<String>>,
    ) {
        let slot = match keys {
            Some(keys) => TableKeys::Cached(keys),
            None => TableKeys::Oversized,
        };
        self.tables.insert((table.into(), column.into()), slot);
    }

    /// Look a key up.
    #[must_use]
    pub fn lookup(&self, table: &str, column: &str, key: &str) -> Lookup {
        match self.tables.get(&(table.to_string(), column.to_string())) {
            Some(TableKeys::Cached(keys)) => Lookup::Known(keys.contains(key)),
            Some(TableKeys::Oversized) | None => Lookup::Probe,
        }
    }
}

/// Validates relational field values against target data.
pub struct ReferenceValidator {
    pool: PgPool,
    index: ReferenceIndex,
}

impl ReferenceValidator {
    /// Prefetch identifier sets for every table the plan references.
    ///
    /// Reads run concurrently, one task per referenced table, bounded by
    /// the pool's connection limit. A referenced table that cannot be read
    /// (dropped in the target, for instance) is cached as empty: every
    /// reference into it is invalid, which is exactly what target data
    /// says.
    #[instrument(skip(pool, plan), fields(entity = %plan.entity))]
    pub async fn prefetch(pool: &PgPool, plan: &SyncPlan, max_cached: usize) -> SyncResult<Self> {
        let mut tasks: JoinSet<(String, String, Option<HashSet<String>>)> = JoinSet::new();

        for (table, column) in plan.referenced_tables() {
            let pool = pool.clone();
            tasks.spawn(async move {
                let keys = fetch_keys(&pool, &table, &column, max_cached).await;
                (table, column, keys)
            });
        }

        let mut index = ReferenceIndex::new();
        while let Some(joined) = tasks.join_next().await {
            let (table, column, keys) =
                joined.map_err(|e| SyncError::database_with_source("reference prefetch task failed", e))?;
            debug!(
                table = %table,
                cached = keys.as_ref().map(HashSet::len),
                "Reference identifiers prefetched"
            );
            index.insert(table, column, keys);
        }

        Ok(Self {
            pool: pool.clone(),
            index,
        })
    }

    /// Assemble a validator from an already-built index. Useful for tests
    /// and for callers that maintain their own identifier sets.
    #[must_use]
    pub fn from_parts(pool: PgPool, index: ReferenceIndex) -> Self {
        Self { pool, index }
    }

    /// Validate one relational field value.
    ///
    /// Empty values and values with no key form pass: absence is not a
    /// broken reference.
    pub async fn validate(
        &self,
        field: &RelationalField,
        value: &FieldValue,
    ) -> SyncResult<ReferenceCheckResult> {
        if value.is_null() {
            return Ok(ReferenceCheckResult::Valid);
        }
        let Some(key) = value.as_key() else {
            return Ok(ReferenceCheckResult::Valid);
        };

        let exists = match self
            .index
            .lookup(&field.target_table, &field.target_column, &key)
        {
            Lookup::Known(exists) => exists,
            Lookup::Probe => self.probe(field, &key).await?,
        };

        if exists {
            Ok(ReferenceCheckResult::Valid)
        } else {
            Ok(ReferenceCheckResult::Invalid {
                reason: format!(
                    "referenced row not found: {}.{} = {}",
                    field.target_table, field.target_column, key
                ),
            })
        }
    }

    /// Probe the target for one identifier value.
    async fn probe(&self, field: &RelationalField, key: &str) -> SyncResult<bool> {
        let query = format!(
            "SELECT 1 FROM {} WHERE {}::text = $1 LIMIT 1",
            quote_identifier(&field.target_table),
            quote_identifier(&field.target_column)
        );

        let row = sqlx::query(&query)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                SyncError::database_with_source(
                    format!("reference probe failed for {}", field.target_table),
                    e,
                )
            })?;

        Ok(row.is_some())
    }
}

/// Fetch a table's identifier set, or `None` when it exceeds the cap.
async fn fetch_keys(
    pool: &PgPool,
    table: &str,
    column: &str,
    max_cached: usize,
) -> Option<HashSet<String>> {
    let count_query = format!("SELECT COUNT(*) FROM {}", quote_identifier(table));
    let count: i64 = match sqlx::query_scalar(&count_query).fetch_one(pool).await {
        Ok(count) => count,
        Err(e) => {
            warn!(table = %table, error = %e, "Referenced table unreadable, treating as empty");
            return Some(HashSet::new());
        }
    };

    if count as usize > max_cached {
        debug!(table = %table, rows = count, "Identifier set exceeds cache cap, probing per value");
        return None;
    }

    let keys_query = format!(
        "SELECT {}::text FROM {}",
        quote_identifier(column),
        quote_identifier(table)
    );
    match sqlx::query_scalar::<_, Option<String>>(&keys_query)
        .fetch_all(pool)
        .await
    {
        Ok(keys) => Some(keys.into_iter().flatten().collect()),
        Err(e) => {
            warn!(table = %table, error = %e, "Identifier fetch failed, treating as empty");
            Some(HashSet::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn currency_field() -> RelationalField {
        RelationalField {
            column: "currency_id".to_string(),
            target_table: "res_currency".to_string(),
            target_column: "id".to_string(),
        }
    }

    fn index_with_currencies(keys: &[&str]) -> ReferenceIndex {
        let mut index = ReferenceIndex::new();
        index.insert(
            "res_currency",
            "id",
            Some(keys.iter().map(|k| (*k).to_string()).collect()),
        );
        index
    }

    #[test]
    fn test_lookup_cached_hit_and_miss() {
        let index = index_with_currencies(&["1", "2", "3"]);

        assert_eq!(index.lookup("res_currency", "id", "3"), Lookup::Known(true));
        assert_eq!(
            index.lookup("res_currency", "id", "999"),
            Lookup::Known(false)
        );
    }

    #[test]
    fn test_lookup_oversized_requires_probe() {
        let mut index = ReferenceIndex::new();
        index.insert("res_partner", "id", None);

        assert_eq!(index.lookup("res_partner", "id", "1"), Lookup::Probe);
    }

    #[test]
    fn test_lookup_unknown_table_requires_probe() {
        let index = ReferenceIndex::new();
        assert_eq!(index.lookup("res_users", "id", "1"), Lookup::Probe);
    }

    #[test]
    fn test_empty_table_rejects_everything() {
        let index = index_with_currencies(&[]);
        assert_eq!(
            index.lookup("res_currency", "id", "1"),
            Lookup::Known(false)
        );
    }

    #[tokio::test]
    async fn test_validate_against_cached_index() {
        // Pool is never touched when the index answers definitively.
        let pool = PgPool::connect_lazy("postgres://sync@localhost/never_used").unwrap();
        let validator = ReferenceValidator::from_parts(pool, index_with_currencies(&["3"]));

        let valid = validator
            .validate(&currency_field(), &FieldValue::Integer(3))
            .await
            .unwrap();
        assert!(valid.is_valid());

        let invalid = validator
            .validate(&currency_field(), &FieldValue::Integer(999))
            .await
            .unwrap();
        assert_eq!(
            invalid,
            ReferenceCheckResult::Invalid {
                reason: "referenced row not found: res_currency.id = 999".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_validate_null_and_unkeyable_pass() {
        let pool = PgPool::connect_lazy("postgres://sync@localhost/never_used").unwrap();
        let validator = ReferenceValidator::from_parts(pool, index_with_currencies(&[]));

        assert!(validator
            .validate(&currency_field(), &FieldValue::Null)
            .await
            .unwrap()
            .is_valid());
        assert!(validator
            .validate(&currency_field(), &FieldValue::Boolean(false))
            .await
            .unwrap()
            .is_valid());
    }
}
