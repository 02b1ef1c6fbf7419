//! Schema introspection
//!
//! Captures a fresh [`SchemaSnapshot`] for one entity's table in one
//! database. Column names and declared types come from the catalog;
//! relational classification comes from the hosted application's field
//! registry when one is configured, falling back to foreign-key
//! constraints. Type names are never compared across databases — only
//! column-name identity is trusted downstream.

use sqlx::{PgPool, Row};
use std::collections::BTreeMap;
use tracing::{debug, instrument, warn};

use schemasync_core::descriptor::EntityDescriptor;
use schemasync_core::error::{SyncError, SyncResult};
use schemasync_core::schema::{ColumnMeta, ScalarKind, SchemaSnapshot};

use crate::sql::quote_identifier;

const COLUMNS_QUERY: &str = r"
    SELECT column_name, data_type, is_generated
    FROM information_schema.columns
    WHERE table_name = $1
    ORDER BY ordinal_position
";

const FOREIGN_KEYS_QUERY: &str = r"
    SELECT
        kcu.column_name,
        ccu.table_name AS foreign_table_name,
        ccu.column_name AS foreign_column_name
    FROM information_schema.table_constraints tc
    JOIN information_schema.key_column_usage kcu
      ON tc.constraint_name = kcu.constraint_name
    JOIN information_schema.constraint_column_usage ccu
      ON tc.constraint_name = ccu.constraint_name
    WHERE tc.table_name = $1
      AND tc.constraint_type = 'FOREIGN KEY'
";

/// One row of an application field registry.
#[derive(Debug, Clone)]
struct RegistryEntry {
    ttype: String,
    relation: Option<String>,
    store: bool,
}

/// A foreign-key reference discovered from table constraints.
#[derive(Debug, Clone)]
struct ForeignKeyRef {
    table: String,
    column: String,
}

/// Take a schema snapshot for one entity's table.
///
/// Fails with [`SyncError::SchemaUnavailable`] when the table has no
/// columns in this database's catalog.
#[instrument(skip(pool), fields(entity = %descriptor.entity, table = %descriptor.table))]
pub async fn snapshot(
    descriptor: &EntityDescriptor,
    pool: &PgPool,
    database_id: &str,
    field_registry: Option<&str>,
) -> SyncResult<SchemaSnapshot> {
    let rows = sqlx::query(COLUMNS_QUERY)
        .bind(&descriptor.table)
        .fetch_all(pool)
        .await
        .map_err(|e| {
            SyncError::database_with_source(
                format!("failed to read column metadata for {}", descriptor.table),
                e,
            )
        })?;

    if rows.is_empty() {
        return Err(SyncError::schema_unavailable(
            descriptor.entity.as_str(),
            &descriptor.table,
            database_id,
        ));
    }

    let registry = match field_registry {
        Some(table) => load_registry(pool, table, &descriptor.model).await,
        None => BTreeMap::new(),
    };
    let foreign_keys = load_foreign_keys(pool, &descriptor.table).await?;

    let mut columns = Vec::with_capacity(rows.len());
    for row in &rows {
        let name: String = row.try_get("column_name").unwrap_or_default();
        let data_type: String = row.try_get("data_type").unwrap_or_default();
        let generated = row
            .try_get::<String, _>("is_generated")
            .map(|g| g == "ALWAYS")
            .unwrap_or(false);

        columns.push(classify_column(
            &name,
            &data_type,
            generated,
            registry.get(&name),
            foreign_keys.get(&name),
        ));
    }

    debug!(
        database = %database_id,
        columns = columns.len(),
        registry_entries = registry.len(),
        "Schema snapshot taken"
    );

    Ok(SchemaSnapshot::new(descriptor.entity, database_id, columns))
}

/// Classify one catalog column using registry metadata when available,
/// foreign keys otherwise, declared SQL type as the last resort.
fn classify_column(
    name: &str,
    data_type: &str,
    generated: bool,
    registry: Option<&RegistryEntry>,
    foreign_key: Option<&ForeignKeyRef>,
) -> ColumnMeta {
    let mut column = match registry {
        Some(entry) if entry.ttype == "many2one" => match &entry.relation {
            Some(model) => ColumnMeta::relation(name, data_type, model_to_table(model), "id"),
            None => match foreign_key {
                Some(fk) => ColumnMeta::relation(name, data_type, &fk.table, &fk.column),
                None => ColumnMeta::scalar(name, data_type, ScalarKind::from_sql_type(data_type)),
            },
        },
        Some(entry) => {
            let scalar = ScalarKind::from_registry_type(&entry.ttype)
                .unwrap_or_else(|| ScalarKind::from_sql_type(data_type));
            ColumnMeta::scalar(name, data_type, scalar)
        }
        None => match foreign_key {
            Some(fk) => ColumnMeta::relation(name, data_type, &fk.table, &fk.column),
            None => ColumnMeta::scalar(name, data_type, ScalarKind::from_sql_type(data_type)),
        },
    };

    if generated || registry.is_some_and(|entry| !entry.store) {
        column = column.computed();
    }

    column
}

/// Map a logical model name to its storage table.
fn model_to_table(model: &str) -> String {
    model.replace('.', "_")
}

/// Load `(name, ttype, relation, store)` rows for one logical model from
/// the application field registry. A missing or unreadable registry is not
/// fatal; classification falls back to foreign keys.
async fn load_registry(
    pool: &PgPool,
    registry_table: &str,
    model: &str,
) -> BTreeMap<String, RegistryEntry> {
    let query = format!(
        "SELECT name, ttype, relation, store FROM {} WHERE model = $1",
        quote_identifier(registry_table)
    );

    match sqlx::query(&query).bind(model).fetch_all(pool).await {
        Ok(rows) => rows
            .iter()
            .map(|row| {
                let name: String = row.try_get("name").unwrap_or_default();
                let entry = RegistryEntry {
                    ttype: row.try_get("ttype").unwrap_or_default(),
                    relation: row.try_get("relation").ok().flatten(),
                    store: row.try_get("store").unwrap_or(true),
                };
                (name, entry)
            })
            .collect(),
        Err(e) => {
            warn!(
                registry = %registry_table,
                model = %model,
                error = %e,
                "Field registry unreadable, falling back to constraint metadata"
            );
            BTreeMap::new()
        }
    }
}

/// Load foreign-key references for a table from the constraint catalog.
async fn load_foreign_keys(pool: &PgPool, table: &str) -> SyncResult<BTreeMap<String, ForeignKeyRef>> {
    let rows = sqlx::query(FOREIGN_KEYS_QUERY)
        .bind(table)
        .fetch_all(pool)
        .await
        .map_err(|e| {
            SyncError::database_with_source(
                format!("failed to read foreign keys for {table}"),
                e,
            )
        })?;

    Ok(rows
        .iter()
        .map(|row| {
            let column: String = row.try_get("column_name").unwrap_or_default();
            let reference = ForeignKeyRef {
                table: row.try_get("foreign_table_name").unwrap_or_default(),
                column: row.try_get("foreign_column_name").unwrap_or_default(),
            };
            (column, reference)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemasync_core::schema::FieldKind;

    fn registry(ttype: &str, relation: Option<&str>, store: bool) -> RegistryEntry {
        RegistryEntry {
            ttype: ttype.to_string(),
            relation: relation.map(str::to_string),
            store,
        }
    }

    #[test]
    fn test_model_to_table() {
        assert_eq!(model_to_table("res.currency"), "res_currency");
        assert_eq!(model_to_table("product.template"), "product_template");
        assert_eq!(model_to_table("plain"), "plain");
    }

    #[test]
    fn test_classify_from_registry_relation() {
        let column = classify_column(
            "currency_id",
            "integer",
            false,
            Some(&registry("many2one", Some("res.currency"), true)),
            None,
        );

        assert_eq!(
            column.kind,
            FieldKind::relation("res_currency", "id")
        );
        assert!(column.storable);
    }

    #[test]
    fn test_classify_from_registry_scalar() {
        let column = classify_column(
            "name",
            "character varying",
            false,
            Some(&registry("char", None, true)),
            None,
        );
        assert_eq!(column.kind, FieldKind::scalar(ScalarKind::Text));
    }

    #[test]
    fn test_classify_non_stored_registry_field() {
        let column = classify_column(
            "display_name",
            "character varying",
            false,
            Some(&registry("char", None, false)),
            None,
        );
        assert!(!column.storable);
    }

    #[test]
    fn test_classify_from_foreign_key_without_registry() {
        let fk = ForeignKeyRef {
            table: "res_company".to_string(),
            column: "id".to_string(),
        };
        let column = classify_column("company_id", "integer", false, None, Some(&fk));

        assert_eq!(column.kind, FieldKind::relation("res_company", "id"));
    }

    #[test]
    fn test_classify_generated_column() {
        let column = classify_column("search_vector", "tsvector", true, None, None);
        assert!(!column.storable);
        assert_eq!(column.kind, FieldKind::scalar(ScalarKind::Text));
    }

    #[test]
    fn test_registry_relation_missing_falls_back_to_fk() {
        let fk = ForeignKeyRef {
            table: "res_users".to_string(),
            column: "id".to_string(),
        };
        let column = classify_column(
            "user_id",
            "integer",
            false,
            Some(&registry("many2one", None, true)),
            Some(&fk),
        );
        assert_eq!(column.kind, FieldKind::relation("res_users", "id"));
    }
}
