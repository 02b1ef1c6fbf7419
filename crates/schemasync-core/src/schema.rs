//! Schema snapshots
//!
//! Column metadata for one entity's table in one database, captured fresh at
//! the start of every run. Snapshots from the two databases are the only
//! input to sync-plan computation: column-name identity is trusted, declared
//! type names are informational only and never compared across databases.

use serde::{Deserialize, Serialize};

use crate::descriptor::Entity;

/// Scalar storage class of a column, derived from its declared SQL type or
/// from an application field registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarKind {
    /// Character data.
    Text,
    /// Integer data.
    Integer,
    /// Approximate or exact numeric data.
    Float,
    /// Boolean data.
    Boolean,
    /// Date without time of day.
    Date,
    /// Timestamp data.
    DateTime,
    /// Raw bytes.
    Binary,
}

impl ScalarKind {
    /// Classify a declared SQL type name (`information_schema` form).
    #[must_use]
    pub fn from_sql_type(sql_type: &str) -> ScalarKind {
        let lower = sql_type.to_lowercase();

        if lower.contains("int") || lower.contains("serial") {
            ScalarKind::Integer
        } else if lower.contains("float")
            || lower.contains("double")
            || lower.contains("real")
            || lower.contains("decimal")
            || lower.contains("numeric")
        {
            ScalarKind::Float
        } else if lower.contains("bool") {
            ScalarKind::Boolean
        } else if lower.contains("bytea") || lower.contains("blob") || lower.contains("binary") {
            ScalarKind::Binary
        } else if lower.contains("timestamp") || lower.contains("datetime") {
            ScalarKind::DateTime
        } else if lower.contains("date") {
            ScalarKind::Date
        } else {
            ScalarKind::Text
        }
    }

    /// Classify an application field-registry type name. Returns `None` for
    /// registry types that are not stored as plain scalar columns.
    #[must_use]
    pub fn from_registry_type(registry_type: &str) -> Option<ScalarKind> {
        match registry_type {
            "char" | "text" | "html" | "selection" => Some(ScalarKind::Text),
            "integer" => Some(ScalarKind::Integer),
            "float" | "monetary" => Some(ScalarKind::Float),
            "boolean" => Some(ScalarKind::Boolean),
            "date" => Some(ScalarKind::Date),
            "datetime" => Some(ScalarKind::DateTime),
            "binary" => Some(ScalarKind::Binary),
            _ => None,
        }
    }
}

/// Whether a column holds plain data or a reference to another table's row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldKind {
    /// Directly copyable value.
    Scalar { scalar: ScalarKind },
    /// Value expected to reference a row identity in another table.
    Relation {
        /// Referenced storage table.
        target_table: String,
        /// Referenced column (the target table's identity).
        target_column: String,
    },
}

impl FieldKind {
    /// Create a scalar kind.
    #[must_use]
    pub fn scalar(scalar: ScalarKind) -> Self {
        FieldKind::Scalar { scalar }
    }

    /// Create a relation kind referencing `target_table.target_column`.
    pub fn relation(target_table: impl Into<String>, target_column: impl Into<String>) -> Self {
        FieldKind::Relation {
            target_table: target_table.into(),
            target_column: target_column.into(),
        }
    }

    /// Check if this is a relation.
    #[must_use]
    pub fn is_relation(&self) -> bool {
        matches!(self, FieldKind::Relation { .. })
    }
}

/// Metadata for one column of an entity's table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMeta {
    /// Column name.
    pub name: String,
    /// Declared type as reported by the database. Informational only.
    pub declared_type: String,
    /// Scalar or relation classification.
    pub kind: FieldKind,
    /// Whether the column accepts writes. Computed/generated columns are
    /// not storable and must never appear in a generated statement.
    pub storable: bool,
}

impl ColumnMeta {
    /// Create a storable scalar column.
    pub fn scalar(
        name: impl Into<String>,
        declared_type: impl Into<String>,
        scalar: ScalarKind,
    ) -> Self {
        Self {
            name: name.into(),
            declared_type: declared_type.into(),
            kind: FieldKind::scalar(scalar),
            storable: true,
        }
    }

    /// Create a storable relation column.
    pub fn relation(
        name: impl Into<String>,
        declared_type: impl Into<String>,
        target_table: impl Into<String>,
        target_column: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            declared_type: declared_type.into(),
            kind: FieldKind::relation(target_table, target_column),
            storable: true,
        }
    }

    /// Mark the column computed/non-storable.
    #[must_use]
    pub fn computed(mut self) -> Self {
        self.storable = false;
        self
    }

    /// The referenced table, if this column is a relation.
    #[must_use]
    pub fn relation_target(&self) -> Option<&str> {
        match &self.kind {
            FieldKind::Relation { target_table, .. } => Some(target_table),
            FieldKind::Scalar { .. } => None,
        }
    }
}

/// Column metadata for one entity's table in one database.
///
/// Produced fresh per run and owned by a single synchronizer invocation;
/// never cached across runs, since the target schema can change between
/// deployments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    /// The entity whose table was introspected.
    pub entity: Entity,
    /// Identifier of the database the snapshot was taken from.
    pub database: String,
    /// Columns in catalog ordinal order.
    pub columns: Vec<ColumnMeta>,
}

impl SchemaSnapshot {
    /// Create a new snapshot.
    pub fn new(entity: Entity, database: impl Into<String>, columns: Vec<ColumnMeta>) -> Self {
        Self {
            entity,
            database: database.into(),
            columns,
        }
    }

    /// Look up a column by name.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColumnMeta> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Check whether a column exists.
    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Check if the snapshot has no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_kind_from_sql_type() {
        assert_eq!(ScalarKind::from_sql_type("integer"), ScalarKind::Integer);
        assert_eq!(ScalarKind::from_sql_type("BIGINT"), ScalarKind::Integer);
        assert_eq!(ScalarKind::from_sql_type("numeric"), ScalarKind::Float);
        assert_eq!(
            ScalarKind::from_sql_type("double precision"),
            ScalarKind::Float
        );
        assert_eq!(ScalarKind::from_sql_type("boolean"), ScalarKind::Boolean);
        assert_eq!(ScalarKind::from_sql_type("bytea"), ScalarKind::Binary);
        assert_eq!(
            ScalarKind::from_sql_type("timestamp without time zone"),
            ScalarKind::DateTime
        );
        assert_eq!(ScalarKind::from_sql_type("date"), ScalarKind::Date);
        assert_eq!(
            ScalarKind::from_sql_type("character varying"),
            ScalarKind::Text
        );
        assert_eq!(ScalarKind::from_sql_type("custom_type"), ScalarKind::Text);
    }

    #[test]
    fn test_scalar_kind_from_registry_type() {
        assert_eq!(
            ScalarKind::from_registry_type("char"),
            Some(ScalarKind::Text)
        );
        assert_eq!(
            ScalarKind::from_registry_type("monetary"),
            Some(ScalarKind::Float)
        );
        assert_eq!(
            ScalarKind::from_registry_type("datetime"),
            Some(ScalarKind::DateTime)
        );
        assert_eq!(ScalarKind::from_registry_type("many2one"), None);
        assert_eq!(ScalarKind::from_registry_type("one2many"), None);
    }

    #[test]
    fn test_column_meta() {
        let column = ColumnMeta::relation("currency_id", "integer", "res_currency", "id");
        assert!(column.kind.is_relation());
        assert_eq!(column.relation_target(), Some("res_currency"));
        assert!(column.storable);

        let computed = ColumnMeta::scalar("display_name", "varchar", ScalarKind::Text).computed();
        assert!(!computed.storable);
        assert_eq!(computed.relation_target(), None);
    }

    #[test]
    fn test_snapshot_lookup() {
        let snapshot = SchemaSnapshot::new(
            Entity::Partner,
            "erp_v16",
            vec![
                ColumnMeta::scalar("id", "integer", ScalarKind::Integer),
                ColumnMeta::scalar("name", "varchar", ScalarKind::Text),
            ],
        );

        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.has_column("name"));
        assert!(!snapshot.has_column("mobile"));
        assert_eq!(
            snapshot.column("id").map(|c| &c.kind),
            Some(&FieldKind::scalar(ScalarKind::Integer))
        );
    }
}
