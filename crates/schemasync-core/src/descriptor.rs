//! Entity descriptors
//!
//! The engine is one generic synchronizer parameterized by a per-entity
//! descriptor: storage table, logical model name, identity column, recency
//! column, and the row matching / conflict policies. Descriptors are plain
//! configuration, deserializable from stored settings.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A business entity subject to synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Entity {
    /// Operating companies.
    Organization,
    /// Business partners (customers, suppliers, contacts).
    Partner,
    /// Sellable products.
    Product,
    /// Sales orders.
    Sale,
}

impl Entity {
    /// Convert to string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Entity::Organization => "organization",
            Entity::Partner => "partner",
            Entity::Product => "product",
            Entity::Sale => "sale",
        }
    }

    /// All entities in dependency order: later entities hold references
    /// that must already exist in the target when they are validated.
    #[must_use]
    pub fn ordered() -> [Entity; 4] {
        [
            Entity::Organization,
            Entity::Partner,
            Entity::Product,
            Entity::Sale,
        ]
    }

    /// Default descriptor for this entity.
    #[must_use]
    pub fn descriptor(&self) -> EntityDescriptor {
        match self {
            Entity::Organization => EntityDescriptor::new(*self, "res_company", "res.company")
                .with_match_policy(MatchPolicy::Name),
            Entity::Partner => EntityDescriptor::new(*self, "res_partner", "res.partner"),
            Entity::Product => {
                EntityDescriptor::new(*self, "product_template", "product.template")
            }
            Entity::Sale => EntityDescriptor::new(*self, "sale_order", "sale.order"),
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Entity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "organization" | "organizations" | "company" | "companies" => Ok(Entity::Organization),
            "partner" | "partners" => Ok(Entity::Partner),
            "product" | "products" => Ok(Entity::Product),
            "sale" | "sales" => Ok(Entity::Sale),
            _ => Err(format!("Unknown entity: {s}")),
        }
    }
}

/// How an incoming row is matched against existing target rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MatchPolicy {
    /// Match by the identity column value.
    #[default]
    Identifier,
    /// Match by the `name` column. Used where row identifiers were not
    /// stable across deployments.
    Name,
}

impl MatchPolicy {
    /// Convert to string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchPolicy::Identifier => "identifier",
            MatchPolicy::Name => "name",
        }
    }
}

/// What happens when an incoming row matches an existing target row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Write only when the source recency marker is strictly newer than the
    /// target's. Repeated runs against unchanged data become no-ops.
    #[default]
    IfNewer,
    /// Write unconditionally.
    Overwrite,
}

impl ConflictPolicy {
    /// Convert to string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictPolicy::IfNewer => "if_newer",
            ConflictPolicy::Overwrite => "overwrite",
        }
    }
}

/// Per-entity synchronization parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityDescriptor {
    /// The entity this descriptor parameterizes.
    pub entity: Entity,

    /// Storage table name in both databases.
    pub table: String,

    /// Logical model name used to look the entity up in an application
    /// field registry, where one is configured.
    pub model: String,

    /// Column holding the stable row identity.
    #[serde(default = "default_identity_column")]
    pub identity_column: String,

    /// Column holding the last-modified timestamp, if the schema carries
    /// one.
    #[serde(default = "default_recency_column")]
    pub recency_column: Option<String>,

    /// How incoming rows are matched against target rows.
    #[serde(default)]
    pub match_policy: MatchPolicy,

    /// What to do when a match is found.
    #[serde(default)]
    pub conflict_policy: ConflictPolicy,
}

fn default_identity_column() -> String {
    "id".to_string()
}

fn default_recency_column() -> Option<String> {
    Some("write_date".to_string())
}

impl EntityDescriptor {
    /// Create a descriptor with default identity/recency columns and
    /// policies.
    pub fn new(entity: Entity, table: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            entity,
            table: table.into(),
            model: model.into(),
            identity_column: default_identity_column(),
            recency_column: default_recency_column(),
            match_policy: MatchPolicy::default(),
            conflict_policy: ConflictPolicy::default(),
        }
    }

    /// Set the identity column.
    pub fn with_identity_column(mut self, column: impl Into<String>) -> Self {
        self.identity_column = column.into();
        self
    }

    /// Set the recency column.
    pub fn with_recency_column(mut self, column: impl Into<String>) -> Self {
        self.recency_column = Some(column.into());
        self
    }

    /// Declare that the schema carries no recency marker.
    #[must_use]
    pub fn without_recency_column(mut self) -> Self {
        self.recency_column = None;
        self
    }

    /// Set the match policy.
    #[must_use]
    pub fn with_match_policy(mut self, policy: MatchPolicy) -> Self {
        self.match_policy = policy;
        self
    }

    /// Set the conflict policy.
    #[must_use]
    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    /// The column incoming rows are matched on.
    #[must_use]
    pub fn match_column(&self) -> &str {
        match self.match_policy {
            MatchPolicy::Identifier => &self.identity_column,
            MatchPolicy::Name => "name",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_roundtrip() {
        for entity in Entity::ordered() {
            let s = entity.as_str();
            let parsed: Entity = s.parse().unwrap();
            assert_eq!(entity, parsed);
        }
    }

    #[test]
    fn test_entity_parse_aliases() {
        assert_eq!("organizations".parse::<Entity>().unwrap(), Entity::Organization);
        assert_eq!("Sales".parse::<Entity>().unwrap(), Entity::Sale);
        assert!("invoice".parse::<Entity>().is_err());
    }

    #[test]
    fn test_dependency_order() {
        let order = Entity::ordered();
        assert_eq!(order[0], Entity::Organization);
        assert_eq!(order[3], Entity::Sale);
    }

    #[test]
    fn test_default_descriptors() {
        let org = Entity::Organization.descriptor();
        assert_eq!(org.table, "res_company");
        assert_eq!(org.match_policy, MatchPolicy::Name);
        assert_eq!(org.match_column(), "name");

        let sale = Entity::Sale.descriptor();
        assert_eq!(sale.table, "sale_order");
        assert_eq!(sale.model, "sale.order");
        assert_eq!(sale.match_policy, MatchPolicy::Identifier);
        assert_eq!(sale.match_column(), "id");
        assert_eq!(sale.recency_column.as_deref(), Some("write_date"));
        assert_eq!(sale.conflict_policy, ConflictPolicy::IfNewer);
    }

    #[test]
    fn test_descriptor_builders() {
        let descriptor = EntityDescriptor::new(Entity::Product, "catalog_item", "catalog.item")
            .with_identity_column("item_id")
            .without_recency_column()
            .with_conflict_policy(ConflictPolicy::Overwrite);

        assert_eq!(descriptor.identity_column, "item_id");
        assert_eq!(descriptor.match_column(), "item_id");
        assert!(descriptor.recency_column.is_none());
        assert_eq!(descriptor.conflict_policy, ConflictPolicy::Overwrite);
    }

    #[test]
    fn test_descriptor_deserialization_defaults() {
        let descriptor: EntityDescriptor = serde_json::from_str(
            r#"{"entity": "partner", "table": "res_partner", "model": "res.partner"}"#,
        )
        .unwrap();

        assert_eq!(descriptor.identity_column, "id");
        assert_eq!(descriptor.match_policy, MatchPolicy::Identifier);
        assert_eq!(descriptor.conflict_policy, ConflictPolicy::IfNewer);
    }
}
