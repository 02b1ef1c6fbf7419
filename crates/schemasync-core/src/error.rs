//! Synchronization error types
//!
//! Error definitions with fatal/recovered classification: row-level errors
//! are recovered inside an entity run, entity-level errors abort one entity,
//! run-level errors abort the whole run.

use thiserror::Error;

/// Error that can occur during a synchronization run.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The entity's storage table (or its metadata) does not exist in the
    /// given database. Fatal for that entity's run.
    #[error("schema unavailable: no table '{table}' for entity '{entity}' in database '{database}'")]
    SchemaUnavailable {
        entity: String,
        table: String,
        database: String,
    },

    /// A database connection could not be opened. Fatal for the whole run.
    #[error("connection unavailable: {database}")]
    ConnectionUnavailable {
        database: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A relational field value does not exist in the target's referenced
    /// table. Recovered: the field is cleared and the row still syncs.
    #[error("reference resolution failed: {field} = {value} not found in {referenced_table}")]
    ReferenceResolution {
        field: String,
        value: String,
        referenced_table: String,
    },

    /// Writing one row to the target failed. Recovered: the row is recorded
    /// as a failure and processing continues with the next row.
    #[error("row write failed for {entity} identity {identity}: {message}")]
    RowWrite {
        entity: String,
        identity: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Engine or descriptor configuration is invalid.
    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    /// The run was cancelled between rows.
    #[error("synchronization cancelled")]
    Cancelled,

    /// Any other database fault (metadata query failed, transaction could
    /// not be opened or committed).
    #[error("database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Serialization error (reports, ledger payloads).
    #[error("serialization error: {message}")]
    Serialization { message: String },
}

impl SyncError {
    /// Check if this error is recovered inside the row loop: the affected
    /// row (or field) is recorded and processing continues.
    pub fn is_recovered(&self) -> bool {
        matches!(
            self,
            SyncError::ReferenceResolution { .. } | SyncError::RowWrite { .. }
        )
    }

    /// Check if this error aborts a single entity's run while siblings
    /// continue.
    pub fn is_fatal_for_entity(&self) -> bool {
        matches!(
            self,
            SyncError::SchemaUnavailable { .. }
                | SyncError::Database { .. }
                | SyncError::Cancelled
        )
    }

    /// Check if this error aborts the whole run before any entity starts.
    pub fn is_fatal_for_run(&self) -> bool {
        matches!(
            self,
            SyncError::ConnectionUnavailable { .. } | SyncError::InvalidConfiguration { .. }
        )
    }

    /// Get an error code for classification.
    pub fn error_code(&self) -> &'static str {
        match self {
            SyncError::SchemaUnavailable { .. } => "SCHEMA_UNAVAILABLE",
            SyncError::ConnectionUnavailable { .. } => "CONNECTION_UNAVAILABLE",
            SyncError::ReferenceResolution { .. } => "REFERENCE_RESOLUTION",
            SyncError::RowWrite { .. } => "ROW_WRITE",
            SyncError::InvalidConfiguration { .. } => "INVALID_CONFIGURATION",
            SyncError::Cancelled => "CANCELLED",
            SyncError::Database { .. } => "DATABASE_ERROR",
            SyncError::Serialization { .. } => "SERIALIZATION_ERROR",
        }
    }

    // Convenience constructors

    /// Create a schema-unavailable error.
    pub fn schema_unavailable(
        entity: impl Into<String>,
        table: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        SyncError::SchemaUnavailable {
            entity: entity.into(),
            table: table.into(),
            database: database.into(),
        }
    }

    /// Create a connection-unavailable error.
    pub fn connection_unavailable(database: impl Into<String>) -> Self {
        SyncError::ConnectionUnavailable {
            database: database.into(),
            source: None,
        }
    }

    /// Create a connection-unavailable error with source.
    pub fn connection_unavailable_with_source(
        database: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        SyncError::ConnectionUnavailable {
            database: database.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a row-write error.
    pub fn row_write(
        entity: impl Into<String>,
        identity: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        SyncError::RowWrite {
            entity: entity.into(),
            identity: identity.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create a row-write error with source.
    pub fn row_write_with_source(
        entity: impl Into<String>,
        identity: impl Into<String>,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        SyncError::RowWrite {
            entity: entity.into(),
            identity: identity.into(),
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an invalid-configuration error.
    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        SyncError::InvalidConfiguration {
            message: message.into(),
        }
    }

    /// Create a database error.
    pub fn database(message: impl Into<String>) -> Self {
        SyncError::Database {
            message: message.into(),
            source: None,
        }
    }

    /// Create a database error with source.
    pub fn database_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        SyncError::Database {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Result type for synchronization operations.
pub type SyncResult<T> = Result<T, SyncError>;
