//! Update pipeline errors
//!
//! Every error raised while fetching or persisting carries a scope that
//! decides how far it propagates: a record-scoped error skips one record,
//! a provider-scoped error ends that provider's run, and a run-scoped error
//! (interruption) stops everything.

use thiserror::Error;

use crate::models::RecordType;
use crate::storage::StorageError;

/// How far an error propagates through the update pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorScope {
    /// Skip the current record and continue with the next candidate
    Record,
    /// Abort the current provider and continue with the next one
    Provider,
    /// Stop the whole run
    Run,
}

/// Errors raised by providers, the identity resolver and the orchestrator
#[derive(Error, Debug)]
pub enum SyncError {
    /// Missing settings, or a record that cannot be identified
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Network or parse failure talking to an external source
    #[error("Fetch failed for provider '{provider}': {message}")]
    Fetch { provider: String, message: String },

    /// An identity lookup matched something that cannot be this record
    #[error("Ambiguous upsert for {record_type} (source id '{source_id}'): {details}")]
    UpsertAmbiguity {
        record_type: RecordType,
        source_id: String,
        details: String,
    },

    /// Failure inside a record's persist unit
    #[error("Failed to process {record_type} record: {message}")]
    RecordProcessing {
        record_type: RecordType,
        message: String,
    },

    /// Storage failure
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The process was asked to shut down
    #[error("Update interrupted")]
    Interrupted,
}

impl SyncError {
    pub fn fetch(provider: impl Into<String>, message: impl ToString) -> Self {
        SyncError::Fetch {
            provider: provider.into(),
            message: message.to_string(),
        }
    }

    pub fn processing(record_type: RecordType, message: impl ToString) -> Self {
        SyncError::RecordProcessing {
            record_type,
            message: message.to_string(),
        }
    }

    /// Classify how far this error propagates
    pub fn scope(&self) -> ErrorScope {
        match self {
            SyncError::Interrupted => ErrorScope::Run,
            SyncError::Fetch { .. } => ErrorScope::Provider,
            SyncError::Configuration(_)
            | SyncError::UpsertAmbiguity { .. }
            | SyncError::RecordProcessing { .. }
            | SyncError::Storage(_) => ErrorScope::Record,
        }
    }

    /// Whether the whole run must stop
    pub fn is_fatal(&self) -> bool {
        self.scope() == ErrorScope::Run
    }
}

impl From<rusqlite::Error> for SyncError {
    fn from(error: rusqlite::Error) -> Self {
        SyncError::Storage(StorageError::Database(error))
    }
}

/// Result type for pipeline operations
pub type SyncResult<T> = Result<T, SyncError>;
