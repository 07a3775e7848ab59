//! Error types for the aggregation engine.
//!
//! Collaborator traits return `anyhow::Error`; the engine wraps each failure
//! with the sub-fetch it came from so callers and metrics can tell which data
//! source broke. A failing fetch aborts the whole `find` call — partial
//! results are never returned.

use thiserror::Error;

/// The sub-fetch a failure originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchSource {
    BaseEntities,
    AttributeValues,
    Relationships,
    Enrollments,
    Events,
    ProgramOwners,
    OwnedEntities,
    TypeAttributes,
    ProgramAttributes,
    EntityTypeAcl,
    ProgramAcl,
    ProgramStageAcl,
    RelationshipTypeAcl,
}

impl FetchSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchSource::BaseEntities => "base_entities",
            FetchSource::AttributeValues => "attribute_values",
            FetchSource::Relationships => "relationships",
            FetchSource::Enrollments => "enrollments",
            FetchSource::Events => "events",
            FetchSource::ProgramOwners => "program_owners",
            FetchSource::OwnedEntities => "owned_entities",
            FetchSource::TypeAttributes => "type_attributes",
            FetchSource::ProgramAttributes => "program_attributes",
            FetchSource::EntityTypeAcl => "entity_type_acl",
            FetchSource::ProgramAcl => "program_acl",
            FetchSource::ProgramStageAcl => "program_stage_acl",
            FetchSource::RelationshipTypeAcl => "relationship_type_acl",
        }
    }
}

impl std::fmt::Display for FetchSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum AggregateError {
    /// Rejected before any fetch is launched.
    #[error("entity key set must not be empty")]
    EmptyKeySet,

    /// An underlying storage or metadata call failed.
    #[error("{fetch} fetch failed: {message}")]
    Fetch { fetch: FetchSource, message: String },

    /// A spawned fetch task panicked or was aborted.
    #[error("{fetch} fetch task aborted: {message}")]
    TaskFailed { fetch: FetchSource, message: String },
}

impl AggregateError {
    pub fn fetch(fetch: FetchSource, err: anyhow::Error) -> Self {
        Self::Fetch {
            fetch,
            message: format!("{err:#}"),
        }
    }

    pub fn task_failed(fetch: FetchSource, err: tokio::task::JoinError) -> Self {
        Self::TaskFailed {
            fetch,
            message: err.to_string(),
        }
    }

    /// Which sub-fetch failed, if the error came out of one.
    pub fn failed_fetch(&self) -> Option<FetchSource> {
        match self {
            AggregateError::EmptyKeySet => None,
            AggregateError::Fetch { fetch, .. } | AggregateError::TaskFailed { fetch, .. } => {
                Some(*fetch)
            }
        }
    }

    /// Error category used as a metrics label.
    pub fn category(&self) -> &'static str {
        match self {
            AggregateError::EmptyKeySet => "invalid_input",
            AggregateError::Fetch { .. } => "fetch_error",
            AggregateError::TaskFailed { .. } => "task_failed",
        }
    }
}
