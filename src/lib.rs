//! Concurrent aggregation engine for tracked entities.
//!
//! Assembles a complete, access-controlled view of each requested entity by
//! fetching its sub-resources (attribute values, enrollments, events,
//! relationships, program owners) concurrently from a pluggable storage
//! collaborator, resolving the caller's authorization scope through a
//! per-user cache, and merging everything in one deterministic, security-
//! filtering pass.
//!
//! ```no_run
//! use std::sync::Arc;
//! use tracker_aggregate::{
//!     Caller, EngineConfig, EntityKey, FetchParams, TrackedEntityAggregate,
//! };
//! # async fn example(
//! #     store: Arc<dyn tracker_aggregate::EntityStore>,
//! #     acl: Arc<dyn tracker_aggregate::AclStore>,
//! #     meta: Arc<dyn tracker_aggregate::AttributeMetadataStore>,
//! # ) -> anyhow::Result<()> {
//! let config = EngineConfig::default();
//! let aggregate = TrackedEntityAggregate::with_stores(store, acl, meta, &config);
//!
//! let entities = aggregate
//!     .find(
//!         &[EntityKey::new("E1"), EntityKey::new("E2")],
//!         FetchParams {
//!             include_enrollments: true,
//!             ..Default::default()
//!         },
//!         Caller::user("u1", ["district-team".to_string()]),
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod acl;
pub mod aggregate;
pub mod attributes;
pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod merge;
pub mod metrics;
pub mod model;
pub mod store;

pub use acl::AclStore;
pub use aggregate::TrackedEntityAggregate;
pub use attributes::AttributeVisibility;
pub use config::EngineConfig;
pub use context::{AccessContext, AccessScope, Caller, ContextCache};
pub use error::{AggregateError, FetchSource};
pub use logging::{LogFormat, LogOutput, LoggingConfig, init_logging};
pub use metrics::METRICS;
pub use model::{
    AttributeId, AttributeValue, Enrollment, EnrollmentStatus, EntityKey, Event, EventStatus,
    FetchParams, ProgramId, ProgramOwner, Relationship, RelationshipItem, TrackedEntity, UserId,
};
pub use store::{AttributeMetadataStore, EntityMap, EntityStore, Multimap};
