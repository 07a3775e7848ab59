//! Storage collaborator boundary.
//!
//! Every fetch is keyed by root entity and returns a multimap; the engine
//! runs sibling fetches concurrently against the same store, so
//! implementations must not share mutable state between calls. Fetches never
//! filter — access filtering happens exclusively at merge time.

use crate::context::AccessContext;
use crate::model::{
    AttributeId, AttributeValue, Enrollment, EntityKey, Event, ProgramId, ProgramOwner,
    Relationship, TrackedEntity,
};
use ahash::{AHashMap, AHashSet};
use anyhow::Result;
use async_trait::async_trait;
use indexmap::IndexMap;

/// One-to-many mapping from root entity key to fetched values. Keys are
/// unique; duplicate values per key are permitted.
pub type Multimap<V> = AHashMap<EntityKey, Vec<V>>;

/// Base entity records in the order the store produced them. Result ordering
/// of a `find` call follows this order, not the caller's input order.
pub type EntityMap = IndexMap<EntityKey, TrackedEntity>;

#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Base entity records for the given keys. Unknown keys are skipped, not
    /// errors. Duplicate input keys are forwarded verbatim by the engine.
    async fn base_entities(&self, keys: &[EntityKey], ctx: &AccessContext) -> Result<EntityMap>;

    async fn attribute_values(&self, keys: &[EntityKey]) -> Result<Multimap<AttributeValue>>;

    async fn relationships(
        &self,
        keys: &[EntityKey],
        ctx: &AccessContext,
    ) -> Result<Multimap<Relationship>>;

    async fn enrollments(
        &self,
        keys: &[EntityKey],
        ctx: &AccessContext,
    ) -> Result<Multimap<Enrollment>>;

    /// Events for the enrollments of the given root entities, keyed by root
    /// entity. Each event carries the uid of its owning enrollment.
    async fn events(&self, keys: &[EntityKey], ctx: &AccessContext) -> Result<Multimap<Event>>;

    async fn program_owners(&self, keys: &[EntityKey]) -> Result<Multimap<ProgramOwner>>;

    /// Programs the calling user is entitled to see data for, per entity.
    async fn owned_entities(
        &self,
        keys: &[EntityKey],
        ctx: &AccessContext,
    ) -> Result<Multimap<ProgramId>>;
}

/// Attribute metadata collaborator. Results are memoized by the engine with
/// a TTL, so implementations may hit the database on every call.
#[async_trait]
pub trait AttributeMetadataStore: Send + Sync {
    /// Attributes attached at the entity-type level, visible regardless of
    /// program ownership.
    async fn attributes_by_entity_type(&self) -> Result<AHashSet<AttributeId>>;

    /// Program-level attribute sets, visible only for owned programs.
    async fn attributes_by_program(&self) -> Result<AHashMap<ProgramId, AHashSet<AttributeId>>>;
}
