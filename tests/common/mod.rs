//! Shared in-memory fakes and fixtures for integration tests.
//!
//! The fakes record call counts and forwarded key sets so tests can assert
//! which fetches were issued, not just what came back.

#![allow(dead_code)]

use ahash::{AHashMap, AHashSet};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracker_aggregate::store::EntityMap;
use tracker_aggregate::{
    AccessContext, AclStore, AttributeId, AttributeMetadataStore, AttributeValue, Enrollment,
    EnrollmentStatus, EntityKey, EntityStore, Event, EventStatus, FetchSource, Multimap,
    ProgramId, ProgramOwner, Relationship, RelationshipItem, TrackedEntity, UserId,
};

/// Fixed timestamp so repeated fetches produce byte-identical entities.
pub fn ts() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

pub fn entity(key: &str) -> TrackedEntity {
    TrackedEntity {
        key: EntityKey::new(key),
        entity_type: "TET_A".into(),
        org_unit: "OU1".into(),
        inactive: false,
        deleted: false,
        created_at: ts(),
        updated_at: ts(),
        attribute_values: vec![],
        enrollments: vec![],
        relationships: vec![],
        program_owners: vec![],
    }
}

pub fn attribute_value(attribute: &str, value: &str) -> AttributeValue {
    AttributeValue {
        attribute: AttributeId::new(attribute),
        value: value.into(),
        stored_by: Some("importer".into()),
        created_at: ts(),
        updated_at: ts(),
    }
}

pub fn enrollment(uid: &str, program: &str, entity: &str) -> Enrollment {
    Enrollment {
        uid: uid.into(),
        program: ProgramId::new(program),
        entity: EntityKey::new(entity),
        status: EnrollmentStatus::Active,
        followup: false,
        created_at: ts(),
        updated_at: ts(),
        events: vec![],
    }
}

pub fn event(uid: &str, enrollment_uid: &str, program: &str) -> Event {
    Event {
        uid: uid.into(),
        enrollment: enrollment_uid.into(),
        program: ProgramId::new(program),
        program_stage: "PS1".into(),
        org_unit: "OU1".into(),
        status: EventStatus::Completed,
        created_at: ts(),
        updated_at: ts(),
    }
}

pub fn relationship(uid: &str, relationship_type: &str, from: &str, to: &str) -> Relationship {
    Relationship {
        uid: uid.into(),
        relationship_type: relationship_type.into(),
        from: RelationshipItem::entity(EntityKey::new(from)),
        to: RelationshipItem::entity(EntityKey::new(to)),
    }
}

pub fn owner(entity: &str, program: &str) -> ProgramOwner {
    ProgramOwner {
        entity: EntityKey::new(entity),
        program: ProgramId::new(program),
        org_unit: "OU1".into(),
    }
}

pub fn keys(raw: &[&str]) -> Vec<EntityKey> {
    raw.iter().map(|k| EntityKey::new(*k)).collect()
}

#[derive(Default)]
pub struct FetchCounters {
    pub base: AtomicUsize,
    pub attributes: AtomicUsize,
    pub relationships: AtomicUsize,
    pub enrollments: AtomicUsize,
    pub events: AtomicUsize,
    pub owners: AtomicUsize,
    pub owned: AtomicUsize,
}

/// In-memory [`EntityStore`] with per-method call counters, recorded key
/// sets, and single-fetch failure injection.
#[derive(Default)]
pub struct FakeStore {
    pub base: EntityMap,
    pub attributes: Multimap<AttributeValue>,
    pub relationships: Multimap<Relationship>,
    pub enrollments: Multimap<Enrollment>,
    pub events: Multimap<Event>,
    pub owners: Multimap<ProgramOwner>,
    pub owned: Multimap<ProgramId>,
    pub fail: Option<FetchSource>,
    pub calls: FetchCounters,
    pub last_keys: Mutex<Vec<EntityKey>>,
}

impl FakeStore {
    pub fn with_entities(entities: &[&str]) -> Self {
        let mut store = Self::default();
        for key in entities {
            store.base.insert(EntityKey::new(*key), entity(key));
        }
        store
    }

    pub fn attribute(mut self, entity: &str, value: AttributeValue) -> Self {
        self.attributes
            .entry(EntityKey::new(entity))
            .or_default()
            .push(value);
        self
    }

    pub fn enrollment(mut self, entity: &str, enrollment: Enrollment) -> Self {
        self.enrollments
            .entry(EntityKey::new(entity))
            .or_default()
            .push(enrollment);
        self
    }

    pub fn event(mut self, entity: &str, event: Event) -> Self {
        self.events
            .entry(EntityKey::new(entity))
            .or_default()
            .push(event);
        self
    }

    pub fn relationship(mut self, entity: &str, relationship: Relationship) -> Self {
        self.relationships
            .entry(EntityKey::new(entity))
            .or_default()
            .push(relationship);
        self
    }

    pub fn owner(mut self, entity: &str, owner: ProgramOwner) -> Self {
        self.owners
            .entry(EntityKey::new(entity))
            .or_default()
            .push(owner);
        self
    }

    pub fn owned(mut self, entity: &str, program: &str) -> Self {
        self.owned
            .entry(EntityKey::new(entity))
            .or_default()
            .push(ProgramId::new(program));
        self
    }

    pub fn failing(mut self, source: FetchSource) -> Self {
        self.fail = Some(source);
        self
    }

    fn check_fail(&self, source: FetchSource) -> Result<()> {
        if self.fail == Some(source) {
            anyhow::bail!("injected {source} failure");
        }
        Ok(())
    }

    fn select<V: Clone>(map: &Multimap<V>, keys: &[EntityKey]) -> Multimap<V> {
        let requested: AHashSet<&EntityKey> = keys.iter().collect();
        map.iter()
            .filter(|(key, _)| requested.contains(key))
            .map(|(key, values)| (key.clone(), values.clone()))
            .collect()
    }
}

#[async_trait]
impl EntityStore for FakeStore {
    async fn base_entities(&self, keys: &[EntityKey], _ctx: &AccessContext) -> Result<EntityMap> {
        self.calls.base.fetch_add(1, Ordering::Relaxed);
        *self.last_keys.lock() = keys.to_vec();
        self.check_fail(FetchSource::BaseEntities)?;

        // Store iteration order, not caller order.
        let requested: AHashSet<&EntityKey> = keys.iter().collect();
        Ok(self
            .base
            .iter()
            .filter(|(key, _)| requested.contains(key))
            .map(|(key, entity)| (key.clone(), entity.clone()))
            .collect())
    }

    async fn attribute_values(&self, keys: &[EntityKey]) -> Result<Multimap<AttributeValue>> {
        self.calls.attributes.fetch_add(1, Ordering::Relaxed);
        self.check_fail(FetchSource::AttributeValues)?;
        Ok(Self::select(&self.attributes, keys))
    }

    async fn relationships(
        &self,
        keys: &[EntityKey],
        _ctx: &AccessContext,
    ) -> Result<Multimap<Relationship>> {
        self.calls.relationships.fetch_add(1, Ordering::Relaxed);
        self.check_fail(FetchSource::Relationships)?;
        Ok(Self::select(&self.relationships, keys))
    }

    async fn enrollments(
        &self,
        keys: &[EntityKey],
        _ctx: &AccessContext,
    ) -> Result<Multimap<Enrollment>> {
        self.calls.enrollments.fetch_add(1, Ordering::Relaxed);
        self.check_fail(FetchSource::Enrollments)?;
        Ok(Self::select(&self.enrollments, keys))
    }

    async fn events(&self, keys: &[EntityKey], _ctx: &AccessContext) -> Result<Multimap<Event>> {
        self.calls.events.fetch_add(1, Ordering::Relaxed);
        self.check_fail(FetchSource::Events)?;
        Ok(Self::select(&self.events, keys))
    }

    async fn program_owners(&self, keys: &[EntityKey]) -> Result<Multimap<ProgramOwner>> {
        self.calls.owners.fetch_add(1, Ordering::Relaxed);
        self.check_fail(FetchSource::ProgramOwners)?;
        Ok(Self::select(&self.owners, keys))
    }

    async fn owned_entities(
        &self,
        keys: &[EntityKey],
        _ctx: &AccessContext,
    ) -> Result<Multimap<ProgramId>> {
        self.calls.owned.fetch_add(1, Ordering::Relaxed);
        self.check_fail(FetchSource::OwnedEntities)?;
        Ok(Self::select(&self.owned, keys))
    }
}

/// [`AclStore`] fake that counts calls so tests can verify the context cache
/// issues exactly one round per user.
pub struct CountingAcl {
    pub entity_types: Vec<String>,
    pub programs: Vec<ProgramId>,
    pub program_stages: Vec<String>,
    pub relationship_types: Vec<String>,
    pub calls: AtomicUsize,
    pub delay: Duration,
}

impl Default for CountingAcl {
    fn default() -> Self {
        Self {
            entity_types: vec!["TET_A".into()],
            programs: vec![ProgramId::new("P1")],
            program_stages: vec!["PS1".into()],
            relationship_types: vec!["RT_A".into()],
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }
}

impl CountingAcl {
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    async fn record(&self) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

#[async_trait]
impl AclStore for CountingAcl {
    async fn accessible_entity_types(
        &self,
        _user: &UserId,
        _groups: &[String],
    ) -> Result<Vec<String>> {
        self.record().await;
        Ok(self.entity_types.clone())
    }

    async fn accessible_programs(
        &self,
        _user: &UserId,
        _groups: &[String],
    ) -> Result<Vec<ProgramId>> {
        self.record().await;
        Ok(self.programs.clone())
    }

    async fn accessible_program_stages(
        &self,
        _user: &UserId,
        _groups: &[String],
    ) -> Result<Vec<String>> {
        self.record().await;
        Ok(self.program_stages.clone())
    }

    async fn accessible_relationship_types(
        &self,
        _user: &UserId,
        _groups: &[String],
    ) -> Result<Vec<String>> {
        self.record().await;
        Ok(self.relationship_types.clone())
    }
}

/// [`AttributeMetadataStore`] fake with fixed sets and a call counter.
#[derive(Default)]
pub struct StaticMeta {
    pub type_level: AHashSet<AttributeId>,
    pub by_program: AHashMap<ProgramId, AHashSet<AttributeId>>,
    pub calls: AtomicUsize,
}

impl StaticMeta {
    pub fn with_type_level(attributes: &[&str]) -> Self {
        Self {
            type_level: attributes.iter().map(|a| AttributeId::new(*a)).collect(),
            ..Default::default()
        }
    }

    pub fn program_attributes(mut self, program: &str, attributes: &[&str]) -> Self {
        self.by_program.insert(
            ProgramId::new(program),
            attributes.iter().map(|a| AttributeId::new(*a)).collect(),
        );
        self
    }
}

#[async_trait]
impl AttributeMetadataStore for StaticMeta {
    async fn attributes_by_entity_type(&self) -> Result<AHashSet<AttributeId>> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(self.type_level.clone())
    }

    async fn attributes_by_program(&self) -> Result<AHashMap<ProgramId, AHashSet<AttributeId>>> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(self.by_program.clone())
    }
}
