//! Attribute visibility resolution.
//!
//! The allowed-attribute set for an entity merges two metadata sets: the
//! entity-type-level attributes (always visible) and the program-level
//! attribute sets (visible only for programs the caller owns for that
//! entity, or for superusers). Both metadata sets are process-wide and
//! memoized with a TTL so the metadata collaborator is consulted at most
//! once per window.

use crate::config::EngineConfig;
use crate::error::{AggregateError, FetchSource};
use crate::metrics::METRICS;
use crate::model::{AttributeId, AttributeValue, ProgramId};
use crate::store::AttributeMetadataStore;
use ahash::{AHashMap, AHashSet};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

struct CachedEntry<T> {
    value: Arc<T>,
    inserted_at: Instant,
}

pub struct AttributeVisibility {
    meta: Arc<dyn AttributeMetadataStore>,
    ttl: Duration,
    type_level: RwLock<Option<CachedEntry<AHashSet<AttributeId>>>>,
    by_program: RwLock<Option<CachedEntry<AHashMap<ProgramId, AHashSet<AttributeId>>>>>,
    type_refresh: tokio::sync::Mutex<()>,
    program_refresh: tokio::sync::Mutex<()>,
}

impl AttributeVisibility {
    pub fn new(meta: Arc<dyn AttributeMetadataStore>, config: &EngineConfig) -> Self {
        Self {
            meta,
            ttl: config.attribute_cache_ttl(),
            type_level: RwLock::new(None),
            by_program: RwLock::new(None),
            type_refresh: tokio::sync::Mutex::new(()),
            program_refresh: tokio::sync::Mutex::new(()),
        }
    }

    /// Entity-type-level attribute ids, memoized.
    pub async fn type_level(&self) -> Result<Arc<AHashSet<AttributeId>>, AggregateError> {
        if let Some(value) = fresh(&self.type_level, self.ttl) {
            METRICS.record_attribute_cache_hit();
            return Ok(value);
        }
        METRICS.record_attribute_cache_miss();

        let _guard = self.type_refresh.lock().await;
        if let Some(value) = fresh(&self.type_level, self.ttl) {
            return Ok(value);
        }

        debug!("refreshing entity-type attribute set");
        let value = Arc::new(
            self.meta
                .attributes_by_entity_type()
                .await
                .map_err(|e| AggregateError::fetch(FetchSource::TypeAttributes, e))?,
        );
        *self.type_level.write() = Some(CachedEntry {
            value: value.clone(),
            inserted_at: Instant::now(),
        });
        Ok(value)
    }

    /// Program-level attribute sets, memoized.
    pub async fn by_program(
        &self,
    ) -> Result<Arc<AHashMap<ProgramId, AHashSet<AttributeId>>>, AggregateError> {
        if let Some(value) = fresh(&self.by_program, self.ttl) {
            METRICS.record_attribute_cache_hit();
            return Ok(value);
        }
        METRICS.record_attribute_cache_miss();

        let _guard = self.program_refresh.lock().await;
        if let Some(value) = fresh(&self.by_program, self.ttl) {
            return Ok(value);
        }

        debug!("refreshing per-program attribute sets");
        let value = Arc::new(
            self.meta
                .attributes_by_program()
                .await
                .map_err(|e| AggregateError::fetch(FetchSource::ProgramAttributes, e))?,
        );
        *self.by_program.write() = Some(CachedEntry {
            value: value.clone(),
            inserted_at: Instant::now(),
        });
        Ok(value)
    }
}

fn fresh<T>(cell: &RwLock<Option<CachedEntry<T>>>, ttl: Duration) -> Option<Arc<T>> {
    let entry = cell.read();
    match entry.as_ref() {
        Some(cached) if cached.inserted_at.elapsed() < ttl => Some(cached.value.clone()),
        _ => None,
    }
}

/// Keep only the attribute values whose attribute id is visible to the
/// caller for this entity. Superusers retain every value present in the raw
/// fetch. Deterministic and order-independent: the allowed set is the same
/// whatever order the program map iterates in.
pub fn filter_attribute_values(
    values: Vec<AttributeValue>,
    owned_programs: &[ProgramId],
    type_level: &AHashSet<AttributeId>,
    by_program: &AHashMap<ProgramId, AHashSet<AttributeId>>,
    super_user: bool,
) -> Vec<AttributeValue> {
    if super_user || values.is_empty() {
        return values;
    }

    let mut allowed: AHashSet<&AttributeId> = type_level.iter().collect();
    for (program, attributes) in by_program {
        if owned_programs.contains(program) {
            allowed.extend(attributes.iter());
        }
    }

    values
        .into_iter()
        .filter(|value| allowed.contains(&value.attribute))
        .collect()
}
