//! Per-request access context and the per-user scope cache.

use crate::acl::AclStore;
use crate::config::EngineConfig;
use crate::error::FetchSource;
use crate::metrics::METRICS;
use crate::model::{FetchParams, ProgramId, UserId};
use ahash::{AHashMap, AHashSet};
use anyhow::Result;
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Who is asking. `System` carries superuser semantics: every program and
/// entity type is considered accessible and no filtering drops anything.
#[derive(Debug, Clone)]
pub enum Caller {
    System,
    Authenticated {
        user: UserId,
        groups: SmallVec<[String; 4]>,
        super_user: bool,
    },
}

impl Caller {
    pub fn system() -> Self {
        Self::System
    }

    pub fn user(user: impl Into<String>, groups: impl IntoIterator<Item = String>) -> Self {
        Self::Authenticated {
            user: UserId::new(user),
            groups: groups.into_iter().collect(),
            super_user: false,
        }
    }

    pub fn super_user(user: impl Into<String>, groups: impl IntoIterator<Item = String>) -> Self {
        Self::Authenticated {
            user: UserId::new(user),
            groups: groups.into_iter().collect(),
            super_user: true,
        }
    }

    pub fn is_super(&self) -> bool {
        match self {
            Caller::System => true,
            Caller::Authenticated { super_user, .. } => *super_user,
        }
    }

    pub fn user_id(&self) -> Option<&UserId> {
        match self {
            Caller::System => None,
            Caller::Authenticated { user, .. } => Some(user),
        }
    }
}

/// ACL-derived identifier sets for one user. Cached per user; a cached scope
/// is either fully populated or absent, never partially updated.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AccessScope {
    pub entity_types: AHashSet<String>,
    pub programs: AHashSet<ProgramId>,
    pub program_stages: AHashSet<String>,
    pub relationship_types: AHashSet<String>,
}

/// Per-request authorization snapshot, built once per `find` call and passed
/// by shared reference into every fetch and the merge step.
#[derive(Debug, Clone)]
pub struct AccessContext {
    pub super_user: bool,
    pub user: Option<UserId>,
    pub groups: SmallVec<[String; 4]>,
    pub scope: Arc<AccessScope>,
    /// The original query options, read-only.
    pub params: FetchParams,
}

impl AccessContext {
    pub fn system(params: FetchParams) -> Self {
        Self {
            super_user: true,
            user: None,
            groups: SmallVec::new(),
            scope: Arc::new(AccessScope::default()),
            params,
        }
    }

    pub fn can_access_relationship_type(&self, relationship_type: &str) -> bool {
        self.super_user || self.scope.relationship_types.contains(relationship_type)
    }
}

struct CachedScope {
    scope: Arc<AccessScope>,
    inserted_at: Instant,
}

/// Per-user cache of [`AccessScope`]s with TTL and LRU eviction.
///
/// Population is single-flight per key: concurrent misses on the same user
/// serialize on a per-user async mutex and the losers observe the winner's
/// entry instead of issuing a second ACL round.
pub struct ContextCache {
    acl: Arc<dyn AclStore>,
    ttl: Duration,
    entries: RwLock<LruCache<UserId, CachedScope>>,
    population: Mutex<AHashMap<UserId, Arc<tokio::sync::Mutex<()>>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ContextCache {
    pub fn new(acl: Arc<dyn AclStore>, config: &EngineConfig) -> Self {
        let capacity =
            NonZeroUsize::new(config.context_cache_capacity.max(1)).expect("capacity is nonzero");
        Self {
            acl,
            ttl: config.context_ttl(),
            entries: RwLock::new(LruCache::new(capacity)),
            population: Mutex::new(AHashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Resolve the cached scope for a user, fetching it on first miss.
    pub async fn scope_for(&self, user: &UserId, groups: &[String]) -> Arc<AccessScope> {
        if let Some(scope) = self.lookup(user) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            METRICS.record_context_cache_hit();
            debug!(user = %user, "access scope cache hit");
            return scope;
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        METRICS.record_context_cache_miss();
        debug!(user = %user, "access scope cache miss");

        let gate = {
            let mut population = self.population.lock();
            population
                .entry(user.clone())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        let _guard = gate.lock().await;

        // Another task may have populated the entry while we waited.
        if let Some(scope) = self.lookup(user) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return scope;
        }

        let scope = Arc::new(self.fetch_scope(user, groups).await);
        {
            let mut entries = self.entries.write();
            entries.put(
                user.clone(),
                CachedScope {
                    scope: scope.clone(),
                    inserted_at: Instant::now(),
                },
            );
        }
        self.population.lock().remove(user);
        scope
    }

    pub fn stats(&self) -> ContextCacheStats {
        ContextCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            size: self.entries.read().len(),
        }
    }

    fn lookup(&self, user: &UserId) -> Option<Arc<AccessScope>> {
        let mut entries = self.entries.write();
        match entries.get(user) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => Some(entry.scope.clone()),
            Some(_) => {
                entries.pop(user);
                None
            }
            None => None,
        }
    }

    /// Query the four accessible-id sets concurrently and assemble the scope
    /// once all four complete. A failing set degrades to empty rather than
    /// erroring: no data visible beats a crash.
    async fn fetch_scope(&self, user: &UserId, groups: &[String]) -> AccessScope {
        let (entity_types, programs, program_stages, relationship_types) = tokio::join!(
            self.acl.accessible_entity_types(user, groups),
            self.acl.accessible_programs(user, groups),
            self.acl.accessible_program_stages(user, groups),
            self.acl.accessible_relationship_types(user, groups),
        );
        AccessScope {
            entity_types: set_or_empty(FetchSource::EntityTypeAcl, user, entity_types),
            programs: set_or_empty(FetchSource::ProgramAcl, user, programs),
            program_stages: set_or_empty(FetchSource::ProgramStageAcl, user, program_stages),
            relationship_types: set_or_empty(
                FetchSource::RelationshipTypeAcl,
                user,
                relationship_types,
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContextCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
}

fn set_or_empty<T: Eq + Hash>(
    source: FetchSource,
    user: &UserId,
    result: Result<Vec<T>>,
) -> AHashSet<T> {
    match result {
        Ok(ids) => ids.into_iter().collect(),
        Err(error) => {
            warn!(
                user = %user,
                source = %source,
                error = %format!("{error:#}"),
                "ACL lookup failed, treating as no access"
            );
            AHashSet::new()
        }
    }
}
