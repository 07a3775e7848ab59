//! Concurrent fan-out/fan-in aggregation of tracked entities.
//!
//! `find` launches one task per requested sub-resource, all gated by a
//! process-wide semaphore, and joins them at a single barrier before the
//! merge phase. Fetch tasks have no ordering guarantee relative to each
//! other; the merge is a pure function of the completed results, so result
//! ordering follows the base-entity fetch alone.

use crate::acl::AclStore;
use crate::attributes::AttributeVisibility;
use crate::config::EngineConfig;
use crate::context::{AccessContext, Caller, ContextCache};
use crate::error::{AggregateError, FetchSource};
use crate::merge::{self, EntitySources};
use crate::metrics::{FindMetrics, METRICS};
use crate::model::{EntityKey, FetchParams, TrackedEntity};
use crate::store::{AttributeMetadataStore, EntityStore};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub struct TrackedEntityAggregate {
    store: Arc<dyn EntityStore>,
    contexts: Arc<ContextCache>,
    visibility: Arc<AttributeVisibility>,
    /// Bounds concurrently executing fetch tasks across all `find` calls.
    fetch_gate: Arc<Semaphore>,
}

impl TrackedEntityAggregate {
    /// Build an aggregator around explicit cache components, so tests can
    /// substitute deterministic fakes.
    pub fn new(
        store: Arc<dyn EntityStore>,
        contexts: Arc<ContextCache>,
        visibility: Arc<AttributeVisibility>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            store,
            contexts,
            visibility,
            fetch_gate: Arc::new(Semaphore::new(config.max_concurrent_fetches.max(1))),
        }
    }

    /// Convenience constructor wiring the caches from the raw collaborators.
    pub fn with_stores(
        store: Arc<dyn EntityStore>,
        acl: Arc<dyn AclStore>,
        meta: Arc<dyn AttributeMetadataStore>,
        config: &EngineConfig,
    ) -> Self {
        Self::new(
            store,
            Arc::new(ContextCache::new(acl, config)),
            Arc::new(AttributeVisibility::new(meta, config)),
            config,
        )
    }

    /// Assemble the access-filtered view of the given entities.
    ///
    /// Returns entities in the order the base fetch produced them. Any
    /// failing sub-fetch aborts the whole call; a partial list is never
    /// returned. Duplicate keys are forwarded verbatim to every fetch.
    pub async fn find(
        &self,
        keys: &[EntityKey],
        params: FetchParams,
        caller: Caller,
    ) -> Result<Vec<TrackedEntity>, AggregateError> {
        if keys.is_empty() {
            return Err(AggregateError::EmptyKeySet);
        }

        let timer = FindMetrics::new();
        match self.find_inner(keys, params, caller).await {
            Ok(entities) => {
                timer.success();
                Ok(entities)
            }
            Err(error) => {
                warn!(error = %error, "aggregation failed");
                timer.error(error.category());
                Err(error)
            }
        }
    }

    async fn find_inner(
        &self,
        keys: &[EntityKey],
        params: FetchParams,
        caller: Caller,
    ) -> Result<Vec<TrackedEntity>, AggregateError> {
        let ctx = Arc::new(self.resolve_context(&caller, params).await);
        debug!(
            user = ?ctx.user,
            super_user = ctx.super_user,
            keys = keys.len(),
            "aggregating tracked entities"
        );

        let keys: Arc<[EntityKey]> = Arc::from(keys.to_vec());

        let base = self.spawn_fetch(FetchSource::BaseEntities, {
            let store = self.store.clone();
            let keys = keys.clone();
            let ctx = ctx.clone();
            async move { store.base_entities(&keys, &ctx).await }
        });
        let attributes = self.spawn_fetch(FetchSource::AttributeValues, {
            let store = self.store.clone();
            let keys = keys.clone();
            async move { store.attribute_values(&keys).await }
        });
        let relationships = ctx.params.include_relationships.then(|| {
            self.spawn_fetch(FetchSource::Relationships, {
                let store = self.store.clone();
                let keys = keys.clone();
                let ctx = ctx.clone();
                async move { store.relationships(&keys, &ctx).await }
            })
        });
        let enrollments = ctx.params.include_enrollments.then(|| {
            self.spawn_fetch(FetchSource::Enrollments, {
                let store = self.store.clone();
                let keys = keys.clone();
                let ctx = ctx.clone();
                async move { store.enrollments(&keys, &ctx).await }
            })
        });
        let events = ctx.params.wants_events().then(|| {
            self.spawn_fetch(FetchSource::Events, {
                let store = self.store.clone();
                let keys = keys.clone();
                let ctx = ctx.clone();
                async move { store.events(&keys, &ctx).await }
            })
        });
        let owners = ctx.params.include_program_owners.then(|| {
            self.spawn_fetch(FetchSource::ProgramOwners, {
                let store = self.store.clone();
                let keys = keys.clone();
                async move { store.program_owners(&keys).await }
            })
        });
        // The owned mapping drives both entity dropping (program filter) and
        // per-enrollment filtering, so it is needed in either case.
        let fetch_owned =
            !ctx.super_user && (ctx.params.program.is_some() || ctx.params.include_enrollments);
        let owned = fetch_owned.then(|| {
            self.spawn_fetch(FetchSource::OwnedEntities, {
                let store = self.store.clone();
                let keys = keys.clone();
                let ctx = ctx.clone();
                async move { store.owned_entities(&keys, &ctx).await }
            })
        });

        // Single barrier: every launched task is reaped here, even when a
        // sibling has already failed, so pool capacity never leaks. The two
        // attribute metadata sets resolve through their own cache alongside.
        let (
            base_result,
            attributes_result,
            relationships_result,
            enrollments_result,
            events_result,
            owners_result,
            owned_result,
            type_level_result,
            by_program_result,
        ) = tokio::join!(
            reap(FetchSource::BaseEntities, base),
            reap(FetchSource::AttributeValues, attributes),
            reap_optional(FetchSource::Relationships, relationships),
            reap_optional(FetchSource::Enrollments, enrollments),
            reap_optional(FetchSource::Events, events),
            reap_optional(FetchSource::ProgramOwners, owners),
            reap_optional(FetchSource::OwnedEntities, owned),
            self.visibility.type_level(),
            self.visibility.by_program(),
        );

        let base = base_result?;
        let mut attributes = attributes_result?;
        let mut relationships = relationships_result?.unwrap_or_default();
        let mut enrollments = enrollments_result?.unwrap_or_default();
        let mut events = events_result?.unwrap_or_default();
        let mut owners = owners_result?.unwrap_or_default();
        let mut owned = owned_result?.unwrap_or_default();
        let type_level = type_level_result?;
        let by_program = by_program_result?;

        let drop_unowned = ctx.params.program.is_some() && !ctx.super_user;
        let mut entities = Vec::with_capacity(base.len());
        for (key, entity) in base {
            let owned_programs = owned.remove(&key).unwrap_or_default();
            if drop_unowned && owned_programs.is_empty() {
                debug!(key = %key, "dropping entity not owned under requested program");
                continue;
            }
            let sources = EntitySources {
                attributes: attributes.remove(&key).unwrap_or_default(),
                relationships: relationships.remove(&key).unwrap_or_default(),
                enrollments: enrollments.remove(&key).unwrap_or_default(),
                events: events.remove(&key).unwrap_or_default(),
                owners: owners.remove(&key).unwrap_or_default(),
                owned_programs,
            };
            entities.push(merge::merge_entity(
                entity,
                sources,
                &type_level,
                &by_program,
                &ctx,
            ));
        }

        debug!(returned = entities.len(), "aggregation complete");
        Ok(entities)
    }

    async fn resolve_context(&self, caller: &Caller, params: FetchParams) -> AccessContext {
        match caller {
            Caller::System => AccessContext::system(params),
            Caller::Authenticated {
                user,
                groups,
                super_user,
            } => {
                let scope = self.contexts.scope_for(user, groups).await;
                AccessContext {
                    super_user: *super_user,
                    user: Some(user.clone()),
                    groups: groups.clone(),
                    scope,
                    params,
                }
            }
        }
    }

    fn spawn_fetch<T, Fut>(
        &self,
        source: FetchSource,
        fetch: Fut,
    ) -> JoinHandle<Result<T, AggregateError>>
    where
        T: Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let gate = self.fetch_gate.clone();
        tokio::spawn(async move {
            let _permit = gate
                .acquire_owned()
                .await
                .expect("fetch gate is never closed");
            let start = Instant::now();
            let result = fetch.await;
            METRICS.record_fetch(source, start.elapsed(), result.is_ok());
            result.map_err(|e| AggregateError::fetch(source, e))
        })
    }
}

async fn reap<T>(
    source: FetchSource,
    handle: JoinHandle<Result<T, AggregateError>>,
) -> Result<T, AggregateError> {
    match handle.await {
        Ok(result) => result,
        Err(join_error) => Err(AggregateError::task_failed(source, join_error)),
    }
}

async fn reap_optional<T>(
    source: FetchSource,
    handle: Option<JoinHandle<Result<T, AggregateError>>>,
) -> Result<Option<T>, AggregateError> {
    match handle {
        Some(handle) => reap(source, handle).await.map(Some),
        None => Ok(None),
    }
}
