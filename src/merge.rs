//! Merge step: combines the per-source multimaps into one composite entity.
//!
//! This is the single security boundary. Raw fetches are allowed to be
//! permissive; nothing a caller is not entitled to see survives this module.
//! All functions are pure: given completed fetch results they produce the
//! same output regardless of fetch completion order.

use crate::attributes::filter_attribute_values;
use crate::context::AccessContext;
use crate::model::{
    AttributeId, AttributeValue, Enrollment, Event, ProgramId, ProgramOwner, Relationship,
    TrackedEntity,
};
use ahash::{AHashMap, AHashSet};

/// Per-entity slices of the fetched multimaps.
#[derive(Debug, Default)]
pub struct EntitySources {
    pub attributes: Vec<AttributeValue>,
    pub relationships: Vec<Relationship>,
    pub enrollments: Vec<Enrollment>,
    pub events: Vec<Event>,
    pub owners: Vec<ProgramOwner>,
    /// Programs the caller is entitled to see data for on this entity.
    pub owned_programs: Vec<ProgramId>,
}

/// Keep an enrollment iff its program is owned for this entity or the
/// caller is a superuser. Never returns an unowned enrollment to a
/// non-superuser, even if the raw fetch produced it.
pub fn filter_enrollments(
    enrollments: Vec<Enrollment>,
    owned_programs: &[ProgramId],
    super_user: bool,
) -> Vec<Enrollment> {
    if super_user {
        return enrollments;
    }
    enrollments
        .into_iter()
        .filter(|enrollment| owned_programs.contains(&enrollment.program))
        .collect()
}

/// Keep a relationship iff its type is accessible to the caller.
pub fn filter_relationships(
    relationships: Vec<Relationship>,
    ctx: &AccessContext,
) -> Vec<Relationship> {
    relationships
        .into_iter()
        .filter(|relationship| ctx.can_access_relationship_type(&relationship.relationship_type))
        .collect()
}

/// Nest events under their owning enrollment, matched by enrollment uid.
/// Events of enrollments that were filtered out are discarded with them.
pub fn attach_events(enrollments: &mut [Enrollment], events: Vec<Event>) {
    if enrollments.is_empty() || events.is_empty() {
        return;
    }
    let mut by_enrollment: AHashMap<String, Vec<Event>> = AHashMap::new();
    for event in events {
        by_enrollment
            .entry(event.enrollment.clone())
            .or_default()
            .push(event);
    }
    for enrollment in enrollments.iter_mut() {
        if let Some(events) = by_enrollment.remove(enrollment.uid.as_str()) {
            enrollment.events = events;
        }
    }
}

/// Produce one fully populated entity from its source slices.
pub fn merge_entity(
    mut entity: TrackedEntity,
    sources: EntitySources,
    type_level: &AHashSet<AttributeId>,
    by_program: &AHashMap<ProgramId, AHashSet<AttributeId>>,
    ctx: &AccessContext,
) -> TrackedEntity {
    let EntitySources {
        attributes,
        relationships,
        enrollments,
        events,
        owners,
        owned_programs,
    } = sources;

    entity.attribute_values = filter_attribute_values(
        attributes,
        &owned_programs,
        type_level,
        by_program,
        ctx.super_user,
    );

    if ctx.params.include_relationships {
        entity.relationships = filter_relationships(relationships, ctx);
    }

    if ctx.params.include_enrollments {
        let mut kept = filter_enrollments(enrollments, &owned_programs, ctx.super_user);
        if ctx.params.wants_events() {
            attach_events(&mut kept, events);
        }
        entity.enrollments = kept;
    }

    if ctx.params.include_program_owners {
        entity.program_owners = owners;
    }

    entity
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::AccessScope;
    use crate::model::{EnrollmentStatus, EntityKey, EventStatus, FetchParams, RelationshipItem};
    use chrono::Utc;
    use smallvec::SmallVec;
    use std::sync::Arc;

    fn enrollment(uid: &str, program: &str) -> Enrollment {
        Enrollment {
            uid: uid.into(),
            program: ProgramId::new(program),
            entity: EntityKey::new("E1"),
            status: EnrollmentStatus::Active,
            followup: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            events: vec![],
        }
    }

    fn event(uid: &str, enrollment: &str) -> Event {
        Event {
            uid: uid.into(),
            enrollment: enrollment.into(),
            program: ProgramId::new("P1"),
            program_stage: "PS1".into(),
            org_unit: "OU1".into(),
            status: EventStatus::Completed,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn relationship(uid: &str, relationship_type: &str) -> Relationship {
        Relationship {
            uid: uid.into(),
            relationship_type: relationship_type.into(),
            from: RelationshipItem::entity(EntityKey::new("E1")),
            to: RelationshipItem::entity(EntityKey::new("E2")),
        }
    }

    fn ctx_with_relationship_types(types: &[&str]) -> AccessContext {
        AccessContext {
            super_user: false,
            user: None,
            groups: SmallVec::new(),
            scope: Arc::new(AccessScope {
                relationship_types: types.iter().map(|t| (*t).to_string()).collect(),
                ..Default::default()
            }),
            params: FetchParams {
                include_relationships: true,
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_unowned_enrollments_dropped() {
        let kept = filter_enrollments(
            vec![enrollment("en1", "P1"), enrollment("en2", "P2")],
            &[ProgramId::new("P1")],
            false,
        );
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].uid, "en1");
    }

    #[test]
    fn test_super_user_keeps_all_enrollments() {
        let kept = filter_enrollments(
            vec![enrollment("en1", "P1"), enrollment("en2", "P2")],
            &[],
            true,
        );
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn test_events_nest_under_owning_enrollment() {
        let mut enrollments = vec![enrollment("en1", "P1"), enrollment("en2", "P2")];
        attach_events(
            &mut enrollments,
            vec![event("ev1", "en1"), event("ev2", "en2"), event("ev3", "en1")],
        );
        assert_eq!(enrollments[0].events.len(), 2);
        assert_eq!(enrollments[1].events.len(), 1);
        assert_eq!(enrollments[1].events[0].uid, "ev2");
    }

    #[test]
    fn test_events_of_dropped_enrollment_discarded() {
        let mut kept = filter_enrollments(
            vec![enrollment("en1", "P1"), enrollment("en2", "P2")],
            &[ProgramId::new("P1")],
            false,
        );
        attach_events(&mut kept, vec![event("ev1", "en1"), event("ev2", "en2")]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].events.len(), 1);
        assert_eq!(kept[0].events[0].uid, "ev1");
    }

    #[test]
    fn test_inaccessible_relationship_types_dropped() {
        let ctx = ctx_with_relationship_types(&["RT_A"]);
        let kept = filter_relationships(
            vec![relationship("r1", "RT_A"), relationship("r2", "RT_B")],
            &ctx,
        );
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].uid, "r1");
    }

    #[test]
    fn test_merge_skips_collections_not_requested() {
        let entity = TrackedEntity {
            key: EntityKey::new("E1"),
            entity_type: "TET_A".into(),
            org_unit: "OU1".into(),
            inactive: false,
            deleted: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            attribute_values: vec![],
            enrollments: vec![],
            relationships: vec![],
            program_owners: vec![],
        };
        let sources = EntitySources {
            enrollments: vec![enrollment("en1", "P1")],
            relationships: vec![relationship("r1", "RT_A")],
            owners: vec![ProgramOwner {
                entity: EntityKey::new("E1"),
                program: ProgramId::new("P1"),
                org_unit: "OU1".into(),
            }],
            ..Default::default()
        };
        let ctx = AccessContext::system(FetchParams::default());

        let merged = merge_entity(
            entity,
            sources,
            &AHashSet::new(),
            &AHashMap::new(),
            &ctx,
        );
        assert!(merged.enrollments.is_empty());
        assert!(merged.relationships.is_empty());
        assert!(merged.program_owners.is_empty());
    }
}
