//! Event dispatch: mutation notifications with re-entrancy suppression.
//!
//! The triggering layer reports only the fact "entity X was created,
//! updated, or deleted" (plus, on deletion, the pre-deletion snapshot of
//! its related set). The dispatcher turns that into one transactional
//! autolink + error-check cascade per event.
//!
//! Because the checker itself mutates entities, naive mutate → notify →
//! recheck wiring would recurse forever. Each entity currently being
//! handled is held in an in-flight set; an event raised for that same
//! entity while its outer call runs is suppressed, and the marker is
//! dropped when the outer call finishes, success or failure. Events on
//! distinct entities are independent; the guard is not a global lock.

use dashmap::DashSet;

use crate::check;
use crate::entity::EntityRef;
use crate::error::CaselinkResult;
use crate::link::{self, AutolinkOutcome, DeletedLinkage};
use crate::store::{State, Store};

/// A mutation notification from the triggering layer.
#[derive(Debug, Clone)]
pub enum EntityEvent {
    Created(EntityRef),
    Updated(EntityRef),
    /// The entity is already gone; `related` is the pre-deletion snapshot
    /// of its related-for-checking set.
    Deleted {
        entity: EntityRef,
        related: Vec<EntityRef>,
    },
}

impl EntityEvent {
    /// The entity this event is about.
    pub fn entity(&self) -> &EntityRef {
        match self {
            EntityEvent::Created(entity) | EntityEvent::Updated(entity) => entity,
            EntityEvent::Deleted { entity, .. } => entity,
        }
    }
}

/// How the dispatcher disposed of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The autolink/check cascade ran and committed.
    Completed,
    /// The entity's own hook was already executing; the event was dropped.
    Suppressed,
}

/// Routes entity events into transactional autolink + check cascades.
#[derive(Debug)]
pub struct Dispatcher {
    in_flight: DashSet<EntityRef>,
    check_depth: usize,
    autolink_on_mutation: bool,
}

impl Dispatcher {
    pub fn new(check_depth: usize, autolink_on_mutation: bool) -> Self {
        Self {
            in_flight: DashSet::new(),
            check_depth,
            autolink_on_mutation,
        }
    }

    /// Handle one event: guard, run the cascade in a transaction, release.
    pub fn handle(&self, store: &Store, event: &EntityEvent) -> CaselinkResult<Outcome> {
        let entity = event.entity().clone();
        if !self.in_flight.insert(entity.clone()) {
            tracing::debug!(entity = %entity, "mutation hook already in flight, suppressed");
            return Ok(Outcome::Suppressed);
        }
        let result = self.run(store, event);
        self.in_flight.remove(&entity);
        result.map(|()| Outcome::Completed)
    }

    fn run(&self, store: &Store, event: &EntityEvent) -> CaselinkResult<()> {
        match event {
            EntityEvent::Created(entity) | EntityEvent::Updated(entity) => {
                store.transaction(|state| self.on_mutation(state, entity))
            }
            EntityEvent::Deleted { entity, related } => store.transaction(|state| {
                tracing::debug!(entity = %entity, survivors = related.len(), "rechecking after deletion");
                recheck_survivors(state, related)
            }),
        }
    }

    fn on_mutation(&self, state: &mut State, entity: &EntityRef) -> CaselinkResult<()> {
        let mut pruned: Vec<DeletedLinkage> = Vec::new();
        let mut self_deleted: Option<DeletedLinkage> = None;

        if self.autolink_on_mutation {
            match entity {
                EntityRef::Linkage(id) => {
                    let report = link::autolink_linkage(state, id)?;
                    match report.outcome {
                        AutolinkOutcome::Kept { deleted_siblings } => pruned = deleted_siblings,
                        AutolinkOutcome::SelfDeleted(deleted) => self_deleted = Some(deleted),
                        AutolinkOutcome::NoMatches => {}
                    }
                }
                EntityRef::AutoCase(id) => {
                    link::autolink_case(state, id)?;
                }
                EntityRef::Failure(id) => {
                    link::autolink_failure(state, id)?;
                }
                EntityRef::WorkItem(_) | EntityRef::Blacklist(_) => {}
            }
        }

        // Linkages pruned by subsumption get their survivors rechecked
        // exactly as an explicit deletion would.
        for deleted in &pruned {
            recheck_survivors(state, &deleted.related)?;
        }
        if let Some(deleted) = self_deleted {
            recheck_survivors(state, &deleted.related)?;
            return Ok(());
        }

        check::error_check(state, entity, self.check_depth)?;
        Ok(())
    }
}

/// Depth-0 recheck of a pre-deletion related snapshot, skipping entities
/// that were themselves deleted in the same pass.
fn recheck_survivors(state: &mut State, related: &[EntityRef]) -> CaselinkResult<()> {
    for entity in related {
        if state.entity_exists(entity) {
            check::error_check(state, entity, 0)?;
        } else {
            tracing::debug!(entity = %entity, "skipping recheck, deleted in the same pass");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{AutoCase, AutomationStatus, CaseId, Linkage, LinkageId, WorkItem, WorkItemId};
    use crate::tag::ErrorTag;

    fn lid(raw: u64) -> LinkageId {
        LinkageId::new(raw).unwrap()
    }

    fn seeded_store() -> Store {
        let store = Store::in_memory();
        store
            .transaction(|state| {
                state.upsert_workitem(WorkItem::new("W", "t", AutomationStatus::Automated));
                state.upsert_autocase(AutoCase::new("a.b.x"));
                state.upsert_autocase(AutoCase::new("a.b.y"));
                Ok(())
            })
            .unwrap();
        store
    }

    #[test]
    fn created_linkage_is_autolinked_and_checked() {
        let store = seeded_store();
        let dispatcher = Dispatcher::new(1, true);
        store
            .transaction(|state| {
                state.insert_linkage(Linkage::new(lid(1), "W", "a.b"));
                Ok(())
            })
            .unwrap();

        let outcome = dispatcher
            .handle(&store, &EntityEvent::Created(EntityRef::Linkage(lid(1))))
            .unwrap();
        assert_eq!(outcome, Outcome::Completed);
        store.read(|state| {
            assert_eq!(state.linkage(&lid(1)).unwrap().autocases.len(), 2);
            assert!(state.linkage(&lid(1)).unwrap().errors.is_empty());
        });
    }

    #[test]
    fn in_flight_events_are_suppressed() {
        let store = seeded_store();
        let dispatcher = Dispatcher::new(1, true);
        let entity = EntityRef::WorkItem(WorkItemId::new("W"));
        dispatcher.in_flight.insert(entity.clone());

        let outcome = dispatcher
            .handle(&store, &EntityEvent::Updated(entity.clone()))
            .unwrap();
        assert_eq!(outcome, Outcome::Suppressed);

        // Once the outer call releases the guard, events flow again.
        dispatcher.in_flight.remove(&entity);
        let outcome = dispatcher
            .handle(&store, &EntityEvent::Updated(entity))
            .unwrap();
        assert_eq!(outcome, Outcome::Completed);
    }

    #[test]
    fn guard_is_released_after_failure() {
        let store = Store::in_memory();
        let dispatcher = Dispatcher::new(1, true);
        let ghost = EntityRef::WorkItem(WorkItemId::new("ghost"));

        assert!(
            dispatcher
                .handle(&store, &EntityEvent::Updated(ghost.clone()))
                .is_err()
        );
        assert!(dispatcher.in_flight.is_empty());
    }

    #[test]
    fn deletion_event_rechecks_survivors_at_depth_zero() {
        let store = seeded_store();
        let dispatcher = Dispatcher::new(1, true);
        store
            .transaction(|state| {
                state.insert_linkage(Linkage::new(lid(1), "W", "a.b"));
                Ok(())
            })
            .unwrap();
        dispatcher
            .handle(&store, &EntityEvent::Created(EntityRef::Linkage(lid(1))))
            .unwrap();

        // Simulate the management layer deleting the linkage.
        let related = store.transaction(|state| {
            let related = state.related_for_checking(&EntityRef::Linkage(lid(1)));
            state.delete_linkage(&lid(1));
            Ok(related)
        });
        let related = related.unwrap();
        dispatcher
            .handle(
                &store,
                &EntityEvent::Deleted {
                    entity: EntityRef::Linkage(lid(1)),
                    related,
                },
            )
            .unwrap();

        store.read(|state| {
            // The orphaned cases were rechecked and flagged.
            for case in ["a.b.x", "a.b.y"] {
                assert!(
                    state
                        .autocase(&CaseId::new(case))
                        .unwrap()
                        .errors
                        .contains(&ErrorTag::NoLinkage)
                );
            }
            // The work item lost its only linkage.
            assert!(
                state
                    .workitem(&WorkItemId::new("W"))
                    .unwrap()
                    .errors
                    .contains(&ErrorTag::WorkitemAutomatedNoLinkage)
            );
        });
    }

    #[test]
    fn subsumption_during_dispatch_rechecks_the_pruned_sibling_graph() {
        let store = seeded_store();
        let dispatcher = Dispatcher::new(1, true);
        store
            .transaction(|state| {
                state.insert_linkage(Linkage::new(lid(1), "W", "a.b.x"));
                Ok(())
            })
            .unwrap();
        dispatcher
            .handle(&store, &EntityEvent::Created(EntityRef::Linkage(lid(1))))
            .unwrap();

        // The broader pattern subsumes lid(1) and replaces it.
        store
            .transaction(|state| {
                state.insert_linkage(Linkage::new(lid(2), "W", "a.b"));
                Ok(())
            })
            .unwrap();
        dispatcher
            .handle(&store, &EntityEvent::Created(EntityRef::Linkage(lid(2))))
            .unwrap();

        store.read(|state| {
            assert!(state.linkage(&lid(1)).is_none());
            let survivor = state.linkage(&lid(2)).unwrap();
            assert_eq!(survivor.autocases.len(), 2);
            assert!(survivor.errors.is_empty());
            // The case both linkages matched is claimed exactly once again.
            let case = state.autocase(&CaseId::new("a.b.x")).unwrap();
            assert_eq!(case.linkages.len(), 1);
            assert!(!case.errors.contains(&ErrorTag::MultipleWorkitem));
        });
    }
}
