//! Autolink resolver: recompute which auto-cases a pattern claims.
//!
//! The linkage-driven direction is canonical: it clears the matched set
//! and rebuilds it from scratch, then prunes sibling linkages of the same
//! work item whose matched sets are strictly subsumed. The case-driven
//! direction ([`autolink_case`]) is additive and exists for one-shot bulk
//! loading of a freshly imported store; it never clears either side.
//!
//! Zero matches is not an error here: an unmatched pattern is left for the
//! consistency checker to flag as `PATTERN_INVALID`.

use std::collections::BTreeSet;

use crate::entity::{CaseId, EntityRef, FailureId, LinkageId};
use crate::error::{CaselinkResult, CheckError};
use crate::pattern::Pattern;
use crate::store::State;

/// A linkage the resolver deleted, with the pre-deletion snapshot of its
/// related-for-checking set so survivors can be rechecked.
#[derive(Debug, Clone)]
pub struct DeletedLinkage {
    pub id: LinkageId,
    pub related: Vec<EntityRef>,
}

/// What happened to the linkage the resolver ran on.
#[derive(Debug, Clone)]
pub enum AutolinkOutcome {
    /// The pattern matched nothing; the linkage is kept for the checker to
    /// flag.
    NoMatches,
    /// The linkage survives; zero or more siblings were fully subsumed and
    /// deleted.
    Kept { deleted_siblings: Vec<DeletedLinkage> },
    /// A sibling's matched set strictly contains this one's; the linkage
    /// deleted itself.
    SelfDeleted(DeletedLinkage),
}

/// Result of one linkage-driven autolink pass.
#[derive(Debug, Clone)]
pub struct AutolinkReport {
    /// Number of auto-cases the pattern matched.
    pub matched: usize,
    pub outcome: AutolinkOutcome,
}

fn stale(entity: EntityRef) -> CheckError {
    CheckError::StaleReference {
        entity: entity.to_string(),
    }
}

/// Rebuild a linkage's matched set and prune subsumed siblings.
///
/// Idempotent: running it again on an unchanged store reproduces the same
/// matched set and deletes nothing further. Sibling comparison runs in
/// ascending linkage-id order so deletions are reproducible.
pub fn autolink_linkage(state: &mut State, id: &LinkageId) -> CaselinkResult<AutolinkReport> {
    let link = state
        .linkage(id)
        .ok_or_else(|| stale(EntityRef::Linkage(*id)))?;
    let pattern = Pattern::parse(&link.pattern)?;
    let workitem = link.workitem.clone();

    state.clear_linkage_cases(id);
    let mut matched = 0usize;
    for case in state.case_ids() {
        if pattern.matches(case.as_str()) {
            state.link_case(id, &case);
            matched += 1;
        }
    }
    tracing::debug!(linkage = %id, pattern = %pattern, matched, "autolink rebuilt matched set");

    if matched == 0 {
        // Skip invalid linkage: the checker flags it, nothing is deleted.
        return Ok(AutolinkReport {
            matched,
            outcome: AutolinkOutcome::NoMatches,
        });
    }

    let own: BTreeSet<CaseId> = state
        .linkage(id)
        .ok_or_else(|| stale(EntityRef::Linkage(*id)))?
        .autocases
        .clone();
    let siblings: Vec<LinkageId> = state
        .workitem(&workitem)
        .ok_or_else(|| stale(EntityRef::WorkItem(workitem.clone())))?
        .linkages
        .iter()
        .copied()
        .filter(|sibling| sibling != id)
        .collect();

    let mut deleted_siblings = Vec::new();
    for sibling in siblings {
        let sibling_set = state
            .linkage(&sibling)
            .ok_or_else(|| stale(EntityRef::Linkage(sibling)))?
            .autocases
            .clone();
        if own.len() > sibling_set.len() && own.is_superset(&sibling_set) {
            // Fully subsumed sibling is redundant.
            let related = state.related_for_checking(&EntityRef::Linkage(sibling));
            state.delete_linkage(&sibling);
            tracing::debug!(linkage = %id, deleted = %sibling, "pruned subsumed sibling linkage");
            deleted_siblings.push(DeletedLinkage {
                id: sibling,
                related,
            });
        } else if sibling_set.len() > own.len() && sibling_set.is_superset(&own) {
            // This linkage is the redundant one.
            let related = state.related_for_checking(&EntityRef::Linkage(*id));
            state.delete_linkage(id);
            tracing::debug!(linkage = %id, kept = %sibling, "linkage subsumed by sibling, deleted");
            return Ok(AutolinkReport {
                matched,
                outcome: AutolinkOutcome::SelfDeleted(DeletedLinkage { id: *id, related }),
            });
        }
    }

    Ok(AutolinkReport {
        matched,
        outcome: AutolinkOutcome::Kept { deleted_siblings },
    })
}

/// Rebuild a failure record's matched set. No subsumption: failures are
/// independent annotations.
pub fn autolink_failure(state: &mut State, id: &FailureId) -> CaselinkResult<usize> {
    let failure = state
        .failure(id)
        .ok_or_else(|| stale(EntityRef::Failure(*id)))?;
    let pattern = Pattern::parse(&failure.pattern)?;

    state.clear_failure_cases(id);
    let mut matched = 0usize;
    for case in state.case_ids() {
        if pattern.matches(case.as_str()) {
            state.link_failure_case(id, &case);
            matched += 1;
        }
    }
    tracing::debug!(failure = %id, matched, "failure autolink rebuilt matched set");
    Ok(matched)
}

/// Case-driven reverse autolink: attach this auto-case to every linkage
/// and failure record whose pattern matches it.
///
/// Additive on both sides; intended for initial bulk load, after which the
/// linkage-driven direction is the source of truth. Returns how many
/// claims were added.
pub fn autolink_case(state: &mut State, id: &CaseId) -> CaselinkResult<usize> {
    if state.autocase(id).is_none() {
        return Err(stale(EntityRef::AutoCase(id.clone())).into());
    }

    let mut added = 0usize;
    for linkage in state.linkage_ids() {
        let pattern = match state.linkage(&linkage) {
            Some(link) => Pattern::parse(&link.pattern)?,
            None => continue,
        };
        if pattern.matches(id.as_str()) {
            state.link_case(&linkage, id);
            added += 1;
        }
    }
    for failure in state.failure_ids() {
        let pattern = match state.failure(&failure) {
            Some(f) => Pattern::parse(&f.pattern)?,
            None => continue,
        };
        if pattern.matches(id.as_str()) {
            state.link_failure_case(&failure, id);
            added += 1;
        }
    }
    Ok(added)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{AutoCase, AutoCaseFailure, AutomationStatus, Linkage, WorkItem, WorkItemId};

    fn lid(raw: u64) -> LinkageId {
        LinkageId::new(raw).unwrap()
    }

    fn state_with_cases(cases: &[&str]) -> State {
        let mut state = State::default();
        state.upsert_workitem(WorkItem::new("WI-1", "t", AutomationStatus::Automated));
        for case in cases {
            state.upsert_autocase(AutoCase::new(*case));
        }
        state
    }

    #[test]
    fn rebuild_is_idempotent() {
        let mut state = state_with_cases(&["a.b.x", "a.b.y", "c.d"]);
        state.insert_linkage(Linkage::new(lid(1), "WI-1", "a.b"));

        for _ in 0..2 {
            let report = autolink_linkage(&mut state, &lid(1)).unwrap();
            assert_eq!(report.matched, 2);
            assert!(matches!(report.outcome, AutolinkOutcome::Kept { ref deleted_siblings } if deleted_siblings.is_empty()));
        }
        let matched = &state.linkage(&lid(1)).unwrap().autocases;
        assert_eq!(matched.len(), 2);
        assert!(state
            .autocase(&CaseId::new("a.b.x"))
            .unwrap()
            .linkages
            .contains(&lid(1)));
    }

    #[test]
    fn zero_matches_is_kept_for_the_checker() {
        let mut state = state_with_cases(&["c.d"]);
        state.insert_linkage(Linkage::new(lid(1), "WI-1", "a.b"));

        let report = autolink_linkage(&mut state, &lid(1)).unwrap();
        assert_eq!(report.matched, 0);
        assert!(matches!(report.outcome, AutolinkOutcome::NoMatches));
        assert!(state.linkage(&lid(1)).is_some());
    }

    #[test]
    fn strict_superset_deletes_the_sibling() {
        let mut state = state_with_cases(&["a.b.x", "a.b.y"]);
        state.insert_linkage(Linkage::new(lid(1), "WI-1", "a.b.x"));
        autolink_linkage(&mut state, &lid(1)).unwrap();
        state.insert_linkage(Linkage::new(lid(2), "WI-1", "a.b"));

        let report = autolink_linkage(&mut state, &lid(2)).unwrap();
        let AutolinkOutcome::Kept { deleted_siblings } = report.outcome else {
            panic!("expected Kept outcome");
        };
        assert_eq!(deleted_siblings.len(), 1);
        assert_eq!(deleted_siblings[0].id, lid(1));
        assert!(state.linkage(&lid(1)).is_none());
        assert!(state.linkage(&lid(2)).is_some());
    }

    #[test]
    fn strict_subset_deletes_itself() {
        let mut state = state_with_cases(&["a.b.x", "a.b.y"]);
        state.insert_linkage(Linkage::new(lid(1), "WI-1", "a.b"));
        autolink_linkage(&mut state, &lid(1)).unwrap();
        state.insert_linkage(Linkage::new(lid(2), "WI-1", "a.b.x"));

        let report = autolink_linkage(&mut state, &lid(2)).unwrap();
        assert!(matches!(report.outcome, AutolinkOutcome::SelfDeleted(_)));
        assert!(state.linkage(&lid(2)).is_none());
        assert!(state.linkage(&lid(1)).is_some());
    }

    #[test]
    fn equal_sets_are_left_alone() {
        let mut state = state_with_cases(&["a.b.x"]);
        state.insert_linkage(Linkage::new(lid(1), "WI-1", "a.b"));
        autolink_linkage(&mut state, &lid(1)).unwrap();
        state.insert_linkage(Linkage::new(lid(2), "WI-1", "a.b.x"));

        let report = autolink_linkage(&mut state, &lid(2)).unwrap();
        assert!(matches!(report.outcome, AutolinkOutcome::Kept { ref deleted_siblings } if deleted_siblings.is_empty()));
        assert!(state.linkage(&lid(1)).is_some());
        assert!(state.linkage(&lid(2)).is_some());
    }

    #[test]
    fn partial_overlap_is_left_alone() {
        let mut state = state_with_cases(&["a.b.x", "a.b.y", "a.c.x"]);
        // lid(1) matches {a.b.x, a.b.y}; lid(2) matches {a.b.x, a.c.x}.
        state.insert_linkage(Linkage::new(lid(1), "WI-1", "a.b"));
        autolink_linkage(&mut state, &lid(1)).unwrap();
        state.insert_linkage(Linkage::new(lid(2), "WI-1", "a..x"));

        let report = autolink_linkage(&mut state, &lid(2)).unwrap();
        assert!(matches!(report.outcome, AutolinkOutcome::Kept { ref deleted_siblings } if deleted_siblings.is_empty()));
        assert!(state.linkage(&lid(1)).is_some());
        assert!(state.linkage(&lid(2)).is_some());
    }

    #[test]
    fn failure_autolink_has_no_subsumption() {
        let mut state = state_with_cases(&["a.b.x", "a.b.y"]);
        let f1 = FailureId::new(1).unwrap();
        let f2 = FailureId::new(2).unwrap();
        state.insert_failure(AutoCaseFailure::new(f1, "a.b", "timeout"));
        state.insert_failure(AutoCaseFailure::new(f2, "a.b.x", "timeout"));

        assert_eq!(autolink_failure(&mut state, &f1).unwrap(), 2);
        assert_eq!(autolink_failure(&mut state, &f2).unwrap(), 1);
        assert!(state.failure(&f1).is_some());
        assert!(state.failure(&f2).is_some());
    }

    #[test]
    fn case_autolink_is_additive() {
        let mut state = state_with_cases(&["a.b.x"]);
        state.insert_linkage(Linkage::new(lid(1), "WI-1", "a.b"));
        let f1 = FailureId::new(1).unwrap();
        state.insert_failure(AutoCaseFailure::new(f1, "a..x", "oops"));

        let added = autolink_case(&mut state, &CaseId::new("a.b.x")).unwrap();
        assert_eq!(added, 2);
        assert!(state.linkage(&lid(1)).unwrap().autocases.contains(&CaseId::new("a.b.x")));
        assert!(state.failure(&f1).unwrap().autocases.contains(&CaseId::new("a.b.x")));

        // Running it again does not clear anything, only re-adds.
        let added = autolink_case(&mut state, &CaseId::new("a.b.x")).unwrap();
        assert_eq!(added, 2);
    }

    #[test]
    fn stale_linkage_fails_loudly() {
        let mut state = State::default();
        assert!(autolink_linkage(&mut state, &lid(9)).is_err());
    }
}
