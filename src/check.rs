//! Cascading, depth-bounded consistency checker.
//!
//! `error_check` recomputes one entity's error tags from scratch and, with
//! a positive depth budget, cascades the recheck to related entities at
//! `depth - 1`. The per-type ordering is normative:
//!
//! 1. recheck the *current* related set (it is about to be rebuilt, and
//!    must reflect the pre-rebuild entities' own fresh state),
//! 2. save sticky tags, clear, recompute own tags and related edges,
//! 3. cascade to the freshly rebuilt related-for-checking set.
//!
//! Termination is bounded purely by the integer depth; there is no visited
//! set, so an entity reachable along several paths is rechecked several
//! times within one top-level call. Rechecks are idempotent, so revisits
//! only cost time, and the graph is small.

use crate::entity::{AutomationStatus, CaseId, EntityRef, LinkageId, WorkItemId};
use crate::error::{CheckError, CheckResult};
use crate::store::State;
use crate::tag::ErrorTag;

fn stale(entity: &EntityRef) -> CheckError {
    CheckError::StaleReference {
        entity: entity.to_string(),
    }
}

/// Recompute error tags for any checkable entity.
///
/// `depth = 0` recomputes the entity's own tags only; `depth = n` cascades
/// up to `n` relation hops. Invoking it on a reference that is no longer
/// in the store is a caller bug and fails loudly.
pub fn error_check(state: &mut State, entity: &EntityRef, depth: usize) -> CheckResult<()> {
    match entity {
        EntityRef::WorkItem(id) => check_workitem(state, id, depth),
        EntityRef::AutoCase(id) => check_autocase(state, id, depth),
        EntityRef::Linkage(id) => check_linkage(state, id, depth),
        // No consistency logic is defined for failure records and blacklist
        // entries; the uniform interface is kept so callers can invoke
        // error_check on any entity ref.
        EntityRef::Failure(_) | EntityRef::Blacklist(_) => {
            if state.entity_exists(entity) {
                Ok(())
            } else {
                Err(stale(entity))
            }
        }
    }
}

pub(crate) fn check_workitem(state: &mut State, id: &WorkItemId, depth: usize) -> CheckResult<()> {
    let entity = EntityRef::WorkItem(id.clone());
    let item = state.workitem(id).ok_or_else(|| stale(&entity))?;

    // The duplicate-title edges are rebuilt below; recheck the entities
    // currently on them first.
    if depth > 0 {
        let related: Vec<WorkItemId> = item.related.iter().cloned().collect();
        for peer in related {
            check_workitem(state, &peer, depth - 1)?;
        }
    }

    let (title, automation, was_deleted) = {
        let item = state.workitem_mut(id).ok_or_else(|| stale(&entity))?;
        let was_deleted = item.errors.contains(&ErrorTag::WorkitemDeleted);
        item.errors.clear();
        (item.title.clone(), item.automation, was_deleted)
    };

    state.clear_workitem_related(id);
    let duplicates = state.workitems_with_title(&title, id);
    for peer in &duplicates {
        state.relate_workitems(id, peer);
    }

    let linkage_count = state
        .workitem(id)
        .ok_or_else(|| stale(&entity))?
        .linkages
        .len();

    {
        let item = state.workitem_mut(id).ok_or_else(|| stale(&entity))?;
        if !duplicates.is_empty() {
            item.errors.insert(ErrorTag::WorkitemTitleDuplicate);
        }
        if linkage_count > 1 {
            item.errors.insert(ErrorTag::WorkitemMultiPattern);
        }
        if linkage_count == 0 {
            if automation == AutomationStatus::Automated {
                item.errors.insert(ErrorTag::WorkitemAutomatedNoLinkage);
            }
        } else if automation != AutomationStatus::Automated {
            item.errors.insert(ErrorTag::WorkitemNotautomatedWithLinkage);
        }
        if item.comment.is_some() {
            item.errors.insert(ErrorTag::WorkitemHasComment);
        }
        if item.changes.is_some() {
            item.errors.insert(ErrorTag::WorkitemChanged);
        }
        if was_deleted {
            item.errors.insert(ErrorTag::WorkitemDeleted);
        }
    }
    tracing::trace!(workitem = %id, depth, "workitem tags recomputed");

    if depth > 0 {
        for peer in state.related_for_checking(&entity) {
            error_check(state, &peer, depth - 1)?;
        }
    }
    Ok(())
}

pub(crate) fn check_autocase(state: &mut State, id: &CaseId, depth: usize) -> CheckResult<()> {
    let entity = EntityRef::AutoCase(id.clone());
    let case = state.autocase(id).ok_or_else(|| stale(&entity))?;

    let sticky_pr = case.errors.contains(&ErrorTag::AutocasePrNotMerged);
    let sticky_deleted = case.errors.contains(&ErrorTag::AutocaseDeletedInPr);
    let claiming: Vec<LinkageId> = case.linkages.iter().copied().collect();

    {
        let case = state.autocase_mut(id).ok_or_else(|| stale(&entity))?;
        case.errors.clear();
        if claiming.is_empty() {
            case.errors.insert(ErrorTag::NoLinkage);
        }
        if claiming.len() > 1 {
            case.errors.insert(ErrorTag::MultipleWorkitem);
        }
    }
    tracing::trace!(autocase = %id, depth, claimed_by = claiming.len(), "autocase tags recomputed");

    if depth > 0 {
        for linkage in &claiming {
            check_linkage(state, linkage, depth - 1)?;
        }
    }

    // Re-add the sticky PR markers after the cascade, so nested rechecks of
    // this case cannot make the outer save decision stale.
    if sticky_pr || sticky_deleted {
        let case = state.autocase_mut(id).ok_or_else(|| stale(&entity))?;
        if sticky_pr {
            case.errors.insert(ErrorTag::AutocasePrNotMerged);
        }
        if sticky_deleted {
            case.errors.insert(ErrorTag::AutocaseDeletedInPr);
        }
    }
    Ok(())
}

pub(crate) fn check_linkage(state: &mut State, id: &LinkageId, depth: usize) -> CheckResult<()> {
    let entity = EntityRef::Linkage(*id);
    let link = state.linkage(id).ok_or_else(|| stale(&entity))?;

    // Recheck the current duplicate-pattern edges before rebuilding them.
    if depth > 0 {
        let related: Vec<LinkageId> = link.related.iter().copied().collect();
        for peer in related {
            check_linkage(state, &peer, depth - 1)?;
        }
    }

    state.clear_linkage_related(id);
    let (pattern, matched_count) = {
        let link = state.linkage_mut(id).ok_or_else(|| stale(&entity))?;
        link.errors.clear();
        (link.pattern.clone(), link.autocases.len())
    };

    if matched_count < 1 {
        let link = state.linkage_mut(id).ok_or_else(|| stale(&entity))?;
        link.errors.insert(ErrorTag::PatternInvalid);
    }

    let sharing = state.linkages_with_pattern(&pattern);
    if sharing.len() > 1 {
        let link = state.linkage_mut(id).ok_or_else(|| stale(&entity))?;
        link.errors.insert(ErrorTag::PatternDuplicate);
        for peer in sharing {
            if peer != *id {
                state.relate_linkages(id, &peer);
            }
        }
    }
    tracing::trace!(linkage = %id, depth, matched = matched_count, "linkage tags recomputed");

    if depth > 0 {
        for peer in state.related_for_checking(&entity) {
            error_check(state, &peer, depth - 1)?;
        }
    }
    Ok(())
}
