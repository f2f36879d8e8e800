//! Entity store: in-memory relational tables with all-or-nothing
//! transactions and an optional durable snapshot layer.
//!
//! - [`State`] — the relational state proper: one `BTreeMap` table per
//!   entity kind, filter-by-field queries, and pairwise relation helpers.
//!   Deterministic iteration everywhere (checker and resolver results must
//!   be reproducible within a pass).
//! - [`Store`] — transactional facade: a transaction clones the state,
//!   runs the caller's closure against the clone, flushes the durable
//!   snapshot, and only then swaps the clone in. A failing cascade or a
//!   failing durable commit leaves the published state untouched.
//! - [`durable::DurableStore`] — redb-backed snapshot persistence.

pub mod durable;

use std::collections::BTreeMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::entity::{
    AutoCase, AutoCaseFailure, BlackListEntry, Bug, BugId, CaseId, EntityRef, EntryId, FailureId,
    IdAllocator, Linkage, LinkageId, WorkItem, WorkItemId,
};
use crate::error::{CaselinkResult, StoreResult};

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// The full relational state: entity tables keyed by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub(crate) workitems: BTreeMap<WorkItemId, WorkItem>,
    pub(crate) autocases: BTreeMap<CaseId, AutoCase>,
    pub(crate) linkages: BTreeMap<LinkageId, Linkage>,
    pub(crate) failures: BTreeMap<FailureId, AutoCaseFailure>,
    pub(crate) blacklist: BTreeMap<EntryId, BlackListEntry>,
    pub(crate) bugs: BTreeMap<BugId, Bug>,
}

impl State {
    // -- lookups ------------------------------------------------------------

    pub fn workitem(&self, id: &WorkItemId) -> Option<&WorkItem> {
        self.workitems.get(id)
    }

    pub fn workitem_mut(&mut self, id: &WorkItemId) -> Option<&mut WorkItem> {
        self.workitems.get_mut(id)
    }

    pub fn autocase(&self, id: &CaseId) -> Option<&AutoCase> {
        self.autocases.get(id)
    }

    pub fn autocase_mut(&mut self, id: &CaseId) -> Option<&mut AutoCase> {
        self.autocases.get_mut(id)
    }

    pub fn linkage(&self, id: &LinkageId) -> Option<&Linkage> {
        self.linkages.get(id)
    }

    pub fn linkage_mut(&mut self, id: &LinkageId) -> Option<&mut Linkage> {
        self.linkages.get_mut(id)
    }

    pub fn failure(&self, id: &FailureId) -> Option<&AutoCaseFailure> {
        self.failures.get(id)
    }

    pub fn blacklist_entry(&self, id: &EntryId) -> Option<&BlackListEntry> {
        self.blacklist.get(id)
    }

    pub fn bug(&self, id: &BugId) -> Option<&Bug> {
        self.bugs.get(id)
    }

    /// Whether the referenced entity is present in the store.
    pub fn entity_exists(&self, entity: &EntityRef) -> bool {
        match entity {
            EntityRef::WorkItem(id) => self.workitems.contains_key(id),
            EntityRef::AutoCase(id) => self.autocases.contains_key(id),
            EntityRef::Linkage(id) => self.linkages.contains_key(id),
            EntityRef::Failure(id) => self.failures.contains_key(id),
            EntityRef::Blacklist(id) => self.blacklist.contains_key(id),
        }
    }

    // -- id listings (snapshots, safe to hold across mutation) ---------------

    pub fn workitem_ids(&self) -> Vec<WorkItemId> {
        self.workitems.keys().cloned().collect()
    }

    pub fn case_ids(&self) -> Vec<CaseId> {
        self.autocases.keys().cloned().collect()
    }

    pub fn linkage_ids(&self) -> Vec<LinkageId> {
        self.linkages.keys().copied().collect()
    }

    pub fn failure_ids(&self) -> Vec<FailureId> {
        self.failures.keys().copied().collect()
    }

    // -- filter queries ------------------------------------------------------

    /// All work items sharing `title`, excluding `exclude` itself.
    pub fn workitems_with_title(&self, title: &str, exclude: &WorkItemId) -> Vec<WorkItemId> {
        self.workitems
            .values()
            .filter(|item| item.id != *exclude && item.title == title)
            .map(|item| item.id.clone())
            .collect()
    }

    /// All linkages (store-wide) declaring exactly this pattern string.
    pub fn linkages_with_pattern(&self, pattern: &str) -> Vec<LinkageId> {
        self.linkages
            .values()
            .filter(|link| link.pattern == pattern)
            .map(|link| link.id)
            .collect()
    }

    /// The linkage of `workitem` with this exact pattern, if any.
    pub fn linkage_for(&self, workitem: &WorkItemId, pattern: &str) -> Option<LinkageId> {
        self.workitem(workitem)?.linkages.iter().copied().find(|id| {
            self.linkages
                .get(id)
                .is_some_and(|link| link.pattern == pattern)
        })
    }

    /// The failure record with this exact (pattern, signature) pair, if any.
    pub fn failure_for(&self, pattern: &str, signature: &str) -> Option<FailureId> {
        self.failures
            .values()
            .find(|f| f.pattern == pattern && f.signature == signature)
            .map(|f| f.id)
    }

    /// The related-entity set consulted when an entity is rechecked or
    /// deleted: for a work item its duplicate-title peers plus its
    /// linkages; for an auto-case its claiming linkages; for a linkage its
    /// duplicate-pattern peers, owning work item, and matched cases.
    /// Failure and blacklist records relate to nothing.
    pub fn related_for_checking(&self, entity: &EntityRef) -> Vec<EntityRef> {
        match entity {
            EntityRef::WorkItem(id) => {
                let Some(item) = self.workitem(id) else {
                    return Vec::new();
                };
                item.related
                    .iter()
                    .cloned()
                    .map(EntityRef::WorkItem)
                    .chain(item.linkages.iter().copied().map(EntityRef::Linkage))
                    .collect()
            }
            EntityRef::AutoCase(id) => {
                let Some(case) = self.autocase(id) else {
                    return Vec::new();
                };
                case.linkages.iter().copied().map(EntityRef::Linkage).collect()
            }
            EntityRef::Linkage(id) => {
                let Some(link) = self.linkage(id) else {
                    return Vec::new();
                };
                link.related
                    .iter()
                    .copied()
                    .map(EntityRef::Linkage)
                    .chain(std::iter::once(EntityRef::WorkItem(link.workitem.clone())))
                    .chain(link.autocases.iter().cloned().map(EntityRef::AutoCase))
                    .collect()
            }
            EntityRef::Failure(_) | EntityRef::Blacklist(_) => Vec::new(),
        }
    }

    // -- inserts and upserts -------------------------------------------------

    /// Insert or update a work item, preserving checker-owned fields
    /// (errors, related edges, linkage reverse index) on update. Returns
    /// whether the record was newly created.
    pub fn upsert_workitem(&mut self, item: WorkItem) -> bool {
        match self.workitems.get_mut(&item.id) {
            Some(existing) => {
                existing.title = item.title;
                existing.automation = item.automation;
                existing.comment = item.comment;
                existing.changes = item.changes;
                false
            }
            None => {
                self.workitems.insert(item.id.clone(), item);
                true
            }
        }
    }

    /// Insert or update an auto-case, preserving checker-owned fields and
    /// reverse indexes on update. Returns whether it was newly created.
    pub fn upsert_autocase(&mut self, case: AutoCase) -> bool {
        match self.autocases.get_mut(&case.id) {
            Some(existing) => {
                existing.pr = case.pr;
                existing.start_commit = case.start_commit;
                existing.end_commit = case.end_commit;
                false
            }
            None => {
                self.autocases.insert(case.id.clone(), case);
                true
            }
        }
    }

    /// Insert a linkage and wire the owning work item's reverse index.
    /// The caller has already validated the pattern and uniqueness.
    pub fn insert_linkage(&mut self, link: Linkage) {
        if let Some(owner) = self.workitems.get_mut(&link.workitem) {
            owner.linkages.insert(link.id);
        }
        self.linkages.insert(link.id, link);
    }

    pub fn insert_failure(&mut self, failure: AutoCaseFailure) {
        self.failures.insert(failure.id, failure);
    }

    pub fn insert_blacklist_entry(&mut self, entry: BlackListEntry) {
        self.blacklist.insert(entry.id, entry);
    }

    pub fn insert_bug(&mut self, bug: Bug) {
        self.bugs.insert(bug.id.clone(), bug);
    }

    // -- matched-set relations (linkage/failure ↔ auto-case) -----------------

    /// Record that `linkage` matches `case`, both directions.
    pub fn link_case(&mut self, linkage: &LinkageId, case: &CaseId) {
        if let Some(link) = self.linkages.get_mut(linkage) {
            link.autocases.insert(case.clone());
        }
        if let Some(c) = self.autocases.get_mut(case) {
            c.linkages.insert(*linkage);
        }
    }

    /// Drop a linkage's whole matched set, both directions.
    pub fn clear_linkage_cases(&mut self, linkage: &LinkageId) {
        let Some(link) = self.linkages.get_mut(linkage) else {
            return;
        };
        let cases = std::mem::take(&mut link.autocases);
        for case in &cases {
            if let Some(c) = self.autocases.get_mut(case) {
                c.linkages.remove(linkage);
            }
        }
    }

    /// Record that `failure` matches `case`, both directions.
    pub fn link_failure_case(&mut self, failure: &FailureId, case: &CaseId) {
        if let Some(f) = self.failures.get_mut(failure) {
            f.autocases.insert(case.clone());
        }
        if let Some(c) = self.autocases.get_mut(case) {
            c.failures.insert(*failure);
        }
    }

    /// Drop a failure record's whole matched set, both directions.
    pub fn clear_failure_cases(&mut self, failure: &FailureId) {
        let Some(f) = self.failures.get_mut(failure) else {
            return;
        };
        let cases = std::mem::take(&mut f.autocases);
        for case in &cases {
            if let Some(c) = self.autocases.get_mut(case) {
                c.failures.remove(failure);
            }
        }
    }

    // -- symmetric "related" relations ---------------------------------------

    /// Relate two work items as duplicate-title evidence (symmetric).
    pub fn relate_workitems(&mut self, a: &WorkItemId, b: &WorkItemId) {
        if a == b {
            return;
        }
        if let Some(item) = self.workitems.get_mut(a) {
            item.related.insert(b.clone());
        }
        if let Some(item) = self.workitems.get_mut(b) {
            item.related.insert(a.clone());
        }
    }

    /// Clear a work item's related set, removing the back edges too.
    pub fn clear_workitem_related(&mut self, id: &WorkItemId) {
        let Some(item) = self.workitems.get_mut(id) else {
            return;
        };
        let related = std::mem::take(&mut item.related);
        for peer in &related {
            if let Some(p) = self.workitems.get_mut(peer) {
                p.related.remove(id);
            }
        }
    }

    /// Relate two linkages as duplicate-pattern evidence (symmetric).
    pub fn relate_linkages(&mut self, a: &LinkageId, b: &LinkageId) {
        if a == b {
            return;
        }
        if let Some(link) = self.linkages.get_mut(a) {
            link.related.insert(*b);
        }
        if let Some(link) = self.linkages.get_mut(b) {
            link.related.insert(*a);
        }
    }

    /// Clear a linkage's related set, removing the back edges too.
    pub fn clear_linkage_related(&mut self, id: &LinkageId) {
        let Some(link) = self.linkages.get_mut(id) else {
            return;
        };
        let related = std::mem::take(&mut link.related);
        for peer in &related {
            if let Some(p) = self.linkages.get_mut(peer) {
                p.related.remove(id);
            }
        }
    }

    // -- deletion ------------------------------------------------------------

    /// Remove a linkage and every reference to it (owner reverse index,
    /// matched-case reverse indexes, symmetric related edges).
    pub fn delete_linkage(&mut self, id: &LinkageId) -> Option<Linkage> {
        self.clear_linkage_cases(id);
        self.clear_linkage_related(id);
        let link = self.linkages.remove(id)?;
        if let Some(owner) = self.workitems.get_mut(&link.workitem) {
            owner.linkages.remove(id);
        }
        Some(link)
    }

    /// Remove a work item. The caller has already verified that no linkage
    /// still references it.
    pub fn delete_workitem(&mut self, id: &WorkItemId) -> Option<WorkItem> {
        self.clear_workitem_related(id);
        for entry in self.blacklist.values_mut() {
            entry.workitems.remove(id);
        }
        self.workitems.remove(id)
    }

    /// Remove an auto-case and its reverse memberships in linkages and
    /// failure records.
    pub fn delete_autocase(&mut self, id: &CaseId) -> Option<AutoCase> {
        let case = self.autocases.remove(id)?;
        for linkage in &case.linkages {
            if let Some(link) = self.linkages.get_mut(linkage) {
                link.autocases.remove(id);
            }
        }
        for failure in &case.failures {
            if let Some(f) = self.failures.get_mut(failure) {
                f.autocases.remove(id);
            }
        }
        Some(case)
    }

    /// Remove a failure record and every reference to it.
    pub fn delete_failure(&mut self, id: &FailureId) -> Option<AutoCaseFailure> {
        self.clear_failure_cases(id);
        let failure = self.failures.remove(id)?;
        for entry in self.blacklist.values_mut() {
            entry.failures.remove(id);
        }
        Some(failure)
    }

    pub fn delete_blacklist_entry(&mut self, id: &EntryId) -> Option<BlackListEntry> {
        self.blacklist.remove(id)
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Transactional facade over [`State`], with optional durable snapshots.
pub struct Store {
    state: RwLock<State>,
    durable: Option<durable::DurableStore>,
    linkage_ids: IdAllocator,
    failure_ids: IdAllocator,
    entry_ids: IdAllocator,
}

impl Store {
    /// Create an empty memory-only store.
    pub fn in_memory() -> Self {
        Self::with_state(State::default(), None)
    }

    /// Open a store backed by a durable snapshot, loading it if present.
    pub fn with_durable(durable: durable::DurableStore) -> StoreResult<Self> {
        let state = durable.load()?.unwrap_or_default();
        Ok(Self::with_state(state, Some(durable)))
    }

    fn with_state(state: State, durable: Option<durable::DurableStore>) -> Self {
        let next = |max: Option<u64>| max.map_or(1, |m| m + 1);
        let linkage_ids = IdAllocator::starting_at(
            next(state.linkages.keys().next_back().map(|id| id.get())),
            "linkage",
        );
        let failure_ids = IdAllocator::starting_at(
            next(state.failures.keys().next_back().map(|id| id.get())),
            "failure",
        );
        let entry_ids = IdAllocator::starting_at(
            next(state.blacklist.keys().next_back().map(|id| id.get())),
            "blacklist entry",
        );
        Self {
            state: RwLock::new(state),
            durable,
            linkage_ids,
            failure_ids,
            entry_ids,
        }
    }

    /// Allocate the next linkage id. Ids handed out inside a rolled-back
    /// transaction are burned, like a relational sequence.
    pub fn allocate_linkage_id(&self) -> StoreResult<LinkageId> {
        self.linkage_ids.next_raw().map(LinkageId::from_raw)
    }

    pub fn allocate_failure_id(&self) -> StoreResult<FailureId> {
        self.failure_ids.next_raw().map(FailureId::from_raw)
    }

    pub fn allocate_entry_id(&self) -> StoreResult<EntryId> {
        self.entry_ids.next_raw().map(EntryId::from_raw)
    }

    /// Run a read-only closure against the current state.
    pub fn read<T>(&self, f: impl FnOnce(&State) -> T) -> T {
        let state = self.state.read().expect("state lock poisoned");
        f(&state)
    }

    /// Run a mutating closure as one all-or-nothing transaction.
    ///
    /// The closure operates on a clone of the state. If it returns `Ok`
    /// and the durable flush (when configured) succeeds, the clone is
    /// swapped in; on any `Err` the published state is left untouched and
    /// the caller must retry the whole triggering event.
    pub fn transaction<T>(
        &self,
        f: impl FnOnce(&mut State) -> CaselinkResult<T>,
    ) -> CaselinkResult<T> {
        let mut state = self.state.write().expect("state lock poisoned");
        let mut working = state.clone();
        let out = f(&mut working)?;
        if let Some(durable) = &self.durable {
            durable.save(&working)?;
        }
        *state = working;
        Ok(out)
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::AutomationStatus;
    use crate::error::{CaselinkError, StoreError};

    fn linkage_id(raw: u64) -> LinkageId {
        LinkageId::new(raw).unwrap()
    }

    #[test]
    fn transaction_commits_on_ok() {
        let store = Store::in_memory();
        store
            .transaction(|state| {
                state.upsert_workitem(WorkItem::new("WI-1", "t", AutomationStatus::Automated));
                Ok(())
            })
            .unwrap();
        assert!(store.read(|s| s.workitem(&WorkItemId::new("WI-1")).is_some()));
    }

    #[test]
    fn transaction_rolls_back_on_err() {
        let store = Store::in_memory();
        let before = store.read(Clone::clone);
        let result: CaselinkResult<()> = store.transaction(|state| {
            state.upsert_workitem(WorkItem::new("WI-1", "t", AutomationStatus::Automated));
            Err(StoreError::MissingEntity {
                entity: "injected".into(),
            }
            .into())
        });
        assert!(matches!(
            result,
            Err(CaselinkError::Store(StoreError::MissingEntity { .. }))
        ));
        assert_eq!(store.read(Clone::clone), before);
    }

    #[test]
    fn related_workitem_edges_are_symmetric() {
        let mut state = State::default();
        state.upsert_workitem(WorkItem::new("A", "t", AutomationStatus::NotAutomated));
        state.upsert_workitem(WorkItem::new("B", "t", AutomationStatus::NotAutomated));
        let a = WorkItemId::new("A");
        let b = WorkItemId::new("B");

        state.relate_workitems(&a, &b);
        assert!(state.workitem(&b).unwrap().related.contains(&a));

        state.clear_workitem_related(&a);
        assert!(state.workitem(&a).unwrap().related.is_empty());
        assert!(state.workitem(&b).unwrap().related.is_empty());
    }

    #[test]
    fn delete_linkage_unwires_everything() {
        let mut state = State::default();
        state.upsert_workitem(WorkItem::new("WI-1", "t", AutomationStatus::Automated));
        state.upsert_autocase(AutoCase::new("a.b"));
        let id = linkage_id(1);
        state.insert_linkage(Linkage::new(id, "WI-1", "a.b"));
        state.link_case(&id, &CaseId::new("a.b"));

        assert!(state.delete_linkage(&id).is_some());
        let wi = WorkItemId::new("WI-1");
        assert!(state.workitem(&wi).unwrap().linkages.is_empty());
        assert!(
            state
                .autocase(&CaseId::new("a.b"))
                .unwrap()
                .linkages
                .is_empty()
        );
    }

    #[test]
    fn allocator_resumes_past_loaded_ids() {
        let mut state = State::default();
        state.upsert_workitem(WorkItem::new("WI-1", "t", AutomationStatus::Automated));
        state.insert_linkage(Linkage::new(linkage_id(5), "WI-1", "a.b"));
        let store = Store::with_state(state, None);
        assert_eq!(store.allocate_linkage_id().unwrap().get(), 6);
    }
}
