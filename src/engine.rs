//! Engine facade: the API handed to the sync, web, and maintenance layers.
//!
//! The `Engine` owns the store, the event dispatcher, and the
//! configuration. Every mutation routes the matching [`EntityEvent`]
//! through the dispatcher, so the autolink + consistency cascade for one
//! triggering event commits atomically or not at all. The engine never
//! invents entities of its own; it only relays what the outside layers
//! report and keeps the linkage graph's annotations consistent.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::check;
use crate::dispatch::{Dispatcher, EntityEvent, Outcome};
use crate::entity::{
    AutoCase, AutoCaseFailure, BlackListEntry, Bug, BugId, CaseId, EntityRef, EntryId,
    EntryStatus, FailureId, Linkage, LinkageId, WorkItem, WorkItemId,
};
use crate::error::{CaselinkResult, EngineError, EntityError, StoreError};
use crate::link::{self, AutolinkReport};
use crate::pattern::Pattern;
use crate::store::{Store, durable::DurableStore};
use crate::tag::ErrorTag;

fn default_check_depth() -> usize {
    1
}

fn default_autolink() -> bool {
    true
}

/// Configuration for the caselink engine, loadable from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Data directory for the durable snapshot. `None` for memory-only.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    /// Cascade depth used for mutation-triggered checks.
    #[serde(default = "default_check_depth")]
    pub check_depth: usize,
    /// Whether mutations trigger autolink before the consistency check.
    #[serde(default = "default_autolink")]
    pub autolink_on_mutation: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            check_depth: default_check_depth(),
            autolink_on_mutation: default_autolink(),
        }
    }
}

impl EngineConfig {
    /// Load a config from a TOML file.
    pub fn from_path(path: &Path) -> CaselinkResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| EngineError::ConfigRead {
            path: path.display().to_string(),
            source,
        })?;
        let config = toml::from_str(&text).map_err(|e| EngineError::ConfigParse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Ok(config)
    }
}

/// The caselink linkage-tracking engine.
pub struct Engine {
    config: EngineConfig,
    store: Store,
    dispatcher: Dispatcher,
}

impl Engine {
    /// Create a new engine, loading the durable snapshot when a data
    /// directory is configured.
    pub fn new(config: EngineConfig) -> CaselinkResult<Self> {
        let store = match &config.data_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir).map_err(|source| EngineError::DataDir {
                    path: dir.display().to_string(),
                    source,
                })?;
                Store::with_durable(DurableStore::open(dir)?)?
            }
            None => Store::in_memory(),
        };
        let dispatcher = Dispatcher::new(config.check_depth, config.autolink_on_mutation);

        let (workitems, autocases, linkages) = store.read(|state| {
            (
                state.workitem_ids().len(),
                state.case_ids().len(),
                state.linkage_ids().len(),
            )
        });
        tracing::info!(workitems, autocases, linkages, "caselink engine initialized");

        Ok(Self {
            config,
            store,
            dispatcher,
        })
    }

    /// The engine's configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Raw store access, for the maintenance layer and tests.
    pub fn store(&self) -> &Store {
        &self.store
    }

    // -- mutation API (sync/web layers) --------------------------------------

    /// Create or update a work item from the tracking system, then run the
    /// mutation-triggered consistency cascade.
    pub fn upsert_workitem(&self, item: WorkItem) -> CaselinkResult<Outcome> {
        let id = item.id.clone();
        let created = self.store.transaction(|state| Ok(state.upsert_workitem(item)))?;
        self.dispatch_change(created, EntityRef::WorkItem(id))
    }

    /// Create or update an auto-case, then run the cascade (including the
    /// additive case-driven autolink).
    pub fn upsert_autocase(&self, case: AutoCase) -> CaselinkResult<Outcome> {
        let id = case.id.clone();
        let created = self.store.transaction(|state| Ok(state.upsert_autocase(case)))?;
        self.dispatch_change(created, EntityRef::AutoCase(id))
    }

    /// Declare a linkage between a work item and a pattern.
    ///
    /// The pattern is validated up front and the `(workitem, pattern)` pair
    /// must be unique. The returned id may refer to a linkage the autolink
    /// resolver immediately judged redundant and deleted; look it up to
    /// find out whether it survived.
    pub fn add_linkage(&self, workitem: &WorkItemId, pattern: &str) -> CaselinkResult<LinkageId> {
        Pattern::parse(pattern)?;
        let id = self.store.allocate_linkage_id()?;
        self.store.transaction(|state| {
            if state.workitem(workitem).is_none() {
                return Err(StoreError::MissingEntity {
                    entity: format!("workitem:{workitem}"),
                }
                .into());
            }
            if state.linkage_for(workitem, pattern).is_some() {
                return Err(StoreError::DuplicateLinkage {
                    workitem: workitem.to_string(),
                    pattern: pattern.to_owned(),
                }
                .into());
            }
            state.insert_linkage(Linkage::new(id, workitem.clone(), pattern));
            Ok(())
        })?;
        self.dispatcher
            .handle(&self.store, &EntityEvent::Created(EntityRef::Linkage(id)))?;
        Ok(id)
    }

    /// Declare a failure record: a pattern plus a failure-signature regex,
    /// unique per (pattern, signature).
    pub fn add_failure(&self, pattern: &str, signature: &str) -> CaselinkResult<FailureId> {
        Pattern::parse(pattern)?;
        regex::Regex::new(signature).map_err(|e| EntityError::InvalidSignature {
            signature: signature.to_owned(),
            message: e.to_string(),
        })?;
        let id = self.store.allocate_failure_id()?;
        self.store.transaction(|state| {
            if state.failure_for(pattern, signature).is_some() {
                return Err(StoreError::DuplicateFailure {
                    pattern: pattern.to_owned(),
                    signature: signature.to_owned(),
                }
                .into());
            }
            state.insert_failure(AutoCaseFailure::new(id, pattern, signature));
            Ok(())
        })?;
        self.dispatcher
            .handle(&self.store, &EntityEvent::Created(EntityRef::Failure(id)))?;
        Ok(id)
    }

    /// Record an externally tracked bug.
    pub fn add_bug(&self, bug: Bug) -> CaselinkResult<()> {
        self.store.transaction(|state| {
            state.insert_bug(bug);
            Ok(())
        })
    }

    /// Create a blacklist entry after validating its status/bug rules and
    /// that every referenced record exists.
    pub fn add_blacklist_entry(
        &self,
        status: EntryStatus,
        description: &str,
        bugs: BTreeSet<BugId>,
        workitems: BTreeSet<WorkItemId>,
        failures: BTreeSet<FailureId>,
    ) -> CaselinkResult<EntryId> {
        let id = self.store.allocate_entry_id()?;
        self.store.transaction(|state| {
            for bug in &bugs {
                if state.bug(bug).is_none() {
                    return Err(StoreError::MissingEntity {
                        entity: format!("bug:{bug}"),
                    }
                    .into());
                }
            }
            for workitem in &workitems {
                if state.workitem(workitem).is_none() {
                    return Err(StoreError::MissingEntity {
                        entity: format!("workitem:{workitem}"),
                    }
                    .into());
                }
            }
            for failure in &failures {
                if state.failure(failure).is_none() {
                    return Err(StoreError::MissingEntity {
                        entity: failure.to_string(),
                    }
                    .into());
                }
            }
            let mut entry = BlackListEntry::new(id, status, description);
            entry.bugs = bugs;
            entry.workitems = workitems;
            entry.failures = failures;
            entry.validate()?;
            state.insert_blacklist_entry(entry);
            Ok(())
        })?;
        self.dispatcher
            .handle(&self.store, &EntityEvent::Created(EntityRef::Blacklist(id)))?;
        Ok(id)
    }

    /// Remove a work item. Refused while linkages still reference it.
    pub fn remove_workitem(&self, id: &WorkItemId) -> CaselinkResult<Outcome> {
        let entity = EntityRef::WorkItem(id.clone());
        let related = self.store.transaction(|state| {
            let item = state.workitem(id).ok_or_else(|| StoreError::MissingEntity {
                entity: entity.to_string(),
            })?;
            if !item.linkages.is_empty() {
                return Err(StoreError::WorkItemProtected {
                    workitem: id.to_string(),
                    count: item.linkages.len(),
                }
                .into());
            }
            let related = state.related_for_checking(&entity);
            state.delete_workitem(id);
            Ok(related)
        })?;
        self.dispatcher
            .handle(&self.store, &EntityEvent::Deleted { entity, related })
    }

    /// Remove an auto-case and recheck the linkages that claimed it.
    pub fn remove_autocase(&self, id: &CaseId) -> CaselinkResult<Outcome> {
        let entity = EntityRef::AutoCase(id.clone());
        let related = self.store.transaction(|state| {
            if state.autocase(id).is_none() {
                return Err(StoreError::MissingEntity {
                    entity: entity.to_string(),
                }
                .into());
            }
            let related = state.related_for_checking(&entity);
            state.delete_autocase(id);
            Ok(related)
        })?;
        self.dispatcher
            .handle(&self.store, &EntityEvent::Deleted { entity, related })
    }

    /// Remove a linkage and recheck its work item, cases, and duplicates.
    pub fn remove_linkage(&self, id: LinkageId) -> CaselinkResult<Outcome> {
        let entity = EntityRef::Linkage(id);
        let related = self.store.transaction(|state| {
            if state.linkage(&id).is_none() {
                return Err(StoreError::MissingEntity {
                    entity: entity.to_string(),
                }
                .into());
            }
            let related = state.related_for_checking(&entity);
            state.delete_linkage(&id);
            Ok(related)
        })?;
        self.dispatcher
            .handle(&self.store, &EntityEvent::Deleted { entity, related })
    }

    /// Remove a failure record. Failures relate to nothing for checking
    /// purposes, so no recheck cascade follows.
    pub fn remove_failure(&self, id: FailureId) -> CaselinkResult<Outcome> {
        let entity = EntityRef::Failure(id);
        let related = self.store.transaction(|state| {
            if state.failure(&id).is_none() {
                return Err(StoreError::MissingEntity {
                    entity: entity.to_string(),
                }
                .into());
            }
            let related = state.related_for_checking(&entity);
            state.delete_failure(&id);
            Ok(related)
        })?;
        self.dispatcher
            .handle(&self.store, &EntityEvent::Deleted { entity, related })
    }

    // -- sticky tag management (sync layer) ----------------------------------

    /// Mark a work item as deleted upstream. The tag sticks across checker
    /// passes until explicitly cleared.
    pub fn mark_workitem_deleted(&self, id: &WorkItemId) -> CaselinkResult<()> {
        self.set_workitem_tag(id, ErrorTag::WorkitemDeleted, true)
    }

    /// Clear the upstream-deletion marker.
    pub fn mark_workitem_not_deleted(&self, id: &WorkItemId) -> CaselinkResult<()> {
        self.set_workitem_tag(id, ErrorTag::WorkitemDeleted, false)
    }

    fn set_workitem_tag(
        &self,
        id: &WorkItemId,
        tag: ErrorTag,
        present: bool,
    ) -> CaselinkResult<()> {
        self.store.transaction(|state| {
            let item = state.workitem_mut(id).ok_or_else(|| StoreError::MissingEntity {
                entity: format!("workitem:{id}"),
            })?;
            if present {
                item.errors.insert(tag);
            } else {
                item.errors.remove(&tag);
            }
            Ok(())
        })
    }

    /// Mark an auto-case as added in a not-yet-merged pull request.
    pub fn mark_autocase_pr_not_merged(&self, id: &CaseId) -> CaselinkResult<()> {
        self.set_autocase_tag(id, ErrorTag::AutocasePrNotMerged, true)
    }

    /// Mark an auto-case as deleted in a pending pull request.
    pub fn mark_autocase_deleted_in_pr(&self, id: &CaseId) -> CaselinkResult<()> {
        self.set_autocase_tag(id, ErrorTag::AutocaseDeletedInPr, true)
    }

    /// Clear both PR markers, e.g. once the pull request merges.
    pub fn clear_autocase_pr_tags(&self, id: &CaseId) -> CaselinkResult<()> {
        self.set_autocase_tag(id, ErrorTag::AutocasePrNotMerged, false)?;
        self.set_autocase_tag(id, ErrorTag::AutocaseDeletedInPr, false)
    }

    fn set_autocase_tag(&self, id: &CaseId, tag: ErrorTag, present: bool) -> CaselinkResult<()> {
        self.store.transaction(|state| {
            let case = state.autocase_mut(id).ok_or_else(|| StoreError::MissingEntity {
                entity: format!("autocase:{id}"),
            })?;
            if present {
                case.errors.insert(tag);
            } else {
                case.errors.remove(&tag);
            }
            Ok(())
        })
    }

    // -- checking API ---------------------------------------------------------

    /// Recompute error tags for one entity with an explicit depth budget.
    pub fn error_check(&self, entity: &EntityRef, depth: usize) -> CaselinkResult<()> {
        self.store
            .transaction(|state| Ok(check::error_check(state, entity, depth)?))
    }

    /// Rebuild one linkage's matched set, pruning subsumed siblings.
    pub fn autolink_linkage(&self, id: LinkageId) -> CaselinkResult<AutolinkReport> {
        self.store.transaction(|state| link::autolink_linkage(state, &id))
    }

    /// Rebuild one failure record's matched set.
    pub fn autolink_failure(&self, id: FailureId) -> CaselinkResult<usize> {
        self.store.transaction(|state| link::autolink_failure(state, &id))
    }

    /// Additively attach one auto-case to every matching linkage/failure.
    pub fn autolink_autocase(&self, id: &CaseId) -> CaselinkResult<usize> {
        self.store.transaction(|state| link::autolink_case(state, id))
    }

    // -- maintenance operations ----------------------------------------------

    /// One-shot bulk load: run the additive case-driven autolink over every
    /// auto-case. After this, the linkage-driven direction is the source of
    /// truth.
    pub fn init_linkage(&self) -> CaselinkResult<()> {
        self.store.transaction(|state| {
            let cases = state.case_ids();
            for case in &cases {
                link::autolink_case(state, case)?;
            }
            tracing::info!(cases = cases.len(), "bulk autolink finished");
            Ok(())
        })
    }

    /// Full re-scan: depth-0 recheck of every work item, auto-case, and
    /// linkage, in that order, as one transaction.
    pub fn init_error_checking(&self) -> CaselinkResult<()> {
        self.store.transaction(|state| {
            for id in state.workitem_ids() {
                check::check_workitem(state, &id, 0)?;
            }
            for id in state.case_ids() {
                check::check_autocase(state, &id, 0)?;
            }
            for id in state.linkage_ids() {
                check::check_linkage(state, &id, 0)?;
            }
            tracing::info!("full error re-scan finished");
            Ok(())
        })
    }

    /// Depth-0 recheck of a single work item.
    pub fn check_workitem(&self, id: &WorkItemId) -> CaselinkResult<()> {
        self.store
            .transaction(|state| Ok(check::check_workitem(state, id, 0)?))
    }

    /// Depth-0 recheck of a single auto-case.
    pub fn check_autocase(&self, id: &CaseId) -> CaselinkResult<()> {
        self.store
            .transaction(|state| Ok(check::check_autocase(state, id, 0)?))
    }

    /// Depth-0 recheck of a single linkage.
    pub fn check_linkage(&self, id: LinkageId) -> CaselinkResult<()> {
        self.store
            .transaction(|state| Ok(check::check_linkage(state, &id, 0)?))
    }

    // -- read API -------------------------------------------------------------

    pub fn workitem(&self, id: &WorkItemId) -> Option<WorkItem> {
        self.store.read(|state| state.workitem(id).cloned())
    }

    pub fn autocase(&self, id: &CaseId) -> Option<AutoCase> {
        self.store.read(|state| state.autocase(id).cloned())
    }

    pub fn linkage(&self, id: LinkageId) -> Option<Linkage> {
        self.store.read(|state| state.linkage(&id).cloned())
    }

    pub fn failure(&self, id: FailureId) -> Option<AutoCaseFailure> {
        self.store.read(|state| state.failure(&id).cloned())
    }

    pub fn blacklist_entry(&self, id: EntryId) -> Option<BlackListEntry> {
        self.store.read(|state| state.blacklist_entry(&id).cloned())
    }

    /// Current error tags of any entity, if it exists.
    pub fn errors_of(&self, entity: &EntityRef) -> Option<BTreeSet<ErrorTag>> {
        self.store.read(|state| match entity {
            EntityRef::WorkItem(id) => state.workitem(id).map(|e| e.errors.clone()),
            EntityRef::AutoCase(id) => state.autocase(id).map(|e| e.errors.clone()),
            EntityRef::Linkage(id) => state.linkage(id).map(|e| e.errors.clone()),
            EntityRef::Failure(id) => state.failure(id).map(|e| e.errors.clone()),
            EntityRef::Blacklist(id) => state.blacklist_entry(id).map(|e| e.errors.clone()),
        })
    }

    /// Union of the matched auto-cases of a blacklist entry's failures.
    pub fn blacklist_autocases(&self, id: EntryId) -> Option<Vec<CaseId>> {
        self.store.read(|state| {
            let entry = state.blacklist_entry(&id)?;
            let mut cases = Vec::new();
            for failure in &entry.failures {
                if let Some(f) = state.failure(failure) {
                    cases.extend(f.autocases.iter().cloned());
                }
            }
            Some(cases)
        })
    }

    fn dispatch_change(&self, created: bool, entity: EntityRef) -> CaselinkResult<Outcome> {
        let event = if created {
            EntityEvent::Created(entity)
        } else {
            EntityEvent::Updated(entity)
        };
        self.dispatcher.handle(&self.store, &event)
    }
}
