//! Durable snapshot layer backed by redb.
//!
//! Every committed store transaction rewrites the snapshot: one redb table
//! per entity kind, rows bincode-encoded. All writes go through a single
//! redb write transaction, so a snapshot is either fully on disk or not at
//! all; a failed commit surfaces as [`StoreError::Durable`] and the caller
//! keeps its previous in-memory state.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition, TableError};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{StoreError, StoreResult};
use crate::store::State;

const WORKITEMS: TableDefinition<&str, &[u8]> = TableDefinition::new("workitems");
const AUTOCASES: TableDefinition<&str, &[u8]> = TableDefinition::new("autocases");
const LINKAGES: TableDefinition<u64, &[u8]> = TableDefinition::new("linkages");
const FAILURES: TableDefinition<u64, &[u8]> = TableDefinition::new("failures");
const BLACKLIST: TableDefinition<u64, &[u8]> = TableDefinition::new("blacklist");
const BUGS: TableDefinition<&str, &[u8]> = TableDefinition::new("bugs");

fn encode<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| StoreError::Serialization {
        message: e.to_string(),
    })
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    bincode::deserialize(bytes).map_err(|e| StoreError::Serialization {
        message: e.to_string(),
    })
}

fn durable_err(context: &str, e: impl std::fmt::Display) -> StoreError {
    StoreError::Durable {
        message: format!("{context}: {e}"),
    }
}

/// redb-backed snapshot store for the full entity state.
pub struct DurableStore {
    db: Arc<Database>,
}

impl DurableStore {
    /// Open or create the snapshot database in the given directory.
    pub fn open(data_dir: &Path) -> StoreResult<Self> {
        std::fs::create_dir_all(data_dir).map_err(|source| StoreError::Io { source })?;
        let db_path = data_dir.join("caselink.redb");
        let db = Database::create(&db_path)
            .map_err(|e| durable_err(&format!("failed to open redb at {}", db_path.display()), e))?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Persist the full state as one atomic snapshot.
    pub fn save(&self, state: &State) -> StoreResult<()> {
        let txn = self
            .db
            .begin_write()
            .map_err(|e| durable_err("begin_write failed", e))?;
        {
            // Drop stale rows wholesale; the snapshot is authoritative.
            txn.delete_table(WORKITEMS)
                .map_err(|e| durable_err("delete_table failed", e))?;
            txn.delete_table(AUTOCASES)
                .map_err(|e| durable_err("delete_table failed", e))?;
            txn.delete_table(LINKAGES)
                .map_err(|e| durable_err("delete_table failed", e))?;
            txn.delete_table(FAILURES)
                .map_err(|e| durable_err("delete_table failed", e))?;
            txn.delete_table(BLACKLIST)
                .map_err(|e| durable_err("delete_table failed", e))?;
            txn.delete_table(BUGS)
                .map_err(|e| durable_err("delete_table failed", e))?;

            let mut table = txn
                .open_table(WORKITEMS)
                .map_err(|e| durable_err("open_table failed", e))?;
            for (id, item) in &state.workitems {
                table
                    .insert(id.as_str(), encode(item)?.as_slice())
                    .map_err(|e| durable_err("insert failed", e))?;
            }
            drop(table);

            let mut table = txn
                .open_table(AUTOCASES)
                .map_err(|e| durable_err("open_table failed", e))?;
            for (id, case) in &state.autocases {
                table
                    .insert(id.as_str(), encode(case)?.as_slice())
                    .map_err(|e| durable_err("insert failed", e))?;
            }
            drop(table);

            let mut table = txn
                .open_table(LINKAGES)
                .map_err(|e| durable_err("open_table failed", e))?;
            for (id, link) in &state.linkages {
                table
                    .insert(id.get(), encode(link)?.as_slice())
                    .map_err(|e| durable_err("insert failed", e))?;
            }
            drop(table);

            let mut table = txn
                .open_table(FAILURES)
                .map_err(|e| durable_err("open_table failed", e))?;
            for (id, failure) in &state.failures {
                table
                    .insert(id.get(), encode(failure)?.as_slice())
                    .map_err(|e| durable_err("insert failed", e))?;
            }
            drop(table);

            let mut table = txn
                .open_table(BLACKLIST)
                .map_err(|e| durable_err("open_table failed", e))?;
            for (id, entry) in &state.blacklist {
                table
                    .insert(id.get(), encode(entry)?.as_slice())
                    .map_err(|e| durable_err("insert failed", e))?;
            }
            drop(table);

            let mut table = txn
                .open_table(BUGS)
                .map_err(|e| durable_err("open_table failed", e))?;
            for (id, bug) in &state.bugs {
                table
                    .insert(id.as_str(), encode(bug)?.as_slice())
                    .map_err(|e| durable_err("insert failed", e))?;
            }
        }
        txn.commit().map_err(|e| durable_err("commit failed", e))
    }

    /// Load the last snapshot. `Ok(None)` on a freshly created database.
    pub fn load(&self) -> StoreResult<Option<State>> {
        let txn = self
            .db
            .begin_read()
            .map_err(|e| durable_err("begin_read failed", e))?;

        let mut state = State::default();
        let mut any_table = false;

        match txn.open_table(WORKITEMS) {
            Ok(table) => {
                any_table = true;
                let iter = table.iter().map_err(|e| durable_err("iter failed", e))?;
                for row in iter {
                    let (_, value) = row.map_err(|e| durable_err("read failed", e))?;
                    let item: crate::entity::WorkItem = decode(value.value())?;
                    state.workitems.insert(item.id.clone(), item);
                }
            }
            Err(TableError::TableDoesNotExist(_)) => {}
            Err(e) => return Err(durable_err("open_table failed", e)),
        }

        match txn.open_table(AUTOCASES) {
            Ok(table) => {
                any_table = true;
                let iter = table.iter().map_err(|e| durable_err("iter failed", e))?;
                for row in iter {
                    let (_, value) = row.map_err(|e| durable_err("read failed", e))?;
                    let case: crate::entity::AutoCase = decode(value.value())?;
                    state.autocases.insert(case.id.clone(), case);
                }
            }
            Err(TableError::TableDoesNotExist(_)) => {}
            Err(e) => return Err(durable_err("open_table failed", e)),
        }

        match txn.open_table(LINKAGES) {
            Ok(table) => {
                any_table = true;
                let iter = table.iter().map_err(|e| durable_err("iter failed", e))?;
                for row in iter {
                    let (_, value) = row.map_err(|e| durable_err("read failed", e))?;
                    let link: crate::entity::Linkage = decode(value.value())?;
                    state.linkages.insert(link.id, link);
                }
            }
            Err(TableError::TableDoesNotExist(_)) => {}
            Err(e) => return Err(durable_err("open_table failed", e)),
        }

        match txn.open_table(FAILURES) {
            Ok(table) => {
                any_table = true;
                let iter = table.iter().map_err(|e| durable_err("iter failed", e))?;
                for row in iter {
                    let (_, value) = row.map_err(|e| durable_err("read failed", e))?;
                    let failure: crate::entity::AutoCaseFailure = decode(value.value())?;
                    state.failures.insert(failure.id, failure);
                }
            }
            Err(TableError::TableDoesNotExist(_)) => {}
            Err(e) => return Err(durable_err("open_table failed", e)),
        }

        match txn.open_table(BLACKLIST) {
            Ok(table) => {
                any_table = true;
                let iter = table.iter().map_err(|e| durable_err("iter failed", e))?;
                for row in iter {
                    let (_, value) = row.map_err(|e| durable_err("read failed", e))?;
                    let entry: crate::entity::BlackListEntry = decode(value.value())?;
                    state.blacklist.insert(entry.id, entry);
                }
            }
            Err(TableError::TableDoesNotExist(_)) => {}
            Err(e) => return Err(durable_err("open_table failed", e)),
        }

        match txn.open_table(BUGS) {
            Ok(table) => {
                any_table = true;
                let iter = table.iter().map_err(|e| durable_err("iter failed", e))?;
                for row in iter {
                    let (_, value) = row.map_err(|e| durable_err("read failed", e))?;
                    let bug: crate::entity::Bug = decode(value.value())?;
                    state.bugs.insert(bug.id.clone(), bug);
                }
            }
            Err(TableError::TableDoesNotExist(_)) => {}
            Err(e) => return Err(durable_err("open_table failed", e)),
        }

        Ok(any_table.then_some(state))
    }
}

impl std::fmt::Debug for DurableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableStore").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{AutoCase, AutomationStatus, Linkage, LinkageId, WorkItem};
    use tempfile::TempDir;

    #[test]
    fn fresh_database_loads_nothing() {
        let dir = TempDir::new().unwrap();
        let durable = DurableStore::open(dir.path()).unwrap();
        assert!(durable.load().unwrap().is_none());
    }

    #[test]
    fn snapshot_round_trip() {
        let dir = TempDir::new().unwrap();
        let durable = DurableStore::open(dir.path()).unwrap();

        let mut state = State::default();
        state.upsert_workitem(WorkItem::new("WI-1", "virsh start", AutomationStatus::Automated));
        state.upsert_autocase(AutoCase::new("virsh.start.basic"));
        let id = LinkageId::new(1).unwrap();
        state.insert_linkage(Linkage::new(id, "WI-1", "virsh.start"));
        state.link_case(&id, &crate::entity::CaseId::new("virsh.start.basic"));

        durable.save(&state).unwrap();
        let loaded = durable.load().unwrap().unwrap();
        assert_eq!(loaded, state);
    }

    #[test]
    fn save_replaces_stale_rows() {
        let dir = TempDir::new().unwrap();
        let durable = DurableStore::open(dir.path()).unwrap();

        let mut state = State::default();
        state.upsert_workitem(WorkItem::new("WI-1", "a", AutomationStatus::NotAutomated));
        state.upsert_workitem(WorkItem::new("WI-2", "b", AutomationStatus::NotAutomated));
        durable.save(&state).unwrap();

        state.delete_workitem(&crate::entity::WorkItemId::new("WI-2"));
        durable.save(&state).unwrap();

        let loaded = durable.load().unwrap().unwrap();
        assert_eq!(loaded.workitem_ids(), state.workitem_ids());
    }
}
