//! Persistence and recovery tests for the caselink engine.
//!
//! These tests verify that entities, relation edges, error tags, and
//! allocator state survive engine restart (every committed transaction
//! rewrites the durable snapshot, so restart means reopen and reload).

use caselink::engine::{Engine, EngineConfig};
use caselink::entity::{AutoCase, AutomationStatus, CaseId, WorkItem, WorkItemId};
use caselink::tag::ErrorTag;

fn persistent_engine(dir: &std::path::Path) -> Engine {
    Engine::new(EngineConfig {
        data_dir: Some(dir.to_path_buf()),
        ..Default::default()
    })
    .unwrap()
}

#[test]
fn linkage_graph_survives_restart() {
    let dir = tempfile::TempDir::new().unwrap();

    let linkage;
    // First session: build the graph and let the cascade run.
    {
        let engine = persistent_engine(dir.path());
        engine
            .upsert_workitem(WorkItem::new(
                "WI-1",
                "restart libvirtd with a broken socket",
                AutomationStatus::Automated,
            ))
            .unwrap();
        engine
            .upsert_autocase(AutoCase::new("conf_file.libvirtd_conf.unix_sock"))
            .unwrap();
        linkage = engine
            .add_linkage(&WorkItemId::new("WI-1"), "conf_file.libvirtd_conf")
            .unwrap();
    }

    // Second session: reopen and verify the matched set and reverse index.
    {
        let engine = persistent_engine(dir.path());
        let link = engine.linkage(linkage).unwrap();
        assert_eq!(link.workitem, WorkItemId::new("WI-1"));
        assert_eq!(link.autocases.len(), 1);
        assert!(link.errors.is_empty());

        let case = engine
            .autocase(&CaseId::new("conf_file.libvirtd_conf.unix_sock"))
            .unwrap();
        assert!(case.linkages.contains(&linkage));
        assert!(case.errors.is_empty());
    }
}

#[test]
fn allocator_resumes_after_restart() {
    let dir = tempfile::TempDir::new().unwrap();

    let max_id_before;
    // First session: create linkages.
    {
        let engine = persistent_engine(dir.path());
        engine
            .upsert_workitem(WorkItem::new("WI-1", "one", AutomationStatus::Automated))
            .unwrap();
        engine.upsert_autocase(AutoCase::new("virsh.start.normal")).unwrap();
        engine.upsert_autocase(AutoCase::new("virsh.destroy.running")).unwrap();
        engine.add_linkage(&WorkItemId::new("WI-1"), "virsh.start").unwrap();
        let second = engine
            .add_linkage(&WorkItemId::new("WI-1"), "virsh.destroy")
            .unwrap();
        max_id_before = second.get();
    }

    // Second session: new linkages must not reuse pre-restart ids.
    {
        let engine = persistent_engine(dir.path());
        engine.upsert_autocase(AutoCase::new("virsh.dumpxml.basic")).unwrap();
        let third = engine
            .add_linkage(&WorkItemId::new("WI-1"), "virsh.dumpxml")
            .unwrap();
        assert!(
            third.get() > max_id_before,
            "new id {} should be > pre-restart max {}",
            third.get(),
            max_id_before
        );
    }
}

#[test]
fn sticky_tags_survive_restart() {
    let dir = tempfile::TempDir::new().unwrap();

    {
        let engine = persistent_engine(dir.path());
        engine
            .upsert_workitem(WorkItem::new("WI-1", "one", AutomationStatus::ManualOnly))
            .unwrap();
        engine.mark_workitem_deleted(&WorkItemId::new("WI-1")).unwrap();
        engine
            .upsert_autocase(AutoCase::new("virsh.start.normal").with_pr("pulls/42"))
            .unwrap();
        engine
            .mark_autocase_pr_not_merged(&CaseId::new("virsh.start.normal"))
            .unwrap();
    }

    // Reopen, re-run the full scan, and verify the sticky tags are intact.
    {
        let engine = persistent_engine(dir.path());
        engine.init_error_checking().unwrap();

        let item = engine.workitem(&WorkItemId::new("WI-1")).unwrap();
        assert!(item.errors.contains(&ErrorTag::WorkitemDeleted));

        let case = engine.autocase(&CaseId::new("virsh.start.normal")).unwrap();
        assert!(case.errors.contains(&ErrorTag::AutocasePrNotMerged));
        assert_eq!(case.pr.as_deref(), Some("pulls/42"));
    }
}

#[test]
fn rolled_back_transaction_is_not_persisted() {
    let dir = tempfile::TempDir::new().unwrap();

    {
        let engine = persistent_engine(dir.path());
        engine
            .upsert_workitem(WorkItem::new("WI-1", "one", AutomationStatus::ManualOnly))
            .unwrap();
        // A failing mutation must leave both memory and snapshot untouched:
        // removing a missing work item rolls the transaction back.
        assert!(engine.remove_workitem(&WorkItemId::new("ghost")).is_err());
    }

    {
        let engine = persistent_engine(dir.path());
        assert!(engine.workitem(&WorkItemId::new("WI-1")).is_some());
        assert!(engine.workitem(&WorkItemId::new("ghost")).is_none());
    }
}
