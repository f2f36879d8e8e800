//! # caselink
//!
//! Tracks manual test-case definitions (work items) and automated test
//! executions (auto-cases), links them through dotted-path naming
//! patterns, and continuously re-validates that the linkage graph is
//! internally consistent.
//!
//! ## Architecture
//!
//! - **Pattern matcher** (`pattern`): pure `..`-segmented dotted-path
//!   matching, malformed patterns rejected at parse time
//! - **Autolink resolver** (`link`): clear-then-rebuild matched sets plus
//!   subsumption pruning of sibling linkages
//! - **Consistency checker** (`check`): depth-bounded cascading recompute
//!   of per-entity error tags, sticky tags carried across passes
//! - **Event dispatch** (`dispatch`): mutation notifications with a
//!   per-entity re-entrancy guard, one transaction per triggering event
//! - **Entity store** (`store`): id-keyed relational tables with
//!   all-or-nothing transactions and an optional redb snapshot layer
//!
//! ## Library usage
//!
//! ```
//! use caselink::engine::{Engine, EngineConfig};
//! use caselink::entity::{AutoCase, AutomationStatus, WorkItem, WorkItemId};
//!
//! let engine = Engine::new(EngineConfig::default()).unwrap();
//! engine
//!     .upsert_workitem(WorkItem::new("WI-1", "dump a running domain", AutomationStatus::Automated))
//!     .unwrap();
//! engine.upsert_autocase(AutoCase::new("virsh.dumpxml.basic")).unwrap();
//!
//! let linkage = engine.add_linkage(&WorkItemId::new("WI-1"), "virsh.dumpxml").unwrap();
//! assert_eq!(engine.linkage(linkage).unwrap().autocases.len(), 1);
//! ```

pub mod check;
pub mod dispatch;
pub mod engine;
pub mod entity;
pub mod error;
pub mod link;
pub mod pattern;
pub mod store;
pub mod tag;
