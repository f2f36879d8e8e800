//! Entity records for the linkage graph.
//!
//! Work items are manually authored test-case definitions; auto-cases are
//! automated executions identified by dotted paths; linkages tie one work
//! item to one pattern plus its resolved matches. All cross-entity
//! references are id-keyed `BTreeSet`s — explicit adjacency sets with
//! deterministic iteration, never object references — maintained pairwise
//! by the store. The self-referential "related" sets (work item duplicate
//! titles, linkage duplicate patterns) are symmetric edges.

use std::collections::BTreeSet;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{EntityError, EntityResult, StoreError, StoreResult};
use crate::tag::ErrorTag;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// External identifier of a work item (assigned by the tracking system).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkItemId(String);

impl WorkItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for WorkItemId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl std::fmt::Display for WorkItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of an auto-case: its dotted execution path (e.g. `a.b.c`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CaseId(String);

impl CaseId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CaseId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl std::fmt::Display for CaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// External identifier of a bug.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BugId(String);

impl BugId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BugId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

macro_rules! numeric_id {
    ($(#[$doc:meta])* $name:ident, $prefix:literal) => {
        $(#[$doc])*
        ///
        /// Uses `NonZeroU64` for the niche optimization: an `Option` of this
        /// id is the same size as the id itself.
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[repr(transparent)]
        pub struct $name(NonZeroU64);

        impl $name {
            /// Create from a raw `u64`. Returns `None` if `raw` is zero.
            pub fn new(raw: u64) -> Option<Self> {
                NonZeroU64::new(raw).map($name)
            }

            /// Create from an allocator-issued non-zero value.
            pub fn from_raw(raw: NonZeroU64) -> Self {
                $name(raw)
            }

            /// The underlying `u64` value.
            pub fn get(self) -> u64 {
                self.0.get()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($prefix, ":{}"), self.0)
            }
        }
    };
}

numeric_id!(
    /// Store-allocated identifier of a linkage.
    LinkageId,
    "link"
);
numeric_id!(
    /// Store-allocated identifier of an auto-case failure record.
    FailureId,
    "failure"
);
numeric_id!(
    /// Store-allocated identifier of a blacklist entry.
    EntryId,
    "entry"
);

/// Thread-safe allocator for store-assigned numeric ids.
///
/// Ids start at 1; an id handed out inside a rolled-back transaction is
/// simply burned, like a relational sequence.
#[derive(Debug)]
pub struct IdAllocator {
    next: AtomicU64,
    kind: &'static str,
}

impl IdAllocator {
    /// Create an allocator whose next id is `next` (1 for an empty table).
    pub fn starting_at(next: u64, kind: &'static str) -> Self {
        Self {
            next: AtomicU64::new(next.max(1)),
            kind,
        }
    }

    /// Hand out the next id.
    pub fn next_raw(&self) -> StoreResult<NonZeroU64> {
        let raw = self.next.fetch_add(1, Ordering::Relaxed);
        NonZeroU64::new(raw).ok_or(StoreError::IdExhausted { kind: self.kind })
    }
}

// ---------------------------------------------------------------------------
// Entity references
// ---------------------------------------------------------------------------

/// A typed reference to any checkable entity.
///
/// Used as the dispatch-guard key, as the cascade target of the checker,
/// and as the pre-deletion snapshot element of deletion events.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityRef {
    WorkItem(WorkItemId),
    AutoCase(CaseId),
    Linkage(LinkageId),
    Failure(FailureId),
    Blacklist(EntryId),
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityRef::WorkItem(id) => write!(f, "workitem:{id}"),
            EntityRef::AutoCase(id) => write!(f, "autocase:{id}"),
            EntityRef::Linkage(id) => write!(f, "{id}"),
            EntityRef::Failure(id) => write!(f, "{id}"),
            EntityRef::Blacklist(id) => write!(f, "{id}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Work items
// ---------------------------------------------------------------------------

/// Automation status of a work item, as reported by the tracking system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutomationStatus {
    NotAutomated,
    ManualOnly,
    Automated,
}

impl std::fmt::Display for AutomationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AutomationStatus::NotAutomated => write!(f, "notautomated"),
            AutomationStatus::ManualOnly => write!(f, "manualonly"),
            AutomationStatus::Automated => write!(f, "automated"),
        }
    }
}

/// A manually authored test-case definition.
///
/// Scalar fields are owned by the external sync layer; `errors` and
/// `related` are exclusively rewritten by the consistency checker, and
/// `linkages` is the reverse index of [`Linkage::workitem`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: WorkItemId,
    pub title: String,
    pub automation: AutomationStatus,
    /// Free-text reviewer comment; presence is flagged by the checker.
    pub comment: Option<String>,
    /// Pending upstream changes not yet confirmed; presence is flagged.
    pub changes: Option<String>,
    pub errors: BTreeSet<ErrorTag>,
    /// Duplicate-title evidence: symmetric edges to other work items.
    pub related: BTreeSet<WorkItemId>,
    /// Linkages owned by this work item (reverse index).
    pub linkages: BTreeSet<LinkageId>,
}

impl WorkItem {
    pub fn new(
        id: impl Into<WorkItemId>,
        title: impl Into<String>,
        automation: AutomationStatus,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            automation,
            comment: None,
            changes: None,
            errors: BTreeSet::new(),
            related: BTreeSet::new(),
            linkages: BTreeSet::new(),
        }
    }

    /// Attach a reviewer comment.
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Record pending upstream changes.
    pub fn with_changes(mut self, changes: impl Into<String>) -> Self {
        self.changes = Some(changes.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Auto-cases
// ---------------------------------------------------------------------------

/// An automated test execution, identified by its dotted path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoCase {
    pub id: CaseId,
    /// Pull request that introduced the case, if it is not yet merged.
    pub pr: Option<String>,
    pub start_commit: Option<String>,
    pub end_commit: Option<String>,
    pub errors: BTreeSet<ErrorTag>,
    /// Linkages whose pattern matches this case (reverse index).
    pub linkages: BTreeSet<LinkageId>,
    /// Failure records whose pattern matches this case (reverse index).
    pub failures: BTreeSet<FailureId>,
}

impl AutoCase {
    pub fn new(id: impl Into<CaseId>) -> Self {
        Self {
            id: id.into(),
            pr: None,
            start_commit: None,
            end_commit: None,
            errors: BTreeSet::new(),
            linkages: BTreeSet::new(),
            failures: BTreeSet::new(),
        }
    }

    pub fn with_pr(mut self, pr: impl Into<String>) -> Self {
        self.pr = Some(pr.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Linkages
// ---------------------------------------------------------------------------

/// The association between one work item and one pattern.
///
/// Unique per `(workitem, pattern)`. The matched set is exclusively
/// rewritten by the autolink resolver, the related set by the checker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Linkage {
    pub id: LinkageId,
    pub workitem: WorkItemId,
    pub pattern: String,
    /// Auto-cases whose id satisfies the pattern.
    pub autocases: BTreeSet<CaseId>,
    /// Duplicate-pattern evidence: symmetric edges to other linkages.
    pub related: BTreeSet<LinkageId>,
    pub errors: BTreeSet<ErrorTag>,
}

impl Linkage {
    pub fn new(id: LinkageId, workitem: impl Into<WorkItemId>, pattern: impl Into<String>) -> Self {
        Self {
            id,
            workitem: workitem.into(),
            pattern: pattern.into(),
            autocases: BTreeSet::new(),
            related: BTreeSet::new(),
            errors: BTreeSet::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Auto-case failures
// ---------------------------------------------------------------------------

/// A pattern plus failure-signature regex, matched against auto-cases.
///
/// Parallel to [`Linkage`] but without cascading consistency checks:
/// failures are independent annotations and are never deduplicated against
/// each other. Unique per `(pattern, signature)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoCaseFailure {
    pub id: FailureId,
    pub pattern: String,
    /// Regex applied by the sync layer to failure output.
    pub signature: String,
    pub autocases: BTreeSet<CaseId>,
    pub errors: BTreeSet<ErrorTag>,
}

impl AutoCaseFailure {
    pub fn new(
        id: FailureId,
        pattern: impl Into<String>,
        signature: impl Into<String>,
    ) -> Self {
        Self {
            id,
            pattern: pattern.into(),
            signature: signature.into(),
            autocases: BTreeSet::new(),
            errors: BTreeSet::new(),
        }
    }

    /// Compile the signature and test it against failure output.
    pub fn matches_failure(&self, output: &str) -> EntityResult<bool> {
        let re = regex::Regex::new(&self.signature).map_err(|e| EntityError::InvalidSignature {
            signature: self.signature.clone(),
            message: e.to_string(),
        })?;
        Ok(re.is_match(output))
    }
}

// ---------------------------------------------------------------------------
// Blacklist
// ---------------------------------------------------------------------------

/// Status of a blacklist entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryStatus {
    Bug,
    BugSkip,
    CaseUpdateSkip,
    CaseUpdate,
}

impl EntryStatus {
    /// Whether this status describes a known bug (and so requires bug refs).
    pub fn is_bug(self) -> bool {
        matches!(self, EntryStatus::Bug | EntryStatus::BugSkip)
    }
}

impl std::fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryStatus::Bug => write!(f, "bug"),
            EntryStatus::BugSkip => write!(f, "bug-skip"),
            EntryStatus::CaseUpdateSkip => write!(f, "case-update-skip"),
            EntryStatus::CaseUpdate => write!(f, "case-update"),
        }
    }
}

impl std::str::FromStr for EntryStatus {
    type Err = EntityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bug" => Ok(EntryStatus::Bug),
            "bug-skip" => Ok(EntryStatus::BugSkip),
            "case-update-skip" => Ok(EntryStatus::CaseUpdateSkip),
            "case-update" => Ok(EntryStatus::CaseUpdate),
            other => Err(EntityError::UnsupportedStatus {
                status: other.to_owned(),
            }),
        }
    }
}

/// A known-failure or skip record grouping bugs, work items, and failure
/// patterns. Has no consistency logic of its own; `error_check` on it is a
/// no-op stub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlackListEntry {
    pub id: EntryId,
    pub status: EntryStatus,
    pub description: String,
    pub bugs: BTreeSet<BugId>,
    pub workitems: BTreeSet<WorkItemId>,
    pub failures: BTreeSet<FailureId>,
    pub errors: BTreeSet<ErrorTag>,
}

impl BlackListEntry {
    pub fn new(id: EntryId, status: EntryStatus, description: impl Into<String>) -> Self {
        Self {
            id,
            status,
            description: description.into(),
            bugs: BTreeSet::new(),
            workitems: BTreeSet::new(),
            failures: BTreeSet::new(),
            errors: BTreeSet::new(),
        }
    }

    /// Validate the status/bugs combination.
    pub fn validate(&self) -> EntityResult<()> {
        if self.status.is_bug() && self.bugs.is_empty() {
            return Err(EntityError::MissingBugs {
                status: self.status.to_string(),
            });
        }
        Ok(())
    }
}

/// An externally tracked bug, referenced by blacklist entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bug {
    pub id: BugId,
}

impl Bug {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: BugId::new(id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_ids_reject_zero() {
        assert!(LinkageId::new(0).is_none());
        assert_eq!(LinkageId::new(7).map(LinkageId::get), Some(7));
    }

    #[test]
    fn allocator_starts_at_one() {
        let alloc = IdAllocator::starting_at(0, "linkage");
        assert_eq!(alloc.next_raw().unwrap().get(), 1);
        assert_eq!(alloc.next_raw().unwrap().get(), 2);
    }

    #[test]
    fn automation_status_round_trips_its_wire_names() {
        for (status, name) in [
            (AutomationStatus::NotAutomated, "notautomated"),
            (AutomationStatus::ManualOnly, "manualonly"),
            (AutomationStatus::Automated, "automated"),
        ] {
            assert_eq!(status.to_string(), name);
        }
    }

    #[test]
    fn blacklist_bug_statuses_require_bugs() {
        let id = EntryId::new(1).unwrap();
        let mut entry = BlackListEntry::new(id, EntryStatus::Bug, "flaky on s390x");
        assert!(matches!(
            entry.validate(),
            Err(EntityError::MissingBugs { .. })
        ));
        entry.bugs.insert(BugId::new("BZ-1412"));
        assert!(entry.validate().is_ok());

        let skip = BlackListEntry::new(id, EntryStatus::CaseUpdate, "renamed module");
        assert!(skip.validate().is_ok());
    }

    #[test]
    fn failure_signature_must_compile() {
        let id = FailureId::new(1).unwrap();
        let failure = AutoCaseFailure::new(id, "a.b", "timeout after \\d+s");
        assert!(failure.matches_failure("timeout after 120s").unwrap());
        assert!(!failure.matches_failure("segfault").unwrap());

        let broken = AutoCaseFailure::new(id, "a.b", "timeout (");
        assert!(matches!(
            broken.matches_failure("x"),
            Err(EntityError::InvalidSignature { .. })
        ));
    }

    #[test]
    fn entry_status_parses_kebab_names() {
        use std::str::FromStr;
        assert_eq!(EntryStatus::from_str("bug-skip").unwrap(), EntryStatus::BugSkip);
        assert!(EntryStatus::from_str("nope").is_err());
    }
}
