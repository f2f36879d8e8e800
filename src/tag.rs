//! Error-tag taxonomy: the annotations the checker attaches to entities.
//!
//! Tags are the *output* of the consistency checker, not failure conditions
//! of the algorithms. Each tag pairs a stable identifier with a human
//! message and is attached to exactly one owning entity's error set at a
//! time. Three tags are sticky: they originate outside the checker (the
//! sync layer) and survive clear-and-recompute passes.

use serde::{Deserialize, Serialize};

/// An error annotation attached to a work item, auto-case, or linkage.
///
/// Treated as a value type: the owning entity's error set is fully
/// rewritten by each checker pass, except for the sticky tags the pass
/// explicitly carries across.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorTag {
    /// A linkage pattern that matches no auto-case at all.
    PatternInvalid,
    /// Multiple linkages share the exact same pattern string.
    PatternDuplicate,
    /// An auto-case no linkage claims.
    NoLinkage,
    /// An auto-case claimed by more than one linkage.
    MultipleWorkitem,
    /// A work item with more than one linkage.
    WorkitemMultiPattern,
    /// A work item marked automated but carrying no linkage.
    WorkitemAutomatedNoLinkage,
    /// A work item carrying linkages but not marked automated.
    WorkitemNotautomatedWithLinkage,
    /// Another work item exists with an identical title.
    WorkitemTitleDuplicate,
    /// A reviewer comment is attached to the work item.
    WorkitemHasComment,
    /// The work item has unconfirmed upstream changes pending.
    WorkitemChanged,
    /// The work item was deleted upstream (sticky, sync-owned).
    WorkitemDeleted,
    /// The auto-case was added in a pull request not yet merged (sticky).
    AutocasePrNotMerged,
    /// The auto-case was deleted in a pending pull request (sticky).
    AutocaseDeletedInPr,
}

impl ErrorTag {
    /// Stable identifier, as stored and exposed to consumers.
    pub fn id(self) -> &'static str {
        match self {
            ErrorTag::PatternInvalid => "PATTERN_INVALID",
            ErrorTag::PatternDuplicate => "PATTERN_DUPLICATE",
            ErrorTag::NoLinkage => "NO_LINKAGE",
            ErrorTag::MultipleWorkitem => "MULTIPLE_WORKITEM",
            ErrorTag::WorkitemMultiPattern => "WORKITEM_MULTI_PATTERN",
            ErrorTag::WorkitemAutomatedNoLinkage => "WORKITEM_AUTOMATED_NO_LINKAGE",
            ErrorTag::WorkitemNotautomatedWithLinkage => "WORKITEM_NOTAUTOMATED_WITH_LINKAGE",
            ErrorTag::WorkitemTitleDuplicate => "WORKITEM_TITLE_DUPLICATE",
            ErrorTag::WorkitemHasComment => "WORKITEM_HAS_COMMENT",
            ErrorTag::WorkitemChanged => "WORKITEM_CHANGED",
            ErrorTag::WorkitemDeleted => "WORKITEM_DELETED",
            ErrorTag::AutocasePrNotMerged => "AUTOCASE_PR_NOT_MERGED",
            ErrorTag::AutocaseDeletedInPr => "AUTOCASE_DELETED_IN_PR",
        }
    }

    /// Human-readable description shown alongside the identifier.
    pub fn message(self) -> &'static str {
        match self {
            ErrorTag::PatternInvalid => "Pattern matches no automated case",
            ErrorTag::PatternDuplicate => "Pattern is declared by more than one linkage",
            ErrorTag::NoLinkage => "Automated case is not linked to any work item",
            ErrorTag::MultipleWorkitem => "Automated case is linked to multiple work items",
            ErrorTag::WorkitemMultiPattern => "Work item declares more than one pattern",
            ErrorTag::WorkitemAutomatedNoLinkage => {
                "Work item is marked automated but has no linkage"
            }
            ErrorTag::WorkitemNotautomatedWithLinkage => {
                "Work item has a linkage but is not marked automated"
            }
            ErrorTag::WorkitemTitleDuplicate => "Another work item has an identical title",
            ErrorTag::WorkitemHasComment => "Work item carries a reviewer comment",
            ErrorTag::WorkitemChanged => "Work item has unconfirmed upstream changes",
            ErrorTag::WorkitemDeleted => "Work item was deleted upstream",
            ErrorTag::AutocasePrNotMerged => "Automated case added in an unmerged pull request",
            ErrorTag::AutocaseDeletedInPr => "Automated case deleted in a pending pull request",
        }
    }
}

impl std::fmt::Display for ErrorTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_stable() {
        assert_eq!(ErrorTag::PatternInvalid.id(), "PATTERN_INVALID");
        assert_eq!(
            ErrorTag::WorkitemNotautomatedWithLinkage.id(),
            "WORKITEM_NOTAUTOMATED_WITH_LINKAGE"
        );
        assert_eq!(ErrorTag::AutocaseDeletedInPr.id(), "AUTOCASE_DELETED_IN_PR");
    }

    #[test]
    fn display_matches_id() {
        assert_eq!(ErrorTag::NoLinkage.to_string(), "NO_LINKAGE");
    }
}
