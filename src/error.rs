//! Diagnostic error types for the caselink engine.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]`
//! derives, providing error codes, help text, and source chains. These are
//! the *failure conditions* of the algorithms; the error annotations the
//! checker attaches to entities live in [`crate::tag`] and never surface
//! as `Err`.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for the caselink engine.
///
/// Each variant wraps a subsystem-specific error, preserving the full
/// diagnostic chain (error codes, help text, sources) through to the user.
#[derive(Debug, Error, Diagnostic)]
pub enum CaselinkError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Pattern(#[from] PatternError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Check(#[from] CheckError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Entity(#[from] EntityError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Engine(#[from] EngineError),
}

/// Result type carrying the top-level error.
pub type CaselinkResult<T> = std::result::Result<T, CaselinkError>;

// ---------------------------------------------------------------------------
// Pattern errors
// ---------------------------------------------------------------------------

/// Errors from parsing a linkage pattern.
///
/// Matching itself never fails: a segment-search miss is an ordinary
/// no-match, not an error. Only malformed pattern *text* is rejected, and
/// it is rejected at parse time, before any matching runs.
#[derive(Debug, Error, Diagnostic)]
pub enum PatternError {
    #[error("pattern \"{pattern}\" contains an empty segment")]
    #[diagnostic(
        code(caselink::pattern::empty_segment),
        help(
            "Segments are separated by \"..\" and must not be empty. A trailing \
             \"..\" or three consecutive dots produce an empty segment; remove \
             the extra separator."
        )
    )]
    EmptySegment { pattern: String },

    #[error("pattern \"{pattern}\" contains an empty token in segment \"{segment}\"")]
    #[diagnostic(
        code(caselink::pattern::empty_token),
        help(
            "Tokens within a segment are separated by single dots and must not \
             be empty. A leading or trailing dot produces an empty token."
        )
    )]
    EmptyToken { pattern: String, segment: String },
}

/// Result type for pattern operations.
pub type PatternResult<T> = std::result::Result<T, PatternError>;

// ---------------------------------------------------------------------------
// Store errors
// ---------------------------------------------------------------------------

/// Errors from the entity store.
#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("entity {entity} does not exist in the store")]
    #[diagnostic(
        code(caselink::store::missing_entity),
        help("The referenced entity was never created or has been deleted.")
    )]
    MissingEntity { entity: String },

    #[error("work item {workitem} already declares pattern \"{pattern}\"")]
    #[diagnostic(
        code(caselink::store::duplicate_linkage),
        help(
            "A linkage is unique per (work item, pattern). Update or remove the \
             existing linkage instead of adding another one."
        )
    )]
    DuplicateLinkage { workitem: String, pattern: String },

    #[error(
        "a failure record for pattern \"{pattern}\" with signature \"{signature}\" already exists"
    )]
    #[diagnostic(
        code(caselink::store::duplicate_failure),
        help("A failure record is unique per (pattern, signature).")
    )]
    DuplicateFailure { pattern: String, signature: String },

    #[error("work item {workitem} still has {count} linkage(s) referencing it")]
    #[diagnostic(
        code(caselink::store::workitem_protected),
        help("Remove the work item's linkages before removing the work item itself.")
    )]
    WorkItemProtected { workitem: String, count: usize },

    #[error("id space exhausted for {kind} records")]
    #[diagnostic(code(caselink::store::id_exhausted))]
    IdExhausted { kind: &'static str },

    #[error("durable store operation failed: {message}")]
    #[diagnostic(
        code(caselink::store::durable),
        help(
            "The redb database could not complete the operation. The in-memory \
             state was not swapped; retry the whole triggering event."
        )
    )]
    Durable { message: String },

    #[error("snapshot (de)serialization failed: {message}")]
    #[diagnostic(code(caselink::store::serialization))]
    Serialization { message: String },

    #[error("I/O error on the data directory")]
    #[diagnostic(
        code(caselink::store::io),
        help("Check that the data directory exists and is writable.")
    )]
    Io {
        #[source]
        source: std::io::Error,
    },
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

// ---------------------------------------------------------------------------
// Checker errors
// ---------------------------------------------------------------------------

/// Errors from the consistency checker and the autolink resolver.
#[derive(Debug, Error, Diagnostic)]
pub enum CheckError {
    #[error("cannot check {entity}: it no longer exists in the store")]
    #[diagnostic(
        code(caselink::check::stale_reference),
        help(
            "error_check was invoked with a reference to a deleted entity. This \
             is a caller bug: deletion events must carry the pre-deletion \
             related-entity snapshot and recheck only entities that survive."
        )
    )]
    StaleReference { entity: String },
}

/// Result type for checker operations.
pub type CheckResult<T> = std::result::Result<T, CheckError>;

// ---------------------------------------------------------------------------
// Entity validation errors
// ---------------------------------------------------------------------------

/// Errors from entity-level validation.
#[derive(Debug, Error, Diagnostic)]
pub enum EntityError {
    #[error("unsupported blacklist entry status \"{status}\"")]
    #[diagnostic(
        code(caselink::entity::unsupported_status),
        help("Valid statuses: bug, bug-skip, case-update-skip, case-update.")
    )]
    UnsupportedStatus { status: String },

    #[error("blacklist entry with status \"{status}\" must reference at least one bug")]
    #[diagnostic(
        code(caselink::entity::missing_bugs),
        help("The bug and bug-skip statuses describe known failures; attach the bug id(s).")
    )]
    MissingBugs { status: String },

    #[error("invalid failure signature regex \"{signature}\": {message}")]
    #[diagnostic(
        code(caselink::entity::invalid_signature),
        help("The failure signature must be a valid regular expression.")
    )]
    InvalidSignature { signature: String, message: String },
}

/// Result type for entity validation.
pub type EntityResult<T> = std::result::Result<T, EntityError>;

// ---------------------------------------------------------------------------
// Engine errors
// ---------------------------------------------------------------------------

/// Errors from engine construction and configuration.
#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    #[error("failed to create data directory: {path}")]
    #[diagnostic(
        code(caselink::engine::data_dir),
        help("Ensure the parent directory exists and is writable.")
    )]
    DataDir {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read config file: {path}")]
    #[diagnostic(
        code(caselink::engine::config_read),
        help("Ensure the config file exists and is readable.")
    )]
    ConfigRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {path}")]
    #[diagnostic(
        code(caselink::engine::config_parse),
        help("Check the TOML syntax in the config file.")
    )]
    ConfigParse { path: String, message: String },
}

/// Result type for engine operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;
