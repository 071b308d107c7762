//! Error type shared by the encoding, storage and graph layers.

use std::io;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, GraphError>;

/// Every failure the graph storage core can report.
///
/// Schema and encoding violations carry the label, identifier or size bound
/// that caused them so the caller can render a precise message.
#[derive(Debug, Error)]
pub enum GraphError {
    /// Underlying file I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Stored bytes could not be decoded.
    #[error("corruption detected: {0}")]
    Corruption(&'static str),
    /// The caller passed an argument the graph cannot act on.
    #[error("invalid argument: {0}")]
    Invalid(String),
    /// A lookup that the caller required to succeed found nothing.
    #[error("'{what}' not found")]
    NotFound {
        /// Label or identifier that did not resolve.
        what: String,
    },
    /// A schema mutation was attempted through a read-only schema view.
    #[error("cannot write '{label}' through a read-only schema")]
    SchemaReadViolation {
        /// Label of the type or rule being written.
        label: String,
    },
    /// The label is already taken by another type or rule.
    #[error("label '{label}' is already in use")]
    DuplicateLabel {
        /// Colliding label.
        label: String,
    },
    /// Reassigning the supertype would close a loop in the SUB hierarchy.
    #[error("making '{supertype}' the supertype of '{label}' would create a cycle")]
    CyclicHierarchy {
        /// Type whose supertype was being set.
        label: String,
        /// Proposed supertype.
        supertype: String,
    },
    /// The type cannot be deleted while rules mention it.
    #[error("type '{label}' is referenced by rules {rules:?}")]
    TypeReferencedInRules {
        /// Type that was being deleted.
        label: String,
        /// Labels of the rules that reference it.
        rules: Vec<String>,
    },
    /// An attribute value does not fit the encoding size bound.
    #[error("value of {size} bytes exceeds the maximum encodable size of {max} bytes")]
    IllegalValueSize {
        /// Encoded size of the rejected value.
        size: usize,
        /// Size bound of the encoding.
        max: usize,
    },
    /// An optimistic commit precondition no longer held.
    #[error("commit conflict on key {}", hex::encode(.key))]
    Conflict {
        /// Key whose expected state changed underneath the commit.
        key: Vec<u8>,
    },
    /// The identifier generator for a scope has no numbers left.
    #[error("identifier space exhausted for scope {scope}")]
    KeySpaceExhausted {
        /// Human-readable scope name.
        scope: String,
    },
    /// A label lock could not be acquired within the configured timeout.
    #[error("timed out waiting for the lock on '{label}'")]
    LockTimeout {
        /// Label whose lock timed out.
        label: String,
    },
    /// Options could not be parsed or validated.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Field-less discriminant of [`GraphError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`GraphError::Io`].
    Io,
    /// See [`GraphError::Corruption`].
    Corruption,
    /// See [`GraphError::Invalid`].
    Invalid,
    /// See [`GraphError::NotFound`].
    NotFound,
    /// See [`GraphError::SchemaReadViolation`].
    SchemaReadViolation,
    /// See [`GraphError::DuplicateLabel`].
    DuplicateLabel,
    /// See [`GraphError::CyclicHierarchy`].
    CyclicHierarchy,
    /// See [`GraphError::TypeReferencedInRules`].
    TypeReferencedInRules,
    /// See [`GraphError::IllegalValueSize`].
    IllegalValueSize,
    /// See [`GraphError::Conflict`].
    Conflict,
    /// See [`GraphError::KeySpaceExhausted`].
    KeySpaceExhausted,
    /// See [`GraphError::LockTimeout`].
    LockTimeout,
    /// See [`GraphError::Config`].
    Config,
}

impl GraphError {
    /// Returns the taxonomy entry of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            GraphError::Io(_) => ErrorKind::Io,
            GraphError::Corruption(_) => ErrorKind::Corruption,
            GraphError::Invalid(_) => ErrorKind::Invalid,
            GraphError::NotFound { .. } => ErrorKind::NotFound,
            GraphError::SchemaReadViolation { .. } => ErrorKind::SchemaReadViolation,
            GraphError::DuplicateLabel { .. } => ErrorKind::DuplicateLabel,
            GraphError::CyclicHierarchy { .. } => ErrorKind::CyclicHierarchy,
            GraphError::TypeReferencedInRules { .. } => ErrorKind::TypeReferencedInRules,
            GraphError::IllegalValueSize { .. } => ErrorKind::IllegalValueSize,
            GraphError::Conflict { .. } => ErrorKind::Conflict,
            GraphError::KeySpaceExhausted { .. } => ErrorKind::KeySpaceExhausted,
            GraphError::LockTimeout { .. } => ErrorKind::LockTimeout,
            GraphError::Config(_) => ErrorKind::Config,
        }
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        GraphError::Invalid(msg.into())
    }
}
