//! Error types for ID parsing and validation.

use thiserror::Error;

/// Errors that can occur when parsing or validating IDs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    /// The ID string is empty.
    #[error("{kind} ID cannot be empty")]
    Empty { kind: &'static str },

    /// The ID contains a character the control plane never issues.
    #[error("invalid character {found:?} in {kind} ID '{id}'")]
    InvalidCharacter {
        kind: &'static str,
        id: String,
        found: char,
    },

    /// The value could not be parsed as a release version.
    #[error("invalid release version: {0}")]
    InvalidVersion(String),
}
