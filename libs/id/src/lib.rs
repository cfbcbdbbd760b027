//! # fleet-id
//!
//! Typed identifiers for resources owned by the remote machine control plane.
//!
//! ## Design Principles
//!
//! - IDs are issued by the control plane; this crate never generates them
//! - IDs are typed to prevent mixing machine, volume and release identifiers
//! - Parsing is strict: empty strings and characters outside `[A-Za-z0-9_-]`
//!   are rejected, both from strings and during deserialization
//!
//! Examples:
//! - machine: `148ed726c50e89`
//! - volume: `vol_8l524yj0ko347zmp`
//! - release: `01HV4Z3MXNKPQR9HSTZ7WCLD4E`

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Shared validation used by every ID type generated by [`define_id!`].
#[doc(hidden)]
pub fn validate(kind: &'static str, s: &str) -> Result<(), IdError> {
    if s.is_empty() {
        return Err(IdError::Empty { kind });
    }

    if let Some(found) = s
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
    {
        return Err(IdError::InvalidCharacter {
            kind,
            id: s.to_string(),
            found,
        });
    }

    Ok(())
}
