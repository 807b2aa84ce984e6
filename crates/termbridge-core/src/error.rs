//! Errors raised by the core model itself.

use thiserror::Error;

use crate::status::TermStatus;

/// Local invariant violations: malformed ids, mutating an unsaved entity as
/// if it were saved, or asking for a status move the lifecycle forbids.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("invalid identifier: {0:?}")]
    InvalidId(String),

    #[error("term name must not be empty")]
    EmptyName,

    #[error("entity has not been saved (no local id)")]
    Unsaved,

    #[error("entity already has a local id")]
    AlreadySaved,

    #[error("entity is not submittable")]
    NotSubmittable,

    #[error("entity has no tracker ticket")]
    NoTicket,

    #[error("illegal status transition {from} -> {to}")]
    IllegalTransition { from: TermStatus, to: TermStatus },
}
