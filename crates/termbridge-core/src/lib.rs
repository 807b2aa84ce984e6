//! Core model for vocabulary term proposals.
//!
//! A proposal starts life as a transient [`TermEntity`] with nothing but a
//! name. The surrounding machinery gives it up to three identities over time:
//!
//! - a local id, assigned by the store on first save (`REQ_000045`),
//! - a ticket id, assigned when the proposal is mirrored into the tracker,
//! - an authority id, assigned only when the authority accepts the term
//!   (`VOC_001234`), and only ever observed through tracker reads.
//!
//! This crate owns the pieces that must stay consistent no matter which
//! collaborator is talking: the entity's merge and dirty-tracking semantics,
//! the status lifecycle with its explicit transition table, and the id
//! scheme. Storage and tracker I/O live elsewhere.

pub mod entity;
pub mod error;
pub mod ids;
pub mod status;

pub use entity::TermEntity;
pub use error::CoreError;
pub use status::TermStatus;
