//! Local persistence for term proposals.
//!
//! The engine talks to storage through the [`PersistenceStore`] trait:
//! lookups by the three identities, the equivalence lookup used for dedup,
//! a token search, and explicit commit/batch control. The shipped
//! implementation, [`JsonTermStore`], keeps every record in memory behind a
//! lock, persists them as a pretty-printed JSON snapshot, and rebuilds its
//! label/token indexes on open.
//!
//! One logical writer per store home is assumed; the store serializes its own
//! internals but nothing stops a second process from opening the same home.

mod index;
mod json_store;

use thiserror::Error;

use termbridge_core::{CoreError, TermEntity, TermStatus};

pub use json_store::{JsonTermStore, StoreConfig};

/// Failures raised by a store implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store i/o failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt snapshot: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("store is closed")]
    Closed,

    #[error(transparent)]
    Core(#[from] CoreError),
}

/// The storage seam the reconciliation engine consumes.
///
/// `save` is a no-op for clean entities and assigns the local id plus
/// timestamps on first save. `set_batch_mode` returns the previous setting so
/// a bulk pass can restore whatever was configured before it ran.
pub trait PersistenceStore: Send + Sync {
    fn save(&self, entity: TermEntity) -> Result<TermEntity, StoreError>;

    fn find_equivalent(&self, candidate: &TermEntity) -> Result<Option<TermEntity>, StoreError>;

    fn find_by_id(&self, id: &str) -> Result<Option<TermEntity>, StoreError>;

    fn find_by_authority_id(&self, id: &str) -> Result<Option<TermEntity>, StoreError>;

    fn find_by_ticket_id(&self, ticket: u64) -> Result<Option<TermEntity>, StoreError>;

    fn find_by_status(&self, status: TermStatus) -> Result<Vec<TermEntity>, StoreError>;

    fn search(&self, text: &str) -> Result<Vec<TermEntity>, StoreError>;

    /// Flush pending state to disk.
    fn commit(&self) -> Result<(), StoreError>;

    /// Toggle batch mode (deferred flushing); returns the prior setting.
    fn set_batch_mode(&self, on: bool) -> Result<bool, StoreError>;

    /// Remove a saved record. Rare; proposals normally resolve, not vanish.
    fn delete(&self, entity: &TermEntity) -> Result<(), StoreError>;

    /// Flush and close. Idempotent; later calls and operations fail with
    /// [`StoreError::Closed`].
    fn close(&self) -> Result<(), StoreError>;
}
