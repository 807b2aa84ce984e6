//! Reconciliation between the local term store and the public tracker.
//!
//! A term proposal lives in two places at once: as a record in the local
//! store and as a ticket in the tracker, where curators resolve it. Neither
//! side is authoritative for everything. Labels and descriptions originate
//! locally and flow outward; resolution (status and the authority's id)
//! originates with curators and flows inward. The engine in this crate is
//! the only component allowed to write to both sides, and it keeps the two
//! from drifting:
//!
//! ```text
//!            create_request                    sync_all / sync_one
//!   caller ───────────────► ReconciliationEngine ◄─────────────── tracker
//!                              │           │
//!                    save first│           │conditional reads,
//!                    then open │           │status transitions,
//!                              ▼           ▼merges, promotion
//!                       PersistenceStore  TrackerClient
//! ```
//!
//! The write path is serialized through a single gate so a create and a
//! reconciliation pass can never interleave their save/open sequences.

pub mod engine;
pub mod service;
pub mod ticket;
pub mod tracker;

use thiserror::Error;

use termbridge_core::CoreError;
use termbridge_store::StoreError;

pub use engine::{CreateOutcome, ReconciliationEngine, SyncOutcome, SyncReport};
pub use service::{ServiceConfig, TermService};
pub use ticket::{TicketCreated, TicketRead, TicketSnapshot};
pub use tracker::{GithubTracker, TrackerClient, TrackerConfig, TrackerError};

/// A failure in one of the two backends the engine reconciles.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("tracker: {0}")]
    Tracker(#[from] TrackerError),
}

/// Failures surfaced by the engine and the service facade.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("initialization failed: {0}")]
    Initialization(#[source] StoreError),

    #[error("service is not initialized")]
    NotInitialized,

    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The tracker holds a ticket for a term the local store has no record
    /// of. Records are saved before their tickets are opened, so this means
    /// local data went missing; resolving it needs a human.
    #[error("no local record owns tracker ticket #{ticket} ({title:?})")]
    DataLoss { ticket: u64, title: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        Self::Backend(BackendError::Store(e))
    }
}

impl From<TrackerError> for EngineError {
    fn from(e: TrackerError) -> Self {
        Self::Backend(BackendError::Tracker(e))
    }
}

impl From<CoreError> for EngineError {
    fn from(e: CoreError) -> Self {
        Self::Backend(BackendError::Store(StoreError::Core(e)))
    }
}
