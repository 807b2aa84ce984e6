//! Lifecycle facade: one store, one tracker, one engine.
//!
//! [`TermService`] owns what the engine borrows. `init` opens the store and
//! builds the tracker client; `shutdown` flushes and closes the store. Both
//! are idempotent, and every operation between them delegates to the engine.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use termbridge_core::TermEntity;
use termbridge_store::{JsonTermStore, PersistenceStore, StoreConfig};

use crate::engine::{CreateOutcome, ReconciliationEngine, SyncOutcome, SyncReport};
use crate::tracker::{GithubTracker, TrackerConfig};
use crate::EngineError;

#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    pub store: StoreConfig,
    pub tracker: TrackerConfig,
}

type Engine = ReconciliationEngine<JsonTermStore, GithubTracker>;

struct Active {
    engine: Arc<Engine>,
    store: Arc<JsonTermStore>,
}

pub struct TermService {
    config: ServiceConfig,
    active: Mutex<Option<Active>>,
}

impl TermService {
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            config,
            active: Mutex::new(None),
        }
    }

    /// Open the store and stand the engine up. Calling this on an active
    /// service is a no-op.
    pub fn init(&self) -> Result<(), EngineError> {
        let mut active = self.active.lock();
        if active.is_some() {
            debug!("service already initialized");
            return Ok(());
        }
        let store = Arc::new(
            JsonTermStore::open(self.config.store.clone()).map_err(EngineError::Initialization)?,
        );
        let tracker = Arc::new(GithubTracker::new(self.config.tracker.clone())?);
        let engine = Arc::new(ReconciliationEngine::new(store.clone(), tracker));
        info!(home = %self.config.store.home.display(), "service initialized");
        *active = Some(Active { engine, store });
        Ok(())
    }

    /// Flush and close the store. Idempotent; the service can be
    /// re-initialized afterwards.
    pub fn shutdown(&self) -> Result<(), EngineError> {
        let taken = self.active.lock().take();
        match taken {
            Some(active) => {
                active.store.close()?;
                info!("service shut down");
                Ok(())
            }
            None => Ok(()),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.lock().is_some()
    }

    // The engine is cloned out so no lock is held across an await.
    fn engine(&self) -> Result<Arc<Engine>, EngineError> {
        self.active
            .lock()
            .as_ref()
            .map(|active| active.engine.clone())
            .ok_or(EngineError::NotInitialized)
    }

    pub async fn create(&self, candidate: TermEntity) -> Result<CreateOutcome, EngineError> {
        self.engine()?.create_request(candidate).await
    }

    pub async fn get(&self, id: &str) -> Result<Option<TermEntity>, EngineError> {
        self.engine()?.get_by_id(id).await
    }

    pub fn search(&self, text: &str) -> Result<Vec<TermEntity>, EngineError> {
        self.engine()?.search(text)
    }

    pub async fn sync_one(&self, entity: TermEntity) -> Result<SyncOutcome, EngineError> {
        self.engine()?.sync_one(entity).await
    }

    pub async fn sync_all(&self) -> Result<SyncReport, EngineError> {
        self.engine()?.sync_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn lifecycle_is_idempotent() {
        let dir = tempdir().unwrap();
        let service = TermService::new(ServiceConfig {
            store: StoreConfig::new(dir.path()),
            tracker: TrackerConfig::new("vocab-org", "term-requests"),
        });

        assert!(matches!(
            service.search("anything"),
            Err(EngineError::NotInitialized)
        ));

        service.init().unwrap();
        service.init().unwrap();
        assert!(service.is_active());

        assert_eq!(service.get("REQ_000001").await.unwrap(), None);
        assert!(service.search("anything").unwrap().is_empty());

        service.shutdown().unwrap();
        service.shutdown().unwrap();
        assert!(!service.is_active());
        assert!(matches!(
            service.search("anything"),
            Err(EngineError::NotInitialized)
        ));

        // A shut-down service can come back.
        service.init().unwrap();
        assert!(service.is_active());
        service.shutdown().unwrap();
    }
}
