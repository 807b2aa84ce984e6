//! The shipped store: in-memory records behind a lock, JSON snapshot on disk.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use parking_lot::RwLock;
use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use termbridge_core::{ids, CoreError, TermEntity, TermStatus};

use crate::index::{LabelIndex, TokenIndex};
use crate::{PersistenceStore, StoreError};

/// Configuration for [`JsonTermStore`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding the snapshot; created on open.
    pub home: PathBuf,
    /// Snapshot file name inside `home`.
    pub snapshot_file: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            home: PathBuf::from("./termbridge"),
            snapshot_file: "terms.json".to_string(),
        }
    }
}

impl StoreConfig {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self {
            home: home.into(),
            ..Self::default()
        }
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.home.join(&self.snapshot_file)
    }
}

struct StoreInner {
    /// Records keyed by the numeric suffix of their local id.
    records: BTreeMap<u32, TermEntity>,
    labels: LabelIndex,
    tokens: TokenIndex,
    by_authority: HashMap<String, RoaringBitmap>,
    by_ticket: HashMap<u64, u32>,
    autocommit: bool,
    flush_pending: bool,
}

impl StoreInner {
    fn new() -> Self {
        Self {
            records: BTreeMap::new(),
            labels: LabelIndex::default(),
            tokens: TokenIndex::default(),
            by_authority: HashMap::new(),
            by_ticket: HashMap::new(),
            autocommit: true,
            flush_pending: false,
        }
    }
}

/// JSON-snapshot store. Indexes are derived state: rebuilt on open,
/// maintained on every save and delete.
pub struct JsonTermStore {
    config: StoreConfig,
    inner: RwLock<StoreInner>,
    open: AtomicBool,
}

impl JsonTermStore {
    /// Open (creating if necessary) the store under `config.home`.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        std::fs::create_dir_all(&config.home)?;
        let mut inner = StoreInner::new();
        let path = config.snapshot_path();
        if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            let records: Vec<TermEntity> = serde_json::from_str(&contents)?;
            for mut record in records {
                let Some(id) = record.local_id().map(str::to_string) else {
                    warn!(name = record.name(), "skipping snapshot record without local id");
                    continue;
                };
                let counter = match Self::counter_of(&id) {
                    Ok(counter) => counter,
                    Err(_) => {
                        warn!(id = %id, "skipping snapshot record with malformed local id");
                        continue;
                    }
                };
                record.mark_clean()?;
                Self::index_record(&mut inner, counter, &record);
                inner.records.insert(counter, record);
            }
            debug!(
                records = inner.records.len(),
                path = %path.display(),
                "store opened"
            );
        }
        Ok(Self {
            config,
            inner: RwLock::new(inner),
            open: AtomicBool::new(true),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Closed)
        }
    }

    fn counter_of(id: &str) -> Result<u32, StoreError> {
        let counter = ids::local_id_counter(id)?;
        u32::try_from(counter).map_err(|_| CoreError::InvalidId(id.to_string()).into())
    }

    /// Id for the next record: the most-recently-created record's id,
    /// incremented; an empty store starts the counter at one.
    fn next_local_id(inner: &StoreInner) -> Result<String, StoreError> {
        let latest = inner
            .records
            .iter()
            .max_by_key(|(&counter, record)| (record.created_at(), counter));
        match latest {
            None => Ok(ids::INITIAL_LOCAL_ID.to_string()),
            Some((_, record)) => {
                let id = record.local_id().ok_or(CoreError::Unsaved)?;
                Ok(ids::increment_id(id)?)
            }
        }
    }

    fn index_record(inner: &mut StoreInner, counter: u32, record: &TermEntity) {
        inner.labels.insert(record.name(), counter);
        inner.tokens.insert_text(record.name(), counter);
        for synonym in record.synonyms() {
            inner.labels.insert(synonym, counter);
            inner.tokens.insert_text(synonym, counter);
        }
        if !record.description().is_empty() {
            inner.tokens.insert_text(record.description(), counter);
        }
        if let Some(authority) = record.authority_id() {
            inner
                .by_authority
                .entry(authority.to_string())
                .or_default()
                .insert(counter);
        }
        if let Some(ticket) = record.ticket_id() {
            inner.by_ticket.insert(ticket, counter);
        }
    }

    fn unindex_record(inner: &mut StoreInner, counter: u32, record: &TermEntity) {
        inner.labels.remove(record.name(), counter);
        inner.tokens.remove_text(record.name(), counter);
        for synonym in record.synonyms() {
            inner.labels.remove(synonym, counter);
            inner.tokens.remove_text(synonym, counter);
        }
        if !record.description().is_empty() {
            inner.tokens.remove_text(record.description(), counter);
        }
        if let Some(authority) = record.authority_id() {
            if let Some(bitmap) = inner.by_authority.get_mut(authority) {
                bitmap.remove(counter);
                if bitmap.is_empty() {
                    inner.by_authority.remove(authority);
                }
            }
        }
        if let Some(ticket) = record.ticket_id() {
            inner.by_ticket.remove(&ticket);
        }
    }

    fn flush(&self, inner: &mut StoreInner) -> Result<(), StoreError> {
        if !inner.flush_pending {
            return Ok(());
        }
        let count = inner.records.len();
        let records: Vec<&TermEntity> = inner.records.values().collect();
        let json = serde_json::to_string_pretty(&records)?;
        std::fs::write(self.config.snapshot_path(), json)?;
        inner.flush_pending = false;
        debug!(records = count, "snapshot flushed");
        Ok(())
    }
}

impl PersistenceStore for JsonTermStore {
    fn save(&self, mut entity: TermEntity) -> Result<TermEntity, StoreError> {
        self.ensure_open()?;
        if !entity.is_dirty() {
            return Ok(entity);
        }
        let mut inner = self.inner.write();
        let counter = match entity.local_id() {
            Some(id) => {
                let counter = Self::counter_of(id)?;
                if let Some(previous) = inner.records.remove(&counter) {
                    Self::unindex_record(&mut inner, counter, &previous);
                }
                counter
            }
            None => {
                let id = Self::next_local_id(&inner)?;
                let counter = Self::counter_of(&id)?;
                entity.assign_local_id(id)?;
                counter
            }
        };
        entity.touch(Utc::now());
        entity.mark_clean()?;
        Self::index_record(&mut inner, counter, &entity);
        inner.records.insert(counter, entity.clone());
        inner.flush_pending = true;
        if inner.autocommit {
            self.flush(&mut inner)?;
        }
        Ok(entity)
    }

    fn find_equivalent(&self, candidate: &TermEntity) -> Result<Option<TermEntity>, StoreError> {
        self.ensure_open()?;
        let inner = self.inner.read();
        if let Some(id) = candidate.local_id() {
            if let Ok(counter) = Self::counter_of(id) {
                if let Some(record) = inner.records.get(&counter) {
                    return Ok(Some(record.clone()));
                }
            }
        }
        if let Some(ticket) = candidate.ticket_id() {
            if let Some(&counter) = inner.by_ticket.get(&ticket) {
                return Ok(inner.records.get(&counter).cloned());
            }
        }
        let labels = candidate.normalized_labels();
        let hits = inner.labels.lookup_any(labels.iter().map(String::as_str));
        match hits.min() {
            Some(counter) => Ok(inner.records.get(&counter).cloned()),
            None => Ok(None),
        }
    }

    fn find_by_id(&self, id: &str) -> Result<Option<TermEntity>, StoreError> {
        self.ensure_open()?;
        let counter = Self::counter_of(id)?;
        Ok(self.inner.read().records.get(&counter).cloned())
    }

    fn find_by_authority_id(&self, id: &str) -> Result<Option<TermEntity>, StoreError> {
        self.ensure_open()?;
        let inner = self.inner.read();
        let Some(hits) = inner.by_authority.get(id) else {
            return Ok(None);
        };
        // Several records may carry the same authority id once a synonym
        // merge has happened; the owner is the non-synonym one.
        let mut fallback = None;
        for counter in hits.iter() {
            if let Some(record) = inner.records.get(&counter) {
                if record.status() != TermStatus::Synonym {
                    return Ok(Some(record.clone()));
                }
                fallback.get_or_insert_with(|| record.clone());
            }
        }
        Ok(fallback)
    }

    fn find_by_ticket_id(&self, ticket: u64) -> Result<Option<TermEntity>, StoreError> {
        self.ensure_open()?;
        let inner = self.inner.read();
        match inner.by_ticket.get(&ticket) {
            Some(counter) => Ok(inner.records.get(counter).cloned()),
            None => Ok(None),
        }
    }

    fn find_by_status(&self, status: TermStatus) -> Result<Vec<TermEntity>, StoreError> {
        self.ensure_open()?;
        Ok(self
            .inner
            .read()
            .records
            .values()
            .filter(|record| record.status() == status)
            .cloned()
            .collect())
    }

    fn search(&self, text: &str) -> Result<Vec<TermEntity>, StoreError> {
        self.ensure_open()?;
        let inner = self.inner.read();
        let hits = inner.tokens.query_all(text);
        Ok(hits
            .iter()
            .filter_map(|counter| inner.records.get(&counter).cloned())
            .collect())
    }

    fn commit(&self) -> Result<(), StoreError> {
        self.ensure_open()?;
        let mut inner = self.inner.write();
        self.flush(&mut inner)
    }

    fn set_batch_mode(&self, on: bool) -> Result<bool, StoreError> {
        self.ensure_open()?;
        let mut inner = self.inner.write();
        let previous = !inner.autocommit;
        inner.autocommit = !on;
        Ok(previous)
    }

    fn delete(&self, entity: &TermEntity) -> Result<(), StoreError> {
        self.ensure_open()?;
        let id = entity.local_id().ok_or(CoreError::Unsaved)?;
        let counter = Self::counter_of(id)?;
        let mut inner = self.inner.write();
        if let Some(previous) = inner.records.remove(&counter) {
            Self::unindex_record(&mut inner, counter, &previous);
            inner.flush_pending = true;
            if inner.autocommit {
                self.flush(&mut inner)?;
            }
        }
        Ok(())
    }

    fn close(&self) -> Result<(), StoreError> {
        if !self.open.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let mut inner = self.inner.write();
        self.flush(&mut inner)
    }
}
