//! The reconciliation engine.
//!
//! One engine owns one store and one tracker client and is the only writer
//! to either. Creates dedup against both sides before anything is written,
//! and the local record is always saved before its ticket is opened, so an
//! interruption leaves an adoptable record, never an orphaned ticket.
//! Reconciliation pulls resolutions inward: status and the authority id come
//! from tickets, labels never do.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use termbridge_core::{ids, CoreError, TermEntity, TermStatus};
use termbridge_store::PersistenceStore;

use crate::ticket::{ticket_title, TicketRead, TicketSnapshot};
use crate::tracker::TrackerClient;
use crate::EngineError;

/// Result of [`ReconciliationEngine::create_request`].
#[derive(Debug, Clone)]
pub struct CreateOutcome {
    pub entity: TermEntity,
    /// False when the proposal matched an existing record and was merged.
    pub is_new: bool,
}

/// Result of one reconciliation step for one record.
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub entity: TermEntity,
    /// The owning record, when `entity` is resolved as a synonym of a term
    /// the store already holds. Callers that display a term should follow
    /// this.
    pub merged_into: Option<TermEntity>,
}

/// Tally of one full reconciliation pass.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub run_id: Uuid,
    /// Records considered (everything submitted but not yet terminal).
    pub scanned: usize,
    /// Records that changed during the pass.
    pub updated: usize,
    /// Records routed to an owner, settled synonyms included.
    pub merged: usize,
    pub duration_ms: u64,
}

pub struct ReconciliationEngine<S, T> {
    store: Arc<S>,
    tracker: Arc<T>,
    /// Serializes every write path. A create and a reconciliation pass must
    /// never interleave their read/save/open sequences.
    write_gate: Mutex<()>,
}

impl<S: PersistenceStore, T: TrackerClient> ReconciliationEngine<S, T> {
    pub fn new(store: Arc<S>, tracker: Arc<T>) -> Self {
        Self {
            store,
            tracker,
            write_gate: Mutex::new(()),
        }
    }

    /// File a proposal: dedup locally, then against the tracker, and only
    /// then create what is missing. The local record is saved before the
    /// ticket is opened and saved again with the ticket number.
    pub async fn create_request(&self, candidate: TermEntity) -> Result<CreateOutcome, EngineError> {
        if candidate.local_id().is_some() || candidate.ticket_id().is_some() {
            return Err(EngineError::InvalidArgument(
                "create takes a transient proposal, not a saved record".to_string(),
            ));
        }
        let _gate = self.write_gate.lock().await;

        let (mut target, is_new, widened) = match self.store.find_equivalent(&candidate)? {
            Some(mut existing) => {
                let widened = existing.merge_with(&candidate);
                debug!(
                    id = ?existing.local_id(),
                    name = existing.name(),
                    widened,
                    "proposal matches an existing record"
                );
                (existing, false, widened)
            }
            None => (candidate, true, false),
        };

        if target.ticket_id().is_some() {
            let outcome = self.sync_entity(target).await?;
            if let Some(owner) = outcome.merged_into {
                return Ok(CreateOutcome {
                    entity: owner,
                    is_new,
                });
            }
            let mut entity = outcome.entity;
            // Push widened labels out, but only while the ticket is still
            // open: a resolved ticket's body belongs to the curators.
            if widened && entity.status() == TermStatus::Submitted {
                let validator = self.tracker.patch_ticket(&entity).await?;
                entity.set_cache_validator(validator);
                entity = self.store.save(entity)?;
            }
            return Ok(CreateOutcome { entity, is_new });
        }

        match self.tracker.find_ticket(&target).await? {
            Some(ticket) if is_new => Err(EngineError::DataLoss {
                ticket,
                title: ticket_title(&target),
            }),
            Some(ticket) => {
                // A record without a ticket plus a matching ticket means a
                // submission was interrupted between open and save. Adopt it.
                warn!(id = ?target.local_id(), ticket, "adopting ticket from an interrupted submission");
                target.mark_submitted(ticket)?;
                let entity = self.store.save(target)?;
                let outcome = self.sync_entity(entity).await?;
                Ok(CreateOutcome {
                    entity: outcome.merged_into.unwrap_or(outcome.entity),
                    is_new,
                })
            }
            None => {
                let mut entity = self.store.save(target)?;
                if entity.submittable() {
                    let created = self.tracker.open_ticket(&entity).await?;
                    entity.mark_submitted(created.number)?;
                    entity.set_cache_validator(created.validator);
                    entity = self.store.save(entity)?;
                    info!(
                        id = ?entity.local_id(),
                        ticket = created.number,
                        name = entity.name(),
                        "proposal submitted"
                    );
                }
                Ok(CreateOutcome { entity, is_new })
            }
        }
    }

    /// Look a term up by any of its three identities, refreshing it from the
    /// tracker on the way. Returns the owning record for terms that were
    /// folded into another as synonyms.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<TermEntity>, EngineError> {
        let _gate = self.write_gate.lock().await;
        let found = if ids::is_local_id(id) {
            self.store.find_by_id(id)?
        } else if ids::is_authority_id(id) {
            self.store.find_by_authority_id(id)?
        } else if let Ok(ticket) = id.parse::<u64>() {
            self.store.find_by_ticket_id(ticket)?
        } else {
            return Err(EngineError::InvalidArgument(format!(
                "unrecognized identifier {id:?}; expected REQ_n, VOC_n, or a ticket number"
            )));
        };
        let Some(entity) = found else {
            return Ok(None);
        };
        if entity.ticket_id().is_none() {
            return Ok(Some(entity));
        }
        let outcome = self.sync_entity(entity).await?;
        Ok(Some(outcome.merged_into.unwrap_or(outcome.entity)))
    }

    /// Local full-text lookup. Never touches the tracker.
    pub fn search(&self, text: &str) -> Result<Vec<TermEntity>, EngineError> {
        Ok(self.store.search(text)?)
    }

    /// Reconcile a single record now.
    pub async fn sync_one(&self, entity: TermEntity) -> Result<SyncOutcome, EngineError> {
        let _gate = self.write_gate.lock().await;
        // The caller's copy may be stale; reconcile the stored state.
        let entity = match entity.local_id() {
            Some(id) => self.store.find_by_id(id)?.unwrap_or(entity),
            None => entity,
        };
        self.sync_entity(entity).await
    }

    /// Reconcile every record that is submitted but not yet terminal. Saves
    /// are batched and flushed in one commit at the end; a failure aborts
    /// the pass but still commits what succeeded.
    pub async fn sync_all(&self) -> Result<SyncReport, EngineError> {
        let _gate = self.write_gate.lock().await;
        let run_id = Uuid::new_v4();
        let started = Instant::now();

        let mut pending = self.store.find_by_status(TermStatus::Submitted)?;
        pending.extend(self.store.find_by_status(TermStatus::Accepted)?);
        pending.extend(self.store.find_by_status(TermStatus::Synonym)?);
        info!(%run_id, pending = pending.len(), "reconciliation pass started");

        let was_batching = self.store.set_batch_mode(true)?;
        let mut scanned = 0usize;
        let mut updated = 0usize;
        let mut merged = 0usize;
        let mut failure = None;
        for stale in pending {
            scanned += 1;
            // Earlier steps in this pass may have touched this record.
            let entity = match stale.local_id() {
                Some(id) => self.store.find_by_id(id)?.unwrap_or(stale),
                None => stale,
            };
            let before = entity.clone();
            match self.sync_entity(entity).await {
                Ok(outcome) => {
                    if outcome.merged_into.is_some() {
                        merged += 1;
                    }
                    if outcome.entity != before {
                        updated += 1;
                    }
                }
                Err(error) => {
                    failure = Some(error);
                    break;
                }
            }
        }

        // Whatever happened above, put batching back and persist what
        // did succeed.
        if let Some(error) = failure {
            warn!(%run_id, scanned, error = %error, "reconciliation pass aborted");
            if let Err(restore) = self.store.set_batch_mode(was_batching) {
                warn!(%run_id, error = %restore, "failed to restore batch mode");
            }
            if let Err(commit) = self.store.commit() {
                warn!(%run_id, error = %commit, "failed to commit partial pass");
            }
            return Err(error);
        }
        self.store.set_batch_mode(was_batching)?;
        self.store.commit()?;

        let report = SyncReport {
            run_id,
            scanned,
            updated,
            merged,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            %run_id,
            scanned = report.scanned,
            updated = report.updated,
            merged = report.merged,
            duration_ms = report.duration_ms,
            "reconciliation pass finished"
        );
        Ok(report)
    }

    /// One reconciliation step for one record. The caller holds the gate.
    async fn sync_entity(&self, mut entity: TermEntity) -> Result<SyncOutcome, EngineError> {
        let Some(ticket) = entity.ticket_id() else {
            return Ok(SyncOutcome {
                entity,
                merged_into: None,
            });
        };
        match self
            .tracker
            .read_ticket(ticket, entity.cache_validator())
            .await?
        {
            TicketRead::NotModified => {
                debug!(id = ?entity.local_id(), ticket, "ticket unchanged");
            }
            TicketRead::Modified(snap) => match Self::apply_snapshot(&entity, &snap) {
                Ok(applied) => entity = applied,
                Err(CoreError::IllegalTransition { from, to }) => {
                    // The record keeps its state and its old validator, so
                    // the next pass sees the ticket again.
                    warn!(
                        id = ?entity.local_id(),
                        ticket,
                        %from,
                        %to,
                        "ignoring illegal status transition observed on ticket"
                    );
                    return Ok(SyncOutcome {
                        entity,
                        merged_into: None,
                    });
                }
                Err(e) => return Err(e.into()),
            },
        }

        let mut merged_into = None;
        if entity.status() == TermStatus::Synonym {
            merged_into = self.fold_into_owner(&mut entity)?;
        }
        if entity.status() == TermStatus::Accepted {
            self.promote_if_owned(&mut entity)?;
        }
        if entity.is_dirty() {
            entity = self.store.save(entity)?;
        }
        Ok(SyncOutcome {
            entity,
            merged_into,
        })
    }

    /// What a ticket read is allowed to change: the validator, the authority
    /// id, and a legal status transition. Labels stay as they are.
    fn apply_snapshot(entity: &TermEntity, snap: &TicketSnapshot) -> Result<TermEntity, CoreError> {
        let mut updated = entity.clone();
        updated.set_cache_validator(snap.validator.clone());
        if let Some(authority) = &snap.authority_id {
            updated.set_authority_id(authority.clone());
        }
        updated.advance_status(snap.status)?;
        Ok(updated)
    }

    /// A record resolved as a synonym folds its labels into the record that
    /// owns the authority id. Runs on every pass, so a resolution that
    /// arrives before the owner exists locally settles later on its own.
    fn fold_into_owner(
        &self,
        entity: &mut TermEntity,
    ) -> Result<Option<TermEntity>, EngineError> {
        let Some(authority) = entity.authority_id().map(str::to_string) else {
            warn!(id = ?entity.local_id(), "synonym resolution without an authority id");
            return Ok(None);
        };
        let mut owner = match self.store.find_by_authority_id(&authority)? {
            Some(owner) if owner.local_id() != entity.local_id() => owner,
            _ => {
                warn!(
                    id = ?entity.local_id(),
                    authority = %authority,
                    "synonym resolution names an authority id with no local owner"
                );
                return Ok(None);
            }
        };
        if owner.merge_with(entity) {
            owner = self.store.save(owner)?;
            info!(
                id = ?entity.local_id(),
                into = ?owner.local_id(),
                "folded synonym labels into the owning record"
            );
        }
        if owner.status() == TermStatus::Published {
            entity.advance_status(TermStatus::Published)?;
        }
        Ok(Some(owner))
    }

    /// An accepted record becomes published once the store resolves its
    /// authority id back to itself, which happens on the pass after the id
    /// was saved.
    fn promote_if_owned(&self, entity: &mut TermEntity) -> Result<(), EngineError> {
        let Some(authority) = entity.authority_id().map(str::to_string) else {
            return Ok(());
        };
        if let Some(owner) = self.store.find_by_authority_id(&authority)? {
            if owner.local_id() == entity.local_id() {
                entity.advance_status(TermStatus::Published)?;
                info!(id = ?entity.local_id(), authority = %authority, "published");
            }
        }
        Ok(())
    }
}
