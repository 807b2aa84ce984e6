//! The term proposal record and its merge/dirty semantics.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::CoreError;
use crate::status::TermStatus;

/// A proposed (or resolved) vocabulary term.
///
/// Identity is layered: a transient candidate has no ids at all, the store
/// assigns `local_id` on first save, the tracker contributes `ticket_id` at
/// submission, and `authority_id` only ever arrives through a tracker read
/// once the authority has accepted the term.
///
/// Dirtiness is a digest comparison: `version_mark` holds the digest taken
/// when the store last marked the record clean, so any field change (or a
/// missing local id) makes the record dirty again. The mark itself is never
/// serialized; loaded records are re-marked by the store.
///
/// Equality (`==`) is full-state comparison, mark excluded. The fuzzy
/// label-intersection check lives in [`TermEntity::equivalent_to`] and is
/// only ever used for store dedup lookups; it is deliberately not `Eq`/`Hash`
/// material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TermEntity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    local_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    authority_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ticket_id: Option<u64>,
    name: String,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    synonyms: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    description: String,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    parent_ids: BTreeSet<String>,
    status: TermStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    modified_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cache_validator: Option<String>,
    #[serde(skip)]
    version_mark: Option<String>,
}

impl TermEntity {
    /// Create a transient candidate. The name is the primary label and must
    /// be non-empty after trimming.
    pub fn new(name: impl Into<String>) -> Result<Self, CoreError> {
        let name = name.into().trim().to_string();
        if name.is_empty() {
            return Err(CoreError::EmptyName);
        }
        Ok(Self {
            local_id: None,
            authority_id: None,
            ticket_id: None,
            name,
            synonyms: BTreeSet::new(),
            description: String::new(),
            parent_ids: BTreeSet::new(),
            status: TermStatus::Unsubmitted,
            created_at: None,
            modified_at: None,
            cache_validator: None,
            version_mark: None,
        })
    }

    /// Builder-style description.
    pub fn with_description(mut self, text: impl Into<String>) -> Self {
        self.set_description(text);
        self
    }

    /// Builder-style synonym; silently skips labels the invariants refuse.
    pub fn with_synonym(mut self, label: &str) -> Self {
        self.add_synonym(label);
        self
    }

    /// Builder-style parent id.
    pub fn with_parent(mut self, id: impl Into<String>) -> Self {
        self.add_parent(id);
        self
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn synonyms(&self) -> &BTreeSet<String> {
        &self.synonyms
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn parent_ids(&self) -> &BTreeSet<String> {
        &self.parent_ids
    }

    pub fn local_id(&self) -> Option<&str> {
        self.local_id.as_deref()
    }

    pub fn authority_id(&self) -> Option<&str> {
        self.authority_id.as_deref()
    }

    pub fn ticket_id(&self) -> Option<u64> {
        self.ticket_id
    }

    pub fn status(&self) -> TermStatus {
        self.status
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn modified_at(&self) -> Option<DateTime<Utc>> {
        self.modified_at
    }

    pub fn cache_validator(&self) -> Option<&str> {
        self.cache_validator.as_deref()
    }

    /// Name plus synonyms, lowercased, for equivalence checks and store
    /// label indexing.
    pub fn normalized_labels(&self) -> BTreeSet<String> {
        let mut labels: BTreeSet<String> =
            self.synonyms.iter().map(|s| s.to_lowercase()).collect();
        labels.insert(self.name.to_lowercase());
        labels
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    pub fn set_description(&mut self, text: impl Into<String>) {
        self.description = text.into();
    }

    /// Add an alternate label. Refuses empty labels, the primary name, and
    /// case-insensitive duplicates; returns whether anything was added.
    pub fn add_synonym(&mut self, label: &str) -> bool {
        let label = label.trim();
        if label.is_empty() {
            return false;
        }
        let normalized = label.to_lowercase();
        if normalized == self.name.to_lowercase() {
            return false;
        }
        if self.synonyms.iter().any(|s| s.to_lowercase() == normalized) {
            return false;
        }
        self.synonyms.insert(label.to_string())
    }

    /// Add a broader-term identifier; returns whether anything was added.
    pub fn add_parent(&mut self, id: impl Into<String>) -> bool {
        let id = id.into().trim().to_string();
        if id.is_empty() {
            return false;
        }
        self.parent_ids.insert(id)
    }

    /// Record the authority's id for this term. Only tracker reads carry
    /// these; the engine applies them.
    pub fn set_authority_id(&mut self, id: impl Into<String>) {
        self.authority_id = Some(id.into());
    }

    /// Replace the conditional-fetch validator from the last tracker
    /// interaction.
    pub fn set_cache_validator(&mut self, validator: Option<String>) {
        self.cache_validator = validator;
    }

    /// Absorb `other`'s labels: every synonym, plus its name as a synonym.
    /// Status, ids, and parents are untouched and `other` is not modified.
    /// Returns whether anything was absorbed; the caller persists.
    pub fn merge_with(&mut self, other: &TermEntity) -> bool {
        let mut changed = false;
        for synonym in &other.synonyms {
            changed |= self.add_synonym(synonym);
        }
        changed |= self.add_synonym(&other.name);
        changed
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// A proposal that exists only locally and may be submitted.
    pub fn submittable(&self) -> bool {
        self.status == TermStatus::Unsubmitted && self.ticket_id.is_none()
    }

    /// Record a freshly opened ticket. This is the only local path out of
    /// UNSUBMITTED.
    pub fn mark_submitted(&mut self, ticket: u64) -> Result<(), CoreError> {
        if !self.submittable() {
            return Err(CoreError::NotSubmittable);
        }
        self.ticket_id = Some(ticket);
        self.status = TermStatus::Submitted;
        Ok(())
    }

    /// Apply a status transition observed from the tracker (or the engine's
    /// published promotion). `Ok(false)` when the status already matches;
    /// errors when the entity has no ticket or the table forbids the move.
    pub fn advance_status(&mut self, to: TermStatus) -> Result<bool, CoreError> {
        if self.status == to {
            return Ok(false);
        }
        if self.ticket_id.is_none() {
            return Err(CoreError::NoTicket);
        }
        if !self.status.can_advance(to) {
            return Err(CoreError::IllegalTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(true)
    }

    // ========================================================================
    // Equivalence (dedup lookups only)
    // ========================================================================

    /// The fuzzy dedup check: saved records compare by local id; otherwise
    /// two proposals are the same term when their label sets intersect. Not
    /// transitive, so never used for keying or hashing.
    pub fn equivalent_to(&self, other: &TermEntity) -> bool {
        if let (Some(mine), Some(theirs)) = (self.local_id.as_deref(), other.local_id.as_deref())
        {
            return mine == theirs;
        }
        !self
            .normalized_labels()
            .is_disjoint(&other.normalized_labels())
    }

    // ========================================================================
    // Store-assigned state and dirty tracking
    // ========================================================================

    /// Assign the store id. Refused once saved; ids are permanent.
    pub fn assign_local_id(&mut self, id: impl Into<String>) -> Result<(), CoreError> {
        if self.local_id.is_some() {
            return Err(CoreError::AlreadySaved);
        }
        self.local_id = Some(id.into());
        Ok(())
    }

    /// Store-assigned timestamps: fixes `created_at` on first call, bumps
    /// `modified_at` on every call.
    pub fn touch(&mut self, at: DateTime<Utc>) {
        self.created_at.get_or_insert(at);
        self.modified_at = Some(at);
    }

    /// Whether the record differs from what the store last persisted.
    pub fn is_dirty(&self) -> bool {
        match (&self.local_id, &self.version_mark) {
            (None, _) | (_, None) => true,
            (Some(_), Some(mark)) => *mark != self.state_digest(),
        }
    }

    /// Take the clean snapshot mark. Only saved records can be clean.
    pub fn mark_clean(&mut self) -> Result<(), CoreError> {
        if self.local_id.is_none() {
            return Err(CoreError::Unsaved);
        }
        self.version_mark = Some(self.state_digest());
        Ok(())
    }

    fn state_digest(&self) -> String {
        fn field(hasher: &mut Sha256, value: Option<&str>) {
            match value {
                Some(v) => {
                    hasher.update([1u8]);
                    hasher.update(v.as_bytes());
                }
                None => hasher.update([0u8]),
            }
            hasher.update([0x1eu8]);
        }
        let mut hasher = Sha256::new();
        field(&mut hasher, self.local_id.as_deref());
        field(&mut hasher, self.authority_id.as_deref());
        field(&mut hasher, self.ticket_id.map(|t| t.to_string()).as_deref());
        field(&mut hasher, Some(&self.name));
        // Length prefixes keep adjacent collections from sharing a digest.
        hasher.update(self.synonyms.len().to_be_bytes());
        for synonym in &self.synonyms {
            field(&mut hasher, Some(synonym));
        }
        field(&mut hasher, Some(&self.description));
        hasher.update(self.parent_ids.len().to_be_bytes());
        for parent in &self.parent_ids {
            field(&mut hasher, Some(parent));
        }
        field(&mut hasher, Some(&self.status.to_string()));
        field(&mut hasher, self.created_at.map(|t| t.to_rfc3339()).as_deref());
        field(&mut hasher, self.modified_at.map(|t| t.to_rfc3339()).as_deref());
        field(&mut hasher, self.cache_validator.as_deref());
        format!("{:x}", hasher.finalize())
    }
}

impl PartialEq for TermEntity {
    fn eq(&self, other: &Self) -> bool {
        self.local_id == other.local_id
            && self.authority_id == other.authority_id
            && self.ticket_id == other.ticket_id
            && self.name == other.name
            && self.synonyms == other.synonyms
            && self.description == other.description
            && self.parent_ids == other.parent_ids
            && self.status == other.status
            && self.created_at == other.created_at
            && self.modified_at == other.modified_at
            && self.cache_validator == other.cache_validator
    }
}

impl Eq for TermEntity {}

#[cfg(test)]
mod tests {
    use super::*;

    fn term(name: &str) -> TermEntity {
        TermEntity::new(name).unwrap()
    }

    #[test]
    fn rejects_empty_names() {
        assert_eq!(TermEntity::new(""), Err(CoreError::EmptyName));
        assert_eq!(TermEntity::new("   "), Err(CoreError::EmptyName));
    }

    #[test]
    fn name_never_joins_its_own_synonyms() {
        let mut t = term("Abnormal gait");
        assert!(!t.add_synonym("Abnormal gait"));
        assert!(!t.add_synonym("ABNORMAL GAIT"));
        assert!(!t.add_synonym("  "));
        assert!(t.add_synonym("Gait abnormality"));
        assert!(!t.add_synonym("gait ABNORMALITY"));
        assert_eq!(t.synonyms().len(), 1);
    }

    #[test]
    fn equivalence_by_shared_label() {
        let a = term("Ataxia").with_synonym("Wobbly gait");
        let b = term("Unsteady walk").with_synonym("wobbly GAIT");
        let c = term("Hypertelorism");
        assert!(a.equivalent_to(&b));
        assert!(b.equivalent_to(&a));
        assert!(!a.equivalent_to(&c));
    }

    #[test]
    fn equivalence_by_local_id_wins_over_labels() {
        let mut a = term("Ataxia");
        let mut b = term("Ataxia");
        a.assign_local_id("REQ_000001").unwrap();
        b.assign_local_id("REQ_000002").unwrap();
        // Both saved: ids decide, shared labels notwithstanding.
        assert!(!a.equivalent_to(&b));

        let mut c = term("Something else");
        c.assign_local_id("REQ_000001").unwrap();
        assert!(a.equivalent_to(&c));

        // Saved vs transient falls back to labels.
        let d = term("Ataxia");
        assert!(a.equivalent_to(&d));
    }

    #[test]
    fn merge_absorbs_labels_and_nothing_else() {
        let mut target = term("Ataxia").with_synonym("Wobbly gait");
        target.assign_local_id("REQ_000007").unwrap();
        target.add_parent("VOC_000100");

        let other = term("Unsteady walk")
            .with_synonym("Wobbly gait")
            .with_synonym("Staggering")
            .with_parent("VOC_000999")
            .with_description("some text");

        assert!(target.merge_with(&other));
        assert!(target.synonyms().contains("Unsteady walk"));
        assert!(target.synonyms().contains("Staggering"));
        assert!(target.synonyms().contains("Wobbly gait"));
        assert_eq!(target.name(), "Ataxia");
        assert_eq!(target.local_id(), Some("REQ_000007"));
        assert_eq!(target.status(), TermStatus::Unsubmitted);
        assert!(!target.parent_ids().contains("VOC_000999"));
        assert_eq!(target.description(), "");

        // Merging the same labels again is a no-op.
        assert!(!target.merge_with(&other));
        // The donor is untouched.
        assert_eq!(other.synonyms().len(), 2);
    }

    #[test]
    fn dirty_tracks_the_version_mark() {
        let mut t = term("Ataxia");
        assert!(t.is_dirty());
        assert_eq!(t.mark_clean(), Err(CoreError::Unsaved));

        t.assign_local_id("REQ_000001").unwrap();
        t.touch(Utc::now());
        assert!(t.is_dirty());
        t.mark_clean().unwrap();
        assert!(!t.is_dirty());

        assert!(t.add_synonym("Wobbly gait"));
        assert!(t.is_dirty());
        t.mark_clean().unwrap();
        assert!(!t.is_dirty());

        t.set_cache_validator(Some("W/\"etag\"".to_string()));
        assert!(t.is_dirty());
    }

    #[test]
    fn local_id_is_permanent() {
        let mut t = term("Ataxia");
        t.assign_local_id("REQ_000001").unwrap();
        assert_eq!(
            t.assign_local_id("REQ_000002"),
            Err(CoreError::AlreadySaved)
        );
        assert_eq!(t.local_id(), Some("REQ_000001"));
    }

    #[test]
    fn submission_is_the_only_local_exit_from_unsubmitted() {
        let mut t = term("Ataxia");
        assert!(t.submittable());
        assert_eq!(t.advance_status(TermStatus::Accepted), Err(CoreError::NoTicket));

        t.mark_submitted(42).unwrap();
        assert_eq!(t.status(), TermStatus::Submitted);
        assert_eq!(t.ticket_id(), Some(42));
        assert!(!t.submittable());
        assert_eq!(t.mark_submitted(43), Err(CoreError::NotSubmittable));
    }

    #[test]
    fn advance_follows_the_table() {
        let mut t = term("Ataxia");
        t.mark_submitted(42).unwrap();

        assert_eq!(t.advance_status(TermStatus::Submitted), Ok(false));
        assert_eq!(t.advance_status(TermStatus::Accepted), Ok(true));
        assert_eq!(
            t.advance_status(TermStatus::Submitted),
            Err(CoreError::IllegalTransition {
                from: TermStatus::Accepted,
                to: TermStatus::Submitted,
            })
        );
        assert_eq!(t.advance_status(TermStatus::Synonym), Ok(true));
        assert_eq!(t.advance_status(TermStatus::Published), Ok(true));
        assert!(t.status().is_terminal());
    }

    #[test]
    fn touch_fixes_creation_and_bumps_modification() {
        let mut t = term("Ataxia");
        let first = Utc::now();
        t.touch(first);
        assert_eq!(t.created_at(), Some(first));
        assert_eq!(t.modified_at(), Some(first));

        let later = first + chrono::Duration::seconds(5);
        t.touch(later);
        assert_eq!(t.created_at(), Some(first));
        assert_eq!(t.modified_at(), Some(later));
    }

    #[test]
    fn serde_round_trip_preserves_state() {
        let mut t = term("Ataxia")
            .with_synonym("Wobbly gait")
            .with_parent("VOC_000100")
            .with_description("Inability to coordinate movements.");
        t.assign_local_id("REQ_000003").unwrap();
        t.mark_submitted(7).unwrap();
        t.set_authority_id("VOC_001234");
        t.set_cache_validator(Some("W/\"abc\"".to_string()));
        t.touch(Utc::now());

        let json = serde_json::to_string(&t).unwrap();
        let back: TermEntity = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
        // The mark is transient: a reloaded record is dirty until the store
        // marks it clean.
        assert!(back.is_dirty());
    }
}
