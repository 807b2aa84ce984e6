//! Identifier scheme for local records and authority terms.
//!
//! Local ids are a fixed prefix plus a zero-padded decimal counter
//! (`REQ_000045`). The counter is allocated by the store from its
//! most-recently-created record, so everything here is pure parsing and
//! formatting. Authority ids (`VOC_001234`) follow the authority's own
//! format and are never minted locally; they arrive through tracker reads.

use crate::error::CoreError;

/// Prefix for store-assigned record ids.
pub const LOCAL_ID_PREFIX: &str = "REQ_";

/// Prefix the authority uses for published vocabulary terms.
pub const AUTHORITY_ID_PREFIX: &str = "VOC_";

/// Minimum digit width of the local counter; the counter keeps growing past
/// six digits rather than wrapping.
const LOCAL_ID_DIGITS: usize = 6;

/// The id handed to the very first record in an empty store.
pub const INITIAL_LOCAL_ID: &str = "REQ_000001";

/// Render a counter value as a local id.
pub fn format_local_id(counter: u64) -> String {
    format!("{LOCAL_ID_PREFIX}{counter:0width$}", width = LOCAL_ID_DIGITS)
}

/// Parse the counter out of a local id.
pub fn local_id_counter(id: &str) -> Result<u64, CoreError> {
    let digits = id
        .strip_prefix(LOCAL_ID_PREFIX)
        .ok_or_else(|| CoreError::InvalidId(id.to_string()))?;
    if digits.len() < LOCAL_ID_DIGITS || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CoreError::InvalidId(id.to_string()));
    }
    digits
        .parse::<u64>()
        .map_err(|_| CoreError::InvalidId(id.to_string()))
}

/// The id that follows `id` in allocation order.
pub fn increment_id(id: &str) -> Result<String, CoreError> {
    Ok(format_local_id(local_id_counter(id)? + 1))
}

/// Whether `id` is a well-formed local record id.
pub fn is_local_id(id: &str) -> bool {
    local_id_counter(id).is_ok()
}

/// Whether `id` is a well-formed authority term id.
pub fn is_authority_id(id: &str) -> bool {
    id.strip_prefix(AUTHORITY_ID_PREFIX)
        .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
}
