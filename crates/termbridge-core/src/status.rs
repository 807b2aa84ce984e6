//! Proposal status lifecycle.
//!
//! ```text
//!                        ┌──────────► REJECTED (terminal)
//!                        │
//! UNSUBMITTED ──► SUBMITTED ──► ACCEPTED ──► PUBLISHED (terminal)
//!                        │           │           ▲
//!                        │           ▼           │
//!                        └──────► SYNONYM ───────┘
//! ```
//!
//! The table below is the single authority on which moves are legal. The
//! UNSUBMITTED → SUBMITTED edge is only taken locally, at the moment a ticket
//! is opened; every other forward edge is driven by an observed tracker read
//! or by the engine's published-promotion check.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Where a proposal stands in the authority's review process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TermStatus {
    /// Exists only in the store; no ticket yet.
    Unsubmitted,
    /// Mirrored into the tracker, awaiting review.
    Submitted,
    /// The authority accepted the term.
    Accepted,
    /// The authority declined the term.
    Rejected,
    /// The authority folded the term into another as a synonym.
    Synonym,
    /// The term (or its owner) is part of the published vocabulary.
    Published,
}

impl TermStatus {
    /// Whether the lifecycle permits moving from `self` to `to`.
    pub fn can_advance(self, to: TermStatus) -> bool {
        use TermStatus::*;
        matches!(
            (self, to),
            (Unsubmitted, Submitted)
                | (Submitted, Accepted)
                | (Submitted, Rejected)
                | (Submitted, Synonym)
                | (Accepted, Synonym)
                | (Accepted, Published)
                | (Synonym, Published)
        )
    }

    /// Terminal states never advance again.
    pub fn is_terminal(self) -> bool {
        matches!(self, TermStatus::Rejected | TermStatus::Published)
    }
}

impl fmt::Display for TermStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TermStatus::Unsubmitted => "UNSUBMITTED",
            TermStatus::Submitted => "SUBMITTED",
            TermStatus::Accepted => "ACCEPTED",
            TermStatus::Rejected => "REJECTED",
            TermStatus::Synonym => "SYNONYM",
            TermStatus::Published => "PUBLISHED",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TermStatus::*;

    const ALL: [TermStatus; 6] = [Unsubmitted, Submitted, Accepted, Rejected, Synonym, Published];

    #[test]
    fn transition_table_is_exact() {
        let legal = [
            (Unsubmitted, Submitted),
            (Submitted, Accepted),
            (Submitted, Rejected),
            (Submitted, Synonym),
            (Accepted, Synonym),
            (Accepted, Published),
            (Synonym, Published),
        ];
        for from in ALL {
            for to in ALL {
                let expected = legal.contains(&(from, to));
                assert_eq!(
                    from.can_advance(to),
                    expected,
                    "unexpected legality for {from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn terminal_states_never_advance() {
        for from in [Rejected, Published] {
            assert!(from.is_terminal());
            for to in ALL {
                assert!(!from.can_advance(to), "{from} must not advance to {to}");
            }
        }
        for from in [Unsubmitted, Submitted, Accepted, Synonym] {
            assert!(!from.is_terminal());
        }
    }

    #[test]
    fn serializes_as_screaming_snake_case() {
        assert_eq!(serde_json::to_string(&Unsubmitted).unwrap(), "\"UNSUBMITTED\"");
        assert_eq!(
            serde_json::from_str::<TermStatus>("\"SYNONYM\"").unwrap(),
            Synonym
        );
    }

    #[test]
    fn display_matches_wire_casing() {
        for status in ALL {
            assert_eq!(
                serde_json::to_string(&status).unwrap(),
                format!("\"{status}\"")
            );
        }
    }
}
