//! Ticket wire format.
//!
//! A proposal's ticket carries the term in a line-oriented body:
//!
//! ```text
//! TERM: Ataxia
//! SYNONYMS: Wobbly gait, Unsteady walk
//! PARENTS: VOC_000100
//! DESCRIPTION: Inability to coordinate voluntary movements.
//! ```
//!
//! Curators resolve a proposal by closing the ticket, optionally leaving a
//! marker line in the body:
//!
//! ```text
//! RESOLUTION: VOC_001234            accepted under that authority id
//! RESOLUTION: SYNONYM VOC_001234    folded into the term owning that id
//! RESOLUTION: REJECTED              declined
//! ```
//!
//! A closed ticket without a marker (or with one that does not parse) counts
//! as accepted with no authority id yet. When the body holds several marker
//! lines the last one wins, so curators can correct themselves by editing.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;

use termbridge_core::{ids, TermEntity, TermStatus};

pub const TITLE_PREFIX: &str = "Add term ";

/// What a tracker read produced, conditional-fetch aware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TicketRead {
    /// The validator still matched; nothing changed since the last read.
    NotModified,
    Modified(TicketSnapshot),
}

/// The reconcilable view of a ticket: its mapped status, the authority id a
/// resolution marker named, and the validator for the next conditional read.
/// Labels never travel inward through a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketSnapshot {
    pub status: TermStatus,
    pub authority_id: Option<String>,
    pub validator: Option<String>,
}

/// A freshly opened ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketCreated {
    pub number: u64,
    pub validator: Option<String>,
}

/// The term fields a ticket body carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketFields {
    pub name: String,
    pub synonyms: Vec<String>,
    pub parent_ids: Vec<String>,
    pub description: Option<String>,
}

/// A parsed resolution marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Accepted { authority_id: String },
    Synonym { authority_id: String },
    Rejected,
}

pub fn ticket_title(entity: &TermEntity) -> String {
    format!("{TITLE_PREFIX}{}", entity.name())
}

/// Render the body for a new or patched ticket. Empty fields are omitted;
/// descriptions are flattened to one line because the format is line based.
pub fn render_body(entity: &TermEntity) -> String {
    let mut body = format!("TERM: {}\n", entity.name());
    if !entity.synonyms().is_empty() {
        body.push_str(&format!("SYNONYMS: {}\n", join(entity.synonyms())));
    }
    if !entity.parent_ids().is_empty() {
        body.push_str(&format!("PARENTS: {}\n", join(entity.parent_ids())));
    }
    if !entity.description().is_empty() {
        body.push_str(&format!(
            "DESCRIPTION: {}\n",
            entity.description().replace('\n', ". ")
        ));
    }
    body
}

/// Parse the term fields back out of a body. `None` when the TERM line is
/// missing, which marks a ticket this system did not write.
pub fn parse_body(body: &str) -> Option<TicketFields> {
    static TERM_RE: OnceLock<Regex> = OnceLock::new();
    static SYNONYMS_RE: OnceLock<Regex> = OnceLock::new();
    static PARENTS_RE: OnceLock<Regex> = OnceLock::new();
    static DESCRIPTION_RE: OnceLock<Regex> = OnceLock::new();

    let name = first_value(line_re("TERM", &TERM_RE), body)?;
    if name.is_empty() {
        return None;
    }
    Some(TicketFields {
        name,
        synonyms: split_list(first_value(line_re("SYNONYMS", &SYNONYMS_RE), body)),
        parent_ids: split_list(first_value(line_re("PARENTS", &PARENTS_RE), body)),
        description: first_value(line_re("DESCRIPTION", &DESCRIPTION_RE), body)
            .filter(|d| !d.is_empty()),
    })
}

/// Parse the resolution marker, if any. Later markers override earlier ones.
pub fn parse_resolution(body: &str) -> Option<Resolution> {
    static RESOLUTION_RE: OnceLock<Regex> = OnceLock::new();
    let re = line_re("RESOLUTION", &RESOLUTION_RE);
    re.captures_iter(body)
        .filter_map(|caps| parse_marker(caps.name("value")?.as_str()))
        .last()
}

/// Map a ticket's state and body to the view the engine reconciles against.
pub fn snapshot(open: bool, body: &str, validator: Option<String>) -> TicketSnapshot {
    if open {
        return TicketSnapshot {
            status: TermStatus::Submitted,
            authority_id: None,
            validator,
        };
    }
    let (status, authority_id) = match parse_resolution(body) {
        Some(Resolution::Accepted { authority_id }) => {
            (TermStatus::Accepted, Some(authority_id))
        }
        Some(Resolution::Synonym { authority_id }) => (TermStatus::Synonym, Some(authority_id)),
        Some(Resolution::Rejected) => (TermStatus::Rejected, None),
        None => (TermStatus::Accepted, None),
    };
    TicketSnapshot {
        status,
        authority_id,
        validator,
    }
}

// Horizontal whitespace only: `\s` would swallow the newline and bleed the
// capture into the next line.
fn line_re(label: &str, cache: &'static OnceLock<Regex>) -> &'static Regex {
    cache.get_or_init(|| {
        Regex::new(&format!(r"(?m)^{label}:[ \t]*(?P<value>.*?)[ \t]*$")).unwrap()
    })
}

fn first_value(re: &Regex, body: &str) -> Option<String> {
    re.captures(body)
        .and_then(|caps| caps.name("value"))
        .map(|m| m.as_str().to_string())
}

fn split_list(value: Option<String>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn join(items: &BTreeSet<String>) -> String {
    items
        .iter()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

fn parse_marker(payload: &str) -> Option<Resolution> {
    let mut parts = payload.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(word), None, None) if word.eq_ignore_ascii_case("REJECTED") => {
            Some(Resolution::Rejected)
        }
        (Some(word), Some(id), None)
            if word.eq_ignore_ascii_case("SYNONYM") && ids::is_authority_id(id) =>
        {
            Some(Resolution::Synonym {
                authority_id: id.to_string(),
            })
        }
        (Some(id), None, None) if ids::is_authority_id(id) => Some(Resolution::Accepted {
            authority_id: id.to_string(),
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn term(name: &str) -> TermEntity {
        TermEntity::new(name).unwrap()
    }

    #[test]
    fn title_carries_the_name() {
        assert_eq!(ticket_title(&term("Ataxia")), "Add term Ataxia");
    }

    #[test]
    fn body_round_trips_through_parse() {
        let entity = term("Ataxia")
            .with_synonym("Wobbly gait")
            .with_synonym("Unsteady walk")
            .with_parent("VOC_000100")
            .with_description("Inability to coordinate voluntary movements.");

        let fields = parse_body(&render_body(&entity)).unwrap();
        assert_eq!(fields.name, "Ataxia");
        assert_eq!(fields.synonyms, vec!["Unsteady walk", "Wobbly gait"]);
        assert_eq!(fields.parent_ids, vec!["VOC_000100"]);
        assert_eq!(
            fields.description.as_deref(),
            Some("Inability to coordinate voluntary movements.")
        );
    }

    #[test]
    fn empty_fields_are_omitted() {
        let body = render_body(&term("Ataxia"));
        assert_eq!(body, "TERM: Ataxia\n");

        let fields = parse_body(&body).unwrap();
        assert!(fields.synonyms.is_empty());
        assert!(fields.parent_ids.is_empty());
        assert_eq!(fields.description, None);
    }

    #[test]
    fn multiline_descriptions_are_flattened() {
        let entity = term("Ataxia").with_description("line one\nline two");
        let fields = parse_body(&render_body(&entity)).unwrap();
        assert_eq!(fields.description.as_deref(), Some("line one. line two"));
    }

    #[test]
    fn foreign_bodies_do_not_parse() {
        assert_eq!(parse_body("Please add my term, thanks!"), None);
        assert_eq!(parse_body("TERM:\nSYNONYMS: a"), None);
    }

    #[test]
    fn resolution_markers_parse() {
        assert_eq!(
            parse_resolution("TERM: X\nRESOLUTION: VOC_001234"),
            Some(Resolution::Accepted {
                authority_id: "VOC_001234".to_string()
            })
        );
        assert_eq!(
            parse_resolution("RESOLUTION: SYNONYM VOC_001234"),
            Some(Resolution::Synonym {
                authority_id: "VOC_001234".to_string()
            })
        );
        assert_eq!(
            parse_resolution("RESOLUTION: rejected"),
            Some(Resolution::Rejected)
        );
        assert_eq!(parse_resolution("RESOLUTION: maybe later"), None);
        assert_eq!(parse_resolution("RESOLUTION: SYNONYM banana"), None);
        assert_eq!(parse_resolution("TERM: X"), None);
    }

    #[test]
    fn the_last_marker_wins() {
        let body = "TERM: X\nRESOLUTION: REJECTED\nRESOLUTION: VOC_000007";
        assert_eq!(
            parse_resolution(body),
            Some(Resolution::Accepted {
                authority_id: "VOC_000007".to_string()
            })
        );
    }

    #[test]
    fn snapshots_map_state_and_marker_to_status() {
        let etag = Some("W/\"abc\"".to_string());

        let snap = snapshot(true, "TERM: X\nRESOLUTION: VOC_000001", etag.clone());
        assert_eq!(snap.status, TermStatus::Submitted);
        assert_eq!(snap.authority_id, None);
        assert_eq!(snap.validator, etag);

        let snap = snapshot(false, "TERM: X", None);
        assert_eq!(snap.status, TermStatus::Accepted);
        assert_eq!(snap.authority_id, None);

        let snap = snapshot(false, "TERM: X\nRESOLUTION: VOC_000001", None);
        assert_eq!(snap.status, TermStatus::Accepted);
        assert_eq!(snap.authority_id.as_deref(), Some("VOC_000001"));

        let snap = snapshot(false, "TERM: X\nRESOLUTION: SYNONYM VOC_000001", None);
        assert_eq!(snap.status, TermStatus::Synonym);
        assert_eq!(snap.authority_id.as_deref(), Some("VOC_000001"));

        let snap = snapshot(false, "TERM: X\nRESOLUTION: REJECTED", None);
        assert_eq!(snap.status, TermStatus::Rejected);
        assert_eq!(snap.authority_id, None);
    }
}
