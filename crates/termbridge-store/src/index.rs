//! In-memory lookup indexes over the record set.
//!
//! Two flavors, both derived state rebuilt on open and maintained on every
//! save/delete:
//!
//! - [`LabelIndex`]: exact lowercased label → record ids. Answers the
//!   equivalence lookup (name and synonym sets intersecting).
//! - [`TokenIndex`]: inverted token index for free-text search. Tokenization
//!   is simple and deterministic: split on non-alphanumerics and
//!   camelCase boundaries, lowercase, drop very short tokens and stopwords.
//!   A query matches when all of its tokens do.

use std::collections::HashMap;

use roaring::RoaringBitmap;

#[derive(Debug, Default)]
pub(crate) struct LabelIndex {
    exact: HashMap<String, RoaringBitmap>,
}

impl LabelIndex {
    pub fn insert(&mut self, label: &str, id: u32) {
        self.exact.entry(label.to_lowercase()).or_default().insert(id);
    }

    pub fn remove(&mut self, label: &str, id: u32) {
        let key = label.to_lowercase();
        if let Some(bitmap) = self.exact.get_mut(&key) {
            bitmap.remove(id);
            if bitmap.is_empty() {
                self.exact.remove(&key);
            }
        }
    }

    /// Union of record ids carrying any of the given labels.
    pub fn lookup_any<'a>(&self, labels: impl IntoIterator<Item = &'a str>) -> RoaringBitmap {
        let mut out = RoaringBitmap::new();
        for label in labels {
            if let Some(bitmap) = self.exact.get(&label.to_lowercase()) {
                out |= bitmap;
            }
        }
        out
    }
}

#[derive(Debug, Default)]
pub(crate) struct TokenIndex {
    tokens: HashMap<String, RoaringBitmap>,
}

impl TokenIndex {
    pub fn insert_text(&mut self, text: &str, id: u32) {
        for token in tokenize(text) {
            self.tokens.entry(token).or_default().insert(id);
        }
    }

    pub fn remove_text(&mut self, text: &str, id: u32) {
        for token in tokenize(text) {
            if let Some(bitmap) = self.tokens.get_mut(&token) {
                bitmap.remove(id);
                if bitmap.is_empty() {
                    self.tokens.remove(&token);
                }
            }
        }
    }

    /// Record ids matching every token of the query.
    pub fn query_all(&self, query: &str) -> RoaringBitmap {
        let tokens = tokenize(query);
        if tokens.is_empty() {
            return RoaringBitmap::new();
        }
        let mut out: Option<RoaringBitmap> = None;
        for token in &tokens {
            let Some(bitmap) = self.tokens.get(token) else {
                return RoaringBitmap::new();
            };
            out = Some(match out {
                None => bitmap.clone(),
                Some(mut acc) => {
                    acc &= bitmap;
                    acc
                }
            });
        }
        out.unwrap_or_default()
    }
}

pub(crate) fn tokenize(text: &str) -> Vec<String> {
    let mut tokens: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut prev_was_lower = false;

    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            if c.is_ascii_uppercase() && prev_was_lower && !current.is_empty() {
                push_token_if_interesting(&mut tokens, &mut current);
            }
            let lc = c.to_ascii_lowercase();
            if current.len() < 64 {
                current.push(lc);
            }
            prev_was_lower = lc.is_ascii_lowercase();
            continue;
        }
        if !current.is_empty() {
            push_token_if_interesting(&mut tokens, &mut current);
        }
        prev_was_lower = false;
    }

    if !current.is_empty() {
        push_token_if_interesting(&mut tokens, &mut current);
    }

    tokens
}

fn push_token_if_interesting(tokens: &mut Vec<String>, current: &mut String) {
    const MIN_TOKEN_LEN: usize = 2;
    const STOPWORDS: &[&str] = &[
        "a", "an", "and", "as", "at", "by", "for", "in", "is", "of", "on", "or", "the", "to",
        "with",
    ];

    if current.len() >= MIN_TOKEN_LEN && !STOPWORDS.contains(&current.as_str()) {
        tokens.push(std::mem::take(current));
    } else {
        current.clear();
    }
}
