//! Per-link failure state
//!
//! A link is absent, counting failed attempts, or broken since a timestamp.
//! Broken links stay broken until reset. The transitions here are pure; the
//! tracker in `crate::sync::failures` persists them and raises alerts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

use crate::db::schemas::FailedLinkDoc;

/// State of one link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum FailureState {
    Counting { count: u32 },
    Broken { since: DateTime<Utc> },
}

impl FailureState {
    pub fn is_broken(&self) -> bool {
        matches!(self, Self::Broken { .. })
    }

    pub fn to_doc(&self, link: &str) -> FailedLinkDoc {
        match self {
            Self::Counting { count } => FailedLinkDoc::counting(link, *count),
            Self::Broken { since } => FailedLinkDoc::broken(link, since.to_rfc3339()),
        }
    }
}

/// Result of recording one failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The breaker is turned off (limit of zero)
    Disabled,
    /// Already broken; nothing changed
    AlreadyBroken { since: DateTime<Utc> },
    /// Still below the limit
    Counted { count: u32 },
    /// Reached the limit on this attempt
    Broke { since: DateTime<Utc> },
}

/// Failure state for every tracked link
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureBook {
    links: HashMap<String, FailureState>,
}

impl FailureBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from durable records. Records with neither a count nor a
    /// parseable timestamp are skipped.
    pub fn from_docs(docs: &[FailedLinkDoc]) -> Self {
        let mut links = HashMap::new();
        for doc in docs {
            let state = match (&doc.failed, doc.count) {
                (Some(failed), _) => match DateTime::parse_from_rfc3339(failed) {
                    Ok(since) => FailureState::Broken {
                        since: since.with_timezone(&Utc),
                    },
                    Err(e) => {
                        warn!("Skipping failure record for {} with bad timestamp: {}", doc.link, e);
                        continue;
                    }
                },
                (None, Some(count)) if count > 0 => FailureState::Counting { count },
                _ => continue,
            };
            links.insert(doc.link.clone(), state);
        }
        Self { links }
    }

    /// Record a failed attempt against `limit`
    pub fn increment(&mut self, link: &str, limit: u32, now: DateTime<Utc>) -> Transition {
        if limit == 0 {
            return Transition::Disabled;
        }

        let count = match self.links.get(link) {
            Some(FailureState::Broken { since }) => {
                return Transition::AlreadyBroken { since: *since };
            }
            Some(FailureState::Counting { count }) => count + 1,
            None => 1,
        };

        if count >= limit {
            self.links
                .insert(link.to_string(), FailureState::Broken { since: now });
            Transition::Broke { since: now }
        } else {
            self.links
                .insert(link.to_string(), FailureState::Counting { count });
            Transition::Counted { count }
        }
    }

    /// Mark broken immediately
    pub fn fail(&mut self, link: &str, now: DateTime<Utc>) {
        self.links
            .insert(link.to_string(), FailureState::Broken { since: now });
    }

    /// Put back a previously read state, or clear the link when `None`
    pub fn restore(&mut self, link: &str, state: Option<FailureState>) {
        match state {
            Some(state) => {
                self.links.insert(link.to_string(), state);
            }
            None => {
                self.links.remove(link);
            }
        }
    }

    /// Return the link to absent. Returns whether anything was cleared.
    pub fn reset(&mut self, link: &str) -> bool {
        self.links.remove(link).is_some()
    }

    pub fn get(&self, link: &str) -> Option<FailureState> {
        self.links.get(link).copied()
    }

    pub fn is_broken(&self, link: &str) -> bool {
        self.links.get(link).is_some_and(FailureState::is_broken)
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FailureState)> {
        self.links.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const LINK: &str = "https://example.com/feed";

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_breaks_exactly_at_limit() {
        let mut book = FailureBook::new();
        for n in 1..5 {
            assert_eq!(book.increment(LINK, 5, at(n)), Transition::Counted { count: n as u32 });
        }
        assert_eq!(book.increment(LINK, 5, at(5)), Transition::Broke { since: at(5) });
        assert!(book.is_broken(LINK));
    }

    #[test]
    fn test_broken_link_is_not_incremented() {
        let mut book = FailureBook::new();
        for n in 1..=5 {
            book.increment(LINK, 5, at(n));
        }

        let transition = book.increment(LINK, 5, at(100));
        assert_eq!(transition, Transition::AlreadyBroken { since: at(5) });
        assert_eq!(book.get(LINK), Some(FailureState::Broken { since: at(5) }));
    }

    #[test]
    fn test_zero_limit_disables() {
        let mut book = FailureBook::new();
        assert_eq!(book.increment(LINK, 0, at(1)), Transition::Disabled);
        assert!(book.is_empty());
    }

    #[test]
    fn test_reset_from_any_state() {
        let mut book = FailureBook::new();
        book.increment(LINK, 5, at(1));
        assert!(book.reset(LINK));
        assert_eq!(book.get(LINK), None);

        book.fail(LINK, at(2));
        assert!(book.reset(LINK));
        assert_eq!(book.get(LINK), None);

        assert!(!book.reset(LINK));
    }

    #[test]
    fn test_from_docs() {
        let docs = vec![
            FailedLinkDoc::counting("a", 3),
            FailedLinkDoc::broken("b", at(10).to_rfc3339()),
            FailedLinkDoc::broken("c", "not a date"),
            FailedLinkDoc::default(),
        ];

        let book = FailureBook::from_docs(&docs);
        assert_eq!(book.len(), 2);
        assert_eq!(book.get("a"), Some(FailureState::Counting { count: 3 }));
        assert_eq!(book.get("b"), Some(FailureState::Broken { since: at(10) }));
    }

    #[test]
    fn test_state_serializes_tagged() {
        let json = serde_json::to_string(&FailureState::Counting { count: 2 }).unwrap();
        assert_eq!(json, r#"{"state":"counting","count":2}"#);
    }
}
