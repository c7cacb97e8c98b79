//! Defines the core data structures used in the lead-sleuth application.

use crate::domain::is_high_value_website;
use crate::error::{AppError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Name stored for a business whose heading could not be read.
pub(crate) const UNKNOWN_NAME: &str = "Unknown";

const MAPS_SEARCH_BASE: &str = "https://www.google.com/maps/search/";

/// A search term combined with one location. The unit of work fed to the collector.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub(crate) struct Query {
    term: String,
    location: String,
}

impl Query {
    /// Builds a query, rejecting blank terms or locations.
    pub(crate) fn new(term: &str, location: &str) -> Result<Self> {
        let term = term.trim();
        let location = location.trim();
        if term.is_empty() {
            return Err(AppError::InsufficientInput(
                "Search term is empty".to_string(),
            ));
        }
        if location.is_empty() {
            return Err(AppError::InsufficientInput("Location is empty".to_string()));
        }
        Ok(Self {
            term: term.to_string(),
            location: location.to_string(),
        })
    }

    /// The free-text query sent to the map search, e.g. "Plumber Athens".
    pub(crate) fn text(&self) -> String {
        format!("{} {}", self.term, self.location)
    }

    /// The map search page for this query.
    pub(crate) fn search_url(&self) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(self.text().as_bytes()).collect();
        format!("{}{}", MAPS_SEARCH_BASE, encoded)
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.term, self.location)
    }
}

/// Address of one business detail page found in the results feed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct CandidateRef(String);

impl CandidateRef {
    pub(crate) fn new(href: impl Into<String>) -> Self {
        Self(href.into())
    }

    pub(crate) fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CandidateRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The terminal record handed to the lead store.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub(crate) struct Lead {
    /// Business name; [`UNKNOWN_NAME`] when the heading was missing.
    pub name: String,
    pub address: String,
    /// Display-formatted phone number, empty when none was found.
    pub phone: String,
    /// Canonical website (redirect-unwrapped, no query or fragment), empty when none.
    pub website: String,
    /// Best email with original casing, empty when none.
    pub email: String,
    /// Star rating; zero means "unknown", never a real rating.
    pub rating: f64,
    /// Text of the query that produced this lead.
    pub query: String,
    /// When the lead was extracted.
    pub scraped_at: DateTime<Utc>,
}

impl Lead {
    /// True for businesses without a usable external website.
    pub(crate) fn is_high_value(&self) -> bool {
        is_high_value_website(&self.website)
    }
}

/// The page an email or phone number was read from, highest priority last.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub(crate) enum Source {
    DetailPage,
    Website,
    ContactPage,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Source::DetailPage => "detail",
            Source::Website => "website",
            Source::ContactPage => "contact",
        };
        f.write_str(label)
    }
}

/// Best email and phone found so far for one candidate, with provenance.
///
/// Sources are absorbed in priority order. A later source's email always
/// replaces the current one; a later source's phone only fills a gap.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ContactFindings {
    pub email: Option<(String, Source)>,
    pub phone: Option<(String, Source)>,
}

impl ContactFindings {
    /// Merges what one source yielded into the current findings.
    pub(crate) fn absorb(&mut self, source: Source, email: Option<String>, phone: Option<String>) {
        if let Some(email) = email {
            if let Some((previous, previous_source)) = &self.email {
                tracing::debug!(
                    "Email from {} ({}) replaces {} ({})",
                    source,
                    email,
                    previous_source,
                    previous
                );
            }
            self.email = Some((email, source));
        }
        if self.phone.is_none() {
            if let Some(phone) = phone {
                self.phone = Some((phone, source));
            }
        }
    }

    pub(crate) fn email(&self) -> &str {
        self.email.as_ref().map(|(e, _)| e.as_str()).unwrap_or("")
    }

    pub(crate) fn phone(&self) -> &str {
        self.phone.as_ref().map(|(p, _)| p.as_str()).unwrap_or("")
    }
}

/// Totals reported at the end of a run.
#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct RunSummary {
    pub queries_planned: usize,
    pub queries_completed: usize,
    pub queries_abandoned: usize,
    pub candidates_seen: usize,
    pub candidates_failed: usize,
    pub leads_saved: usize,
    pub duplicates_ignored: usize,
    pub high_value_saved: usize,
}
