//! Drives the search-results feed until no further distinct results appear.

use crate::config::Config;
use crate::driver::{PageDriver, string_list};
use crate::error::{AppError, Result};
use crate::models::CandidateRef;
use crate::selectors::{FEED_ITEMS, SelectorStrategy};
use std::collections::HashSet;
use std::time::Duration;

/// Scrolls the feed container to its end, or the window when the page has no feed container.
pub(crate) const SCROLL_FEED_SCRIPT: &str = r#"(function() {
    var panel = document.querySelector('div[role="feed"]');
    if (panel) {
        panel.scrollTop = panel.scrollHeight;
        return true;
    }
    window.scrollBy(0, 1000);
    return false;
})()"#;

/// Only links to detail pages count as results.
const PLACE_PATH_MARKER: &str = "/maps/place/";

/// Bounds for one collection run.
#[derive(Debug, Clone)]
pub(crate) struct CollectorSettings {
    /// Result cap; zero means unlimited.
    pub max_results: usize,
    /// Hard cap on feed reads, whether or not the feed keeps growing.
    pub max_scroll_attempts: u32,
    /// Consecutive no-growth reads after which the feed counts as exhausted.
    pub stall_threshold: u32,
    pub scroll_pause: Duration,
}

impl From<&Config> for CollectorSettings {
    fn from(config: &Config) -> Self {
        Self {
            max_results: config.max_results_per_query,
            max_scroll_attempts: config.max_scroll_attempts,
            stall_threshold: config.stall_threshold,
            scroll_pause: config.scroll_pause,
        }
    }
}

/// Script counting the elements a feed strategy matches.
pub(crate) fn count_script(strategy: &SelectorStrategy) -> String {
    format!("{}.length", strategy.elements_js())
}

/// Script returning the detail-page links of the elements a feed strategy matches.
pub(crate) fn references_script(strategy: &SelectorStrategy) -> String {
    format!(
        "JSON.stringify({}.map(function(el) {{ return el.href || el.getAttribute('href') || ''; }}).filter(function(h) {{ return h.length > 0; }}))",
        strategy.elements_js()
    )
}

/// References seen so far in one collection run, in first-seen order.
#[derive(Debug, Default)]
pub(crate) struct FeedAccumulator {
    seen: HashSet<String>,
    ordered: Vec<CandidateRef>,
}

impl FeedAccumulator {
    /// Adds unseen detail-page references; returns how many were new.
    pub(crate) fn merge<I>(&mut self, hrefs: I) -> usize
    where
        I: IntoIterator<Item = String>,
    {
        let before = self.ordered.len();
        for href in hrefs {
            let href = href.trim();
            if !href.contains(PLACE_PATH_MARKER) {
                continue;
            }
            if self.seen.insert(href.to_string()) {
                self.ordered.push(CandidateRef::new(href));
            }
        }
        self.ordered.len() - before
    }

    pub(crate) fn len(&self) -> usize {
        self.ordered.len()
    }

    /// The collected references, truncated to `cap` in insertion order when `cap > 0`.
    pub(crate) fn into_candidates(mut self, cap: usize) -> Vec<CandidateRef> {
        if cap > 0 && self.ordered.len() > cap {
            self.ordered.truncate(cap);
        }
        self.ordered
    }
}

/// Picks the first feed strategy that matches anything on the page.
async fn pin_feed_strategy<D: PageDriver + ?Sized>(driver: &D) -> Option<SelectorStrategy> {
    for strategy in FEED_ITEMS {
        match driver.evaluate(&count_script(strategy)).await {
            Ok(value) if value.as_u64().unwrap_or(0) > 0 => {
                tracing::info!(target: "collect_task", "Using feed selector: {}", strategy);
                return Some(*strategy);
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(target: "collect_task", "Feed selector {} failed: {}", strategy, e);
            }
        }
    }
    None
}

/// Collects the deduplicated, order-stable detail-page references of the
/// currently open search page.
///
/// # Errors
/// * `AppError::NoResultsPanelFound` when no feed strategy matches the page.
pub(crate) async fn collect_candidates<D: PageDriver + ?Sized>(
    driver: &D,
    settings: &CollectorSettings,
    query_text: &str,
) -> Result<Vec<CandidateRef>> {
    let strategy = pin_feed_strategy(driver)
        .await
        .ok_or_else(|| AppError::NoResultsPanelFound(query_text.to_string()))?;
    let references = references_script(&strategy);

    let mut accumulator = FeedAccumulator::default();
    let mut stalled_reads = 0u32;
    let mut attempts = 0u32;

    while attempts < settings.max_scroll_attempts {
        match driver.evaluate(&references).await {
            Ok(value) => {
                let added = accumulator.merge(string_list(value));
                if added > 0 {
                    stalled_reads = 0;
                    tracing::info!(target: "collect_task", "Found {} results so far...", accumulator.len());
                } else {
                    stalled_reads += 1;
                    if stalled_reads >= settings.stall_threshold {
                        tracing::info!(
                            target: "collect_task",
                            "No more results found after {} scrolls", attempts
                        );
                        break;
                    }
                }
            }
            Err(e) => {
                tracing::warn!(target: "collect_task", "Error collecting result links: {}", e);
            }
        }

        if let Err(e) = driver.evaluate(SCROLL_FEED_SCRIPT).await {
            tracing::warn!(target: "collect_task", "Scroll error: {}", e);
        }
        attempts += 1;
        if !settings.scroll_pause.is_zero() {
            tokio::time::sleep(settings.scroll_pause).await;
        }
    }

    if attempts >= settings.max_scroll_attempts {
        tracing::info!(
            target: "collect_task",
            "Stopped after the maximum of {} scrolls", settings.max_scroll_attempts
        );
    }

    let candidates = accumulator.into_candidates(settings.max_results);
    tracing::info!(target: "collect_task", "Collected {} unique results", candidates.len());
    Ok(candidates)
}
