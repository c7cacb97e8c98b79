//! Functions for processing individual candidates.

use crate::driver::PageDriver;
use crate::enrichment::{EnrichmentSettings, enrich_candidate};
use crate::models::{CandidateRef, Lead, Query};

/// What became of one candidate.
#[derive(Debug)]
pub(crate) enum CandidateOutcome {
    /// A lead ready for the store.
    Extracted(Lead),
    /// The detail page could not be read; nothing was extracted.
    Failed { reason: String },
}

/// Processes a single candidate into a lead.
///
/// # Arguments
/// * `driver` - The worker's browser session.
/// * `settings` - Timeouts and extraction thresholds.
/// * `candidate` - Detail-page reference from the results feed.
/// * `query` - The query the candidate was found for.
/// * `worker_id` - Used only to tag log lines.
///
/// # Returns
/// * `CandidateOutcome` - never an error; failures are logged and reported in the outcome.
pub(crate) async fn process_candidate<D: PageDriver + ?Sized>(
    driver: &D,
    settings: &EnrichmentSettings,
    candidate: &CandidateRef,
    query: &Query,
    worker_id: usize,
) -> CandidateOutcome {
    let task_id = format!("Worker: {} | Query: {}", worker_id, query);
    tracing::info!(target: "process_candidate_task", "[{}] Processing {}", task_id, candidate);

    match enrich_candidate(driver, settings, candidate, query).await {
        Ok(lead) => {
            tracing::info!(target: "process_candidate_task",
                "[{}] Extracted '{}' (email: '{}', phone: '{}', website: '{}')",
                task_id, lead.name, lead.email, lead.phone, lead.website
            );
            CandidateOutcome::Extracted(lead)
        }
        Err(e) => {
            let reason = format!("Could not read detail page {}: {}", candidate, e);
            tracing::error!(target: "process_candidate_task", "[{}] {}", task_id, reason);
            CandidateOutcome::Failed { reason }
        }
    }
}
