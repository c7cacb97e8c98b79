//! Core logic for running the lead extraction over every planned query.

use crate::collector::{CollectorSettings, collect_candidates};
use crate::config::Config;
use crate::driver::{PageDriver, SessionFactory, bounded, open_page};
use crate::enrichment::EnrichmentSettings;
use crate::error::{AppError, Result};
use crate::models::{CandidateRef, Lead, Query, RunSummary};
use crate::pacing::{Shutdown, delay};
use crate::processor::{CandidateOutcome, process_candidate};
use crate::selectors::{CONSENT_BUTTONS, click_first};
use crate::store::{LeadStore, spawn_writer};
use futures::future::join_all;
use indicatif::ProgressBar;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Leads buffered between the workers and the store writer.
const LEAD_CHANNEL_CAPACITY: usize = 64;

/// One query per configured location, in configuration order.
pub(crate) fn plan_queries(config: &Config) -> Result<Vec<Query>> {
    config
        .locations
        .iter()
        .map(|location| Query::new(&config.search_term, location))
        .collect()
}

/// Deals queries round-robin over at most `workers` shards.
fn shard(queries: Vec<Query>, workers: usize) -> Vec<Vec<Query>> {
    let workers = workers.max(1);
    let mut shards: Vec<Vec<Query>> = vec![Vec::new(); workers];
    for (i, query) in queries.into_iter().enumerate() {
        shards[i % workers].push(query);
    }
    shards.retain(|s| !s.is_empty());
    shards
}

#[derive(Debug, Default)]
struct WorkerStats {
    completed: usize,
    abandoned: usize,
    candidates_seen: usize,
    candidates_failed: usize,
}

/// Runs one shard of queries on its own browser session.
struct Worker {
    id: usize,
    config: Arc<Config>,
    collector: CollectorSettings,
    enrichment: EnrichmentSettings,
    leads: mpsc::Sender<Lead>,
    shutdown: Shutdown,
    progress: ProgressBar,
}

impl Worker {
    async fn run(self, sessions: Arc<dyn SessionFactory>, queries: Vec<Query>) -> Result<WorkerStats> {
        let mut stats = WorkerStats::default();
        let driver = match sessions.open_session().await {
            Ok(driver) => driver,
            Err(e) => {
                tracing::error!(target: "query_task",
                    "[Worker {}] Could not open a browser session, abandoning {} queries: {}",
                    self.id, queries.len(), e
                );
                stats.abandoned = queries.len();
                self.progress.inc(queries.len() as u64);
                return Ok(stats);
            }
        };
        let driver = driver.as_ref();

        let total = queries.len();
        for (idx, query) in queries.iter().enumerate() {
            if self.shutdown.is_triggered() {
                tracing::info!(target: "query_task",
                    "[Worker {}] Stop requested, not starting '{}'", self.id, query
                );
                break;
            }
            tracing::info!(target: "query_task",
                "[Worker {}] Query {}/{}: {}", self.id, idx + 1, total, query
            );
            self.progress.set_message(query.text());

            let finished = match self.search(driver, query).await {
                Ok(candidates) => {
                    let finished = self.process_all(driver, query, &candidates, &mut stats).await?;
                    if finished {
                        stats.completed += 1;
                    } else {
                        stats.abandoned += 1;
                    }
                    finished
                }
                Err(e) => {
                    tracing::warn!(target: "query_task",
                        "[Worker {}] Abandoning query '{}': {}", self.id, query, e
                    );
                    stats.abandoned += 1;
                    true
                }
            };
            self.progress.inc(1);

            if !finished {
                break;
            }
            if idx + 1 < total {
                let (min, max) = self.config.query_delay;
                if !delay(min, max, &self.shutdown).await {
                    break;
                }
            }
        }
        Ok(stats)
    }

    /// Opens the search page for `query` and collects its candidates.
    async fn search<D: PageDriver + ?Sized>(&self, driver: &D, query: &Query) -> Result<Vec<CandidateRef>> {
        let url = query.search_url();
        bounded(
            "search",
            &url,
            self.config.detail_timeout,
            open_page(driver, &url, self.config.page_settle),
        )
        .await?;
        if click_first(driver, CONSENT_BUTTONS).await.is_some() {
            tracing::debug!(target: "query_task", "Accepted consent dialog");
        }
        if !self.config.results_wait.is_zero() {
            tokio::time::sleep(self.config.results_wait).await;
        }
        // The dialog sometimes appears only once results render.
        click_first(driver, CONSENT_BUTTONS).await;

        collect_candidates(driver, &self.collector, &query.text()).await
    }

    /// Processes every candidate, pacing between them. Returns `false` when a
    /// stop request cut the query short.
    async fn process_all<D: PageDriver + ?Sized>(
        &self,
        driver: &D,
        query: &Query,
        candidates: &[CandidateRef],
        stats: &mut WorkerStats,
    ) -> Result<bool> {
        for (idx, candidate) in candidates.iter().enumerate() {
            stats.candidates_seen += 1;
            match process_candidate(driver, &self.enrichment, candidate, query, self.id).await {
                CandidateOutcome::Extracted(lead) => {
                    self.leads
                        .send(lead)
                        .await
                        .map_err(|_| AppError::Task("Lead writer stopped".to_string()))?;
                }
                CandidateOutcome::Failed { .. } => stats.candidates_failed += 1,
            }

            if idx + 1 < candidates.len() {
                let (min, max) = self.config.candidate_delay;
                if !delay(min, max, &self.shutdown).await {
                    tracing::info!(target: "query_task",
                        "[Worker {}] Stop requested after {}/{} candidates of '{}'",
                        self.id, idx + 1, candidates.len(), query
                    );
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }
}

/// Runs the configured queries against browser sessions from a factory.
pub(crate) struct LeadSleuth {
    config: Arc<Config>,
    sessions: Arc<dyn SessionFactory>,
}

impl LeadSleuth {
    pub(crate) fn new(config: Arc<Config>, sessions: Arc<dyn SessionFactory>) -> Self {
        Self { config, sessions }
    }

    /// Executes every planned query and stores the resulting leads.
    ///
    /// Queries are sharded over `concurrency` workers, each with its own
    /// session. All writes go through one writer task. A stop request is
    /// honoured at query boundaries.
    pub(crate) async fn run(
        &self,
        store: &LeadStore,
        shutdown: Shutdown,
        progress: ProgressBar,
    ) -> Result<RunSummary> {
        let queries = plan_queries(&self.config)?;
        let mut summary = RunSummary {
            queries_planned: queries.len(),
            ..RunSummary::default()
        };
        if queries.is_empty() {
            tracing::warn!("No queries to run");
            return Ok(summary);
        }
        if shutdown.is_triggered() {
            tracing::info!("Stop requested before the first query");
            return Ok(summary);
        }

        progress.set_length(queries.len() as u64);
        let (tx, rx) = mpsc::channel(LEAD_CHANNEL_CAPACITY);
        let writer = spawn_writer(store.clone(), rx);

        let shards = shard(queries, self.config.concurrency);
        tracing::info!(
            "Running {} queries for '{}' on {} worker(s)",
            summary.queries_planned,
            self.config.search_term,
            shards.len()
        );

        let handles: Vec<_> = shards
            .into_iter()
            .enumerate()
            .map(|(id, queries)| {
                let worker = Worker {
                    id,
                    config: Arc::clone(&self.config),
                    collector: CollectorSettings::from(self.config.as_ref()),
                    enrichment: EnrichmentSettings::from(self.config.as_ref()),
                    leads: tx.clone(),
                    shutdown: shutdown.clone(),
                    progress: progress.clone(),
                };
                tokio::spawn(worker.run(Arc::clone(&self.sessions), queries))
            })
            .collect();
        drop(tx);

        let mut first_error = None;
        for joined in join_all(handles).await {
            match joined {
                Ok(Ok(stats)) => {
                    summary.queries_completed += stats.completed;
                    summary.queries_abandoned += stats.abandoned;
                    summary.candidates_seen += stats.candidates_seen;
                    summary.candidates_failed += stats.candidates_failed;
                }
                Ok(Err(e)) => {
                    tracing::error!("Worker failed: {}", e);
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    tracing::error!("Worker task panicked or was cancelled: {}", e);
                    first_error.get_or_insert(AppError::Task(e.to_string()));
                }
            }
        }

        let written = writer
            .await
            .map_err(|e| AppError::Task(format!("Lead writer task failed: {}", e)))?;
        summary.leads_saved = written.saved;
        summary.duplicates_ignored = written.duplicates;
        summary.high_value_saved = written.high_value;
        if written.failed > 0 {
            tracing::warn!("{} leads could not be written", written.failed);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(summary),
        }
    }
}
