use std::future::Future;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::AppError;
use crate::extract::ListingExtractor;
use crate::reconcile::{ReconcileStats, Reconciled, Reconciler};
use crate::traits::{Fetcher, ListingStore, Notifier};
use crate::walk::{DEFAULT_MAX_PAGES, PageWalker};

/// What to do with a fenced catalog when the crawl fails part-way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CrawlFailurePolicy {
    /// Undo the fence and every write; the catalog stays as before the run.
    #[default]
    Rollback,
    /// Commit what was reconciled. Listings on pages never reached look removed.
    CommitPartial,
}

/// Per-run settings.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub start_url: String,
    pub max_pages: usize,
    pub on_crawl_failure: CrawlFailurePolicy,
}

impl RunConfig {
    pub fn new(start_url: impl Into<String>) -> Self {
        Self {
            start_url: start_url.into(),
            max_pages: DEFAULT_MAX_PAGES,
            on_crawl_failure: CrawlFailurePolicy::default(),
        }
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages;
        self
    }

    pub fn with_policy(mut self, policy: CrawlFailurePolicy) -> Self {
        self.on_crawl_failure = policy;
        self
    }
}

/// Summary of a committed run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub pages: usize,
    pub candidates: usize,
    pub skipped: usize,
    pub stats: ReconcileStats,
    /// Listings marked removed after the run.
    pub removed: Option<u64>,
    pub notified: usize,
    pub notification_failures: usize,
}

#[derive(Default)]
struct CrawlTally {
    pages: usize,
    candidates: usize,
    skipped: usize,
}

/// Orchestrates one run: fence → walk every page → reconcile each candidate → close.
///
/// The site, the catalog and the messenger all sit behind traits; tests drive
/// it with the mocks in `testutil`.
pub struct RunService<F, S, N>
where
    F: Fetcher,
    S: ListingStore,
    N: Notifier,
{
    fetcher: F,
    store: S,
    notifier: N,
    extractor: ListingExtractor,
    config: RunConfig,
}

impl<F, S, N> RunService<F, S, N>
where
    F: Fetcher,
    S: ListingStore,
    N: Notifier,
{
    pub fn new(
        fetcher: F,
        store: S,
        notifier: N,
        extractor: ListingExtractor,
        config: RunConfig,
    ) -> Self {
        Self {
            fetcher,
            store,
            notifier,
            extractor,
            config,
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Execute one full run.
    ///
    /// Only a fence failure or a crawl failure (fetch, parse, page limit,
    /// cancellation) returns an error; what happens to the catalog on a crawl
    /// failure depends on [`RunConfig::on_crawl_failure`]. New-listing
    /// notifications go out only after the run is committed.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<RunReport, AppError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        tracing::info!(%run_id, start_url = %self.config.start_url, "Run started");

        let mut walker = PageWalker::new(
            &self.fetcher,
            &self.extractor,
            &self.config.start_url,
            self.config.max_pages,
        )?;

        // 1. Fence
        let session = cancellable(cancel, self.store.begin_run())
            .await
            .map_err(|e| match e {
                AppError::Cancelled => e,
                other => AppError::FenceError(other.to_string()),
            })?;
        let mut reconciler = cancellable(cancel, Reconciler::fence(session)).await?;

        // 2. Walk + reconcile, strictly one listing at a time
        let mut tally = CrawlTally::default();
        let crawl_error = 'crawl: loop {
            let page = match cancellable(cancel, walker.next_page()).await {
                Ok(Some(page)) => page,
                Ok(None) => break None,
                Err(e) => break Some(e),
            };
            tally.pages += 1;
            tally.candidates += page.candidates.len();
            tally.skipped += page.skipped;

            for candidate in &page.candidates {
                let cancelled = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => true,
                    _ = reconciler.reconcile(candidate) => false,
                };
                if cancelled {
                    break 'crawl Some(AppError::Cancelled);
                }
            }
        };

        // 3. Close
        let Some(error) = crawl_error else {
            let reconciled = reconciler.close().await?;
            return Ok(self.finish(run_id, started_at, tally, reconciled).await);
        };

        tracing::error!(
            %run_id,
            %error,
            pages = tally.pages,
            reconciled = reconciler.stats().inserted
                + reconciler.stats().changed
                + reconciler.stats().unchanged,
            policy = ?self.config.on_crawl_failure,
            "Crawl failed"
        );
        match self.config.on_crawl_failure {
            CrawlFailurePolicy::Rollback => {
                if let Err(e) = reconciler.abort().await {
                    tracing::warn!(%run_id, error = %e, "Rollback failed");
                }
            }
            CrawlFailurePolicy::CommitPartial => match reconciler.close().await {
                Ok(reconciled) => {
                    self.finish(run_id, started_at, tally, reconciled).await;
                }
                Err(e) => tracing::warn!(%run_id, error = %e, "Partial commit failed"),
            },
        }
        Err(error)
    }

    async fn finish(
        &self,
        run_id: Uuid,
        started_at: DateTime<Utc>,
        tally: CrawlTally,
        reconciled: Reconciled,
    ) -> RunReport {
        let mut notified = 0;
        let mut notification_failures = 0;
        for candidate in reconciled.inserted() {
            match self.notifier.notify(&candidate.announcement()).await {
                Ok(()) => notified += 1,
                Err(e) => {
                    notification_failures += 1;
                    tracing::warn!(
                        external_id = candidate.external_id,
                        error = %e,
                        "Notification failed"
                    );
                }
            }
        }

        let report = RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            pages: tally.pages,
            candidates: tally.candidates,
            skipped: tally.skipped,
            stats: reconciled.stats,
            removed: reconciled.removed,
            notified,
            notification_failures,
        };
        tracing::info!(
            %run_id,
            pages = report.pages,
            candidates = report.candidates,
            inserted = report.stats.inserted,
            removed = ?report.removed,
            "Run finished"
        );
        report
    }
}

/// Race a fallible future against cancellation.
async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T, AppError>>,
) -> Result<T, AppError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AppError::Cancelled),
        result = fut => result,
    }
}
