//! Catalog reconciliation for one run.
//!
//! A run moves through three phases in order:
//!
//! 1. **Fence**: every stored listing is marked removed ([`Reconciler::fence`]).
//! 2. **Reconcile**: each candidate is looked up by external id and either
//!    updated in place (`removed = false`) or inserted
//!    ([`Reconciler::reconcile`]). Failures are contained to that one listing.
//! 3. **Close**: nothing is swept. Rows never revisited keep `removed = true`
//!    from the fence. The session is committed ([`Reconciler::close`]) or
//!    rolled back ([`Reconciler::abort`]).
//!
//! Candidates are applied strictly one at a time in arrival order, so a
//! duplicated external id within a run resolves to the last candidate.

use serde::Serialize;

use crate::error::AppError;
use crate::models::Candidate;
use crate::traits::ListingRun;

/// Something the reconciler did that outside parties may care about.
///
/// The reconciler never delivers notifications itself; the orchestrator turns
/// `Inserted` events into messages after the run is committed.
#[derive(Debug, Clone, PartialEq)]
pub enum ListingEvent {
    Inserted { id: i64, candidate: Candidate },
    Changed { id: i64, external_id: i64 },
    Failed { external_id: i64, error: String },
}

/// What happened to a single candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Inserted,
    Changed,
    Unchanged,
    Failed,
}

/// Per-run counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileStats {
    /// Rows marked removed by the fence.
    pub fenced: u64,
    pub inserted: usize,
    pub changed: usize,
    pub unchanged: usize,
    pub failed: usize,
}

/// Result of a closed run.
#[derive(Debug, Clone)]
pub struct Reconciled {
    pub stats: ReconcileStats,
    pub events: Vec<ListingEvent>,
    /// Rows left marked removed at close; `None` if the count could not be read.
    pub removed: Option<u64>,
}

impl Reconciled {
    /// Candidates inserted during the run, in insertion order.
    pub fn inserted(&self) -> impl Iterator<Item = &Candidate> {
        self.events.iter().filter_map(|e| match e {
            ListingEvent::Inserted { candidate, .. } => Some(candidate),
            _ => None,
        })
    }
}

/// Applies candidates to a fenced [`ListingRun`].
pub struct Reconciler<R: ListingRun> {
    run: R,
    stats: ReconcileStats,
    events: Vec<ListingEvent>,
}

impl<R: ListingRun> Reconciler<R> {
    /// Fence the catalog. On failure the session is rolled back and the
    /// catalog is left as it was before the run.
    pub async fn fence(mut run: R) -> Result<Self, AppError> {
        match run.mark_all_removed().await {
            Ok(fenced) => {
                tracing::info!(%fenced, "Catalog fenced");
                Ok(Self {
                    run,
                    stats: ReconcileStats {
                        fenced,
                        ..ReconcileStats::default()
                    },
                    events: Vec::new(),
                })
            }
            Err(e) => {
                if let Err(rollback_err) = run.rollback().await {
                    tracing::warn!(error = %rollback_err, "Rollback after failed fence also failed");
                }
                Err(AppError::FenceError(e.to_string()))
            }
        }
    }

    pub fn stats(&self) -> &ReconcileStats {
        &self.stats
    }

    /// Apply one candidate. Never fails the run: persistence errors are
    /// logged, counted and recorded as [`ListingEvent::Failed`].
    pub async fn reconcile(&mut self, candidate: &Candidate) -> Outcome {
        let outcome = match self.apply(candidate).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(
                    external_id = candidate.external_id,
                    error = %e,
                    "Failed to reconcile listing, skipping"
                );
                self.events.push(ListingEvent::Failed {
                    external_id: candidate.external_id,
                    error: e.to_string(),
                });
                Outcome::Failed
            }
        };

        match outcome {
            Outcome::Inserted => self.stats.inserted += 1,
            Outcome::Changed => self.stats.changed += 1,
            Outcome::Unchanged => self.stats.unchanged += 1,
            Outcome::Failed => self.stats.failed += 1,
        }
        outcome
    }

    async fn apply(&mut self, candidate: &Candidate) -> Result<Outcome, AppError> {
        let external_id = candidate.external_id;

        if let Some(existing) = self.run.find_by_external_id(external_id).await? {
            let id = self.run.update(candidate, false).await?;
            if existing.matches(candidate) {
                tracing::debug!(%id, external_id, "Listing unchanged");
                return Ok(Outcome::Unchanged);
            }
            tracing::debug!(%id, external_id, "Listing updated");
            self.events.push(ListingEvent::Changed { id, external_id });
            return Ok(Outcome::Changed);
        }

        match self.run.insert(candidate).await {
            Ok(id) => {
                tracing::info!(%id, external_id, title = %candidate.title, "New listing");
                self.events.push(ListingEvent::Inserted {
                    id,
                    candidate: candidate.clone(),
                });
                Ok(Outcome::Inserted)
            }
            Err(AppError::ConstraintViolation(msg)) => {
                // Lookup said absent but the key exists: treat as an update.
                tracing::warn!(external_id, %msg, "Insert collided, updating instead");
                let id = self.run.update(candidate, false).await?;
                self.events.push(ListingEvent::Changed { id, external_id });
                Ok(Outcome::Changed)
            }
            Err(e) => Err(e),
        }
    }

    /// Commit the run. Rows still fenced stay removed.
    pub async fn close(mut self) -> Result<Reconciled, AppError> {
        let removed = match self.run.count_removed().await {
            Ok(n) => Some(n),
            Err(e) => {
                tracing::warn!(error = %e, "Could not count removed listings");
                None
            }
        };

        self.run.commit().await?;
        tracing::info!(
            inserted = self.stats.inserted,
            changed = self.stats.changed,
            unchanged = self.stats.unchanged,
            failed = self.stats.failed,
            ?removed,
            "Run committed"
        );

        Ok(Reconciled {
            stats: self.stats,
            events: self.events,
            removed,
        })
    }

    /// Roll back the fence and every write of this run.
    pub async fn abort(self) -> Result<ReconcileStats, AppError> {
        self.run.rollback().await?;
        tracing::warn!("Run rolled back, catalog unchanged");
        Ok(self.stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::*;
    use crate::traits::ListingStore;

    #[tokio::test]
    async fn test_inserts_unseen_and_updates_seen() {
        let store = MockStore::with_listings(vec![candidate(1, "Old board")]);
        let mut rec = Reconciler::fence(store.begin_run().await.unwrap())
            .await
            .unwrap();

        assert_eq!(rec.reconcile(&candidate(1, "Old board")).await, Outcome::Unchanged);
        assert_eq!(rec.reconcile(&candidate(2, "New board")).await, Outcome::Inserted);
        let done = rec.close().await.unwrap();

        assert_eq!(done.stats.fenced, 1);
        assert_eq!(done.stats.inserted, 1);
        assert_eq!(done.stats.unchanged, 1);
        assert_eq!(done.removed, Some(0));
        assert_eq!(
            done.inserted().map(|c| c.external_id).collect::<Vec<_>>(),
            vec![2]
        );
        assert!(!store.get(1).unwrap().removed);
        assert!(!store.get(2).unwrap().removed);
    }

    #[tokio::test]
    async fn test_unseen_listings_stay_removed() {
        let store = MockStore::with_listings(vec![candidate(1, "A"), candidate(2, "B")]);
        let mut rec = Reconciler::fence(store.begin_run().await.unwrap())
            .await
            .unwrap();
        rec.reconcile(&candidate(2, "B")).await;
        let done = rec.close().await.unwrap();

        assert_eq!(done.removed, Some(1));
        assert!(store.get(1).unwrap().removed);
        assert!(!store.get(2).unwrap().removed);
    }

    #[tokio::test]
    async fn test_update_overwrites_fields_and_keeps_identity() {
        let store = MockStore::with_listings(vec![candidate(1, "Board")]);
        let before = store.get(1).unwrap();

        let mut fresh = candidate(1, "Board, price drop");
        fresh.price = Some(80.0);
        fresh.volume = Some(30.0);

        let mut rec = Reconciler::fence(store.begin_run().await.unwrap())
            .await
            .unwrap();
        assert_eq!(rec.reconcile(&fresh).await, Outcome::Changed);
        rec.close().await.unwrap();

        let after = store.get(1).unwrap();
        assert_eq!(after.id, before.id);
        assert_eq!(after.first_seen_at, before.first_seen_at);
        assert!(after.matches(&fresh));
        assert!(!after.removed);
    }

    #[tokio::test]
    async fn test_duplicate_external_id_last_write_wins() {
        let store = MockStore::empty();
        let mut rec = Reconciler::fence(store.begin_run().await.unwrap())
            .await
            .unwrap();

        assert_eq!(rec.reconcile(&candidate(5, "First")).await, Outcome::Inserted);
        assert_eq!(rec.reconcile(&candidate(5, "Second")).await, Outcome::Changed);
        rec.close().await.unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.get(5).unwrap().title, "Second");
    }

    #[tokio::test]
    async fn test_per_listing_failure_is_contained() {
        let store = MockStore::empty().failing_insert(2);
        let mut rec = Reconciler::fence(store.begin_run().await.unwrap())
            .await
            .unwrap();

        assert_eq!(rec.reconcile(&candidate(1, "A")).await, Outcome::Inserted);
        assert_eq!(rec.reconcile(&candidate(2, "B")).await, Outcome::Failed);
        assert_eq!(rec.reconcile(&candidate(3, "C")).await, Outcome::Inserted);
        let done = rec.close().await.unwrap();

        assert_eq!(done.stats.failed, 1);
        assert!(done.events.iter().any(|e| matches!(
            e,
            ListingEvent::Failed { external_id: 2, .. }
        )));
        assert!(store.get(1).is_some());
        assert!(store.get(2).is_none());
        assert!(store.get(3).is_some());
    }

    #[tokio::test]
    async fn test_update_failure_leaves_row_fenced_and_continues() {
        let store = MockStore::with_listings(vec![candidate(1, "A"), candidate(2, "B")])
            .failing_update(1);
        let mut rec = Reconciler::fence(store.begin_run().await.unwrap())
            .await
            .unwrap();

        assert_eq!(rec.reconcile(&candidate(1, "A")).await, Outcome::Failed);
        assert_eq!(rec.reconcile(&candidate(2, "B2")).await, Outcome::Changed);
        let done = rec.close().await.unwrap();

        assert_eq!(done.stats.failed, 1);
        assert_eq!(done.stats.changed, 1);
        assert_eq!(done.removed, Some(1));
        assert!(done.events.iter().any(|e| matches!(
            e,
            ListingEvent::Failed { external_id: 1, .. }
        )));

        let failed = store.get(1).unwrap();
        assert_eq!(failed.title, "A");
        assert!(failed.removed);
        let applied = store.get(2).unwrap();
        assert_eq!(applied.title, "B2");
        assert!(!applied.removed);
    }

    #[tokio::test]
    async fn test_insert_collision_falls_back_to_update() {
        let store = MockStore::with_listings(vec![candidate(8, "Hidden")]).hiding_on_lookup(8);
        let mut rec = Reconciler::fence(store.begin_run().await.unwrap())
            .await
            .unwrap();

        assert_eq!(rec.reconcile(&candidate(8, "Visible")).await, Outcome::Changed);
        rec.close().await.unwrap();

        assert_eq!(store.len(), 1);
        let row = store.get(8).unwrap();
        assert_eq!(row.title, "Visible");
        assert!(!row.removed);
    }

    #[tokio::test]
    async fn test_fence_failure_leaves_catalog_untouched() {
        let store = MockStore::with_listings(vec![candidate(1, "A")]).failing_fence();
        let err = Reconciler::fence(store.begin_run().await.unwrap())
            .await
            .err()
            .unwrap();

        assert!(matches!(err, AppError::FenceError(_)));
        assert!(!store.get(1).unwrap().removed);
        assert_eq!(store.rollbacks(), 1);
    }

    #[tokio::test]
    async fn test_abort_restores_previous_state() {
        let store = MockStore::with_listings(vec![candidate(1, "A")]);
        let mut rec = Reconciler::fence(store.begin_run().await.unwrap())
            .await
            .unwrap();
        rec.reconcile(&candidate(2, "B")).await;
        let stats = rec.abort().await.unwrap();

        assert_eq!(stats.inserted, 1);
        assert!(!store.get(1).unwrap().removed);
        assert!(store.get(2).is_none());
    }
}
