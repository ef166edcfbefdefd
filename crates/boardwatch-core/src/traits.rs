use std::future::Future;

use crate::error::AppError;
use crate::models::{Candidate, Listing};

/// Fetches raw HTML content from a URL.
pub trait Fetcher: Send + Sync + Clone {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<String, AppError>> + Send;
}

/// Fire-and-forget sink for "new listing" messages.
pub trait Notifier: Send + Sync + Clone {
    fn notify(&self, message: &str) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// A persistent listing catalog.
///
/// All writes of a run go through one [`ListingRun`], so the fenced
/// intermediate state is never visible outside the store.
pub trait ListingStore: Send + Sync + Clone {
    type Run: ListingRun;

    /// Open a run-scoped write session.
    fn begin_run(&self) -> impl Future<Output = Result<Self::Run, AppError>> + Send;
}

/// Write session for one run. Nothing is visible to other readers until [`commit`].
///
/// Each per-listing write is atomic on its own: a failed `insert` or `update`
/// leaves the session usable for the next listing.
///
/// [`commit`]: ListingRun::commit
pub trait ListingRun: Send {
    /// Set `removed = true` on every row. Returns the number of rows touched.
    fn mark_all_removed(&mut self) -> impl Future<Output = Result<u64, AppError>> + Send;

    fn find_by_external_id(
        &mut self,
        external_id: i64,
    ) -> impl Future<Output = Result<Option<Listing>, AppError>> + Send;

    /// Insert a new row and return its surrogate id.
    ///
    /// Fails with [`AppError::ConstraintViolation`] if the external id already exists.
    fn insert(
        &mut self,
        candidate: &Candidate,
    ) -> impl Future<Output = Result<i64, AppError>> + Send;

    /// Overwrite all mutable fields of the row with this external id and set
    /// `removed` explicitly. Returns the surrogate id of the updated row.
    fn update(
        &mut self,
        candidate: &Candidate,
        removed: bool,
    ) -> impl Future<Output = Result<i64, AppError>> + Send;

    /// Number of rows currently marked removed within this session.
    fn count_removed(&mut self) -> impl Future<Output = Result<u64, AppError>> + Send;

    fn commit(self) -> impl Future<Output = Result<(), AppError>> + Send;

    fn rollback(self) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// A no-op Notifier for use when no messenger is configured.
#[derive(Debug, Clone)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    async fn notify(&self, message: &str) -> Result<(), AppError> {
        tracing::debug!(%message, "Notification dropped (no sink configured)");
        Ok(())
    }
}
