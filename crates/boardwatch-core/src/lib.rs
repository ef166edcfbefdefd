pub mod error;
pub mod extract;
pub mod models;
pub mod reconcile;
pub mod run;
pub mod traits;
pub mod walk;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use error::AppError;
pub use extract::{ListingExtractor, ListingLayout};
pub use models::{Candidate, Listing};
pub use run::{CrawlFailurePolicy, RunConfig, RunReport, RunService};
pub use traits::{Fetcher, ListingRun, ListingStore, Notifier, NullNotifier};
