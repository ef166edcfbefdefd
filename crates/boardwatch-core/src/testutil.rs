//! Test utilities: mock implementations of all core traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::Utc;

use crate::error::AppError;
use crate::models::{Candidate, Listing};
use crate::traits::{Fetcher, ListingRun, ListingStore, Notifier};

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

/// Mock fetcher serving pages keyed by URL.
///
/// Unknown URLs answer with an HTTP 404 error. Scripted errors fire once.
#[derive(Clone, Default)]
pub struct MockFetcher {
    pages: Arc<Mutex<HashMap<String, String>>>,
    errors: Arc<Mutex<HashMap<String, AppError>>>,
    requested: Arc<Mutex<Vec<String>>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(self, url: &str, html: &str) -> Self {
        self.pages
            .lock()
            .unwrap()
            .insert(url.to_string(), html.to_string());
        self
    }

    pub fn error(self, url: &str, error: AppError) -> Self {
        self.errors.lock().unwrap().insert(url.to_string(), error);
        self
    }

    /// URLs fetched so far, in order.
    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }
}

impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<String, AppError> {
        self.requested.lock().unwrap().push(url.to_string());

        if let Some(e) = self.errors.lock().unwrap().remove(url) {
            return Err(e);
        }
        self.pages
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| AppError::HttpError(format!("HTTP 404 for {url}")))
    }
}

// ---------------------------------------------------------------------------
// MockNotifier
// ---------------------------------------------------------------------------

/// Mock notifier that records every message it is asked to deliver.
#[derive(Clone, Default)]
pub struct MockNotifier {
    pub messages: Arc<Mutex<Vec<String>>>,
    fail: bool,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records messages but reports every delivery as failed.
    pub fn failing() -> Self {
        Self {
            messages: Arc::new(Mutex::new(Vec::new())),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

impl Notifier for MockNotifier {
    async fn notify(&self, message: &str) -> Result<(), AppError> {
        self.messages.lock().unwrap().push(message.to_string());
        if self.fail {
            return Err(AppError::NotificationError("HTTP 500 from messenger".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct StoreState {
    /// Rows keyed by external id.
    rows: BTreeMap<i64, Listing>,
    next_id: i64,
    fail_begin: bool,
    fail_fence: bool,
    fail_commit: bool,
    fail_insert: HashSet<i64>,
    fail_update: HashSet<i64>,
    /// External ids that lookups pretend not to see.
    hidden: HashSet<i64>,
    commits: usize,
    rollbacks: usize,
}

/// In-memory catalog. Each run works on a snapshot that replaces the
/// catalog on commit and is discarded on rollback.
#[derive(Clone)]
pub struct MockStore {
    state: Arc<Mutex<StoreState>>,
}

impl MockStore {
    pub fn empty() -> Self {
        Self {
            state: Arc::new(Mutex::new(StoreState {
                next_id: 1,
                ..StoreState::default()
            })),
        }
    }

    /// Catalog pre-filled with active (not removed) listings.
    pub fn with_listings(candidates: Vec<Candidate>) -> Self {
        let store = Self::empty();
        {
            let mut state = store.state.lock().unwrap();
            for c in candidates {
                let id = state.next_id;
                state.next_id += 1;
                state.rows.insert(c.external_id, listing_from(id, &c));
            }
        }
        store
    }

    pub fn failing_begin(self) -> Self {
        self.state.lock().unwrap().fail_begin = true;
        self
    }

    pub fn failing_fence(self) -> Self {
        self.state.lock().unwrap().fail_fence = true;
        self
    }

    pub fn failing_commit(self) -> Self {
        self.state.lock().unwrap().fail_commit = true;
        self
    }

    pub fn failing_insert(self, external_id: i64) -> Self {
        self.state.lock().unwrap().fail_insert.insert(external_id);
        self
    }

    pub fn failing_update(self, external_id: i64) -> Self {
        self.state.lock().unwrap().fail_update.insert(external_id);
        self
    }

    pub fn hiding_on_lookup(self, external_id: i64) -> Self {
        self.state.lock().unwrap().hidden.insert(external_id);
        self
    }

    pub fn get(&self, external_id: i64) -> Option<Listing> {
        self.state.lock().unwrap().rows.get(&external_id).cloned()
    }

    /// All rows ordered by external id.
    pub fn all(&self) -> Vec<Listing> {
        self.state.lock().unwrap().rows.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn commits(&self) -> usize {
        self.state.lock().unwrap().commits
    }

    pub fn rollbacks(&self) -> usize {
        self.state.lock().unwrap().rollbacks
    }
}

impl ListingStore for MockStore {
    type Run = MockRun;

    async fn begin_run(&self) -> Result<MockRun, AppError> {
        let state = self.state.lock().unwrap();
        if state.fail_begin {
            return Err(AppError::DatabaseError("connection refused".into()));
        }
        Ok(MockRun {
            state: Arc::clone(&self.state),
            rows: state.rows.clone(),
            next_id: state.next_id,
        })
    }
}

/// Snapshot session handed out by [`MockStore`].
pub struct MockRun {
    state: Arc<Mutex<StoreState>>,
    rows: BTreeMap<i64, Listing>,
    next_id: i64,
}

impl ListingRun for MockRun {
    async fn mark_all_removed(&mut self) -> Result<u64, AppError> {
        if self.state.lock().unwrap().fail_fence {
            return Err(AppError::DatabaseError("lock timeout".into()));
        }
        for row in self.rows.values_mut() {
            row.removed = true;
        }
        Ok(self.rows.len() as u64)
    }

    async fn find_by_external_id(&mut self, external_id: i64) -> Result<Option<Listing>, AppError> {
        if self.state.lock().unwrap().hidden.contains(&external_id) {
            return Ok(None);
        }
        Ok(self.rows.get(&external_id).cloned())
    }

    async fn insert(&mut self, candidate: &Candidate) -> Result<i64, AppError> {
        if self
            .state
            .lock()
            .unwrap()
            .fail_insert
            .contains(&candidate.external_id)
        {
            return Err(AppError::DatabaseError("value too long".into()));
        }
        if self.rows.contains_key(&candidate.external_id) {
            return Err(AppError::ConstraintViolation(format!(
                "external_id {} already exists",
                candidate.external_id
            )));
        }
        let id = self.next_id;
        self.next_id += 1;
        self.rows
            .insert(candidate.external_id, listing_from(id, candidate));
        Ok(id)
    }

    async fn update(&mut self, candidate: &Candidate, removed: bool) -> Result<i64, AppError> {
        if self
            .state
            .lock()
            .unwrap()
            .fail_update
            .contains(&candidate.external_id)
        {
            return Err(AppError::DatabaseError("deadlock detected".into()));
        }
        let row = self.rows.get_mut(&candidate.external_id).ok_or_else(|| {
            AppError::NotFound(format!("listing {}", candidate.external_id))
        })?;

        row.title = candidate.title.clone();
        row.price = candidate.price;
        row.volume = candidate.volume;
        row.length = candidate.length;
        row.weight = candidate.weight;
        row.description = candidate.description.clone();
        row.link = candidate.link.clone();
        row.removed = removed;
        row.last_seen_at = Utc::now();
        Ok(row.id)
    }

    async fn count_removed(&mut self) -> Result<u64, AppError> {
        Ok(self.rows.values().filter(|r| r.removed).count() as u64)
    }

    async fn commit(self) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_commit {
            return Err(AppError::DatabaseError("connection reset".into()));
        }
        state.rows = self.rows;
        state.next_id = self.next_id;
        state.commits += 1;
        Ok(())
    }

    async fn rollback(self) -> Result<(), AppError> {
        self.state.lock().unwrap().rollbacks += 1;
        Ok(())
    }
}

fn listing_from(id: i64, c: &Candidate) -> Listing {
    let now = Utc::now();
    Listing {
        id,
        external_id: c.external_id,
        title: c.title.clone(),
        price: c.price,
        volume: c.volume,
        length: c.length,
        weight: c.weight,
        description: c.description.clone(),
        link: c.link.clone(),
        removed: false,
        first_seen_at: now,
        last_seen_at: now,
    }
}

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

/// Create a minimal candidate for testing.
pub fn candidate(external_id: i64, title: &str) -> Candidate {
    Candidate {
        external_id,
        title: title.to_string(),
        price: None,
        volume: None,
        length: None,
        weight: None,
        description: String::new(),
        link: format!("https://www.slosurf.com/ads/board-{external_id}/"),
    }
}

/// One listing fragment in the source site's markup.
pub fn listing_html(external_id: i64, title: &str, price: &str) -> String {
    format!(
        r#"<article data-id="{external_id}">
  <h2 class="h4 entry-title"><a href="https://www.slosurf.com/ads/board-{external_id}/" title="{title}">{title}</a></h2>
  <div class="price-wrap"><span class="tag-head"><span class="post-price">{price}</span></span></div>
  <div class="entry-content subheader"></div>
</article>"#
    )
}

/// An index page holding the given fragments and an optional next-page link.
pub fn index_page(listings: &[String], next: Option<&str>) -> String {
    let next = next
        .map(|href| format!(r#"<a class="next page-numbers" href="{href}">Next</a>"#))
        .unwrap_or_default();
    format!(
        "<html><body><main>{}</main><nav>{next}</nav></body></html>",
        listings.join("\n")
    )
}
