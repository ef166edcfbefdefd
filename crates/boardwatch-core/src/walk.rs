//! Pagination over the listing index.
//!
//! The walk is pull-based: each [`PageWalker::next_page`] call fetches one
//! document, so a caller can stop early. A walker is not restartable; crawl
//! again with a new one.

use std::collections::HashSet;

use scraper::Html;
use url::Url;

use crate::error::AppError;
use crate::extract::{Extracted, ListingExtractor};
use crate::models::Candidate;
use crate::traits::Fetcher;

/// Default upper bound on pages visited in one walk.
pub const DEFAULT_MAX_PAGES: usize = 200;

/// One fetched index page.
#[derive(Debug, Clone)]
pub struct Page {
    pub url: String,
    /// Candidates in document order.
    pub candidates: Vec<Candidate>,
    /// Fragments that did not yield a candidate.
    pub skipped: usize,
}

/// Walks the "next page" chain starting at one URL.
pub struct PageWalker<'a, F: Fetcher> {
    fetcher: &'a F,
    extractor: &'a ListingExtractor,
    next: Option<Url>,
    visited: HashSet<Url>,
    max_pages: usize,
}

impl<'a, F: Fetcher> PageWalker<'a, F> {
    pub fn new(
        fetcher: &'a F,
        extractor: &'a ListingExtractor,
        start_url: &str,
        max_pages: usize,
    ) -> Result<Self, AppError> {
        let start = Url::parse(start_url)
            .map_err(|e| AppError::ParseError(format!("Invalid start URL '{start_url}': {e}")))?;

        Ok(Self {
            fetcher,
            extractor,
            next: Some(start),
            visited: HashSet::new(),
            max_pages,
        })
    }

    /// Number of pages fetched so far.
    pub fn pages_visited(&self) -> usize {
        self.visited.len()
    }

    /// Fetch and extract the next page. `Ok(None)` means pagination ended.
    ///
    /// A next-page link pointing at an already visited URL ends the walk. Going
    /// past `max_pages` is an error, since the remaining pages were never seen.
    pub async fn next_page(&mut self) -> Result<Option<Page>, AppError> {
        let Some(url) = self.next.take() else {
            return Ok(None);
        };

        if self.visited.contains(&url) {
            tracing::warn!(%url, "Next-page link points at a visited page, stopping");
            return Ok(None);
        }
        if self.visited.len() >= self.max_pages {
            return Err(AppError::PageLimitExceeded(self.max_pages));
        }
        self.visited.insert(url.clone());

        tracing::info!(%url, page = self.visited.len(), "Visiting");
        let html = self.fetcher.fetch(url.as_str()).await?;

        let (page, next) = parse_page(self.extractor, &html, &url)?;
        tracing::debug!(
            url = %page.url,
            candidates = page.candidates.len(),
            skipped = page.skipped,
            "Page extracted"
        );

        self.next = next;
        Ok(Some(page))
    }
}

/// Extract all candidates and the next-page URL from one document.
///
/// Listing links and the next-page link are resolved against `base`.
pub fn parse_page(
    extractor: &ListingExtractor,
    html: &str,
    base: &Url,
) -> Result<(Page, Option<Url>), AppError> {
    let document = Html::parse_document(html);

    let mut candidates = Vec::new();
    let mut skipped = 0;
    for fragment in extractor.fragments(&document) {
        match extractor.extract(fragment) {
            Extracted::Candidate(mut candidate) => {
                if !candidate.link.is_empty() {
                    if let Ok(absolute) = base.join(&candidate.link) {
                        candidate.link = absolute.into();
                    }
                }
                candidates.push(candidate);
            }
            Extracted::Skip(reason) => {
                tracing::debug!(%reason, "Skipping fragment");
                skipped += 1;
            }
        }
    }

    let next = extractor
        .next_page_href(&document)
        .map(|href| {
            base.join(&href).map(|mut u| {
                u.set_fragment(None);
                u
            })
        })
        .transpose()
        .map_err(|e| AppError::ParseError(format!("Invalid next-page link on {base}: {e}")))?;

    let page = Page {
        url: base.to_string(),
        candidates,
        skipped,
    };
    Ok((page, next))
}
