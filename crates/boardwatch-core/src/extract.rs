//! Field extraction from one listing fragment.
//!
//! Only the external id and the title are required. Every other field is
//! best-effort: a missing element or unparseable value leaves that one field
//! empty and the candidate still goes through.

use std::fmt;

use scraper::{ElementRef, Html, Selector};

use crate::error::AppError;
use crate::models::Candidate;

/// CSS selectors and markers describing where fields live in the listing index.
///
/// The defaults match the surfboard board this crate was written for.
#[derive(Debug, Clone)]
pub struct ListingLayout {
    /// Every listing fragment on an index page.
    pub fragment: String,
    /// Fragment attribute holding the numeric external id.
    pub id_attr: String,
    /// Anchor carrying the title (`title` attr) and link (`href` attr).
    pub anchor: String,
    pub price: String,
    /// Key/value spans: a span with a marker class is followed by its value.
    pub attribute_spans: String,
    pub volume_marker: String,
    pub length_marker: String,
    pub weight_marker: String,
    pub description: String,
    pub next_page: String,
    /// Titles containing any of these (case-insensitive) are "wanted" ads, not offers.
    pub excluded_tokens: Vec<String>,
}

impl Default for ListingLayout {
    fn default() -> Self {
        Self {
            fragment: "body article".into(),
            id_attr: "data-id".into(),
            anchor: "h2.h4.entry-title a".into(),
            price: "div.price-wrap span.tag-head span.post-price".into(),
            attribute_spans: "div.entry-content.subheader span".into(),
            volume_marker: "cfd_volume".into(),
            length_marker: "cfd_size".into(),
            weight_marker: "cfd_weight".into(),
            description: "div.entry-content.subheader".into(),
            next_page: "a.next.page-numbers".into(),
            excluded_tokens: vec!["kupim".into()],
        }
    }
}

/// Why a fragment did not yield a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No parseable external id (ad slots, separators).
    MissingId,
    EmptyTitle { external_id: i64 },
    Wanted { external_id: i64 },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::MissingId => write!(f, "missing external id"),
            SkipReason::EmptyTitle { external_id } => write!(f, "empty title (id {external_id})"),
            SkipReason::Wanted { external_id } => write!(f, "wanted ad (id {external_id})"),
        }
    }
}

/// Result of extracting a single fragment.
#[derive(Debug, Clone, PartialEq)]
pub enum Extracted {
    Candidate(Candidate),
    Skip(SkipReason),
}

/// Compiled form of a [`ListingLayout`].
#[derive(Debug, Clone)]
pub struct ListingExtractor {
    fragment: Selector,
    id_attr: String,
    anchor: Selector,
    price: Selector,
    attribute_spans: Selector,
    volume_marker: String,
    length_marker: String,
    weight_marker: String,
    description: Selector,
    next_page: Selector,
    excluded_tokens: Vec<String>,
}

impl ListingExtractor {
    pub fn new(layout: &ListingLayout) -> Result<Self, AppError> {
        Ok(Self {
            fragment: compile(&layout.fragment)?,
            id_attr: layout.id_attr.clone(),
            anchor: compile(&layout.anchor)?,
            price: compile(&layout.price)?,
            attribute_spans: compile(&layout.attribute_spans)?,
            volume_marker: layout.volume_marker.clone(),
            length_marker: layout.length_marker.clone(),
            weight_marker: layout.weight_marker.clone(),
            description: compile(&layout.description)?,
            next_page: compile(&layout.next_page)?,
            excluded_tokens: layout
                .excluded_tokens
                .iter()
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
        })
    }

    /// Listing fragments of a document, in document order.
    pub fn fragments<'a>(&'a self, document: &'a Html) -> impl Iterator<Item = ElementRef<'a>> + 'a {
        document.select(&self.fragment)
    }

    /// The raw `href` of the next-page link, if there is a non-empty one.
    pub fn next_page_href(&self, document: &Html) -> Option<String> {
        document
            .select(&self.next_page)
            .next()
            .and_then(|a| a.value().attr("href"))
            .map(str::trim)
            .filter(|href| !href.is_empty())
            .map(str::to_string)
    }

    /// Turn one fragment into a candidate, or say why it was skipped.
    pub fn extract(&self, fragment: ElementRef<'_>) -> Extracted {
        let Some(external_id) = fragment
            .value()
            .attr(&self.id_attr)
            .and_then(|raw| raw.trim().parse::<i64>().ok())
        else {
            return Extracted::Skip(SkipReason::MissingId);
        };

        let anchor = fragment.select(&self.anchor).next();
        let title = anchor
            .and_then(|a| a.value().attr("title"))
            .map(str::trim)
            .unwrap_or_default();
        if title.is_empty() {
            return Extracted::Skip(SkipReason::EmptyTitle { external_id });
        }
        if self.is_wanted(title) {
            return Extracted::Skip(SkipReason::Wanted { external_id });
        }

        let link = anchor
            .and_then(|a| a.value().attr("href"))
            .map(str::trim)
            .unwrap_or_default()
            .to_string();

        let price = fragment
            .select(&self.price)
            .next()
            .and_then(|el| parse_price(&element_text(el)));

        let (volume, length, weight) = self.measurements(fragment);

        let description = fragment
            .select(&self.description)
            .next()
            .map(element_text)
            .unwrap_or_default();

        Extracted::Candidate(Candidate {
            external_id,
            title: title.to_string(),
            price,
            volume,
            length,
            weight,
            description,
            link,
        })
    }

    fn is_wanted(&self, title: &str) -> bool {
        let lowered = title.to_lowercase();
        self.excluded_tokens.iter().any(|t| lowered.contains(t.as_str()))
    }

    /// Volume, length and weight. A marker span's value is the text of the
    /// next sibling element.
    fn measurements(&self, fragment: ElementRef<'_>) -> (Option<f64>, Option<f64>, Option<f64>) {
        let (mut volume, mut length, mut weight) = (None, None, None);

        for span in fragment.select(&self.attribute_spans) {
            let slot = if has_class(span, &self.volume_marker) {
                &mut volume
            } else if has_class(span, &self.length_marker) {
                &mut length
            } else if has_class(span, &self.weight_marker) {
                &mut weight
            } else {
                continue;
            };

            let value = span
                .next_siblings()
                .find_map(ElementRef::wrap)
                .and_then(|sibling| parse_measure(&element_text(sibling)));
            if value.is_some() {
                *slot = value;
            }
        }

        (volume, length, weight)
    }
}

fn compile(selector: &str) -> Result<Selector, AppError> {
    Selector::parse(selector)
        .map_err(|e| AppError::ParseError(format!("Invalid selector '{selector}': {e:?}")))
}

fn has_class(element: ElementRef<'_>, class: &str) -> bool {
    element.value().classes().any(|c| c == class)
}

fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

/// Parse a European-formatted price such as `"1.234,56€"` or `"1 234,56 €"`.
///
/// Dots, and spaces between digits, are thousands separators; a comma is the
/// decimal point. Text holding more than one number (`"2x 150,00€"`) is
/// ambiguous and yields `None`.
pub fn parse_price(text: &str) -> Option<f64> {
    let chars: Vec<char> = text.chars().collect();
    let mut runs: Vec<String> = Vec::new();
    let mut current = String::new();

    for (i, &c) in chars.iter().enumerate() {
        let in_run = !current.is_empty();
        let grouping_space = matches!(c, ' ' | '\u{a0}')
            && current.ends_with(|p: char| p.is_ascii_digit())
            && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit());

        if c.is_ascii_digit() || (in_run && matches!(c, '.' | ',')) || grouping_space {
            current.push(c);
        } else if in_run {
            runs.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        runs.push(current);
    }

    let [token] = runs.as_slice() else {
        return None;
    };
    let normalized: String = token
        .trim_end_matches(['.', ','])
        .chars()
        .filter(|c| !matches!(c, '.' | ' ' | '\u{a0}'))
        .map(|c| if c == ',' { '.' } else { c })
        .collect();

    normalized.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parse a measurement like `"32,5"` or `"2.8 kg"`; a trailing unit is ignored.
pub fn parse_measure(text: &str) -> Option<f64> {
    let number = text
        .trim()
        .trim_end_matches(|c: char| c.is_alphabetic())
        .trim_end();

    number
        .replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}
