use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A listing produced by extraction, not yet reconciled against storage.
///
/// Numeric fields are `None` when the page did not state them or they could
/// not be parsed; a stated zero stays `Some(0.0)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Identifier assigned by the source site; the reconciliation key.
    pub external_id: i64,
    pub title: String,
    pub price: Option<f64>,
    /// Volume in litres.
    pub volume: Option<f64>,
    pub length: Option<f64>,
    pub weight: Option<f64>,
    pub description: String,
    pub link: String,
}

impl Candidate {
    /// Text sent to the notification sink when this candidate is first inserted.
    ///
    /// A zero price ("0,00€" placeholders) is announced like a missing one.
    pub fn announcement(&self) -> String {
        match self.price {
            Some(price) if price > 0.0 => {
                format!("New board: {} ({:.2} €)\n{}", self.title, price, self.link)
            }
            _ => format!("New board: {}\n{}", self.title, self.link),
        }
    }
}

/// A listing as stored in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Listing {
    /// Surrogate key assigned on insert; never reassigned.
    pub id: i64,
    pub external_id: i64,
    pub title: String,
    pub price: Option<f64>,
    pub volume: Option<f64>,
    pub length: Option<f64>,
    pub weight: Option<f64>,
    pub description: String,
    pub link: String,
    /// True when the listing was not observed by the most recent completed run.
    pub removed: bool,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl Listing {
    /// True when every mutable field already equals the candidate's.
    pub fn matches(&self, candidate: &Candidate) -> bool {
        self.external_id == candidate.external_id
            && self.title == candidate.title
            && self.price == candidate.price
            && self.volume == candidate.volume
            && self.length == candidate.length
            && self.weight == candidate.weight
            && self.description == candidate.description
            && self.link == candidate.link
    }
}
