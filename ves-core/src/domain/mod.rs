use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

pub mod ids;

/// Origin tag for an ingested record. The wire strings are a persisted
/// contract shared with the upstream collectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventSource {
    #[serde(rename = "wien.info")]
    WienInfo,
    #[serde(rename = "ai-search")]
    AiSearch,
    #[serde(rename = "scraper")]
    Scraper,
    #[serde(rename = "community")]
    Community,
    #[serde(rename = "rss")]
    Rss,
}

impl EventSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventSource::WienInfo => "wien.info",
            EventSource::AiSearch => "ai-search",
            EventSource::Scraper => "scraper",
            EventSource::Community => "community",
            EventSource::Rss => "rss",
        }
    }
}

/// Start time as delivered by the heterogeneous sources: epoch milliseconds
/// (serialized Date objects), or a string that is either ISO-8601 or an
/// all-day marker such as "ganztags".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawDateTime {
    Millis(i64),
    Text(String),
}

/// Loosely-typed input record accepted from all source collaborators
/// (scrapers, AI search, official feeds, user submissions).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEventInput {
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub start_date_time: Option<RawDateTime>,
    #[serde(default)]
    pub end_date_time: Option<RawDateTime>,
    pub venue_name: Option<String>,
    #[serde(default)]
    pub venue_address: Option<String>,
    #[serde(default)]
    pub venue_city: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub price: Option<String>,
    #[serde(default)]
    pub ticket_url: Option<String>,
    #[serde(default)]
    pub website_url: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    pub source: EventSource,
    #[serde(default)]
    pub source_id: Option<String>,
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

/// Canonical event record. Created by normalization, enriched by merge,
/// mirrored into day buckets and the per-category cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    /// Stable hash of title + venue + start time + city; survives re-imports.
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub category: String,
    pub start_date_time: DateTime<Utc>,
    pub end_date_time: Option<DateTime<Utc>>,
    pub venue_name: String,
    pub venue_address: Option<String>,
    pub venue_id: Option<Uuid>,
    pub city: String,
    pub price: Option<String>,
    pub website_url: Option<String>,
    pub booking_url: Option<String>,
    pub image_url: Option<String>,
    pub sources: BTreeSet<String>,
    pub source_url: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// Sentinel start time for all-day events, distinct from a genuine midnight
/// start.
pub fn all_day_sentinel() -> NaiveTime {
    NaiveTime::from_hms_opt(0, 0, 1).expect("00:00:01 is a valid time")
}

fn keep_nonempty(existing: &mut Option<String>, incoming: &Option<String>) {
    let incoming_set = incoming.as_deref().is_some_and(|s| !s.trim().is_empty());
    let existing_set = existing.as_deref().is_some_and(|s| !s.trim().is_empty());
    if incoming_set && !existing_set {
        *existing = incoming.clone();
    }
}

impl EventRecord {
    /// Calendar date of the event start.
    pub fn event_date(&self) -> NaiveDate {
        self.start_date_time.date_naive()
    }

    pub fn is_all_day(&self) -> bool {
        self.start_date_time.time() == all_day_sentinel()
    }

    /// Moment after which the event is over. Falls back to the end of the
    /// start day when no explicit end is known.
    pub fn elapsed_after(&self) -> DateTime<Utc> {
        match self.end_date_time {
            Some(end) => end,
            None => {
                let eod = self
                    .event_date()
                    .and_hms_opt(23, 59, 59)
                    .expect("23:59:59 is a valid time");
                DateTime::from_naive_utc_and_offset(eod, Utc)
            }
        }
    }

    /// How many of the descriptive fields carry data. Used to pick the
    /// dedup survivor among near-identical records.
    pub fn populated_field_count(&self) -> usize {
        let set = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        let mut n = 0;
        if !self.title.trim().is_empty() {
            n += 1;
        }
        n += usize::from(set(&self.description));
        n += usize::from(set(&self.price));
        n += usize::from(set(&self.website_url));
        n += usize::from(set(&self.booking_url));
        n += usize::from(set(&self.image_url));
        n += usize::from(set(&self.venue_address));
        n
    }

    /// Field-level merge of an overlapping record for the same stable id.
    ///
    /// A non-empty incoming value wins over an empty existing one, a longer
    /// description wins, already-set price/links are preserved, and source
    /// tags are set-unioned. Applying two updates in either order converges
    /// on the same record, which keeps day-bucket upserts idempotent under
    /// concurrent batches.
    pub fn absorb(&mut self, incoming: &EventRecord) {
        match (&self.description, &incoming.description) {
            (None, Some(d)) if !d.trim().is_empty() => {
                self.description = Some(d.clone());
            }
            (Some(ours), Some(theirs)) if theirs.len() > ours.len() => {
                self.description = Some(theirs.clone());
            }
            _ => {}
        }
        keep_nonempty(&mut self.price, &incoming.price);
        keep_nonempty(&mut self.website_url, &incoming.website_url);
        keep_nonempty(&mut self.booking_url, &incoming.booking_url);
        keep_nonempty(&mut self.image_url, &incoming.image_url);
        keep_nonempty(&mut self.venue_address, &incoming.venue_address);
        keep_nonempty(&mut self.source_url, &incoming.source_url);
        if self.end_date_time.is_none() {
            self.end_date_time = incoming.end_date_time;
        }
        if self.venue_id.is_none() {
            self.venue_id = incoming.venue_id;
        }
        if self.latitude.is_none() {
            self.latitude = incoming.latitude;
            self.longitude = incoming.longitude;
        }
        for tag in &incoming.sources {
            self.sources.insert(tag.clone());
        }
    }
}

/// A venue row. Exactly one id exists per distinct (name, city) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueRecord {
    pub id: Uuid,
    pub name: String,
    pub address: Option<String>,
    pub city: String,
    pub slug: String,
}

/// Aggregate counters for one pipeline invocation. Immutable once returned.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineResult {
    pub success: bool,
    pub processed: usize,
    pub inserted: usize,
    pub updated: usize,
    pub failed: usize,
    pub skipped_duplicates: usize,
    pub venues_created: usize,
    pub venues_reused: usize,
    pub cached: usize,
    pub duration_millis: u64,
    pub errors: Vec<String>,
}

/// Per-run audit row, kept so operators can inspect recent imports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportRunSummary {
    pub id: Uuid,
    pub source: String,
    pub city: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub processed: usize,
    pub inserted: usize,
    pub updated: usize,
    pub failed: usize,
    pub skipped_duplicates: usize,
    pub success: bool,
}
