use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;
use std::fmt;
use tracing::debug;

use ves_core::domain::ids::stable_event_id;
use ves_core::domain::{all_day_sentinel, EventRecord, RawDateTime, RawEventInput};

use crate::cache::keys::normalize_category;

/// Markers used by several sources in place of a start time for all-day
/// programming.
const ALL_DAY_MARKERS: [&str; 5] = ["ganztags", "ganztägig", "all-day", "all day", "allday"];

/// Club events are routinely published without a time; the sources start
/// them at 23:00 by convention.
const DEFAULT_EVENT_TIME: (u32, u32, u32) = (23, 0, 0);

static ISO_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d{4}-\d{2}-\d{2}").expect("valid date regex"));
static GERMAN_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{1,2})\.(\d{1,2})\.(\d{4})").expect("valid date regex"));

/// Why a raw record did not survive normalization. Rejections are counted
/// and logged at debug level, never surfaced as pipeline failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    MissingTitle,
    MissingVenue,
    UnparseableStart(String),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::MissingTitle => write!(f, "missing title"),
            RejectReason::MissingVenue => write!(f, "missing venue name"),
            RejectReason::UnparseableStart(raw) => {
                write!(f, "unparseable start time: {raw}")
            }
        }
    }
}

/// Outcome of normalizing one raw record: either a canonical event or a
/// tagged rejection. Nothing in between, nothing thrown.
#[derive(Debug, Clone)]
pub enum Normalized {
    Valid(EventRecord),
    Rejected(RejectReason),
}

/// Converts schema-loose source records into canonical [`EventRecord`]s.
pub struct EventNormalizer {
    default_city: String,
}

fn clean(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn find_date(text: &str) -> Option<NaiveDate> {
    if let Some(m) = ISO_DATE.find(text) {
        if let Ok(date) = NaiveDate::parse_from_str(m.as_str(), "%Y-%m-%d") {
            return Some(date);
        }
    }
    if let Some(caps) = GERMAN_DATE.captures(text) {
        let day: u32 = caps[1].parse().ok()?;
        let month: u32 = caps[2].parse().ok()?;
        let year: i32 = caps[3].parse().ok()?;
        return NaiveDate::from_ymd_opt(year, month, day);
    }
    None
}

fn naive_to_utc(date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    DateTime::from_naive_utc_and_offset(date.and_time(time), Utc)
}

/// Parse a raw start/end time. Accepts epoch milliseconds, ISO-8601 with or
/// without offset, date-plus-time variants, a bare date (given the default
/// event time), German DD.MM.YYYY dates, and all-day markers accompanied by
/// a date, which map to the 00:00:01 sentinel.
pub fn parse_raw_date_time(raw: &RawDateTime) -> Option<DateTime<Utc>> {
    match raw {
        RawDateTime::Millis(ms) => Utc.timestamp_millis_opt(*ms).single(),
        RawDateTime::Text(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return None;
            }
            let lowered = trimmed.to_lowercase();
            if ALL_DAY_MARKERS.iter().any(|m| lowered.contains(m)) {
                return find_date(trimmed).map(|d| naive_to_utc(d, all_day_sentinel()));
            }
            if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
                return Some(dt.with_timezone(&Utc));
            }
            for format in [
                "%Y-%m-%dT%H:%M:%S%.f",
                "%Y-%m-%dT%H:%M:%S",
                "%Y-%m-%dT%H:%M",
                "%Y-%m-%d %H:%M:%S",
                "%Y-%m-%d %H:%M",
            ] {
                if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(trimmed, format) {
                    return Some(DateTime::from_naive_utc_and_offset(naive, Utc));
                }
            }
            let (h, m, s) = DEFAULT_EVENT_TIME;
            let default_time = NaiveTime::from_hms_opt(h, m, s).expect("valid default time");
            if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
                return Some(naive_to_utc(date, default_time));
            }
            if let Some(caps) = GERMAN_DATE.captures(trimmed) {
                // Only a bare German date, not one embedded in arbitrary text
                if caps.get(0).map(|m| m.as_str().len()) == Some(trimmed.len()) {
                    let day: u32 = caps[1].parse().ok()?;
                    let month: u32 = caps[2].parse().ok()?;
                    let year: i32 = caps[3].parse().ok()?;
                    return NaiveDate::from_ymd_opt(year, month, day)
                        .map(|d| naive_to_utc(d, default_time));
                }
            }
            None
        }
    }
}

impl EventNormalizer {
    pub fn new(default_city: impl Into<String>) -> Self {
        Self {
            default_city: default_city.into(),
        }
    }

    pub fn normalize(&self, raw: &RawEventInput) -> Normalized {
        let Some(title) = clean(&raw.title) else {
            return Normalized::Rejected(RejectReason::MissingTitle);
        };
        let Some(venue_name) = clean(&raw.venue_name) else {
            return Normalized::Rejected(RejectReason::MissingVenue);
        };
        let start = match &raw.start_date_time {
            Some(raw_start) => match parse_raw_date_time(raw_start) {
                Some(start) => start,
                None => {
                    let shown = match raw_start {
                        RawDateTime::Text(t) => t.clone(),
                        RawDateTime::Millis(ms) => ms.to_string(),
                    };
                    debug!(title = %title, raw = %shown, "dropping record with unparseable start");
                    return Normalized::Rejected(RejectReason::UnparseableStart(shown));
                }
            },
            None => {
                return Normalized::Rejected(RejectReason::UnparseableStart(
                    "<absent>".to_string(),
                ))
            }
        };
        let end = raw.end_date_time.as_ref().and_then(parse_raw_date_time);

        let city = clean(&raw.venue_city).unwrap_or_else(|| self.default_city.clone());
        let category = clean(&raw.category)
            .map(|c| normalize_category(&c))
            .unwrap_or_else(|| "Event".to_string());

        let id = stable_event_id(&title, &venue_name, &start, &city);
        Normalized::Valid(EventRecord {
            id,
            title,
            description: clean(&raw.description),
            category,
            start_date_time: start,
            end_date_time: end,
            venue_name,
            venue_address: clean(&raw.venue_address),
            venue_id: None,
            city,
            price: clean(&raw.price),
            website_url: clean(&raw.website_url),
            booking_url: clean(&raw.ticket_url),
            image_url: clean(&raw.image_url),
            sources: BTreeSet::from([raw.source.as_str().to_string()]),
            source_url: clean(&raw.source_url),
            latitude: raw.latitude,
            longitude: raw.longitude,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ves_core::domain::EventSource;

    fn raw(title: Option<&str>, venue: Option<&str>, start: Option<RawDateTime>) -> RawEventInput {
        RawEventInput {
            title: title.map(String::from),
            description: None,
            start_date_time: start,
            end_date_time: None,
            venue_name: venue.map(String::from),
            venue_address: None,
            venue_city: None,
            category: None,
            price: None,
            ticket_url: None,
            website_url: None,
            image_url: None,
            source: EventSource::Scraper,
            source_id: None,
            source_url: None,
            latitude: None,
            longitude: None,
        }
    }

    fn normalizer() -> EventNormalizer {
        EventNormalizer::new("Wien")
    }

    #[test]
    fn iso_string_normalizes_with_defaults() {
        let input = raw(
            Some("Soundtrip"),
            Some("Flex"),
            Some(RawDateTime::Text("2025-09-02T23:00:00Z".to_string())),
        );
        let Normalized::Valid(event) = normalizer().normalize(&input) else {
            panic!("expected valid event");
        };
        assert_eq!(event.city, "Wien");
        assert_eq!(event.category, "Event");
        assert_eq!(event.start_date_time.to_rfc3339(), "2025-09-02T23:00:00+00:00");
        assert_eq!(event.sources.iter().next().map(String::as_str), Some("scraper"));
    }

    #[test]
    fn epoch_millis_parse() {
        let input = raw(
            Some("Soundtrip"),
            Some("Flex"),
            Some(RawDateTime::Millis(1_756_854_000_000)),
        );
        let Normalized::Valid(event) = normalizer().normalize(&input) else {
            panic!("expected valid event");
        };
        assert_eq!(event.event_date().to_string(), "2025-09-02");
    }

    #[test]
    fn all_day_marker_maps_to_sentinel() {
        let input = raw(
            Some("Flohmarkt"),
            Some("Naschmarkt"),
            Some(RawDateTime::Text("2025-09-02 ganztags".to_string())),
        );
        let Normalized::Valid(event) = normalizer().normalize(&input) else {
            panic!("expected valid event");
        };
        assert!(event.is_all_day());
        assert_eq!(event.event_date().to_string(), "2025-09-02");
    }

    #[test]
    fn bare_date_defaults_to_club_time() {
        let input = raw(
            Some("Nachtschicht"),
            Some("Flex"),
            Some(RawDateTime::Text("2025-09-02".to_string())),
        );
        let Normalized::Valid(event) = normalizer().normalize(&input) else {
            panic!("expected valid event");
        };
        assert_eq!(event.start_date_time.time().to_string(), "23:00:00");
    }

    #[test]
    fn german_date_parses() {
        let input = raw(
            Some("Nachtschicht"),
            Some("Flex"),
            Some(RawDateTime::Text("02.09.2025".to_string())),
        );
        let Normalized::Valid(event) = normalizer().normalize(&input) else {
            panic!("expected valid event");
        };
        assert_eq!(event.event_date().to_string(), "2025-09-02");
    }

    #[test]
    fn missing_fields_reject_without_panicking() {
        let n = normalizer();
        let start = || Some(RawDateTime::Text("2025-09-02T20:00:00Z".to_string()));

        match n.normalize(&raw(None, Some("Flex"), start())) {
            Normalized::Rejected(RejectReason::MissingTitle) => {}
            other => panic!("expected missing title, got {other:?}"),
        }
        match n.normalize(&raw(Some("  "), Some("Flex"), start())) {
            Normalized::Rejected(RejectReason::MissingTitle) => {}
            other => panic!("expected missing title, got {other:?}"),
        }
        match n.normalize(&raw(Some("Soundtrip"), None, start())) {
            Normalized::Rejected(RejectReason::MissingVenue) => {}
            other => panic!("expected missing venue, got {other:?}"),
        }
        match n.normalize(&raw(
            Some("Soundtrip"),
            Some("Flex"),
            Some(RawDateTime::Text("next friday maybe".to_string())),
        )) {
            Normalized::Rejected(RejectReason::UnparseableStart(_)) => {}
            other => panic!("expected unparseable start, got {other:?}"),
        }
    }

    #[test]
    fn category_is_normalized_when_present() {
        let mut input = raw(
            Some("Soundtrip"),
            Some("Flex"),
            Some(RawDateTime::Text("2025-09-02T23:00:00Z".to_string())),
        );
        input.category = Some("techno".to_string());
        let Normalized::Valid(event) = normalizer().normalize(&input) else {
            panic!("expected valid event");
        };
        assert_eq!(event.category, "DJ Sets/Electronic");
    }
}
