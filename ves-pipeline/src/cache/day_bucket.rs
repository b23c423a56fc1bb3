use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;

use ves_core::domain::EventRecord;

/// Merged view of everything known about one city on one calendar date,
/// indexed by stable event id. Owned exclusively by [`DayBucketEngine`].
#[derive(Debug, Clone)]
pub struct DayBucket {
    pub city: String,
    pub date: NaiveDate,
    pub events_by_id: HashMap<String, EventRecord>,
    pub category_index: HashMap<String, Vec<String>>,
    pub updated_at: DateTime<Utc>,
}

impl DayBucket {
    fn new(city: String, date: NaiveDate) -> Self {
        Self {
            city,
            date,
            events_by_id: HashMap::new(),
            category_index: HashMap::new(),
            updated_at: Utc::now(),
        }
    }

    fn rebuild_index(&mut self) {
        let mut index: HashMap<String, Vec<String>> = HashMap::new();
        for (id, event) in &self.events_by_id {
            index.entry(event.category.clone()).or_default().push(id.clone());
        }
        for ids in index.values_mut() {
            ids.sort();
        }
        self.category_index = index;
    }

    /// The bucket is dead at the end of its calendar day, or earlier when
    /// every contained event is already over.
    pub fn expires_at(&self) -> DateTime<Utc> {
        let end_of_day = DateTime::from_naive_utc_and_offset(
            self.date
                .and_hms_opt(23, 59, 59)
                .expect("23:59:59 is a valid time"),
            Utc,
        );
        match self.events_by_id.values().map(|e| e.elapsed_after()).max() {
            Some(latest) if latest < end_of_day => latest,
            _ => end_of_day,
        }
    }
}

/// Read-only snapshot of a day bucket handed out to callers.
#[derive(Debug, Clone)]
pub struct DayBucketSnapshot {
    pub events: Vec<EventRecord>,
    pub category_index: HashMap<String, Vec<String>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertStats {
    pub inserted: usize,
    pub merged: usize,
}

/// Keeper of one mergeable bucket per (city, date).
///
/// Upserts are keyed by stable event id and merge field-by-field, so
/// overlapping writes from different sources and re-deliveries of the same
/// batch converge on the same bucket contents in any order.
#[derive(Default)]
pub struct DayBucketEngine {
    buckets: RwLock<HashMap<(String, NaiveDate), DayBucket>>,
}

impl DayBucketEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn bucket_key(city: &str, date: NaiveDate) -> (String, NaiveDate) {
        (city.trim().to_lowercase(), date)
    }

    pub fn get_day_events(&self, city: &str, date: NaiveDate) -> Option<DayBucketSnapshot> {
        let buckets = self.buckets.read().expect("day bucket lock poisoned");
        let bucket = buckets.get(&Self::bucket_key(city, date))?;
        let mut events: Vec<EventRecord> = bucket.events_by_id.values().cloned().collect();
        events.sort_by(|a, b| a.start_date_time.cmp(&b.start_date_time).then(a.id.cmp(&b.id)));
        Some(DayBucketSnapshot {
            events,
            category_index: bucket.category_index.clone(),
            updated_at: bucket.updated_at,
        })
    }

    /// Insert-or-merge a set of events into the bucket for (city, date).
    /// Events whose start date is not `date` are merged anyway under the
    /// given bucket; callers group by date beforehand.
    pub fn upsert_day_events(
        &self,
        city: &str,
        date: NaiveDate,
        events: Vec<EventRecord>,
    ) -> UpsertStats {
        let mut stats = UpsertStats::default();
        let mut buckets = self.buckets.write().expect("day bucket lock poisoned");
        let bucket = buckets
            .entry(Self::bucket_key(city, date))
            .or_insert_with(|| DayBucket::new(city.trim().to_lowercase(), date));
        for event in events {
            match bucket.events_by_id.get_mut(&event.id) {
                Some(existing) => {
                    existing.absorb(&event);
                    stats.merged += 1;
                }
                None => {
                    bucket.events_by_id.insert(event.id.clone(), event);
                    stats.inserted += 1;
                }
            }
        }
        bucket.rebuild_index();
        bucket.updated_at = Utc::now();
        debug!(
            city,
            %date,
            inserted = stats.inserted,
            merged = stats.merged,
            "day bucket upsert"
        );
        stats
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.read().expect("day bucket lock poisoned").len()
    }

    /// Drop buckets whose day is over (or whose events are all over).
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut buckets = self.buckets.write().expect("day bucket lock poisoned");
        let before = buckets.len();
        buckets.retain(|_, bucket| bucket.expires_at() >= now);
        before - buckets.len()
    }
}
