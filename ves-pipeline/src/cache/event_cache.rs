use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

use ves_core::domain::EventRecord;

use super::keys::{create_key_for_category, normalize_category};
use super::store::{CacheBackend, CacheStore};

/// Hit/miss detail for one requested category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryCacheInfo {
    pub from_cache: bool,
    pub event_count: usize,
}

/// Result of a multi-category lookup. The requested categories partition
/// exactly into `cached_events` keys and `missing_categories`; a category
/// cached with zero events is a hit, not a miss.
#[derive(Debug, Default)]
pub struct CategoryLookup {
    pub cached_events: HashMap<String, Vec<EventRecord>>,
    pub missing_categories: Vec<String>,
    pub cache_info: HashMap<String, CategoryCacheInfo>,
}

/// Per-(city, date, category) cache of event lists.
///
/// The empty list is a first-class cached value: a category that genuinely
/// has no events for a day must not be re-fetched from the expensive
/// upstream source just because it is empty.
#[derive(Clone)]
pub struct EventCache {
    store: CacheStore<Vec<EventRecord>>,
}

impl EventCache {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            store: CacheStore::new(backend),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            store: CacheStore::with_capacity(capacity),
        }
    }

    pub async fn set_for_category(
        &self,
        city: &str,
        date: NaiveDate,
        category: &str,
        events: &[EventRecord],
        ttl_secs: u64,
    ) {
        let key = create_key_for_category(city, date, category);
        self.store.set(&key, &events.to_vec(), ttl_secs).await;
    }

    /// Look up several categories at once. Every requested category appears
    /// in `cache_info`; hits land in `cached_events` under their canonical
    /// names and the rest in `missing_categories`.
    pub async fn get_for_categories(
        &self,
        city: &str,
        date: NaiveDate,
        categories: &[String],
    ) -> CategoryLookup {
        let mut lookup = CategoryLookup::default();
        for requested in categories {
            let canonical = normalize_category(requested);
            if lookup.cache_info.contains_key(&canonical) {
                continue;
            }
            let key = create_key_for_category(city, date, &canonical);
            match self.store.get(&key).await {
                Some(events) => {
                    lookup.cache_info.insert(
                        canonical.clone(),
                        CategoryCacheInfo {
                            from_cache: true,
                            event_count: events.len(),
                        },
                    );
                    lookup.cached_events.insert(canonical, events);
                }
                None => {
                    lookup.cache_info.insert(
                        canonical.clone(),
                        CategoryCacheInfo {
                            from_cache: false,
                            event_count: 0,
                        },
                    );
                    lookup.missing_categories.push(canonical);
                }
            }
        }
        lookup
    }

    pub async fn delete_category(&self, city: &str, date: NaiveDate, category: &str) -> bool {
        self.store
            .delete(&create_key_for_category(city, date, category))
            .await
    }

    pub async fn clear(&self) {
        self.store.clear().await;
    }

    pub async fn size(&self) -> usize {
        self.store.size().await
    }

    pub async fn sweep_expired(&self) -> usize {
        self.store.sweep_expired().await
    }

    /// Secondary sweep: drop entries whose events have all ended, even when
    /// the nominal TTL has not lapsed. Empty-list entries are left alone --
    /// they are valid negative results until their TTL runs out.
    pub async fn sweep_elapsed(&self, now: DateTime<Utc>) -> usize {
        let backend = self.store.backend();
        let mut removed = 0;
        for key in backend.keys().await {
            let Some(entry) = backend.peek(&key).await else {
                continue;
            };
            let Ok(events) = serde_json::from_value::<Vec<EventRecord>>(entry.payload) else {
                // Corrupt payloads are handled by get(); leave them for it.
                continue;
            };
            if !events.is_empty() && events.iter().all(|e| e.elapsed_after() < now) {
                if backend.remove(&key).await {
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            debug!(removed, "removed cache entries for fully elapsed events");
        }
        removed
    }

    /// Background task running both sweeps. Lifecycle belongs to the caller.
    pub fn spawn_sweeper(&self, every: Duration) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                cache.sweep_expired().await;
                cache.sweep_elapsed(Utc::now()).await;
            }
        })
    }
}

/// TTL in seconds until the furthest-future event in the set is over, with a
/// small floor so a set of already-started events still caches briefly.
pub fn ttl_until_latest_event(events: &[EventRecord], now: DateTime<Utc>) -> u64 {
    const FLOOR_SECS: u64 = 300;
    events
        .iter()
        .map(|e| e.elapsed_after())
        .max()
        .map(|latest| {
            let secs = latest.signed_duration_since(now).num_seconds();
            (secs.max(0) as u64).max(FLOOR_SECS)
        })
        .unwrap_or(FLOOR_SECS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::BTreeSet;

    fn event(id: &str, category: &str, hour: u32) -> EventRecord {
        EventRecord {
            id: id.to_string(),
            title: format!("Event {id}"),
            description: None,
            category: category.to_string(),
            start_date_time: Utc.with_ymd_and_hms(2025, 9, 2, hour, 0, 0).unwrap(),
            end_date_time: None,
            venue_name: "Grelle Forelle".to_string(),
            venue_address: None,
            venue_id: None,
            city: "Ibiza".to_string(),
            price: None,
            website_url: None,
            booking_url: None,
            image_url: None,
            sources: BTreeSet::from(["scraper".to_string()]),
            source_url: None,
            latitude: None,
            longitude: None,
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 9, 2).unwrap()
    }

    #[tokio::test]
    async fn partial_hit_reports_every_requested_category() {
        let cache = EventCache::with_capacity(100);
        let clubs = vec![
            event("e1", "Clubs/Discos", 22),
            event("e2", "Clubs/Discos", 23),
        ];
        cache
            .set_for_category("Ibiza", date(), "Clubs-Discos", &clubs, 3600)
            .await;

        let lookup = cache
            .get_for_categories(
                "Ibiza",
                date(),
                &["Clubs-Discos".to_string(), "DJ Sets-Electronic".to_string()],
            )
            .await;

        assert_eq!(lookup.cached_events["Clubs/Discos"].len(), 2);
        assert_eq!(
            lookup.missing_categories,
            vec!["DJ Sets/Electronic".to_string()]
        );
        assert_eq!(
            lookup.cache_info["Clubs/Discos"],
            CategoryCacheInfo {
                from_cache: true,
                event_count: 2
            }
        );
        assert_eq!(
            lookup.cache_info["DJ Sets/Electronic"],
            CategoryCacheInfo {
                from_cache: false,
                event_count: 0
            }
        );
        // exact partition: no overlap, no omission
        assert_eq!(
            lookup.cached_events.len() + lookup.missing_categories.len(),
            2
        );
    }

    #[tokio::test]
    async fn cached_empty_list_is_a_hit() {
        let cache = EventCache::with_capacity(100);
        cache
            .set_for_category("Wien", date(), "Festivals", &[], 3600)
            .await;

        let lookup = cache
            .get_for_categories("Wien", date(), &["Festivals".to_string()])
            .await;

        assert!(lookup.missing_categories.is_empty());
        assert_eq!(
            lookup.cache_info["Festivals"],
            CategoryCacheInfo {
                from_cache: true,
                event_count: 0
            }
        );
        assert_eq!(lookup.cached_events["Festivals"], Vec::new());
    }

    #[tokio::test]
    async fn elapsed_sweep_drops_finished_days_only() {
        let cache = EventCache::with_capacity(100);
        cache
            .set_for_category(
                "Wien",
                date(),
                "Clubs/Discos",
                &[event("e1", "Clubs/Discos", 22)],
                86_400,
            )
            .await;
        cache
            .set_for_category("Wien", date(), "Festivals", &[], 86_400)
            .await;

        // Day after the event: the event entry goes, the empty entry stays.
        let later = Utc.with_ymd_and_hms(2025, 9, 4, 12, 0, 0).unwrap();
        assert_eq!(cache.sweep_elapsed(later).await, 1);
        assert_eq!(cache.size().await, 1);
    }

    #[tokio::test]
    async fn ttl_derives_from_furthest_event() {
        let now = Utc.with_ymd_and_hms(2025, 9, 2, 12, 0, 0).unwrap();
        let events = vec![event("e1", "Clubs/Discos", 22)];
        // end of day 23:59:59 minus noon
        let ttl = ttl_until_latest_event(&events, now);
        assert_eq!(ttl, 11 * 3600 + 59 * 60 + 59);
        assert_eq!(ttl_until_latest_event(&[], now), 300);
    }
}
