use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use ves_core::domain::{EventSource, RawDateTime, RawEventInput};
use ves_core::storage::MemoryStorage;
use ves_pipeline::cache::{DayBucketEngine, EventCache};
use ves_pipeline::pipeline::retry::RetryPolicy;
use ves_pipeline::pipeline::{PipelineOptions, PipelineOrchestrator};

fn raw_event(title: &str, venue: &str, start: &str, category: &str) -> RawEventInput {
    RawEventInput {
        title: Some(title.to_string()),
        description: None,
        start_date_time: Some(RawDateTime::Text(start.to_string())),
        end_date_time: None,
        venue_name: Some(venue.to_string()),
        venue_address: None,
        venue_city: None,
        category: Some(category.to_string()),
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

struct Fixture {
    storage: Arc<MemoryStorage>,
    day_buckets: Arc<DayBucketEngine>,
    event_cache: EventCache,
    orchestrator: PipelineOrchestrator,
}

fn fixture() -> Fixture {
    let storage = Arc::new(MemoryStorage::new());
    let day_buckets = Arc::new(DayBucketEngine::new());
    let event_cache = EventCache::with_capacity(1000);
    let orchestrator = PipelineOrchestrator::new(
        storage.clone(),
        day_buckets.clone(),
        event_cache.clone(),
    )
    .with_retry_policy(RetryPolicy::immediate(3))
    .with_inter_batch_pause(Duration::ZERO);
    Fixture {
        storage,
        day_buckets,
        event_cache,
        orchestrator,
    }
}

#[tokio::test]
async fn import_persists_buckets_and_caches() {
    let fx = fixture();
    let inputs = vec![
        raw_event("Nachtschicht", "Flex", "2025-09-02T23:00:00Z", "Clubs/Discos"),
        raw_event("Modular Live", "Grelle Forelle", "2025-09-02T22:00:00Z", "techno"),
    ];

    let result = fx
        .orchestrator
        .run(inputs, &PipelineOptions::for_source("scraper"))
        .await;

    assert!(result.success);
    assert_eq!(result.processed, 2);
    assert_eq!(result.inserted, 2);
    assert_eq!(result.failed, 0);
    assert_eq!(result.venues_created, 2);
    assert_eq!(fx.storage.event_count().await, 2);
    assert_eq!(fx.storage.venue_count().await, 2);

    let date = NaiveDate::from_ymd_opt(2025, 9, 2).unwrap();
    let snapshot = fx.day_buckets.get_day_events("Wien", date).unwrap();
    assert_eq!(snapshot.events.len(), 2);

    // "techno" was canonicalized before it reached the cache key
    let lookup = fx
        .event_cache
        .get_for_categories("Wien", date, &["DJ Sets/Electronic".to_string()])
        .await;
    assert_eq!(lookup.cached_events["DJ Sets/Electronic"].len(), 1);
}

#[tokio::test]
async fn record_missing_venue_is_dropped_not_failed() {
    let fx = fixture();
    let mut broken = raw_event("Soundtrip", "Flex", "2025-09-02T20:00:00Z", "Event");
    broken.venue_name = None;
    let inputs = vec![
        broken,
        raw_event("Nachtschicht", "Flex", "2025-09-02T23:00:00Z", "Clubs/Discos"),
    ];

    let result = fx
        .orchestrator
        .run(inputs, &PipelineOptions::for_source("scraper"))
        .await;

    assert!(result.success);
    assert_eq!(result.processed, 1);
    assert_eq!(result.failed, 0);
    assert_eq!(result.inserted, 1);
}

#[tokio::test]
async fn dry_run_touches_nothing() {
    let fx = fixture();
    let inputs: Vec<RawEventInput> = (0..10)
        .map(|i| {
            raw_event(
                &format!("Event {i}"),
                &format!("Venue {i}"),
                "2025-09-02T20:00:00Z",
                "Event",
            )
        })
        .collect();

    let options = PipelineOptions {
        dry_run: true,
        batch_size: 3,
        ..PipelineOptions::for_source("scraper")
    };
    let result = fx.orchestrator.run(inputs, &options).await;

    assert!(result.success);
    assert_eq!(result.processed, 10);
    assert_eq!(result.inserted, 0);
    assert_eq!(fx.storage.event_count().await, 0);
    assert_eq!(fx.storage.venue_count().await, 0);
    assert_eq!(fx.event_cache.size().await, 0);
    assert_eq!(fx.day_buckets.bucket_count(), 0);
}

#[tokio::test]
async fn near_duplicates_collapse_to_one_insert() {
    let fx = fixture();
    let inputs = vec![
        raw_event("Nachtschicht", "Flex", "2025-09-02T23:00:00Z", "Clubs/Discos"),
        raw_event("NACHTSCHICHT  ", "FLEX", "2025-09-02T23:00:00Z", "Clubs/Discos"),
    ];

    let result = fx
        .orchestrator
        .run(inputs, &PipelineOptions::for_source("scraper"))
        .await;

    assert_eq!(result.inserted, 1);
    assert_eq!(result.skipped_duplicates, 1);
    assert_eq!(fx.storage.event_count().await, 1);
    assert_eq!(fx.storage.venue_count().await, 1);
}

#[tokio::test]
async fn redelivery_skips_persisted_duplicates() {
    let fx = fixture();
    let inputs =
        vec![raw_event("Nachtschicht", "Flex", "2025-09-02T23:00:00Z", "Clubs/Discos")];

    let first = fx
        .orchestrator
        .run(inputs.clone(), &PipelineOptions::for_source("scraper"))
        .await;
    assert_eq!(first.inserted, 1);

    let second = fx
        .orchestrator
        .run(inputs, &PipelineOptions::for_source("scraper"))
        .await;
    assert!(second.success);
    assert_eq!(second.inserted, 0);
    assert_eq!(second.skipped_duplicates, 1);
    assert_eq!(fx.storage.event_count().await, 1);
}

#[tokio::test]
async fn duplicate_key_without_dedup_becomes_update() {
    let fx = fixture();
    let inputs =
        vec![raw_event("Nachtschicht", "Flex", "2025-09-02T23:00:00Z", "Clubs/Discos")];

    fx.orchestrator
        .run(inputs.clone(), &PipelineOptions::for_source("scraper"))
        .await;

    let options = PipelineOptions {
        skip_deduplication: true,
        ..PipelineOptions::for_source("ai-search")
    };
    let result = fx.orchestrator.run(inputs, &options).await;

    // the unique constraint fired and was absorbed as an upsert
    assert!(result.success);
    assert_eq!(result.inserted, 0);
    assert_eq!(result.updated, 1);
    assert_eq!(result.failed, 0);
    assert_eq!(fx.storage.event_count().await, 1);
}

#[tokio::test]
async fn ibiza_partial_cache_scenario() {
    let fx = fixture();
    let mut inputs = vec![
        raw_event("Opening Night", "Amnesia", "2025-09-02T23:00:00Z", "Clubs-Discos"),
        raw_event("Closing Party", "Amnesia", "2025-09-02T21:00:00Z", "Clubs-Discos"),
    ];
    for input in &mut inputs {
        input.venue_city = Some("Ibiza".to_string());
    }

    fx.orchestrator
        .run(inputs, &PipelineOptions::for_source("scraper"))
        .await;

    let date = NaiveDate::from_ymd_opt(2025, 9, 2).unwrap();
    let lookup = fx
        .event_cache
        .get_for_categories(
            "Ibiza",
            date,
            &["Clubs-Discos".to_string(), "DJ Sets-Electronic".to_string()],
        )
        .await;

    assert_eq!(lookup.cached_events["Clubs/Discos"].len(), 2);
    assert_eq!(lookup.missing_categories, vec!["DJ Sets/Electronic".to_string()]);
    assert!(lookup.cache_info["Clubs/Discos"].from_cache);
    assert!(!lookup.cache_info["DJ Sets/Electronic"].from_cache);
}

#[tokio::test]
async fn events_link_to_their_venue() {
    let fx = fixture();
    let inputs =
        vec![raw_event("Nachtschicht", "Flex", "2025-09-02T23:00:00Z", "Clubs/Discos")];

    fx.orchestrator
        .run(inputs, &PipelineOptions::for_source("scraper"))
        .await;

    // venue resolution set the id during the batch; nothing left unlinked
    let unlinked = fx.storage.get_unlinked_events("Wien").await.unwrap();
    assert!(unlinked.is_empty());
}
