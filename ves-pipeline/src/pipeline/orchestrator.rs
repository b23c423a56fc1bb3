use chrono::{NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};
use uuid::Uuid;

use ves_core::domain::{EventRecord, ImportRunSummary, PipelineResult, RawEventInput};
use ves_core::storage::Storage;
use ves_core::PipelineError;

use crate::cache::event_cache::{ttl_until_latest_event, EventCache};
use crate::cache::DayBucketEngine;
use crate::observability::metrics as obs;

use super::dedupe::Deduplicator;
use super::normalize::{EventNormalizer, Normalized};
use super::post_link;
use super::progress::{emit, PipelineStage, ProgressEvent};
use super::retry::{self, RetryPolicy};
use super::venues::VenueResolver;

/// Caller-facing options for one pipeline invocation.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub dry_run: bool,
    pub batch_size: usize,
    pub source: String,
    pub city: String,
    pub debug: bool,
    pub skip_deduplication: bool,
    pub sync_to_cache: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            batch_size: 50,
            source: "manual".to_string(),
            city: "Wien".to_string(),
            debug: false,
            skip_deduplication: false,
            sync_to_cache: true,
        }
    }
}

impl PipelineOptions {
    pub fn for_source(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Self::default()
        }
    }
}

/// Drives raw source records through normalize, dedupe, venue resolution,
/// persistence, and cache sync in sequential batches.
///
/// Failures are isolated per event; a partial import is a correct outcome,
/// not an error state. The result always comes back, with `success == false`
/// reserved for the persistence layer being unreachable outright.
pub struct PipelineOrchestrator {
    storage: Arc<dyn Storage>,
    day_buckets: Arc<DayBucketEngine>,
    event_cache: EventCache,
    retry: RetryPolicy,
    inter_batch_pause: Duration,
    progress: Option<UnboundedSender<ProgressEvent>>,
}

enum PersistOutcome {
    Inserted,
    Updated,
    Failed(String),
    Fatal(String),
}

impl PipelineOrchestrator {
    pub fn new(
        storage: Arc<dyn Storage>,
        day_buckets: Arc<DayBucketEngine>,
        event_cache: EventCache,
    ) -> Self {
        Self {
            storage,
            day_buckets,
            event_cache,
            retry: RetryPolicy::default(),
            inter_batch_pause: Duration::from_millis(250),
            progress: None,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_inter_batch_pause(mut self, pause: Duration) -> Self {
        self.inter_batch_pause = pause;
        self
    }

    pub fn with_progress(mut self, sender: UnboundedSender<ProgressEvent>) -> Self {
        self.progress = Some(sender);
        self
    }

    pub async fn run(
        &self,
        raw_inputs: Vec<RawEventInput>,
        options: &PipelineOptions,
    ) -> PipelineResult {
        let started = Instant::now();
        let started_at = Utc::now();
        let mut result = PipelineResult {
            success: true,
            ..PipelineResult::default()
        };
        info!(
            source = %options.source,
            city = %options.city,
            records = raw_inputs.len(),
            dry_run = options.dry_run,
            "🚀 starting import pipeline"
        );

        // NORMALIZE
        emit(&self.progress, ProgressEvent::StageStarted { stage: PipelineStage::Normalize });
        let normalizer = EventNormalizer::new(options.city.clone());
        let mut events = Vec::with_capacity(raw_inputs.len());
        let mut rejected = 0usize;
        for raw in &raw_inputs {
            match normalizer.normalize(raw) {
                Normalized::Valid(event) => events.push(event),
                Normalized::Rejected(reason) => {
                    rejected += 1;
                    debug!(%reason, "dropping invalid record");
                }
            }
        }
        result.processed = events.len();
        obs::pipeline::records_processed(events.len());
        obs::pipeline::records_rejected(rejected);
        if options.debug {
            info!(valid = events.len(), rejected, "normalization complete");
        }

        // DEDUPLICATE
        emit(&self.progress, ProgressEvent::StageStarted { stage: PipelineStage::Deduplicate });
        let dedup = Deduplicator::new();
        let (mut events, collapsed) = dedup.collapse_batch(events);
        result.skipped_duplicates += collapsed;
        if !options.skip_deduplication && !events.is_empty() {
            // Candidates are fetched per city, and only for the dates that
            // actually occur in the batch.
            let mut scopes: HashMap<String, Vec<NaiveDate>> = HashMap::new();
            for event in &events {
                let dates = scopes.entry(event.city.clone()).or_default();
                if !dates.contains(&event.event_date()) {
                    dates.push(event.event_date());
                }
            }
            let mut persisted: Vec<EventRecord> = Vec::new();
            let mut fetch_failed = false;
            for (city, dates) in &scopes {
                match retry::with_backoff(&self.retry, || {
                    self.storage.get_events_by_dates(city, dates)
                })
                .await
                {
                    Ok(mut candidates) => persisted.append(&mut candidates),
                    Err(PipelineError::Unavailable { message }) => {
                        return self.finish_fatal(result, started, message).await;
                    }
                    Err(e) => {
                        fetch_failed = true;
                        warn!(city = %city, error = %e, "candidate fetch failed");
                    }
                }
            }
            if fetch_failed {
                warn!("continuing without complete persisted dedup");
            }
            let outcome = dedup.partition(events, &persisted);
            result.skipped_duplicates += outcome.skipped;
            events = outcome.unique_events;
        }
        obs::pipeline::duplicates_skipped(result.skipped_duplicates);

        // BATCH(VENUE_RESOLVE → PERSIST → CACHE_SYNC)
        emit(&self.progress, ProgressEvent::StageStarted { stage: PipelineStage::Batches });
        let resolver = VenueResolver::new(Arc::clone(&self.storage), options.dry_run);
        let batch_size = options.batch_size.max(1);
        let total_batches = events.len().div_ceil(batch_size);
        let mut fatal: Option<String> = None;

        'batches: for (batch_index, batch) in events.chunks(batch_size).enumerate() {
            let mut batch_inserted = 0usize;
            let mut batch_updated = 0usize;
            let mut batch_failed = 0usize;
            let mut persisted_in_batch: Vec<EventRecord> = Vec::with_capacity(batch.len());

            for event in batch {
                let mut event = event.clone();

                // VENUE_RESOLVE
                match retry::with_backoff(&self.retry, || {
                    resolver.resolve(&event.venue_name, event.venue_address.as_deref(), &event.city)
                })
                .await
                {
                    Ok(resolution) => {
                        event.venue_id = Some(resolution.id);
                        if resolution.is_new {
                            result.venues_created += 1;
                        } else {
                            result.venues_reused += 1;
                        }
                    }
                    Err(PipelineError::Unavailable { message }) => {
                        fatal = Some(message);
                        break 'batches;
                    }
                    Err(e) => {
                        result.failed += 1;
                        batch_failed += 1;
                        result
                            .errors
                            .push(format!("venue resolution for '{}': {e}", event.title));
                        obs::pipeline::events_failed();
                        continue;
                    }
                }

                // PERSIST
                if options.dry_run {
                    continue;
                }
                match self.persist_event(&event).await {
                    PersistOutcome::Inserted => {
                        result.inserted += 1;
                        batch_inserted += 1;
                        obs::pipeline::events_inserted();
                        persisted_in_batch.push(event);
                    }
                    PersistOutcome::Updated => {
                        result.updated += 1;
                        batch_updated += 1;
                        obs::pipeline::events_updated();
                        persisted_in_batch.push(event);
                    }
                    PersistOutcome::Failed(message) => {
                        result.failed += 1;
                        batch_failed += 1;
                        result.errors.push(message);
                        obs::pipeline::events_failed();
                    }
                    PersistOutcome::Fatal(message) => {
                        fatal = Some(message);
                        break 'batches;
                    }
                }
            }

            // CACHE_SYNC -- failures are warnings, never pipeline failures
            if options.sync_to_cache && !options.dry_run && !persisted_in_batch.is_empty() {
                self.sync_to_cache(&persisted_in_batch, &mut result).await;
            }

            emit(
                &self.progress,
                ProgressEvent::BatchCompleted {
                    index: batch_index + 1,
                    total: total_batches,
                    inserted: batch_inserted,
                    updated: batch_updated,
                    failed: batch_failed,
                },
            );
            if options.debug {
                info!(
                    batch = batch_index + 1,
                    total_batches,
                    inserted = batch_inserted,
                    updated = batch_updated,
                    failed = batch_failed,
                    "batch complete"
                );
            }
            if batch_index + 1 < total_batches && !self.inter_batch_pause.is_zero() {
                tokio::time::sleep(self.inter_batch_pause).await;
            }
        }

        if let Some(message) = fatal {
            return self.finish_fatal(result, started, message).await;
        }

        // POST_LINK -- best-effort safety net, never fails the pipeline
        emit(&self.progress, ProgressEvent::StageStarted { stage: PipelineStage::PostLink });
        if !options.dry_run {
            match post_link::link_unvenued_events(Arc::clone(&self.storage), &options.city, false)
                .await
            {
                Ok(stats) if stats.linked > 0 => {
                    info!(linked = stats.linked, "post-link pass attached venues");
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "post-link pass failed"),
            }
        }

        result.duration_millis = started.elapsed().as_millis() as u64;
        if !options.dry_run {
            self.record_run(options, started_at, &result).await;
        }
        emit(&self.progress, ProgressEvent::StageStarted { stage: PipelineStage::Done });
        info!(
            processed = result.processed,
            inserted = result.inserted,
            updated = result.updated,
            failed = result.failed,
            skipped_duplicates = result.skipped_duplicates,
            cached = result.cached,
            duration_ms = result.duration_millis,
            "✅ import pipeline finished"
        );
        result
    }

    async fn persist_event(&self, event: &EventRecord) -> PersistOutcome {
        let create = retry::with_backoff(&self.retry, || self.storage.create_event(event)).await;
        match create {
            Ok(()) => PersistOutcome::Inserted,
            Err(e) if e.is_conflict() => {
                // The unique (title, start, city) constraint fired: another
                // source already delivered this event. Merge ours in.
                match retry::with_backoff(&self.retry, || self.storage.update_event(event)).await {
                    Ok(()) => PersistOutcome::Updated,
                    Err(PipelineError::Unavailable { message }) => PersistOutcome::Fatal(message),
                    Err(e) => {
                        PersistOutcome::Failed(format!("update '{}': {e}", event.title))
                    }
                }
            }
            Err(PipelineError::Unavailable { message }) => PersistOutcome::Fatal(message),
            Err(e) => PersistOutcome::Failed(format!("persist '{}': {e}", event.title)),
        }
    }

    /// Mirror a batch of persisted events into the day buckets and the
    /// per-category cache, grouped by each event's own city and date. TTLs
    /// derive from the furthest-future event of each category set.
    async fn sync_to_cache(&self, events: &[EventRecord], result: &mut PipelineResult) {
        let mut by_city_date: HashMap<(String, NaiveDate), Vec<EventRecord>> = HashMap::new();
        for event in events {
            by_city_date
                .entry((event.city.clone(), event.event_date()))
                .or_default()
                .push(event.clone());
        }
        let now = Utc::now();
        for ((city, date), day_events) in by_city_date {
            let city = city.as_str();
            self.day_buckets.upsert_day_events(city, date, day_events);
            let Some(snapshot) = self.day_buckets.get_day_events(city, date) else {
                warn!(city, %date, "day bucket vanished during cache sync");
                continue;
            };
            for category in snapshot.category_index.keys() {
                let category_events: Vec<EventRecord> = snapshot
                    .events
                    .iter()
                    .filter(|e| &e.category == category)
                    .cloned()
                    .collect();
                let ttl = ttl_until_latest_event(&category_events, now);
                self.event_cache
                    .set_for_category(city, date, category, &category_events, ttl)
                    .await;
                result.cached += category_events.len();
            }
        }
    }

    async fn finish_fatal(
        &self,
        mut result: PipelineResult,
        started: Instant,
        message: String,
    ) -> PipelineResult {
        warn!(error = %message, "💥 pipeline aborted, persistence layer unreachable");
        result.success = false;
        result.errors.push(format!("persistence unavailable: {message}"));
        result.duration_millis = started.elapsed().as_millis() as u64;
        // No rollback: at-least-once semantics, the idempotent upsert absorbs
        // whatever was already written when the run is re-delivered.
        result
    }

    async fn record_run(
        &self,
        options: &PipelineOptions,
        started_at: chrono::DateTime<Utc>,
        result: &PipelineResult,
    ) {
        let run = ImportRunSummary {
            id: Uuid::new_v4(),
            source: options.source.clone(),
            city: options.city.clone(),
            started_at,
            finished_at: Utc::now(),
            processed: result.processed,
            inserted: result.inserted,
            updated: result.updated,
            failed: result.failed,
            skipped_duplicates: result.skipped_duplicates,
            success: result.success,
        };
        if let Err(e) = self.storage.record_run(&run).await {
            warn!(error = %e, "failed to record import run");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ves_core::domain::{EventSource, RawDateTime};
    use ves_core::storage::MemoryStorage;

    fn raw(title: &str, venue: &str, start: &str) -> RawEventInput {
        RawEventInput {
            title: Some(title.to_string()),
            description: None,
            start_date_time: Some(RawDateTime::Text(start.to_string())),
            end_date_time: None,
            venue_name: Some(venue.to_string()),
            venue_address: None,
            venue_city: None,
            category: Some("Clubs/Discos".to_string()),
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

    fn orchestrator(storage: Arc<MemoryStorage>) -> PipelineOrchestrator {
        PipelineOrchestrator::new(
            storage,
            Arc::new(DayBucketEngine::new()),
            EventCache::with_capacity(100),
        )
        .with_retry_policy(RetryPolicy::immediate(3))
        .with_inter_batch_pause(Duration::ZERO)
    }

    #[tokio::test]
    async fn transient_write_faults_are_retried_through() {
        let storage = Arc::new(MemoryStorage::new());
        storage.fail_next_writes(1);
        let pipeline = orchestrator(storage.clone());

        let result = pipeline
            .run(
                vec![raw("Soundtrip", "Flex", "2025-09-02T23:00:00Z")],
                &PipelineOptions::for_source("scraper"),
            )
            .await;

        assert!(result.success);
        // the injected fault hit venue creation; retry absorbed it
        assert_eq!(result.inserted, 1);
        assert_eq!(result.failed, 0);
        assert_eq!(storage.event_count().await, 1);
    }

    #[tokio::test]
    async fn unreachable_storage_is_fatal_with_partial_counters() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set_unavailable(true);
        let pipeline = orchestrator(storage.clone());

        let result = pipeline
            .run(
                vec![raw("Soundtrip", "Flex", "2025-09-02T23:00:00Z")],
                &PipelineOptions::for_source("scraper"),
            )
            .await;

        assert!(!result.success);
        assert_eq!(result.processed, 1);
        assert!(!result.errors.is_empty());
    }
}
