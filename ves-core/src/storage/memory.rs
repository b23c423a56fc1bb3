use crate::common::error::{PipelineError, Result};
use crate::domain::ids::normalize_component;
use crate::domain::*;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// In-memory storage backing tests, dry runs, and the demo CLI wiring.
/// Behaves like the real store where it matters to the pipeline: the unique
/// (title, start, city) constraint fires as `Conflict`, and writes can be
/// made to fail on demand to exercise retry and isolation paths.
#[derive(Default)]
pub struct MemoryStorage {
    events: RwLock<HashMap<String, EventRecord>>,
    venues: RwLock<HashMap<Uuid, VenueRecord>>,
    venue_index: RwLock<HashMap<(String, String), Uuid>>,
    runs: RwLock<Vec<ImportRunSummary>>,
    fail_writes: AtomicUsize,
    unavailable: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` write operations fail with a transient error.
    pub fn fail_next_writes(&self, n: usize) {
        self.fail_writes.store(n, Ordering::SeqCst);
    }

    /// Simulate the persistence layer being unreachable entirely.
    pub fn set_unavailable(&self, down: bool) {
        self.unavailable.store(down, Ordering::SeqCst);
    }

    pub async fn event_count(&self) -> usize {
        self.events.read().await.len()
    }

    pub async fn venue_count(&self) -> usize {
        self.venues.read().await.len()
    }

    fn check_write_fault(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(PipelineError::Unavailable {
                message: "storage offline".to_string(),
            });
        }
        let remaining = self.fail_writes.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_writes.store(remaining - 1, Ordering::SeqCst);
            return Err(PipelineError::Storage {
                message: "injected write fault".to_string(),
            });
        }
        Ok(())
    }

    fn check_read_fault(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(PipelineError::Unavailable {
                message: "storage offline".to_string(),
            });
        }
        Ok(())
    }

    fn unique_key(event: &EventRecord) -> (String, i64, String) {
        (
            normalize_component(&event.title),
            event.start_date_time.timestamp(),
            normalize_component(&event.city),
        )
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn create_event(&self, event: &EventRecord) -> Result<()> {
        self.check_write_fault()?;
        let mut events = self.events.write().await;
        if events.contains_key(&event.id) {
            return Err(PipelineError::Conflict(event.id.clone()));
        }
        let key = Self::unique_key(event);
        if events.values().any(|e| Self::unique_key(e) == key) {
            debug!(title = %event.title, "unique (title, start, city) constraint hit");
            return Err(PipelineError::Conflict(format!(
                "{} @ {}",
                event.title, event.start_date_time
            )));
        }
        events.insert(event.id.clone(), event.clone());
        Ok(())
    }

    async fn update_event(&self, event: &EventRecord) -> Result<()> {
        self.check_write_fault()?;
        let mut events = self.events.write().await;
        match events.get_mut(&event.id) {
            Some(existing) => {
                existing.absorb(event);
                Ok(())
            }
            None => {
                // Upsert semantics: an update for an id delivered by another
                // writer lands as an insert.
                events.insert(event.id.clone(), event.clone());
                Ok(())
            }
        }
    }

    async fn get_events_by_dates(
        &self,
        city: &str,
        dates: &[NaiveDate],
    ) -> Result<Vec<EventRecord>> {
        self.check_read_fault()?;
        let city_norm = normalize_component(city);
        let events = self.events.read().await;
        Ok(events
            .values()
            .filter(|e| {
                normalize_component(&e.city) == city_norm && dates.contains(&e.event_date())
            })
            .cloned()
            .collect())
    }

    async fn get_venue_by_name_city(
        &self,
        name: &str,
        city: &str,
    ) -> Result<Option<VenueRecord>> {
        self.check_read_fault()?;
        let key = (normalize_component(name), normalize_component(city));
        let index = self.venue_index.read().await;
        let Some(id) = index.get(&key).copied() else {
            return Ok(None);
        };
        Ok(self.venues.read().await.get(&id).cloned())
    }

    async fn create_venue(&self, venue: &VenueRecord) -> Result<()> {
        self.check_write_fault()?;
        let key = (
            normalize_component(&venue.name),
            normalize_component(&venue.city),
        );
        let mut index = self.venue_index.write().await;
        if index.contains_key(&key) {
            return Err(PipelineError::Conflict(venue.name.clone()));
        }
        index.insert(key, venue.id);
        self.venues.write().await.insert(venue.id, venue.clone());
        Ok(())
    }

    async fn get_unlinked_events(&self, city: &str) -> Result<Vec<EventRecord>> {
        self.check_read_fault()?;
        let city_norm = normalize_component(city);
        let events = self.events.read().await;
        Ok(events
            .values()
            .filter(|e| e.venue_id.is_none() && normalize_component(&e.city) == city_norm)
            .cloned()
            .collect())
    }

    async fn link_event_venue(&self, event_id: &str, venue_id: Uuid) -> Result<()> {
        self.check_write_fault()?;
        let mut events = self.events.write().await;
        match events.get_mut(event_id) {
            Some(event) => {
                event.venue_id = Some(venue_id);
                Ok(())
            }
            None => Err(PipelineError::Storage {
                message: format!("unknown event id {event_id}"),
            }),
        }
    }

    async fn get_all_venues(&self, city: &str) -> Result<Vec<VenueRecord>> {
        self.check_read_fault()?;
        let city_norm = normalize_component(city);
        let venues = self.venues.read().await;
        Ok(venues
            .values()
            .filter(|v| normalize_component(&v.city) == city_norm)
            .cloned()
            .collect())
    }

    async fn record_run(&self, run: &ImportRunSummary) -> Result<()> {
        self.check_write_fault()?;
        self.runs.write().await.push(run.clone());
        Ok(())
    }

    async fn run_history(&self, limit: usize) -> Result<Vec<ImportRunSummary>> {
        self.check_read_fault()?;
        let runs = self.runs.read().await;
        let mut out: Vec<ImportRunSummary> = runs.iter().rev().take(limit).cloned().collect();
        out.sort_by_key(|r| std::cmp::Reverse(r.started_at));
        Ok(out)
    }
}
