use crate::common::error::Result;
use crate::domain::*;
use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

/// Storage trait for the external event/venue store. The relational engine
/// behind it is a collaborator of the pipeline, not part of it; everything
/// the pipeline needs is expressed here.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Insert a new event. Returns `PipelineError::Conflict` when the unique
    /// (title, start, city) constraint fires.
    async fn create_event(&self, event: &EventRecord) -> Result<()>;
    async fn update_event(&self, event: &EventRecord) -> Result<()>;

    /// Candidate fetch for deduplication, scoped to the dates present in a
    /// batch rather than the whole store.
    async fn get_events_by_dates(
        &self,
        city: &str,
        dates: &[NaiveDate],
    ) -> Result<Vec<EventRecord>>;

    // Venue operations
    async fn get_venue_by_name_city(
        &self,
        name: &str,
        city: &str,
    ) -> Result<Option<VenueRecord>>;
    async fn create_venue(&self, venue: &VenueRecord) -> Result<()>;

    // Venue-link repair
    async fn get_unlinked_events(&self, city: &str) -> Result<Vec<EventRecord>>;
    async fn link_event_venue(&self, event_id: &str, venue_id: Uuid) -> Result<()>;
    async fn get_all_venues(&self, city: &str) -> Result<Vec<VenueRecord>>;

    // Run auditing
    async fn record_run(&self, run: &ImportRunSummary) -> Result<()>;
    async fn run_history(&self, limit: usize) -> Result<Vec<ImportRunSummary>>;
}
