use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use ves_core::domain::ids::normalize_component;
use ves_core::storage::Storage;
use ves_core::Result;

use super::worker_pool;

/// Outcome of one venue-link repair pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub linked: usize,
    pub not_found: usize,
    pub errors: usize,
}

const LINK_CONCURRENCY: usize = 4;

/// Re-attempt venue linkage for events left without a venue id.
///
/// This is a safety net around the primary pipeline, not part of its happy
/// path: it is idempotent, runs independently (own CLI subcommand), and is
/// also fired best-effort after each import.
pub async fn link_unvenued_events(
    storage: Arc<dyn Storage>,
    city: &str,
    dry_run: bool,
) -> Result<LinkStats> {
    let venues = storage.get_all_venues(city).await?;
    let venue_by_name: HashMap<String, Uuid> = venues
        .iter()
        .map(|v| (normalize_component(&v.name), v.id))
        .collect();
    if venue_by_name.is_empty() {
        debug!(city, "no venues known, nothing to link");
        return Ok(LinkStats::default());
    }

    let unlinked = storage.get_unlinked_events(city).await?;
    if unlinked.is_empty() {
        return Ok(LinkStats::default());
    }
    info!(city, count = unlinked.len(), "re-linking events without a venue");

    let jobs: Vec<(String, Option<Uuid>)> = unlinked
        .into_iter()
        .map(|event| {
            let venue_id = venue_by_name
                .get(&normalize_component(&event.venue_name))
                .copied();
            (event.id, venue_id)
        })
        .collect();

    let storage_for_workers = Arc::clone(&storage);
    let outcomes = worker_pool::run_bounded(LINK_CONCURRENCY, jobs, move |(event_id, venue_id)| {
        let storage = Arc::clone(&storage_for_workers);
        async move {
            let Some(venue_id) = venue_id else {
                return LinkOutcome::NotFound;
            };
            if dry_run {
                return LinkOutcome::Linked;
            }
            match storage.link_event_venue(&event_id, venue_id).await {
                Ok(()) => LinkOutcome::Linked,
                Err(e) => {
                    warn!(event_id = %event_id, error = %e, "failed to link event to venue");
                    LinkOutcome::Failed
                }
            }
        }
    })
    .await;

    let mut stats = LinkStats::default();
    for outcome in outcomes {
        match outcome {
            LinkOutcome::Linked => stats.linked += 1,
            LinkOutcome::NotFound => stats.not_found += 1,
            LinkOutcome::Failed => stats.errors += 1,
        }
    }
    info!(
        linked = stats.linked,
        not_found = stats.not_found,
        errors = stats.errors,
        "venue link pass complete"
    );
    Ok(stats)
}

enum LinkOutcome {
    Linked,
    NotFound,
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeSet;
    use ves_core::domain::{EventRecord, VenueRecord};
    use ves_core::storage::MemoryStorage;

    fn event(id: &str, venue: &str) -> EventRecord {
        EventRecord {
            id: id.to_string(),
            title: format!("Event {id}"),
            description: None,
            category: "Event".to_string(),
            start_date_time: Utc.with_ymd_and_hms(2025, 9, 2, 20, 0, 0).unwrap(),
            end_date_time: None,
            venue_name: venue.to_string(),
            venue_address: None,
            venue_id: None,
            city: "Wien".to_string(),
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

    #[tokio::test]
    async fn links_by_normalized_name_and_is_idempotent() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .create_venue(&VenueRecord {
                id: Uuid::new_v4(),
                name: "Grelle Forelle".to_string(),
                address: None,
                city: "Wien".to_string(),
                slug: "grelle-forelle-wien-abc123".to_string(),
            })
            .await
            .unwrap();
        storage.create_event(&event("e1", "GRELLE  FORELLE")).await.unwrap();
        storage.create_event(&event("e2", "Unknown Cellar")).await.unwrap();

        let stats = link_unvenued_events(storage.clone(), "Wien", false)
            .await
            .unwrap();
        assert_eq!(
            stats,
            LinkStats {
                linked: 1,
                not_found: 1,
                errors: 0
            }
        );

        // Second pass finds nothing left to do for the linked event.
        let again = link_unvenued_events(storage, "Wien", false).await.unwrap();
        assert_eq!(again.linked, 0);
        assert_eq!(again.not_found, 1);
    }

    #[tokio::test]
    async fn dry_run_does_not_mutate() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .create_venue(&VenueRecord {
                id: Uuid::new_v4(),
                name: "Flex".to_string(),
                address: None,
                city: "Wien".to_string(),
                slug: "flex-wien-abc123".to_string(),
            })
            .await
            .unwrap();
        storage.create_event(&event("e1", "Flex")).await.unwrap();

        let stats = link_unvenued_events(storage.clone(), "Wien", true)
            .await
            .unwrap();
        assert_eq!(stats.linked, 1);
        // still unlinked in storage
        assert_eq!(storage.get_unlinked_events("Wien").await.unwrap().len(), 1);
    }
}
