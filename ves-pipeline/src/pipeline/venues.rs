use rand::distributions::Alphanumeric;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use ves_core::domain::ids::normalize_component;
use ves_core::domain::VenueRecord;
use ves_core::storage::Storage;
use ves_core::Result;

use crate::observability::metrics as obs;

/// Outcome of a venue resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VenueResolution {
    pub id: Uuid,
    pub is_new: bool,
}

/// URL-safe slug: lowercase alphanumerics with single dashes.
pub fn slugify(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    let mut last_dash = true;
    for c in value.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    slug.trim_end_matches('-').to_string()
}

fn random_suffix() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(|c| (c as char).to_ascii_lowercase())
        .collect()
}

/// Find-or-create venue resolution, guaranteeing one id per (name, city)
/// within a pipeline run.
///
/// Lookup-then-create against the external store is not atomic, so two
/// concurrent imports of a brand-new venue can race; the per-run memo keeps
/// one process from racing itself, and a create that loses to a concurrent
/// writer falls back to the winner's row via re-lookup.
pub struct VenueResolver {
    storage: Arc<dyn Storage>,
    dry_run: bool,
    memo: Mutex<HashMap<(String, String), VenueResolution>>,
}

impl VenueResolver {
    pub fn new(storage: Arc<dyn Storage>, dry_run: bool) -> Self {
        Self {
            storage,
            dry_run,
            memo: Mutex::new(HashMap::new()),
        }
    }

    pub async fn resolve(
        &self,
        name: &str,
        address: Option<&str>,
        city: &str,
    ) -> Result<VenueResolution> {
        let memo_key = (normalize_component(name), normalize_component(city));
        {
            let memo = self.memo.lock().await;
            if let Some(hit) = memo.get(&memo_key) {
                obs::pipeline::venues_reused();
                return Ok(VenueResolution {
                    id: hit.id,
                    is_new: false,
                });
            }
        }

        if self.dry_run {
            // Deterministic placeholder id; storage is never touched.
            let id = Uuid::new_v5(
                &Uuid::NAMESPACE_OID,
                format!("{}|{}", memo_key.0, memo_key.1).as_bytes(),
            );
            let resolution = VenueResolution { id, is_new: true };
            self.memo.lock().await.insert(memo_key, resolution);
            return Ok(resolution);
        }

        if let Some(existing) = self.storage.get_venue_by_name_city(name, city).await? {
            let resolution = VenueResolution {
                id: existing.id,
                is_new: false,
            };
            self.memo.lock().await.insert(memo_key, resolution);
            obs::pipeline::venues_reused();
            return Ok(resolution);
        }

        let venue = VenueRecord {
            id: Uuid::new_v4(),
            name: name.to_string(),
            address: address.map(str::to_string),
            city: city.to_string(),
            slug: format!("{}-{}-{}", slugify(name), slugify(city), random_suffix()),
        };
        match self.storage.create_venue(&venue).await {
            Ok(()) => {
                debug!(venue = %venue.name, city = %venue.city, slug = %venue.slug, "created venue");
                let resolution = VenueResolution {
                    id: venue.id,
                    is_new: true,
                };
                self.memo.lock().await.insert(memo_key, resolution);
                obs::pipeline::venues_created();
                Ok(resolution)
            }
            Err(e) if e.is_conflict() => {
                // Lost the create race; the row now exists, use it.
                let existing = self
                    .storage
                    .get_venue_by_name_city(name, city)
                    .await?
                    .ok_or(e)?;
                let resolution = VenueResolution {
                    id: existing.id,
                    is_new: false,
                };
                self.memo.lock().await.insert(memo_key, resolution);
                obs::pipeline::venues_reused();
                Ok(resolution)
            }
            Err(e) => Err(e),
        }
    }
}
