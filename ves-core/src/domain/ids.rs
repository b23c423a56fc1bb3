use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// Stable event identifier: sha-256 over the identity fields, truncated to
/// 16 hex chars. Re-importing the same event from any source yields the same
/// id, which is what makes day-bucket upserts and re-deliveries idempotent.
pub fn stable_event_id(
    title: &str,
    venue_name: &str,
    start: &DateTime<Utc>,
    city: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_component(title));
    hasher.update(b"|");
    hasher.update(normalize_component(venue_name));
    hasher.update(b"|");
    hasher.update(start.to_rfc3339());
    hasher.update(b"|");
    hasher.update(normalize_component(city));
    let digest = hasher.finalize();
    hex::encode(&digest[..8])
}

/// Lowercase and collapse internal whitespace so formatting noise in titles
/// and venue names does not fork identities.
pub fn normalize_component(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
