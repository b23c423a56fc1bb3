use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

/// Sentinel category token for combined "every category" lookups.
pub const ALL_CATEGORIES: &str = "all";

/// Alias table mapping the category spellings seen across sources onto the
/// canonical names. Lookup is case-insensitive; unknown inputs pass through
/// unchanged.
static CATEGORY_ALIASES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        // Electronic music
        ("techno", "DJ Sets/Electronic"),
        ("electronic", "DJ Sets/Electronic"),
        ("elektronik", "DJ Sets/Electronic"),
        ("dj", "DJ Sets/Electronic"),
        ("dj sets", "DJ Sets/Electronic"),
        ("dj sets/electronic", "DJ Sets/Electronic"),
        ("dj sets-electronic", "DJ Sets/Electronic"),
        // Club nights
        ("club", "Clubs/Discos"),
        ("clubs", "Clubs/Discos"),
        ("clubbing", "Clubs/Discos"),
        ("disco", "Clubs/Discos"),
        ("discos", "Clubs/Discos"),
        ("clubs/discos", "Clubs/Discos"),
        ("clubs-discos", "Clubs/Discos"),
        // Live music
        ("konzert", "Live Music"),
        ("konzerte", "Live Music"),
        ("concert", "Live Music"),
        ("concerts", "Live Music"),
        ("live", "Live Music"),
        ("live music", "Live Music"),
        ("livemusik", "Live Music"),
        // Parties
        ("party", "Partys"),
        ("partys", "Partys"),
        ("parties", "Partys"),
        // Stage
        ("theater", "Theater/Bühne"),
        ("theatre", "Theater/Bühne"),
        ("bühne", "Theater/Bühne"),
        ("kabarett", "Theater/Bühne"),
        // Film
        ("kino", "Film/Kino"),
        ("cinema", "Film/Kino"),
        ("film", "Film/Kino"),
        // Exhibitions
        ("ausstellung", "Ausstellungen"),
        ("ausstellungen", "Ausstellungen"),
        ("exhibition", "Ausstellungen"),
        ("museum", "Ausstellungen"),
        // Markets
        ("markt", "Märkte"),
        ("märkte", "Märkte"),
        ("market", "Märkte"),
        // Festivals
        ("festival", "Festivals"),
        ("festivals", "Festivals"),
        // Food
        ("kulinarik", "Kulinarik"),
        ("food", "Kulinarik"),
        ("essen", "Kulinarik"),
    ])
});

static DATE_SEGMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d{4}-\d{2}-\d{2}").expect("valid date regex"));

/// Resolve a category name variant to its canonical form. Unknown strings
/// pass through unchanged; this never fails.
pub fn normalize_category(input: &str) -> String {
    let trimmed = input.trim();
    let lookup = trimmed.to_lowercase();
    match CATEGORY_ALIASES.get(lookup.as_str()) {
        Some(canonical) => (*canonical).to_string(),
        None => trimmed.to_string(),
    }
}

fn normalize_city(city: &str) -> String {
    city.trim().to_lowercase()
}

/// Build the textual cache key `<city-lower>_<YYYY-MM-DD>_<token>`.
///
/// Categories are normalized, sorted, and comma-joined so the key is
/// invariant under list reordering; an absent or empty list collapses to the
/// `all` sentinel. The exact text is a persisted contract parsed by external
/// statistics tooling.
pub fn create_key(city: &str, date: NaiveDate, categories: Option<&[String]>) -> String {
    let token = match categories {
        Some(cats) if !cats.is_empty() => {
            let mut normalized: Vec<String> =
                cats.iter().map(|c| normalize_category(c)).collect();
            normalized.sort();
            normalized.dedup();
            normalized.join(",")
        }
        _ => ALL_CATEGORIES.to_string(),
    };
    format!("{}_{}_{}", normalize_city(city), date.format("%Y-%m-%d"), token)
}

/// Single-category specialization of [`create_key`]. Agrees byte-for-byte
/// with the category segment `create_key` would produce for a one-element
/// list, so legacy combined lookups and per-category lookups never diverge.
pub fn create_key_for_category(city: &str, date: NaiveDate, category: &str) -> String {
    format!(
        "{}_{}_{}",
        normalize_city(city),
        date.format("%Y-%m-%d"),
        normalize_category(category)
    )
}

/// Decoded form of a cache key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedKey {
    pub city: String,
    pub date: NaiveDate,
    /// Empty for the `all` sentinel.
    pub categories: Vec<String>,
}

/// Typed decoder for the key contract. Locates the date segment and treats
/// everything before the preceding underscore as the city, so city names
/// containing underscores parse correctly. Internal code goes through this
/// instead of hand-parsing key strings.
pub fn decode_key(key: &str) -> Option<DecodedKey> {
    let m = DATE_SEGMENT.find(key)?;
    if m.start() < 2 || key.as_bytes().get(m.start() - 1) != Some(&b'_') {
        return None;
    }
    let city = &key[..m.start() - 1];
    let date = NaiveDate::parse_from_str(m.as_str(), "%Y-%m-%d").ok()?;
    let rest = &key[m.end()..];
    let token = rest.strip_prefix('_')?;
    if city.is_empty() || token.is_empty() {
        return None;
    }
    let categories = if token == ALL_CATEGORIES {
        Vec::new()
    } else {
        token.split(',').map(|s| s.to_string()).collect()
    };
    Some(DecodedKey {
        city: city.to_string(),
        date,
        categories,
    })
}
