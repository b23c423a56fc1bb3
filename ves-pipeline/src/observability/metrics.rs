//! Counter helpers for the cache and pipeline, following standard
//! Prometheus naming. Exporter wiring is left to the composing application.

/// Cache layer counters.
pub mod cache {
    use metrics::counter;

    pub fn hit() {
        counter!("ves_cache_hits_total").increment(1);
    }

    pub fn miss() {
        counter!("ves_cache_misses_total").increment(1);
    }

    pub fn eviction() {
        counter!("ves_cache_evictions_total").increment(1);
    }

    pub fn expired() {
        counter!("ves_cache_expired_total").increment(1);
    }

    pub fn corrupt() {
        counter!("ves_cache_corrupt_entries_total").increment(1);
    }
}

/// Pipeline outcome counters.
pub mod pipeline {
    use metrics::counter;

    pub fn records_processed(n: usize) {
        counter!("ves_pipeline_records_processed_total").increment(n as u64);
    }

    pub fn records_rejected(n: usize) {
        counter!("ves_pipeline_records_rejected_total").increment(n as u64);
    }

    pub fn events_inserted() {
        counter!("ves_pipeline_events_inserted_total").increment(1);
    }

    pub fn events_updated() {
        counter!("ves_pipeline_events_updated_total").increment(1);
    }

    pub fn events_failed() {
        counter!("ves_pipeline_events_failed_total").increment(1);
    }

    pub fn duplicates_skipped(n: usize) {
        counter!("ves_pipeline_duplicates_skipped_total").increment(n as u64);
    }

    pub fn venues_created() {
        counter!("ves_pipeline_venues_created_total").increment(1);
    }

    pub fn venues_reused() {
        counter!("ves_pipeline_venues_reused_total").increment(1);
    }
}
