pub mod day_bucket;
pub mod event_cache;
pub mod keys;
pub mod store;

pub use day_bucket::DayBucketEngine;
pub use event_cache::EventCache;
pub use store::{CacheBackend, CacheStore, MemoryBackend, StoredEntry};
