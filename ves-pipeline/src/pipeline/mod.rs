pub mod dedupe;
pub mod normalize;
pub mod orchestrator;
pub mod post_link;
pub mod progress;
pub mod rate_limiter;
pub mod retry;
pub mod venues;
pub mod worker_pool;

pub use orchestrator::{PipelineOptions, PipelineOrchestrator};
