// src/lib.rs
// Public library surface for the daemon, integration tests and site adapters.

pub mod adapters;
pub mod cache;
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod fetch;
pub mod metrics;
pub mod ops;
pub mod registry;
pub mod scheduler;
pub mod source;
pub mod transform;

// ---- Re-exports for stable public API ----
pub use crate::cache::{CacheStats, PersistentCache};
pub use crate::clock::{Clock, FixedClock, SystemClock};
pub use crate::context::HarvestContext;
pub use crate::error::{SourceError, TransformError, TransportError};
pub use crate::fetch::{FetchSettings, RateLimiter, RetryingFetcher, Transport};
pub use crate::registry::{AggregateStats, HealthCheckReport, RunOutcome, SourceRegistry};
pub use crate::source::{
    adapter_fn, AdapterContext, NormalizedEvent, RawRecord, SourceAdapter, SourceConfig, SourceHealth,
    SourceRunner, SourceSpec,
};
pub use crate::transform::{DefaultTransformer, EventTransformer};
