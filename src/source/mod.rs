// src/source/mod.rs
//! Per-source execution: data model, adapter seam, runner.

pub mod adapter;
pub mod id;
pub mod runner;
pub mod types;

pub use adapter::{adapter_fn, AdapterContext, FnAdapter, SourceAdapter, SourceSpec};
pub use runner::{SourceRunner, FAILURE_THRESHOLD};
pub use types::{
    BillRef, NormalizedEvent, RateLimitOverride, RawRecord, ReliabilityTier, SourceConfig, SourceHealth,
};
