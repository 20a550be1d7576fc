// src/source/adapter.rs
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::SourceError;
use crate::fetch::RetryingFetcher;
use crate::source::{RawRecord, SourceConfig};

/// What an adapter gets to work with for one run.
#[derive(Debug, Clone)]
pub struct AdapterContext {
    /// Rate-limited, retrying fetch capability for this source.
    pub fetcher: RetryingFetcher,
    pub config: Arc<SourceConfig>,
}

/// Site-specific extraction plug-in. How records are obtained (HTML,
/// JSON API, PDF, ...) is up to the adapter; only the output shape matters.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    async fn fetch_records(&self, ctx: AdapterContext) -> Result<Vec<RawRecord>, SourceError>;
}

/// Adapter backed by an async closure. Build with [`adapter_fn`].
pub struct FnAdapter<F> {
    f: F,
}

/// Wrap an async closure as a [`SourceAdapter`].
///
/// ```ignore
/// let adapter = adapter_fn(|ctx: AdapterContext| async move {
///     let body = ctx.fetcher.fetch_text(&ctx.config.base_url).await?;
///     Ok(parse_calendar(&body))
/// });
/// ```
pub fn adapter_fn<F, Fut>(f: F) -> FnAdapter<F>
where
    F: Fn(AdapterContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<RawRecord>, SourceError>> + Send + 'static,
{
    FnAdapter { f }
}

#[async_trait]
impl<F, Fut> SourceAdapter for FnAdapter<F>
where
    F: Fn(AdapterContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<RawRecord>, SourceError>> + Send + 'static,
{
    async fn fetch_records(&self, ctx: AdapterContext) -> Result<Vec<RawRecord>, SourceError> {
        (self.f)(ctx).await
    }
}

/// A source as data: its configuration plus the adapter that scrapes it.
#[derive(Clone)]
pub struct SourceSpec {
    pub config: SourceConfig,
    pub adapter: Arc<dyn SourceAdapter>,
}

impl SourceSpec {
    pub fn new(config: SourceConfig, adapter: impl SourceAdapter + 'static) -> Self {
        Self {
            config,
            adapter: Arc::new(adapter),
        }
    }
}

impl std::fmt::Debug for SourceSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceSpec")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
