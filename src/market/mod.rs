//! Market-data collaborators that produce one [`MarketBatch`] per cycle.

mod finnhub;
mod types;

pub use finnhub::{percent_change, FinnhubClient};
pub use types::*;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::MarketBatch;

/// Source of per-cycle market observations.
///
/// How the batch is gathered (sequentially, concurrently, from a file) is
/// up to the implementation; the trading cycle only sees the finished batch.
/// `held` lists symbols with open positions: a live source must quote them
/// every cycle whether or not they pass its mover filter.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn fetch_batch(&self, held: &[String]) -> Result<MarketBatch>;
}

/// Replays a fixed batch. Used for `--input` runs and tests.
pub struct StaticSource {
    batch: MarketBatch,
}

impl StaticSource {
    pub fn new(batch: MarketBatch) -> Self {
        Self { batch }
    }

    /// Load a batch from a JSON file (`{observations, marketContext}` or a bare array).
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        use anyhow::Context;

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let batch = match serde_json::from_str::<MarketBatch>(&raw) {
            Ok(batch) => batch,
            Err(_) => MarketBatch::new(
                serde_json::from_str(&raw).context("Failed to parse observations")?,
                None,
            ),
        };
        Ok(Self::new(batch))
    }
}

#[async_trait]
impl MarketDataSource for StaticSource {
    /// The file is replayed as written; held symbols it lacks are not marked.
    async fn fetch_batch(&self, _held: &[String]) -> Result<MarketBatch> {
        Ok(self.batch.clone())
    }
}
