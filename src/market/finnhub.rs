//! Finnhub client: quotes, news sentiment, and the mover scan.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use chrono::{TimeZone, Utc};
use futures::future::join_all;
use reqwest::{Client, StatusCode};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::config::MarketConfig;
use crate::models::{MarketBatch, MarketContext, MarketObservation};

use super::types::{NewsSentimentResponse, QuoteResponse};
use super::MarketDataSource;

const MAX_RETRY_ELAPSED: Duration = Duration::from_secs(20);

/// Percent change from `previous` to `current` (1.5 = +1.5%).
pub fn percent_change(current: Decimal, previous: Decimal) -> Option<f64> {
    if previous <= Decimal::ZERO {
        return None;
    }
    ((current - previous) / previous * Decimal::ONE_HUNDRED).to_f64()
}

/// Client for the Finnhub REST API.
pub struct FinnhubClient {
    client: Client,
    base_url: String,
    api_key: String,
    config: MarketConfig,
}

impl FinnhubClient {
    pub fn new(api_key: String, config: MarketConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            config,
        })
    }

    /// GET with exponential backoff on timeouts, 429 and 5xx.
    async fn get_json<T: DeserializeOwned>(&self, path: &str, symbol: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let url = url.as_str();
        let api_key = self.api_key.as_str();
        let client = &self.client;
        let policy = ExponentialBackoffBuilder::new()
            .with_max_elapsed_time(Some(MAX_RETRY_ELAPSED))
            .build();

        let response = backoff::future::retry(policy, move || {
            let request = client
                .get(url)
                .query(&[("symbol", symbol), ("token", api_key)]);

            async move {
                let response = request.send().await.map_err(|e| {
                    if e.is_timeout() || e.is_connect() {
                        backoff::Error::transient(anyhow::Error::from(e))
                    } else {
                        backoff::Error::permanent(anyhow::Error::from(e))
                    }
                })?;

                let status = response.status();
                if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                    debug!(url = %url, status = %status, "Retrying request");
                    return Err(backoff::Error::transient(anyhow::anyhow!(
                        "{} returned {}",
                        path,
                        status
                    )));
                }
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    return Err(backoff::Error::permanent(anyhow::anyhow!(
                        "{} request failed: {} - {}",
                        path,
                        status,
                        body
                    )));
                }
                Ok(response)
            }
        })
        .await
        .with_context(|| format!("Failed to fetch {} for {}", path, symbol))?;

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response", path))
    }

    /// Latest quote as an observation. Zero prices are rejected.
    pub async fn get_quote(&self, symbol: &str) -> Result<MarketObservation> {
        let quote: QuoteResponse = self.get_json("/quote", symbol).await?;

        if quote.current <= Decimal::ZERO {
            anyhow::bail!("No quote for {}", symbol);
        }
        let change = percent_change(quote.current, quote.previous_close)
            .with_context(|| format!("No previous close for {}", symbol))?;

        let mut observation = MarketObservation::new(symbol, quote.current, change);
        if let Some(time) = quote
            .timestamp
            .and_then(|t| Utc.timestamp_opt(t, 0).single())
        {
            observation.time = time;
        }
        Ok(observation)
    }

    /// Net news sentiment in [-1, 1]; neutral 0 when unavailable.
    pub async fn get_sentiment(&self, symbol: &str) -> f64 {
        match self
            .get_json::<NewsSentimentResponse>("/news-sentiment", symbol)
            .await
        {
            Ok(resp) => resp.net_sentiment(),
            Err(e) => {
                debug!(symbol = %symbol, error = %e, "Sentiment unavailable, using neutral");
                0.0
            }
        }
    }

    async fn market_context(&self) -> Option<MarketContext> {
        let benchmark = self.config.benchmark_symbol.as_deref()?;
        match self.get_quote(benchmark).await {
            Ok(quote) => Some(MarketContext {
                change_percent: quote.change_percent,
            }),
            Err(e) => {
                warn!(symbol = %benchmark, error = %e, "Benchmark quote failed");
                None
            }
        }
    }
}

/// Symbols to quote this cycle: the configured candidates, then any held
/// symbol outside that list.
fn scan_symbols(candidates: &[String], held: &[String]) -> Vec<String> {
    let mut symbols = candidates.to_vec();
    for symbol in held {
        if !symbols.contains(symbol) {
            symbols.push(symbol.clone());
        }
    }
    symbols
}

/// Keep movers above `min_move_pct`, plus every held symbol regardless of move.
fn select_observations(
    quotes: Vec<MarketObservation>,
    held: &[String],
    min_move_pct: f64,
) -> Vec<MarketObservation> {
    quotes
        .into_iter()
        .filter(|obs| held.contains(&obs.symbol) || obs.change_percent.abs() > min_move_pct)
        .collect()
}

#[async_trait]
impl MarketDataSource for FinnhubClient {
    /// Quote every candidate and held symbol, keep the movers and holdings,
    /// attach sentiment and context.
    async fn fetch_batch(&self, held: &[String]) -> Result<MarketBatch> {
        let symbols = scan_symbols(&self.config.symbols, held);
        let results = join_all(symbols.iter().map(|s| self.get_quote(s))).await;

        let quotes: Vec<MarketObservation> = symbols
            .iter()
            .zip(results)
            .filter_map(|(symbol, result)| match result {
                Ok(obs) => Some(obs),
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "Quote failed, skipping");
                    None
                }
            })
            .collect();
        let selected = select_observations(quotes, held, self.config.min_move_pct);

        let sentiments = join_all(selected.iter().map(|o| self.get_sentiment(&o.symbol))).await;
        let observations: Vec<MarketObservation> = selected
            .into_iter()
            .zip(sentiments)
            .map(|(obs, sentiment)| obs.with_sentiment(sentiment))
            .collect();

        let market_context = self.market_context().await;

        info!(
            candidates = symbols.len(),
            held = held.len(),
            observations = observations.len(),
            market_change = ?market_context.map(|c| c.change_percent),
            "Market scan complete"
        );

        Ok(MarketBatch::new(observations, market_context))
    }
}
