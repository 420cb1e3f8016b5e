use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{PricePoint, PriceSeries, TimeRange, Token};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::{grid_timestamps, PriceSeriesSource, SeriesResult};

pub const DEFAULT_VOLATILITY: f64 = 0.03;
const MAX_VOLATILITY: f64 = 0.5;

/// Mock chart feed: multiplicative random walk starting from the token's current price.
/// Every step moves the price by at most `volatility` in either direction.
#[derive(Debug, Clone)]
pub struct RandomWalkSource {
    volatility: f64,
    seed: Option<u64>,
    latency: Duration,
}

impl Default for RandomWalkSource {
    fn default() -> Self {
        Self {
            volatility: DEFAULT_VOLATILITY,
            seed: None,
            latency: Duration::ZERO,
        }
    }
}

impl RandomWalkSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_volatility(mut self, volatility: f64) -> Self {
        self.volatility = if volatility.is_finite() {
            volatility.clamp(0.0, MAX_VOLATILITY)
        } else {
            DEFAULT_VOLATILITY
        };
        self
    }

    /// Same seed, same walk.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn volatility(&self) -> f64 {
        self.volatility
    }

    pub fn walk(&self, token: &Token, range: TimeRange, end: DateTime<Utc>) -> PriceSeries {
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut price = token.price.max(0.0);
        let points = grid_timestamps(range, end)
            .into_iter()
            .map(|timestamp| {
                let change: f64 = rng.gen_range(-self.volatility..=self.volatility);
                price *= 1.0 + change;
                PricePoint { timestamp, price }
            })
            .collect();
        PriceSeries {
            symbol: token.symbol.clone(),
            chain_id: token.chain_id,
            range,
            points,
        }
    }
}

#[async_trait]
impl PriceSeriesSource for RandomWalkSource {
    async fn series(&self, token: &Token, range: TimeRange) -> SeriesResult<PriceSeries> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let series = self.walk(token, range, Utc::now());
        debug!(
            symbol = %token.symbol,
            chain_id = token.chain_id,
            range = %range,
            points = series.len(),
            "random walk generated"
        );
        Ok(series)
    }
}
