use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use domain::{PriceSeries, TimeRange, Token};
use price_engine::{resample, validate_series, PriceSeriesSource, SeriesError, SeriesResult};
use tracing::{debug, warn};

use crate::services::CoingeckoPriceOracle;

/// Charts from CoinGecko `market_chart`, resampled onto the fixed grid of each range.
#[derive(Clone)]
pub struct CoingeckoHistorySource {
    oracle: Arc<CoingeckoPriceOracle>,
}

impl CoingeckoHistorySource {
    pub fn new(oracle: Arc<CoingeckoPriceOracle>) -> Self {
        Self { oracle }
    }
}

#[async_trait]
impl PriceSeriesSource for CoingeckoHistorySource {
    async fn series(&self, token: &Token, range: TimeRange) -> SeriesResult<PriceSeries> {
        let observations = self
            .oracle
            .fetch_market_chart(&token.symbol, range)
            .await
            .map_err(|err| {
                warn!(
                    error = %err,
                    symbol = %token.symbol,
                    range = %range,
                    "market_chart fetch failed"
                );
                SeriesError::Unavailable(err.to_string())
            })?;
        debug!(
            symbol = %token.symbol,
            range = %range,
            observations = observations.len(),
            "market_chart fetched"
        );

        let points = resample(&observations, range, Utc::now())
            .map_err(|_| SeriesError::EmptyHistory(token.symbol.clone()))?;
        let series = PriceSeries {
            symbol: token.symbol.clone(),
            chain_id: token.chain_id,
            range,
            points,
        };
        validate_series(&series)?;
        Ok(series)
    }
}
