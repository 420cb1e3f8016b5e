use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{PricePoint, PriceSeries, TimeRange, Token};
use serde::Serialize;
use thiserror::Error;

pub mod random_walk;

pub use random_walk::RandomWalkSource;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SeriesError {
    #[error("no price history for {0}")]
    EmptyHistory(String),
    #[error("price source unavailable: {0}")]
    Unavailable(String),
    #[error("series timestamps are not strictly increasing")]
    NonMonotonic,
    #[error("expected {expected} points, got {actual}")]
    WrongLength { expected: usize, actual: usize },
}

pub type SeriesResult<T> = Result<T, SeriesError>;

/// Anything that can chart a token over a [`TimeRange`]: mock walks and real feeds alike.
#[async_trait]
pub trait PriceSeriesSource: Send + Sync {
    async fn series(&self, token: &Token, range: TimeRange) -> SeriesResult<PriceSeries>;
}

/// `point_count + 1` timestamps, one `step` apart, the last one at `end`.
pub fn grid_timestamps(range: TimeRange, end: DateTime<Utc>) -> Vec<DateTime<Utc>> {
    let n = range.point_count();
    let step = range.step();
    (0..=n).map(|i| end - step * (n - i) as i32).collect()
}

pub fn validate_series(series: &PriceSeries) -> SeriesResult<()> {
    let expected = series.range.point_count() + 1;
    if series.len() != expected {
        return Err(SeriesError::WrongLength {
            expected,
            actual: series.len(),
        });
    }
    if !series.is_strictly_increasing() {
        return Err(SeriesError::NonMonotonic);
    }
    Ok(())
}

/// Projects irregular observations onto the range grid ending at `end`.
///
/// Each grid point takes the latest observation at or before it; grid points earlier than
/// every observation take the earliest one.
pub fn resample(
    observations: &[PricePoint],
    range: TimeRange,
    end: DateTime<Utc>,
) -> SeriesResult<Vec<PricePoint>> {
    let mut sorted: Vec<PricePoint> = observations
        .iter()
        .copied()
        .filter(|p| p.price.is_finite())
        .collect();
    if sorted.is_empty() {
        return Err(SeriesError::EmptyHistory(range.label().to_string()));
    }
    sorted.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

    let mut cursor = 0;
    let points = grid_timestamps(range, end)
        .into_iter()
        .map(|timestamp| {
            while cursor + 1 < sorted.len() && sorted[cursor + 1].timestamp <= timestamp {
                cursor += 1;
            }
            PricePoint {
                timestamp,
                price: sorted[cursor].price,
            }
        })
        .collect();
    Ok(points)
}

/// Vertical scale of a price chart: data bounds padded by 1% on each side.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChartScale {
    pub min: f64,
    pub max: f64,
    pub range: f64,
}

impl ChartScale {
    pub const PADDING: f64 = 0.01;

    pub fn from_points(points: &[PricePoint]) -> Option<Self> {
        let mut prices = points.iter().map(|p| p.price).filter(|p| p.is_finite());
        let first = prices.next()?;
        let (low, high) = prices.fold((first, first), |(lo, hi), p| (lo.min(p), hi.max(p)));
        let min = low * (1.0 - Self::PADDING);
        let max = high * (1.0 + Self::PADDING);
        Some(Self {
            min,
            max,
            range: max - min,
        })
    }

    /// Maps a price into `[0, 1]`; a flat scale puts everything in the middle.
    pub fn normalize(&self, price: f64) -> f64 {
        if self.range <= 0.0 {
            return 0.5;
        }
        ((price - self.min) / self.range).clamp(0.0, 1.0)
    }

    pub fn project(&self, points: &[PricePoint]) -> Vec<f64> {
        points.iter().map(|p| self.normalize(p.price)).collect()
    }
}
