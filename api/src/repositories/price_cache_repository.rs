use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use domain::ChainId;
use tokio::sync::RwLock;

#[async_trait]
pub trait PriceCacheRepository: Send + Sync {
    async fn get_cached_price(
        &self,
        symbol: &str,
        chain_id: ChainId,
        now: DateTime<Utc>,
    ) -> Result<Option<f64>>;

    async fn upsert_price(
        &self,
        symbol: &str,
        chain_id: ChainId,
        price: f64,
        ttl_seconds: i64,
        source: &str,
    ) -> Result<()>;
}

#[derive(Clone, Debug)]
struct CachedPrice {
    price: f64,
    expires_at: DateTime<Utc>,
    source: String,
}

#[derive(Default)]
pub struct InMemoryPriceCacheRepository {
    entries: RwLock<HashMap<(String, ChainId), CachedPrice>>,
}

impl InMemoryPriceCacheRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn source_of(&self, symbol: &str, chain_id: ChainId) -> Option<String> {
        let entries = self.entries.read().await;
        entries
            .get(&(symbol.to_uppercase(), chain_id))
            .map(|entry| entry.source.clone())
    }
}

#[async_trait]
impl PriceCacheRepository for InMemoryPriceCacheRepository {
    async fn get_cached_price(
        &self,
        symbol: &str,
        chain_id: ChainId,
        now: DateTime<Utc>,
    ) -> Result<Option<f64>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(&(symbol.to_uppercase(), chain_id))
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.price))
    }

    async fn upsert_price(
        &self,
        symbol: &str,
        chain_id: ChainId,
        price: f64,
        ttl_seconds: i64,
        source: &str,
    ) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.insert(
            (symbol.to_uppercase(), chain_id),
            CachedPrice {
                price,
                expires_at: Utc::now() + Duration::seconds(ttl_seconds.max(1)),
                source: source.to_string(),
            },
        );
        Ok(())
    }
}
