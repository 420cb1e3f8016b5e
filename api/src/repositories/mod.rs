pub mod price_cache_repository;
pub mod snapshot_repository;

pub use price_cache_repository::{InMemoryPriceCacheRepository, PriceCacheRepository};
pub use snapshot_repository::{InMemorySnapshotRepository, SnapshotRepository};
