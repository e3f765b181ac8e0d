use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{IotReading, ShortUrl};

#[derive(Debug, Error)]
pub enum StoreError {
    /// A unique index rejected the write.
    #[error("duplicate key")]
    Duplicate,
    #[error("database error: {0}")]
    Database(#[from] mongodb::error::Error),
}

#[async_trait]
pub trait UrlRepository: Send + Sync {
    async fn find_by_original(&self, original_url: &str) -> Result<Option<ShortUrl>, StoreError>;

    async fn find_by_short(&self, short_url: &str) -> Result<Option<ShortUrl>, StoreError>;

    /// Fails with [`StoreError::Duplicate`] when either field is already taken.
    async fn insert_url(&self, url: &ShortUrl) -> Result<(), StoreError>;
}

#[async_trait]
pub trait ReadingRepository: Send + Sync {
    async fn insert_reading(&self, reading: &IotReading) -> Result<(), StoreError>;

    async fn all_readings(&self) -> Result<Vec<IotReading>, StoreError>;

    /// Readings with `min <= timestamp <= max`.
    async fn readings_between(
        &self,
        min: DateTime<Utc>,
        max: DateTime<Utc>,
    ) -> Result<Vec<IotReading>, StoreError>;

    async fn latest_reading(&self) -> Result<Option<IotReading>, StoreError>;
}
