use async_trait::async_trait;
use bson::{DateTime as BsonDateTime, doc, oid::ObjectId};
use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use mongodb::{
    Client, Collection, IndexModel,
    error::{Error, ErrorKind, WriteFailure},
    options::{ClientOptions, IndexOptions, ServerApi, ServerApiVersion},
};
use serde::{Deserialize, Serialize};

use crate::{
    models::{AdminUser, IotReading, SensorValues, ShortUrl},
    repository::{ReadingRepository, StoreError, UrlRepository},
};

const DUPLICATE_KEY: i32 = 11000;

/// Reading as laid out in the `iotmodels` collection.
#[derive(Debug, Deserialize, Serialize)]
struct ReadingDocument {
    #[allow(clippy::used_underscore_binding)]
    #[serde(skip_serializing_if = "Option::is_none")]
    _id: Option<ObjectId>,
    timestamp: BsonDateTime,
    values: SensorValues,
}

impl From<&IotReading> for ReadingDocument {
    fn from(reading: &IotReading) -> Self {
        Self {
            _id: None,
            timestamp: BsonDateTime::from_chrono(reading.timestamp),
            values: reading.values,
        }
    }
}

impl From<ReadingDocument> for IotReading {
    fn from(document: ReadingDocument) -> Self {
        Self {
            timestamp: document.timestamp.to_chrono(),
            values: document.values,
        }
    }
}

#[derive(Clone)]
pub struct Database {
    client: Client,
    name: String,
}

impl Database {
    pub async fn new(connection_string: &str, name: &str) -> Result<Self, Error> {
        let mut client_options = ClientOptions::parse(connection_string).await?;
        let server_api = ServerApi::builder().version(ServerApiVersion::V1).build();
        client_options.server_api = Some(server_api);

        let client = Client::with_options(client_options)?;

        Ok(Self {
            client,
            name: name.to_owned(),
        })
    }

    fn urls(&self) -> Collection<ShortUrl> {
        self.client.database(&self.name).collection("urlmodels")
    }

    fn readings(&self) -> Collection<ReadingDocument> {
        self.client.database(&self.name).collection("iotmodels")
    }

    fn users(&self) -> Collection<AdminUser> {
        self.client.database(&self.name).collection("users")
    }

    /// Unique indexes make the shorten lookup-then-insert safe under
    /// concurrency; the timestamp index serves range and latest queries.
    pub async fn ensure_indexes(&self) -> Result<(), Error> {
        let unique = || IndexOptions::builder().unique(true).build();
        self.urls()
            .create_indexes([
                IndexModel::builder()
                    .keys(doc! { "original_url": 1 })
                    .options(unique())
                    .build(),
                IndexModel::builder()
                    .keys(doc! { "short_url": 1 })
                    .options(unique())
                    .build(),
            ])
            .await?;
        self.readings()
            .create_index(IndexModel::builder().keys(doc! { "timestamp": -1 }).build())
            .await?;

        Ok(())
    }

    /// Inserts the admin account unless one with the same name exists.
    /// Returns whether a document was written.
    pub async fn seed_admin(&self, user: &AdminUser) -> Result<bool, Error> {
        let users = self.users();
        if users.find_one(doc! { "name": user.name.as_str() }).await?.is_some() {
            return Ok(false);
        }
        users.insert_one(user).await?;

        Ok(true)
    }
}

fn store_error(err: Error) -> StoreError {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write)) if write.code == DUPLICATE_KEY => {
            StoreError::Duplicate
        }
        _ => StoreError::Database(err),
    }
}

#[async_trait]
impl UrlRepository for Database {
    async fn find_by_original(&self, original_url: &str) -> Result<Option<ShortUrl>, StoreError> {
        let url = self
            .urls()
            .find_one(doc! { "original_url": original_url })
            .await?;

        Ok(url)
    }

    async fn find_by_short(&self, short_url: &str) -> Result<Option<ShortUrl>, StoreError> {
        let url = self.urls().find_one(doc! { "short_url": short_url }).await?;

        Ok(url)
    }

    async fn insert_url(&self, url: &ShortUrl) -> Result<(), StoreError> {
        self.urls().insert_one(url).await.map_err(store_error)?;

        Ok(())
    }
}

#[async_trait]
impl ReadingRepository for Database {
    async fn insert_reading(&self, reading: &IotReading) -> Result<(), StoreError> {
        self.readings()
            .insert_one(ReadingDocument::from(reading))
            .await?;

        Ok(())
    }

    async fn all_readings(&self) -> Result<Vec<IotReading>, StoreError> {
        let cursor = self.readings().find(doc! {}).await?;
        let documents: Vec<ReadingDocument> = cursor.try_collect().await?;

        Ok(documents.into_iter().map(IotReading::from).collect())
    }

    async fn readings_between(
        &self,
        min: DateTime<Utc>,
        max: DateTime<Utc>,
    ) -> Result<Vec<IotReading>, StoreError> {
        let filter = doc! {
            "timestamp": {
                "$gte": BsonDateTime::from_chrono(min),
                "$lte": BsonDateTime::from_chrono(max),
            }
        };
        let cursor = self.readings().find(filter).await?;
        let documents: Vec<ReadingDocument> = cursor.try_collect().await?;

        Ok(documents.into_iter().map(IotReading::from).collect())
    }

    async fn latest_reading(&self) -> Result<Option<IotReading>, StoreError> {
        let reading = self
            .readings()
            .find_one(doc! {})
            .sort(doc! { "timestamp": -1 })
            .await?;

        Ok(reading.map(IotReading::from))
    }
}
