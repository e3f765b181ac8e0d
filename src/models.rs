use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ShortUrl {
    pub original_url: String,
    pub short_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct SensorValues {
    pub temperature: f64,
    pub humidity: f64,
    pub pressure: f64,
}

/// A sensor reading as served by the API. The timestamp is always assigned by
/// the server at ingestion.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct IotReading {
    pub timestamp: DateTime<Utc>,
    pub values: SensorValues,
}

/// Seed-only account written at startup. No route reads it.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AdminUser {
    pub name: String,
    pub password: String,
    pub email: String,
    pub admin: bool,
    pub disabled: bool,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Deserialize)]
pub struct URLParams {
    pub url: String,
}

/// Body of a reading upload: `{"values": {"temp": .., "hum": .., "pressure": ..}}`.
/// Anything else in the body, including a `timestamp`, is ignored.
#[derive(Debug, Deserialize)]
pub struct IngestParams {
    pub values: Option<RawValues>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawValues {
    pub temp: Option<Measurement>,
    pub hum: Option<Measurement>,
    pub pressure: Option<Measurement>,
}

/// Devices send either JSON numbers or numeric strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Measurement {
    Number(f64),
    Text(String),
}

impl Measurement {
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        let value = match self {
            Self::Number(value) => *value,
            Self::Text(text) => text.trim().parse::<f64>().ok()?,
        };
        value.is_finite().then_some(value)
    }
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}
