use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::{
    error::AppError,
    models::{IotReading, Measurement, RawValues, SensorValues},
    repository::ReadingRepository,
};

#[derive(Clone)]
pub struct ReadingService {
    readings: Arc<dyn ReadingRepository>,
}

impl ReadingService {
    #[must_use]
    pub fn new(readings: Arc<dyn ReadingRepository>) -> Self {
        Self { readings }
    }

    /// Stores the values stamped with the current server time.
    pub async fn ingest(&self, values: Option<RawValues>) -> Result<IotReading, AppError> {
        let values = validate(values.unwrap_or_default())?;
        let reading = IotReading {
            timestamp: now_millis(),
            values,
        };
        self.readings.insert_reading(&reading).await?;
        tracing::debug!(timestamp = %reading.timestamp, "reading saved");
        Ok(reading)
    }

    pub async fn list_all(&self) -> Result<Vec<IotReading>, AppError> {
        Ok(self.readings.all_readings().await?)
    }

    /// `range` is the `"<min>-<max>"` path segment, both bounds in epoch
    /// milliseconds and inclusive.
    pub async fn list_range(&self, range: &str) -> Result<Vec<IotReading>, AppError> {
        let (min, max) = parse_range(range)?;
        if min > max {
            return Ok(Vec::new());
        }
        Ok(self.readings.readings_between(min, max).await?)
    }

    pub async fn latest(&self) -> Result<Option<IotReading>, AppError> {
        Ok(self.readings.latest_reading().await?)
    }
}

fn validate(raw: RawValues) -> Result<SensorValues, AppError> {
    Ok(SensorValues {
        temperature: required(raw.temp.as_ref(), "temp")?,
        humidity: required(raw.hum.as_ref(), "hum")?,
        pressure: required(raw.pressure.as_ref(), "pressure")?,
    })
}

fn required(value: Option<&Measurement>, field: &str) -> Result<f64, AppError> {
    let Some(value) = value else {
        return Err(AppError::Validation(format!("values.{field} is required")));
    };
    value
        .as_f64()
        .ok_or_else(|| AppError::Validation(format!("values.{field} must be a number")))
}

/// The store keeps millisecond precision; truncating here keeps what we return
/// identical to what a later query reads back.
fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

pub fn parse_range(range: &str) -> Result<(DateTime<Utc>, DateTime<Utc>), AppError> {
    let invalid = || AppError::Validation(format!("invalid range {range:?}, expected <min>-<max>"));
    let (min, max) = range.split_once('-').ok_or_else(invalid)?;
    let min = min.trim().parse::<i64>().map_err(|_| invalid())?;
    let max = max.trim().parse::<i64>().map_err(|_| invalid())?;
    let min = DateTime::from_timestamp_millis(min).ok_or_else(invalid)?;
    let max = DateTime::from_timestamp_millis(max).ok_or_else(invalid)?;
    Ok((min, max))
}
