mod influx;
mod point;
mod writer;

#[cfg(test)]
pub(crate) mod memory;

use crate::sample::EntityId;
use chrono::{DateTime, Utc};
use std::future::Future;
use thiserror::Error;

pub use influx::InfluxStore;
pub use point::{Measurement, Point, ENTITY_TAG};
pub use writer::{RetryPolicy, SinkWriter};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("time-series store request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("time-series store rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("timestamp {0} cannot be written with nanosecond precision")]
    TimestampOutOfRange(DateTime<Utc>),
}

impl StoreError {
    /// Network failures, throttling and server errors may succeed on a later attempt.
    /// Auth failures and malformed writes will not.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Transport(_) => true,
            StoreError::Rejected { status, .. } => *status == 429 || *status >= 500,
            StoreError::TimestampOutOfRange(_) => false,
        }
    }
}

/// Write path of a time-series database.
pub trait TimeSeriesStore: Send + Sync + 'static {
    fn write(
        &self,
        bucket: &str,
        org: &str,
        point: &Point,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Removes every point of `measurement` tagged with `entity_id`. Deleting a series
    /// that holds no points succeeds.
    fn delete_series(
        &self,
        bucket: &str,
        org: &str,
        measurement: Measurement,
        entity_id: EntityId,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}
