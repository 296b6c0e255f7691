use super::{Measurement, Point, StoreError, TimeSeriesStore};
use crate::config::Config;
use crate::sample::{EntityId, Sample};
use crate::scheduler::Outlet;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    #[cfg(test)]
    pub fn single_attempt() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::ZERO,
        }
    }

    fn delay_before(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(2).min(16);
        self.backoff.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

/// Appends samples to the time-series store as `equipment_id`-tagged points.
pub struct SinkWriter<S> {
    store: Arc<S>,
    bucket: String,
    org: String,
    measurement: Measurement,
    retry: RetryPolicy,
}

impl<S> Clone for SinkWriter<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            bucket: self.bucket.clone(),
            org: self.org.clone(),
            measurement: self.measurement,
            retry: self.retry,
        }
    }
}

impl<S: TimeSeriesStore> SinkWriter<S> {
    pub fn new(
        store: Arc<S>,
        bucket: impl Into<String>,
        org: impl Into<String>,
        measurement: Measurement,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            org: org.into(),
            measurement,
            retry,
        }
    }

    pub fn from_config(store: Arc<S>, config: &Config) -> Self {
        Self::new(
            store,
            config.influx_bucket.clone(),
            config.influx_org.clone(),
            config.measurement,
            config.retry_policy(),
        )
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn org(&self) -> &str {
        &self.org
    }

    /// Writes one point for `sample`. Transient store errors are retried up to the configured
    /// attempt count; with the default single attempt the store error is returned as is.
    pub async fn write(&self, sample: &Sample, bucket: &str, org: &str) -> Result<(), StoreError> {
        let point = Point::from_sample(self.measurement, sample, Utc::now())?;
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.store.write(bucket, org, &point).await {
                Ok(()) => {
                    tracing::trace!(
                        entity = sample.entity_id(),
                        value = sample.value(),
                        enabled = sample.enabled(),
                        bucket,
                        "wrote sample"
                    );
                    return Ok(());
                }
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    attempt += 1;
                    let delay = self.retry.delay_before(attempt);
                    tracing::warn!(
                        error = %err,
                        entity = sample.entity_id(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "sample write failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Removes the entity's series for this writer's measurement from the configured bucket.
    pub async fn purge(&self, entity_id: EntityId) -> Result<(), StoreError> {
        self.store
            .delete_series(&self.bucket, &self.org, self.measurement, entity_id)
            .await
    }
}

impl<S: TimeSeriesStore> Outlet for SinkWriter<S> {
    async fn deliver(&self, sample: Sample) -> anyhow::Result<()> {
        self.write(&sample, &self.bucket, &self.org).await?;
        Ok(())
    }
}
