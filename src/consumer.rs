use crate::generator::SignalGenerator;
use crate::registry::EntityRegistry;
use crate::sample::{decode_entity_id, decode_sample, EntityId, PayloadError, Sample};
use crate::sink::{SinkWriter, StoreError, TimeSeriesStore};
use crate::stats::DeliveryStats;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub samples: String,
    pub deletes: String,
}

#[derive(Debug, PartialEq)]
pub enum Delivery {
    Sample(Sample),
    Delete(EntityId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// Nothing was known about the entity. Still a success.
    NotFound,
}

/// Result of handling one queue message. Every variant is acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    Written,
    Deleted(DeleteOutcome),
    /// Malformed payload, or a store refusal that a retry cannot fix. Logged and skipped.
    Rejected,
}

/// Whether the queue message behind `result` should be acknowledged. Only transient store
/// failures are left unacknowledged, so the broker redelivers them on session resume.
pub fn should_ack(result: &Result<Handled, StoreError>) -> bool {
    match result {
        Ok(_) => true,
        Err(err) => !err.is_transient(),
    }
}

pub fn decode(topics: &Topics, topic: &str, payload: &mut [u8]) -> Result<Delivery, PayloadError> {
    if topic == topics.samples {
        decode_sample(payload).map(Delivery::Sample)
    } else if topic == topics.deletes {
        decode_entity_id(payload).map(Delivery::Delete)
    } else {
        Err(PayloadError::UnknownTopic(topic.to_string()))
    }
}

/// Routes queue messages to the sink writer.
pub struct Consumer<S> {
    writer: SinkWriter<S>,
    registry: EntityRegistry,
    generator: Arc<dyn SignalGenerator>,
    stats: Arc<DeliveryStats>,
    topics: Topics,
}

impl<S: TimeSeriesStore> Consumer<S> {
    pub fn new(
        writer: SinkWriter<S>,
        registry: EntityRegistry,
        generator: Arc<dyn SignalGenerator>,
        stats: Arc<DeliveryStats>,
        topics: Topics,
    ) -> Self {
        Self {
            writer,
            registry,
            generator,
            stats,
            topics,
        }
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// Handles one message. Malformed payloads and permanent store refusals come back as
    /// `Handled::Rejected` so the caller can acknowledge and skip them. Only transient store
    /// failures are returned as errors.
    pub async fn handle(&self, topic: &str, payload: &mut [u8]) -> Result<Handled, StoreError> {
        let delivery = match decode(&self.topics, topic, payload) {
            Ok(delivery) => delivery,
            Err(err) => {
                tracing::warn!(error = %err, topic, "rejected queue payload");
                self.stats.record_rejected(err.to_string());
                return Ok(Handled::Rejected);
            }
        };

        let result = match delivery {
            Delivery::Sample(sample) => self
                .writer
                .write(&sample, self.writer.bucket(), self.writer.org())
                .await
                .map(|()| {
                    self.stats.record_delivered();
                    Handled::Written
                }),
            Delivery::Delete(entity_id) => self.delete(entity_id).await.map(Handled::Deleted),
        };

        match result {
            Err(err) if !err.is_transient() => {
                tracing::warn!(error = %err, topic, "store refused queue message; skipping");
                self.stats.record_rejected(err.to_string());
                Ok(Handled::Rejected)
            }
            Err(err) => {
                self.stats.record_failure(err.to_string());
                Err(err)
            }
            ok => ok,
        }
    }

    /// Forgets the entity locally and purges its series. Deleting an unknown entity, or the
    /// same entity twice, yields `NotFound` rather than an error.
    pub async fn delete(&self, entity_id: EntityId) -> Result<DeleteOutcome, StoreError> {
        let registered = self.registry.remove(entity_id);
        let had_state = self.generator.forget(entity_id);
        self.writer.purge(entity_id).await?;

        let outcome = if registered || had_state {
            DeleteOutcome::Deleted
        } else {
            DeleteOutcome::NotFound
        };
        self.stats.record_deleted();
        tracing::info!(entity = entity_id, ?outcome, "deleted equipment telemetry");
        Ok(outcome)
    }
}
