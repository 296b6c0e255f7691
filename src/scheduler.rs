use crate::generator::SignalGenerator;
use crate::registry::EntityRegistry;
use crate::sample::Sample;
use crate::stats::DeliveryStats;
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Destination for generated samples: the sink writer or a queue publisher.
pub trait Outlet: Send + Sync + 'static {
    fn deliver(&self, sample: Sample) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// Fixed-delay ticker that generates one sample per registered entity on every tick.
///
/// Ticks run inline in a single loop, so a slow outlet delays the next tick instead of
/// overlapping with it.
pub struct Scheduler<O> {
    generator: Arc<dyn SignalGenerator>,
    outlet: O,
    registry: EntityRegistry,
    stats: Arc<DeliveryStats>,
    interval: Duration,
}

impl<O: Outlet> Scheduler<O> {
    pub fn new(
        generator: Arc<dyn SignalGenerator>,
        outlet: O,
        registry: EntityRegistry,
        stats: Arc<DeliveryStats>,
        interval: Duration,
    ) -> Self {
        Self {
            generator,
            outlet,
            registry,
            stats,
            interval,
        }
    }

    /// Runs one tick. Delivery failures are logged and counted; they never abort the tick.
    ///
    /// Entities deleted while the tick is running are skipped, and walk state recreated by a
    /// step that raced the delete is dropped again.
    pub async fn tick(&self) -> usize {
        self.stats.record_tick();
        let mut delivered = 0;
        for entity_id in self.registry.snapshot() {
            if !self.registry.contains(entity_id) {
                continue;
            }
            let sample = self.generator.generate_next(entity_id);
            if !self.registry.contains(entity_id) {
                self.generator.forget(entity_id);
                tracing::debug!(entity = entity_id, "entity deleted mid-tick; sample dropped");
                continue;
            }
            let sample = sample.with_timestamp(Utc::now());
            match self.outlet.deliver(sample).await {
                Ok(()) => {
                    self.stats.record_delivered();
                    delivered += 1;
                }
                Err(err) => {
                    tracing::warn!(error = %err, entity = entity_id, "failed to deliver sample");
                    self.stats.record_failure(err.to_string());
                }
            }
        }
        delivered
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(
            interval_ms = self.interval.as_millis() as u64,
            strategy = ?self.generator.strategy(),
            "scheduler started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let delivered = self.tick().await;
                    tracing::debug!(delivered, "tick complete");
                }
            }
        }

        tracing::info!("scheduler stopped");
    }
}
