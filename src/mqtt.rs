use crate::config::Config;
use crate::consumer::{should_ack, Consumer, Handled};
use crate::sample::{encode_sample, Sample};
use crate::scheduler::Outlet;
use crate::sink::TimeSeriesStore;
use anyhow::Result;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

fn mqtt_options(config: &Config, client_id: &str) -> MqttOptions {
    let mut options = MqttOptions::new(client_id, config.mqtt_host.clone(), config.mqtt_port);
    options.set_keep_alive(config.mqtt_keepalive());
    if let Some(username) = &config.mqtt_username {
        options.set_credentials(
            username.clone(),
            config.mqtt_password.clone().unwrap_or_default(),
        );
    }
    options
}

/// Publishes samples onto the samples topic with QoS 1.
pub struct MqttPublisher {
    client: AsyncClient,
    topic: String,
}

impl MqttPublisher {
    pub fn new(config: &Config) -> (Self, JoinHandle<()>) {
        let client_id = format!("{}-publisher", config.mqtt_client_id);
        let (client, mut eventloop) = AsyncClient::new(mqtt_options(config, &client_id), 64);
        let handle = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(_) => {}
                    Err(err) => {
                        tracing::warn!(error = %err, "mqtt publisher event loop error");
                        sleep(Duration::from_secs(2)).await;
                    }
                }
            }
        });
        let publisher = Self {
            client,
            topic: config.samples_topic.clone(),
        };
        (publisher, handle)
    }
}

impl Outlet for MqttPublisher {
    async fn deliver(&self, sample: Sample) -> Result<()> {
        let payload = encode_sample(&sample)?;
        self.client
            .publish(self.topic.clone(), QoS::AtLeastOnce, false, payload)
            .await?;
        tracing::trace!(entity = sample.entity_id(), topic = %self.topic, "published sample");
        Ok(())
    }
}

/// Subscribes to the sample and delete topics and feeds messages to the consumer.
///
/// Acks are manual: a message is acknowledged once it has been written, deleted or rejected.
/// A transient store failure leaves it unacknowledged and drops the connection, so the broker
/// redelivers it when the persistent session resumes.
pub async fn run_consumer<S: TimeSeriesStore>(
    config: Config,
    consumer: Consumer<S>,
    cancel: CancellationToken,
) -> Result<()> {
    let topics = consumer.topics().clone();
    loop {
        let client_id = format!("{}-consumer", config.mqtt_client_id);
        let mut options = mqtt_options(&config, &client_id);
        options.set_manual_acks(true);
        options.set_clean_session(false);

        let (client, mut eventloop) = AsyncClient::new(options, 32);

        let mut subscribed = true;
        for topic in [&topics.samples, &topics.deletes] {
            if let Err(err) = client.subscribe(topic.clone(), QoS::AtLeastOnce).await {
                tracing::warn!(error = %err, topic = %topic, "failed to subscribe; retrying");
                subscribed = false;
                break;
            }
            tracing::info!(topic = %topic, "subscribed to equipment feed");
        }
        if !subscribed {
            sleep(Duration::from_secs(2)).await;
            continue;
        }

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = client.disconnect().await;
                    return Ok(());
                }
                event = eventloop.poll() => event,
            };

            match event {
                Ok(Event::Incoming(Incoming::Publish(publish))) => {
                    let mut payload = publish.payload.to_vec();
                    let result = consumer.handle(&publish.topic, &mut payload).await;
                    if let Ok(Handled::Deleted(outcome)) = &result {
                        tracing::debug!(?outcome, "processed delete message");
                    }
                    if should_ack(&result) {
                        if let Err(err) = client.try_ack(&publish) {
                            tracing::warn!(error = %err, "failed to ack message");
                        }
                    } else if let Err(err) = result {
                        // Unacked QoS 1 messages hold broker inflight slots until the session
                        // is resumed, so reconnect instead of reading past them.
                        tracing::warn!(
                            error = %err,
                            topic = %publish.topic,
                            "store unavailable; reconnecting for redelivery"
                        );
                        break;
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(error = %err, "MQTT connection dropped; reconnecting");
                    break;
                }
            }
        }

        sleep(Duration::from_secs(1)).await;
    }
}
