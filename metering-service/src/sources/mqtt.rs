use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::sync::Mutex;

use crate::{
    config::MqttSourceConfig,
    pipeline::{Envelope, SourceError, TelemetrySource, TelemetryStream},
};

/// Subscribes to one MQTT topic and yields every publish payload.
///
/// QoS 0: a message published while the connection is down is lost.
pub struct MqttSource {
    topic: String,
    reconnect_backoff: Duration,
    connection: Mutex<Option<(AsyncClient, EventLoop)>>,
}

impl MqttSource {
    pub fn new(cfg: &MqttSourceConfig, channel_capacity: usize) -> Self {
        let mut options = MqttOptions::new(cfg.client_id.clone(), cfg.host.clone(), cfg.port);
        options.set_keep_alive(Duration::from_secs(cfg.keep_alive_secs));
        options.set_clean_session(true);

        let (client, eventloop) = AsyncClient::new(options, channel_capacity);

        Self {
            topic: cfg.topic.clone(),
            reconnect_backoff: Duration::from_millis(cfg.reconnect_backoff_ms),
            connection: Mutex::new(Some((client, eventloop))),
        }
    }
}

#[async_trait::async_trait]
impl TelemetrySource for MqttSource {
    async fn stream(&self) -> Result<TelemetryStream, SourceError> {
        let (client, mut eventloop) = self
            .connection
            .lock()
            .await
            .take()
            .ok_or_else(|| SourceError::Setup("MQTT stream already taken".to_string()))?;
        let topic = self.topic.clone();
        let backoff = self.reconnect_backoff;

        let s = async_stream::stream! {
            loop {
                match eventloop.poll().await {
                    // Clean sessions drop subscriptions, so subscribe on every (re)connect.
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        tracing::info!(code = ?ack.code, %topic, "connected to MQTT broker");
                        if let Err(e) = client.try_subscribe(topic.clone(), QoS::AtMostOnce) {
                            yield Err(SourceError::Transport(format!(
                                "subscribe to '{topic}' failed: {e}"
                            )));
                        }
                    }
                    Ok(Event::Incoming(Packet::SubAck(_))) => {
                        tracing::info!(%topic, "subscribed to telemetry topic");
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        metrics::counter!("mqtt_messages_received_total").increment(1);
                        yield Ok(Envelope::now(publish.payload.to_vec()));
                    }
                    Ok(_) => {}
                    Err(e) => {
                        metrics::counter!("mqtt_connection_errors_total").increment(1);
                        tracing::warn!(
                            error = %e,
                            backoff_ms = backoff.as_millis() as u64,
                            "MQTT connection error, reconnecting"
                        );
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        };

        Ok(Box::pin(s))
    }
}
