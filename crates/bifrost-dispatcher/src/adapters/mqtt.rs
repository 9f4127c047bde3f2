//! MQTT transport handler backed by rumqttc.
//!
//! A spawned event-loop task owns the broker connection: it parses incoming
//! publishes into envelopes and feeds them to the handler's queue, and it
//! restores all subscriptions whenever the broker acknowledges a
//! (re)connection. Reconnect backoff is invisible to the dispatcher.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS, SubscribeFilter};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use bifrost_core::{looks_like_frame, Envelope, MqttConfig};
use bifrost_devices::{DeviceRecord, PROTOCOL_MQTT};

use crate::error::HandlerError;
use crate::handler::Handler;

/// Handler for devices reached through the MQTT broker.
pub struct MqttHandler {
    client: AsyncClient,
    inbound: async_channel::Receiver<Envelope>,
    subscriptions: Arc<RwLock<HashSet<String>>>,
    running: Arc<AtomicBool>,
}

impl MqttHandler {
    /// Connect to the broker with the initial topic set (configured topics
    /// plus the registered device topics).
    ///
    /// Subscriptions are not issued here: the request queue is only drained
    /// once the event loop polls, so an eager loop over a large topic set
    /// would fill it and block forever. The ConnAck replay covers the first
    /// connection like every reconnect.
    pub fn connect(config: &MqttConfig, initial_topics: impl IntoIterator<Item = String>) -> Self {
        let client_id = format!("bifrost-{}", Uuid::new_v4());
        let mut options = MqttOptions::new(client_id, &config.broker, config.port);
        options.set_keep_alive(Duration::from_secs(60));

        let (client, mut eventloop) = AsyncClient::new(options, 10);

        let subscriptions: HashSet<String> = initial_topics.into_iter().collect();
        let subscriptions = Arc::new(RwLock::new(subscriptions));

        let (tx, rx) = async_channel::unbounded();
        let running = Arc::new(AtomicBool::new(true));

        info!("Connecting to MQTT broker {}:{}...", config.broker, config.port);

        let task_client = client.clone();
        let task_subscriptions = subscriptions.clone();
        let task_running = running.clone();
        tokio::spawn(async move {
            while task_running.load(Ordering::Relaxed) {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        if !looks_like_frame(&publish.payload) {
                            debug!(
                                "Discarding non-frame payload on topic '{}'",
                                publish.topic
                            );
                            continue;
                        }
                        match Envelope::parse(&publish.payload) {
                            Ok(envelope) => {
                                if tx.send(envelope).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!("Dropping frame on topic '{}': {e}", publish.topic);
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        let filters: Vec<SubscribeFilter> = task_subscriptions
                            .read()
                            .await
                            .iter()
                            .map(|topic| SubscribeFilter::new(topic.clone(), QoS::AtMostOnce))
                            .collect();
                        info!(
                            "Connected to MQTT broker, subscribing to {} topic(s)",
                            filters.len()
                        );
                        if filters.is_empty() {
                            continue;
                        }
                        // One batched, non-blocking request: a blocking
                        // subscribe here would starve the poll that drains it.
                        if let Err(e) = task_client.try_subscribe_many(filters) {
                            warn!("Failed to restore subscriptions: {e}");
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("MQTT connection error: {e}, retrying");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
            debug!("MQTT event loop task finished");
        });

        Self {
            client,
            inbound: rx,
            subscriptions,
            running,
        }
    }
}

#[async_trait]
impl Handler for MqttHandler {
    fn protocol(&self) -> &str {
        PROTOCOL_MQTT
    }

    fn read(&self) -> Option<Envelope> {
        self.inbound.try_recv().ok()
    }

    async fn write(&self, envelope: &Envelope, device: &DeviceRecord) -> Result<(), HandlerError> {
        let DeviceRecord::Mqtt { topic, .. } = device else {
            return Err(HandlerError::ProtocolMismatch {
                handler: PROTOCOL_MQTT.to_string(),
                device: device.protocol().to_string(),
            });
        };

        if !self.running.load(Ordering::Relaxed) {
            return Err(HandlerError::Closed);
        }

        self.client
            .publish(topic.as_str(), QoS::AtMostOnce, false, envelope.serialize())
            .await
            .map_err(|e| HandlerError::Transport(e.to_string()))?;

        debug!("Published {} to '{topic}'", envelope.kind);
        Ok(())
    }

    async fn track(&self, device: &DeviceRecord) {
        let DeviceRecord::Mqtt { topic, .. } = device else {
            return;
        };
        if !self.subscriptions.write().await.insert(topic.clone()) {
            return;
        }
        // A failed request is replayed from the set on the next ConnAck.
        if let Err(e) = self.client.try_subscribe(topic.as_str(), QoS::AtMostOnce) {
            warn!("Subscribe to '{topic}' deferred: {e}");
        }
    }

    async fn close(&self) {
        self.running.store(false, Ordering::Relaxed);
        self.inbound.close();
        if let Err(e) = self.client.disconnect().await {
            debug!("MQTT disconnect: {e}");
        }
    }
}
