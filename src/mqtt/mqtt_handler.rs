use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::MqttConfig;
use super::message_manager::{MQTTMessage, MsgManager};
use crate::error::BridgeError;
use crate::sync::StatusPublisher;

const MAX_ERROR_MESSAGES: usize = 10;
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed,
    Reconnecting,
}

#[derive(Clone, Debug, Default)]
pub struct MQTTStatus {
    pub connection_state: ConnectionState,
    pub error_messages: Vec<String>,
    pub messages_received: usize,
    pub messages_sent: usize,
    pub last_activity: Option<chrono::DateTime<chrono::Local>>,
}

impl MQTTStatus {
    fn record_error(&mut self, message: String) {
        if self.error_messages.len() >= MAX_ERROR_MESSAGES {
            self.error_messages.remove(0);
        }
        self.error_messages.push(message);
    }
}

/// Owns the rumqttc event loop
///
/// The loop must be polled for queued publishes and subscriptions to reach
/// the broker, so [`MqttHandler::run_until_cancelled`] has to run for as long
/// as any [`MqttPublisher`] is in use.
pub struct MqttHandler {
    client: AsyncClient,
    eventloop: EventLoop,
    config: MqttConfig,
    subscriptions: Vec<String>,
    msg_manager: MsgManager,
    status_tx: watch::Sender<MQTTStatus>,
}

impl MqttHandler {
    pub fn new(
        config: MqttConfig,
        subscriptions: Vec<String>,
        msg_out: mpsc::Sender<MQTTMessage>,
    ) -> Self {
        let mut mqtt_options = MqttOptions::new(config.client_id.clone(), config.host.clone(), config.port);
        mqtt_options
            .set_keep_alive(config.keep_alive())
            .set_clean_session(true);
        if let (Some(user), Some(pw)) = (&config.username, &config.password) {
            mqtt_options.set_credentials(user.clone(), pw.clone());
        }

        let (client, eventloop) = AsyncClient::new(mqtt_options, config.channel_capacity);
        let (status_tx, _) = watch::channel(MQTTStatus::default());

        MqttHandler {
            client,
            eventloop,
            config,
            subscriptions,
            msg_manager: MsgManager {
                received_msg: msg_out,
            },
            status_tx,
        }
    }

    /// Retained, at-least-once publisher sharing this handler's connection
    pub fn publisher(&self) -> MqttPublisher {
        MqttPublisher {
            client: self.client.clone(),
        }
    }

    pub fn status(&self) -> watch::Receiver<MQTTStatus> {
        self.status_tx.subscribe()
    }

    /// Polls the connection until `shutdown` is cancelled, reconnecting after
    /// every connection error
    pub async fn run_until_cancelled(mut self, shutdown: CancellationToken) {
        info!(
            "Connecting to MQTT broker {}:{} as {}",
            self.config.host, self.config.port, self.config.client_id
        );
        self.set_state(ConnectionState::Connecting);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown signal received for MQTT handler");
                    break;
                }

                event = self.eventloop.poll() => {
                    match event {
                        Ok(event) => self.handle_event(event),
                        Err(e) => {
                            error!("MQTT connection error: {}", e);
                            self.status_tx.send_modify(|status| {
                                status.connection_state = ConnectionState::Reconnecting;
                                status.record_error(e.to_string());
                            });

                            let delay = self.config.reconnect_delay();
                            tokio::select! {
                                _ = shutdown.cancelled() => break,
                                _ = tokio::time::sleep(delay) => {
                                    debug!("Reconnecting to MQTT broker after {:?}", delay);
                                }
                            }
                        }
                    }
                }
            }
        }

        self.disconnect().await;
    }

    /// Never waits on the command worker, so keep-alives and queued
    /// publishes keep flowing while commands are slow
    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Incoming(Packet::ConnAck(ack)) => {
                info!("Connected to MQTT broker ({:?})", ack.code);
                self.set_state(ConnectionState::Connected);
                self.subscribe_all();
            }
            Event::Incoming(Packet::Publish(publish)) => {
                let msg = MQTTMessage::from_payload(publish.topic, &publish.payload);
                debug!("MQTT message received: {}", msg);
                self.status_tx.send_modify(|status| {
                    status.messages_received += 1;
                    status.last_activity = Some(chrono::Local::now());
                });
                self.msg_manager.forward(msg);
            }
            Event::Incoming(Packet::SubAck(ack)) => {
                debug!("Subscription acknowledged: {:?}", ack.return_codes);
            }
            Event::Incoming(Packet::Disconnect) => {
                warn!("Broker closed the MQTT session");
                self.set_state(ConnectionState::Disconnected);
            }
            Event::Outgoing(Outgoing::Publish(_)) => {
                self.status_tx.send_modify(|status| {
                    status.messages_sent += 1;
                    status.last_activity = Some(chrono::Local::now());
                });
            }
            _ => {}
        }
    }

    /// Subscriptions are re-issued on every ConnAck since the session is clean
    fn subscribe_all(&mut self) {
        for topic in &self.subscriptions {
            match self.client.try_subscribe(topic.clone(), QoS::AtLeastOnce) {
                Ok(_) => info!("Subscribing to {}", topic),
                Err(e) => {
                    error!("Failed to subscribe to {}: {}", topic, e);
                    self.status_tx.send_modify(|status| {
                        status.connection_state = ConnectionState::Failed;
                        status.record_error(format!("subscribe {}: {}", topic, e));
                    });
                }
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.status_tx
            .send_modify(|status| status.connection_state = state);
    }

    async fn disconnect(&mut self) {
        if self.client.try_disconnect().is_err() {
            self.set_state(ConnectionState::Disconnected);
            return;
        }

        // Flush the DISCONNECT packet; give up quietly if the broker is gone
        let eventloop = &mut self.eventloop;
        let _ = tokio::time::timeout(DISCONNECT_GRACE, async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        })
        .await;

        self.set_state(ConnectionState::Disconnected);
        info!("MQTT handler stopped");
    }
}

/// [`StatusPublisher`] backed by a rumqttc client handle
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
}

#[async_trait]
impl StatusPublisher for MqttPublisher {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), BridgeError> {
        self.client
            .publish(topic, QoS::AtLeastOnce, true, payload.as_bytes().to_vec())
            .await?;
        Ok(())
    }
}
