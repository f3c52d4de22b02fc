//! MQTT side of the bridge: presence events out, connection upkeep.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rumqttc::{AsyncClient, ClientError, ConnectionError, Event, EventLoop, MqttOptions, Packet, QoS};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace};

use crate::config::{MqttConfig, PayloadFormat};
use crate::presence::PresenceEvent;

const KEEP_ALIVE: Duration = Duration::from_secs(30);
const REQUEST_CAPACITY: usize = 32;

/// Payload published on the presented topic
#[derive(Debug, Serialize)]
pub struct PresentedMessage {
    pub uid: String,
    pub card_type: u8,
    pub detected_at: DateTime<Utc>,
}

/// Payload published on the removed topic
#[derive(Debug, Serialize)]
pub struct RemovedMessage {
    pub removed_at: DateTime<Utc>,
}

/// Topic and payload for an event.
///
/// `Raw` is the legacy wire format existing subscribers expect: UID bytes
/// on presented, empty on removed. `Json` adds the card type and a timestamp.
pub fn render(config: &MqttConfig, event: &PresenceEvent, now: DateTime<Utc>) -> (String, Vec<u8>) {
    match (event, config.payload_format) {
        (PresenceEvent::Presented(card), PayloadFormat::Raw) => {
            (config.presented_topic.clone(), card.uid.clone())
        }
        (PresenceEvent::Presented(card), PayloadFormat::Json) => {
            let msg = PresentedMessage {
                uid: card.uid_hex(),
                card_type: card.card_type,
                detected_at: now,
            };
            (
                config.presented_topic.clone(),
                serde_json::to_vec(&msg).unwrap_or_default(),
            )
        }
        (PresenceEvent::Removed, PayloadFormat::Raw) => (config.removed_topic.clone(), Vec::new()),
        (PresenceEvent::Removed, PayloadFormat::Json) => {
            let msg = RemovedMessage { removed_at: now };
            (
                config.removed_topic.clone(),
                serde_json::to_vec(&msg).unwrap_or_default(),
            )
        }
    }
}

/// Build the client and its event loop. Nothing is sent until the event
/// loop is polled.
pub fn connect(config: &MqttConfig) -> (AsyncClient, EventLoop) {
    let client_id = format!("rfid-bridge-{}", uuid::Uuid::new_v4());
    let mut options = MqttOptions::new(client_id, config.host.clone(), config.port);
    options.set_keep_alive(KEEP_ALIVE);
    AsyncClient::new(options, REQUEST_CAPACITY)
}

/// Publish every event from `rx` until the channel closes.
pub async fn publish_events(
    client: AsyncClient,
    config: MqttConfig,
    mut rx: mpsc::Receiver<PresenceEvent>,
) -> Result<(), ClientError> {
    while let Some(event) = rx.recv().await {
        let (topic, payload) = render(&config, &event, Utc::now());
        debug!(%topic, bytes = payload.len(), "publishing presence event");
        client.publish(topic, QoS::AtLeastOnce, false, payload).await?;
    }
    info!("event channel closed, publisher stopping");
    Ok(())
}

/// Poll the event loop until the connection fails.
pub async fn drive_connection(mut eventloop: EventLoop) -> Result<(), ConnectionError> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                info!(code = ?ack.code, "connected to MQTT broker");
            }
            Ok(event) => {
                trace!(?event, "MQTT event");
            }
            Err(e) => {
                error!(error = %e, "MQTT connection error");
                return Err(e);
            }
        }
    }
}
