//! Pure message routing for MQTT events
//!
//! This module maps rumqttc events onto routing decisions without doing
//! any I/O.

use crate::transport::{InboundMessage, TransportEvent};
use rumqttc::v5::mqttbytes::v5::Packet;
use rumqttc::v5::Event;

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route MQTT event to appropriate handler (pure routing decision)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
                Packet::Publish(publish) => EventRoute::MessageReceived(InboundMessage {
                    topic: String::from_utf8_lossy(&publish.topic).to_string(),
                    payload: publish.payload.to_vec(),
                    qos: publish.qos,
                    retain: publish.retain,
                }),
                Packet::Disconnect(disconnect) => EventRoute::Disconnected {
                    reason: format!("{:?}", disconnect.reason_code),
                },
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Transport event to forward for a route, if any (pure function)
    pub fn transport_event(route: &EventRoute) -> Option<TransportEvent> {
        match route {
            EventRoute::ConnectionAcknowledged => Some(TransportEvent::Connected),
            EventRoute::MessageReceived(message) => Some(TransportEvent::Message(message.clone())),
            EventRoute::Disconnected { reason } => Some(TransportEvent::Disconnected {
                reason: reason.clone(),
            }),
            EventRoute::InfrastructureEvent(_) | EventRoute::OutgoingEvent => None,
        }
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone)]
pub enum EventRoute {
    /// Connection acknowledged - ready to publish/subscribe
    ConnectionAcknowledged,
    /// Message received on subscribed topic
    MessageReceived(InboundMessage),
    /// MQTT broker disconnected
    Disconnected { reason: String },
    /// Infrastructure event (PingResp, SubAck, etc.)
    InfrastructureEvent(String),
    /// Outgoing event (handled automatically)
    OutgoingEvent,
}
