//! Transport layer for node communication
//!
//! This module provides the transport abstraction used by nodes and the
//! sweeper, and its MQTT implementation.

pub use rumqttc::v5::mqttbytes::QoS;

pub mod mqtt;

/// Message delivered by the broker on a subscribed topic
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

impl InboundMessage {
    /// Payload as text, replacing invalid UTF-8
    pub fn payload_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// Message the broker publishes on our behalf if the session is lost
#[derive(Debug, Clone, PartialEq)]
pub struct WillMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

/// Events delivered asynchronously by a connected transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Session (re)established, broker acknowledged the connect
    Connected,
    /// Session lost
    Disconnected { reason: String },
    /// Transport is about to retry the connection
    Reconnecting { attempt: u32 },
    /// Inbound publish on a subscribed topic
    Message(InboundMessage),
}

/// Transport trait for node communication
///
/// This trait provides an abstraction over the broker session to enable
/// dependency injection and testing. Events are delivered over the bounded
/// channel returned by [`Transport::connect`]; the channel closes when the
/// session task ends.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Register the last will; must be called before `connect`
    fn set_last_will(&mut self, will: WillMessage);

    /// Open the session and return the event stream
    async fn connect(
        &mut self,
    ) -> Result<tokio::sync::mpsc::Receiver<TransportEvent>, Self::Error>;

    /// Close the session cleanly
    async fn disconnect(&mut self) -> Result<(), Self::Error>;

    /// Publish a payload to a topic
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), Self::Error>;

    /// Subscribe to a topic filter
    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), Self::Error>;

    /// Remove a subscription
    async fn unsubscribe(&self, topic: &str) -> Result<(), Self::Error>;
}
