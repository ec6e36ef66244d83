//! Mock implementations for testing
//!
//! [`MockTransport`] records every publish, subscription and will, and lets
//! a test inject transport events. With broker echo enabled it delivers each
//! publish back to matching subscriptions the way a broker delivers a live
//! publish: with the retain flag cleared.

use crate::sensors::{SensorError, SensorReading, SensorSource};
use crate::transport::mqtt::{MqttError, SessionState};
use crate::transport::{InboundMessage, QoS, Transport, TransportEvent, WillMessage};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError};
use tokio::sync::{mpsc, Mutex};

/// One recorded publish
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

impl PublishedMessage {
    pub fn payload_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// Matches the default `event_capacity` of a real session
const EVENT_CAPACITY: usize = 100;

#[derive(Debug, Clone)]
pub struct MockTransport {
    published: Arc<Mutex<Vec<PublishedMessage>>>,
    subscriptions: Arc<Mutex<Vec<String>>>,
    subscribe_calls: Arc<AtomicUsize>,
    will: Arc<std::sync::Mutex<Option<WillMessage>>>,
    events: Arc<Mutex<Option<mpsc::Sender<TransportEvent>>>>,
    connected: Arc<AtomicBool>,
    disconnects: Arc<AtomicUsize>,
    should_fail: bool,
    broker_echo: bool,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self {
            published: Arc::default(),
            subscriptions: Arc::default(),
            subscribe_calls: Arc::default(),
            will: Arc::default(),
            events: Arc::default(),
            connected: Arc::default(),
            disconnects: Arc::default(),
            should_fail: false,
            broker_echo: false,
        }
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every operation fails
    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }

    /// Deliver publishes back to matching subscriptions
    pub fn with_broker_echo(mut self) -> Self {
        self.broker_echo = true;
        self
    }

    /// Push an event to the consumer; false if not connected or closed
    pub async fn inject(&self, event: TransportEvent) -> bool {
        let sender = self.events.lock().await.clone();
        match sender {
            Some(sender) => sender.send(event).await.is_ok(),
            None => false,
        }
    }

    /// Inject a message as the broker would deliver it
    pub async fn inject_message(&self, topic: &str, payload: &[u8], retain: bool) -> bool {
        self.inject(TransportEvent::Message(InboundMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            qos: QoS::AtLeastOnce,
            retain,
        }))
        .await
    }

    /// Drop the event sender so the consumer sees the stream end
    pub async fn close_events(&self) {
        self.events.lock().await.take();
    }

    pub async fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().await.clone()
    }

    pub async fn published_on(&self, topic: &str) -> Vec<PublishedMessage> {
        self.published
            .lock()
            .await
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    pub async fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().await.clone()
    }

    /// Subscribe calls, counting repeats of the same filter
    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    pub fn last_will(&self) -> Option<WillMessage> {
        self.will
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    fn ensure_connected(&self) -> Result<(), MqttError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(MqttError::NotConnected {
                state: SessionState::Disconnected("mock transport not connected".to_string()),
            })
        }
    }

    async fn echo(&self, topic: &str, payload: &[u8], qos: QoS) {
        let matched = self
            .subscriptions
            .lock()
            .await
            .iter()
            .any(|filter| topic_matches(filter, topic));
        if !matched {
            return;
        }

        if let Some(sender) = self.events.lock().await.as_ref() {
            // The consumer may be the one publishing, so never block here
            let _ = sender.try_send(TransportEvent::Message(InboundMessage {
                topic: topic.to_string(),
                payload: payload.to_vec(),
                qos,
                retain: false,
            }));
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Error = MqttError;

    fn set_last_will(&mut self, will: WillMessage) {
        *self.will.lock().unwrap_or_else(PoisonError::into_inner) = Some(will);
    }

    async fn connect(&mut self) -> Result<mpsc::Receiver<TransportEvent>, Self::Error> {
        if self.should_fail {
            return Err(MqttError::ConnectionFailed(
                "Mock connection failure".to_string(),
            ));
        }
        if self.is_connected() {
            return Err(MqttError::AlreadyStarted);
        }

        let (tx, rx) = mpsc::channel(EVENT_CAPACITY);
        let _ = tx.try_send(TransportEvent::Connected);
        *self.events.lock().await = Some(tx);
        self.connected.store(true, Ordering::SeqCst);
        Ok(rx)
    }

    async fn disconnect(&mut self) -> Result<(), Self::Error> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        self.events.lock().await.take();
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), Self::Error> {
        if self.should_fail {
            return Err(MqttError::publish_failed(
                topic,
                std::io::Error::other("Mock publish failure"),
            ));
        }
        self.ensure_connected()?;

        if self.broker_echo {
            self.echo(topic, &payload, qos).await;
        }
        self.published.lock().await.push(PublishedMessage {
            topic: topic.to_string(),
            payload,
            qos,
            retain,
        });
        Ok(())
    }

    async fn subscribe(&self, topic: &str, _qos: QoS) -> Result<(), Self::Error> {
        if self.should_fail {
            return Err(MqttError::subscription_failed(
                topic,
                std::io::Error::other("Mock subscribe failure"),
            ));
        }
        self.ensure_connected()?;

        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        let mut subscriptions = self.subscriptions.lock().await;
        if !subscriptions.iter().any(|s| s == topic) {
            subscriptions.push(topic.to_string());
        }
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), Self::Error> {
        self.ensure_connected()?;
        self.subscriptions.lock().await.retain(|s| s != topic);
        Ok(())
    }
}

/// MQTT topic filter matching with `+` and `#` wildcards
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Sensor source returning canned readings
#[derive(Debug, Clone, Default)]
pub struct MockSensorSource {
    readings: Arc<Mutex<Vec<SensorReading>>>,
    failing: Arc<AtomicBool>,
    reads: Arc<AtomicUsize>,
}

impl MockSensorSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_readings(readings: Vec<SensorReading>) -> Self {
        Self {
            readings: Arc::new(Mutex::new(readings)),
            ..Default::default()
        }
    }

    pub async fn set_readings(&self, readings: Vec<SensorReading>) {
        *self.readings.lock().await = readings;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SensorSource for MockSensorSource {
    async fn read_sensors(&self) -> Result<Vec<SensorReading>, SensorError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(SensorError::NonZeroExit {
                command: "mock-sensors".to_string(),
                status: "exit status: 1".to_string(),
                stderr: "No sensors found!".to_string(),
            });
        }
        Ok(self.readings.lock().await.clone())
    }
}
