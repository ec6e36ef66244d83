//! Impure I/O operations for the MQTT session
//!
//! This module owns the rumqttc client, polls its event loop in a spawned
//! task and turns packets into [`TransportEvent`]s.

use super::connection::{configure_mqtt_options, MqttError, ReconnectConfig, SessionState};
use super::health_monitor::{HealthMonitor, ReconnectionDecision, SessionEvent};
use super::message_handler::{EventRoute, MessageHandler};
use crate::config::MqttSection;
use crate::mqtt_span;
use crate::observability::metrics::metrics;
use crate::transport::{QoS, Transport, TransportEvent, WillMessage};
use async_trait::async_trait;
use rumqttc::v5::{AsyncClient, EventLoop};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

/// MQTT v5 session with automatic reconnection
pub struct MqttSession {
    client_prefix: String,
    config: MqttSection,
    reconnect_config: ReconnectConfig,
    will: Option<WillMessage>,
    client: Option<AsyncClient>,
    event_loop_handle: Option<JoinHandle<()>>,
    state_rx: Option<watch::Receiver<SessionState>>,
    shutdown_tx: Option<watch::Sender<bool>>,
}

impl MqttSession {
    pub fn new(client_prefix: &str, config: MqttSection) -> Self {
        Self {
            client_prefix: client_prefix.to_string(),
            config,
            reconnect_config: ReconnectConfig::default(),
            will: None,
            client: None,
            event_loop_handle: None,
            state_rx: None,
            shutdown_tx: None,
        }
    }

    /// Replace the reconnection policy
    pub fn with_reconnect_config(mut self, reconnect_config: ReconnectConfig) -> Self {
        self.reconnect_config = reconnect_config;
        self
    }

    /// Wait for connection confirmation (ConnAck) with timeout
    async fn wait_for_connection_confirmation(
        mut state_rx: watch::Receiver<SessionState>,
        timeout: Duration,
    ) -> Result<(), MqttError> {
        let timeout_result = tokio::time::timeout(timeout, async {
            loop {
                if state_rx.changed().await.is_err() {
                    return Err(MqttError::ConnectionFailed(
                        "Event loop stopped before ConnAck".to_string(),
                    ));
                }
                let state = state_rx.borrow().clone();
                match state {
                    SessionState::Connected => return Ok(()),
                    SessionState::Connecting => continue,
                    SessionState::Disconnected(reason) | SessionState::Closed(reason) => {
                        return Err(MqttError::ConnectionFailed(reason));
                    }
                    SessionState::Reconnecting(attempt) => {
                        return Err(MqttError::ConnectionFailed(format!(
                            "Initial connect failed, transport entered reconnect attempt {attempt}"
                        )));
                    }
                }
            }
        })
        .await;

        match timeout_result {
            Ok(result) => result,
            Err(_) => Err(MqttError::ConnectionFailed(format!(
                "ConnAck timeout after {}s",
                timeout.as_secs()
            ))),
        }
    }

    /// Move events from the poll task into the bounded consumer queue
    ///
    /// Only this task waits on a full queue. The poll task keeps polling, so
    /// rumqttc keeps draining its request queue while the consumer is itself
    /// blocked publishing.
    async fn relay_events(
        mut relay_rx: mpsc::UnboundedReceiver<TransportEvent>,
        events_tx: mpsc::Sender<TransportEvent>,
    ) {
        while let Some(event) = relay_rx.recv().await {
            if events_tx.send(event).await.is_err() {
                debug!(target: "mqtt_transport", "Event receiver dropped, stopping relay");
                break;
            }
        }
    }

    /// Poll the rumqttc event loop until closed or told to stop
    async fn run_event_loop(
        mut event_loop: EventLoop,
        events_tx: mpsc::UnboundedSender<TransportEvent>,
        state_tx: watch::Sender<SessionState>,
        mut shutdown_rx: watch::Receiver<bool>,
        reconnect_config: ReconnectConfig,
    ) {
        let mut reconnect_attempts = 0u32;
        let mut connected = false;
        let mut closing = false;

        loop {
            let poll_result = tokio::select! {
                changed = shutdown_rx.changed(), if !closing => {
                    if changed.is_err() {
                        break;
                    }
                    // Keep polling so queued publishes and the DISCONNECT get flushed
                    closing = *shutdown_rx.borrow();
                    continue;
                }
                result = event_loop.poll() => result,
            };

            match poll_result {
                Ok(event) => {
                    let route = MessageHandler::route_mqtt_event(&event);
                    match &route {
                        EventRoute::ConnectionAcknowledged => {
                            reconnect_attempts = 0;
                            connected = true;
                            metrics().mqtt_connection_established();
                            let _ = state_tx.send(HealthMonitor::determine_next_state(
                                SessionEvent::ConnAckReceived,
                            ));
                        }
                        EventRoute::Disconnected { .. } => {
                            connected = false;
                            metrics().mqtt_connection_lost();
                            let _ = state_tx.send(HealthMonitor::determine_next_state(
                                SessionEvent::DisconnectedByBroker,
                            ));
                        }
                        EventRoute::InfrastructureEvent(event) => {
                            debug!(target: "mqtt_transport", event = %event, "MQTT event");
                        }
                        EventRoute::MessageReceived(_) => metrics().mqtt_message_received(),
                        EventRoute::OutgoingEvent => {}
                    }

                    if closing {
                        continue;
                    }
                    if let Some(transport_event) = MessageHandler::transport_event(&route) {
                        if events_tx.send(transport_event).is_err() {
                            debug!(target: "mqtt_transport", "Event receiver dropped, stopping event loop");
                            break;
                        }
                    }
                }
                Err(error) => {
                    let reason = error.to_string();
                    let _ = state_tx.send(HealthMonitor::determine_next_state(
                        SessionEvent::NetworkError(reason.clone()),
                    ));

                    if closing {
                        break;
                    }

                    if connected {
                        connected = false;
                        metrics().mqtt_connection_lost();
                        if events_tx
                            .send(TransportEvent::Disconnected { reason })
                            .is_err()
                        {
                            break;
                        }
                    }

                    match HealthMonitor::should_attempt_reconnection(
                        reconnect_attempts,
                        &reconnect_config,
                        closing,
                    ) {
                        ReconnectionDecision::Proceed { attempt, delay_ms } => {
                            reconnect_attempts = attempt;
                            let max_display = reconnect_config
                                .max_attempts
                                .map_or("∞".to_string(), |max| max.to_string());
                            info!(
                                "Attempting reconnection {}/{} after {}ms delay",
                                attempt, max_display, delay_ms
                            );

                            if !Self::interruptible_sleep(&mut shutdown_rx, delay_ms).await {
                                break;
                            }

                            let _ = state_tx.send(HealthMonitor::determine_next_state(
                                SessionEvent::ReconnectionStarted(attempt),
                            ));
                            if events_tx
                                .send(TransportEvent::Reconnecting { attempt })
                                .is_err()
                            {
                                break;
                            }
                        }
                        ReconnectionDecision::AbortShutdownRequested => break,
                        ReconnectionDecision::AbortMaxAttemptsExceeded { max_attempts } => {
                            warn!(max_attempts, "Max reconnection attempts exceeded, giving up");
                            break;
                        }
                    }
                }
            }
        }

        let _ = state_tx.send(HealthMonitor::determine_next_state(SessionEvent::Stopped(
            "Event loop finished".to_string(),
        )));
    }

    /// Perform interruptible sleep with shutdown monitoring
    /// Returns true if sleep completed, false if shutdown requested
    async fn interruptible_sleep(shutdown_rx: &mut watch::Receiver<bool>, delay_ms: u64) -> bool {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!("Shutdown signal received during reconnection delay, stopping");
                    return false;
                }
                true
            }
            _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => true,
        }
    }

    /// Current session state, `None` before `connect`
    pub fn session_state(&self) -> Option<SessionState> {
        self.state_rx.as_ref().map(|rx| rx.borrow().clone())
    }

    /// Check session state before operations and hand out the client
    fn connected_client(&self) -> Result<&AsyncClient, MqttError> {
        let (client, state_rx) = match (&self.client, &self.state_rx) {
            (Some(client), Some(state_rx)) => (client, state_rx),
            _ => {
                return Err(MqttError::NotConnected {
                    state: SessionState::Closed("Session not started".to_string()),
                })
            }
        };

        let current_state = state_rx.borrow().clone();
        if !HealthMonitor::can_publish(&current_state) {
            return Err(MqttError::NotConnected {
                state: current_state,
            });
        }

        Ok(client)
    }

    fn stop_event_loop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(true);
        }
        if let Some(handle) = self.event_loop_handle.take() {
            handle.abort();
        }
        self.client = None;
    }
}

#[async_trait]
impl Transport for MqttSession {
    type Error = MqttError;

    fn set_last_will(&mut self, will: WillMessage) {
        self.will = Some(will);
    }

    /// Only returns success on ConnAck; the first failure is reported
    /// instead of being retried
    async fn connect(&mut self) -> Result<mpsc::Receiver<TransportEvent>, Self::Error> {
        if self.client.is_some() {
            return Err(MqttError::AlreadyStarted);
        }

        let options = configure_mqtt_options(&self.client_prefix, &self.config, self.will.as_ref());
        let (client, event_loop) = AsyncClient::new(options, self.config.event_capacity);

        let (state_tx, state_rx) = watch::channel(SessionState::Connecting);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (events_tx, events_rx) = mpsc::channel(self.config.event_capacity);
        let (relay_tx, relay_rx) = mpsc::unbounded_channel();

        info!(
            host = %self.config.host,
            port = self.config.port,
            "Connecting to MQTT broker"
        );

        let span = mqtt_span!(client = %self.client_prefix, host = %self.config.host);
        // Ends on its own once the poll task drops `relay_tx`
        tokio::spawn(Self::relay_events(relay_rx, events_tx).instrument(span.clone()));
        let handle = tokio::spawn(
            Self::run_event_loop(
                event_loop,
                relay_tx,
                state_tx,
                shutdown_rx,
                self.reconnect_config.clone(),
            )
            .instrument(span),
        );

        self.client = Some(client);
        self.event_loop_handle = Some(handle);
        self.state_rx = Some(state_rx.clone());
        self.shutdown_tx = Some(shutdown_tx);

        let timeout = Duration::from_secs(self.config.connect_timeout_secs);
        if let Err(e) = Self::wait_for_connection_confirmation(state_rx, timeout).await {
            self.stop_event_loop();
            return Err(e);
        }

        Ok(events_rx)
    }

    async fn disconnect(&mut self) -> Result<(), Self::Error> {
        let Some(client) = self.client.take() else {
            return Ok(());
        };

        // Queue the DISCONNECT behind any pending publishes
        let result = client
            .disconnect()
            .await
            .map_err(|e| MqttError::DisconnectFailed(Box::new(e)));

        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(true);
        }

        if let Some(handle) = self.event_loop_handle.take() {
            match tokio::time::timeout(Duration::from_secs(2), handle).await {
                Ok(Ok(())) => debug!("Event loop task shut down gracefully"),
                Ok(Err(e)) if !e.is_cancelled() => warn!("Event loop task ended with error: {}", e),
                Err(_) => warn!("Event loop task didn't shut down gracefully, forcing abort"),
                _ => {}
            }
        }

        info!("MQTT session disconnected");
        result
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), Self::Error> {
        let client = self.connected_client()?;
        client
            .publish(topic, qos, retain, payload)
            .await
            .map_err(|e| {
                metrics().mqtt_publish_failed();
                MqttError::publish_failed(topic, e)
            })?;
        metrics().mqtt_message_published();

        debug!(target: "mqtt_transport", topic = %topic, retain, "Published");
        Ok(())
    }

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), Self::Error> {
        let client = self.connected_client()?;
        client
            .subscribe(topic, qos)
            .await
            .map_err(|e| MqttError::subscription_failed(topic, e))?;

        debug!(target: "mqtt_transport", topic = %topic, "Subscribed");
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), Self::Error> {
        let client = self.connected_client()?;
        client
            .unsubscribe(topic)
            .await
            .map_err(|e| MqttError::subscription_failed(topic, e))?;
        Ok(())
    }
}

impl Drop for MqttSession {
    fn drop(&mut self) {
        // Async disconnect is not possible here; only make sure the task stops
        self.stop_event_loop();
    }
}
