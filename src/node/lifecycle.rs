//! Node lifecycle: presence, birth, command handling and periodic sampling
//!
//! One task owns the transport and drives everything. Transport events and
//! a short ticker are multiplexed with `select!`; commands are applied in
//! arrival order and a failure handling one message never stops the loop.

use super::birth::{build_birth_certificate, unique_by_topic, BirthCertificate};
use super::dispatcher::{CommandDispatcher, CommandEffect};
use super::state::{
    AliveFlag, ConnectionEvent, ConnectionState, ExitReason, ParameterReader, ParameterWriter,
    RuntimeParameters, ScanRate, Schedule, ShutdownReason,
};
use crate::{command_span, lifecycle_span};
use crate::error::{NodeError, NodeResult};
use crate::observability::metrics::metrics;
use crate::protocol::{format_decimal, NodeTopics, STATE_ALIVE, STATE_DEAD};
use crate::sensors::{SensorReading, SensorSource};
use crate::transport::{InboundMessage, QoS, Transport, TransportEvent, WillMessage};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn, Instrument};

/// How often the loop wakes to check the sampling schedule and shutdown flag
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Lifecycle tuning that does not change at runtime
#[derive(Debug, Clone)]
pub struct NodeSettings {
    /// Publish a retained DEAD on a clean exit instead of relying on the will
    pub publish_dead_on_exit: bool,
    pub tick_interval: Duration,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            publish_dead_on_exit: true,
            tick_interval: DEFAULT_TICK_INTERVAL,
        }
    }
}

/// Cloneable handle for observing and stopping a running node
#[derive(Debug, Clone)]
pub struct NodeHandle {
    alive: AliveFlag,
    state: watch::Receiver<ConnectionState>,
    parameters: ParameterReader,
}

impl NodeHandle {
    /// Ask the node to stop; the loop exits on its next tick
    pub fn shutdown(&self) {
        if self.alive.request_shutdown(ShutdownReason::Local) {
            info!("Local shutdown requested");
        }
    }

    pub fn is_alive(&self) -> bool {
        self.alive.is_alive()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn scan_rate(&self) -> ScanRate {
        self.parameters.scan_rate()
    }

    /// Wait for the next scan rate change; `None` once the node is dropped
    pub async fn scan_rate_changed(&mut self) -> Option<ScanRate> {
        self.parameters.changed().await.ok().map(|params| params.scan_rate)
    }

    /// Wait until the node reaches `target`; false if the node is gone
    pub async fn wait_for_state(&mut self, target: ConnectionState) -> bool {
        self.state.wait_for(|state| *state == target).await.is_ok()
    }
}

pub struct NodeLifecycle<T, S>
where
    T: Transport,
    S: SensorSource,
{
    topics: NodeTopics,
    transport: T,
    sensors: S,
    dispatcher: CommandDispatcher,
    parameters: ParameterReader,
    alive: AliveFlag,
    state: watch::Sender<ConnectionState>,
    schedule: Schedule,
    events: Option<mpsc::Receiver<TransportEvent>>,
    settings: NodeSettings,
}

impl<T, S> NodeLifecycle<T, S>
where
    T: Transport,
    S: SensorSource,
{
    pub fn new(
        topics: NodeTopics,
        transport: T,
        sensors: S,
        scan_rate: ScanRate,
        settings: NodeSettings,
    ) -> Self {
        let (writer, parameters) = ParameterWriter::new(RuntimeParameters { scan_rate });
        let alive = AliveFlag::new();
        let dispatcher = CommandDispatcher::new(topics.clone(), writer, alive.clone());
        let (state, _) = watch::channel(ConnectionState::Offline);

        Self {
            topics,
            transport,
            sensors,
            dispatcher,
            parameters,
            alive,
            state,
            schedule: Schedule::new(),
            events: None,
            settings,
        }
    }

    pub fn handle(&self) -> NodeHandle {
        NodeHandle {
            alive: self.alive.clone(),
            state: self.state.subscribe(),
            parameters: self.parameters.clone(),
        }
    }

    pub fn topics(&self) -> &NodeTopics {
        &self.topics
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn scan_rate(&self) -> ScanRate {
        self.parameters.scan_rate()
    }

    /// Get the transport instance for testing
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Register the DEAD will and open the session.
    ///
    /// Failing to reach the broker here is fatal; later connection losses
    /// are handled by the transport's reconnect loop.
    pub async fn start(&mut self) -> Result<(), NodeError> {
        info!(
            application_id = %self.topics.application_id(),
            scan_rate = %self.scan_rate(),
            "Starting node"
        );

        self.transport.set_last_will(WillMessage {
            topic: self.topics.state(),
            payload: STATE_DEAD.as_bytes().to_vec(),
            qos: QoS::AtLeastOnce,
            retain: true,
        });

        self.transition(ConnectionEvent::ConnectRequested);
        match self.transport.connect().await {
            Ok(events) => {
                self.events = Some(events);
                Ok(())
            }
            Err(e) => {
                self.transition(ConnectionEvent::Disconnected);
                error!(error = %e, "Failed to connect to broker");
                Err(NodeError::connect_failure(e.to_string()))
            }
        }
    }

    /// Run until shutdown is requested or the transport goes away, then
    /// publish DEAD (if configured) and disconnect.
    pub async fn run(&mut self) -> Result<ExitReason, NodeError> {
        let mut events = self
            .events
            .take()
            .ok_or_else(|| NodeError::connect_failure("node is not started"))?;

        let mut ticker = tokio::time::interval(self.settings.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let span = lifecycle_span!(application_id = %self.topics.application_id());
        async {
            let exit = loop {
                if let Some(reason) = self.alive.shutdown_reason() {
                    break ExitReason::from(reason);
                }

                tokio::select! {
                    event = events.recv() => match event {
                        Some(event) => self.handle_event(event).await,
                        None => {
                            warn!("Transport event stream closed");
                            break ExitReason::TransportClosed;
                        }
                    },
                    _ = ticker.tick() => self.tick().await,
                }
            };

            self.finish(exit).await;
            Ok(exit)
        }
        .instrument(span)
        .await
    }

    /// React to one transport event
    pub async fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => {
                self.transition(ConnectionEvent::Connected);
                if let Err(e) = self.announce().await {
                    error!(error = %e, "Failed to announce node after connect");
                    metrics().handler_failed();
                }
            }
            TransportEvent::Disconnected { reason } => {
                warn!(reason = %reason, "Disconnected from broker");
                self.transition(ConnectionEvent::Disconnected);
            }
            TransportEvent::Reconnecting { attempt } => {
                info!(attempt, "Reconnecting to broker");
                self.transition(ConnectionEvent::Reconnecting);
            }
            TransportEvent::Message(message) => self.handle_message(message).await,
        }
    }

    /// Per-message error boundary
    async fn handle_message(&mut self, message: InboundMessage) {
        let span = command_span!(topic = %message.topic);
        let result = self.apply_command(&message).instrument(span).await;

        match result {
            Ok(()) => {}
            Err(e @ NodeError::UnhandledTopic { .. }) => {
                warn!(topic = %message.topic, error = %e, "Ignoring message on unhandled topic");
                metrics().unhandled_topic();
            }
            Err(e @ NodeError::MalformedCommandPayload { .. }) => {
                warn!(
                    topic = %message.topic,
                    payload = %message.payload_str(),
                    error = %e,
                    "Rejected command"
                );
                metrics().command_rejected();
            }
            Err(e) => {
                error!(topic = %message.topic, error = %e, "Command handler failed");
                metrics().handler_failed();
            }
        }
    }

    async fn apply_command(&mut self, message: &InboundMessage) -> Result<(), NodeError> {
        let effect = self.dispatcher.dispatch(message)?;
        metrics().command_applied(effect.command());

        match effect {
            CommandEffect::Rebirth => {
                info!("Rebirth requested");
                self.publish_birth().await?;
            }
            CommandEffect::Shutdown => {
                info!("Shutdown requested by remote command");
            }
            CommandEffect::ScanRateChanged { previous, current } => {
                info!(%previous, %current, "Scan rate changed");
                self.publish_scan_rate(current).await?;
            }
        }
        Ok(())
    }

    /// Publish ALIVE, subscribe to commands and publish the birth
    async fn announce(&mut self) -> Result<(), NodeError> {
        self.publish(
            self.topics.state(),
            STATE_ALIVE.as_bytes().to_vec(),
            QoS::AtLeastOnce,
            true,
        )
        .await?;

        for topic in self.topics.command_subscriptions() {
            self.transport
                .subscribe(&topic, QoS::AtLeastOnce)
                .await
                .map_err(NodeError::transport)?;
            debug!(topic = %topic, "Subscribed");
        }

        self.publish_birth().await?;
        self.schedule.reset(Instant::now());
        info!(application_id = %self.topics.application_id(), "Node is online");
        Ok(())
    }

    /// Publish the birth certificate, then the values it advertises.
    ///
    /// If the sensors cannot be read the certificate still goes out with the
    /// fixed entries only.
    pub async fn publish_birth(&mut self) -> Result<BirthCertificate, NodeError> {
        let readings = match self.sensors.read_sensors().await {
            Ok(readings) => readings,
            Err(e) => {
                warn!(error = %e, "Sensor read failed, birth lists fixed topics only");
                Vec::new()
            }
        };

        let certificate = build_birth_certificate(&self.topics, &readings);
        let payload = certificate.to_json_pretty()?;
        self.publish(self.topics.birth(), payload.into_bytes(), QoS::AtLeastOnce, true)
            .await?;
        metrics().birth_published();
        info!(topics = certificate.len(), "Published birth certificate");

        self.publish_scan_rate(self.scan_rate()).await?;
        self.publish_readings(&readings).await?;
        Ok(certificate)
    }

    /// Sample and publish if the node is online and the interval elapsed
    pub async fn tick(&mut self) {
        if self.connection_state() != ConnectionState::Online {
            return;
        }

        let now = Instant::now();
        if !self.schedule.is_due(now, self.scan_rate().as_duration()) {
            return;
        }

        if let Err(e) = self.sample().await {
            warn!(error = %e, "Sampling failed");
            metrics().handler_failed();
        }
        self.schedule.reset(now);
    }

    /// Read the sensors and publish one round of values
    async fn sample(&self) -> NodeResult<()> {
        let readings = self.sensors.read_sensors().await?;
        self.publish_readings(&readings).await
    }

    async fn publish_readings(&self, readings: &[SensorReading]) -> Result<(), NodeError> {
        let unique = unique_by_topic(&self.topics, readings);
        for reading in &unique {
            self.publish(
                self.topics.property(&reading.name),
                format_decimal(reading.value).into_bytes(),
                QoS::AtMostOnce,
                false,
            )
            .await?;
        }
        metrics().samples_published(unique.len() as u64);
        debug!(count = unique.len(), "Published sensor values");
        Ok(())
    }

    async fn publish_scan_rate(&self, scan_rate: ScanRate) -> Result<(), NodeError> {
        self.publish(
            self.topics.scan_rate(),
            format_decimal(scan_rate.as_secs_f64()).into_bytes(),
            QoS::AtMostOnce,
            false,
        )
        .await
    }

    async fn publish(
        &self,
        topic: String,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), NodeError> {
        self.transport
            .publish(&topic, payload, qos, retain)
            .await
            .map_err(NodeError::transport)
    }

    async fn finish(&mut self, exit: ExitReason) {
        info!(reason = ?exit, "Stopping node");

        if self.settings.publish_dead_on_exit && self.connection_state() == ConnectionState::Online
        {
            if let Err(e) = self
                .publish(
                    self.topics.state(),
                    STATE_DEAD.as_bytes().to_vec(),
                    QoS::AtLeastOnce,
                    true,
                )
                .await
            {
                warn!(error = %e, "Failed to publish DEAD state");
            }
        }

        if let Err(e) = self.transport.disconnect().await {
            warn!(error = %e, "Disconnect failed");
        }
        self.transition(ConnectionEvent::Disconnected);
    }

    fn transition(&self, event: ConnectionEvent) {
        let current = self.connection_state();
        let next = current.on_event(event);
        if next != current {
            debug!(from = %current, to = %next, ?event, "Connection state changed");
        }
        self.state.send_replace(next);
        metrics().set_node_state(next.as_str());
    }
}
