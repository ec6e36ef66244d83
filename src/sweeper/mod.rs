//! Retained-state sweeper
//!
//! Subscribes to a wildcard filter and overwrites every retained message it
//! sees with an empty retained payload, which makes the broker drop it. The
//! broker delivers our own overwrite back as a live (non-retained) message,
//! which confirms it. The run ends at the first idle wait with nothing left
//! to confirm.

pub mod tracker;

pub use tracker::{IdleDecision, Observation, RetainedMessageRecord, RetainedTracker};

use crate::observability::metrics::metrics;
use crate::sweep_span;
use crate::transport::{InboundMessage, QoS, Transport, TransportEvent};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn, Instrument};

#[derive(Debug, Error)]
pub enum SweepError {
    #[error("Connect failure: {0}")]
    ConnectFailure(String),
    #[error("Transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Transport event queue closed before the sweep finished")]
    QueueClosed,
}

impl SweepError {
    fn transport<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Transport(Box::new(error))
    }
}

#[derive(Debug, Clone)]
pub struct SweepOptions {
    /// How long a receive may stay idle before the pending set is checked
    pub idle_timeout: Duration,
    /// Give up after this many consecutive idle waits with unconfirmed topics
    pub max_pending_waits: Option<u32>,
    pub topic_filter: String,
}

impl Default for SweepOptions {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(1),
            max_pending_waits: None,
            topic_filter: "#".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepOutcome {
    /// Every overwrite was confirmed
    Converged,
    /// Stopped waiting with overwrites still unconfirmed
    GaveUp,
}

/// Summary of one sweep, printed as JSON by the CLI
#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: SweepOutcome,
    pub overwritten: Vec<String>,
    pub unconfirmed: Vec<String>,
    /// Overwrites the transport refused to publish
    pub failed: Vec<String>,
}

pub struct RetainedSweeper<T: Transport> {
    transport: T,
    options: SweepOptions,
    tracker: RetainedTracker,
    failed: Vec<String>,
}

impl<T: Transport> RetainedSweeper<T> {
    pub fn new(transport: T, options: SweepOptions) -> Self {
        let tracker = RetainedTracker::new(options.max_pending_waits);
        Self {
            transport,
            options,
            tracker,
            failed: Vec::new(),
        }
    }

    /// Get the transport instance for testing
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Connect, sweep until idle and disconnect
    pub async fn run(mut self) -> Result<SweepReport, SweepError> {
        let started_at = Utc::now();
        let span = sweep_span!(filter = %self.options.topic_filter);

        let mut events = self
            .transport
            .connect()
            .await
            .map_err(|e| SweepError::ConnectFailure(e.to_string()))?;

        let result = self.sweep(&mut events).instrument(span).await;

        if let Err(e) = self.transport.disconnect().await {
            warn!(error = %e, "Disconnect failed");
        }

        let outcome = result?;
        let (overwritten, unconfirmed) = self.tracker.finish();
        let report = SweepReport {
            started_at,
            finished_at: Utc::now(),
            outcome,
            overwritten,
            unconfirmed,
            failed: std::mem::take(&mut self.failed),
        };

        info!(
            outcome = ?report.outcome,
            overwritten = report.overwritten.len(),
            unconfirmed = report.unconfirmed.len(),
            failed = report.failed.len(),
            "Sweep finished"
        );
        Ok(report)
    }

    async fn sweep(
        &mut self,
        events: &mut mpsc::Receiver<TransportEvent>,
    ) -> Result<SweepOutcome, SweepError> {
        loop {
            match tokio::time::timeout(self.options.idle_timeout, events.recv()).await {
                Ok(Some(event)) => self.handle_event(event).await?,
                Ok(None) => return Err(SweepError::QueueClosed),
                Err(_) => match self.tracker.on_idle() {
                    IdleDecision::Finished => return Ok(SweepOutcome::Converged),
                    IdleDecision::KeepWaiting {
                        pending,
                        idle_waits,
                    } => {
                        metrics().sweep_idle_timeout();
                        info!(pending, idle_waits, "Waiting for overwrites to be confirmed");
                    }
                    IdleDecision::GiveUp { unconfirmed } => {
                        warn!(
                            unconfirmed = unconfirmed.len(),
                            "Giving up on unconfirmed overwrites"
                        );
                        return Ok(SweepOutcome::GaveUp);
                    }
                },
            }
        }
    }

    async fn handle_event(&mut self, event: TransportEvent) -> Result<(), SweepError> {
        match event {
            TransportEvent::Connected => {
                self.transport
                    .subscribe(&self.options.topic_filter, QoS::AtLeastOnce)
                    .await
                    .map_err(SweepError::transport)?;
                info!(filter = %self.options.topic_filter, "Subscribed");
            }
            TransportEvent::Disconnected { reason } => {
                warn!(reason = %reason, "Disconnected from broker");
            }
            TransportEvent::Reconnecting { attempt } => {
                info!(attempt, "Reconnecting to broker");
            }
            TransportEvent::Message(message) => self.handle_message(message).await,
        }
        Ok(())
    }

    async fn handle_message(&mut self, message: InboundMessage) {
        debug!(
            topic = %message.topic,
            qos = ?message.qos,
            retain = message.retain,
            payload = %message.payload_str(),
            "Received"
        );

        match self.tracker.observe(&message) {
            Observation::NewRetained => {
                metrics().retained_seen();
                match self
                    .transport
                    .publish(&message.topic, Vec::new(), QoS::AtLeastOnce, true)
                    .await
                {
                    Ok(()) => {
                        metrics().overwrite_published();
                        info!(topic = %message.topic, "Overwrote retained message");
                    }
                    Err(e) => {
                        warn!(topic = %message.topic, error = %e, "Failed to overwrite retained message");
                        self.tracker.abandon(&message.topic);
                        self.failed.push(message.topic);
                    }
                }
            }
            Observation::Cleared => {
                metrics().overwrite_confirmed();
                debug!(topic = %message.topic, "Overwrite confirmed");
            }
            Observation::RetainedAgain | Observation::Unrelated => {}
        }
    }
}
