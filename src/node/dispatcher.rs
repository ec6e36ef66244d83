//! Inbound command dispatch
//!
//! Maps a message on one of the node's command topics to its effect on the
//! node state. Publishing the consequences (a new birth, the new scan rate)
//! is left to the lifecycle, so the dispatcher never touches the transport.

use super::state::{AliveFlag, ParameterWriter, ScanRate, ShutdownReason};
use crate::error::NodeError;
use crate::protocol::{NodeTopics, REBIRTH_SUFFIX, SCAN_RATE_SET_SUFFIX, SHUTDOWN_SUFFIX};
use crate::transport::InboundMessage;
use tracing::debug;

/// What an accepted command changed
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CommandEffect {
    /// Birth certificate must be republished
    Rebirth,
    /// Alive flag was cleared
    Shutdown,
    ScanRateChanged {
        previous: ScanRate,
        current: ScanRate,
    },
}

impl CommandEffect {
    /// Command topic suffix that produced this effect
    pub fn command(&self) -> &'static str {
        match self {
            CommandEffect::Rebirth => REBIRTH_SUFFIX,
            CommandEffect::Shutdown => SHUTDOWN_SUFFIX,
            CommandEffect::ScanRateChanged { .. } => SCAN_RATE_SET_SUFFIX,
        }
    }
}

pub struct CommandDispatcher {
    topics: NodeTopics,
    parameters: ParameterWriter,
    alive: AliveFlag,
}

impl CommandDispatcher {
    pub fn new(topics: NodeTopics, parameters: ParameterWriter, alive: AliveFlag) -> Self {
        Self {
            topics,
            parameters,
            alive,
        }
    }

    /// Apply one inbound message.
    ///
    /// Topics must match a command topic exactly. Rebirth and shutdown ignore
    /// the payload; a rejected scan rate leaves the current one in place.
    pub fn dispatch(&self, message: &InboundMessage) -> Result<CommandEffect, NodeError> {
        let suffix = self
            .topics
            .strip_namespace(&message.topic)
            .ok_or_else(|| NodeError::unhandled_topic(&message.topic))?;

        match suffix {
            REBIRTH_SUFFIX => Ok(CommandEffect::Rebirth),
            SHUTDOWN_SUFFIX => {
                if !self.alive.request_shutdown(ShutdownReason::Remote) {
                    debug!("Shutdown already requested");
                }
                Ok(CommandEffect::Shutdown)
            }
            SCAN_RATE_SET_SUFFIX => {
                let text = std::str::from_utf8(&message.payload).map_err(|e| {
                    NodeError::malformed_payload(&message.topic, format!("not UTF-8: {e}"))
                })?;
                let current = text
                    .parse::<ScanRate>()
                    .map_err(|e| NodeError::malformed_payload(&message.topic, e.to_string()))?;
                let previous = self.parameters.set_scan_rate(current);
                Ok(CommandEffect::ScanRateChanged { previous, current })
            }
            _ => Err(NodeError::unhandled_topic(&message.topic)),
        }
    }
}
