//! MQTT v5 session built on rumqttc
//!
//! The session is split the same way as everything else that touches I/O:
//!
//! - [`connection`] - session state, reconnect policy and option building
//! - [`message_handler`] - pure mapping from rumqttc events to transport events
//! - [`health_monitor`] - pure reconnection decisions
//! - [`client`] - the event-loop task and the [`Transport`](crate::transport::Transport) impl
//!
//! # Usage
//!
//! ```rust,no_run
//! use mqtt_presence::config::MqttSection;
//! use mqtt_presence::transport::{mqtt::MqttSession, QoS, Transport};
//!
//! # tokio_test::block_on(async {
//! let mut session = MqttSession::new("sensor-node", MqttSection::default());
//! let mut events = session.connect().await?;
//! session.subscribe("#", QoS::AtLeastOnce).await?;
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod health_monitor;
pub mod message_handler;

pub use client::MqttSession;
pub use connection::{MqttError, ReconnectConfig, SessionState};
pub use health_monitor::{HealthMonitor, ReconnectionDecision, SessionEvent};
pub use message_handler::{EventRoute, MessageHandler};
