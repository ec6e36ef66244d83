//! Pending-overwrite bookkeeping for the sweeper
//!
//! Pure state: the tracker decides what each inbound message and each idle
//! timeout means; the sweeper does the I/O.

use crate::transport::{InboundMessage, QoS};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub struct RetainedMessageRecord {
    pub topic: String,
    pub saw_retained: bool,
    pub qos: QoS,
}

/// Meaning of one inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// First retained message on the topic; overwrite it
    NewRetained,
    /// Topic already pending; its overwrite is already out
    RetainedAgain,
    /// Live message on a pending topic; the overwrite arrived
    Cleared,
    /// Live message on a topic we never overwrote
    Unrelated,
}

/// What to do after an idle wait expired
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdleDecision {
    Finished,
    KeepWaiting { pending: usize, idle_waits: u32 },
    GiveUp { unconfirmed: Vec<String> },
}

#[derive(Debug, Default)]
pub struct RetainedTracker {
    pending: BTreeMap<String, RetainedMessageRecord>,
    overwritten: Vec<String>,
    consecutive_idle: u32,
    max_pending_waits: Option<u32>,
}

impl RetainedTracker {
    pub fn new(max_pending_waits: Option<u32>) -> Self {
        Self {
            max_pending_waits,
            ..Default::default()
        }
    }

    pub fn observe(&mut self, message: &InboundMessage) -> Observation {
        self.consecutive_idle = 0;

        if message.retain {
            if self.pending.contains_key(&message.topic) {
                return Observation::RetainedAgain;
            }
            self.pending.insert(
                message.topic.clone(),
                RetainedMessageRecord {
                    topic: message.topic.clone(),
                    saw_retained: true,
                    qos: message.qos,
                },
            );
            self.overwritten.push(message.topic.clone());
            Observation::NewRetained
        } else if self.pending.remove(&message.topic).is_some() {
            Observation::Cleared
        } else {
            Observation::Unrelated
        }
    }

    /// Forget a topic whose overwrite could not be published
    pub fn abandon(&mut self, topic: &str) -> Option<RetainedMessageRecord> {
        self.overwritten.retain(|t| t != topic);
        self.pending.remove(topic)
    }

    pub fn on_idle(&mut self) -> IdleDecision {
        if self.pending.is_empty() {
            return IdleDecision::Finished;
        }

        self.consecutive_idle += 1;
        match self.max_pending_waits {
            Some(max) if self.consecutive_idle >= max => IdleDecision::GiveUp {
                unconfirmed: self.pending_topics(),
            },
            _ => IdleDecision::KeepWaiting {
                pending: self.pending.len(),
                idle_waits: self.consecutive_idle,
            },
        }
    }

    pub fn pending_topics(&self) -> Vec<String> {
        self.pending.keys().cloned().collect()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Topics overwritten so far, in the order they were first seen
    pub fn overwritten(&self) -> &[String] {
        &self.overwritten
    }

    /// Drain the tracker at the end of a run: (overwritten, unconfirmed)
    pub fn finish(&mut self) -> (Vec<String>, Vec<String>) {
        let unconfirmed = self.pending_topics();
        self.pending.clear();
        (std::mem::take(&mut self.overwritten), unconfirmed)
    }
}
