// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Event Bus Implementation - Pub/Sub for Fleet Events
//
// Provides in-memory event streaming using tokio broadcast channels.
// The fleet manager journal stays the source of truth; the bus only fans
// envelopes out to live observers (event log, renderers, CLI watchers).

use crate::domain::events::{EventEnvelope, FleetEvent};
use crate::domain::robot::RobotId;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Event bus for publishing and subscribing to fleet events
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<EventEnvelope>>,
}

impl EventBus {
    /// Create a new event bus with specified channel capacity
    /// Capacity determines how many events can be buffered before slow
    /// subscribers start lagging
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    /// Publish an envelope to all subscribers. Returns the number of
    /// receivers that got it.
    pub fn publish(&self, envelope: EventEnvelope) -> usize {
        debug!(sequence = envelope.sequence, tick = envelope.tick, "Publishing fleet event");

        let receiver_count = self.sender.send(envelope).unwrap_or(0);
        if receiver_count == 0 {
            debug!("No subscribers listening to event");
        }
        receiver_count
    }

    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe and filter for events involving one robot
    pub fn subscribe_robot(&self, robot: RobotId) -> RobotEventReceiver {
        RobotEventReceiver {
            receiver: self.sender.subscribe(),
            robot,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

fn map_recv_error(e: broadcast::error::RecvError) -> EventBusError {
    match e {
        broadcast::error::RecvError::Closed => EventBusError::Closed,
        broadcast::error::RecvError::Lagged(n) => {
            warn!("Event receiver lagged by {} events", n);
            EventBusError::Lagged(n)
        }
    }
}

/// Receiver for all fleet events
pub struct EventReceiver {
    receiver: broadcast::Receiver<EventEnvelope>,
}

impl EventReceiver {
    /// Receive the next event (waits until one is available)
    pub async fn recv(&mut self) -> Result<EventEnvelope, EventBusError> {
        self.receiver.recv().await.map_err(map_recv_error)
    }

    pub fn try_recv(&mut self) -> Result<EventEnvelope, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }
}

/// Receiver for robot-specific events (filtered)
pub struct RobotEventReceiver {
    receiver: broadcast::Receiver<EventEnvelope>,
    robot: RobotId,
}

impl RobotEventReceiver {
    /// Receive the next event involving the robot. Conflicts are delivered
    /// to both participants.
    pub async fn recv(&mut self) -> Result<EventEnvelope, EventBusError> {
        loop {
            let envelope = self.receiver.recv().await.map_err(map_recv_error)?;
            if self.matches(&envelope.event) {
                return Ok(envelope);
            }
        }
    }

    fn matches(&self, event: &FleetEvent) -> bool {
        event.involves(self.robot)
    }
}

/// Errors that can occur when receiving events
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}
