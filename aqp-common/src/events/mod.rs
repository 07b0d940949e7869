//! Event types for the AQP event system
//!
//! Provides the player event definitions and the EventBus used to publish
//! them.

mod lifecycle_types;

pub use lifecycle_types::LifecycleState;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Player event types
///
/// Emitted by a queue session as it moves through its lifecycle. Events
/// carry the session id so a subscriber watching several sessions over time
/// can tell them apart.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PlayerEvent {
    /// Lifecycle state changed
    StateChanged {
        session_id: Uuid,
        /// State before change
        old_state: LifecycleState,
        /// State after change
        new_state: LifecycleState,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A buffer was refilled and handed to the output device
    BufferEnqueued {
        session_id: Uuid,
        /// Pool slot of the buffer
        buffer_index: usize,
        /// Packets carried by the buffer
        packets: u32,
        /// Bytes carried by the buffer
        bytes: u32,
        /// Cursor position after the read
        next_packet: u64,
    },

    /// Source returned zero packets; playback drains and stops
    EndOfStream {
        session_id: Uuid,
        /// Total packets delivered to the device
        total_packets: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A completion arrived while no other buffer was in flight
    ///
    /// The device is playing silence until the refill lands.
    UnderrunRisk {
        session_id: Uuid,
        /// Cursor position when the starvation was noticed
        next_packet: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Fatal session error; the session is stopped
    Error {
        session_id: Uuid,
        message: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl PlayerEvent {
    /// Session this event belongs to
    pub fn session_id(&self) -> Uuid {
        match self {
            PlayerEvent::StateChanged { session_id, .. }
            | PlayerEvent::BufferEnqueued { session_id, .. }
            | PlayerEvent::EndOfStream { session_id, .. }
            | PlayerEvent::UnderrunRisk { session_id, .. }
            | PlayerEvent::Error { session_id, .. } => *session_id,
        }
    }
}

// ========================================
// EventBus Implementation
// ========================================

/// Event distribution bus for player events
///
/// Uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers don't block the refill path)
/// - Multiple concurrent subscribers
/// - Lagged message detection for slow subscribers
///
/// `emit` is synchronous, so the bus can be used from the device
/// completion thread without a runtime.
///
/// # Examples
///
/// ```
/// use aqp_common::events::{EventBus, LifecycleState, PlayerEvent};
///
/// let event_bus = EventBus::new(64);
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit_lossy(PlayerEvent::StateChanged {
///     session_id: uuid::Uuid::new_v4(),
///     old_state: LifecycleState::Primed,
///     new_state: LifecycleState::Running,
///     timestamp: chrono::Utc::now(),
/// });
///
/// assert!(rx.try_recv().is_ok());
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PlayerEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// `capacity` is the number of events buffered per subscriber before
    /// the oldest are dropped.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            capacity: capacity.max(1),
        }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: PlayerEvent,
    ) -> Result<usize, broadcast::error::SendError<PlayerEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: PlayerEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
