//! Session state shared between host control calls and device completions
//!
//! Everything mutable about one playback lives here, behind a single lock
//! owned by `QueuePlayer`.

use crate::audio::device::OutputQueue;
use crate::audio::format::StreamFormat;
use crate::audio::source::PacketSource;
use crate::error::Error;
use crate::queue::cursor::StreamCursor;
use crate::queue::descriptors::PacketDescriptorStore;
use crate::queue::pool::BufferPool;
use crate::queue::sizer::BufferSizing;
use crate::queue::stats::PipelineStats;
use aqp_common::events::{EventBus, LifecycleState, PlayerEvent};
use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

pub(crate) struct Session {
    pub(crate) id: Uuid,
    pub(crate) state: LifecycleState,
    /// Cleared on end of stream, caller stop and fatal errors
    pub(crate) running: bool,
    /// True while initialize fills the pool for the first time
    pub(crate) priming: bool,
    /// The source returned zero packets at least once
    pub(crate) end_of_stream: bool,
    pub(crate) cleaned_up: bool,
    pub(crate) format: StreamFormat,
    pub(crate) sizing: BufferSizing,
    pub(crate) source: Option<Box<dyn PacketSource>>,
    pub(crate) queue: Option<Box<dyn OutputQueue>>,
    pub(crate) pool: BufferPool,
    pub(crate) descriptors: PacketDescriptorStore,
    pub(crate) cursor: StreamCursor,
    pub(crate) stats: PipelineStats,
    /// Failure raised in the completion context, kept for the host
    pub(crate) error: Option<Error>,
    pub(crate) events: EventBus,
}

impl Session {
    pub(crate) fn new(
        format: StreamFormat,
        sizing: BufferSizing,
        source: Box<dyn PacketSource>,
        descriptors: PacketDescriptorStore,
        events: EventBus,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: LifecycleState::Uninitialized,
            running: false,
            priming: false,
            end_of_stream: false,
            cleaned_up: false,
            format,
            sizing,
            source: Some(source),
            queue: None,
            pool: BufferPool::default(),
            descriptors,
            cursor: StreamCursor::new(),
            stats: PipelineStats::default(),
            error: None,
            events,
        }
    }

    /// Refills proceed while priming, or while Running with the flag set
    pub(crate) fn accepts_refills(&self) -> bool {
        self.priming || (self.state == LifecycleState::Running && self.running)
    }

    /// Move to `to`, logging and broadcasting the change. Same-state moves
    /// and moves out of Stopped are ignored.
    pub(crate) fn transition(&mut self, to: LifecycleState) {
        let from = self.state;
        if from == to || from.is_terminal() {
            return;
        }
        if !from.can_transition_to(to) {
            warn!(
                "Session {}: ignoring invalid transition {} -> {}",
                self.id, from, to
            );
            return;
        }

        self.state = to;
        info!("Session {}: {} -> {}", self.id, from, to);
        self.emit(PlayerEvent::StateChanged {
            session_id: self.id,
            old_state: from,
            new_state: to,
            timestamp: Utc::now(),
        });
    }

    /// Stopping ends once nothing is left in flight
    pub(crate) fn finish_drain_if_idle(&mut self) {
        if self.state == LifecycleState::Stopping && self.pool.enqueued_count() == 0 {
            self.transition(LifecycleState::Stopped);
        }
    }

    /// Halt playback after a fatal error: immediate queue stop, Stopped,
    /// error broadcast. Returns the error for the caller to keep or return.
    pub(crate) fn abort(&mut self, err: Error) -> Error {
        error!("Session {}: {}", self.id, err);
        self.running = false;
        self.priming = false;
        if let Some(queue) = self.queue.as_mut() {
            if let Err(stop_err) = queue.stop(true) {
                warn!("Session {}: queue stop after failure: {}", self.id, stop_err);
            }
        }
        self.transition(LifecycleState::Stopped);
        self.emit(PlayerEvent::Error {
            session_id: self.id,
            message: err.to_string(),
            timestamp: Utc::now(),
        });
        err
    }

    pub(crate) fn emit(&self, event: PlayerEvent) {
        self.events.emit_lossy(event);
    }
}
