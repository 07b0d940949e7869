//! Playback lifecycle
//!
//! `QueuePlayer` is the host-facing handle to one playback session:
//!
//! ```text
//! Uninitialized --initialize--> Primed --start--> Running
//!                                  |                 |  end of stream / stop()
//!                                  |                 v
//!                                  +-----------> Stopping --last completion--> Stopped
//! ```
//!
//! Any fatal error goes straight to Stopped. Stopped is terminal; a new
//! session is needed to play again.
//!
//! The session lives behind one mutex shared with the device's completion
//! handler. A condvar signals state changes so the host can wait for the
//! drain to finish.

use crate::audio::device::{AudioDevice, CompletionHandler, QueueBuffer};
use crate::audio::format::StreamFormat;
use crate::audio::source::PacketSource;
use crate::config::PlayerConfig;
use crate::error::{Error, Result};
use crate::queue::descriptors::PacketDescriptorStore;
use crate::queue::pool::BufferPool;
use crate::queue::refill::{RefillController, RefillOutcome};
use crate::queue::session::Session;
use crate::queue::sizer::{derive_buffer_size_with, BufferSizing};
use crate::queue::stats::PipelineStats;
use aqp_common::events::{EventBus, LifecycleState, PlayerEvent};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

struct Shared {
    session: Mutex<Session>,
    changed: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Session> {
        // A panic while holding the lock leaves the session in a consistent
        // state between operations, so keep going with it
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to one playback session
#[derive(Clone)]
pub struct QueuePlayer {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for QueuePlayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let session = self.shared.lock();
        f.debug_struct("QueuePlayer")
            .field("session_id", &session.id)
            .field("state", &session.state)
            .field("running", &session.running)
            .finish()
    }
}

impl QueuePlayer {
    /// Open `identifier` with source type `S`, then initialize a session
    pub fn open<S: PacketSource + 'static>(
        identifier: &str,
        device: &dyn AudioDevice,
        config: &PlayerConfig,
    ) -> Result<Self> {
        let source = S::open(identifier)?;
        Self::initialize(Box::new(source), device, config)
    }

    /// Build a session around an open source and leave it Primed.
    ///
    /// Sizes the buffers, creates the device queue, forwards the codec
    /// configuration and gain, allocates the pool and fills every buffer
    /// once. On failure everything created so far is disposed and the
    /// source is closed.
    pub fn initialize(
        mut source: Box<dyn PacketSource>,
        device: &dyn AudioDevice,
        config: &PlayerConfig,
    ) -> Result<Self> {
        let (format, sizing) = match Self::plan(source.as_ref(), config) {
            Ok(plan) => plan,
            Err(err) => {
                if let Err(close_err) = source.close() {
                    warn!("Failed to close source after rejected format: {}", close_err);
                }
                return Err(err);
            }
        };
        let codec_config = source.codec_config();

        let descriptors = PacketDescriptorStore::for_format(&format, sizing.packets_to_read);
        let events = EventBus::new(config.event_capacity);
        let session = Session::new(format, sizing, source, descriptors, events);
        let player = Self {
            shared: Arc::new(Shared {
                session: Mutex::new(session),
                changed: Condvar::new(),
            }),
        };

        if let Err(err) = player.prime(device, config, codec_config.as_deref()) {
            if let Err(cleanup_err) = player.cleanup() {
                warn!("Cleanup after failed initialize: {}", cleanup_err);
            }
            return Err(err);
        }

        let session = player.shared.lock();
        info!(
            "Session {} primed: {} buffers of {} bytes, {} packets per read, {}",
            session.id,
            session.pool.len(),
            session.sizing.buffer_size,
            session.sizing.packets_to_read,
            if format.is_vbr() { "VBR" } else { "CBR" }
        );
        drop(session);
        Ok(player)
    }

    /// Validate the source's format and derive buffer sizing
    fn plan(source: &dyn PacketSource, config: &PlayerConfig) -> Result<(StreamFormat, BufferSizing)> {
        config.validate()?;
        let format = source.format();
        format.validate()?;

        let max_packet_size = source.max_packet_size();
        if max_packet_size == 0 {
            return Err(Error::Configuration(
                "source reports a zero maximum packet size".to_string(),
            ));
        }

        let sizing = derive_buffer_size_with(&config.limits, &format, max_packet_size, config.target_seconds);
        if sizing.packets_to_read == 0 {
            return Err(Error::Configuration(format!(
                "buffer of {} bytes cannot hold a {}-byte packet",
                sizing.buffer_size, max_packet_size
            )));
        }
        Ok((format, sizing))
    }

    fn prime(
        &self,
        device: &dyn AudioDevice,
        config: &PlayerConfig,
        codec_config: Option<&[u8]>,
    ) -> Result<()> {
        let format = self.shared.lock().format;
        let handler = completion_handler(Arc::downgrade(&self.shared));
        // Created outside the lock: nothing can complete before the first enqueue
        let queue = device.create_queue(&format, handler)?;

        let mut guard = self.shared.lock();
        let session = &mut *guard;
        // Stored first so a failure below still disposes it at cleanup
        let queue = session.queue.insert(queue);
        if let Some(config_blob) = codec_config {
            debug!("Session {}: forwarding {}-byte codec config", session.id, config_blob.len());
            queue.set_codec_config(config_blob)?;
        }
        queue.set_gain(config.gain)?;
        session.pool = BufferPool::allocate(
            queue.as_mut(),
            config.buffer_count,
            session.sizing.buffer_size as usize,
        )?;

        session.priming = true;
        session.running = true;
        let ids = session.pool.ids().to_vec();
        for id in ids {
            match RefillController::refill(session, id) {
                Ok(RefillOutcome::EndOfStream) => break,
                Ok(_) => {}
                Err(err) => {
                    session.priming = false;
                    session.running = false;
                    return Err(err);
                }
            }
        }
        session.priming = false;
        session.transition(LifecycleState::Primed);
        Ok(())
    }

    /// Primed → Running.
    ///
    /// When priming already reached the end of the stream, the queue is
    /// started only if something was enqueued, and the session goes
    /// straight to Stopping (drain) or Stopped (empty stream).
    pub fn start(&self) -> Result<()> {
        let mut session = self.shared.lock();
        if session.state != LifecycleState::Primed {
            return Err(Error::InvalidState(format!(
                "cannot start a session that is {}",
                session.state
            )));
        }

        let result = Self::start_locked(&mut session);
        let result = result.map_err(|err| session.abort(err));
        drop(session);
        self.shared.changed.notify_all();
        result
    }

    fn start_locked(session: &mut Session) -> Result<()> {
        let in_flight = session.pool.enqueued_count();
        let queue = session
            .queue
            .as_mut()
            .ok_or_else(|| Error::InvalidState("output queue already disposed".to_string()))?;

        if session.end_of_stream {
            if in_flight == 0 {
                info!("Session {}: empty stream, nothing to play", session.id);
                session.transition(LifecycleState::Stopped);
            } else {
                queue.start()?;
                queue.stop(false)?;
                session.transition(LifecycleState::Stopping);
            }
            return Ok(());
        }

        queue.start()?;
        session.running = true;
        session.transition(LifecycleState::Running);
        Ok(())
    }

    /// Caller-requested stop.
    ///
    /// Running: in-flight buffers drain, then Stopped. Primed: stops at
    /// once. Stopping or Stopped: nothing to do.
    pub fn stop(&self) -> Result<()> {
        let mut session = self.shared.lock();
        let result = match session.state {
            LifecycleState::Running => {
                session.running = false;
                let stopped = match session.queue.as_mut() {
                    Some(queue) => queue.stop(false),
                    None => Ok(()),
                };
                match stopped {
                    Ok(()) => {
                        session.transition(LifecycleState::Stopping);
                        session.finish_drain_if_idle();
                        Ok(())
                    }
                    Err(err) => Err(session.abort(err)),
                }
            }
            LifecycleState::Primed | LifecycleState::Uninitialized => {
                session.running = false;
                let stopped = match session.queue.as_mut() {
                    Some(queue) => queue.stop(true),
                    None => Ok(()),
                };
                session.transition(LifecycleState::Stopped);
                stopped
            }
            LifecycleState::Stopping | LifecycleState::Stopped => Ok(()),
        };
        drop(session);
        self.shared.changed.notify_all();
        result
    }

    /// Block until Stopped or until `grace` elapses.
    ///
    /// On timeout the queue is stopped immediately and the session forced to
    /// Stopped. Returns whether the session stopped on its own.
    pub fn wait_until_stopped(&self, grace: Duration) -> bool {
        let session = self.shared.lock();
        let (mut guard, wait) = self
            .shared
            .changed
            .wait_timeout_while(session, grace, |s| s.state != LifecycleState::Stopped)
            .unwrap_or_else(PoisonError::into_inner);
        let session = &mut *guard;

        if !wait.timed_out() || session.state == LifecycleState::Stopped {
            return true;
        }

        warn!(
            "Session {}: still {} after {:?}, forcing stop with {} buffers in flight",
            session.id,
            session.state,
            grace,
            session.pool.enqueued_count()
        );
        session.running = false;
        if let Some(queue) = session.queue.as_mut() {
            if let Err(err) = queue.stop(true) {
                warn!("Session {}: forced stop failed: {}", session.id, err);
            }
        }
        session.transition(LifecycleState::Stopped);
        drop(guard);
        self.shared.changed.notify_all();
        false
    }

    /// Dispose the queue, close the source and release every buffer.
    ///
    /// Stops the session first if needed. Calling it again does nothing.
    pub fn cleanup(&self) -> Result<()> {
        let (queue, source) = {
            let mut guard = self.shared.lock();
            let session = &mut *guard;
            if session.cleaned_up {
                return Ok(());
            }
            session.cleaned_up = true;
            session.running = false;
            session.priming = false;
            if session.state != LifecycleState::Stopped {
                if let Some(queue) = session.queue.as_mut() {
                    if let Err(err) = queue.stop(true) {
                        warn!("Session {}: stop during cleanup failed: {}", session.id, err);
                    }
                }
                session.transition(LifecycleState::Stopped);
            }
            session.descriptors.release();
            session.pool.release();
            debug!("Session {}: released buffers and descriptors", session.id);
            (session.queue.take(), session.source.take())
        };
        self.shared.changed.notify_all();

        // Outside the lock: disposing may wait on the device's completion context
        let disposed = match queue {
            Some(mut queue) => queue.dispose(),
            None => Ok(()),
        };
        let closed = match source {
            Some(mut source) => source.close(),
            None => Ok(()),
        };
        disposed.and(closed)
    }

    /// Current lifecycle state
    pub fn state(&self) -> LifecycleState {
        self.shared.lock().state
    }

    /// True while Running and no stop, end of stream or error has cleared
    /// the running flag
    pub fn is_running(&self) -> bool {
        let session = self.shared.lock();
        session.state == LifecycleState::Running && session.running
    }

    /// Error raised from the device's completion context, if any
    pub fn take_error(&self) -> Option<Error> {
        self.shared.lock().error.take()
    }

    pub fn stats(&self) -> PipelineStats {
        self.shared.lock().stats
    }

    pub fn format(&self) -> StreamFormat {
        self.shared.lock().format
    }

    pub fn sizing(&self) -> BufferSizing {
        self.shared.lock().sizing
    }

    pub fn session_id(&self) -> Uuid {
        self.shared.lock().id
    }

    /// Packets handed to the device so far
    pub fn position(&self) -> u64 {
        self.shared.lock().cursor.position()
    }

    /// Events emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.shared.lock().events.subscribe()
    }
}

/// Completion handler bound to a session. Holds a weak reference so the
/// queue stored inside the session does not keep the session alive.
fn completion_handler(shared: Weak<Shared>) -> CompletionHandler {
    Arc::new(move |buffer: QueueBuffer| {
        let Some(shared) = shared.upgrade() else {
            return;
        };
        let mut session = shared.lock();
        if let Err(err) = RefillController::on_buffer_complete(&mut session, buffer) {
            let err = session.abort(err);
            session.error = Some(err);
        }
        drop(session);
        shared.changed.notify_all();
    })
}
