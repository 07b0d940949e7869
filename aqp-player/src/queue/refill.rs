//! Refill controller
//!
//! Fills one pool buffer from the source and hands it to the device. Runs
//! once per buffer during priming and then once per device completion, always
//! under the session lock, so a buffer's previous completion happens-before
//! its next refill.

use crate::audio::device::{BufferId, QueueBuffer};
use crate::audio::source::PacketRead;
use crate::error::{Error, Result};
use crate::queue::session::Session;
use aqp_common::events::{LifecycleState, PlayerEvent};
use chrono::Utc;
use tracing::{info, trace, warn};

/// What a single refill did with its buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefillOutcome {
    /// Buffer filled and queued on the device
    Enqueued { packets: u32, bytes: u32 },
    /// Source exhausted; buffer stays idle and playback winds down
    EndOfStream,
    /// Session no longer accepts refills; buffer stays idle, untouched
    Skipped,
}

pub(crate) struct RefillController;

impl RefillController {
    /// Refill buffer `id`, which must be idle in the pool
    pub(crate) fn refill(session: &mut Session, id: BufferId) -> Result<RefillOutcome> {
        if !session.accepts_refills() {
            session.stats.skipped_refills += 1;
            trace!("Session {}: refill of {} skipped ({})", session.id, id, session.state);
            return Ok(RefillOutcome::Skipped);
        }

        let mut buffer = session.pool.checkout(id)?;
        match Self::read_into(session, &mut buffer) {
            Ok(read) if read.is_end_of_stream() => {
                session.pool.check_in(buffer)?;
                Self::end_of_stream(session)?;
                Ok(RefillOutcome::EndOfStream)
            }
            Ok(read) => Self::enqueue(session, buffer, read),
            Err(err) => {
                session.pool.check_in(buffer)?;
                Err(err)
            }
        }
    }

    /// Device finished playing `buffer`: take it back, then refill it while
    /// the session is running, or finish draining once it is not.
    pub(crate) fn on_buffer_complete(session: &mut Session, buffer: QueueBuffer) -> Result<()> {
        let id = buffer.id();
        if session.cleaned_up || session.state == LifecycleState::Stopped {
            trace!("Session {}: dropping late completion of {}", session.id, id);
            return Ok(());
        }

        session.pool.check_in(buffer)?;
        session.stats.completions += 1;

        if session.state == LifecycleState::Running && session.running {
            if session.pool.enqueued_count() == 0 {
                session.stats.underrun_warnings += 1;
                warn!(
                    "Session {}: {} completed with nothing else queued, output may underrun",
                    session.id, id
                );
                session.emit(PlayerEvent::UnderrunRisk {
                    session_id: session.id,
                    next_packet: session.cursor.position(),
                    timestamp: Utc::now(),
                });
            }
            Self::refill(session, id).map(|_| ())
        } else {
            session.finish_drain_if_idle();
            Ok(())
        }
    }

    fn read_into(session: &mut Session, buffer: &mut QueueBuffer) -> Result<PacketRead> {
        let packets_to_read = session.sizing.packets_to_read;
        let source = session
            .source
            .as_mut()
            .ok_or_else(|| Error::InvalidState("packet source already closed".to_string()))?;

        let read = source.read_packets(
            session.cursor.position(),
            packets_to_read,
            buffer.data_mut(),
            session.descriptors.scratch_mut(),
        )?;
        session.stats.record_read(read.packets, read.bytes);

        if read.packets > packets_to_read {
            return Err(Error::SourceRead(format!(
                "source returned {} packets, at most {} requested",
                read.packets, packets_to_read
            )));
        }
        buffer.set_fill(read.bytes as usize)?;
        Ok(read)
    }

    fn enqueue(session: &mut Session, buffer: QueueBuffer, read: PacketRead) -> Result<RefillOutcome> {
        let id = buffer.id();
        let Some(queue) = session.queue.as_mut() else {
            session.pool.check_in(buffer)?;
            return Err(Error::InvalidState("output queue already disposed".to_string()));
        };

        // Empty for CBR formats
        let descriptors = session.descriptors.filled(read.packets as usize);
        if let Err(rejected) = queue.enqueue(buffer, descriptors) {
            session.pool.check_in(rejected.buffer)?;
            return Err(rejected.error);
        }
        session.pool.mark_enqueued(id)?;

        let next_packet = session.cursor.advance(read.packets);
        session.stats.record_enqueue();
        trace!(
            "Session {}: enqueued {} ({} packets, {} bytes), next packet {}",
            session.id,
            id,
            read.packets,
            read.bytes,
            next_packet
        );
        session.emit(PlayerEvent::BufferEnqueued {
            session_id: session.id,
            buffer_index: session.pool.index_of(id).unwrap_or(id.0),
            packets: read.packets,
            bytes: read.bytes,
            next_packet,
        });

        Ok(RefillOutcome::Enqueued {
            packets: read.packets,
            bytes: read.bytes,
        })
    }

    fn end_of_stream(session: &mut Session) -> Result<()> {
        session.running = false;
        session.end_of_stream = true;
        info!(
            "Session {}: end of stream after {} packets",
            session.id,
            session.cursor.position()
        );
        session.emit(PlayerEvent::EndOfStream {
            session_id: session.id,
            total_packets: session.cursor.position(),
            timestamp: Utc::now(),
        });

        // While priming, start() decides how the session winds down
        if session.priming {
            return Ok(());
        }

        if let Some(queue) = session.queue.as_mut() {
            queue.stop(false)?;
        }
        if session.pool.enqueued_count() == 0 {
            session.transition(LifecycleState::Stopped);
        } else {
            session.transition(LifecycleState::Stopping);
        }
        Ok(())
    }
}
