//! Audio output using cpal
//!
//! `CpalDevice` implements the output queue on top of a cpal stream. Queued
//! buffers are consumed front to back by the real-time data callback; each
//! exhausted buffer is sent over a bounded channel to a completion thread,
//! which hands it back to the session. The callback never blocks: a full
//! channel keeps the buffer until the next callback.
//!
//! Only linear PCM is played. The stream runs at the source's sample rate;
//! there is no resampling, so a device that cannot open that rate is an
//! error.

use crate::audio::device::{
    AudioDevice, BufferId, CompletionHandler, EnqueueRejected, OutputQueue, QueueBuffer,
};
use crate::audio::format::{PacketDescriptor, SampleEncoding, StreamFormat};
use crate::error::{Error, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    Device, FromSample, SampleFormat, SizedSample, Stream, StreamConfig, SupportedStreamConfigRange,
};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// Buffers one queue may allocate unless configured otherwise
pub const DEFAULT_QUEUE_DEPTH: usize = 3;

/// Pending play/pause/shutdown requests for the stream thread
const COMMAND_CAPACITY: usize = 8;

/// Sample layout of the PCM being played
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmLayout {
    pub encoding: SampleEncoding,
    pub bytes_per_sample: usize,
    pub channels: usize,
}

impl PcmLayout {
    /// Layout for `format`, or a device error for anything the callback
    /// cannot convert
    pub fn for_format(format: &StreamFormat) -> Result<Self> {
        let supported = match format.encoding {
            SampleEncoding::SignedInteger => matches!(format.bits_per_sample, 8 | 16 | 24 | 32),
            SampleEncoding::UnsignedInteger => format.bits_per_sample == 8,
            SampleEncoding::Float => format.bits_per_sample == 32,
            SampleEncoding::Encoded => false,
        };
        if !supported || format.is_vbr() || format.channels_per_frame == 0 {
            return Err(Error::Device(format!(
                "Output supports linear PCM only, got {:?} at {} bits",
                format.encoding, format.bits_per_sample
            )));
        }
        Ok(Self {
            encoding: format.encoding,
            bytes_per_sample: format.bits_per_sample.div_ceil(8) as usize,
            channels: format.channels_per_frame as usize,
        })
    }

    pub fn bytes_per_frame(&self) -> usize {
        self.bytes_per_sample * self.channels
    }

    /// Convert one little-endian sample to -1.0..1.0
    pub fn decode(&self, bytes: &[u8]) -> f32 {
        match (self.encoding, bytes) {
            (SampleEncoding::UnsignedInteger, [b0, ..]) => (f32::from(*b0) - 128.0) / 128.0,
            (SampleEncoding::Float, [b0, b1, b2, b3, ..]) => f32::from_le_bytes([*b0, *b1, *b2, *b3]),
            (SampleEncoding::SignedInteger, [b0]) => f32::from(*b0 as i8) / 128.0,
            (SampleEncoding::SignedInteger, [b0, b1]) => {
                f32::from(i16::from_le_bytes([*b0, *b1])) / 32_768.0
            }
            (SampleEncoding::SignedInteger, [b0, b1, b2]) => {
                // Sign-extend through the top byte
                (i32::from_le_bytes([0, *b0, *b1, *b2]) >> 8) as f32 / 8_388_608.0
            }
            (SampleEncoding::SignedInteger, [b0, b1, b2, b3]) => {
                i32::from_le_bytes([*b0, *b1, *b2, *b3]) as f32 / 2_147_483_648.0
            }
            _ => 0.0,
        }
    }
}

/// Buffers owned by the device, shared with the data callback
struct Playback {
    queued: VecDeque<QueueBuffer>,
    /// Played out but not yet accepted by the completion channel
    returning: VecDeque<QueueBuffer>,
    /// Byte offset into the front buffer
    read_offset: usize,
    gain: f32,
    /// stop(false) requested: pause once the queue empties
    draining: bool,
    drained: bool,
}

impl Playback {
    fn new(depth: usize) -> Self {
        Self {
            queued: VecDeque::with_capacity(depth),
            returning: VecDeque::with_capacity(depth),
            read_offset: 0,
            gain: 1.0,
            draining: false,
            drained: false,
        }
    }

    /// Pass a finished buffer to the completion thread without blocking
    fn hand_back(&mut self, buffer: QueueBuffer, completions: &Sender<QueueBuffer>) {
        match completions.try_send(buffer) {
            Ok(()) => {}
            Err(TrySendError::Full(buffer)) => self.returning.push_back(buffer),
            // Receiver gone means the queue is being disposed
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    /// Retry buffers a full channel turned away, oldest first
    fn flush_returning(&mut self, completions: &Sender<QueueBuffer>) {
        while let Some(buffer) = self.returning.pop_front() {
            match completions.try_send(buffer) {
                Ok(()) => {}
                Err(TrySendError::Full(buffer)) => {
                    self.returning.push_front(buffer);
                    return;
                }
                Err(TrySendError::Disconnected(_)) => {
                    self.returning.clear();
                    return;
                }
            }
        }
    }

    /// Render interleaved output, handing back each buffer as it empties.
    /// Returns true the first time a drain completes.
    fn render<T>(
        &mut self,
        out: &mut [T],
        out_channels: usize,
        layout: &PcmLayout,
        completions: &Sender<QueueBuffer>,
    ) -> bool
    where
        T: SizedSample + FromSample<f32>,
    {
        self.flush_returning(completions);
        let frame_bytes = layout.bytes_per_frame();
        let gain = self.gain;

        for frame in out.chunks_mut(out_channels) {
            let source_frame = loop {
                let Some(front) = self.queued.front() else {
                    break None;
                };
                if self.read_offset + frame_bytes <= front.fill() {
                    let start = self.read_offset;
                    self.read_offset += frame_bytes;
                    break Some(start);
                }
                if let Some(done) = self.queued.pop_front() {
                    self.hand_back(done, completions);
                }
                self.read_offset = 0;
            };

            match (source_frame, self.queued.front()) {
                (Some(start), Some(front)) => {
                    let bytes = &front.filled()[start..start + frame_bytes];
                    for (channel, sample) in frame.iter_mut().enumerate() {
                        let offset = (channel % layout.channels) * layout.bytes_per_sample;
                        let value = layout.decode(&bytes[offset..offset + layout.bytes_per_sample]);
                        *sample = T::from_sample((value * gain).clamp(-1.0, 1.0));
                    }
                }
                _ => frame.fill(T::EQUILIBRIUM),
            }
        }

        if self.draining && self.queued.is_empty() && self.returning.is_empty() && !self.drained {
            self.drained = true;
            return true;
        }
        false
    }
}

enum Command {
    Play(Sender<Result<()>>),
    Pause(Option<Sender<Result<()>>>),
    Shutdown,
}

/// cpal output device
pub struct CpalDevice {
    device: Device,
    queue_depth: usize,
}

impl CpalDevice {
    /// List available audio output devices
    pub fn list_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices: Vec<String> = host
            .output_devices()
            .map_err(|e| Error::Device(format!("Failed to enumerate devices: {}", e)))?
            .filter_map(|device| device.name().ok())
            .collect();

        debug!("Found {} output devices", devices.len());
        Ok(devices)
    }

    /// Open an output device by name, falling back to the default device
    /// when the name is not found
    pub fn open(device_name: Option<&str>) -> Result<Self> {
        let host = cpal::default_host();

        let device = match device_name {
            Some(name) => match host
                .output_devices()
                .map_err(|e| Error::Device(format!("Failed to enumerate devices: {}", e)))?
                .find(|d| d.name().ok().as_deref() == Some(name))
            {
                Some(device) => {
                    info!("Found requested audio device: {}", name);
                    device
                }
                None => {
                    warn!("Requested device '{}' not found, falling back to default device", name);
                    host.default_output_device().ok_or_else(|| {
                        Error::Device(format!(
                            "Device '{}' not found and no default device available",
                            name
                        ))
                    })?
                }
            },
            None => host
                .default_output_device()
                .ok_or_else(|| Error::Device("No default output device found".to_string()))?,
        };

        info!(
            "Using audio device: {}",
            device.name().unwrap_or_else(|_| "Unknown".to_string())
        );
        Ok(Self {
            device,
            queue_depth: DEFAULT_QUEUE_DEPTH,
        })
    }

    /// Size the completion channel for `depth` buffers per queue
    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth.max(1);
        self
    }

    pub fn name(&self) -> String {
        self.device
            .name()
            .unwrap_or_else(|_| "Unknown".to_string())
    }

    fn select_config(&self, format: &StreamFormat) -> Result<(StreamConfig, SampleFormat)> {
        let supported = self
            .device
            .supported_output_configs()
            .map_err(|e| Error::Device(format!("Failed to get device configs: {}", e)))?;
        pick_config(supported, format)
    }
}

/// Pick a stream config at the source rate, preferring the source's channel
/// count and f32 samples
fn pick_config(
    supported: impl IntoIterator<Item = SupportedStreamConfigRange>,
    format: &StreamFormat,
) -> Result<(StreamConfig, SampleFormat)> {
    let rate = format.sample_rate.round() as u32;
    let channels = format.channels_per_frame;

    let rank = |c: &SupportedStreamConfigRange| {
        let channel_match = u32::from(c.channels()) == channels;
        let is_f32 = c.sample_format() == SampleFormat::F32;
        (channel_match, is_f32)
    };
    let best = supported
        .into_iter()
        .filter(|c| c.min_sample_rate().0 <= rate && c.max_sample_rate().0 >= rate)
        .filter(|c| {
            matches!(
                c.sample_format(),
                SampleFormat::F32 | SampleFormat::I16 | SampleFormat::U16
            )
        })
        .max_by_key(rank)
        .ok_or_else(|| Error::Device(format!("Device cannot play {} Hz", rate)))?;

    let device_channels = u32::from(best.channels());
    if device_channels < channels {
        warn!(
            "No {}-channel output at {} Hz; playing on {} channels, the rest are dropped",
            channels, rate, device_channels
        );
    } else if device_channels > channels {
        warn!(
            "No {}-channel output at {} Hz; repeating source channels across {}",
            channels, rate, device_channels
        );
    }

    let sample_format = best.sample_format();
    Ok((best.with_sample_rate(cpal::SampleRate(rate)).config(), sample_format))
}

impl AudioDevice for CpalDevice {
    fn create_queue(
        &self,
        format: &StreamFormat,
        on_complete: CompletionHandler,
    ) -> Result<Box<dyn OutputQueue>> {
        let layout = PcmLayout::for_format(format)?;
        let (config, sample_format) = self.select_config(format)?;
        debug!(
            "Audio config: sample_rate={}, channels={}, format={:?}",
            config.sample_rate.0, config.channels, sample_format
        );

        let playback = Arc::new(Mutex::new(Playback::new(self.queue_depth)));
        let (completion_tx, completion_rx) = bounded::<QueueBuffer>(self.queue_depth);
        let (command_tx, command_rx) = bounded::<Command>(COMMAND_CAPACITY);

        let completion_thread = thread::Builder::new()
            .name("aqp-completion".to_string())
            .spawn(move || {
                for buffer in completion_rx.iter() {
                    on_complete(buffer);
                }
                debug!("Completion thread exiting");
            })?;

        let stream_thread = spawn_stream_thread(StreamParts {
            device: self.device.clone(),
            config,
            sample_format,
            layout,
            playback: Arc::clone(&playback),
            completions: completion_tx.clone(),
            commands: command_rx,
            pause_tx: command_tx.clone(),
        })?;

        Ok(Box::new(CpalQueue {
            playback,
            commands: command_tx,
            completions: Some(completion_tx),
            stream_thread: Some(stream_thread),
            completion_thread: Some(completion_thread),
            next_id: 0,
            depth: self.queue_depth,
            codec_config: None,
            disposed: false,
        }))
    }
}

struct StreamParts {
    device: Device,
    config: StreamConfig,
    sample_format: SampleFormat,
    layout: PcmLayout,
    playback: Arc<Mutex<Playback>>,
    completions: Sender<QueueBuffer>,
    commands: Receiver<Command>,
    pause_tx: Sender<Command>,
}

/// cpal streams are not Send on every platform, so one thread builds the
/// stream, owns it, and obeys play/pause commands until shutdown.
fn spawn_stream_thread(parts: StreamParts) -> Result<JoinHandle<()>> {
    let (ready_tx, ready_rx) = bounded::<Result<()>>(1);

    let handle = thread::Builder::new()
        .name("aqp-stream".to_string())
        .spawn(move || {
            let commands = parts.commands.clone();
            let stream = match parts.sample_format {
                SampleFormat::F32 => build_stream::<f32>(parts),
                SampleFormat::I16 => build_stream::<i16>(parts),
                SampleFormat::U16 => build_stream::<u16>(parts),
                other => Err(Error::Device(format!("Unsupported sample format: {:?}", other))),
            };
            let stream = match stream {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    stream
                }
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                    return;
                }
            };

            for command in commands.iter() {
                match command {
                    Command::Play(reply) => {
                        let result = stream
                            .play()
                            .map_err(|e| Error::Device(format!("Failed to start stream: {}", e)));
                        let _ = reply.send(result);
                    }
                    Command::Pause(reply) => {
                        let result = stream
                            .pause()
                            .map_err(|e| Error::Device(format!("Failed to pause stream: {}", e)));
                        match reply {
                            Some(reply) => {
                                let _ = reply.send(result);
                            }
                            None => {
                                if let Err(err) = result {
                                    warn!("Pause after drain failed: {}", err);
                                }
                            }
                        }
                    }
                    Command::Shutdown => break,
                }
            }
            debug!("Stream thread exiting");
        })?;

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(handle),
        Ok(Err(err)) => {
            let _ = handle.join();
            Err(err)
        }
        Err(_) => {
            let _ = handle.join();
            Err(Error::Device("Stream thread exited during setup".to_string()))
        }
    }
}

fn build_stream<T>(parts: StreamParts) -> Result<Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let out_channels = usize::from(parts.config.channels);
    let layout = parts.layout;
    let playback = parts.playback;
    let completions = parts.completions;
    let pause_tx = parts.pause_tx;

    let stream = parts.device.build_output_stream(
        &parts.config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            // Never wait on the lock in the real-time context
            let Ok(mut playback) = playback.try_lock() else {
                data.fill(T::EQUILIBRIUM);
                return;
            };
            if playback.render(data, out_channels, &layout, &completions) {
                // A full command channel already has the stream thread busy
                let _ = pause_tx.try_send(Command::Pause(None));
            }
        },
        move |err| {
            error!("Audio stream error: {}", err);
        },
        None,
    )
    .map_err(|e| Error::Device(format!("Failed to build stream: {}", e)))?;
    Ok(stream)
}

struct CpalQueue {
    playback: Arc<Mutex<Playback>>,
    commands: Sender<Command>,
    completions: Option<Sender<QueueBuffer>>,
    stream_thread: Option<JoinHandle<()>>,
    completion_thread: Option<JoinHandle<()>>,
    next_id: usize,
    /// Buffers the completion channel can hold at once
    depth: usize,
    codec_config: Option<Vec<u8>>,
    disposed: bool,
}

impl CpalQueue {
    fn playback(&self) -> std::sync::MutexGuard<'_, Playback> {
        self.playback.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn request(&self, command: impl FnOnce(Sender<Result<()>>) -> Command) -> Result<()> {
        let (reply_tx, reply_rx) = bounded(1);
        self.commands
            .send(command(reply_tx))
            .map_err(|_| Error::Device("Stream thread is gone".to_string()))?;
        reply_rx
            .recv()
            .map_err(|_| Error::Device("Stream thread did not reply".to_string()))?
    }
}

impl OutputQueue for CpalQueue {
    fn allocate_buffer(&mut self, capacity: usize) -> Result<QueueBuffer> {
        if self.disposed {
            return Err(Error::Device("Queue already disposed".to_string()));
        }
        if self.next_id >= self.depth {
            return Err(Error::Device(format!(
                "Queue holds at most {} buffers",
                self.depth
            )));
        }
        let buffer = QueueBuffer::new(BufferId(self.next_id), capacity);
        self.next_id += 1;
        Ok(buffer)
    }

    fn enqueue(
        &mut self,
        buffer: QueueBuffer,
        _descriptors: &[PacketDescriptor],
    ) -> std::result::Result<(), EnqueueRejected> {
        if self.disposed {
            return Err(EnqueueRejected {
                buffer,
                error: Error::Device("Queue already disposed".to_string()),
            });
        }
        let mut playback = self.playback();
        playback.queued.push_back(buffer);
        Ok(())
    }

    fn set_codec_config(&mut self, config: &[u8]) -> Result<()> {
        debug!("PCM output ignores {}-byte codec config", config.len());
        self.codec_config = Some(config.to_vec());
        Ok(())
    }

    fn set_gain(&mut self, gain: f32) -> Result<()> {
        self.playback().gain = gain.clamp(0.0, 1.0);
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        {
            let mut playback = self.playback();
            playback.draining = false;
            playback.drained = false;
        }
        self.request(Command::Play)?;
        info!("Audio stream started");
        Ok(())
    }

    fn stop(&mut self, immediate: bool) -> Result<()> {
        if !immediate {
            let mut playback = self.playback();
            playback.draining = true;
            if !playback.queued.is_empty() || !playback.returning.is_empty() {
                debug!("Draining {} queued buffers before stop", playback.queued.len());
                return Ok(());
            }
            playback.drained = true;
        }

        self.request(|reply| Command::Pause(Some(reply)))?;
        if immediate {
            // Hand everything still queued back to the session
            let flushed: Vec<QueueBuffer> = {
                let mut playback = self.playback();
                playback.read_offset = 0;
                let returning: Vec<QueueBuffer> = playback.returning.drain(..).collect();
                returning.into_iter().chain(playback.queued.drain(..)).collect()
            };
            if let Some(completions) = &self.completions {
                // Every allocated buffer fits in the channel, so this never blocks
                for buffer in flushed {
                    if let Err(err) = completions.try_send(buffer) {
                        warn!("Dropped flushed buffer {:?}", err.into_inner().id());
                    }
                }
            }
        }
        info!("Audio stream stopped");
        Ok(())
    }

    fn dispose(&mut self) -> Result<()> {
        if self.disposed {
            return Ok(());
        }
        self.disposed = true;

        let _ = self.commands.send(Command::Shutdown);
        if let Some(handle) = self.stream_thread.take() {
            if handle.join().is_err() {
                error!("Stream thread panicked");
            }
        }
        {
            let mut playback = self.playback();
            playback.queued.clear();
            playback.returning.clear();
        }

        // Completion thread ends once every sender is gone
        self.completions = None;
        if let Some(handle) = self.completion_thread.take() {
            // The last session handle can be dropped from inside a completion
            if handle.thread().id() == thread::current().id() {
                return Ok(());
            }
            if handle.join().is_err() {
                error!("Completion thread panicked");
            }
        }
        debug!("Output queue disposed");
        Ok(())
    }
}

impl Drop for CpalQueue {
    fn drop(&mut self) {
        let _ = self.dispose();
    }
}
