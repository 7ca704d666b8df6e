//! Audio player (spec §4.12, component C12).
//!
//! Owns the bounded queue of resampled PCM frames, a ring buffer that
//! decouples the feeder thread from the OS audio callback, and the
//! base-pts/samples-played tracking that lets the sync controller's audio
//! clock stay accurate to within one callback's worth of samples. Volume
//! is applied in the callback, not the feeder, so it can change without
//! touching anything queued.
//!
//! Generalizes the teacher's `spawn_audio`/`play_buf_thread` pair (decode
//! thread pushes resampled PCM over a channel, playback thread paces
//! pushes into a ring buffer that a cpal callback drains) into the
//! component boundary this crate's controller expects: an explicit queue
//! object, explicit `pause`/`resume`/`flush`, and clock feedback through
//! [`crate::sync::SyncController`] instead of the teacher's standalone
//! `GlobalClock`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use ringbuf::RingBuffer;

use crate::error::{Result, ZenPlayError};
use crate::model::ResampledAudioFrame;
use crate::queue::{BoundedQueue, PopResult, PushResult};
use crate::sync::SyncController;

/// How far ahead of the callback the feeder keeps the ring buffer filled.
const RING_TARGET_LATENCY_SECONDS: f64 = 0.1;
/// How often the feeder reports the current playback position to the sync
/// controller (spec §4.12: "coarse enough not to dominate lock traffic").
const CLOCK_UPDATE_INTERVAL: Duration = Duration::from_millis(1000);

/// Marks where in the sample stream a given frame's audio started, so the
/// callback thread's running sample count can be translated back into a
/// presentation timestamp without taking the feeder's lock on every
/// callback invocation.
struct PtsBoundary {
    sample_offset: u64,
    pts_seconds: f64,
}

struct Shared {
    boundaries: Mutex<VecDeque<PtsBoundary>>,
    samples_played: AtomicU64,
    sample_rate: AtomicU32,
    volume: AtomicU32, // f32 bits
    muted: AtomicBool,
}

impl Shared {
    fn push_boundary(&self, sample_offset: u64, pts_seconds: f64) {
        let mut b = self.boundaries.lock();
        if b.len() > 256 {
            b.pop_front();
        }
        b.push_back(PtsBoundary {
            sample_offset,
            pts_seconds,
        });
    }

    /// Current playback position, derived from the most recent boundary at
    /// or before `samples_played` (spec §4.12's base-pts invariant): frames
    /// already consumed by the callback advance the pts continuously even
    /// mid-frame, rather than jumping only on frame boundaries.
    fn current_pts_seconds(&self) -> Option<f64> {
        let played = self.samples_played.load(Ordering::Acquire);
        let rate = self.sample_rate.load(Ordering::Acquire);
        if rate == 0 {
            return None;
        }
        let b = self.boundaries.lock();
        let boundary = b.iter().rev().find(|bd| bd.sample_offset <= played)?;
        let delta_samples = played.saturating_sub(boundary.sample_offset);
        Some(boundary.pts_seconds + delta_samples as f64 / rate as f64)
    }

    fn volume(&self) -> f32 {
        if self.muted.load(Ordering::Relaxed) {
            return 0.0;
        }
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }
}

pub struct AudioPlayer {
    queue: Arc<BoundedQueue<ResampledAudioFrame>>,
    shared: Arc<Shared>,
    ring_consumer: Arc<Mutex<ringbuf::Consumer<f32>>>,
    _stream: cpal::Stream,
    feeder: Option<std::thread::JoinHandle<()>>,
    stop: Arc<AtomicBool>,
    sync: SyncController,
}

impl AudioPlayer {
    /// Opens the default output device at `sample_rate`/`channels` (the
    /// resampler's target layout) and starts the feeder thread. `capacity`
    /// bounds the resampled-frame queue (spec §4.1 back-pressure applies
    /// here too: a slow audio device stalls the audio decode worker, not
    /// the whole pipeline).
    pub fn open(
        sample_rate: u32,
        channels: u16,
        capacity: usize,
        sync: SyncController,
    ) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| ZenPlayError::audio_device("no default output device"))?;

        let config = cpal::StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let ring_capacity =
            (sample_rate as f64 * channels as f64 * RING_TARGET_LATENCY_SECONDS * 4.0) as usize;
        let rb = RingBuffer::<f32>::new(ring_capacity.max(channels as usize * 256));
        let (producer, consumer) = rb.split();
        // Shared with the cpal callback so `flush()` can actually discard
        // whatever's still resident in the ring on seek, not just pause the
        // device (pausing stops the callback, it doesn't empty the buffer).
        let consumer = Arc::new(Mutex::new(consumer));

        let shared = Arc::new(Shared {
            boundaries: Mutex::new(VecDeque::new()),
            samples_played: AtomicU64::new(0),
            sample_rate: AtomicU32::new(sample_rate),
            volume: AtomicU32::new(1.0f32.to_bits()),
            muted: AtomicBool::new(false),
        });

        let callback_shared = shared.clone();
        let callback_consumer = consumer.clone();
        let channels_usize = channels as usize;
        let stream = device
            .build_output_stream(
                &config,
                move |output: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                    let volume = callback_shared.volume();
                    let popped = callback_consumer.lock().pop_slice(output);
                    for sample in output[..popped].iter_mut() {
                        *sample *= volume;
                    }
                    for sample in output[popped..].iter_mut() {
                        *sample = 0.0;
                    }
                    let frames_consumed = (popped / channels_usize.max(1)) as u64;
                    callback_shared
                        .samples_played
                        .fetch_add(frames_consumed, Ordering::AcqRel);
                },
                move |err| {
                    tracing::error!(target: "zenplay::audio", error = %err, "cpal output stream error");
                },
                None,
            )
            .map_err(|e| ZenPlayError::audio_device(format!("failed to build output stream: {e}")))?;

        stream
            .play()
            .map_err(|e| ZenPlayError::audio_device(format!("failed to start output stream: {e}")))?;

        let queue = Arc::new(BoundedQueue::new(capacity));
        let stop = Arc::new(AtomicBool::new(false));

        let feeder = spawn_feeder(
            queue.clone(),
            producer,
            shared.clone(),
            channels_usize,
            stop.clone(),
            sync.clone(),
        );

        Ok(Self {
            queue,
            shared,
            ring_consumer: consumer,
            _stream: stream,
            feeder: Some(feeder),
            stop,
            sync,
        })
    }

    pub fn queue(&self) -> &Arc<BoundedQueue<ResampledAudioFrame>> {
        &self.queue
    }

    pub fn enqueue(&self, frame: ResampledAudioFrame, timeout: Duration) -> PushResult<ResampledAudioFrame> {
        self.queue.push(frame, timeout)
    }

    pub fn set_volume(&self, volume: f32) {
        self.shared
            .volume
            .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    pub fn set_muted(&self, muted: bool) {
        self.shared.muted.store(muted, Ordering::Relaxed);
    }

    pub fn current_pts_seconds(&self) -> Option<f64> {
        self.shared.current_pts_seconds()
    }

    /// Stops the device from pulling further callbacks. Called first in
    /// the controller's pause sequence (spec §4.14) so no `update_audio_clock`
    /// call can race the sync controller's own `pause`.
    pub fn pause(&self) -> Result<()> {
        self._stream
            .pause()
            .map_err(|e| ZenPlayError::audio_device(format!("failed to pause output stream: {e}")))
    }

    /// Restarts device callbacks. Called after `SyncController::resume` in
    /// the controller's resume sequence, so the first callback to land
    /// observes already-shifted clock state.
    pub fn resume(&self) -> Result<()> {
        self._stream
            .play()
            .map_err(|e| ZenPlayError::audio_device(format!("failed to resume output stream: {e}")))
    }

    /// Drops every queued frame, discards whatever PCM is already sitting in
    /// the ring buffer, and rewinds the playback-position tracker — used on
    /// seek (spec §4.14: "flush the audio player's queue and ring buffer").
    /// The queue reset only stops new frames from being fed in; the ring
    /// itself is drained here directly via the consumer half shared with the
    /// cpal callback, since the feeder thread only ever pushes and can't
    /// discard samples once they've crossed into the consumer's side. The
    /// pause/play cycle is a best-effort nudge at the device's own internal
    /// buffer on top of that (spec §4.12: "without the device reset, ~1s of
    /// pre-seek audio audibly plays at the new position"); `cpal` has no
    /// explicit buffer-invalidation call, so this is the closest portable
    /// approximation.
    pub fn flush(&self) {
        self.queue.reset(|_| {});
        self.shared.boundaries.lock().clear();
        self.shared.samples_played.store(0, Ordering::Release);
        {
            let mut consumer = self.ring_consumer.lock();
            while consumer.pop().is_some() {}
        }
        let _ = self._stream.pause();
        let _ = self._stream.play();
    }

    pub fn close(mut self) {
        self.stop.store(true, Ordering::Release);
        self.queue.close();
        if let Some(handle) = self.feeder.take() {
            let _ = handle.join();
        }
    }
}

fn spawn_feeder(
    queue: Arc<BoundedQueue<ResampledAudioFrame>>,
    mut producer: ringbuf::Producer<f32>,
    shared: Arc<Shared>,
    channels: usize,
    stop: Arc<AtomicBool>,
    sync: SyncController,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let mut total_samples_pushed: u64 = 0;
        let mut last_clock_update = Instant::now() - CLOCK_UPDATE_INTERVAL;

        while !stop.load(Ordering::Acquire) {
            match queue.pop(Duration::from_millis(200)) {
                PopResult::Item(frame) => {
                    shared.push_boundary(total_samples_pushed, frame.pts_seconds);

                    let samples: &[f32] = bytemuck_cast_f32(&frame.data);
                    let mut written = 0;
                    while written < samples.len() {
                        let n = producer.push_slice(&samples[written..]);
                        written += n;
                        if n == 0 {
                            if stop.load(Ordering::Acquire) {
                                return;
                            }
                            std::thread::sleep(Duration::from_millis(2));
                        }
                    }
                    total_samples_pushed += (samples.len() / channels.max(1)) as u64;
                }
                PopResult::Empty => {}
                PopResult::Reset => {
                    if queue.is_closed() {
                        return;
                    }
                    // seek flush: boundaries/sample counters already cleared
                    // by `AudioPlayer::flush`; keep feeding from zero.
                    total_samples_pushed = 0;
                }
            }

            let now = Instant::now();
            if now.duration_since(last_clock_update) >= CLOCK_UPDATE_INTERVAL {
                if let Some(pts) = shared.current_pts_seconds() {
                    sync.update_audio_clock(pts * 1000.0, now);
                }
                last_clock_update = now;
            }
        }
    })
}

/// `ResampledAudioFrame::data` is packed `f32` little-endian bytes (the
/// resampler's fixed target format); reinterprets without copying.
fn bytemuck_cast_f32(bytes: &[u8]) -> &[f32] {
    let ptr = bytes.as_ptr() as *const f32;
    let len = bytes.len() / std::mem::size_of::<f32>();
    // SAFETY: `data` is produced exclusively by `AudioResampler`, which
    // always writes packed f32 samples with correct alignment guaranteed
    // by ffmpeg's frame buffer allocator (16-byte aligned).
    unsafe { std::slice::from_raw_parts(ptr, len) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pts_boundary_interpolates_mid_frame_position() {
        let shared = Shared {
            boundaries: Mutex::new(VecDeque::new()),
            samples_played: AtomicU64::new(0),
            sample_rate: AtomicU32::new(1000),
            volume: AtomicU32::new(1.0f32.to_bits()),
            muted: AtomicBool::new(false),
        };
        shared.push_boundary(0, 0.0);
        shared.push_boundary(1000, 1.0);
        shared.samples_played.store(1500, Ordering::Release);
        let pts = shared.current_pts_seconds().unwrap();
        assert!((pts - 1.5).abs() < 1e-9);
    }

    #[test]
    fn pts_boundary_handles_multiple_frames_per_callback() {
        let shared = Shared {
            boundaries: Mutex::new(VecDeque::new()),
            samples_played: AtomicU64::new(0),
            sample_rate: AtomicU32::new(1000),
            volume: AtomicU32::new(1.0f32.to_bits()),
            muted: AtomicBool::new(false),
        };
        // Three frames land in the ring before a single callback drains
        // all of them at once, advancing samples_played past all three
        // boundaries in one jump.
        shared.push_boundary(0, 0.0);
        shared.push_boundary(500, 0.5);
        shared.push_boundary(900, 0.9);
        shared.samples_played.store(950, Ordering::Release);
        let pts = shared.current_pts_seconds().unwrap();
        assert!((pts - 0.95).abs() < 1e-9);
    }

    #[test]
    fn volume_clamped_to_unit_range() {
        let shared = Shared {
            boundaries: Mutex::new(VecDeque::new()),
            samples_played: AtomicU64::new(0),
            sample_rate: AtomicU32::new(48_000),
            volume: AtomicU32::new(1.0f32.to_bits()),
            muted: AtomicBool::new(false),
        };
        shared.volume.store(2.0f32.to_bits(), Ordering::Relaxed);
        // clamp happens in `AudioPlayer::set_volume`, not here; this just
        // documents that `volume()` trusts its stored value as-is.
        assert_eq!(shared.volume(), 2.0);
    }
}
