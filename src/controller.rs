//! Playback controller (spec §4.14, component C14).
//!
//! Owns every other component for the lifetime of one opened media source
//! and drives the worker threads that move data between them: a demux
//! worker, one decode worker per active stream, a sync-tick logger, and a
//! seek worker that serializes and coalesces seek requests. Construction
//! uses ordinary `?`-propagation and RAII — a failed `open` just drops
//! whatever was built so far, in reverse order, with no separate rollback
//! list to keep in sync with the happy path.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use ffmpeg_next::{codec, ffi};

use crate::audio::{AudioDecoder, AudioPlayer, AudioResampler};
use crate::config::{RenderPath, RenderPathConfig};
use crate::demux::{Demuxer, ReadOutcome};
use crate::error::{Result, ZenPlayError};
use crate::hwaccel::{HardwareDecodeContext, HwBackend};
use crate::model::{Packet, ResampledAudioFrame, Timebase, VideoFrame};
use crate::queue::{BoundedQueue, PopResult, PushResult};
use crate::render::gpu::GpuRenderer;
use crate::render::software::SoftwareRenderer;
use crate::render::{RendererProxy, RendererStats};
use crate::state::{PlayerState, StateMachine};
use crate::sync::{SyncController, SyncMode, SyncStats};
use crate::video::{VideoDecoder, VideoPlayer};

pub const DEFAULT_PACKET_QUEUE_CAPACITY: usize = 64;
pub const DEFAULT_VIDEO_FRAME_QUEUE_CAPACITY: usize = 8;
pub const DEFAULT_AUDIO_FRAME_QUEUE_CAPACITY: usize = 16;

/// How long a worker blocks on a single queue operation before rechecking
/// the stop flag and state machine. Small enough that `close()`/`pause()`
/// feel immediate, large enough not to spin (spec §4.1, §4.14).
const WORKER_POP_TIMEOUT: Duration = Duration::from_millis(100);
const SYNC_TICK_INTERVAL: Duration = Duration::from_millis(500);
/// Depth of the seek-request channel; only ever needs to hold the latest
/// request since the seek worker coalesces on wake (spec §8 "seek
/// coalescing" scenario).
const SEEK_CHANNEL_CAPACITY: usize = 4;
/// Grace window past a container's reported duration, since many formats'
/// duration field is an estimate rather than an exact sample count.
const SEEK_TARGET_SLACK_MS: f64 = 2000.0;

/// Inputs to [`PlaybackController::open`]. The GUI shell owns the window,
/// the wgpu instance/surface and the hardware-capability probe; this crate
/// never creates any of those itself (spec §1, §6) — it only resolves
/// `render_config` against what the caller already determined.
pub struct OpenParams {
    pub url: String,
    pub render_config: RenderPathConfig,
    pub hw_available: bool,
    pub gpu_device: wgpu::Device,
    pub gpu_queue: wgpu::Queue,
    pub surface_format: wgpu::TextureFormat,
    pub surface_width: u32,
    pub surface_height: u32,
    pub packet_queue_capacity: usize,
    pub video_queue_capacity: usize,
    pub audio_queue_capacity: usize,
}

impl OpenParams {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        url: impl Into<String>,
        render_config: RenderPathConfig,
        hw_available: bool,
        gpu_device: wgpu::Device,
        gpu_queue: wgpu::Queue,
        surface_format: wgpu::TextureFormat,
        surface_width: u32,
        surface_height: u32,
    ) -> Self {
        Self {
            url: url.into(),
            render_config,
            hw_available,
            gpu_device,
            gpu_queue,
            surface_format,
            surface_width,
            surface_height,
            packet_queue_capacity: DEFAULT_PACKET_QUEUE_CAPACITY,
            video_queue_capacity: DEFAULT_VIDEO_FRAME_QUEUE_CAPACITY,
            audio_queue_capacity: DEFAULT_AUDIO_FRAME_QUEUE_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct SeekRequest {
    target_ms: i64,
    backward: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ControllerStats {
    pub sync: SyncStats,
    pub video_queue_depth: usize,
    pub audio_queue_depth: usize,
    pub renderer: RendererStats,
}

/// Owns one opened media source end to end. Not `Clone` — the GUI shell
/// holds exactly one and calls `start`/`pause`/`resume`/`seek_async`/`close`
/// on it; internally, every component it coordinates is already Arc-shared
/// with the worker threads it spawns.
pub struct PlaybackController {
    state: StateMachine,
    sync: SyncController,
    video_stream_index: Option<usize>,
    audio_stream_index: Option<usize>,
    render_path: RenderPath,
    demuxer: Arc<Mutex<Demuxer>>,
    video_packets: Option<Arc<BoundedQueue<Packet>>>,
    audio_packets: Option<Arc<BoundedQueue<Packet>>>,
    video_decoder: Option<Arc<Mutex<VideoDecoder>>>,
    audio_decoder: Option<Arc<Mutex<AudioDecoder>>>,
    resampler: Option<Arc<Mutex<AudioResampler>>>,
    audio_player: Option<Arc<AudioPlayer>>,
    video_player: Option<Arc<VideoPlayer>>,
    renderer: Option<Arc<RendererProxy>>,
    hw_ctx: Option<HardwareDecodeContext>,
    worker_stop: Arc<AtomicBool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    seek_tx: flume::Sender<SeekRequest>,
    seek_rx: flume::Receiver<SeekRequest>,
    seeking: Arc<AtomicBool>,
}

impl PlaybackController {
    /// Opens `params.url`, probes streams, resolves the render path,
    /// constructs whichever of the video/audio stacks the source actually
    /// has, and commits `Idle -> Opening -> Stopped` (spec §4.14 step 7). A
    /// failure anywhere in between moves the machine to `Error` and returns
    /// the failure; every partially built component already dropped as part
    /// of unwinding out of `open_inner`.
    pub fn open(params: OpenParams) -> Result<Self> {
        let state = StateMachine::new();
        if !state.request(PlayerState::Opening) {
            return Err(ZenPlayError::state("controller failed to enter Opening"));
        }

        match open_inner(&params, &state) {
            Ok(controller) => {
                state.request(PlayerState::Stopped);
                Ok(controller)
            }
            Err(e) => {
                state.request(PlayerState::Error);
                Err(e)
            }
        }
    }

    pub fn state(&self) -> &StateMachine {
        &self.state
    }

    pub fn sync(&self) -> &SyncController {
        &self.sync
    }

    pub fn render_path(&self) -> RenderPath {
        self.render_path
    }

    pub fn has_video(&self) -> bool {
        self.video_stream_index.is_some()
    }

    pub fn has_audio(&self) -> bool {
        self.audio_stream_index.is_some()
    }

    /// Starts every worker thread and commits `Stopped -> Playing`. Only
    /// valid once, immediately after `open`; a second call is rejected by
    /// the state machine and returns an error without spawning anything
    /// twice.
    pub fn start(&self) -> Result<()> {
        if !matches!(self.state.get(), PlayerState::Stopped) {
            return Err(ZenPlayError::state(
                "start() requires the controller to be Stopped",
            ));
        }

        self.sync.set_mode(if self.audio_stream_index.is_some() {
            SyncMode::AudioMaster
        } else {
            SyncMode::ExternalMaster
        });

        let mut handles = Vec::new();

        {
            let demuxer = self.demuxer.clone();
            let video_packets = self.video_packets.clone();
            let audio_packets = self.audio_packets.clone();
            let video_stream_index = self.video_stream_index;
            let audio_stream_index = self.audio_stream_index;
            let state = self.state.clone();
            let stop = self.worker_stop.clone();
            handles.push(std::thread::spawn(move || {
                run_demux_worker(
                    demuxer,
                    video_packets,
                    audio_packets,
                    video_stream_index,
                    audio_stream_index,
                    state,
                    stop,
                );
            }));
        }

        let eof_remaining = Arc::new(AtomicUsize::new(
            self.video_decoder.is_some() as usize + self.audio_decoder.is_some() as usize,
        ));

        if let (Some(vd), Some(vp), Some(vpkts)) =
            (&self.video_decoder, &self.video_player, &self.video_packets)
        {
            let vd = vd.clone();
            let queue = vp.queue().clone();
            let vpkts = vpkts.clone();
            let state = self.state.clone();
            let stop = self.worker_stop.clone();
            let eof_remaining = eof_remaining.clone();
            handles.push(std::thread::spawn(move || {
                run_video_decode_worker(vpkts, vd, queue, state, stop, eof_remaining);
            }));
        }

        if let (Some(ad), Some(rs), Some(ap), Some(apkts)) = (
            &self.audio_decoder,
            &self.resampler,
            &self.audio_player,
            &self.audio_packets,
        ) {
            let ad = ad.clone();
            let rs = rs.clone();
            let ap = ap.clone();
            let apkts = apkts.clone();
            let state = self.state.clone();
            let stop = self.worker_stop.clone();
            let eof_remaining = eof_remaining.clone();
            handles.push(std::thread::spawn(move || {
                run_audio_decode_worker(apkts, ad, rs, ap, state, stop, eof_remaining);
            }));
        }

        {
            let sync = self.sync.clone();
            let state = self.state.clone();
            let stop = self.worker_stop.clone();
            handles.push(std::thread::spawn(move || {
                run_sync_tick_worker(sync, state, stop);
            }));
        }

        {
            let rx = self.seek_rx.clone();
            let demuxer = self.demuxer.clone();
            let video_packets = self.video_packets.clone();
            let audio_packets = self.audio_packets.clone();
            let video_decoder = self.video_decoder.clone();
            let audio_decoder = self.audio_decoder.clone();
            let resampler = self.resampler.clone();
            let audio_player = self.audio_player.clone();
            let video_player = self.video_player.clone();
            let renderer = self.renderer.clone();
            let state = self.state.clone();
            let sync = self.sync.clone();
            let seeking = self.seeking.clone();
            handles.push(std::thread::spawn(move || {
                run_seek_worker(
                    rx,
                    demuxer,
                    video_packets,
                    audio_packets,
                    video_decoder,
                    audio_decoder,
                    resampler,
                    audio_player,
                    video_player,
                    renderer,
                    state,
                    sync,
                    seeking,
                );
            }));
        }

        *self.workers.lock() = handles;

        if !self.state.request(PlayerState::Playing) {
            return Err(ZenPlayError::state("Stopped -> Playing was rejected"));
        }
        Ok(())
    }

    /// Pause sequencing (spec §4.14): stop the audio device first so no
    /// callback can race `sync.pause`, commit the state transition (which
    /// the video render loop observes via `wait_for_resume`), then freeze
    /// the sync controller's clock.
    pub fn pause(&self) {
        if let Some(ap) = &self.audio_player {
            if let Err(e) = ap.pause() {
                tracing::warn!(target: "zenplay::player", error = %e, "failed to pause audio device");
            }
        }
        if !self.state.request(PlayerState::Paused) {
            tracing::warn!(target: "zenplay::player", "pause requested from a state that disallows it");
            return;
        }
        self.sync.pause(Instant::now());
    }

    /// Resume sequencing is the reverse: unfreeze the clock first so the
    /// sync controller's shifted timestamps are already in place before
    /// anything reads them, then restart the audio device, then commit the
    /// state transition that wakes the video render loop.
    pub fn resume(&self) {
        let now = Instant::now();
        self.sync.resume(now);
        if let Some(ap) = &self.audio_player {
            if let Err(e) = ap.resume() {
                tracing::warn!(target: "zenplay::player", error = %e, "failed to resume audio device");
            }
        }
        if !self.state.request(PlayerState::Playing) {
            tracing::warn!(target: "zenplay::player", "resume requested from a state that disallows it");
        }
    }

    /// Queues a seek. Non-blocking: the seek worker thread runs the actual
    /// sequence and restores the machine to its pre-seek state (Playing or
    /// Paused) when done. A seek already in flight when another arrives is
    /// superseded — the worker always acts on the most recent request it
    /// can see when it wakes (spec §8 "seek coalescing").
    pub fn seek_async(&self, target_ms: i64, backward: bool) -> Result<()> {
        self.seek_tx
            .send(SeekRequest {
                target_ms,
                backward,
            })
            .map_err(|_| ZenPlayError::state("seek worker is not running"))
    }

    pub fn is_seeking(&self) -> bool {
        self.seeking.load(Ordering::Acquire)
    }

    pub fn set_volume(&self, volume: f32) {
        if let Some(ap) = &self.audio_player {
            ap.set_volume(volume);
        }
    }

    pub fn set_muted(&self, muted: bool) {
        if let Some(ap) = &self.audio_player {
            ap.set_muted(muted);
        }
    }

    pub fn on_surface_resize(&self, width: u32, height: u32) {
        if let Some(r) = &self.renderer {
            r.on_resize(width, height);
        }
    }

    pub fn subscribe(
        &self,
        callback: impl Fn(PlayerState, PlayerState) + Send + Sync + 'static,
    ) -> u64 {
        self.state.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: u64) {
        self.state.unsubscribe(id);
    }

    pub fn stats(&self) -> ControllerStats {
        ControllerStats {
            sync: self.sync.stats(),
            video_queue_depth: self.video_player.as_ref().map_or(0, |p| p.queue().len()),
            audio_queue_depth: self.audio_player.as_ref().map_or(0, |p| p.queue().len()),
            renderer: self.renderer.as_ref().map_or_else(RendererStats::default, |r| r.stats()),
        }
    }

    /// Closes every component in reverse-dependency order (spec §4.14 step
    /// 8): stop workers, join them, close the players (which join their own
    /// internal threads), drop the decoders and hardware context, close the
    /// demuxer, and shut the renderer down last since it is the one
    /// component every other worker's thread might still be mid-call into
    /// until it has actually stopped.
    pub fn close(self) {
        self.state.request(PlayerState::Closing);

        let Self {
            state,
            sync: _sync,
            video_stream_index: _video_stream_index,
            audio_stream_index: _audio_stream_index,
            render_path: _render_path,
            demuxer,
            video_packets,
            audio_packets,
            mut video_decoder,
            mut audio_decoder,
            mut resampler,
            mut audio_player,
            mut video_player,
            mut renderer,
            mut hw_ctx,
            worker_stop,
            workers,
            seek_tx,
            seek_rx: _seek_rx,
            seeking: _seeking,
        } = self;

        worker_stop.store(true, Ordering::Release);
        drop(seek_tx);
        if let Some(q) = &video_packets {
            q.reset(|_| {});
        }
        if let Some(q) = &audio_packets {
            q.reset(|_| {});
        }

        for handle in workers.into_inner() {
            let _ = handle.join();
        }

        if let Some(player) = video_player.take() {
            match Arc::try_unwrap(player) {
                Ok(player) => player.close(),
                Err(_) => {
                    tracing::warn!(target: "zenplay::player", "video player outlived its last worker reference at close")
                }
            }
        }
        if let Some(player) = audio_player.take() {
            match Arc::try_unwrap(player) {
                Ok(player) => player.close(),
                Err(_) => {
                    tracing::warn!(target: "zenplay::player", "audio player outlived its last worker reference at close")
                }
            }
        }

        drop(video_decoder.take());
        drop(audio_decoder.take());
        drop(resampler.take());

        if let Some(mut ctx) = hw_ctx.take() {
            ctx.cleanup();
        }

        match Arc::try_unwrap(demuxer) {
            Ok(mutex) => mutex.into_inner().close(),
            Err(_) => {
                tracing::warn!(target: "zenplay::demuxer", "demuxer outlived its last worker reference at close")
            }
        }

        if let Some(proxy) = renderer.take() {
            match Arc::try_unwrap(proxy) {
                Ok(proxy) => proxy.shutdown(),
                Err(_) => {
                    tracing::warn!(target: "zenplay::renderer", "renderer proxy outlived its last worker reference at close")
                }
            }
        }

        let _ = state;
    }
}

fn open_inner(params: &OpenParams, state: &StateMachine) -> Result<PlaybackController> {
    let mut demuxer = Demuxer::open(&params.url)?;
    let video_stream_index = demuxer.active_video_stream_index();
    let audio_stream_index = demuxer.active_audio_stream_index();

    let render_path = params.render_config.resolve(params.hw_available)?;
    let sync = SyncController::new(Instant::now());

    let video_packets =
        video_stream_index.map(|_| Arc::new(BoundedQueue::new(params.packet_queue_capacity)));
    let audio_packets =
        audio_stream_index.map(|_| Arc::new(BoundedQueue::new(params.packet_queue_capacity)));

    let mut hw_ctx: Option<HardwareDecodeContext> = None;
    let mut renderer: Option<Arc<RendererProxy>> = None;
    let mut video_decoder: Option<Arc<Mutex<VideoDecoder>>> = None;
    let mut video_player: Option<Arc<VideoPlayer>> = None;
    let mut effective_render_path = render_path;

    if let Some(v_idx) = video_stream_index {
        let codec_params = demuxer
            .stream_codec_params(v_idx)
            .ok_or_else(|| ZenPlayError::open("video stream codec parameters unavailable"))?;
        let timebase = demuxer
            .stream_timebase(v_idx)
            .unwrap_or(Timebase::new(1, 1_000));

        if matches!(render_path, RenderPath::Hardware) {
            let (codec_id, w, h) = probe_video_params(&codec_params);
            match HardwareDecodeContext::initialize(HwBackend::D3d11Va, codec_id, w, h) {
                Ok(ctx) => hw_ctx = Some(ctx),
                Err(e) => {
                    if params.render_config.hardware.allow_fallback {
                        tracing::warn!(
                            target: "zenplay::hardware",
                            error = %e,
                            "hardware decode context init failed, falling back to software"
                        );
                        effective_render_path = RenderPath::Software;
                    } else {
                        return Err(e);
                    }
                }
            }
        }

        let decoder = VideoDecoder::open(codec_params, timebase, hw_ctx.as_ref())?;
        let frame_w = decoder.width();
        let frame_h = decoder.height();

        let proxy = if hw_ctx.is_some() {
            Arc::new(RendererProxy::spawn(GpuRenderer::new(
                params.gpu_device.clone(),
                params.gpu_queue.clone(),
                params.surface_format,
                params.surface_width,
                params.surface_height,
                frame_w,
                frame_h,
            )))
        } else {
            Arc::new(RendererProxy::spawn(SoftwareRenderer::new(
                params.gpu_device.clone(),
                params.gpu_queue.clone(),
                params.surface_format,
                params.surface_width,
                params.surface_height,
            )))
        };

        let player = Arc::new(VideoPlayer::start(
            proxy.clone(),
            state.clone(),
            sync.clone(),
            params.video_queue_capacity,
        ));

        renderer = Some(proxy);
        video_decoder = Some(Arc::new(Mutex::new(decoder)));
        video_player = Some(player);
    }

    let mut audio_decoder: Option<Arc<Mutex<AudioDecoder>>> = None;
    let mut resampler: Option<Arc<Mutex<AudioResampler>>> = None;
    let mut audio_player: Option<Arc<AudioPlayer>> = None;

    if let Some(a_idx) = audio_stream_index {
        let codec_params = demuxer
            .stream_codec_params(a_idx)
            .ok_or_else(|| ZenPlayError::open("audio stream codec parameters unavailable"))?;
        let timebase = demuxer
            .stream_timebase(a_idx)
            .unwrap_or(Timebase::new(1, 1_000_000));

        let decoder = AudioDecoder::open(codec_params, timebase)?;
        let target_rate = decoder.sample_rate();
        let target_channels = decoder.channels().clamp(1, 2);

        let player = AudioPlayer::open(
            target_rate,
            target_channels,
            params.audio_queue_capacity,
            sync.clone(),
        )?;

        audio_decoder = Some(Arc::new(Mutex::new(decoder)));
        resampler = Some(Arc::new(Mutex::new(AudioResampler::new(
            target_rate,
            target_channels,
        ))));
        audio_player = Some(Arc::new(player));
    }

    let (seek_tx, seek_rx) = flume::bounded(SEEK_CHANNEL_CAPACITY);

    Ok(PlaybackController {
        state: state.clone(),
        sync,
        video_stream_index,
        audio_stream_index,
        render_path: effective_render_path,
        demuxer: Arc::new(Mutex::new(demuxer)),
        video_packets,
        audio_packets,
        video_decoder,
        audio_decoder,
        resampler,
        audio_player,
        video_player,
        renderer,
        hw_ctx,
        worker_stop: Arc::new(AtomicBool::new(false)),
        workers: Mutex::new(Vec::new()),
        seek_tx,
        seek_rx,
        seeking: Arc::new(AtomicBool::new(false)),
    })
}

/// Reads codec id/width/height straight off the raw `AVCodecParameters`:
/// `ffmpeg_next::codec::Parameters`'s safe wrapper exposes neither, and
/// [`HardwareDecodeContext::initialize`] needs all three before the decoder
/// itself can report its own dimensions.
fn probe_video_params(params: &codec::Parameters) -> (ffi::AVCodecID, u32, u32) {
    unsafe {
        let raw = params.as_ptr();
        ((*raw).codec_id, (*raw).width as u32, (*raw).height as u32)
    }
}

fn run_demux_worker(
    demuxer: Arc<Mutex<Demuxer>>,
    video_packets: Option<Arc<BoundedQueue<Packet>>>,
    audio_packets: Option<Arc<BoundedQueue<Packet>>>,
    video_stream_index: Option<usize>,
    audio_stream_index: Option<usize>,
    state: StateMachine,
    stop: Arc<AtomicBool>,
) {
    loop {
        if stop.load(Ordering::Acquire) || state.should_stop() {
            return;
        }

        // Locking the demuxer here is also how this worker naturally
        // blocks out during a seek: the seek worker holds the same lock for
        // the duration of `Demuxer::seek`.
        let outcome = demuxer.lock().read_packet();
        match outcome {
            Ok(ReadOutcome::Packet(packet)) => {
                let target = if Some(packet.stream_index) == video_stream_index {
                    video_packets.as_ref()
                } else if Some(packet.stream_index) == audio_stream_index {
                    audio_packets.as_ref()
                } else {
                    None
                };
                if let Some(queue) = target {
                    enqueue_packet(queue, packet, &stop, &state);
                }
            }
            Ok(ReadOutcome::Again) => {
                std::thread::sleep(Duration::from_millis(5));
            }
            Ok(ReadOutcome::Eof) => {
                tracing::info!(target: "zenplay::demuxer", "demuxer reached end of stream");
                if let Some(q) = &video_packets {
                    q.close();
                }
                if let Some(q) = &audio_packets {
                    q.close();
                }
                return;
            }
            Err(e) => {
                tracing::error!(target: "zenplay::demuxer", error = %e, "read_packet failed");
                state.request(PlayerState::Error);
                if let Some(q) = &video_packets {
                    q.reset(|_| {});
                }
                if let Some(q) = &audio_packets {
                    q.reset(|_| {});
                }
                return;
            }
        }
    }
}

fn enqueue_packet(queue: &BoundedQueue<Packet>, mut packet: Packet, stop: &AtomicBool, state: &StateMachine) {
    loop {
        if stop.load(Ordering::Acquire) || state.should_stop() {
            return;
        }
        match queue.push(packet, WORKER_POP_TIMEOUT) {
            PushResult::Ok => return,
            PushResult::Full(returned) => {
                packet = returned;
            }
            PushResult::Reset(_returned) => {
                // A seek flush (or close) raced us; the packet predates the
                // new position, so it's simply dropped.
                return;
            }
        }
    }
}

fn finish_stream(eof_remaining: &AtomicUsize, state: &StateMachine) {
    if eof_remaining.fetch_sub(1, Ordering::AcqRel) == 1
        && !matches!(
            state.get(),
            PlayerState::Error | PlayerState::Closing | PlayerState::Seeking
        )
    {
        state.request(PlayerState::Stopped);
    }
}

fn run_video_decode_worker(
    packets: Arc<BoundedQueue<Packet>>,
    decoder: Arc<Mutex<VideoDecoder>>,
    player_queue: Arc<BoundedQueue<VideoFrame>>,
    state: StateMachine,
    stop: Arc<AtomicBool>,
    eof_remaining: Arc<AtomicUsize>,
) {
    loop {
        if stop.load(Ordering::Acquire) || state.should_stop() {
            return;
        }

        match packets.pop(WORKER_POP_TIMEOUT) {
            PopResult::Item(packet) => {
                let mut dec = decoder.lock();
                if let Err(e) = dec.send_packet(&packet) {
                    tracing::warn!(target: "zenplay::decoder", error = %e, "video send_packet failed");
                    continue;
                }
                drop(packet);
                drain_video_frames(&mut dec, &player_queue, &stop, &state);
            }
            PopResult::Empty => {}
            PopResult::Reset => {
                if packets.is_closed() {
                    let mut dec = decoder.lock();
                    let _ = dec.send_eof();
                    drain_video_frames(&mut dec, &player_queue, &stop, &state);
                    finish_stream(&eof_remaining, &state);
                    return;
                }
                // Seek flush: loop back and wait for fresh post-seek packets.
            }
        }
    }
}

fn drain_video_frames(
    dec: &mut VideoDecoder,
    player_queue: &BoundedQueue<VideoFrame>,
    stop: &AtomicBool,
    state: &StateMachine,
) {
    loop {
        match dec.receive_frame() {
            Ok(Some(frame)) => enqueue_video_frame(player_queue, frame, stop, state),
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(target: "zenplay::decoder", error = %e, "video receive_frame failed");
                return;
            }
        }
    }
}

fn enqueue_video_frame(
    queue: &BoundedQueue<VideoFrame>,
    mut frame: VideoFrame,
    stop: &AtomicBool,
    state: &StateMachine,
) {
    loop {
        if stop.load(Ordering::Acquire) || state.should_stop() {
            return;
        }
        match queue.push(frame, WORKER_POP_TIMEOUT) {
            PushResult::Ok => return,
            PushResult::Full(returned) => {
                frame = returned;
            }
            PushResult::Reset(returned) => {
                drop(returned);
                return;
            }
        }
    }
}

fn run_audio_decode_worker(
    packets: Arc<BoundedQueue<Packet>>,
    decoder: Arc<Mutex<AudioDecoder>>,
    resampler: Arc<Mutex<AudioResampler>>,
    audio_player: Arc<AudioPlayer>,
    state: StateMachine,
    stop: Arc<AtomicBool>,
    eof_remaining: Arc<AtomicUsize>,
) {
    loop {
        if stop.load(Ordering::Acquire) || state.should_stop() {
            return;
        }

        match packets.pop(WORKER_POP_TIMEOUT) {
            PopResult::Item(packet) => {
                let mut dec = decoder.lock();
                if let Err(e) = dec.send_packet(&packet) {
                    tracing::warn!(target: "zenplay::decoder", error = %e, "audio send_packet failed");
                    continue;
                }
                drop(packet);
                drain_audio_frames(&mut dec, &resampler, &audio_player, &stop, &state);
            }
            PopResult::Empty => {}
            PopResult::Reset => {
                if packets.is_closed() {
                    let mut dec = decoder.lock();
                    let _ = dec.send_eof();
                    drain_audio_frames(&mut dec, &resampler, &audio_player, &stop, &state);
                    finish_stream(&eof_remaining, &state);
                    return;
                }
            }
        }
    }
}

fn drain_audio_frames(
    dec: &mut AudioDecoder,
    resampler: &Mutex<AudioResampler>,
    audio_player: &AudioPlayer,
    stop: &AtomicBool,
    state: &StateMachine,
) {
    loop {
        match dec.receive_frame() {
            Ok(Some(frame)) => {
                let pts_seconds = dec.pts_ms(&frame).map(|ms| ms / 1000.0).unwrap_or(0.0);
                let resampled = resampler.lock().resample(&frame, pts_seconds);
                match resampled {
                    Ok(out) => enqueue_audio_frame(audio_player, out, stop, state),
                    Err(e) => {
                        tracing::warn!(target: "zenplay::audio", error = %e, "resample failed, dropping frame")
                    }
                }
            }
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(target: "zenplay::decoder", error = %e, "audio receive_frame failed");
                return;
            }
        }
    }
}

fn enqueue_audio_frame(
    player: &AudioPlayer,
    mut frame: ResampledAudioFrame,
    stop: &AtomicBool,
    state: &StateMachine,
) {
    loop {
        if stop.load(Ordering::Acquire) || state.should_stop() {
            return;
        }
        match player.enqueue(frame, WORKER_POP_TIMEOUT) {
            PushResult::Ok => return,
            PushResult::Full(returned) => {
                frame = returned;
            }
            PushResult::Reset(returned) => {
                drop(returned);
                return;
            }
        }
    }
}

fn run_sync_tick_worker(sync: SyncController, state: StateMachine, stop: Arc<AtomicBool>) {
    loop {
        if stop.load(Ordering::Acquire) || state.should_stop() {
            return;
        }
        std::thread::sleep(SYNC_TICK_INTERVAL);
        let stats = sync.stats();
        tracing::debug!(
            target: "zenplay::sync",
            avg_sync_error_ms = stats.avg_sync_error_ms,
            corrections = stats.corrections,
            drops = stats.drops,
            repeats = stats.repeats,
            "sync tick"
        );
    }
}

/// Drains every already-queued request behind `first` and returns only the
/// latest one — the coalescing behind spec §8's seek-coalescing scenario.
fn coalesce(rx: &flume::Receiver<SeekRequest>, first: SeekRequest) -> SeekRequest {
    let mut latest = first;
    while let Ok(next) = rx.try_recv() {
        latest = next;
    }
    latest
}

/// A completed (or failed) seek restores the state the controller was in
/// before the seek started. `Seeking -> Stopped` is not in the transition
/// table (spec §4.2), so a seek issued while merely `Stopped` (e.g. an
/// initial seek-to-start before the first `start()`) restores to `Playing`
/// instead — recorded as an explicit resolution, not an oversight.
fn restore_target(snapshot: PlayerState) -> PlayerState {
    match snapshot {
        PlayerState::Paused => PlayerState::Paused,
        _ => PlayerState::Playing,
    }
}

fn validate_seek_target(target_ms: i64, duration_ms: Option<f64>) -> Result<()> {
    if target_ms < 0 {
        return Err(ZenPlayError::sync(format!(
            "seek target {target_ms}ms is negative"
        )));
    }
    if let Some(duration) = duration_ms {
        if target_ms as f64 > duration + SEEK_TARGET_SLACK_MS {
            return Err(ZenPlayError::sync(format!(
                "seek target {target_ms}ms exceeds stream duration {duration}ms"
            )));
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_seek_worker(
    rx: flume::Receiver<SeekRequest>,
    demuxer: Arc<Mutex<Demuxer>>,
    video_packets: Option<Arc<BoundedQueue<Packet>>>,
    audio_packets: Option<Arc<BoundedQueue<Packet>>>,
    video_decoder: Option<Arc<Mutex<VideoDecoder>>>,
    audio_decoder: Option<Arc<Mutex<AudioDecoder>>>,
    resampler: Option<Arc<Mutex<AudioResampler>>>,
    audio_player: Option<Arc<AudioPlayer>>,
    video_player: Option<Arc<VideoPlayer>>,
    renderer: Option<Arc<RendererProxy>>,
    state: StateMachine,
    sync: SyncController,
    seeking: Arc<AtomicBool>,
) {
    while let Ok(first) = rx.recv() {
        let req = coalesce(&rx, first);
        let snapshot = state.get();
        seeking.store(true, Ordering::Release);

        let outcome = execute_seek(
            req,
            &demuxer,
            video_packets.as_deref(),
            audio_packets.as_deref(),
            video_decoder.as_deref(),
            audio_decoder.as_deref(),
            resampler.as_deref(),
            audio_player.as_deref(),
            video_player.as_deref(),
            renderer.as_deref(),
            &state,
            &sync,
        );

        match outcome {
            Ok(()) => {
                state.request(restore_target(snapshot));
            }
            Err(e) => {
                tracing::error!(target: "zenplay::player", error = %e, "seek failed");
                if !state.request(restore_target(snapshot)) {
                    state.request(PlayerState::Error);
                }
            }
        }

        seeking.store(false, Ordering::Release);
    }
}

/// The seek sequence itself (spec §4.14, step by step): pause the audio
/// device, flush every queue and decoder, seek the demuxer, reset the sync
/// controller's clock to the target, and resume. Each step only runs for
/// the streams that actually exist.
#[allow(clippy::too_many_arguments)]
fn execute_seek(
    req: SeekRequest,
    demuxer: &Mutex<Demuxer>,
    video_packets: Option<&BoundedQueue<Packet>>,
    audio_packets: Option<&BoundedQueue<Packet>>,
    video_decoder: Option<&Mutex<VideoDecoder>>,
    audio_decoder: Option<&Mutex<AudioDecoder>>,
    resampler: Option<&Mutex<AudioResampler>>,
    audio_player: Option<&AudioPlayer>,
    video_player: Option<&VideoPlayer>,
    renderer: Option<&RendererProxy>,
    state: &StateMachine,
    sync: &SyncController,
) -> Result<()> {
    if !state.request(PlayerState::Seeking) {
        return Err(ZenPlayError::state(
            "cannot seek: current state disallows Seeking",
        ));
    }

    validate_seek_target(req.target_ms, demuxer.lock().duration_ms())?;

    if let Some(ap) = audio_player {
        if let Err(e) = ap.pause() {
            tracing::warn!(target: "zenplay::player", error = %e, "failed to pause audio device before seek");
        }
    }
    if let Some(q) = video_packets {
        q.reset(|_| {});
    }
    if let Some(q) = audio_packets {
        q.reset(|_| {});
    }
    if let Some(ap) = audio_player {
        ap.flush();
    }
    if let Some(vp) = video_player {
        vp.pre_seek();
    }
    if let Some(r) = renderer {
        r.clear_caches();
    }

    if let Some(vd) = video_decoder {
        vd.lock().flush();
    }
    if let Some(ad) = audio_decoder {
        ad.lock().flush();
    }
    if let Some(rs) = resampler {
        rs.lock().reset();
    }

    demuxer.lock().seek(req.target_ms, req.backward)?;

    sync.reset_for_seek(req.target_ms as f64, Instant::now());

    if let Some(ap) = audio_player {
        ap.resume()?;
    }
    if let Some(vp) = video_player {
        vp.post_seek();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seek_requests_coalesce_to_the_most_recent() {
        let (tx, rx) = flume::unbounded();
        tx.send(SeekRequest {
            target_ms: 5_000,
            backward: false,
        })
        .unwrap();
        tx.send(SeekRequest {
            target_ms: 10_000,
            backward: false,
        })
        .unwrap();
        tx.send(SeekRequest {
            target_ms: 15_000,
            backward: true,
        })
        .unwrap();

        let first = rx.recv().unwrap();
        let result = coalesce(&rx, first);
        assert_eq!(result.target_ms, 15_000);
        assert!(result.backward);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn coalesce_is_a_no_op_with_nothing_queued_behind_it() {
        let (_tx, rx) = flume::unbounded::<SeekRequest>();
        let only = SeekRequest {
            target_ms: 1_000,
            backward: false,
        };
        assert_eq!(coalesce(&rx, only), only);
    }

    #[test]
    fn restore_target_maps_paused_to_paused_and_everything_else_to_playing() {
        assert_eq!(restore_target(PlayerState::Paused), PlayerState::Paused);
        assert_eq!(restore_target(PlayerState::Playing), PlayerState::Playing);
        assert_eq!(restore_target(PlayerState::Stopped), PlayerState::Playing);
    }

    #[test]
    fn validate_seek_target_rejects_negative_targets() {
        assert!(validate_seek_target(-1, Some(60_000.0)).is_err());
    }

    #[test]
    fn validate_seek_target_rejects_targets_past_duration_plus_slack() {
        assert!(validate_seek_target(70_000, Some(60_000.0)).is_err());
        assert!(validate_seek_target(61_500, Some(60_000.0)).is_ok());
    }

    #[test]
    fn validate_seek_target_allows_anything_non_negative_when_duration_unknown() {
        assert!(validate_seek_target(1_000_000, None).is_ok());
    }
}
