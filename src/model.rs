//! Shared data model (spec §3): timestamps and the two frame shapes that
//! flow between decoders, players and renderers.

/// A rational base plus an integer PTS/DTS pair, as produced by a demuxed
/// stream. `{num, den}` is the *producing stream's* timebase; conversion to
/// milliseconds is `pts * num / den * 1000`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timebase {
    pub num: i32,
    pub den: i32,
}

impl Timebase {
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// `NO_PTS` is ffmpeg's sentinel for "unknown" and propagates as `None`
    /// rather than as this timebase's numeric value.
    pub fn pts_to_ms(&self, pts: i64) -> f64 {
        pts as f64 * self.num as f64 / self.den as f64 * 1000.0
    }
}

impl From<ffmpeg_next::Rational> for Timebase {
    fn from(r: ffmpeg_next::Rational) -> Self {
        Timebase::new(r.numerator(), r.denominator())
    }
}

/// A compressed unit read from the demuxer, tagged with the originating
/// stream and its timestamps. Owned by one queue slot at a time; released
/// (dropped) exactly once, whether consumed normally or drained by a queue
/// `reset`.
pub struct Packet {
    pub stream_index: usize,
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    pub timebase: Timebase,
    pub inner: ffmpeg_next::Packet,
}

impl Packet {
    pub fn pts_ms(&self) -> Option<f64> {
        self.pts.map(|p| self.timebase.pts_to_ms(p))
    }
}

/// An opaque non-owning handle to a GPU-resident decode texture. Identity
/// (not pointer dereference) is what the SRV cache keys on — see
/// [`crate::render::gpu`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub usize);

/// CPU-resident planar/packed pixel or sample data.
pub struct CpuPlanes {
    pub planes: Vec<Vec<u8>>,
    pub strides: Vec<usize>,
    pub format: ffmpeg_next::format::Pixel,
    pub width: u32,
    pub height: u32,
}

/// A decoded video frame: either CPU planes or a GPU texture view. The core
/// never clones the GPU variant — ownership moves from decoder workspace
/// into exactly one queue slot and then into the renderer (spec §3).
pub enum VideoFrame {
    Cpu {
        planes: CpuPlanes,
        pts_ms: f64,
    },
    Gpu {
        texture: TextureHandle,
        slice_index: usize,
        pts_ms: f64,
        /// Owning handle to the decoder's hardware frame. `texture` is
        /// only a valid, non-dangling identity for as long as this is
        /// alive — it is what keeps the frames-pool slot behind `texture`
        /// checked out (spec §3: "GPU frames are reference-counted views
        /// into a device-owned frame pool; releasing a frame decrements
        /// the pool reference"). Dropped exactly once, whether consumed by
        /// the renderer or released by a queue `reset`.
        owner: ffmpeg_next::frame::Video,
    },
}

impl VideoFrame {
    pub fn pts_ms(&self) -> f64 {
        match self {
            VideoFrame::Cpu { pts_ms, .. } => *pts_ms,
            VideoFrame::Gpu { pts_ms, .. } => *pts_ms,
        }
    }
}

/// PCM buffer in the resampler's target layout, produced by [`crate::audio::resampler`]
/// and consumed by [`crate::audio::player`]. Owned by the audio player's
/// queue until fully drained into the ring buffer. `data` is reference-counted
/// so a frame can be handed off to the queue without copying the PCM payload.
#[derive(Clone)]
pub struct ResampledAudioFrame {
    pub data: bytes::Bytes,
    pub sample_count: usize,
    pub pts_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub bytes_per_sample: usize,
}

impl ResampledAudioFrame {
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }
}
