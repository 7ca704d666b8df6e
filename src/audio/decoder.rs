//! Audio decoder (spec §4.7, component C7).
//!
//! Wraps one ffmpeg audio stream's decode context. Always CPU frames: there
//! is no hardware audio decode path in this crate by design (spec §4.7) —
//! the only zero-copy concern in this pipeline is video.
//!
//! Generalizes the teacher's `AudioDecoder` iterator (packet-in,
//! frame-iterator-out over a single stream opened for the lifetime of the
//! player) into the open/send/receive/flush/close shape the rest of this
//! crate's decoders share, so the controller can drive it the same way as
//! the video decoder.

use ffmpeg_next::{self as ffmpeg, codec, decoder};

use crate::error::{Result, ZenPlayError};
use crate::model::{Packet, Timebase};

pub struct AudioDecoder {
    decoder: decoder::Audio,
    timebase: Timebase,
}

impl AudioDecoder {
    pub fn open(params: codec::Parameters, stream_timebase: Timebase) -> Result<Self> {
        let ctx = codec::context::Context::from_parameters(params)
            .map_err(|e| ZenPlayError::codec_with("failed to build audio codec context", e))?;
        let decoder = ctx
            .decoder()
            .audio()
            .map_err(|e| ZenPlayError::codec_with("failed to open audio decoder", e))?;

        Ok(Self {
            decoder,
            timebase: stream_timebase,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.decoder.rate()
    }

    pub fn channels(&self) -> u16 {
        self.decoder.channels()
    }

    pub fn format(&self) -> ffmpeg::format::Sample {
        self.decoder.format()
    }

    /// Feeds one compressed packet to the decoder. Packets belonging to
    /// other streams are filtered out by the caller before this is called.
    pub fn send_packet(&mut self, packet: &Packet) -> Result<()> {
        self.decoder
            .send_packet(&packet.inner)
            .map_err(|e| ZenPlayError::codec_with("audio send_packet failed", e))
    }

    pub fn send_eof(&mut self) -> Result<()> {
        self.decoder
            .send_eof()
            .map_err(|e| ZenPlayError::codec_with("audio send_eof failed", e))
    }

    /// Drains one decoded frame, if the decoder has one buffered. Returns
    /// `Ok(None)` on `EAGAIN`/`EOF` (spec §4.7: "not yet enough input" and
    /// "no more output" both surface as a clean `None`, not an error).
    pub fn receive_frame(&mut self) -> Result<Option<ffmpeg::frame::Audio>> {
        let mut frame = ffmpeg::frame::Audio::empty();
        match self.decoder.receive_frame(&mut frame) {
            Ok(()) => Ok(Some(frame)),
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => Ok(None),
            Err(ffmpeg::Error::Eof) => Ok(None),
            Err(e) => Err(ZenPlayError::codec_with("audio receive_frame failed", e)),
        }
    }

    pub fn pts_ms(&self, frame: &ffmpeg::frame::Audio) -> Option<f64> {
        frame.pts().map(|p| self.timebase.pts_to_ms(p))
    }

    /// Drops any buffered state in the decoder without closing it (spec
    /// §4.14 seek sequencing: flush video and audio decoders, then seek the
    /// demuxer, then resume).
    pub fn flush(&mut self) {
        self.decoder.flush();
    }
}
