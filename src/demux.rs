//! Demuxer (spec §4.8, component C8).
//!
//! Opens a URL, probes streams, reads packets, seeks to a timestamp. The
//! core treats `ffmpeg_next::format::context::Input` as the opaque codec
//! library hook named in spec §6; this module is the only place that calls
//! into it directly for container-level operations.

use ffmpeg_next::{self as ffmpeg};

use crate::error::{Result, ZenPlayError};
use crate::model::{Packet, Timebase};

pub enum ReadOutcome {
    Packet(Packet),
    Again,
    Eof,
}

pub struct Demuxer {
    input: ffmpeg::format::context::Input,
    video_stream_index: Option<usize>,
    audio_stream_index: Option<usize>,
}

impl Demuxer {
    pub fn open(url: &str) -> Result<Self> {
        let input = ffmpeg::format::input(url)
            .map_err(|e| ZenPlayError::open_with(format!("failed to open '{url}'"), e))?;

        let video_stream_index = input.streams().best(ffmpeg::media::Type::Video).map(|s| s.index());
        let audio_stream_index = input.streams().best(ffmpeg::media::Type::Audio).map(|s| s.index());

        if video_stream_index.is_none() && audio_stream_index.is_none() {
            return Err(ZenPlayError::open("no usable audio or video stream found"));
        }

        Ok(Self {
            input,
            video_stream_index,
            audio_stream_index,
        })
    }

    pub fn active_video_stream_index(&self) -> Option<usize> {
        self.video_stream_index
    }

    pub fn active_audio_stream_index(&self) -> Option<usize> {
        self.audio_stream_index
    }

    pub fn duration_ms(&self) -> Option<f64> {
        let d = self.input.duration();
        if d <= 0 {
            return None;
        }
        // Container duration is in AV_TIME_BASE units (microseconds).
        Some(d as f64 / 1000.0)
    }

    pub fn stream_timebase(&self, stream_index: usize) -> Option<Timebase> {
        self.input
            .streams()
            .find(|s| s.index() == stream_index)
            .map(|s| s.time_base().into())
    }

    pub fn stream_codec_params(
        &self,
        stream_index: usize,
    ) -> Option<ffmpeg::codec::Parameters> {
        self.input
            .streams()
            .find(|s| s.index() == stream_index)
            .map(|s| s.parameters())
    }

    /// Reads the next demuxed packet. Non-blocking: `Again` signals "no
    /// packet available right now, try later" is not a real outcome for a
    /// file-backed demuxer (ffmpeg's iterator blocks internally on I/O), so
    /// in practice this returns `Packet` until `Eof`.
    pub fn read_packet(&mut self) -> Result<ReadOutcome> {
        match self.input.packets().next() {
            Some((stream, packet)) => {
                let stream_index = stream.index();
                let timebase = stream.time_base().into();
                Ok(ReadOutcome::Packet(Packet {
                    stream_index,
                    pts: packet.pts(),
                    dts: packet.dts(),
                    timebase,
                    inner: packet,
                }))
            }
            None => Ok(ReadOutcome::Eof),
        }
    }

    /// Seeks to `timestamp_ms`. Succeeds even without an exact key frame at
    /// the target; ffmpeg snaps backward/forward per the `backward` flag
    /// (spec §4.8).
    pub fn seek(&mut self, timestamp_ms: i64, backward: bool) -> Result<()> {
        let ts = timestamp_ms * ffmpeg::ffi::AV_TIME_BASE as i64 / 1000;
        let (min_ts, max_ts) = if backward {
            (i64::MIN, ts)
        } else {
            (ts, i64::MAX)
        };
        self.input
            .seek(ts, min_ts..max_ts)
            .map_err(|e| ZenPlayError::Sync {
                message: format!("seek to {timestamp_ms}ms failed: {e}"),
            })
    }

    pub fn close(self) {
        // Dropping `self.input` releases the underlying format context.
    }
}
