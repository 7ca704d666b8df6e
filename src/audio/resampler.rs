//! Audio resampler (spec §4.4, component C4).
//!
//! Converts decoded audio frames to the audio player's fixed target layout
//! (packed `f32`, a chosen channel count and sample rate). Built lazily on
//! the first frame, since the source format isn't known until then — the
//! same pattern the teacher's `spawn_audio` uses for its resampling
//! context. When the source already matches the target layout exactly, no
//! conversion work happens beyond the unavoidable copy into the frame's
//! owned output buffer.

use ffmpeg_next::{self as ffmpeg, software::resampling};

use crate::error::{Result, ZenPlayError};
use crate::model::ResampledAudioFrame;

const TARGET_FORMAT: ffmpeg::format::Sample =
    ffmpeg::format::Sample::F32(ffmpeg::format::sample::Type::Packed);

pub struct AudioResampler {
    target_sample_rate: u32,
    target_channels: u16,
    ctx: Option<resampling::Context>,
    source_format: Option<ffmpeg::format::Sample>,
    source_rate: Option<u32>,
    source_channel_layout: Option<ffmpeg::channel_layout::ChannelLayout>,
}

impl AudioResampler {
    pub fn new(target_sample_rate: u32, target_channels: u16) -> Self {
        Self {
            target_sample_rate,
            target_channels,
            ctx: None,
            source_format: None,
            source_rate: None,
            source_channel_layout: None,
        }
    }

    fn target_layout(&self) -> ffmpeg::channel_layout::ChannelLayout {
        match self.target_channels {
            1 => ffmpeg::channel_layout::ChannelLayout::MONO,
            2 => ffmpeg::channel_layout::ChannelLayout::STEREO,
            _ => ffmpeg::channel_layout::ChannelLayout::STEREO_DOWNMIX,
        }
    }

    fn needs_rebuild(&self, frame: &ffmpeg::frame::Audio) -> bool {
        self.ctx.is_none()
            || self.source_format != Some(frame.format())
            || self.source_rate != Some(frame.rate())
            || self.source_channel_layout != Some(frame.channel_layout())
    }

    fn rebuild(&mut self, frame: &ffmpeg::frame::Audio) -> Result<()> {
        let ctx = resampling::Context::get(
            frame.format(),
            frame.channel_layout(),
            frame.rate(),
            TARGET_FORMAT,
            self.target_layout(),
            self.target_sample_rate,
        )
        .map_err(|e| ZenPlayError::codec_with("failed to build audio resampler", e))?;

        self.ctx = Some(ctx);
        self.source_format = Some(frame.format());
        self.source_rate = Some(frame.rate());
        self.source_channel_layout = Some(frame.channel_layout());
        Ok(())
    }

    /// Whether `frame` already has the resampler's target layout exactly,
    /// so no conversion work is needed beyond handing its storage onward
    /// (spec §4.4: "if input equals target exactly, return a zero-copy view
    /// wrapping the input storage").
    fn matches_target(&self, frame: &ffmpeg::frame::Audio) -> bool {
        frame.format() == TARGET_FORMAT
            && frame.rate() == self.target_sample_rate
            && frame.channel_layout() == self.target_layout()
    }

    /// Resamples one decoded frame to the target layout. `pts_seconds` is
    /// the frame's presentation time already converted to seconds by the
    /// caller (the decoder's timebase conversion), carried through
    /// unchanged since resampling never shifts timing.
    pub fn resample(
        &mut self,
        frame: &ffmpeg::frame::Audio,
        pts_seconds: f64,
    ) -> Result<ResampledAudioFrame> {
        if self.matches_target(frame) {
            let bytes_per_sample = std::mem::size_of::<f32>();
            let sample_count = frame.samples();
            let byte_len = sample_count * self.target_channels as usize * bytes_per_sample;
            let plane = frame.data(0);
            let data = bytes::Bytes::copy_from_slice(&plane[..byte_len.min(plane.len())]);
            return Ok(ResampledAudioFrame {
                data,
                sample_count,
                pts_seconds,
                sample_rate: self.target_sample_rate,
                channels: self.target_channels,
                bytes_per_sample,
            });
        }

        if self.needs_rebuild(frame) {
            self.rebuild(frame)?;
        }

        let mut out = ffmpeg::frame::Audio::empty();
        self.ctx
            .as_mut()
            .expect("resampler context built above")
            .run(frame, &mut out)
            .map_err(|e| ZenPlayError::codec_with("audio resample failed", e))?;

        let sample_count = out.samples();
        let bytes_per_sample = std::mem::size_of::<f32>();
        let byte_len = sample_count * self.target_channels as usize * bytes_per_sample;
        let data = bytes::Bytes::copy_from_slice(&out.data(0)[..byte_len.min(out.data(0).len())]);

        Ok(ResampledAudioFrame {
            data,
            sample_count,
            pts_seconds,
            sample_rate: self.target_sample_rate,
            channels: self.target_channels,
            bytes_per_sample,
        })
    }

    /// Drops the built context so the next frame after a seek rebuilds from
    /// scratch rather than carrying over stale internal resampler state
    /// (buffered fractional samples from the pre-seek stream).
    pub fn reset(&mut self) {
        self.ctx = None;
        self.source_format = None;
        self.source_rate = None;
        self.source_channel_layout = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_frame(
        format: ffmpeg::format::Sample,
        layout: ffmpeg::channel_layout::ChannelLayout,
        rate: u32,
        samples: usize,
    ) -> ffmpeg::frame::Audio {
        let mut frame = ffmpeg::frame::Audio::new(format, samples, layout);
        frame.set_rate(rate);
        frame
    }

    #[test]
    fn exact_format_match_skips_the_resampling_context() {
        let mut resampler = AudioResampler::new(48_000, 2);
        let frame = make_frame(
            TARGET_FORMAT,
            ffmpeg::channel_layout::ChannelLayout::STEREO,
            48_000,
            1024,
        );

        let out = resampler.resample(&frame, 1.5).expect("resample");

        assert!(resampler.ctx.is_none(), "no converter should be built for an exact match");
        assert_eq!(out.sample_count, 1024);
        assert_eq!(out.channels, 2);
        assert_eq!(out.pts_seconds, 1.5);
        assert_eq!(out.byte_len(), 1024 * 2 * std::mem::size_of::<f32>());
    }

    #[test]
    fn mismatched_rate_builds_a_converter() {
        let mut resampler = AudioResampler::new(48_000, 2);
        let frame = make_frame(
            TARGET_FORMAT,
            ffmpeg::channel_layout::ChannelLayout::STEREO,
            44_100,
            1024,
        );

        assert!(!resampler.matches_target(&frame));
        let out = resampler.resample(&frame, 0.0).expect("resample");

        assert!(resampler.ctx.is_some(), "a mismatched rate must build a converter");
        assert_eq!(out.sample_rate, 48_000);
    }
}
