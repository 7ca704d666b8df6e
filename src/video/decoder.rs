//! Video decoder (spec §4.6, component C6).
//!
//! Wraps one ffmpeg video stream's decode context, optionally bound to a
//! [`crate::hwaccel::HardwareDecodeContext`]. When hardware decode is
//! active, decoded frames carry an opaque GPU texture handle instead of
//! CPU planes and are never cloned on the way out — ownership moves from
//! this decoder's local frame workspace into exactly one queue slot (spec
//! §4.6, "move never clone").
//!
//! The `get_format`/`hw_device_ctx` installation in
//! [`crate::hwaccel::HardwareDecodeContext::configure_decoder`] has to run
//! on an empty codec context, before stream parameters are copied in — see
//! that function's doc comment — so this decoder builds the context in two
//! steps (`Context::new()` then `set_parameters`) instead of the one-shot
//! `Context::from_parameters` the audio decoder uses.

use ffmpeg_next::{self as ffmpeg, codec, decoder};

use crate::error::{Result, ZenPlayError};
use crate::hwaccel::HardwareDecodeContext;
use crate::model::{CpuPlanes, Packet, TextureHandle, Timebase, VideoFrame};

pub struct VideoDecoder {
    decoder: decoder::Video,
    timebase: Timebase,
    hw_active: bool,
    logged_first_hw_frame: bool,
}

impl VideoDecoder {
    /// `hw_ctx` is `None` for a software-only open (spec §6 render-path
    /// precedence already decided software before this is called).
    pub fn open(
        params: codec::Parameters,
        stream_timebase: Timebase,
        hw_ctx: Option<&HardwareDecodeContext>,
    ) -> Result<Self> {
        let mut ctx = codec::context::Context::new();

        if let Some(hw) = hw_ctx {
            unsafe {
                hw.configure_decoder(ctx.as_mut_ptr());
            }
        }

        ctx.set_parameters(params)
            .map_err(|e| ZenPlayError::codec_with("failed to set video codec parameters", e))?;

        let decoder = ctx
            .decoder()
            .video()
            .map_err(|e| ZenPlayError::codec_with("failed to open video decoder", e))?;

        Ok(Self {
            decoder,
            timebase: stream_timebase,
            hw_active: hw_ctx.is_some(),
            logged_first_hw_frame: false,
        })
    }

    pub fn width(&self) -> u32 {
        self.decoder.width()
    }

    pub fn height(&self) -> u32 {
        self.decoder.height()
    }

    pub fn is_hardware(&self) -> bool {
        self.hw_active
    }

    pub fn send_packet(&mut self, packet: &Packet) -> Result<()> {
        self.decoder
            .send_packet(&packet.inner)
            .map_err(|e| ZenPlayError::codec_with("video send_packet failed", e))
    }

    pub fn send_eof(&mut self) -> Result<()> {
        self.decoder
            .send_eof()
            .map_err(|e| ZenPlayError::codec_with("video send_eof failed", e))
    }

    /// Drains one decoded frame and converts it to the crate's frame model.
    /// Hardware frames become [`VideoFrame::Gpu`] (texture handle + slice
    /// index, no pixel data copied); software frames become
    /// [`VideoFrame::Cpu`] with owned plane copies, since ffmpeg's internal
    /// frame buffer is reused on the next `receive_frame` call and must not
    /// be aliased past this function's return.
    pub fn receive_frame(&mut self) -> Result<Option<VideoFrame>> {
        let mut frame = ffmpeg::frame::Video::empty();
        match self.decoder.receive_frame(&mut frame) {
            Ok(()) => {}
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => {
                return Ok(None)
            }
            Err(ffmpeg::Error::Eof) => return Ok(None),
            Err(e) => return Err(ZenPlayError::codec_with("video receive_frame failed", e)),
        }

        let pts_ms = frame
            .pts()
            .map(|p| self.timebase.pts_to_ms(p))
            .unwrap_or(0.0);

        if self.hw_active {
            let (texture, slice_index) = HardwareDecodeContext::get_texture_from_frame(&frame);
            if !self.logged_first_hw_frame {
                tracing::info!(
                    target: "zenplay::decoder",
                    texture = texture.0,
                    slice_index,
                    "first hardware frame decoded; zero-copy path confirmed active"
                );
                self.logged_first_hw_frame = true;
            }
            Ok(Some(VideoFrame::Gpu {
                texture,
                slice_index,
                pts_ms,
                owner: frame,
            }))
        } else {
            Ok(Some(VideoFrame::Cpu {
                planes: copy_planes(&frame),
                pts_ms,
            }))
        }
    }

    pub fn flush(&mut self) {
        self.decoder.flush();
        self.logged_first_hw_frame = false;
    }
}

fn copy_planes(frame: &ffmpeg::frame::Video) -> CpuPlanes {
    let format = frame.format();
    let width = frame.width();
    let height = frame.height();
    let plane_count = frame.planes();

    let mut planes = Vec::with_capacity(plane_count);
    let mut strides = Vec::with_capacity(plane_count);
    for i in 0..plane_count {
        planes.push(frame.data(i).to_vec());
        strides.push(frame.stride(i));
    }

    CpuPlanes {
        planes,
        strides,
        format,
        width,
        height,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn texture_handle_is_copyable_identity() {
        let a = TextureHandle(42);
        let b = a;
        assert_eq!(a, b);
    }
}
