//! Hardware decode context (spec §4.5, component C5).
//!
//! Allocates the GPU device, a hardware frames pool, and the codec-context
//! hook; exposes the shared GPU device handle to the renderer and the
//! per-frame GPU texture handle to consumers. The configuration ordering in
//! [`HardwareDecodeContext::configure_decoder`] is correctness-critical
//! (spec §4.5): the `get_format` callback and private context pointer must
//! be installed *before* the codec parameters are copied into the codec
//! context, or the pixel-format negotiation callback fires against an
//! uninitialized hook and silently falls back to software.
//!
//! This is the one component that has to reach past `ffmpeg-next`'s safe
//! wrappers into `ffmpeg_next::ffi` directly, because the safe API does not
//! expose hw frames-pool sizing or the `get_format` negotiation hook
//! (mirrors the raw-ffi hw-device pattern used for VideoToolbox elsewhere
//! in this corpus, generalized here to the backends spec §6 names:
//! D3D11VA and DXVA2).

use std::ffi::c_void;
use std::ptr;

use ffmpeg_next::ffi;

use crate::error::{Result, ZenPlayError};
use crate::model::TextureHandle;

/// Minimum initial pool size and extra headroom frames (spec §4.5).
pub const MIN_INITIAL_POOL_SIZE: u32 = 20;
pub const MIN_EXTRA_HW_FRAMES: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HwBackend {
    D3d11Va,
    Dxva2,
}

impl HwBackend {
    fn av_type(self) -> ffi::AVHWDeviceType {
        match self {
            HwBackend::D3d11Va => ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_D3D11VA,
            HwBackend::Dxva2 => ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_DXVA2,
        }
    }

    fn hw_pixel_format(self) -> ffi::AVPixelFormat {
        match self {
            HwBackend::D3d11Va => ffi::AVPixelFormat::AV_PIX_FMT_D3D11,
            HwBackend::Dxva2 => ffi::AVPixelFormat::AV_PIX_FMT_DXVA2_VLD,
        }
    }
}

/// A non-owning, `Send + Sync` handle to the shared GPU device backing
/// both the hardware decode context and the GPU renderer. Identity-only:
/// equality compares the underlying pointer, never dereferences it outside
/// ffmpeg/GPU-API calls performed by this module and [`crate::render::gpu`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceHandle(pub usize);

// SAFETY: `DeviceHandle` is an opaque identity token; the pointer it wraps
// is never dereferenced from Rust code outside the owning module, and the
// underlying hardware APIs (D3D11, ffmpeg's hwcontext) are internally
// synchronized by the renderer proxy (spec §5, "single-threaded from the
// GPU API's perspective via the renderer proxy").
unsafe impl Send for DeviceHandle {}
unsafe impl Sync for DeviceHandle {}

struct PrivateHwData {
    hw_pixel_format: ffi::AVPixelFormat,
}

unsafe extern "C" fn get_format(
    ctx: *mut ffi::AVCodecContext,
    formats: *const ffi::AVPixelFormat,
) -> ffi::AVPixelFormat {
    unsafe {
        let opaque = (*ctx).opaque as *const PrivateHwData;
        if opaque.is_null() {
            return ffi::AVPixelFormat::AV_PIX_FMT_NONE;
        }
        let wanted = (*opaque).hw_pixel_format;
        let mut p = formats;
        while *p != ffi::AVPixelFormat::AV_PIX_FMT_NONE {
            if *p == wanted {
                return wanted;
            }
            p = p.add(1);
        }
        ffi::AVPixelFormat::AV_PIX_FMT_NONE
    }
}

/// Owns the hardware device context and the frames pool for one decode
/// session. Constructed before the video decoder opens the codec (spec
/// §4.14 controller composition step 2).
pub struct HardwareDecodeContext {
    backend: HwBackend,
    device_ref: *mut ffi::AVBufferRef,
    frames_ref: *mut ffi::AVBufferRef,
    private: Box<PrivateHwData>,
}

// SAFETY: the two `AVBufferRef` pointers are refcounted ffmpeg objects;
// this type's methods never mutate them concurrently with the decoder, and
// ownership/lifetime rules are documented on each method below.
unsafe impl Send for HardwareDecodeContext {}

impl HardwareDecodeContext {
    /// Allocates the device and frames pool (spec §4.5 step 1). `w`/`h` are
    /// the video stream's coded dimensions; `codec_id` selects the pixel
    /// format the frames pool should offer.
    pub fn initialize(
        backend_pref: HwBackend,
        codec_id: ffi::AVCodecID,
        w: u32,
        h: u32,
    ) -> Result<Self> {
        let _ = codec_id;
        let mut device_ref: *mut ffi::AVBufferRef = ptr::null_mut();
        let ret = unsafe {
            ffi::av_hwdevice_ctx_create(
                &mut device_ref,
                backend_pref.av_type(),
                ptr::null(),
                ptr::null_mut(),
                0,
            )
        };
        if ret < 0 || device_ref.is_null() {
            return Err(ZenPlayError::hardware(format!(
                "failed to create {backend_pref:?} device context (av_hwdevice_ctx_create returned {ret})"
            )));
        }

        let frames_ref = unsafe { ffi::av_hwframe_ctx_alloc(device_ref) };
        if frames_ref.is_null() {
            unsafe { ffi::av_buffer_unref(&mut device_ref) };
            return Err(ZenPlayError::hardware("av_hwframe_ctx_alloc failed"));
        }

        unsafe {
            let frames_ctx = (*frames_ref).data as *mut ffi::AVHWFramesContext;
            (*frames_ctx).format = backend_pref.hw_pixel_format();
            (*frames_ctx).sw_format = ffi::AVPixelFormat::AV_PIX_FMT_NV12;
            (*frames_ctx).width = w as i32;
            (*frames_ctx).height = h as i32;
            // AVHWFramesContext has no separate "extra frames" knob; the
            // extra headroom spec §4.5 asks for (frames checked out by the
            // renderer/queues on top of what the decoder itself holds) is
            // folded straight into the pool size it actually allocates.
            (*frames_ctx).initial_pool_size = (MIN_INITIAL_POOL_SIZE + MIN_EXTRA_HW_FRAMES) as i32;
        }

        let init_ret = unsafe { ffi::av_hwframe_ctx_init(frames_ref) };
        if init_ret < 0 {
            let mut frames_ref_mut = frames_ref;
            unsafe {
                ffi::av_buffer_unref(&mut frames_ref_mut);
                ffi::av_buffer_unref(&mut device_ref);
            }
            return Err(ZenPlayError::resource(format!(
                "av_hwframe_ctx_init failed ({init_ret}); frames pool likely exhausted or unsupported format"
            )));
        }

        Ok(Self {
            backend: backend_pref,
            device_ref,
            frames_ref,
            private: Box::new(PrivateHwData {
                hw_pixel_format: backend_pref.hw_pixel_format(),
            }),
        })
    }

    /// Installs the `get_format` callback and opaque pointer on the codec
    /// context (spec §4.5 step 2). Must be called before the caller copies
    /// codec parameters into `ctx` and before `avcodec_open2` — both of
    /// which the video decoder performs immediately afterward (spec §4.5:
    /// "the format-selection callback fires with an uninitialized hook
    /// state" if the ordering is violated).
    pub fn configure_decoder(&self, ctx: *mut ffi::AVCodecContext) {
        unsafe {
            (*ctx).hw_device_ctx = ffi::av_buffer_ref(self.device_ref);
            (*ctx).hw_frames_ctx = ffi::av_buffer_ref(self.frames_ref);
            (*ctx).opaque = self.private.as_ref() as *const PrivateHwData as *mut c_void;
            (*ctx).get_format = Some(get_format);
        }
    }

    pub fn get_device(&self) -> DeviceHandle {
        DeviceHandle(self.device_ref as usize)
    }

    pub fn backend(&self) -> HwBackend {
        self.backend
    }

    /// Extracts the opaque GPU texture handle and array-slice index from a
    /// hardware frame. Per spec §6, `frame.data[0]` is the texture handle
    /// and `frame.data[1]` is the slice index for the backends this crate
    /// supports.
    pub fn get_texture_from_frame(
        frame: &ffmpeg_next::util::frame::Video,
    ) -> (TextureHandle, usize) {
        unsafe {
            let raw = frame.as_ptr();
            let texture = (*raw).data[0] as usize;
            let slice_index = (*raw).data[1] as usize;
            (TextureHandle(texture), slice_index)
        }
    }

    pub fn cleanup(&mut self) {
        unsafe {
            if !self.frames_ref.is_null() {
                ffi::av_buffer_unref(&mut self.frames_ref);
            }
            if !self.device_ref.is_null() {
                ffi::av_buffer_unref(&mut self.device_ref);
            }
        }
    }
}

impl Drop for HardwareDecodeContext {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_sizing_constants_match_spec_minimums() {
        assert!(MIN_INITIAL_POOL_SIZE >= 20);
        assert!(MIN_EXTRA_HW_FRAMES >= 8);
        assert!(MIN_INITIAL_POOL_SIZE + MIN_EXTRA_HW_FRAMES >= 28);
    }
}
