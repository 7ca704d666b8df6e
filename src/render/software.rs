//! Software renderer (spec §4.10, component C10).
//!
//! Decoded CPU frames arrive in whatever pixel format the source codec
//! produces; this renderer lazily builds an `ffmpeg` scaling context that
//! converts to NV12 (one full-resolution luma plane, one half-resolution
//! interleaved chroma plane) the first time it sees a new format/size
//! combination, then uploads the two planes as textures and draws the same
//! full-screen quad the zero-copy path uses. Texture creation, upload, and
//! present failures are all counted as dropped frames rather than
//! propagated as hard errors (spec §4.10: "a single bad frame must not
//! stop the pipeline").
//!
//! Grounded on the teacher's `VideoPipeline`/`VideoTarget` wgpu setup
//! (texture + bind group + render pipeline, uniform rect via `encase`),
//! generalized from the teacher's fixed RGBA upload to the YUV(NV12)
//! upload this rewrite's shader expects.

use encase::{ShaderType, UniformBuffer};
use ffmpeg_next::{self as ffmpeg, software::scaling};
use glam::Vec4;

use crate::error::{Result, ZenPlayError};
use crate::model::{CpuPlanes, VideoFrame};
use crate::render::{Renderer, RendererStats};

#[derive(ShaderType)]
struct RectUniform {
    rect: Vec4,
}

/// Aspect-preserving destination rect in clip-space half-extents. Wider
/// frames than the surface get letterboxed (bars top/bottom); narrower
/// frames get pillarboxed (bars left/right).
fn letterbox_rect(surface_w: u32, surface_h: u32, frame_w: u32, frame_h: u32) -> Vec4 {
    let surface_aspect = surface_w as f32 / surface_h.max(1) as f32;
    let frame_aspect = frame_w as f32 / frame_h.max(1) as f32;
    if frame_aspect > surface_aspect {
        let scale = surface_aspect / frame_aspect;
        Vec4::new(0.0, 0.0, 1.0, scale)
    } else {
        let scale = frame_aspect / surface_aspect;
        Vec4::new(0.0, 0.0, scale, 1.0)
    }
}

struct Converter {
    ctx: scaling::Context,
    format: ffmpeg::format::Pixel,
    width: u32,
    height: u32,
}

pub struct SoftwareRenderer {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    uniform_buffer: wgpu::Buffer,
    sampler: wgpu::Sampler,
    surface_width: u32,
    surface_height: u32,
    converter: Option<Converter>,
    stats: RendererStats,
}

impl SoftwareRenderer {
    pub fn new(
        device: wgpu::Device,
        queue: wgpu::Queue,
        surface_format: wgpu::TextureFormat,
        surface_width: u32,
        surface_height: u32,
    ) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("zenplay-video-shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("video.wgsl").into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("zenplay-video-bind-group-layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("zenplay-video-pipeline-layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("zenplay-video-pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(surface_format.into())],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleStrip,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("zenplay-video-rect-uniform"),
            size: std::mem::size_of::<RectUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("zenplay-video-sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        Self {
            device,
            queue,
            pipeline,
            bind_group_layout,
            uniform_buffer,
            sampler,
            surface_width,
            surface_height,
            converter: None,
            stats: RendererStats::default(),
        }
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.surface_width = width;
        self.surface_height = height;
    }

    fn ensure_converter(&mut self, planes: &CpuPlanes) -> Result<()> {
        let needs_rebuild = match &self.converter {
            Some(c) => c.format != planes.format || c.width != planes.width || c.height != planes.height,
            None => true,
        };
        if !needs_rebuild {
            return Ok(());
        }

        let ctx = scaling::Context::get(
            planes.format,
            planes.width,
            planes.height,
            ffmpeg::format::Pixel::NV12,
            planes.width,
            planes.height,
            scaling::Flags::BILINEAR,
        )
        .map_err(|e| ZenPlayError::render(format!("failed to build color-space converter: {e}")))?;

        self.converter = Some(Converter {
            ctx,
            format: planes.format,
            width: planes.width,
            height: planes.height,
        });
        Ok(())
    }

    fn convert_to_nv12(&mut self, planes: &CpuPlanes) -> Result<ffmpeg::frame::Video> {
        self.ensure_converter(planes)?;

        let mut src = ffmpeg::frame::Video::new(planes.format, planes.width, planes.height);
        for (i, plane) in planes.planes.iter().enumerate() {
            let stride = planes.strides[i];
            let dst_stride = src.stride(i);
            let rows = plane.len() / stride.max(1);
            for row in 0..rows {
                let src_row = &plane[row * stride..((row + 1) * stride).min(plane.len())];
                let dst_row = &mut src.data_mut(i)[row * dst_stride..row * dst_stride + src_row.len()];
                dst_row.copy_from_slice(src_row);
            }
        }

        let mut dst = ffmpeg::frame::Video::empty();
        self.converter
            .as_mut()
            .expect("converter ensured above")
            .ctx
            .run(&src, &mut dst)
            .map_err(|e| ZenPlayError::render(format!("color-space conversion failed: {e}")))?;
        Ok(dst)
    }

    fn upload_plane(&self, label: &str, data: &[u8], width: u32, height: u32, format: wgpu::TextureFormat) -> wgpu::TextureView {
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let bytes_per_pixel = match format {
            wgpu::TextureFormat::R8Unorm => 1,
            wgpu::TextureFormat::Rg8Unorm => 2,
            _ => 1,
        };
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * bytes_per_pixel),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        texture.create_view(&wgpu::TextureViewDescriptor::default())
    }

    fn letterbox_rect(&self, frame_w: u32, frame_h: u32) -> Vec4 {
        letterbox_rect(self.surface_width, self.surface_height, frame_w, frame_h)
    }

    fn render_inner(&mut self, planes: &CpuPlanes) -> Result<()> {
        let nv12 = self.convert_to_nv12(planes)?;

        let y_view = self.upload_plane(
            "zenplay-y-plane",
            nv12.data(0),
            planes.width,
            planes.height,
            wgpu::TextureFormat::R8Unorm,
        );
        let uv_view = self.upload_plane(
            "zenplay-uv-plane",
            nv12.data(1),
            planes.width / 2,
            planes.height / 2,
            wgpu::TextureFormat::Rg8Unorm,
        );

        let rect = self.letterbox_rect(planes.width, planes.height);
        let mut uniform_bytes = UniformBuffer::new(Vec::new());
        uniform_bytes
            .write(&RectUniform { rect })
            .map_err(|e| ZenPlayError::render(format!("uniform encode failed: {e}")))?;
        self.queue
            .write_buffer(&self.uniform_buffer, 0, &uniform_bytes.into_inner());

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("zenplay-video-bind-group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.uniform_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&y_view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(&uv_view),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        });

        // The controller owns the actual swapchain/surface target; this
        // renderer draws into whatever the caller's render-target view is
        // set up for per present cycle, matching the teacher's per-frame
        // `VideoTarget::draw` shape.
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("zenplay-video-encoder"),
            });
        {
            let target = self.device.create_texture(&wgpu::TextureDescriptor {
                label: Some("zenplay-present-target"),
                size: wgpu::Extent3d {
                    width: self.surface_width.max(1),
                    height: self.surface_height.max(1),
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Bgra8Unorm,
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
                view_formats: &[],
            });
            let target_view = target.create_view(&wgpu::TextureViewDescriptor::default());
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("zenplay-video-pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.draw(0..4, 0..1);
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }
}

impl Renderer for SoftwareRenderer {
    fn render(&mut self, frame: &VideoFrame) -> Result<()> {
        let planes = match frame {
            VideoFrame::Cpu { planes, .. } => planes,
            VideoFrame::Gpu { .. } => {
                self.stats.frames_dropped += 1;
                return Err(ZenPlayError::render(
                    "software renderer received a GPU-resident frame",
                ));
            }
        };

        match self.render_inner(planes) {
            Ok(()) => {
                self.stats.frames_presented += 1;
                Ok(())
            }
            Err(e) => {
                self.stats.frames_dropped += 1;
                Err(e)
            }
        }
    }

    fn clear_caches(&mut self) {
        self.converter = None;
    }

    fn on_resize(&mut self, width: u32, height: u32) {
        self.resize(width, height);
    }

    fn stats(&self) -> RendererStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wider_frame_than_surface_is_letterboxed() {
        let rect = letterbox_rect(800, 800, 1600, 900);
        assert_eq!(rect.z, 1.0);
        assert!(rect.w < 1.0);
    }

    #[test]
    fn narrower_frame_than_surface_is_pillarboxed() {
        let rect = letterbox_rect(1600, 900, 900, 1600);
        assert_eq!(rect.w, 1.0);
        assert!(rect.z < 1.0);
    }
}
