//! A minimal headless harness around [`zenplay_core::PlaybackController`].
//!
//! This is not the player application (spec §1: no window, no input
//! handling, no GUI shell belongs in this crate) — it exists to drive one
//! open/play/seek/close cycle against a real media file from the command
//! line, for manual smoke-testing of the core in isolation. A real host
//! owns the window and wgpu surface and drives the controller the same way.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use zenplay_core::controller::OpenParams;
use zenplay_core::{PlaybackController, PlayerState, RenderPathConfig};

/// Headless harness for the ZenPlay playback core.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path or URL to the media source to open.
    #[arg(short, long)]
    input: String,

    /// Seconds to play before exiting (0 runs until end of stream).
    #[arg(short, long, default_value_t = 0)]
    seconds: u64,

    /// Force the software render path instead of resolving hardware/auto.
    #[arg(long)]
    software: bool,
}

fn main() {
    let args = Args::parse();

    ffmpeg_next::init().expect("failed to initialize ffmpeg");

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("off,zenplay_core=info"))
        .unwrap();
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let (device, queue, surface_format) = pollster::block_on(create_headless_gpu());

    let mut render_config = RenderPathConfig::default();
    if args.software {
        render_config.render_mode = zenplay_core::RenderMode::Software;
    }

    let params = OpenParams::new(
        args.input,
        render_config,
        false, // no real swapchain/surface behind this harness to probe hardware capability against
        device,
        queue,
        surface_format,
        1920,
        1080,
    );

    let controller = match PlaybackController::open(params) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to open media source");
            std::process::exit(1);
        }
    };

    let controller = Arc::new(controller);
    {
        let controller = controller.clone();
        controller.subscribe(move |from, to| {
            tracing::info!(?from, ?to, "state transition");
        });
    }

    if let Err(e) = controller.start() {
        tracing::error!(error = %e, "failed to start playback");
        std::process::exit(1);
    }

    if args.seconds > 0 {
        std::thread::sleep(Duration::from_secs(args.seconds));
    } else {
        while !matches!(
            controller.state().get(),
            PlayerState::Stopped | PlayerState::Error
        ) {
            std::thread::sleep(Duration::from_millis(200));
        }
    }

    let stats = controller.stats();
    tracing::info!(
        avg_sync_error_ms = stats.sync.avg_sync_error_ms,
        drops = stats.sync.drops,
        repeats = stats.sync.repeats,
        frames_presented = stats.renderer.frames_presented,
        frames_dropped = stats.renderer.frames_dropped,
        "final stats"
    );

    match Arc::try_unwrap(controller) {
        Ok(controller) => controller.close(),
        Err(_) => tracing::warn!("controller still referenced at exit; skipping explicit close"),
    }
}

/// Requests a headless wgpu device with no surface attached. A real host
/// instead creates its device bound to the window's surface and passes that
/// in; this harness has no window, so it only needs an adapter capable of
/// running the render pipelines off-screen.
async fn create_headless_gpu() -> (wgpu::Device, wgpu::Queue, wgpu::TextureFormat) {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::default(),
            compatible_surface: None,
            force_fallback_adapter: false,
        })
        .await
        .expect("no suitable wgpu adapter found");

    let (device, queue) = adapter
        .request_device(&wgpu::DeviceDescriptor::default())
        .await
        .expect("failed to request wgpu device");

    (device, queue, wgpu::TextureFormat::Bgra8Unorm)
}
