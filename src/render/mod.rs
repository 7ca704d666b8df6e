//! Rendering (spec §4.9–§4.11, components C9, C10, C11).
//!
//! `Renderer` is the trait both the software and GPU zero-copy paths
//! implement; [`RendererProxy`] is the dispatch-and-block-on-return wrapper
//! the controller actually holds, because every wgpu/D3D call in this
//! crate has to run on the thread that owns the presentation surface (spec
//! §9: "the renderer is effectively single-threaded from the GPU API's
//! perspective"). The proxy spawns that thread once at `init` time and
//! forwards every call across a bounded reply channel, blocking the caller
//! until the owning thread finishes the call — mirrors the teacher's
//! `tessera` render-thread boundary, generalized away from that specific
//! UI framework.

pub mod gpu;
pub mod software;

use crate::error::{Result, ZenPlayError};
use crate::model::VideoFrame;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RendererStats {
    pub frames_presented: u64,
    pub frames_dropped: u64,
    pub srv_cache_hits: u64,
    pub srv_cache_misses: u64,
}

/// Implemented by both the software (C10) and GPU zero-copy (C11)
/// renderers. `clear_caches` is the seek hook (spec §4.9): any per-frame
/// resource keyed by a texture identity that a seek might invalidate (SRV
/// cache, scaler context) is dropped there.
pub trait Renderer: Send {
    fn render(&mut self, frame: &VideoFrame) -> Result<()>;
    fn clear_caches(&mut self);
    fn on_resize(&mut self, width: u32, height: u32);
    fn stats(&self) -> RendererStats;
}

enum Command {
    Render(VideoFrame, flume::Sender<Result<()>>),
    ClearCaches(flume::Sender<()>),
    Resize(u32, u32, flume::Sender<()>),
    Stats(flume::Sender<RendererStats>),
    Shutdown,
}

/// Owns the worker thread a `Renderer` implementation runs on. Every public
/// method sends a command and blocks on the reply, so from the caller's
/// point of view this is an ordinary synchronous `Renderer` — the thread
/// hop is invisible except for latency.
pub struct RendererProxy {
    tx: flume::Sender<Command>,
    worker: Option<std::thread::JoinHandle<()>>,
}

impl RendererProxy {
    pub fn spawn<R: Renderer + 'static>(mut renderer: R) -> Self {
        let (tx, rx) = flume::unbounded::<Command>();
        let worker = std::thread::spawn(move || {
            while let Ok(cmd) = rx.recv() {
                match cmd {
                    Command::Render(frame, reply) => {
                        let _ = reply.send(renderer.render(&frame));
                    }
                    Command::ClearCaches(reply) => {
                        renderer.clear_caches();
                        let _ = reply.send(());
                    }
                    Command::Resize(width, height, reply) => {
                        renderer.on_resize(width, height);
                        let _ = reply.send(());
                    }
                    Command::Stats(reply) => {
                        let _ = reply.send(renderer.stats());
                    }
                    Command::Shutdown => break,
                }
            }
        });
        Self {
            tx,
            worker: Some(worker),
        }
    }

    pub fn render(&self, frame: VideoFrame) -> Result<()> {
        let (reply_tx, reply_rx) = flume::bounded(1);
        self.tx
            .send(Command::Render(frame, reply_tx))
            .map_err(|_| ZenPlayError::render("renderer thread is gone"))?;
        reply_rx
            .recv()
            .map_err(|_| ZenPlayError::render("renderer thread dropped its reply"))?
    }

    pub fn clear_caches(&self) {
        let (reply_tx, reply_rx) = flume::bounded(1);
        if self.tx.send(Command::ClearCaches(reply_tx)).is_ok() {
            let _ = reply_rx.recv();
        }
    }

    /// Forwards a surface-size change to the owning thread (spec §4.9:
    /// resizes arrive asynchronously from the GUI shell and must not race a
    /// concurrent `render` call).
    pub fn on_resize(&self, width: u32, height: u32) {
        let (reply_tx, reply_rx) = flume::bounded(1);
        if self.tx.send(Command::Resize(width, height, reply_tx)).is_ok() {
            let _ = reply_rx.recv();
        }
    }

    pub fn stats(&self) -> RendererStats {
        let (reply_tx, reply_rx) = flume::bounded(1);
        if self.tx.send(Command::Stats(reply_tx)).is_ok() {
            reply_rx.recv().unwrap_or_default()
        } else {
            RendererStats::default()
        }
    }

    pub fn shutdown(mut self) {
        let _ = self.tx.send(Command::Shutdown);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for RendererProxy {
    fn drop(&mut self) {
        let _ = self.tx.send(Command::Shutdown);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}
