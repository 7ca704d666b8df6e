//! Video player (spec §4.13, component C13).
//!
//! Owns the bounded decoded-frame queue and the render worker thread that
//! drains it: pop a frame, ask the sync controller whether to drop it,
//! sleep for the delay the sync controller computes, hand the frame to the
//! renderer, then report the presented pts back to the sync controller.
//! Pause/stop/seek are all expressed through the shared
//! [`crate::state::StateMachine`] and [`crate::queue::BoundedQueue::reset`]
//! rather than bespoke signaling, matching this crate's other worker loops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::model::VideoFrame;
use crate::queue::{BoundedQueue, PopResult, PushResult};
use crate::render::RendererProxy;
use crate::state::StateMachine;
use crate::sync::SyncController;

const POP_TIMEOUT: Duration = Duration::from_millis(200);
/// Never sleep longer than this in one iteration even if the sync
/// controller's delay clamp were misconfigured upstream — keeps the loop
/// responsive to stop/seek requests (spec §4.13).
const MAX_SINGLE_SLEEP: Duration = Duration::from_millis(500);

pub struct VideoPlayer {
    queue: Arc<BoundedQueue<VideoFrame>>,
    stop: Arc<AtomicBool>,
    worker: Option<std::thread::JoinHandle<()>>,
}

impl VideoPlayer {
    pub fn start(
        renderer: Arc<RendererProxy>,
        state: StateMachine,
        sync: SyncController,
        queue_capacity: usize,
    ) -> Self {
        let queue = Arc::new(BoundedQueue::new(queue_capacity));
        let stop = Arc::new(AtomicBool::new(false));

        let worker_queue = queue.clone();
        let worker_stop = stop.clone();
        let worker = std::thread::spawn(move || {
            run_loop(worker_queue, renderer, state, sync, worker_stop);
        });

        Self {
            queue,
            stop,
            worker: Some(worker),
        }
    }

    pub fn queue(&self) -> &Arc<BoundedQueue<VideoFrame>> {
        &self.queue
    }

    pub fn enqueue(&self, frame: VideoFrame, timeout: Duration) -> PushResult<VideoFrame> {
        self.queue.push(frame, timeout)
    }

    /// Seek hook, called before the demuxer seeks (spec §4.14): drains
    /// in-flight frames so stale pre-seek frames are never presented.
    pub fn pre_seek(&self) {
        self.queue.reset(|_| {});
    }

    /// Called after the demuxer seek and sync reset complete; currently a
    /// no-op beyond documenting the pairing with `pre_seek`, since the
    /// render worker picks back up from the (now-reset) sync controller's
    /// clock on the next popped frame automatically.
    pub fn post_seek(&self) {}

    pub fn close(mut self) {
        self.stop.store(true, Ordering::Release);
        self.queue.close();
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

fn run_loop(
    queue: Arc<BoundedQueue<VideoFrame>>,
    renderer: Arc<RendererProxy>,
    state: StateMachine,
    sync: SyncController,
    stop: Arc<AtomicBool>,
) {
    loop {
        if stop.load(Ordering::Acquire) || state.should_stop() {
            return;
        }

        state.wait_for_resume();
        if stop.load(Ordering::Acquire) || state.should_stop() {
            return;
        }

        let frame = match queue.pop(POP_TIMEOUT) {
            PopResult::Item(frame) => frame,
            PopResult::Empty => continue,
            PopResult::Reset => {
                if queue.is_closed() {
                    return;
                }
                // Seek flush: nothing queued yet, wait for the next frame.
                continue;
            }
        };

        let pts_ms = frame.pts_ms();
        let now = Instant::now();

        if sync.should_drop_video(pts_ms, now) {
            tracing::debug!(target: "zenplay::video", pts_ms, "dropping late video frame");
            continue;
        }
        // Side effect only (stats); the repeat case is handled by the
        // delay clamp below holding the current frame on screen a little
        // longer before the next `render` call swaps it out.
        let _ = sync.should_repeat_video(pts_ms, now);

        let delay_ms = sync.calculate_video_delay(pts_ms, now);
        if delay_ms > 0.0 {
            let sleep_for = Duration::from_secs_f64(delay_ms / 1000.0).min(MAX_SINGLE_SLEEP);
            std::thread::sleep(sleep_for);
        }

        if state.should_stop() || stop.load(Ordering::Acquire) {
            return;
        }

        match renderer.render(frame) {
            Ok(()) => {
                sync.update_video_clock(pts_ms, Instant::now());
            }
            Err(e) => {
                tracing::warn!(target: "zenplay::video", error = %e, "frame present failed, continuing");
            }
        }
    }
}
