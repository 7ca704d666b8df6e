//! AV sync controller (spec §4.3, component C3).
//!
//! Three master-clock modes, per-stream PTS normalization, drift-corrected
//! clock extrapolation, pause-freeze/resume-shift, seek reset, and the
//! video delay/drop/repeat decisions the video player consults every
//! frame. Two separate locks back this component, matching spec §5's
//! locking discipline: `clock_mutex` guards the high-frequency read/update
//! path, `pause_mutex` guards pause/resume bookkeeping, and the clock mutex
//! is never held across the pause mutex except in the fixed pause-then-
//! clock order documented on [`SyncController::pause`] and
//! [`SyncController::resume`].

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

pub const DEFAULT_MAX_SPEEDUP_MS: f64 = 80.0;
pub const DEFAULT_MAX_DELAY_MS: f64 = 100.0;
pub const DEFAULT_DROP_THRESHOLD_MS: f64 = 80.0;
pub const DEFAULT_REPEAT_THRESHOLD_MS: f64 = 20.0;

const DRIFT_ALPHA: f64 = 0.1;
const SYNC_ERROR_WINDOW: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    AudioMaster,
    /// Exposed per spec §9 Open Questions but never selected automatically:
    /// the source's audio-resample-to-video-clock path is not fully
    /// implemented there, and this rewrite keeps that gap rather than
    /// silently completing it.
    VideoMaster,
    ExternalMaster,
}

#[derive(Debug, Clone, Copy)]
struct ClockInfo {
    pts_ms: f64,
    system_time: Instant,
    drift_ms: f64,
}

impl ClockInfo {
    fn new(now: Instant) -> Self {
        Self {
            pts_ms: 0.0,
            system_time: now,
            drift_ms: 0.0,
        }
    }

    fn current(&self, now: Instant) -> f64 {
        let elapsed_ms = now.saturating_duration_since(self.system_time).as_secs_f64() * 1000.0;
        self.pts_ms + elapsed_ms + self.drift_ms
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncStats {
    pub avg_sync_error_ms: f64,
    pub corrections: u64,
    pub drops: u64,
    pub repeats: u64,
}

struct ClockState {
    mode: SyncMode,
    audio: ClockInfo,
    video: ClockInfo,
    /// First observed raw PTS per stream; `None` until the first
    /// `update_*_clock` after construction or `reset()`. Never cleared by
    /// `reset_for_seek` (spec §4.3: "seeking does not change the stream's
    /// time origin").
    start_pts_audio_ms: Option<f64>,
    start_pts_video_ms: Option<f64>,
    play_start_time: Instant,
    sync_errors: VecDeque<f64>,
    corrections: u64,
    drops: u64,
    repeats: u64,
}

struct PauseState {
    is_paused: bool,
    pause_start_time: Instant,
    accumulated_pause_duration_ms: f64,
}

/// Shared, thread-safe AV sync controller. Cheap to clone; clones share the
/// same underlying clocks.
#[derive(Clone)]
pub struct SyncController {
    clock: Arc<Mutex<ClockState>>,
    pause: Arc<Mutex<PauseState>>,
    max_speedup_ms: f64,
    max_delay_ms: f64,
    drop_threshold_ms: f64,
    repeat_threshold_ms: f64,
}

impl SyncController {
    pub fn new(now: Instant) -> Self {
        Self {
            clock: Arc::new(Mutex::new(ClockState {
                mode: SyncMode::ExternalMaster,
                audio: ClockInfo::new(now),
                video: ClockInfo::new(now),
                start_pts_audio_ms: None,
                start_pts_video_ms: None,
                play_start_time: now,
                sync_errors: VecDeque::with_capacity(SYNC_ERROR_WINDOW),
                corrections: 0,
                drops: 0,
                repeats: 0,
            })),
            pause: Arc::new(Mutex::new(PauseState {
                is_paused: false,
                pause_start_time: now,
                accumulated_pause_duration_ms: 0.0,
            })),
            max_speedup_ms: DEFAULT_MAX_SPEEDUP_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            drop_threshold_ms: DEFAULT_DROP_THRESHOLD_MS,
            repeat_threshold_ms: DEFAULT_REPEAT_THRESHOLD_MS,
        }
    }

    pub fn set_mode(&self, mode: SyncMode) {
        self.clock.lock().mode = mode;
    }

    pub fn mode(&self) -> SyncMode {
        self.clock.lock().mode
    }

    fn is_paused(&self) -> bool {
        self.pause.lock().is_paused
    }

    fn normalize_audio(state: &mut ClockState, raw_pts_ms: f64) -> f64 {
        let start = *state.start_pts_audio_ms.get_or_insert(raw_pts_ms);
        raw_pts_ms - start
    }

    fn normalize_video(state: &mut ClockState, raw_pts_ms: f64) -> f64 {
        let start = *state.start_pts_video_ms.get_or_insert(raw_pts_ms);
        raw_pts_ms - start
    }

    pub fn update_audio_clock(&self, raw_pts_ms: f64, now: Instant) {
        let mut state = self.clock.lock();
        let normalized = Self::normalize_audio(&mut state, raw_pts_ms);
        let expected = state.audio.current(now);
        let drift = DRIFT_ALPHA * (normalized - expected);
        state.audio.pts_ms = normalized;
        state.audio.system_time = now;
        state.audio.drift_ms = drift;
        if drift.abs() > f64::EPSILON {
            state.corrections += 1;
        }
        Self::record_sync_error(&mut state, normalized - expected);
    }

    pub fn update_video_clock(&self, raw_pts_ms: f64, now: Instant) {
        let mut state = self.clock.lock();
        let normalized = Self::normalize_video(&mut state, raw_pts_ms);
        let expected = state.video.current(now);
        let drift = DRIFT_ALPHA * (normalized - expected);
        state.video.pts_ms = normalized;
        state.video.system_time = now;
        state.video.drift_ms = drift;
    }

    fn record_sync_error(state: &mut ClockState, error_ms: f64) {
        if state.sync_errors.len() >= SYNC_ERROR_WINDOW {
            state.sync_errors.pop_front();
        }
        state.sync_errors.push_back(error_ms);
    }

    /// Extrapolation contract: `pts_ms + (now - system_time) + drift`. When
    /// paused, callers substitute `pause_start_time` for `now`, freezing
    /// the returned value (spec §4.3).
    pub fn get_master_clock(&self, now: Instant) -> f64 {
        let effective_now = if self.is_paused() {
            self.pause.lock().pause_start_time
        } else {
            now
        };

        let state = self.clock.lock();
        match state.mode {
            SyncMode::AudioMaster => state.audio.current(effective_now),
            SyncMode::VideoMaster => state.video.current(effective_now),
            SyncMode::ExternalMaster => {
                let elapsed_ms = effective_now
                    .saturating_duration_since(state.play_start_time)
                    .as_secs_f64()
                    * 1000.0;
                elapsed_ms
            }
        }
    }

    /// `video_normalized - master`, unclamped. Positive means the frame is
    /// early (sleep before presenting); very negative means it's late
    /// (candidate for dropping). Drop/repeat decisions must run on this raw
    /// value — clamping first would make a sufficiently late frame
    /// indistinguishable from one merely at the drop threshold.
    fn raw_video_delay(&self, video_raw_pts_ms: f64, now: Instant) -> f64 {
        let v = {
            let mut state = self.clock.lock();
            Self::normalize_video(&mut state, video_raw_pts_ms)
        };
        let m = self.get_master_clock(now);
        v - m
    }

    /// `clamp(video_normalized - master, -max_speedup, +max_delay)`, the
    /// duration the video player should actually sleep for before
    /// presenting. Never used for the drop/repeat decisions themselves —
    /// see [`Self::raw_video_delay`].
    pub fn calculate_video_delay(&self, video_raw_pts_ms: f64, now: Instant) -> f64 {
        self.raw_video_delay(video_raw_pts_ms, now)
            .clamp(-self.max_speedup_ms, self.max_delay_ms)
    }

    pub fn should_drop_video(&self, video_raw_pts_ms: f64, now: Instant) -> bool {
        let delay = self.raw_video_delay(video_raw_pts_ms, now);
        let drop = delay < -self.drop_threshold_ms;
        if drop {
            self.clock.lock().drops += 1;
        }
        drop
    }

    /// Spec §9 keeps the source's "sleep and present the same frame later"
    /// repeat semantics rather than enqueuing a true duplicate frame; this
    /// predicate only signals the decision, the video player is what
    /// actually re-presents the previous frame.
    pub fn should_repeat_video(&self, video_raw_pts_ms: f64, now: Instant) -> bool {
        let delay = self.raw_video_delay(video_raw_pts_ms, now);
        let repeat = delay > self.repeat_threshold_ms;
        if repeat {
            self.clock.lock().repeats += 1;
        }
        repeat
    }

    /// Pause/resume ordering (spec §5): pause mutex is acquired, then the
    /// clock mutex, in that fixed order, only within this short critical
    /// section. `pause_mutex` is otherwise never held across `clock_mutex`.
    pub fn pause(&self, now: Instant) {
        let mut pause = self.pause.lock();
        if pause.is_paused {
            return; // idempotent
        }
        pause.is_paused = true;
        pause.pause_start_time = now;
    }

    pub fn resume(&self, now: Instant) {
        let mut pause = self.pause.lock();
        if !pause.is_paused {
            return; // idempotent
        }
        let delta = now.saturating_duration_since(pause.pause_start_time);
        let delta_ms = delta.as_secs_f64() * 1000.0;

        let mut state = self.clock.lock();
        state.audio.system_time += delta;
        state.video.system_time += delta;
        state.play_start_time += delta;
        drop(state);

        pause.accumulated_pause_duration_ms += delta_ms;
        pause.is_paused = false;
    }

    /// Bug-guard: never set `system_time` to the epoch (spec §4.3) — doing
    /// so would turn extrapolation into a huge positive number. We always
    /// derive `system_time` from the caller-supplied `now`.
    pub fn reset_for_seek(&self, target_ms: f64, now: Instant) {
        let mut state = self.clock.lock();
        state.audio.pts_ms = target_ms;
        state.audio.system_time = now;
        state.audio.drift_ms = 0.0;
        state.video.pts_ms = target_ms;
        state.video.system_time = now;
        state.video.drift_ms = 0.0;
        state.play_start_time = now - duration_from_ms(target_ms);
        state.sync_errors.clear();
        // start_pts_* deliberately left untouched.
    }

    /// Full reset, used when opening a new media source: clears stream
    /// origins too (unlike `reset_for_seek`).
    pub fn reset(&self, now: Instant) {
        let mut state = self.clock.lock();
        state.audio = ClockInfo::new(now);
        state.video = ClockInfo::new(now);
        state.start_pts_audio_ms = None;
        state.start_pts_video_ms = None;
        state.play_start_time = now;
        state.sync_errors.clear();
        state.corrections = 0;
        state.drops = 0;
        state.repeats = 0;
        drop(state);

        let mut pause = self.pause.lock();
        pause.is_paused = false;
        pause.pause_start_time = now;
        pause.accumulated_pause_duration_ms = 0.0;
    }

    pub fn stats(&self) -> SyncStats {
        let state = self.clock.lock();
        let avg_sync_error_ms = if state.sync_errors.is_empty() {
            0.0
        } else {
            state.sync_errors.iter().sum::<f64>() / state.sync_errors.len() as f64
        };
        SyncStats {
            avg_sync_error_ms,
            corrections: state.corrections,
            drops: state.drops,
            repeats: state.repeats,
        }
    }

    /// Retained per spec §9: unused as a correctness input after the
    /// `system_time`-shift optimization, exposed only as a stat.
    pub fn accumulated_pause_duration_ms(&self) -> f64 {
        self.pause.lock().accumulated_pause_duration_ms
    }
}

fn duration_from_ms(ms: f64) -> std::time::Duration {
    std::time::Duration::from_secs_f64((ms / 1000.0).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn t(ms: u64) -> Instant {
        Instant::now() + Duration::from_millis(ms)
    }

    #[test]
    fn pts_normalization_subtracts_first_observed_pts() {
        let base = Instant::now();
        let sync = SyncController::new(base);
        sync.set_mode(SyncMode::AudioMaster);
        sync.update_audio_clock(5000.0, base);
        assert_eq!(sync.get_master_clock(base).round(), 0.0);
        sync.update_audio_clock(5100.0, base + Duration::from_millis(100));
        let clock = sync.get_master_clock(base + Duration::from_millis(100));
        assert!((clock - 100.0).abs() < 1.0);
    }

    #[test]
    fn pts_normalization_survives_seek_reset() {
        let base = Instant::now();
        let sync = SyncController::new(base);
        sync.set_mode(SyncMode::AudioMaster);
        sync.update_audio_clock(5000.0, base);
        sync.reset_for_seek(20_000.0, base);
        // start_pts_audio_ms should still be 5000, so a raw pts of 5000 again
        // normalizes to 0, not 20000.
        sync.update_audio_clock(5000.0, base);
        let clock = sync.get_master_clock(base);
        assert!((clock - 0.0).abs() < 1.0);
    }

    #[test]
    fn clock_freezes_while_paused() {
        let base = Instant::now();
        let sync = SyncController::new(base);
        sync.set_mode(SyncMode::ExternalMaster);
        sync.pause(base + Duration::from_millis(1000));
        let c1 = sync.get_master_clock(base + Duration::from_millis(1500));
        let c2 = sync.get_master_clock(base + Duration::from_millis(3000));
        assert_eq!(c1, c2);
    }

    #[test]
    fn clock_is_continuous_across_pause_resume() {
        let base = Instant::now();
        let sync = SyncController::new(base);
        sync.set_mode(SyncMode::ExternalMaster);

        let just_before_pause = sync.get_master_clock(base + Duration::from_millis(999));
        sync.pause(base + Duration::from_millis(1000));
        let frozen = sync.get_master_clock(base + Duration::from_millis(6000));
        sync.resume(base + Duration::from_millis(6000));
        let just_after_resume = sync.get_master_clock(base + Duration::from_millis(6000));

        assert!((just_before_pause - frozen).abs() < 5.0);
        assert!((frozen - just_after_resume).abs() < 1.0);
    }

    #[test]
    fn round_trip_play_pause_resume_scenario() {
        // Scenario 1 from spec §8: play 1s, pause 5s, resume, sample for 1s.
        let base = Instant::now();
        let sync = SyncController::new(base);
        sync.set_mode(SyncMode::ExternalMaster);

        let at_1s = sync.get_master_clock(base + Duration::from_millis(1000));
        assert!((970.0..=1030.0).contains(&at_1s));

        sync.pause(base + Duration::from_millis(1000));
        sync.resume(base + Duration::from_millis(6000));

        let at_2s_wall = sync.get_master_clock(base + Duration::from_millis(7000));
        assert!((1970.0..=2030.0).contains(&at_2s_wall));
    }

    #[test]
    fn seek_reset_aligns_master_clock_to_target() {
        let base = Instant::now();
        let sync = SyncController::new(base);
        sync.set_mode(SyncMode::ExternalMaster);
        sync.reset_for_seek(15_000.0, base);
        let now = sync.get_master_clock(base);
        assert!((now - 15_000.0).abs() < 1.0);
    }

    #[test]
    fn drop_threshold_matches_delay_sign() {
        let base = Instant::now();
        let sync = SyncController::new(base);
        sync.set_mode(SyncMode::ExternalMaster);
        // Master clock is ~0 at t=base. A video pts far behind now should drop.
        sync.update_video_clock(0.0, base);
        assert!(sync.should_drop_video(-1000.0, base));
    }

    #[test]
    fn pause_after_pause_is_idempotent() {
        let base = Instant::now();
        let sync = SyncController::new(base);
        sync.pause(t(100));
        sync.pause(t(200)); // no-op, pause_start_time must not move
        let frozen_a = sync.get_master_clock(t(300));
        let frozen_b = sync.get_master_clock(t(9000));
        assert_eq!(frozen_a, frozen_b);
    }

    #[test]
    fn resume_without_pause_is_a_no_op() {
        let base = Instant::now();
        let sync = SyncController::new(base);
        sync.resume(t(500));
        assert!(!sync.is_paused());
    }
}
