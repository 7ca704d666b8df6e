//! ZenPlay playback core: the concurrent demux/decode/sync/present pipeline
//! behind a media player, with no GUI, windowing, or input handling of its
//! own (spec §1). A host application owns the window, the wgpu
//! instance/surface, and the event loop; it hands this crate a URL and a
//! [`config::RenderPathConfig`] through [`controller::PlaybackController::open`]
//! and drives playback through the controller's public methods from there.
//!
//! Module map mirrors the component numbering used throughout the crate's
//! doc comments (C1..C14):
//!
//! - [`queue`] — C1, the bounded blocking queue every worker pushes through.
//! - [`state`] — C2, the player state machine.
//! - [`sync`] — C3, the AV sync controller.
//! - [`model`] — C3/C6/C7, the shared frame and timestamp types.
//! - [`hwaccel`] — C5, the hardware decode context.
//! - [`video`] — C6/C9, the video decoder and player.
//! - [`audio`] — C7/C12, the audio decoder, resampler, and player.
//! - [`demux`] — C8, the demuxer.
//! - [`render`] — C9/C10/C11, the renderer trait and its two implementations.
//! - [`config`] — C6 resolution rules, the render-path configuration.
//! - [`controller`] — C14, the playback controller tying everything together.
//! - [`error`] — the crate-wide error type.

pub mod audio;
pub mod config;
pub mod controller;
pub mod demux;
pub mod error;
pub mod hwaccel;
pub mod model;
pub mod queue;
pub mod render;
pub mod state;
pub mod sync;
pub mod video;

pub use config::{HardwareConfig, RenderMode, RenderPath, RenderPathConfig};
pub use controller::{ControllerStats, OpenParams, PlaybackController};
pub use error::{ErrorKind, Result, ZenPlayError};
pub use state::PlayerState;
pub use sync::SyncMode;
