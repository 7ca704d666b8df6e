//! Crate-wide error type.
//!
//! Every fallible operation in the playback core returns a [`Result`] whose
//! error carries a `{kind, message, cause}` triple (spec §7): the `kind` is
//! cheap to match on without destructuring the full variant, `message` is
//! human readable, and `cause` threads through the underlying library error
//! (usually an `ffmpeg_next::Error`, a `cpal` error, or a `wgpu` error) when
//! one exists.

use std::fmt;

use thiserror::Error;

/// Coarse error classification, mirrored from spec §7.
///
/// Kept separate from [`ZenPlayError`] so callers (e.g. the playback
/// controller's failure policy) can match on kind without enumerating every
/// concrete variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Config,
    Open,
    Codec,
    Hardware,
    Render,
    AudioDevice,
    Io,
    State,
    Resource,
    Sync,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Config => "config",
            ErrorKind::Open => "open",
            ErrorKind::Codec => "codec",
            ErrorKind::Hardware => "hardware",
            ErrorKind::Render => "render",
            ErrorKind::AudioDevice => "audio-device",
            ErrorKind::Io => "io",
            ErrorKind::State => "state",
            ErrorKind::Resource => "resource",
            ErrorKind::Sync => "sync",
        };
        f.write_str(s)
    }
}

/// The playback core's single error type.
#[derive(Error, Debug)]
pub enum ZenPlayError {
    #[error("config: {message}")]
    Config { message: String },

    #[error("open: {message}")]
    Open {
        message: String,
        #[source]
        cause: Option<ffmpeg_next::Error>,
    },

    #[error("codec: {message}")]
    Codec {
        message: String,
        #[source]
        cause: Option<ffmpeg_next::Error>,
    },

    #[error("hardware: {message}")]
    Hardware { message: String },

    #[error("render: {message}")]
    Render { message: String },

    #[error("audio device: {message}")]
    AudioDevice { message: String },

    #[error("io: {message}")]
    Io {
        message: String,
        #[source]
        cause: Option<std::io::Error>,
    },

    #[error("illegal state transition: {message}")]
    State { message: String },

    #[error("resource exhausted: {message}")]
    Resource { message: String },

    #[error("sync: {message}")]
    Sync { message: String },
}

impl ZenPlayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ZenPlayError::Config { .. } => ErrorKind::Config,
            ZenPlayError::Open { .. } => ErrorKind::Open,
            ZenPlayError::Codec { .. } => ErrorKind::Codec,
            ZenPlayError::Hardware { .. } => ErrorKind::Hardware,
            ZenPlayError::Render { .. } => ErrorKind::Render,
            ZenPlayError::AudioDevice { .. } => ErrorKind::AudioDevice,
            ZenPlayError::Io { .. } => ErrorKind::Io,
            ZenPlayError::State { .. } => ErrorKind::State,
            ZenPlayError::Resource { .. } => ErrorKind::Resource,
            ZenPlayError::Sync { .. } => ErrorKind::Sync,
        }
    }

    /// Pool exhaustion and transient device errors are the symptom class
    /// worth retrying upstream (spec §7, "Resource" kind).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ZenPlayError::Resource { .. } | ZenPlayError::AudioDevice { .. }
        )
    }

    pub fn open(message: impl Into<String>) -> Self {
        ZenPlayError::Open {
            message: message.into(),
            cause: None,
        }
    }

    pub fn open_with(message: impl Into<String>, cause: ffmpeg_next::Error) -> Self {
        ZenPlayError::Open {
            message: message.into(),
            cause: Some(cause),
        }
    }

    pub fn codec(message: impl Into<String>) -> Self {
        ZenPlayError::Codec {
            message: message.into(),
            cause: None,
        }
    }

    pub fn codec_with(message: impl Into<String>, cause: ffmpeg_next::Error) -> Self {
        ZenPlayError::Codec {
            message: message.into(),
            cause: Some(cause),
        }
    }

    pub fn hardware(message: impl Into<String>) -> Self {
        ZenPlayError::Hardware {
            message: message.into(),
        }
    }

    pub fn render(message: impl Into<String>) -> Self {
        ZenPlayError::Render {
            message: message.into(),
        }
    }

    pub fn audio_device(message: impl Into<String>) -> Self {
        ZenPlayError::AudioDevice {
            message: message.into(),
        }
    }

    pub fn state(message: impl Into<String>) -> Self {
        ZenPlayError::State {
            message: message.into(),
        }
    }

    pub fn resource(message: impl Into<String>) -> Self {
        ZenPlayError::Resource {
            message: message.into(),
        }
    }

    pub fn sync(message: impl Into<String>) -> Self {
        ZenPlayError::Sync {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        ZenPlayError::Config {
            message: message.into(),
        }
    }
}

impl From<ffmpeg_next::Error> for ZenPlayError {
    fn from(e: ffmpeg_next::Error) -> Self {
        ZenPlayError::codec_with("ffmpeg error", e)
    }
}

impl From<std::io::Error> for ZenPlayError {
    fn from(e: std::io::Error) -> Self {
        ZenPlayError::Io {
            message: e.to_string(),
            cause: Some(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, ZenPlayError>;
