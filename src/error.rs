//! Error taxonomy for the timeline and playback engine.
//!
//! Two layers:
//! - `MediaError` - failures reported by the media layer (open/seek/play on a resource)
//! - `EngineError` - everything the engine surfaces to its caller
//!
//! Cache preparation failures never reach the caller as errors: they are logged,
//! counted, and the entry is dropped so playback falls back to the gap path.

use std::path::PathBuf;

use uuid::Uuid;

use crate::entities::traits::ResourceHandle;

/// Convenience result type used across the engine.
pub type EngineResult<T> = Result<T, EngineError>;

/// Failures reported by a `MediaProvider`.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum MediaError {
    /// Source could not be opened (missing file, permissions, unsupported container).
    #[error("failed to open {path}: {reason}")]
    Open { path: PathBuf, reason: String },

    /// Decoder rejected an operation on an open resource.
    #[error("decode error: {0}")]
    Decode(String),

    /// Handle was never issued or has already been closed.
    #[error("unknown resource handle {0}")]
    UnknownHandle(ResourceHandle),
}

/// Top-level error taxonomy used by engine APIs.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    /// Resource preparation failed while opening the source.
    #[error("resource open failure for {path}: {reason}")]
    ResourceOpen { path: PathBuf, reason: String },

    /// Seek or metadata signal did not arrive in time. Non-fatal: the resource is
    /// used at whatever position it reached.
    #[error("{stage} timed out after {waited_ms} ms for {path}")]
    SeekTimeout {
        path: PathBuf,
        stage: &'static str,
        waited_ms: u64,
    },

    /// Resource refused to start playing.
    #[error("playback start failure: {0}")]
    PlaybackStart(String),

    /// Driving an active resource failed mid-playback.
    #[error("playback failure: {0}")]
    Playback(String),

    /// Caller passed an invalid mutation (malformed patch, bad value).
    #[error("model precondition violated: {0}")]
    Precondition(String),

    #[error("clip {0} not found")]
    UnknownClip(Uuid),

    #[error("track {0} not found")]
    UnknownTrack(Uuid),

    #[error("media source {0} not found")]
    UnknownSource(Uuid),

    /// Edit targets a locked track.
    #[error("track {0} is locked")]
    TrackLocked(Uuid),

    /// Wrapped media-layer error.
    #[error(transparent)]
    Media(#[from] MediaError),

    /// Wrapped lower-level error from dependencies or IO.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    /// Build an [`EngineError::Precondition`] value.
    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::Precondition(msg.into())
    }

    /// True for errors that degrade playback instead of stopping it.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::SeekTimeout { .. } | Self::ResourceOpen { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_error_wraps_transparently() {
        let media = MediaError::Open {
            path: PathBuf::from("a.mp4"),
            reason: "no such file".into(),
        };
        let err: EngineError = media.clone().into();
        assert_eq!(err.to_string(), media.to_string());
        assert!(!err.is_recoverable());
    }

    #[test]
    fn seek_timeout_is_recoverable() {
        let err = EngineError::SeekTimeout {
            path: PathBuf::from("b.mov"),
            stage: "seek",
            waited_ms: 200,
        };
        assert!(err.is_recoverable());
        assert_eq!(err.to_string(), "seek timed out after 200 ms for b.mov");
    }
}
