//! CLIPLINE - timeline and playback-synchronization core
//!
//! Re-exports all modules for use by binary targets.

// Core engine (resolver, cache, synchronizer, workers)
pub mod core;

// App modules
pub mod cli;
pub mod config;
pub mod entities;
pub mod error;

// Re-export commonly used types from core
pub use core::resource_cache::{Acquire, CacheKey, CacheStats, MediaResourceCache};
pub use core::session::EditorSession;
pub use core::synchronizer::{FrameToken, PlaybackState, PlaybackSynchronizer, TickReport};

// Re-export entities
pub use entities::{Clip, ClipPatch, MediaLibrary, MediaSource, Project, Timeline, Track, TrackKind};
pub use error::{EngineError, EngineResult, MediaError};
