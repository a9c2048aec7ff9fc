//! Entities module - timeline data model and abstract engine traits
//!
//! Plain data with validated mutation; no I/O beyond project load/save.
//! - `media` - source files (collaborator stand-in)
//! - `clip` / `track` / `timeline` - the edit model
//! - `export` - flattened export list and segment plan
//! - `traits` - boundaries the engine depends on (media layer, pool, clock)

pub mod clip;
pub mod export;
pub mod media;
pub mod project;
pub mod timeline;
pub mod track;
pub mod traits;

pub use clip::{Clip, ClipId, ClipPatch};
pub use export::{ExportClip, ExportPlan, ExportSettings, Resolution};
pub use media::{MediaLibrary, MediaSource, SourceId};
pub use project::Project;
pub use timeline::Timeline;
pub use track::{Track, TrackId, TrackKind};
pub use traits::{Clock, MediaProvider, ResourceHandle, Signal, WorkerPool};
