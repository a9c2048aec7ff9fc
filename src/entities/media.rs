//! Media library: imported source files referenced by clips.
//!
//! The library is owned by the surrounding application. The timeline only
//! references sources by id; clips snapshot the source duration on creation.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use log::debug;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};

pub type SourceId = Uuid;

/// Imported media file with probed metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MediaSource {
    pub id: SourceId,
    pub path: PathBuf,
    /// Total length in seconds
    pub duration: f64,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub fps: f64,
}

impl MediaSource {
    pub fn new(path: impl Into<PathBuf>, duration: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            path: path.into(),
            duration,
            width: 0,
            height: 0,
            fps: 0.0,
        }
    }

    pub fn with_video(mut self, width: u32, height: u32, fps: f64) -> Self {
        self.width = width;
        self.height = height;
        self.fps = fps;
        self
    }

    /// File name for display, falls back to full path.
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// Insertion-ordered registry of sources.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MediaLibrary {
    sources: IndexMap<SourceId, MediaSource>,
}

impl MediaLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source. Rejects non-finite or non-positive durations.
    pub fn add(&mut self, source: MediaSource) -> EngineResult<SourceId> {
        if !source.duration.is_finite() || source.duration <= 0.0 {
            return Err(EngineError::precondition(format!(
                "source {} has invalid duration {}",
                source.path.display(),
                source.duration
            )));
        }
        let id = source.id;
        debug!("Media added: {} ({:.3}s)", source.path.display(), source.duration);
        self.sources.insert(id, source);
        Ok(id)
    }

    pub fn remove(&mut self, id: SourceId) -> Option<MediaSource> {
        self.sources.shift_remove(&id)
    }

    pub fn get(&self, id: SourceId) -> Option<&MediaSource> {
        self.sources.get(&id)
    }

    pub fn require(&self, id: SourceId) -> EngineResult<&MediaSource> {
        self.get(id).ok_or(EngineError::UnknownSource(id))
    }

    pub fn find_by_path(&self, path: &Path) -> Option<&MediaSource> {
        self.sources.values().find(|s| s.path == path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MediaSource> {
        self.sources.values()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_lookup() {
        let mut lib = MediaLibrary::new();
        let id = lib.add(MediaSource::new("/media/a.mp4", 10.0)).unwrap();
        assert_eq!(lib.len(), 1);
        assert_eq!(lib.get(id).unwrap().name(), "a.mp4");
        assert!(lib.find_by_path(Path::new("/media/a.mp4")).is_some());
        assert!(lib.remove(id).is_some());
        assert!(lib.is_empty());
    }

    #[test]
    fn rejects_bad_duration() {
        let mut lib = MediaLibrary::new();
        assert!(lib.add(MediaSource::new("x.mp4", 0.0)).is_err());
        assert!(lib.add(MediaSource::new("x.mp4", f64::NAN)).is_err());
        assert!(matches!(
            lib.require(Uuid::new_v4()),
            Err(EngineError::UnknownSource(_))
        ));
    }
}
