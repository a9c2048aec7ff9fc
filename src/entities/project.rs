//! Project: media library + timeline, persisted as JSON.
//!
//! Persistence belongs to the application shell; this is the minimal
//! load/save pair the CLI and tests use.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};

use super::media::MediaLibrary;
use super::timeline::Timeline;
use crate::error::{EngineError, EngineResult};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Project {
    #[serde(default)]
    pub library: MediaLibrary,
    #[serde(default)]
    pub timeline: Timeline,
}

impl Project {
    pub fn new(library: MediaLibrary, timeline: Timeline) -> Self {
        Self { library, timeline }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let mut project: Project = serde_json::from_str(json).context("Invalid project JSON")?;
        project.attach();
        Ok(project)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)
            .with_context(|| format!("Failed to read project {}", path.display()))?;
        let project = Self::from_json(&json)
            .with_context(|| format!("Failed to parse project {}", path.display()))?;
        info!(
            "Project loaded: {} ({} sources, {} tracks)",
            path.display(),
            project.library.len(),
            project.timeline.tracks().len()
        );
        Ok(project)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize project")?;
        fs::write(path, json).with_context(|| format!("Failed to write project {}", path.display()))?;
        info!("Project saved: {}", path.display());
        Ok(())
    }

    /// Rebuild runtime state after deserialization.
    fn attach(&mut self) {
        self.timeline.recalculate();
        self.timeline.set_playing(false);
    }

    /// Check every clip's invariants and source reference.
    pub fn validate(&self) -> EngineResult<()> {
        self.timeline.validate()?;
        for clip in self.timeline.clips() {
            clip.validate()?;
            self.library.require(clip.source_id)?;
            if self.timeline.track(clip.track_id).is_none() {
                return Err(EngineError::precondition(format!(
                    "clip {} points at missing track {}",
                    clip.id, clip.track_id
                )));
            }
        }
        Ok(())
    }
}
