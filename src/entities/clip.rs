//! Clip: a positioned, trimmed reference to a source file on a track.
//!
//! # Coordinate Systems
//!
//! - `start_time` - where the clip starts on the composition clock (seconds)
//! - `duration` - visible length on the composition clock
//! - `trim_start/trim_end` - seconds cut from start/end of the source
//! - `source_duration` - total source length, captured from `MediaSource` on creation
//!
//! Computed values:
//! - `end()` = `start_time + duration` (exclusive)
//! - `source_in()` = `trim_start` (source time shown at `start_time`)
//! - `source_out()` = `min(trim_start + duration, source_duration - trim_end)`
//!
//! Clips on the same track may overlap; `layer` disambiguates for compositing.
//! Mutation goes through [`ClipPatch`], which is validated as a whole before
//! it touches the model.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::media::{MediaSource, SourceId};
use super::track::TrackId;
use crate::error::{EngineError, EngineResult};

pub type ClipId = Uuid;

/// Shortest clip trim handlers will produce.
pub const MIN_CLIP_DURATION: f64 = 0.04;

/// Tolerance for float comparisons on trim bounds.
const TRIM_EPSILON: f64 = 1e-9;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Clip {
    pub id: ClipId,
    pub source_id: SourceId,
    pub track_id: TrackId,
    pub start_time: f64,
    pub duration: f64,
    pub trim_start: f64,
    pub trim_end: f64,
    #[serde(default)]
    pub layer: i32,
    pub source_duration: f64,
}

impl Clip {
    /// Clip covering the whole source, placed at `start_time`.
    pub fn from_source(source: &MediaSource, track_id: TrackId, start_time: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_id: source.id,
            track_id,
            start_time,
            duration: source.duration,
            trim_start: 0.0,
            trim_end: 0.0,
            layer: 0,
            source_duration: source.duration,
        }
    }

    /// Builder-style trim: keeps `start_time`, shortens duration accordingly.
    pub fn trimmed(mut self, trim_start: f64, trim_end: f64) -> Self {
        self.trim_start = trim_start;
        self.trim_end = trim_end;
        self.duration = self.source_duration - trim_start - trim_end;
        self
    }

    /// Exclusive end on the composition clock.
    pub fn end(&self) -> f64 {
        self.start_time + self.duration
    }

    /// Half-open containment `[start_time, end)`.
    pub fn contains(&self, time: f64) -> bool {
        self.start_time <= time && time < self.end()
    }

    pub fn source_in(&self) -> f64 {
        self.trim_start
    }

    /// Source time at which this clip stops showing material.
    pub fn source_out(&self) -> f64 {
        (self.trim_start + self.duration).min(self.source_duration - self.trim_end)
    }

    /// Check per-clip invariants.
    pub fn validate(&self) -> EngineResult<()> {
        let fields = [
            ("start_time", self.start_time),
            ("duration", self.duration),
            ("trim_start", self.trim_start),
            ("trim_end", self.trim_end),
            ("source_duration", self.source_duration),
        ];
        if let Some((name, value)) = fields.iter().find(|(_, v)| !v.is_finite()) {
            return Err(EngineError::precondition(format!(
                "clip {}: {} is not finite ({})",
                self.id, name, value
            )));
        }
        if self.duration <= 0.0 {
            return Err(EngineError::precondition(format!(
                "clip {}: duration must be > 0, got {}",
                self.id, self.duration
            )));
        }
        if self.start_time < 0.0 {
            return Err(EngineError::precondition(format!(
                "clip {}: start_time must be >= 0, got {}",
                self.id, self.start_time
            )));
        }
        if self.trim_start < 0.0 || self.trim_end < 0.0 {
            return Err(EngineError::precondition(format!(
                "clip {}: trims must be >= 0 (start {}, end {})",
                self.id, self.trim_start, self.trim_end
            )));
        }
        if self.trim_start + self.trim_end > self.source_duration + TRIM_EPSILON {
            return Err(EngineError::precondition(format!(
                "clip {}: trim_start + trim_end ({}) exceeds source duration {}",
                self.id,
                self.trim_start + self.trim_end,
                self.source_duration
            )));
        }
        Ok(())
    }

    /// Copy with `patch` applied. Does not validate.
    pub fn patched(&self, patch: &ClipPatch) -> Clip {
        let mut next = self.clone();
        if let Some(v) = patch.start_time {
            next.start_time = v;
        }
        if let Some(v) = patch.duration {
            next.duration = v;
        }
        if let Some(v) = patch.trim_start {
            next.trim_start = v;
        }
        if let Some(v) = patch.trim_end {
            next.trim_end = v;
        }
        if let Some(v) = patch.layer {
            next.layer = v;
        }
        if let Some(v) = patch.track_id {
            next.track_id = v;
        }
        next
    }
}

/// Partial clip update. `None` fields are left untouched.
///
/// Setting `track_id` re-parents the clip onto another track.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ClipPatch {
    pub start_time: Option<f64>,
    pub duration: Option<f64>,
    pub trim_start: Option<f64>,
    pub trim_end: Option<f64>,
    pub layer: Option<i32>,
    pub track_id: Option<TrackId>,
}

impl ClipPatch {
    pub fn is_empty(&self) -> bool {
        *self == ClipPatch::default()
    }

    pub fn start_time(mut self, v: f64) -> Self {
        self.start_time = Some(v);
        self
    }

    pub fn duration(mut self, v: f64) -> Self {
        self.duration = Some(v);
        self
    }

    pub fn trim_start(mut self, v: f64) -> Self {
        self.trim_start = Some(v);
        self
    }

    pub fn trim_end(mut self, v: f64) -> Self {
        self.trim_end = Some(v);
        self
    }

    pub fn layer(mut self, v: i32) -> Self {
        self.layer = Some(v);
        self
    }

    pub fn track(mut self, v: TrackId) -> Self {
        self.track_id = Some(v);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clip(start: f64, duration: f64, trim_start: f64, trim_end: f64) -> Clip {
        let source = MediaSource::new("a.mp4", 10.0);
        let mut c = Clip::from_source(&source, Uuid::new_v4(), start);
        c.duration = duration;
        c.trim_start = trim_start;
        c.trim_end = trim_end;
        c
    }

    #[test]
    fn computed_bounds() {
        let c = clip(2.0, 5.0, 2.0, 0.0);
        assert_eq!(c.end(), 7.0);
        assert!(c.contains(2.0));
        assert!(c.contains(6.999));
        assert!(!c.contains(7.0));
        assert_eq!(c.source_in(), 2.0);
        assert_eq!(c.source_out(), 7.0);
    }

    #[test]
    fn source_out_respects_trim_end() {
        let c = clip(0.0, 9.0, 2.0, 3.0);
        assert_eq!(c.source_out(), 7.0);
    }

    #[test]
    fn trimmed_builder_shortens() {
        let source = MediaSource::new("a.mp4", 10.0);
        let c = Clip::from_source(&source, Uuid::new_v4(), 1.0).trimmed(2.0, 3.0);
        assert_eq!(c.duration, 5.0);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn validate_rejects_each_invariant() {
        assert!(clip(0.0, 5.0, 0.0, 0.0).validate().is_ok());
        assert!(clip(0.0, 0.0, 0.0, 0.0).validate().is_err());
        assert!(clip(-1.0, 5.0, 0.0, 0.0).validate().is_err());
        assert!(clip(0.0, 5.0, -0.5, 0.0).validate().is_err());
        assert!(clip(0.0, 5.0, 0.0, -0.5).validate().is_err());
        assert!(clip(0.0, 5.0, 6.0, 5.0).validate().is_err());
        assert!(clip(f64::NAN, 5.0, 0.0, 0.0).validate().is_err());
    }

    #[test]
    fn patch_applies_only_set_fields() {
        let c = clip(1.0, 5.0, 0.0, 0.0);
        let p = ClipPatch::default().start_time(3.0).layer(2);
        let next = c.patched(&p);
        assert_eq!(next.start_time, 3.0);
        assert_eq!(next.layer, 2);
        assert_eq!(next.duration, c.duration);
        assert_eq!(next.id, c.id);
        assert!(ClipPatch::default().is_empty());
        assert!(!p.is_empty());
    }
}
