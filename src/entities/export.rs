//! Export flattening: the contract handed to the encode collaborator.
//!
//! Two views of the same data:
//! - `export_clips()` - flat, time-ordered clip list, truncated at the composition end
//! - `ExportPlan` - the same list laid out as consecutive segments with black
//!   gaps filling the holes and the tail up to `composition_length`
//!
//! Nothing beyond the composition boundary is ever emitted.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::media::MediaLibrary;
use super::timeline::Timeline;
use crate::error::{EngineError, EngineResult};

/// One clip as seen by the encoder.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportClip {
    pub source_path: PathBuf,
    pub start_time: f64,
    pub duration: f64,
    pub trim_start: f64,
    pub trim_end: f64,
}

/// Flatten the timeline for export.
///
/// Keeps clips with `start_time < composition_length`, clamps each duration to
/// `min(duration, composition_length - start_time)`, sorts by `start_time`
/// (track order breaks ties).
pub fn export_clips(timeline: &Timeline, library: &MediaLibrary) -> EngineResult<Vec<ExportClip>> {
    let length = timeline.composition_length();
    let mut out = Vec::new();
    for clip in timeline.clips().filter(|c| c.start_time < length) {
        let source = library.require(clip.source_id)?;
        out.push(ExportClip {
            source_path: source.path.clone(),
            start_time: clip.start_time,
            duration: clip.duration.min(length - clip.start_time),
            trim_start: clip.trim_start,
            trim_end: clip.trim_end,
        });
    }
    // Stable sort keeps track order for equal starts
    out.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));
    Ok(out)
}

/// Output resolution presets.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    #[serde(rename = "720p")]
    P720,
    #[default]
    #[serde(rename = "1080p")]
    P1080,
    #[serde(rename = "source")]
    Source,
}

impl Resolution {
    /// Scale argument for the encoder (`-1:-1` keeps source size).
    pub fn scale(&self) -> &'static str {
        match self {
            Resolution::P720 => "1280:720",
            Resolution::P1080 => "1920:1080",
            Resolution::Source => "-1:-1",
        }
    }
}

impl FromStr for Resolution {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "720p" => Ok(Resolution::P720),
            "1080p" => Ok(Resolution::P1080),
            "source" => Ok(Resolution::Source),
            other => Err(EngineError::precondition(format!(
                "invalid resolution: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Resolution::P720 => "720p",
            Resolution::P1080 => "1080p",
            Resolution::Source => "source",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExportSettings {
    pub resolution: Resolution,
    pub fps: u32,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            resolution: Resolution::default(),
            fps: 30,
        }
    }
}

/// Consecutive piece of the rendered output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Segment {
    /// Black filler
    Gap { start: f64, duration: f64 },
    Clip(ExportClip),
}

impl Segment {
    pub fn duration(&self) -> f64 {
        match self {
            Segment::Gap { duration, .. } => *duration,
            Segment::Clip(c) => c.duration,
        }
    }

    /// Exclusive end on the composition clock.
    pub fn end(&self) -> f64 {
        match self {
            Segment::Gap { start, duration } => start + duration,
            Segment::Clip(c) => c.start_time + c.duration,
        }
    }
}

/// Ordered segments covering `[0, composition_length]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExportPlan {
    pub settings: ExportSettings,
    pub composition_length: f64,
    pub segments: Vec<Segment>,
}

impl ExportPlan {
    /// Lay out the flattened clip list with gap filler.
    ///
    /// A gap precedes any clip that starts after the running cursor; a trailing
    /// gap pads to the composition end. Overlapping clips are emitted in start
    /// order without filler.
    pub fn build(timeline: &Timeline, library: &MediaLibrary, settings: ExportSettings) -> EngineResult<Self> {
        let clips = export_clips(timeline, library)?;
        if clips.is_empty() {
            return Err(EngineError::precondition("No clips to export"));
        }
        if settings.fps == 0 {
            return Err(EngineError::precondition("export fps must be > 0"));
        }

        let length = timeline.composition_length();
        let mut segments = Vec::with_capacity(clips.len() * 2 + 1);
        let mut cursor = 0.0;
        for clip in clips {
            if clip.start_time > cursor {
                segments.push(Segment::Gap {
                    start: cursor,
                    duration: clip.start_time - cursor,
                });
            }
            cursor = f64::max(cursor, clip.start_time + clip.duration);
            segments.push(Segment::Clip(clip));
        }
        if cursor < length {
            segments.push(Segment::Gap {
                start: cursor,
                duration: length - cursor,
            });
        }

        Ok(Self {
            settings,
            composition_length: length,
            segments,
        })
    }

    /// Covered span: end of the furthest segment. Overlaps count once.
    pub fn total_duration(&self) -> f64 {
        self.segments.iter().map(Segment::end).fold(0.0, f64::max)
    }

    /// Distinct source files, first-use order.
    pub fn inputs(&self) -> Vec<&PathBuf> {
        let mut seen: Vec<&PathBuf> = Vec::new();
        for seg in &self.segments {
            if let Segment::Clip(c) = seg
                && !seen.contains(&&c.source_path)
            {
                seen.push(&c.source_path);
            }
        }
        seen
    }
}
