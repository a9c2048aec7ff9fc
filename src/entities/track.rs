//! Track: ordered collection of clips of one kind (video or audio).
//!
//! Unlike a DAW lane, clips on a track may overlap; order is insertion order
//! and is what the resolver walks. A track exclusively owns its clips.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::clip::{Clip, ClipId};

pub type TrackId = Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Video,
    Audio,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    pub name: String,
    pub kind: TrackKind,
    #[serde(default)]
    pub clips: Vec<Clip>,
    #[serde(default)]
    pub muted: bool,
    #[serde(default)]
    pub locked: bool,
}

impl Track {
    pub fn new(name: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            kind,
            clips: Vec::new(),
            muted: false,
            locked: false,
        }
    }

    pub fn clip(&self, id: ClipId) -> Option<&Clip> {
        self.clips.iter().find(|c| c.id == id)
    }

    pub fn clip_mut(&mut self, id: ClipId) -> Option<&mut Clip> {
        self.clips.iter_mut().find(|c| c.id == id)
    }

    pub fn position(&self, id: ClipId) -> Option<usize> {
        self.clips.iter().position(|c| c.id == id)
    }

    /// Append, re-parenting the clip onto this track.
    pub fn push(&mut self, mut clip: Clip) {
        clip.track_id = self.id;
        self.clips.push(clip);
    }

    /// Insert at `idx` (clamped to len), re-parenting the clip onto this track.
    pub fn insert(&mut self, idx: usize, mut clip: Clip) {
        clip.track_id = self.id;
        let idx = idx.min(self.clips.len());
        self.clips.insert(idx, clip);
    }

    pub fn take(&mut self, id: ClipId) -> Option<Clip> {
        let idx = self.position(id)?;
        Some(self.clips.remove(idx))
    }

    /// Latest clip end on this track (0 when empty).
    pub fn extent(&self) -> f64 {
        self.clips.iter().map(Clip::end).fold(0.0, f64::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::media::MediaSource;

    #[test]
    fn push_reparents_and_take_removes() {
        let mut track = Track::new("V1", TrackKind::Video);
        let source = MediaSource::new("a.mp4", 4.0);
        let clip = Clip::from_source(&source, Uuid::new_v4(), 1.0);
        let id = clip.id;
        track.push(clip);

        assert_eq!(track.clip(id).unwrap().track_id, track.id);
        assert_eq!(track.extent(), 5.0);
        assert!(track.take(id).is_some());
        assert!(track.take(id).is_none());
        assert_eq!(track.extent(), 0.0);
    }

    #[test]
    fn kind_serializes_lowercase() {
        let json = serde_json::to_string(&TrackKind::Audio).unwrap();
        assert_eq!(json, "\"audio\"");
    }
}
