//! Timeline model: tracks, clips, playhead, composition length, zoom.
//!
//! Two lengths live here and must not be confused:
//! - `composition_length` - user-set output length; playback and export stop there
//! - `duration` - derived max clip end, for scroll extent only
//!
//! Clips beyond `composition_length` stay in the model untouched; they are
//! simply never played or exported.
//!
//! Every mutation validates before touching state, so a failed call leaves
//! the model exactly as it was.

use log::{debug, trace};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::clip::{Clip, ClipId, ClipPatch, MIN_CLIP_DURATION};
use super::track::{Track, TrackId, TrackKind};
use crate::error::{EngineError, EngineResult};

pub const MIN_ZOOM: f64 = 0.1;
pub const MAX_ZOOM: f64 = 100.0;
pub const DEFAULT_COMPOSITION_LENGTH: f64 = 30.0;

fn default_zoom() -> f64 {
    1.0
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Timeline {
    tracks: Vec<Track>,
    #[serde(default)]
    playhead_position: f64,
    composition_length: f64,
    #[serde(default = "default_zoom")]
    zoom: f64,

    /// Runtime-only playing flag, owned by the synchronizer.
    #[serde(skip)]
    is_playing: bool,

    /// Derived max clip end (runtime-only, rebuilt by `recalculate`).
    #[serde(skip)]
    duration: f64,
}

impl Default for Timeline {
    fn default() -> Self {
        Self {
            tracks: Vec::new(),
            playhead_position: 0.0,
            composition_length: DEFAULT_COMPOSITION_LENGTH,
            zoom: default_zoom(),
            is_playing: false,
            duration: 0.0,
        }
    }
}

fn check_length(length: f64) -> EngineResult<()> {
    if !length.is_finite() || length <= 0.0 {
        return Err(EngineError::precondition(format!(
            "composition length must be > 0, got {}",
            length
        )));
    }
    Ok(())
}

impl Timeline {
    pub fn new(composition_length: f64) -> EngineResult<Self> {
        check_length(composition_length)?;
        Ok(Self {
            composition_length,
            ..Self::default()
        })
    }

    /// Check model-wide invariants a deserialized timeline may violate.
    pub fn validate(&self) -> EngineResult<()> {
        check_length(self.composition_length)?;
        if !self.playhead_position.is_finite() || !self.zoom.is_finite() {
            return Err(EngineError::precondition("playhead or zoom is not finite"));
        }
        Ok(())
    }

    // === Accessors ===

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn track(&self, id: TrackId) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id == id)
    }

    pub fn clip(&self, id: ClipId) -> Option<&Clip> {
        self.tracks.iter().find_map(|t| t.clip(id))
    }

    /// All clips, track order then clip order.
    pub fn clips(&self) -> impl Iterator<Item = &Clip> {
        self.tracks.iter().flat_map(|t| t.clips.iter())
    }

    pub fn playhead(&self) -> f64 {
        self.playhead_position
    }

    pub fn composition_length(&self) -> f64 {
        self.composition_length
    }

    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    /// Derived scroll extent: max(start_time + duration) over all clips.
    pub fn duration(&self) -> f64 {
        self.duration
    }

    /// Rebuild derived fields (call after deserialization).
    pub fn recalculate(&mut self) {
        self.duration = self.tracks.iter().map(Track::extent).fold(0.0, f64::max);
        trace!("Timeline duration recalculated: {:.3}", self.duration);
    }

    // === Tracks ===

    pub fn add_track(&mut self, name: impl Into<String>, kind: TrackKind) -> TrackId {
        let track = Track::new(name, kind);
        let id = track.id;
        debug!("Track added: {} ({:?})", track.name, kind);
        self.tracks.push(track);
        id
    }

    /// Remove a track and every clip it owns.
    pub fn remove_track(&mut self, id: TrackId) -> EngineResult<Track> {
        let idx = self
            .tracks
            .iter()
            .position(|t| t.id == id)
            .ok_or(EngineError::UnknownTrack(id))?;
        if self.tracks[idx].locked {
            return Err(EngineError::TrackLocked(id));
        }
        let track = self.tracks.remove(idx);
        self.recalculate();
        debug!("Track removed: {} ({} clips)", track.name, track.clips.len());
        Ok(track)
    }

    pub fn set_track_muted(&mut self, id: TrackId, muted: bool) -> EngineResult<()> {
        self.track_mut(id)?.muted = muted;
        Ok(())
    }

    pub fn set_track_locked(&mut self, id: TrackId, locked: bool) -> EngineResult<()> {
        self.track_mut(id)?.locked = locked;
        Ok(())
    }

    fn track_mut(&mut self, id: TrackId) -> EngineResult<&mut Track> {
        self.tracks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or(EngineError::UnknownTrack(id))
    }

    fn editable_track_mut(&mut self, id: TrackId) -> EngineResult<&mut Track> {
        let track = self.track_mut(id)?;
        if track.locked {
            return Err(EngineError::TrackLocked(id));
        }
        Ok(track)
    }

    fn track_index_of_clip(&self, id: ClipId) -> EngineResult<usize> {
        self.tracks
            .iter()
            .position(|t| t.clip(id).is_some())
            .ok_or(EngineError::UnknownClip(id))
    }

    // === Clips ===

    /// Insert a clip onto the track named by `clip.track_id`.
    ///
    /// Overlap with existing clips is allowed.
    pub fn add_clip(&mut self, clip: Clip) -> EngineResult<ClipId> {
        clip.validate()?;
        if self.clip(clip.id).is_some() {
            return Err(EngineError::precondition(format!(
                "clip {} already exists",
                clip.id
            )));
        }
        let id = clip.id;
        let (start, end) = (clip.start_time, clip.end());
        self.editable_track_mut(clip.track_id)?.push(clip);
        self.recalculate();
        debug!("Clip added: {} [{:.3}..{:.3})", id, start, end);
        Ok(id)
    }

    /// Delete a clip. Other clips are never touched.
    pub fn remove_clip(&mut self, id: ClipId) -> EngineResult<Clip> {
        let idx = self.track_index_of_clip(id)?;
        let track_id = self.tracks[idx].id;
        let clip = self
            .editable_track_mut(track_id)?
            .take(id)
            .ok_or(EngineError::UnknownClip(id))?;
        self.recalculate();
        debug!("Clip removed: {}", id);
        Ok(clip)
    }

    /// Apply a partial update in place (id preserved).
    ///
    /// The patched clip is validated as a whole; an invalid patch is rejected
    /// and the model is left unchanged. A `track_id` in the patch re-parents
    /// the clip (appended to the target track).
    pub fn update_clip(&mut self, id: ClipId, patch: &ClipPatch) -> EngineResult<()> {
        let from_idx = self.track_index_of_clip(id)?;
        let from_track = self.tracks[from_idx].id;
        if self.tracks[from_idx].locked {
            return Err(EngineError::TrackLocked(from_track));
        }
        let current = self.tracks[from_idx]
            .clip(id)
            .ok_or(EngineError::UnknownClip(id))?;
        let next = current.patched(patch);
        next.validate()?;

        if next.track_id == from_track {
            if let Some(slot) = self.tracks[from_idx].clip_mut(id) {
                *slot = next;
            }
        } else {
            // Check the target before detaching so a bad move changes nothing
            self.editable_track_mut(next.track_id)?;
            let to_track = next.track_id;
            self.tracks[from_idx].take(id);
            self.editable_track_mut(to_track)?.push(next);
            debug!("Clip {} moved to track {}", id, to_track);
        }
        self.recalculate();
        Ok(())
    }

    /// Move a clip to `track_id` at `start_time`, preserving duration and trims.
    pub fn move_clip(&mut self, id: ClipId, track_id: TrackId, start_time: f64) -> EngineResult<()> {
        let patch = ClipPatch::default().start_time(start_time).track(track_id);
        self.update_clip(id, &patch)
    }

    /// Drag the in-point to `new_start`.
    ///
    /// `start_time`, `trim_start` and `duration` move together so the
    /// out-point stays fixed. Clamped so the in-point never precedes the
    /// source start or composition 0, and at least `MIN_CLIP_DURATION` remains.
    pub fn trim_left(&mut self, id: ClipId, new_start: f64) -> EngineResult<()> {
        if !new_start.is_finite() {
            return Err(EngineError::precondition("trim position is not finite"));
        }
        let clip = self.clip(id).ok_or(EngineError::UnknownClip(id))?;
        let lower = (clip.start_time - clip.trim_start).max(0.0);
        let upper = clip.end() - MIN_CLIP_DURATION;
        if upper < lower {
            return Err(EngineError::precondition(format!(
                "clip {} is too short to trim",
                id
            )));
        }
        let start = new_start.clamp(lower, upper);
        let delta = start - clip.start_time;
        let patch = ClipPatch::default()
            .start_time(start)
            .trim_start(clip.trim_start + delta)
            .duration(clip.duration - delta);
        self.update_clip(id, &patch)
    }

    /// Drag the out-point to `new_end`.
    ///
    /// `duration` and `trim_end` move together; clamped to the remaining
    /// source material and to at least `MIN_CLIP_DURATION`.
    pub fn trim_right(&mut self, id: ClipId, new_end: f64) -> EngineResult<()> {
        if !new_end.is_finite() {
            return Err(EngineError::precondition("trim position is not finite"));
        }
        let clip = self.clip(id).ok_or(EngineError::UnknownClip(id))?;
        let available = clip.source_duration - clip.trim_start;
        if available < MIN_CLIP_DURATION {
            return Err(EngineError::precondition(format!(
                "clip {} is too short to trim",
                id
            )));
        }
        let duration = (new_end - clip.start_time).clamp(MIN_CLIP_DURATION, available);
        let trim_end = (clip.source_duration - clip.trim_start - duration).max(0.0);
        let patch = ClipPatch::default().duration(duration).trim_end(trim_end);
        self.update_clip(id, &patch)
    }

    /// Copy a clip (fresh id) directly after the original on the same track.
    pub fn duplicate_clip(&mut self, id: ClipId) -> EngineResult<ClipId> {
        let idx = self.track_index_of_clip(id)?;
        let track_id = self.tracks[idx].id;
        let track = self.editable_track_mut(track_id)?;
        let pos = track.position(id).ok_or(EngineError::UnknownClip(id))?;
        let mut copy = track.clips[pos].clone();
        copy.id = Uuid::new_v4();
        copy.start_time = copy.end();
        let new_id = copy.id;
        track.insert(pos + 1, copy);
        self.recalculate();
        debug!("Clip {} duplicated as {}", id, new_id);
        Ok(new_id)
    }

    // === Transport / view ===

    /// Set playhead. Negative values clamp to 0; values past the composition
    /// end are kept (playback refuses to start there).
    pub fn set_playhead(&mut self, position: f64) -> EngineResult<()> {
        if !position.is_finite() {
            return Err(EngineError::precondition("playhead position is not finite"));
        }
        self.playhead_position = position.max(0.0);
        Ok(())
    }

    pub fn set_zoom(&mut self, zoom: f64) -> EngineResult<()> {
        if !zoom.is_finite() {
            return Err(EngineError::precondition("zoom is not finite"));
        }
        self.zoom = zoom.clamp(MIN_ZOOM, MAX_ZOOM);
        Ok(())
    }

    pub fn set_composition_length(&mut self, length: f64) -> EngineResult<()> {
        check_length(length)?;
        self.composition_length = length;
        debug!("Composition length set: {:.3}", length);
        Ok(())
    }

    pub fn set_playing(&mut self, playing: bool) {
        self.is_playing = playing;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::media::MediaSource;

    fn setup() -> (Timeline, TrackId, MediaSource) {
        let mut tl = Timeline::new(20.0).unwrap();
        let track = tl.add_track("V1", TrackKind::Video);
        (tl, track, MediaSource::new("a.mp4", 10.0))
    }

    #[test]
    fn insert_then_remove_restores_aggregates() {
        let (mut tl, track, src) = setup();
        tl.add_clip(Clip::from_source(&src, track, 0.0)).unwrap();
        let duration_before = tl.duration();
        let length_before = tl.composition_length();

        let id = tl.add_clip(Clip::from_source(&src, track, 15.0)).unwrap();
        assert_eq!(tl.duration(), 25.0);
        // Composition length is explicit, never derived
        assert_eq!(tl.composition_length(), length_before);

        tl.remove_clip(id).unwrap();
        assert_eq!(tl.duration(), duration_before);
        assert_eq!(tl.composition_length(), length_before);
    }

    #[test]
    fn overlapping_clips_are_permitted() {
        let (mut tl, track, src) = setup();
        let a = tl.add_clip(Clip::from_source(&src, track, 0.0)).unwrap();
        let mut overlay = Clip::from_source(&src, track, 2.0);
        overlay.layer = 1;
        let b = tl.add_clip(overlay).unwrap();
        assert_eq!(tl.track(track).unwrap().clips.len(), 2);
        assert!(tl.clip(a).is_some() && tl.clip(b).is_some());
    }

    #[test]
    fn remove_leaves_other_clips_untouched() {
        let (mut tl, track, src) = setup();
        let a = tl.add_clip(Clip::from_source(&src, track, 0.0)).unwrap();
        let b = tl.add_clip(Clip::from_source(&src, track, 4.0)).unwrap();
        let before = tl.clip(b).cloned().unwrap();
        tl.remove_clip(a).unwrap();
        assert_eq!(tl.clip(b), Some(&before));
    }

    #[test]
    fn invalid_patch_is_rejected_without_change() {
        let (mut tl, track, src) = setup();
        let id = tl.add_clip(Clip::from_source(&src, track, 1.0)).unwrap();
        let before = tl.clip(id).cloned().unwrap();

        let bad = ClipPatch::default().trim_start(6.0).trim_end(5.0);
        assert!(matches!(
            tl.update_clip(id, &bad),
            Err(EngineError::Precondition(_))
        ));
        assert!(tl.update_clip(id, &ClipPatch::default().duration(0.0)).is_err());
        assert!(tl.update_clip(id, &ClipPatch::default().start_time(-1.0)).is_err());
        assert_eq!(tl.clip(id), Some(&before));
    }

    #[test]
    fn update_keeps_id_and_recomputes_duration() {
        let (mut tl, track, src) = setup();
        let id = tl.add_clip(Clip::from_source(&src, track, 0.0)).unwrap();
        tl.update_clip(id, &ClipPatch::default().start_time(5.0)).unwrap();
        assert_eq!(tl.clip(id).unwrap().start_time, 5.0);
        assert_eq!(tl.duration(), 15.0);
    }

    #[test]
    fn move_reparents_clip() {
        let (mut tl, v1, src) = setup();
        let v2 = tl.add_track("V2", TrackKind::Video);
        let id = tl.add_clip(Clip::from_source(&src, v1, 0.0)).unwrap();

        tl.move_clip(id, v2, 3.0).unwrap();
        assert!(tl.track(v1).unwrap().clips.is_empty());
        let moved = tl.clip(id).unwrap();
        assert_eq!(moved.track_id, v2);
        assert_eq!(moved.start_time, 3.0);
    }

    #[test]
    fn move_to_removed_track_fails_cleanly() {
        let (mut tl, v1, src) = setup();
        let v2 = tl.add_track("V2", TrackKind::Video);
        let id = tl.add_clip(Clip::from_source(&src, v1, 0.0)).unwrap();
        tl.remove_track(v2).unwrap();

        assert!(matches!(
            tl.move_clip(id, v2, 1.0),
            Err(EngineError::UnknownTrack(_))
        ));
        assert_eq!(tl.clip(id).unwrap().track_id, v1);
        assert_eq!(tl.clip(id).unwrap().start_time, 0.0);
    }

    #[test]
    fn locked_track_rejects_edits() {
        let (mut tl, track, src) = setup();
        let id = tl.add_clip(Clip::from_source(&src, track, 0.0)).unwrap();
        tl.set_track_locked(track, true).unwrap();

        assert!(matches!(tl.remove_clip(id), Err(EngineError::TrackLocked(_))));
        assert!(tl.add_clip(Clip::from_source(&src, track, 3.0)).is_err());
        assert!(tl.trim_left(id, 1.0).is_err());
        assert!(tl.remove_track(track).is_err());
    }

    #[test]
    fn trim_left_moves_in_point() {
        let (mut tl, track, src) = setup();
        let id = tl.add_clip(Clip::from_source(&src, track, 2.0)).unwrap();

        tl.trim_left(id, 4.0).unwrap();
        let c = tl.clip(id).unwrap();
        assert_eq!(c.start_time, 4.0);
        assert_eq!(c.trim_start, 2.0);
        assert_eq!(c.duration, 8.0);
        assert_eq!(c.end(), 12.0);

        // Cannot reveal material before source start
        tl.trim_left(id, 0.0).unwrap();
        let c = tl.clip(id).unwrap();
        assert_eq!(c.start_time, 2.0);
        assert_eq!(c.trim_start, 0.0);
    }

    #[test]
    fn trim_right_moves_out_point() {
        let (mut tl, track, src) = setup();
        let id = tl.add_clip(Clip::from_source(&src, track, 0.0)).unwrap();

        tl.trim_right(id, 6.0).unwrap();
        let c = tl.clip(id).unwrap();
        assert_eq!(c.duration, 6.0);
        assert_eq!(c.trim_end, 4.0);

        // Extending past the source clamps to what remains
        tl.trim_right(id, 50.0).unwrap();
        let c = tl.clip(id).unwrap();
        assert_eq!(c.duration, 10.0);
        assert_eq!(c.trim_end, 0.0);
    }

    #[test]
    fn duplicate_places_copy_after_original() {
        let (mut tl, track, src) = setup();
        let id = tl.add_clip(Clip::from_source(&src, track, 1.0)).unwrap();
        let copy = tl.duplicate_clip(id).unwrap();

        assert_ne!(id, copy);
        let c = tl.clip(copy).unwrap();
        assert_eq!(c.start_time, 11.0);
        assert_eq!(tl.track(track).unwrap().position(copy), Some(1));
        assert_eq!(tl.duration(), 21.0);
    }

    #[test]
    fn transport_setters_validate() {
        let mut tl = Timeline::new(10.0).unwrap();
        tl.set_playhead(-3.0).unwrap();
        assert_eq!(tl.playhead(), 0.0);
        assert!(tl.set_playhead(f64::NAN).is_err());

        tl.set_zoom(1000.0).unwrap();
        assert_eq!(tl.zoom(), MAX_ZOOM);

        assert!(tl.set_composition_length(0.0).is_err());
        tl.set_composition_length(4.0).unwrap();
        assert_eq!(tl.composition_length(), 4.0);
    }

    #[test]
    fn new_rejects_bad_composition_length() {
        assert!(Timeline::new(0.0).is_err());
        assert!(Timeline::new(f64::INFINITY).is_err());
        assert!(Timeline::new(f64::NAN).is_err());
        assert!(Timeline::new(2.5).unwrap().validate().is_ok());
    }

    #[test]
    fn clips_beyond_composition_are_kept() {
        let (mut tl, track, src) = setup();
        tl.set_composition_length(5.0).unwrap();
        let id = tl.add_clip(Clip::from_source(&src, track, 8.0)).unwrap();
        assert_eq!(tl.clip(id).unwrap().start_time, 8.0);
        assert_eq!(tl.duration(), 18.0);
    }

    #[test]
    fn serde_skips_runtime_fields() {
        let (mut tl, track, src) = setup();
        tl.add_clip(Clip::from_source(&src, track, 0.0)).unwrap();
        tl.set_playing(true);

        let json = serde_json::to_string(&tl).unwrap();
        let mut back: Timeline = serde_json::from_str(&json).unwrap();
        assert!(!back.is_playing());
        assert_eq!(back.duration(), 0.0);
        back.recalculate();
        assert_eq!(back.duration(), 10.0);
    }
}
