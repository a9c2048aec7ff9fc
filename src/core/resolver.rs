//! Clip resolution: composition time -> active clip and source time.
//!
//! Pure functions over the model, no allocation, no I/O. Safe to call every tick.
//!
//! Precedence when clips overlap: first track wins, then first clip in that
//! track's insertion order. `layer` is ignored here; layered compositing is
//! a compositor concern.

use crate::entities::clip::Clip;
use crate::entities::timeline::Timeline;
use crate::entities::track::Track;

/// First clip (track order, then clip order) with `start_time <= time < end`.
pub fn find_active_clip(tracks: &[Track], time: f64) -> Option<&Clip> {
    tracks
        .iter()
        .flat_map(|t| t.clips.iter())
        .find(|c| c.contains(time))
}

/// Source position shown at `composition_time`.
///
/// `trim_start + (composition_time - start_time)`, clamped to
/// `[0, source_duration - trim_end]`.
pub fn source_time_for(clip: &Clip, composition_time: f64) -> f64 {
    let upper = (clip.source_duration - clip.trim_end).max(0.0);
    (clip.trim_start + (composition_time - clip.start_time)).clamp(0.0, upper)
}

/// Inverse of [`source_time_for`] (unclamped).
pub fn composition_time_for(clip: &Clip, source_time: f64) -> f64 {
    clip.start_time + (source_time - clip.trim_start)
}

/// Earliest clip start strictly after `time`.
pub fn next_clip_start(tracks: &[Track], time: f64) -> Option<f64> {
    tracks
        .iter()
        .flat_map(|t| t.clips.iter())
        .map(|c| c.start_time)
        .filter(|&s| s > time)
        .min_by(f64::total_cmp)
}

/// What the composition shows at a given time.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ClipAt<'a> {
    Clip { clip: &'a Clip, source_time: f64 },
    Gap,
    /// At or past the composition end
    OutOfRange,
}

impl ClipAt<'_> {
    pub fn clip(&self) -> Option<&Clip> {
        match self {
            ClipAt::Clip { clip, .. } => Some(clip),
            _ => None,
        }
    }
}

/// Like [`find_active_clip`] but bounded by `composition_length`.
pub fn resolve(timeline: &Timeline, time: f64) -> ClipAt<'_> {
    if time >= timeline.composition_length() {
        return ClipAt::OutOfRange;
    }
    match find_active_clip(timeline.tracks(), time) {
        Some(clip) => ClipAt::Clip {
            clip,
            source_time: source_time_for(clip, time),
        },
        None => ClipAt::Gap,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::media::MediaSource;
    use crate::entities::track::TrackKind;
    use uuid::Uuid;

    fn clip_on(track: &mut Track, src: &MediaSource, start: f64, duration: f64, trim_start: f64) -> Uuid {
        let mut c = Clip::from_source(src, track.id, start);
        c.duration = duration;
        c.trim_start = trim_start;
        let id = c.id;
        track.push(c);
        id
    }

    #[test]
    fn trimmed_clip_scenario() {
        // One clip {0, 5, trim 2/0} on a 10s source, composition length 5
        let src = MediaSource::new("a.mp4", 10.0);
        let mut tl = Timeline::new(5.0).unwrap();
        let track = tl.add_track("V1", TrackKind::Video);
        let mut clip = Clip::from_source(&src, track, 0.0);
        clip.duration = 5.0;
        clip.trim_start = 2.0;
        tl.add_clip(clip).unwrap();

        let active = find_active_clip(tl.tracks(), 3.0).unwrap();
        assert_eq!(source_time_for(active, 3.0), 5.0);
        assert!(find_active_clip(tl.tracks(), 5.0).is_none());
        assert_eq!(resolve(&tl, 5.0), ClipAt::OutOfRange);
        match resolve(&tl, 3.0) {
            ClipAt::Clip { source_time, .. } => assert_eq!(source_time, 5.0),
            other => panic!("expected clip, got {:?}", other),
        }
    }

    #[test]
    fn half_open_boundaries_and_gap() {
        let src = MediaSource::new("a.mp4", 10.0);
        let mut track = Track::new("V1", TrackKind::Video);
        let a = clip_on(&mut track, &src, 0.0, 3.0, 0.0);
        let b = clip_on(&mut track, &src, 5.0, 2.0, 0.0);
        let tracks = vec![track];

        assert_eq!(find_active_clip(&tracks, 0.0).map(|c| c.id), Some(a));
        assert!(find_active_clip(&tracks, 3.0).is_none());
        assert!(find_active_clip(&tracks, 4.999).is_none());
        assert_eq!(find_active_clip(&tracks, 5.0).map(|c| c.id), Some(b));
        assert!(find_active_clip(&tracks, 7.0).is_none());
        assert_eq!(next_clip_start(&tracks, 3.0), Some(5.0));
        assert_eq!(next_clip_start(&tracks, 5.0), None);
    }

    #[test]
    fn first_track_wins_on_overlap() {
        let src = MediaSource::new("a.mp4", 10.0);
        let mut top = Track::new("V1", TrackKind::Video);
        let mut below = Track::new("V2", TrackKind::Video);
        let winner = clip_on(&mut top, &src, 2.0, 4.0, 0.0);
        let mut overlay = Clip::from_source(&src, below.id, 0.0);
        overlay.layer = 10;
        below.push(overlay);
        let tracks = vec![top, below];

        // Idempotent and at most one result
        for _ in 0..3 {
            assert_eq!(find_active_clip(&tracks, 3.0).map(|c| c.id), Some(winner));
        }
    }

    #[test]
    fn source_time_monotonic_and_bounded() {
        let src = MediaSource::new("a.mp4", 10.0);
        let mut track = Track::new("V1", TrackKind::Video);
        clip_on(&mut track, &src, 1.0, 9.0, 3.0);
        let clip = &track.clips[0];

        let mut prev = f64::MIN;
        let mut t = clip.start_time;
        while t < clip.end() {
            let s = source_time_for(clip, t);
            assert!(s >= prev);
            assert!((0.0..=clip.source_duration).contains(&s));
            prev = s;
            t += 0.25;
        }
        // Clamped at source_duration - trim_end
        assert_eq!(source_time_for(clip, 100.0), 10.0);
        assert_eq!(source_time_for(clip, -100.0), 0.0);
    }

    #[test]
    fn inverse_mapping() {
        let src = MediaSource::new("a.mp4", 10.0);
        let mut track = Track::new("V1", TrackKind::Video);
        clip_on(&mut track, &src, 4.0, 5.0, 2.0);
        let clip = &track.clips[0];
        let s = source_time_for(clip, 6.5);
        assert_eq!(composition_time_for(clip, s), 6.5);
    }
}
