//! Rate-limited preloader - warms the resource cache ahead of the playhead.
//!
//! Scanning every tick would flood the cache with `prepare` calls that are
//! no-ops anyway, so the scan runs at most once per `preload_interval_ms`:
//! 1. Collect clips whose start lies in `[position, position + lookahead]`
//! 2. Prepare each one seeked to its in-point (`trim_start`)
//! 3. Stop after `capacity - 1` so the actively driven entry keeps its slot

use log::{debug, trace};

use crate::config::PlaybackConfig;
use crate::core::resource_cache::MediaResourceCache;
use crate::entities::clip::Clip;
use crate::entities::media::MediaLibrary;
use crate::entities::timeline::Timeline;

#[derive(Debug, Clone)]
pub struct Preloader {
    /// Seconds between scans
    interval: f64,
    lookahead: f64,
    /// Clock time of the last scan
    last_scan: Option<f64>,
}

impl Preloader {
    pub fn new(config: &PlaybackConfig) -> Self {
        Self {
            interval: config.preload_interval_ms as f64 / 1000.0,
            lookahead: config.preload_lookahead.max(0.0),
            last_scan: None,
        }
    }

    pub fn lookahead(&self) -> f64 {
        self.lookahead
    }

    /// Force the next `tick` to scan (after a seek or edit).
    pub fn reset(&mut self) {
        self.last_scan = None;
    }

    pub fn is_due(&self, now: f64) -> bool {
        match self.last_scan {
            Some(at) => now - at >= self.interval,
            None => true,
        }
    }

    /// Clips starting within the lookahead window, earliest first.
    pub fn upcoming<'a>(&self, timeline: &'a Timeline, position: f64) -> Vec<&'a Clip> {
        let horizon = (position + self.lookahead).min(timeline.composition_length());
        let mut clips: Vec<&Clip> = timeline
            .clips()
            .filter(|c| c.start_time >= position && c.start_time <= horizon)
            .collect();
        clips.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));
        clips
    }

    /// Scan if due. Returns the number of clips handed to the cache.
    pub fn tick(
        &mut self,
        now: f64,
        position: f64,
        timeline: &Timeline,
        library: &MediaLibrary,
        cache: &MediaResourceCache,
    ) -> usize {
        if !self.is_due(now) {
            return 0;
        }
        self.last_scan = Some(now);

        let budget = cache.capacity().saturating_sub(1);
        let mut requested = 0;
        for clip in self.upcoming(timeline, position) {
            if requested >= budget {
                break;
            }
            let Some(source) = library.get(clip.source_id) else {
                trace!("Preload skipped: clip {} has no source", clip.id);
                continue;
            };
            let key = cache.key_for(&source.path, clip.id);
            cache.prepare(&key, clip.trim_start);
            requested += 1;
        }
        if requested > 0 {
            debug!("Preload scan at {:.3}s: {} clip(s) requested", position, requested);
        }
        requested
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheConfig, KeyStrategy};
    use crate::core::clock::ManualClock;
    use crate::core::resource_cache::EntryState;
    use crate::core::sim::SimulatedProvider;
    use crate::core::workers::InlinePool;
    use crate::entities::media::MediaSource;
    use crate::entities::track::TrackKind;
    use std::sync::Arc;
    use std::sync::atomic::AtomicU64;

    struct Fixture {
        library: MediaLibrary,
        timeline: Timeline,
        cache: MediaResourceCache,
        provider: Arc<SimulatedProvider>,
        clips: Vec<Clip>,
    }

    fn fixture(starts: &[f64]) -> Fixture {
        let mut library = MediaLibrary::new();
        let mut timeline = Timeline::new(30.0).unwrap();
        let track = timeline.add_track("V1", TrackKind::Video);
        let provider = Arc::new(SimulatedProvider::new(Arc::new(ManualClock::default())));
        let mut clips = Vec::new();
        for (i, &start) in starts.iter().enumerate() {
            let source = MediaSource::new(format!("/m/{}.mp4", i), 10.0);
            provider.register(source.path.clone(), source.duration);
            let mut clip = Clip::from_source(&source, track, start).trimmed(1.5, 0.0);
            clip.duration = 1.0;
            library.add(source).unwrap();
            timeline.add_clip(clip.clone()).unwrap();
            clips.push(clip);
        }
        let epoch = Arc::new(AtomicU64::new(0));
        let cache = MediaResourceCache::new(
            CacheConfig::for_strategy(KeyStrategy::PerClip),
            provider.clone(),
            Arc::new(InlinePool::new(Arc::clone(&epoch))),
            epoch,
        );
        Fixture {
            library,
            timeline,
            cache,
            provider,
            clips,
        }
    }

    #[test]
    fn prepares_clips_inside_window() {
        let f = fixture(&[1.0, 2.5, 10.0]);
        let mut preloader = Preloader::new(&PlaybackConfig::default());

        assert_eq!(preloader.tick(0.0, 0.5, &f.timeline, &f.library, &f.cache), 2);
        let key = |c: &Clip| f.cache.key_for(&f.library.get(c.source_id).unwrap().path, c.id);
        assert_eq!(f.cache.state(&key(&f.clips[0])), Some(EntryState::Ready));
        assert_eq!(f.cache.state(&key(&f.clips[1])), Some(EntryState::Ready));
        assert_eq!(f.cache.state(&key(&f.clips[2])), None);

        // Pre-seeked to the in-point
        let handle = f.cache.handle(&key(&f.clips[0])).unwrap();
        assert_eq!(f.provider.position(handle), Some(1.5));
    }

    #[test]
    fn scans_are_rate_limited() {
        let f = fixture(&[1.0]);
        let mut preloader = Preloader::new(&PlaybackConfig::default());

        assert_eq!(preloader.tick(0.0, 0.0, &f.timeline, &f.library, &f.cache), 1);
        assert_eq!(preloader.tick(0.1, 0.0, &f.timeline, &f.library, &f.cache), 0);
        assert!(preloader.is_due(0.25));
        preloader.reset();
        assert!(preloader.is_due(0.1));
        // Already Ready: prepare is a no-op, so no second open
        preloader.tick(0.3, 0.0, &f.timeline, &f.library, &f.cache);
        assert_eq!(f.provider.opens(), 1);
    }

    #[test]
    fn leaves_room_for_active_entry() {
        let f = fixture(&[0.5, 1.0, 1.5, 2.0]);
        let mut preloader = Preloader::new(&PlaybackConfig::default());
        assert_eq!(preloader.tick(0.0, 0.0, &f.timeline, &f.library, &f.cache), 2);
        assert_eq!(f.cache.len(), 2);
    }

    #[test]
    fn window_respects_composition_length() {
        let mut f = fixture(&[4.0]);
        f.timeline.set_composition_length(3.5).unwrap();
        let preloader = Preloader::new(&PlaybackConfig::default());
        assert!(preloader.upcoming(&f.timeline, 2.0).is_empty());
    }
}
