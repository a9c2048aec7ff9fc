//! Playback synchronizer: composition clock <-> media resource state machine
//!
//! **Architecture**: the synchronizer does NOT own the timeline. It receives
//! `&mut Timeline` (and the library) on every call, so the session's project
//! stays the single source of truth. It borrows resource handles from the
//! shared [`MediaResourceCache`] and never closes them itself.
//!
//! # States
//!
//! - `Stopped` - not playing; position set directly by `seek`
//! - `PlayingInClip` - a resource is driven; its own position is the clock
//! - `PlayingInGap` - no resource; position advances by wall-clock delta
//! - `Ended` - reached `composition_length`; `play()` is a no-op there
//!
//! # Tick
//!
//! `tick()` is called once per rendered frame by the host (or via
//! [`FrameToken`]s). Order within a tick is fixed: read clock -> resolve ->
//! drive resource -> publish playhead -> end check -> preload scan.
//! A tick never blocks; a clip whose resource is not ready yet is treated
//! as a gap until the cache delivers it.

use std::sync::Arc;

use log::{debug, error, info, trace, warn};

use crate::config::PlaybackConfig;
use crate::core::preloader::Preloader;
use crate::core::resolver::{composition_time_for, find_active_clip, source_time_for};
use crate::core::resource_cache::{Acquire, CacheKey, MediaResourceCache};
use crate::entities::clip::{Clip, ClipId};
use crate::entities::media::MediaLibrary;
use crate::entities::timeline::Timeline;
use crate::entities::traits::{Clock, ResourceHandle, Signal};
use crate::error::{EngineError, EngineResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaybackState {
    Stopped,
    PlayingInClip,
    PlayingInGap,
    Ended,
}

impl PlaybackState {
    pub fn is_playing(&self) -> bool {
        matches!(self, PlaybackState::PlayingInClip | PlaybackState::PlayingInGap)
    }
}

/// Permission to run one scheduled tick. Tokens from before the last
/// stop/pause/dispose are stale and ignored by [`PlaybackSynchronizer::on_frame`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameToken(u64);

/// Snapshot published after each tick.
#[derive(Clone, Debug, PartialEq)]
pub struct TickReport {
    pub state: PlaybackState,
    pub position: f64,
    pub clip: Option<ClipId>,
    pub handle: Option<ResourceHandle>,
}

/// The one resource currently driven (exclusively ours while active).
#[derive(Debug)]
struct ActiveResource {
    clip: ClipId,
    key: CacheKey,
    handle: ResourceHandle,
}

/// Seek issued before play; play waits for it or for the deadline.
#[derive(Debug)]
struct PendingStart {
    signal: Signal,
    deadline: f64,
}

pub struct PlaybackSynchronizer {
    cache: Arc<MediaResourceCache>,
    clock: Arc<dyn Clock>,
    config: PlaybackConfig,
    preloader: Preloader,
    state: PlaybackState,
    last_frame_time: Option<f64>,
    active: Option<ActiveResource>,
    pending_start: Option<PendingStart>,
    /// Clip whose source ran out before its composition end; its last frame
    /// is held and the playhead runs on the wall clock until it leaves the clip
    exhausted: Option<ClipId>,
    /// Bumped whenever scheduled frames must be dropped
    schedule_epoch: u64,
    disposed: bool,
}

impl PlaybackSynchronizer {
    pub fn new(cache: Arc<MediaResourceCache>, clock: Arc<dyn Clock>, config: PlaybackConfig) -> Self {
        Self {
            cache,
            clock,
            preloader: Preloader::new(&config),
            config,
            state: PlaybackState::Stopped,
            last_frame_time: None,
            active: None,
            pending_start: None,
            exhausted: None,
            schedule_epoch: 0,
            disposed: false,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state.is_playing()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn active_clip(&self) -> Option<ClipId> {
        self.active.as_ref().map(|a| a.clip)
    }

    pub fn active_handle(&self) -> Option<ResourceHandle> {
        self.active.as_ref().map(|a| a.handle)
    }

    /// Waiting on a seek before issuing play.
    pub fn is_starting(&self) -> bool {
        self.pending_start.is_some()
    }

    pub fn cache(&self) -> &Arc<MediaResourceCache> {
        &self.cache
    }

    fn ensure_alive(&self) -> EngineResult<()> {
        if self.disposed {
            return Err(EngineError::precondition("synchronizer is disposed"));
        }
        Ok(())
    }

    // === Transport ===

    /// Start playback from the current playhead.
    ///
    /// No-op when already playing or when the playhead is at/after the
    /// composition end (never auto-rewinds).
    pub fn play(&mut self, timeline: &mut Timeline, library: &MediaLibrary) -> EngineResult<PlaybackState> {
        self.ensure_alive()?;
        if self.state.is_playing() {
            return Ok(self.state);
        }
        let position = timeline.playhead();
        if position >= timeline.composition_length() {
            debug!(
                "Play ignored: playhead {:.3} at composition end {:.3}",
                position,
                timeline.composition_length()
            );
            return Ok(self.state);
        }

        let now = self.clock.now();
        self.last_frame_time = Some(now);
        self.state = PlaybackState::PlayingInGap;
        self.exhausted = None;
        timeline.set_playing(true);
        self.preloader.reset();

        let entered = match find_active_clip(timeline.tracks(), position) {
            Some(clip) => {
                let clip = clip.clone();
                self.enter_clip(&clip, source_time_for(&clip, position), library, now, true)
            }
            None => Ok(false),
        };
        if let Err(err) = entered {
            error!("Playback start failed: {}", err);
            self.halt(timeline, PlaybackState::Stopped);
            return Err(err);
        }

        self.preloader.tick(now, position, timeline, library, &self.cache);
        info!("Playback started at {:.3}s ({:?})", position, self.state);
        Ok(self.state)
    }

    /// Alias of [`play`](Self::play).
    pub fn start(&mut self, timeline: &mut Timeline, library: &MediaLibrary) -> EngineResult<PlaybackState> {
        self.play(timeline, library)
    }

    /// Stop playing, keeping the playhead where it is.
    pub fn pause(&mut self, timeline: &mut Timeline) {
        if self.state.is_playing() {
            self.halt(timeline, PlaybackState::Stopped);
            info!("Playback paused at {:.3}s", timeline.playhead());
        }
    }

    /// Alias of [`pause`](Self::pause).
    pub fn stop(&mut self, timeline: &mut Timeline) {
        self.pause(timeline)
    }

    /// Move the playhead.
    ///
    /// While paused the resource for the clip under the new position is
    /// loaded (blocking, best effort) and seeked to match; failures only log.
    /// While playing, playback re-resolves from the new position.
    pub fn seek(&mut self, timeline: &mut Timeline, library: &MediaLibrary, time: f64) -> EngineResult<()> {
        self.ensure_alive()?;
        timeline.set_playhead(time)?;
        let position = timeline.playhead();
        self.preloader.reset();

        if self.state.is_playing() {
            let now = self.clock.now();
            self.last_frame_time = Some(now);
            self.deactivate();
            self.exhausted = None;
            if let Err(err) = self.settle(timeline, library, now) {
                error!("Playback stopped during seek: {}", err);
                self.halt(timeline, PlaybackState::Stopped);
                return Err(err);
            }
            self.check_end(timeline)?;
            debug!("Seek while playing -> {:.3}s ({:?})", position, self.state);
            return Ok(());
        }

        if self.state == PlaybackState::Ended && position < timeline.composition_length() {
            self.state = PlaybackState::Stopped;
        }
        if position >= timeline.composition_length() {
            return Ok(());
        }
        if let Some(clip) = find_active_clip(timeline.tracks(), position) {
            let source_time = source_time_for(clip, position);
            self.sync_paused(clip, source_time, library);
        }
        trace!("Seek while paused -> {:.3}s", position);
        Ok(())
    }

    fn sync_paused(&self, clip: &Clip, source_time: f64, library: &MediaLibrary) {
        let Some(source) = library.get(clip.source_id) else {
            warn!("Clip {} references unknown source {}", clip.id, clip.source_id);
            return;
        };
        let key = self.cache.key_for(&source.path, clip.id);
        let handle = match self.cache.load_blocking(&key, source_time) {
            Ok(handle) => handle,
            Err(err) => {
                warn!("Paused seek could not load {}: {}", key, err);
                return;
            }
        };
        let provider = self.cache.provider();
        let at = provider.current_position(handle).unwrap_or(f64::NAN);
        if at.is_nan() || (at - source_time).abs() > 1e-6 {
            if let Err(err) = provider.seek(handle, source_time) {
                warn!("Paused seek failed on {}: {}", handle, err);
            }
        }
    }

    // === Frame scheduling ===

    /// Token for the next scheduled frame, if playing.
    pub fn request_frame(&self) -> Option<FrameToken> {
        (self.state.is_playing() && !self.disposed).then_some(FrameToken(self.schedule_epoch))
    }

    /// Run a scheduled tick unless `token` is stale.
    pub fn on_frame(
        &mut self,
        token: FrameToken,
        timeline: &mut Timeline,
        library: &MediaLibrary,
    ) -> EngineResult<Option<TickReport>> {
        if token.0 != self.schedule_epoch || self.disposed {
            trace!("Ignoring stale frame token {:?} (epoch {})", token, self.schedule_epoch);
            return Ok(None);
        }
        self.tick(timeline, library).map(Some)
    }

    // === Tick ===

    /// Advance playback by one frame.
    ///
    /// Driving failures stop playback (`is_playing = false`) and are returned;
    /// they are never retried within the tick.
    pub fn tick(&mut self, timeline: &mut Timeline, library: &MediaLibrary) -> EngineResult<TickReport> {
        self.ensure_alive()?;
        if !self.state.is_playing() {
            return Ok(self.report(timeline));
        }

        let now = self.clock.now();
        let delta = (now - self.last_frame_time.unwrap_or(now)).max(0.0);
        self.last_frame_time = Some(now);

        if let Err(err) = self.advance(timeline, library, now, delta) {
            error!("Playback stopped: {}", err);
            self.halt(timeline, PlaybackState::Stopped);
            return Err(err);
        }
        self.check_end(timeline)?;

        if self.state.is_playing() {
            self.preloader
                .tick(now, timeline.playhead(), timeline, library, &self.cache);
        }

        let report = self.report(timeline);
        trace!(
            "tick: {:?} pos={:.3} delta={:.3} clip={:?}",
            report.state,
            report.position,
            delta,
            report.clip
        );
        Ok(report)
    }

    fn advance(&mut self, timeline: &mut Timeline, library: &MediaLibrary, now: f64, delta: f64) -> EngineResult<()> {
        if let Some(pending) = &self.pending_start {
            let seeked = pending.signal.is_set();
            if !seeked && now < pending.deadline {
                trace!("Holding for seek completion");
                return Ok(());
            }
            if !seeked {
                warn!("Seek before play did not complete in time, starting anyway");
            }
            self.pending_start = None;
            if let Some(active) = &self.active {
                self.cache
                    .provider()
                    .play(active.handle)
                    .map_err(|e| EngineError::PlaybackStart(e.to_string()))?;
            }
            return Ok(());
        }

        match self.state {
            PlaybackState::PlayingInClip => self.tick_clip(timeline, library, now, delta),
            PlaybackState::PlayingInGap => self.tick_gap(timeline, library, now, delta),
            PlaybackState::Stopped | PlaybackState::Ended => Ok(()),
        }
    }

    fn tick_clip(&mut self, timeline: &mut Timeline, library: &MediaLibrary, now: f64, delta: f64) -> EngineResult<()> {
        let previous = timeline.playhead();
        let Some(active) = &self.active else {
            self.state = PlaybackState::PlayingInGap;
            return self.tick_gap(timeline, library, now, delta);
        };

        // Clip deleted or moved away under us: drop it and carry on as a gap
        let clip = match timeline.clip(active.clip) {
            Some(clip) if clip.contains(previous) => clip.clone(),
            _ => {
                debug!("Active clip {} no longer under playhead", active.clip);
                self.deactivate();
                return self.tick_gap(timeline, library, now, delta);
            }
        };

        let resource_time = self
            .cache
            .provider()
            .current_position(active.handle)
            .map_err(|e| EngineError::Playback(e.to_string()))?;
        self.cache.touch(&active.key);
        let composition_time = composition_time_for(&clip, resource_time);

        let finished = resource_time >= clip.source_out() - self.config.end_epsilon;
        if finished || composition_time >= clip.end() {
            debug!(
                "Leaving clip {} at source {:.3} (out {:.3})",
                clip.id,
                resource_time,
                clip.source_out()
            );
            self.deactivate();
            // Spend the rest of this frame's delta in the gap
            let next = if clip.source_out() + self.config.end_epsilon < clip.trim_start + clip.duration {
                debug!("Clip {} ran out of source, holding last frame", clip.id);
                self.exhausted = Some(clip.id);
                composition_time.min(clip.end()).max(previous + delta)
            } else {
                clip.end().max(previous + delta)
            };
            timeline.set_playhead(next)?;
            return self.settle(timeline, library, now);
        }

        timeline.set_playhead(composition_time.max(clip.start_time))?;
        Ok(())
    }

    fn tick_gap(&mut self, timeline: &mut Timeline, library: &MediaLibrary, now: f64, delta: f64) -> EngineResult<()> {
        timeline.set_playhead(timeline.playhead() + delta)?;
        self.settle(timeline, library, now)
    }

    /// Re-resolve at the current playhead; enter a clip if one is there and ready.
    fn settle(&mut self, timeline: &Timeline, library: &MediaLibrary, now: f64) -> EngineResult<()> {
        self.state = PlaybackState::PlayingInGap;
        let position = timeline.playhead();
        if position >= timeline.composition_length() {
            return Ok(());
        }
        match find_active_clip(timeline.tracks(), position).cloned() {
            Some(clip) if self.exhausted == Some(clip.id) => {
                trace!("Holding last frame of clip {}", clip.id);
            }
            Some(clip) => {
                self.exhausted = None;
                self.enter_clip(&clip, source_time_for(&clip, position), library, now, false)?;
            }
            None => self.exhausted = None,
        }
        Ok(())
    }

    /// Take over the clip's resource. Returns false if it is not ready
    /// (playback continues as a gap).
    ///
    /// `blocking` loads synchronously on a cache miss (used by `play`).
    fn enter_clip(
        &mut self,
        clip: &Clip,
        source_time: f64,
        library: &MediaLibrary,
        now: f64,
        blocking: bool,
    ) -> EngineResult<bool> {
        let Some(source) = library.get(clip.source_id) else {
            warn!("Clip {} references unknown source {}", clip.id, clip.source_id);
            return Ok(false);
        };
        let key = self.cache.key_for(&source.path, clip.id);

        let handle = if blocking {
            match self.cache.load_blocking(&key, source_time) {
                Ok(handle) => handle,
                Err(err) => {
                    warn!("Clip {} unavailable, playing as gap: {}", clip.id, err);
                    return Ok(false);
                }
            }
        } else {
            match self.cache.acquire(&key, source_time) {
                Acquire::Ready(handle) => handle,
                Acquire::Pending => {
                    trace!("Clip {} resource pending", clip.id);
                    return Ok(false);
                }
            }
        };
        self.cache.pin(Some(&key));

        let provider = Arc::clone(self.cache.provider());
        let at = provider
            .current_position(handle)
            .map_err(|e| EngineError::Playback(e.to_string()))?;

        self.active = Some(ActiveResource {
            clip: clip.id,
            key,
            handle,
        });
        self.state = PlaybackState::PlayingInClip;

        if (at - source_time).abs() > self.config.drift_threshold {
            debug!(
                "Resource {} at {:.3}, expected {:.3}: seek before play",
                handle, at, source_time
            );
            let signal = provider.seek(handle, source_time)?;
            if !signal.is_set() {
                let deadline = now + self.cache.config().seek_timeout().as_secs_f64();
                self.pending_start = Some(PendingStart { signal, deadline });
                return Ok(true);
            }
        }

        provider
            .play(handle)
            .map_err(|e| EngineError::PlaybackStart(e.to_string()))?;
        debug!("Entered clip {} at source {:.3} ({})", clip.id, source_time, handle);
        Ok(true)
    }

    fn check_end(&mut self, timeline: &mut Timeline) -> EngineResult<()> {
        let length = timeline.composition_length();
        if self.state.is_playing() && timeline.playhead() >= length {
            timeline.set_playhead(length)?;
            self.halt(timeline, PlaybackState::Ended);
            info!("Reached composition end at {:.3}s", length);
        }
        Ok(())
    }

    /// Pause and let go of the driven resource (the cache keeps it).
    fn deactivate(&mut self) {
        self.pending_start = None;
        if let Some(active) = self.active.take() {
            if let Err(err) = self.cache.provider().pause(active.handle) {
                warn!("Pause failed on {}: {}", active.handle, err);
            }
            self.cache.touch(&active.key);
        }
        self.cache.pin(None);
    }

    fn halt(&mut self, timeline: &mut Timeline, state: PlaybackState) {
        self.deactivate();
        self.exhausted = None;
        self.state = state;
        self.last_frame_time = None;
        self.schedule_epoch += 1;
        timeline.set_playing(false);
    }

    /// Stop, tear down every cached resource and abort pending preparation.
    /// The synchronizer rejects further transport calls afterwards.
    pub fn dispose(&mut self, timeline: &mut Timeline) {
        if self.disposed {
            return;
        }
        self.halt(timeline, PlaybackState::Stopped);
        self.cache.clear();
        self.disposed = true;
        info!("Playback synchronizer disposed");
    }

    fn report(&self, timeline: &Timeline) -> TickReport {
        TickReport {
            state: self.state,
            position: timeline.playhead(),
            clip: self.active_clip(),
            handle: self.active_handle(),
        }
    }
}
