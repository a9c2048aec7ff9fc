//! Editor session: one project, one resource cache, one synchronizer.
//!
//! Owns the lifetime of everything playback needs. Constructed once per
//! opened project and torn down by `dispose()` (or drop), which stops
//! playback, closes every prepared resource and aborts queued preparation.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use anyhow::Context;
use log::info;

use crate::config::EngineConfig;
use crate::core::resource_cache::MediaResourceCache;
use crate::core::synchronizer::{FrameToken, PlaybackState, PlaybackSynchronizer, TickReport};
use crate::core::workers::Workers;
use crate::entities::export::{ExportPlan, ExportSettings};
use crate::entities::media::MediaLibrary;
use crate::entities::project::Project;
use crate::entities::timeline::Timeline;
use crate::entities::traits::{Clock, MediaProvider, WorkerPool};
use crate::error::EngineResult;

pub struct EditorSession {
    project: Project,
    cache: Arc<MediaResourceCache>,
    sync: PlaybackSynchronizer,
    config: EngineConfig,
}

impl EditorSession {
    /// Session preparing resources on a dedicated worker pool.
    pub fn new(
        project: Project,
        config: EngineConfig,
        provider: Arc<dyn MediaProvider>,
        clock: Arc<dyn Clock>,
    ) -> EngineResult<Self> {
        let epoch = Arc::new(AtomicU64::new(0));
        let workers = Workers::new(config.worker_threads(), Arc::clone(&epoch))
            .context("Failed to spawn preparation workers")?;
        Ok(Self::with_pool(project, config, provider, clock, Arc::new(workers), epoch))
    }

    /// Session on a caller-supplied pool. `epoch` must be the pool's epoch.
    pub fn with_pool(
        project: Project,
        config: EngineConfig,
        provider: Arc<dyn MediaProvider>,
        clock: Arc<dyn Clock>,
        pool: Arc<dyn WorkerPool>,
        epoch: Arc<AtomicU64>,
    ) -> Self {
        let cache = Arc::new(MediaResourceCache::new(config.cache.clone(), provider, pool, epoch));
        let sync = PlaybackSynchronizer::new(Arc::clone(&cache), clock, config.playback.clone());
        info!(
            "Editor session opened: {} sources, {} clips, length {:.3}s",
            project.library.len(),
            project.timeline.clips().count(),
            project.timeline.composition_length()
        );
        Self {
            project,
            cache,
            sync,
            config,
        }
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    /// Mutable project access for edits; safe while playing (the next tick
    /// re-reads the model).
    pub fn project_mut(&mut self) -> &mut Project {
        &mut self.project
    }

    pub fn timeline(&self) -> &Timeline {
        &self.project.timeline
    }

    pub fn library(&self) -> &MediaLibrary {
        &self.project.library
    }

    pub fn cache(&self) -> &Arc<MediaResourceCache> {
        &self.cache
    }

    pub fn synchronizer(&self) -> &PlaybackSynchronizer {
        &self.sync
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> PlaybackState {
        self.sync.state()
    }

    pub fn play(&mut self) -> EngineResult<PlaybackState> {
        let Project { library, timeline } = &mut self.project;
        self.sync.play(timeline, library)
    }

    pub fn pause(&mut self) {
        self.sync.pause(&mut self.project.timeline);
    }

    pub fn seek(&mut self, time: f64) -> EngineResult<()> {
        let Project { library, timeline } = &mut self.project;
        self.sync.seek(timeline, library, time)
    }

    pub fn tick(&mut self) -> EngineResult<TickReport> {
        let Project { library, timeline } = &mut self.project;
        self.sync.tick(timeline, library)
    }

    pub fn request_frame(&self) -> Option<FrameToken> {
        self.sync.request_frame()
    }

    pub fn on_frame(&mut self, token: FrameToken) -> EngineResult<Option<TickReport>> {
        let Project { library, timeline } = &mut self.project;
        self.sync.on_frame(token, timeline, library)
    }

    pub fn export_plan(&self, settings: ExportSettings) -> EngineResult<ExportPlan> {
        ExportPlan::build(&self.project.timeline, &self.project.library, settings)
    }

    pub fn is_disposed(&self) -> bool {
        self.sync.is_disposed()
    }

    pub fn dispose(&mut self) {
        if !self.sync.is_disposed() {
            self.sync.dispose(&mut self.project.timeline);
            info!("Editor session closed");
        }
    }
}

impl Drop for EditorSession {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use crate::core::sim::SimulatedProvider;
    use crate::core::workers::InlinePool;
    use crate::entities::clip::Clip;
    use crate::entities::media::MediaSource;
    use crate::entities::track::TrackKind;

    fn project() -> Project {
        let mut library = MediaLibrary::new();
        let mut timeline = Timeline::new(6.0).unwrap();
        let track = timeline.add_track("V1", TrackKind::Video);
        let source = MediaSource::new("/m/intro.mp4", 4.0);
        let clip = Clip::from_source(&source, track, 1.0);
        library.add(source).unwrap();
        timeline.add_clip(clip).unwrap();
        Project::new(library, timeline)
    }

    fn session() -> (Arc<ManualClock>, Arc<SimulatedProvider>, EditorSession) {
        let project = project();
        let clock = Arc::new(ManualClock::new(0.0));
        let provider = Arc::new(SimulatedProvider::from_library(&project.library, clock.clone()));
        let epoch = Arc::new(AtomicU64::new(0));
        let session = EditorSession::with_pool(
            project,
            EngineConfig::default(),
            provider.clone(),
            clock.clone(),
            Arc::new(InlinePool::new(Arc::clone(&epoch))),
            epoch,
        );
        (clock, provider, session)
    }

    #[test]
    fn plays_through_to_end() {
        let (clock, _, mut session) = session();
        assert_eq!(session.play().unwrap(), PlaybackState::PlayingInGap);
        while let Some(token) = session.request_frame() {
            clock.advance(0.25);
            session.on_frame(token).unwrap();
        }
        assert_eq!(session.state(), PlaybackState::Ended);
        assert_eq!(session.timeline().playhead(), 6.0);
        assert!(!session.timeline().is_playing());
    }

    #[test]
    fn edits_apply_between_ticks() {
        let (clock, _, mut session) = session();
        session.play().unwrap();
        clock.advance(0.5);
        session.tick().unwrap();

        let id = session.timeline().clips().next().unwrap().id;
        session.project_mut().timeline.remove_clip(id).unwrap();
        clock.advance(1.0);
        let r = session.tick().unwrap();
        assert_eq!(r.state, PlaybackState::PlayingInGap);
        assert_eq!(r.position, 1.5);
    }

    #[test]
    fn drop_closes_resources() {
        let (clock, provider, mut session) = session();
        session.seek(2.0).unwrap();
        session.play().unwrap();
        clock.advance(0.5);
        session.tick().unwrap();
        assert!(provider.open_handles() > 0);

        drop(session);
        assert_eq!(provider.open_handles(), 0);
    }

    #[test]
    fn export_plan_from_session() {
        let (_, _, session) = session();
        let plan = session.export_plan(ExportSettings::default()).unwrap();
        assert_eq!(plan.total_duration(), 6.0);
    }
}
