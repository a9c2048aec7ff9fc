use clipline::cli::{Args, Command};
use clipline::config::{self, CONFIG_FILE, EngineConfig};
use clipline::core::clock::{ManualClock, SystemClock};
use clipline::core::resolver::{ClipAt, resolve};
use clipline::core::session::EditorSession;
use clipline::core::sim::SimulatedProvider;
use clipline::core::synchronizer::PlaybackState;
use clipline::core::workers::InlinePool;
use clipline::entities::export::{ExportPlan, ExportSettings, Segment};
use clipline::entities::project::Project;
use clipline::entities::traits::Clock;

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::info;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::thread;
use std::time::Duration;

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args)?;

    let config_path = config::config_file(CONFIG_FILE, args.config_dir.as_deref());
    let config = EngineConfig::load(&config_path)?;

    match args.command {
        Command::Resolve { project, at } => run_resolve(&project, at),
        Command::Export {
            project,
            resolution,
            fps,
            json,
        } => run_export(&project, ExportSettings { resolution, fps }, json),
        Command::Play {
            project,
            from,
            fps,
            realtime,
        } => run_play(&project, config, from, fps, realtime),
    }
}

fn init_logging(args: &Args) -> Result<()> {
    // 0 (default) = warn, 1 (-v) = info, 2 (-vv) = debug, 3+ (-vvv) = trace
    let log_level = match args.verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    if let Some(log_path_opt) = &args.log_file {
        let log_path = log_path_opt
            .as_ref()
            .cloned()
            .unwrap_or_else(|| config::config_file("clipline.log", args.config_dir.as_deref()));
        if let Some(dir) = log_path.parent()
            && !dir.as_os_str().is_empty()
        {
            std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        let file = std::fs::File::create(&log_path)
            .with_context(|| format!("Failed to create log file {}", log_path.display()))?;

        env_logger::Builder::new()
            .filter_level(log_level)
            .format_timestamp_millis()
            .target(env_logger::Target::Pipe(Box::new(file)))
            .init();

        info!("Logging to file: {} (level: {:?})", log_path.display(), log_level);
    } else {
        // Console logging (respects RUST_LOG if set)
        let default_level = match args.verbosity {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
            .format_timestamp_millis()
            .init();
    }
    Ok(())
}

fn run_resolve(path: &Path, at: f64) -> Result<()> {
    let project = Project::load(path)?;
    let timeline = &project.timeline;
    match resolve(timeline, at) {
        ClipAt::Clip { clip, source_time } => {
            let source = project
                .library
                .get(clip.source_id)
                .map(|s| s.path.display().to_string())
                .unwrap_or_else(|| format!("<missing source {}>", clip.source_id));
            println!("{:.3}s: clip {} -> {} @ {:.3}s", at, clip.id, source, source_time);
        }
        ClipAt::Gap => println!("{:.3}s: gap", at),
        ClipAt::OutOfRange => println!(
            "{:.3}s: past composition end ({:.3}s)",
            at,
            timeline.composition_length()
        ),
    }
    Ok(())
}

fn run_export(path: &Path, settings: ExportSettings, json: bool) -> Result<()> {
    let project = Project::load(path)?;
    let plan = ExportPlan::build(&project.timeline, &project.library, settings)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    println!(
        "{} @ {} fps, scale {}, {:.3}s, {} input(s)",
        plan.settings.resolution,
        plan.settings.fps,
        plan.settings.resolution.scale(),
        plan.total_duration(),
        plan.inputs().len()
    );
    for segment in &plan.segments {
        match segment {
            Segment::Gap { start, duration } => {
                println!("  {:>9.3}  {:>8.3}  black", start, duration);
            }
            Segment::Clip(clip) => println!(
                "  {:>9.3}  {:>8.3}  {} [trim {:.3}/{:.3}]",
                clip.start_time,
                clip.duration,
                clip.source_path.display(),
                clip.trim_start,
                clip.trim_end
            ),
        }
    }
    Ok(())
}

fn run_play(path: &Path, config: EngineConfig, from: f64, fps: f64, realtime: bool) -> Result<()> {
    if !fps.is_finite() || fps <= 0.0 {
        bail!("fps must be > 0, got {}", fps);
    }
    let frame = 1.0 / fps;
    let project = Project::load(path)?;
    project.validate().context("Project failed validation")?;

    // Virtual clock steps instantly and prepares inline so output is
    // deterministic; realtime uses the wall clock and the worker pool.
    let manual = (!realtime).then(|| Arc::new(ManualClock::new(0.0)));
    let clock: Arc<dyn Clock> = match &manual {
        Some(manual) => manual.clone(),
        None => Arc::new(SystemClock::new()),
    };
    let provider = Arc::new(SimulatedProvider::from_library(&project.library, Arc::clone(&clock)));
    let mut session = if realtime {
        EditorSession::new(project, config, provider, Arc::clone(&clock))?
    } else {
        let epoch = Arc::new(AtomicU64::new(0));
        let pool = Arc::new(InlinePool::new(Arc::clone(&epoch)));
        EditorSession::with_pool(project, config, provider, Arc::clone(&clock), pool, epoch)
    };

    session.seek(from)?;
    let state = session.play()?;
    println!("{:>9.3}  {:?}", session.timeline().playhead(), state);

    let mut last = (state, session.synchronizer().active_clip());
    while let Some(token) = session.request_frame() {
        match &manual {
            Some(manual) => manual.advance(frame),
            None => thread::sleep(Duration::from_secs_f64(frame)),
        }
        let Some(report) = session.on_frame(token)? else {
            continue;
        };
        if (report.state, report.clip) != last {
            match report.clip {
                Some(clip) => println!("{:>9.3}  {:?}  clip {}", report.position, report.state, clip),
                None => println!("{:>9.3}  {:?}", report.position, report.state),
            }
            last = (report.state, report.clip);
        }
    }

    if session.state() != PlaybackState::Ended {
        println!("{:>9.3}  {:?}", session.timeline().playhead(), session.state());
    }
    let stats = session.cache().stats();
    info!(
        "Cache: hits={} misses={} evictions={} failures={} timeouts={} (hit rate {:.0}%)",
        stats.hits(),
        stats.misses(),
        stats.evictions(),
        stats.failures(),
        stats.timeouts(),
        stats.hit_rate() * 100.0
    );
    session.dispose();
    Ok(())
}
