use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::entities::export::Resolution;

/// Timeline playback engine: clip resolution, export planning, simulated playback
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable debug logging to file (default: clipline.log in the config dir)
    #[arg(short = 'l', long = "log", value_name = "LOG_FILE", global = true)]
    pub log_file: Option<Option<PathBuf>>,

    /// Increase logging verbosity (default: warn, -v: info, -vv: debug, -vvv+: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbosity: u8,

    /// Custom configuration directory (overrides default platform paths)
    #[arg(short = 'c', long = "config-dir", value_name = "DIR", global = true)]
    pub config_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show which clip (and source time) is active at a composition time
    Resolve {
        /// Project JSON file
        #[arg(value_name = "PROJECT")]
        project: PathBuf,

        /// Composition time in seconds
        #[arg(long = "at", value_name = "SECONDS")]
        at: f64,
    },

    /// Print the export plan (clips clamped to the composition, gaps filled)
    Export {
        #[arg(value_name = "PROJECT")]
        project: PathBuf,

        /// Output resolution: 720p, 1080p or source
        #[arg(short = 'r', long = "resolution", default_value = "1080p")]
        resolution: Resolution,

        /// Output frame rate
        #[arg(long = "fps", default_value_t = 30)]
        fps: u32,

        /// Print the plan as JSON
        #[arg(long = "json")]
        json: bool,
    },

    /// Play the project against the simulated media layer, printing transitions
    Play {
        #[arg(value_name = "PROJECT")]
        project: PathBuf,

        /// Start position in seconds
        #[arg(long = "from", default_value_t = 0.0)]
        from: f64,

        /// Tick rate (frames per second)
        #[arg(long = "fps", default_value_t = 30.0)]
        fps: f64,

        /// Tick on the wall clock instead of stepping a virtual one
        #[arg(long = "realtime")]
        realtime: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_subcommands_and_globals() {
        let args = Args::parse_from(["clipline", "-vv", "export", "p.json", "-r", "720p", "--json"]);
        assert_eq!(args.verbosity, 2);
        match args.command {
            Command::Export { resolution, fps, json, .. } => {
                assert_eq!(resolution, Resolution::P720);
                assert_eq!(fps, 30);
                assert!(json);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn log_flag_value_is_optional() {
        let args = Args::parse_from(["clipline", "resolve", "p.json", "--at", "2.5", "--log"]);
        assert_eq!(args.log_file, Some(None));
        assert!(matches!(args.command, Command::Resolve { at, .. } if at == 2.5));
    }

    #[test]
    fn rejects_unknown_resolution() {
        assert!(Args::try_parse_from(["clipline", "export", "p.json", "-r", "4k"]).is_err());
    }
}
