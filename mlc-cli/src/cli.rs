//! CLI definition and argument parsing
//!
//! Defines the command surface with clap's derive API and dispatches onto
//! the command implementations. Global flags feed the settings assembler;
//! subcommand flags stay local to their command.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::commands;
use crate::error::{CliError, CliResult};
use crate::settings;
use mlc_core::CancelToken;

/// Flags shared by every subcommand
#[derive(clap::Args, Debug, Clone)]
pub struct GlobalOpts {
    /// Path to a TOML config file (default: ./mlc.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Source directory to scan
    #[arg(long, global = true)]
    pub source: Option<PathBuf>,

    /// Destination root for planned files
    #[arg(long, global = true)]
    pub dest: Option<PathBuf>,

    /// State database path
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Worker pool width (0 = auto)
    #[arg(long, global = true)]
    pub concurrency: Option<usize>,

    /// Force the NAS tuning profile
    #[arg(long = "nas-mode", global = true)]
    pub nas: bool,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Quiet output (warnings and errors only)
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

/// Command line arguments for the library cleaner
#[derive(Parser, Debug)]
#[command(name = "mlc", author, version, about = "Music library cleaner", long_about = None)]
pub struct Args {
    #[command(flatten)]
    pub global: GlobalOpts,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Discover audio files and extract their metadata
    Scan,
    /// Re-run extraction over known files, including previous failures
    Rescan,
    /// Cluster, score and plan destination operations
    Plan {
        /// Transfer mode (copy, move, hardlink, symlink)
        #[arg(long)]
        mode: Option<String>,

        /// Destination layout template
        #[arg(long)]
        layout: Option<String>,

        /// Print the planned actions after planning
        #[arg(long)]
        dry_run: bool,

        /// Discard existing clusters and recluster from scratch
        #[arg(long)]
        force_recluster: bool,

        /// Canonicalize artist names via MusicBrainz
        #[arg(long)]
        musicbrainz: bool,
    },
    /// Execute the planned operations
    Execute {
        /// Verification mode (size, hash, full)
        #[arg(long)]
        verify: Option<String>,
    },
    /// Display planned actions
    Show {
        /// Group output as a destination tree
        #[arg(long)]
        tree: bool,

        /// Only clusters holding more than one file
        #[arg(long)]
        duplicates_only: bool,

        /// Only the elected winners
        #[arg(long)]
        winners_only: bool,
    },
    /// Render a Markdown run summary
    Report {
        /// Output directory (default: ./artifacts/reports/<timestamp>)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Query stored metadata
    Metadata {
        /// Filter: artist substring (case-insensitive)
        #[arg(long)]
        artist: Option<String>,

        /// Filter: album substring (case-insensitive)
        #[arg(long)]
        album: Option<String>,

        /// Filter: title substring (case-insensitive)
        #[arg(long)]
        title: Option<String>,

        /// Filter: files missing a tag (artist, album, title, track, date)
        #[arg(long)]
        missing: Option<String>,

        /// Output format (human, jsonl, csv)
        #[arg(long, default_value = "human")]
        output: String,
    },
    /// Diagnose the environment
    Doctor,
}

/// Initialize logging from the global flags
pub fn init_logging(global: &GlobalOpts) {
    let log_level = if global.verbose {
        log::LevelFilter::Debug
    } else if global.quiet {
        log::LevelFilter::Warn
    } else {
        log::LevelFilter::Info
    };

    let _ = env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp_secs()
        .try_init();
}

/// Main CLI dispatch function
///
/// # Errors
/// Propagates command failures carrying their exit codes.
pub fn run() -> CliResult<()> {
    let args = Args::parse();
    init_logging(&args.global);

    let config = settings::build(&args.global)?;
    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        if let Err(e) = ctrlc::set_handler(move || {
            log::warn!("Interrupt received; finishing in-flight work");
            cancel.cancel();
        }) {
            log::debug!("Could not install interrupt handler: {e}");
        }
    }

    let result = match args.command {
        Commands::Scan => commands::scan::run(config, &cancel),
        Commands::Rescan => commands::rescan::run(config, &cancel),
        Commands::Plan {
            mode,
            layout,
            dry_run,
            force_recluster,
            musicbrainz,
        } => {
            let mut config = config;
            if let Some(mode) = mode {
                config.mode = mode.parse()?;
            }
            if let Some(layout) = layout {
                config.layout = layout;
            }
            if musicbrainz {
                config.musicbrainz = true;
            }
            commands::plan::run(config, &cancel, dry_run, force_recluster)
        }
        Commands::Execute { verify } => {
            let mut config = config;
            if let Some(verify) = verify {
                config.verify = verify.parse()?;
            }
            commands::execute::run(config, &cancel)
        }
        Commands::Show {
            tree,
            duplicates_only,
            winners_only,
        } => commands::show::run(&config, tree, duplicates_only, winners_only),
        Commands::Report { out } => commands::report::run(&config, out.as_deref()),
        Commands::Metadata {
            artist,
            album,
            title,
            missing,
            output,
        } => commands::metadata::run(&config, artist, album, title, missing, &output),
        Commands::Doctor => commands::doctor::run(&config),
    };

    if cancel.is_cancelled() {
        return Err(CliError::Fatal("operation cancelled".to_string()));
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_factory_is_valid() {
        let cmd = Args::command();
        assert_eq!(cmd.get_name(), "mlc");
        assert!(cmd.get_version().is_some());
    }

    #[test]
    fn scan_parses_with_globals() {
        let args =
            Args::try_parse_from(["mlc", "scan", "--source", "/music/in", "--concurrency", "4"])
                .unwrap();
        assert!(matches!(args.command, Commands::Scan));
        assert_eq!(args.global.source, Some(PathBuf::from("/music/in")));
        assert_eq!(args.global.concurrency, Some(4));
    }

    #[test]
    fn plan_parses_its_flags() {
        let args = Args::try_parse_from([
            "mlc",
            "plan",
            "--dest",
            "/music/out",
            "--mode",
            "move",
            "--layout",
            "{artist}/{title}.{ext}",
            "--dry-run",
            "--force-recluster",
            "--musicbrainz",
        ])
        .unwrap();
        assert_eq!(args.global.dest, Some(PathBuf::from("/music/out")));
        match args.command {
            Commands::Plan {
                mode,
                layout,
                dry_run,
                force_recluster,
                musicbrainz,
            } => {
                assert_eq!(mode.as_deref(), Some("move"));
                assert_eq!(layout.as_deref(), Some("{artist}/{title}.{ext}"));
                assert!(dry_run);
                assert!(force_recluster);
                assert!(musicbrainz);
            }
            _ => panic!("expected plan command"),
        }
    }

    #[test]
    fn execute_parses_verify() {
        let args = Args::try_parse_from(["mlc", "execute", "--verify", "hash"]).unwrap();
        match args.command {
            Commands::Execute { verify } => assert_eq!(verify.as_deref(), Some("hash")),
            _ => panic!("expected execute command"),
        }
    }

    #[test]
    fn show_flags_parse() {
        let args =
            Args::try_parse_from(["mlc", "show", "--tree", "--duplicates-only"]).unwrap();
        match args.command {
            Commands::Show {
                tree,
                duplicates_only,
                winners_only,
            } => {
                assert!(tree);
                assert!(duplicates_only);
                assert!(!winners_only);
            }
            _ => panic!("expected show command"),
        }
    }

    #[test]
    fn metadata_defaults_to_human_output() {
        let args = Args::try_parse_from(["mlc", "metadata", "--artist", "abba"]).unwrap();
        match args.command {
            Commands::Metadata { artist, output, .. } => {
                assert_eq!(artist.as_deref(), Some("abba"));
                assert_eq!(output, "human");
            }
            _ => panic!("expected metadata command"),
        }
    }

    #[test]
    fn missing_subcommand_fails() {
        assert!(Args::try_parse_from(["mlc"]).is_err());
    }
}
