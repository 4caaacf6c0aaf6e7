//! Configuration assembly
//!
//! Builds the core `Config` record from, in rising precedence: built-in
//! defaults, a TOML config file, `MLC_*` environment variables, and the
//! parsed CLI flags. The core only ever sees the final record.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use mlc_core::config::{Config, DuplicatePolicy, HashAlgo, TransferMode, VerifyMode};

use crate::cli::GlobalOpts;
use crate::error::{CliError, CliResult};

/// Default config file name looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "mlc.toml";

/// Environment variable prefix
const ENV_PREFIX: &str = "MLC_";

fn env_var(name: &str) -> Option<String> {
    std::env::var(format!("{ENV_PREFIX}{name}"))
        .ok()
        .filter(|v| !v.is_empty())
}

fn parse_env<T: FromStr>(name: &str) -> CliResult<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match env_var(name) {
        None => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| CliError::Usage(format!("{ENV_PREFIX}{name}: {e}"))),
    }
}

fn parse_env_bool(name: &str) -> CliResult<Option<bool>> {
    match env_var(name) {
        None => Ok(None),
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            other => Err(CliError::Usage(format!(
                "{ENV_PREFIX}{name}: expected a boolean, got '{other}'"
            ))),
        },
    }
}

/// Load the config file layer
///
/// An explicitly named file must exist; the default file is optional.
fn load_file(explicit: Option<&Path>) -> CliResult<Config> {
    let (path, required) = match explicit {
        Some(path) => (path.to_path_buf(), true),
        None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
    };
    if !path.exists() {
        if required {
            return Err(CliError::Usage(format!(
                "config file '{}' not found",
                path.display()
            )));
        }
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(&path)
        .map_err(|e| CliError::Usage(format!("cannot read '{}': {e}", path.display())))?;
    toml::from_str(&raw)
        .map_err(|e| CliError::Usage(format!("config file '{}': {e}", path.display())))
}

fn apply_env(config: &mut Config) -> CliResult<()> {
    if let Some(source) = env_var("SOURCE") {
        config.source = PathBuf::from(source);
    }
    if let Some(destination) = env_var("DESTINATION") {
        config.destination = PathBuf::from(destination);
    }
    if let Some(db) = env_var("DB") {
        config.db = PathBuf::from(db);
    }
    if let Some(concurrency) = parse_env::<usize>("CONCURRENCY")? {
        config.concurrency = concurrency;
    }
    if let Some(mode) = parse_env::<TransferMode>("MODE")? {
        config.mode = mode;
    }
    if let Some(verify) = parse_env::<VerifyMode>("VERIFY")? {
        config.verify = verify;
    }
    if let Some(hashing) = parse_env::<HashAlgo>("HASHING")? {
        config.hashing = hashing;
    }
    if let Some(layout) = env_var("LAYOUT") {
        config.layout = layout;
    }
    if let Some(nas) = parse_env_bool("NAS_MODE")? {
        config.nas_mode = Some(nas);
    }
    if let Some(policy) = parse_env::<DuplicatePolicy>("DUPLICATE_POLICY")? {
        config.duplicate_policy = policy;
    }
    if let Some(musicbrainz) = parse_env_bool("MUSICBRAINZ")? {
        config.musicbrainz = musicbrainz;
    }
    if let Some(no_heal) = parse_env_bool("NO_AUTO_HEALING")? {
        config.no_auto_healing = no_heal;
    }
    Ok(())
}

/// Assemble the final configuration
///
/// # Errors
/// Returns `Usage` for unreadable files, bad TOML, or malformed values.
pub fn build(global: &GlobalOpts) -> CliResult<Config> {
    let mut config = load_file(global.config.as_deref())?;
    apply_env(&mut config)?;

    // Flags are the last word.
    if let Some(source) = &global.source {
        config.source = source.clone();
    }
    if let Some(destination) = &global.dest {
        config.destination = destination.clone();
    }
    if let Some(db) = &global.db {
        config.db = db.clone();
    }
    if let Some(concurrency) = global.concurrency {
        config.concurrency = concurrency;
    }
    if global.nas {
        config.nas_mode = Some(true);
    }
    if global.verbose {
        config.verbose = true;
    }
    if global.quiet {
        config.quiet = true;
    }
    Ok(config)
}
