//! Config file loading and CLI-flag overlay for [`kine::config::Config`].

use anyhow::{Context, Result};
use clap::Parser;
use kine::config::Config;

const APP_NAME: &str = "kine";
const CONFIG_NAME: &str = "kine";

#[derive(Debug, Parser, PartialEq)]
#[command(version, about = "Supervisor for the kine revision-log engine")]
pub struct Args {
    /// Path to a config file; defaults to the platform config dir.
    #[arg(short = 'c', long = "config")]
    pub config: Option<String>,

    /// Overrides `db-url` from the config file.
    #[arg(long = "db-url")]
    pub db_url: Option<String>,

    /// Log verbosity passed to the tracing env-filter.
    #[arg(short = 'l', long = "log-level", default_value = "info")]
    pub log_level: String,
}

/// Loads the on-disk config (creating it with defaults on first run) and
/// overlays any CLI flags the caller passed.
pub fn load(args: &Args) -> Result<Config> {
    let mut cfg: Config = match &args.config {
        Some(path) => confy::load_path(path).with_context(|| format!("loading config from {path}"))?,
        None => confy::load(APP_NAME, CONFIG_NAME).context("loading config from platform config dir")?,
    };

    if let Some(db_url) = &args.db_url {
        cfg.db_url = db_url.clone();
    }

    Ok(cfg.normalize())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn cli_db_url_overrides_loaded_config() {
        let args = Args { config: None, db_url: Some("postgres://x".to_string()), log_level: "info".to_string() };
        let mut cfg = Config::default();
        if let Some(db_url) = &args.db_url {
            cfg.db_url = db_url.clone();
        }
        assert_eq!(cfg.db_url, "postgres://x");
    }
}
