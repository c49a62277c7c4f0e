//! Runtime configuration, loaded by the `kine-cli` binary and handed to
//! [`crate::supervisor::Supervisor`]. Mirrors the option table in spec.md §6.

use std::time::Duration;

use serde_derive::{Deserialize, Serialize};

/// Bind parameter style a backend expects (spec.md §4.1).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamStyle {
    /// Positional `?` placeholders (sqlite, mysql).
    Question,
    /// Numbered `$1`, `$2`, ... placeholders (postgres).
    Dollar,
    /// Numbered `@1`, `@2`, ... placeholders (sql server-flavored engines).
    At,
}

impl Default for ParamStyle {
    fn default() -> Self {
        ParamStyle::Question
    }
}

/// Connection pool sizing knobs (spec.md §4.1, §6).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolConfig {
    /// `0` means "driver default (2)"; negative means "no idle connections".
    pub max_idle_conns: i32,
    pub max_open_conns: u32,
    #[serde(with = "humantime_serde_secs")]
    pub conn_max_lifetime: Duration,
    #[serde(with = "humantime_serde_secs")]
    pub conn_max_idle_time: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            max_idle_conns: 0,
            max_open_conns: 5,
            conn_max_lifetime: Duration::from_secs(0),
            conn_max_idle_time: Duration::from_secs(0),
        }
    }
}

/// The full set of options recognized by the core (spec.md §6).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// SQL engine connection string, e.g. `sqlite::memory:` or a postgres DSN.
    pub db_url: String,

    pub param_style: ParamStyle,

    /// Serialize all `execute()` calls behind a process-wide mutex. Opt-in,
    /// for engines without internal write serialization (spec.md §9).
    pub lock_writes: bool,

    #[serde(with = "humantime_serde_secs")]
    pub compact_interval: Duration,

    #[serde(with = "humantime_serde_secs")]
    pub poll_interval: Duration,

    #[serde(with = "humantime_serde_secs")]
    pub watch_query_timeout: Duration,

    pub pool: PoolConfig,

    /// Soft cap on rows returned per watch poll tick before re-polling
    /// immediately without sleeping (spec.md §4.6 step 5).
    pub watch_batch_limit: i64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            db_url: "sqlite::memory:".to_string(),
            param_style: ParamStyle::Question,
            lock_writes: false,
            compact_interval: Duration::from_secs(5 * 60),
            poll_interval: Duration::from_secs(1),
            watch_query_timeout: Duration::from_secs(20),
            pool: PoolConfig::default(),
            watch_batch_limit: 500,
        }
    }
}

impl Config {
    /// Applies the invariants implied by spec.md §6
    /// (`watch-query-timeout` minimum 5s).
    pub fn normalize(mut self) -> Self {
        let min_timeout = Duration::from_secs(5);
        if self.watch_query_timeout < min_timeout {
            self.watch_query_timeout = min_timeout;
        }
        self
    }

    /// Whether the compactor should run at all; `<= 0` disables it.
    pub fn compaction_enabled(&self) -> bool {
        !self.compact_interval.is_zero()
    }
}

/// `confy`/`serde` can't serialize `Duration` directly in a human-friendly
/// way, so config files store plain seconds. Kept local rather than pulling
/// in `humantime-serde` for a single field shape.
mod humantime_serde_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        d.as_secs().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn normalize_enforces_minimum_watch_timeout() {
        let cfg = Config { watch_query_timeout: Duration::from_secs(1), ..Config::default() }.normalize();
        assert_eq!(cfg.watch_query_timeout, Duration::from_secs(5));
    }

    #[test]
    fn zero_compact_interval_disables_compaction() {
        let cfg = Config { compact_interval: Duration::from_secs(0), ..Config::default() };
        assert!(!cfg.compaction_enabled());
    }
}
