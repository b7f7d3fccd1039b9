//! Tracing setup for hosts and the demo binary.
//!
//! Each area of the movement core (abilities, replication, wall geometry)
//! gets its own level. `RUST_LOG`, when set, replaces the whole filter.

use std::fmt;
use std::sync::Once;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        })
    }
}

/// Per-area verbosity of the movement core
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracingConfig {
    /// Anything outside the areas below, host targets included
    pub default_level: LogLevel,
    /// Ability transitions: wall-run start/stop, teleports, depletion
    pub abilities: LogLevel,
    /// Stale moves, corrections, replays
    pub replication: LogLevel,
    pub geometry: LogLevel,
    pub show_targets: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            default_level: LogLevel::Info,
            abilities: LogLevel::Info,
            replication: LogLevel::Warn,
            geometry: LogLevel::Warn,
            show_targets: true,
        }
    }
}

impl TracingConfig {
    /// `EnvFilter` directives for this configuration
    pub fn to_env_filter_string(&self) -> String {
        format!(
            "{},movement_core::abilities={},movement_core::replication={},movement_core::geometry={}",
            self.default_level, self.abilities, self.replication, self.geometry
        )
    }
}

static TRACING_INIT: Once = Once::new();

/// Install a global `fmt` subscriber. Only the first call in a process has
/// any effect, and an already installed subscriber (Bevy's `LogPlugin`) is
/// left alone.
pub fn init_tracing(config: &TracingConfig) {
    let directives = config.to_env_filter_string();
    let show_targets = config.show_targets;
    TRACING_INIT.call_once(move || {
        let filter = match EnvFilter::try_from_default_env() {
            Ok(from_env) => from_env,
            Err(_) => EnvFilter::new(directives),
        };
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(show_targets)
            .compact()
            .try_init();
    });
}

/// Keeps a named span entered while alive and logs the elapsed wall time
/// when dropped
pub struct TimingSpan {
    started: Instant,
    _entered: tracing::span::EnteredSpan,
}

impl TimingSpan {
    pub fn new(name: &'static str) -> Self {
        Self {
            started: Instant::now(),
            _entered: tracing::info_span!("timed", operation = name).entered(),
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1000.0
    }
}

impl Drop for TimingSpan {
    fn drop(&mut self) {
        tracing::debug!(elapsed_ms = self.elapsed_ms(), "finished");
    }
}
