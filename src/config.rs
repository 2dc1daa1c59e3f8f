//! Configuration and CLI argument handling

use std::{path::PathBuf, time::Duration};

use clap::{Parser, ValueEnum};

use crate::engine::EngineConfig;

/// How engine instances on this machine see each other
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BusKind {
    /// Shared key-value files under the data directory; works across processes
    Storage,
    /// In-process broadcast channel only
    Channel,
}

/// CLI argument parsing structure
#[derive(Debug, Parser)]
#[command(name = "focus-sync")]
#[command(about = "A local-first focus timer with cross-process and remote session sync")]
#[command(version)]
pub struct Config {
    /// Port to bind the server to
    #[arg(short, long, default_value = "20554")]
    pub port: u16,

    /// Host address to bind to
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Directory for the durable timer state
    #[arg(long, default_value = ".focus-sync")]
    pub data_dir: PathBuf,

    /// Sync bus backend
    #[arg(long, value_enum, default_value = "storage")]
    pub bus: BusKind,

    /// Poll interval of the storage bus in milliseconds
    #[arg(long, default_value = "250")]
    pub bus_poll_ms: u64,

    /// Category selected when nothing is restored
    #[arg(long, default_value = "focus")]
    pub category: String,

    /// Default session length in minutes
    #[arg(short, long, default_value = "25")]
    pub duration_minutes: u64,

    /// Tick interval in milliseconds
    #[arg(long, default_value = "1000")]
    pub tick_ms: u64,

    /// Seconds between remote upserts of a running session
    #[arg(long, default_value = "30")]
    pub sync_interval_secs: u64,

    /// Seconds of peer silence before a follower takes over a running session
    #[arg(long, default_value = "5")]
    pub leader_timeout_secs: u64,

    /// Base URL of the remote session table; remote sync is off without it
    #[arg(long, env = "FOCUS_SYNC_REMOTE_URL")]
    pub remote_url: Option<String>,

    /// API key sent to the remote
    #[arg(long, env = "FOCUS_SYNC_API_KEY", hide_env_values = true)]
    pub remote_api_key: Option<String>,

    /// Remote table name
    #[arg(long, default_value = "pomodoro_active_sessions")]
    pub remote_table: String,

    /// Signed-in user; guests never touch the remote
    #[arg(long, env = "FOCUS_SYNC_USER")]
    pub user_id: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Config {
    /// Parse configuration from command line arguments
    pub fn parse() -> Self {
        Parser::parse()
    }

    /// Get the server address as a formatted string
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Get the appropriate log level based on verbose flag
    pub fn log_level(&self) -> &'static str {
        if self.verbose { "debug" } else { "info" }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            default_category_id: self.category.clone(),
            default_duration_seconds: self.duration_minutes.max(1) * 60,
            tick_interval: Duration::from_millis(self.tick_ms.max(10)),
            remote_sync_interval: Duration::from_secs(self.sync_interval_secs.max(1)),
            leader_timeout: Duration::from_secs(self.leader_timeout_secs.max(1)),
            ..EngineConfig::default()
        }
    }
}
