use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;
use transit_core::{parse_clock, Clock, TimetableFile};

use crate::error::StationError;

#[derive(Parser, Clone, Debug)]
#[command(name = "station", about = "Transit station: answers journey queries by asking its neighbours")]
pub struct Cli {
    /// Station name; the timetable is read from `tt-<NAME>`
    pub name: String,

    /// TCP port for browser queries (`GET /?to=<station>`)
    pub tcp_port: u16,

    /// UDP port for frames from neighbouring stations
    pub udp_port: u16,

    /// UDP ports of neighbouring stations
    pub neighbours: Vec<u16>,

    /// TOML config file [default: station.toml, skipped if absent]
    #[arg(long, env = "STATION_CONFIG")]
    pub config: Option<String>,
}

const DEFAULT_CONFIG: &str = "station.toml";

// ═══════════════════════════════════════════════════════════════
//  Config file (TOML)
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
pub struct StationConfig {
    #[serde(default = "default_host")]
    pub host: String,
    /// Directory holding `tt-<station>` files.
    #[serde(default = "default_timetable_dir")]
    pub timetable_dir: PathBuf,
    /// Time given to neighbours to bind their ports before announcing.
    #[serde(default = "default_startup_delay_secs")]
    pub startup_delay_secs: u64,
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,
    #[serde(default)]
    pub utc_offset_minutes: i64,
    /// Pin the station clock to `HH:MM` instead of reading the system time.
    #[serde(default)]
    pub fixed_clock: Option<String>,
    #[serde(default = "default_channel_buffer")]
    pub channel_buffer: usize,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            timetable_dir: default_timetable_dir(),
            startup_delay_secs: default_startup_delay_secs(),
            query_timeout_secs: default_query_timeout_secs(),
            utc_offset_minutes: 0,
            fixed_clock: None,
            channel_buffer: default_channel_buffer(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_timetable_dir() -> PathBuf {
    PathBuf::from(".")
}
fn default_startup_delay_secs() -> u64 {
    5
}
fn default_query_timeout_secs() -> u64 {
    30
}
fn default_channel_buffer() -> usize {
    256
}

impl StationConfig {
    pub fn load(path: &str) -> Result<Self, StationError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| StationError::Config { context: "read", detail: format!("'{path}': {e}") })?;
        Self::parse(&content)
            .map_err(|detail| StationError::Config { context: "parse", detail: format!("'{path}': {detail}") })
    }

    fn parse(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }
}

// ═══════════════════════════════════════════════════════════════
//  Settings: CLI + config file
// ═══════════════════════════════════════════════════════════════

/// Everything the station needs to run.
#[derive(Debug, Clone)]
pub struct Settings {
    pub name: String,
    pub host: String,
    pub tcp_port: u16,
    pub udp_port: u16,
    pub neighbours: Vec<u16>,
    pub timetable_path: PathBuf,
    pub startup_delay: Duration,
    pub query_timeout: Duration,
    pub clock: Clock,
    pub channel_buffer: usize,
}

impl Settings {
    pub fn new(cli: &Cli) -> Result<Self, StationError> {
        let cfg = match cli.config.as_deref() {
            Some(path) => StationConfig::load(path)?,
            // A missing default config file just means defaults.
            None if std::path::Path::new(DEFAULT_CONFIG).exists() => StationConfig::load(DEFAULT_CONFIG)?,
            None => StationConfig::default(),
        };
        Self::merge(cli, cfg)
    }

    fn merge(cli: &Cli, cfg: StationConfig) -> Result<Self, StationError> {
        if cli.name.is_empty() {
            return Err(StationError::Config { context: "args", detail: "station name is empty".into() });
        }
        if cfg.channel_buffer == 0 {
            return Err(StationError::Config { context: "channel_buffer", detail: "must be positive".into() });
        }

        let clock = match cfg.fixed_clock.as_deref() {
            Some(hhmm) => Clock::Fixed(
                parse_clock(hhmm)
                    .map_err(|e| StationError::Config { context: "fixed_clock", detail: e.to_string() })?,
            ),
            None => Clock::System { utc_offset: cfg.utc_offset_minutes },
        };

        Ok(Self {
            name: cli.name.clone(),
            timetable_path: TimetableFile::path_for(&cfg.timetable_dir, &cli.name),
            host: cfg.host,
            tcp_port: cli.tcp_port,
            udp_port: cli.udp_port,
            neighbours: cli.neighbours.clone(),
            startup_delay: Duration::from_secs(cfg.startup_delay_secs),
            query_timeout: Duration::from_secs(cfg.query_timeout_secs),
            clock,
            channel_buffer: cfg.channel_buffer,
        })
    }
}
