use crate::engine::MapStyle;
use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser, Debug, Default)]
#[command(name = "venue-map", about = "Venue parking occupancy and congestion map for the terminal")]
pub struct Args {
    /// Backend host that `/api/...` requests are forwarded to
    #[arg(long)]
    pub api: Option<String>,

    /// Initial location, e.g. `/venue/42/?eventTime=1700000000000&offset=0#13/51.5/-0.1`
    #[arg(long, default_value = "/")]
    pub url: String,

    /// TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Where log output goes while the terminal is in use
    #[arg(long, default_value = "venue-map.log")]
    pub log_file: PathBuf,

    /// Serve API payloads from JSON files in this directory instead of HTTP
    #[arg(long)]
    pub mock: Option<PathBuf>,

    #[arg(long, value_enum)]
    pub style: Option<MapStyle>,

    /// Do not request the congestion overlay
    #[arg(long)]
    pub no_congestion: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MapSettings {
    pub style: MapStyle,
    pub zoom: f64,
    pub max_pitch: f64,
    pub hash: bool,
    /// Feed the congestion line layer alongside parking occupancy
    pub congestion: bool,
}

impl Default for MapSettings {
    fn default() -> Self {
        Self {
            style: MapStyle::Dark,
            zoom: 10.0,
            max_pitch: 75.0,
            hash: true,
            congestion: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PanelSettings {
    pub step_minutes: i64,
    pub steps_count: usize,
    pub occupancy_steps: usize,
}

impl Default for PanelSettings {
    fn default() -> Self {
        Self {
            step_minutes: 15,
            steps_count: 8,
            occupancy_steps: 10,
        }
    }
}

/// Fully resolved settings
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiSettings,
    pub map: MapSettings,
    pub panel: PanelSettings,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Load the file named by `--config` (if any) and apply flag overrides
    pub fn load(args: &Args) -> Result<Self> {
        let mut config = match &args.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        if let Some(api) = &args.api {
            config.api.base_url = api.clone();
        }
        if let Some(style) = args.style {
            config.map.style = style;
        }
        if args.no_congestion {
            config.map.congestion = false;
        }
        Ok(config)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.api.timeout_secs)
    }
}
