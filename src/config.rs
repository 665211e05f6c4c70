//! Config module.
//! Manages I/O for board_config.json (target window, default corner ratios, grid
//! and capture timings).
//! Uses serde for JSON serialization.
//! Auto-generates defaults if the file is missing; every field is optional in the file.
//! User-supplied numbers never fail hard: bad values fall back to the last known good ones.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_CONFIG_PATH: &str = "board_config.json";

const MIN_CELL_SIZE: u32 = 10;
const MIN_ANIMATION_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Partial title used when no game window was picked in the selection gate.
    pub target_window_title: String,
    /// Owning application name of game client windows.
    pub process_name: String,
    /// Substring every game client title carries.
    pub window_marker: String,
    /// Default board corners as fractions of the target window.
    pub default_ratios: [(f64, f64); 4],
    pub grid_rows: usize,
    pub grid_cols: usize,
    pub cell_size: u32,
    pub capture_frames: usize,
    pub capture_interval_secs: f64,
    pub animation_interval_secs: f64,
    /// Wait after a click before capturing, so the tile flip can settle.
    pub click_settle_delay_secs: f64,
    pub max_capture_workers: usize,
    /// Largest share of the primary monitor the tile board may cover.
    pub memory_window_ratio: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target_window_title: "Nodon".to_string(),
            process_name: "dofus".to_string(),
            window_marker: "release".to_string(),
            default_ratios: [
                (0.5346, 0.2870),
                (0.7786, 0.5023),
                (0.6336, 0.6361),
                (0.3898, 0.4139),
            ],
            grid_rows: 3,
            grid_cols: 5,
            cell_size: 200,
            capture_frames: 10,
            capture_interval_secs: 0.2,
            animation_interval_secs: 0.2,
            click_settle_delay_secs: 0.2,
            max_capture_workers: 3,
            memory_window_ratio: 0.35,
        }
    }
}

impl Config {
    /// Replaces out-of-range values with defaults (or clamps them), warning once per field.
    pub fn sanitized(mut self) -> Self {
        let defaults = Config::default();
        let params = self.grid_params().clamped();
        self.grid_rows = params.rows;
        self.grid_cols = params.cols;
        self.cell_size = params.cell_size;
        if self.capture_frames == 0 {
            warn!("capture_frames must be at least 1, using {}", defaults.capture_frames);
            self.capture_frames = defaults.capture_frames;
        }
        if self.max_capture_workers == 0 {
            warn!(
                "max_capture_workers must be at least 1, using {}",
                defaults.max_capture_workers
            );
            self.max_capture_workers = defaults.max_capture_workers;
        }
        self.capture_interval_secs = seconds_or(
            "capture_interval_secs",
            self.capture_interval_secs,
            defaults.capture_interval_secs,
        );
        self.animation_interval_secs = seconds_or(
            "animation_interval_secs",
            self.animation_interval_secs,
            defaults.animation_interval_secs,
        );
        self.click_settle_delay_secs = seconds_or(
            "click_settle_delay_secs",
            self.click_settle_delay_secs,
            defaults.click_settle_delay_secs,
        );
        if !(self.memory_window_ratio > 0.0 && self.memory_window_ratio <= 1.0) {
            warn!("memory_window_ratio must be in (0, 1], using {}", defaults.memory_window_ratio);
            self.memory_window_ratio = defaults.memory_window_ratio;
        }
        self
    }

    pub fn grid_params(&self) -> GridParams {
        GridParams { rows: self.grid_rows, cols: self.grid_cols, cell_size: self.cell_size }
    }

    pub fn set_grid_params(&mut self, params: GridParams) {
        self.grid_rows = params.rows;
        self.grid_cols = params.cols;
        self.cell_size = params.cell_size;
    }

    pub fn capture_interval(&self) -> Duration {
        duration_or(self.capture_interval_secs, Config::default().capture_interval_secs)
    }

    pub fn animation_interval(&self) -> Duration {
        duration_or(self.animation_interval_secs, Config::default().animation_interval_secs)
            .max(MIN_ANIMATION_INTERVAL)
    }

    pub fn click_settle_delay(&self) -> Duration {
        duration_or(self.click_settle_delay_secs, Config::default().click_settle_delay_secs)
    }
}

fn duration_or(secs: f64, default: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or_else(|_| Duration::from_secs_f64(default))
}

/// `value` if it is a representable non-negative duration in seconds, else `default`.
fn seconds_or(field: &str, value: f64, default: f64) -> f64 {
    if Duration::try_from_secs_f64(value).is_ok() {
        value
    } else {
        warn!("{} must be a non-negative number of seconds, using {}", field, default);
        default
    }
}

/// Grid size (cells per side) and capture square size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GridParams {
    pub rows: usize,
    pub cols: usize,
    pub cell_size: u32,
}

impl Default for GridParams {
    fn default() -> Self {
        Config::default().grid_params()
    }
}

impl GridParams {
    fn clamped(self) -> Self {
        Self {
            rows: self.rows.max(1),
            cols: self.cols.max(1),
            cell_size: self.cell_size.max(MIN_CELL_SIZE),
        }
    }

    /// Reads raw user input. Each unparsable field keeps its value from `last_good`;
    /// parsed values are clamped to the minimum grid (1x1) and cell size.
    pub fn parse(
        rows: Option<&str>,
        cols: Option<&str>,
        cell_size: Option<&str>,
        last_good: GridParams,
    ) -> Self {
        fn field<T>(name: &str, raw: Option<&str>, fallback: T) -> T
        where
            T: std::str::FromStr + Copy + std::fmt::Display,
        {
            match raw.map(str::trim) {
                None => fallback,
                Some(text) => text.parse().unwrap_or_else(|_| {
                    warn!("Ignoring invalid {} '{}', keeping {}", name, text, fallback);
                    fallback
                }),
            }
        }
        // Negative numbers are out of range, not a different type.
        let signed_rows = field::<i64>("rows", rows, last_good.rows as i64);
        let signed_cols = field::<i64>("cols", cols, last_good.cols as i64);
        let signed_cell = field::<i64>("cell size", cell_size, i64::from(last_good.cell_size));
        Self {
            rows: signed_rows.max(1) as usize,
            cols: signed_cols.max(1) as usize,
            cell_size: signed_cell.clamp(0, i64::from(u32::MAX)) as u32,
        }
        .clamped()
    }
}

/// Loads the config file, or defaults when it does not exist yet.
/// Grid numbers go through [`GridParams::parse`], so a bad value there falls
/// back to its default instead of failing the load.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        info!("No config at {}, using defaults", path.display());
        return Ok(Config::default());
    }
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config: {}", path.display()))?;
    let mut raw: Value = serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse config: {}", path.display()))?;

    let mut take = |name: &str| {
        let value = raw.as_object_mut()?.remove(name)?;
        Some(match value {
            Value::String(text) => text,
            other => other.to_string(),
        })
    };
    let rows = take("grid_rows");
    let cols = take("grid_cols");
    let cell_size = take("cell_size");

    let mut config: Config = serde_json::from_value(raw)
        .with_context(|| format!("Failed to parse config: {}", path.display()))?;
    let params = GridParams::parse(
        rows.as_deref(),
        cols.as_deref(),
        cell_size.as_deref(),
        config.grid_params(),
    );
    config.set_grid_params(params);
    Ok(config.sanitized())
}

pub fn save_config(path: &Path, config: &Config) -> Result<()> {
    let json = serde_json::to_string_pretty(config).context("Failed to serialize config")?;
    fs::write(path, json).with_context(|| format!("Failed to write config: {}", path.display()))?;
    info!("Saved config to {}", path.display());
    Ok(())
}
