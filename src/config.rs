use crate::error::{Result, SanctclipError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Origin of a set of windows: hourly presence, daily presence, or explicit events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Mode {
    Hour,
    Day,
    #[default]
    Event,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Hour => write!(f, "HOUR"),
            Mode::Day => write!(f, "DAY"),
            Mode::Event => write!(f, "EVENT"),
        }
    }
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hour" | "1h" => Ok(Mode::Hour),
            "day" | "1d" => Ok(Mode::Day),
            "event" => Ok(Mode::Event),
            _ => Err(format!(
                "Unknown mode: {}. Use 'hour', 'day', or 'event'",
                s
            )),
        }
    }
}

impl Mode {
    /// Product groups ending in `_1h` are hourly presence, `_1d` daily; everything else is events.
    pub fn from_group_name(name: &str) -> Self {
        let lower = name.to_lowercase();
        if lower.ends_with("_1h") {
            Mode::Hour
        } else if lower.ends_with("_1d") {
            Mode::Day
        } else {
            Mode::Event
        }
    }

    /// Plural label used in preview summaries.
    pub fn label(&self) -> &'static str {
        match self {
            Mode::Hour => "Hours",
            Mode::Day => "Days",
            Mode::Event => "Events",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bucket: String,
    pub audio_prefix: String,
    pub products_prefix: String,
    pub dest_dir: PathBuf,
    pub clip_sample_rate: u32,
    pub clip_mono: bool,
    pub clip_sample_format: String,
    /// Outputs smaller than this are treated as failed cuts.
    pub min_clip_bytes: u64,
    /// Span assumed for a file whose duration cannot be probed.
    pub fallback_file_secs: u64,
    /// How far before the range start a left-boundary file may begin.
    pub left_boundary_hours: i64,
    pub event_fallback_secs: f64,
    pub min_run_hours: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bucket: "noaa-passive-bioacoustic".to_string(),
            audio_prefix: "sanctsound/audio".to_string(),
            products_prefix: "sanctsound/products/detections".to_string(),
            dest_dir: default_dest_dir(),
            clip_sample_rate: 48_000,
            clip_mono: true,
            clip_sample_format: "s16".to_string(),
            min_clip_bytes: 10_000,
            fallback_file_secs: 3600,
            left_boundary_hours: 6,
            event_fallback_secs: 60.0,
            min_run_hours: 2,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Some(config_path) = Self::config_file_path() {
            if config_path.exists() {
                let contents = std::fs::read_to_string(&config_path)?;
                config = toml::from_str::<Config>(&contents).map_err(|e| {
                    SanctclipError::Config(format!(
                        "Failed to parse {}: {e}",
                        config_path.display()
                    ))
                })?;
            }
        }

        if let Ok(dest) = std::env::var("SANCTCLIP_DEST") {
            config.dest_dir = PathBuf::from(dest);
        }
        if let Ok(bucket) = std::env::var("SANCTCLIP_BUCKET") {
            config.bucket = bucket;
        }
        if let Ok(rate) = std::env::var("SANCTCLIP_SAMPLE_RATE") {
            if let Ok(r) = rate.parse() {
                config.clip_sample_rate = r;
            }
        }
        if let Ok(bytes) = std::env::var("SANCTCLIP_MIN_CLIP_BYTES") {
            if let Ok(b) = bytes.parse() {
                config.min_clip_bytes = b;
            }
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.bucket.trim().is_empty() {
            return Err(SanctclipError::Config("Bucket name is empty".to_string()));
        }
        if self.clip_sample_rate == 0 {
            return Err(SanctclipError::Config(
                "Clip sample rate must be greater than 0".to_string(),
            ));
        }
        if self.fallback_file_secs == 0 {
            return Err(SanctclipError::Config(
                "Fallback file duration must be greater than 0".to_string(),
            ));
        }
        if self.event_fallback_secs <= 0.0 {
            return Err(SanctclipError::Config(
                "Event fallback duration must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn fallback_file_duration(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.fallback_file_secs as i64)
    }

    pub fn left_boundary_tolerance(&self) -> chrono::Duration {
        chrono::Duration::hours(self.left_boundary_hours)
    }

    fn config_file_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("sanctclip").join("config.toml"))
    }
}

fn default_dest_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("sanctclip")
}
