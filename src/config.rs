// Configuration loading and parsing (config/engine.toml).

use chrono::{DateTime, Datelike, Duration, Local, NaiveTime, Weekday};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },
}

// ---------------------------------------------------------------------------
// engine.toml structs
// ---------------------------------------------------------------------------

/// Raw deserialization target for the entire engine.toml file.
#[derive(Debug, Clone, Deserialize)]
struct EngineFile {
    scoring: ScoringConfig,
    ingest: IngestConfig,
    drift: DriftConfig,
    matching: MatchingConfig,
    database: DatabaseSection,
}

#[derive(Debug, Clone, Deserialize)]
struct DatabaseSection {
    path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScoringConfig {
    /// Selects the batting/bowling/fielding tables; see `scoring::ruleset`.
    pub ruleset_version: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Base URL of the upstream scorecard provider.
    pub scraper_base_url: String,
    /// Club names whose matches are ingested each cycle.
    pub configured_clubs: Vec<String>,
    /// Rolling window handed to `list_recent_matches`.
    pub scrape_interval_days: i64,
    /// Weekly wall-clock schedule, e.g. "Mon 01:00".
    pub scrape_schedule: String,
    /// Per-request deadline for scraper calls.
    pub request_timeout_secs: u64,
    /// Retry budget per scraper call before the unit of work is skipped.
    pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DriftConfig {
    /// Fraction of the distance to the target applied per weekly step.
    pub rate: f64,
    /// `[min, max]` clamp applied to every multiplier.
    pub multiplier_bounds: [f64; 2],
}

impl DriftConfig {
    pub fn min_multiplier(&self) -> f64 {
        self.multiplier_bounds[0]
    }

    pub fn max_multiplier(&self) -> f64 {
        self.multiplier_bounds[1]
    }

    pub fn clamp(&self, multiplier: f64) -> f64 {
        multiplier.clamp(self.multiplier_bounds[0], self.multiplier_bounds[1])
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MatchingConfig {
    /// Similarity floor for the fuzzy leg of the name matcher.
    pub fuzzy_threshold: f64,
}

/// The assembled engine configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub scoring: ScoringConfig,
    pub ingest: IngestConfig,
    pub drift: DriftConfig,
    pub matching: MatchingConfig,
    pub db_path: String,
}

// ---------------------------------------------------------------------------
// Weekly schedule
// ---------------------------------------------------------------------------

/// A weekly wall-clock schedule ("Mon 01:00"), evaluated in local time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeeklySchedule {
    pub weekday: Weekday,
    pub time: NaiveTime,
}

impl WeeklySchedule {
    /// Parse a `"<weekday> <HH:MM>"` schedule string.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let invalid = |message: String| ConfigError::ValidationError {
            field: "ingest.scrape_schedule".into(),
            message,
        };

        let mut parts = text.split_whitespace();
        let (Some(day), Some(clock), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(invalid(format!(
                "expected \"<weekday> <HH:MM>\", got {text:?}"
            )));
        };

        let weekday: Weekday = day
            .parse()
            .map_err(|_| invalid(format!("unrecognized weekday {day:?}")))?;
        let time = NaiveTime::parse_from_str(clock, "%H:%M")
            .map_err(|e| invalid(format!("bad time {clock:?}: {e}")))?;

        Ok(WeeklySchedule { weekday, time })
    }

    /// The next occurrence strictly after `now`.
    pub fn next_occurrence(&self, now: DateTime<Local>) -> DateTime<Local> {
        for days_ahead in 0..=7 {
            let date = now.date_naive() + Duration::days(days_ahead);
            if date.weekday() != self.weekday {
                continue;
            }
            // `earliest` resolves DST gaps/folds deterministically.
            if let Some(candidate) = date.and_time(self.time).and_local_timezone(Local).earliest()
            {
                if candidate > now {
                    return candidate;
                }
            }
        }
        // Unreachable: an 8-day scan always contains the target weekday
        // strictly after `now`. Fall back one week out.
        now + Duration::days(7)
    }
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate configuration from `config/engine.toml` relative to the
/// given `base_dir`.
///
/// This is the lower-level loading primitive that does not auto-copy defaults.
/// Prefer `load_config()` which handles default initialization automatically.
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let engine_path = base_dir.join("config").join("engine.toml");
    let engine_text = read_file(&engine_path)?;
    let engine_file: EngineFile =
        toml::from_str(&engine_text).map_err(|e| ConfigError::ParseError {
            path: engine_path.clone(),
            source: e,
        })?;

    let config = Config {
        scoring: engine_file.scoring,
        ingest: engine_file.ingest,
        drift: engine_file.drift,
        matching: engine_file.matching,
        db_path: engine_file.database.path,
    };

    validate(&config)?;

    Ok(config)
}

/// Ensure all config files exist by copying missing ones from `defaults/`.
/// Returns the list of files that were copied. Skips `.example` files.
pub fn ensure_config_files(base_dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let defaults_dir = base_dir.join("defaults");
    let config_dir = base_dir.join("config");

    if !defaults_dir.exists() {
        if !config_dir.exists() {
            return Err(ConfigError::DefaultsCopyError {
                message: format!(
                    "neither defaults/ nor config/ directory found in {}; \
                     run from the project root or ensure defaults/ is present",
                    base_dir.display()
                ),
            });
        }
        return Ok(vec![]);
    }

    std::fs::create_dir_all(&config_dir).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to create config directory: {e}"),
    })?;

    let mut copied = Vec::new();

    let entries = std::fs::read_dir(&defaults_dir).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to read defaults directory: {e}"),
    })?;

    for entry in entries {
        let entry = entry.map_err(|e| ConfigError::DefaultsCopyError {
            message: format!("failed to read defaults entry: {e}"),
        })?;
        let path = entry.path();

        if !path.is_file() {
            continue;
        }
        let Some(file_name) = path.file_name() else {
            continue;
        };

        if file_name.to_str().is_some_and(|n| n.ends_with(".example")) {
            continue;
        }
        let target = config_dir.join(file_name);

        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
        {
            Ok(mut dest) => {
                let content = std::fs::read(&path).map_err(|e| ConfigError::DefaultsCopyError {
                    message: format!("failed to read {}: {e}", path.display()),
                })?;
                std::io::Write::write_all(&mut dest, &content).map_err(|e| {
                    ConfigError::DefaultsCopyError {
                        message: format!("failed to write {}: {e}", target.display()),
                    }
                })?;
                copied.push(target);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                // File already exists in config/, keep the user's copy.
            }
            Err(e) => {
                return Err(ConfigError::DefaultsCopyError {
                    message: format!("failed to create {}: {e}", target.display()),
                });
            }
        }
    }

    Ok(copied)
}

/// Convenience wrapper: loads config relative to the current working directory.
/// Ensures default config files are copied before loading.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    ensure_config_files(&cwd)?;
    load_config_from(&cwd)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.scoring.ruleset_version.is_empty() {
        return Err(ConfigError::ValidationError {
            field: "scoring.ruleset_version".into(),
            message: "must not be empty".into(),
        });
    }

    let ingest = &config.ingest;
    if ingest.configured_clubs.is_empty() {
        return Err(ConfigError::ValidationError {
            field: "ingest.configured_clubs".into(),
            message: "at least one club is required".into(),
        });
    }
    if ingest.scrape_interval_days <= 0 {
        return Err(ConfigError::ValidationError {
            field: "ingest.scrape_interval_days".into(),
            message: format!("must be > 0, got {}", ingest.scrape_interval_days),
        });
    }
    if ingest.request_timeout_secs == 0 {
        return Err(ConfigError::ValidationError {
            field: "ingest.request_timeout_secs".into(),
            message: "must be > 0".into(),
        });
    }
    WeeklySchedule::parse(&ingest.scrape_schedule)?;

    let rate = config.drift.rate;
    if !(0.0..=1.0).contains(&rate) {
        return Err(ConfigError::ValidationError {
            field: "drift.rate".into(),
            message: format!("must be between 0.0 and 1.0 inclusive, got {rate}"),
        });
    }

    let [min, max] = config.drift.multiplier_bounds;
    if !(min.is_finite() && max.is_finite()) || min <= 0.0 || min >= max {
        return Err(ConfigError::ValidationError {
            field: "drift.multiplier_bounds".into(),
            message: format!("expected 0 < min < max, got [{min}, {max}]"),
        });
    }

    let threshold = config.matching.fuzzy_threshold;
    if !(0.0..=1.0).contains(&threshold) {
        return Err(ConfigError::ValidationError {
            field: "matching.fuzzy_threshold".into(),
            message: format!("must be between 0.0 and 1.0 inclusive, got {threshold}"),
        });
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
