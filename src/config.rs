use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::interpolation::{Interpolator, INCOMPLETE_STAGE_TOLERANCE_MIN};
use crate::logging::LogConfig;
use crate::models::ZoneModel;
use crate::thresholds::{ThresholdConstants, ThresholdDetector, ThresholdMethod};

/// Application configuration, stored as TOML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Version and timestamps of the file
    pub metadata: ConfigMetadata,

    /// General application settings
    #[serde(default)]
    pub settings: AppSettings,

    /// Lactate constants of the detection methods
    #[serde(default)]
    pub thresholds: ThresholdConstants,

    /// Incomplete-stage correction
    #[serde(default)]
    pub interpolation: InterpolationSettings,

    /// Training zone defaults
    #[serde(default)]
    pub zones: ZoneSettings,

    #[serde(default)]
    pub logging: LogConfig,
}

/// Metadata section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigMetadata {
    /// Format version
    pub version: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last modification timestamp
    pub updated_at: DateTime<Utc>,
}

/// General application settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppSettings {
    /// SQLite database holding tests, stages, thresholds and zones
    pub database_path: PathBuf,

    /// Method used when a command is given none
    pub default_method: ThresholdMethod,
}

/// Incomplete-stage correction settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterpolationSettings {
    /// Shortfall in minutes below which a stage still counts as complete
    pub tolerance_min: f64,
}

/// Training zone settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneSettings {
    /// Model used when a command is given none
    pub default_model: ZoneModel,
}

impl Default for AppConfig {
    fn default() -> Self {
        let now = Utc::now();

        AppConfig {
            metadata: ConfigMetadata {
                version: "1.0".to_string(),
                created_at: now,
                updated_at: now,
            },
            settings: AppSettings::default(),
            thresholds: ThresholdConstants::default(),
            interpolation: InterpolationSettings::default(),
            zones: ZoneSettings::default(),
            logging: LogConfig::default(),
        }
    }
}

impl Default for AppSettings {
    fn default() -> Self {
        AppSettings {
            database_path: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".lactrs")
                .join("lactrs.db"),
            default_method: ThresholdMethod::Dickhuth,
        }
    }
}

impl Default for InterpolationSettings {
    fn default() -> Self {
        InterpolationSettings {
            tolerance_min: INCOMPLETE_STAGE_TOLERANCE_MIN,
        }
    }
}

impl Default for ZoneSettings {
    fn default() -> Self {
        ZoneSettings {
            default_model: ZoneModel::FiveZones,
        }
    }
}

impl AppConfig {
    /// Parse a TOML configuration file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: AppConfig = toml::from_str(&content).with_context(|| "Failed to parse TOML configuration")?;

        Ok(config)
    }

    /// Write the configuration as TOML, creating parent directories
    pub fn save_to_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.metadata.updated_at = Utc::now();

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }

        let toml_content = toml::to_string_pretty(self).with_context(|| "Failed to serialize configuration to TOML")?;

        fs::write(&path, toml_content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    /// `~/.lactrs/config.toml`
    pub fn default_config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".lactrs")
            .join("config.toml")
    }

    /// Load from `path`, falling back to defaults when the file does not exist
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let config_path = path.map(Path::to_path_buf).unwrap_or_else(Self::default_config_path);

        if config_path.exists() {
            Self::load_from_file(&config_path)
        } else {
            tracing::debug!(path = %config_path.display(), "Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Threshold detector using the configured constants
    pub fn detector(&self) -> ThresholdDetector {
        ThresholdDetector::with_constants(self.thresholds.clone())
    }

    /// Interpolator using the configured tolerance
    pub fn interpolator(&self) -> Interpolator {
        Interpolator::with_tolerance(self.interpolation.tolerance_min)
    }

    /// Read a value by dotted key, e.g. `thresholds.dickhuth_lt2_lactate`
    pub fn get(&self, key: &str) -> Result<String> {
        let value = toml::Value::try_from(self).context("Failed to serialize configuration")?;

        let mut current = &value;
        for part in key.split('.') {
            current = current
                .get(part)
                .ok_or_else(|| anyhow!("Unknown configuration key: {}", key))?;
        }

        Ok(match current {
            toml::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    /// Set a value by dotted key; the result must still be a valid configuration
    pub fn set(&mut self, key: &str, raw: &str) -> Result<()> {
        let mut value = toml::Value::try_from(&*self).context("Failed to serialize configuration")?;
        let (section, leaf) = match key.rsplit_once('.') {
            Some((section, leaf)) => (Some(section), leaf),
            None => (None, key),
        };

        let mut table = value
            .as_table_mut()
            .ok_or_else(|| anyhow!("Configuration root is not a table"))?;
        if let Some(section) = section {
            for part in section.split('.') {
                table = table
                    .get_mut(part)
                    .and_then(toml::Value::as_table_mut)
                    .ok_or_else(|| anyhow!("Unknown configuration section: {}", part))?;
            }
        }

        let parsed = parse_scalar(raw, table.get(leaf))
            .with_context(|| format!("Invalid value for {}: {}", key, raw))?;
        table.insert(leaf.to_string(), parsed);

        let updated: AppConfig = value
            .try_into()
            .with_context(|| format!("Invalid value for {}: {}", key, raw))?;
        // Unknown keys are dropped by deserialization
        updated.get(key)?;

        *self = updated;
        Ok(())
    }
}

/// Parse `raw` with the type of the value it replaces
fn parse_scalar(raw: &str, existing: Option<&toml::Value>) -> Result<toml::Value> {
    Ok(match existing {
        Some(toml::Value::Integer(_)) => toml::Value::Integer(raw.trim().parse()?),
        Some(toml::Value::Float(_)) => toml::Value::Float(raw.trim().parse()?),
        Some(toml::Value::Boolean(_)) => toml::Value::Boolean(raw.trim().parse()?),
        _ => toml::Value::String(raw.to_string()),
    })
}
