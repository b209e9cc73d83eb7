use std::{
    fs::{self, File},
    io::{self, BufReader},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub const CONFIG_FILE: &str = "/etc/omen-fan/config.json";

// Longest accepted pause between two control loop iterations, in seconds
pub const MAX_POLL_INTERVAL: f64 = 3600.;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to access configuration file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to parse Json configuration file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("TEMP_CURVE and SPEED_CURVE must have same length ({temps} vs {speeds})")]
    CurveLengthMismatch { temps: usize, speeds: usize },
    #[error("Fan curves need at least 2 points, got {0}")]
    TooFewPoints(usize),
    #[error("TEMP_CURVE must be in ascending order")]
    TemperaturesNotAscending,
    #[error("SPEED_CURVE values must be between 0-100, got {0}")]
    SpeedOutOfRange(u8),
    #[error("IDLE_SPEED must be between 0-100, got {0}")]
    IdleSpeedOutOfRange(u8),
    #[error("HYSTERESIS must be between 1-10, got {0}")]
    HysteresisOutOfRange(u8),
    #[error("POLL_INTERVAL must be a positive number of seconds, got {0}")]
    InvalidPollInterval(f64),
    #[error("POLL_INTERVAL must be at most 3600 seconds, got {0}")]
    PollIntervalTooLong(f64),
}

// Settings of the fan control service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    #[serde(rename = "TEMP_CURVE")]
    pub temperature_curve: Vec<i32>,
    #[serde(rename = "SPEED_CURVE")]
    pub speed_curve: Vec<u8>,
    #[serde(rename = "IDLE_SPEED")]
    pub idle_speed: u8,
    // Seconds between two control loop iterations
    #[serde(rename = "POLL_INTERVAL")]
    pub poll_interval: f64,
    #[serde(rename = "TEMP_SMOOTHING")]
    pub temperature_smoothing: bool,
    #[serde(rename = "HYSTERESIS")]
    pub hysteresis: u8,
}

// Settings of the command line tool
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptConfig {
    #[serde(rename = "BYPASS_DEVICE_CHECK")]
    pub bypass_device_check: bool,
}

// Missing sections and keys fall back to their defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub script: ScriptConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            temperature_curve: vec![50, 60, 70, 80, 87, 93],
            speed_curve: vec![20, 40, 60, 70, 85, 100],
            idle_speed: 0,
            poll_interval: 1.0,
            temperature_smoothing: true,
            hysteresis: 2,
        }
    }
}

impl ServiceConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let temps = &self.temperature_curve;
        let speeds = &self.speed_curve;

        if temps.len() != speeds.len() {
            return Err(ConfigError::CurveLengthMismatch {
                temps: temps.len(),
                speeds: speeds.len(),
            });
        }

        if temps.len() < 2 {
            return Err(ConfigError::TooFewPoints(temps.len()));
        }

        if temps.windows(2).any(|w| w[0] > w[1]) {
            return Err(ConfigError::TemperaturesNotAscending);
        }

        if let Some(speed) = speeds.iter().find(|s| **s > 100) {
            return Err(ConfigError::SpeedOutOfRange(*speed));
        }

        if self.idle_speed > 100 {
            return Err(ConfigError::IdleSpeedOutOfRange(self.idle_speed));
        }

        if !(1..=10).contains(&self.hysteresis) {
            return Err(ConfigError::HysteresisOutOfRange(self.hysteresis));
        }

        if !self.poll_interval.is_finite() || self.poll_interval <= 0. {
            return Err(ConfigError::InvalidPollInterval(self.poll_interval));
        }

        if self.poll_interval > MAX_POLL_INTERVAL {
            return Err(ConfigError::PollIntervalTooLong(self.poll_interval));
        }

        Ok(())
    }
}

impl Config {
    // Read and parse the configuration file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!("Parsing config file at: {:?}", path);

        let file = File::open(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let config = serde_json::from_reader(BufReader::new(file))?;

        Ok(config)
    }

    // Load and validate the configuration, any failure
    // results in the default configuration
    pub fn load_or_default(path: &Path) -> Self {
        let config = match Self::load(path) {
            Ok(config) => config,
            Err(err) => {
                warn!("Config load failed, using defaults: {err}");
                return Self::default();
            }
        };

        if let Err(err) = config.validate() {
            error!("Invalid configuration, using defaults: {err}");
            return Self::default();
        }

        config
    }

    // Load the configuration the way the command line tool does at
    // startup. With write access a missing or invalid file is replaced
    // by the defaults
    pub fn load_or_init(path: &Path, privileged: bool) -> Self {
        if !path.is_file() {
            let config = Self::default();

            if privileged {
                match config.save(path) {
                    Ok(()) => info!("Configuration file has been created"),
                    Err(err) => error!("{err}"),
                }
            } else {
                warn!("No config file present. Start as root to create.");
            }

            return config;
        }

        let config = match Self::load(path) {
            Ok(config) => config,
            Err(err) => {
                error!("Failed to load config: {err}");
                return Self::default();
            }
        };

        if let Err(err) = config.validate() {
            error!("Invalid configuration, using defaults: {err}");

            let config = Self::default();
            if privileged {
                if let Err(err) = config.save(path) {
                    error!("{err}");
                }
            }
            return config;
        }

        config
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.service.validate()
    }

    // Save the configuration, creating the parent directory if needed
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source: io::Error| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let file = File::create(path).map_err(io_err)?;
        serde_json::to_writer_pretty(file, self)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();

        assert!(config.validate().is_ok());
        assert_eq!(config.service.hysteresis, 2);
        assert_eq!(config.service.poll_interval, 1.0);
        assert!(config.service.temperature_smoothing);
        assert!(!config.script.bypass_device_check);
    }

    #[test]
    fn test_partial_document_merges_over_defaults() {
        let json = r#"{ "service": { "IDLE_SPEED": 15, "HYSTERESIS": 4 } }"#;
        let config: Config = serde_json::from_str(json).unwrap();

        assert_eq!(config.service.idle_speed, 15);
        assert_eq!(config.service.hysteresis, 4);
        assert_eq!(
            config.service.temperature_curve,
            ServiceConfig::default().temperature_curve
        );
        assert_eq!(config.script, ScriptConfig::default());
    }

    #[test]
    fn test_document_uses_original_key_names() {
        let json = serde_json::to_value(Config::default()).unwrap();

        assert_eq!(json["service"]["TEMP_CURVE"][0], 50);
        assert_eq!(json["service"]["SPEED_CURVE"][5], 100);
        assert_eq!(json["service"]["TEMP_SMOOTHING"], true);
        assert_eq!(json["script"]["BYPASS_DEVICE_CHECK"], false);
    }

    #[test]
    fn test_validation_errors() {
        let mut service = ServiceConfig::default();
        service.speed_curve.pop();
        assert!(matches!(
            service.validate(),
            Err(ConfigError::CurveLengthMismatch { temps: 6, speeds: 5 })
        ));

        let mut service = ServiceConfig::default();
        service.temperature_curve = vec![50, 45, 70, 80, 87, 93];
        assert!(matches!(
            service.validate(),
            Err(ConfigError::TemperaturesNotAscending)
        ));

        let mut service = ServiceConfig::default();
        service.speed_curve[2] = 101;
        assert!(matches!(
            service.validate(),
            Err(ConfigError::SpeedOutOfRange(101))
        ));

        let mut service = ServiceConfig::default();
        service.hysteresis = 0;
        assert!(matches!(
            service.validate(),
            Err(ConfigError::HysteresisOutOfRange(0))
        ));

        let mut service = ServiceConfig::default();
        service.poll_interval = 0.;
        assert!(matches!(
            service.validate(),
            Err(ConfigError::InvalidPollInterval(_))
        ));

        let mut service = ServiceConfig::default();
        service.temperature_curve = vec![50];
        service.speed_curve = vec![20];
        assert!(matches!(
            service.validate(),
            Err(ConfigError::TooFewPoints(1))
        ));
    }

    #[test]
    fn test_poll_interval_ceiling() {
        let mut service = ServiceConfig::default();

        service.poll_interval = MAX_POLL_INTERVAL;
        assert!(service.validate().is_ok());

        service.poll_interval = 1e20;
        assert!(matches!(
            service.validate(),
            Err(ConfigError::PollIntervalTooLong(_))
        ));

        service.poll_interval = f64::INFINITY;
        assert!(matches!(
            service.validate(),
            Err(ConfigError::InvalidPollInterval(_))
        ));
    }

    #[test]
    fn test_weakly_ascending_temperatures_are_valid() {
        let mut service = ServiceConfig::default();
        service.temperature_curve = vec![50, 60, 60, 80, 87, 93];

        assert!(service.validate().is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("omen-fan").join("config.json");

        let mut config = Config::default();
        config.service.speed_curve = vec![10, 30, 50, 70, 90, 100];
        config.script.bypass_device_check = true;
        config.save(&path).unwrap();

        assert_eq!(Config::load(&path).unwrap(), config);
    }

    #[test]
    fn test_load_or_default_on_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        assert_eq!(Config::load_or_default(&path), Config::default());

        fs::write(&path, "{ not json").unwrap();
        assert_eq!(Config::load_or_default(&path), Config::default());

        fs::write(&path, r#"{ "service": { "HYSTERESIS": 11 } }"#).unwrap();
        assert_eq!(Config::load_or_default(&path), Config::default());

        fs::write(&path, r#"{ "service": { "POLL_INTERVAL": 2.5 } }"#).unwrap();
        assert_eq!(Config::load_or_default(&path).service.poll_interval, 2.5);
    }

    #[test]
    fn test_load_or_init_creates_file_when_privileged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let config = Config::load_or_init(&path, false);
        assert_eq!(config, Config::default());
        assert!(!path.exists());

        Config::load_or_init(&path, true);
        assert_eq!(Config::load(&path).unwrap(), Config::default());
    }

    #[test]
    fn test_load_or_init_replaces_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "service": { "SPEED_CURVE": [10, 20] } }"#)
            .unwrap();

        let config = Config::load_or_init(&path, true);

        assert_eq!(config, Config::default());
        assert_eq!(Config::load(&path).unwrap(), Config::default());
    }
}
