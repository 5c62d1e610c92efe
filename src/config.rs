use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const SYSTEM_CONFIG_PATH: &str = "/etc/x1e2-custodian/config.toml";

/// Daemon settings; every field may be omitted from the file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Max frequency while hot
    pub cooldown_freq: u64,
    /// Max frequency while on battery
    pub battery_freq: u64,
    /// Max frequency while cool
    pub max_freq: u64,
    /// °C
    pub hot_threshold: i64,
    /// °C
    pub cool_threshold: i64,

    pub cpu_base_path: PathBuf,
    /// Relative to `cpu_base_path/cpuN`
    pub cpu_freq_max_path: PathBuf,
    pub temperature_path: PathBuf,
    pub ac_status_path: PathBuf,

    pub kill_nvidia_on_battery: bool,
    pub nvidia_kill_command: String,
    pub gpu_mode_command: String,

    pub tick_interval_ms: u64,
    /// Ticks between temperature samples
    pub temperature_interval: u64,
    pub command_timeout_secs: u64,
    /// Overrides the detected logical CPU count
    pub cpu_count: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cooldown_freq: 2_000_000,
            battery_freq: 1_500_000,
            max_freq: 9_999_999,
            hot_threshold: 90,
            cool_threshold: 70,
            cpu_base_path: PathBuf::from("/sys/devices/system/cpu"),
            cpu_freq_max_path: PathBuf::from("cpufreq/scaling_max_freq"),
            temperature_path: PathBuf::from("/sys/class/thermal/thermal_zone0/temp"),
            ac_status_path: PathBuf::from("/sys/class/power_supply/AC/online"),
            kill_nvidia_on_battery: false,
            nvidia_kill_command: "/usr/bin/disable-nvidia".to_string(),
            gpu_mode_command: "optimus-manager --print-mode".to_string(),
            tick_interval_ms: 1000,
            temperature_interval: 2,
            command_timeout_secs: 5,
            cpu_count: None,
        }
    }
}

impl Config {
    /// Load from `path`, or from the first default location that exists
    ///
    /// A missing file is not an error: the defaults are used instead.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => default_locations()
                .into_iter()
                .find(|p| p.exists())
                .unwrap_or_else(|| PathBuf::from(SYSTEM_CONFIG_PATH)),
        };

        if !path.exists() {
            tracing::warn!(path = %path.display(), "missing config file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let config = Self::parse(&path, &content)?;
        tracing::debug!(path = %path.display(), "config loaded");
        Ok(config)
    }

    /// Parse JSON when the file ends in `.json`, TOML otherwise
    pub fn parse(path: &Path, content: &str) -> Result<Self, ConfigError> {
        let config: Self = if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str(content).map_err(|source| ConfigError::Json {
                path: path.to_path_buf(),
                source,
            })?
        } else {
            toml::from_str(content).map_err(|source| ConfigError::Toml {
                path: path.to_path_buf(),
                source,
            })?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field, reason: &str| {
            Err(ConfigError::Invalid {
                field,
                reason: reason.to_string(),
            })
        };

        for (field, value) in [
            ("cooldown_freq", self.cooldown_freq),
            ("battery_freq", self.battery_freq),
            ("max_freq", self.max_freq),
        ] {
            if value == 0 {
                return invalid(field, "must be positive");
            }
            if i64::try_from(value).is_err() {
                return invalid(field, "is too large");
            }
        }
        if self.cool_threshold > self.hot_threshold {
            return invalid("cool_threshold", "can't be greater than hot_threshold");
        }
        for (field, value) in [
            ("tick_interval_ms", self.tick_interval_ms),
            ("temperature_interval", self.temperature_interval),
            ("command_timeout_secs", self.command_timeout_secs),
        ] {
            if value == 0 {
                return invalid(field, "must be positive");
            }
        }
        if self.cpu_count == Some(0) {
            return invalid("cpu_count", "must be positive");
        }
        for (field, value) in [
            ("cpu_base_path", &self.cpu_base_path),
            ("cpu_freq_max_path", &self.cpu_freq_max_path),
            ("temperature_path", &self.temperature_path),
            ("ac_status_path", &self.ac_status_path),
        ] {
            if value.as_os_str().is_empty() {
                return invalid(field, "must not be empty");
            }
        }
        if self.kill_nvidia_on_battery && self.nvidia_kill_command.trim().is_empty() {
            return invalid("nvidia_kill_command", "must be set when kill_nvidia_on_battery is enabled");
        }
        if self.gpu_mode_command.trim().is_empty() {
            return invalid("gpu_mode_command", "must not be empty");
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

/// System-wide file first, then the invoking user's config directory
pub fn default_locations() -> Vec<PathBuf> {
    let mut locations = vec![PathBuf::from(SYSTEM_CONFIG_PATH)];
    if let Some(mut path) = dirs::config_dir() {
        path.push("x1e2-custodian");
        path.push("config.toml");
        locations.push(path);
    }
    locations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = Config::parse(Path::new("config.toml"), "").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_partial_toml_overrides() {
        let config = Config::parse(
            Path::new("config.toml"),
            "hot_threshold = 85\nmax_freq = 4500000\nkill_nvidia_on_battery = true\n",
        )
        .unwrap();
        assert_eq!(config.hot_threshold, 85);
        assert_eq!(config.max_freq, 4_500_000);
        assert!(config.kill_nvidia_on_battery);
        assert_eq!(config.cool_threshold, 70);
    }

    #[test]
    fn test_json_by_extension() {
        let config = Config::parse(
            Path::new("/etc/x1e2-custodian.json"),
            r#"{"battery_freq": 1200000, "cpu_base_path": "/tmp/cpu"}"#,
        )
        .unwrap();
        assert_eq!(config.battery_freq, 1_200_000);
        assert_eq!(config.cpu_base_path, PathBuf::from("/tmp/cpu"));
    }

    #[test]
    fn test_malformed_files_are_rejected() {
        assert!(matches!(
            Config::parse(Path::new("c.toml"), "max_freq = \"fast\""),
            Err(ConfigError::Toml { .. })
        ));
        assert!(matches!(
            Config::parse(Path::new("c.toml"), "turbo = true"),
            Err(ConfigError::Toml { .. })
        ));
        assert!(matches!(
            Config::parse(Path::new("c.json"), "{"),
            Err(ConfigError::Json { .. })
        ));
    }

    #[test]
    fn test_validation() {
        let bad = [
            "max_freq = 0",
            "cool_threshold = 95",
            "tick_interval_ms = 0",
            "cpu_count = 0",
            "temperature_path = \"\"",
            "kill_nvidia_on_battery = true\nnvidia_kill_command = \" \"",
        ];
        for content in bad {
            assert!(
                matches!(
                    Config::parse(Path::new("c.toml"), content),
                    Err(ConfigError::Invalid { .. })
                ),
                "{content:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "battery_freq = 1000000\n").unwrap();
        assert_eq!(Config::load(Some(&path)).unwrap().battery_freq, 1_000_000);
    }

    #[test]
    fn test_dump_round_trips_through_json() {
        let config = Config::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let back = Config::parse(Path::new("dump.json"), &json).unwrap();
        assert_eq!(back, config);
    }
}
