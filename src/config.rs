/*!
 # Controller configuration

 Loaded once at process start from a RON document. Every field has a
 compiled-in default, so a partial (or absent) file is fine.
*/

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::Result;

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub fade: FadeConfig,
    pub schedule: ScheduleConfig,
    pub ble: BleConfig,
    pub timing: TimingConfig,
    pub storage: StorageConfig,
    pub defaults: DefaultSettings,
}

/// Transition timing
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct FadeConfig {
    /// Fade used for manual commands
    pub duration_secs: f32,
    /// Fade used when applying the initial state on boot
    pub startup_duration_secs: f32,
    pub steps_per_second: u32,
    /// Fades shorter than this are applied instantly
    pub instant_threshold_secs: f32,
    /// Run the memory-reclaim hook every this many fade steps
    pub reclaim_every_steps: u32,
}

impl Default for FadeConfig {
    fn default() -> Self {
        Self {
            duration_secs: 5.0,
            startup_duration_secs: 0.5,
            steps_per_second: 25,
            instant_threshold_secs: 0.05,
            reclaim_every_steps: 10,
        }
    }
}

impl FadeConfig {
    pub fn duration(&self) -> Duration {
        secs(self.duration_secs)
    }

    pub fn startup_duration(&self) -> Duration {
        secs(self.startup_duration_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Minimum spacing between non-forced evaluations
    pub check_interval_ms: u64,
    /// Open an override window after manual commands
    pub resume_after_manual: bool,
    pub resume_delay_secs: u64,
    pub transition_fade_secs: f32,
    pub max_blocks: usize,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: 10_000,
            resume_after_manual: true,
            resume_delay_secs: 300,
            transition_fade_secs: 5.0,
            max_blocks: 20,
        }
    }
}

impl ScheduleConfig {
    pub fn transition_fade(&self) -> Duration {
        secs(self.transition_fade_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct BleConfig {
    pub enabled: bool,
    pub device_name: String,
    pub adv_interval_us: u32,
    /// Advertising is deferred while free memory is below this many bytes
    pub min_free_memory: u32,
    pub restart_check_interval_ms: u64,
    pub sensor_update_interval_ms: u64,
}

impl Default for BleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            device_name: "PicoLightSen".into(),
            adv_interval_us: 100_000,
            min_free_memory: 15_000,
            restart_check_interval_ms: 5_000,
            sensor_update_interval_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TimingConfig {
    pub main_loop_delay_ms: u64,
    pub housekeeping_interval_ms: u64,
    pub sensor_read_interval_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            main_loop_delay_ms: 200,
            housekeeping_interval_ms: 30_000,
            sensor_read_interval_ms: 300_000,
        }
    }
}

/// Keys of the persisted documents
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub schedule_path: String,
    pub settings_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            schedule_path: "schedule.json".into(),
            settings_path: "settings.json".into(),
        }
    }
}

/// Settings used when no settings document has been saved yet
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct DefaultSettings {
    pub active_recipe: String,
    pub auto_cycle: bool,
}

impl Default for DefaultSettings {
    fn default() -> Self {
        Self {
            active_recipe: "veg_growth".into(),
            auto_cycle: true,
        }
    }
}

impl Config {
    /// Reads `path`; a missing file yields the defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        if !path.exists() {
            info!("No config at {}, using defaults", path.display());
            return Ok(Config::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let config = Self::parse(&contents)?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<Config> {
        Ok(ron::from_str(contents)?)
    }
}

fn secs(value: f32) -> Duration {
    Duration::try_from_secs_f32(value).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_document_keeps_defaults() {
        let config = Config::parse(
            r#"(
    ble: (device_name: "GrowShelf", min_free_memory: 20000),
    schedule: (resume_delay_secs: 60),
)"#,
        )
        .unwrap();

        assert_eq!(config.ble.device_name, "GrowShelf");
        assert_eq!(config.ble.min_free_memory, 20_000);
        assert_eq!(config.ble.adv_interval_us, 100_000);
        assert_eq!(config.schedule.resume_delay_secs, 60);
        assert_eq!(config.schedule.max_blocks, 20);
        assert_eq!(config.fade, FadeConfig::default());
    }

    #[test]
    fn malformed_document_is_an_error() {
        assert!(Config::parse("(fade: (steps_per_second: \"many\"))").is_err());
    }

    #[test]
    fn negative_durations_become_zero() {
        let fade = FadeConfig {
            duration_secs: -1.0,
            ..FadeConfig::default()
        };
        assert_eq!(fade.duration(), Duration::ZERO);
    }
}
