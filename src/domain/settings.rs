use crate::domain::error::BedError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Logging for the controller. Console output goes to stderr; the rolling
/// file always records module targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    /// Level for the btleplug backend, which is chatty at debug.
    #[serde(default = "default_bluetooth_level")]
    pub bluetooth_level: String,
    #[serde(default = "default_true")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_false")]
    pub show_file_line: bool,
    #[serde(default = "default_false")]
    pub show_thread_ids: bool,
    #[serde(default = "default_false")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            bluetooth_level: default_bluetooth_level(),
            file_logging_enabled: default_true(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_false(),
            show_thread_ids: default_false(),
            show_target: default_false(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_bluetooth_level() -> String {
    "warn".to_string()
}
fn default_log_dir() -> String {
    dirs::data_local_dir()
        .map(|dir| dir.join("LinakBed").join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"))
        .to_string_lossy()
        .into_owned()
}
fn default_prefix() -> String {
    "linak_bed".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Hardware address of the bed, e.g. "C4:2B:11:09:8E:AA".
    #[serde(default)]
    pub address: String,
    #[serde(default = "default_name")]
    pub name: String,

    // Calibration: pulses needed to travel 0% -> 100%
    #[serde(default = "default_head_pulses")]
    pub head_pulses_full_travel: u32,
    #[serde(default = "default_foot_pulses")]
    pub foot_pulses_full_travel: u32,

    // Movement
    #[serde(default = "default_tolerance")]
    pub position_tolerance: f64,
    #[serde(default = "default_max_pulses")]
    pub max_pulses: u32,
    #[serde(default = "default_pulse_interval_ms")]
    pub pulse_interval_ms: u64,
    #[serde(default = "default_true")]
    pub combined_commands: bool,
    #[serde(default = "default_flat_overdrive")]
    pub flat_overdrive_percent: f64,

    // Connection
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_connect_retry_delay_ms")]
    pub connect_retry_delay_ms: u64,
    #[serde(default = "default_max_connect_attempts")]
    pub max_connect_attempts: u32,
    #[serde(default = "default_discovery_timeout_ms")]
    pub discovery_timeout_ms: u64,
    #[serde(default = "default_post_connect_delay_ms")]
    pub post_connect_delay_ms: u64,
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
    #[serde(default = "default_scan_window_ms")]
    pub scan_window_ms: u64,

    // Idle disconnect
    #[serde(default = "default_idle_window_ms")]
    pub idle_window_ms: u64,
    #[serde(default = "default_recent_activity_ms")]
    pub recent_activity_ms: u64,

    // Dry run against an in-memory bed
    #[serde(default = "default_false")]
    pub simulate: bool,

    #[serde(default)]
    pub log_settings: LogSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            address: String::new(),
            name: default_name(),
            head_pulses_full_travel: default_head_pulses(),
            foot_pulses_full_travel: default_foot_pulses(),
            position_tolerance: default_tolerance(),
            max_pulses: default_max_pulses(),
            pulse_interval_ms: default_pulse_interval_ms(),
            combined_commands: true,
            flat_overdrive_percent: default_flat_overdrive(),
            connect_timeout_ms: default_connect_timeout_ms(),
            connect_retry_delay_ms: default_connect_retry_delay_ms(),
            max_connect_attempts: default_max_connect_attempts(),
            discovery_timeout_ms: default_discovery_timeout_ms(),
            post_connect_delay_ms: default_post_connect_delay_ms(),
            write_timeout_ms: default_write_timeout_ms(),
            scan_window_ms: default_scan_window_ms(),
            idle_window_ms: default_idle_window_ms(),
            recent_activity_ms: default_recent_activity_ms(),
            simulate: false,
            log_settings: LogSettings::default(),
        }
    }
}

fn default_name() -> String {
    "Bed".to_string()
}
fn default_head_pulses() -> u32 {
    130
}
fn default_foot_pulses() -> u32 {
    95
}
fn default_tolerance() -> f64 {
    1.5
}
fn default_max_pulses() -> u32 {
    500
}
fn default_pulse_interval_ms() -> u64 {
    100
}
fn default_flat_overdrive() -> f64 {
    50.0
}
fn default_connect_timeout_ms() -> u64 {
    10_000
}
fn default_connect_retry_delay_ms() -> u64 {
    2_000
}
fn default_max_connect_attempts() -> u32 {
    3
}
fn default_discovery_timeout_ms() -> u64 {
    3_000
}
fn default_post_connect_delay_ms() -> u64 {
    300
}
fn default_write_timeout_ms() -> u64 {
    2_000
}
fn default_scan_window_ms() -> u64 {
    5_000
}
fn default_idle_window_ms() -> u64 {
    20_000
}
fn default_recent_activity_ms() -> u64 {
    4_000
}

impl Settings {
    /// Runtime policy for the session controller.
    pub fn session_policy(&self) -> Result<SessionPolicy, BedError> {
        if self.head_pulses_full_travel == 0 || self.foot_pulses_full_travel == 0 {
            return Err(BedError::InvalidSettings(
                "pulses per full travel must be non-zero".into(),
            ));
        }
        let policy = self.build_policy();
        policy.validate()?;
        Ok(policy)
    }

    fn build_policy(&self) -> SessionPolicy {
        SessionPolicy {
            head_step: 100.0 / self.head_pulses_full_travel as f64,
            feet_step: 100.0 / self.foot_pulses_full_travel as f64,
            position_tolerance: self.position_tolerance,
            max_pulses: self.max_pulses,
            pulse_interval: Duration::from_millis(self.pulse_interval_ms),
            combined_commands: self.combined_commands,
            flat_overdrive: self.flat_overdrive_percent,
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            connect_retry_delay: Duration::from_millis(self.connect_retry_delay_ms),
            max_connect_attempts: self.max_connect_attempts,
            discovery_timeout: Duration::from_millis(self.discovery_timeout_ms),
            post_connect_delay: Duration::from_millis(self.post_connect_delay_ms),
            write_timeout: Duration::from_millis(self.write_timeout_ms),
            idle_window: Duration::from_millis(self.idle_window_ms),
            recent_activity: Duration::from_millis(self.recent_activity_ms),
        }
    }
}

/// Tunable constants of the session controller.
#[derive(Debug, Clone)]
pub struct SessionPolicy {
    pub head_step: f64,
    pub feet_step: f64,
    pub position_tolerance: f64,
    pub max_pulses: u32,
    pub pulse_interval: Duration,
    pub combined_commands: bool,
    pub flat_overdrive: f64,
    pub connect_timeout: Duration,
    pub connect_retry_delay: Duration,
    pub max_connect_attempts: u32,
    pub discovery_timeout: Duration,
    pub post_connect_delay: Duration,
    pub write_timeout: Duration,
    pub idle_window: Duration,
    pub recent_activity: Duration,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Settings::default().build_policy()
    }
}

impl SessionPolicy {
    pub fn validate(&self) -> Result<(), BedError> {
        let invalid = |msg: &str| Err(BedError::InvalidSettings(msg.to_string()));

        if !(self.head_step > 0.0 && self.head_step <= 100.0)
            || !(self.feet_step > 0.0 && self.feet_step <= 100.0)
        {
            return invalid("step sizes must be within (0, 100]");
        }
        if !(self.position_tolerance >= 0.0) {
            return invalid("position tolerance must be non-negative");
        }
        if self.max_connect_attempts == 0 {
            return invalid("at least one connect attempt is required");
        }
        if self.recent_activity >= self.idle_window {
            return invalid("recent-activity threshold must be shorter than the idle window");
        }
        // A loop between two writes must still count as recent activity.
        if self.pulse_interval + self.write_timeout >= self.recent_activity {
            return invalid("pulse interval plus write timeout must be shorter than the recent-activity threshold");
        }
        if !(self.flat_overdrive >= 0.0) {
            return invalid("flat overdrive must be non-negative");
        }
        if self.head_step.max(self.feet_step) > 2.0 * self.position_tolerance {
            tracing::warn!(
                "Step size exceeds twice the tolerance ({:.2} > {:.2}); loops may hunt around the target",
                self.head_step.max(self.feet_step),
                2.0 * self.position_tolerance
            );
        }
        Ok(())
    }
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::load(settings_path))
    }

    /// Load from an explicit path, falling back to defaults when the file is missing or unreadable.
    pub fn load(settings_path: PathBuf) -> Self {
        let settings = match Self::load_from_file(&settings_path) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::debug!(
                    "Using default settings ({}): {}",
                    settings_path.display(),
                    e
                );
                Settings::default()
            }
        };

        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("LinakBed");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn set_address(&mut self, address: &str) -> anyhow::Result<()> {
        let address = address.trim().to_uppercase();
        if self.settings.address != address {
            self.settings.address = address;
            self.save()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_matches_calibration() {
        let policy = Settings::default().session_policy().unwrap();
        assert!((policy.head_step - 100.0 / 130.0).abs() < 1e-9);
        assert!((policy.feet_step - 100.0 / 95.0).abs() < 1e-9);
        assert_eq!(policy.max_pulses, 500);
        assert_eq!(policy.idle_window, Duration::from_secs(20));
        assert_eq!(policy.recent_activity, Duration::from_secs(4));
        assert_eq!(policy.max_connect_attempts, 3);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{ "address": "AA:BB:CC:DD:EE:FF", "max_pulses": 42 }"#)
                .unwrap();
        assert_eq!(settings.address, "AA:BB:CC:DD:EE:FF");
        assert_eq!(settings.max_pulses, 42);
        assert_eq!(settings.head_pulses_full_travel, 130);
        assert_eq!(settings.log_settings.level, "info");
    }

    #[test]
    fn test_invalid_policy_rejected() {
        let mut settings = Settings::default();
        settings.foot_pulses_full_travel = 0;
        assert!(matches!(
            settings.session_policy(),
            Err(BedError::InvalidSettings(_))
        ));

        let mut settings = Settings::default();
        settings.recent_activity_ms = settings.idle_window_ms;
        assert!(settings.session_policy().is_err());
    }

    #[test]
    fn test_slow_writes_must_fit_activity_window() {
        let mut settings = Settings::default();
        settings.write_timeout_ms = 3_950;
        assert!(matches!(
            settings.session_policy(),
            Err(BedError::InvalidSettings(_))
        ));

        settings.write_timeout_ms = 3_000;
        assert!(settings.session_policy().is_ok());
    }

    #[test]
    fn test_load_missing_file_falls_back() {
        let path = std::env::temp_dir().join("linak_bed_missing_settings_test.json");
        let _ = fs::remove_file(&path);
        let service = SettingsService::load(path.clone());
        assert_eq!(service.path(), path.as_path());
        assert_eq!(service.get().max_connect_attempts, 3);
    }

    #[test]
    fn test_save_and_reload() {
        let path = std::env::temp_dir().join(format!(
            "linak_bed_settings_test_{}.json",
            std::process::id()
        ));
        let mut service = SettingsService::load(path.clone());
        service.set_address(" c4:2b:11:09:8e:aa ").unwrap();

        let reloaded = SettingsService::load(path.clone());
        assert_eq!(reloaded.get().address, "C4:2B:11:09:8E:AA");
        let _ = fs::remove_file(&path);
    }
}
