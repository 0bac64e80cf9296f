use crate::error::{DspError, Result};
use crate::monitor::MonitorConfig;
use crate::protocol::{Command, RAMP_STEP};
use crate::types::{default_presets, Preset};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// TCP port the P300 listens on for its command string protocol
pub const DEFAULT_PORT: u16 = 2202;

/// Session configuration, usually read from a JSON device file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DspConfig {
    /// Device key, prefixed onto every fader key
    #[serde(default = "default_key")]
    pub key: String,

    /// Host name or IP address of the device
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Interval between gain/mute polls while online
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Interval between ramp step commands while a button is held
    #[serde(default = "default_ramp_tick_ms")]
    pub ramp_tick_ms: u64,

    /// Gain change per ramp step, tenths of a dB
    #[serde(default = "default_ramp_step")]
    pub ramp_step: u16,

    #[serde(default = "default_presets")]
    pub presets: Vec<Preset>,

    #[serde(default)]
    pub monitor: MonitorSettings,
}

/// Health monitor settings in their file form
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorSettings {
    #[serde(default = "default_heartbeat")]
    pub heartbeat: String,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_warning_ms")]
    pub warning_ms: u64,
    #[serde(default = "default_error_ms")]
    pub error_ms: u64,
    #[serde(default = "default_offline_ms")]
    pub offline_ms: u64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            heartbeat: default_heartbeat(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            warning_ms: default_warning_ms(),
            error_ms: default_error_ms(),
            offline_ms: default_offline_ms(),
        }
    }
}

impl From<&MonitorSettings> for MonitorConfig {
    fn from(settings: &MonitorSettings) -> Self {
        Self {
            heartbeat: settings.heartbeat.clone(),
            heartbeat_interval: Duration::from_millis(settings.heartbeat_interval_ms),
            warning_after: Duration::from_millis(settings.warning_ms),
            error_after: Duration::from_millis(settings.error_ms),
            offline_after: Duration::from_millis(settings.offline_ms),
        }
    }
}

fn default_key() -> String {
    "p300".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_poll_interval_ms() -> u64 {
    5000
}

fn default_ramp_tick_ms() -> u64 {
    25
}

fn default_ramp_step() -> u16 {
    RAMP_STEP
}

fn default_heartbeat() -> String {
    Command::GetModel.encode()
}

fn default_heartbeat_interval_ms() -> u64 {
    10_000
}

fn default_warning_ms() -> u64 {
    30_000
}

fn default_error_ms() -> u64 {
    60_000
}

fn default_offline_ms() -> u64 {
    120_000
}

impl DspConfig {
    /// Config for `host` with every other field defaulted
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            key: default_key(),
            host: host.into(),
            port: DEFAULT_PORT,
            poll_interval_ms: default_poll_interval_ms(),
            ramp_tick_ms: default_ramp_tick_ms(),
            ramp_step: default_ramp_step(),
            presets: default_presets(),
            monitor: MonitorSettings::default(),
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read a JSON config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&content)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn ramp_tick(&self) -> Duration {
        Duration::from_millis(self.ramp_tick_ms)
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig::from(&self.monitor)
    }
}

/// Where an accepted address change gets written back to
pub trait ConfigStore: Send + Sync {
    fn persist_address(&self, address: &str) -> Result<()>;
}

/// Rewrites the `host` field of a JSON config file, leaving the rest alone
pub struct JsonConfigStore {
    path: PathBuf,
    // Serializes read-modify-write cycles on the file
    write_lock: Mutex<()>,
}

impl JsonConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigStore for JsonConfigStore {
    fn persist_address(&self, address: &str) -> Result<()> {
        let _guard = self.write_lock.lock();

        let content = std::fs::read_to_string(&self.path)?;
        let mut document: serde_json::Value = serde_json::from_str(&content)?;
        let object = document.as_object_mut().ok_or_else(|| {
            DspError::InvalidConfig(format!(
                "{} is not a JSON object",
                self.path.display()
            ))
        })?;
        object.insert("host".to_string(), serde_json::Value::String(address.to_string()));

        // Write beside the original, then rename over it
        let temp_path = self.path.with_extension("tmp");
        std::fs::write(&temp_path, serde_json::to_string_pretty(&document)?)?;
        std::fs::rename(&temp_path, &self.path)?;
        tracing::info!(path = %self.path.display(), address, "Persisted new device address");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_takes_defaults() {
        let config = DspConfig::from_json_str(r#"{ "host": "10.0.0.20" }"#).unwrap();
        assert_eq!(config.host, "10.0.0.20");
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.ramp_tick(), Duration::from_millis(25));
        assert_eq!(config.ramp_step, 100);
        assert_eq!(config.presets.len(), 10);
        assert_eq!(config.monitor_config(), MonitorConfig::default());
    }

    #[test]
    fn test_config_overrides() {
        let config = DspConfig::from_json_str(
            r#"{
                "key": "room-dsp",
                "host": "dsp.local",
                "port": 23,
                "pollIntervalMs": 8000,
                "presets": [{ "name": "Lecture" }, { "name": "Panel" }],
                "monitor": { "warningMs": 10000 }
            }"#,
        )
        .unwrap();
        assert_eq!(config.key, "room-dsp");
        assert_eq!(config.port, 23);
        assert_eq!(config.poll_interval(), Duration::from_secs(8));
        assert_eq!(config.presets, vec![Preset::new("Lecture"), Preset::new("Panel")]);
        assert_eq!(config.monitor_config().warning_after, Duration::from_secs(10));
        assert_eq!(config.monitor_config().offline_after, Duration::from_secs(120));
    }

    #[test]
    fn test_missing_host_is_an_error() {
        assert!(matches!(
            DspConfig::from_json_str(r#"{ "port": 2202 }"#),
            Err(DspError::Json(_))
        ));
    }

    #[test]
    fn test_json_store_rewrites_host_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dsp.json");
        std::fs::write(&path, r#"{ "host": "10.0.0.20", "key": "room-dsp", "extra": [1, 2] }"#).unwrap();

        let store = JsonConfigStore::new(&path);
        store.persist_address("10.0.0.99").unwrap();

        let config = DspConfig::load(&path).unwrap();
        assert_eq!(config.host, "10.0.0.99");
        assert_eq!(config.key, "room-dsp");

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["extra"], serde_json::json!([1, 2]));
    }

    #[test]
    fn test_json_store_replaces_file_in_one_step() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dsp.json");
        std::fs::write(&path, r#"{ "host": "10.0.0.20" }"#).unwrap();

        JsonConfigStore::new(&path).persist_address("10.0.0.99").unwrap();

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("dsp.json")]);
        assert_eq!(DspConfig::load(&path).unwrap().host, "10.0.0.99");
    }

    #[test]
    fn test_json_store_leaves_non_object_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dsp.json");
        std::fs::write(&path, "[1, 2]").unwrap();

        assert!(matches!(
            JsonConfigStore::new(&path).persist_address("10.0.0.99"),
            Err(DspError::InvalidConfig(_))
        ));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[1, 2]");
        assert!(!path.with_extension("tmp").exists());
    }
}
