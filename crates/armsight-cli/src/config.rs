//! Reads/writes `~/.armsight/config.toml`.

use armsight_perception::BridgeConfig;
use armsight_runtime::{GraspPlannerConfig, ServoConfig};
use armsight_types::DeploymentMode;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Persisted configuration stored in `~/.armsight/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// `simulation` or `hardware`.
    #[serde(default)]
    pub mode: DeploymentMode,

    /// Object class to pick up.
    #[serde(default = "default_target")]
    pub target: String,

    #[serde(default = "default_perception_interval_ms")]
    pub perception_interval_ms: u64,

    /// Grasp memory JSON.  Empty means `~/.armsight/grasp_memory.json`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub grasp_memory: String,

    #[serde(default)]
    pub servo: ServoConfig,

    #[serde(default)]
    pub planner: GraspPlannerConfig,

    #[serde(default)]
    pub bridge: BridgeConfig,
}

fn default_target() -> String {
    "bottle".to_string()
}
fn default_perception_interval_ms() -> u64 {
    100
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: DeploymentMode::default(),
            target: default_target(),
            perception_interval_ms: default_perception_interval_ms(),
            grasp_memory: String::new(),
            servo: ServoConfig::default(),
            planner: GraspPlannerConfig::default(),
            bridge: BridgeConfig::default(),
        }
    }
}

impl Config {
    /// Where the grasp memory lives for this config.
    pub fn grasp_memory_path(&self) -> PathBuf {
        if self.grasp_memory.is_empty() {
            armsight_dir_for_home(&home_dir()).join("grasp_memory.json")
        } else {
            PathBuf::from(&self.grasp_memory)
        }
    }
}

fn home_dir() -> String {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string())
}

/// Return the path to `~/.armsight/config.toml`.
pub fn config_path() -> PathBuf {
    armsight_dir_for_home(&home_dir()).join("config.toml")
}

pub(crate) fn armsight_dir_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".armsight")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let cfg: Config = toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    Ok(Some(cfg))
}

/// Apply `ARMSIGHT_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `ARMSIGHT_MODE` | `mode` (`simulation` / `hardware`) |
/// | `ARMSIGHT_TARGET` | `target` |
/// | `ARMSIGHT_LOOP_HZ` | `servo.loop_hz` |
/// | `ARMSIGHT_GRASP_MEMORY` | `grasp_memory` |
///
/// Unparseable values are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("ARMSIGHT_MODE") {
        match v.to_lowercase().as_str() {
            "simulation" | "sim" => cfg.mode = DeploymentMode::Simulation,
            "hardware" | "hw" => cfg.mode = DeploymentMode::Hardware,
            _ => {}
        }
    }
    if let Ok(v) = std::env::var("ARMSIGHT_TARGET")
        && !v.trim().is_empty()
    {
        cfg.target = v.trim().to_string();
    }
    if let Ok(v) = std::env::var("ARMSIGHT_LOOP_HZ")
        && let Ok(hz) = v.parse::<f32>()
        && hz > 0.0
    {
        cfg.servo.loop_hz = hz;
    }
    if let Ok(v) = std::env::var("ARMSIGHT_GRASP_MEMORY") {
        cfg.grasp_memory = v;
    }
}

/// Save the config to disk, creating `~/.armsight/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| format!("Failed to create config directory: {}", e))?;
    }
    let raw = toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    fs::write(path, raw).map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))
}
