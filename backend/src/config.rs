use crate::error::SyncError;
use pmuc_shared::{default_parameters, ScaledParameter};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_DEVICE_DIR: &str = "/sys/kernel/wp360-pmuc";
const DEFAULT_PARAMETERS_PATH: &str = "parameters.json";

#[derive(Clone, Debug)]
pub struct DeviceConfig {
    pub device_dir: PathBuf,
    pub poll_interval: Duration,
    pub telemetry_interval: Duration,
    /// Command prepended to `tee` for privileged writes, e.g. `sudo -n`.
    pub privilege_prefix: Vec<String>,
    pub parameters_path: PathBuf,
}

impl DeviceConfig {
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let device_dir = var("PMUC_DEVICE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DEVICE_DIR));
        let poll_interval = var("PMUC_POLL_MS")
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or_else(|| Duration::from_millis(500));
        let telemetry_interval = var("PMUC_TELEMETRY_INTERVAL_SEC")
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|s| *s > 0)
            .map(Duration::from_secs)
            .unwrap_or_else(|| Duration::from_secs(1));
        let privilege_prefix = var("PMUC_PRIVILEGE_PREFIX")
            .map(|v| v.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();
        let parameters_path = var("PMUC_PARAMETERS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(env!("CARGO_MANIFEST_DIR")).join(DEFAULT_PARAMETERS_PATH));

        Self {
            device_dir,
            poll_interval,
            telemetry_interval,
            privilege_prefix,
            parameters_path,
        }
    }
}

/// Load the parameter table, falling back to the built-in one when the file
/// does not exist.
pub fn load_parameters(path: &Path) -> Result<Vec<ScaledParameter>, SyncError> {
    if !path.exists() {
        return Ok(default_parameters());
    }
    let raw = std::fs::read_to_string(path).map_err(|source| SyncError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let parameters: Vec<ScaledParameter> = serde_json::from_str(&raw)
        .map_err(|e| SyncError::Config(format!("invalid parameter JSON in {}: {e}", path.display())))?;

    let mut seen = HashSet::new();
    for p in &parameters {
        p.validate().map_err(SyncError::Config)?;
        if !seen.insert(p.name.as_str()) {
            return Err(SyncError::Config(format!("parameter {} listed twice", p.name)));
        }
    }
    Ok(parameters)
}
