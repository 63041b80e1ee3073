use crate::session::{LoopSettings, ScanLimits};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid setting: {0}")]
    Invalid(String),
}

/// Daemon configuration.
///
/// Sources, later ones winning: built-in defaults, an optional TOML file,
/// `ATTENDIFY_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP listen address.
    pub bind_addr: SocketAddr,
    /// V4L2 device path.
    pub camera_device: String,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Maximum signature distance for a positive match.
    pub tolerance: f32,
    /// Pause after a failed frame read before pulling again.
    pub retry_delay_ms: u64,
    /// Frame budget for a one-shot scan.
    pub scan_max_frames: usize,
    /// Wall-clock budget for a one-shot scan.
    pub scan_timeout_secs: u64,
    /// Log per-frame overlays.
    pub render: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 5001)),
            camera_device: "/dev/video0".to_string(),
            model_dir: attendify_core::default_model_dir(),
            tolerance: attendify_core::DEFAULT_TOLERANCE,
            retry_delay_ms: 50,
            scan_max_frames: 300,
            scan_timeout_secs: 30,
            render: false,
        }
    }
}

impl Config {
    /// Load from `path` (or `$ATTENDIFY_CONFIG`) if given, then apply env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let env_path = std::env::var_os("ATTENDIFY_CONFIG").map(PathBuf::from);
        let mut config = match path.map(Path::to_path_buf).or(env_path) {
            Some(path) => {
                let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                    path: path.clone(),
                    source,
                })?;
                tracing::info!(path = %path.display(), "loaded config file");
                Self::from_toml_str(&text)?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Apply `ATTENDIFY_*` overrides from `lookup`. Unparseable values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        override_with(&mut self.bind_addr, &lookup, "ATTENDIFY_BIND_ADDR");
        if let Some(v) = lookup("ATTENDIFY_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = lookup("ATTENDIFY_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        override_with(&mut self.tolerance, &lookup, "ATTENDIFY_TOLERANCE");
        override_with(&mut self.retry_delay_ms, &lookup, "ATTENDIFY_RETRY_DELAY_MS");
        override_with(&mut self.scan_max_frames, &lookup, "ATTENDIFY_SCAN_MAX_FRAMES");
        override_with(&mut self.scan_timeout_secs, &lookup, "ATTENDIFY_SCAN_TIMEOUT_SECS");
        if let Some(v) = lookup("ATTENDIFY_RENDER") {
            self.render = v != "0" && !v.eq_ignore_ascii_case("false");
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "tolerance must be a positive number, got {}",
                self.tolerance
            )));
        }
        Ok(())
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> String {
        self.model_dir.join("det_10g.onnx").to_string_lossy().into_owned()
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> String {
        self.model_dir.join("w600k_r50.onnx").to_string_lossy().into_owned()
    }

    pub fn loop_settings(&self) -> LoopSettings {
        LoopSettings {
            tolerance: self.tolerance,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }

    pub fn scan_limits(&self) -> ScanLimits {
        ScanLimits {
            max_frames: Some(self.scan_max_frames),
            timeout: Some(Duration::from_secs(self.scan_timeout_secs)),
        }
    }
}

fn override_with<T: FromStr>(slot: &mut T, lookup: &impl Fn(&str) -> Option<String>, key: &str) {
    if let Some(v) = lookup(key).and_then(|v| v.trim().parse().ok()) {
        *slot = v;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.bind_addr.port(), 5001);
        assert!((config.tolerance - 0.4).abs() < 1e-6);
        assert!(!config.render);
    }

    #[test]
    fn test_toml_partial_file() {
        let config = Config::from_toml_str(
            r#"
            camera_device = "/dev/video4"
            tolerance = 0.5
            "#,
        )
        .unwrap();
        assert_eq!(config.camera_device, "/dev/video4");
        assert!((config.tolerance - 0.5).abs() < 1e-6);
        assert_eq!(config.scan_max_frames, 300);
    }

    #[test]
    fn test_toml_unknown_type_rejected() {
        assert!(matches!(
            Config::from_toml_str("tolerance = \"strict\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("ATTENDIFY_BIND_ADDR", "127.0.0.1:8080"),
            ("ATTENDIFY_TOLERANCE", "0.35"),
            ("ATTENDIFY_SCAN_MAX_FRAMES", "not-a-number"),
            ("ATTENDIFY_RENDER", "1"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.bind_addr, "127.0.0.1:8080".parse::<SocketAddr>().unwrap());
        assert!((config.tolerance - 0.35).abs() < 1e-6);
        assert_eq!(config.scan_max_frames, 300);
        assert!(config.render);
    }

    #[test]
    fn test_validate_rejects_bad_tolerance() {
        let config = Config {
            tolerance: 0.0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_model_paths() {
        let config = Config {
            model_dir: PathBuf::from("/opt/models"),
            ..Config::default()
        };
        assert_eq!(config.scrfd_model_path(), "/opt/models/det_10g.onnx");
        assert_eq!(config.arcface_model_path(), "/opt/models/w600k_r50.onnx");
    }
}
