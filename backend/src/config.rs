use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

const DEFAULT_CONFIG_PATH: &str = "config/detector.yaml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub upload: UploadConfig,
    pub model: ModelConfig,
    pub face_detection: FaceDetectionConfig,
    pub video: VideoConfig,
    /// Start without classifier or face detector when their files are missing.
    pub allow_degraded: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub dir: PathBuf,
    pub max_bytes: usize,
    pub keep_uploads: bool,
    pub image_extensions: Vec<String>,
    pub video_extensions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub dir: PathBuf,
    pub file: String,
    pub confidence_threshold: f32,
    /// Width and height the classifier expects.
    pub input_size: (u32, u32),
    /// Output index holding the "fake" probability for multi-class heads.
    pub fake_class_index: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FaceDetectionConfig {
    pub model_path: PathBuf,
    pub min_face_size: u32,
    pub score_threshold: f64,
    pub pyramid_scale_factor: f32,
    pub slide_window_step: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub max_frames: usize,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            upload: UploadConfig::default(),
            model: ModelConfig::default(),
            face_detection: FaceDetectionConfig::default(),
            video: VideoConfig::default(),
            allow_degraded: false,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            workers: 4,
            cors_origins: vec![
                "http://localhost:3000".to_string(),
                "http://127.0.0.1:3000".to_string(),
            ],
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("uploads"),
            max_bytes: 100 * 1024 * 1024,
            keep_uploads: false,
            image_extensions: ["png", "jpg", "jpeg", "gif", "bmp", "tiff"]
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            video_extensions: ["mp4", "avi", "mov", "wmv", "flv", "mkv", "webm"]
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("ml_models"),
            file: "deepfake_detector_v1.pt".to_string(),
            confidence_threshold: 0.7,
            input_size: (224, 224),
            fake_class_index: 0,
        }
    }
}

impl Default for FaceDetectionConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("ml_models/seeta_fd_frontal_v1.0.bin"),
            min_face_size: 30,
            score_threshold: 2.0,
            pyramid_scale_factor: 0.8,
            slide_window_step: 4,
        }
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            max_frames: 100,
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
        }
    }
}

impl Config {
    /// Loads the YAML file named by `DETECTOR_CONFIG` (or the default path),
    /// then applies environment overrides and validates the result.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("DETECTOR_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

        let mut config = if path.exists() {
            log::info!("Loading configuration from {}", path.display());
            Self::from_file(&path)?
        } else {
            log::info!(
                "No configuration file at {}, using defaults",
                path.display()
            );
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(contents)?)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("HOST") {
            self.server.host = host;
        }
        if let Some(port) = parse_var(&lookup, "PORT")? {
            self.server.port = port;
        }
        if let Some(workers) = parse_var(&lookup, "WORKERS")? {
            self.server.workers = workers;
        }
        if let Some(dir) = lookup("UPLOAD_DIR") {
            self.upload.dir = PathBuf::from(dir);
        }
        if let Some(max_bytes) = parse_var(&lookup, "MAX_UPLOAD_BYTES")? {
            self.upload.max_bytes = max_bytes;
        }
        if let Some(keep) = parse_flag(&lookup, "KEEP_UPLOADS")? {
            self.upload.keep_uploads = keep;
        }
        if let Some(dir) = lookup("MODEL_DIR") {
            self.model.dir = PathBuf::from(dir);
        }
        if let Some(file) = lookup("MODEL_FILE") {
            self.model.file = file;
        }
        if let Some(threshold) = parse_var(&lookup, "CONFIDENCE_THRESHOLD")? {
            self.model.confidence_threshold = threshold;
        }
        if let Some(path) = lookup("FACE_MODEL_PATH") {
            self.face_detection.model_path = PathBuf::from(path);
        }
        if let Some(max_frames) = parse_var(&lookup, "MAX_FRAMES_PER_VIDEO")? {
            self.video.max_frames = max_frames;
        }
        if let Some(path) = lookup("FFMPEG_PATH") {
            self.video.ffmpeg_path = path;
        }
        if let Some(path) = lookup("FFPROBE_PATH") {
            self.video.ffprobe_path = path;
        }
        if let Some(allow) = parse_flag(&lookup, "ALLOW_DEGRADED")? {
            self.allow_degraded = allow;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let threshold = self.model.confidence_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigError::Invalid(format!(
                "confidence_threshold must be within [0, 1], got {}",
                threshold
            )));
        }
        if self.video.max_frames == 0 {
            return Err(ConfigError::Invalid(
                "video.max_frames must be greater than zero".to_string(),
            ));
        }
        let (width, height) = self.model.input_size;
        if width == 0 || height == 0 {
            return Err(ConfigError::Invalid(
                "model.input_size must be non-zero".to_string(),
            ));
        }
        if self.upload.max_bytes == 0 {
            return Err(ConfigError::Invalid(
                "upload.max_bytes must be greater than zero".to_string(),
            ));
        }
        if self.upload.image_extensions.is_empty() || self.upload.video_extensions.is_empty() {
            return Err(ConfigError::Invalid(
                "allowed extension lists must not be empty".to_string(),
            ));
        }
        if self.server.workers == 0 {
            return Err(ConfigError::Invalid(
                "server.workers must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn model_path(&self) -> PathBuf {
        self.model.dir.join(&self.model.file)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw,
            }),
        None => Ok(None),
    }
}

fn parse_flag<F>(lookup: &F, key: &str) -> Result<Option<bool>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw,
            }),
        },
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_match_service_limits() {
        let config = Config::default();
        assert_eq!(config.model.confidence_threshold, 0.7);
        assert_eq!(config.video.max_frames, 100);
        assert_eq!(config.upload.max_bytes, 100 * 1024 * 1024);
        assert_eq!(config.model.input_size, (224, 224));
        assert!(config.upload.image_extensions.contains(&"tiff".to_string()));
        assert!(config.upload.video_extensions.contains(&"webm".to_string()));
        assert!(!config.allow_degraded);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_yaml_keeps_defaults_for_missing_fields() {
        let yaml = r#"
model:
  confidence_threshold: 0.55
  input_size: [128, 96]
video:
  max_frames: 12
allow_degraded: true
"#;
        let config = Config::from_yaml_str(yaml).unwrap();
        assert_eq!(config.model.confidence_threshold, 0.55);
        assert_eq!(config.model.input_size, (128, 96));
        assert_eq!(config.model.file, "deepfake_detector_v1.pt");
        assert_eq!(config.video.max_frames, 12);
        assert_eq!(config.server.port, 5000);
        assert!(config.allow_degraded);
    }

    #[test]
    fn environment_overrides_file_values() {
        let mut config = Config::default();
        config
            .apply_overrides(lookup_from(&[
                ("PORT", "8081"),
                ("CONFIDENCE_THRESHOLD", "0.9"),
                ("UPLOAD_DIR", "/tmp/scratch"),
                ("ALLOW_DEGRADED", "yes"),
                ("MAX_FRAMES_PER_VIDEO", "10"),
            ]))
            .unwrap();

        assert_eq!(config.server.port, 8081);
        assert_eq!(config.model.confidence_threshold, 0.9);
        assert_eq!(config.upload.dir, PathBuf::from("/tmp/scratch"));
        assert_eq!(config.video.max_frames, 10);
        assert!(config.allow_degraded);
        assert_eq!(config.bind_address(), "0.0.0.0:8081");
    }

    #[test]
    fn malformed_override_is_reported_with_its_key() {
        let mut config = Config::default();
        let err = config
            .apply_overrides(lookup_from(&[("PORT", "eighty")]))
            .unwrap_err();
        match err {
            ConfigError::InvalidValue { key, value } => {
                assert_eq!(key, "PORT");
                assert_eq!(value, "eighty");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn validation_rejects_out_of_range_values() {
        let mut config = Config::default();
        config.model.confidence_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.video.max_frames = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.upload.image_extensions.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn model_path_joins_dir_and_file() {
        let config = Config::default();
        assert_eq!(
            config.model_path(),
            PathBuf::from("ml_models/deepfake_detector_v1.pt")
        );
    }
}
