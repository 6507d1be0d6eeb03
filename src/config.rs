use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::alert::{DEFAULT_MESSAGE, DEFAULT_TARGET_LABEL, DEFAULT_THRESHOLD, LINE_NOTIFY_URL};
use crate::detect::yolo::DecodeOptions;
use crate::history::DEFAULT_LOG_LIMIT;
use crate::ingest::CameraConfig;
use crate::pipeline::{FrameErrorPolicy, DEFAULT_MAX_CONSECUTIVE_SKIPS};
use crate::stream::DEFAULT_JPEG_QUALITY;

const DEFAULT_HTTP_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_MODEL_PATH: &str = "best_v200.onnx";
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_QUEUE_CAPACITY: usize = 16;
const DEFAULT_NOTIFY_TIMEOUT_SECS: u64 = 10;
const DEFAULT_STORE_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct WatchdConfigFile {
    http: Option<HttpConfigFile>,
    camera: Option<CameraConfigFile>,
    model: Option<ModelConfigFile>,
    alert: Option<AlertConfigFile>,
    stream: Option<StreamConfigFile>,
    store: Option<StoreConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct HttpConfigFile {
    addr: Option<String>,
    log_limit: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    source: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    path: Option<PathBuf>,
    labels: Option<Vec<String>>,
    input_size: Option<u32>,
    nms_threshold: Option<f32>,
    min_confidence: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct AlertConfigFile {
    target_label: Option<String>,
    threshold: Option<f32>,
    message: Option<String>,
    notify_url: Option<String>,
    token: Option<String>,
    cooldown_secs: Option<u64>,
    queue_capacity: Option<usize>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    jpeg_quality: Option<u8>,
    on_frame_error: Option<String>,
    max_consecutive_skips: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct StoreConfigFile {
    credentials_path: Option<PathBuf>,
    timeout_secs: Option<u64>,
}

/// Daemon configuration: file, then environment, then validation.
#[derive(Debug, Clone)]
pub struct WatchdConfig {
    pub http_addr: String,
    pub log_limit: usize,
    pub camera: CameraConfig,
    pub model: ModelSettings,
    pub alert: AlertSettings,
    pub stream: StreamFileSettings,
    pub store: StoreSettings,
}

#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub path: PathBuf,
    pub labels: Vec<String>,
    pub input_size: u32,
    pub decode: DecodeOptions,
}

#[derive(Clone)]
pub struct AlertSettings {
    pub target_label: String,
    pub threshold: f32,
    pub message: String,
    pub notify_url: String,
    pub token: Option<String>,
    pub cooldown: Duration,
    pub queue_capacity: usize,
    pub timeout: Duration,
}

impl std::fmt::Debug for AlertSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertSettings")
            .field("target_label", &self.target_label)
            .field("threshold", &self.threshold)
            .field("message", &self.message)
            .field("notify_url", &self.notify_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("cooldown", &self.cooldown)
            .field("queue_capacity", &self.queue_capacity)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StreamFileSettings {
    pub jpeg_quality: u8,
    pub on_frame_error: FrameErrorPolicy,
    pub max_consecutive_skips: u32,
}

#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub credentials_path: Option<PathBuf>,
    pub timeout: Duration,
}

impl WatchdConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("INSECT_WATCH_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: WatchdConfigFile) -> Result<Self> {
        let http = file.http.unwrap_or_default();
        let camera = file.camera.unwrap_or_default();
        let model = file.model.unwrap_or_default();
        let alert = file.alert.unwrap_or_default();
        let stream = file.stream.unwrap_or_default();
        let store = file.store.unwrap_or_default();

        let camera_defaults = CameraConfig::default();
        let decode_defaults = DecodeOptions::default();
        let on_frame_error = match stream.on_frame_error {
            Some(raw) => raw.parse()?,
            None => FrameErrorPolicy::default(),
        };

        Ok(Self {
            http_addr: http.addr.unwrap_or_else(|| DEFAULT_HTTP_ADDR.to_string()),
            log_limit: http.log_limit.unwrap_or(DEFAULT_LOG_LIMIT),
            camera: CameraConfig {
                source: camera.source.unwrap_or(camera_defaults.source),
                target_fps: camera.target_fps.unwrap_or(camera_defaults.target_fps),
                width: camera.width.unwrap_or(camera_defaults.width),
                height: camera.height.unwrap_or(camera_defaults.height),
            },
            model: ModelSettings {
                path: model
                    .path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH)),
                labels: model
                    .labels
                    .unwrap_or_else(|| vec![DEFAULT_TARGET_LABEL.to_string()]),
                input_size: model.input_size.unwrap_or(DEFAULT_INPUT_SIZE),
                decode: DecodeOptions {
                    min_confidence: model
                        .min_confidence
                        .unwrap_or(decode_defaults.min_confidence),
                    nms_threshold: model
                        .nms_threshold
                        .unwrap_or(decode_defaults.nms_threshold),
                },
            },
            alert: AlertSettings {
                target_label: alert
                    .target_label
                    .unwrap_or_else(|| DEFAULT_TARGET_LABEL.to_string()),
                threshold: alert.threshold.unwrap_or(DEFAULT_THRESHOLD),
                message: alert.message.unwrap_or_else(|| DEFAULT_MESSAGE.to_string()),
                notify_url: alert
                    .notify_url
                    .unwrap_or_else(|| LINE_NOTIFY_URL.to_string()),
                token: alert.token.filter(|t| !t.trim().is_empty()),
                cooldown: Duration::from_secs(alert.cooldown_secs.unwrap_or(0)),
                queue_capacity: alert.queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY),
                timeout: Duration::from_secs(
                    alert.timeout_secs.unwrap_or(DEFAULT_NOTIFY_TIMEOUT_SECS),
                ),
            },
            stream: StreamFileSettings {
                jpeg_quality: stream.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
                on_frame_error,
                max_consecutive_skips: stream
                    .max_consecutive_skips
                    .unwrap_or(DEFAULT_MAX_CONSECUTIVE_SKIPS),
            },
            store: StoreSettings {
                credentials_path: store.credentials_path,
                timeout: Duration::from_secs(
                    store.timeout_secs.unwrap_or(DEFAULT_STORE_TIMEOUT_SECS),
                ),
            },
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(addr) = env_non_empty("INSECT_WATCH_ADDR") {
            self.http_addr = addr;
        }
        if let Some(source) = env_non_empty("INSECT_WATCH_CAMERA") {
            self.camera.source = source;
        }
        if let Some(path) = env_non_empty("INSECT_WATCH_MODEL") {
            self.model.path = PathBuf::from(path);
        }
        if let Some(threshold) = env_non_empty("INSECT_WATCH_THRESHOLD") {
            self.alert.threshold = threshold
                .trim()
                .parse()
                .map_err(|_| anyhow!("INSECT_WATCH_THRESHOLD must be a number"))?;
        }
        if let Some(token) = env_non_empty("INSECT_WATCH_NOTIFY_TOKEN") {
            self.alert.token = Some(token);
        }
        if let Some(path) = env_non_empty("INSECT_WATCH_CREDENTIALS") {
            self.store.credentials_path = Some(PathBuf::from(path));
        }
        if let Some(cooldown) = env_non_empty("INSECT_WATCH_COOLDOWN_SECS") {
            let seconds: u64 = cooldown.trim().parse().map_err(|_| {
                anyhow!("INSECT_WATCH_COOLDOWN_SECS must be an integer number of seconds")
            })?;
            self.alert.cooldown = Duration::from_secs(seconds);
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.alert.threshold) {
            return Err(anyhow!("alert threshold must be within [0, 1]"));
        }
        self.alert.target_label = self.alert.target_label.trim().to_string();
        if self.alert.target_label.is_empty() {
            return Err(anyhow!("alert target_label must not be empty"));
        }
        if self.alert.queue_capacity == 0 {
            return Err(anyhow!("alert queue_capacity must be greater than zero"));
        }
        if !(1..=100).contains(&self.stream.jpeg_quality) {
            return Err(anyhow!("stream jpeg_quality must be within 1..=100"));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera width and height must be non-zero"));
        }
        if self.model.labels.is_empty() {
            return Err(anyhow!("model labels must not be empty"));
        }
        if self.model.input_size == 0 {
            return Err(anyhow!("model input_size must be greater than zero"));
        }
        if self.log_limit == 0 {
            return Err(anyhow!("http log_limit must be greater than zero"));
        }
        Ok(())
    }
}

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<WatchdConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
