use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::classify::InferenceMode;
use crate::frame::{Rotation, DEFAULT_JPEG_QUALITY};
use crate::gesture::{DebounceConfig, PhrasePair, PhraseTable};

const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:5000";
const DEFAULT_CAMERA_URL: &str = "stub://camera";
const DEFAULT_CAMERA_WIDTH: u32 = 320;
const DEFAULT_CAMERA_HEIGHT: u32 = 320;
const DEFAULT_TARGET_FPS: u32 = 10;
const DEFAULT_MODEL_INPUT: u32 = 96;
const DEFAULT_MIN_BOX_SCORE: f32 = 0.5;
const DEFAULT_LOCALE: &str = "en";
const DEFAULT_TOKEN_ENV: &str = "HOME_ASSISTANT_KEY";
const DEFAULT_HUB_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_DISPATCH_QUEUE: usize = 4;
const DEFAULT_FRAME_INTERVAL_MS: u64 = 100;
const DEFAULT_METRICS_INTERVAL_MS: u64 = 100;
const DEFAULT_MAX_CLIENTS: usize = 16;

#[derive(Debug, Deserialize, Default)]
struct GestureHubConfigFile {
    camera: Option<CameraConfigFile>,
    model: Option<ModelConfigFile>,
    gesture: Option<GestureConfigFile>,
    hub: Option<HubConfigFile>,
    stream: Option<StreamConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    url: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    rotation: Option<u32>,
    target_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    backend: Option<BackendKind>,
    path: Option<PathBuf>,
    repeat_script: Option<bool>,
    labels: Option<Vec<String>>,
    mode: Option<InferenceMode>,
    input_width: Option<u32>,
    input_height: Option<u32>,
    min_box_score: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct GestureConfigFile {
    confidence_threshold: Option<f32>,
    trust_value: Option<u32>,
    neutral_threshold: Option<u32>,
    targets: Option<Vec<String>>,
    neutral_label: Option<String>,
    start_armed: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct HubConfigFile {
    url: Option<String>,
    token_env: Option<String>,
    timeout_ms: Option<u64>,
    queue_capacity: Option<usize>,
    locale: Option<String>,
    phrases: Option<BTreeMap<String, PhrasePair>>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    listen_addr: Option<String>,
    frame_interval_ms: Option<u64>,
    metrics_interval_ms: Option<u64>,
    jpeg_quality: Option<u8>,
    max_clients: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct GestureHubConfig {
    pub camera: CameraSettings,
    pub model: ModelSettings,
    pub gesture: DebounceConfig,
    pub hub: HubSettings,
    pub stream: StreamSettings,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub rotation: Rotation,
    pub target_fps: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Scripted,
    Tract,
}

#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub backend: BackendKind,
    /// ONNX model for `tract`, JSON script for `scripted` (built-in demo when unset).
    pub path: Option<PathBuf>,
    pub repeat_script: bool,
    pub labels: Vec<String>,
    pub mode: InferenceMode,
    pub input_width: u32,
    pub input_height: u32,
    pub min_box_score: f32,
}

#[derive(Debug, Clone)]
pub struct HubSettings {
    /// Command webhook. Commands are only logged when unset.
    pub url: Option<String>,
    pub token_env: String,
    pub token: Option<String>,
    pub timeout: Duration,
    pub queue_capacity: usize,
    pub locale: String,
    /// Added to or replacing entries of the built-in table for `locale`.
    pub phrases: BTreeMap<String, PhrasePair>,
}

impl HubSettings {
    pub fn phrase_table(&self) -> Result<PhraseTable> {
        let mut table = PhraseTable::builtin(&self.locale)?;
        for (target, pair) in &self.phrases {
            table.insert(target.clone(), pair.clone());
        }
        Ok(table)
    }
}

#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub listen_addr: String,
    pub frame_interval: Duration,
    pub metrics_interval: Duration,
    pub jpeg_quality: u8,
    pub max_clients: usize,
}

impl GestureHubConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("GESTURE_HUB_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => GestureHubConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: GestureHubConfigFile) -> Result<Self> {
        let camera_file = file.camera.unwrap_or_default();
        let camera = CameraSettings {
            url: camera_file
                .url
                .unwrap_or_else(|| DEFAULT_CAMERA_URL.to_string()),
            width: camera_file.width.unwrap_or(DEFAULT_CAMERA_WIDTH),
            height: camera_file.height.unwrap_or(DEFAULT_CAMERA_HEIGHT),
            rotation: Rotation::from_degrees(camera_file.rotation.unwrap_or(0))?,
            target_fps: camera_file.target_fps.unwrap_or(DEFAULT_TARGET_FPS),
        };

        let model_file = file.model.unwrap_or_default();
        let model = ModelSettings {
            backend: model_file.backend.unwrap_or(BackendKind::Scripted),
            path: model_file.path,
            repeat_script: model_file.repeat_script.unwrap_or(true),
            labels: model_file.labels.unwrap_or_else(|| {
                ["ac", "light", "other", "tv"]
                    .iter()
                    .map(|label| label.to_string())
                    .collect()
            }),
            mode: model_file.mode.unwrap_or_default(),
            input_width: model_file.input_width.unwrap_or(DEFAULT_MODEL_INPUT),
            input_height: model_file.input_height.unwrap_or(DEFAULT_MODEL_INPUT),
            min_box_score: model_file.min_box_score.unwrap_or(DEFAULT_MIN_BOX_SCORE),
        };

        let gesture_file = file.gesture.unwrap_or_default();
        let defaults = DebounceConfig::default();
        let gesture = DebounceConfig {
            confidence_threshold: gesture_file
                .confidence_threshold
                .unwrap_or(defaults.confidence_threshold),
            trust_value: gesture_file.trust_value.unwrap_or(defaults.trust_value),
            neutral_threshold: gesture_file
                .neutral_threshold
                .unwrap_or(defaults.neutral_threshold),
            targets: gesture_file.targets.unwrap_or(defaults.targets),
            neutral_label: gesture_file.neutral_label.unwrap_or(defaults.neutral_label),
            start_armed: gesture_file.start_armed.unwrap_or(defaults.start_armed),
        };

        let hub_file = file.hub.unwrap_or_default();
        let locale = hub_file
            .locale
            .unwrap_or_else(|| DEFAULT_LOCALE.to_string());
        let hub = HubSettings {
            url: hub_file.url.filter(|url| !url.trim().is_empty()),
            token_env: hub_file
                .token_env
                .unwrap_or_else(|| DEFAULT_TOKEN_ENV.to_string()),
            token: None,
            timeout: Duration::from_millis(hub_file.timeout_ms.unwrap_or(DEFAULT_HUB_TIMEOUT_MS)),
            queue_capacity: hub_file.queue_capacity.unwrap_or(DEFAULT_DISPATCH_QUEUE),
            locale,
            phrases: hub_file.phrases.unwrap_or_default(),
        };

        let stream_file = file.stream.unwrap_or_default();
        let stream = StreamSettings {
            listen_addr: stream_file
                .listen_addr
                .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string()),
            frame_interval: Duration::from_millis(
                stream_file
                    .frame_interval_ms
                    .unwrap_or(DEFAULT_FRAME_INTERVAL_MS),
            ),
            metrics_interval: Duration::from_millis(
                stream_file
                    .metrics_interval_ms
                    .unwrap_or(DEFAULT_METRICS_INTERVAL_MS),
            ),
            jpeg_quality: stream_file.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
            max_clients: stream_file.max_clients.unwrap_or(DEFAULT_MAX_CLIENTS),
        };

        Ok(Self {
            camera,
            model,
            gesture,
            hub,
            stream,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(addr) = env_value("GESTURE_HUB_LISTEN_ADDR") {
            self.stream.listen_addr = addr;
        }
        if let Some(url) = env_value("GESTURE_HUB_CAMERA_URL") {
            self.camera.url = url;
        }
        if let Some(rotation) = env_value("GESTURE_HUB_ROTATION") {
            let degrees: u32 = rotation
                .parse()
                .map_err(|_| anyhow!("GESTURE_HUB_ROTATION must be 0, 90, 180 or 270"))?;
            self.camera.rotation = Rotation::from_degrees(degrees)?;
        }
        if let Some(path) = env_value("GESTURE_HUB_MODEL_PATH") {
            self.model.path = Some(PathBuf::from(path));
        }
        if let Some(url) = env_value("GESTURE_HUB_HUB_URL") {
            self.hub.url = Some(url);
        }
        if let Some(locale) = env_value("GESTURE_HUB_LOCALE") {
            self.hub.locale = locale;
        }
        if let Some(targets) = env_value("GESTURE_HUB_TARGETS") {
            let parsed = split_csv(&targets);
            if !parsed.is_empty() {
                self.gesture.targets = parsed;
            }
        }
        if let Some(value) = env_value("GESTURE_HUB_CONFIDENCE_THRESHOLD") {
            self.gesture.confidence_threshold = value.parse().map_err(|_| {
                anyhow!("GESTURE_HUB_CONFIDENCE_THRESHOLD must be a number between 0 and 1")
            })?;
        }
        if let Some(value) = env_value("GESTURE_HUB_TRUST_VALUE") {
            self.gesture.trust_value = value
                .parse()
                .map_err(|_| anyhow!("GESTURE_HUB_TRUST_VALUE must be a non-negative integer"))?;
        }
        if let Some(value) = env_value("GESTURE_HUB_NEUTRAL_THRESHOLD") {
            self.gesture.neutral_threshold = value.parse().map_err(|_| {
                anyhow!("GESTURE_HUB_NEUTRAL_THRESHOLD must be a non-negative integer")
            })?;
        }
        self.hub.token = env_value(&self.hub.token_env);
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        self.gesture.validate()?;

        let phrases = self.hub.phrase_table()?;
        let missing = phrases.missing_targets(&self.gesture.targets);
        if !missing.is_empty() {
            return Err(anyhow!(
                "no '{}' phrases for target(s): {}",
                phrases.locale(),
                missing.join(", ")
            ));
        }

        if let Some(hub_url) = &self.hub.url {
            let parsed = url::Url::parse(hub_url)
                .with_context(|| format!("invalid hub url {}", hub_url))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(anyhow!("hub url must be http or https, got {}", hub_url));
            }
        }
        if self.hub.queue_capacity == 0 {
            return Err(anyhow!("hub.queue_capacity must be greater than zero"));
        }
        if self.hub.timeout.is_zero() {
            return Err(anyhow!("hub.timeout_ms must be greater than zero"));
        }

        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera resolution must be non-zero"));
        }
        if self.camera.target_fps == 0 {
            return Err(anyhow!("camera.target_fps must be greater than zero"));
        }
        if self.model.input_width == 0 || self.model.input_height == 0 {
            return Err(anyhow!("model input size must be non-zero"));
        }
        if self.stream.frame_interval.is_zero() || self.stream.metrics_interval.is_zero() {
            return Err(anyhow!("stream intervals must be greater than zero"));
        }
        if !(1..=100).contains(&self.stream.jpeg_quality) {
            return Err(anyhow!("stream.jpeg_quality must be within 1..=100"));
        }
        if self.stream.max_clients == 0 {
            return Err(anyhow!("stream.max_clients must be greater than zero"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<GestureHubConfigFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
