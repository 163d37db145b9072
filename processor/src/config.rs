//! Startup configuration, loaded from YAML once at boot.
//!
//! Every violation is a fatal [`ConfigError`]: the binary prints a single
//! human-readable message and exits non-zero. Nothing here is reloaded at
//! runtime — hot reconfiguration goes through the control plane.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::model::{InferenceOptions, ModelError, ModelFormat, ModelSpec, ModelVariant, ModelVersion};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML in {}: {source}", .path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("service_id cannot be empty")]
    EmptyServiceId,

    #[error("source_url cannot be empty")]
    EmptySourceUrl,

    #[error("max_fps must be in [1, 60], got {0}")]
    InvalidMaxFps(u32),

    #[error("frame resolution must be positive and at most 4096x4096, got {0}x{1}")]
    InvalidResolution(u32, u32),

    #[error("models directory not found: {}", .0.display())]
    MissingModelsDir(PathBuf),

    #[error("mqtt port cannot be 0")]
    InvalidPort,

    #[error("mqtt qos must be 0, 1, or 2, got {0}")]
    InvalidQos(u8),

    #[error("{field} must be in [0, 1], got {value}")]
    ThresholdOutOfRange { field: &'static str, value: f32 },

    #[error("zone '{zone_id}': {reason}")]
    InvalidZone { zone_id: String, reason: String },

    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Top-level service configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessorConfig {
    pub service_id: String,
    /// Video source URL. Decoding is an external concern; this build
    /// resolves it to the simulation runtime when `simulation` is set.
    pub source_url: String,
    #[serde(default)]
    pub source_id: u32,
    #[serde(default = "default_max_fps")]
    pub max_fps: u32,
    /// (width, height) the zone masks are rasterized against.
    #[serde(default = "default_resolution")]
    pub frame_resolution_wh: (u32, u32),
    #[serde(default = "default_models_dir")]
    pub models_dir: PathBuf,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub zones: Vec<ZoneConfig>,
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub simulation: Option<SimulationConfig>,
}

impl ProcessorConfig {
    pub fn from_yaml(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_yaml::from_str(&text).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_id.is_empty() {
            return Err(ConfigError::EmptyServiceId);
        }
        if self.source_url.is_empty() {
            return Err(ConfigError::EmptySourceUrl);
        }
        if !(1..=60).contains(&self.max_fps) {
            return Err(ConfigError::InvalidMaxFps(self.max_fps));
        }
        let (width, height) = self.frame_resolution_wh;
        if width == 0 || height == 0 || width > 4096 || height > 4096 {
            return Err(ConfigError::InvalidResolution(width, height));
        }
        if !self.models_dir.is_dir() {
            return Err(ConfigError::MissingModelsDir(self.models_dir.clone()));
        }
        self.model.validate()?;
        self.mqtt.validate()?;
        for zone in &self.zones {
            zone.validate()?;
        }
        Ok(())
    }
}

/// Detector model configuration; see the on-disk filename schema in
/// [`ModelSpec`].
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_model_version")]
    pub model_version: String,
    #[serde(default = "default_model_variant")]
    pub model_variant: String,
    #[serde(default = "default_input_size")]
    pub input_size: u32,
    #[serde(default = "default_model_format")]
    pub model_format: String,
    #[serde(default = "default_threshold")]
    pub confidence: f32,
    #[serde(default = "default_threshold")]
    pub iou_threshold: f32,
    #[serde(default = "default_max_detections")]
    pub max_detections: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_version: default_model_version(),
            model_variant: default_model_variant(),
            input_size: default_input_size(),
            model_format: default_model_format(),
            confidence: default_threshold(),
            iou_threshold: default_threshold(),
            max_detections: default_max_detections(),
        }
    }
}

impl ModelConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.spec()?;
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(ConfigError::ThresholdOutOfRange {
                field: "confidence",
                value: self.confidence,
            });
        }
        if !(0.0..=1.0).contains(&self.iou_threshold) {
            return Err(ConfigError::ThresholdOutOfRange {
                field: "iou_threshold",
                value: self.iou_threshold,
            });
        }
        Ok(())
    }

    pub fn spec(&self) -> Result<ModelSpec, ModelError> {
        ModelSpec::new(
            ModelVersion::parse(&self.model_version)?,
            ModelVariant::parse(&self.model_variant)?,
            self.input_size,
            ModelFormat::parse(&self.model_format)?,
        )
    }

    pub fn options(&self) -> InferenceOptions {
        InferenceOptions {
            confidence: self.confidence,
            iou_threshold: self.iou_threshold,
            max_detections: self.max_detections,
        }
    }
}

/// One zone definition from the startup config.
#[derive(Debug, Clone, Deserialize)]
pub struct ZoneConfig {
    pub zone_id: String,
    /// "polygon" or "line".
    pub zone_type: String,
    pub coordinates: Vec<(i64, i64)>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl ZoneConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.zone_type.as_str() {
            "polygon" => {
                if self.coordinates.len() < 3 {
                    return Err(ConfigError::InvalidZone {
                        zone_id: self.zone_id.clone(),
                        reason: format!(
                            "polygon needs at least 3 points, got {}",
                            self.coordinates.len()
                        ),
                    });
                }
            }
            "line" => {
                if self.coordinates.len() != 2 {
                    return Err(ConfigError::InvalidZone {
                        zone_id: self.zone_id.clone(),
                        reason: format!(
                            "line needs exactly 2 points, got {}",
                            self.coordinates.len()
                        ),
                    });
                }
            }
            other => {
                return Err(ConfigError::InvalidZone {
                    zone_id: self.zone_id.clone(),
                    reason: format!("unknown zone_type '{other}'"),
                });
            }
        }
        Ok(())
    }
}

/// Broker connection and topic templates. `{service_id}` is substituted
/// at wiring time.
#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    pub broker: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Data-plane QoS; the control plane is always QoS 1.
    #[serde(default)]
    pub qos: u8,
    #[serde(default = "default_detection_topic")]
    pub detection_topic: String,
    #[serde(default = "default_zone_event_topic")]
    pub zone_event_topic: String,
}

impl MqttConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        if self.qos > 2 {
            return Err(ConfigError::InvalidQos(self.qos));
        }
        Ok(())
    }
}

/// Built-in synthetic source for development and integration runs.
#[derive(Debug, Clone, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Stop after this many frames; endless when omitted.
    #[serde(default)]
    pub frame_count: Option<u64>,
    #[serde(default)]
    pub targets: Vec<SimTargetConfig>,
}

/// One scripted target moving along a waypoint path.
#[derive(Debug, Clone, Deserialize)]
pub struct SimTargetConfig {
    pub class_id: u32,
    #[serde(default)]
    pub class_name: Option<String>,
    /// Pixels travelled per frame along the path.
    #[serde(default = "default_sim_speed")]
    pub speed: f32,
    /// Bounding-box (width, height) in pixels.
    #[serde(default = "default_sim_size")]
    pub size: (f32, f32),
    pub path: Vec<(f32, f32)>,
}

fn default_max_fps() -> u32 {
    25
}

fn default_resolution() -> (u32, u32) {
    (1280, 720)
}

fn default_models_dir() -> PathBuf {
    PathBuf::from("./models")
}

fn default_model_version() -> String {
    "12".to_string()
}

fn default_model_variant() -> String {
    "n".to_string()
}

fn default_input_size() -> u32 {
    640
}

fn default_model_format() -> String {
    "onnx".to_string()
}

fn default_threshold() -> f32 {
    0.5
}

fn default_max_detections() -> usize {
    300
}

fn default_true() -> bool {
    true
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_detection_topic() -> String {
    "cupertino/data/detections/{service_id}".to_string()
}

fn default_zone_event_topic() -> String {
    "cupertino/data/zones/{service_id}".to_string()
}

fn default_sim_speed() -> f32 {
    2.0
}

fn default_sim_size() -> (f32, f32) {
    (40.0, 80.0)
}
