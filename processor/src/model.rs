//! Detector model catalog: keyed cache, on-disk filename schema, and the
//! trait seams behind which the actual inference runtime lives.
//!
//! The loader has no internal synchronization on purpose: the service
//! serializes writes (only the `set_model` handler loads) and guards the
//! current pointer with its own lock.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use cupertino_zone::DetectionBatch;

use crate::pipeline::VideoFrame;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("unknown model version '{0}' (expected 11 or 12)")]
    UnknownVersion(String),

    #[error("unknown model variant '{0}' (expected one of n, s, m, l, x)")]
    UnknownVariant(String),

    #[error("unknown model format '{0}' (expected onnx or pt)")]
    UnknownFormat(String),

    #[error("invalid input size {size} for {format} models")]
    InvalidInputSize { size: u32, format: &'static str },

    #[error("model file not found: {}; available models: [{}]", .path.display(), .available.join(", "))]
    NotFound {
        path: PathBuf,
        available: Vec<String>,
    },

    #[error("engine load failed for {}: {reason}", .path.display())]
    Load { path: PathBuf, reason: String },

    #[error("inference failed: {0}")]
    Inference(String),
}

// ── Catalog coordinates ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelVersion {
    Yolo11,
    Yolo12,
}

impl ModelVersion {
    pub fn parse(s: &str) -> Result<Self, ModelError> {
        match s {
            "11" => Ok(Self::Yolo11),
            "12" => Ok(Self::Yolo12),
            other => Err(ModelError::UnknownVersion(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Yolo11 => "11",
            Self::Yolo12 => "12",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelVariant {
    Nano,
    Small,
    Medium,
    Large,
    XLarge,
}

impl ModelVariant {
    pub fn parse(s: &str) -> Result<Self, ModelError> {
        match s {
            "n" => Ok(Self::Nano),
            "s" => Ok(Self::Small),
            "m" => Ok(Self::Medium),
            "l" => Ok(Self::Large),
            "x" => Ok(Self::XLarge),
            other => Err(ModelError::UnknownVariant(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nano => "n",
            Self::Small => "s",
            Self::Medium => "m",
            Self::Large => "l",
            Self::XLarge => "x",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelFormat {
    Onnx,
    Pt,
}

impl ModelFormat {
    pub fn parse(s: &str) -> Result<Self, ModelError> {
        match s {
            "onnx" => Ok(Self::Onnx),
            "pt" => Ok(Self::Pt),
            other => Err(ModelError::UnknownFormat(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Onnx => "onnx",
            Self::Pt => "pt",
        }
    }
}

/// Cache key and filename schema for one catalog entry.
///
/// Exported models: `yolo{11|12}{n|s|m|l|x}-{320|640}.onnx`.
/// Native models: `yolo{11|12}{n|s|m|l|x}.pt`, input size 32–1280.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelSpec {
    pub version: ModelVersion,
    pub variant: ModelVariant,
    pub input_size: u32,
    pub format: ModelFormat,
}

impl ModelSpec {
    pub fn new(
        version: ModelVersion,
        variant: ModelVariant,
        input_size: u32,
        format: ModelFormat,
    ) -> Result<Self, ModelError> {
        match format {
            ModelFormat::Onnx => {
                if input_size != 320 && input_size != 640 {
                    return Err(ModelError::InvalidInputSize {
                        size: input_size,
                        format: "onnx",
                    });
                }
            }
            ModelFormat::Pt => {
                if !(32..=1280).contains(&input_size) {
                    return Err(ModelError::InvalidInputSize {
                        size: input_size,
                        format: "pt",
                    });
                }
            }
        }
        Ok(Self {
            version,
            variant,
            input_size,
            format,
        })
    }

    pub fn filename(&self) -> String {
        match self.format {
            ModelFormat::Onnx => format!(
                "yolo{}{}-{}.onnx",
                self.version.as_str(),
                self.variant.as_str(),
                self.input_size
            ),
            ModelFormat::Pt => {
                format!("yolo{}{}.pt", self.version.as_str(), self.variant.as_str())
            }
        }
    }
}

// ── Engine seams ──────────────────────────────────────────────────────────────

/// Per-invocation inference parameters. Reapplied on cache hits so a
/// reloaded model picks up threshold overrides.
#[derive(Debug, Clone, Copy)]
pub struct InferenceOptions {
    pub confidence: f32,
    pub iou_threshold: f32,
    pub max_detections: usize,
}

/// The actual detector runtime behind a loaded model. External to this
/// service; the simulation engine and test stubs implement it here.
pub trait InferenceEngine: Send + Sync {
    fn infer(
        &self,
        frame: &VideoFrame,
        options: &InferenceOptions,
    ) -> Result<DetectionBatch, ModelError>;

    fn class_names(&self) -> &HashMap<u32, String>;
}

/// Turns a validated on-disk model file into a running engine.
pub trait EngineFactory: Send + Sync {
    fn load(&self, path: &Path, spec: &ModelSpec) -> Result<Arc<dyn InferenceEngine>, ModelError>;
}

// ── Model handle ──────────────────────────────────────────────────────────────

/// Info summary published on `get_model` / `model_changed` statuses.
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub version: String,
    pub variant: String,
    pub input_size: u32,
    pub format: String,
    pub model_path: String,
}

/// One loaded model: engine + the options it runs with. Immutable; the
/// service swaps the current `Arc<Model>` pointer atomically.
pub struct Model {
    spec: ModelSpec,
    path: PathBuf,
    options: InferenceOptions,
    engine: Arc<dyn InferenceEngine>,
    class_names: Arc<HashMap<u32, String>>,
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("spec", &self.spec)
            .field("path", &self.path)
            .field("options", &self.options)
            .field("class_names", &self.class_names)
            .finish_non_exhaustive()
    }
}

impl Model {
    pub fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    pub fn options(&self) -> &InferenceOptions {
        &self.options
    }

    pub fn infer(&self, frame: &VideoFrame) -> Result<DetectionBatch, ModelError> {
        self.engine.infer(frame, &self.options)
    }

    pub fn class_names(&self) -> &Arc<HashMap<u32, String>> {
        &self.class_names
    }

    pub fn info(&self) -> ModelInfo {
        ModelInfo {
            version: self.spec.version.as_str().to_string(),
            variant: self.spec.variant.as_str().to_string(),
            input_size: self.spec.input_size,
            format: self.spec.format.as_str().to_string(),
            model_path: self.path.display().to_string(),
        }
    }
}

// ── Loader ────────────────────────────────────────────────────────────────────

/// Keyed cache of detector engines plus the last-loaded model.
pub struct ModelLoader {
    models_dir: PathBuf,
    factory: Arc<dyn EngineFactory>,
    cache: HashMap<ModelSpec, Arc<dyn InferenceEngine>>,
    current: Option<Arc<Model>>,
}

impl ModelLoader {
    pub fn new(models_dir: PathBuf, factory: Arc<dyn EngineFactory>) -> Self {
        Self {
            models_dir,
            factory,
            cache: HashMap::new(),
            current: None,
        }
    }

    /// Load a model from cache or disk and make it current. On a cache hit
    /// the engine is reused and `options` reapplied.
    pub fn load(
        &mut self,
        spec: ModelSpec,
        options: InferenceOptions,
    ) -> Result<Arc<Model>, ModelError> {
        let path = self.models_dir.join(spec.filename());

        let engine = if let Some(engine) = self.cache.get(&spec).cloned() {
            engine
        } else {
            if !path.is_file() {
                return Err(ModelError::NotFound {
                    path,
                    available: self.list_available(),
                });
            }
            let engine = self.factory.load(&path, &spec)?;
            self.cache.insert(spec.clone(), engine.clone());
            engine
        };

        let class_names = Arc::new(engine.class_names().clone());
        let model = Arc::new(Model {
            spec,
            path,
            options,
            engine,
            class_names,
        });
        self.current = Some(model.clone());
        Ok(model)
    }

    /// The last-loaded model.
    pub fn current(&self) -> Option<Arc<Model>> {
        self.current.clone()
    }

    pub fn current_info(&self) -> Option<ModelInfo> {
        self.current.as_ref().map(|m| m.info())
    }

    /// Sorted catalog scan of the models directory.
    pub fn list_available(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.models_dir) else {
            return Vec::new();
        };
        let mut models: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_file())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| {
                (name.starts_with("yolo11") || name.starts_with("yolo12"))
                    && (name.ends_with(".onnx") || name.ends_with(".pt"))
            })
            .collect();
        models.sort();
        models
    }

    /// Unload every cached engine. The current model handle stays valid for
    /// readers holding it, but `current()` is cleared; only call with the
    /// pipeline stopped.
    pub fn clear_cache(&mut self) {
        self.cache.clear();
        self.current = None;
    }

    pub fn cache_size(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubEngine {
        class_names: HashMap<u32, String>,
    }

    impl InferenceEngine for StubEngine {
        fn infer(
            &self,
            _frame: &VideoFrame,
            _options: &InferenceOptions,
        ) -> Result<DetectionBatch, ModelError> {
            Ok(DetectionBatch::new())
        }

        fn class_names(&self) -> &HashMap<u32, String> {
            &self.class_names
        }
    }

    struct StubFactory {
        loads: AtomicUsize,
    }

    impl EngineFactory for StubFactory {
        fn load(
            &self,
            _path: &Path,
            _spec: &ModelSpec,
        ) -> Result<Arc<dyn InferenceEngine>, ModelError> {
            self.loads.fetch_add(1, Ordering::Relaxed);
            Ok(Arc::new(StubEngine {
                class_names: HashMap::from([(0, "person".to_string())]),
            }))
        }
    }

    fn spec(variant: &str, size: u32) -> ModelSpec {
        ModelSpec::new(
            ModelVersion::Yolo12,
            ModelVariant::parse(variant).unwrap(),
            size,
            ModelFormat::Onnx,
        )
        .unwrap()
    }

    fn options() -> InferenceOptions {
        InferenceOptions {
            confidence: 0.5,
            iou_threshold: 0.5,
            max_detections: 300,
        }
    }

    fn touch(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), b"").unwrap();
    }

    #[test]
    fn filename_schema_matches_catalog() {
        assert_eq!(spec("n", 640).filename(), "yolo12n-640.onnx");
        assert_eq!(spec("x", 320).filename(), "yolo12x-320.onnx");
        let pt = ModelSpec::new(
            ModelVersion::Yolo11,
            ModelVariant::Small,
            480,
            ModelFormat::Pt,
        )
        .unwrap();
        assert_eq!(pt.filename(), "yolo11s.pt");
    }

    #[test]
    fn onnx_sizes_are_restricted() {
        let err = ModelSpec::new(
            ModelVersion::Yolo12,
            ModelVariant::Nano,
            480,
            ModelFormat::Onnx,
        )
        .unwrap_err();
        assert!(matches!(err, ModelError::InvalidInputSize { .. }));
    }

    #[test]
    fn pt_sizes_span_32_to_1280() {
        assert!(ModelSpec::new(
            ModelVersion::Yolo12,
            ModelVariant::Nano,
            32,
            ModelFormat::Pt
        )
        .is_ok());
        assert!(ModelSpec::new(
            ModelVersion::Yolo12,
            ModelVariant::Nano,
            1281,
            ModelFormat::Pt
        )
        .is_err());
    }

    #[test]
    fn cache_hit_skips_the_factory_and_reapplies_options() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "yolo12n-640.onnx");
        let factory = Arc::new(StubFactory {
            loads: AtomicUsize::new(0),
        });
        let mut loader = ModelLoader::new(dir.path().to_path_buf(), factory.clone());

        loader.load(spec("n", 640), options()).unwrap();
        let relaxed = InferenceOptions {
            confidence: 0.25,
            ..options()
        };
        let second = loader.load(spec("n", 640), relaxed).unwrap();

        assert_eq!(factory.loads.load(Ordering::Relaxed), 1);
        assert_eq!(loader.cache_size(), 1);
        assert!((second.options().confidence - 0.25).abs() < f32::EPSILON);
    }

    #[test]
    fn missing_file_lists_the_catalog() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "yolo12n-640.onnx");
        touch(dir.path(), "yolo11s.pt");
        let mut loader = ModelLoader::new(
            dir.path().to_path_buf(),
            Arc::new(StubFactory {
                loads: AtomicUsize::new(0),
            }),
        );

        let err = loader.load(spec("x", 640), options()).unwrap_err();
        match err {
            ModelError::NotFound { available, .. } => {
                assert_eq!(available, vec!["yolo11s.pt", "yolo12n-640.onnx"]);
            }
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn current_pointer_tracks_the_last_load() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "yolo12n-640.onnx");
        touch(dir.path(), "yolo12s-640.onnx");
        let mut loader = ModelLoader::new(
            dir.path().to_path_buf(),
            Arc::new(StubFactory {
                loads: AtomicUsize::new(0),
            }),
        );

        assert!(loader.current().is_none());
        loader.load(spec("n", 640), options()).unwrap();
        assert_eq!(loader.current_info().unwrap().variant, "n");
        loader.load(spec("s", 640), options()).unwrap();
        assert_eq!(loader.current_info().unwrap().variant, "s");
        assert_eq!(loader.cache_size(), 2);

        loader.clear_cache();
        assert_eq!(loader.cache_size(), 0);
        assert!(loader.current().is_none());
    }
}
