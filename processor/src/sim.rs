//! Deterministic synthetic source + engine for development and
//! integration runs without a camera or inference runtime attached.
//!
//! Targets move along waypoint paths as a pure function of frame id, so
//! the source and the engine agree on every frame without shared state,
//! and test runs are reproducible.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::info;

use cupertino_zone::{BoundingBox, Detection, DetectionBatch};

use crate::config::{ProcessorConfig, SimulationConfig};
use crate::model::{EngineFactory, InferenceEngine, InferenceOptions, ModelError, ModelSpec};
use crate::pipeline::{FrameImage, PassthroughTracker, VideoFrame, VideoSource};
use crate::service::ServiceRuntime;

const SIM_CONFIDENCE: f32 = 0.9;

/// One scripted target walking its waypoint path, looping forever.
#[derive(Debug, Clone)]
pub struct SimTarget {
    pub class_id: u32,
    pub size: (f32, f32),
    pub speed: f32,
    pub waypoints: Vec<(f32, f32)>,
}

impl SimTarget {
    /// Ground-contact point at the given frame.
    fn position_at(&self, frame_id: u64) -> (f32, f32) {
        if self.waypoints.len() < 2 {
            return self.waypoints.first().copied().unwrap_or((0.0, 0.0));
        }

        let mut lengths = Vec::with_capacity(self.waypoints.len() - 1);
        let mut total = 0.0_f32;
        for pair in self.waypoints.windows(2) {
            let (ax, ay) = pair[0];
            let (bx, by) = pair[1];
            let length = ((bx - ax).powi(2) + (by - ay).powi(2)).sqrt();
            lengths.push(length);
            total += length;
        }
        if total <= f32::EPSILON {
            return self.waypoints[0];
        }

        let mut distance = (self.speed * frame_id as f32) % total;
        for (segment, &length) in self.waypoints.windows(2).zip(&lengths) {
            if distance <= length {
                let t = if length <= f32::EPSILON {
                    0.0
                } else {
                    distance / length
                };
                let (ax, ay) = segment[0];
                let (bx, by) = segment[1];
                return (ax + t * (bx - ax), ay + t * (by - ay));
            }
            distance -= length;
        }
        *self.waypoints.last().unwrap_or(&self.waypoints[0])
    }
}

/// The scripted world both the source and the engine derive frames from.
#[derive(Debug)]
pub struct SimulatedScenario {
    pub resolution: (u32, u32),
    pub targets: Vec<SimTarget>,
    pub class_names: HashMap<u32, String>,
}

impl SimulatedScenario {
    pub fn from_config(sim: &SimulationConfig, resolution: (u32, u32)) -> Self {
        let mut class_names = HashMap::new();
        let targets = sim
            .targets
            .iter()
            .map(|target| {
                let name = target
                    .class_name
                    .clone()
                    .unwrap_or_else(|| format!("class_{}", target.class_id));
                class_names.insert(target.class_id, name);
                SimTarget {
                    class_id: target.class_id,
                    size: target.size,
                    speed: target.speed,
                    waypoints: target.path.clone(),
                }
            })
            .collect();
        Self {
            resolution,
            targets,
            class_names,
        }
    }

    /// Detections for a frame: stable tracker id per target.
    pub fn batch_at(&self, frame_id: u64) -> DetectionBatch {
        let detections = self
            .targets
            .iter()
            .enumerate()
            .map(|(idx, target)| {
                let (cx, cy) = target.position_at(frame_id);
                let (width, height) = target.size;
                Detection {
                    bbox: BoundingBox::new(cx - width / 2.0, cy - height, width, height),
                    class_id: target.class_id,
                    confidence: SIM_CONFIDENCE,
                    tracker_id: Some(idx as u32),
                }
            })
            .collect();
        DetectionBatch::from_detections(detections)
    }
}

// ── Source ────────────────────────────────────────────────────────────────────

/// Synthetic frame source: blank buffers with monotonic frame ids.
pub struct SimulatedSource {
    scenario: Arc<SimulatedScenario>,
    blank: Arc<Vec<u8>>,
    next_frame_id: u64,
    remaining: Option<u64>,
}

impl SimulatedSource {
    pub fn new(scenario: Arc<SimulatedScenario>, frame_count: Option<u64>) -> Self {
        let (width, height) = scenario.resolution;
        Self {
            blank: Arc::new(vec![0; (width as usize) * (height as usize) * 3]),
            scenario,
            next_frame_id: 0,
            remaining: frame_count,
        }
    }
}

#[async_trait]
impl VideoSource for SimulatedSource {
    async fn next_frame(&mut self) -> Option<VideoFrame> {
        if let Some(remaining) = &mut self.remaining {
            if *remaining == 0 {
                return None;
            }
            *remaining -= 1;
        }
        let frame_id = self.next_frame_id;
        self.next_frame_id += 1;
        let (width, height) = self.scenario.resolution;
        Some(VideoFrame {
            frame_id,
            timestamp: Utc::now(),
            image: FrameImage {
                width,
                height,
                data: self.blank.clone(),
            },
        })
    }
}

// ── Engine ────────────────────────────────────────────────────────────────────

/// Synthetic detector: replays the scenario instead of reading pixels.
pub struct SimulatedEngine {
    scenario: Arc<SimulatedScenario>,
    class_names: HashMap<u32, String>,
}

impl InferenceEngine for SimulatedEngine {
    fn infer(
        &self,
        frame: &VideoFrame,
        options: &InferenceOptions,
    ) -> Result<DetectionBatch, ModelError> {
        let detections: Vec<Detection> = self
            .scenario
            .batch_at(frame.frame_id)
            .iter()
            .filter(|d| d.confidence >= options.confidence)
            .take(options.max_detections)
            .copied()
            .collect();
        Ok(DetectionBatch::from_detections(detections))
    }

    fn class_names(&self) -> &HashMap<u32, String> {
        &self.class_names
    }
}

pub struct SimulatedEngineFactory {
    scenario: Arc<SimulatedScenario>,
}

impl EngineFactory for SimulatedEngineFactory {
    fn load(
        &self,
        _path: &std::path::Path,
        spec: &ModelSpec,
    ) -> Result<Arc<dyn InferenceEngine>, ModelError> {
        info!("simulation: standing in for model {}", spec.filename());
        Ok(Arc::new(SimulatedEngine {
            scenario: self.scenario.clone(),
            class_names: self.scenario.class_names.clone(),
        }))
    }
}

/// Build the full runtime (source, engine factory, tracker) when the
/// config enables simulation. Returns `None` otherwise — a real decoder
/// and inference runtime must then be linked behind the same traits.
pub fn simulation_runtime(config: &ProcessorConfig) -> Option<ServiceRuntime> {
    let sim = config.simulation.as_ref()?;
    if !sim.enabled {
        return None;
    }
    let scenario = Arc::new(SimulatedScenario::from_config(
        sim,
        config.frame_resolution_wh,
    ));
    info!(
        "simulation runtime: {} targets at {}x{}",
        scenario.targets.len(),
        scenario.resolution.0,
        scenario.resolution.1
    );
    Some(ServiceRuntime {
        engine_factory: Arc::new(SimulatedEngineFactory {
            scenario: scenario.clone(),
        }),
        video_source: Box::new(SimulatedSource::new(scenario, sim.frame_count)),
        tracker: Box::new(PassthroughTracker),
    })
}
