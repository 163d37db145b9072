//! Stream processor service: owns the registry, model pointer, control
//! plane, publish queue, and publisher worker, and drives the pipeline
//! callbacks.
//!
//! Lifecycle: `Created → SetUp → Running → Stopped`. `stop()` is
//! idempotent and joins the publisher worker with a bounded timeout.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context};
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use cupertino_mqtt::schema::{
    BBox, CrossingDirection, Detection as WireDetection, DetectionMessage, EventType, ZoneEvent,
    ZoneEventMessage, ZoneEventStats, ZoneType,
};
use cupertino_mqtt::{qos_from_level, DetectionPublisher, PublisherConfig, ZoneEventPublisher};
use cupertino_zone::DetectionBatch;

use crate::config::ProcessorConfig;
use crate::control::{ControlPlane, ControlPlaneConfig};
use crate::model::{
    EngineFactory, Model, ModelFormat, ModelInfo, ModelLoader, ModelSpec, ModelVariant,
    ModelVersion,
};
use crate::pipeline::{
    DispatchFn, FramePredictions, InferenceFn, InferencePipeline, MultiObjectTracker, VideoFrame,
    VideoSource,
};
use crate::registry::{ZoneKind, ZoneRegistry, ZoneResult, ZoneShape};

const PUBLISH_QUEUE_CAPACITY: usize = 512;
const CONTROL_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const PUBLISHER_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const WORKER_JOIN_TIMEOUT: Duration = Duration::from_secs(5);
/// Line-side memory is pruned every this many processed frames.
const TRACKER_PRUNE_INTERVAL: u64 = 300;

/// External collaborators the service is wired with: decoder, inference
/// runtime, and multi-object tracker, all behind their trait seams.
pub struct ServiceRuntime {
    pub engine_factory: Arc<dyn EngineFactory>,
    pub video_source: Box<dyn VideoSource>,
    pub tracker: Box<dyn MultiObjectTracker>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    SetUp,
    Running,
    Stopped,
}

/// Both envelopes for one frame travel the queue together, so a drop
/// never splits a detection/zone-event pair.
struct QueuedFrame {
    detection: DetectionMessage,
    zones: ZoneEventMessage,
}

/// Non-blocking producer side of the publish queue.
#[derive(Clone)]
struct PublishHandle {
    tx: mpsc::Sender<QueuedFrame>,
    dropped: Arc<AtomicU64>,
}

impl PublishHandle {
    fn enqueue(&self, frame: QueuedFrame) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(e) => {
                let frame_id = match &e {
                    mpsc::error::TrySendError::Full(frame)
                    | mpsc::error::TrySendError::Closed(frame) => frame.detection.frame_id,
                };
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!("publish queue full, dropping frame {frame_id} ({dropped} dropped so far)");
                false
            }
        }
    }
}

/// Main orchestrator; see the crate docs for the threading model.
pub struct StreamProcessorService {
    config: ProcessorConfig,
    registry: Arc<ZoneRegistry>,
    loader: Arc<Mutex<ModelLoader>>,
    current_model: Arc<RwLock<Option<Arc<Model>>>>,
    control: ControlPlane,
    detection_publisher: Arc<DetectionPublisher>,
    zone_publisher: Arc<ZoneEventPublisher>,
    publish_tx: mpsc::Sender<QueuedFrame>,
    publish_rx: Option<mpsc::Receiver<QueuedFrame>>,
    dropped_frames: Arc<AtomicU64>,
    paused: Arc<AtomicBool>,
    video_source: Option<Box<dyn VideoSource>>,
    tracker: Option<Box<dyn MultiObjectTracker>>,
    pipeline: Option<InferencePipeline>,
    worker: Option<JoinHandle<()>>,
    worker_stop: watch::Sender<bool>,
    worker_stop_rx: watch::Receiver<bool>,
    lifecycle: Lifecycle,
    started_at: Instant,
}

impl StreamProcessorService {
    pub fn new(config: ProcessorConfig, runtime: ServiceRuntime) -> Self {
        let ServiceRuntime {
            engine_factory,
            video_source,
            tracker,
        } = runtime;

        let mqtt = &config.mqtt;
        let control = ControlPlane::new(ControlPlaneConfig {
            broker_host: mqtt.broker.clone(),
            broker_port: mqtt.port,
            service_id: config.service_id.clone(),
            client_id: format!("processor_{}", config.service_id),
            username: mqtt.username.clone(),
            password: mqtt.password.clone(),
        });

        let data_qos = qos_from_level(mqtt.qos);
        let detection_publisher = Arc::new(DetectionPublisher::new(PublisherConfig {
            broker_host: mqtt.broker.clone(),
            broker_port: mqtt.port,
            topic: mqtt
                .detection_topic
                .replace("{service_id}", &config.service_id),
            client_id: format!("publisher_detections_{}", config.service_id),
            username: mqtt.username.clone(),
            password: mqtt.password.clone(),
            qos: data_qos,
        }));
        let zone_publisher = Arc::new(ZoneEventPublisher::new(PublisherConfig {
            broker_host: mqtt.broker.clone(),
            broker_port: mqtt.port,
            topic: mqtt
                .zone_event_topic
                .replace("{service_id}", &config.service_id),
            client_id: format!("publisher_zones_{}", config.service_id),
            username: mqtt.username.clone(),
            password: mqtt.password.clone(),
            qos: data_qos,
        }));

        let loader = Arc::new(Mutex::new(ModelLoader::new(
            config.models_dir.clone(),
            engine_factory,
        )));
        let (publish_tx, publish_rx) = mpsc::channel(PUBLISH_QUEUE_CAPACITY);
        let (worker_stop, worker_stop_rx) = watch::channel(false);

        info!(
            "stream processor service created (service_id={})",
            config.service_id
        );
        Self {
            registry: Arc::new(ZoneRegistry::new()),
            loader,
            current_model: Arc::new(RwLock::new(None)),
            control,
            detection_publisher,
            zone_publisher,
            publish_tx,
            publish_rx: Some(publish_rx),
            dropped_frames: Arc::new(AtomicU64::new(0)),
            paused: Arc::new(AtomicBool::new(false)),
            video_source: Some(video_source),
            tracker: Some(tracker),
            pipeline: None,
            worker: None,
            worker_stop,
            worker_stop_rx,
            lifecycle: Lifecycle::Created,
            started_at: Instant::now(),
            config,
        }
    }

    pub fn registry(&self) -> &Arc<ZoneRegistry> {
        &self.registry
    }

    pub fn control(&self) -> &ControlPlane {
        &self.control
    }

    /// Info for the model the inference path currently reads.
    pub fn current_model_info(&self) -> Option<ModelInfo> {
        self.current_model.read().as_ref().map(|model| model.info())
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    /// Load the configured zones and model, and register command handlers.
    pub fn setup(&mut self) -> anyhow::Result<()> {
        if self.lifecycle != Lifecycle::Created {
            bail!("setup() requires a freshly created service");
        }

        for zone in &self.config.zones {
            let kind = ZoneKind::parse(&zone.zone_type)?;
            let shape = ZoneShape::from_coordinates(
                kind,
                &zone.coordinates,
                self.config.frame_resolution_wh,
            )?;
            self.registry.add_shape(&zone.zone_id, shape)?;
            if !zone.enabled {
                self.registry.disable(&zone.zone_id)?;
            }
            info!(
                "zone initialized: {} (type={kind}, enabled={})",
                zone.zone_id, zone.enabled
            );
        }

        let spec = self.config.model.spec()?;
        let model = self
            .loader
            .lock()
            .load(spec, self.config.model.options())
            .context("loading initial model")?;
        info!("initial model loaded: {}", model.info().model_path);
        *self.current_model.write() = Some(model);

        self.register_commands()?;
        self.lifecycle = Lifecycle::SetUp;
        info!(
            "service setup complete ({} zones, {} commands)",
            self.registry.count(),
            self.control.command_registry().count()
        );
        Ok(())
    }

    /// Connect the control plane and publishers, spawn the publisher
    /// worker, and start the pipeline. Non-blocking; use `wait()`.
    pub async fn start(&mut self) -> anyhow::Result<()> {
        if self.lifecycle == Lifecycle::Running {
            warn!("service already running");
            return Ok(());
        }
        if self.lifecycle != Lifecycle::SetUp {
            bail!("start() requires setup() first");
        }

        self.control
            .connect(CONTROL_CONNECT_TIMEOUT)
            .await
            .context("connecting control plane")?;
        self.detection_publisher
            .connect(PUBLISHER_CONNECT_TIMEOUT)
            .await
            .context("connecting detection publisher")?;
        self.zone_publisher
            .connect(PUBLISHER_CONNECT_TIMEOUT)
            .await
            .context("connecting zone-event publisher")?;

        let queue = self
            .publish_rx
            .take()
            .ok_or_else(|| anyhow!("publish queue already consumed"))?;
        self.worker = Some(tokio::spawn(run_publisher_worker(
            queue,
            self.worker_stop_rx.clone(),
            self.detection_publisher.clone(),
            self.zone_publisher.clone(),
        )));

        let source = self
            .video_source
            .take()
            .ok_or_else(|| anyhow!("video source already consumed"))?;
        let tracker = self
            .tracker
            .take()
            .ok_or_else(|| anyhow!("tracker already consumed"))?;
        let mut pipeline = InferencePipeline::new(
            source,
            self.inference_callback(tracker),
            self.dispatch_callback(),
            self.config.max_fps,
        );
        pipeline.start();
        self.pipeline = Some(pipeline);

        self.control.publish_status("running", None);
        self.lifecycle = Lifecycle::Running;
        info!("stream processor service started");
        Ok(())
    }

    /// Block until the pipeline terminates.
    pub async fn wait(&mut self) {
        match self.pipeline.as_mut() {
            Some(pipeline) => pipeline.join().await,
            None => warn!("service not running"),
        }
    }

    /// Graceful teardown: pipeline, worker (bounded join), publishers,
    /// control plane. Calling it twice is a no-op.
    pub async fn stop(&mut self) {
        if self.lifecycle != Lifecycle::Running {
            debug!("stop: service not running");
            return;
        }
        info!("stopping stream processor service");

        if let Some(pipeline) = self.pipeline.as_ref() {
            pipeline.terminate();
        }
        if let Some(mut pipeline) = self.pipeline.take() {
            pipeline.join().await;
        }

        let _ = self.worker_stop.send(true);
        if let Some(worker) = self.worker.take() {
            match tokio::time::timeout(WORKER_JOIN_TIMEOUT, worker).await {
                Ok(_) => info!("publisher worker stopped"),
                Err(_) => warn!("publisher worker did not stop within {WORKER_JOIN_TIMEOUT:?}"),
            }
        }

        self.detection_publisher.disconnect().await;
        self.zone_publisher.disconnect().await;
        self.control.publish_status("stopped", None);
        self.control.disconnect().await;

        self.lifecycle = Lifecycle::Stopped;
        info!("stream processor service stopped");
    }

    // ── Pipeline callbacks ────────────────────────────────────────────────

    /// Runs on the inference task. The model pointer is read under a brief
    /// shared lock; inference and zone evaluation run outside it. The
    /// tracker is moved in and never touched from any other task.
    fn inference_callback(&self, mut tracker: Box<dyn MultiObjectTracker>) -> InferenceFn {
        let registry = self.registry.clone();
        let current_model = self.current_model.clone();
        let mut frames_processed: u64 = 0;

        Box::new(move |frame: &VideoFrame| {
            let model = match current_model.read().clone() {
                Some(model) => model,
                None => {
                    warn!("no model loaded, dropping frame {}", frame.frame_id);
                    return None;
                }
            };

            let raw = match model.infer(frame) {
                Ok(batch) => batch,
                Err(e) => {
                    warn!("inference failed on frame {}: {e}", frame.frame_id);
                    return None;
                }
            };
            let tracked = tracker.update(raw);

            let zone_results = match registry.evaluate(&tracked, model.class_names()) {
                Ok(results) => results,
                Err(e) => {
                    error!("zone evaluation failed on frame {}: {e}", frame.frame_id);
                    return None;
                }
            };
            let zone_counts = zone_results
                .iter()
                .map(|(zone_id, result)| (zone_id.clone(), result.count()))
                .collect();

            frames_processed += 1;
            if frames_processed % TRACKER_PRUNE_INTERVAL == 0 {
                registry.prune_trackers(&tracked.active_tracker_ids());
            }

            Some(FramePredictions {
                frame_id: frame.frame_id,
                timestamp: frame.timestamp,
                detections: tracked,
                zone_results,
                zone_counts,
                class_names: model.class_names().clone(),
            })
        })
    }

    /// Runs on the dispatch task: builds both envelopes and enqueues them
    /// without blocking. Pause skips enqueueing only — the decoder and
    /// inference keep running so no backpressure builds up upstream.
    fn dispatch_callback(&self) -> DispatchFn {
        let paused = self.paused.clone();
        let source_id = self.config.source_id;
        let queue = PublishHandle {
            tx: self.publish_tx.clone(),
            dropped: self.dropped_frames.clone(),
        };

        Box::new(move |predictions: &FramePredictions, _frame: &VideoFrame| {
            if paused.load(Ordering::Relaxed) {
                return;
            }
            let detection = build_detection_message(predictions, source_id);
            let zones = build_zone_event_message(predictions, source_id);
            queue.enqueue(QueuedFrame { detection, zones });
        })
    }

    // ── Command handlers ──────────────────────────────────────────────────

    fn register_commands(&self) -> anyhow::Result<()> {
        let commands = self.control.command_registry();
        let status = self.control.status_handle();
        let resolution = self.config.frame_resolution_wh;

        {
            let registry = self.registry.clone();
            let status = status.clone();
            commands.register("add_zone", "Add a polygon or line zone", move |payload| {
                let zone_id = payload_str(payload, "zone_id")?;
                let kind = ZoneKind::parse(payload_str(payload, "zone_type")?)?;
                let coordinates = payload_coordinates(payload)?;
                let shape = ZoneShape::from_coordinates(kind, &coordinates, resolution)?;
                registry.add_shape(zone_id, shape)?;
                info!("zone added: {zone_id}");
                status.publish("zone_added", Some(json!({ "zone_id": zone_id })));
                Ok(())
            })?;
        }

        {
            let registry = self.registry.clone();
            let status = status.clone();
            commands.register("remove_zone", "Remove an existing zone", move |payload| {
                let zone_id = payload_str(payload, "zone_id")?;
                registry.remove(zone_id)?;
                info!("zone removed: {zone_id}");
                status.publish("zone_removed", Some(json!({ "zone_id": zone_id })));
                Ok(())
            })?;
        }

        {
            let registry = self.registry.clone();
            let status = status.clone();
            commands.register("enable_zone", "Enable a zone", move |payload| {
                let zone_id = payload_str(payload, "zone_id")?;
                registry.enable(zone_id)?;
                info!("zone enabled: {zone_id}");
                status.publish("zone_enabled", Some(json!({ "zone_id": zone_id })));
                Ok(())
            })?;
        }

        {
            let registry = self.registry.clone();
            let status = status.clone();
            commands.register("disable_zone", "Disable a zone", move |payload| {
                let zone_id = payload_str(payload, "zone_id")?;
                registry.disable(zone_id)?;
                info!("zone disabled: {zone_id}");
                status.publish("zone_disabled", Some(json!({ "zone_id": zone_id })));
                Ok(())
            })?;
        }

        {
            let registry = self.registry.clone();
            let status = status.clone();
            commands.register("list_zones", "List all zones", move |_payload| {
                let zones = registry.list();
                info!("zones listed: {}", zones.len());
                status.publish("zones_list", Some(json!({ "zones": zones })));
                Ok(())
            })?;
        }

        {
            let loader = self.loader.clone();
            let current = self.current_model.clone();
            let status = status.clone();
            let model_config = self.config.model.clone();
            commands.register("set_model", "Hot-swap the detector model", move |payload| {
                let variant = ModelVariant::parse(payload_str(payload, "variant")?)?;
                let version = match payload.get("version").and_then(|v| v.as_str()) {
                    Some(version) => ModelVersion::parse(version)?,
                    None => ModelVersion::parse(&model_config.model_version)?,
                };
                let format = match payload.get("format").and_then(|v| v.as_str()) {
                    Some(format) => ModelFormat::parse(format)?,
                    None => ModelFormat::parse(&model_config.model_format)?,
                };
                let input_size = payload
                    .get("input_size")
                    .and_then(|v| v.as_u64())
                    .map(|v| v as u32)
                    .unwrap_or(model_config.input_size);

                let spec = ModelSpec::new(version, variant, input_size, format)?;
                let model = loader.lock().load(spec, model_config.options())?;
                let model_info = model.info();

                // Swap under the write lock, release the old model after it.
                let old = current.write().replace(model);
                drop(old);

                info!("model changed: {}", model_info.model_path);
                status.publish("model_changed", Some(serde_json::to_value(&model_info)?));
                Ok(())
            })?;
        }

        {
            let loader = self.loader.clone();
            let status = status.clone();
            commands.register("get_model", "Get current model info", move |_payload| {
                let model_info = loader.lock().current_info();
                status.publish("model_info", Some(json!({ "model": model_info })));
                Ok(())
            })?;
        }

        {
            let paused = self.paused.clone();
            let status = status.clone();
            commands.register(
                "pause",
                "Pause publishing (pipeline keeps running)",
                move |_payload| {
                    paused.store(true, Ordering::Relaxed);
                    info!("publishing paused");
                    status.publish("paused", None);
                    Ok(())
                },
            )?;
        }

        {
            let paused = self.paused.clone();
            let status = status.clone();
            commands.register("resume", "Resume publishing", move |_payload| {
                paused.store(false, Ordering::Relaxed);
                info!("publishing resumed");
                status.publish("resumed", None);
                Ok(())
            })?;
        }

        {
            let registry = self.registry.clone();
            let loader = self.loader.clone();
            let paused = self.paused.clone();
            let dropped = self.dropped_frames.clone();
            let status = status.clone();
            let started_at = self.started_at;
            commands.register("status", "Publish a one-shot status report", move |_payload| {
                status.publish(
                    "status",
                    Some(json!({
                        "paused": paused.load(Ordering::Relaxed),
                        "zones": registry.list(),
                        "model": loader.lock().current_info(),
                        "uptime_secs": started_at.elapsed().as_secs(),
                        "dropped_frames": dropped.load(Ordering::Relaxed),
                    })),
                );
                Ok(())
            })?;
        }

        {
            let detections = self.detection_publisher.clone();
            let zones = self.zone_publisher.clone();
            let started_at = self.started_at;
            commands.register("health", "Publish a health probe", move |_payload| {
                let detection_stats = detections.stats();
                let zone_stats = zones.stats();
                status.publish(
                    "healthy",
                    Some(json!({
                        "uptime_secs": started_at.elapsed().as_secs(),
                        "detection_publisher": {
                            "connected": detection_stats.connected,
                            "published": detection_stats.published,
                            "failed": detection_stats.failed,
                        },
                        "zone_publisher": {
                            "connected": zone_stats.connected,
                            "published": zone_stats.published,
                            "failed": zone_stats.failed,
                        },
                    })),
                );
                Ok(())
            })?;
        }

        Ok(())
    }
}

// ── Publisher worker ──────────────────────────────────────────────────────────

/// Drains the publish queue until the stop signal. Within a frame the
/// detection envelope is published before the zone-event envelope; across
/// frames the queue preserves dispatch order.
async fn run_publisher_worker(
    mut queue: mpsc::Receiver<QueuedFrame>,
    mut stop: watch::Receiver<bool>,
    detections: Arc<DetectionPublisher>,
    zones: Arc<ZoneEventPublisher>,
) {
    info!("publisher worker started");
    loop {
        tokio::select! {
            _ = stop.wait_for(|stopped| *stopped) => break,
            item = queue.recv() => match item {
                Some(frame) => {
                    detections.publish(&frame.detection);
                    zones.publish(&frame.zones);
                }
                None => break,
            },
        }
    }
    info!("publisher worker stopped");
}

// ── Envelope building ─────────────────────────────────────────────────────────

fn class_label(class_names: &HashMap<u32, String>, class_id: u32) -> String {
    class_names
        .get(&class_id)
        .cloned()
        .unwrap_or_else(|| format!("class_{class_id}"))
}

fn ids_for_mask(batch: &DetectionBatch, mask: &[bool]) -> Vec<u32> {
    mask.iter()
        .enumerate()
        .filter(|&(_, &selected)| selected)
        .filter_map(|(idx, _)| batch.get(idx).and_then(|d| d.tracker_id))
        .collect()
}

/// Detection envelope for one frame. Detections the tracker has not yet
/// assigned an id to are left out — the wire shape requires identity.
pub fn build_detection_message(predictions: &FramePredictions, source_id: u32) -> DetectionMessage {
    let detections = predictions
        .detections
        .iter()
        .filter_map(|detection| {
            let tracker_id = detection.tracker_id?;
            Some(WireDetection {
                tracker_id,
                class_name: class_label(&predictions.class_names, detection.class_id),
                confidence: f64::from(detection.confidence),
                bbox: BBox {
                    x: f64::from(detection.bbox.x),
                    y: f64::from(detection.bbox.y),
                    width: f64::from(detection.bbox.width),
                    height: f64::from(detection.bbox.height),
                },
            })
        })
        .collect();
    DetectionMessage::new(
        predictions.timestamp,
        predictions.frame_id,
        source_id,
        detections,
    )
}

/// Zone-event envelope aggregating every evaluated zone, in stable id
/// order. For line zones the dominant direction this frame is published
/// (ties fall to "in"); the stats totals stay exact either way.
pub fn build_zone_event_message(
    predictions: &FramePredictions,
    source_id: u32,
) -> ZoneEventMessage {
    let mut ordered: Vec<(&String, &ZoneResult)> = predictions.zone_results.iter().collect();
    ordered.sort_by(|a, b| a.0.cmp(b.0));

    let zones = ordered
        .into_iter()
        .map(|(zone_id, result)| match result {
            ZoneResult::Polygon { mask, stats } => ZoneEvent {
                zone_id: zone_id.clone(),
                zone_type: ZoneType::Polygon,
                event_type: EventType::Inside,
                stats: ZoneEventStats::polygon(stats.current_count),
                triggered_by: ids_for_mask(&predictions.detections, mask),
                crossing_direction: None,
            },
            ZoneResult::Line {
                crossed_in,
                crossed_out,
                stats,
            } => {
                let in_count = crossed_in.iter().filter(|&&c| c).count();
                let out_count = crossed_out.iter().filter(|&&c| c).count();
                let mut triggered = ids_for_mask(&predictions.detections, crossed_in);
                triggered.extend(ids_for_mask(&predictions.detections, crossed_out));
                ZoneEvent {
                    zone_id: zone_id.clone(),
                    zone_type: ZoneType::Line,
                    event_type: EventType::Crossing,
                    stats: ZoneEventStats::line(stats.total_entered, stats.total_exited),
                    triggered_by: triggered,
                    crossing_direction: Some(if out_count > in_count {
                        CrossingDirection::Out
                    } else {
                        CrossingDirection::In
                    }),
                }
            }
        })
        .collect();

    ZoneEventMessage::new(
        predictions.timestamp,
        predictions.frame_id,
        source_id,
        zones,
    )
}

// ── Payload helpers ───────────────────────────────────────────────────────────

fn payload_str<'a>(payload: &'a serde_json::Value, field: &str) -> anyhow::Result<&'a str> {
    payload
        .get(field)
        .and_then(|value| value.as_str())
        .ok_or_else(|| anyhow!("missing required field '{field}'"))
}

fn payload_coordinates(payload: &serde_json::Value) -> anyhow::Result<Vec<(i64, i64)>> {
    let points = payload
        .get("coordinates")
        .and_then(|value| value.as_array())
        .ok_or_else(|| anyhow!("missing required field 'coordinates'"))?;
    points
        .iter()
        .map(|point| {
            let pair = point
                .as_array()
                .filter(|pair| pair.len() == 2)
                .ok_or_else(|| anyhow!("coordinates must be [x, y] pairs"))?;
            let x = pair[0]
                .as_i64()
                .ok_or_else(|| anyhow!("coordinate x must be an integer"))?;
            let y = pair[1]
                .as_i64()
                .ok_or_else(|| anyhow!("coordinate y must be an integer"))?;
            Ok((x, y))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use cupertino_zone::{BoundingBox, Detection, ZoneStats};
    use std::collections::BTreeMap;

    fn predictions_with(
        zone_results: HashMap<String, ZoneResult>,
        detections: Vec<Detection>,
    ) -> FramePredictions {
        let zone_counts = zone_results
            .iter()
            .map(|(id, result)| (id.clone(), result.count()))
            .collect();
        FramePredictions {
            frame_id: 42,
            timestamp: Utc::now(),
            detections: DetectionBatch::from_detections(detections),
            zone_results,
            zone_counts,
            class_names: Arc::new(HashMap::from([(0, "person".to_string())])),
        }
    }

    fn tracked(x: f32, y: f32, tracker_id: u32) -> Detection {
        Detection {
            bbox: BoundingBox::new(x, y, 20.0, 40.0),
            class_id: 0,
            confidence: 0.9,
            tracker_id: Some(tracker_id),
        }
    }

    fn stats(zone_id: &str, current: u64, entered: u64, exited: u64) -> ZoneStats {
        ZoneStats {
            zone_id: zone_id.to_string(),
            current_count: current,
            total_entered: entered,
            total_exited: exited,
            classwise_counts: BTreeMap::new(),
        }
    }

    #[test]
    fn detection_message_skips_untracked_detections() {
        let untracked = Detection {
            tracker_id: None,
            ..tracked(0.0, 0.0, 0)
        };
        let predictions =
            predictions_with(HashMap::new(), vec![tracked(10.0, 10.0, 7), untracked]);

        let message = build_detection_message(&predictions, 3);
        assert_eq!(message.frame_id, 42);
        assert_eq!(message.source_id, 3);
        assert_eq!(message.detections.len(), 1);
        assert_eq!(message.detections[0].tracker_id, 7);
        assert_eq!(message.detections[0].class_name, "person");
        message.validate().unwrap();
    }

    #[test]
    fn zone_event_message_shapes_polygon_and_line_stats() {
        let detections = vec![tracked(10.0, 10.0, 1), tracked(30.0, 10.0, 2)];
        let mut zone_results = HashMap::new();
        zone_results.insert(
            "entrance".to_string(),
            ZoneResult::Polygon {
                mask: vec![true, false],
                stats: stats("entrance", 1, 0, 0),
            },
        );
        zone_results.insert(
            "doorway".to_string(),
            ZoneResult::Line {
                crossed_in: vec![false, true],
                crossed_out: vec![false, false],
                stats: stats("doorway", 0, 5, 2),
            },
        );
        let predictions = predictions_with(zone_results, detections);

        let message = build_zone_event_message(&predictions, 0);
        message.validate().unwrap();

        // Stable id order: doorway before entrance.
        assert_eq!(message.zones[0].zone_id, "doorway");
        assert_eq!(message.zones[1].zone_id, "entrance");

        let doorway = message.zone("doorway").unwrap();
        assert_eq!(doorway.stats, ZoneEventStats::line(5, 2));
        assert_eq!(doorway.triggered_by, vec![2]);
        assert_eq!(doorway.crossing_direction, Some(CrossingDirection::In));

        let entrance = message.zone("entrance").unwrap();
        assert_eq!(entrance.stats, ZoneEventStats::polygon(1));
        assert_eq!(entrance.triggered_by, vec![1]);
        assert!(entrance.crossing_direction.is_none());
    }

    #[test]
    fn line_direction_follows_the_dominant_crossing() {
        let detections = vec![
            tracked(0.0, 0.0, 1),
            tracked(0.0, 0.0, 2),
            tracked(0.0, 0.0, 3),
        ];
        let mut zone_results = HashMap::new();
        zone_results.insert(
            "doorway".to_string(),
            ZoneResult::Line {
                crossed_in: vec![true, false, false],
                crossed_out: vec![false, true, true],
                stats: stats("doorway", 0, 1, 2),
            },
        );
        let predictions = predictions_with(zone_results, detections);

        let message = build_zone_event_message(&predictions, 0);
        assert_eq!(
            message.zones[0].crossing_direction,
            Some(CrossingDirection::Out)
        );
        assert_eq!(message.zones[0].triggered_by, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn queue_overflow_drops_frames_and_counts_them() {
        let (tx, mut rx) = mpsc::channel(4);
        let dropped = Arc::new(AtomicU64::new(0));
        let handle = PublishHandle {
            tx,
            dropped: dropped.clone(),
        };

        let frame = |id: u64| {
            let predictions = predictions_with(HashMap::new(), vec![]);
            QueuedFrame {
                detection: DetectionMessage::new(Utc::now(), id, 0, vec![]),
                zones: build_zone_event_message(&predictions, 0),
            }
        };

        let mut accepted = 0;
        for id in 0..10 {
            if handle.enqueue(frame(id)) {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 4);
        assert_eq!(dropped.load(Ordering::Relaxed), 6);

        // The retained frames are the first four, in order.
        let mut retained = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            retained.push(frame.detection.frame_id);
        }
        assert_eq!(retained, vec![0, 1, 2, 3]);
    }
}
