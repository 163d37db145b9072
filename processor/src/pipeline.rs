//! Frame pipeline plumbing: source → inference → dispatch.
//!
//! Three tasks connected by bounded channels. Each callback runs on a task
//! owned by the pipeline, never on the caller's; failures inside callbacks
//! become log lines and dropped frames, never propagated errors.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use cupertino_zone::DetectionBatch;

use crate::registry::ZoneResult;

/// Wait until a `watch` flag becomes true, without holding the borrowed
/// `Ref` across an `.await` point (keeps the enclosing future `Send`).
async fn wait_stopped(stop: &mut watch::Receiver<bool>) {
    loop {
        if *stop.borrow() {
            return;
        }
        if stop.changed().await.is_err() {
            return;
        }
    }
}

/// Decoded frame pixels. The buffer is shared, not copied, between tasks.
#[derive(Debug, Clone)]
pub struct FrameImage {
    pub width: u32,
    pub height: u32,
    pub data: Arc<Vec<u8>>,
}

/// One decoded frame with its pipeline metadata.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub frame_id: u64,
    pub timestamp: DateTime<Utc>,
    pub image: FrameImage,
}

/// External decoder seam. `next_frame` returning `None` ends the stream
/// and the pipeline drains to a stop.
#[async_trait]
pub trait VideoSource: Send {
    async fn next_frame(&mut self) -> Option<VideoFrame>;
}

/// External multi-object tracker seam. Not thread-safe by contract: the
/// pipeline invokes it only from the inference task.
pub trait MultiObjectTracker: Send {
    fn update(&mut self, batch: DetectionBatch) -> DetectionBatch;
}

/// Identity tracker for engines that already assign stable tracker ids.
pub struct PassthroughTracker;

impl MultiObjectTracker for PassthroughTracker {
    fn update(&mut self, batch: DetectionBatch) -> DetectionBatch {
        batch
    }
}

/// Everything the inference callback produced for one frame.
#[derive(Debug, Clone)]
pub struct FramePredictions {
    pub frame_id: u64,
    pub timestamp: DateTime<Utc>,
    pub detections: DetectionBatch,
    pub zone_results: HashMap<String, ZoneResult>,
    pub zone_counts: HashMap<String, u64>,
    pub class_names: Arc<HashMap<u32, String>>,
}

pub type InferenceFn = Box<dyn FnMut(&VideoFrame) -> Option<FramePredictions> + Send>;
pub type DispatchFn = Box<dyn FnMut(&FramePredictions, &VideoFrame) + Send>;

/// Owns the source, inference, and dispatch tasks plus the stop signal.
pub struct InferencePipeline {
    source: Option<Box<dyn VideoSource>>,
    on_frame: Option<InferenceFn>,
    on_prediction: Option<DispatchFn>,
    max_fps: u32,
    stop: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl InferencePipeline {
    pub fn new(
        source: Box<dyn VideoSource>,
        on_frame: InferenceFn,
        on_prediction: DispatchFn,
        max_fps: u32,
    ) -> Self {
        let (stop, stop_rx) = watch::channel(false);
        Self {
            source: Some(source),
            on_frame: Some(on_frame),
            on_prediction: Some(on_prediction),
            max_fps,
            stop,
            stop_rx,
            tasks: Vec::new(),
        }
    }

    /// Spawn the three pipeline tasks. Non-blocking; idempotent after the
    /// first call.
    pub fn start(&mut self) {
        let (Some(mut source), Some(mut on_frame), Some(mut on_prediction)) = (
            self.source.take(),
            self.on_frame.take(),
            self.on_prediction.take(),
        ) else {
            return;
        };

        let (frame_tx, mut frame_rx) = mpsc::channel::<VideoFrame>(4);
        let (pred_tx, mut pred_rx) = mpsc::channel::<(FramePredictions, VideoFrame)>(8);

        let mut stop = self.stop_rx.clone();
        let max_fps = self.max_fps.max(1);
        self.tasks.push(tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_secs_f64(1.0 / f64::from(max_fps)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = wait_stopped(&mut stop) => break,
                    _ = ticker.tick() => {
                        match source.next_frame().await {
                            Some(frame) => {
                                if frame_tx.send(frame).await.is_err() {
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                }
            }
            debug!("video source task finished");
        }));

        self.tasks.push(tokio::spawn(async move {
            while let Some(frame) = frame_rx.recv().await {
                if let Some(predictions) = on_frame(&frame) {
                    if pred_tx.send((predictions, frame)).await.is_err() {
                        break;
                    }
                }
            }
            debug!("inference task finished");
        }));

        self.tasks.push(tokio::spawn(async move {
            while let Some((predictions, frame)) = pred_rx.recv().await {
                on_prediction(&predictions, &frame);
            }
            debug!("dispatch task finished");
        }));
    }

    /// Signal the source task to stop; the downstream tasks drain and exit.
    pub fn terminate(&self) {
        let _ = self.stop.send(true);
    }

    /// Await every pipeline task.
    pub async fn join(&mut self) {
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
    }
}
