//! # cupertino-processor
//!
//! Stream-processing service for zone analytics: consumes a live video
//! source, runs detection + tracking on every decoded frame, evaluates a
//! hot-reconfigurable set of spatial zones, and publishes per-frame
//! detections and zone state to the MQTT data plane. A control plane on
//! the same bus accepts runtime commands that reconfigure zones and swap
//! the detector model without restarting the pipeline.
//!
//! ## Threading model
//!
//! Five cooperating tasks, each owning its suspension points:
//! 1. Video source — decodes (or simulates) frames, throttled to max_fps
//! 2. Inference — model invocation, tracking, zone evaluation
//! 3. Dispatch — envelope building and non-blocking enqueue
//! 4. Publisher worker — drains the bounded queue onto the bus
//! 5. MQTT event loops — control-plane commands and publisher sessions
//!
//! Shared state is confined to three locks (zone registry map, current
//! model pointer, command table); none are ever nested.

pub mod config;
pub mod control;
pub mod model;
pub mod pipeline;
pub mod registry;
pub mod service;
pub mod sim;
