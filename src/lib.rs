//! Gesture Hub
//!
//! Turns a camera pointed at a person into an appliance remote: a classifier labels
//! every frame ("light", "ac", "tv" or the neutral "other"), a debouncer turns sustained
//! pointing into one on/off toggle, and the toggle phrase is posted to a home-automation
//! hub. The annotated video and live metrics are served over HTTP.
//!
//! # Pipeline
//!
//! ```text
//! camera ──► capture ──► inference + debounce ──► encode ──► /video_feed
//!                               │        │
//!                               │        └──► live metrics ──► /inference_speed, /people_counter, /status
//!                               └──► dispatcher ──► hub webhook
//! ```
//!
//! # Module Structure
//!
//! - `frame`: RGB frames, rotation, box annotation, JPEG encoding
//! - `ingest`: camera sources (synthetic, HTTP MJPEG/snapshot, V4L2)
//! - `classify`: classifier backends and the session that owns one
//! - `gesture`: the debouncer and locale phrase tables
//! - `dispatch`: command sinks and the bounded dispatch worker
//! - `live`, `api`: latest-value state and the HTTP endpoints that read it
//! - `pipeline`: stage threads wiring everything together
//! - `config`: file + environment configuration

pub mod api;
pub mod classify;
pub mod config;
pub mod dispatch;
pub mod frame;
pub mod gesture;
pub mod ingest;
pub mod live;
pub mod pace;
pub mod pipeline;

pub use classify::{
    ClassificationResult, ClassifierBackend, ClassifierSession, InferenceMode, InferenceResult,
    ModelInfo, ScriptedBackend,
};
pub use config::GestureHubConfig;
pub use dispatch::{CommandSink, DispatchStats, Dispatcher, HubSink, LogSink};
pub use frame::{RawFrame, Rotation};
pub use gesture::{ApplianceCommand, DebounceConfig, GestureDebouncer, PhraseTable};
pub use ingest::{open_source, CameraSource, FrameSource};
pub use live::LiveState;
pub use pipeline::{Pipeline, PipelineHandle, PipelineOptions, PipelineReport};
