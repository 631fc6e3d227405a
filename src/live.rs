//! Latest-value state shared between the pipeline and stream viewers.
//!
//! Writers publish without waiting on readers; readers only ever see the most recent
//! value. Nothing here is queued or persisted.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::dispatch::{DispatchCounters, DispatchStats};
use crate::gesture::DebounceSnapshot;

/// One encoded frame ready for the MJPEG stream.
#[derive(Clone, Debug)]
pub struct EncodedFrame {
    pub sequence: u64,
    pub jpeg: Arc<Vec<u8>>,
}

#[derive(Debug)]
pub struct LiveState {
    frame: Mutex<Option<EncodedFrame>>,
    debounce: Mutex<DebounceSnapshot>,
    inference_ms_bits: AtomicU64,
    fps_bits: AtomicU64,
    object_count: AtomicU64,
    frames_captured: AtomicU64,
    last_capture: Mutex<Option<Instant>>,
    source_healthy: AtomicBool,
    frames_classified: AtomicU64,
    inference_errors: AtomicU64,
    frames_encoded: AtomicU64,
    dispatch: Arc<DispatchStats>,
    started_at: Instant,
}

#[derive(Clone, Debug, Serialize)]
pub struct StatusReport {
    pub uptime_secs: u64,
    pub frames_captured: u64,
    /// Time since the last captured frame; `None` before the first one.
    pub last_frame_age_ms: Option<u64>,
    pub source_healthy: bool,
    pub frames_classified: u64,
    pub inference_errors: u64,
    pub frames_encoded: u64,
    pub last_inference_ms: f64,
    pub object_count: u64,
    pub fps: f64,
    pub debouncer: DebounceSnapshot,
    pub dispatch: DispatchCounters,
}

impl LiveState {
    pub fn new(dispatch: Arc<DispatchStats>) -> Self {
        Self {
            frame: Mutex::new(None),
            debounce: Mutex::new(DebounceSnapshot::default()),
            inference_ms_bits: AtomicU64::new(0f64.to_bits()),
            fps_bits: AtomicU64::new(0f64.to_bits()),
            object_count: AtomicU64::new(0),
            frames_captured: AtomicU64::new(0),
            last_capture: Mutex::new(None),
            source_healthy: AtomicBool::new(true),
            frames_classified: AtomicU64::new(0),
            inference_errors: AtomicU64::new(0),
            frames_encoded: AtomicU64::new(0),
            dispatch,
            started_at: Instant::now(),
        }
    }

    pub fn record_capture(&self) {
        self.frames_captured.fetch_add(1, Ordering::Relaxed);
        *lock(&self.last_capture) = Some(Instant::now());
    }

    pub fn record_source_health(&self, healthy: bool) {
        self.source_healthy.store(healthy, Ordering::Relaxed);
    }

    pub fn record_inference_error(&self) {
        self.inference_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// `object_count` is only known in detection mode; `None` keeps the last count.
    pub fn publish_inference(&self, inference_ms: f64, object_count: Option<usize>, fps: f64) {
        self.inference_ms_bits
            .store(inference_ms.to_bits(), Ordering::Relaxed);
        if let Some(count) = object_count {
            self.object_count.store(count as u64, Ordering::Relaxed);
        }
        self.fps_bits.store(fps.to_bits(), Ordering::Relaxed);
        self.frames_classified.fetch_add(1, Ordering::Relaxed);
    }

    pub fn publish_debounce(&self, snapshot: DebounceSnapshot) {
        *lock(&self.debounce) = snapshot;
    }

    pub fn publish_frame(&self, sequence: u64, jpeg: Vec<u8>) {
        *lock(&self.frame) = Some(EncodedFrame {
            sequence,
            jpeg: Arc::new(jpeg),
        });
        self.frames_encoded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn latest_frame(&self) -> Option<EncodedFrame> {
        lock(&self.frame).clone()
    }

    pub fn inference_ms(&self) -> f64 {
        f64::from_bits(self.inference_ms_bits.load(Ordering::Relaxed))
    }

    pub fn object_count(&self) -> u64 {
        self.object_count.load(Ordering::Relaxed)
    }

    pub fn fps(&self) -> f64 {
        f64::from_bits(self.fps_bits.load(Ordering::Relaxed))
    }

    pub fn frames_captured(&self) -> u64 {
        self.frames_captured.load(Ordering::Relaxed)
    }

    pub fn since_last_capture(&self) -> Option<Duration> {
        lock(&self.last_capture).map(|at| at.elapsed())
    }

    pub fn source_healthy(&self) -> bool {
        self.source_healthy.load(Ordering::Relaxed)
    }

    pub fn frames_classified(&self) -> u64 {
        self.frames_classified.load(Ordering::Relaxed)
    }

    pub fn inference_errors(&self) -> u64 {
        self.inference_errors.load(Ordering::Relaxed)
    }

    pub fn dispatch(&self) -> DispatchCounters {
        self.dispatch.snapshot()
    }

    pub fn status(&self) -> StatusReport {
        StatusReport {
            uptime_secs: self.started_at.elapsed().as_secs(),
            frames_captured: self.frames_captured(),
            last_frame_age_ms: self
                .since_last_capture()
                .map(|age| age.as_millis() as u64),
            source_healthy: self.source_healthy(),
            frames_classified: self.frames_classified(),
            inference_errors: self.inference_errors(),
            frames_encoded: self.frames_encoded.load(Ordering::Relaxed),
            last_inference_ms: self.inference_ms(),
            object_count: self.object_count(),
            fps: self.fps(),
            debouncer: lock(&self.debounce).clone(),
            dispatch: self.dispatch(),
        }
    }
}

/// Snapshot readers keep going on a poisoned lock; the data is plain values.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
