//! Capture → classify/debounce → encode, one thread per stage.
//!
//! Stages are connected by bounded channels of depth 1. Capture blocks when inference
//! is busy, so frames queue at the camera rather than in memory. Inference hands frames
//! to the encoder with `try_send` and skips encoding when the encoder is behind.
//! Commands leave through the `Dispatcher`, never on the frame path.

use anyhow::{anyhow, Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::classify::{BoundingBox, ClassificationResult, ClassifierSession, InferenceOutput};
use crate::dispatch::Dispatcher;
use crate::frame::{annotate_boxes, encode_jpeg, RawFrame, DEFAULT_JPEG_QUALITY};
use crate::gesture::GestureDebouncer;
use crate::ingest::FrameSource;
use crate::live::LiveState;

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct PipelineOptions {
    pub jpeg_quality: u8,
    /// Encode annotated frames for the MJPEG stream.
    pub stream_frames: bool,
    /// Log every frame's scores, top label and FPS.
    pub print_scores: bool,
    pub health_interval: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            stream_frames: true,
            print_scores: false,
            health_interval: HEALTH_LOG_INTERVAL,
        }
    }
}

/// Totals from a finished pipeline run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PipelineReport {
    pub frames_captured: u64,
    pub frames_classified: u64,
    pub inference_errors: u64,
    pub frames_encoded: u64,
    pub commands_emitted: u64,
}

pub struct Pipeline {
    source: Box<dyn FrameSource>,
    session: ClassifierSession,
    debouncer: GestureDebouncer,
    dispatcher: Option<Dispatcher>,
    live: Arc<LiveState>,
    options: PipelineOptions,
}

type EncodeJob = (RawFrame, Vec<BoundingBox>);

impl Pipeline {
    /// `dispatcher` is `None` in preview mode: fired commands are only logged.
    pub fn new(
        source: Box<dyn FrameSource>,
        session: ClassifierSession,
        debouncer: GestureDebouncer,
        dispatcher: Option<Dispatcher>,
        live: Arc<LiveState>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            source,
            session,
            debouncer,
            dispatcher,
            live,
            options,
        }
    }

    pub fn spawn(self, shutdown: Arc<AtomicBool>) -> Result<PipelineHandle> {
        let Pipeline {
            source,
            session,
            debouncer,
            dispatcher,
            live,
            options,
        } = self;
        live.publish_debounce(debouncer.snapshot());

        let (frame_tx, frame_rx) = mpsc::sync_channel::<RawFrame>(1);
        let (encode_tx, encode_rx) = mpsc::sync_channel::<EncodeJob>(1);

        let encode = if options.stream_frames {
            let live = live.clone();
            let quality = options.jpeg_quality;
            Some(
                std::thread::Builder::new()
                    .name("encode".to_string())
                    .spawn(move || run_encode(encode_rx, &live, quality))?,
            )
        } else {
            drop(encode_rx);
            None
        };

        let inference = {
            let live = live.clone();
            let shutdown = shutdown.clone();
            let stage = InferenceStage {
                session,
                debouncer,
                dispatcher,
                encode_tx: encode.as_ref().map(|_| encode_tx),
                print_scores: options.print_scores,
            };
            std::thread::Builder::new()
                .name("inference".to_string())
                .spawn(move || stage.run(frame_rx, &live, &shutdown))?
        };

        let health_stop = Arc::new(AtomicBool::new(false));
        let health = {
            let live = live.clone();
            let shutdown = shutdown.clone();
            let health_stop = health_stop.clone();
            let interval = options.health_interval;
            std::thread::Builder::new()
                .name("health".to_string())
                .spawn(move || run_health(&live, &shutdown, &health_stop, interval))?
        };

        let capture = {
            let shutdown = shutdown.clone();
            std::thread::Builder::new()
                .name("capture".to_string())
                .spawn(move || run_capture(source, frame_tx, &live, &shutdown))?
        };

        Ok(PipelineHandle {
            shutdown,
            health_stop,
            capture: Some(capture),
            inference: Some(inference),
            encode,
            health: Some(health),
        })
    }
}

pub struct PipelineHandle {
    shutdown: Arc<AtomicBool>,
    health_stop: Arc<AtomicBool>,
    capture: Option<JoinHandle<Result<u64>>>,
    inference: Option<JoinHandle<InferenceReport>>,
    encode: Option<JoinHandle<u64>>,
    health: Option<JoinHandle<()>>,
}

impl PipelineHandle {
    /// True once the source is exhausted or has failed and inference has drained.
    pub fn is_finished(&self) -> bool {
        finished(&self.capture) && finished(&self.inference)
    }

    /// Ask every stage to stop, then wait for them.
    pub fn stop(self) -> Result<PipelineReport> {
        self.shutdown.store(true, Ordering::SeqCst);
        self.join()
    }

    /// Wait for the stages to finish on their own. A source error is returned after
    /// every stage has stopped, so the classifier session is always released first.
    pub fn join(mut self) -> Result<PipelineReport> {
        let capture = self
            .capture
            .take()
            .map(|join| join.join().map_err(|_| anyhow!("capture thread panicked")));
        let inference = self
            .inference
            .take()
            .map(|join| join.join().map_err(|_| anyhow!("inference thread panicked")));
        let encode = self
            .encode
            .take()
            .map(|join| join.join().map_err(|_| anyhow!("encode thread panicked")));

        self.health_stop.store(true, Ordering::SeqCst);
        if let Some(join) = self.health.take() {
            join.join()
                .map_err(|_| anyhow!("health thread panicked"))?;
        }

        let inference = inference.transpose()?.unwrap_or_default();
        let frames_encoded = encode.transpose()?.unwrap_or(0);

        let frames_captured = match capture {
            Some(result) => result??,
            None => 0,
        };
        Ok(PipelineReport {
            frames_captured,
            frames_classified: inference.frames_classified,
            inference_errors: inference.inference_errors,
            frames_encoded,
            commands_emitted: inference.commands_emitted,
        })
    }
}

fn finished<T>(join: &Option<JoinHandle<T>>) -> bool {
    join.as_ref().map_or(true, JoinHandle::is_finished)
}

fn run_capture(
    mut source: Box<dyn FrameSource>,
    frames: SyncSender<RawFrame>,
    live: &LiveState,
    shutdown: &AtomicBool,
) -> Result<u64> {
    let mut captured = 0u64;
    log::info!("capturing from {}", source.describe());

    while !shutdown.load(Ordering::SeqCst) {
        let frame = source.next_frame();
        live.record_source_health(source.is_healthy());
        let frame = frame.with_context(|| format!("frame source {} failed", source.describe()))?;
        let Some(frame) = frame else {
            log::info!(
                "frame source {} ended after {} frames",
                source.describe(),
                source.stats().frames_captured
            );
            break;
        };
        captured += 1;
        live.record_capture();
        if frames.send(frame).is_err() {
            break;
        }
    }
    Ok(captured)
}

/// Logs a health line every `interval`, independent of the capture loop so a camera
/// stuck inside `next_frame` still shows up.
fn run_health(live: &LiveState, shutdown: &AtomicBool, stop: &AtomicBool, interval: Duration) {
    const TICK: Duration = Duration::from_millis(50);
    let mut last_log = Instant::now();
    while !shutdown.load(Ordering::SeqCst) && !stop.load(Ordering::SeqCst) {
        std::thread::sleep(TICK.min(interval));
        if last_log.elapsed() < interval {
            continue;
        }
        let (level, line) = health_line(live, interval);
        log::log!(level, "{}", line);
        last_log = Instant::now();
    }
}

/// Warns when no frame arrived during the last `interval`.
fn health_line(live: &LiveState, interval: Duration) -> (log::Level, String) {
    let age = live.since_last_capture();
    let stalled = age.map_or(true, |age| age >= interval);
    let dispatch = live.dispatch();
    let counters = format!(
        "captured={} classified={} inference_errors={} commands ok={} failed={} dropped={}",
        live.frames_captured(),
        live.frames_classified(),
        live.inference_errors(),
        dispatch.succeeded,
        dispatch.failed,
        dispatch.dropped
    );
    let age_text = age.map_or_else(
        || "never".to_string(),
        |age| format!("{:.1}s ago", age.as_secs_f64()),
    );
    if stalled {
        (
            log::Level::Warn,
            format!(
                "camera stalled: last frame {} (healthy={}) {}",
                age_text,
                live.source_healthy(),
                counters
            ),
        )
    } else {
        (
            log::Level::Info,
            format!(
                "camera healthy={} last frame {} {}",
                live.source_healthy(),
                age_text,
                counters
            ),
        )
    }
}

#[derive(Debug, Default)]
struct InferenceReport {
    frames_classified: u64,
    inference_errors: u64,
    commands_emitted: u64,
}

struct InferenceStage {
    session: ClassifierSession,
    debouncer: GestureDebouncer,
    dispatcher: Option<Dispatcher>,
    encode_tx: Option<SyncSender<EncodeJob>>,
    print_scores: bool,
}

impl InferenceStage {
    fn run(
        mut self,
        frames: Receiver<RawFrame>,
        live: &LiveState,
        shutdown: &AtomicBool,
    ) -> InferenceReport {
        let mut report = InferenceReport::default();
        let mut last_classified: Option<Instant> = None;

        for frame in frames {
            if shutdown.load(Ordering::SeqCst) {
                break;
            }
            let result = match self.session.classify(&frame) {
                Ok(result) => result,
                Err(err) => {
                    report.inference_errors += 1;
                    live.record_inference_error();
                    log::warn!("inference failed on frame {}: {:#}", frame.sequence, err);
                    continue;
                }
            };
            report.frames_classified += 1;

            let now = Instant::now();
            let fps = last_classified
                .map(|last| now.duration_since(last).as_secs_f64())
                .filter(|secs| *secs > 0.0)
                .map_or(0.0, |secs| 1.0 / secs);
            last_classified = Some(now);

            let inference_ms = result.timing.total_ms();
            let (boxes, object_count) = match result.output {
                InferenceOutput::Classification(scores) => {
                    if self.print_scores {
                        print_scores(&scores, fps);
                    }
                    if let Some(command) = self.debouncer.observe(&scores) {
                        report.commands_emitted += 1;
                        match &self.dispatcher {
                            Some(dispatcher) => {
                                dispatcher.submit(command);
                            }
                            None => log::info!("preview: not sending \"{}\"", command.instruction),
                        }
                    }
                    live.publish_debounce(self.debouncer.snapshot());
                    (Vec::new(), None)
                }
                InferenceOutput::Detection(boxes) => {
                    if self.print_scores {
                        log::info!("{} objects | {:.1} fps", boxes.len(), fps);
                    }
                    let count = boxes.len();
                    (boxes, Some(count))
                }
            };
            live.publish_inference(inference_ms, object_count, fps);

            if let Some(encode_tx) = &self.encode_tx {
                match encode_tx.try_send((frame, boxes)) {
                    Ok(()) | Err(TrySendError::Full(_)) => {}
                    Err(TrySendError::Disconnected(_)) => {
                        log::warn!("encoder stopped; no longer streaming frames");
                        self.encode_tx = None;
                    }
                }
            }
        }

        if let Some(dispatcher) = self.dispatcher.take() {
            if let Err(err) = dispatcher.shutdown() {
                log::error!("{:#}", err);
            }
        }
        report
    }
}

fn print_scores(scores: &ClassificationResult, fps: f64) {
    let line = scores
        .iter()
        .map(|(label, score)| format!("{}: {:.3}", label, score))
        .collect::<Vec<_>>()
        .join("  ");
    let top = scores.top().map_or("-", |(label, _)| label);
    log::info!("{} | top: {} | {:.1} fps", line, top, fps);
}

fn run_encode(jobs: Receiver<EncodeJob>, live: &LiveState, quality: u8) -> u64 {
    let mut encoded = 0u64;
    for (frame, boxes) in jobs {
        let jpeg = frame.to_image().and_then(|mut image| {
            annotate_boxes(&mut image, &boxes);
            encode_jpeg(&image, quality)
        });
        match jpeg {
            Ok(jpeg) => {
                live.publish_frame(frame.sequence, jpeg);
                encoded += 1;
            }
            Err(err) => log::warn!("could not encode frame {}: {:#}", frame.sequence, err),
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::DispatchStats;

    #[test]
    fn health_line_warns_when_no_frame_arrives() {
        let live = LiveState::new(Arc::new(DispatchStats::default()));
        let (level, line) = health_line(&live, Duration::from_secs(5));
        assert_eq!(level, log::Level::Warn);
        assert!(line.contains("last frame never"));

        live.record_capture();
        let (level, line) = health_line(&live, Duration::from_secs(5));
        assert_eq!(level, log::Level::Info);
        assert!(line.contains("captured=1"));

        std::thread::sleep(Duration::from_millis(30));
        let (level, line) = health_line(&live, Duration::from_millis(20));
        assert_eq!(level, log::Level::Warn);
        assert!(line.starts_with("camera stalled"));
    }
}
