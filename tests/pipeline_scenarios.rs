use anyhow::{anyhow, Result};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use gesture_hub::classify::{ClassifierSession, ScriptedBackend};
use gesture_hub::config::CameraSettings;
use gesture_hub::dispatch::{CommandSink, DispatchStats, Dispatcher};
use gesture_hub::frame::{RawFrame, Rotation};
use gesture_hub::gesture::{ApplianceCommand, DebounceConfig, GestureDebouncer, PhraseTable};
use gesture_hub::ingest::{open_source, FrameSource, SourceStats};
use gesture_hub::live::LiveState;
use gesture_hub::pipeline::{Pipeline, PipelineOptions, PipelineReport};

/// Records every command and rejects the ones whose phrase is listed in `reject`.
#[derive(Clone, Default)]
struct RecordingSink {
    sent: Arc<Mutex<Vec<ApplianceCommand>>>,
    reject: Vec<String>,
}

impl CommandSink for RecordingSink {
    fn describe(&self) -> String {
        "recording sink".to_string()
    }

    fn send(&mut self, command: &ApplianceCommand) -> Result<()> {
        self.sent.lock().unwrap().push(command.clone());
        if self.reject.contains(&command.instruction) {
            return Err(anyhow!("hub returned status 500"));
        }
        Ok(())
    }
}

/// Yields `good` frames, then fails.
struct FailingSource {
    good: u64,
    produced: u64,
}

impl FrameSource for FailingSource {
    fn describe(&self) -> String {
        "failing test camera".to_string()
    }

    fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<RawFrame>> {
        if self.produced >= self.good {
            return Err(anyhow!("camera unplugged"));
        }
        self.produced += 1;
        RawFrame::new(vec![0u8; 4 * 4 * 3], 4, 4, self.produced).map(Some)
    }

    fn is_healthy(&self) -> bool {
        self.produced < self.good
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.produced,
            source: self.describe(),
        }
    }
}

fn scores(label: &str) -> String {
    let entries: Vec<String> = ["ac", "light", "other", "tv"]
        .iter()
        .map(|l| format!("\"{}\": {}", l, if *l == label { 0.97 } else { 0.01 }))
        .collect();
    format!("{{{}}}", entries.join(", "))
}

/// A JSON script from (label, repeat) runs. `None` marks a failed inference.
fn script(runs: &[(Option<&str>, usize)]) -> (String, u64) {
    let mut frames = Vec::new();
    for (label, count) in runs {
        for _ in 0..*count {
            frames.push(label.map_or_else(|| "null".to_string(), scores));
        }
    }
    let len = frames.len() as u64;
    (format!("[{}]", frames.join(", ")), len)
}

fn stub_camera(frames: u64) -> Box<dyn FrameSource> {
    let settings = CameraSettings {
        url: format!("stub://test?frames={}", frames),
        width: 8,
        height: 8,
        rotation: Rotation::None,
        target_fps: 0,
    };
    open_source(&settings).expect("open stub camera")
}

struct Run {
    report: Result<PipelineReport>,
    live: Arc<LiveState>,
    sent: Vec<ApplianceCommand>,
}

fn run(source: Box<dyn FrameSource>, raw_script: &str, sink: RecordingSink) -> Run {
    let backend = ScriptedBackend::from_json(raw_script, false).expect("script");
    let session = ClassifierSession::open(Box::new(backend)).expect("session");
    let phrases = PhraseTable::builtin("en").expect("phrases");
    let debouncer = GestureDebouncer::new(DebounceConfig::default(), phrases).expect("debouncer");
    let stats = Arc::new(DispatchStats::default());
    let dispatcher =
        Dispatcher::spawn(Box::new(sink.clone()), 16, stats.clone()).expect("dispatcher");
    let live = Arc::new(LiveState::new(stats));

    let handle = Pipeline::new(
        source,
        session,
        debouncer,
        Some(dispatcher),
        live.clone(),
        PipelineOptions::default(),
    )
    .spawn(Arc::new(AtomicBool::new(false)))
    .expect("spawn pipeline");
    let report = handle.join();
    let sent = sink.sent.lock().unwrap().clone();
    Run { report, live, sent }
}

#[test]
fn pointing_twice_toggles_light_on_then_off() {
    let (raw, frames) = script(&[
        (Some("other"), 3),
        (Some("light"), 4),
        (Some("other"), 3),
        (Some("light"), 4),
    ]);
    let result = run(stub_camera(frames), &raw, RecordingSink::default());

    let report = result.report.expect("pipeline report");
    assert_eq!(report.frames_captured, frames);
    assert_eq!(report.frames_classified, frames);
    assert_eq!(report.inference_errors, 0);
    assert_eq!(report.commands_emitted, 2);
    assert!(report.frames_encoded >= 1);

    let phrases: Vec<&str> = result
        .sent
        .iter()
        .map(|cmd| cmd.instruction.as_str())
        .collect();
    assert_eq!(phrases, vec!["turn on the light", "turn off the light"]);

    let status = result.live.status();
    assert_eq!(status.dispatch.submitted, 2);
    assert_eq!(status.dispatch.succeeded, 2);
    assert_eq!(status.debouncer.commands_emitted, 2);
    assert!(!status.debouncer.armed);
    assert!(result.live.latest_frame().is_some());
}

#[test]
fn unarmed_pointing_sends_nothing() {
    let (raw, frames) = script(&[(Some("tv"), 10)]);
    let result = run(stub_camera(frames), &raw, RecordingSink::default());

    let report = result.report.expect("pipeline report");
    assert_eq!(report.commands_emitted, 0);
    assert!(result.sent.is_empty());
}

#[test]
fn rejected_command_keeps_the_flipped_toggle() {
    let (raw, frames) = script(&[(Some("other"), 3), (Some("ac"), 4)]);
    let sink = RecordingSink {
        reject: vec!["turn on the air conditioner".to_string()],
        ..RecordingSink::default()
    };
    let result = run(stub_camera(frames), &raw, sink);

    result.report.expect("pipeline report");
    assert_eq!(result.sent.len(), 1);
    let status = result.live.status();
    assert_eq!(status.dispatch.failed, 1);
    assert_eq!(status.dispatch.succeeded, 0);
    let ac = status
        .debouncer
        .targets
        .iter()
        .find(|target| target.label == "ac")
        .expect("ac state");
    assert!(ac.toggled_on);
}

#[test]
fn failed_inference_skips_the_frame() {
    let (raw, frames) = script(&[(Some("other"), 1), (None, 1), (Some("other"), 1)]);
    let result = run(stub_camera(frames), &raw, RecordingSink::default());

    let report = result.report.expect("pipeline report");
    assert_eq!(report.frames_captured, 3);
    assert_eq!(report.frames_classified, 2);
    assert_eq!(report.inference_errors, 1);
    assert_eq!(result.live.inference_errors(), 1);
}

#[test]
fn detection_model_counts_objects_without_commands() {
    let raw = r#"[
        {"boxes": [{"label": "person", "score": 0.9, "x": 0, "y": 0, "width": 2, "height": 2}]},
        {"boxes": [
            {"label": "person", "score": 0.9, "x": 0, "y": 0, "width": 2, "height": 2},
            {"label": "person", "score": 0.8, "x": 4, "y": 4, "width": 2, "height": 2}
        ]}
    ]"#;
    let result = run(stub_camera(2), raw, RecordingSink::default());

    let report = result.report.expect("pipeline report");
    assert_eq!(report.commands_emitted, 0);
    assert_eq!(result.live.object_count(), 2);
    assert!(result.sent.is_empty());
}

#[test]
fn camera_failure_ends_the_run_with_an_error() {
    let (raw, _) = script(&[(Some("other"), 5)]);
    let source = Box::new(FailingSource {
        good: 2,
        produced: 0,
    });
    let result = run(source, &raw, RecordingSink::default());

    let err = result.report.expect_err("camera failure should surface");
    assert!(format!("{:#}", err).contains("camera unplugged"));
    assert_eq!(result.live.frames_captured(), 2);
}
