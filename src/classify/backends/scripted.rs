use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Instant;

use crate::classify::backend::ClassifierBackend;
use crate::classify::result::{
    BoundingBox, ClassificationResult, InferenceMode, InferenceOutput, InferenceResult, ModelInfo,
    Timing,
};
use crate::frame::RawFrame;

/// One scripted frame as written in a script file.
///
/// - `{"light": 0.95, "other": 0.05}`: classification scores
/// - `{"boxes": [{"label": "person", "score": 0.8, "x": 1, "y": 2, "width": 3, "height": 4}]}`
/// - `null`: the frame fails inference
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ScriptEntry {
    Boxes { boxes: Vec<BoundingBox> },
    Scores(ClassificationResult),
}

/// Replays a fixed sequence of inference outputs, one per classified frame.
///
/// Used for demos without a model file and for driving the pipeline in tests.
pub struct ScriptedBackend {
    frames: Vec<Option<InferenceOutput>>,
    cursor: usize,
    repeat: bool,
    stopped: bool,
}

impl ScriptedBackend {
    pub fn new(frames: Vec<Option<InferenceOutput>>, repeat: bool) -> Self {
        Self {
            frames,
            cursor: 0,
            repeat,
            stopped: false,
        }
    }

    /// Load a JSON script: an array of scripted frames.
    pub fn from_path<P: AsRef<Path>>(path: P, repeat: bool) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read classifier script {}", path.display()))?;
        Self::from_json(&raw, repeat)
            .with_context(|| format!("invalid classifier script {}", path.display()))
    }

    pub fn from_json(raw: &str, repeat: bool) -> Result<Self> {
        let entries: Vec<Option<ScriptEntry>> = serde_json::from_str(raw)?;
        let frames = entries
            .into_iter()
            .map(|entry| {
                entry.map(|entry| match entry {
                    ScriptEntry::Boxes { boxes } => InferenceOutput::Detection(boxes),
                    ScriptEntry::Scores(scores) => InferenceOutput::Classification(scores),
                })
            })
            .collect();
        Ok(Self::new(frames, repeat))
    }

    /// Built-in demo: neutral, point at the light, neutral, point at the TV, repeat.
    pub fn demo() -> Self {
        let scores = |label: &str| {
            let labels = ["ac", "light", "other", "tv"];
            Some(InferenceOutput::Classification(ClassificationResult::new(
                labels
                    .iter()
                    .map(|l| (*l, if *l == label { 0.96 } else { 0.01 })),
            )))
        };
        let mut frames = Vec::new();
        for target in ["light", "tv", "light", "ac"] {
            frames.extend(std::iter::repeat_with(|| scores("other")).take(6));
            frames.extend(std::iter::repeat_with(|| scores(target)).take(8));
        }
        Self::new(frames, true)
    }

    fn labels(&self) -> Vec<String> {
        let mut labels = BTreeSet::new();
        for output in self.frames.iter().flatten() {
            match output {
                InferenceOutput::Classification(scores) => {
                    labels.extend(scores.iter().map(|(label, _)| label.to_string()));
                }
                InferenceOutput::Detection(boxes) => {
                    labels.extend(boxes.iter().map(|bb| bb.label.clone()));
                }
            }
        }
        labels.into_iter().collect()
    }

    fn mode(&self) -> InferenceMode {
        self.frames
            .iter()
            .flatten()
            .next()
            .map(InferenceOutput::mode)
            .unwrap_or_default()
    }
}

impl ClassifierBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn init(&mut self) -> Result<ModelInfo> {
        if self.frames.is_empty() {
            return Err(anyhow!("classifier script is empty"));
        }
        self.stopped = false;
        Ok(ModelInfo {
            owner: "local".to_string(),
            name: "scripted".to_string(),
            labels: self.labels(),
            mode: self.mode(),
        })
    }

    fn classify(&mut self, _frame: &RawFrame) -> Result<InferenceResult> {
        let start = Instant::now();
        if self.stopped {
            return Err(anyhow!("scripted classifier stopped"));
        }
        if self.cursor >= self.frames.len() {
            if !self.repeat {
                return Err(anyhow!("classifier script exhausted"));
            }
            self.cursor = 0;
        }
        let entry = self.frames[self.cursor].clone();
        self.cursor += 1;
        let output = entry.ok_or_else(|| anyhow!("scripted inference failure"))?;
        Ok(InferenceResult {
            output,
            timing: Timing {
                feature_extraction_ms: 0.0,
                inference_ms: start.elapsed().as_secs_f64() * 1000.0,
            },
        })
    }

    fn stop(&mut self) {
        self.stopped = true;
    }
}
