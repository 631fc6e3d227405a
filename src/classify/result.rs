use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-frame label scores. Labels missing from the map score 0.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassificationResult {
    scores: BTreeMap<String, f32>,
}

impl ClassificationResult {
    pub fn new<I, S>(scores: I) -> Self
    where
        I: IntoIterator<Item = (S, f32)>,
        S: Into<String>,
    {
        Self {
            scores: scores
                .into_iter()
                .map(|(label, score)| (label.into(), score))
                .collect(),
        }
    }

    pub fn score(&self, label: &str) -> f32 {
        self.scores.get(label).copied().unwrap_or(0.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f32)> {
        self.scores.iter().map(|(label, score)| (label.as_str(), *score))
    }

    /// Highest-scoring label. Non-finite scores are ignored.
    pub fn top(&self) -> Option<(&str, f32)> {
        self.iter()
            .filter(|(_, score)| score.is_finite())
            .fold(None, |best, (label, score)| match best {
                Some((_, best_score)) if best_score >= score => best,
                _ => Some((label, score)),
            })
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

/// Detected object in frame pixel coordinates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub label: String,
    pub score: f32,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferenceMode {
    #[default]
    Classification,
    Detection,
}

#[derive(Clone, Debug, PartialEq)]
pub enum InferenceOutput {
    Classification(ClassificationResult),
    Detection(Vec<BoundingBox>),
}

impl InferenceOutput {
    pub fn mode(&self) -> InferenceMode {
        match self {
            InferenceOutput::Classification(_) => InferenceMode::Classification,
            InferenceOutput::Detection(_) => InferenceMode::Detection,
        }
    }
}

/// Wall-clock split of one classify call, in milliseconds.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Timing {
    pub feature_extraction_ms: f64,
    pub inference_ms: f64,
}

impl Timing {
    pub fn total_ms(&self) -> f64 {
        self.feature_extraction_ms + self.inference_ms
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct InferenceResult {
    pub output: InferenceOutput,
    pub timing: Timing,
}

impl InferenceResult {
    /// Number of detected objects; always 0 in classification mode.
    pub fn object_count(&self) -> usize {
        match &self.output {
            InferenceOutput::Detection(boxes) => boxes.len(),
            InferenceOutput::Classification(_) => 0,
        }
    }

    pub fn classification(&self) -> Option<&ClassificationResult> {
        match &self.output {
            InferenceOutput::Classification(result) => Some(result),
            InferenceOutput::Detection(_) => None,
        }
    }
}

/// Metadata reported by a backend once its model is loaded.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModelInfo {
    pub owner: String,
    pub name: String,
    pub labels: Vec<String>,
    pub mode: InferenceMode,
}
