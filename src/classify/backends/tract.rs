#![cfg(feature = "backend-tract")]

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use tract_onnx::prelude::*;

use crate::classify::backend::ClassifierBackend;
use crate::classify::result::{
    BoundingBox, ClassificationResult, InferenceMode, InferenceOutput, InferenceResult, ModelInfo,
    Timing,
};
use crate::frame::RawFrame;

type Plan = TypedRunnableModel<TypedModel>;

/// Detection rows are `[x1, y1, x2, y2, score, class]`, coordinates normalized to 0..1.
const DETECTION_ROW_LEN: usize = 6;

/// Tract-based backend for ONNX image classifiers and detectors.
///
/// Input is NCHW f32 RGB scaled to 0..1. Classification models emit one score per label;
/// scores that do not already sum to ~1 are passed through softmax.
pub struct TractBackend {
    model_path: PathBuf,
    labels: Vec<String>,
    mode: InferenceMode,
    width: u32,
    height: u32,
    min_box_score: f32,
    plan: Option<Plan>,
}

impl TractBackend {
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        labels: Vec<String>,
        mode: InferenceMode,
        width: u32,
        height: u32,
    ) -> Self {
        Self {
            model_path: model_path.as_ref().to_path_buf(),
            labels,
            mode,
            width,
            height,
            min_box_score: 0.5,
            plan: None,
        }
    }

    /// Override the minimum score for reported detection boxes.
    pub fn with_min_box_score(mut self, min_box_score: f32) -> Self {
        self.min_box_score = min_box_score;
        self
    }

    fn build_input(&self, frame: &RawFrame) -> Result<Tensor> {
        let image = frame.to_image()?;
        let resized = if image.dimensions() == (self.width, self.height) {
            image
        } else {
            imageops::resize(&image, self.width, self.height, FilterType::Triangle)
        };
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.height as usize, self.width as usize),
            |(_, channel, y, x)| resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0,
        );
        Ok(input.into_tensor())
    }

    fn scores(&self, outputs: &TVec<TValue>) -> Result<Vec<f32>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        Ok(view.iter().copied().collect())
    }

    fn classification(&self, scores: Vec<f32>) -> Result<ClassificationResult> {
        if scores.len() != self.labels.len() {
            return Err(anyhow!(
                "model produced {} scores for {} labels",
                scores.len(),
                self.labels.len()
            ));
        }
        let scores = normalize_scores(scores);
        Ok(ClassificationResult::new(
            self.labels.iter().cloned().zip(scores),
        ))
    }

    fn detections(&self, values: Vec<f32>, frame: &RawFrame) -> Result<Vec<BoundingBox>> {
        if values.len() % DETECTION_ROW_LEN != 0 {
            return Err(anyhow!(
                "detection output length {} is not a multiple of {}",
                values.len(),
                DETECTION_ROW_LEN
            ));
        }
        let fw = frame.width as f32;
        let fh = frame.height as f32;
        let boxes = values
            .chunks_exact(DETECTION_ROW_LEN)
            .filter(|row| row[4] >= self.min_box_score)
            .map(|row| {
                let class = row[5].max(0.0) as usize;
                let label = self
                    .labels
                    .get(class)
                    .cloned()
                    .unwrap_or_else(|| format!("class_{}", class));
                let x1 = (row[0].clamp(0.0, 1.0) * fw) as u32;
                let y1 = (row[1].clamp(0.0, 1.0) * fh) as u32;
                let x2 = (row[2].clamp(0.0, 1.0) * fw) as u32;
                let y2 = (row[3].clamp(0.0, 1.0) * fh) as u32;
                BoundingBox {
                    label,
                    score: row[4],
                    x: x1.min(x2),
                    y: y1.min(y2),
                    width: x1.abs_diff(x2),
                    height: y1.abs_diff(y2),
                }
            })
            .collect();
        Ok(boxes)
    }
}

impl ClassifierBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn init(&mut self) -> Result<ModelInfo> {
        let plan = tract_onnx::onnx()
            .model_for_path(&self.model_path)
            .with_context(|| {
                format!(
                    "failed to load ONNX model from {}",
                    self.model_path.display()
                )
            })?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, self.height as usize, self.width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;
        self.plan = Some(plan);

        let name = self
            .model_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_else(|| "model".to_string());
        Ok(ModelInfo {
            owner: "local".to_string(),
            name,
            labels: self.labels.clone(),
            mode: self.mode,
        })
    }

    fn classify(&mut self, frame: &RawFrame) -> Result<InferenceResult> {
        let started = Instant::now();
        let input = self.build_input(frame)?;
        let feature_extraction_ms = started.elapsed().as_secs_f64() * 1000.0;

        let plan = self
            .plan
            .as_ref()
            .ok_or_else(|| anyhow!("tract classifier not initialized"))?;
        let started = Instant::now();
        let outputs = plan
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let inference_ms = started.elapsed().as_secs_f64() * 1000.0;

        let values = self.scores(&outputs)?;
        let output = match self.mode {
            InferenceMode::Classification => {
                InferenceOutput::Classification(self.classification(values)?)
            }
            InferenceMode::Detection => InferenceOutput::Detection(self.detections(values, frame)?),
        };
        Ok(InferenceResult {
            output,
            timing: Timing {
                feature_extraction_ms,
                inference_ms,
            },
        })
    }

    fn stop(&mut self) {
        self.plan = None;
    }
}

/// Softmax unless the scores already look like probabilities.
fn normalize_scores(scores: Vec<f32>) -> Vec<f32> {
    let sum: f32 = scores.iter().sum();
    let in_range = scores.iter().all(|s| (0.0..=1.0).contains(s));
    if in_range && (sum - 1.0).abs() < 1e-3 {
        return scores;
    }
    let max = scores.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = scores.iter().map(|s| (s - max).exp()).collect();
    let total: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / total).collect()
}
