use anyhow::Result;

use crate::classify::result::{InferenceResult, ModelInfo};
use crate::frame::RawFrame;

/// Classifier backend trait.
///
/// A backend wraps one inference runtime. It is driven by exactly one thread at a time
/// through a `ClassifierSession`, which guarantees `stop` runs on every exit path.
pub trait ClassifierBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Load the model. Failure here is fatal for the process.
    fn init(&mut self) -> Result<ModelInfo>;

    /// Classify one frame. Failure here only skips the frame.
    fn classify(&mut self, frame: &RawFrame) -> Result<InferenceResult>;

    /// Release runtime resources. Must be safe to call after a failed `init`.
    fn stop(&mut self) {}
}
