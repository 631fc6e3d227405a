//! Frame classification.
//!
//! Backends turn one RGB frame into label scores (classification mode) or bounding
//! boxes (detection mode) plus timing. A `ClassifierSession` owns the backend for the
//! lifetime of the capture session and releases it on drop.

mod backend;
pub mod backends;
mod result;
mod session;

use anyhow::{anyhow, Result};

use crate::config::{BackendKind, ModelSettings};

pub use backend::ClassifierBackend;
pub use backends::ScriptedBackend;
pub use result::{
    BoundingBox, ClassificationResult, InferenceMode, InferenceOutput, InferenceResult, ModelInfo,
    Timing,
};
pub use session::ClassifierSession;

/// Build the backend selected by `settings`. The backend is not initialized yet.
pub fn open_backend(settings: &ModelSettings) -> Result<Box<dyn ClassifierBackend>> {
    match settings.backend {
        BackendKind::Scripted => match &settings.path {
            Some(path) => Ok(Box::new(ScriptedBackend::from_path(
                path,
                settings.repeat_script,
            )?)),
            None => Ok(Box::new(ScriptedBackend::demo())),
        },
        BackendKind::Tract => {
            let path = settings
                .path
                .as_ref()
                .ok_or_else(|| anyhow!("model.path is required for the tract backend"))?;
            open_tract(settings, path)
        }
    }
}

#[cfg(feature = "backend-tract")]
fn open_tract(
    settings: &ModelSettings,
    path: &std::path::Path,
) -> Result<Box<dyn ClassifierBackend>> {
    Ok(Box::new(
        backends::TractBackend::new(
            path,
            settings.labels.clone(),
            settings.mode,
            settings.input_width,
            settings.input_height,
        )
        .with_min_box_score(settings.min_box_score),
    ))
}

#[cfg(not(feature = "backend-tract"))]
fn open_tract(
    _settings: &ModelSettings,
    path: &std::path::Path,
) -> Result<Box<dyn ClassifierBackend>> {
    Err(anyhow!(
        "model {} requires the backend-tract feature",
        path.display()
    ))
}
