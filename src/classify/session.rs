use anyhow::Result;

use crate::classify::backend::ClassifierBackend;
use crate::classify::result::{InferenceResult, ModelInfo};
use crate::frame::RawFrame;

/// An initialized classifier. Dropping the session stops the backend.
pub struct ClassifierSession {
    backend: Box<dyn ClassifierBackend>,
    info: ModelInfo,
}

impl ClassifierSession {
    /// Initialize `backend`. On failure the backend is stopped before the error returns.
    pub fn open(mut backend: Box<dyn ClassifierBackend>) -> Result<Self> {
        let name = backend.name();
        match backend.init() {
            Ok(info) => {
                log::info!(
                    "loaded {} classifier for \"{} / {}\" ({} labels)",
                    name,
                    info.owner,
                    info.name,
                    info.labels.len()
                );
                Ok(Self { backend, info })
            }
            Err(err) => {
                backend.stop();
                Err(err.context(format!("could not initialize {} classifier", name)))
            }
        }
    }

    pub fn info(&self) -> &ModelInfo {
        &self.info
    }

    pub fn classify(&mut self, frame: &RawFrame) -> Result<InferenceResult> {
        self.backend.classify(frame)
    }
}

impl Drop for ClassifierSession {
    fn drop(&mut self) {
        log::info!("stopping {} classifier", self.backend.name());
        self.backend.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::result::{ClassificationResult, InferenceOutput, Timing};
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingBackend {
        fail_init: bool,
        stops: Arc<AtomicUsize>,
    }

    impl ClassifierBackend for CountingBackend {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn init(&mut self) -> Result<ModelInfo> {
            if self.fail_init {
                return Err(anyhow!("model file missing"));
            }
            Ok(ModelInfo {
                labels: vec!["light".to_string()],
                ..ModelInfo::default()
            })
        }

        fn classify(&mut self, _frame: &RawFrame) -> Result<InferenceResult> {
            Ok(InferenceResult {
                output: InferenceOutput::Classification(ClassificationResult::default()),
                timing: Timing::default(),
            })
        }

        fn stop(&mut self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn session_stops_backend_on_drop() -> Result<()> {
        let stops = Arc::new(AtomicUsize::new(0));
        let session = ClassifierSession::open(Box::new(CountingBackend {
            fail_init: false,
            stops: stops.clone(),
        }))?;
        assert_eq!(session.info().labels, vec!["light"]);
        assert_eq!(stops.load(Ordering::SeqCst), 0);
        drop(session);
        assert_eq!(stops.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn failed_init_stops_backend_once() {
        let stops = Arc::new(AtomicUsize::new(0));
        let err = ClassifierSession::open(Box::new(CountingBackend {
            fail_init: true,
            stops: stops.clone(),
        }))
        .err()
        .expect("init must fail");
        assert!(format!("{:#}", err).contains("model file missing"));
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }
}
