//! Detector adapter.
//!
//! The model is an external black box behind [`Detector`]. [`DetectorHandle`]
//! owns the loading lifecycle: it starts in `Loading`, a background loader
//! installs either a ready detector or a failure exactly once, and callers poll
//! [`DetectorHandle::ready`] without ever blocking on the load.

pub mod postprocess;
pub mod preprocess;

#[cfg(feature = "ort-backend")]
pub mod yolo;

use crate::{Detection, Frame};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use thiserror::Error;

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;

/// A loaded object detection model.
pub trait Detector: Send + Sync {
    /// Runs the model over one frame. Implementations may return low-confidence
    /// candidates, the handle applies the confidence floor.
    fn detect(&self, frame: &Frame) -> anyhow::Result<Vec<Detection>>;
}

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("detector unavailable: {0}")]
    Unavailable(&'static str),

    #[error("inference failed: {0:#}")]
    Inference(anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectorState {
    Loading,
    Ready,
    Failed(String),
}

impl DetectorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectorState::Loading => "loading",
            DetectorState::Ready => "ready",
            DetectorState::Failed(_) => "failed",
        }
    }
}

enum Slot {
    Ready(Box<dyn Detector>),
    Failed(String),
}

struct Inner {
    slot: OnceLock<Slot>,
    confidence_threshold: f32,
}

/// Shared, cheaply cloneable handle to the detector.
#[derive(Clone)]
pub struct DetectorHandle {
    inner: Arc<Inner>,
}

impl DetectorHandle {
    /// A handle in the `Loading` state.
    pub fn new(confidence_threshold: f32) -> Self {
        Self {
            inner: Arc::new(Inner {
                slot: OnceLock::new(),
                confidence_threshold,
            }),
        }
    }

    /// A handle that is ready immediately.
    pub fn with_detector(detector: impl Detector + 'static, confidence_threshold: f32) -> Self {
        let handle = Self::new(confidence_threshold);
        handle.install(Ok(Box::new(detector)));
        handle
    }

    /// Records the outcome of a model load. Only the first call has any effect;
    /// returns whether this call was the one that took.
    pub fn install(&self, result: anyhow::Result<Box<dyn Detector>>) -> bool {
        let slot = match result {
            Ok(detector) => Slot::Ready(detector),
            Err(e) => {
                tracing::error!(error = %format!("{e:#}"), "Detector failed to load");
                Slot::Failed(format!("{e:#}"))
            }
        };

        let installed = self.inner.slot.set(slot).is_ok();
        if installed && self.ready() {
            tracing::info!("Detector ready");
        }
        installed
    }

    /// Runs `loader` on a background thread and installs its result.
    ///
    /// A loader that panics leaves the handle `Failed`, it never takes the
    /// process down.
    pub fn spawn_load<F>(&self, loader: F) -> std::io::Result<JoinHandle<()>>
    where
        F: FnOnce() -> anyhow::Result<Box<dyn Detector>> + Send + 'static,
    {
        let handle = self.clone();
        thread::Builder::new()
            .name("detector-load".to_string())
            .spawn(move || {
                tracing::info!("Loading detection model");
                let result = panic::catch_unwind(AssertUnwindSafe(loader))
                    .unwrap_or_else(|_| Err(anyhow::anyhow!("model loader panicked")));
                handle.install(result);
            })
    }

    pub fn ready(&self) -> bool {
        matches!(self.inner.slot.get(), Some(Slot::Ready(_)))
    }

    pub fn state(&self) -> DetectorState {
        match self.inner.slot.get() {
            None => DetectorState::Loading,
            Some(Slot::Ready(_)) => DetectorState::Ready,
            Some(Slot::Failed(reason)) => DetectorState::Failed(reason.clone()),
        }
    }

    /// Detections strictly above the confidence threshold.
    pub fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
        let detector = match self.inner.slot.get() {
            Some(Slot::Ready(detector)) => detector,
            Some(Slot::Failed(_)) => return Err(DetectorError::Unavailable("model failed to load")),
            None => return Err(DetectorError::Unavailable("model still loading")),
        };

        let threshold = self.inner.confidence_threshold;
        let detections = detector.detect(frame).map_err(DetectorError::Inference)?;

        Ok(detections
            .into_iter()
            .filter(|d| d.confidence > threshold)
            .collect())
    }
}

impl std::fmt::Debug for DetectorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectorHandle")
            .field("state", &self.state())
            .field("confidence_threshold", &self.inner.confidence_threshold)
            .finish()
    }
}

/// Loads the configured model. Only the ONNX Runtime backend exists today.
pub fn load_model(path: &std::path::Path, input_size: u32) -> anyhow::Result<Box<dyn Detector>> {
    #[cfg(feature = "ort-backend")]
    {
        let detector = yolo::YoloDetector::load(path, input_size)?;
        Ok(Box::new(detector))
    }

    #[cfg(not(feature = "ort-backend"))]
    {
        let _ = input_size;
        anyhow::bail!(
            "cannot load {}: built without the `ort-backend` feature",
            path.display()
        )
    }
}
