use super::{
    Detector,
    postprocess::PostProcessor,
    preprocess::Letterbox,
};
use crate::{Detection, Frame};
use anyhow::anyhow;
use ort::{
    session::{Session, builder::GraphOptimizationLevel},
    value::TensorRef,
};
use std::path::Path;
use std::sync::Mutex;

const INPUT_NAME: &str = "images";
const OUTPUT_NAME: &str = "output0";

#[derive(Debug, Clone, Copy)]
pub enum ExecutionProvider {
    Cpu,
    #[cfg(feature = "cuda")]
    Cuda,
}

struct Pipeline {
    session: Session,
    letterbox: Letterbox,
}

/// YOLOv8 ONNX export run through ONNX Runtime.
///
/// Inference is serialized: the stream worker and one-shot requests share one
/// session behind a mutex.
pub struct YoloDetector {
    pipeline: Mutex<Pipeline>,
    postprocessor: PostProcessor,
}

impl YoloDetector {
    pub fn load(path: &Path, input_size: u32) -> anyhow::Result<Self> {
        #[cfg(feature = "cuda")]
        let provider = ExecutionProvider::Cuda;
        #[cfg(not(feature = "cuda"))]
        let provider = ExecutionProvider::Cpu;

        Self::load_with_provider(path, input_size, provider)
    }

    pub fn load_with_provider(
        path: &Path,
        input_size: u32,
        provider: ExecutionProvider,
    ) -> anyhow::Result<Self> {
        if !path.exists() {
            anyhow::bail!("model file {} does not exist", path.display());
        }

        // Initialize ORT environment (idempotent)
        let _ = ort::init().commit();

        #[allow(unused_mut)]
        let mut builder = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?;

        match provider {
            #[cfg(feature = "cuda")]
            ExecutionProvider::Cuda => {
                tracing::info!("Initializing ONNX Runtime with CUDA execution provider");
                builder = builder.with_execution_providers([
                    ort::execution_providers::CUDAExecutionProvider::default()
                        .with_device_id(0)
                        .build(),
                ])?;
            }
            ExecutionProvider::Cpu => {
                tracing::info!("Initializing ONNX Runtime with CPU execution provider");
            }
        }

        let session = builder.commit_from_file(path)?;

        tracing::info!(model = %path.display(), input_size, "Model loaded");

        Ok(Self {
            pipeline: Mutex::new(Pipeline {
                session,
                letterbox: Letterbox::new(input_size),
            }),
            postprocessor: PostProcessor::default(),
        })
    }
}

impl Detector for YoloDetector {
    #[tracing::instrument(skip_all)]
    fn detect(&self, frame: &Frame) -> anyhow::Result<Vec<Detection>> {
        let mut guard = self
            .pipeline
            .lock()
            .map_err(|_| anyhow!("detector pipeline mutex poisoned"))?;
        let Pipeline { session, letterbox } = &mut *guard;

        let (input, transform) = letterbox.prepare(frame)?;

        let outputs = {
            let _infer_span = tracing::info_span!("model_inference").entered();
            session.run(ort::inputs![
                INPUT_NAME => TensorRef::from_array_view(input.view())?
            ])?
        };

        let output = outputs[OUTPUT_NAME].try_extract_array::<f32>()?;
        self.postprocessor.parse_detections(&output, &transform)
    }
}
