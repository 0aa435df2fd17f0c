//! Silero speech-probability model
//!
//! Runs the Silero VAD ONNX graph: one 512-sample window plus the
//! recurrent `h`/`c` tensors and the sample rate in, one probability
//! and updated tensors out. The recurrent state lives here and nowhere
//! else.

use std::path::Path;

use ndarray::{Array2, Array3, Ix3};
use ort::{GraphOptimizationLevel, Session};

use vanta_core::INPUT_SAMPLE_RATE;

use super::SpeechModel;
use crate::PipelineError;

/// Hidden state shape: two layers, one batch, 64 units.
const STATE_SHAPE: (usize, usize, usize) = (2, 1, 64);

pub struct SileroModel {
    session: Session,
    h: Array3<f32>,
    c: Array3<f32>,
}

impl SileroModel {
    /// Load the model file. Failure here is fatal to the whole core.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let session = Session::builder()
            .map_err(|e| PipelineError::Init(e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| PipelineError::Init(e.to_string()))?
            .with_intra_threads(1)
            .map_err(|e| PipelineError::Init(e.to_string()))?
            .commit_from_file(path)
            .map_err(|e| {
                PipelineError::Init(format!("Failed to load {}: {}", path.display(), e))
            })?;

        Ok(Self {
            session,
            h: Array3::zeros(STATE_SHAPE),
            c: Array3::zeros(STATE_SHAPE),
        })
    }
}

impl SpeechModel for SileroModel {
    fn infer(&mut self, window: &[f32]) -> Result<f32, PipelineError> {
        let input = Array2::from_shape_vec((1, window.len()), window.to_vec())
            .map_err(|e| PipelineError::Inference(e.to_string()))?;
        let sr = ndarray::arr1(&[INPUT_SAMPLE_RATE as i64]);
        let h_in = self.h.clone();
        let c_in = self.c.clone();

        let outputs = self
            .session
            .run(
                ort::inputs![
                    "input" => input.view(),
                    "sr" => sr.view(),
                    "h" => h_in.view(),
                    "c" => c_in.view(),
                ]
                .map_err(|e| PipelineError::Inference(e.to_string()))?,
            )
            .map_err(|e| PipelineError::Inference(e.to_string()))?;

        let probability = outputs
            .get("output")
            .ok_or_else(|| PipelineError::Inference("missing output tensor".to_string()))?
            .try_extract_tensor::<f32>()
            .map_err(|e| PipelineError::Inference(e.to_string()))?
            .iter()
            .copied()
            .next()
            .ok_or_else(|| PipelineError::Inference("empty output tensor".to_string()))?;

        let mut updated_states = Vec::with_capacity(2);
        for name in ["hn", "cn"] {
            let tensor = outputs
                .get(name)
                .ok_or_else(|| PipelineError::Inference(format!("missing {} tensor", name)))?
                .try_extract_tensor::<f32>()
                .map_err(|e| PipelineError::Inference(e.to_string()))?;
            updated_states.push(
                tensor
                    .to_owned()
                    .into_dimensionality::<Ix3>()
                    .map_err(|e| PipelineError::Inference(e.to_string()))?,
            );
        }
        self.c = updated_states.pop().unwrap_or_else(|| Array3::zeros(STATE_SHAPE));
        self.h = updated_states.pop().unwrap_or_else(|| Array3::zeros(STATE_SHAPE));

        Ok(probability.clamp(0.0, 1.0))
    }

    fn reset(&mut self) {
        self.h.fill(0.0);
        self.c.fill(0.0);
    }
}
