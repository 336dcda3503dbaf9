use std::path::Path;

use anyhow::{Context, Result};
use ndarray::Array4;
use ort::execution_providers::{
    CUDAExecutionProvider, ExecutionProviderDispatch, XNNPACKExecutionProvider,
};
use ort::session::builder::GraphOptimizationLevel;
pub use ort::session::{Session, SessionOutputs};
use ort::value::Tensor;
use tracing::debug;

use crate::config::{BaseOptions, Delegate};
use crate::error::LandmarkerError;

fn execution_providers(delegate: Delegate) -> Vec<ExecutionProviderDispatch> {
    match delegate {
        // Falls through to XNNPACK (then plain CPU) when CUDA is unavailable
        Delegate::Gpu => vec![
            CUDAExecutionProvider::default().build(),
            XNNPACKExecutionProvider::default().build(),
        ],
        Delegate::Cpu => vec![XNNPACKExecutionProvider::default().build()],
    }
}

pub fn initialize_model(model_path: &Path, options: &BaseOptions) -> Result<Session> {
    debug!(
        "Loading {:?} with {:?} delegate on {} threads",
        model_path, options.delegate, options.threads
    );

    let model = Session::builder()
        .and_then(|b| b.with_execution_providers(execution_providers(options.delegate)))
        .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
        .and_then(|b| b.with_intra_threads(options.threads.max(1)))
        .and_then(|b| b.commit_from_file(model_path))
        .map_err(LandmarkerError::from)
        .with_context(|| format!("Failed to load model {}", model_path.display()))?;

    Ok(model)
}

/// Runs `model` on one input tensor and lets `read` copy out what it needs
/// before the outputs are released.
pub fn run_model<T>(
    model: &Session,
    input_name: &str,
    input: Array4<f32>,
    read: impl FnOnce(&SessionOutputs<'_, '_>) -> Result<T, LandmarkerError>,
) -> Result<T, LandmarkerError> {
    let input = Tensor::from_array(input)?;
    let outputs = model.run(ort::inputs![input_name => input]?)?;
    read(&outputs)
}

/// Flattens a float output tensor in logical order.
pub fn read_f32(
    outputs: &SessionOutputs<'_, '_>,
    name: &str,
) -> Result<Vec<f32>, LandmarkerError> {
    Ok(outputs[name]
        .try_extract_tensor::<f32>()?
        .iter()
        .copied()
        .collect())
}
