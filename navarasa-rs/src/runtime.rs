//! Inference runtime seam for the model-backed predictors.
//!
//! The trained classifier and the embedding model are opaque ONNX graphs.
//! With the `tract` feature they run on tract; without it every load reports
//! the predictor as unavailable and the cascade falls through.

use crate::Result;
use ndarray::ArrayD;
use std::path::Path;

/// A loaded, immutable model: one f32 tensor in, first output tensor back.
pub trait TensorModel: Send + Sync {
    fn run(&self, input: ArrayD<f32>) -> Result<ArrayD<f32>>;
    fn model_name(&self) -> &str;
}

/// Whether this build can execute ONNX models at all.
pub fn runtime_available() -> bool {
    cfg!(feature = "tract")
}

/// Load an ONNX model whose single input has the fixed `input_shape`.
pub fn load_onnx(path: &Path, input_shape: &[usize]) -> Result<Box<dyn TensorModel>> {
    #[cfg(feature = "tract")]
    {
        Ok(Box::new(tract_backend::TractModel::from_path(
            path,
            input_shape,
        )?))
    }
    #[cfg(not(feature = "tract"))]
    {
        let _ = input_shape;
        Err(crate::NavarasaError::PredictorUnavailable(format!(
            "{} needs the `tract` feature to run",
            path.display()
        )))
    }
}

#[cfg(feature = "tract")]
mod tract_backend {
    use super::TensorModel;
    use crate::{NavarasaError, Result};
    use ndarray::{ArrayD, IxDyn};
    use std::path::Path;
    use tract_onnx::prelude::*;

    type Plan = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

    fn runtime_err(e: impl std::fmt::Display) -> NavarasaError {
        NavarasaError::Runtime(e.to_string())
    }

    pub struct TractModel {
        plan: Plan,
        name: String,
    }

    impl TractModel {
        pub fn from_path(path: &Path, input_shape: &[usize]) -> Result<Self> {
            let plan = tract_onnx::onnx()
                .model_for_path(path)
                .map_err(runtime_err)?
                .with_input_fact(0, f32::fact(input_shape.to_vec()).into())
                .map_err(runtime_err)?
                .into_optimized()
                .map_err(runtime_err)?
                .into_runnable()
                .map_err(runtime_err)?;
            let name = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("onnx-model")
                .to_string();
            tracing::info!("loaded {} ({:?} input) with tract", name, input_shape);
            Ok(Self { plan, name })
        }
    }

    impl TensorModel for TractModel {
        fn run(&self, input: ArrayD<f32>) -> Result<ArrayD<f32>> {
            let shape = input.shape().to_vec();
            let data: Vec<f32> = input.iter().copied().collect();
            let tensor = Tensor::from_shape(&shape, &data).map_err(runtime_err)?;
            let outputs = self.plan.run(tvec!(tensor.into())).map_err(runtime_err)?;
            let first = outputs
                .first()
                .ok_or_else(|| NavarasaError::Runtime("model produced no outputs".into()))?;
            let view = first.to_array_view::<f32>().map_err(runtime_err)?;
            let out_shape = view.shape().to_vec();
            let values: Vec<f32> = view.iter().copied().collect();
            ArrayD::from_shape_vec(IxDyn(&out_shape), values).map_err(runtime_err)
        }

        fn model_name(&self) -> &str {
            &self.name
        }
    }
}
