//! Multi-head regression model backends.
//!
//! Two artifact formats are supported, selected by file extension:
//!
//! - `.json`: dense network weights exported layer by layer from the trained
//!   multi-head network, evaluated with `ndarray`.
//! - `.onnx`: the same network converted to ONNX, evaluated with ONNX Runtime
//!   (requires the `onnx` cargo feature).

use crate::errors::{AppError, ResultExt};
use crate::models::{PredictionHead, Predictions};
use ndarray::{Array1, Array2};
use serde::Deserialize;
use std::path::Path;

/// A pre-trained model producing the four loan heads from one preprocessed row.
pub trait RegressionModel: Send + Sync {
    /// Human-readable backend name for logs and health output.
    fn name(&self) -> &str;

    /// Expected input width, when the artifact declares one.
    fn input_width(&self) -> Option<usize>;

    /// Forward pass for a single row.
    fn predict(&self, input: &[f32]) -> Result<Predictions, AppError>;
}

/// Loads a model artifact, picking the backend from the file extension.
pub fn load_model(path: &Path) -> Result<Box<dyn RegressionModel>, AppError> {
    tracing::info!("Loading model from {}", path.display());

    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => Ok(Box::new(DenseNetwork::from_file(path)?)),
        #[cfg(feature = "onnx")]
        Some("onnx") => Ok(Box::new(onnx::OnnxModel::from_file(path)?)),
        #[cfg(not(feature = "onnx"))]
        Some("onnx") => Err(AppError::ModelLoad(format!(
            "{} is an ONNX model but the service was built without the `onnx` feature",
            path.display()
        ))),
        _ => Err(AppError::ModelLoad(format!(
            "unsupported model format: {}",
            path.display()
        ))),
    }
}

// ============ Dense network ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    Linear,
    Relu,
    Sigmoid,
    Tanh,
    Softplus,
}

impl Activation {
    fn apply(self, x: f32) -> f32 {
        match self {
            Activation::Linear => x,
            Activation::Relu => x.max(0.0),
            Activation::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            Activation::Tanh => x.tanh(),
            Activation::Softplus => x.max(0.0) + (-x.abs()).exp().ln_1p(),
        }
    }
}

/// Serialized form of one dense layer. `kernel` is `[inputs][outputs]`.
#[derive(Debug, Deserialize)]
struct LayerSpec {
    kernel: Vec<Vec<f32>>,
    bias: Vec<f32>,
    #[serde(default = "default_activation")]
    activation: Activation,
}

fn default_activation() -> Activation {
    Activation::Linear
}

#[derive(Debug, Deserialize)]
struct HeadSpec {
    name: String,
    layers: Vec<LayerSpec>,
}

#[derive(Debug, Deserialize)]
struct NetworkSpec {
    #[serde(default)]
    trunk: Vec<LayerSpec>,
    heads: Vec<HeadSpec>,
}

#[derive(Debug, Clone)]
struct DenseLayer {
    kernel: Array2<f32>,
    bias: Array1<f32>,
    activation: Activation,
}

impl DenseLayer {
    fn from_spec(spec: LayerSpec, label: &str) -> Result<Self, AppError> {
        let rows = spec.kernel.len();
        let cols = spec.kernel.first().map(Vec::len).unwrap_or(0);
        if rows == 0 || cols == 0 {
            return Err(AppError::ModelLoad(format!("{}: empty kernel", label)));
        }
        if spec.kernel.iter().any(|row| row.len() != cols) {
            return Err(AppError::ModelLoad(format!("{}: ragged kernel", label)));
        }
        if spec.bias.len() != cols {
            return Err(AppError::ModelLoad(format!(
                "{}: bias has {} values for {} units",
                label,
                spec.bias.len(),
                cols
            )));
        }

        let flat: Vec<f32> = spec.kernel.into_iter().flatten().collect();
        let kernel = Array2::from_shape_vec((rows, cols), flat)
            .map_err(|e| AppError::ModelLoad(format!("{}: {}", label, e)))?;

        Ok(Self {
            kernel,
            bias: Array1::from(spec.bias),
            activation: spec.activation,
        })
    }

    fn inputs(&self) -> usize {
        self.kernel.nrows()
    }

    fn units(&self) -> usize {
        self.kernel.ncols()
    }

    fn forward(&self, x: &Array1<f32>) -> Array1<f32> {
        let activation = self.activation;
        (x.dot(&self.kernel) + &self.bias).mapv(|v| activation.apply(v))
    }
}

/// Shared trunk feeding four single-unit regression heads.
#[derive(Debug, Clone)]
pub struct DenseNetwork {
    trunk: Vec<DenseLayer>,
    /// Indexed in [`PredictionHead::ALL`] order.
    heads: Vec<Vec<DenseLayer>>,
}

impl DenseNetwork {
    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, AppError> {
        let spec = serde_json::from_str::<NetworkSpec>(raw).context("parsing dense network")?;

        let trunk = spec
            .trunk
            .into_iter()
            .enumerate()
            .map(|(i, l)| DenseLayer::from_spec(l, &format!("trunk layer {}", i)))
            .collect::<Result<Vec<_>, _>>()?;

        let mut heads: Vec<Option<Vec<DenseLayer>>> = vec![None; PredictionHead::ALL.len()];
        for head in spec.heads {
            let kind = PredictionHead::from_name(&head.name).ok_or_else(|| {
                AppError::ModelLoad(format!("unknown prediction head '{}'", head.name))
            })?;
            let layers = head
                .layers
                .into_iter()
                .enumerate()
                .map(|(i, l)| DenseLayer::from_spec(l, &format!("{} layer {}", head.name, i)))
                .collect::<Result<Vec<_>, _>>()?;
            let slot = &mut heads[kind as usize];
            if slot.is_some() {
                return Err(AppError::ModelLoad(format!(
                    "duplicate prediction head '{}'",
                    head.name
                )));
            }
            *slot = Some(layers);
        }

        let heads = heads
            .into_iter()
            .zip(PredictionHead::ALL)
            .map(|(layers, kind)| {
                layers.ok_or_else(|| {
                    AppError::ModelLoad(format!("missing prediction head '{}'", kind.as_str()))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let network = Self { trunk, heads };
        network.validate()?;
        tracing::info!(
            "Dense network loaded: {} trunk layers, input width {}",
            network.trunk.len(),
            network.input_width().unwrap_or(0)
        );
        Ok(network)
    }

    /// Checks that consecutive layers agree on widths and heads end in one unit.
    fn validate(&self) -> Result<(), AppError> {
        let trunk_out = self.trunk.iter().try_fold(None, |prev: Option<usize>, layer| {
            match prev {
                Some(width) if width != layer.inputs() => Err(AppError::ModelLoad(format!(
                    "trunk layer expects {} inputs, previous layer has {} units",
                    layer.inputs(),
                    width
                ))),
                _ => Ok(Some(layer.units())),
            }
        })?;

        for (layers, kind) in self.heads.iter().zip(PredictionHead::ALL) {
            let mut width = trunk_out;
            if layers.is_empty() {
                return Err(AppError::ModelLoad(format!(
                    "prediction head '{}' has no layers",
                    kind.as_str()
                )));
            }
            for layer in layers {
                if let Some(w) = width {
                    if w != layer.inputs() {
                        return Err(AppError::ModelLoad(format!(
                            "head '{}' expects {} inputs, previous layer has {} units",
                            kind.as_str(),
                            layer.inputs(),
                            w
                        )));
                    }
                }
                width = Some(layer.units());
            }
            if width != Some(1) {
                return Err(AppError::ModelLoad(format!(
                    "head '{}' must end in a single unit",
                    kind.as_str()
                )));
            }
        }

        // Without a trunk every head reads the raw input; widths must agree.
        if self.trunk.is_empty() {
            let widths: Vec<usize> = self.heads.iter().map(|h| h[0].inputs()).collect();
            if widths.windows(2).any(|w| w[0] != w[1]) {
                return Err(AppError::ModelLoad(format!(
                    "heads disagree on input width: {:?}",
                    widths
                )));
            }
        }

        Ok(())
    }
}

impl RegressionModel for DenseNetwork {
    fn name(&self) -> &str {
        "dense"
    }

    fn input_width(&self) -> Option<usize> {
        self.trunk
            .first()
            .or_else(|| self.heads.first().and_then(|h| h.first()))
            .map(DenseLayer::inputs)
    }

    fn predict(&self, input: &[f32]) -> Result<Predictions, AppError> {
        if let Some(width) = self.input_width() {
            if input.len() != width {
                return Err(AppError::Inference(format!(
                    "model expects {} inputs, got {}",
                    width,
                    input.len()
                )));
            }
        }

        let shared = self
            .trunk
            .iter()
            .fold(Array1::from(input.to_vec()), |x, layer| layer.forward(&x));

        let mut out = [0.0f64; 4];
        for (slot, layers) in out.iter_mut().zip(&self.heads) {
            let y = layers.iter().fold(shared.clone(), |x, layer| layer.forward(&x));
            *slot = y[0] as f64;
        }

        Ok(Predictions::from_heads(out))
    }
}

// ============ ONNX Runtime ============

#[cfg(feature = "onnx")]
pub mod onnx {
    use super::RegressionModel;
    use crate::errors::AppError;
    use crate::models::{PredictionHead, Predictions};
    use ndarray::Array2;
    use ort::session::{builder::GraphOptimizationLevel, Session};
    use ort::value::Tensor;
    use std::path::Path;
    use std::sync::Mutex;

    /// ONNX export of the multi-head network.
    ///
    /// Outputs are matched to heads by name (`credit`, `interest`, `limit`,
    /// `duration`) and fall back to declaration order.
    pub struct OnnxModel {
        session: Mutex<Session>,
        input_name: String,
        output_names: Vec<String>,
        input_width: Option<usize>,
    }

    fn ort_err(e: ort::Error) -> AppError {
        AppError::Inference(e.to_string())
    }

    impl OnnxModel {
        pub fn from_file(path: &Path) -> Result<Self, AppError> {
            let load_err = |e: ort::Error| {
                AppError::ModelLoad(format!("Failed to load model from {}: {}", path.display(), e))
            };

            let session = Session::builder()
                .map_err(load_err)?
                .with_optimization_level(GraphOptimizationLevel::Level3)
                .map_err(load_err)?
                .with_intra_threads(1)
                .map_err(load_err)?
                .commit_from_file(path)
                .map_err(load_err)?;

            let input = session
                .inputs
                .first()
                .ok_or_else(|| AppError::ModelLoad("ONNX model declares no inputs".to_string()))?;
            let input_name = input.name.clone();
            let input_width = input
                .input_type
                .tensor_shape()
                .and_then(|shape| shape.last().copied())
                .filter(|d| *d > 0)
                .map(|d| d as usize);

            let declared: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();
            if declared.len() < PredictionHead::ALL.len() {
                return Err(AppError::ModelLoad(format!(
                    "ONNX model has {} outputs, expected {}",
                    declared.len(),
                    PredictionHead::ALL.len()
                )));
            }

            let keywords = ["credit", "interest", "limit", "duration"];
            let by_name: Option<Vec<String>> = keywords
                .iter()
                .map(|k| declared.iter().find(|n| n.to_lowercase().contains(k)).cloned())
                .collect();
            let output_names = by_name.unwrap_or_else(|| declared[..4].to_vec());

            tracing::info!(
                input = %input_name,
                outputs = ?output_names,
                "ONNX model loaded successfully"
            );

            Ok(Self {
                session: Mutex::new(session),
                input_name,
                output_names,
                input_width,
            })
        }
    }

    impl RegressionModel for OnnxModel {
        fn name(&self) -> &str {
            "onnx"
        }

        fn input_width(&self) -> Option<usize> {
            self.input_width
        }

        fn predict(&self, input: &[f32]) -> Result<Predictions, AppError> {
            let array = Array2::from_shape_vec((1, input.len()), input.to_vec())
                .map_err(|e| AppError::Inference(e.to_string()))?;
            let tensor = Tensor::from_array(array).map_err(ort_err)?;

            let mut session = self
                .session
                .lock()
                .map_err(|_| AppError::Inference("ONNX session lock poisoned".to_string()))?;
            let outputs = session
                .run(ort::inputs![self.input_name.as_str() => tensor])
                .map_err(ort_err)?;

            let mut values = [0.0f64; 4];
            for (slot, name) in values.iter_mut().zip(&self.output_names) {
                let (_, data) = outputs[name.as_str()]
                    .try_extract_tensor::<f32>()
                    .map_err(ort_err)?;
                *slot = *data.first().ok_or_else(|| {
                    AppError::Inference(format!("output '{}' is empty", name))
                })? as f64;
            }

            Ok(Predictions::from_heads(values))
        }
    }
}
