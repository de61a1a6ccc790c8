use crate::errors::AppError;
use crate::model::{load_model, RegressionModel};
use crate::models::{FeatureVector, Predictions};
use crate::preprocessor::FittedPreprocessor;
use std::path::Path;

/// Loaded preprocessing transform and model, shared read-only across requests.
pub struct InferenceEngine {
    preprocessor: FittedPreprocessor,
    model: Box<dyn RegressionModel>,
}

impl InferenceEngine {
    /// Loads both artifacts. Any failure is a [`AppError::ModelLoad`].
    pub fn load(model_path: &Path, preprocessor_path: &Path) -> Result<Self, AppError> {
        let preprocessor = FittedPreprocessor::from_file(preprocessor_path)?;
        let model = load_model(model_path)?;
        Self::new(preprocessor, model)
    }

    /// Pairs a preprocessor with a model, checking that their widths agree.
    pub fn new(
        preprocessor: FittedPreprocessor,
        model: Box<dyn RegressionModel>,
    ) -> Result<Self, AppError> {
        if let Some(width) = model.input_width() {
            if width != preprocessor.output_width() {
                return Err(AppError::ModelLoad(format!(
                    "model expects {} inputs but the preprocessor produces {}",
                    width,
                    preprocessor.output_width()
                )));
            }
        }

        tracing::info!(
            "Inference engine ready ({} backend, {} inputs)",
            model.name(),
            preprocessor.output_width()
        );

        Ok(Self {
            preprocessor,
            model,
        })
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    /// Transform then forward pass for one farmer.
    pub fn predict(&self, features: &FeatureVector) -> Result<Predictions, AppError> {
        let input = self.preprocessor.transform(features)?;
        let predictions = self.model.predict(&input)?;

        let values = [
            predictions.credit_score,
            predictions.interest_rate,
            predictions.loan_limit,
            predictions.loan_duration,
        ];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(AppError::Inference(format!(
                "model produced non-finite output: {:?}",
                values
            )));
        }

        tracing::debug!("Prediction: {:?}", predictions);
        Ok(predictions)
    }
}
