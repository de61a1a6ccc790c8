//! Fitted column transform applied before the model.
//!
//! The training pipeline exports its standard-scaler + one-hot encoder column
//! transform as JSON:
//!
//! ```json
//! {
//!   "numeric": { "columns": ["NDVI", "..."], "mean": [0.51, "..."], "scale": [0.12, "..."] },
//!   "categorical": {
//!     "column": "crop_type",
//!     "categories": ["Beans", "Maize"],
//!     "handle_unknown": "ignore"
//!   }
//! }
//! ```
//!
//! Output layout is the scaled numeric block followed by the one-hot block.

use crate::errors::{AppError, ResultExt};
use crate::models::{FeatureVector, CATEGORICAL_COLUMN, FEATURE_COLUMNS, NUMERIC_FEATURE_COUNT};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct NumericScaler {
    pub columns: Vec<String>,
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownCategory {
    /// Unknown categories encode as all zeros.
    #[default]
    Ignore,
    /// Unknown categories fail the transform.
    Error,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OneHotEncoder {
    pub column: String,
    pub categories: Vec<String>,
    #[serde(default)]
    pub handle_unknown: UnknownCategory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FittedPreprocessor {
    pub numeric: NumericScaler,
    pub categorical: OneHotEncoder,
}

impl FittedPreprocessor {
    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        tracing::info!("Loading preprocessor from {}", path.display());
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let preprocessor = Self::from_json(&raw)?;
        tracing::info!(
            "Preprocessor loaded: {} numeric columns, {} categories",
            preprocessor.numeric.columns.len(),
            preprocessor.categorical.categories.len()
        );
        Ok(preprocessor)
    }

    pub fn from_json(raw: &str) -> Result<Self, AppError> {
        let preprocessor = serde_json::from_str::<Self>(raw).context("parsing preprocessor")?;
        preprocessor.validate()?;
        Ok(preprocessor)
    }

    /// Rejects transforms whose columns differ from [`FEATURE_COLUMNS`].
    fn validate(&self) -> Result<(), AppError> {
        let expected = &FEATURE_COLUMNS[..NUMERIC_FEATURE_COUNT];
        if self.numeric.columns.len() != expected.len()
            || self.numeric.columns.iter().zip(expected).any(|(a, b)| a != b)
        {
            return Err(AppError::ModelLoad(format!(
                "preprocessor numeric columns {:?} do not match expected order {:?}",
                self.numeric.columns, expected
            )));
        }
        if self.numeric.mean.len() != expected.len() || self.numeric.scale.len() != expected.len() {
            return Err(AppError::ModelLoad(format!(
                "preprocessor expects {} mean/scale values, got {}/{}",
                expected.len(),
                self.numeric.mean.len(),
                self.numeric.scale.len()
            )));
        }
        if self
            .numeric
            .mean
            .iter()
            .chain(&self.numeric.scale)
            .any(|v| !v.is_finite())
        {
            return Err(AppError::ModelLoad(
                "preprocessor mean/scale contain non-finite values".to_string(),
            ));
        }
        if self.categorical.column != CATEGORICAL_COLUMN {
            return Err(AppError::ModelLoad(format!(
                "preprocessor encodes '{}', expected '{}'",
                self.categorical.column, CATEGORICAL_COLUMN
            )));
        }
        if self.categorical.categories.is_empty() {
            return Err(AppError::ModelLoad(
                "preprocessor has no categories".to_string(),
            ));
        }
        Ok(())
    }

    /// Width of the transformed vector.
    pub fn output_width(&self) -> usize {
        self.numeric.columns.len() + self.categorical.categories.len()
    }

    pub fn transform(&self, features: &FeatureVector) -> Result<Vec<f32>, AppError> {
        let mut out = Vec::with_capacity(self.output_width());

        for ((column, mean), scale) in self
            .numeric
            .columns
            .iter()
            .zip(&self.numeric.mean)
            .zip(&self.numeric.scale)
        {
            let value = features
                .numeric(column)
                .ok_or_else(|| AppError::MissingFeature(column.clone()))?;
            // Constant columns were fitted with a zero scale; leave them centered only.
            let scale = if *scale == 0.0 { 1.0 } else { *scale };
            out.push(((value - mean) / scale) as f32);
        }

        let category = features.crop_type.as_str();
        let hit = self.categorical.categories.iter().position(|c| c == category);
        if hit.is_none() && self.categorical.handle_unknown == UnknownCategory::Error {
            return Err(AppError::Inference(format!(
                "Found unknown category '{}' in column '{}' during transform",
                category, self.categorical.column
            )));
        }
        out.extend((0..self.categorical.categories.len()).map(|i| {
            if Some(i) == hit {
                1.0
            } else {
                0.0
            }
        }));

        Ok(out)
    }
}
