use crate::errors::AppError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;
use uuid::Uuid;

// ============ Inbound Payload ============

/// Raw farmer payload exactly as submitted by callers.
///
/// Field names are not trusted: several legacy spellings are still in use and
/// are resolved by [`crate::features::normalize_field_names`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FarmerRecord(pub Map<String, Value>);

impl FarmerRecord {
    /// Builds a record from a JSON value, rejecting anything but an object.
    pub fn from_value(value: Value) -> Result<Self, AppError> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(AppError::InvalidInput(format!(
                "Request body must be a JSON object, got {}",
                json_type_name(&other)
            ))),
        }
    }

    /// Raw field lookup; `null` counts as absent.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field).filter(|v| !v.is_null())
    }

    pub fn contains(&self, field: &str) -> bool {
        self.get(field).is_some()
    }

    pub fn insert(&mut self, field: impl Into<String>, value: Value) {
        self.0.insert(field.into(), value);
    }

    /// Numeric field, accepting JSON numbers and numeric strings.
    pub fn number(&self, field: &str) -> Result<f64, AppError> {
        let value = self
            .get(field)
            .ok_or_else(|| AppError::MissingFeature(field.to_string()))?;
        coerce_number(field, value)
    }

    /// Numeric field that may be absent.
    pub fn optional_number(&self, field: &str) -> Result<Option<f64>, AppError> {
        self.get(field).map(|v| coerce_number(field, v)).transpose()
    }

    /// String field, exactly as submitted.
    ///
    /// Not trimmed: category values must match the fitted encoder verbatim.
    pub fn text(&self, field: &str) -> Result<String, AppError> {
        match self.get(field) {
            Some(Value::String(s)) => Ok(s.clone()),
            Some(other) => Err(AppError::InvalidInput(format!(
                "Field '{}' must be a string, got {}",
                field,
                json_type_name(other)
            ))),
            None => Err(AppError::MissingFeature(field.to_string())),
        }
    }

    /// Caller-supplied environmental values, used by what-if simulations.
    ///
    /// Returns `None` when none of `NDVI`, `avg_rainfall` and `avg_temp` is
    /// present, and an error when only some of them are.
    pub fn environment_override(&self) -> Result<Option<EnvironmentalReading>, AppError> {
        let ndvi = self.optional_number("NDVI")?;
        let rainfall = self.optional_number("avg_rainfall")?;
        let temp = self.optional_number("avg_temp")?;

        match (ndvi, rainfall, temp) {
            (Some(ndvi), Some(avg_rainfall), Some(avg_temp)) => Ok(Some(EnvironmentalReading {
                ndvi,
                avg_rainfall,
                avg_temp,
            })),
            (None, None, None) => Ok(None),
            _ => {
                let missing: Vec<&str> = [
                    ("NDVI", ndvi),
                    ("avg_rainfall", rainfall),
                    ("avg_temp", temp),
                ]
                .iter()
                .filter(|(_, v)| v.is_none())
                .map(|(name, _)| *name)
                .collect();
                Err(AppError::InvalidInput(format!(
                    "Environmental overrides must be given together; missing {}",
                    missing.join(", ")
                )))
            }
        }
    }
}

fn coerce_number(field: &str, value: &Value) -> Result<f64, AppError> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    parsed.filter(|v| v.is_finite()).ok_or_else(|| {
        AppError::InvalidInput(format!(
            "Field '{}' must be numeric, got {}",
            field,
            value
        ))
    })
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Documented shape of a farmer application (canonical field names).
///
/// Only used for the OpenAPI document; handlers accept any JSON object and
/// resolve legacy spellings themselves.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FarmerApplication {
    /// `"lat,lon"`, optionally wrapped in double quotes.
    #[schema(example = "\"-1.1900,36.9400\"")]
    pub location: String,
    /// Farm area in square meters (legacy: `farm_size_in_squire_meter`).
    pub farm_size_sqm: f64,
    #[schema(example = "Maize")]
    pub crop_type: String,
    /// Market price per unit of yield, in KSh.
    pub price_of_crop: f64,
    pub previous_loans_count: f64,
    pub defaulted_loans_count: f64,
    /// Legacy: `crop_yeild_per_squiremeter`.
    pub crop_yield_per_sqm: f64,
    /// Legacy: `total_yield(ksh)=H2K2G2`.
    pub total_yield_ksh: f64,
    /// Legacy: `sesional_expense`.
    pub seasonal_expense: f64,
    /// Simulation only.
    #[serde(rename = "NDVI")]
    pub ndvi: Option<f64>,
    /// Simulation only.
    pub avg_rainfall: Option<f64>,
    /// Simulation only.
    pub avg_temp: Option<f64>,
}

// ============ Derived Inputs ============

/// Farm coordinates in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    /// Parses `"lat,lon"`. Double quotes anywhere in the string are dropped
    /// first since callers commonly send the value pre-quoted.
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        let cleaned = raw.replace('"', "");
        let parts: Vec<&str> = cleaned.split(',').collect();

        if parts.len() != 2 {
            return Err(AppError::InvalidInput(format!(
                "Failed to parse location/farm_size: expected \"lat,lon\", got '{}'",
                raw
            )));
        }

        let coord = |part: &str, name: &str| -> Result<f64, AppError> {
            part.trim()
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| {
                    AppError::InvalidInput(format!(
                        "Failed to parse location/farm_size: invalid {} '{}'",
                        name,
                        part.trim()
                    ))
                })
        };

        Ok(Self {
            latitude: coord(parts[0], "latitude")?,
            longitude: coord(parts[1], "longitude")?,
        })
    }
}

/// Six-month environmental averages for a farm.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentalReading {
    /// Mean NDVI over the history window.
    pub ndvi: f64,
    /// Mean daily precipitation in mm.
    pub avg_rainfall: f64,
    /// Mean daily temperature in °C.
    pub avg_temp: f64,
}

// ============ Model Input ============

/// Column order the preprocessing transform was fitted on.
///
/// The first 21 columns are numeric, the last one is categorical. Reordering
/// this list silently corrupts every prediction.
pub const FEATURE_COLUMNS: [&str; 22] = [
    "NDVI",
    "avg_rainfall",
    "avg_temp",
    "farm_size_sqm",
    "previous_loans_count",
    "defaulted_loans_count",
    "total_yield_ksh",
    "seasonal_expense",
    "price_of_crop",
    "crop_yield_per_sqm",
    "net_income",
    "profit_margin",
    "expense_ratio",
    "yield_value_per_sqm",
    "expense_per_sqm",
    "default_rate",
    "latitude",
    "longitude",
    "ndvi_x_rainfall",
    "temp_x_rainfall",
    "price_x_yield",
    "crop_type",
];

/// Number of numeric columns at the head of [`FEATURE_COLUMNS`].
pub const NUMERIC_FEATURE_COUNT: usize = 21;

/// Name of the single categorical column.
pub const CATEGORICAL_COLUMN: &str = "crop_type";

/// The model's input record, serialized in [`FEATURE_COLUMNS`] order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FeatureVector {
    #[serde(rename = "NDVI")]
    pub ndvi: f64,
    pub avg_rainfall: f64,
    pub avg_temp: f64,
    pub farm_size_sqm: f64,
    pub previous_loans_count: f64,
    pub defaulted_loans_count: f64,
    pub total_yield_ksh: f64,
    pub seasonal_expense: f64,
    pub price_of_crop: f64,
    pub crop_yield_per_sqm: f64,
    pub net_income: f64,
    pub profit_margin: f64,
    pub expense_ratio: f64,
    pub yield_value_per_sqm: f64,
    pub expense_per_sqm: f64,
    pub default_rate: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub ndvi_x_rainfall: f64,
    pub temp_x_rainfall: f64,
    pub price_x_yield: f64,
    pub crop_type: String,
}

impl FeatureVector {
    /// Numeric columns in fitted order.
    pub fn numeric_values(&self) -> [f64; NUMERIC_FEATURE_COUNT] {
        [
            self.ndvi,
            self.avg_rainfall,
            self.avg_temp,
            self.farm_size_sqm,
            self.previous_loans_count,
            self.defaulted_loans_count,
            self.total_yield_ksh,
            self.seasonal_expense,
            self.price_of_crop,
            self.crop_yield_per_sqm,
            self.net_income,
            self.profit_margin,
            self.expense_ratio,
            self.yield_value_per_sqm,
            self.expense_per_sqm,
            self.default_rate,
            self.latitude,
            self.longitude,
            self.ndvi_x_rainfall,
            self.temp_x_rainfall,
            self.price_x_yield,
        ]
    }

    /// Looks up a numeric column by its fitted name.
    pub fn numeric(&self, column: &str) -> Option<f64> {
        FEATURE_COLUMNS[..NUMERIC_FEATURE_COUNT]
            .iter()
            .position(|c| *c == column)
            .map(|idx| self.numeric_values()[idx])
    }
}

// ============ Model Output ============

/// The four regression heads, in model output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PredictionHead {
    CreditScore,
    InterestRate,
    LoanLimit,
    LoanDuration,
}

impl PredictionHead {
    pub const ALL: [PredictionHead; 4] = [
        PredictionHead::CreditScore,
        PredictionHead::InterestRate,
        PredictionHead::LoanLimit,
        PredictionHead::LoanDuration,
    ];

    /// Short head name used in model artifacts.
    pub fn as_str(&self) -> &'static str {
        match self {
            PredictionHead::CreditScore => "credit_score",
            PredictionHead::InterestRate => "interest_rate",
            PredictionHead::LoanLimit => "loan_limit",
            PredictionHead::LoanDuration => "loan_duration",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|h| h.as_str() == name)
    }
}

/// Predicted loan terms.
///
/// Serialized under the key names already stored and read by existing
/// clients, including the historical `credict` spelling.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Predictions {
    #[serde(rename = "predicted_credict_score")]
    pub credit_score: f64,
    #[serde(rename = "predicted_interest_rate")]
    pub interest_rate: f64,
    #[serde(rename = "predicted_loan_limit")]
    pub loan_limit: f64,
    /// Days.
    #[serde(rename = "predicted_loan_duration")]
    pub loan_duration: f64,
}

impl Predictions {
    /// Builds predictions from head outputs in [`PredictionHead::ALL`] order.
    pub fn from_heads(values: [f64; 4]) -> Self {
        Self {
            credit_score: values[0],
            interest_rate: values[1],
            loan_limit: values[2],
            loan_duration: values[3],
        }
    }
}

/// Successful response: predictions plus the exact features the model saw.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct LoanProfile {
    pub predictions: Predictions,
    pub features_used_by_model: FeatureVector,
}

/// Error response body.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
}

// ============ Serverless Envelope ============

/// Job submission in the serverless worker format.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RunRequest {
    /// The farmer payload.
    #[schema(value_type = Object)]
    pub input: Option<Value>,
}

/// Completed job. `output` holds either a [`LoanProfile`] or an `{"error"}`
/// object; pipeline failures are job output, not transport failures.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RunResponse {
    #[schema(value_type = String)]
    pub id: Uuid,
    pub status: String,
    #[schema(value_type = Object)]
    pub output: RunOutput,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RunOutput {
    Profile(LoanProfile),
    Error(ErrorBody),
}
