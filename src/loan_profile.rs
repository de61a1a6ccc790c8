/// Loan profile pipeline shared by the HTTP handlers and the CLI scorer.
///
/// Sequence for one farmer:
/// 1. Parse location and farm size
/// 2. Fetch weather and NDVI averages (concurrently)
/// 3. Engineer the feature vector
/// 4. Run the inference engine
use crate::config::Config;
use crate::errors::AppError;
use crate::features::engineer;
use crate::inference::InferenceEngine;
use crate::models::{EnvironmentalReading, FarmerRecord, LoanProfile, Location};
use crate::services::{AgroMonitoringService, OpenMeteoService};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Farm size from either accepted spelling, coerced to whole square meters.
///
/// Floats are truncated; strings must hold an integer.
pub fn parse_farm_size(record: &FarmerRecord) -> Result<i64, AppError> {
    let raw = record
        .get("farm_size_sqm")
        .or_else(|| record.get("farm_size_in_squire_meter"))
        .ok_or_else(|| {
            AppError::InvalidInput(
                "Missing 'farm_size_sqm' or 'farm_size_in_squire_meter'".to_string(),
            )
        })?;

    let parsed = match raw {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };

    parsed.ok_or_else(|| {
        AppError::InvalidInput(format!(
            "Failed to parse location/farm_size: invalid farm size {}",
            raw
        ))
    })
}

/// Location and farm size, validated before any network call.
pub fn parse_core_inputs(record: &FarmerRecord) -> Result<(Location, i64), AppError> {
    let location = match record.get("location") {
        Some(Value::String(raw)) => Location::parse(raw)?,
        Some(other) => {
            return Err(AppError::InvalidInput(format!(
                "Failed to parse location/farm_size: location must be a string, got {}",
                other
            )))
        }
        None => {
            return Err(AppError::InvalidInput(
                "Failed to parse location/farm_size: missing 'location'".to_string(),
            ))
        }
    };

    Ok((location, parse_farm_size(record)?))
}

#[derive(Clone)]
pub struct LoanProfileService {
    agro: AgroMonitoringService,
    weather: OpenMeteoService,
    engine: Option<Arc<InferenceEngine>>,
}

impl LoanProfileService {
    /// Builds the service around a shared HTTP client.
    ///
    /// `engine` is `None` when the model artifacts failed to load; every
    /// profile request then fails with [`AppError::ModelUnavailable`].
    pub fn new(config: &Config, engine: Option<Arc<InferenceEngine>>) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .map_err(|e| {
                AppError::ExternalApiError(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            agro: AgroMonitoringService::new(config, client.clone()),
            weather: OpenMeteoService::new(config, client),
            engine,
        })
    }

    pub fn model_loaded(&self) -> bool {
        self.engine.is_some()
    }

    /// Full pipeline: fetch environmental data, then score.
    pub async fn profile(&self, record: FarmerRecord) -> Result<LoanProfile, AppError> {
        let (location, farm_size) = parse_core_inputs(&record)?;
        let engine = self.require_engine()?;

        tracing::info!(
            "Building loan profile for lat={}, lon={}, size={}sqm",
            location.latitude,
            location.longitude,
            farm_size
        );

        let reading = self.fetch_environment(location, farm_size as f64).await?;
        self.score(engine, record, location, reading).await
    }

    /// What-if pipeline: environmental values come from the payload itself.
    pub async fn simulate(&self, record: FarmerRecord) -> Result<LoanProfile, AppError> {
        let (location, _) = parse_core_inputs(&record)?;
        let reading = record.environment_override()?.ok_or_else(|| {
            AppError::InvalidInput(
                "Simulation requires 'NDVI', 'avg_rainfall' and 'avg_temp'".to_string(),
            )
        })?;
        let engine = self.require_engine()?;

        tracing::info!(
            "Simulating loan profile for lat={}, lon={} with {:?}",
            location.latitude,
            location.longitude,
            reading
        );

        self.score(engine, record, location, reading).await
    }

    /// Weather and NDVI averages, fetched concurrently. Either one missing
    /// aborts the request.
    pub async fn fetch_environment(
        &self,
        location: Location,
        farm_size_sqm: f64,
    ) -> Result<EnvironmentalReading, AppError> {
        let (weather, ndvi) = tokio::join!(
            self.weather
                .fetch_weather_averages(location.latitude, location.longitude),
            self.agro
                .fetch_vegetation_index(location.latitude, location.longitude, farm_size_sqm),
        );

        let Some((avg_rainfall, avg_temp)) = weather else {
            return Err(AppError::UpstreamUnavailable(
                "Failed to fetch weather data from API.".to_string(),
            ));
        };
        let Some(ndvi) = ndvi else {
            return Err(AppError::UpstreamUnavailable(
                "Failed to fetch NDVI data from API.".to_string(),
            ));
        };

        Ok(EnvironmentalReading {
            ndvi,
            avg_rainfall,
            avg_temp,
        })
    }

    fn require_engine(&self) -> Result<Arc<InferenceEngine>, AppError> {
        self.engine.clone().ok_or(AppError::ModelUnavailable)
    }

    async fn score(
        &self,
        engine: Arc<InferenceEngine>,
        record: FarmerRecord,
        location: Location,
        reading: EnvironmentalReading,
    ) -> Result<LoanProfile, AppError> {
        let features = engineer(&record, location, reading)?;

        // The forward pass is CPU-bound; keep it off the async workers.
        let (predictions, features) = tokio::task::spawn_blocking(move || {
            engine.predict(&features).map(|p| (p, features))
        })
        .await
        .map_err(|e| AppError::InternalError(format!("Inference task failed: {}", e)))??;

        tracing::info!(
            "Loan profile ready: credit_score={:.1}, loan_limit={:.0}",
            predictions.credit_score,
            predictions.loan_limit
        );

        Ok(LoanProfile {
            predictions,
            features_used_by_model: features,
        })
    }
}
