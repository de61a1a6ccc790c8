use serde::Deserialize;
use std::path::PathBuf;

/// Default AgroMonitoring API root.
pub const DEFAULT_AGRO_BASE_URL: &str = "http://api.agromonitoring.com/agro/1.0";
/// Default Open-Meteo archive API root.
pub const DEFAULT_WEATHER_BASE_URL: &str = "https://archive-api.open-meteo.com/v1";
/// Open-Meteo aggregates daily values in this timezone unless overridden.
pub const DEFAULT_WEATHER_TIMEZONE: &str = "Africa/Nairobi";
/// AgroMonitoring rejects polygons under one hectare; keep a margin above it.
pub const DEFAULT_MIN_POLYGON_AREA_SQM: f64 = 11_000.0;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    pub agro_api_key: String,
    pub agro_base_url: String,
    pub weather_base_url: String,
    pub weather_timezone: String,
    pub min_polygon_area_sqm: f64,
    pub http_timeout_secs: u64,
    pub model_path: PathBuf,
    pub preprocessor_path: PathBuf,
    pub rate_limit_per_second: u64,
    pub rate_limit_burst: u32,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            agro_api_key: std::env::var("AGRO_API_KEY")
                .or_else(|_| std::env::var("AGRO_MONITORING_API_KEY"))
                .map_err(|_| {
                    anyhow::anyhow!(
                        "AGRO_API_KEY or AGRO_MONITORING_API_KEY environment variable required"
                    )
                })
                .and_then(|key| {
                    if key.trim().is_empty() {
                        anyhow::bail!("AGRO_API_KEY cannot be empty");
                    }
                    Ok(key)
                })?,
            agro_base_url: base_url_var("AGRO_BASE_URL", DEFAULT_AGRO_BASE_URL)?,
            weather_base_url: base_url_var("WEATHER_BASE_URL", DEFAULT_WEATHER_BASE_URL)?,
            weather_timezone: std::env::var("WEATHER_TIMEZONE")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_WEATHER_TIMEZONE.to_string()),
            min_polygon_area_sqm: std::env::var("NDVI_MIN_POLYGON_AREA_SQM")
                .ok()
                .map(|v| {
                    v.parse::<f64>()
                        .ok()
                        .filter(|area| area.is_finite() && *area > 0.0)
                        .ok_or_else(|| {
                            anyhow::anyhow!("NDVI_MIN_POLYGON_AREA_SQM must be a positive number")
                        })
                })
                .transpose()?
                .unwrap_or(DEFAULT_MIN_POLYGON_AREA_SQM),
            http_timeout_secs: positive_var("HTTP_TIMEOUT_SECS", 30)?,
            model_path: std::env::var("MODEL_PATH")
                .unwrap_or_else(|_| "model/multi_head_nn.json".to_string())
                .into(),
            preprocessor_path: std::env::var("PREPROCESSOR_PATH")
                .unwrap_or_else(|_| "model/data_preprocessor.json".to_string())
                .into(),
            rate_limit_per_second: positive_var("RATE_LIMIT_PER_SECOND", 5)?,
            rate_limit_burst: positive_var("RATE_LIMIT_BURST", 10)? as u32,
        };

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!("AgroMonitoring Base URL: {}", config.agro_base_url);
        tracing::debug!("Weather Base URL: {}", config.weather_base_url);
        tracing::debug!("Model path: {}", config.model_path.display());
        tracing::debug!("Preprocessor path: {}", config.preprocessor_path.display());
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }

    /// Configuration pointing both fetchers at the given roots, with defaults
    /// everywhere else. Used by the command-line scorer and by tests.
    pub fn with_endpoints(
        agro_base_url: String,
        weather_base_url: String,
        agro_api_key: String,
    ) -> Self {
        Self {
            port: 3000,
            agro_api_key,
            agro_base_url,
            weather_base_url,
            weather_timezone: DEFAULT_WEATHER_TIMEZONE.to_string(),
            min_polygon_area_sqm: DEFAULT_MIN_POLYGON_AREA_SQM,
            http_timeout_secs: 30,
            model_path: PathBuf::from("model/multi_head_nn.json"),
            preprocessor_path: PathBuf::from("model/data_preprocessor.json"),
            rate_limit_per_second: 5,
            rate_limit_burst: 10,
        }
    }
}

fn base_url_var(name: &str, default: &str) -> anyhow::Result<String> {
    let url = std::env::var(name).unwrap_or_else(|_| default.to_string());
    if url.trim().is_empty() {
        anyhow::bail!("{} cannot be empty", name);
    }
    if !url.starts_with("http://") && !url.starts_with("https://") {
        anyhow::bail!("{} must start with http:// or https://", name);
    }
    Ok(url.trim_end_matches('/').to_string())
}

fn positive_var(name: &str, default: u64) -> anyhow::Result<u64> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<u64>()
            .ok()
            .filter(|v| *v > 0)
            .ok_or_else(|| anyhow::anyhow!("{} must be a positive integer", name)),
        Err(_) => Ok(default),
    }
}
