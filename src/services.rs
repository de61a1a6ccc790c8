use crate::config::Config;
use crate::errors::AppError;
use chrono::{Days, NaiveDate, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Map;

/// Approximate meters per degree of latitude.
pub const METERS_PER_DEGREE: f64 = 111_320.0;
/// NDVI history window: six 30-day months.
pub const NDVI_HISTORY_WINDOW_SECS: i64 = 6 * 30 * 24 * 3600;
/// Weather archive window.
pub const WEATHER_HISTORY_DAYS: u64 = 180;

// ============ AgroMonitoring (NDVI) ============

/// GeoJSON polygon registration payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolygonRequest {
    pub name: String,
    pub geo_json: GeoJsonFeature,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoJsonFeature {
    #[serde(rename = "type")]
    pub feature_type: String,
    pub properties: Map<String, serde_json::Value>,
    pub geometry: PolygonGeometry,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolygonGeometry {
    #[serde(rename = "type")]
    pub geometry_type: String,
    /// One linear ring of `[lon, lat]` positions, first == last.
    pub coordinates: Vec<Vec<[f64; 2]>>,
}

impl PolygonRequest {
    /// Axis-aligned square of `area_sqm` centered on the farm.
    pub fn square(latitude: f64, longitude: f64, area_sqm: f64) -> Self {
        let side_degrees = area_sqm.sqrt() / METERS_PER_DEGREE;
        let half = side_degrees / 2.0;

        let ring = vec![
            [longitude - half, latitude - half],
            [longitude + half, latitude - half],
            [longitude + half, latitude + half],
            [longitude - half, latitude + half],
            [longitude - half, latitude - half],
        ];

        Self {
            name: format!("FarmPolygon_{:?}_{:?}", latitude, longitude),
            geo_json: GeoJsonFeature {
                feature_type: "Feature".to_string(),
                properties: Map::new(),
                geometry: PolygonGeometry {
                    geometry_type: "Polygon".to_string(),
                    coordinates: vec![ring],
                },
            },
        }
    }

    /// Side length of the square in degrees.
    pub fn side_degrees(&self) -> f64 {
        let ring = &self.geo_json.geometry.coordinates[0];
        ring[1][0] - ring[0][0]
    }
}

#[derive(Debug, Deserialize)]
struct PolygonResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct NdviSample {
    #[serde(default)]
    data: Option<NdviStats>,
}

#[derive(Debug, Deserialize)]
struct NdviStats {
    #[serde(default)]
    mean: Option<f64>,
}

/// Client for the AgroMonitoring polygon and NDVI history endpoints.
#[derive(Clone)]
pub struct AgroMonitoringService {
    client: Client,
    base_url: String,
    api_key: String,
    min_polygon_area_sqm: f64,
}

impl AgroMonitoringService {
    pub fn new(config: &Config, client: Client) -> Self {
        Self {
            client,
            base_url: config.agro_base_url.clone(),
            api_key: config.agro_api_key.clone(),
            min_polygon_area_sqm: config.min_polygon_area_sqm,
        }
    }

    /// Area actually registered with the provider for a farm of `farm_size_sqm`.
    pub fn polygon_area(&self, farm_size_sqm: f64) -> f64 {
        if farm_size_sqm < self.min_polygon_area_sqm {
            tracing::warn!(
                "Farm size {}sqm is below the provider minimum; clamping to {}sqm for NDVI lookup",
                farm_size_sqm,
                self.min_polygon_area_sqm
            );
            self.min_polygon_area_sqm
        } else {
            farm_size_sqm
        }
    }

    /// Average NDVI over the last six months, or `None` when unavailable.
    pub async fn fetch_vegetation_index(
        &self,
        latitude: f64,
        longitude: f64,
        farm_size_sqm: f64,
    ) -> Option<f64> {
        match self
            .try_fetch_vegetation_index(latitude, longitude, farm_size_sqm)
            .await
        {
            Ok(value) => value,
            Err(e) => {
                tracing::error!("Error fetching NDVI data: {}", e);
                None
            }
        }
    }

    /// Same as [`Self::fetch_vegetation_index`] but keeps transport errors.
    pub async fn try_fetch_vegetation_index(
        &self,
        latitude: f64,
        longitude: f64,
        farm_size_sqm: f64,
    ) -> Result<Option<f64>, AppError> {
        tracing::info!(
            "Fetching NDVI for lat={}, lon={}, size={}sqm",
            latitude,
            longitude,
            farm_size_sqm
        );

        let polygon = PolygonRequest::square(latitude, longitude, self.polygon_area(farm_size_sqm));
        let polygon_id = self.create_polygon(&polygon).await?;

        let end = Utc::now().timestamp();
        let start = end - NDVI_HISTORY_WINDOW_SECS;
        let samples = self.ndvi_history(&polygon_id, start, end).await?;

        if samples.is_empty() {
            tracing::warn!("No NDVI data found for polygon {}", polygon_id);
            return Ok(None);
        }

        let means: Vec<f64> = samples
            .iter()
            .filter_map(|s| s.data.as_ref().and_then(|d| d.mean))
            .collect();

        let Some(avg) = mean(&means) else {
            tracing::warn!("No 'mean' NDVI values found for polygon {}", polygon_id);
            return Ok(None);
        };

        tracing::info!("Successfully fetched NDVI: {:.4}", avg);
        Ok(Some(avg))
    }

    /// Registers the polygon and returns the provider's id for it.
    pub async fn create_polygon(&self, polygon: &PolygonRequest) -> Result<String, AppError> {
        let url = reqwest::Url::parse_with_params(
            &format!("{}/polygons", self.base_url),
            &[("appid", self.api_key.as_str()), ("duplicated", "true")],
        )
        .map_err(|e| AppError::ExternalApiError(format!("Failed to build URL: {}", e)))?;

        tracing::debug!(
            "AgroMonitoring URL: {}/polygons?appid=[REDACTED]&duplicated=true",
            self.base_url
        );

        let response = self
            .client
            .post(url)
            .json(polygon)
            .send()
            .await
            .map_err(|e| {
                AppError::ExternalApiError(format!("Polygon creation request failed: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::ExternalApiError(format!(
                "Polygon creation returned status {}: {}",
                status, error_text
            )));
        }

        let created: PolygonResponse = response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse polygon response: {}", e))
        })?;

        tracing::debug!("Registered polygon {}", created.id);
        Ok(created.id)
    }

    async fn ndvi_history(
        &self,
        polygon_id: &str,
        start: i64,
        end: i64,
    ) -> Result<Vec<NdviSample>, AppError> {
        let start = start.to_string();
        let end = end.to_string();
        let url = reqwest::Url::parse_with_params(
            &format!("{}/ndvi/history", self.base_url),
            &[
                ("start", start.as_str()),
                ("end", end.as_str()),
                ("polyid", polygon_id),
                ("appid", self.api_key.as_str()),
            ],
        )
        .map_err(|e| AppError::ExternalApiError(format!("Failed to build URL: {}", e)))?;

        let response =
            self.client.get(url).send().await.map_err(|e| {
                AppError::ExternalApiError(format!("NDVI history request failed: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::ExternalApiError(format!(
                "NDVI history returned status {}: {}",
                status, error_text
            )));
        }

        response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse NDVI history: {}", e))
        })
    }
}

// ============ Open-Meteo (rainfall & temperature) ============

#[derive(Debug, Deserialize)]
struct ArchiveResponse {
    daily: Option<DailySeries>,
}

#[derive(Debug, Deserialize)]
struct DailySeries {
    precipitation_sum: Option<Vec<Option<f64>>>,
    temperature_2m_mean: Option<Vec<Option<f64>>>,
}

/// Client for the Open-Meteo historical weather archive.
#[derive(Clone)]
pub struct OpenMeteoService {
    client: Client,
    base_url: String,
    timezone: String,
}

impl OpenMeteoService {
    pub fn new(config: &Config, client: Client) -> Self {
        Self {
            client,
            base_url: config.weather_base_url.clone(),
            timezone: config.weather_timezone.clone(),
        }
    }

    /// Average daily `(rainfall_mm, temperature_c)` over the last 180 days,
    /// or `None` when unavailable.
    pub async fn fetch_weather_averages(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Option<(f64, f64)> {
        let end = Utc::now().date_naive();
        let start = end.checked_sub_days(Days::new(WEATHER_HISTORY_DAYS))?;

        match self
            .try_fetch_weather_averages(latitude, longitude, start, end)
            .await
        {
            Ok(value) => value,
            Err(e) => {
                tracing::error!("Error fetching weather data: {}", e);
                None
            }
        }
    }

    /// Weather averages for an explicit date range, keeping transport errors.
    pub async fn try_fetch_weather_averages(
        &self,
        latitude: f64,
        longitude: f64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Option<(f64, f64)>, AppError> {
        tracing::info!("Fetching weather for lat={}, lon={}", latitude, longitude);

        let latitude = latitude.to_string();
        let longitude = longitude.to_string();
        let start = start.format("%Y-%m-%d").to_string();
        let end = end.format("%Y-%m-%d").to_string();

        let url = reqwest::Url::parse_with_params(
            &format!("{}/archive", self.base_url),
            &[
                ("latitude", latitude.as_str()),
                ("longitude", longitude.as_str()),
                ("start_date", start.as_str()),
                ("end_date", end.as_str()),
                ("daily", "precipitation_sum,temperature_2m_mean"),
                ("timezone", self.timezone.as_str()),
            ],
        )
        .map_err(|e| AppError::ExternalApiError(format!("Failed to build URL: {}", e)))?;

        tracing::debug!("Weather URL: {}", url);

        let response =
            self.client.get(url).send().await.map_err(|e| {
                AppError::ExternalApiError(format!("Weather archive request failed: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::ExternalApiError(format!(
                "Weather archive returned status {}: {}",
                status, error_text
            )));
        }

        let archive: ArchiveResponse = response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse weather response: {}", e))
        })?;

        let Some(DailySeries {
            precipitation_sum: Some(rain),
            temperature_2m_mean: Some(temp),
        }) = archive.daily
        else {
            tracing::error!("Unexpected response from weather API: missing daily series");
            return Ok(None);
        };

        let rain: Vec<f64> = rain.into_iter().flatten().collect();
        let temp: Vec<f64> = temp.into_iter().flatten().collect();

        match (mean(&rain), mean(&temp)) {
            (Some(avg_rainfall), Some(avg_temp)) => {
                tracing::info!(
                    "Successfully fetched weather: Rain={:.2}, Temp={:.2}",
                    avg_rainfall,
                    avg_temp
                );
                Ok(Some((avg_rainfall, avg_temp)))
            }
            _ => {
                tracing::error!("No valid weather data returned");
                Ok(None)
            }
        }
    }
}

/// Arithmetic mean, `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(min_area: f64) -> AgroMonitoringService {
        let mut config = Config::with_endpoints(
            "http://agro.test".to_string(),
            "http://weather.test".to_string(),
            "key".to_string(),
        );
        config.min_polygon_area_sqm = min_area;
        AgroMonitoringService::new(&config, Client::new())
    }

    #[test]
    fn test_polygon_ring_is_closed_square() {
        let polygon = PolygonRequest::square(-1.19, 36.94, 12_000.0);
        let ring = &polygon.geo_json.geometry.coordinates[0];

        assert_eq!(ring.len(), 5);
        assert_eq!(ring[0], ring[4]);
        assert_eq!(polygon.name, "FarmPolygon_-1.19_36.94");

        let expected_side = 12_000f64.sqrt() / METERS_PER_DEGREE;
        assert!((polygon.side_degrees() - expected_side).abs() < 1e-12);
        // Positions are [lon, lat].
        assert!((ring[0][0] - (36.94 - expected_side / 2.0)).abs() < 1e-12);
        assert!((ring[0][1] - (-1.19 - expected_side / 2.0)).abs() < 1e-12);
    }

    #[test]
    fn test_polygon_name_keeps_decimal_point() {
        assert_eq!(
            PolygonRequest::square(0.0, 36.0, 12_000.0).name,
            "FarmPolygon_0.0_36.0"
        );
        assert_eq!(
            PolygonRequest::square(-1.5, 37.25, 12_000.0).name,
            "FarmPolygon_-1.5_37.25"
        );
    }

    #[test]
    fn test_polygon_serializes_geojson() {
        let value = serde_json::to_value(PolygonRequest::square(0.0, 0.0, 10_000.0)).unwrap();
        assert_eq!(value["geo_json"]["type"], "Feature");
        assert_eq!(value["geo_json"]["geometry"]["type"], "Polygon");
        assert!(value["geo_json"]["properties"].as_object().unwrap().is_empty());
    }

    #[test]
    fn test_small_farms_are_clamped() {
        let svc = service(11_000.0);
        assert_eq!(svc.polygon_area(500.0), 11_000.0);
        assert_eq!(svc.polygon_area(10_999.0), 11_000.0);
        assert_eq!(svc.polygon_area(11_000.0), 11_000.0);
        assert_eq!(svc.polygon_area(250_000.0), 250_000.0);
    }

    #[test]
    fn test_mean() {
        assert_eq!(mean(&[]), None);
        assert_eq!(mean(&[2.0, 4.0]), Some(3.0));
    }
}
