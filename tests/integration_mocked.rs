/// Integration tests with mocked external APIs
/// Exercises the full loan profile pipeline without hitting AgroMonitoring or Open-Meteo
mod common;

use common::*;
use kilimo_credit_api::errors::AppError;
use kilimo_credit_api::loan_profile::LoanProfileService;
use kilimo_credit_api::models::FarmerRecord;
use kilimo_credit_api::services::{AgroMonitoringService, OpenMeteoService, METERS_PER_DEGREE};
use serde_json::json;
use std::sync::atomic::Ordering;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn record(value: serde_json::Value) -> FarmerRecord {
    FarmerRecord::from_value(value).unwrap()
}

#[tokio::test]
async fn test_reference_farmer_end_to_end() {
    let mock_server = MockServer::start().await;
    mount_providers(&mock_server, &[0.70, 0.84], &[800.0, 860.0], &[21.0, 22.6]).await;

    let config = test_config(&mock_server);
    let service = LoanProfileService::new(&config, Some(engine())).unwrap();

    let profile = service.profile(record(reference_payload())).await.unwrap();
    let features = &profile.features_used_by_model;

    assert!((features.ndvi - 0.77).abs() < 1e-9);
    assert!((features.avg_rainfall - 830.0).abs() < 1e-9);
    assert!((features.avg_temp - 21.8).abs() < 1e-9);
    assert_eq!(features.net_income, 251_715.0);
    assert!((features.default_rate - 0.25).abs() < 1e-6);
    assert_eq!(features.farm_size_sqm, 12_000.0);
    assert_eq!(features.crop_type, "Maize");

    assert_eq!(profile.predictions.credit_score, 650.0);
    assert_eq!(profile.predictions.interest_rate, 12.5);
    assert_eq!(profile.predictions.loan_limit, 50_000.0);
    assert_eq!(profile.predictions.loan_duration, 180.0);

    let body = serde_json::to_value(&profile).unwrap();
    let predictions = body["predictions"].as_object().unwrap();
    assert_eq!(predictions.len(), 4);
    for key in [
        "predicted_credict_score",
        "predicted_interest_rate",
        "predicted_loan_limit",
        "predicted_loan_duration",
    ] {
        assert!(predictions.contains_key(key), "{} missing", key);
    }
}

#[tokio::test]
async fn test_legacy_field_names_end_to_end() {
    let mock_server = MockServer::start().await;
    mount_providers(&mock_server, &[0.6], &[3.0], &[20.0]).await;

    let config = test_config(&mock_server);
    let service = LoanProfileService::new(&config, Some(engine())).unwrap();

    let payload = json!({
        "location": "-0.4532,39.6460",
        "farm_size_in_squire_meter": "15000",
        "crop_type": "Tea",
        "price_of_crop": 40,
        "previous_loans_count": 0,
        "defaulted_loans_count": 2,
        "crop_yeild_per_squiremeter": 1.2,
        "total_yield(ksh)=H2K2G2": 720000,
        "sesional_expense": 120000
    });

    let profile = service.profile(record(payload)).await.unwrap();
    let features = &profile.features_used_by_model;

    assert_eq!(features.farm_size_sqm, 15_000.0);
    assert_eq!(features.total_yield_ksh, 720_000.0);
    assert_eq!(features.seasonal_expense, 120_000.0);
    assert_eq!(features.crop_yield_per_sqm, 1.2);
    // Defaults with no loan history count as certain default.
    assert_eq!(features.default_rate, 1.0);
}

#[tokio::test]
async fn test_small_farm_polygon_is_clamped() {
    let mock_server = MockServer::start().await;
    mount_providers(&mock_server, &[0.5], &[2.0], &[19.0]).await;

    let config = test_config(&mock_server);
    let service = LoanProfileService::new(&config, Some(engine())).unwrap();

    let mut payload = reference_payload();
    payload["farm_size_sqm"] = json!(500);
    let profile = service.profile(record(payload)).await.unwrap();

    // The model still sees the farmer's real size.
    assert_eq!(profile.features_used_by_model.farm_size_sqm, 500.0);

    let requests = mock_server.received_requests().await.unwrap();
    let polygon = requests
        .iter()
        .find(|r| r.url.path() == "/polygons")
        .expect("polygon request");
    let body: serde_json::Value = serde_json::from_slice(&polygon.body).unwrap();

    let ring = body["geo_json"]["geometry"]["coordinates"][0].as_array().unwrap();
    let side = ring[1][0].as_f64().unwrap() - ring[0][0].as_f64().unwrap();
    let expected = 11_000f64.sqrt() / METERS_PER_DEGREE;
    assert!((side - expected).abs() < 1e-9, "side {} != {}", side, expected);
    assert_eq!(body["name"], "FarmPolygon_-1.19_36.94");
}

#[tokio::test]
async fn test_ndvi_queries_created_polygon() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/polygons"))
        .and(query_param("appid", "test_key"))
        .and(query_param("duplicated", "true"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "poly-777"})))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/ndvi/history"))
        .and(query_param("polyid", "poly-777"))
        .and(query_param("appid", "test_key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"data": {"mean": 0.4}},
            {"data": {}},
            {"data": {"mean": 0.6}}
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = test_config(&mock_server);
    let agro = AgroMonitoringService::new(&config, reqwest::Client::new());

    let ndvi = agro.fetch_vegetation_index(-1.19, 36.94, 12_000.0).await;
    // Samples without a mean are skipped.
    assert!((ndvi.unwrap() - 0.5).abs() < 1e-9);
}

#[tokio::test]
async fn test_weather_nulls_are_skipped() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/archive"))
        .and(query_param("daily", "precipitation_sum,temperature_2m_mean"))
        .and(query_param("timezone", "Africa/Nairobi"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "daily": {
                "precipitation_sum": [800.0, null, 860.0],
                "temperature_2m_mean": [null, 21.0, 22.6]
            }
        })))
        .mount(&mock_server)
        .await;

    let config = test_config(&mock_server);
    let weather = OpenMeteoService::new(&config, reqwest::Client::new());

    let (rain, temp) = weather.fetch_weather_averages(-1.19, 36.94).await.unwrap();
    assert!((rain - 830.0).abs() < 1e-9);
    assert!((temp - 21.8).abs() < 1e-9);
}

#[tokio::test]
async fn test_weather_failure_skips_model() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/archive"))
        .respond_with(ResponseTemplate::new(500).set_body_string("archive down"))
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/polygons"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "poly-1"})))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/ndvi/history"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"data": {"mean": 0.5}}])))
        .mount(&mock_server)
        .await;

    let (engine, calls) = counting_engine();
    let config = test_config(&mock_server);
    let service = LoanProfileService::new(&config, Some(engine)).unwrap();

    let err = service.profile(record(reference_payload())).await.unwrap_err();

    assert_eq!(
        err,
        AppError::UpstreamUnavailable("Failed to fetch weather data from API.".to_string())
    );
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_rejected_polygon_fails_request() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/polygons"))
        .respond_with(ResponseTemplate::new(422).set_body_string("area too small"))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/ndvi/history"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"data": {"mean": 0.5}}])))
        .expect(0)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/archive"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "daily": {"precipitation_sum": [2.0], "temperature_2m_mean": [20.0]}
        })))
        .mount(&mock_server)
        .await;

    let (engine, calls) = counting_engine();
    let config = test_config(&mock_server);
    let service = LoanProfileService::new(&config, Some(engine)).unwrap();

    let err = service.profile(record(reference_payload())).await.unwrap_err();

    assert_eq!(
        err,
        AppError::UpstreamUnavailable("Failed to fetch NDVI data from API.".to_string())
    );
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_empty_ndvi_history_fails_request() {
    let mock_server = MockServer::start().await;
    mount_providers(&mock_server, &[], &[800.0], &[21.0]).await;

    let (engine, calls) = counting_engine();
    let config = test_config(&mock_server);
    let service = LoanProfileService::new(&config, Some(engine)).unwrap();

    let err = service.profile(record(reference_payload())).await.unwrap_err();

    assert_eq!(err.to_string(), "Failed to fetch NDVI data from API.");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_missing_farm_size_makes_no_calls() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/polygons"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "poly-1"})))
        .expect(0)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/archive"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let config = test_config(&mock_server);
    let service = LoanProfileService::new(&config, Some(engine())).unwrap();

    let mut payload = reference_payload();
    payload.as_object_mut().unwrap().remove("farm_size_sqm");

    let err = service.profile(record(payload)).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "Missing 'farm_size_sqm' or 'farm_size_in_squire_meter'"
    );
}

#[tokio::test]
async fn test_missing_feature_after_fetch() {
    let mock_server = MockServer::start().await;
    mount_providers(&mock_server, &[0.5], &[2.0], &[19.0]).await;

    let (engine, calls) = counting_engine();
    let config = test_config(&mock_server);
    let service = LoanProfileService::new(&config, Some(engine)).unwrap();

    let mut payload = reference_payload();
    payload.as_object_mut().unwrap().remove("price_of_crop");

    let err = service.profile(record(payload)).await.unwrap_err();
    assert_eq!(err, AppError::MissingFeature("price_of_crop".to_string()));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unloaded_model_rejects_before_fetching() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/polygons"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "poly-1"})))
        .expect(0)
        .mount(&mock_server)
        .await;

    let config = test_config(&mock_server);
    let service = LoanProfileService::new(&config, None).unwrap();

    assert!(!service.model_loaded());
    let err = service.profile(record(reference_payload())).await.unwrap_err();
    assert_eq!(err, AppError::ModelUnavailable);
}

#[tokio::test]
async fn test_simulation_uses_payload_environment() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/archive"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let (engine, calls) = counting_engine();
    let config = test_config(&mock_server);
    let service = LoanProfileService::new(&config, Some(engine)).unwrap();

    let mut payload = reference_payload();
    payload["NDVI"] = json!(0.3);
    payload["avg_rainfall"] = json!(1.5);
    payload["avg_temp"] = json!(28.0);

    let profile = service.simulate(record(payload)).await.unwrap();

    assert_eq!(profile.features_used_by_model.ndvi, 0.3);
    assert_eq!(profile.features_used_by_model.temp_x_rainfall, 28.0 * 1.5);
    assert_eq!(profile.predictions.loan_duration, 4.0);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_simulation_requires_all_overrides() {
    let mock_server = MockServer::start().await;
    let config = test_config(&mock_server);
    let service = LoanProfileService::new(&config, Some(engine())).unwrap();

    let err = service
        .simulate(record(reference_payload()))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidInput(_)));

    let mut payload = reference_payload();
    payload["NDVI"] = json!(0.3);
    let err = service.simulate(record(payload)).await.unwrap_err();
    assert!(err.to_string().contains("avg_rainfall, avg_temp"));
}
