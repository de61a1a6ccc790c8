//! Shared fixtures for the integration tests: model artifacts, a call-counting
//! model and provider mocks.
#![allow(dead_code)]

use kilimo_credit_api::config::Config;
use kilimo_credit_api::errors::AppError;
use kilimo_credit_api::inference::InferenceEngine;
use kilimo_credit_api::model::{DenseNetwork, RegressionModel};
use kilimo_credit_api::models::{Predictions, FEATURE_COLUMNS, NUMERIC_FEATURE_COUNT};
use kilimo_credit_api::preprocessor::FittedPreprocessor;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const CATEGORIES: [&str; 3] = ["Beans", "Maize", "Tea"];
pub const INPUT_WIDTH: usize = NUMERIC_FEATURE_COUNT + CATEGORIES.len();

/// Identity scaler over the fitted columns.
pub fn preprocessor_json() -> String {
    json!({
        "numeric": {
            "columns": FEATURE_COLUMNS[..NUMERIC_FEATURE_COUNT].to_vec(),
            "mean": vec![0.0; NUMERIC_FEATURE_COUNT],
            "scale": vec![1.0; NUMERIC_FEATURE_COUNT]
        },
        "categorical": {
            "column": "crop_type",
            "categories": CATEGORIES
        }
    })
    .to_string()
}

/// Linear heads with fixed outputs: 650, 12.5, 50000, 180.
pub fn network_json() -> String {
    let head = |name: &str, bias: f32| {
        json!({
            "name": name,
            "layers": [{
                "kernel": vec![vec![0.0f32]; INPUT_WIDTH],
                "bias": [bias],
                "activation": "linear"
            }]
        })
    };
    json!({
        "heads": [
            head("credit_score", 650.0),
            head("interest_rate", 12.5),
            head("loan_limit", 50_000.0),
            head("loan_duration", 180.0)
        ]
    })
    .to_string()
}

pub fn preprocessor() -> FittedPreprocessor {
    FittedPreprocessor::from_json(&preprocessor_json()).unwrap()
}

pub fn engine() -> Arc<InferenceEngine> {
    let net = DenseNetwork::from_json(&network_json()).unwrap();
    Arc::new(InferenceEngine::new(preprocessor(), Box::new(net)).unwrap())
}

/// Model that records how often it is invoked.
pub struct CountingModel {
    pub calls: Arc<AtomicUsize>,
}

impl RegressionModel for CountingModel {
    fn name(&self) -> &str {
        "counting"
    }

    fn input_width(&self) -> Option<usize> {
        Some(INPUT_WIDTH)
    }

    fn predict(&self, _input: &[f32]) -> Result<Predictions, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Predictions::from_heads([1.0, 2.0, 3.0, 4.0]))
    }
}

pub fn counting_engine() -> (Arc<InferenceEngine>, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let model = CountingModel {
        calls: calls.clone(),
    };
    let engine = InferenceEngine::new(preprocessor(), Box::new(model)).unwrap();
    (Arc::new(engine), calls)
}

pub fn test_config(server: &MockServer) -> Config {
    Config::with_endpoints(server.uri(), server.uri(), "test_key".to_string())
}

/// The reference farmer from the loan officers' worked example.
pub fn reference_payload() -> Value {
    json!({
        "location": "\"-1.1900,36.9400\"",
        "farm_size_sqm": 12000,
        "crop_type": "Maize",
        "price_of_crop": 55,
        "previous_loans_count": 4,
        "defaulted_loans_count": 1,
        "crop_yield_per_sqm": 0.63,
        "total_yield_ksh": 307215,
        "seasonal_expense": 55500
    })
}

/// Mounts polygon, NDVI history and weather archive mocks.
pub async fn mount_providers(server: &MockServer, ndvi_means: &[f64], rain: &[f64], temp: &[f64]) {
    Mock::given(method("POST"))
        .and(path("/polygons"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "poly-123"})))
        .mount(server)
        .await;

    let samples: Vec<Value> = ndvi_means
        .iter()
        .map(|m| json!({"dt": 1_700_000_000, "data": {"mean": m, "max": 0.9, "min": 0.1}}))
        .collect();
    Mock::given(method("GET"))
        .and(path("/ndvi/history"))
        .respond_with(ResponseTemplate::new(200).set_body_json(samples))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/archive"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "daily": {
                "time": [],
                "precipitation_sum": rain,
                "temperature_2m_mean": temp
            }
        })))
        .mount(server)
        .await;
}
