use crate::errors::AppError;
use crate::loan_profile::LoanProfileService;
use crate::models::*;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;
use uuid::Uuid;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Loan profile pipeline (fetchers + inference engine).
    pub profiles: LoanProfileService,
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Kilimo Credit API",
        description = "Loan risk profiles for smallholder farmers."
    ),
    paths(health, loan_profile, simulate_loan_profile, runsync),
    components(schemas(
        FarmerApplication,
        LoanProfile,
        Predictions,
        FeatureVector,
        ErrorBody,
        RunRequest,
        RunResponse
    )),
    tags((name = "loan-profile", description = "Loan risk scoring"))
)]
pub struct ApiDoc;

/// Health check endpoint.
///
/// Reports whether the inference engine loaded; the process stays up without
/// it so operators can see the failure.
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service status"))
)]
pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "kilimo-credit-api",
            "version": env!("CARGO_PKG_VERSION"),
            "model_loaded": state.profiles.model_loaded()
        })),
    )
}

/// POST /api/v1/loan-profile
///
/// Fetches six months of NDVI and weather for the farm, then scores it.
#[utoipa::path(
    post,
    path = "/api/v1/loan-profile",
    tag = "loan-profile",
    request_body = FarmerApplication,
    responses(
        (status = 200, description = "Predicted loan terms", body = LoanProfile),
        (status = 400, description = "Malformed location, farm size or field", body = ErrorBody),
        (status = 422, description = "Required feature missing", body = ErrorBody),
        (status = 502, description = "Weather or NDVI provider unavailable", body = ErrorBody),
        (status = 503, description = "Model not loaded", body = ErrorBody),
        (status = 500, description = "Prediction failed", body = ErrorBody)
    )
)]
pub async fn loan_profile(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<LoanProfile>, AppError> {
    let record = record_from_body(payload)?;
    tracing::info!("POST /loan-profile - {} fields", record.0.len());

    let profile = state.profiles.profile(record).await?;
    Ok(Json(profile))
}

/// POST /api/v1/loan-profile/simulate
///
/// What-if scoring: `NDVI`, `avg_rainfall` and `avg_temp` come from the
/// payload and no provider is called.
#[utoipa::path(
    post,
    path = "/api/v1/loan-profile/simulate",
    tag = "loan-profile",
    request_body = FarmerApplication,
    responses(
        (status = 200, description = "Predicted loan terms", body = LoanProfile),
        (status = 400, description = "Malformed input or incomplete overrides", body = ErrorBody),
        (status = 422, description = "Required feature missing", body = ErrorBody),
        (status = 503, description = "Model not loaded", body = ErrorBody)
    )
)]
pub async fn simulate_loan_profile(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<LoanProfile>, AppError> {
    let record = record_from_body(payload)?;
    tracing::info!("POST /loan-profile/simulate - {} fields", record.0.len());

    let profile = state.profiles.simulate(record).await?;
    Ok(Json(profile))
}

/// POST /runsync
///
/// Serverless job envelope. Pipeline failures are reported inside `output`;
/// only a missing `input` is a transport-level error.
#[utoipa::path(
    post,
    path = "/runsync",
    tag = "loan-profile",
    request_body = RunRequest,
    responses(
        (status = 200, description = "Completed job", body = RunResponse),
        (status = 400, description = "No input in request", body = ErrorBody)
    )
)]
pub async fn runsync(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<RunResponse>, AppError> {
    let Json(body) = payload.map_err(|e| AppError::InvalidInput(e.body_text()))?;
    let missing_input = || AppError::InvalidInput("No 'input' key found in request.".to_string());

    // Structs also deserialize from arrays; only an object can carry `input`.
    if !body.is_object() {
        return Err(missing_input());
    }
    let request: RunRequest = serde_json::from_value(body).map_err(|_| missing_input())?;
    let input = request.input.ok_or_else(missing_input)?;

    let id = Uuid::new_v4();
    tracing::info!("Job {} received", id);

    let result = match FarmerRecord::from_value(input) {
        Ok(record) => state.profiles.profile(record).await,
        Err(e) => Err(e),
    };

    let output = match result {
        Ok(profile) => RunOutput::Profile(profile),
        Err(e) => {
            tracing::warn!("Job {} failed: {}", id, e);
            RunOutput::Error(ErrorBody {
                error: e.to_string(),
            })
        }
    };

    Ok(Json(RunResponse {
        id,
        status: "COMPLETED".to_string(),
        output,
    }))
}

pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Serves the Swagger UI HTML page, pointed at [`openapi_json`].
pub async fn swagger_ui() -> impl IntoResponse {
    let html = r#"
<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Kilimo Credit API - Swagger UI</title>
    <link rel="stylesheet" type="text/css" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css">
    <style>
        body { margin: 0; padding: 0; }
    </style>
</head>
<body>
    <div id="swagger-ui"></div>
    <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
    <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-standalone-preset.js"></script>
    <script>
        window.onload = function() {
            window.ui = SwaggerUIBundle({
                url: "/api-docs/openapi.json",
                dom_id: '#swagger-ui',
                deepLinking: true,
                presets: [
                    SwaggerUIBundle.presets.apis,
                    SwaggerUIStandalonePreset
                ],
                layout: "StandaloneLayout"
            });
        };
    </script>
</body>
</html>
"#;
    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/html; charset=utf-8")],
        html,
    )
}

/// Documentation and scoring routes. The binary wraps these in the body
/// limit and rate limiter; `/health` stays outside both.
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/docs", get(swagger_ui))
        .route("/api-docs/openapi.json", get(openapi_json))
        .route("/api/v1/loan-profile", post(loan_profile))
        .route("/api/v1/loan-profile/simulate", post(simulate_loan_profile))
        .route("/runsync", post(runsync))
}

/// Final application: `/health` plus the given API routes, with tracing and CORS.
pub fn app(state: Arc<AppState>, api: Router<Arc<AppState>>) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(api)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

fn record_from_body(payload: Result<Json<Value>, JsonRejection>) -> Result<FarmerRecord, AppError> {
    let Json(body) = payload.map_err(|e| AppError::InvalidInput(e.body_text()))?;
    FarmerRecord::from_value(body)
}
