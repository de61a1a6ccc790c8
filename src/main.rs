use kilimo_credit_api::{
    config::Config,
    handlers::{self, AppState},
    inference::InferenceEngine,
    loan_profile::LoanProfileService,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::limit::RequestBodyLimitLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Main entry point for the application.
///
/// Initializes tracing, loads configuration and model artifacts, then serves
/// the API. A failed artifact load is logged and the server still starts;
/// scoring requests then answer 503 until the artifacts are fixed.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kilimo_credit_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let engine = match InferenceEngine::load(&config.model_path, &config.preprocessor_path) {
        Ok(engine) => {
            tracing::info!("✓ Model and preprocessor loaded ({})", engine.model_name());
            Some(Arc::new(engine))
        }
        Err(e) => {
            tracing::error!("Failed to load model artifacts: {}", e);
            None
        }
    };

    let profiles = LoanProfileService::new(&config, engine)?;
    let app_state = Arc::new(AppState { profiles });

    // Rate limiting per client IP
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(config.rate_limit_per_second)
            .burst_size(config.rate_limit_burst)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("Invalid rate limit configuration"))?,
    );

    let protected_routes = handlers::api_routes().layer(
        ServiceBuilder::new()
            // Farmer payloads are small; 1MB is generous
            .layer(RequestBodyLimitLayer::new(1024 * 1024))
            .layer(GovernorLayer {
                config: governor_conf,
            }),
    );

    // Health check bypasses rate limiting
    let app = handlers::app(app_state, protected_routes);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
