//! Scores a single farmer payload from disk and prints the loan profile.
//!
//! With `--simulate` the payload must carry `NDVI`, `avg_rainfall` and
//! `avg_temp`, and no external provider is called.

use anyhow::Context;
use clap::Parser;
use kilimo_credit_api::{
    config::Config, inference::InferenceEngine, loan_profile::LoanProfileService,
    models::FarmerRecord,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(name = "score-farmer", version, about = "Score one farmer payload")]
struct Args {
    /// JSON file holding the farmer payload.
    payload: PathBuf,

    /// Use the payload's NDVI, avg_rainfall and avg_temp instead of fetching them.
    #[arg(long)]
    simulate: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    let engine = InferenceEngine::load(&config.model_path, &config.preprocessor_path)
        .context("loading model artifacts")?;
    let service = LoanProfileService::new(&config, Some(Arc::new(engine)))?;

    let raw = std::fs::read_to_string(&args.payload)
        .with_context(|| format!("reading {}", args.payload.display()))?;
    let payload: serde_json::Value = serde_json::from_str(&raw)
        .with_context(|| format!("parsing {}", args.payload.display()))?;
    let record = FarmerRecord::from_value(payload)?;

    let result = if args.simulate {
        service.simulate(record).await
    } else {
        service.profile(record).await
    };

    match result {
        Ok(profile) => {
            println!("{}", serde_json::to_string_pretty(&profile)?);
            Ok(())
        }
        Err(e) => {
            println!("{}", serde_json::to_string_pretty(&e.to_payload())?);
            std::process::exit(1);
        }
    }
}
