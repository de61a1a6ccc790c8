//! Kilimo Credit API Library
//!
//! Loan risk profiling for smallholder farmers: satellite NDVI and weather
//! history are combined with the farmer's own records into a fixed feature
//! vector and scored by a pre-fitted multi-head regression model.
//!
//! # Modules
//!
//! - `config`: Configuration management.
//! - `errors`: Error handling types.
//! - `features`: Field-name normalization and feature engineering.
//! - `handlers`: HTTP request handlers and router.
//! - `inference`: Preprocessor + model handle.
//! - `loan_profile`: End-to-end scoring pipeline.
//! - `model`: Regression model backends.
//! - `models`: Core data models.
//! - `preprocessor`: Fitted scaler and one-hot encoder.
//! - `services`: External data clients (AgroMonitoring, Open-Meteo).

pub mod config;
pub mod errors;
pub mod features;
pub mod handlers;
pub mod inference;
pub mod loan_profile;
pub mod model;
pub mod models;
pub mod preprocessor;
pub mod services;
