//! Feature engineering for the loan-risk model.
//!
//! Turns a raw [`FarmerRecord`] plus fetched environmental averages into the
//! fixed-order [`FeatureVector`] the fitted preprocessor expects:
//!
//! 1. Legacy field spellings are renamed to canonical names.
//! 2. Profitability, risk and agronomic ratios are derived, each guarded
//!    against a zero denominator with [`EPSILON`].
//! 3. Everything is assembled in [`crate::models::FEATURE_COLUMNS`] order.

use crate::errors::AppError;
use crate::models::{EnvironmentalReading, FarmerRecord, FeatureVector, Location};

/// Additive guard for every ratio denominator.
pub const EPSILON: f64 = 1e-6;

/// Legacy field spellings still sent by existing clients, as
/// `(alias, canonical)` pairs.
pub const FIELD_ALIASES: [(&str, &str); 4] = [
    ("sesional_expense", "seasonal_expense"),
    ("total_yield(ksh)=H2K2G2", "total_yield_ksh"),
    ("farm_size_in_squire_meter", "farm_size_sqm"),
    ("crop_yeild_per_squiremeter", "crop_yield_per_sqm"),
];

/// Renames aliased fields to their canonical names.
///
/// When a payload carries both spellings the canonical value is kept and the
/// alias is dropped.
pub fn normalize_field_names(record: &FarmerRecord) -> FarmerRecord {
    let mut normalized = record.clone();

    for (alias, canonical) in FIELD_ALIASES {
        let Some(value) = normalized.0.remove(alias) else {
            continue;
        };
        if normalized.contains(canonical) {
            tracing::debug!(
                "Both '{}' and '{}' present; keeping '{}'",
                alias,
                canonical,
                canonical
            );
        } else {
            normalized.insert(canonical, value);
        }
    }

    normalized
}

/// Share of past loans that defaulted.
///
/// A farmer with defaults but no recorded previous loans is treated as a
/// certain defaulter rather than getting a rate near `defaulted / ε`.
pub fn default_rate(previous_loans: f64, defaulted_loans: f64) -> f64 {
    if previous_loans == 0.0 && defaulted_loans > 0.0 {
        return 1.0;
    }
    defaulted_loans / (previous_loans + EPSILON)
}

/// Builds the model's input record.
pub fn engineer(
    record: &FarmerRecord,
    location: Location,
    reading: EnvironmentalReading,
) -> Result<FeatureVector, AppError> {
    let record = normalize_field_names(record);

    let total_yield = record.number("total_yield_ksh")?;
    let seasonal_expense = record.number("seasonal_expense")?;
    let farm_size = record.number("farm_size_sqm")?;
    let previous_loans = record.number("previous_loans_count")?;
    let defaulted_loans = record.number("defaulted_loans_count")?;
    let price_of_crop = record.number("price_of_crop")?;
    let yield_per_sqm = record.number("crop_yield_per_sqm")?;
    let crop_type = record.text("crop_type")?;

    // Profitability
    let net_income = total_yield - seasonal_expense;
    let profit_margin = net_income / (total_yield + EPSILON);
    let expense_ratio = seasonal_expense / (total_yield + EPSILON);
    let yield_value_per_sqm = total_yield / (farm_size + EPSILON);
    let expense_per_sqm = seasonal_expense / (farm_size + EPSILON);

    Ok(FeatureVector {
        ndvi: reading.ndvi,
        avg_rainfall: reading.avg_rainfall,
        avg_temp: reading.avg_temp,
        farm_size_sqm: farm_size,
        previous_loans_count: previous_loans,
        defaulted_loans_count: defaulted_loans,
        total_yield_ksh: total_yield,
        seasonal_expense,
        price_of_crop,
        crop_yield_per_sqm: yield_per_sqm,
        net_income,
        profit_margin,
        expense_ratio,
        yield_value_per_sqm,
        expense_per_sqm,
        default_rate: default_rate(previous_loans, defaulted_loans),
        latitude: location.latitude,
        longitude: location.longitude,
        ndvi_x_rainfall: reading.ndvi * reading.avg_rainfall,
        temp_x_rainfall: reading.avg_temp * reading.avg_rainfall,
        price_x_yield: price_of_crop * yield_per_sqm,
        crop_type,
    })
}
