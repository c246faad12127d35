use std::collections::HashSet;

use rust_decimal::Decimal;

use crate::models::{ForecastResult, HistoricalRecord, RoiEstimate, RoiSource};

/// Average selling price assumed per unit when estimating revenue.
pub const AVERAGE_UNIT_PRICE: f64 = 170.0;
/// Monthly subscription cost the net ROI is measured against.
pub const MONTHLY_SUBSCRIPTION_COST: f64 = 7500.0;

const DEFAULT_IMPROVEMENT_PERCENT: f64 = 15.0;
const MIN_IMPROVEMENT_PERCENT: f64 = 5.0;
const MAX_IMPROVEMENT_PERCENT: f64 = 40.0;
const SAVINGS_RATIO: f64 = 0.6;
const MAX_STOCKOUT_REDUCTION: f64 = 95.0;

fn money(value: f64) -> Decimal {
    Decimal::from(value.round() as i64)
}

/// Estimates ROI from uploaded history and the returned forecasts.
///
/// Used only when the backend response carries no ROI. Returns `None` without
/// historical data.
pub fn compute_fallback_roi(
    historical: &[HistoricalRecord],
    forecasts: &[ForecastResult],
) -> Option<RoiEstimate> {
    if historical.is_empty() {
        return None;
    }

    let historical_units: f64 = historical.iter().map(|r| r.units_sold).sum();
    let forecast_units: f64 = forecasts.iter().map(ForecastResult::total_predicted_units).sum();
    let period_days = historical
        .iter()
        .map(|r| r.date)
        .collect::<HashSet<_>>()
        .len()
        .max(1) as f64;

    let current_revenue = (historical_units * AVERAGE_UNIT_PRICE / period_days * 30.0).round();

    let improvement_percent = if historical_units > 0.0 && forecast_units > 0.0 {
        ((forecast_units - historical_units) / historical_units * 100.0)
            .round()
            .clamp(MIN_IMPROVEMENT_PERCENT, MAX_IMPROVEMENT_PERCENT)
    } else {
        DEFAULT_IMPROVEMENT_PERCENT
    };

    let projected_increase = (current_revenue * improvement_percent / 100.0).round();
    let inventory_cost_savings = (projected_increase * SAVINGS_RATIO).round();

    let data_quality = (50.0 + historical.len() as f64 / 10.0).min(100.0);
    let stockout_reduction = (65.0 + super::unique_skus(historical) as f64 * 2.0 + data_quality * 0.3)
        .round()
        .clamp(0.0, MAX_STOCKOUT_REDUCTION);

    let net_roi = ((projected_increase - MONTHLY_SUBSCRIPTION_COST) / MONTHLY_SUBSCRIPTION_COST * 100.0)
        .round()
        .max(0.0);

    Some(RoiEstimate {
        current_revenue: money(current_revenue),
        projected_increase: money(projected_increase),
        inventory_cost_savings: money(inventory_cost_savings),
        net_roi: money(net_roi),
        data_points: historical.len() as u64,
        improvement_percent,
        stockout_reduction,
        source: RoiSource::Computed,
    })
}
