//! Alias table and scalar coercions shared by the normalizers.
//!
//! Each canonical field lists every key the backend has been seen to use for
//! it, in order of preference. Lookups skip `null` so a later alias can win.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use std::str::FromStr;

pub(crate) type Object = Map<String, Value>;

pub(crate) const SKU: &[&str] = &["sku", "SKU", "product_id", "productId", "item_id", "itemId", "product"];
pub(crate) const ITEM_NAME: &[&str] = &[
    "item_name",
    "itemName",
    "product_name",
    "productName",
    "name",
    "product",
];
pub(crate) const ACCURACY: &[&str] = &["accuracy", "model_accuracy", "modelAccuracy"];
pub(crate) const FORECAST_POINTS: &[&str] = &[
    "forecast",
    "forecast_points",
    "forecastPoints",
    "predictions",
    "points",
];
pub(crate) const DATE: &[&str] = &["date", "ds", "day"];
pub(crate) const PREDICTED_UNITS: &[&str] = &[
    "predicted_units",
    "predictedUnits",
    "predicted",
    "yhat",
    "value",
];
pub(crate) const LOWER_BOUND: &[&str] = &[
    "lower_ci",
    "lowerCi",
    "lower_bound",
    "lowerBound",
    "yhat_lower",
    "lower",
];
pub(crate) const UPPER_BOUND: &[&str] = &[
    "upper_ci",
    "upperCi",
    "upper_bound",
    "upperBound",
    "yhat_upper",
    "upper",
];

pub(crate) const CURRENT_STOCK: &[&str] = &["current_stock", "currentStock", "stock", "on_hand"];
pub(crate) const RECOMMENDED_STOCK: &[&str] = &[
    "recommended_stock",
    "recommendedStock",
    "required_stock",
    "target_stock",
];
pub(crate) const SAFETY_STOCK: &[&str] = &["safety_stock", "safetyStock"];
pub(crate) const REORDER_POINT: &[&str] = &["reorder_point", "reorderPoint"];
pub(crate) const RISK_LEVEL: &[&str] = &[
    "risk_level",
    "riskLevel",
    "shortage_risk",
    "shortageRisk",
    "shortagerisk",
    "stock_status",
];
pub(crate) const DEMAND_SPEED: &[&str] = &["demand_speed", "demandSpeed"];

pub(crate) const PRIORITY: &[&str] = &["priority", "priority_level", "priorityLevel"];
pub(crate) const RECOMMENDED_QTY: &[&str] = &[
    "recommended_qty",
    "recommendedQty",
    "order_quantity",
    "orderQuantity",
    "shortage",
];
pub(crate) const REVENUE_RISK: &[&str] = &[
    "revenue_risk",
    "revenueRisk",
    "estimated_revenue_loss",
    "expected_revenue",
];
pub(crate) const ROI_PERCENT: &[&str] = &["roi_percent", "roiPercent", "expected_roi", "roi"];

pub(crate) const CURRENT_REVENUE: &[&str] = &["current_revenue", "currentRevenue", "current_monthly_revenue"];
pub(crate) const PROJECTED_INCREASE: &[&str] = &[
    "projected_increase",
    "projectedIncrease",
    "projected_revenue_increase",
];
pub(crate) const COST_SAVINGS: &[&str] = &[
    "inventory_cost_savings",
    "inventoryCostSavings",
    "cost_savings",
];
pub(crate) const NET_ROI: &[&str] = &["net_roi", "netRoi", "roi_percentage"];
pub(crate) const DATA_POINTS: &[&str] = &["data_points", "dataPoints", "total_records"];
pub(crate) const IMPROVEMENT_PERCENT: &[&str] = &["improvement_percent", "improvementPercent"];
pub(crate) const STOCKOUT_REDUCTION: &[&str] = &["stockout_reduction", "stockoutReduction"];

pub(crate) const TOTAL_RECORDS: &[&str] = &["total_records", "totalRecords"];
pub(crate) const UNIQUE_ITEMS: &[&str] = &["unique_items", "uniqueItems", "unique_products"];
pub(crate) const DATE_RANGE: &[&str] = &["date_range", "dateRange"];
pub(crate) const TOTAL_SALES: &[&str] = &["total_sales", "totalSales"];
pub(crate) const AVERAGE_DAILY_SALES: &[&str] = &["average_daily_sales", "averageDailySales", "avg_daily_sales"];
pub(crate) const MESSAGE: &[&str] = &["message", "detail"];

pub(crate) const ACCESS_TOKEN: &[&str] = &["access_token", "accessToken", "token"];
pub(crate) const REFRESH_TOKEN: &[&str] = &["refresh_token", "refreshToken"];
pub(crate) const FULL_NAME: &[&str] = &["full_name", "fullName", "name"];
pub(crate) const EMAIL: &[&str] = &["email"];
pub(crate) const COMPANY_NAME: &[&str] = &["company_name", "companyName", "company"];

pub(crate) const UPGRADE_URL: &[&str] = &["upgrade_url", "upgradeUrl"];
pub(crate) const PLAN: &[&str] = &["plan", "plan_tier", "planTier", "subscription_plan"];
pub(crate) const IS_ACTIVE: &[&str] = &["is_active", "isActive", "is_trial_active", "active"];
pub(crate) const DAYS_REMAINING: &[&str] = &["days_remaining", "daysRemaining", "days_left"];
pub(crate) const TRIAL_ENDS_AT: &[&str] = &["trial_ends_at", "trialEndsAt", "trial_end", "trial_end_date"];

/// First non-null value stored under any of `aliases`.
pub(crate) fn lookup<'a>(obj: &'a Object, aliases: &[&str]) -> Option<&'a Value> {
    aliases
        .iter()
        .filter_map(|key| obj.get(*key))
        .find(|v| !v.is_null())
}

/// Numbers, or strings holding a number (`"12"`, `" 3.5 "`, `"1,200"`).
pub(crate) fn as_f64(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().replace(',', "").parse::<f64>().ok()?,
        Value::Bool(_) | Value::Null | Value::Array(_) | Value::Object(_) => return None,
    };
    n.is_finite().then_some(n)
}

pub(crate) fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub(crate) fn as_decimal(value: &Value) -> Option<Decimal> {
    if let Value::String(s) = value {
        let cleaned = s.trim().trim_start_matches('$').replace(',', "");
        if let Ok(d) = Decimal::from_str(&cleaned) {
            return Some(d);
        }
    }
    as_f64(value).and_then(Decimal::from_f64)
}

pub(crate) fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|n| n != 0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Accepts `YYYY-MM-DD` (optionally followed by a time), `YYYY/MM/DD` and `MM/DD/YYYY`.
pub(crate) fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    let head = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(head, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%Y-%m-%d"))
        .or_else(|_| NaiveDate::parse_from_str(raw, "%Y/%m/%d"))
        .or_else(|_| NaiveDate::parse_from_str(raw, "%m/%d/%Y"))
        .ok()
}

pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|naive| naive.and_utc())
        })
        .or_else(|| {
            parse_date(raw)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|naive| naive.and_utc())
        })
}

pub(crate) fn number(obj: &Object, aliases: &[&str]) -> Option<f64> {
    lookup(obj, aliases).and_then(as_f64)
}

pub(crate) fn number_or_zero(obj: &Object, aliases: &[&str]) -> f64 {
    number(obj, aliases).unwrap_or(0.0)
}

pub(crate) fn text(obj: &Object, aliases: &[&str]) -> Option<String> {
    lookup(obj, aliases).and_then(as_text)
}

pub(crate) fn decimal_or_zero(obj: &Object, aliases: &[&str]) -> Decimal {
    lookup(obj, aliases)
        .and_then(as_decimal)
        .unwrap_or(Decimal::ZERO)
}

pub(crate) fn date(obj: &Object, aliases: &[&str]) -> Option<NaiveDate> {
    lookup(obj, aliases)
        .and_then(Value::as_str)
        .and_then(parse_date)
}

pub(crate) fn count(obj: &Object, aliases: &[&str]) -> u64 {
    number(obj, aliases)
        .filter(|n| *n >= 0.0)
        .map(|n| n.round() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case(json!(12), Some(12.0))]
    #[case(json!("12.5"), Some(12.5))]
    #[case(json!(" 1,200 "), Some(1200.0))]
    #[case(json!("n/a"), None)]
    #[case(json!(true), None)]
    #[case(json!(null), None)]
    fn numbers_accept_strings(#[case] input: Value, #[case] expected: Option<f64>) {
        assert_eq!(as_f64(&input), expected);
    }

    #[rstest]
    #[case("2025-03-04", Some((2025, 3, 4)))]
    #[case("2025-03-04T10:00:00", Some((2025, 3, 4)))]
    #[case("2025/03/04", Some((2025, 3, 4)))]
    #[case("03/04/2025", Some((2025, 3, 4)))]
    #[case("yesterday", None)]
    #[case("", None)]
    fn date_formats(#[case] raw: &str, #[case] expected: Option<(i32, u32, u32)>) {
        let expected = expected.and_then(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d));
        assert_eq!(parse_date(raw), expected);
    }

    #[test]
    fn lookup_skips_null_aliases() {
        let obj = json!({"riskLevel": null, "stock_status": "HIGH"});
        let obj = obj.as_object().unwrap();
        assert_eq!(text(obj, RISK_LEVEL).as_deref(), Some("HIGH"));
    }

    #[test]
    fn decimal_strips_currency_formatting() {
        assert_eq!(as_decimal(&json!("$1,250.50")), Decimal::from_str("1250.50").ok());
        assert_eq!(as_decimal(&json!(42)), Some(Decimal::from(42)));
    }

    #[test]
    fn timestamps_accept_naive_and_date_only() {
        assert!(parse_timestamp("2025-10-01T12:00:00Z").is_some());
        assert!(parse_timestamp("2025-10-01T12:00:00.123").is_some());
        assert!(parse_timestamp("2025-10-01").is_some());
        assert!(parse_timestamp("soon").is_none());
    }
}
