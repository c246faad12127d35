//! Maps backend JSON into the canonical model types.
//!
//! The backend has shipped several response shapes over time: snake_case and
//! camelCase keys, numbers as strings, collections either bare or nested under
//! a key or under `data`. Everything here is total. Unrecognised input yields
//! empty collections or `None`, never a panic.

use std::cmp::Reverse;
use std::collections::HashSet;
use std::str::FromStr;

use serde_json::Value;
use tracing::debug;

use crate::models::{
    ForecastBundle, ForecastPoint, ForecastResult, ForecastSummary, HistoricalRecord,
    InventoryRecommendation, IssuedTokens, Priority, PriorityAction, RiskLevel, RoiEstimate,
    RoiSource, TrialInfo, TrialNotice, UserProfile, DEFAULT_ACCURACY,
};

mod fields;
mod roi;

use fields::*;
pub(crate) use fields::parse_date;
pub use roi::{compute_fallback_roi, AVERAGE_UNIT_PRICE, MONTHLY_SUBSCRIPTION_COST};

/// Finds a collection either at the top level or under one of `keys`,
/// looking one level into `data` as well.
fn collection<'a>(value: &'a Value, keys: &[&str]) -> &'a [Value] {
    match value {
        Value::Array(items) => items.as_slice(),
        Value::Object(obj) => {
            if let Some(items) = keys.iter().find_map(|k| obj.get(*k).and_then(Value::as_array)) {
                return items.as_slice();
            }
            match obj.get("data") {
                Some(inner @ Value::Array(_)) => collection(inner, keys),
                Some(inner @ Value::Object(_)) => {
                    keys.iter()
                        .find_map(|k| inner.get(*k).and_then(Value::as_array))
                        .map(Vec::as_slice)
                        .unwrap_or(&[])
                }
                _ => &[],
            }
        }
        _ => &[],
    }
}

fn nested<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a Object> {
    let obj = value.as_object()?;
    keys.iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_object))
        .or_else(|| {
            obj.get("data")
                .and_then(Value::as_object)
                .and_then(|data| keys.iter().find_map(|k| data.get(*k).and_then(Value::as_object)))
        })
}

fn identity(obj: &Object) -> Option<(String, String)> {
    let sku = text(obj, SKU)?;
    let item_name = text(obj, ITEM_NAME).unwrap_or_else(|| sku.clone());
    Some((sku, item_name))
}

fn normalize_accuracy(obj: &Object) -> f64 {
    match number(obj, ACCURACY) {
        // Some responses report a percentage
        Some(a) if a > 1.0 && a <= 100.0 => a / 100.0,
        Some(a) if (0.0..=1.0).contains(&a) => a,
        _ => DEFAULT_ACCURACY,
    }
}

fn normalize_point(value: &Value) -> Option<ForecastPoint> {
    let obj = value.as_object()?;
    let date = date(obj, DATE)?;
    let predicted_units = number_or_zero(obj, PREDICTED_UNITS);
    Some(ForecastPoint {
        date,
        predicted_units,
        lower_bound: number(obj, LOWER_BOUND).unwrap_or(predicted_units),
        upper_bound: number(obj, UPPER_BOUND).unwrap_or(predicted_units),
    })
}

pub fn normalize_forecasts(value: &Value) -> Vec<ForecastResult> {
    collection(value, &["forecasts", "forecast_results", "forecastResults"])
        .iter()
        .filter_map(Value::as_object)
        .filter_map(|obj| {
            let (sku, item_name) = identity(obj)?;
            let mut forecast_points: Vec<ForecastPoint> = lookup(obj, FORECAST_POINTS)
                .and_then(Value::as_array)
                .map(|points| points.iter().filter_map(normalize_point).collect())
                .unwrap_or_default();
            forecast_points.sort_by_key(|p| p.date);
            Some(ForecastResult {
                sku,
                item_name,
                forecast_points,
                accuracy: normalize_accuracy(obj),
            })
        })
        .collect()
}

fn parse_risk(raw: &str) -> Option<RiskLevel> {
    let raw = raw.trim();
    RiskLevel::from_str(raw).ok().or_else(|| {
        match raw.to_ascii_uppercase().as_str() {
            "CRITICAL" | "URGENT" => Some(RiskLevel::High),
            _ => None,
        }
    })
}

fn demand_speed_risk(raw: &str) -> Option<RiskLevel> {
    match raw.trim().to_ascii_uppercase().as_str() {
        "FAST" => Some(RiskLevel::High),
        "MEDIUM" | "NORMAL" => Some(RiskLevel::Medium),
        "SLOW" => Some(RiskLevel::Low),
        _ => None,
    }
}

/// Explicit risk field, then demand speed, then `MEDIUM`.
fn resolve_risk(obj: &Object) -> RiskLevel {
    RISK_LEVEL
        .iter()
        .filter_map(|key| obj.get(*key).and_then(Value::as_str))
        .find_map(parse_risk)
        .or_else(|| {
            DEMAND_SPEED
                .iter()
                .filter_map(|key| obj.get(*key).and_then(Value::as_str))
                .find_map(demand_speed_risk)
        })
        .unwrap_or_default()
}

pub fn normalize_inventory(value: &Value) -> Vec<InventoryRecommendation> {
    collection(value, &["inventory", "inventory_recommendations", "inventoryRecommendations"])
        .iter()
        .filter_map(Value::as_object)
        .filter_map(|obj| {
            let (sku, item_name) = identity(obj)?;
            Some(InventoryRecommendation {
                sku,
                item_name,
                current_stock: number_or_zero(obj, CURRENT_STOCK),
                recommended_stock: number_or_zero(obj, RECOMMENDED_STOCK),
                safety_stock: number_or_zero(obj, SAFETY_STOCK),
                reorder_point: number_or_zero(obj, REORDER_POINT),
                risk_level: resolve_risk(obj),
            })
        })
        .collect()
}

fn parse_priority(raw: &str) -> Option<Priority> {
    let raw = raw.trim();
    Priority::from_str(raw).ok().or_else(|| {
        match raw.to_ascii_uppercase().as_str() {
            "CRITICAL" | "URGENT" => Some(Priority::High),
            _ => None,
        }
    })
}

/// Priority actions grouped HIGH, MEDIUM, LOW; backend order kept within a group.
pub fn normalize_actions(value: &Value) -> Vec<PriorityAction> {
    let mut actions: Vec<PriorityAction> =
        collection(value, &["priority_actions", "priorityActions", "actions"])
            .iter()
            .filter_map(Value::as_object)
            .filter_map(|obj| {
                let (sku, item_name) = identity(obj)?;
                Some(PriorityAction {
                    sku,
                    item_name,
                    priority: lookup(obj, PRIORITY)
                        .and_then(Value::as_str)
                        .and_then(parse_priority)
                        .unwrap_or_default(),
                    recommended_qty: number_or_zero(obj, RECOMMENDED_QTY),
                    revenue_risk: decimal_or_zero(obj, REVENUE_RISK),
                    roi_percent: number_or_zero(obj, ROI_PERCENT),
                })
            })
            .collect();
    actions.sort_by_key(|a| Reverse(a.priority));
    actions
}

/// Backend ROI block, or `None` when the response carries none.
pub fn normalize_roi(value: &Value) -> Option<RoiEstimate> {
    let obj = nested(value, &["roi", "roi_metrics", "roiMetrics"])?;
    let known = [
        CURRENT_REVENUE,
        PROJECTED_INCREASE,
        COST_SAVINGS,
        NET_ROI,
        IMPROVEMENT_PERCENT,
        STOCKOUT_REDUCTION,
    ];
    if !known.iter().any(|aliases| lookup(obj, aliases).is_some()) {
        return None;
    }
    Some(RoiEstimate {
        current_revenue: decimal_or_zero(obj, CURRENT_REVENUE),
        projected_increase: decimal_or_zero(obj, PROJECTED_INCREASE),
        inventory_cost_savings: decimal_or_zero(obj, COST_SAVINGS),
        net_roi: decimal_or_zero(obj, NET_ROI),
        data_points: count(obj, DATA_POINTS),
        improvement_percent: number_or_zero(obj, IMPROVEMENT_PERCENT),
        stockout_reduction: number_or_zero(obj, STOCKOUT_REDUCTION),
        source: RoiSource::Backend,
    })
}

pub fn normalize_summary(value: &Value) -> Option<ForecastSummary> {
    let obj = nested(value, &["summary"])?;
    let message = value
        .as_object()
        .and_then(|top| text(top, &["message"]))
        .or_else(|| text(obj, MESSAGE));
    Some(ForecastSummary {
        total_records: count(obj, TOTAL_RECORDS),
        unique_items: count(obj, UNIQUE_ITEMS),
        date_range: lookup(obj, DATE_RANGE).and_then(|v| match v {
            Value::Object(range) => {
                let start = text(range, &["start", "from"])?;
                let end = text(range, &["end", "to"])?;
                Some(format!("{} to {}", start, end))
            }
            other => as_text(other),
        }),
        total_sales: number_or_zero(obj, TOTAL_SALES),
        average_daily_sales: number_or_zero(obj, AVERAGE_DAILY_SALES),
        message,
    })
}

/// Builds every derived collection from one response.
///
/// Backend ROI wins; the local estimate is only computed when the response has
/// no ROI block at all.
pub fn normalize_bundle(value: &Value, historical: Vec<HistoricalRecord>) -> ForecastBundle {
    let forecasts = normalize_forecasts(value);
    let inventory = normalize_inventory(value);
    let priority_actions = normalize_actions(value);
    let roi = normalize_roi(value).or_else(|| compute_fallback_roi(&historical, &forecasts));
    let summary = normalize_summary(value);

    debug!(
        forecasts = forecasts.len(),
        inventory = inventory.len(),
        actions = priority_actions.len(),
        roi = ?roi.as_ref().map(|r| r.source),
        "normalized forecast response"
    );

    ForecastBundle {
        forecasts,
        inventory,
        priority_actions,
        roi,
        summary,
        historical,
    }
}

/// Server-provided error text from `detail`, `message` or `error`.
/// Handles plain strings, validation lists (`[{"msg": ..}]`) and nested objects.
pub fn error_message(value: &Value) -> Option<String> {
    fn extract(value: &Value, depth: u8) -> Option<String> {
        if depth > 3 {
            return None;
        }
        match value {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Array(items) => {
                let parts: Vec<String> = items
                    .iter()
                    .filter_map(|item| match item {
                        Value::Object(obj) => obj
                            .get("msg")
                            .and_then(|m| extract(m, depth + 1))
                            .or_else(|| extract(item, depth + 1)),
                        other => extract(other, depth + 1),
                    })
                    .collect();
                (!parts.is_empty()).then(|| parts.join("; "))
            }
            Value::Object(obj) => ["detail", "message", "error"]
                .iter()
                .filter_map(|k| obj.get(*k))
                .find_map(|v| extract(v, depth + 1)),
            _ => None,
        }
    }
    match value {
        Value::Object(_) => extract(value, 0),
        _ => None,
    }
}

/// Reads the 402 payload, which may sit at the top level or inside `detail`.
pub fn normalize_trial_notice(value: &Value) -> TrialNotice {
    let mut notice = TrialNotice::default();
    let Some(obj) = value.as_object() else {
        return notice;
    };
    let inner = obj.get("detail").and_then(Value::as_object);

    if let Some(message) = inner.and_then(|d| text(d, &["message"])).or_else(|| error_message(value)) {
        notice.message = message;
    }
    if let Some(url) = inner
        .and_then(|d| text(d, UPGRADE_URL))
        .or_else(|| text(obj, UPGRADE_URL))
    {
        notice.upgrade_url = url;
    }
    notice
}

pub fn normalize_trial_info(value: &Value) -> TrialInfo {
    let Some(obj) = nested(value, &["trial", "trial_info"]).or_else(|| value.as_object()) else {
        return TrialInfo::default();
    };
    TrialInfo {
        plan: text(obj, PLAN).unwrap_or_else(|| "trial".to_string()),
        is_active: lookup(obj, IS_ACTIVE).and_then(as_bool).unwrap_or(false),
        days_remaining: number(obj, DAYS_REMAINING)
            .map(|d| d.round() as i64)
            .unwrap_or(0),
        trial_ends_at: lookup(obj, TRIAL_ENDS_AT)
            .and_then(Value::as_str)
            .and_then(fields::parse_timestamp),
    }
}

pub fn normalize_user(value: &Value) -> Option<UserProfile> {
    let obj = value.as_object()?;
    let obj = obj.get("user").and_then(Value::as_object).unwrap_or(obj);
    let email = text(obj, EMAIL)?;
    Some(UserProfile {
        full_name: text(obj, FULL_NAME).unwrap_or_default(),
        email,
        company_name: text(obj, COMPANY_NAME),
    })
}

/// Token pair from a login or refresh response. `None` without an access token.
pub fn normalize_tokens(value: &Value) -> Option<IssuedTokens> {
    let obj = value.as_object()?;
    let obj = match obj.get("data").and_then(Value::as_object) {
        Some(data) if lookup(obj, ACCESS_TOKEN).is_none() => data,
        _ => obj,
    };
    Some(IssuedTokens {
        access_token: text(obj, ACCESS_TOKEN)?,
        refresh_token: text(obj, REFRESH_TOKEN),
        user: obj.get("user").and_then(normalize_user),
    })
}

/// Distinct SKUs across a set of historical rows.
pub(crate) fn unique_skus(records: &[HistoricalRecord]) -> usize {
    records.iter().map(|r| r.sku.as_str()).collect::<HashSet<_>>().len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use proptest::prelude::*;
    use rust_decimal::Decimal;
    use serde_json::json;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 9, d).unwrap()
    }

    #[test]
    fn missing_accuracy_defaults() {
        let forecasts = normalize_forecasts(&json!({
            "forecasts": [{
                "sku": "SKU-1",
                "forecast": [{"date": "2025-09-01", "predicted_units": 4}]
            }]
        }));
        assert_eq!(forecasts.len(), 1);
        assert_eq!(forecasts[0].accuracy, 0.94);
        assert_eq!(forecasts[0].item_name, "SKU-1");
        assert_eq!(forecasts[0].forecast_points[0].lower_bound, 4.0);
    }

    #[test]
    fn forecast_points_accept_camel_case_and_strings() {
        let forecasts = normalize_forecasts(&json!([{
            "productId": "P1",
            "itemName": "Widget",
            "accuracy": "87",
            "forecastPoints": [
                {"date": "2025-09-02", "predictedUnits": "10.5", "lowerBound": 8, "upperBound": "13"},
                {"date": "2025-09-01", "predictedUnits": 9},
                {"date": "not a date", "predictedUnits": 1}
            ]
        }]));
        let f = &forecasts[0];
        assert_eq!(f.sku, "P1");
        assert_eq!(f.item_name, "Widget");
        assert!((f.accuracy - 0.87).abs() < 1e-9);
        assert_eq!(f.forecast_points.len(), 2);
        assert_eq!(f.forecast_points[0].date, day(1));
        assert_eq!(f.forecast_points[1].predicted_units, 10.5);
        assert_eq!(f.forecast_points[1].upper_bound, 13.0);
    }

    #[test]
    fn inventory_without_risk_or_speed_is_medium() {
        let inventory = normalize_inventory(&json!({
            "inventory": [{"sku": "A", "current_stock": 5, "recommended_stock": 30}]
        }));
        assert_eq!(inventory[0].risk_level, RiskLevel::Medium);
        assert_eq!(inventory[0].safety_stock, 0.0);
    }

    #[test]
    fn risk_fallback_chain() {
        let inventory = normalize_inventory(&json!([
            {"sku": "A", "riskLevel": "high"},
            {"sku": "B", "shortage_risk": "bogus", "demand_speed": "FAST"},
            {"sku": "C", "demandSpeed": "slow"},
            {"sku": "D", "demand_speed": "NORMAL"},
            {"sku": "E", "stock_status": "critical"},
            {"sku": "F", "demand_speed": "glacial"}
        ]));
        let levels: Vec<RiskLevel> = inventory.iter().map(|i| i.risk_level).collect();
        assert_eq!(
            levels,
            vec![
                RiskLevel::High,
                RiskLevel::High,
                RiskLevel::Low,
                RiskLevel::Medium,
                RiskLevel::High,
                RiskLevel::Medium
            ]
        );
    }

    #[test]
    fn actions_grouped_by_priority_stably() {
        let actions = normalize_actions(&json!({
            "priorityActions": [
                {"sku": "L1"},
                {"sku": "H1", "priority": "HIGH", "shortage": 25, "expected_revenue": 3750, "expected_roi": 150},
                {"sku": "M1", "priority": "medium"},
                {"sku": "H2", "priority": "high"},
                {"sku": "L2", "priority": "low"}
            ]
        }));
        let order: Vec<&str> = actions.iter().map(|a| a.sku.as_str()).collect();
        assert_eq!(order, vec!["H1", "H2", "M1", "L1", "L2"]);
        assert_eq!(actions[0].recommended_qty, 25.0);
        assert_eq!(actions[0].revenue_risk, Decimal::from(3750));
        assert_eq!(actions[0].roi_percent, 150.0);
        assert_eq!(actions[3].priority, Priority::Low);
    }

    #[test]
    fn collections_nested_under_data() {
        let value = json!({"data": {"forecasts": [{"sku": "X"}], "inventory": [{"sku": "Y"}]}});
        assert_eq!(normalize_forecasts(&value).len(), 1);
        assert_eq!(normalize_inventory(&value).len(), 1);
        assert!(normalize_actions(&value).is_empty());
    }

    #[test]
    fn unrecognised_shapes_are_empty() {
        for value in [json!(null), json!(3), json!("text"), json!({"forecasts": "nope"})] {
            assert!(normalize_forecasts(&value).is_empty());
            assert!(normalize_roi(&value).is_none());
        }
    }

    #[test]
    fn backend_roi_wins_over_fallback() {
        let historical = vec![HistoricalRecord {
            date: day(1),
            sku: "A".into(),
            item_name: "A".into(),
            store: "Store A".into(),
            units_sold: 10.0,
        }];
        let value = json!({"roi": {"current_revenue": "1000", "net_roi": 12, "improvement_percent": 7}});
        let bundle = normalize_bundle(&value, historical.clone());
        let roi = bundle.roi.unwrap();
        assert_eq!(roi.source, RoiSource::Backend);
        assert_eq!(roi.current_revenue, Decimal::from(1000));
        assert_eq!(roi.net_roi, Decimal::from(12));

        let bundle = normalize_bundle(&json!({}), historical);
        assert_eq!(bundle.roi.unwrap().source, RoiSource::Computed);
    }

    #[test]
    fn summary_with_object_date_range() {
        let summary = normalize_summary(&json!({
            "message": "Processed",
            "summary": {
                "total_records": 300,
                "unique_items": "5",
                "date_range": {"start": "2025-09-01", "end": "2025-09-30"},
                "total_sales": 1234.5
            }
        }))
        .unwrap();
        assert_eq!(summary.total_records, 300);
        assert_eq!(summary.unique_items, 5);
        assert_eq!(summary.date_range.as_deref(), Some("2025-09-01 to 2025-09-30"));
        assert_eq!(summary.message.as_deref(), Some("Processed"));
    }

    #[test]
    fn error_message_shapes() {
        assert_eq!(error_message(&json!({"detail": "Invalid credentials"})).as_deref(), Some("Invalid credentials"));
        assert_eq!(
            error_message(&json!({"detail": [{"msg": "field required"}, {"msg": "too short"}]})).as_deref(),
            Some("field required; too short")
        );
        assert_eq!(error_message(&json!({"error": {"message": "boom"}})).as_deref(), Some("boom"));
        assert_eq!(error_message(&json!({"other": 1})), None);
        assert_eq!(error_message(&json!("bare")), None);
    }

    #[test]
    fn trial_notice_defaults_and_nested_detail() {
        assert_eq!(normalize_trial_notice(&json!(null)), TrialNotice::default());
        let notice = normalize_trial_notice(&json!({
            "detail": {"message": "Trial over", "upgrade_url": "/billing"}
        }));
        assert_eq!(notice.status, 402);
        assert_eq!(notice.message, "Trial over");
        assert_eq!(notice.upgrade_url, "/billing");
        let notice = normalize_trial_notice(&json!({"detail": "Trial ended"}));
        assert_eq!(notice.message, "Trial ended");
        assert_eq!(notice.upgrade_url, "/pricing");
    }

    #[test]
    fn tokens_require_access_token() {
        assert!(normalize_tokens(&json!({"refresh_token": "r"})).is_none());
        let tokens = normalize_tokens(&json!({
            "access_token": "a",
            "user": {"email": "u@example.com", "fullName": "U Ser"}
        }))
        .unwrap();
        assert_eq!(tokens.access_token, "a");
        assert_eq!(tokens.refresh_token, None);
        assert_eq!(tokens.user.unwrap().full_name, "U Ser");
    }

    #[test]
    fn trial_info_aliases() {
        let info = normalize_trial_info(&json!({
            "plan_tier": "pro", "isActive": "true", "days_left": 3, "trial_ends_at": "2025-10-20T00:00:00Z"
        }));
        assert_eq!(info.plan, "pro");
        assert!(info.is_active);
        assert_eq!(info.days_remaining, 3);
        assert!(info.trial_ends_at.is_some());
    }

    fn arb_json() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(|n| json!(n)),
            any::<f64>().prop_map(|f| serde_json::Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)),
            prop_oneof![
                Just("sku".to_string()),
                Just("HIGH".to_string()),
                Just("2025-09-01".to_string()),
                Just("12.5".to_string()),
                "[a-zA-Z0-9_ ]{0,12}",
            ]
            .prop_map(Value::String),
        ];
        leaf.prop_recursive(4, 64, 8, |inner| {
            let key = prop_oneof![
                Just("sku".to_string()),
                Just("forecasts".to_string()),
                Just("forecast".to_string()),
                Just("inventory".to_string()),
                Just("priority_actions".to_string()),
                Just("roi".to_string()),
                Just("data".to_string()),
                Just("date".to_string()),
                Just("predicted_units".to_string()),
                Just("risk_level".to_string()),
                Just("summary".to_string()),
                Just("detail".to_string()),
                "[a-z_]{1,10}",
            ];
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
                prop::collection::btree_map(key, inner, 0..6)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn normalizers_never_panic(value in arb_json()) {
            let bundle = normalize_bundle(&value, Vec::new());
            for f in &bundle.forecasts {
                prop_assert!(f.accuracy >= 0.0 && f.accuracy <= 1.0);
            }
            let _ = normalize_trial_notice(&value);
            let _ = normalize_trial_info(&value);
            let _ = normalize_tokens(&value);
            let _ = error_message(&value);
        }
    }
}
