use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

use crate::models::{ForecastBundle, HistoricalRecord};

/// One chart point; bounds are absent for actuals.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartPoint {
    pub date: NaiveDate,
    pub value: f64,
    pub lower: Option<f64>,
    pub upper: Option<f64>,
}

/// Forecast for one SKU, or the per-day total across all SKUs when `sku` is `None`.
pub fn forecast_series(bundle: &ForecastBundle, sku: Option<&str>) -> Vec<ChartPoint> {
    let mut by_date: BTreeMap<NaiveDate, (f64, f64, f64)> = BTreeMap::new();
    for forecast in bundle
        .forecasts
        .iter()
        .filter(|f| sku.map_or(true, |s| f.sku == s))
    {
        for point in &forecast.forecast_points {
            let entry = by_date.entry(point.date).or_insert((0.0, 0.0, 0.0));
            entry.0 += point.predicted_units;
            entry.1 += point.lower_bound;
            entry.2 += point.upper_bound;
        }
    }
    by_date
        .into_iter()
        .map(|(date, (value, lower, upper))| ChartPoint {
            date,
            value,
            lower: Some(lower),
            upper: Some(upper),
        })
        .collect()
}

/// Units sold per day, optionally for a single SKU.
pub fn historical_series(records: &[HistoricalRecord], sku: Option<&str>) -> Vec<ChartPoint> {
    let mut by_date: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    for record in records.iter().filter(|r| sku.map_or(true, |s| r.sku == s)) {
        *by_date.entry(record.date).or_insert(0.0) += record.units_sold;
    }
    by_date
        .into_iter()
        .map(|(date, value)| ChartPoint {
            date,
            value,
            lower: None,
            upper: None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ForecastPoint, ForecastResult};

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 10, day).unwrap()
    }

    fn forecast(sku: &str, points: &[(u32, f64)]) -> ForecastResult {
        ForecastResult {
            sku: sku.into(),
            item_name: sku.into(),
            forecast_points: points
                .iter()
                .map(|(day, units)| ForecastPoint {
                    date: d(*day),
                    predicted_units: *units,
                    lower_bound: units - 1.0,
                    upper_bound: units + 1.0,
                })
                .collect(),
            accuracy: 0.94,
        }
    }

    #[test]
    fn totals_are_date_ordered() {
        let bundle = ForecastBundle {
            forecasts: vec![forecast("A", &[(2, 5.0), (1, 3.0)]), forecast("B", &[(1, 4.0)])],
            ..Default::default()
        };
        let total = forecast_series(&bundle, None);
        assert_eq!(total.len(), 2);
        assert_eq!(total[0].date, d(1));
        assert_eq!(total[0].value, 7.0);
        assert_eq!(total[0].lower, Some(5.0));

        let only_b = forecast_series(&bundle, Some("B"));
        assert_eq!(only_b.len(), 1);
        assert!(forecast_series(&bundle, Some("missing")).is_empty());
    }

    #[test]
    fn history_sums_per_day() {
        let records = vec![
            HistoricalRecord {
                date: d(3),
                sku: "A".into(),
                item_name: "A".into(),
                store: "S".into(),
                units_sold: 2.0,
            },
            HistoricalRecord {
                date: d(3),
                sku: "B".into(),
                item_name: "B".into(),
                store: "S".into(),
                units_sold: 5.0,
            },
        ];
        let series = historical_series(&records, None);
        assert_eq!(series, vec![ChartPoint { date: d(3), value: 7.0, lower: None, upper: None }]);
        assert_eq!(historical_series(&records, Some("A"))[0].value, 2.0);
    }
}
