//! CSV exports of the normalized dashboard data.
//!
//! Every writer goes through the `csv` crate, so commas, quotes and newlines in
//! product names are escaped the same way in every file.

use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use strum::{Display as StrumDisplay, EnumIter, IntoEnumIterator};
use tracing::info;

use crate::errors::{ClientError, ClientResult};
use crate::models::{
    DateRange, ForecastBundle, ForecastPoint, ForecastResult, HistoricalRecord,
    InventoryRecommendation, PriorityAction,
};

pub const FORECAST_HEADER: [&str; 6] = ["SKU", "Item_Name", "Date", "Predicted_Units", "Lower_CI", "Upper_CI"];
pub const INVENTORY_HEADER: [&str; 7] = [
    "SKU",
    "Item_Name",
    "Current_Stock",
    "Recommended_Stock",
    "Safety_Stock",
    "Reorder_Point",
    "Risk_Level",
];
pub const ACTIONS_HEADER: [&str; 6] = [
    "Priority",
    "SKU",
    "Item_Name",
    "Recommended_Qty",
    "Revenue_Risk",
    "ROI_Percent",
];
pub const HISTORICAL_HEADER: [&str; 5] = ["Date", "SKU", "Item_Name", "Store", "Units_Sold"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, StrumDisplay, EnumIter)]
pub enum ExportKind {
    #[strum(serialize = "Forecasts")]
    Forecasts,
    #[strum(serialize = "Inventory")]
    Inventory,
    #[strum(serialize = "Priority-Actions")]
    PriorityActions,
    #[strum(serialize = "Historical")]
    Historical,
}

/// A generated download: file name plus CSV text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportFile {
    pub filename: String,
    pub content: String,
}

impl ExportFile {
    pub fn write_to(&self, dir: &Path) -> ClientResult<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(&self.filename);
        fs::write(&path, &self.content)?;
        info!(path = %path.display(), bytes = self.content.len(), "export written");
        Ok(path)
    }
}

/// `ForecastAI-{Kind}-{from}-to-{to}.csv`, or `ForecastAI-{Kind}.csv` without a range.
pub fn export_filename(kind: ExportKind, range: Option<&DateRange>) -> String {
    match range {
        Some(range) => format!("ForecastAI-{}-{}-to-{}.csv", kind, range.from, range.to),
        None => format!("ForecastAI-{}.csv", kind),
    }
}

fn write_csv<T, I, R, F>(header: &[&str], rows: I, mut to_record: F) -> ClientResult<String>
where
    I: IntoIterator<Item = T>,
    R: IntoIterator,
    R::Item: AsRef<[u8]>,
    F: FnMut(T) -> R,
{
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(header)?;
    for row in rows {
        writer.write_record(to_record(row))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|err| ClientError::Internal(err.to_string()))?;
    String::from_utf8(bytes).map_err(|err| ClientError::Internal(err.to_string()))
}

fn num(value: impl Display) -> String {
    value.to_string()
}

/// One row per forecast point.
pub fn export_forecasts(forecasts: &[ForecastResult]) -> ClientResult<String> {
    let rows = forecasts
        .iter()
        .flat_map(|f| f.forecast_points.iter().map(move |p| (f, p)));
    write_csv(&FORECAST_HEADER, rows, |(f, p): (&ForecastResult, &ForecastPoint)| {
        [
            f.sku.clone(),
            f.item_name.clone(),
            p.date.to_string(),
            num(p.predicted_units),
            num(p.lower_bound),
            num(p.upper_bound),
        ]
    })
}

pub fn export_inventory(inventory: &[InventoryRecommendation]) -> ClientResult<String> {
    write_csv(&INVENTORY_HEADER, inventory, |i: &InventoryRecommendation| {
        [
            i.sku.clone(),
            i.item_name.clone(),
            num(i.current_stock),
            num(i.recommended_stock),
            num(i.safety_stock),
            num(i.reorder_point),
            i.risk_level.to_string(),
        ]
    })
}

pub fn export_actions(actions: &[PriorityAction]) -> ClientResult<String> {
    write_csv(&ACTIONS_HEADER, actions, |a: &PriorityAction| {
        [
            a.priority.to_string(),
            a.sku.clone(),
            a.item_name.clone(),
            num(a.recommended_qty),
            num(a.revenue_risk),
            num(a.roi_percent),
        ]
    })
}

pub fn export_historical(records: &[HistoricalRecord]) -> ClientResult<String> {
    write_csv(&HISTORICAL_HEADER, records, |r: &HistoricalRecord| {
        [
            r.date.to_string(),
            r.sku.clone(),
            r.item_name.clone(),
            r.store.clone(),
            num(r.units_sold),
        ]
    })
}

pub fn export(kind: ExportKind, bundle: &ForecastBundle, range: Option<&DateRange>) -> ClientResult<ExportFile> {
    let content = match kind {
        ExportKind::Forecasts => export_forecasts(&bundle.forecasts)?,
        ExportKind::Inventory => export_inventory(&bundle.inventory)?,
        ExportKind::PriorityActions => export_actions(&bundle.priority_actions)?,
        ExportKind::Historical => export_historical(&bundle.historical)?,
    };
    Ok(ExportFile {
        filename: export_filename(kind, range),
        content,
    })
}

/// Every export kind for the bundle.
pub fn export_all(bundle: &ForecastBundle, range: Option<&DateRange>) -> ClientResult<Vec<ExportFile>> {
    ExportKind::iter().map(|kind| export(kind, bundle, range)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Priority, RiskLevel};
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 9, day).unwrap()
    }

    #[test]
    fn empty_forecasts_yield_header_only() {
        assert_eq!(
            export_forecasts(&[]).unwrap(),
            "SKU,Item_Name,Date,Predicted_Units,Lower_CI,Upper_CI\n"
        );
        assert_eq!(export_historical(&[]).unwrap(), "Date,SKU,Item_Name,Store,Units_Sold\n");
    }

    #[test]
    fn forecast_rows_escape_names() {
        let forecasts = vec![ForecastResult {
            sku: "SKU-1".into(),
            item_name: "Chair, \"Deluxe\"".into(),
            forecast_points: vec![ForecastPoint {
                date: d(1),
                predicted_units: 12.5,
                lower_bound: 10.0,
                upper_bound: 15.0,
            }],
            accuracy: 0.94,
        }];
        let csv = export_forecasts(&forecasts).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[1], "SKU-1,\"Chair, \"\"Deluxe\"\"\",2025-09-01,12.5,10,15");
    }

    #[test]
    fn every_export_escapes_the_same_way() {
        let name = "Lamp\nwith newline";
        let bundle = ForecastBundle {
            inventory: vec![InventoryRecommendation {
                sku: "A".into(),
                item_name: name.into(),
                current_stock: 5.0,
                recommended_stock: 30.0,
                safety_stock: 3.0,
                reorder_point: 10.0,
                risk_level: RiskLevel::High,
            }],
            priority_actions: vec![PriorityAction {
                sku: "A".into(),
                item_name: name.into(),
                priority: Priority::High,
                recommended_qty: 25.0,
                revenue_risk: dec!(3750.50),
                roi_percent: 150.0,
            }],
            ..Default::default()
        };

        let inventory = export(ExportKind::Inventory, &bundle, None).unwrap();
        assert!(inventory.content.contains("A,\"Lamp\nwith newline\",5,30,3,10,HIGH"));
        let actions = export(ExportKind::PriorityActions, &bundle, None).unwrap();
        assert!(actions.content.contains("HIGH,A,\"Lamp\nwith newline\",25,3750.50,150"));
    }

    #[test]
    fn filenames_encode_kind_and_range() {
        let range = DateRange::new(d(1), d(30));
        assert_eq!(
            export_filename(ExportKind::Forecasts, Some(&range)),
            "ForecastAI-Forecasts-2025-09-01-to-2025-09-30.csv"
        );
        assert_eq!(export_filename(ExportKind::PriorityActions, None), "ForecastAI-Priority-Actions.csv");
    }

    #[test]
    fn export_all_writes_four_files() {
        let dir = TempDir::new().unwrap();
        let files = export_all(&ForecastBundle::default(), Some(&DateRange::new(d(1), d(2)))).unwrap();
        assert_eq!(files.len(), 4);
        for file in &files {
            let path = file.write_to(dir.path()).unwrap();
            assert_eq!(std::fs::read_to_string(path).unwrap().lines().count(), 1);
        }
    }
}
