//! Uploaded sales files and the client-side view of their history.
//!
//! Only CSV uploads are parsed locally; spreadsheets go to the backend as-is.

use std::path::Path;

use serde::Serialize;
use tracing::{debug, warn};

use crate::errors::{ClientError, ClientResult};
use crate::models::{DateRange, HistoricalRecord};
use crate::normalize::parse_date;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetFormat {
    Csv,
    Xlsx,
}

impl DatasetFormat {
    pub fn from_file_name(file_name: &str) -> ClientResult<Self> {
        let extension = Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("csv") => Ok(DatasetFormat::Csv),
            Some("xlsx") | Some("xls") => Ok(DatasetFormat::Xlsx),
            _ => Err(ClientError::validation(
                "Please upload a CSV or Excel file (.csv, .xlsx, .xls)",
            )),
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            DatasetFormat::Csv => "text/csv",
            DatasetFormat::Xlsx => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            }
        }
    }
}

/// A file selected for upload. Immutable once sent; a new upload supersedes it.
#[derive(Debug, Clone)]
pub struct UploadedDataset {
    pub file_name: String,
    pub format: DatasetFormat,
    pub bytes: Vec<u8>,
    pub raw_csv_text: Option<String>,
    pub store: String,
    pub date_range: Option<DateRange>,
}

impl UploadedDataset {
    pub fn from_bytes(
        file_name: impl Into<String>,
        bytes: Vec<u8>,
        store: impl Into<String>,
    ) -> ClientResult<Self> {
        let file_name = file_name.into();
        let format = DatasetFormat::from_file_name(&file_name)?;
        if bytes.is_empty() {
            return Err(ClientError::validation("The selected file is empty"));
        }

        let raw_csv_text = match format {
            DatasetFormat::Csv => {
                let text = String::from_utf8(bytes.clone()).map_err(|_| {
                    ClientError::validation("CSV file must be UTF-8 encoded text")
                })?;
                Some(text.trim_start_matches('\u{feff}').to_string())
            }
            DatasetFormat::Xlsx => None,
        };

        let mut dataset = Self {
            file_name,
            format,
            bytes,
            raw_csv_text,
            store: store.into(),
            date_range: None,
        };
        dataset.date_range = match dataset.historical_records() {
            Ok(records) => detect_date_range(&records),
            Err(err) => {
                warn!(file = %dataset.file_name, "could not read history locally: {}", err);
                None
            }
        };
        Ok(dataset)
    }

    pub fn from_path(path: impl AsRef<Path>, store: impl Into<String>) -> ClientResult<Self> {
        let path = path.as_ref();
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ClientError::validation("File path has no file name"))?
            .to_string();
        let bytes = std::fs::read(path)?;
        Self::from_bytes(file_name, bytes, store)
    }

    pub fn with_date_range(mut self, range: DateRange) -> Self {
        self.date_range = Some(range);
        self
    }

    /// Rows of the CSV, with the dataset store filled in where the file has none.
    /// Spreadsheets yield no rows.
    pub fn historical_records(&self) -> ClientResult<Vec<HistoricalRecord>> {
        match &self.raw_csv_text {
            Some(text) => parse_historical_csv(text, &self.store),
            None => Ok(Vec::new()),
        }
    }
}

const DATE_COLUMNS: &[&str] = &["date", "ds", "orderdate", "saledate", "salesdate"];
const SKU_COLUMNS: &[&str] = &["sku", "productid", "product"];
const ITEM_COLUMNS: &[&str] = &["itemname", "productname", "name", "product"];
const STORE_COLUMNS: &[&str] = &["store", "storename", "location"];
const UNITS_COLUMNS: &[&str] = &["unitssold", "quantity", "qty", "units", "sales"];

/// Lowercased with separators removed, so `Units Sold`, `units_sold` and `UnitsSold` agree.
fn canonical_header(header: &str) -> String {
    header
        .trim()
        .chars()
        .filter(|c| !matches!(c, ' ' | '_' | '-'))
        .flat_map(char::to_lowercase)
        .collect()
}

fn find_column(headers: &[String], aliases: &[&str]) -> Option<usize> {
    aliases
        .iter()
        .find_map(|alias| headers.iter().position(|h| h == alias))
}

/// Parses sales history out of CSV text.
///
/// A date column and a units column are required. Rows with an unreadable date
/// or no product identifier are skipped.
pub fn parse_historical_csv(text: &str, default_store: &str) -> ClientResult<Vec<HistoricalRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader.headers()?.iter().map(canonical_header).collect();
    let date_col = find_column(&headers, DATE_COLUMNS)
        .ok_or_else(|| ClientError::validation("CSV is missing a date column"))?;
    let units_col = find_column(&headers, UNITS_COLUMNS)
        .ok_or_else(|| ClientError::validation("CSV is missing a units sold column"))?;
    let sku_col = find_column(&headers, SKU_COLUMNS);
    let item_col = find_column(&headers, ITEM_COLUMNS);
    let store_col = find_column(&headers, STORE_COLUMNS);

    let mut records = Vec::new();
    let mut skipped = 0usize;
    for row in reader.records() {
        let row = row?;
        let field = |col: Option<usize>| {
            col.and_then(|c| row.get(c))
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        let Some(date) = field(Some(date_col)).and_then(parse_date) else {
            skipped += 1;
            continue;
        };
        let sku = field(sku_col).or_else(|| field(item_col));
        let Some(sku) = sku else {
            skipped += 1;
            continue;
        };
        let item_name = field(item_col).unwrap_or(sku);
        let units_sold = field(Some(units_col))
            .and_then(|v| v.replace(',', "").parse::<f64>().ok())
            .filter(|v| v.is_finite())
            .unwrap_or(0.0);

        records.push(HistoricalRecord {
            date,
            sku: sku.to_string(),
            item_name: item_name.to_string(),
            store: field(store_col).unwrap_or(default_store).to_string(),
            units_sold,
        });
    }

    if skipped > 0 {
        debug!(skipped, kept = records.len(), "skipped unreadable CSV rows");
    }
    Ok(records)
}

/// Earliest to latest date present in the records.
pub fn detect_date_range(records: &[HistoricalRecord]) -> Option<DateRange> {
    let from = records.iter().map(|r| r.date).min()?;
    let to = records.iter().map(|r| r.date).max()?;
    Some(DateRange::new(from, to))
}

/// Records inside `range` for `store` (case-insensitive).
pub fn filter_historical(
    records: &[HistoricalRecord],
    range: &DateRange,
    store: &str,
) -> Vec<HistoricalRecord> {
    records
        .iter()
        .filter(|r| range.contains(r.date) && r.store.eq_ignore_ascii_case(store.trim()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    const SAMPLE: &str = "\u{feff}Date,Product,Store,Units Sold\n\
        2025-09-01,Widget,Store A,10\n\
        2025-09-03,\"Gadget, Deluxe\",Store B,4\n\
        not-a-date,Widget,Store A,3\n\
        09/02/2025,Widget,,7\n";

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 9, day).unwrap()
    }

    #[test]
    fn format_from_extension() {
        assert_eq!(DatasetFormat::from_file_name("sales.CSV").unwrap(), DatasetFormat::Csv);
        assert_eq!(DatasetFormat::from_file_name("q3.xlsx").unwrap(), DatasetFormat::Xlsx);
        assert_matches!(
            DatasetFormat::from_file_name("notes.txt"),
            Err(ClientError::Validation(_))
        );
    }

    #[test]
    fn csv_parsing_with_aliases() {
        let dataset = UploadedDataset::from_bytes("sales.csv", SAMPLE.as_bytes().to_vec(), "Store A").unwrap();
        let records = dataset.historical_records().unwrap();

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].sku, "Widget");
        assert_eq!(records[0].item_name, "Widget");
        assert_eq!(records[1].sku, "Gadget, Deluxe");
        assert_eq!(records[1].store, "Store B");
        assert_eq!(records[2].date, d(2));
        assert_eq!(records[2].store, "Store A");
        assert_eq!(records[2].units_sold, 7.0);
        assert_eq!(dataset.date_range, Some(DateRange::new(d(1), d(3))));
    }

    #[test]
    fn missing_units_column_is_rejected() {
        let err = parse_historical_csv("date,sku\n2025-09-01,A\n", "Store A").unwrap_err();
        assert_matches!(err, ClientError::Validation(msg) if msg.contains("units"));
    }

    #[test]
    fn quantity_alias_and_separate_sku() {
        let records =
            parse_historical_csv("order_date,SKU,ItemName,qty\n2025-09-05,S-1,Lamp,\"1,200\"\n", "Main").unwrap();
        assert_eq!(records[0].sku, "S-1");
        assert_eq!(records[0].item_name, "Lamp");
        assert_eq!(records[0].units_sold, 1200.0);
        assert_eq!(records[0].store, "Main");
    }

    #[test]
    fn spreadsheet_has_no_local_history() {
        let dataset = UploadedDataset::from_bytes("q3.xlsx", vec![0x50, 0x4b, 0x03, 0x04], "Store A").unwrap();
        assert!(dataset.raw_csv_text.is_none());
        assert!(dataset.historical_records().unwrap().is_empty());
        assert_eq!(dataset.date_range, None);
    }

    #[test]
    fn empty_file_is_rejected() {
        assert_matches!(
            UploadedDataset::from_bytes("sales.csv", Vec::new(), "Store A"),
            Err(ClientError::Validation(_))
        );
    }

    #[test]
    fn filter_by_range_and_store() {
        let records = parse_historical_csv(SAMPLE.trim_start_matches('\u{feff}'), "Store A").unwrap();
        let kept = filter_historical(&records, &DateRange::new(d(1), d(2)), "store a");
        assert_eq!(kept.len(), 2);
        assert!(kept.iter().all(|r| r.store == "Store A"));
    }

    #[test]
    fn from_path_reads_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.csv");
        std::fs::write(&path, "date,sku,units_sold\n2025-09-01,A,3\n").unwrap();
        let dataset = UploadedDataset::from_path(&path, "Store A").unwrap();
        assert_eq!(dataset.file_name, "history.csv");
        assert_eq!(dataset.format, DatasetFormat::Csv);
    }
}
