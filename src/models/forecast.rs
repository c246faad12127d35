use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// Model accuracy assumed when the backend does not report one.
pub const DEFAULT_ACCURACY: f64 = 0.94;

/// Inclusive date range used for filtering and for export filenames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateRange {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Self {
        Self { from, to }
    }

    /// Number of calendar days covered, counting both ends.
    pub fn days(&self) -> i64 {
        (self.to - self.from).num_days() + 1
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.from && date <= self.to
    }
}

impl std::fmt::Display for DateRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} to {}", self.from, self.to)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub date: NaiveDate,
    pub predicted_units: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
}

/// Forecast for a single product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastResult {
    pub sku: String,
    pub item_name: String,
    pub forecast_points: Vec<ForecastPoint>,
    pub accuracy: f64,
}

impl ForecastResult {
    pub fn total_predicted_units(&self) -> f64 {
        self.forecast_points.iter().map(|p| p.predicted_units).sum()
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl Default for RiskLevel {
    fn default() -> Self {
        RiskLevel::Medium
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryRecommendation {
    pub sku: String,
    pub item_name: String,
    pub current_stock: f64,
    pub recommended_stock: f64,
    pub safety_stock: f64,
    pub reorder_point: f64,
    pub risk_level: RiskLevel,
}

impl InventoryRecommendation {
    /// Units missing to reach the recommended stock level.
    pub fn shortage(&self) -> f64 {
        (self.recommended_stock - self.current_stock).max(0.0)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Low
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorityAction {
    pub sku: String,
    pub item_name: String,
    pub priority: Priority,
    pub recommended_qty: f64,
    pub revenue_risk: Decimal,
    pub roi_percent: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoiSource {
    /// Reported by the forecasting backend
    Backend,
    /// Derived locally from historical and forecast totals
    Computed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoiEstimate {
    pub current_revenue: Decimal,
    pub projected_increase: Decimal,
    pub inventory_cost_savings: Decimal,
    pub net_roi: Decimal,
    pub data_points: u64,
    pub improvement_percent: f64,
    pub stockout_reduction: f64,
    pub source: RoiSource,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForecastSummary {
    pub total_records: u64,
    pub unique_items: u64,
    pub date_range: Option<String>,
    pub total_sales: f64,
    pub average_daily_sales: f64,
    pub message: Option<String>,
}

/// A single row of uploaded sales history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalRecord {
    pub date: NaiveDate,
    pub sku: String,
    pub item_name: String,
    pub store: String,
    pub units_sold: f64,
}

/// Every derived collection for one dataset/filter combination.
/// Replaced as a whole so readers never observe a partial update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForecastBundle {
    pub forecasts: Vec<ForecastResult>,
    pub inventory: Vec<InventoryRecommendation>,
    pub priority_actions: Vec<PriorityAction>,
    pub roi: Option<RoiEstimate>,
    pub summary: Option<ForecastSummary>,
    pub historical: Vec<HistoricalRecord>,
}

impl ForecastBundle {
    pub fn is_empty(&self) -> bool {
        self.forecasts.is_empty()
            && self.inventory.is_empty()
            && self.priority_actions.is_empty()
            && self.historical.is_empty()
    }
}
