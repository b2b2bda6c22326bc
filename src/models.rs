use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Raw user input plus routing context. Constructed at request entry by the
/// surrounding CRUD/auth layer; immutable for the lifetime of one pipeline
/// invocation. `shop_domain` and `access_token` are opaque to the pipeline and
/// only forwarded to the data source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub text: String,
    pub shop_domain: String,
    #[serde(skip_serializing)]
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_range: Option<TimeRange>,
}

impl Question {
    pub fn new(
        text: impl Into<String>,
        shop_domain: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            text: text.into(),
            shop_domain: shop_domain.into(),
            access_token: access_token.into(),
            time_range: None,
        }
    }
}

/// Analytics category a question is classified into.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IntentDomain {
    InventoryForecasting,
    InventoryStatus,
    SalesAnalysis,
    CustomerAnalysis,
    ProductRanking,
    Unknown,
}

impl IntentDomain {
    /// Parse a domain token from a capability response. Unrecognized tokens
    /// map to `Unknown`; the classifier decides what to do with those.
    pub fn parse(token: &str) -> Self {
        match token {
            "inventory_forecasting" => Self::InventoryForecasting,
            "inventory_status" => Self::InventoryStatus,
            "sales_analysis" => Self::SalesAnalysis,
            "customer_analysis" => Self::CustomerAnalysis,
            "product_ranking" => Self::ProductRanking,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InventoryForecasting => "inventory_forecasting",
            Self::InventoryStatus => "inventory_status",
            Self::SalesAnalysis => "sales_analysis",
            Self::CustomerAnalysis => "customer_analysis",
            Self::ProductRanking => "product_ranking",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TimeRange {
    #[serde(rename = "last_7_days")]
    Last7Days,
    #[serde(rename = "last_30_days")]
    Last30Days,
    #[serde(rename = "last_90_days")]
    Last90Days,
    #[serde(rename = "next_7_days")]
    Next7Days,
    #[serde(rename = "next_30_days")]
    Next30Days,
}

impl Default for TimeRange {
    fn default() -> Self {
        Self::Last30Days
    }
}

/// Stage 1 output: structured classification of the question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
    pub domain: IntentDomain,
    pub confidence: f64,
    #[serde(default)]
    pub entities: BTreeMap<String, String>,
    #[serde(default)]
    pub time_range: TimeRange,
    #[serde(default)]
    pub requires_forecast: bool,
}

/// Data sources the planner can draw on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Orders,
    Products,
    Customers,
}

/// Forecast parameters attached to a plan when forecasting is required.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForecastSpec {
    pub historical_days: u32,
    pub horizon_days: u32,
}

/// Stage 2 output: what data and aggregations the question needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryPlan {
    pub data_sources: Vec<SourceKind>,
    pub primary_metric: String,
    #[serde(default)]
    pub aggregations: Vec<String>,
    #[serde(default)]
    pub filters: BTreeMap<String, String>,
    pub needs_forecast: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forecast: Option<ForecastSpec>,
    #[serde(default)]
    pub group_by: Vec<String>,
}

/// Complexity tier assigned to a generated query during validation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum QueryComplexity {
    Low,
    Medium,
    High,
}

/// Stage 3 output: the analytics query to run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedQuery {
    pub text: String,
    pub syntax_valid: bool,
    pub complexity: QueryComplexity,
}

/// One observation in a metric's history.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SeriesPoint {
    pub date: NaiveDate,
    pub value: f64,
}

/// Chronologically ordered observations for one metric, unique dates.
/// Construction enforces the ordering invariant so the forecasting engine
/// never has to re-check it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSeries {
    pub metric: String,
    points: Vec<SeriesPoint>,
}

impl TimeSeries {
    /// Build a series from unordered points. Sorts by date and rejects
    /// duplicate dates.
    pub fn from_points(
        metric: impl Into<String>,
        mut points: Vec<SeriesPoint>,
    ) -> Result<Self, DuplicateDate> {
        points.sort_by_key(|p| p.date);
        for pair in points.windows(2) {
            if pair[0].date == pair[1].date {
                return Err(DuplicateDate(pair[0].date));
            }
        }
        Ok(Self {
            metric: metric.into(),
            points,
        })
    }

    pub fn points(&self) -> &[SeriesPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
#[error("duplicate observation date {0} in time series")]
pub struct DuplicateDate(pub NaiveDate);

/// Numeric outcome of the forecasting engine for a series with enough history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ForecastResult {
    pub slope: f64,
    pub intercept: f64,
    pub projected_total: f64,
    pub safety_stock: f64,
    pub total_recommended: f64,
    pub r_squared: f64,
    pub daily_velocity: f64,
    pub horizon_days: u32,
}

/// Degraded engine output for fewer than two observations. Still a success:
/// it carries what could be computed and never fails the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InsufficientData {
    pub daily_velocity: f64,
    pub observations: usize,
    pub r_squared: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ForecastOutcome {
    Projected(ForecastResult),
    InsufficientData(InsufficientData),
}

impl ForecastOutcome {
    pub fn projection(&self) -> Option<&ForecastResult> {
        match self {
            Self::Projected(r) => Some(r),
            Self::InsufficientData(_) => None,
        }
    }
}

/// Summary statistics computed over the returned rows.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SummaryStats {
    pub row_count: usize,
    pub total_units: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean_daily_units: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_date: Option<NaiveDate>,
}

/// Stage 4 output: raw rows plus the optional forecast computed over them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub rows: Vec<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forecast: Option<ForecastOutcome>,
    pub stats: SummaryStats,
    pub forecast_applied: bool,
}

/// Stage 5 output: the business-facing answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Insights {
    pub summary: String,
    pub key_findings: Vec<String>,
    pub recommendations: Vec<String>,
    #[serde(default)]
    pub data_summary: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineMetadata {
    pub shop_domain: String,
    pub data_points: usize,
    pub forecast_applied: bool,
}

/// Terminal outcome of one pipeline invocation. All-or-nothing: a failed run
/// surfaces no partial upstream outputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub status: PipelineStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<Intent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insights: Option<Insights>,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<PipelineMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PipelineResult {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: PipelineStatus::Failed,
            intent: None,
            query: None,
            insights: None,
            confidence: 0.0,
            metadata: None,
            error: Some(error.into()),
        }
    }
}
