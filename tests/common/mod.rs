//! Shared stubs for pipeline tests: a scripted capability client that records
//! every invocation, and a fixed data source with hand-built history.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use shopsight::capability::{CapabilityClient, CapabilityPrompt};
use shopsight::datasource::{CustomerRecord, DataSource, StockLevel};
use shopsight::errors::{CapabilityError, DataSourceError};
use shopsight::models::{SeriesPoint, TimeSeries};

/// One scripted turn for a stage.
pub enum Script {
    Reply(String),
    /// Never answers; the stage deadline fires first.
    Hang,
    /// Honors the deadline the way a real client does: burns part of the
    /// budget, then reports a client-side timeout before the deadline.
    ReportTimeout,
}

/// Capability stub that replays per-stage scripts in order and records the
/// sequence of stages that invoked it.
pub struct ScriptedCapability {
    scripts: Mutex<HashMap<String, VecDeque<Script>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedCapability {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn script(self, stage: &str, turn: Script) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(stage.to_string())
            .or_default()
            .push_back(turn);
        self
    }

    pub fn reply(self, stage: &str, body: serde_json::Value) -> Self {
        self.script(stage, Script::Reply(body.to_string()))
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, stage: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|s| *s == stage).count()
    }
}

#[async_trait]
impl CapabilityClient for ScriptedCapability {
    async fn invoke(
        &self,
        stage: &str,
        _prompt: &CapabilityPrompt,
        deadline: Instant,
    ) -> Result<String, CapabilityError> {
        self.calls.lock().unwrap().push(stage.to_string());
        let turn = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(stage)
            .and_then(|queue| queue.pop_front());
        match turn {
            Some(Script::Reply(body)) => Ok(body),
            Some(Script::Hang) => {
                tokio::time::sleep(Duration::from_secs(86_400)).await;
                Err(CapabilityError::Transport("unreachable".to_string()))
            }
            Some(Script::ReportTimeout) => {
                let budget = deadline.saturating_duration_since(Instant::now());
                tokio::time::sleep(budget / 2).await;
                Err(CapabilityError::Timeout(budget))
            }
            None => Err(CapabilityError::Transport(format!(
                "no script left for stage {stage}"
            ))),
        }
    }
}

/// Deterministic data source: one product with a fixed constant-demand
/// history, so forecast numbers are exactly reproducible.
pub struct FixedDataSource {
    pub product: String,
    pub daily_value: f64,
    pub days: u32,
}

impl FixedDataSource {
    pub fn new(product: &str, daily_value: f64, days: u32) -> Self {
        Self {
            product: product.to_string(),
            daily_value,
            days,
        }
    }
}

#[async_trait]
impl DataSource for FixedDataSource {
    async fn fetch_series(
        &self,
        shop: &str,
        metric: &str,
        lookback_days: u32,
    ) -> Result<TimeSeries, DataSourceError> {
        if metric != self.product {
            return Err(DataSourceError::DataUnavailable {
                shop: shop.to_string(),
                metric: metric.to_string(),
            });
        }
        let start = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let days = lookback_days.min(self.days);
        let points = (0..days)
            .map(|i| SeriesPoint {
                date: start + chrono::Days::new(u64::from(i)),
                value: self.daily_value,
            })
            .collect();
        TimeSeries::from_points(metric, points)
            .map_err(|e| DataSourceError::Transport(e.to_string()))
    }

    async fn fetch_stock_levels(&self, _shop: &str) -> Result<Vec<StockLevel>, DataSourceError> {
        Ok(vec![StockLevel {
            product: self.product.clone(),
            units_on_hand: 100.0,
        }])
    }

    async fn fetch_customers(&self, _shop: &str) -> Result<Vec<CustomerRecord>, DataSourceError> {
        Ok(vec![
            CustomerRecord {
                email: "repeat.buyer@example.com".to_string(),
                order_count: 4,
                total_spent: 320.0,
            },
            CustomerRecord {
                email: "one.timer@example.com".to_string(),
                order_count: 1,
                total_spent: 40.0,
            },
        ])
    }
}

/// Canned stage replies for happy-path scripts.
pub fn intent_reply(domain: &str, confidence: f64, product: Option<&str>) -> serde_json::Value {
    let mut entities = serde_json::Map::new();
    if let Some(p) = product {
        entities.insert("product_name".to_string(), json!(p));
    }
    json!({
        "domain": domain,
        "confidence": confidence,
        "entities": entities,
        "time_range": "last_30_days",
        "requires_forecast": domain == "inventory_forecasting",
    })
}

pub fn plan_reply(confidence: f64) -> serde_json::Value {
    json!({
        "data_sources": ["orders", "products"],
        "primary_metric": "quantity_sold",
        "aggregations": ["sum", "daily_average"],
        "filters": {"date_range": "last_90_days"},
        "group_by": ["product_name"],
        "confidence": confidence,
    })
}

pub fn query_reply(confidence: f64) -> serde_json::Value {
    json!({
        "query": "FROM orders SHOW product_name, SUM(quantity) AS total_quantity \
                  GROUP BY product_name ORDER BY total_quantity DESC",
        "confidence": confidence,
    })
}

pub fn insights_reply(confidence: f64) -> serde_json::Value {
    json!({
        "summary": "You sell about 8 Blue T-Shirts per day",
        "key_findings": ["Demand is steady", "Stock covers under a week"],
        "recommendations": ["Order roughly 290 units for next month"],
        "data_summary": {"key_metric": "units sold"},
        "confidence": confidence,
    })
}
