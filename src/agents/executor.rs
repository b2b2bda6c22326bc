//! Stage 4: execute the plan against the data source and, for forecasting
//! questions, run the deterministic forecasting engine.
//!
//! This is the one stage that never touches the capability client.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::datasource::DataSource;
use crate::errors::{DataSourceError, StageFailure};
use crate::forecast::{forecast, forecast_confidence};
use crate::models::{
    ExecutionResult, ForecastOutcome, ForecastSpec, InsufficientData, Intent, IntentDomain,
    QueryPlan, SummaryStats, TimeRange, TimeSeries,
};

use super::{PipelineContext, Stage, StageOutput, StageValue, STAGE_EXECUTION};

/// Confidence reported when rows came back empty or history was too thin to
/// project: the pipeline still completes, visibly less sure of itself.
const DEGRADED_CONFIDENCE: f64 = 0.5;

/// Stockout horizon reported when a product is not selling at all.
const STOCKOUT_NEVER: f64 = 999.0;

pub struct QueryExecutor {
    source: Arc<dyn DataSource>,
    default_historical_days: u32,
    default_horizon_days: u32,
    safety_multiplier: f64,
}

impl QueryExecutor {
    pub fn new(
        source: Arc<dyn DataSource>,
        default_historical_days: u32,
        default_horizon_days: u32,
        safety_multiplier: f64,
    ) -> Self {
        Self {
            source,
            default_historical_days,
            default_horizon_days,
            safety_multiplier,
        }
    }

    async fn execute_forecast(
        &self,
        ctx: &PipelineContext,
        intent: &Intent,
        plan: &QueryPlan,
    ) -> Result<(ExecutionResult, f64), StageFailure> {
        let spec = plan.forecast.unwrap_or(ForecastSpec {
            historical_days: self.default_historical_days,
            horizon_days: self.default_horizon_days,
        });
        let shop = &ctx.question.shop_domain;

        let product = match intent.entities.get("product_name") {
            Some(name) => name.clone(),
            None => match self.first_product(shop).await? {
                Some(name) => name,
                None => return Ok(degraded_result()),
            },
        };

        let series = match self
            .source
            .fetch_series(shop, &product, spec.historical_days)
            .await
        {
            Ok(series) => series,
            Err(DataSourceError::DataUnavailable { .. }) => {
                // No history is not a failure for a forecasting question; the
                // answer degrades to an insufficient-data result.
                warn!(run_id = %ctx.run_id, product, "no history for forecast, degrading");
                return Ok(degraded_result());
            }
            Err(e) => return Err(StageFailure::from_data_source(STAGE_EXECUTION, e)),
        };

        let outcome = forecast(&series, spec.horizon_days, self.safety_multiplier);
        let confidence = match &outcome {
            ForecastOutcome::Projected(result) => forecast_confidence(result),
            ForecastOutcome::InsufficientData(_) => DEGRADED_CONFIDENCE,
        };
        let forecast_applied = matches!(outcome, ForecastOutcome::Projected(_));

        let rows: Vec<serde_json::Value> = series
            .points()
            .iter()
            .map(|p| json!({ "date": p.date, "product_name": product, "quantity": p.value }))
            .collect();
        let stats = series_stats(&series);

        Ok((
            ExecutionResult {
                rows,
                forecast: Some(outcome),
                stats,
                forecast_applied,
            },
            confidence,
        ))
    }

    async fn execute_stock_status(
        &self,
        ctx: &PipelineContext,
    ) -> Result<(ExecutionResult, f64), StageFailure> {
        let shop = &ctx.question.shop_domain;
        let levels = match self.source.fetch_stock_levels(shop).await {
            Ok(levels) => levels,
            Err(DataSourceError::DataUnavailable { .. }) => return Ok(degraded_result()),
            Err(e) => return Err(StageFailure::from_data_source(STAGE_EXECUTION, e)),
        };

        let mut rows = Vec::with_capacity(levels.len());
        let mut total_units = 0.0;
        for level in &levels {
            let velocity = self
                .product_velocity(shop, &level.product)
                .await?
                .unwrap_or(0.0);
            let days_until_stockout = if velocity > 0.0 {
                (level.units_on_hand / velocity * 10.0).round() / 10.0
            } else {
                STOCKOUT_NEVER
            };
            total_units += level.units_on_hand;
            rows.push(json!({
                "product_name": level.product,
                "inventory_quantity": level.units_on_hand,
                "daily_velocity": velocity,
                "days_until_stockout": days_until_stockout,
            }));
        }

        let confidence = if rows.is_empty() { DEGRADED_CONFIDENCE } else { 1.0 };
        let stats = SummaryStats {
            row_count: rows.len(),
            total_units,
            ..SummaryStats::default()
        };
        Ok((
            ExecutionResult {
                rows,
                forecast: None,
                stats,
                forecast_applied: false,
            },
            confidence,
        ))
    }

    async fn execute_aggregate(
        &self,
        ctx: &PipelineContext,
        intent: &Intent,
    ) -> Result<(ExecutionResult, f64), StageFailure> {
        let shop = &ctx.question.shop_domain;
        let lookback = lookback_days(intent.time_range, self.default_historical_days);

        let levels = match self.source.fetch_stock_levels(shop).await {
            Ok(levels) => levels,
            Err(DataSourceError::DataUnavailable { .. }) => return Ok(degraded_result()),
            Err(e) => return Err(StageFailure::from_data_source(STAGE_EXECUTION, e)),
        };

        let mut totals: Vec<(String, f64, f64)> = Vec::new();
        for level in &levels {
            match self.source.fetch_series(shop, &level.product, lookback).await {
                Ok(series) => {
                    let total: f64 = series.points().iter().map(|p| p.value).sum();
                    let mean = if series.is_empty() {
                        0.0
                    } else {
                        total / series.len() as f64
                    };
                    totals.push((level.product.clone(), total, mean));
                }
                Err(DataSourceError::DataUnavailable { .. }) => {
                    warn!(product = %level.product, "no sales history, skipping");
                }
                Err(e) => return Err(StageFailure::from_data_source(STAGE_EXECUTION, e)),
            }
        }

        totals.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        if intent.domain == IntentDomain::ProductRanking {
            totals.truncate(5);
        }

        let total_units: f64 = totals.iter().map(|(_, total, _)| total).sum();
        let rows: Vec<serde_json::Value> = totals
            .iter()
            .map(|(product, total, mean)| {
                json!({
                    "product_name": product,
                    "quantity": total.round(),
                    "daily_velocity": (mean * 10.0).round() / 10.0,
                })
            })
            .collect();

        let confidence = if rows.is_empty() { DEGRADED_CONFIDENCE } else { 1.0 };
        let stats = SummaryStats {
            row_count: rows.len(),
            total_units,
            ..SummaryStats::default()
        };
        Ok((
            ExecutionResult {
                rows,
                forecast: None,
                stats,
                forecast_applied: false,
            },
            confidence,
        ))
    }

    async fn execute_customer_analysis(
        &self,
        ctx: &PipelineContext,
    ) -> Result<(ExecutionResult, f64), StageFailure> {
        let shop = &ctx.question.shop_domain;
        let customers = match self.source.fetch_customers(shop).await {
            Ok(customers) => customers,
            Err(DataSourceError::DataUnavailable { .. }) => return Ok(degraded_result()),
            Err(e) => return Err(StageFailure::from_data_source(STAGE_EXECUTION, e)),
        };

        // Repeat purchasers only; one-off buyers are noise for these questions.
        let mut total_orders = 0.0;
        let rows: Vec<serde_json::Value> = customers
            .iter()
            .filter(|c| c.order_count > 1)
            .map(|c| {
                total_orders += f64::from(c.order_count);
                json!({
                    "customer_email": c.email,
                    "order_count": c.order_count,
                    "total_spent": c.total_spent,
                })
            })
            .collect();

        let confidence = if rows.is_empty() { DEGRADED_CONFIDENCE } else { 1.0 };
        let stats = SummaryStats {
            row_count: rows.len(),
            total_units: total_orders,
            ..SummaryStats::default()
        };
        Ok((
            ExecutionResult {
                rows,
                forecast: None,
                stats,
                forecast_applied: false,
            },
            confidence,
        ))
    }

    async fn first_product(&self, shop: &str) -> Result<Option<String>, StageFailure> {
        match self.source.fetch_stock_levels(shop).await {
            Ok(levels) => Ok(levels.first().map(|l| l.product.clone())),
            Err(DataSourceError::DataUnavailable { .. }) => Ok(None),
            Err(e) => Err(StageFailure::from_data_source(STAGE_EXECUTION, e)),
        }
    }

    async fn product_velocity(
        &self,
        shop: &str,
        product: &str,
    ) -> Result<Option<f64>, StageFailure> {
        match self
            .source
            .fetch_series(shop, product, self.default_historical_days)
            .await
        {
            Ok(series) => {
                let velocity = match forecast(&series, 1, self.safety_multiplier) {
                    ForecastOutcome::Projected(r) => r.daily_velocity,
                    ForecastOutcome::InsufficientData(d) => d.daily_velocity,
                };
                Ok(Some(velocity))
            }
            Err(DataSourceError::DataUnavailable { .. }) => Ok(None),
            Err(e) => Err(StageFailure::from_data_source(STAGE_EXECUTION, e)),
        }
    }
}

fn lookback_days(range: TimeRange, default: u32) -> u32 {
    match range {
        TimeRange::Last7Days => 7,
        TimeRange::Last30Days => 30,
        TimeRange::Last90Days => 90,
        // Forward-looking ranges still aggregate over the default history.
        TimeRange::Next7Days | TimeRange::Next30Days => default,
    }
}

fn series_stats(series: &TimeSeries) -> SummaryStats {
    let points = series.points();
    let total_units: f64 = points.iter().map(|p| p.value).sum();
    SummaryStats {
        row_count: points.len(),
        total_units,
        mean_daily_units: (!points.is_empty()).then(|| total_units / points.len() as f64),
        first_date: points.first().map(|p| p.date),
        last_date: points.last().map(|p| p.date),
    }
}

fn degraded_result() -> (ExecutionResult, f64) {
    (
        ExecutionResult {
            rows: Vec::new(),
            forecast: Some(ForecastOutcome::InsufficientData(InsufficientData {
                daily_velocity: 0.0,
                observations: 0,
                r_squared: 0.0,
            })),
            stats: SummaryStats::default(),
            forecast_applied: false,
        },
        DEGRADED_CONFIDENCE,
    )
}

#[async_trait]
impl Stage for QueryExecutor {
    fn name(&self) -> &'static str {
        STAGE_EXECUTION
    }

    fn llm_backed(&self) -> bool {
        false
    }

    async fn run(
        &self,
        ctx: &PipelineContext,
        _deadline: Instant,
    ) -> Result<StageOutput, StageFailure> {
        let intent = ctx.intent(STAGE_EXECUTION)?.clone();
        let plan = ctx.plan(STAGE_EXECUTION)?.clone();
        let query = ctx.query(STAGE_EXECUTION)?.clone();

        let (result, confidence) = if plan.needs_forecast {
            self.execute_forecast(ctx, &intent, &plan).await?
        } else if intent.domain == IntentDomain::InventoryStatus {
            self.execute_stock_status(ctx).await?
        } else if intent.domain == IntentDomain::CustomerAnalysis {
            self.execute_customer_analysis(ctx).await?
        } else {
            self.execute_aggregate(ctx, &intent).await?
        };

        info!(
            run_id = %ctx.run_id,
            query = %query.text,
            query_complexity = ?query.complexity,
            rows = result.stats.row_count,
            forecast_applied = result.forecast_applied,
            "query executed"
        );

        Ok(StageOutput {
            value: StageValue::Execution(result),
            confidence,
        })
    }
}
