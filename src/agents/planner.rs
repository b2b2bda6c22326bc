//! Stage 2: decide which data sources and aggregations the question needs.
//!
//! Whether forecasting runs is decided here, deterministically, from the
//! intent domain. The model proposes the rest of the plan; missing pieces are
//! filled with per-domain defaults.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::capability::{parse_structured, CapabilityClient, CapabilityPrompt};
use crate::errors::StageFailure;
use crate::models::{ForecastSpec, Intent, IntentDomain, QueryPlan, SourceKind};

use super::{check_confidence, PipelineContext, Stage, StageOutput, StageValue, STAGE_PLANNING};

const SYSTEM_PROMPT: &str = "You plan data retrieval for e-commerce analytics \
questions. Available data sources: orders (transactions with date, total, \
product, quantity), products (catalog with inventory), customers (emails, \
order counts). Respond ONLY with a JSON object: \
{\"data_sources\": [\"orders\"], \"primary_metric\": \"quantity_sold\", \
\"aggregations\": [\"sum\"], \"filters\": {\"date_range\": \"last_90_days\"}, \
\"group_by\": [\"product_name\"], \"confidence\": 0.0-1.0}";

#[derive(Debug, Deserialize)]
struct RawPlan {
    #[serde(default)]
    data_sources: Vec<String>,
    #[serde(default)]
    primary_metric: Option<String>,
    #[serde(default)]
    aggregations: Vec<String>,
    #[serde(default)]
    filters: BTreeMap<String, String>,
    #[serde(default)]
    group_by: Vec<String>,
    confidence: f64,
}

pub struct QueryPlanner {
    capability: Arc<dyn CapabilityClient>,
    default_historical_days: u32,
    default_horizon_days: u32,
}

impl QueryPlanner {
    pub fn new(
        capability: Arc<dyn CapabilityClient>,
        default_historical_days: u32,
        default_horizon_days: u32,
    ) -> Self {
        Self {
            capability,
            default_historical_days,
            default_horizon_days,
        }
    }

    fn into_plan(&self, raw: RawPlan, intent: &Intent) -> Result<(QueryPlan, f64), StageFailure> {
        let confidence = check_confidence(STAGE_PLANNING, raw.confidence)?;

        let mut data_sources: Vec<SourceKind> = raw
            .data_sources
            .iter()
            .filter_map(|token| match token.as_str() {
                "orders" => Some(SourceKind::Orders),
                "products" => Some(SourceKind::Products),
                "customers" => Some(SourceKind::Customers),
                other => {
                    warn!(source = other, "ignoring unknown data source");
                    None
                }
            })
            .collect();
        data_sources.dedup();
        if data_sources.is_empty() {
            data_sources = default_sources(intent.domain);
        }

        // Forecasting is required iff the question is an inventory forecast;
        // the model does not get a vote on this.
        let needs_forecast = intent.domain == IntentDomain::InventoryForecasting;
        let forecast = needs_forecast.then_some(ForecastSpec {
            historical_days: self.default_historical_days,
            horizon_days: self.default_horizon_days,
        });

        let plan = QueryPlan {
            data_sources,
            primary_metric: raw
                .primary_metric
                .unwrap_or_else(|| default_metric(intent.domain).to_string()),
            aggregations: if raw.aggregations.is_empty() {
                vec!["sum".to_string()]
            } else {
                raw.aggregations
            },
            filters: raw.filters,
            needs_forecast,
            forecast,
            group_by: raw.group_by,
        };
        Ok((plan, confidence))
    }
}

fn default_sources(domain: IntentDomain) -> Vec<SourceKind> {
    match domain {
        IntentDomain::InventoryForecasting => vec![SourceKind::Orders, SourceKind::Products],
        IntentDomain::InventoryStatus => vec![SourceKind::Products],
        IntentDomain::CustomerAnalysis => vec![SourceKind::Customers, SourceKind::Orders],
        _ => vec![SourceKind::Orders],
    }
}

fn default_metric(domain: IntentDomain) -> &'static str {
    match domain {
        IntentDomain::InventoryStatus => "inventory_quantity",
        IntentDomain::CustomerAnalysis => "order_count",
        _ => "quantity_sold",
    }
}

#[async_trait]
impl Stage for QueryPlanner {
    fn name(&self) -> &'static str {
        STAGE_PLANNING
    }

    async fn run(
        &self,
        ctx: &PipelineContext,
        deadline: Instant,
    ) -> Result<StageOutput, StageFailure> {
        let intent = ctx.intent(STAGE_PLANNING)?;

        let prompt = CapabilityPrompt {
            system: SYSTEM_PROMPT.to_string(),
            user: format!(
                "Question: \"{}\"\nDomain: {}\nEntities: {}\nTime range: {}",
                ctx.question.text,
                intent.domain.as_str(),
                serde_json::to_string(&intent.entities).unwrap_or_default(),
                serde_json::to_string(&intent.time_range).unwrap_or_default(),
            ),
        };

        let raw = self
            .capability
            .invoke(STAGE_PLANNING, &prompt, deadline)
            .await
            .map_err(|e| StageFailure::from_capability(STAGE_PLANNING, e))?;
        let raw: RawPlan =
            parse_structured(&raw).map_err(|e| StageFailure::from_capability(STAGE_PLANNING, e))?;

        let (plan, confidence) = self.into_plan(raw, intent)?;

        info!(
            run_id = %ctx.run_id,
            sources = ?plan.data_sources,
            needs_forecast = plan.needs_forecast,
            "query planned"
        );

        Ok(StageOutput {
            value: StageValue::Plan(plan),
            confidence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TimeRange;

    fn planner() -> QueryPlanner {
        struct Never;
        #[async_trait]
        impl CapabilityClient for Never {
            async fn invoke(
                &self,
                _stage: &str,
                _prompt: &CapabilityPrompt,
                _deadline: Instant,
            ) -> Result<String, crate::errors::CapabilityError> {
                unreachable!("not invoked")
            }
        }
        QueryPlanner::new(Arc::new(Never), 90, 30)
    }

    fn intent(domain: IntentDomain) -> Intent {
        Intent {
            domain,
            confidence: 0.9,
            entities: BTreeMap::new(),
            time_range: TimeRange::default(),
            requires_forecast: domain == IntentDomain::InventoryForecasting,
        }
    }

    fn raw_plan() -> RawPlan {
        RawPlan {
            data_sources: vec![],
            primary_metric: None,
            aggregations: vec![],
            filters: BTreeMap::new(),
            group_by: vec![],
            confidence: 0.8,
        }
    }

    #[test]
    fn forecasting_domain_always_needs_forecast() {
        let (plan, _) = planner()
            .into_plan(raw_plan(), &intent(IntentDomain::InventoryForecasting))
            .unwrap();
        assert!(plan.needs_forecast);
        let spec = plan.forecast.unwrap();
        assert_eq!(spec.historical_days, 90);
        assert_eq!(spec.horizon_days, 30);
    }

    #[test]
    fn non_forecasting_domains_never_need_forecast() {
        for domain in [
            IntentDomain::SalesAnalysis,
            IntentDomain::InventoryStatus,
            IntentDomain::CustomerAnalysis,
            IntentDomain::ProductRanking,
            IntentDomain::Unknown,
        ] {
            let (plan, _) = planner().into_plan(raw_plan(), &intent(domain)).unwrap();
            assert!(!plan.needs_forecast, "domain {domain:?}");
            assert!(plan.forecast.is_none());
        }
    }

    #[test]
    fn unknown_source_tokens_are_dropped_and_defaults_fill_in() {
        let mut raw = raw_plan();
        raw.data_sources = vec!["warehouse_teleport".to_string()];
        let (plan, _) = planner()
            .into_plan(raw, &intent(IntentDomain::CustomerAnalysis))
            .unwrap();
        assert_eq!(
            plan.data_sources,
            vec![SourceKind::Customers, SourceKind::Orders]
        );
        assert_eq!(plan.primary_metric, "order_count");
    }

    #[test]
    fn out_of_range_confidence_is_malformed() {
        let mut raw = raw_plan();
        raw.confidence = -0.2;
        let err = planner()
            .into_plan(raw, &intent(IntentDomain::SalesAnalysis))
            .unwrap_err();
        assert_eq!(err.kind, crate::errors::FailureKind::MalformedResponse);
    }
}
