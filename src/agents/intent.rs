//! Stage 1: classify the question into a structured intent.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::capability::{parse_structured, CapabilityClient, CapabilityPrompt};
use crate::errors::StageFailure;
use crate::models::{Intent, IntentDomain, TimeRange};

use super::{check_confidence, PipelineContext, Stage, StageOutput, StageValue, STAGE_INTENT};

const SYSTEM_PROMPT: &str = "You classify e-commerce analytics questions. \
Domains: inventory_forecasting (future inventory needs, reorder quantities), \
inventory_status (current stock levels, availability), \
sales_analysis (sales performance, revenue), \
customer_analysis (customer behavior, repeat purchases), \
product_ranking (top/bottom products, comparisons). \
Respond ONLY with a JSON object: \
{\"domain\": \"...\", \"confidence\": 0.0-1.0, \
\"entities\": {\"product_name\": \"...\", \"time_period\": \"...\"}, \
\"time_range\": \"last_7_days|last_30_days|last_90_days|next_7_days|next_30_days\", \
\"requires_forecast\": true|false}";

/// Shape the capability response must take.
#[derive(Debug, Deserialize)]
struct RawIntent {
    domain: String,
    confidence: f64,
    #[serde(default)]
    entities: BTreeMap<String, String>,
    #[serde(default)]
    time_range: Option<String>,
    #[serde(default)]
    requires_forecast: Option<bool>,
}

pub struct IntentClassifier {
    capability: Arc<dyn CapabilityClient>,
}

impl IntentClassifier {
    pub fn new(capability: Arc<dyn CapabilityClient>) -> Self {
        Self { capability }
    }

    fn into_intent(&self, raw: RawIntent) -> Result<Intent, StageFailure> {
        let confidence = check_confidence(STAGE_INTENT, raw.confidence)?;

        let domain = match IntentDomain::parse(&raw.domain) {
            IntentDomain::Unknown if raw.domain != "unknown" => {
                // Out-of-vocabulary domain from the model: fall back to the
                // broadest analysis domain rather than failing the run.
                warn!(domain = %raw.domain, "unrecognized intent domain, using sales_analysis");
                IntentDomain::SalesAnalysis
            }
            domain => domain,
        };

        let time_range = match raw.time_range.as_deref() {
            None => TimeRange::default(),
            Some(token) => parse_time_range(token).unwrap_or_else(|| {
                warn!(token, "unrecognized time range, using default");
                TimeRange::default()
            }),
        };

        Ok(Intent {
            domain,
            confidence,
            entities: raw.entities,
            time_range,
            requires_forecast: raw
                .requires_forecast
                .unwrap_or(domain == IntentDomain::InventoryForecasting),
        })
    }
}

fn parse_time_range(token: &str) -> Option<TimeRange> {
    match token {
        "last_7_days" => Some(TimeRange::Last7Days),
        "last_30_days" => Some(TimeRange::Last30Days),
        "last_90_days" => Some(TimeRange::Last90Days),
        "next_7_days" => Some(TimeRange::Next7Days),
        "next_30_days" => Some(TimeRange::Next30Days),
        _ => None,
    }
}

#[async_trait]
impl Stage for IntentClassifier {
    fn name(&self) -> &'static str {
        STAGE_INTENT
    }

    async fn run(
        &self,
        ctx: &PipelineContext,
        deadline: Instant,
    ) -> Result<StageOutput, StageFailure> {
        let prompt = CapabilityPrompt {
            system: SYSTEM_PROMPT.to_string(),
            user: format!("Question: \"{}\"", ctx.question.text),
        };

        let raw = self
            .capability
            .invoke(STAGE_INTENT, &prompt, deadline)
            .await
            .map_err(|e| StageFailure::from_capability(STAGE_INTENT, e))?;

        let raw: RawIntent =
            parse_structured(&raw).map_err(|e| StageFailure::from_capability(STAGE_INTENT, e))?;
        let intent = self.into_intent(raw)?;

        info!(
            run_id = %ctx.run_id,
            domain = intent.domain.as_str(),
            confidence = intent.confidence,
            "intent classified"
        );

        let confidence = intent.confidence;
        Ok(StageOutput {
            value: StageValue::Intent(intent),
            confidence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::FailureKind;

    fn classifier() -> IntentClassifier {
        // The capability client is unused by these conversion tests.
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
        IntentClassifier::new(Arc::new(Never))
    }

    fn raw(domain: &str, confidence: f64) -> RawIntent {
        RawIntent {
            domain: domain.to_string(),
            confidence,
            entities: BTreeMap::new(),
            time_range: None,
            requires_forecast: None,
        }
    }

    #[test]
    fn forecasting_domain_defaults_to_requiring_forecast() {
        let intent = classifier()
            .into_intent(raw("inventory_forecasting", 0.9))
            .unwrap();
        assert_eq!(intent.domain, IntentDomain::InventoryForecasting);
        assert!(intent.requires_forecast);
    }

    #[test]
    fn out_of_vocabulary_domain_falls_back_to_sales_analysis() {
        let intent = classifier().into_intent(raw("weather_report", 0.8)).unwrap();
        assert_eq!(intent.domain, IntentDomain::SalesAnalysis);
        assert!(!intent.requires_forecast);
    }

    #[test]
    fn out_of_range_confidence_is_malformed() {
        let err = classifier()
            .into_intent(raw("sales_analysis", 1.4))
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::MalformedResponse);
        assert_eq!(err.stage, STAGE_INTENT);
    }

    #[test]
    fn unknown_time_range_token_uses_default() {
        let mut r = raw("sales_analysis", 0.7);
        r.time_range = Some("fortnight".to_string());
        let intent = classifier().into_intent(r).unwrap();
        assert_eq!(intent.time_range, TimeRange::Last30Days);
    }
}
