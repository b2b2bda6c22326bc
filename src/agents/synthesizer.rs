//! Stage 5: turn rows and forecasts into a business-facing answer.
//!
//! When execution produced nothing to talk about, the stage skips the
//! capability call and answers deterministically.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::info;

use crate::capability::{parse_structured, CapabilityClient, CapabilityPrompt};
use crate::errors::StageFailure;
use crate::models::{ExecutionResult, ForecastOutcome, Insights};

use super::{check_confidence, PipelineContext, Stage, StageOutput, StageValue, STAGE_SYNTHESIS};

const SYSTEM_PROMPT: &str = "You turn e-commerce analytics data into insights \
a store owner can act on. Use everyday language: say 'you sell about 8 Blue \
T-Shirts per day', never 'daily velocity is 8.3 units'. Round numbers to be \
human-readable. Respond ONLY with a JSON object: {\"summary\": \"one clear \
sentence\", \"key_findings\": [\"...\"], \"recommendations\": [\"...\"], \
\"data_summary\": {}, \"confidence\": 0.0-1.0}";

const EMPTY_DATA_CONFIDENCE: f64 = 0.4;
const MAX_ROWS_IN_PROMPT: usize = 5;

#[derive(Debug, Deserialize)]
struct RawInsights {
    summary: String,
    #[serde(default)]
    key_findings: Vec<String>,
    #[serde(default)]
    recommendations: Vec<String>,
    #[serde(default)]
    data_summary: BTreeMap<String, serde_json::Value>,
    confidence: f64,
}

pub struct InsightSynthesizer {
    capability: Arc<dyn CapabilityClient>,
}

impl InsightSynthesizer {
    pub fn new(capability: Arc<dyn CapabilityClient>) -> Self {
        Self { capability }
    }

    fn describe_data(execution: &ExecutionResult) -> String {
        let mut lines: Vec<String> = execution
            .rows
            .iter()
            .take(MAX_ROWS_IN_PROMPT)
            .map(|row| format!("- {row}"))
            .collect();
        if execution.rows.len() > MAX_ROWS_IN_PROMPT {
            lines.push(format!(
                "... and {} more rows",
                execution.rows.len() - MAX_ROWS_IN_PROMPT
            ));
        }

        match &execution.forecast {
            Some(ForecastOutcome::Projected(f)) => lines.push(format!(
                "Forecast: {:.0} units projected over {} days, {:.0} safety stock, \
                 {:.0} total recommended, {:.1} units/day velocity",
                f.projected_total,
                f.horizon_days,
                f.safety_stock,
                f.total_recommended,
                f.daily_velocity
            )),
            Some(ForecastOutcome::InsufficientData(d)) => lines.push(format!(
                "Forecast unavailable: only {} historical observations",
                d.observations
            )),
            None => lines.push("No forecasting applied".to_string()),
        }
        lines.join("\n")
    }

    /// Deterministic answer for an execution round that found nothing.
    fn empty_data_insights(execution: &ExecutionResult) -> Insights {
        let mut data_summary = BTreeMap::new();
        data_summary.insert("total_rows".to_string(), json!(0));
        data_summary.insert("status".to_string(), json!("no_data"));
        Insights {
            summary: "No data found for this query".to_string(),
            key_findings: vec![
                "No matching data was found in your store".to_string(),
                "Try adjusting the time range or product filters".to_string(),
            ],
            recommendations: vec![
                "Check if the product name is spelled correctly".to_string(),
                "Try expanding the date range for your query".to_string(),
            ],
            data_summary: {
                data_summary.insert(
                    "forecast_applied".to_string(),
                    json!(execution.forecast_applied),
                );
                data_summary
            },
        }
    }
}

#[async_trait]
impl Stage for InsightSynthesizer {
    fn name(&self) -> &'static str {
        STAGE_SYNTHESIS
    }

    async fn run(
        &self,
        ctx: &PipelineContext,
        deadline: Instant,
    ) -> Result<StageOutput, StageFailure> {
        let intent = ctx.intent(STAGE_SYNTHESIS)?;
        let execution = ctx.execution(STAGE_SYNTHESIS)?;

        if execution.rows.is_empty() {
            info!(run_id = %ctx.run_id, "no rows to synthesize, answering deterministically");
            return Ok(StageOutput {
                value: StageValue::Insights(Self::empty_data_insights(execution)),
                confidence: EMPTY_DATA_CONFIDENCE,
            });
        }

        let prompt = CapabilityPrompt {
            system: SYSTEM_PROMPT.to_string(),
            user: format!(
                "Question: \"{}\"\nDomain: {}\nData:\n{}",
                ctx.question.text,
                intent.domain.as_str(),
                Self::describe_data(execution),
            ),
        };

        let raw = self
            .capability
            .invoke(STAGE_SYNTHESIS, &prompt, deadline)
            .await
            .map_err(|e| StageFailure::from_capability(STAGE_SYNTHESIS, e))?;
        let raw: RawInsights = parse_structured(&raw)
            .map_err(|e| StageFailure::from_capability(STAGE_SYNTHESIS, e))?;

        let confidence = check_confidence(STAGE_SYNTHESIS, raw.confidence)?;

        let mut data_summary = raw.data_summary;
        data_summary.insert("total_rows".to_string(), json!(execution.stats.row_count));

        let insights = Insights {
            summary: raw.summary,
            key_findings: raw.key_findings,
            recommendations: raw.recommendations,
            data_summary,
        };

        info!(
            run_id = %ctx.run_id,
            findings = insights.key_findings.len(),
            "insights synthesized"
        );

        Ok(StageOutput {
            value: StageValue::Insights(insights),
            confidence,
        })
    }
}
