//! Pipeline orchestrator: a five-state machine that carries one question from
//! intent to insights.
//!
//! Stages run strictly in order; any unrecovered stage failure transitions
//! straight to `Failed` and the caller gets a terminal result with no partial
//! upstream outputs. Failures are values throughout; nothing a stage does can
//! crash the orchestrator. Cancelling the whole pipeline is done by dropping
//! the future returned from [`Orchestrator::process`]; the in-flight stage is
//! aborted with it and no later stage runs.

use std::cmp;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::agents::{
    executor::QueryExecutor, generator::QueryGenerator, intent::IntentClassifier,
    planner::QueryPlanner, synthesizer::InsightSynthesizer, PipelineContext, Stage, StageOutput,
    StageValue,
};
use crate::capability::CapabilityClient;
use crate::config::Config;
use crate::datasource::DataSource;
use crate::errors::{FailureKind, StageFailure};
use crate::models::{
    PipelineMetadata, PipelineResult, PipelineStatus, Question,
};

/// Ordered states of one pipeline invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    IntentClassification,
    Planning,
    Generation,
    Execution,
    Synthesis,
    Completed,
    Failed,
}

impl PipelineState {
    fn next(self) -> Self {
        match self {
            Self::IntentClassification => Self::Planning,
            Self::Planning => Self::Generation,
            Self::Generation => Self::Execution,
            Self::Execution => Self::Synthesis,
            Self::Synthesis => Self::Completed,
            terminal => terminal,
        }
    }

    fn stage_index(self) -> Option<usize> {
        match self {
            Self::IntentClassification => Some(0),
            Self::Planning => Some(1),
            Self::Generation => Some(2),
            Self::Execution => Some(3),
            Self::Synthesis => Some(4),
            Self::Completed | Self::Failed => None,
        }
    }
}

/// Weighted combination of per-stage confidences: the arithmetic mean of the
/// LLM-backed stages, scaled by the execution stage's factor. The factor is
/// the forecasting engine's clamped R² when a projection was produced, and a
/// data-availability factor otherwise.
pub fn aggregate_confidence(llm_confidences: &[f64], execution_factor: Option<f64>) -> f64 {
    if llm_confidences.is_empty() {
        return 0.0;
    }
    let mean = llm_confidences.iter().sum::<f64>() / llm_confidences.len() as f64;
    (mean * execution_factor.unwrap_or(1.0)).clamp(0.0, 1.0)
}

pub struct Orchestrator {
    config: Config,
    stages: [Arc<dyn Stage>; 5],
}

impl Orchestrator {
    pub fn new(
        config: Config,
        capability: Arc<dyn CapabilityClient>,
        source: Arc<dyn DataSource>,
    ) -> Self {
        let stages: [Arc<dyn Stage>; 5] = [
            Arc::new(IntentClassifier::new(capability.clone())),
            Arc::new(QueryPlanner::new(
                capability.clone(),
                config.historical_days,
                config.forecast_days,
            )),
            Arc::new(QueryGenerator::new(capability.clone())),
            Arc::new(QueryExecutor::new(
                source,
                config.historical_days,
                config.forecast_days,
                config.safety_stock_multiplier,
            )),
            Arc::new(InsightSynthesizer::new(capability)),
        ];
        Self { config, stages }
    }

    /// Run one question through the five stages. Never returns an error: any
    /// failure becomes a terminal `PipelineResult` with `status: failed`.
    pub async fn process(&self, question: Question) -> PipelineResult {
        let overall_deadline = Instant::now() + self.config.pipeline_timeout();
        let mut ctx = PipelineContext::new(question);
        let mut state = PipelineState::IntentClassification;
        let mut llm_confidences: Vec<f64> = Vec::with_capacity(4);
        let mut execution_factor: Option<f64> = None;

        info!(
            run_id = %ctx.run_id,
            shop = %ctx.question.shop_domain,
            question = %truncate(&ctx.question.text, 100),
            "pipeline started"
        );

        while let Some(index) = state.stage_index() {
            let stage = &self.stages[index];
            let output = match self.run_stage(stage.as_ref(), &ctx, overall_deadline).await {
                Ok(output) => output,
                Err(failure) => {
                    error!(
                        run_id = %ctx.run_id,
                        stage = failure.stage,
                        kind = %failure.kind,
                        "pipeline failed"
                    );
                    return PipelineResult::failed(failure.to_string());
                }
            };

            if stage.llm_backed() {
                llm_confidences.push(output.confidence);
            } else {
                execution_factor = Some(output.confidence);
            }

            apply_output(&mut ctx, output.value);
            state = state.next();
        }

        let confidence = aggregate_confidence(&llm_confidences, execution_factor);
        let execution = ctx.execution.as_ref();
        let metadata = execution.map(|e| PipelineMetadata {
            shop_domain: ctx.question.shop_domain.clone(),
            data_points: e.stats.row_count,
            forecast_applied: e.forecast_applied,
        });

        info!(run_id = %ctx.run_id, confidence, "pipeline completed");

        PipelineResult {
            status: PipelineStatus::Completed,
            intent: ctx.intent,
            query: ctx.query.map(|q| q.text),
            insights: ctx.insights,
            confidence,
            metadata,
            error: None,
        }
    }

    /// Run one stage under its deadline, applying the retry policy:
    /// timeouts are retried with backoff for LLM-backed stages up to the
    /// configured budget, a malformed response is retried exactly once, and
    /// everything else fails immediately.
    async fn run_stage(
        &self,
        stage: &dyn Stage,
        ctx: &PipelineContext,
        overall_deadline: Instant,
    ) -> Result<StageOutput, StageFailure> {
        let stage_timeout = self.config.stage_timeout();
        let mut timeout_attempts: u32 = 0;
        let mut malformed_attempts: u32 = 0;

        loop {
            let deadline = cmp::min(Instant::now() + stage_timeout, overall_deadline);
            let result = tokio::time::timeout_at(deadline, stage.run(ctx, deadline)).await;
            let failure = match result {
                Ok(Ok(output)) => return Ok(output),
                Ok(Err(failure)) => failure,
                Err(_) => StageFailure::timeout(stage.name(), stage_timeout),
            };

            let retry = match failure.kind {
                FailureKind::Timeout => {
                    timeout_attempts += 1;
                    stage.llm_backed() && timeout_attempts <= self.config.max_retries
                }
                FailureKind::MalformedResponse => {
                    malformed_attempts += 1;
                    malformed_attempts <= 1
                }
                _ => false,
            };
            if !retry {
                return Err(failure);
            }

            warn!(
                run_id = %ctx.run_id,
                stage = failure.stage,
                kind = %failure.kind,
                attempt = timeout_attempts + malformed_attempts,
                "stage failed, retrying"
            );
            let backoff = self
                .config
                .retry_backoff()
                .saturating_mul(timeout_attempts + malformed_attempts);
            tokio::time::sleep(backoff).await;
        }
    }
}

fn apply_output(ctx: &mut PipelineContext, value: StageValue) {
    match value {
        StageValue::Intent(intent) => ctx.intent = Some(intent),
        StageValue::Plan(plan) => ctx.plan = Some(plan),
        StageValue::Query(query) => ctx.query = Some(query),
        StageValue::Execution(result) => ctx.execution = Some(result),
        StageValue::Insights(insights) => ctx.insights = Some(insights),
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
