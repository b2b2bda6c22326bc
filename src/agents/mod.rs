//! The five pipeline stages behind one uniform contract.
//!
//! Stages 1-3 and 5 delegate to the capability client; stage 4 delegates to
//! the data source and the forecasting engine and never calls the capability
//! client.

use async_trait::async_trait;
use tokio::time::Instant;
use uuid::Uuid;

use crate::errors::StageFailure;
use crate::models::{
    ExecutionResult, GeneratedQuery, Insights, Intent, QueryPlan, Question,
};

pub mod executor;
pub mod generator;
pub mod intent;
pub mod planner;
pub mod synthesizer;

pub const STAGE_INTENT: &str = "intent_classification";
pub const STAGE_PLANNING: &str = "query_planning";
pub const STAGE_GENERATION: &str = "query_generation";
pub const STAGE_EXECUTION: &str = "query_execution";
pub const STAGE_SYNTHESIS: &str = "insight_synthesis";

/// Immutable question plus every upstream output produced so far. Later
/// stages read it; only the orchestrator appends to it, one slot per stage.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub run_id: Uuid,
    pub question: Question,
    pub intent: Option<Intent>,
    pub plan: Option<QueryPlan>,
    pub query: Option<GeneratedQuery>,
    pub execution: Option<ExecutionResult>,
    pub insights: Option<Insights>,
}

impl PipelineContext {
    pub fn new(question: Question) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            question,
            intent: None,
            plan: None,
            query: None,
            execution: None,
            insights: None,
        }
    }

    pub fn intent(&self, stage: &'static str) -> Result<&Intent, StageFailure> {
        self.intent
            .as_ref()
            .ok_or_else(|| StageFailure::internal(stage, "intent missing from context"))
    }

    pub fn plan(&self, stage: &'static str) -> Result<&QueryPlan, StageFailure> {
        self.plan
            .as_ref()
            .ok_or_else(|| StageFailure::internal(stage, "plan missing from context"))
    }

    pub fn query(&self, stage: &'static str) -> Result<&GeneratedQuery, StageFailure> {
        self.query
            .as_ref()
            .ok_or_else(|| StageFailure::internal(stage, "query missing from context"))
    }

    pub fn execution(&self, stage: &'static str) -> Result<&ExecutionResult, StageFailure> {
        self.execution
            .as_ref()
            .ok_or_else(|| StageFailure::internal(stage, "execution result missing from context"))
    }
}

/// Typed output of one stage run.
#[derive(Debug, Clone)]
pub enum StageValue {
    Intent(Intent),
    Plan(QueryPlan),
    Query(GeneratedQuery),
    Execution(ExecutionResult),
    Insights(Insights),
}

#[derive(Debug, Clone)]
pub struct StageOutput {
    pub value: StageValue,
    pub confidence: f64,
}

/// Uniform stage contract. A stage either produces its typed output with a
/// confidence, or a classified failure; it never partially mutates context.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether the stage is backed by the external model. Controls the
    /// orchestrator's timeout retry policy.
    fn llm_backed(&self) -> bool {
        true
    }

    async fn run(
        &self,
        ctx: &PipelineContext,
        deadline: Instant,
    ) -> Result<StageOutput, StageFailure>;
}

/// Reject a stage confidence the model reported outside [0,1]. Out-of-range
/// confidence is malformed output, not something to silently clamp.
pub(crate) fn check_confidence(
    stage: &'static str,
    confidence: f64,
) -> Result<f64, StageFailure> {
    if (0.0..=1.0).contains(&confidence) {
        Ok(confidence)
    } else {
        Err(StageFailure::new(
            stage,
            crate::errors::FailureKind::MalformedResponse,
            format!("confidence {confidence} out of range"),
        ))
    }
}
