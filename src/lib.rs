//! shopsight: agentic e-commerce analytics.
//!
//! Answers free-text analytics questions through a five-stage pipeline:
//! intent classification, query planning, query generation, query execution
//! with deterministic forecasting, and insight synthesis. Four stages lean on
//! an external model through the capability client; the execution stage runs
//! numeric forecasting against the shop's historical data instead.

pub mod agents;
pub mod capability;
pub mod config;
pub mod datasource;
pub mod errors;
pub mod forecast;
pub mod models;
pub mod pipeline;
pub mod validation;

pub use capability::{CapabilityClient, CapabilityPrompt, OpenAiCapability};
pub use config::Config;
pub use datasource::{DataSource, LiveDataSource, SyntheticDataSource};
pub use errors::{CapabilityError, ConfigError, DataSourceError, FailureKind, StageFailure};
pub use models::{
    ExecutionResult, ForecastOutcome, ForecastResult, GeneratedQuery, Insights, Intent,
    IntentDomain, PipelineResult, PipelineStatus, Question, QueryPlan, TimeSeries,
};
pub use pipeline::{aggregate_confidence, Orchestrator, PipelineState};
