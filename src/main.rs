//! Demo runner: ask one question against the synthetic data source.
//!
//! Usage: `OPENAI_API_KEY=... shopsight-demo "How many Blue T-Shirts will I
//! need next month?"`

use std::sync::Arc;
use tracing::info;

use shopsight::datasource::DataSource;
use shopsight::{
    Config, LiveDataSource, OpenAiCapability, Orchestrator, Question, SyntheticDataSource,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .with_target(false)
        .json()
        .init();

    let question_text = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "How many Blue T-Shirts will I need next month?".to_string());

    let api_key = config
        .openai_api_key
        .clone()
        .ok_or_else(|| anyhow::anyhow!("OPENAI_API_KEY is required"))?;

    let capability = Arc::new(OpenAiCapability::new(
        &api_key,
        config.model.clone(),
        config.max_concurrent_capability_calls,
    ));
    let source: Arc<dyn DataSource> = if config.demo_mode {
        info!("demo mode: using synthetic data source");
        Arc::new(SyntheticDataSource::new())
    } else {
        Arc::new(LiveDataSource::new())
    };

    let orchestrator = Orchestrator::new(config, capability, source);
    let question = Question::new(question_text, "demo.myshopify.com", "demo-token");
    let result = orchestrator.process(question).await;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
