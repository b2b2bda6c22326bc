//! Stage 3: generate the analytics query.
//!
//! The model writes the query text; this stage cleans it and runs it through
//! syntax/safety validation. A query that fails validation is a
//! `ValidationFailure` and is never retried against the same input.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::info;

use crate::capability::{parse_structured, CapabilityClient, CapabilityPrompt};
use crate::errors::{FailureKind, StageFailure};
use crate::validation::{clean_query, validate_query};

use super::{check_confidence, PipelineContext, Stage, StageOutput, StageValue, STAGE_GENERATION};

const SYSTEM_PROMPT: &str = "You write ShopifyQL analytics queries. Syntax \
examples: 'FROM orders SHOW total_sales, order_count BY month WHERE \
created_at >= \\'2024-01-01\\'' or 'FROM orders SHOW product_name, \
SUM(quantity) AS total_quantity GROUP BY product_name ORDER BY \
total_quantity DESC LIMIT 5'. Fields: orders(created_at, order_id, \
total_price, product_name, quantity, customer_email), products(product_id, \
product_name, inventory_quantity, price, sku), customers(customer_id, \
customer_email, total_spent, order_count). Queries are read-only. Respond \
ONLY with a JSON object: {\"query\": \"FROM ...\", \"confidence\": 0.0-1.0}";

#[derive(Debug, Deserialize)]
struct RawQuery {
    query: String,
    confidence: f64,
}

pub struct QueryGenerator {
    capability: Arc<dyn CapabilityClient>,
}

impl QueryGenerator {
    pub fn new(capability: Arc<dyn CapabilityClient>) -> Self {
        Self { capability }
    }
}

#[async_trait]
impl Stage for QueryGenerator {
    fn name(&self) -> &'static str {
        STAGE_GENERATION
    }

    async fn run(
        &self,
        ctx: &PipelineContext,
        deadline: Instant,
    ) -> Result<StageOutput, StageFailure> {
        let intent = ctx.intent(STAGE_GENERATION)?;
        let plan = ctx.plan(STAGE_GENERATION)?;

        let prompt = CapabilityPrompt {
            system: SYSTEM_PROMPT.to_string(),
            user: format!(
                "Question: \"{}\"\nDomain: {}\nPlan: {}",
                ctx.question.text,
                intent.domain.as_str(),
                serde_json::to_string(plan).unwrap_or_default(),
            ),
        };

        let raw = self
            .capability
            .invoke(STAGE_GENERATION, &prompt, deadline)
            .await
            .map_err(|e| StageFailure::from_capability(STAGE_GENERATION, e))?;
        let raw: RawQuery = parse_structured(&raw)
            .map_err(|e| StageFailure::from_capability(STAGE_GENERATION, e))?;

        let confidence = check_confidence(STAGE_GENERATION, raw.confidence)?;

        let cleaned = clean_query(&raw.query);
        let query = validate_query(&cleaned)
            .map_err(|reason| StageFailure::new(STAGE_GENERATION, FailureKind::ValidationFailure, reason))?;

        info!(
            run_id = %ctx.run_id,
            complexity = ?query.complexity,
            "query generated"
        );

        Ok(StageOutput {
            value: StageValue::Query(query),
            confidence,
        })
    }
}
