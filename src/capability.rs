//! Capability client: "ask the model something and get structured output
//! back". Four of the five stages go through this boundary; schema validation
//! happens here rather than ad hoc in each stage.

use async_openai::{
    types::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::error;

use crate::errors::CapabilityError;

/// A stage-specific structured prompt. Stages shape free text into this
/// before it ever reaches the client.
#[derive(Debug, Clone)]
pub struct CapabilityPrompt {
    pub system: String,
    pub user: String,
}

/// One outbound model call per invocation; no retries inside the client.
/// Retry policy belongs to the orchestrator.
#[async_trait]
pub trait CapabilityClient: Send + Sync {
    /// Invoke the external capability on behalf of `stage`, returning the raw
    /// completion text. The call must resolve before `deadline` or fail with
    /// `CapabilityError::Timeout`.
    async fn invoke(
        &self,
        stage: &str,
        prompt: &CapabilityPrompt,
        deadline: Instant,
    ) -> Result<String, CapabilityError>;
}

/// Strip markdown code fences the model sometimes wraps around JSON payloads.
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop an optional language tag on the opening fence.
    let inner = match inner.split_once('\n') {
        Some((_lang, rest)) => rest,
        None => inner,
    };
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

/// Deserialize a capability response into the stage's expected schema.
/// Anything that does not parse is a `MalformedResponse`, never raw text.
pub fn parse_structured<T: DeserializeOwned>(raw: &str) -> Result<T, CapabilityError> {
    let cleaned = strip_code_fences(raw);
    serde_json::from_str(cleaned).map_err(|e| {
        CapabilityError::MalformedResponse(format!(
            "{e} (response prefix: {:.120})",
            cleaned.replace('\n', " ")
        ))
    })
}

/// Live capability client backed by OpenAI chat completions. A semaphore
/// bounds concurrent outbound calls across all pipeline invocations to
/// respect provider rate limits.
pub struct OpenAiCapability {
    client: Client<async_openai::config::OpenAIConfig>,
    model: String,
    limiter: Arc<Semaphore>,
}

impl OpenAiCapability {
    pub fn new(api_key: &str, model: impl Into<String>, max_concurrent_calls: usize) -> Self {
        let config = async_openai::config::OpenAIConfig::new().with_api_key(api_key);
        Self {
            client: Client::with_config(config),
            model: model.into(),
            limiter: Arc::new(Semaphore::new(max_concurrent_calls)),
        }
    }

    async fn chat_completion(&self, prompt: &CapabilityPrompt) -> Result<String, CapabilityError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages([
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(prompt.system.as_str())
                    .build()
                    .map_err(|e| CapabilityError::Transport(e.to_string()))?
                    .into(),
                ChatCompletionRequestUserMessageArgs::default()
                    .content(prompt.user.as_str())
                    .build()
                    .map_err(|e| CapabilityError::Transport(e.to_string()))?
                    .into(),
            ])
            .build()
            .map_err(|e| CapabilityError::Transport(e.to_string()))?;

        let response = self.client.chat().create(request).await.map_err(|e| {
            error!(error = %e, "chat completion request failed");
            CapabilityError::Transport(e.to_string())
        })?;

        response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| {
                CapabilityError::MalformedResponse("no content in completion".to_string())
            })
    }
}

#[async_trait]
impl CapabilityClient for OpenAiCapability {
    async fn invoke(
        &self,
        stage: &str,
        prompt: &CapabilityPrompt,
        deadline: Instant,
    ) -> Result<String, CapabilityError> {
        let budget = deadline.saturating_duration_since(Instant::now());
        let call = async {
            let _permit = self
                .limiter
                .acquire()
                .await
                .map_err(|_| CapabilityError::Transport("limiter closed".to_string()))?;
            self.chat_completion(prompt).await
        };
        match tokio::time::timeout_at(deadline, call).await {
            Ok(result) => result,
            Err(_) => {
                error!(stage, "capability call exceeded its deadline");
                Err(CapabilityError::Timeout(budget))
            }
        }
    }
}
