//! Reasoning and decomposition collaborators
//!
//! Both are external services reached over the network in production; the
//! orchestrator only ever calls them through a resilience layer.

use crate::task::Task;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strata_resilience::ServiceError;

/// Message author
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Standing instructions
    System,
    /// Request content
    User,
    /// Prior model output
    Assistant,
}

/// One conversation message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Author
    pub role: Role,
    /// Text
    pub content: String,
}

impl Message {
    /// System message
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// User message
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Requested output shape
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    /// Free text
    #[default]
    Text,
    /// A single JSON document
    Json,
}

/// Request to a reasoning service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Conversation so far
    pub messages: Vec<Message>,
    /// Output budget
    pub max_output_tokens: u32,
    /// Sampling temperature
    pub temperature: f32,
    /// Output shape
    pub response_format: ResponseFormat,
}

impl CompletionRequest {
    /// Characters across all messages
    #[must_use]
    pub fn prompt_chars(&self) -> usize {
        self.messages.iter().map(|m| m.content.chars().count()).sum()
    }

    /// Rough token cost used to reserve rate-limit budget: a quarter of the
    /// prompt characters plus the whole output budget
    #[must_use]
    pub fn estimated_cost(&self) -> u64 {
        let prompt = u64::try_from(self.prompt_chars() / 4).unwrap_or(u64::MAX);
        prompt.saturating_add(u64::from(self.max_output_tokens))
    }
}

/// Why generation stopped
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural end
    #[default]
    Stop,
    /// Output budget exhausted
    Length,
    /// Provider-side filtering
    ContentFilter,
}

/// Service response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    /// Generated text
    pub text: String,
    /// Prompt tokens billed
    pub input_tokens: u64,
    /// Output tokens billed
    pub output_tokens: u64,
    /// Why generation stopped
    pub finish_reason: FinishReason,
}

impl Completion {
    /// Billed tokens in both directions
    #[inline]
    #[must_use]
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

/// Text generation service
#[async_trait]
pub trait ReasoningService: Send + Sync {
    /// Produce a completion for `request`
    ///
    /// # Errors
    /// Implementations classify failures with [`ServiceError`] kinds so the
    /// resilience layer can decide whether to retry
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, ServiceError>;
}

/// Inputs to one decomposition besides the task itself
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DecompositionContext {
    /// Tier depth of the task being decomposed
    pub depth: usize,
    /// Upper bound on returned children
    pub max_subtasks: usize,
    /// Rendered code context for the task's target, when known
    pub code_context: Option<String>,
}

/// Splits a non-leaf task into finer-tier children
#[async_trait]
pub trait Decomposer: Send + Sync {
    /// Children for `task`, given the tasks that share its parent
    ///
    /// Returned tasks must sit at a finer tier than `task`. Dependencies
    /// between returned children may use their ids.
    ///
    /// # Errors
    /// Service failures; classify unusable output as
    /// [`strata_resilience::ErrorKind::Malformed`]
    async fn decompose(
        &self,
        task: &Task,
        siblings: &[Task],
        context: &DecompositionContext,
    ) -> Result<Vec<Task>, ServiceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_estimate_quarters_prompt_and_adds_budget() {
        let request = CompletionRequest {
            messages: vec![Message::system("a".repeat(40)), Message::user("b".repeat(60))],
            max_output_tokens: 500,
            temperature: 0.0,
            response_format: ResponseFormat::Text,
        };
        assert_eq!(request.prompt_chars(), 100);
        assert_eq!(request.estimated_cost(), 525);
    }
}
