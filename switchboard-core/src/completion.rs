//! Completion-contract primitive types.
//!
//! Pure data types for the streaming completion exchange. The provider and
//! dispatcher traits live in switchboard-llm.

use crate::ToolCall;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// COMPLETION CONFIG
// ============================================================================

/// Configuration for one completion exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionConfig {
    /// Provider-specific model identifier.
    pub model: String,
    /// Sampling temperature, provider default when absent.
    pub temperature: Option<f32>,
    /// Output token budget, provider default when absent.
    pub max_tokens: Option<u32>,
    /// System instructions prepended to the turn log.
    pub instructions: Option<String>,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            temperature: None,
            max_tokens: None,
            instructions: None,
        }
    }
}

// ============================================================================
// TOOL MANIFEST
// ============================================================================

/// Declaration of one tool the provider may invoke.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema describing the tool's arguments.
    pub parameters_schema: Value,
}

/// Ordered set of tools offered to the provider for one session.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolManifest {
    tools: Vec<ToolDefinition>,
}

impl ToolManifest {
    pub fn new(tools: Vec<ToolDefinition>) -> Self {
        Self { tools }
    }

    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolDefinition> {
        self.tools.iter()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

// ============================================================================
// STREAMED OUTPUT
// ============================================================================

/// Why the provider stopped emitting output for one exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// The provider finished its utterance.
    Stop,
    /// The provider wants tool results before continuing.
    ToolUse,
}

/// One increment of streamed provider output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "chunk", rename_all = "snake_case")]
pub enum CompletionChunk {
    /// A fragment of text the bot wants to say.
    TextDelta { delta: String },
    /// Touch-tone digits the bot wants to send.
    Dtmf { digits: String },
    /// A batch of tool invocations, in provider order.
    ToolCalls { calls: Vec<ToolCall> },
    /// End of this exchange.
    Finished { reason: FinishReason },
}

// ============================================================================
// TESTS
// ============================================================================
