//! Conversation turn entities.
//!
//! A turn is one utterance or event in the conversation: human speech, bot
//! speech, a bot tool invocation, or a system note. Turns are versioned;
//! every mutation bumps the version so downstream mirrors can coalesce.

use crate::{new_turn_id, Timestamp, TurnId, ValidationError};
use chrono::Utc;
use serde::{Deserialize, Serialize};

// ============================================================================
// TURN METADATA
// ============================================================================

/// Fields shared by every turn variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnMeta {
    /// Unique turn id (caller- or store-assigned).
    pub id: TurnId,
    /// Monotonic version, incremented on every mutation. Never reused.
    pub version: u32,
    /// When the turn was appended to the log.
    pub created_at: Timestamp,
}

impl TurnMeta {
    /// Create metadata for a freshly added turn (version 0).
    pub fn new(id: Option<TurnId>) -> Self {
        Self {
            id: id.unwrap_or_else(new_turn_id),
            version: 0,
            created_at: Utc::now(),
        }
    }
}

/// Delivery state of an outbound (bot) text turn.
///
/// Distinguishes an utterance still being streamed to the caller from one
/// that finished or was cut short by an interruption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Tokens are still being streamed to the caller.
    Streaming,
    /// The full utterance was delivered.
    Complete,
    /// The caller interrupted before delivery finished.
    Interrupted,
}

/// Role of a turn in the conversation, used for completion-provider framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    Human,
    Bot,
    System,
}

// ============================================================================
// TOOL CALLS
// ============================================================================

/// Result of executing one tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ToolOutcome {
    Success { result: serde_json::Value },
    Error { message: String },
}

/// One tool invocation requested by the completion provider.
///
/// The `index` preserves the provider's emission order inside a single
/// `BotTool` turn; `result` is filled in once the tool has executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub function_name: String,
    /// Raw JSON-encoded arguments exactly as the provider produced them.
    pub arguments_json: String,
    pub index: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ToolOutcome>,
}

impl ToolCall {
    pub fn new(
        id: impl Into<String>,
        function_name: impl Into<String>,
        arguments_json: impl Into<String>,
        index: i32,
    ) -> Self {
        Self {
            id: id.into(),
            function_name: function_name.into(),
            arguments_json: arguments_json.into(),
            index,
            result: None,
        }
    }
}

// ============================================================================
// TURN RECORD
// ============================================================================

/// One entry in the conversation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TurnRecord {
    /// Final speech heard from the caller.
    HumanText {
        meta: TurnMeta,
        content: String,
        redacted: bool,
    },
    /// Speech produced by the bot, possibly still streaming.
    BotText {
        meta: TurnMeta,
        content: String,
        redacted: bool,
        status: DeliveryStatus,
    },
    /// A batch of tool invocations requested by the bot.
    BotTool {
        meta: TurnMeta,
        tool_calls: Vec<ToolCall>,
    },
    /// Out-of-band guidance injected into the conversation.
    System { meta: TurnMeta, content: String },
}

impl TurnRecord {
    pub fn meta(&self) -> &TurnMeta {
        match self {
            TurnRecord::HumanText { meta, .. }
            | TurnRecord::BotText { meta, .. }
            | TurnRecord::BotTool { meta, .. }
            | TurnRecord::System { meta, .. } => meta,
        }
    }

    pub fn meta_mut(&mut self) -> &mut TurnMeta {
        match self {
            TurnRecord::HumanText { meta, .. }
            | TurnRecord::BotText { meta, .. }
            | TurnRecord::BotTool { meta, .. }
            | TurnRecord::System { meta, .. } => meta,
        }
    }

    pub fn id(&self) -> TurnId {
        self.meta().id
    }

    pub fn version(&self) -> u32 {
        self.meta().version
    }

    pub fn role(&self) -> TurnRole {
        match self {
            TurnRecord::HumanText { .. } => TurnRole::Human,
            TurnRecord::BotText { .. } | TurnRecord::BotTool { .. } => TurnRole::Bot,
            TurnRecord::System { .. } => TurnRole::System,
        }
    }

    /// Text content for variants that carry it.
    pub fn content(&self) -> Option<&str> {
        match self {
            TurnRecord::HumanText { content, .. }
            | TurnRecord::BotText { content, .. }
            | TurnRecord::System { content, .. } => Some(content),
            TurnRecord::BotTool { .. } => None,
        }
    }

    /// Whether this is a bot text turn still being delivered to the caller.
    pub fn is_streaming_bot_text(&self) -> bool {
        matches!(
            self,
            TurnRecord::BotText {
                status: DeliveryStatus::Streaming,
                ..
            }
        )
    }

    /// Variant name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            TurnRecord::HumanText { .. } => "human_text",
            TurnRecord::BotText { .. } => "bot_text",
            TurnRecord::BotTool { .. } => "bot_tool",
            TurnRecord::System { .. } => "system",
        }
    }
}

// ============================================================================
// MUTATION PATCH
// ============================================================================

/// A single-field mutation applied through `TurnStore::update`.
///
/// Every mutation goes through an explicit patch so version bumps and
/// update notifications have exactly one code path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "field", rename_all = "snake_case")]
pub enum TurnPatch {
    /// Replace the text content of a text-bearing turn.
    Content { content: String },
    /// Set the redaction flag of a human or bot text turn.
    Redacted { redacted: bool },
    /// Set the delivery status of a bot text turn.
    Status { status: DeliveryStatus },
    /// Record the outcome of one tool call on a bot tool turn.
    ToolResult {
        call_id: String,
        outcome: ToolOutcome,
    },
}

// ============================================================================
// CONSTRUCTION PARAMS
// ============================================================================

/// Parameters for adding a human text turn.
///
/// Construction validates required content so malformed input is rejected
/// before it reaches the store.
#[derive(Debug, Clone, PartialEq)]
pub struct HumanTextParams {
    pub id: Option<TurnId>,
    pub content: String,
}

impl HumanTextParams {
    pub fn new(content: impl Into<String>) -> Result<Self, ValidationError> {
        let content = content.into();
        if content.is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "content".to_string(),
            });
        }
        Ok(Self { id: None, content })
    }

    pub fn with_id(mut self, id: TurnId) -> Self {
        self.id = Some(id);
        self
    }
}

/// Parameters for adding a bot text turn.
#[derive(Debug, Clone, PartialEq)]
pub struct BotTextParams {
    pub id: Option<TurnId>,
    pub content: String,
    pub status: DeliveryStatus,
}

impl BotTextParams {
    /// A fully delivered utterance (e.g. a pre-scripted greeting).
    pub fn new(content: impl Into<String>) -> Result<Self, ValidationError> {
        let content = content.into();
        if content.is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "content".to_string(),
            });
        }
        Ok(Self {
            id: None,
            content,
            status: DeliveryStatus::Complete,
        })
    }

    /// An utterance that is about to be streamed token by token.
    pub fn streaming(first_delta: impl Into<String>) -> Self {
        Self {
            id: None,
            content: first_delta.into(),
            status: DeliveryStatus::Streaming,
        }
    }

    pub fn with_id(mut self, id: TurnId) -> Self {
        self.id = Some(id);
        self
    }
}

/// Parameters for adding a system turn.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemParams {
    pub id: Option<TurnId>,
    pub content: String,
}

impl SystemParams {
    pub fn new(content: impl Into<String>) -> Result<Self, ValidationError> {
        let content = content.into();
        if content.is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "content".to_string(),
            });
        }
        Ok(Self { id: None, content })
    }

    pub fn with_id(mut self, id: TurnId) -> Self {
        self.id = Some(id);
        self
    }
}

/// Parameters for adding a bot tool turn.
#[derive(Debug, Clone, PartialEq)]
pub struct BotToolParams {
    pub id: Option<TurnId>,
    pub tool_calls: Vec<ToolCall>,
}

impl BotToolParams {
    pub fn new(tool_calls: Vec<ToolCall>) -> Result<Self, ValidationError> {
        if tool_calls.is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "tool_calls".to_string(),
            });
        }
        Ok(Self {
            id: None,
            tool_calls,
        })
    }

    pub fn with_id(mut self, id: TurnId) -> Self {
        self.id = Some(id);
        self
    }
}

// ============================================================================
// TESTS
// ============================================================================


// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================
