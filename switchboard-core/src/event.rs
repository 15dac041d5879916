//! Session and completion-loop event payloads.
//!
//! Mutation events fan out from the stores to the sync publisher and the
//! loop trigger; loop events stream generated output back toward the relay.

use crate::{SessionContext, ToolCall, TurnId, TurnRecord};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event emitted by the session stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SessionEvent {
    /// A turn was appended to the log.
    TurnAdded { turn: TurnRecord },
    /// A turn was mutated; read the store for the current state.
    TurnUpdated { id: TurnId },
    /// A turn was removed; carries the removed record for mirrors that
    /// need it.
    TurnDeleted {
        id: TurnId,
        previous: Option<TurnRecord>,
    },
    /// The context changed; `changed_keys` lists exactly the diffed keys.
    ContextUpdated {
        context: SessionContext,
        previous: SessionContext,
        changed_keys: Vec<String>,
    },
    /// An out-of-band message was parked; the loop should run when idle.
    CompletionRequested,
}

impl SessionEvent {
    /// Event name for logging.
    pub fn event_type(&self) -> &'static str {
        match self {
            SessionEvent::TurnAdded { .. } => "TurnAdded",
            SessionEvent::TurnUpdated { .. } => "TurnUpdated",
            SessionEvent::TurnDeleted { .. } => "TurnDeleted",
            SessionEvent::ContextUpdated { .. } => "ContextUpdated",
            SessionEvent::CompletionRequested => "CompletionRequested",
        }
    }
}

/// Event emitted by the conscious loop during a completion run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LoopEvent {
    RunStarted,
    /// Emitted only when a run completes normally. An aborted run ends
    /// without this event; its absence is the abort signal to callers.
    RunFinished,
    /// One increment of bot speech. `full_text` is populated only on the
    /// final chunk of an utterance.
    TextChunk {
        text: String,
        last: bool,
        full_text: Option<String>,
    },
    /// Touch-tone digits the bot wants to send.
    Dtmf { digits: String },
    ToolStarting {
        turn_id: TurnId,
        call: ToolCall,
    },
    ToolFinished {
        turn_id: TurnId,
        call: ToolCall,
        result: Value,
    },
    ToolError {
        turn_id: TurnId,
        call: ToolCall,
        error: String,
    },
}

impl LoopEvent {
    /// Event name for logging.
    pub fn event_type(&self) -> &'static str {
        match self {
            LoopEvent::RunStarted => "RunStarted",
            LoopEvent::RunFinished => "RunFinished",
            LoopEvent::TextChunk { .. } => "TextChunk",
            LoopEvent::Dtmf { .. } => "Dtmf",
            LoopEvent::ToolStarting { .. } => "ToolStarting",
            LoopEvent::ToolFinished { .. } => "ToolFinished",
            LoopEvent::ToolError { .. } => "ToolError",
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{HumanTextParams, TurnMeta};

    #[test]
    fn test_session_event_names() {
        let params = HumanTextParams::new("hello").unwrap();
        let turn = TurnRecord::HumanText {
            meta: TurnMeta::new(params.id),
            content: params.content,
            redacted: false,
        };
        assert_eq!(
            SessionEvent::TurnAdded { turn }.event_type(),
            "TurnAdded"
        );
        assert_eq!(
            SessionEvent::CompletionRequested.event_type(),
            "CompletionRequested"
        );
    }

    #[test]
    fn test_loop_event_serialization_roundtrip() {
        let ev = LoopEvent::TextChunk {
            text: "I can".to_string(),
            last: false,
            full_text: None,
        };
        let json = serde_json::to_string(&ev).unwrap();
        let back: LoopEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ev);
    }
}
