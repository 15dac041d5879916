//! Test fixtures and generators shared across the Switchboard test suites.

use switchboard_core::{
    BotTextParams, CallDetails, CallDirection, CallId, CallStatus, CompletionChunk, FinishReason,
    HumanTextParams, SessionContext, SystemParams, ToolCall, CALL_CONTEXT_KEY,
};
use switchboard_llm::ScriptedProvider;

pub use proptest;

// ============================================================================
// FIXTURES
// ============================================================================

/// Human turn params; panics on empty content (tests supply real content).
pub fn human(content: &str) -> HumanTextParams {
    HumanTextParams::new(content).expect("test fixture content must be non-empty")
}

/// Delivered bot turn params.
pub fn bot(content: &str) -> BotTextParams {
    BotTextParams::new(content).expect("test fixture content must be non-empty")
}

/// System turn params.
pub fn system(content: &str) -> SystemParams {
    SystemParams::new(content).expect("test fixture content must be non-empty")
}

/// A plausible inbound call.
pub fn call_details(call_id: &CallId) -> CallDetails {
    CallDetails {
        call_id: call_id.clone(),
        direction: CallDirection::Inbound,
        from: "+15550100".to_string(),
        to: "+15550199".to_string(),
        participant_phone: "+15550100".to_string(),
        started_at: chrono::Utc::now(),
        status: CallStatus::InProgress,
    }
}

/// Seed context carrying the call-details entry, as the webhook layer
/// would provide it.
pub fn seed_context(call_id: &CallId) -> SessionContext {
    let mut seed = SessionContext::new();
    seed.insert(
        CALL_CONTEXT_KEY.to_string(),
        call_details(call_id)
            .to_structured()
            .expect("call details are structured")
            .into_inner(),
    );
    seed
}

// ============================================================================
// PROVIDER SCRIPTS
// ============================================================================

/// Chunks for a plain text exchange ending in `Stop`.
pub fn text_exchange(deltas: &[&str]) -> Vec<CompletionChunk> {
    let mut chunks: Vec<CompletionChunk> = deltas
        .iter()
        .map(|delta| CompletionChunk::TextDelta {
            delta: (*delta).to_string(),
        })
        .collect();
    chunks.push(CompletionChunk::Finished {
        reason: FinishReason::Stop,
    });
    chunks
}

/// Chunks for a tool-call exchange ending in `ToolUse`.
pub fn tool_exchange(calls: Vec<ToolCall>) -> Vec<CompletionChunk> {
    vec![
        CompletionChunk::ToolCalls { calls },
        CompletionChunk::Finished {
            reason: FinishReason::ToolUse,
        },
    ]
}

/// Provider preloaded with the given exchanges, replayed in order.
pub fn scripted_provider(exchanges: Vec<Vec<CompletionChunk>>) -> ScriptedProvider {
    let provider = ScriptedProvider::new();
    for chunks in exchanges {
        provider.push_exchange(chunks);
    }
    provider
}

// ============================================================================
// LOGGING
// ============================================================================

/// Install a test subscriber honoring `RUST_LOG`. Safe to call from every
/// test; only the first call wins.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ============================================================================
// PROPTEST STRATEGIES
// ============================================================================

pub mod strategies {
    use proptest::prelude::*;

    /// Printable utterance content.
    pub fn utterance() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9 ,.'?]{1,64}"
    }

    /// A prefix split point for interruption scenarios: picks how much of
    /// the utterance the caller heard.
    pub fn heard_prefix() -> impl Strategy<Value = (String, usize)> {
        utterance().prop_flat_map(|text| {
            let len = text.len();
            (Just(text), 0..=len)
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================
