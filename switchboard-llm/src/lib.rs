//! Switchboard LLM - Completion Provider Abstraction
//!
//! Provider-agnostic traits for the streaming completion exchange and for
//! tool execution. This crate defines the interfaces that completion
//! backends must implement; the conscious loop consumes them without
//! knowing which vendor sits behind the stream.
//!
//! Scripted implementations used by tests live here as well, mirroring how
//! the provider mocks ship next to the traits they implement.

use async_trait::async_trait;
use futures_util::Stream;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use switchboard_core::{
    CompletionChunk, CompletionConfig, FinishReason, LoopError, ToolCall, ToolExecutionError,
    ToolManifest, TurnId, TurnRecord,
};
use tokio::sync::Semaphore;

// ============================================================================
// COMPLETION PROVIDER TRAIT
// ============================================================================

/// Streamed output of one completion exchange.
///
/// A mid-stream `Err` is a provider connection failure: the run consuming
/// the stream fails and the loop returns to idle.
pub type CompletionStream = Pin<Box<dyn Stream<Item = Result<CompletionChunk, LoopError>> + Send>>;

/// Trait for completion backends.
/// Implementations must be thread-safe (Send + Sync).
///
/// One call to [`complete`](CompletionProvider::complete) corresponds to one
/// exchange: the provider receives the full turn log, the tool manifest, and
/// the session configuration, and streams back text increments, DTMF
/// requests, and tool-call requests until it emits a `Finished` chunk.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Open one completion exchange.
    ///
    /// # Arguments
    /// * `turns` - Snapshot of the conversation log, oldest first
    /// * `manifest` - Tools the provider may request
    /// * `config` - Model and sampling configuration
    ///
    /// # Returns
    /// * `Ok(CompletionStream)` - The chunk stream for this exchange
    /// * `Err(LoopError::ProviderConnection)` - If the exchange could not be opened
    async fn complete(
        &self,
        turns: Vec<TurnRecord>,
        manifest: &ToolManifest,
        config: &CompletionConfig,
    ) -> Result<CompletionStream, LoopError>;
}

// ============================================================================
// TOOL DISPATCHER TRAIT
// ============================================================================

/// Trait for executing tool calls requested by the provider.
///
/// `on_tool_error` is the explicit continue/abandon decision point: when a
/// tool fails, its return value decides whether the remaining calls of the
/// same batch still run (`true`) or the rest of the run is abandoned
/// (`false`).
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    /// Execute one tool call and return its JSON result.
    async fn execute(&self, turn_id: TurnId, call: &ToolCall)
        -> Result<Value, ToolExecutionError>;

    /// Decide whether the run continues after a tool failure.
    /// Defaults to continuing with the remaining calls.
    fn on_tool_error(&self, turn_id: TurnId, call: &ToolCall, error: &ToolExecutionError) -> bool {
        let _ = (turn_id, call, error);
        true
    }
}

/// Dispatcher for sessions with no tools configured. Every call fails.
#[derive(Debug, Default)]
pub struct NoopDispatcher;

#[async_trait]
impl ToolDispatcher for NoopDispatcher {
    async fn execute(
        &self,
        _turn_id: TurnId,
        call: &ToolCall,
    ) -> Result<Value, ToolExecutionError> {
        Err(ToolExecutionError {
            function: call.function_name.clone(),
            reason: "no tool dispatcher configured".to_string(),
        })
    }
}

// ============================================================================
// STREAM GATE
// ============================================================================

/// Hand-cranked release valve for scripted streams.
///
/// Tests that need to interleave an abort between two chunks hold the gate
/// and release exactly as many chunks as the scenario calls for.
#[derive(Debug)]
pub struct StreamGate {
    permits: Semaphore,
}

impl StreamGate {
    fn new() -> Self {
        Self {
            permits: Semaphore::new(0),
        }
    }

    /// Allow `n` further chunks through the gated stream.
    pub fn release(&self, n: usize) {
        self.permits.add_permits(n);
    }

    async fn pass(&self) {
        // The semaphore is never closed while a stream holds the gate.
        if let Ok(permit) = self.permits.acquire().await {
            permit.forget();
        }
    }
}

// ============================================================================
// SCRIPTED PROVIDER
// ============================================================================

/// Scripted completion provider for tests.
///
/// Each pushed exchange is replayed chunk by chunk on one `complete` call.
/// When the script runs out the provider answers with an immediate
/// `Finished(Stop)`.
pub struct ScriptedProvider {
    exchanges: Mutex<VecDeque<Vec<Result<CompletionChunk, LoopError>>>>,
    fail_connect: Mutex<Option<String>>,
    gate: Option<Arc<StreamGate>>,
    calls: AtomicUsize,
    last_turns: Mutex<Vec<TurnRecord>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            exchanges: Mutex::new(VecDeque::new()),
            fail_connect: Mutex::new(None),
            gate: None,
            calls: AtomicUsize::new(0),
            last_turns: Mutex::new(Vec::new()),
        }
    }

    /// Create a provider whose streams only advance when the returned gate
    /// is released.
    pub fn gated() -> (Self, Arc<StreamGate>) {
        let gate = Arc::new(StreamGate::new());
        let provider = Self {
            exchanges: Mutex::new(VecDeque::new()),
            fail_connect: Mutex::new(None),
            gate: Some(Arc::clone(&gate)),
            calls: AtomicUsize::new(0),
            last_turns: Mutex::new(Vec::new()),
        };
        (provider, gate)
    }

    /// Queue one exchange worth of chunks.
    pub fn push_exchange(&self, chunks: Vec<CompletionChunk>) {
        self.exchanges
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push_back(chunks.into_iter().map(Ok).collect());
    }

    /// Queue an exchange that yields `chunks` and then fails mid-stream.
    pub fn push_failing_exchange(&self, chunks: Vec<CompletionChunk>, error: LoopError) {
        let mut steps: Vec<Result<CompletionChunk, LoopError>> =
            chunks.into_iter().map(Ok).collect();
        steps.push(Err(error));
        self.exchanges.lock().unwrap_or_else(|p| p.into_inner()).push_back(steps);
    }

    /// Make the next `complete` call fail before any chunk is produced.
    pub fn fail_next_connect(&self, reason: impl Into<String>) {
        *self.fail_connect.lock().unwrap_or_else(|p| p.into_inner()) = Some(reason.into());
    }

    /// Number of exchanges opened so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Turn snapshot captured by the most recent exchange.
    pub fn last_turns(&self) -> Vec<TurnRecord> {
        self.last_turns.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    async fn complete(
        &self,
        turns: Vec<TurnRecord>,
        _manifest: &ToolManifest,
        _config: &CompletionConfig,
    ) -> Result<CompletionStream, LoopError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_turns.lock().unwrap_or_else(|p| p.into_inner()) = turns;

        if let Some(reason) = self.fail_connect.lock().unwrap_or_else(|p| p.into_inner()).take() {
            return Err(LoopError::ProviderConnection { reason });
        }

        let steps = self
            .exchanges
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop_front()
            .unwrap_or_else(|| {
                vec![Ok(CompletionChunk::Finished {
                    reason: FinishReason::Stop,
                })]
            });
        let gate = self.gate.clone();

        let stream = async_stream::stream! {
            for step in steps {
                if let Some(gate) = &gate {
                    gate.pass().await;
                }
                yield step;
            }
        };

        Ok(Box::pin(stream))
    }
}

// ============================================================================
// SCRIPTED DISPATCHER
// ============================================================================

/// Scripted tool dispatcher for tests.
///
/// Outcomes are stubbed per function name; executed calls are recorded for
/// assertions. Unstubbed functions fail.
pub struct ScriptedDispatcher {
    outcomes: Mutex<HashMap<String, Result<Value, String>>>,
    continue_on_error: bool,
    executed: Mutex<Vec<ToolCall>>,
}

impl ScriptedDispatcher {
    /// Dispatcher that keeps processing remaining calls after a failure.
    pub fn new() -> Self {
        Self {
            outcomes: Mutex::new(HashMap::new()),
            continue_on_error: true,
            executed: Mutex::new(Vec::new()),
        }
    }

    /// Dispatcher that abandons the rest of the run on the first failure.
    pub fn abort_on_error() -> Self {
        Self {
            continue_on_error: false,
            ..Self::new()
        }
    }

    /// Stub the outcome of one function.
    pub fn stub(&self, function: &str, outcome: Result<Value, &str>) {
        self.outcomes
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(function.to_string(), outcome.map_err(|e| e.to_string()));
    }

    /// Calls executed so far, in dispatch order.
    pub fn executed(&self) -> Vec<ToolCall> {
        self.executed.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

impl Default for ScriptedDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolDispatcher for ScriptedDispatcher {
    async fn execute(
        &self,
        _turn_id: TurnId,
        call: &ToolCall,
    ) -> Result<Value, ToolExecutionError> {
        self.executed.lock().unwrap_or_else(|p| p.into_inner()).push(call.clone());

        match self
            .outcomes
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(&call.function_name)
        {
            Some(Ok(value)) => Ok(value.clone()),
            Some(Err(reason)) => Err(ToolExecutionError {
                function: call.function_name.clone(),
                reason: reason.clone(),
            }),
            None => Err(ToolExecutionError {
                function: call.function_name.clone(),
                reason: "function not stubbed".to_string(),
            }),
        }
    }

    fn on_tool_error(
        &self,
        _turn_id: TurnId,
        _call: &ToolCall,
        _error: &ToolExecutionError,
    ) -> bool {
        self.continue_on_error
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================
