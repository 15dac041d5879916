//! Conscious loop: one completion run per triggering event.
//!
//! The loop drives a single exchange with the completion provider off the
//! current turn log, streaming generated text and DTMF back out as events,
//! dispatching requested tool calls, and writing finished bot turns into
//! the turn store. Cancellation is cooperative: `abort()` raises a flag
//! observed at every chunk boundary and tool await; it never preempts the
//! step already executing.

use crate::{LoopEvents, SessionStore};
use futures_util::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use switchboard_core::{
    BotTextParams, BotToolParams, CompletionChunk, CompletionConfig, FinishReason, LoopError,
    LoopEvent, ToolManifest, ToolOutcome, TurnId, TurnPatch, TurnRecord,
};
use switchboard_llm::{CompletionProvider, ToolDispatcher};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Run state. Exactly one run may be `Running` per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Aborting,
}

/// How a run ended. Only `Finished` produces a `RunFinished` event; the
/// absence of that event after an `abort()` is the normal signal that the
/// run was cut short.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Finished,
    Aborted,
    /// A tool failed and the dispatcher declined to continue.
    AbandonedOnToolError,
}

pub struct ConsciousLoop {
    store: Arc<SessionStore>,
    provider: Arc<dyn CompletionProvider>,
    dispatcher: Arc<dyn ToolDispatcher>,
    config: RwLock<CompletionConfig>,
    manifest: RwLock<ToolManifest>,
    state: Mutex<RunState>,
    abort_flag: AtomicBool,
    events: LoopEvents,
}

impl ConsciousLoop {
    pub fn new(
        store: Arc<SessionStore>,
        provider: Arc<dyn CompletionProvider>,
        dispatcher: Arc<dyn ToolDispatcher>,
    ) -> Self {
        Self {
            store,
            provider,
            dispatcher,
            config: RwLock::new(CompletionConfig::default()),
            manifest: RwLock::new(ToolManifest::default()),
            state: Mutex::new(RunState::Idle),
            abort_flag: AtomicBool::new(false),
            events: LoopEvents::default(),
        }
    }

    /// Install the agent definition delivered at session setup.
    pub fn configure(&self, config: CompletionConfig, manifest: ToolManifest) {
        *self.config.write().unwrap_or_else(|p| p.into_inner()) = config;
        *self.manifest.write().unwrap_or_else(|p| p.into_inner()) = manifest;
    }

    pub fn config(&self) -> CompletionConfig {
        self.config.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn tool_manifest(&self) -> ToolManifest {
        self.manifest
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Current turn log, oldest first.
    pub fn turns(&self) -> Vec<TurnRecord> {
        self.store.turns().list()
    }

    pub fn state(&self) -> RunState {
        *self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Subscribe to run lifecycle, text/DTMF output, and tool events.
    pub fn subscribe(&self) -> broadcast::Receiver<LoopEvent> {
        self.events.subscribe()
    }

    /// Request cancellation of the in-flight run.
    ///
    /// Cooperative: suppresses further externally visible events once the
    /// currently executing step reaches its next checkpoint. Idempotent and
    /// safe to call when idle.
    pub fn abort(&self) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        match *state {
            RunState::Running => {
                *state = RunState::Aborting;
                self.abort_flag.store(true, Ordering::SeqCst);
                info!(call_id = %self.store.call_id(), "completion run abort requested");
            }
            RunState::Aborting | RunState::Idle => {}
        }
    }

    /// Execute one completion run.
    ///
    /// Rejected with [`LoopError::AlreadyRunning`] when a run is in flight
    /// (runs are never queued; callers retry off `CompletionRequested`
    /// once the loop is idle again). Drains the parking lot, then drives
    /// provider exchanges until the provider stops, the run is aborted, or
    /// a tool failure abandons it.
    pub async fn run(&self) -> Result<RunOutcome, LoopError> {
        {
            let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
            if *state != RunState::Idle {
                return Err(LoopError::AlreadyRunning);
            }
            *state = RunState::Running;
            self.abort_flag.store(false, Ordering::SeqCst);
        }

        self.events.publish(LoopEvent::RunStarted);
        let result = self.drive().await;

        {
            let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
            *state = RunState::Idle;
        }

        match &result {
            Ok(RunOutcome::Finished) => self.events.publish(LoopEvent::RunFinished),
            Ok(RunOutcome::Aborted) => {
                debug!(call_id = %self.store.call_id(), "completion run aborted");
            }
            Ok(RunOutcome::AbandonedOnToolError) => {
                warn!(call_id = %self.store.call_id(), "completion run abandoned after tool failure");
            }
            Err(err) => {
                warn!(call_id = %self.store.call_id(), error = %err, "completion run failed");
            }
        }
        result
    }

    fn aborted(&self) -> bool {
        self.abort_flag.load(Ordering::SeqCst)
    }

    async fn drive(&self) -> Result<RunOutcome, LoopError> {
        // Parked out-of-band messages become visible to the provider at
        // the start of this run, system guidance first.
        self.store.insert_parking_lot();

        loop {
            if self.aborted() {
                return Ok(RunOutcome::Aborted);
            }

            let turns = self.store.turns().list();
            let config = self.config();
            let manifest = self.tool_manifest();
            let mut stream = self.provider.complete(turns, &manifest, &config).await?;

            let mut streaming_turn: Option<TurnId> = None;
            let mut full_text = String::new();
            let mut tool_batches: Vec<(TurnId, Vec<switchboard_core::ToolCall>)> = Vec::new();
            let mut finish: Option<FinishReason> = None;

            while let Some(item) = stream.next().await {
                if self.aborted() {
                    return Ok(RunOutcome::Aborted);
                }
                match item? {
                    CompletionChunk::TextDelta { delta } => {
                        full_text.push_str(&delta);
                        match streaming_turn {
                            None => {
                                let turn = self
                                    .store
                                    .turns()
                                    .add_bot_text(BotTextParams::streaming(delta.clone()));
                                streaming_turn = Some(turn.id());
                            }
                            Some(id) => {
                                self.store.turns().append_bot_text(id, &delta);
                            }
                        }
                        self.events.publish(LoopEvent::TextChunk {
                            text: delta,
                            last: false,
                            full_text: None,
                        });
                    }
                    CompletionChunk::Dtmf { digits } => {
                        self.events.publish(LoopEvent::Dtmf { digits });
                    }
                    CompletionChunk::ToolCalls { calls } => {
                        if calls.is_empty() {
                            warn!(call_id = %self.store.call_id(), "provider sent empty tool batch");
                            continue;
                        }
                        match BotToolParams::new(calls.clone()) {
                            Ok(params) => {
                                let turn = self.store.turns().add_bot_tool(params);
                                tool_batches.push((turn.id(), calls));
                            }
                            Err(err) => {
                                warn!(call_id = %self.store.call_id(), error = %err, "rejected tool batch");
                            }
                        }
                    }
                    CompletionChunk::Finished { reason } => {
                        finish = Some(reason);
                        break;
                    }
                }
            }

            if self.aborted() {
                // The streaming turn is intentionally left in `Streaming`
                // state so a following interruption can redact it.
                return Ok(RunOutcome::Aborted);
            }

            // Close out any streamed utterance before tools run or the run
            // ends.
            if let Some(id) = streaming_turn.take() {
                self.store.turns().finalize_bot_text(id);
                self.events.publish(LoopEvent::TextChunk {
                    text: String::new(),
                    last: true,
                    full_text: Some(full_text.clone()),
                });
            }

            match finish {
                Some(FinishReason::ToolUse) => {
                    for (turn_id, calls) in tool_batches {
                        for call in calls {
                            if self.aborted() {
                                return Ok(RunOutcome::Aborted);
                            }
                            self.events.publish(LoopEvent::ToolStarting {
                                turn_id,
                                call: call.clone(),
                            });

                            match self.dispatcher.execute(turn_id, &call).await {
                                Ok(result) => {
                                    self.store.turns().update(
                                        turn_id,
                                        TurnPatch::ToolResult {
                                            call_id: call.id.clone(),
                                            outcome: ToolOutcome::Success {
                                                result: result.clone(),
                                            },
                                        },
                                    );
                                    self.events.publish(LoopEvent::ToolFinished {
                                        turn_id,
                                        call,
                                        result,
                                    });
                                }
                                Err(err) => {
                                    self.store.turns().update(
                                        turn_id,
                                        TurnPatch::ToolResult {
                                            call_id: call.id.clone(),
                                            outcome: ToolOutcome::Error {
                                                message: err.to_string(),
                                            },
                                        },
                                    );
                                    self.events.publish(LoopEvent::ToolError {
                                        turn_id,
                                        call: call.clone(),
                                        error: err.to_string(),
                                    });
                                    if !self.dispatcher.on_tool_error(turn_id, &call, &err) {
                                        return Ok(RunOutcome::AbandonedOnToolError);
                                    }
                                }
                            }
                        }
                    }
                    // Tool results recorded; hand the updated log back to
                    // the provider within the same run.
                    continue;
                }
                Some(FinishReason::Stop) | None => {
                    return Ok(RunOutcome::Finished);
                }
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
