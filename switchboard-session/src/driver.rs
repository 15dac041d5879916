//! Session driver: wires one speech relay stream to one session.
//!
//! Transport-free equivalent of the relay connection handler: inbound
//! relay events mutate the session and steer the conscious loop, loop
//! output flows back out through the [`SpeechRelay`] seam. The owning
//! transport (websocket server, test harness) feeds events in and
//! implements the outbound trait.

use crate::{ConsciousLoop, SessionStore};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use switchboard_core::{
    BotTextParams, CompletionConfig, ContextUpdate, HumanTextParams, LoopError, LoopEvent,
    RelayError, RelayEvent, SessionContext, SessionEvent, SwitchboardResult, ToolManifest,
    CALL_CONTEXT_KEY,
};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

// ============================================================================
// OUTBOUND SEAM
// ============================================================================

/// Outbound half of the speech relay channel.
#[async_trait]
pub trait SpeechRelay: Send + Sync {
    /// Stream one token of bot speech; `last` closes the utterance.
    async fn send_text_token(&self, token: &str, last: bool) -> Result<(), RelayError>;

    /// Play touch-tone digits to the caller.
    async fn send_dtmf(&self, digits: &str) -> Result<(), RelayError>;
}

// ============================================================================
// SETUP PAYLOAD
// ============================================================================

/// Agent definition delivered through the relay setup parameters.
#[derive(Debug, Default, Deserialize)]
struct AgentSetup {
    #[serde(default)]
    config: CompletionConfig,
    #[serde(default)]
    tools: ToolManifest,
}

// ============================================================================
// DRIVER
// ============================================================================

pub struct SessionDriver {
    store: Arc<SessionStore>,
    cloop: Arc<ConsciousLoop>,
    relay: Arc<dyn SpeechRelay>,
}

impl SessionDriver {
    /// Attach a relay stream to a session. Spawns the output forwarder and
    /// the completion-requested trigger; both end when the session's event
    /// channels close.
    pub fn new(
        store: Arc<SessionStore>,
        cloop: Arc<ConsciousLoop>,
        relay: Arc<dyn SpeechRelay>,
    ) -> Arc<Self> {
        let driver = Arc::new(Self {
            store,
            cloop,
            relay,
        });
        driver.spawn_output_forwarder();
        driver.spawn_completion_trigger();
        driver
    }

    /// Handle one inbound relay event.
    ///
    /// A malformed control payload fails only the triggering event; the
    /// session stays up and later events are processed normally.
    pub async fn handle_relay_event(&self, event: RelayEvent) -> SwitchboardResult<()> {
        match event {
            RelayEvent::Setup {
                session_id,
                custom_parameters,
            } => self.handle_setup(session_id, custom_parameters),
            RelayEvent::Prompt { voice_prompt, last } => {
                if !last {
                    // Partial speech; wait for the final transcript.
                    return Ok(());
                }
                info!(call_id = %self.store.call_id(), transcript = %voice_prompt, "caller prompt");
                let params = HumanTextParams::new(voice_prompt)?;
                self.store.turns().add_human_text(params);
                self.try_run();
                Ok(())
            }
            RelayEvent::Interrupt {
                utterance_until_interrupt,
            } => {
                info!(call_id = %self.store.call_id(), "caller interrupted bot");
                self.cloop.abort();
                self.store
                    .turns()
                    .redact_interruption(&utterance_until_interrupt);
                Ok(())
            }
            RelayEvent::Dtmf { digit } => {
                info!(call_id = %self.store.call_id(), digit = %digit, "caller dtmf");
                Ok(())
            }
            RelayEvent::Error { description } => {
                error!(call_id = %self.store.call_id(), description = %description, "relay error");
                Ok(())
            }
        }
    }

    fn handle_setup(
        &self,
        session_id: String,
        custom_parameters: BTreeMap<String, String>,
    ) -> SwitchboardResult<()> {
        info!(call_id = %self.store.call_id(), session_id = %session_id, "relay session established");

        if let Some(raw) = custom_parameters.get("context") {
            let seed: SessionContext =
                serde_json::from_str(raw).map_err(|e| RelayError::MalformedControlPayload {
                    field: "context".to_string(),
                    reason: e.to_string(),
                })?;
            let update: ContextUpdate = seed.into_iter().map(|(k, v)| (k, Some(v))).collect();
            self.store.set_context(update, true);
        }

        self.record_relay_session_id(&session_id);

        if let Some(raw) = custom_parameters.get("agent") {
            let setup: AgentSetup =
                serde_json::from_str(raw).map_err(|e| RelayError::MalformedControlPayload {
                    field: "agent".to_string(),
                    reason: e.to_string(),
                })?;
            self.cloop.configure(setup.config, setup.tools);
        }

        if let Some(greeting) = custom_parameters.get("welcomeGreeting") {
            // The greeting is spoken by the telephony layer; record it so
            // the provider knows the conversation did not start cold.
            if let Ok(params) = BotTextParams::new(greeting.clone()) {
                self.store.turns().add_bot_text(params);
                info!(call_id = %self.store.call_id(), transcript = %greeting, "greeting recorded");
            }
        }

        Ok(())
    }

    /// Stamp the relay session id onto the call-details context entry.
    fn record_relay_session_id(&self, session_id: &str) {
        let Some(mut value) = self.store.context().get(CALL_CONTEXT_KEY) else {
            debug!(call_id = %self.store.call_id(), "no call entry to stamp relay session onto");
            return;
        };
        let Some(entry) = value.as_object_mut() else {
            return;
        };
        entry.insert(
            "relay_session_id".to_string(),
            serde_json::Value::String(session_id.to_string()),
        );
        self.store.set_context(
            BTreeMap::from([(CALL_CONTEXT_KEY.to_string(), Some(value))]),
            true,
        );
    }

    /// Start a completion run unless one is already in flight. A rejected
    /// attempt is normal; parked or newly added turns surface at the next
    /// run.
    fn try_run(&self) {
        let cloop = Arc::clone(&self.cloop);
        let call_id = self.store.call_id().clone();
        tokio::spawn(async move {
            match cloop.run().await {
                Ok(_) => {}
                Err(LoopError::AlreadyRunning) => {
                    debug!(call_id = %call_id, "completion already in flight");
                }
                Err(err) => {
                    warn!(call_id = %call_id, error = %err, "completion run failed");
                }
            }
        });
    }

    fn spawn_output_forwarder(&self) {
        let mut rx = self.cloop.subscribe();
        let relay = Arc::clone(&self.relay);
        let call_id = self.store.call_id().clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(LoopEvent::TextChunk {
                        text,
                        last,
                        full_text,
                    }) => {
                        if let Err(err) = relay.send_text_token(&text, last).await {
                            warn!(call_id = %call_id, error = %err, "failed to send text token");
                        }
                        if last {
                            if let Some(full) = full_text {
                                info!(call_id = %call_id, transcript = %full, "bot utterance");
                            }
                        }
                    }
                    Ok(LoopEvent::Dtmf { digits }) => {
                        if let Err(err) = relay.send_dtmf(&digits).await {
                            warn!(call_id = %call_id, error = %err, "failed to send dtmf");
                        }
                        info!(call_id = %call_id, digits = %digits, "bot dtmf");
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(call_id = %call_id, skipped, "loop event feed lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    fn spawn_completion_trigger(&self) {
        let mut rx = self.store.subscribe();
        let cloop = Arc::clone(&self.cloop);
        let call_id = self.store.call_id().clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(SessionEvent::CompletionRequested) => {
                        let runner = Arc::clone(&cloop);
                        let call_id = call_id.clone();
                        tokio::spawn(async move {
                            match runner.run().await {
                                Ok(_) => {}
                                Err(LoopError::AlreadyRunning) => {
                                    debug!(call_id = %call_id, "completion already in flight");
                                }
                                Err(err) => {
                                    warn!(call_id = %call_id, error = %err, "completion run failed");
                                }
                            }
                        });
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(call_id = %call_id, skipped, "session event feed lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;
    use switchboard_core::{CallId, CompletionChunk, FinishReason, SwitchboardError, TurnRole};
    use switchboard_llm::{ScriptedDispatcher, ScriptedProvider};
    use switchboard_sync::{InMemorySyncStore, SyncStore};

    /// Relay double capturing outbound traffic.
    #[derive(Default)]
    struct RecordingRelay {
        tokens: Mutex<Vec<(String, bool)>>,
        dtmf: Mutex<Vec<String>>,
    }

    impl RecordingRelay {
        fn tokens(&self) -> Vec<(String, bool)> {
            self.tokens.lock().unwrap_or_else(|p| p.into_inner()).clone()
        }
    }

    #[async_trait]
    impl SpeechRelay for RecordingRelay {
        async fn send_text_token(&self, token: &str, last: bool) -> Result<(), RelayError> {
            self.tokens
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .push((token.to_string(), last));
            Ok(())
        }

        async fn send_dtmf(&self, digits: &str) -> Result<(), RelayError> {
            self.dtmf
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .push(digits.to_string());
            Ok(())
        }
    }

    struct Fixture {
        driver: Arc<SessionDriver>,
        store: Arc<SessionStore>,
        provider: Arc<ScriptedProvider>,
        relay: Arc<RecordingRelay>,
    }

    fn fixture() -> Fixture {
        let remote = Arc::new(InMemorySyncStore::new());
        let store = SessionStore::new(
            CallId::new("CA-driver"),
            remote as Arc<dyn SyncStore>,
            SessionContext::new(),
        );
        let provider = Arc::new(ScriptedProvider::new());
        let cloop = Arc::new(ConsciousLoop::new(
            Arc::clone(&store),
            Arc::clone(&provider) as Arc<dyn switchboard_llm::CompletionProvider>,
            Arc::new(ScriptedDispatcher::new()),
        ));
        let relay = Arc::new(RecordingRelay::default());
        let driver = SessionDriver::new(
            Arc::clone(&store),
            cloop,
            Arc::clone(&relay) as Arc<dyn SpeechRelay>,
        );
        Fixture {
            driver,
            store,
            provider,
            relay,
        }
    }

    async fn eventually<F: Fn() -> bool>(what: &str, check: F) {
        for _ in 0..500 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("condition never became true: {what}");
    }

    fn setup_event(params: Vec<(&str, &str)>) -> RelayEvent {
        RelayEvent::Setup {
            session_id: "VX-1".to_string(),
            custom_parameters: params
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_setup_seeds_context_agent_and_greeting() {
        let f = fixture();
        f.driver
            .handle_relay_event(setup_event(vec![
                ("context", r#"{"call":{"from":"+15550100"}}"#),
                (
                    "agent",
                    r#"{"config":{"model":"gpt-4o","temperature":null,"max_tokens":null,"instructions":"be brief"},"tools":[]}"#,
                ),
                ("welcomeGreeting", "Hello there. I am a voice bot"),
            ]))
            .await
            .unwrap();

        // Context applied and stamped with the relay session id.
        let call = f.store.context().get(CALL_CONTEXT_KEY).unwrap();
        assert_eq!(call["from"], "+15550100");
        assert_eq!(call["relay_session_id"], "VX-1");

        // Greeting recorded as a bot turn.
        let turns = f.store.turns().list();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].role(), TurnRole::Bot);
        assert_eq!(turns[0].content(), Some("Hello there. I am a voice bot"));
    }

    #[tokio::test]
    async fn test_malformed_context_fails_request_but_not_session() {
        let f = fixture();
        let err = f
            .driver
            .handle_relay_event(setup_event(vec![("context", "{not json")]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SwitchboardError::Relay(RelayError::MalformedControlPayload { .. })
        ));

        // The session is still alive and processes later events.
        f.provider.push_exchange(vec![
            CompletionChunk::TextDelta {
                delta: "Still here.".to_string(),
            },
            CompletionChunk::Finished {
                reason: FinishReason::Stop,
            },
        ]);
        f.driver
            .handle_relay_event(RelayEvent::Prompt {
                voice_prompt: "are you there?".to_string(),
                last: true,
            })
            .await
            .unwrap();
        eventually("bot replied", || f.store.turns().len() == 2).await;
    }

    #[tokio::test]
    async fn test_partial_prompt_is_ignored() {
        let f = fixture();
        f.driver
            .handle_relay_event(RelayEvent::Prompt {
                voice_prompt: "I need".to_string(),
                last: false,
            })
            .await
            .unwrap();
        assert!(f.store.turns().is_empty());
        assert_eq!(f.provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_final_prompt_runs_completion_and_streams_to_relay() {
        let f = fixture();
        f.provider.push_exchange(vec![
            CompletionChunk::TextDelta {
                delta: "I can".to_string(),
            },
            CompletionChunk::TextDelta {
                delta: " help.".to_string(),
            },
            CompletionChunk::Finished {
                reason: FinishReason::Stop,
            },
        ]);

        f.driver
            .handle_relay_event(RelayEvent::Prompt {
                voice_prompt: "I need a ticket".to_string(),
                last: true,
            })
            .await
            .unwrap();

        eventually("tokens forwarded", || {
            f.relay.tokens().iter().any(|(_, last)| *last)
        })
        .await;

        let tokens = f.relay.tokens();
        assert_eq!(tokens[0], ("I can".to_string(), false));
        assert_eq!(tokens[1], (" help.".to_string(), false));
        assert!(tokens.last().unwrap().1);
        assert!(f
            .relay
            .dtmf
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .is_empty());
    }

    #[tokio::test]
    async fn test_parked_item_triggers_completion() {
        let f = fixture();
        f.provider.push_exchange(vec![
            CompletionChunk::TextDelta {
                delta: "Noted.".to_string(),
            },
            CompletionChunk::Finished {
                reason: FinishReason::Stop,
            },
        ]);

        f.store.add_parking_lot_item(crate::ParkingLotItems {
            system: Some(switchboard_core::SystemParams::new("supervisor joined").unwrap()),
            ..Default::default()
        });

        eventually("run triggered by parked item", || f.provider.calls() == 1).await;
        // The parked system note was drained into the log before the run.
        assert!(f
            .provider
            .last_turns()
            .iter()
            .any(|t| t.content() == Some("supervisor joined")));
    }

    #[tokio::test]
    async fn test_empty_final_prompt_is_rejected_gracefully() {
        let f = fixture();
        let err = f
            .driver
            .handle_relay_event(RelayEvent::Prompt {
                voice_prompt: String::new(),
                last: true,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SwitchboardError::Validation(_)));
        assert!(f.store.turns().is_empty());
    }
}
