//! Ordered, versioned log of conversation turns for one call.
//!
//! Every mutation flows through an explicit method that bumps the turn's
//! version and publishes the matching event, so listeners and the remote
//! mirror observe exactly one notification per state change. Operations are
//! synchronous and total: missing ids are reported through return values,
//! never through panics or errors.

use crate::SessionEvents;
use std::sync::RwLock;
use switchboard_core::{
    BotTextParams, BotToolParams, CallId, DeliveryStatus, HumanTextParams, SessionEvent,
    SystemParams, TurnId, TurnMeta, TurnPatch, TurnRecord,
};
use tracing::debug;

pub struct TurnStore {
    call_id: CallId,
    turns: RwLock<Vec<TurnRecord>>,
    events: SessionEvents,
}

impl TurnStore {
    pub fn new(call_id: CallId, events: SessionEvents) -> Self {
        Self {
            call_id,
            turns: RwLock::new(Vec::new()),
            events,
        }
    }

    // ========================================================================
    // ADD OPERATIONS
    // ========================================================================

    pub fn add_human_text(&self, params: HumanTextParams) -> TurnRecord {
        self.append(TurnRecord::HumanText {
            meta: TurnMeta::new(params.id),
            content: params.content,
            redacted: false,
        })
    }

    pub fn add_bot_text(&self, params: BotTextParams) -> TurnRecord {
        self.append(TurnRecord::BotText {
            meta: TurnMeta::new(params.id),
            content: params.content,
            redacted: false,
            status: params.status,
        })
    }

    pub fn add_bot_tool(&self, params: BotToolParams) -> TurnRecord {
        self.append(TurnRecord::BotTool {
            meta: TurnMeta::new(params.id),
            tool_calls: params.tool_calls,
        })
    }

    pub fn add_system(&self, params: SystemParams) -> TurnRecord {
        self.append(TurnRecord::System {
            meta: TurnMeta::new(params.id),
            content: params.content,
        })
    }

    fn append(&self, turn: TurnRecord) -> TurnRecord {
        {
            let mut turns = self.turns.write().unwrap_or_else(|p| p.into_inner());
            turns.push(turn.clone());
        }
        debug!(call_id = %self.call_id, turn_id = %turn.id(), kind = turn.kind(), "turn added");
        self.events.publish(SessionEvent::TurnAdded { turn: turn.clone() });
        turn
    }

    // ========================================================================
    // READ OPERATIONS
    // ========================================================================

    pub fn get(&self, id: TurnId) -> Option<TurnRecord> {
        self.turns
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .find(|t| t.id() == id)
            .cloned()
    }

    /// All turns in insertion order.
    pub fn list(&self) -> Vec<TurnRecord> {
        self.turns.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn len(&self) -> usize {
        self.turns.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ========================================================================
    // MUTATION OPERATIONS
    // ========================================================================

    /// Apply one patch to a turn.
    ///
    /// Returns the new version, or `None` when the turn does not exist or
    /// the patch does not apply to its variant (a tool result for a text
    /// turn, a delivery status for a human turn). Nothing is emitted in the
    /// `None` case.
    pub fn update(&self, id: TurnId, patch: TurnPatch) -> Option<u32> {
        let version = {
            let mut turns = self.turns.write().unwrap_or_else(|p| p.into_inner());
            let turn = turns.iter_mut().find(|t| t.id() == id)?;
            if !apply_patch(turn, &patch) {
                return None;
            }
            let meta = turn.meta_mut();
            meta.version += 1;
            meta.version
        };
        self.events.publish(SessionEvent::TurnUpdated { id });
        Some(version)
    }

    /// Remove a turn from the log. Remaining turns keep their positions.
    ///
    /// Returns the removed record; `None` for an unknown id (no event is
    /// emitted, callers that must distinguish can inspect the return).
    pub fn delete(&self, id: TurnId) -> Option<TurnRecord> {
        let removed = {
            let mut turns = self.turns.write().unwrap_or_else(|p| p.into_inner());
            let idx = turns.iter().position(|t| t.id() == id)?;
            turns.remove(idx)
        };
        debug!(call_id = %self.call_id, turn_id = %id, "turn deleted");
        self.events.publish(SessionEvent::TurnDeleted {
            id,
            previous: Some(removed.clone()),
        });
        Some(removed)
    }

    /// Truncate the in-flight bot utterance to what the caller actually
    /// heard before interrupting.
    ///
    /// Finds the most recent bot text turn still marked `Streaming`,
    /// replaces its content with `utterance_until_interrupt`, flags it
    /// redacted, marks it `Interrupted`, and bumps its version exactly
    /// once. Without this the completion provider would believe the whole
    /// utterance was delivered. A no-op when no bot turn is in flight
    /// (the interruption raced a turn that already completed).
    pub fn redact_interruption(&self, utterance_until_interrupt: &str) -> Option<TurnId> {
        let id = {
            let mut turns = self.turns.write().unwrap_or_else(|p| p.into_inner());
            let turn = turns.iter_mut().rev().find(|t| t.is_streaming_bot_text())?;
            if let TurnRecord::BotText {
                meta,
                content,
                redacted,
                status,
            } = turn
            {
                *content = utterance_until_interrupt.to_string();
                *redacted = true;
                *status = DeliveryStatus::Interrupted;
                meta.version += 1;
                meta.id
            } else {
                return None;
            }
        };
        debug!(call_id = %self.call_id, turn_id = %id, "bot turn redacted after interruption");
        self.events.publish(SessionEvent::TurnUpdated { id });
        Some(id)
    }

    // ========================================================================
    // STREAMING HELPERS
    // ========================================================================

    /// Append a streamed delta to an in-flight bot text turn.
    pub fn append_bot_text(&self, id: TurnId, delta: &str) -> Option<u32> {
        let version = {
            let mut turns = self.turns.write().unwrap_or_else(|p| p.into_inner());
            let turn = turns.iter_mut().find(|t| t.id() == id)?;
            match turn {
                TurnRecord::BotText {
                    meta,
                    content,
                    status: DeliveryStatus::Streaming,
                    ..
                } => {
                    content.push_str(delta);
                    meta.version += 1;
                    meta.version
                }
                _ => return None,
            }
        };
        self.events.publish(SessionEvent::TurnUpdated { id });
        Some(version)
    }

    /// Mark an in-flight bot text turn as fully delivered.
    pub fn finalize_bot_text(&self, id: TurnId) -> Option<u32> {
        self.update(
            id,
            TurnPatch::Status {
                status: DeliveryStatus::Complete,
            },
        )
    }
}

fn apply_patch(turn: &mut TurnRecord, patch: &TurnPatch) -> bool {
    match (turn, patch) {
        (
            TurnRecord::HumanText { content, .. }
            | TurnRecord::BotText { content, .. }
            | TurnRecord::System { content, .. },
            TurnPatch::Content { content: next },
        ) => {
            *content = next.clone();
            true
        }
        (
            TurnRecord::HumanText { redacted, .. } | TurnRecord::BotText { redacted, .. },
            TurnPatch::Redacted { redacted: next },
        ) => {
            *redacted = *next;
            true
        }
        (TurnRecord::BotText { status, .. }, TurnPatch::Status { status: next }) => {
            *status = *next;
            true
        }
        (
            TurnRecord::BotTool { tool_calls, .. },
            TurnPatch::ToolResult { call_id, outcome },
        ) => match tool_calls.iter_mut().find(|c| c.id == *call_id) {
            Some(call) => {
                call.result = Some(outcome.clone());
                true
            }
            None => false,
        },
        _ => false,
    }
}

// ============================================================================
// TESTS
// ============================================================================


// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// For any sequence of adds with no deletions, `list()` returns
        /// turns in call order.
        #[test]
        fn prop_add_sequence_preserves_order(contents in prop::collection::vec("[a-zA-Z0-9 ]{1,24}", 1..24)) {
            let store = TurnStore::new(CallId::new("CA-prop"), SessionEvents::default());
            let mut expected = Vec::new();
            for (i, content) in contents.iter().enumerate() {
                let turn = match i % 3 {
                    0 => store.add_human_text(HumanTextParams::new(content.clone()).unwrap()),
                    1 => store.add_bot_text(BotTextParams::new(content.clone()).unwrap()),
                    _ => store.add_system(SystemParams::new(content.clone()).unwrap()),
                };
                expected.push(turn.id());
            }
            let listed: Vec<_> = store.list().iter().map(|t| t.id()).collect();
            prop_assert_eq!(listed, expected);
        }

        /// Versions increase strictly under any patch sequence.
        #[test]
        fn prop_versions_strictly_increase(patch_count in 1usize..16) {
            let store = TurnStore::new(CallId::new("CA-prop"), SessionEvents::default());
            let turn = store.add_bot_text(BotTextParams::new("seed").unwrap());
            let mut last = turn.version();
            for i in 0..patch_count {
                let version = store.update(turn.id(), TurnPatch::Content {
                    content: format!("rev {i}"),
                }).unwrap();
                prop_assert!(version > last);
                last = version;
            }
        }

        /// Redaction leaves content equal to the heard utterance.
        #[test]
        fn prop_redaction_matches_heard_portion(heard in "[a-zA-Z ]{1,32}") {
            let store = TurnStore::new(CallId::new("CA-prop"), SessionEvents::default());
            store.add_bot_text(BotTextParams::streaming("something longer than heard"));
            store.redact_interruption(&heard).unwrap();
            let turn = store.list().pop().unwrap();
            prop_assert_eq!(turn.content(), Some(heard.as_str()));
        }
    }
}
