//! Speech relay wire contract.
//!
//! Named events exchanged with the per-session duplex speech channel. The
//! transport (websocket framing, reconnection) belongs to an external
//! collaborator; the core only consumes and produces these shapes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// INBOUND EVENTS
// ============================================================================

/// Event received from the speech relay channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RelayEvent {
    /// Sent once when the relay stream is established.
    #[serde(rename_all = "camelCase")]
    Setup {
        session_id: String,
        /// Opaque key/value parameters supplied at call setup. Values that
        /// carry structure (seed context, agent config) are JSON-encoded
        /// strings and parsed by the session driver.
        #[serde(default)]
        custom_parameters: BTreeMap<String, String>,
    },
    /// Caller speech; `last` marks the final transcript of an utterance.
    #[serde(rename_all = "camelCase")]
    Prompt { voice_prompt: String, last: bool },
    /// The caller spoke over the bot; carries exactly the portion of the
    /// bot's utterance the caller is known to have heard.
    #[serde(rename_all = "camelCase")]
    Interrupt { utterance_until_interrupt: String },
    /// A touch-tone digit pressed by the caller.
    Dtmf { digit: String },
    /// An error reported by the relay itself.
    Error { description: String },
}

impl RelayEvent {
    /// Event name for logging.
    pub fn event_type(&self) -> &'static str {
        match self {
            RelayEvent::Setup { .. } => "setup",
            RelayEvent::Prompt { .. } => "prompt",
            RelayEvent::Interrupt { .. } => "interrupt",
            RelayEvent::Dtmf { .. } => "dtmf",
            RelayEvent::Error { .. } => "error",
        }
    }
}

// ============================================================================
// OUTBOUND COMMANDS
// ============================================================================

/// Command sent to the speech relay channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RelayCommand {
    /// One token of bot speech; `last` closes the utterance.
    #[serde(rename = "text")]
    TextToken { token: String, last: bool },
    /// Touch-tone digits to play to the caller.
    SendDigits { digits: String },
}

// ============================================================================
// TESTS
// ============================================================================
