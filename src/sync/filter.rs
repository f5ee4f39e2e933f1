//! Inbound message filtering
//!
//! A message from the relay is applied to the clipboard only if it came from
//! another client, carries text, and differs from what was applied last.

use crate::sync::state::SharedState;
use crate::transport::InboundMessage;

/// Outcome of filtering one inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Apply the body to the clipboard
    Accept,

    /// Echo of this client's own publish
    OwnEcho,

    /// Nothing to apply
    EmptyBody,

    /// Same body as the last applied message
    Duplicate,
}

impl Verdict {
    pub fn is_accept(self) -> bool {
        self == Verdict::Accept
    }
}

/// Decide whether `message` should be applied, given the last applied body
pub fn evaluate(client_name: &str, message: &InboundMessage, last_applied: &str) -> Verdict {
    if message.origin_label == client_name {
        Verdict::OwnEcho
    } else if message.body.is_empty() {
        Verdict::EmptyBody
    } else if message.body == last_applied {
        Verdict::Duplicate
    } else {
        Verdict::Accept
    }
}

/// Applies [`evaluate`] against the shared state, recording accepted bodies
#[derive(Debug, Clone)]
pub struct DedupFilter {
    client_name: String,
    state: SharedState,
}

impl DedupFilter {
    pub fn new(client_name: impl Into<String>, state: SharedState) -> Self {
        Self {
            client_name: client_name.into(),
            state,
        }
    }

    /// Filter `message`; on [`Verdict::Accept`] the state already holds its body
    pub async fn admit(&self, message: &InboundMessage) -> Verdict {
        let mut verdict = Verdict::Accept;
        self.state
            .replace_if(&message.body, |last| {
                verdict = evaluate(&self.client_name, message, last);
                verdict.is_accept()
            })
            .await;
        verdict
    }
}
