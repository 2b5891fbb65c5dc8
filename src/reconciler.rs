//! Merges streamed reply fragments into an ordered thread.
//!
//! ## Rules
//! - At most one [`DisplayMessage`] per `messageId`.
//! - List order is first-occurrence order; fragments mutate entries in place.
//! - `submit` appends a complete user message followed by an empty assistant
//!   placeholder whose id is the one the server echoes on its fragments.
//! - A fragment for an unknown id appends a new assistant message.
//! - Fragments without a usable id are dropped.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ChatError;
use crate::message::{new_message_id, DisplayMessage, InboundFragment, OutboundRequest, Sender};

/// How a fragment's `messageStop` flag combines with an entry's current
/// completion state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionPolicy {
    /// `prior || stop`: once complete, an entry stays complete.
    #[default]
    Monotonic,
    /// `stop`: every fragment overwrites the flag, so a late fragment without
    /// the flag reopens a finished entry.
    Overwrite,
}

/// What [`Reconciler::on_fragment`] did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentOutcome {
    /// An existing entry at `index` was extended.
    Extended { index: usize },
    /// A new assistant entry was appended at `index`.
    Inserted { index: usize },
    /// The event had no usable identifier.
    Dropped,
}

/// Identifiers minted by [`Reconciler::submit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitReceipt {
    pub user_id: String,
    pub assistant_id: String,
}

#[derive(Debug, Default)]
pub struct Reconciler {
    messages: Vec<DisplayMessage>,
    policy: CompletionPolicy,
}

impl Reconciler {
    pub fn new(policy: CompletionPolicy) -> Self {
        Self {
            messages: Vec::new(),
            policy,
        }
    }

    pub fn policy(&self) -> CompletionPolicy {
        self.policy
    }

    /// The thread in display order.
    pub fn messages(&self) -> &[DisplayMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get(&self, message_id: &str) -> Option<&DisplayMessage> {
        self.position(message_id).map(|i| &self.messages[i])
    }

    fn position(&self, message_id: &str) -> Option<usize> {
        self.messages.iter().position(|m| m.message_id == message_id)
    }

    /// Append a user message and its paired assistant placeholder, and return
    /// the request to send.
    ///
    /// The user entry keeps `text` as typed; the request carries it trimmed.
    ///
    /// # Errors
    /// [`ChatError::EmptyInput`] when `text` is blank; the thread is unchanged.
    pub fn submit(&mut self, text: &str) -> Result<(OutboundRequest, SubmitReceipt), ChatError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(ChatError::EmptyInput);
        }

        let user_id = new_message_id();
        let assistant_id = new_message_id();

        self.messages.push(DisplayMessage::user(user_id.clone(), text));
        self.messages
            .push(DisplayMessage::assistant_placeholder(assistant_id.clone()));

        let request = OutboundRequest {
            message: trimmed.to_string(),
            message_id: assistant_id.clone(),
        };
        Ok((
            request,
            SubmitReceipt {
                user_id,
                assistant_id,
            },
        ))
    }

    /// Merge one streamed fragment into the thread.
    pub fn on_fragment(&mut self, event: &InboundFragment) -> FragmentOutcome {
        let Some(id) = event.id() else {
            warn!(
                contents_len = event.text().len(),
                "dropping fragment without messageId"
            );
            return FragmentOutcome::Dropped;
        };

        if let Some(index) = self.position(id) {
            let policy = self.policy;
            let entry = &mut self.messages[index];
            entry.contents.push_str(event.text());
            entry.is_complete = match policy {
                CompletionPolicy::Monotonic => entry.is_complete || event.is_stop(),
                CompletionPolicy::Overwrite => event.is_stop(),
            };
            return FragmentOutcome::Extended { index };
        }

        debug!(message_id = %id, "fragment for unknown id, appending assistant message");
        self.messages.push(DisplayMessage {
            message_id: id.to_string(),
            sender: Sender::Assistant,
            contents: event.text().to_string(),
            is_complete: event.is_stop(),
        });
        FragmentOutcome::Inserted {
            index: self.messages.len() - 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frag(id: &str, text: &str, stop: bool) -> InboundFragment {
        InboundFragment::new(id, text, stop)
    }

    // -- submit ---------------------------------------------------------------

    #[test]
    fn test_submit_appends_user_then_placeholder() {
        let mut r = Reconciler::default();
        r.submit("hi").unwrap();
        let msgs = r.messages();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].sender, Sender::User);
        assert_eq!(msgs[0].contents, "hi");
        assert!(msgs[0].is_complete);
        assert_eq!(msgs[1].sender, Sender::Assistant);
        assert_eq!(msgs[1].contents, "");
        assert!(!msgs[1].is_complete);
    }

    #[test]
    fn test_submit_request_targets_assistant_id() {
        let mut r = Reconciler::default();
        let (req, receipt) = r.submit("hi").unwrap();
        assert_eq!(req.message_id, receipt.assistant_id);
        assert_eq!(r.messages()[1].message_id, receipt.assistant_id);
        assert_eq!(r.messages()[0].message_id, receipt.user_id);
        assert_ne!(receipt.user_id, receipt.assistant_id);
    }

    #[test]
    fn test_submit_trims_request_but_not_user_entry() {
        let mut r = Reconciler::default();
        let (req, _) = r.submit("  hello there \n").unwrap();
        assert_eq!(req.message, "hello there");
        assert_eq!(r.messages()[0].contents, "  hello there \n");
    }

    #[test]
    fn test_submit_blank_rejected_without_change() {
        let mut r = Reconciler::default();
        assert_eq!(r.submit("   \t").unwrap_err(), ChatError::EmptyInput);
        assert_eq!(r.submit("").unwrap_err(), ChatError::EmptyInput);
        assert!(r.is_empty());
    }

    // -- on_fragment ----------------------------------------------------------

    #[test]
    fn test_fragments_accumulate_in_order() {
        let mut r = Reconciler::default();
        let (_, receipt) = r.submit("greet me").unwrap();
        let id = receipt.assistant_id.as_str();
        r.on_fragment(&frag(id, "Hel", false));
        r.on_fragment(&frag(id, "lo", false));
        r.on_fragment(&frag(id, " world", true));
        let msg = r.get(id).unwrap();
        assert_eq!(msg.contents, "Hello world");
        assert!(msg.is_complete);
        assert_eq!(r.len(), 2);
    }

    #[test]
    fn test_fragment_extends_at_original_position() {
        let mut r = Reconciler::default();
        let (_, first) = r.submit("one").unwrap();
        r.submit("two").unwrap();
        let outcome = r.on_fragment(&frag(&first.assistant_id, "reply", false));
        assert_eq!(outcome, FragmentOutcome::Extended { index: 1 });
        assert_eq!(r.messages()[1].contents, "reply");
    }

    #[test]
    fn test_stop_without_contents_keeps_text() {
        let mut r = Reconciler::default();
        let (_, receipt) = r.submit("q").unwrap();
        let id = receipt.assistant_id.as_str();
        r.on_fragment(&frag(id, "answer", false));
        r.on_fragment(&InboundFragment {
            message_id: Some(id.to_string()),
            contents: None,
            message_stop: Some(true),
        });
        let msg = r.get(id).unwrap();
        assert_eq!(msg.contents, "answer");
        assert!(msg.is_complete);
    }

    #[test]
    fn test_unknown_id_inserts_assistant_message() {
        let mut r = Reconciler::default();
        let outcome = r.on_fragment(&frag("remote-1", "unsolicited", false));
        assert_eq!(outcome, FragmentOutcome::Inserted { index: 0 });
        let msg = r.get("remote-1").unwrap();
        assert_eq!(msg.sender, Sender::Assistant);
        assert_eq!(msg.contents, "unsolicited");
        assert!(!msg.is_complete);
    }

    #[test]
    fn test_unknown_id_with_stop_inserted_complete() {
        let mut r = Reconciler::default();
        r.on_fragment(&frag("remote-1", "done", true));
        assert!(r.get("remote-1").unwrap().is_complete);
    }

    #[test]
    fn test_missing_id_dropped() {
        let mut r = Reconciler::default();
        let outcome = r.on_fragment(&InboundFragment {
            message_id: None,
            contents: Some("orphan".into()),
            message_stop: None,
        });
        assert_eq!(outcome, FragmentOutcome::Dropped);
        assert!(r.is_empty());
    }

    #[test]
    fn test_empty_id_dropped_not_coalesced() {
        let mut r = Reconciler::default();
        r.on_fragment(&frag("", "a", false));
        r.on_fragment(&frag("", "b", false));
        assert!(r.is_empty());
    }

    // -- completion policy ----------------------------------------------------

    #[test]
    fn test_monotonic_keeps_finished_message_finished() {
        let mut r = Reconciler::new(CompletionPolicy::Monotonic);
        r.on_fragment(&frag("a", "x", true));
        r.on_fragment(&frag("a", "y", false));
        let msg = r.get("a").unwrap();
        assert!(msg.is_complete);
        assert_eq!(msg.contents, "xy");
    }

    #[test]
    fn test_overwrite_reopens_finished_message() {
        let mut r = Reconciler::new(CompletionPolicy::Overwrite);
        r.on_fragment(&frag("a", "x", true));
        r.on_fragment(&frag("a", "y", false));
        assert!(!r.get("a").unwrap().is_complete);
    }

    #[test]
    fn test_default_policy_is_monotonic() {
        assert_eq!(Reconciler::default().policy(), CompletionPolicy::Monotonic);
    }

    #[test]
    fn test_completion_policy_deserializes_lowercase() {
        #[derive(Deserialize)]
        struct Wrap {
            completion: CompletionPolicy,
        }
        let w: Wrap = toml::from_str(r#"completion = "overwrite""#).unwrap();
        assert_eq!(w.completion, CompletionPolicy::Overwrite);
    }
}
