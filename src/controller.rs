//! The chat controller: thread state, input draft, and submission gating.
//!
//! Construct one per conversation and pass it by reference to whatever drives
//! input and output. It never awaits; the transport's state is read from a
//! `watch` channel.

use tokio::sync::watch;

use crate::config::DEFAULT_MAX_INPUT_CHARS;
use crate::error::ChatError;
use crate::message::{DisplayMessage, InboundFragment};
use crate::reconciler::{CompletionPolicy, FragmentOutcome, Reconciler, SubmitReceipt};
use crate::transport::{ConnectionState, TransportHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatOptions {
    pub max_input_chars: usize,
    pub completion: CompletionPolicy,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            max_input_chars: DEFAULT_MAX_INPUT_CHARS,
            completion: CompletionPolicy::default(),
        }
    }
}

/// The not-yet-submitted input text, capped at a character limit.
#[derive(Debug, Clone, Default)]
pub struct InputField {
    text: String,
    max_chars: usize,
}

impl InputField {
    pub fn new(max_chars: usize) -> Self {
        Self {
            text: String::new(),
            max_chars,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Reject `text` if it is longer than the limit, counted in chars.
    pub fn check(&self, text: &str) -> Result<(), ChatError> {
        let len = text.chars().count();
        if len > self.max_chars {
            return Err(ChatError::InputTooLong {
                len,
                max: self.max_chars,
            });
        }
        Ok(())
    }

    pub fn set(&mut self, text: impl Into<String>) -> Result<(), ChatError> {
        let text = text.into();
        self.check(&text)?;
        self.text = text;
        Ok(())
    }

    pub fn clear(&mut self) {
        self.text.clear();
    }
}

pub struct ChatController {
    reconciler: Reconciler,
    input: InputField,
    transport: TransportHandle,
}

impl ChatController {
    pub fn new(transport: TransportHandle, options: ChatOptions) -> Self {
        Self {
            reconciler: Reconciler::new(options.completion),
            input: InputField::new(options.max_input_chars),
            transport,
        }
    }

    pub fn messages(&self) -> &[DisplayMessage] {
        self.reconciler.messages()
    }

    pub fn status(&self) -> ConnectionState {
        self.transport.state()
    }

    pub fn status_watcher(&self) -> watch::Receiver<ConnectionState> {
        self.transport.watch()
    }

    /// Whether [`submit`](Self::submit) would be accepted right now.
    pub fn can_submit(&self) -> bool {
        self.status().is_open() && !self.transport.is_closed()
    }

    pub fn input(&self) -> &str {
        self.input.text()
    }

    pub fn set_input(&mut self, text: impl Into<String>) -> Result<(), ChatError> {
        self.input.set(text)
    }

    /// Submit the current draft. The draft is cleared on success and kept on
    /// failure.
    pub fn submit_draft(&mut self) -> Result<SubmitReceipt, ChatError> {
        let text = self.input.text().to_string();
        self.submit(&text)
    }

    /// Append the user message and its assistant placeholder, send the
    /// request, and clear the draft.
    ///
    /// # Errors
    /// - [`ChatError::TransportClosed`] when the transport task has exited.
    /// - [`ChatError::NotOpen`] unless the connection is `Open`.
    /// - [`ChatError::InputTooLong`] / [`ChatError::EmptyInput`] for bad text.
    ///
    /// The thread is unchanged on every error.
    pub fn submit(&mut self, text: &str) -> Result<SubmitReceipt, ChatError> {
        if self.transport.is_closed() {
            return Err(ChatError::TransportClosed);
        }
        let status = self.status();
        if !status.is_open() {
            return Err(ChatError::NotOpen(status));
        }
        self.input.check(text)?;

        let (request, receipt) = self.reconciler.submit(text)?;
        self.transport.send(request)?;
        self.input.clear();
        Ok(receipt)
    }

    pub fn apply_fragment(&mut self, event: &InboundFragment) -> FragmentOutcome {
        self.reconciler.on_fragment(event)
    }
}
