//! Streaming chat client core.
//!
//! - [`transport`]: WebSocket connection with reconnects and a JSON frame codec.
//! - [`reconciler`]: merges streamed reply fragments into an ordered thread.
//! - [`controller`]: owns the thread and the input draft, gates submission on
//!   the connection being open.

pub mod cli;
pub mod config;
pub mod controller;
pub mod error;
pub mod message;
pub mod reconciler;
pub mod transport;

pub use controller::{ChatController, ChatOptions};
pub use error::{ChatError, ConfigError, TransportError};
pub use message::{DisplayMessage, InboundFragment, OutboundRequest, Sender};
pub use reconciler::{CompletionPolicy, FragmentOutcome, Reconciler, SubmitReceipt};
pub use transport::{ConnectionState, ReconnectPolicy, Transport, TransportHandle};
