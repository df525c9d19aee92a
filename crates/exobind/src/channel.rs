//! # Channel Abstraction
//!
//! The minimal messaging interface exobind needs from its transport.
//!
//! ## Philosophy
//!
//! - **Name-Addressed**: Every message travels on a named channel. The
//!   channel knows nothing about classes, methods or restoration; it moves
//!   JSON argument lists.
//! - **Two Shapes**: A request/response `call` answered by at most one
//!   `handle`r, and a fire-and-forget `send` delivered to every `on` listener.
//! - **Ordered Per Name**: Messages on one name arrive in send order. Nothing
//!   is promised across names.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

/// Errors surfaced by a channel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// The other end is gone or the connection dropped.
    #[error("connection lost: {0}")]
    ConnectionLost(String),
    /// A call arrived on a name nobody handles.
    #[error("no handler registered for '{0}'")]
    NoHandler(String),
    /// `handle` was called twice for the same name.
    #[error("a handler is already registered for '{0}'")]
    HandlerExists(String),
    /// The remote handler failed. Carries a description, not the original error.
    #[error("{0}")]
    HandlerFailed(String),
}

pub type Result<T> = std::result::Result<T, ChannelError>;

/// Responder for calls on one channel name.
pub type CallHandler = Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Listener for one-way messages on one channel name.
///
/// Listeners run on the delivery path and must not block; long work belongs
/// on a spawned task.
pub type Listener = Arc<dyn Fn(Vec<Value>) + Send + Sync>;

/// One end of a bidirectional connection to a remote endpoint.
///
/// This trait is designed to be object-safe (`Arc<dyn Channel>`).
#[async_trait::async_trait]
pub trait Channel: Send + Sync + 'static {
    /// Human-readable name of the remote endpoint, for diagnostics.
    fn endpoint_name(&self) -> &str;

    /// Sends a request and waits for the remote handler's reply.
    ///
    /// # invariants
    /// - Resolves exactly once per call.
    /// - A failing remote handler surfaces as `Err`, never as a reply value.
    async fn call(&self, channel: &str, args: Vec<Value>) -> Result<Value>;

    /// Fires a message at every remote listener of `channel`.
    fn send(&self, channel: &str, args: Vec<Value>) -> Result<()>;

    /// Installs the responder for calls arriving on `channel`.
    fn handle(&self, channel: &str, handler: CallHandler) -> Result<()>;

    /// Adds a listener for messages arriving on `channel`.
    fn on(&self, channel: &str, listener: Listener);

    /// Removes the responder for `channel`, if any.
    fn remove_handler(&self, channel: &str);

    /// Removes every listener for `channel`.
    fn remove_all_listeners(&self, channel: &str);
}
