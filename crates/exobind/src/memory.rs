//! # In-Memory Channel
//!
//! Two connected [`Channel`] ends living in one process, built on tokio mpsc
//! queues. Used by the test suite and handy for wiring components that share
//! an address space.
//!
//! Each end owns a pump task that drains its inbound queue in order, so
//! messages on the same name are delivered in send order. Calls are answered
//! on spawned tasks, so one slow handler never stalls the queue.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::oneshot;

use crate::channel;
use crate::channel::CallHandler;
use crate::channel::Channel;
use crate::channel::ChannelError;
use crate::channel::Listener;

enum Envelope {
    Call {
        channel: String,
        args: Vec<Value>,
        reply: oneshot::Sender<channel::Result<Value>>,
    },
    Send {
        channel: String,
        args: Vec<Value>,
    },
}

/// Handlers and listeners installed on one end, plus outbound counters.
#[derive(Default)]
struct Registry {
    handlers: DashMap<String, CallHandler>,
    listeners: DashMap<String, Vec<Listener>>,
    sent: DashMap<String, usize>,
    closed: AtomicBool,
}

/// One end of an in-memory duplex channel.
///
/// Messages sent on one end are handled by the registry of the other.
/// Dropping an end closes it: pending and future calls against it fail with
/// [`ChannelError::ConnectionLost`].
pub struct MemoryChannel {
    endpoint_name: String,
    local: Arc<Registry>,
    tx: mpsc::UnboundedSender<Envelope>,
}

impl MemoryChannel {
    /// Creates a pair of connected ends and spawns their pump tasks.
    ///
    /// Must be called within a tokio runtime.
    pub fn pair() -> (Self, Self) {
        Self::named_pair("left", "right")
    }

    /// Like [`pair`](Self::pair), naming each end's remote for diagnostics.
    ///
    /// `left` is the end whose remote is `right_name`, and vice versa.
    pub fn named_pair(left_name: &str, right_name: &str) -> (Self, Self) {
        let (tx_to_right, rx_at_right) = mpsc::unbounded_channel();
        let (tx_to_left, rx_at_left) = mpsc::unbounded_channel();

        let left_registry = Arc::new(Registry::default());
        let right_registry = Arc::new(Registry::default());

        tokio::spawn(pump(left_name.to_string(), rx_at_left, left_registry.clone()));
        tokio::spawn(pump(right_name.to_string(), rx_at_right, right_registry.clone()));

        let left = Self {
            endpoint_name: right_name.to_string(),
            local: left_registry,
            tx: tx_to_right,
        };

        let right = Self {
            endpoint_name: left_name.to_string(),
            local: right_registry,
            tx: tx_to_left,
        };

        (left, right)
    }

    /// Closes this end. Inbound messages are refused from now on.
    pub fn close(&self) {
        self.local.closed.store(true, Ordering::SeqCst);
        self.local.handlers.clear();
        self.local.listeners.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.local.closed.load(Ordering::SeqCst)
    }

    /// Number of call handlers installed on this end.
    pub fn handler_count(&self) -> usize {
        self.local.handlers.len()
    }

    /// Number of listeners installed on this end for `channel`.
    pub fn listener_count(&self, channel: &str) -> usize {
        self.local.listeners.get(channel).map_or(0, |l| l.len())
    }

    /// Number of calls and sends this end has put on `channel`.
    pub fn sent_count(&self, channel: &str) -> usize {
        self.local.sent.get(channel).map_or(0, |c| *c)
    }

    fn enqueue(&self, envelope: Envelope) -> channel::Result<()> {
        if self.is_closed() {
            return Err(ChannelError::ConnectionLost(format!("local end to '{}' is closed", self.endpoint_name)));
        }
        let name = match &envelope {
            Envelope::Call { channel, .. } | Envelope::Send { channel, .. } => channel.clone(),
        };
        self.tx
            .send(envelope)
            .map_err(|_| ChannelError::ConnectionLost(format!("'{}' is gone", self.endpoint_name)))?;
        *self.local.sent.entry(name).or_insert(0) += 1;
        Ok(())
    }
}

impl Drop for MemoryChannel {
    fn drop(&mut self) {
        self.close();
    }
}

#[async_trait::async_trait]
impl Channel for MemoryChannel {
    fn endpoint_name(&self) -> &str {
        &self.endpoint_name
    }

    async fn call(&self, channel: &str, args: Vec<Value>) -> channel::Result<Value> {
        let (reply, rx) = oneshot::channel();
        self.enqueue(Envelope::Call {
            channel: channel.to_string(),
            args,
            reply,
        })?;

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(ChannelError::ConnectionLost(format!(
                "'{}' dropped the call on '{}'",
                self.endpoint_name, channel
            ))),
        }
    }

    fn send(&self, channel: &str, args: Vec<Value>) -> channel::Result<()> {
        self.enqueue(Envelope::Send {
            channel: channel.to_string(),
            args,
        })
    }

    fn handle(&self, channel: &str, handler: CallHandler) -> channel::Result<()> {
        match self.local.handlers.entry(channel.to_string()) {
            Entry::Occupied(_) => Err(ChannelError::HandlerExists(channel.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(handler);
                Ok(())
            }
        }
    }

    fn on(&self, channel: &str, listener: Listener) {
        self.local
            .listeners
            .entry(channel.to_string())
            .or_default()
            .push(listener);
    }

    fn remove_handler(&self, channel: &str) {
        self.local.handlers.remove(channel);
    }

    fn remove_all_listeners(&self, channel: &str) {
        self.local.listeners.remove(channel);
    }
}

/// Drains one end's inbound queue until the sending end is dropped.
async fn pump(name: String, mut rx: mpsc::UnboundedReceiver<Envelope>, registry: Arc<Registry>) {
    while let Some(envelope) = rx.recv().await {
        if registry.closed.load(Ordering::SeqCst) {
            if let Envelope::Call { reply, .. } = envelope {
                let _ = reply.send(Err(ChannelError::ConnectionLost(format!("'{}' is closed", name))));
            }
            continue;
        }

        match envelope {
            Envelope::Call { channel, args, reply } => {
                // Clone out of the map so no shard lock is held while the handler runs.
                let handler = registry.handlers.get(&channel).map(|h| h.value().clone());
                let Some(handler) = handler else {
                    let _ = reply.send(Err(ChannelError::NoHandler(channel)));
                    continue;
                };
                let pending = handler(args);
                tokio::spawn(async move {
                    // Ignore if the caller stopped waiting.
                    let _ = reply.send(pending.await);
                });
            }
            Envelope::Send { channel, args } => {
                let listeners = registry
                    .listeners
                    .get(&channel)
                    .map(|l| l.value().clone())
                    .unwrap_or_default();
                if listeners.is_empty() {
                    tracing::trace!(endpoint = %name, %channel, "message without listeners dropped");
                }
                for listener in listeners {
                    listener(args.clone());
                }
            }
        }
    }

    tracing::debug!(endpoint = %name, "memory channel pump stopped");
}
