//! # Bound API Proxy
//!
//! The caller-side handle produced by [`Runtime::bind`](crate::Runtime::bind).
//! A proxy knows the remote registration, so it only offers the methods the
//! remote side actually exposed.
//!
//! ## Invariants
//!
//! - Arguments are encoded before anything touches the channel; an encode
//!   failure never produces a partial call.
//! - A reply tagged as a relayed error becomes [`CallError::Relayed`], never a value.
//! - A failing transport call surfaces as [`CallError::Channel`] unchanged.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use neorestore::ClassLookup;
use neorestore::Outcome;
use neorestore::Restorable;
use neorestore::Restored;
use serde_json::Value;

use crate::channel::Channel;
use crate::channel::ChannelError;
use crate::naming::ApiRegistration;
use crate::runtime::EndpointId;

/// How a bound API is invoked.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub enum Mode {
    /// Request/response; every call waits for a reply.
    Call,
    /// Fire-and-forget; invocations return once the message is queued.
    Send,
}

/// Errors from invoking a proxy method.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    /// The remote method rejected the call; carries the restored payload.
    #[error("{0}")]
    Relayed(Restored),
    /// The transport failed, including host-side faults on the remote.
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error("encoding argument {index}: {source}")]
    Encode { index: usize, source: neorestore::Error },
    #[error("restoring reply: {0}")]
    Restore(neorestore::Error),
    /// The method is not part of the remote registration.
    #[error("'{class_name}' has no remote method '{method}'")]
    UnknownMethod { class_name: String, method: String },
    #[error("'{class_name}' is bound for {bound:?} and cannot be invoked with {attempted:?}")]
    ModeMismatch {
        class_name: String,
        bound: Mode,
        attempted: Mode,
    },
}

impl CallError {
    /// The rejection payload, if the remote relayed one.
    pub fn relayed(&self) -> Option<&Restored> {
        match self {
            Self::Relayed(payload) => Some(payload),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, CallError>;

/// Positional arguments for a proxy invocation.
pub trait Args {
    fn encode_args(self) -> Result<Vec<Value>>;
}

/// Already encoded arguments pass through untouched.
impl Args for Vec<Value> {
    fn encode_args(self) -> Result<Vec<Value>> {
        Ok(self)
    }
}

macro_rules! tuple_args {
    ($($name:ident $idx:tt),*) => {
        impl<$($name: Restorable),*> Args for ($($name,)*) {
            fn encode_args(self) -> Result<Vec<Value>> {
                Ok(vec![$(
                    self.$idx
                        .encode()
                        .map_err(|source| CallError::Encode { index: $idx, source })?
                ),*])
            }
        }
    };
}

tuple_args!();
tuple_args!(A 0);
tuple_args!(A 0, B 1);
tuple_args!(A 0, B 1, C 2);
tuple_args!(A 0, B 1, C 2, D 3);
tuple_args!(A 0, B 1, C 2, D 3, E 4);
tuple_args!(A 0, B 1, C 2, D 3, E 4, F 5);

struct ProxyInner {
    endpoint: EndpointId,
    channel: Arc<dyn Channel>,
    registration: ApiRegistration,
    channels: HashMap<String, String>,
    mode: Mode,
    lookup: Option<Arc<dyn ClassLookup>>,
}

/// A local stand-in for an API exposed on a remote endpoint.
///
/// Cloning is cheap; clones are the same proxy (see [`Proxy::ptr_eq`]).
#[derive(Clone)]
pub struct Proxy {
    inner: Arc<ProxyInner>,
}

impl Proxy {
    pub(crate) fn new(
        endpoint: EndpointId,
        channel: Arc<dyn Channel>,
        registration: ApiRegistration,
        mode: Mode,
        lookup: Option<Arc<dyn ClassLookup>>,
    ) -> Self {
        let channels = registration
            .channel_names()
            .map(|(method, channel)| (method.to_string(), channel))
            .collect();

        Self {
            inner: Arc::new(ProxyInner {
                endpoint,
                channel,
                registration,
                channels,
                mode,
                lookup,
            }),
        }
    }

    pub fn class_name(&self) -> &str {
        &self.inner.registration.class_name
    }

    /// Remote method names, in the order the remote declared them.
    pub fn method_names(&self) -> &[String] {
        &self.inner.registration.method_names
    }

    pub fn has_method(&self, method: &str) -> bool {
        self.inner.channels.contains_key(method)
    }

    pub fn endpoint(&self) -> EndpointId {
        self.inner.endpoint
    }

    pub fn mode(&self) -> Mode {
        self.inner.mode
    }

    /// Whether both handles point at the same bound proxy.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Calls a remote method and restores its reply.
    pub async fn call(&self, method: &str, args: impl Args) -> Result<Restored> {
        let channel = self.channel_for(method, Mode::Call)?;
        let args = args.encode_args()?;

        let reply = self.inner.channel.call(channel, args).await?;
        match neorestore::decode_outcome(reply, self.inner.lookup.as_deref()) {
            Outcome::Value(value) => Ok(value),
            Outcome::Relayed(payload) => {
                tracing::debug!(class = %self.class_name(), method, "remote relayed an error");
                Err(CallError::Relayed(payload))
            }
        }
    }

    /// Like [`call`](Self::call), restoring the reply into `R`.
    pub async fn call_as<R: Restorable>(&self, method: &str, args: impl Args) -> Result<R> {
        let reply = self.call(method, args).await?;
        R::restore(reply).map_err(CallError::Restore)
    }

    /// Fires a one-way message at a remote method.
    pub fn send(&self, method: &str, args: impl Args) -> Result<()> {
        let channel = self.channel_for(method, Mode::Send)?;
        let args = args.encode_args()?;
        self.inner.channel.send(channel, args)?;
        Ok(())
    }

    fn channel_for(&self, method: &str, attempted: Mode) -> Result<&str> {
        if self.inner.mode != attempted {
            return Err(CallError::ModeMismatch {
                class_name: self.class_name().to_string(),
                bound: self.inner.mode,
                attempted,
            });
        }
        self.inner
            .channels
            .get(method)
            .map(String::as_str)
            .ok_or_else(|| CallError::UnknownMethod {
                class_name: self.class_name().to_string(),
                method: method.to_string(),
            })
    }
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proxy")
            .field("endpoint", &self.inner.endpoint)
            .field("class_name", &self.inner.registration.class_name)
            .field("methods", &self.inner.registration.method_names)
            .field("mode", &self.inner.mode)
            .finish()
    }
}
