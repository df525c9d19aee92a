//! # Exposure
//!
//! Makes an [`Api`] callable from every attached endpoint.
//!
//! Exposure is idempotent per class name and mode. The first call records the
//! API in the runtime; handlers are installed on every endpoint attached now
//! or later, and the registration is announced so binders already waiting on
//! the other side resolve without a fresh discovery round.
//!
//! An exposure that fails to install on some endpoint is rolled back
//! everywhere and forgotten, so it can be retried.
//!
//! One-way methods run one message at a time per installed listener, in the
//! order the channel delivered them.

use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::Weak;

use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::BoxFuture;
use neorestore::ClassLookup;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::api::Api;
use crate::api::ApiError;
use crate::channel::CallHandler;
use crate::channel::ChannelError;
use crate::channel::Listener;
use crate::naming::ApiRegistration;
use crate::naming::discovery_reply;
use crate::proxy::Mode;
use crate::runtime::Endpoint;
use crate::runtime::EndpointId;
use crate::runtime::FaultReport;
use crate::runtime::Inner;
use crate::runtime::Runtime;

#[derive(Debug, thiserror::Error)]
pub enum ExposeError {
    /// A channel refused a handler, usually because something else already
    /// handles that name.
    #[error("installing '{class_name}' on {endpoint}: {source}")]
    Install {
        class_name: String,
        endpoint: EndpointId,
        source: ChannelError,
    },
}

pub type Result<T> = std::result::Result<T, ExposeError>;

/// Decodes raw arguments and runs one method of an exposed API.
type Invoker = Arc<dyn Fn(String, Vec<Value>) -> BoxFuture<'static, std::result::Result<Value, ApiError>> + Send + Sync>;

/// An exposed API as the runtime stores it.
#[derive(Clone)]
pub(crate) struct Exposure {
    pub(crate) registration: ApiRegistration,
    pub(crate) mode: Mode,
    invoker: Invoker,
}

impl Runtime {
    /// Exposes `api` for request/response calls.
    ///
    /// `lookup` restores class instances found in incoming arguments.
    /// Exposing a class name that is already exposed is a no-op.
    pub fn expose<A: Api>(&self, api: Arc<A>, lookup: Option<Arc<dyn ClassLookup>>) -> Result<()> {
        self.expose_with_mode(api, lookup, Mode::Call)
    }

    /// Exposes `api` for one-way messages. Return values are dropped and
    /// failures only reach the local error logger.
    pub fn expose_oneway<A: Api>(&self, api: Arc<A>, lookup: Option<Arc<dyn ClassLookup>>) -> Result<()> {
        self.expose_with_mode(api, lookup, Mode::Send)
    }

    fn expose_with_mode<A: Api>(&self, api: Arc<A>, lookup: Option<Arc<dyn ClassLookup>>, mode: Mode) -> Result<()> {
        let key = (A::CLASS_NAME.to_string(), mode);
        let exposure = match self.inner.exposed.entry(key.clone()) {
            Entry::Occupied(_) => {
                tracing::debug!(class = A::CLASS_NAME, ?mode, "already exposed");
                return Ok(());
            }
            Entry::Vacant(slot) => slot.insert(Exposure::new(api, lookup, mode)).value().clone(),
        };

        let endpoints: Vec<(EndpointId, Arc<Endpoint>)> = self
            .inner
            .endpoints
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        for (id, endpoint) in &endpoints {
            if let Err(e) = exposure.install(&self.inner, *id, endpoint) {
                self.inner.exposed.remove(&key);
                for (_, endpoint) in &endpoints {
                    exposure.uninstall(endpoint);
                }
                tracing::warn!(class = A::CLASS_NAME, ?mode, error = %e, "exposure rolled back");
                return Err(e);
            }
        }
        for (id, endpoint) in &endpoints {
            exposure.announce(*id, endpoint);
        }

        tracing::debug!(
            class = A::CLASS_NAME,
            ?mode,
            methods = ?exposure.registration.method_names,
            endpoints = endpoints.len(),
            "exposed"
        );
        Ok(())
    }
}

impl Exposure {
    fn new<A: Api>(api: Arc<A>, lookup: Option<Arc<dyn ClassLookup>>, mode: Mode) -> Self {
        let registration = ApiRegistration::new(A::CLASS_NAME, A::METHODS.iter().copied());
        let invoker: Invoker = Arc::new(move |method: String, args: Vec<Value>| {
            let api = api.clone();
            let lookup = lookup.clone();
            async move {
                let args = args
                    .into_iter()
                    .map(|arg| neorestore::decode(arg, lookup.as_deref()))
                    .collect();
                api.dispatch(&method, args).await
            }
            .boxed()
        });

        Self {
            registration,
            mode,
            invoker,
        }
    }

    /// Installs a handler (or listener) for every registered method on one
    /// endpoint. Names already installed there are skipped.
    pub(crate) fn install(&self, inner: &Arc<Inner>, id: EndpointId, endpoint: &Endpoint) -> Result<()> {
        for (method, channel_name) in self.registration.channel_names() {
            let target = Target {
                runtime: Arc::downgrade(inner),
                endpoint: id,
                class_name: self.registration.class_name.clone(),
                method: method.to_string(),
                channel_name: channel_name.clone(),
                invoker: self.invoker.clone(),
            };

            match self.mode {
                Mode::Call => {
                    if !endpoint.handlers.insert(channel_name.clone()) {
                        continue;
                    }
                    if let Err(source) = endpoint.channel.handle(&channel_name, target.into_handler()) {
                        endpoint.handlers.remove(&channel_name);
                        return Err(ExposeError::Install {
                            class_name: self.registration.class_name.clone(),
                            endpoint: id,
                            source,
                        });
                    }
                }
                Mode::Send => {
                    if !endpoint.listeners.insert(channel_name.clone()) {
                        continue;
                    }
                    endpoint.channel.on(&channel_name, target.into_listener());
                }
            }
        }
        Ok(())
    }

    /// Removes what [`install`](Self::install) put on one endpoint. Names the
    /// runtime did not install there are left alone.
    pub(crate) fn uninstall(&self, endpoint: &Endpoint) {
        for (_, channel_name) in self.registration.channel_names() {
            match self.mode {
                Mode::Call => {
                    if endpoint.handlers.remove(&channel_name).is_some() {
                        endpoint.channel.remove_handler(&channel_name);
                    }
                }
                Mode::Send => {
                    if endpoint.listeners.remove(&channel_name).is_some() {
                        endpoint.channel.remove_all_listeners(&channel_name);
                    }
                }
            }
        }
    }

    /// Sends the registration to the remote side of one endpoint, on the
    /// reply channel of its mode.
    pub(crate) fn announce(&self, id: EndpointId, endpoint: &Endpoint) {
        let payload = match serde_json::to_value(&self.registration) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(endpoint = %id, error = %e, "failed to encode registration");
                return;
            }
        };
        if let Err(e) = endpoint.channel.send(discovery_reply(self.mode), vec![payload]) {
            tracing::warn!(endpoint = %id, class = %self.registration.class_name, error = %e, "failed to announce registration");
        }
    }
}

/// Everything one installed handler needs to run a method and report on it.
#[derive(Clone)]
struct Target {
    runtime: Weak<Inner>,
    endpoint: EndpointId,
    class_name: String,
    method: String,
    channel_name: String,
    invoker: Invoker,
}

impl Target {
    fn report(&self, error: &anyhow::Error) {
        let report = FaultReport {
            endpoint: self.endpoint,
            class_name: &self.class_name,
            method: &self.method,
            error,
        };
        match self.runtime.upgrade() {
            Some(inner) => inner.report_fault(&report),
            None => tracing::error!(class = %self.class_name, method = %self.method, error = %format!("{error:#}"), "exposed method failed"),
        }
    }

    fn into_handler(self) -> CallHandler {
        let target = Arc::new(self);
        Arc::new(move |args: Vec<Value>| {
            let target = target.clone();
            async move {
                match (target.invoker)(target.method.clone(), args).await {
                    Ok(reply) => Ok(reply),
                    Err(ApiError::Relayed(relayed)) => Ok(neorestore::encode_relayed(relayed.into_payload())),
                    Err(ApiError::Fault(error)) => {
                        target.report(&error);
                        Err(ChannelError::HandlerFailed(format!(
                            "error invoking remote method '{}': {:#}",
                            target.channel_name, error
                        )))
                    }
                }
            }
            .boxed()
        })
    }

    /// Queues each message for a worker task that runs them in arrival
    /// order. The worker starts with the first message and stops once the
    /// listener is dropped and the queue drained.
    fn into_listener(self) -> Listener {
        let target = Arc::new(self);
        let queue: OnceLock<mpsc::UnboundedSender<Vec<Value>>> = OnceLock::new();
        Arc::new(move |args: Vec<Value>| {
            let sender = queue.get_or_init(|| {
                let (sender, receiver) = mpsc::unbounded_channel();
                tokio::spawn(target.clone().drain(receiver));
                sender
            });
            if sender.send(args).is_err() {
                tracing::warn!(class = %target.class_name, method = %target.method, "one-way worker gone, message dropped");
            }
        })
    }

    async fn drain(self: Arc<Self>, mut receiver: mpsc::UnboundedReceiver<Vec<Value>>) {
        while let Some(args) = receiver.recv().await {
            match (self.invoker)(self.method.clone(), args).await {
                Ok(_) => {}
                Err(ApiError::Relayed(relayed)) => tracing::warn!(
                    class = %self.class_name,
                    method = %self.method,
                    payload = %relayed,
                    "one-way method relayed an error nobody is waiting for"
                ),
                Err(ApiError::Fault(error)) => self.report(&error),
            }
        }
    }
}
