//! # Runtime
//!
//! The context object behind exposure and binding. Owns the attached
//! endpoints, the exposed APIs, the registration cache filled by discovery,
//! and the table of bound proxies.
//!
//! Uses DashMap throughout so exposures, binds and channel deliveries can run
//! concurrently on a multi-threaded executor. Listeners installed on channels
//! hold a weak reference back to the runtime; dropping every [`Runtime`]
//! handle turns them into no-ops, and [`Runtime::close`] removes them.

use std::sync::Arc;
use std::sync::PoisonError;
use std::sync::RwLock;
use std::sync::Weak;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use dashmap::DashSet;
use serde_json::Value;
use tokio::sync::Notify;
use tokio::sync::OnceCell;

use crate::channel::Channel;
use crate::config::Config;
use crate::expose::Exposure;
use crate::naming::ApiRegistration;
use crate::naming::discovery_reply;
use crate::naming::discovery_request;
use crate::proxy::Mode;
use crate::proxy::Proxy;

/// Strong type for attached endpoint identifiers.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct EndpointId(pub u64);

impl std::fmt::Display for EndpointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "endpoint-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("endpoint not found: {0}")]
    EndpointNotFound(EndpointId),
}

pub type Result<T> = std::result::Result<T, Error>;

/// What the error logger learns about a host-side fault.
#[derive(Debug)]
pub struct FaultReport<'a> {
    pub endpoint: EndpointId,
    pub class_name: &'a str,
    pub method: &'a str,
    pub error: &'a anyhow::Error,
}

/// Receives every host-side fault raised by an exposed method, once.
pub type ErrorLogger = Arc<dyn Fn(&FaultReport<'_>) + Send + Sync>;

/// An attached channel and the names the runtime installed on it.
pub(crate) struct Endpoint {
    pub(crate) channel: Arc<dyn Channel>,
    pub(crate) handlers: DashSet<String>,
    pub(crate) listeners: DashSet<String>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub(crate) struct BindKey {
    pub(crate) endpoint: EndpointId,
    pub(crate) class_name: String,
    pub(crate) mode: Mode,
}

pub(crate) struct Inner {
    config: RwLock<Config>,
    error_logger: RwLock<Option<ErrorLogger>>,
    pub(crate) endpoints: DashMap<EndpointId, Arc<Endpoint>>,
    pub(crate) exposed: DashMap<(String, Mode), Exposure>,
    pub(crate) discovered: DashMap<(EndpointId, String, Mode), ApiRegistration>,
    pub(crate) bound: DashMap<BindKey, Arc<OnceCell<Proxy>>>,
    /// Signalled whenever a registration lands in `discovered`.
    pub(crate) registrations: Notify,
    next_endpoint_id: AtomicU64,
}

impl Inner {
    pub(crate) fn config(&self) -> Config {
        *self.config.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn endpoint(&self, id: EndpointId) -> Result<Arc<Endpoint>> {
        self.endpoints
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(Error::EndpointNotFound(id))
    }

    pub(crate) fn registration(&self, endpoint: EndpointId, class_name: &str, mode: Mode) -> Option<ApiRegistration> {
        self.discovered
            .get(&(endpoint, class_name.to_string(), mode))
            .map(|entry| entry.value().clone())
    }

    /// Logs a fault and hands it to the error logger.
    pub(crate) fn report_fault(&self, report: &FaultReport<'_>) {
        tracing::error!(
            endpoint = %report.endpoint,
            class = report.class_name,
            method = report.method,
            error = %format!("{:#}", report.error),
            "exposed method failed"
        );
        let logger = self.error_logger.read().unwrap_or_else(PoisonError::into_inner).clone();
        if let Some(logger) = logger {
            logger(report);
        }
    }
}

/// Context for exposing APIs to, and binding APIs from, attached endpoints.
///
/// Cloning is cheap; clones share all state.
#[derive(Clone)]
pub struct Runtime {
    pub(crate) inner: Arc<Inner>,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    /// Creates a runtime with the default configuration.
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Self {
            inner: Arc::new(Inner {
                config: RwLock::new(config),
                error_logger: RwLock::new(None),
                endpoints: DashMap::new(),
                exposed: DashMap::new(),
                discovered: DashMap::new(),
                bound: DashMap::new(),
                registrations: Notify::new(),
                next_endpoint_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::default()
    }

    pub fn config(&self) -> Config {
        self.inner.config()
    }

    /// Replaces the configuration. Affects binds started afterwards.
    pub fn set_config(&self, config: Config) {
        *self.inner.config.write().unwrap_or_else(PoisonError::into_inner) = config;
    }

    /// Installs the process-wide fault sink, replacing any previous one.
    pub fn set_error_logger(&self, logger: impl Fn(&FaultReport<'_>) + Send + Sync + 'static) {
        *self.inner.error_logger.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(logger));
    }

    /// Connects a channel to this runtime.
    ///
    /// Installs the discovery listeners and every API exposed so far, then
    /// announces those APIs to the remote side.
    pub fn attach(&self, channel: Arc<dyn Channel>) -> EndpointId {
        let id = EndpointId(self.inner.next_endpoint_id.fetch_add(1, Ordering::Relaxed));
        let endpoint = Arc::new(Endpoint {
            channel,
            handlers: DashSet::new(),
            listeners: DashSet::new(),
        });
        self.inner.endpoints.insert(id, endpoint.clone());

        install_discovery(&self.inner, id, &endpoint);

        let exposures: Vec<Exposure> = self.inner.exposed.iter().map(|entry| entry.value().clone()).collect();
        for exposure in &exposures {
            if let Err(e) = exposure.install(&self.inner, id, &endpoint) {
                exposure.uninstall(&endpoint);
                tracing::warn!(endpoint = %id, class = %exposure.registration.class_name, error = %e, "failed to install exposure");
                continue;
            }
            exposure.announce(id, &endpoint);
        }

        tracing::debug!(endpoint = %id, remote = endpoint.channel.endpoint_name(), "endpoint attached");
        id
    }

    /// Disconnects an endpoint.
    ///
    /// Removes everything the runtime installed on its channel and evicts the
    /// cached registrations and bound proxies for it. Proxies already handed
    /// out keep their channel and keep working as long as it does.
    pub fn detach(&self, id: EndpointId) -> Result<()> {
        let (_, endpoint) = self.inner.endpoints.remove(&id).ok_or(Error::EndpointNotFound(id))?;

        for name in endpoint.handlers.iter() {
            endpoint.channel.remove_handler(&name);
        }
        for name in endpoint.listeners.iter() {
            endpoint.channel.remove_all_listeners(&name);
        }

        self.inner.discovered.retain(|(owner, _, _), _| *owner != id);
        self.inner.bound.retain(|key, _| key.endpoint != id);

        tracing::debug!(endpoint = %id, "endpoint detached");
        Ok(())
    }

    /// Detaches every endpoint and forgets every exposure.
    pub fn close(&self) {
        let ids: Vec<EndpointId> = self.inner.endpoints.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            // Concurrent detach may have won the race.
            let _ = self.detach(id);
        }
        self.inner.exposed.clear();
        self.inner.discovered.clear();
        self.inner.bound.clear();
    }

    pub fn endpoints(&self) -> Vec<EndpointId> {
        let mut ids: Vec<EndpointId> = self.inner.endpoints.iter().map(|entry| *entry.key()).collect();
        ids.sort();
        ids
    }

    /// Whether `class_name` is exposed in `mode` by this runtime.
    pub fn is_exposed(&self, class_name: &str, mode: Mode) -> bool {
        self.inner.exposed.contains_key(&(class_name.to_string(), mode))
    }

    /// The registration `endpoint` announced for `class_name` exposed in
    /// `mode`, if it arrived.
    pub fn discovered(&self, endpoint: EndpointId, class_name: &str, mode: Mode) -> Option<ApiRegistration> {
        self.inner.registration(endpoint, class_name, mode)
    }
}

/// Answers discovery requests from the remote and collects its replies, one
/// channel pair per mode.
fn install_discovery(inner: &Arc<Inner>, id: EndpointId, endpoint: &Arc<Endpoint>) {
    for mode in [Mode::Call, Mode::Send] {
        let weak = Arc::downgrade(inner);
        endpoint.channel.on(
            discovery_request(mode),
            Arc::new(move |args: Vec<Value>| answer_discovery(&weak, id, mode, args)),
        );
        endpoint.listeners.insert(discovery_request(mode).to_string());

        let weak = Arc::downgrade(inner);
        endpoint.channel.on(
            discovery_reply(mode),
            Arc::new(move |args: Vec<Value>| collect_registration(&weak, id, mode, args)),
        );
        endpoint.listeners.insert(discovery_reply(mode).to_string());
    }
}

fn answer_discovery(weak: &Weak<Inner>, id: EndpointId, mode: Mode, args: Vec<Value>) {
    let Some(inner) = weak.upgrade() else { return };
    let Some(class_name) = args.first().and_then(Value::as_str) else {
        tracing::warn!(endpoint = %id, ?mode, "malformed discovery request");
        return;
    };

    let exposure = inner
        .exposed
        .get(&(class_name.to_string(), mode))
        .map(|entry| entry.value().clone());

    // Unknown classes get no reply; the binder keeps waiting until it times out.
    let Some(exposure) = exposure else {
        tracing::debug!(endpoint = %id, class = class_name, ?mode, "discovery request for unexposed class");
        return;
    };
    if let Ok(endpoint) = inner.endpoint(id) {
        exposure.announce(id, &endpoint);
    }
}

fn collect_registration(weak: &Weak<Inner>, id: EndpointId, mode: Mode, args: Vec<Value>) {
    let Some(inner) = weak.upgrade() else { return };
    let Some(payload) = args.into_iter().next() else {
        tracing::warn!(endpoint = %id, "empty discovery reply");
        return;
    };

    match serde_json::from_value::<ApiRegistration>(payload) {
        Ok(registration) => {
            tracing::debug!(endpoint = %id, class = %registration.class_name, ?mode, "registration received");
            inner
                .discovered
                .insert((id, registration.class_name.clone(), mode), registration);
            inner.registrations.notify_waiters();
        }
        Err(e) => tracing::warn!(endpoint = %id, error = %e, "malformed discovery reply"),
    }
}

/// Fluent builder for a [`Runtime`].
#[derive(Default)]
pub struct RuntimeBuilder {
    config: Option<Config>,
    error_logger: Option<ErrorLogger>,
}

impl RuntimeBuilder {
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    pub fn error_logger(mut self, logger: impl Fn(&FaultReport<'_>) + Send + Sync + 'static) -> Self {
        self.error_logger = Some(Arc::new(logger));
        self
    }

    pub fn build(self) -> Runtime {
        let runtime = Runtime::with_config(self.config.unwrap_or_default());
        if let Some(logger) = self.error_logger {
            *runtime.inner.error_logger.write().unwrap_or_else(PoisonError::into_inner) = Some(logger);
        }
        runtime
    }
}
