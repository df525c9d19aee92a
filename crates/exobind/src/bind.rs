//! # Binding & Discovery
//!
//! Resolves a class name on a remote endpoint into a [`Proxy`].
//!
//! ## Protocol
//!
//! 1. If the registration for `(endpoint, class)` is already cached, build
//!    the proxy right away.
//! 2. Otherwise send one discovery request naming the class, then wait. The
//!    remote answers on the reply channel, or announces the class later when
//!    it gets exposed; either way the registration lands in the cache and
//!    wakes every waiter.
//! 3. Waiters re-check the cache at least once per retry interval and give
//!    up at the configured timeout.
//!
//! Call-style and one-way binds discover over separate channel pairs (see
//! [`naming`](crate::naming)), so each only resolves against an exposure of
//! its own mode.
//!
//! Concurrent binds for the same endpoint, class and mode share one
//! discovery and receive the same proxy.

use std::sync::Arc;
use std::time::Duration;

use neorestore::ClassLookup;
use serde_json::Value;
use tokio::sync::OnceCell;
use tokio::time::Instant;

use crate::channel::Channel;
use crate::channel::ChannelError;
use crate::naming::ApiRegistration;
use crate::config::MIN_RETRY_INTERVAL;
use crate::naming::discovery_request;
use crate::proxy::Mode;
use crate::proxy::Proxy;
use crate::runtime;
use crate::runtime::BindKey;
use crate::runtime::EndpointId;
use crate::runtime::Runtime;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BindError {
    /// No registration for the class arrived within the bind timeout.
    #[error("timed out after {waited:?} waiting for '{class_name}' on {endpoint}")]
    Timeout {
        class_name: String,
        endpoint: EndpointId,
        waited: Duration,
    },
    #[error(transparent)]
    Runtime(#[from] runtime::Error),
    /// The discovery request could not be sent.
    #[error("discovering '{class_name}' on {endpoint}: {source}")]
    Channel {
        class_name: String,
        endpoint: EndpointId,
        source: ChannelError,
    },
}

pub type Result<T> = std::result::Result<T, BindError>;

impl Runtime {
    /// Binds to a request/response API exposed on `endpoint`.
    ///
    /// `lookup` restores class instances found in replies. When a proxy for
    /// the same endpoint and class already exists it is returned as is,
    /// keeping the lookup it was first bound with.
    pub async fn bind(
        &self,
        endpoint: EndpointId,
        class_name: &str,
        lookup: Option<Arc<dyn ClassLookup>>,
    ) -> Result<Proxy> {
        self.bind_with_mode(endpoint, class_name, lookup, Mode::Call).await
    }

    /// Binds to a one-way API exposed on `endpoint`.
    pub async fn bind_oneway(
        &self,
        endpoint: EndpointId,
        class_name: &str,
        lookup: Option<Arc<dyn ClassLookup>>,
    ) -> Result<Proxy> {
        self.bind_with_mode(endpoint, class_name, lookup, Mode::Send).await
    }

    async fn bind_with_mode(
        &self,
        endpoint: EndpointId,
        class_name: &str,
        lookup: Option<Arc<dyn ClassLookup>>,
        mode: Mode,
    ) -> Result<Proxy> {
        let channel = self.inner.endpoint(endpoint)?.channel.clone();
        let key = BindKey {
            endpoint,
            class_name: class_name.to_string(),
            mode,
        };

        let cell: Arc<OnceCell<Proxy>> = self.inner.bound.entry(key).or_default().value().clone();

        let proxy = cell
            .get_or_try_init(|| async {
                let registration = self.discover(endpoint, &channel, class_name, mode).await?;
                tracing::debug!(%endpoint, class = class_name, ?mode, "bound");
                Ok::<_, BindError>(Proxy::new(endpoint, channel.clone(), registration, mode, lookup))
            })
            .await?;

        Ok(proxy.clone())
    }

    /// Waits for the registration of `class_name` exposed in `mode` on `endpoint`.
    async fn discover(
        &self,
        endpoint: EndpointId,
        channel: &Arc<dyn Channel>,
        class_name: &str,
        mode: Mode,
    ) -> Result<ApiRegistration> {
        if let Some(registration) = self.inner.registration(endpoint, class_name, mode) {
            return Ok(registration);
        }

        let config = self.config();
        let retry_interval = config.retry_interval.max(MIN_RETRY_INTERVAL);
        let started = Instant::now();
        let deadline = started + config.bind_timeout;

        tracing::debug!(%endpoint, class = class_name, ?mode, "sending discovery request");
        channel
            .send(discovery_request(mode), vec![Value::from(class_name)])
            .map_err(|source| BindError::Channel {
                class_name: class_name.to_string(),
                endpoint,
                source,
            })?;

        loop {
            // Register interest before checking, so a registration landing in
            // between still wakes us.
            let notified = self.inner.registrations.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(registration) = self.inner.registration(endpoint, class_name, mode) {
                return Ok(registration);
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::debug!(%endpoint, class = class_name, "discovery timed out");
                return Err(BindError::Timeout {
                    class_name: class_name.to_string(),
                    endpoint,
                    waited: now - started,
                });
            }

            let wake = (now + retry_interval).min(deadline);
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(wake) => {}
            }
        }
    }
}
