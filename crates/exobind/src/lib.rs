//! # Exobind
//!
//! Call methods of an object living in another process as if it were local.
//!
//! One side *exposes* an object implementing [`Api`]; the other side *binds*
//! to it by class name and receives a [`Proxy`]. Calling a proxy method
//! encodes the arguments with [`neorestore`], sends them over a [`Channel`],
//! and restores the reply, so class instances survive the trip.
//!
//! ## Pieces
//!
//! - [`naming`]: how class and method names become channel names, and the
//!   registration record exchanged during discovery.
//! - [`channel`]: the transport interface. [`memory`] implements it in-process.
//! - [`Runtime`]: the context object owning endpoints, exposures and bindings.
//! - [`Proxy`]: the caller-side handle for a bound API.
//!
//! ## Failures
//!
//! An exposed method fails in one of two ways. Returning
//! [`ApiError::Relayed`] hands its payload to the caller as the rejection
//! reason. Any other error is a host-side fault: it is reported to the
//! runtime's error logger and reaches the caller as a generic channel failure.

pub mod api;
pub mod bind;
pub mod channel;
pub mod config;
pub mod expose;
pub mod memory;
pub mod naming;
pub mod proxy;
pub mod runtime;

#[cfg(test)]
mod tests;

pub use api::Api;
pub use api::ApiError;
pub use api::RelayedError;
pub use bind::BindError;
pub use channel::Channel;
pub use channel::ChannelError;
pub use config::Config;
pub use expose::ExposeError;
pub use memory::MemoryChannel;
pub use naming::ApiRegistration;
pub use proxy::Args;
pub use proxy::CallError;
pub use proxy::Mode;
pub use proxy::Proxy;
pub use runtime::EndpointId;
pub use runtime::FaultReport;
pub use runtime::Runtime;
pub use runtime::RuntimeBuilder;

pub use futures::future::BoxFuture;
pub use neorestore::ClassLookup;
pub use neorestore::ClassRegistry;
pub use neorestore::Restorable;
pub use neorestore::Restored;
pub use neorestore::Value;
