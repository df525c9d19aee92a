//! # Channel Naming & Registration Records
//!
//! Both sides derive channel names from `(class, method)` with the same pure
//! function, so no coordination beyond discovery is needed.
//!
//! ## Layout
//!
//! - `exobind:discover` carries "who has class X" requests.
//! - `exobind:registration` carries [`ApiRegistration`] replies.
//! - `exobind:discover-oneway` and `exobind:registration-oneway` are the same
//!   pair for one-way APIs, so a call-style binder never resolves against a
//!   class that is only exposed one-way (and the other way around).
//! - `exobind:api:<len>:<class>:<method>` carries calls to one method. The
//!   byte length of the class name makes the mapping injective even when
//!   class names contain `:`.

use serde::Deserialize;
use serde::Serialize;

use crate::proxy::Mode;

/// Reserved channel for discovery requests. Payload: `[className]`.
pub const DISCOVERY_REQUEST: &str = "exobind:discover";

/// Reserved channel for discovery replies. Payload: `[ApiRegistration]`.
pub const DISCOVERY_REPLY: &str = "exobind:registration";

/// [`DISCOVERY_REQUEST`] for one-way APIs.
pub const ONEWAY_DISCOVERY_REQUEST: &str = "exobind:discover-oneway";

/// [`DISCOVERY_REPLY`] for one-way APIs.
pub const ONEWAY_DISCOVERY_REPLY: &str = "exobind:registration-oneway";

const API_PREFIX: &str = "exobind:api:";

/// The channel carrying discovery requests for APIs exposed in `mode`.
pub fn discovery_request(mode: Mode) -> &'static str {
    match mode {
        Mode::Call => DISCOVERY_REQUEST,
        Mode::Send => ONEWAY_DISCOVERY_REQUEST,
    }
}

/// The channel carrying registrations of APIs exposed in `mode`.
pub fn discovery_reply(mode: Mode) -> &'static str {
    match mode {
        Mode::Call => DISCOVERY_REPLY,
        Mode::Send => ONEWAY_DISCOVERY_REPLY,
    }
}

/// Marker for methods that are never exposed.
pub const PRIVATE_PREFIX: char = '_';

/// Maps a class and method name to the channel carrying calls to that method.
pub fn to_channel_name(class_name: &str, method_name: &str) -> String {
    format!("{}{}:{}:{}", API_PREFIX, class_name.len(), class_name, method_name)
}

/// Inverts [`to_channel_name`]. Returns `None` for names outside the api namespace.
pub fn parse_channel_name(channel: &str) -> Option<(&str, &str)> {
    let rest = channel.strip_prefix(API_PREFIX)?;
    let (len, rest) = rest.split_once(':')?;
    let len: usize = len.parse().ok()?;
    let class_name = rest.get(..len)?;
    let method_name = rest.get(len..)?.strip_prefix(':')?;
    Some((class_name, method_name))
}

/// Whether a method name is private by convention and must not be exposed.
pub fn is_private_method(method_name: &str) -> bool {
    method_name.starts_with(PRIVATE_PREFIX)
}

/// The record a process sends to announce that it exposes a class.
///
/// Immutable once created. `method_names` keeps declaration order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiRegistration {
    pub class_name: String,
    pub method_names: Vec<String>,
}

impl ApiRegistration {
    /// Builds a registration from a method list, dropping private methods.
    pub fn new<'a>(class_name: &str, methods: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            class_name: class_name.to_string(),
            method_names: methods
                .into_iter()
                .filter(|name| !is_private_method(name))
                .map(str::to_string)
                .collect(),
        }
    }

    pub fn has_method(&self, method_name: &str) -> bool {
        self.method_names.iter().any(|m| m == method_name)
    }

    /// Channel names for every registered method, in registration order.
    pub fn channel_names(&self) -> impl Iterator<Item = (&str, String)> + '_ {
        self.method_names
            .iter()
            .map(|m| (m.as_str(), to_channel_name(&self.class_name, m)))
    }
}
