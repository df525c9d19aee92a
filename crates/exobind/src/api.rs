//! # Exposable APIs
//!
//! An [`Api`] is an object whose public async methods can be called from the
//! other side of a channel. Implementations are usually generated with
//! [`api!`](crate::api!), which turns a list of method signatures into a
//! dispatcher that restores arguments and encodes the return value.
//!
//! ```ignore
//! struct Greeter;
//!
//! impl Greeter {
//!     async fn hello(&self, name: String) -> Result<String, ApiError> {
//!         if name.is_empty() {
//!             return Err(RelayedError::from("bad name").into());
//!         }
//!         Ok(format!("Hi, {name}"))
//!     }
//! }
//!
//! exobind::api!(impl Greeter as "Greeter" {
//!     async fn hello(&self, name: String) -> String;
//! });
//! ```

use futures::future::BoxFuture;
use neorestore::Restorable;
use neorestore::Restored;
use serde_json::Value;

/// An object that can be exposed to remote callers.
pub trait Api: Send + Sync + 'static {
    /// Name remote callers bind to.
    const CLASS_NAME: &'static str;

    /// Callable methods in declaration order. Names starting with `_` are
    /// filtered out at exposure and never reachable remotely.
    const METHODS: &'static [&'static str];

    /// Runs `method` with already-restored arguments and returns the encoded result.
    fn dispatch<'a>(&'a self, method: &'a str, args: Vec<Restored>) -> BoxFuture<'a, Result<Value, ApiError>>;
}

/// How an exposed method fails.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// A deliberate rejection whose payload is handed to the caller.
    #[error("relayed: {0}")]
    Relayed(#[from] RelayedError),
    /// A host-side fault. Reported to the error logger; the caller only learns
    /// that the invocation failed.
    #[error(transparent)]
    Fault(#[from] anyhow::Error),
}

impl ApiError {
    /// Relays `payload` to the caller. Falls back to a fault if it cannot be encoded.
    pub fn relay<T: Restorable>(payload: &T) -> Self {
        match RelayedError::new(payload) {
            Ok(relayed) => Self::Relayed(relayed),
            Err(e) => Self::Fault(anyhow::Error::new(e).context("encoding relayed error payload")),
        }
    }

    pub fn fault(message: impl std::fmt::Display + std::fmt::Debug + Send + Sync + 'static) -> Self {
        Self::Fault(anyhow::Error::msg(message))
    }

    pub fn unknown_method(class_name: &str, method: &str) -> Self {
        Self::Fault(anyhow::anyhow!("'{class_name}' has no method '{method}'"))
    }

    pub fn is_relayed(&self) -> bool {
        matches!(self, Self::Relayed(_))
    }
}

/// A failure meant to cross the channel as-is.
///
/// The payload is stored encoded, so class instances inside it are tagged
/// and restore on the caller's side.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{payload}")]
pub struct RelayedError {
    payload: Value,
}

impl RelayedError {
    pub fn new<T: Restorable>(payload: &T) -> neorestore::Result<Self> {
        Ok(Self {
            payload: payload.encode()?,
        })
    }

    /// Wraps an already encoded payload.
    pub fn from_value(payload: Value) -> Self {
        Self { payload }
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn into_payload(self) -> Value {
        self.payload
    }
}

impl From<&str> for RelayedError {
    fn from(message: &str) -> Self {
        Self::from_value(Value::from(message))
    }
}

impl From<String> for RelayedError {
    fn from(message: String) -> Self {
        Self::from_value(Value::from(message))
    }
}

/// Takes the next positional argument. Absent trailing arguments restore from null.
#[doc(hidden)]
pub fn restore_arg<T: Restorable>(
    args: &mut std::vec::IntoIter<Restored>,
    method: &str,
    name: &str,
) -> Result<T, ApiError> {
    let value = args.next().unwrap_or(Restored::Null);
    T::restore(value)
        .map_err(|e| ApiError::Fault(anyhow::Error::new(e).context(format!("argument '{name}' of '{method}'"))))
}

#[doc(hidden)]
pub fn encode_return<T: Restorable>(value: &T, method: &str) -> Result<Value, ApiError> {
    value
        .encode()
        .map_err(|e| ApiError::Fault(anyhow::Error::new(e).context(format!("return value of '{method}'"))))
}

/// Implements [`Api`] for a type from the signatures of its exposed methods.
///
/// Each listed method must exist as an inherent `async fn(&self, ..)`
/// returning `Result<T, ApiError>` where `T` and every argument type are
/// [`Restorable`]. The signature in the macro names `T` directly.
#[macro_export]
macro_rules! api {
    (impl $ty:ty as $name:literal {
        $( async fn $method:ident(&self $(, $arg:ident : $arg_ty:ty)* $(,)?) $(-> $ret:ty)? ; )*
    }) => {
        impl $crate::Api for $ty {
            const CLASS_NAME: &'static str = $name;
            const METHODS: &'static [&'static str] = &[$(stringify!($method)),*];

            fn dispatch<'a>(
                &'a self,
                method: &'a str,
                args: ::std::vec::Vec<$crate::Restored>,
            ) -> $crate::BoxFuture<'a, ::std::result::Result<$crate::Value, $crate::ApiError>> {
                ::std::boxed::Box::pin(async move {
                    #[allow(unused_mut, unused_variables)]
                    let mut args = args.into_iter();
                    $(
                        if method == stringify!($method) {
                            $(
                                let $arg: $arg_ty = $crate::api::restore_arg(
                                    &mut args,
                                    stringify!($method),
                                    stringify!($arg),
                                )?;
                            )*
                            let value $(: $ret)? = self.$method($($arg),*).await?;
                            return $crate::api::encode_return(&value, stringify!($method));
                        }
                    )*
                    Err($crate::ApiError::unknown_method($name, method))
                })
            }
        }
    };
}
