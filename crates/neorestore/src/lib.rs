//! # Neorestore
//!
//! A small, schema-tolerant encoding that lets class instances cross a
//! message channel and come back to life on the other side.
//!
//! ## Format
//!
//! The wire currency is a JSON value. Plain values travel unchanged. A class
//! instance travels as an object carrying its data fields plus two tag keys:
//!
//! ```text
//! { "__isRestorable": true, "className": "Point", "x": 1, "y": 2 }
//! ```
//!
//! The tagging is applied recursively to every array element and object
//! property. A relayed failure travels as
//! `{ "__isRelayedError": true, "payload": <encoded> }`.
//!
//! ## Restoration
//!
//! [`decode`] walks an encoded value and hands every tagged node to a
//! caller-supplied [`ClassLookup`]. A hit substitutes a live [`Instance`]; a
//! miss leaves the node as a structural object. Misses are never errors, so
//! processes built against different class vocabularies can still talk.
//!
//! [`Restorable`] layers a typed codec on top: rust types encode themselves
//! and restore from a [`Restored`] tree, with classes declared via [`class!`].

#[macro_use]
mod macros;

mod engine;
mod lookup;
mod restored;
mod traits;


pub use engine::Outcome;
pub use engine::decode;
pub use engine::decode_outcome;
pub use engine::encode;
pub use engine::encode_class;
pub use engine::encode_relayed;
pub use lookup::ClassLookup;
pub use lookup::ClassRegistry;
pub use restored::Fields;
pub use restored::Instance;
pub use restored::Restored;
pub use traits::Class;
pub use traits::Restorable;
pub use traits::restore_class;
pub use traits::take_field;

pub use serde_json::Map;
pub use serde_json::Number;
pub use serde_json::Value;

/// Tag key marking an object as an encoded class instance.
pub const RESTORABLE_KEY: &str = "__isRestorable";
/// Key holding the class name of an encoded instance.
pub const CLASS_NAME_KEY: &str = "className";
/// Tag key marking an encoded relayed error.
pub const RELAYED_ERROR_KEY: &str = "__isRelayedError";
/// Key holding the payload of an encoded relayed error.
pub const PAYLOAD_KEY: &str = "payload";

/// Encoding and typed restoration failures.
///
/// Restoration *misses* are not represented here: an unknown class name
/// degrades to a structural object instead of failing.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// The restored value has a different shape than the target type.
    #[error("expected {expected}, found {found}")]
    TypeMismatch { expected: &'static str, found: &'static str },
    /// A tagged instance names a different class than the target type.
    #[error("expected instance of '{expected}', found '{found}'")]
    ClassMismatch { expected: &'static str, found: String },
    /// A class field is absent and its type has no representation for absence.
    #[error("missing field '{field}' for class '{class}'")]
    MissingField { class: &'static str, field: &'static str },
    /// A class field is present but failed to restore.
    #[error("field '{field}' of class '{class}': {source}")]
    Field {
        class: &'static str,
        field: &'static str,
        source: Box<Error>,
    },
    /// A class declares a field that collides with a tag key.
    #[error("class '{class}' uses reserved field name '{field}'")]
    ReservedField { class: &'static str, field: String },
    /// An integer does not fit the target type.
    #[error("number {value} is out of range for {target}")]
    OutOfRange { value: String, target: &'static str },
    /// NaN and infinities have no JSON representation.
    #[error("non-finite float cannot be encoded")]
    NonFinite,
}

/// Specialized `Result` for restoration operations.
pub type Result<T> = std::result::Result<T, Error>;
