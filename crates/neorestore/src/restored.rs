//! The dynamic tree produced by [`decode`](crate::decode).

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Map;
use serde_json::Number;
use serde_json::Value;

use crate::Result;
use crate::traits::Class;

/// Object properties of a restored value, keyed by property name.
pub type Fields = BTreeMap<String, Restored>;

/// A decoded value whose tagged nodes may have been replaced by live instances.
#[derive(Clone, Debug, PartialEq)]
pub enum Restored {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Vec<Restored>),
    /// A plain object, or a tagged node no lookup could restore.
    Object(Fields),
    /// A live class instance.
    Instance(Instance),
}

impl Restored {
    /// Short name of the value's shape, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
            Self::Instance(_) => "instance",
        }
    }

    /// Lifts a JSON value without interpreting any tags.
    pub fn from_plain(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => Self::Number(n),
            Value::String(s) => Self::String(s),
            Value::Array(items) => Self::Array(items.into_iter().map(Self::from_plain).collect()),
            Value::Object(map) => Self::Object(
                map.into_iter()
                    .map(|(k, v)| (k, Self::from_plain(v)))
                    .collect(),
            ),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_instance(&self) -> Option<&Instance> {
        match self {
            Self::Instance(inst) => Some(inst),
            _ => None,
        }
    }

    /// Borrows the live instance if this node restored to a `T`.
    pub fn downcast_ref<T: Class>(&self) -> Option<&T> {
        self.as_instance().and_then(Instance::downcast_ref)
    }

    /// Looks up a property of an object node.
    pub fn get(&self, key: &str) -> Option<&Restored> {
        match self {
            Self::Object(fields) => fields.get(key),
            _ => None,
        }
    }
}

/// Strings print bare; everything else prints as its encoding.
impl fmt::Display for Restored {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            other => match crate::encode(other) {
                Ok(value) => write!(f, "{}", value),
                Err(_) => write!(f, "{:?}", other),
            },
        }
    }
}

impl From<&str> for Restored {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Restored {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<Instance> for Restored {
    fn from(inst: Instance) -> Self {
        Self::Instance(inst)
    }
}

/// Object-safe view over a [`Class`] so instances can be stored type-erased.
trait DynClass: Any + Send + Sync {
    fn class_name(&self) -> &'static str;
    fn encode_fields(&self) -> Result<Map<String, Value>>;
    fn as_any(&self) -> &dyn Any;
    fn fmt_debug(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result;
}

impl<T: Class> DynClass for T {
    fn class_name(&self) -> &'static str {
        T::NAME
    }

    fn encode_fields(&self) -> Result<Map<String, Value>> {
        Class::encode_fields(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn fmt_debug(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A live, shared class instance.
///
/// Cloning is cheap; all clones point at the same value.
#[derive(Clone)]
pub struct Instance {
    inner: Arc<dyn DynClass>,
}

impl Instance {
    pub fn new<T: Class>(value: T) -> Self {
        Self { inner: Arc::new(value) }
    }

    pub fn class_name(&self) -> &'static str {
        self.inner.class_name()
    }

    pub fn is<T: Class>(&self) -> bool {
        self.inner.as_any().is::<T>()
    }

    pub fn downcast_ref<T: Class>(&self) -> Option<&T> {
        self.inner.as_any().downcast_ref::<T>()
    }

    /// Data fields of the instance, encoded, without tag keys.
    pub fn encode_fields(&self) -> Result<Map<String, Value>> {
        self.inner.encode_fields()
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.fmt_debug(f)
    }
}

/// Two instances are equal when they share a class and their encoded fields match.
impl PartialEq for Instance {
    fn eq(&self, other: &Self) -> bool {
        if self.class_name() != other.class_name() {
            return false;
        }
        match (self.encode_fields(), other.encode_fields()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}
