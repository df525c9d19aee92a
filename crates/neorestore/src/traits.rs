//! Typed codec over the restorable encoding.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::fmt;

use serde_json::Map;
use serde_json::Number;
use serde_json::Value;

use crate::CLASS_NAME_KEY;
use crate::Error;
use crate::RESTORABLE_KEY;
use crate::Result;
use crate::engine;
use crate::restored::Fields;
use crate::restored::Restored;

/// A rust type that crosses the channel as a tagged class instance.
///
/// Usually implemented through [`class!`](crate::class).
pub trait Class: Clone + fmt::Debug + Send + Sync + 'static {
    /// The class name written into the encoding.
    const NAME: &'static str;

    /// Encodes the data fields, without tag keys.
    fn encode_fields(&self) -> Result<Map<String, Value>>;

    /// Builds the value from restored data fields (tag keys already removed).
    fn from_fields(fields: Fields) -> Result<Self>;
}

/// A rust type with a restorable encoding.
pub trait Restorable: Sized {
    fn encode(&self) -> Result<Value>;
    fn restore(value: Restored) -> Result<Self>;
}

/// Restores a class from a live instance, a tagged node that stayed
/// structural, or an untagged object with the right fields.
pub fn restore_class<T: Class>(value: Restored) -> Result<T> {
    match value {
        Restored::Instance(inst) => inst.downcast_ref::<T>().cloned().ok_or(Error::ClassMismatch {
            expected: T::NAME,
            found: inst.class_name().to_string(),
        }),
        Restored::Object(mut fields) => {
            let tagged = match (fields.get(RESTORABLE_KEY), fields.get(CLASS_NAME_KEY)) {
                (Some(Restored::Bool(true)), Some(Restored::String(name))) => Some(name.clone()),
                _ => None,
            };
            if let Some(name) = tagged {
                if name != T::NAME {
                    return Err(Error::ClassMismatch {
                        expected: T::NAME,
                        found: name,
                    });
                }
                fields.remove(RESTORABLE_KEY);
                fields.remove(CLASS_NAME_KEY);
            }
            T::from_fields(fields)
        }
        other => Err(Error::TypeMismatch {
            expected: T::NAME,
            found: other.kind(),
        }),
    }
}

/// Removes and restores one field of a class.
///
/// An absent field restores from `null`, so optional fields may be omitted.
pub fn take_field<T: Restorable>(fields: &mut Fields, class: &'static str, field: &'static str) -> Result<T> {
    match fields.remove(field) {
        Some(value) => T::restore(value).map_err(|source| Error::Field {
            class,
            field,
            source: Box::new(source),
        }),
        None => T::restore(Restored::Null).map_err(|_| Error::MissingField { class, field }),
    }
}

fn mismatch<T>(expected: &'static str, found: &Restored) -> Result<T> {
    Err(Error::TypeMismatch {
        expected,
        found: found.kind(),
    })
}

impl Restorable for () {
    fn encode(&self) -> Result<Value> {
        Ok(Value::Null)
    }

    fn restore(value: Restored) -> Result<Self> {
        match value {
            Restored::Null => Ok(()),
            other => mismatch("null", &other),
        }
    }
}

impl Restorable for bool {
    fn encode(&self) -> Result<Value> {
        Ok(Value::Bool(*self))
    }

    fn restore(value: Restored) -> Result<Self> {
        match value {
            Restored::Bool(b) => Ok(b),
            other => mismatch("bool", &other),
        }
    }
}

impl Restorable for String {
    fn encode(&self) -> Result<Value> {
        Ok(Value::String(self.clone()))
    }

    fn restore(value: Restored) -> Result<Self> {
        match value {
            Restored::String(s) => Ok(s),
            other => mismatch("string", &other),
        }
    }
}

for_each_signed!(restorable_int, as_i64);
for_each_unsigned!(restorable_int, as_u64);
restorable_float!(f32);
restorable_float!(f64);

impl<T: Restorable> Restorable for Option<T> {
    fn encode(&self) -> Result<Value> {
        match self {
            Some(inner) => inner.encode(),
            None => Ok(Value::Null),
        }
    }

    fn restore(value: Restored) -> Result<Self> {
        match value {
            Restored::Null => Ok(None),
            other => T::restore(other).map(Some),
        }
    }
}

impl<T: Restorable> Restorable for Vec<T> {
    fn encode(&self) -> Result<Value> {
        self.iter()
            .map(Restorable::encode)
            .collect::<Result<Vec<_>>>()
            .map(Value::Array)
    }

    fn restore(value: Restored) -> Result<Self> {
        match value {
            Restored::Array(items) => items.into_iter().map(T::restore).collect(),
            other => mismatch("array", &other),
        }
    }
}

impl<T: Restorable> Restorable for HashMap<String, T> {
    fn encode(&self) -> Result<Value> {
        let mut map = Map::new();
        for (key, value) in self {
            map.insert(key.clone(), value.encode()?);
        }
        Ok(Value::Object(map))
    }

    fn restore(value: Restored) -> Result<Self> {
        match value {
            Restored::Object(fields) => fields
                .into_iter()
                .map(|(key, value)| T::restore(value).map(|v| (key, v)))
                .collect(),
            other => mismatch("object", &other),
        }
    }
}

impl<T: Restorable> Restorable for BTreeMap<String, T> {
    fn encode(&self) -> Result<Value> {
        let mut map = Map::new();
        for (key, value) in self {
            map.insert(key.clone(), value.encode()?);
        }
        Ok(Value::Object(map))
    }

    fn restore(value: Restored) -> Result<Self> {
        match value {
            Restored::Object(fields) => fields
                .into_iter()
                .map(|(key, value)| T::restore(value).map(|v| (key, v)))
                .collect(),
            other => mismatch("object", &other),
        }
    }
}

/// Plain JSON passes through untouched; restored instances are re-tagged.
impl Restorable for Value {
    fn encode(&self) -> Result<Value> {
        Ok(self.clone())
    }

    fn restore(value: Restored) -> Result<Self> {
        engine::encode(&value)
    }
}

impl Restorable for Restored {
    fn encode(&self) -> Result<Value> {
        engine::encode(self)
    }

    fn restore(value: Restored) -> Result<Self> {
        Ok(value)
    }
}

impl Restorable for Number {
    fn encode(&self) -> Result<Value> {
        Ok(Value::Number(self.clone()))
    }

    fn restore(value: Restored) -> Result<Self> {
        match value {
            Restored::Number(n) => Ok(n),
            other => mismatch("number", &other),
        }
    }
}
