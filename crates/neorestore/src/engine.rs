//! # Encode / Decode
//!
//! The two traversals at the heart of the format. Neither performs I/O or
//! keeps state; cyclic graphs cannot be expressed by [`Restored`] in the
//! first place, so recursion always terminates.

use serde_json::Map;
use serde_json::Value;

use crate::CLASS_NAME_KEY;
use crate::Error;
use crate::PAYLOAD_KEY;
use crate::RELAYED_ERROR_KEY;
use crate::RESTORABLE_KEY;
use crate::Result;
use crate::lookup::ClassLookup;
use crate::restored::Fields;
use crate::restored::Restored;
use crate::traits::Class;

/// Produces the restorable encoding of a value.
///
/// Plain nodes are copied as-is. Every [`Restored::Instance`] contributes its
/// data fields plus the tag keys naming its class.
pub fn encode(value: &Restored) -> Result<Value> {
    let encoded = match value {
        Restored::Null => Value::Null,
        Restored::Bool(b) => Value::Bool(*b),
        Restored::Number(n) => Value::Number(n.clone()),
        Restored::String(s) => Value::String(s.clone()),
        Restored::Array(items) => Value::Array(
            items.iter().map(encode).collect::<Result<Vec<_>>>()?,
        ),
        Restored::Object(fields) => {
            let mut map = Map::new();
            for (key, field) in fields {
                map.insert(key.clone(), encode(field)?);
            }
            Value::Object(map)
        }
        Restored::Instance(inst) => tag(inst.class_name(), inst.encode_fields()?)?,
    };
    Ok(encoded)
}

/// Encodes a class value directly, without wrapping it in an [`Instance`].
pub fn encode_class<T: Class>(value: &T) -> Result<Value> {
    tag(T::NAME, value.encode_fields()?)
}

/// Adds the tag keys to a class's encoded data fields.
fn tag(class_name: &'static str, mut fields: Map<String, Value>) -> Result<Value> {
    for reserved in [RESTORABLE_KEY, CLASS_NAME_KEY] {
        if fields.contains_key(reserved) {
            return Err(Error::ReservedField {
                class: class_name,
                field: reserved.to_string(),
            });
        }
    }
    fields.insert(RESTORABLE_KEY.to_string(), Value::Bool(true));
    fields.insert(CLASS_NAME_KEY.to_string(), Value::String(class_name.to_string()));
    Ok(Value::Object(fields))
}

/// Returns the class name if `map` is a tagged instance node.
fn tagged_class(map: &Map<String, Value>) -> Option<String> {
    match (map.get(RESTORABLE_KEY), map.get(CLASS_NAME_KEY)) {
        (Some(Value::Bool(true)), Some(Value::String(name))) => Some(name.clone()),
        _ => None,
    }
}

/// Reconstructs a value from its restorable encoding.
///
/// Children are decoded before their parent, so a lookup always sees fields
/// that are already restored. A tagged node the lookup declines (or any tagged
/// node when `lookup` is `None`) stays a structural object with its tag keys
/// intact, which re-encodes to the same wire form.
pub fn decode(value: Value, lookup: Option<&dyn ClassLookup>) -> Restored {
    match value {
        Value::Array(items) => {
            Restored::Array(items.into_iter().map(|item| decode(item, lookup)).collect())
        }
        Value::Object(map) => {
            let class_name = tagged_class(&map);
            let mut fields: Fields = map
                .into_iter()
                .map(|(key, field)| (key, decode(field, lookup)))
                .collect();

            let Some(class_name) = class_name else {
                return Restored::Object(fields);
            };
            let Some(lookup) = lookup else {
                return Restored::Object(fields);
            };

            let restorable = fields.remove(RESTORABLE_KEY);
            let name = fields.remove(CLASS_NAME_KEY);
            if let Some(instance) = lookup.restore(&class_name, &fields) {
                return Restored::Instance(instance);
            }

            tracing::debug!(class = %class_name, "no restorer for class, keeping structural object");
            if let Some(restorable) = restorable {
                fields.insert(RESTORABLE_KEY.to_string(), restorable);
            }
            if let Some(name) = name {
                fields.insert(CLASS_NAME_KEY.to_string(), name);
            }
            Restored::Object(fields)
        }
        plain => Restored::from_plain(plain),
    }
}

/// Result of decoding a call reply.
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    /// A normal return value.
    Value(Restored),
    /// The callee relayed a failure; the payload is the rejection reason.
    Relayed(Restored),
}

/// Wraps a failure payload so the receiver re-raises it instead of returning it.
pub fn encode_relayed(payload: Value) -> Value {
    let mut map = Map::new();
    map.insert(RELAYED_ERROR_KEY.to_string(), Value::Bool(true));
    map.insert(PAYLOAD_KEY.to_string(), payload);
    Value::Object(map)
}

/// Decodes a reply, telling a relayed failure apart from a returned value.
pub fn decode_outcome(value: Value, lookup: Option<&dyn ClassLookup>) -> Outcome {
    match value {
        Value::Object(mut map)
            if matches!(map.get(RELAYED_ERROR_KEY), Some(Value::Bool(true)))
                && map.contains_key(PAYLOAD_KEY) =>
        {
            let payload = map.remove(PAYLOAD_KEY).unwrap_or(Value::Null);
            Outcome::Relayed(decode(payload, lookup))
        }
        other => Outcome::Value(decode(other, lookup)),
    }
}
