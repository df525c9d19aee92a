//! Declarative helpers: primitive codecs, and `class!` for user types.

/// Signed integer types; the callback receives the type and the context token.
macro_rules! for_each_signed {
    ($m:ident, $ctx:tt) => {
        $m!(i8, $ctx);
        $m!(i16, $ctx);
        $m!(i32, $ctx);
        $m!(i64, $ctx);
        $m!(isize, $ctx);
    };
}

/// Unsigned integer types; the callback receives the type and the context token.
macro_rules! for_each_unsigned {
    ($m:ident, $ctx:tt) => {
        $m!(u8, $ctx);
        $m!(u16, $ctx);
        $m!(u32, $ctx);
        $m!(u64, $ctx);
        $m!(usize, $ctx);
    };
}

/// Integers widen through `Number::as_i64` / `as_u64`, then narrow with a range check.
macro_rules! restorable_int {
    ($ty:ty, $widen:ident) => {
        impl Restorable for $ty {
            fn encode(&self) -> Result<Value> {
                Ok(Value::from(*self))
            }

            fn restore(value: Restored) -> Result<Self> {
                match value {
                    Restored::Number(n) => n
                        .$widen()
                        .and_then(|wide| <$ty>::try_from(wide).ok())
                        .ok_or_else(|| Error::OutOfRange {
                            value: n.to_string(),
                            target: stringify!($ty),
                        }),
                    other => mismatch(stringify!($ty), &other),
                }
            }
        }
    };
}

macro_rules! restorable_float {
    ($ty:ty) => {
        impl Restorable for $ty {
            fn encode(&self) -> Result<Value> {
                Number::from_f64(*self as f64)
                    .map(Value::Number)
                    .ok_or(Error::NonFinite)
            }

            fn restore(value: Restored) -> Result<Self> {
                match value {
                    Restored::Number(n) => n.as_f64().map(|f| f as $ty).ok_or_else(|| Error::OutOfRange {
                        value: n.to_string(),
                        target: stringify!($ty),
                    }),
                    other => mismatch(stringify!($ty), &other),
                }
            }
        }
    };
}

/// Declares a struct as a restorable class.
///
/// Every field must be listed and must itself be [`Restorable`](crate::Restorable).
/// The class name defaults to the type name.
///
/// ```ignore
/// #[derive(Clone, Debug, PartialEq)]
/// struct Point { x: f64, y: f64 }
///
/// neorestore::class!(Point { x, y });
/// neorestore::class!(Line as "geometry.Line" { from, to });
/// ```
#[macro_export]
macro_rules! class {
    (@impl $ty:ident, $name:expr, { $($field:ident),* }) => {
        impl $crate::Class for $ty {
            const NAME: &'static str = $name;

            #[allow(unused_mut)]
            fn encode_fields(&self) -> $crate::Result<$crate::Map<::std::string::String, $crate::Value>> {
                let mut fields = $crate::Map::new();
                $(
                    fields.insert(
                        ::std::string::String::from(stringify!($field)),
                        $crate::Restorable::encode(&self.$field)?,
                    );
                )*
                Ok(fields)
            }

            #[allow(unused_mut, unused_variables)]
            fn from_fields(mut fields: $crate::Fields) -> $crate::Result<Self> {
                Ok(Self {
                    $(
                        $field: $crate::take_field(
                            &mut fields,
                            <Self as $crate::Class>::NAME,
                            stringify!($field),
                        )?,
                    )*
                })
            }
        }

        impl $crate::Restorable for $ty {
            fn encode(&self) -> $crate::Result<$crate::Value> {
                $crate::encode_class(self)
            }

            fn restore(value: $crate::Restored) -> $crate::Result<Self> {
                $crate::restore_class(value)
            }
        }
    };
    ($ty:ident as $name:literal { $($field:ident),* $(,)? }) => {
        $crate::class!(@impl $ty, $name, { $($field),* });
    };
    ($ty:ident { $($field:ident),* $(,)? }) => {
        $crate::class!(@impl $ty, stringify!($ty), { $($field),* });
    };
}
