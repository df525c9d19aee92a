//! Class lookups turn tagged nodes back into live instances.

use std::collections::HashMap;
use std::fmt;

use crate::Result;
use crate::restored::Fields;
use crate::restored::Instance;
use crate::traits::Class;

/// Maps a class name and its restored data fields to a live instance.
///
/// Returning `None` is a valid answer: the node stays structural.
pub trait ClassLookup: Send + Sync {
    fn restore(&self, class_name: &str, fields: &Fields) -> Option<Instance>;
}

impl<F> ClassLookup for F
where
    F: Fn(&str, &Fields) -> Option<Instance> + Send + Sync,
{
    fn restore(&self, class_name: &str, fields: &Fields) -> Option<Instance> {
        self(class_name, fields)
    }
}

type Constructor = fn(Fields) -> Result<Instance>;

fn construct<T: Class>(fields: Fields) -> Result<Instance> {
    T::from_fields(fields).map(Instance::new)
}

/// A lookup assembled from [`Class`] types.
///
/// ```ignore
/// let classes = ClassRegistry::new().register::<Point>().register::<Line>();
/// ```
#[derive(Clone, Default)]
pub struct ClassRegistry {
    constructors: HashMap<&'static str, Constructor>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `T` under its class name. A later registration of the same name wins.
    pub fn register<T: Class>(mut self) -> Self {
        self.constructors.insert(T::NAME, construct::<T>);
        self
    }

    pub fn contains(&self, class_name: &str) -> bool {
        self.constructors.contains_key(class_name)
    }

    pub fn len(&self) -> usize {
        self.constructors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constructors.is_empty()
    }
}

impl ClassLookup for ClassRegistry {
    fn restore(&self, class_name: &str, fields: &Fields) -> Option<Instance> {
        let constructor = self.constructors.get(class_name)?;
        match constructor(fields.clone()) {
            Ok(instance) => Some(instance),
            Err(error) => {
                tracing::warn!(class = %class_name, %error, "restorer rejected fields, keeping structural object");
                None
            }
        }
    }
}

impl fmt::Debug for ClassRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.constructors.keys().collect();
        names.sort();
        f.debug_struct("ClassRegistry").field("classes", &names).finish()
    }
}
