use serde::de::{SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use std::fmt::{self, Formatter};
use std::marker::PhantomData;

use crate::{Element, OrderedSet};

/// Serializes the set as an ordered sequence of keys.
///
/// Serialization registers a temporary thread handle for the traversal,
/// which counts toward the set's registration limit.
impl<T, const P: usize, const N: usize> Serialize for OrderedSet<T, P, N>
where
    T: Element + Clone + Serialize,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let handle = self.register();
        serializer.collect_seq(self.iter(&handle))
    }
}

impl<'de, T, const P: usize, const N: usize> Deserialize<'de> for OrderedSet<T, P, N>
where
    T: Element + Deserialize<'de>,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_seq(SetVisitor::new())
    }
}

struct SetVisitor<T, const P: usize, const N: usize> {
    _marker: PhantomData<OrderedSet<T, P, N>>,
}

impl<T, const P: usize, const N: usize> SetVisitor<T, P, N> {
    fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<'de, T, const P: usize, const N: usize> Visitor<'de> for SetVisitor<T, P, N>
where
    T: Element + Deserialize<'de>,
{
    type Value = OrderedSet<T, P, N>;

    fn expecting(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "a sequence of keys")
    }

    fn visit_seq<M>(self, mut access: M) -> Result<Self::Value, M::Error>
    where
        M: SeqAccess<'de>,
    {
        let values = OrderedSet::new();

        {
            let handle = values.register();
            while let Some(key) = access.next_element()? {
                values.insert(key, &handle);
            }
        }

        Ok(values)
    }
}
