//! Shared, identity-carrying values.

use std::cell::{Ref, RefCell, RefMut};
use std::collections::HashSet;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

use serde::de::{self, Deserialize, Deserializer, MapAccess, Visitor};
use serde::ser::{self, Serialize, SerializeMap, Serializer};

use crate::scope::{self, ScopeError, Visit};

const ID_KEY: &str = "$id";
const REF_KEY: &str = "$ref";
const VALUE_KEY: &str = "$value";

/// A reference-counted value whose identity survives encoding.
///
/// Clones of a `Shared` point at the same instance. When a graph holding the
/// same instance several times (or in a cycle) is encoded, the instance is
/// written once as `{"$id": n, "$value": ...}` and every later occurrence as
/// `{"$ref": n}`. Decoding restores a single instance that all occurrences
/// point to.
///
/// # Examples
///
/// ```
/// use sdb_codec::{decode, encode, Shared};
///
/// let item = Shared::new(String::from("sword"));
/// let bytes = encode(&vec![item.clone(), item]).unwrap();
///
/// let decoded: Vec<Shared<String>> = decode(&bytes).unwrap();
/// assert!(Shared::ptr_eq(&decoded[0], &decoded[1]));
/// ```
pub struct Shared<T>(Rc<RefCell<T>>);

impl<T> Shared<T> {
    pub fn new(value: T) -> Self {
        Self(Rc::new(RefCell::new(value)))
    }

    /// Immutably borrow the value.
    ///
    /// # Panics
    ///
    /// Panics if the value is currently mutably borrowed.
    pub fn borrow(&self) -> Ref<'_, T> {
        self.0.borrow()
    }

    /// Mutably borrow the value.
    ///
    /// # Panics
    ///
    /// Panics if the value is currently borrowed.
    pub fn borrow_mut(&self) -> RefMut<'_, T> {
        self.0.borrow_mut()
    }

    /// Replace the value, returning the old one.
    pub fn replace(&self, value: T) -> T {
        self.0.replace(value)
    }

    /// Returns `true` if both handles point to the same instance.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Rc::ptr_eq(&a.0, &b.0)
    }

    /// Number of handles pointing to this instance.
    pub fn handle_count(&self) -> usize {
        Rc::strong_count(&self.0)
    }

    fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl<T: Default> Default for Shared<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> From<T> for Shared<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

/// Same instance, or structurally equal values.
impl<T: PartialEq> PartialEq for Shared<T> {
    fn eq(&self, other: &Self) -> bool {
        Shared::ptr_eq(self, other) || *self.borrow() == *other.borrow()
    }
}

thread_local! {
    static FORMATTING: RefCell<HashSet<usize>> = RefCell::new(HashSet::new());
}

impl<T: fmt::Debug> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let addr = self.addr();
        let entered = FORMATTING.with(|s| s.borrow_mut().insert(addr));
        if !entered {
            return f.write_str("Shared(<cycle>)");
        }
        let result = match self.0.try_borrow() {
            Ok(value) => f.debug_tuple("Shared").field(&*value).finish(),
            Err(_) => f.write_str("Shared(<borrowed>)"),
        };
        FORMATTING.with(|s| s.borrow_mut().remove(&addr));
        result
    }
}

impl<T: Serialize> Serialize for Shared<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match scope::visit(self.addr()) {
            None => Err(ser::Error::custom(
                "shared value serialized outside sdb_codec::encode",
            )),
            Some(Visit::Repeat(id)) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(REF_KEY, &id)?;
                map.end()
            }
            Some(Visit::First(id)) => {
                let value = self
                    .0
                    .try_borrow()
                    .map_err(|_| ser::Error::custom("shared value is mutably borrowed"))?;
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry(ID_KEY, &id)?;
                map.serialize_entry(VALUE_KEY, &*value)?;
                map.end()
            }
        }
    }
}

impl<'de, T> Deserialize<'de> for Shared<T>
where
    T: Deserialize<'de> + Default + 'static,
{
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(SharedVisitor(PhantomData))
    }
}

struct SharedVisitor<T>(PhantomData<T>);

impl<'de, T> Visitor<'de> for SharedVisitor<T>
where
    T: Deserialize<'de> + Default + 'static,
{
    type Value = Shared<T>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a shared value ({\"$id\", \"$value\"} or {\"$ref\"})")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let first: Option<String> = map.next_key()?;
        match first.as_deref() {
            Some(REF_KEY) => {
                let id: u64 = map.next_value()?;
                if map.next_key::<de::IgnoredAny>()?.is_some() {
                    return Err(de::Error::custom("unexpected field after \"$ref\""));
                }
                let cell = scope::resolve::<RefCell<T>>(id).map_err(ScopeError::into_de_error)?;
                Ok(Shared(cell))
            }
            Some(ID_KEY) => {
                let id: u64 = map.next_value()?;

                // Register before decoding the body so cycles resolve to this
                // instance.
                let cell = Rc::new(RefCell::new(T::default()));
                scope::register(id, cell.clone()).map_err(ScopeError::into_de_error)?;

                let key: Option<String> = map.next_key()?;
                if key.as_deref() != Some(VALUE_KEY) {
                    return Err(de::Error::missing_field(VALUE_KEY));
                }
                let value: T = map.next_value()?;
                if map.next_key::<de::IgnoredAny>()?.is_some() {
                    return Err(de::Error::custom("unexpected field after \"$value\""));
                }
                *cell.borrow_mut() = value;
                Ok(Shared(cell))
            }
            Some(other) => Err(de::Error::unknown_field(other, &[ID_KEY, REF_KEY])),
            None => Err(de::Error::missing_field(ID_KEY)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_identity() {
        let a = Shared::new(5);
        let b = a.clone();
        *b.borrow_mut() = 6;
        assert_eq!(*a.borrow(), 6);
        assert!(Shared::ptr_eq(&a, &b));
        assert_eq!(a.handle_count(), 2);
    }

    #[test]
    fn equality_is_structural() {
        let a = Shared::new("x".to_string());
        let b = Shared::new("x".to_string());
        assert_eq!(a, b);
        assert!(!Shared::ptr_eq(&a, &b));
    }

    #[test]
    fn serializing_outside_encode_fails() {
        let err = serde_json::to_string(&Shared::new(1)).unwrap_err();
        assert!(err.to_string().contains("outside sdb_codec::encode"));
    }

    #[test]
    fn deserializing_outside_decode_fails() {
        let err = serde_json::from_str::<Shared<u8>>(r#"{"$id":1,"$value":3}"#).unwrap_err();
        assert!(err.to_string().contains("outside sdb_codec::decode"));
    }

    #[test]
    fn debug_handles_cycles() {
        #[derive(Debug, Default)]
        struct Node {
            next: Option<Shared<Node>>,
        }
        let node = Shared::new(Node::default());
        node.borrow_mut().next = Some(node.clone());
        let text = format!("{node:?}");
        assert!(text.contains("<cycle>"));
        node.borrow_mut().next = None;
    }
}
