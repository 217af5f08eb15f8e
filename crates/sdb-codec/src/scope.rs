//! Per-call instance tables for reference tracking.
//!
//! [`crate::encode`] and [`crate::decode`] each push a fresh table for the
//! duration of the call; [`crate::Shared`] consults the innermost one. Tables
//! are thread-local, so concurrent calls on different threads never share
//! ids.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

#[derive(Default)]
struct EncodeTable {
    ids: HashMap<usize, u64>,
    next: u64,
}

#[derive(Default)]
struct DecodeTable {
    instances: HashMap<u64, Rc<dyn Any>>,
}

thread_local! {
    static ENCODE: RefCell<Vec<EncodeTable>> = const { RefCell::new(Vec::new()) };
    static DECODE: RefCell<Vec<DecodeTable>> = const { RefCell::new(Vec::new()) };
}

/// Outcome of visiting a shared instance during encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Visit {
    /// First occurrence; the instance was assigned this id.
    First(u64),
    /// Repeated occurrence of the instance with this id.
    Repeat(u64),
}

/// Pops its table when the call ends, including by unwinding.
pub(crate) struct ScopeGuard {
    decode: bool,
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        if self.decode {
            DECODE.with(|s| s.borrow_mut().pop());
        } else {
            ENCODE.with(|s| s.borrow_mut().pop());
        }
    }
}

pub(crate) fn enter_encode() -> ScopeGuard {
    ENCODE.with(|s| s.borrow_mut().push(EncodeTable::default()));
    ScopeGuard { decode: false }
}

pub(crate) fn enter_decode() -> ScopeGuard {
    DECODE.with(|s| s.borrow_mut().push(DecodeTable::default()));
    ScopeGuard { decode: true }
}

/// Record a visit to the instance at `addr`. `None` outside an encode call.
pub(crate) fn visit(addr: usize) -> Option<Visit> {
    ENCODE.with(|s| {
        let mut stack = s.borrow_mut();
        let table = stack.last_mut()?;
        if let Some(id) = table.ids.get(&addr) {
            return Some(Visit::Repeat(*id));
        }
        table.next += 1;
        let id = table.next;
        table.ids.insert(addr, id);
        Some(Visit::First(id))
    })
}

/// Prefix of decode errors raised for ids that break the reference structure.
pub(crate) const BROKEN_REFERENCE: &str = "broken reference: ";

/// Why an id could not be registered or resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScopeError {
    OutsideDecode,
    DuplicateId(u64),
    UnknownId(u64),
    WrongType(u64),
}

impl std::fmt::Display for ScopeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScopeError::OutsideDecode => {
                write!(f, "shared value deserialized outside sdb_codec::decode")
            }
            ScopeError::DuplicateId(id) => write!(f, "instance id {id} defined twice"),
            ScopeError::UnknownId(id) => write!(f, "reference to undefined instance id {id}"),
            ScopeError::WrongType(id) => {
                write!(f, "instance id {id} refers to a value of a different type")
            }
        }
    }
}

impl ScopeError {
    /// Convert into a deserializer error.
    ///
    /// Undefined and duplicated ids carry [`BROKEN_REFERENCE`] so that they
    /// classify as malformed input rather than a shape mismatch.
    pub(crate) fn into_de_error<E: serde::de::Error>(self) -> E {
        match self {
            ScopeError::DuplicateId(_) | ScopeError::UnknownId(_) => {
                E::custom(format_args!("{BROKEN_REFERENCE}{self}"))
            }
            ScopeError::OutsideDecode | ScopeError::WrongType(_) => E::custom(self),
        }
    }
}

/// Register the instance materialized for `id`.
pub(crate) fn register(id: u64, instance: Rc<dyn Any>) -> Result<(), ScopeError> {
    DECODE.with(|s| {
        let mut stack = s.borrow_mut();
        let table = stack.last_mut().ok_or(ScopeError::OutsideDecode)?;
        if table.instances.contains_key(&id) {
            return Err(ScopeError::DuplicateId(id));
        }
        table.instances.insert(id, instance);
        Ok(())
    })
}

/// Resolve a back-reference to the instance registered under `id`.
pub(crate) fn resolve<T: 'static>(id: u64) -> Result<Rc<T>, ScopeError> {
    let instance = DECODE.with(|s| {
        let stack = s.borrow();
        let table = stack.last().ok_or(ScopeError::OutsideDecode)?;
        table
            .instances
            .get(&id)
            .cloned()
            .ok_or(ScopeError::UnknownId(id))
    })?;
    instance.downcast::<T>().map_err(|_| ScopeError::WrongType(id))
}
