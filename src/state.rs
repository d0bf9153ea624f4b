//! Typed attribute bundles: `Slot` and `State`.
//!
//! `State` is an append-only, insertion-ordered `Vec<Slot>` behind an `Arc`
//! so that `add()` is a persistent (copy-on-write) operation rather than an
//! in-place mutation: an existing `State` handle never observes a later
//! `add()` on a derived one.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::name::Name;

/// A value a `Slot` may hold: any `Debug + Send + Sync + 'static` type that
/// can be cloned and downcast.
pub trait SlotValue: fmt::Debug + Send + Sync + 'static {
    fn as_any(&self) -> &dyn Any;
    fn clone_box(&self) -> Box<dyn SlotValue>;
}

impl<T> SlotValue for T
where
    T: fmt::Debug + Clone + Send + Sync + 'static,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn clone_box(&self) -> Box<dyn SlotValue> {
        Box::new(self.clone())
    }
}

impl Clone for Box<dyn SlotValue> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// An immutable, typed `(Name, Value)` attribute.
#[derive(Clone)]
pub struct Slot {
    name: Name,
    value: Arc<dyn SlotValue>,
}

impl Slot {
    pub fn of<T>(name: Name, value: T) -> Slot
    where
        T: fmt::Debug + Clone + Send + Sync + 'static,
    {
        Slot {
            name,
            value: Arc::from(Box::new(value) as Box<dyn SlotValue>),
        }
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn value<T: 'static>(&self) -> Option<&T> {
        self.value.as_any().downcast_ref::<T>()
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot")
            .field("name", &self.name)
            .field("value", &self.value)
            .finish()
    }
}

/// An ordered, deduplicated-by-name set of `Slot`s. Persistent: `add`
/// returns a new `State` rather than mutating `self`.
#[derive(Clone, Debug)]
pub struct State {
    slots: Arc<Vec<Slot>>,
}

static EMPTY: Lazy<State> = Lazy::new(|| State {
    slots: Arc::new(Vec::new()),
});

impl State {
    /// The singleton empty state.
    pub fn empty() -> State {
        EMPTY.clone()
    }

    /// Returns a new `State` with `slot` added. If a slot with the same
    /// name already exists, its value is replaced in place (preserving the
    /// original insertion position of that name); otherwise the slot is
    /// appended.
    pub fn add(&self, slot: Slot) -> State {
        let mut slots = (*self.slots).clone();
        if let Some(existing) = slots.iter_mut().find(|s| s.name == slot.name) {
            *existing = slot;
        } else {
            slots.push(slot);
        }
        State {
            slots: Arc::new(slots),
        }
    }

    pub fn get<T: 'static>(&self, name: &Name) -> Option<&T> {
        self.slots
            .iter()
            .find(|s| &s.name == name)
            .and_then(|s| s.value::<T>())
    }

    pub fn contains(&self, name: &Name) -> bool {
        self.slots.iter().any(|s| &s.name == name)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Insertion-order iteration.
    pub fn iter(&self) -> impl Iterator<Item = &Slot> {
        self.slots.iter()
    }

    /// A minimized representation. The persistent `Vec<Slot>` this crate
    /// uses is already deduplicated by name on every `add`, so `compact`
    /// returns an equivalent clone.
    pub fn compact(&self) -> State {
        self.clone()
    }
}

impl Default for State {
    fn default() -> Self {
        State::empty()
    }
}

impl PartialEq for State {
    fn eq(&self, other: &Self) -> bool {
        if self.slots.len() != other.slots.len() {
            return false;
        }
        self.slots.iter().zip(other.slots.iter()).all(|(a, b)| {
            a.name == b.name && format!("{:?}", a.value) == format!("{:?}", b.value)
        })
    }
}
