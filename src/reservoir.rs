//! `Reservoir` and `Tap`: buffered capture of processed emissions.
//!
//! Delivery into the buffer goes through the same `Subscriber<T>` capability
//! every other consumer uses, rather than a bespoke `mpsc` + background-task
//! collector — there is no async runtime to spawn that task on.

use parking_lot::Mutex;

use crate::pipe::Capture;
use crate::subject::Subject;
use crate::subscriber::Subscriber;

/// A subscription-plus-buffer installed at the conduit level. Emissions
/// that pass their channel's flow are appended to an unbounded ordered
/// buffer; `drain()` empties it and returns what was captured since the
/// last drain.
pub struct Reservoir<T> {
    captures: Mutex<Vec<Capture<T>>>,
}

impl<T> Default for Reservoir<T> {
    fn default() -> Self {
        Reservoir {
            captures: Mutex::new(Vec::new()),
        }
    }
}

impl<T> Reservoir<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drains the buffer. Consecutive calls yield disjoint sequences whose
    /// concatenation, in order, equals every emission the reservoir has
    /// observed.
    pub fn drain(&self) -> Vec<Capture<T>> {
        std::mem::take(&mut *self.captures.lock())
    }

    pub fn len(&self) -> usize {
        self.captures.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone + Send + Sync> Subscriber<T> for Reservoir<T> {
    fn receive(&self, subject: &Subject, value: T) {
        self.captures
            .lock()
            .push(Capture::new(subject.clone(), value));
    }
}

/// A live, per-emission transforming subscription: each emission is mapped
/// by a user function before being buffered.
pub struct Tap<T, U> {
    transform: Box<dyn Fn(&Subject, T) -> U + Send + Sync>,
    captures: Mutex<Vec<Capture<U>>>,
}

impl<T, U> Tap<T, U> {
    pub fn new<F>(transform: F) -> Self
    where
        F: Fn(&Subject, T) -> U + Send + Sync + 'static,
    {
        Tap {
            transform: Box::new(transform),
            captures: Mutex::new(Vec::new()),
        }
    }

    pub fn drain(&self) -> Vec<Capture<U>> {
        std::mem::take(&mut *self.captures.lock())
    }
}

impl<T: Send, U: Send + Sync> Subscriber<T> for Tap<T, U> {
    fn receive(&self, subject: &Subject, value: T) {
        let mapped = (self.transform)(subject, value);
        self.captures
            .lock()
            .push(Capture::new(subject.clone(), mapped));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::IdAllocator;
    use crate::name::Name;
    use crate::state::State;

    fn test_subject() -> Subject {
        let alloc = IdAllocator::new();
        Subject::new(alloc.allocate(), Name::of("r").unwrap(), State::empty())
    }

    #[test]
    fn drains_are_disjoint_and_concatenate_in_order() {
        let reservoir = Reservoir::new();
        let subject = test_subject();
        reservoir.receive(&subject, 1);
        reservoir.receive(&subject, 2);
        let first = reservoir.drain();
        reservoir.receive(&subject, 3);
        let second = reservoir.drain();
        let all: Vec<i32> = first
            .iter()
            .chain(second.iter())
            .map(|c| *c.emission())
            .collect();
        assert_eq!(all, vec![1, 2, 3]);
        assert!(reservoir.is_empty());
    }

    #[test]
    fn tap_maps_before_buffering() {
        let tap = Tap::new(|_subj: &Subject, v: i32| v * 10);
        let subject = test_subject();
        tap.receive(&subject, 4);
        let drained = tap.drain();
        assert_eq!(*drained[0].emission(), 40);
    }
}
