//! `Subscriber` / `Subscription`: per-emission observers with idempotent
//! unsubscribe.
//!
//! A subscriber is a capability `receive(Subject, T)`, installed directly on
//! a `Channel` rather than through a separate accept/Registrar step — that
//! indirection served a reflection-driven pipe registration scheme that has
//! no remaining purpose once `Channel` owns delivery directly.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::subject::{Resource, Subject};

/// A capability receiving `(Subject, T)` pairs. Delivery happens on the
/// lane thread for async channels, or the calling thread for inline
/// channels; implementations must return promptly and not block.
pub trait Subscriber<T>: Send + Sync {
    fn receive(&self, subject: &Subject, value: T);
}

/// Wraps a plain closure as a `Subscriber`.
pub struct FnSubscriber<T, F>
where
    F: Fn(&Subject, T) + Send + Sync,
{
    func: F,
    _marker: std::marker::PhantomData<fn(T)>,
}

impl<T, F> FnSubscriber<T, F>
where
    F: Fn(&Subject, T) + Send + Sync,
{
    pub fn new(func: F) -> Self {
        FnSubscriber {
            func,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T, F> Subscriber<T> for FnSubscriber<T, F>
where
    T: Send,
    F: Fn(&Subject, T) + Send + Sync,
{
    fn receive(&self, subject: &Subject, value: T) {
        (self.func)(subject, value)
    }
}

/// An active registration of a `Subscriber` on a `Channel`. `close` is
/// idempotent and O(1): it just flips an `active` flag the channel checks
/// before each delivery, rather than mutating the channel's subscriber
/// list (which would require taking a write lock on every unsubscribe and
/// could race with an in-flight delivery iterating the list).
pub struct SubscriptionEntry<T> {
    subject: Subject,
    subscriber: Arc<dyn Subscriber<T>>,
    active: AtomicBool,
    failure_count: std::sync::atomic::AtomicU32,
}

impl<T> SubscriptionEntry<T> {
    pub fn new(subject: Subject, subscriber: Arc<dyn Subscriber<T>>) -> Arc<Self> {
        Arc::new(SubscriptionEntry {
            subject,
            subscriber,
            active: AtomicBool::new(true),
            failure_count: std::sync::atomic::AtomicU32::new(0),
        })
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Delivers one emission, catching a panicking subscriber so a failure
    /// never tears down its neighbours. Returns `Err` on panic so the
    /// caller can route the failure to the circuit's error sink. A
    /// subscriber that repeatedly fails beyond a fixed threshold is
    /// auto-closed.
    pub fn deliver(&self, value: T) -> Result<(), String> {
        if !self.is_active() {
            return Ok(());
        }
        let subscriber = &self.subscriber;
        let subject = &self.subject;
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            subscriber.receive(subject, value)
        }));
        if result.is_err() {
            let failures = self.failure_count.fetch_add(1, Ordering::AcqRel) + 1;
            if failures >= FAILURE_AUTO_CLOSE_THRESHOLD {
                self.active.store(false, Ordering::Release);
            }
            return Err("subscriber panicked during delivery".to_string());
        }
        Ok(())
    }
}

const FAILURE_AUTO_CLOSE_THRESHOLD: u32 = 16;

impl<T> Resource for SubscriptionEntry<T> {
    fn close(&self) {
        self.active.store(false, Ordering::Release);
    }
}

impl<T> fmt::Debug for SubscriptionEntry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionEntry")
            .field("subject", &self.subject)
            .field("active", &self.is_active())
            .finish()
    }
}

/// A handle returned by `Channel::subscribe`. `close()` is idempotent.
pub struct Subscription<T> {
    entry: Arc<SubscriptionEntry<T>>,
}

impl<T> Subscription<T> {
    pub(crate) fn new(entry: Arc<SubscriptionEntry<T>>) -> Self {
        Subscription { entry }
    }

    pub fn close(&self) {
        self.entry.close();
    }

    pub fn is_active(&self) -> bool {
        self.entry.is_active()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::IdAllocator;
    use crate::name::Name;
    use crate::state::State;
    use std::sync::atomic::AtomicI32;

    #[test]
    fn unsubscribe_is_idempotent() {
        let alloc = IdAllocator::new();
        let subject = Subject::new(alloc.allocate(), Name::of("c").unwrap(), State::empty());
        let sum = Arc::new(AtomicI32::new(0));
        let s = sum.clone();
        let subscriber: Arc<dyn Subscriber<i32>> =
            Arc::new(FnSubscriber::new(move |_subj, v| {
                s.fetch_add(v, Ordering::SeqCst);
            }));
        let entry = SubscriptionEntry::new(subject, subscriber);
        let subscription = Subscription::new(entry.clone());
        entry.deliver(1).unwrap();
        subscription.close();
        subscription.close();
        entry.deliver(1).unwrap();
        assert_eq!(sum.load(Ordering::SeqCst), 1);
    }
}
