//! `Channel`: an addressable emission site within a conduit, one per
//! Subject.
//!
//! `Channel` owns flow application and subscriber fan-out directly, so both
//! the inline and async pipe kinds share one real delivery path.

use std::fmt;
use std::sync::Arc;
use parking_lot::RwLock;

use tracing::warn;

use crate::circuit::ErrorSink;
use crate::flow::Flow;
use crate::subject::{Resource, Substrate, Subject};
use crate::subscriber::{Subscriber, Subscription, SubscriptionEntry};

/// A bound emission site identified by its Subject. Owned by exactly one
/// Conduit.
pub struct Channel<T> {
    subject: Subject,
    flow: Option<Flow<T>>,
    subscriptions: RwLock<Vec<Arc<SubscriptionEntry<T>>>>,
    error_sink: ErrorSink,
}

impl<T> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel").field("subject", &self.subject).finish()
    }
}

impl<T: Clone + Send + Sync + 'static> Channel<T> {
    pub fn new(subject: Subject, flow: Option<Flow<T>>, error_sink: ErrorSink) -> Arc<Self> {
        Arc::new(Channel {
            subject,
            flow,
            subscriptions: RwLock::new(Vec::new()),
            error_sink,
        })
    }

    /// Attaches a subscriber. The same channel can be subscribed by many
    /// subscribers; each independently observes every value that passes
    /// this channel's flow, in emit order.
    pub fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) -> Subscription<T> {
        let entry = SubscriptionEntry::new(self.subject.clone(), subscriber);
        self.subscriptions.write().push(entry.clone());
        Subscription::new(entry)
    }

    /// Applies this channel's flow (if any) to `value`, then fans the
    /// result out to every active subscription. A subscriber panic is
    /// caught, routed to the circuit's error sink, and never affects its
    /// neighbours.
    pub fn dispatch(&self, value: T) {
        let passed = match &self.flow {
            Some(flow) => flow.apply_all(value),
            None => Some(value),
        };
        let Some(value) = passed else {
            return;
        };

        // Snapshot under the read lock, then deliver without holding it —
        // a subscriber that emits back into this channel (a legal cyclic
        // emission) must not deadlock on its own lock.
        let entries: Vec<_> = self
            .subscriptions
            .read()
            .iter()
            .filter(|e| e.is_active())
            .cloned()
            .collect();

        for entry in entries {
            if let Err(failure) = entry.deliver(value.clone()) {
                warn!(subject = %self.subject, %failure, "subscriber callback failed");
                (self.error_sink)(crate::error::SubstratesError::callback_failure(failure));
            }
        }
    }
}

impl<T> Substrate for Channel<T> {
    fn subject(&self) -> &Subject {
        &self.subject
    }
}

impl<T: Send + Sync> Resource for Channel<T> {
    fn close(&self) {
        for entry in self.subscriptions.write().drain(..) {
            entry.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::IdAllocator;
    use crate::name::Name;
    use crate::state::State;
    use crate::subscriber::FnSubscriber;
    use std::sync::atomic::{AtomicI32, Ordering};

    fn no_op_sink() -> ErrorSink {
        Arc::new(|_err| {})
    }

    fn test_subject() -> Subject {
        let alloc = IdAllocator::new();
        Subject::new(alloc.allocate(), Name::of("chan").unwrap(), State::empty())
    }

    #[test]
    fn dispatch_delivers_in_order_to_every_subscriber() {
        let channel = Channel::<i32>::new(test_subject(), None, no_op_sink());
        let sum = Arc::new(AtomicI32::new(0));
        let s = sum.clone();
        channel.subscribe(Arc::new(FnSubscriber::new(move |_subj, v| {
            s.fetch_add(v, Ordering::SeqCst);
        })));
        for v in 1..=5 {
            channel.dispatch(v);
        }
        assert_eq!(sum.load(Ordering::SeqCst), 15);
    }

    #[test]
    fn closing_a_channel_stops_delivery() {
        let channel = Channel::<i32>::new(test_subject(), None, no_op_sink());
        let count = Arc::new(AtomicI32::new(0));
        let c = count.clone();
        channel.subscribe(Arc::new(FnSubscriber::new(move |_subj, _v| {
            c.fetch_add(1, Ordering::SeqCst);
        })));
        channel.dispatch(1);
        Resource::close(&*channel);
        channel.dispatch(2);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
