//! `Conduit`: a typed container of Channels keyed by Name, sharing a
//! composer and optional Flow template.
//!
//! `percept` caches by name via `entry().or_insert_with()`, so for any given
//! Name, repeated `percept(name)` calls return the same instrument — built
//! once, through the `Composer` pattern, and reused from then on.

use std::sync::Arc;

use dashmap::DashMap;

use crate::channel::Channel;
use crate::circuit::{CircuitInner, ErrorSink};
use crate::flow::FlowTemplate;
use crate::id::IdAllocator;
use crate::name::Name;
use crate::reservoir::{Reservoir, Tap};
use crate::subject::{Resource, Substrate, Subject};
use crate::subscriber::Subscriber;
use parking_lot::Mutex;

/// A function `Channel<T> -> P` invoked exactly once per channel.
pub type Composer<P, T> = Arc<dyn Fn(Arc<Channel<T>>) -> P + Send + Sync>;

struct Entry<P, T> {
    channel: Arc<Channel<T>>,
    instrument: P,
}

/// A typed container of Channels. Cache hits on `percept` are lock-free
/// (a `DashMap` shard lock, not a single conduit-wide lock).
pub struct Conduit<P, T> {
    subject: Subject,
    circuit: Arc<CircuitInner>,
    composer: Composer<P, T>,
    flow_template: Option<FlowTemplate<T>>,
    channels: DashMap<Name, Arc<Entry<P, T>>>,
    ids: IdAllocator,
    error_sink: ErrorSink,
    /// Conduit-level subscribers (installed by `reservoir()`/`tap()`) that
    /// every channel materialized from here on must also be subscribed to.
    /// These observe emissions across the whole conduit, not one named
    /// channel.
    conduit_subscribers: Mutex<Vec<Arc<dyn Subscriber<T>>>>,
}

impl<P, T> Conduit<P, T>
where
    P: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(
        subject: Subject,
        circuit: Arc<CircuitInner>,
        composer: Composer<P, T>,
        flow_template: Option<FlowTemplate<T>>,
        error_sink: ErrorSink,
    ) -> Arc<Self> {
        Arc::new(Conduit {
            subject,
            circuit,
            composer,
            flow_template,
            channels: DashMap::new(),
            ids: IdAllocator::new(),
            error_sink,
            conduit_subscribers: Mutex::new(Vec::new()),
        })
    }

    /// Looks up or creates the Channel for `name` and returns the
    /// composer-produced instrument. The composer runs at most once per
    /// name; repeated calls return the same instrument. Every conduit-level
    /// reservoir/tap installed so far is subscribed onto a freshly created
    /// channel before the composer sees it.
    ///
    /// The `conduit_subscribers` snapshot below is taken *before* entering
    /// the `DashMap` entry API and never locked again inside the
    /// `or_insert_with` closure: `reservoir()`/`tap()` take the two locks in
    /// the opposite order (`conduit_subscribers` then a channel-map shard
    /// lock while subscribing existing channels), so holding both at once
    /// here, in the reverse order, would be a lock-ordering cycle.
    pub fn percept(&self, name: Name) -> P {
        if let Some(entry) = self.channels.get(&name) {
            return entry.instrument.clone();
        }
        let subscribers_snapshot = self.conduit_subscribers.lock().clone();
        let entry = self
            .channels
            .entry(name.clone())
            .or_insert_with(|| {
                let subject = Subject::with_parent(
                    self.ids.allocate(),
                    name,
                    crate::state::State::empty(),
                    self.subject.clone(),
                );
                let flow = self.flow_template.as_ref().map(|t| t.build());
                let channel = Channel::new(subject, flow, self.error_sink.clone());
                for subscriber in &subscribers_snapshot {
                    channel.subscribe(subscriber.clone());
                }
                let instrument = (self.composer)(channel.clone());
                Arc::new(Entry { channel, instrument })
            })
            .clone();
        entry.instrument.clone()
    }

    /// The underlying channel for `name`, if it has been materialized.
    pub fn channel(&self, name: &Name) -> Option<Arc<Channel<T>>> {
        self.channels.get(name).map(|e| e.channel.clone())
    }

    /// Installs a reservoir across every channel this conduit has
    /// materialized so far, and every channel it materializes afterward —
    /// a conduit-level capture, not scoped to one channel name.
    pub fn reservoir(&self) -> Arc<Reservoir<T>> {
        let reservoir = Arc::new(Reservoir::new());
        self.conduit_subscribers.lock().push(reservoir.clone());
        for entry in self.channels.iter() {
            entry.channel.subscribe(reservoir.clone());
        }
        reservoir
    }

    /// Installs a live, per-emission transforming subscription across every
    /// channel this conduit has materialized so far, and every channel it
    /// materializes afterward.
    pub fn tap<U, F>(&self, transform: F) -> Arc<Tap<T, U>>
    where
        U: Send + Sync + 'static,
        F: Fn(&Subject, T) -> U + Send + Sync + 'static,
    {
        let tap = Arc::new(Tap::new(transform));
        self.conduit_subscribers.lock().push(tap.clone());
        for entry in self.channels.iter() {
            entry.channel.subscribe(tap.clone());
        }
        tap
    }
}

impl<P, T> Substrate for Conduit<P, T> {
    fn subject(&self) -> &Subject {
        &self.subject
    }
}

impl<P: Send + Sync, T: Send + Sync> Resource for Conduit<P, T> {
    fn close(&self) {
        for entry in self.channels.iter() {
            entry.channel.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::Circuit;
    use crate::cortex::Cortex;

    #[test]
    fn percept_is_cached_by_name() {
        let cortex = Cortex::new_standalone();
        let circuit = cortex.circuit(None);
        let conduit: Arc<Conduit<Arc<Channel<i32>>, i32>> = circuit.conduit(
            None,
            Arc::new(|channel: Arc<Channel<i32>>| channel),
            None,
        );
        let name = Name::of("a").unwrap();
        let first = conduit.percept(name.clone());
        let second = conduit.percept(name);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn conduit_level_reservoir_spans_existing_and_future_channels() {
        let cortex = Cortex::new_standalone();
        let circuit = cortex.circuit(None);
        let conduit: Arc<Conduit<Arc<Channel<i32>>, i32>> =
            circuit.conduit(None, Arc::new(|channel: Arc<Channel<i32>>| channel), None);

        let existing = conduit.percept(Name::of("existing").unwrap());
        let reservoir = conduit.reservoir();
        existing.dispatch(1);

        let future = conduit.percept(Name::of("future").unwrap());
        future.dispatch(2);

        let captured: Vec<i32> = reservoir.drain().into_iter().map(|c| *c.emission()).collect();
        assert_eq!(captured, vec![1, 2]);
    }
}
