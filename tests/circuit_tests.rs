//! End-to-end circuit tests: lane scheduling, quiescence, and the
//! per-channel / per-(thread, lane) FIFO ordering guarantees.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use substrates::config::CircuitConfig;
use substrates::cortex::Cortex;
use substrates::subscriber::FnSubscriber;
use substrates::Resource;

/// Seed scenario 6: async pipe, 10_000 emissions, `await()`, then the
/// subscriber's counter must read exactly 10_000.
#[test]
fn await_observes_ten_thousand_emissions() {
    let cortex = Cortex::new_standalone();
    let circuit = cortex.circuit(None);
    let conduit: Arc<substrates::conduit::Conduit<Arc<substrates::channel::Channel<i64>>, i64>> =
        circuit.conduit(None, Arc::new(|channel: Arc<substrates::channel::Channel<i64>>| channel), None);
    let channel = conduit.percept(cortex.name("counter").unwrap());

    let counter = Arc::new(AtomicUsize::new(0));
    let c = counter.clone();
    channel.subscribe(Arc::new(FnSubscriber::new(move |_subject, _value: i64| {
        c.fetch_add(1, Ordering::SeqCst);
    })));

    let pipe = circuit.async_pipe(channel).unwrap();
    for v in 0..10_000i64 {
        pipe.emit(v).unwrap();
    }
    circuit.await_quiescence(None).unwrap();

    assert_eq!(counter.load(Ordering::SeqCst), 10_000);
    cortex.close();
}

/// Per-subject FIFO: emissions into the same channel from one thread are
/// delivered to every subscriber in emit order.
#[test]
fn per_channel_emissions_preserve_emit_order() {
    let cortex = Cortex::new_standalone();
    let circuit = cortex.circuit(None);
    let conduit: Arc<substrates::conduit::Conduit<Arc<substrates::channel::Channel<i64>>, i64>> =
        circuit.conduit(None, Arc::new(|channel: Arc<substrates::channel::Channel<i64>>| channel), None);
    let channel = conduit.percept(cortex.name("ordered").unwrap());

    let order = Arc::new(Mutex::new(Vec::new()));
    let o1 = order.clone();
    let o2 = order.clone();
    channel.subscribe(Arc::new(FnSubscriber::new(move |_s, v: i64| {
        o1.lock().unwrap().push(("a", v));
    })));
    channel.subscribe(Arc::new(FnSubscriber::new(move |_s, v: i64| {
        o2.lock().unwrap().push(("b", v));
    })));

    let pipe = circuit.async_pipe(channel).unwrap();
    for v in 0..200i64 {
        pipe.emit(v).unwrap();
    }
    circuit.await_quiescence(None).unwrap();

    let seen = order.lock().unwrap();
    let a_values: Vec<i64> = seen.iter().filter(|(who, _)| *who == "a").map(|(_, v)| *v).collect();
    let b_values: Vec<i64> = seen.iter().filter(|(who, _)| *who == "b").map(|(_, v)| *v).collect();
    assert_eq!(a_values, (0..200).collect::<Vec<_>>());
    assert_eq!(b_values, (0..200).collect::<Vec<_>>());
    cortex.close();
}

/// A circuit closed before quiescence still drains everything enqueued
/// before the close.
#[test]
fn close_drains_pending_emissions_before_teardown() {
    let cortex = Cortex::new_standalone();
    let circuit = cortex.circuit(None);
    let conduit: Arc<substrates::conduit::Conduit<Arc<substrates::channel::Channel<i64>>, i64>> =
        circuit.conduit(None, Arc::new(|channel: Arc<substrates::channel::Channel<i64>>| channel), None);
    let channel = conduit.percept(cortex.name("drained").unwrap());

    let counter = Arc::new(AtomicUsize::new(0));
    let c = counter.clone();
    channel.subscribe(Arc::new(FnSubscriber::new(move |_s, _v: i64| {
        c.fetch_add(1, Ordering::SeqCst);
    })));

    let pipe = circuit.async_pipe(channel).unwrap();
    for v in 0..500i64 {
        pipe.emit(v).unwrap();
    }
    cortex.close();

    assert_eq!(counter.load(Ordering::SeqCst), 500);
}

/// Multiple lanes still deliver every emission; pinning by Id keeps any one
/// channel's own ordering intact even when other channels share lanes.
#[test]
fn multi_lane_circuit_delivers_every_channel() {
    let cortex = Cortex::new_standalone();
    let circuit = cortex.circuit_with_config(None, CircuitConfig::default().with_lanes(4));
    let conduit: Arc<substrates::conduit::Conduit<Arc<substrates::channel::Channel<i64>>, i64>> =
        circuit.conduit(None, Arc::new(|channel: Arc<substrates::channel::Channel<i64>>| channel), None);

    let total = Arc::new(AtomicUsize::new(0));
    for i in 0..8 {
        let channel = conduit.percept(cortex.name(&format!("chan-{i}")).unwrap());
        let t = total.clone();
        channel.subscribe(Arc::new(FnSubscriber::new(move |_s, _v: i64| {
            t.fetch_add(1, Ordering::SeqCst);
        })));
        let pipe = circuit.async_pipe(channel).unwrap();
        for v in 0..50i64 {
            pipe.emit(v).unwrap();
        }
    }
    circuit.await_quiescence(None).unwrap();
    assert_eq!(total.load(Ordering::SeqCst), 400);
    cortex.close();
}
