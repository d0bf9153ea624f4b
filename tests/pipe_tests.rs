//! End-to-end pipe contract tests: inline vs. async delivery timing, and
//! the guarantee that a subscriber's failure never surfaces from `emit`.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use substrates::channel::Channel;
use substrates::cortex::Cortex;
use substrates::subscriber::FnSubscriber;
use substrates::Resource;

/// An inline pipe's `emit` has already delivered to every subscriber by the
/// time it returns — no lane, no queueing.
#[test]
fn inline_pipe_delivers_synchronously() {
    let cortex = Cortex::new_standalone();
    let circuit = cortex.circuit(None);
    let conduit: Arc<substrates::conduit::Conduit<Arc<Channel<i64>>, i64>> =
        circuit.conduit(None, Arc::new(|channel: Arc<Channel<i64>>| channel), None);
    let channel = conduit.percept(cortex.name("inline").unwrap());

    let seen = Arc::new(AtomicI64::new(-1));
    let s = seen.clone();
    channel.subscribe(Arc::new(FnSubscriber::new(move |_subj, v: i64| {
        s.store(v, Ordering::SeqCst);
    })));

    let pipe = circuit.inline_pipe(channel);
    pipe.emit(42).unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 42);
    cortex.close();
}

/// `async_pipe` enqueues work onto a lane rather than running it on the
/// calling thread; the result is only guaranteed visible after
/// `await_quiescence`.
#[test]
fn async_pipe_emission_is_visible_after_quiescence() {
    let cortex = Cortex::new_standalone();
    let circuit = cortex.circuit(None);
    let conduit: Arc<substrates::conduit::Conduit<Arc<Channel<i64>>, i64>> =
        circuit.conduit(None, Arc::new(|channel: Arc<Channel<i64>>| channel), None);
    let channel = conduit.percept(cortex.name("async").unwrap());

    let seen = Arc::new(AtomicI64::new(-1));
    let s = seen.clone();
    channel.subscribe(Arc::new(FnSubscriber::new(move |_subj, v: i64| {
        s.store(v, Ordering::SeqCst);
    })));

    let pipe = circuit.async_pipe(channel).unwrap();
    pipe.emit(7).unwrap();
    circuit.await_quiescence(None).unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 7);
    cortex.close();
}

/// A subscriber that panics on delivery never causes `emit` to return an
/// error — emission-time failures are isolated to the error sink, not the
/// emitter's call stack.
#[test]
fn panicking_subscriber_never_propagates_to_emit() {
    let cortex = Cortex::new_standalone();
    let circuit = cortex.circuit(None);
    let conduit: Arc<substrates::conduit::Conduit<Arc<Channel<i64>>, i64>> =
        circuit.conduit(None, Arc::new(|channel: Arc<Channel<i64>>| channel), None);
    let channel = conduit.percept(cortex.name("flaky").unwrap());

    channel.subscribe(Arc::new(FnSubscriber::new(|_subj, _v: i64| {
        panic!("deliberate failure for the emit-isolation test");
    })));

    let downstream_ran = Arc::new(AtomicBool::new(false));
    let d = downstream_ran.clone();
    channel.subscribe(Arc::new(FnSubscriber::new(move |_subj, _v: i64| {
        d.store(true, Ordering::SeqCst);
    })));

    let inline = circuit.inline_pipe(channel.clone());
    assert!(inline.emit(1).is_ok());
    assert!(downstream_ran.load(Ordering::SeqCst));

    let pipe = circuit.async_pipe(channel).unwrap();
    assert!(pipe.emit(2).is_ok());
    circuit.await_quiescence(None).unwrap();
    cortex.close();
}

/// `async_pipe` on a closed circuit fails fast rather than silently
/// swallowing the emission.
#[test]
fn async_pipe_construction_rejected_on_closed_circuit() {
    let cortex = Cortex::new_standalone();
    let circuit = cortex.circuit(None);
    let channel = Channel::<i64>::new(
        substrates::Subject::new(
            substrates::IdAllocator::new().allocate(),
            cortex.name("closed").unwrap(),
            substrates::State::empty(),
        ),
        None,
        Arc::new(|_err| {}),
    );
    circuit.close();
    assert!(circuit.async_pipe(channel).is_err());
    cortex.close();
}
