//! `Circuit`: a scheduling domain of one or more lanes, each a dedicated
//! OS thread draining a FIFO queue of emission work.
//!
//! A `Circuit` is a `Substrate` + `Resource` owning lane queues and the
//! channels scheduled on them. Each lane is a `std::thread` worker draining
//! a `crossbeam_channel` queue, and quiescence is a real barrier: `await`
//! enqueues a marker behind every already-queued emission on a lane and
//! blocks on its acknowledgement, rather than polling a counter.
//!
//! There is no scheduled-clock concept here — the Cortex has nothing
//! resembling `Clock`/`ClockCycle`.

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, error};

use crate::channel::Channel;
use crate::conduit::{Composer, Conduit};
use crate::config::CircuitConfig;
use crate::error::{SubstratesError, SubstratesResult};
use crate::flow::FlowTemplate;
use crate::id::IdAllocator;
use crate::name::Name;
use crate::pipe::Pipe;
use crate::state::State;
use crate::subject::{Resource, Substrate, Subject};

/// Routes a delivery-time failure (a panicking subscriber, an operator that
/// panicked) out of the lane thread that observed it. Never surfaced from
/// `Pipe::emit` — emission-time failures never propagate to the emitter.
pub type ErrorSink = Arc<dyn Fn(SubstratesError) + Send + Sync>;

const OPEN: u8 = 0;
const CLOSING: u8 = 1;
const CLOSED: u8 = 2;

enum WorkItem {
    Run(Box<dyn FnOnce() + Send>),
    Barrier(Sender<()>),
    Shutdown,
}

/// One scheduling lane: a thread plus the queue feeding it. Every channel
/// is pinned to exactly one lane for its lifetime (by hashing its Id), so
/// all emissions to that channel are delivered in strict FIFO order and
/// cyclic emissions through it never cross lanes.
struct Lane {
    sender: Sender<WorkItem>,
    handle: Mutex<Option<JoinHandle<()>>>,
    /// Counts every `Run` item ever enqueued. `await_quiescence` compares
    /// this before and after each barrier round to detect cyclic emissions
    /// (a subscriber emitting back into the circuit while its triggering
    /// item is mid-delivery) that landed behind the barrier already in
    /// flight — a single barrier round would miss those.
    enqueued: AtomicUsize,
}

impl Lane {
    fn spawn(index: usize, bound: Option<usize>, error_sink: ErrorSink) -> Lane {
        let (sender, receiver): (Sender<WorkItem>, Receiver<WorkItem>) = match bound {
            Some(n) => bounded(n),
            None => unbounded(),
        };
        let handle = std::thread::Builder::new()
            .name(format!("substrates-lane-{index}"))
            .spawn(move || lane_loop(receiver, error_sink))
            .expect("failed to spawn circuit lane thread");
        Lane {
            sender,
            handle: Mutex::new(Some(handle)),
            enqueued: AtomicUsize::new(0),
        }
    }

    /// Blocking send, used only for `Shutdown`: must land even behind a full
    /// bounded queue, since dropping the sender without it would leave the
    /// lane thread parked in `recv()` forever (the `Lane` itself, not just a
    /// clone, holds the only sender handles still alive at that point).
    fn send_shutdown(&self) {
        let _ = self.sender.send(WorkItem::Shutdown);
    }

    fn try_send(&self, item: WorkItem) -> SubstratesResult<()> {
        if matches!(item, WorkItem::Run(_)) {
            self.enqueued.fetch_add(1, Ordering::AcqRel);
        }
        self.sender.try_send(item).map_err(|e| match e {
            crossbeam_channel::TrySendError::Full(_) => {
                SubstratesError::rejected("lane queue is full")
            }
            crossbeam_channel::TrySendError::Disconnected(_) => {
                SubstratesError::closed("circuit is closed")
            }
        })
    }
}

fn lane_loop(receiver: Receiver<WorkItem>, error_sink: ErrorSink) {
    while let Ok(item) = receiver.recv() {
        match item {
            WorkItem::Run(work) => {
                if let Err(payload) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(work))
                {
                    let message = panic_message(payload);
                    error!(%message, "circuit lane work item panicked");
                    error_sink(SubstratesError::callback_failure(message));
                }
            }
            WorkItem::Barrier(ack) => {
                let _ = ack.send(());
            }
            WorkItem::Shutdown => break,
        }
    }
    debug!("circuit lane thread exiting, queue drained");
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Shared circuit state. `Circuit` is a thin `Arc<CircuitInner>` handle so
/// cloning it is cheap and every clone observes the same lifecycle.
pub struct CircuitInner {
    subject: Subject,
    config: CircuitConfig,
    state: AtomicU8,
    lanes: Vec<Lane>,
    next_round_robin: AtomicUsize,
    conduits: Mutex<Vec<Arc<dyn Resource>>>,
    ids: IdAllocator,
    error_sink: ErrorSink,
}

impl CircuitInner {
    fn ensure_open(&self) -> SubstratesResult<()> {
        if self.state.load(Ordering::Acquire) != OPEN {
            return Err(SubstratesError::closed("circuit is closed"));
        }
        Ok(())
    }

    /// Pins a subject to a lane by hashing its `Id`. Stable for the
    /// subject's lifetime: the same channel always lands on the same lane,
    /// which is what makes per-channel FIFO hold even when several channels
    /// share a lane.
    fn lane_index_for(&self, subject: &Subject) -> usize {
        (subject.id().as_u64() as usize) % self.lanes.len()
    }

    fn any_lane(&self) -> usize {
        self.next_round_robin.fetch_add(1, Ordering::Relaxed) % self.lanes.len()
    }
}

/// A scheduling domain owning one or more lanes and the conduits built on
/// it. Cheap to clone; every clone refers to the same underlying lanes.
#[derive(Clone)]
pub struct Circuit {
    inner: Arc<CircuitInner>,
}

impl Circuit {
    pub(crate) fn new(subject: Subject, config: CircuitConfig, error_sink: ErrorSink) -> Circuit {
        let lanes = (0..config.lanes.max(1))
            .map(|i| Lane::spawn(i, config.queue_bound, error_sink.clone()))
            .collect();
        Circuit {
            inner: Arc::new(CircuitInner {
                subject,
                config,
                state: AtomicU8::new(OPEN),
                lanes,
                next_round_robin: AtomicUsize::new(0),
                conduits: Mutex::new(Vec::new()),
                ids: IdAllocator::new(),
                error_sink,
            }),
        }
    }

    pub fn config(&self) -> &CircuitConfig {
        &self.inner.config
    }

    /// Builds a new [`Conduit`] under this circuit. `name` defaults to an
    /// anonymous, circuit-unique segment when `None`.
    pub fn conduit<P, T>(
        &self,
        name: Option<Name>,
        composer: Composer<P, T>,
        flow_template: Option<FlowTemplate<T>>,
    ) -> Arc<Conduit<P, T>>
    where
        P: Clone + Send + Sync + 'static,
        T: Clone + Send + Sync + 'static,
    {
        let name = name.unwrap_or_else(|| {
            Name::of(format!("conduit-{}", self.inner.ids.allocate()))
                .expect("generated name is valid")
        });
        let subject = Subject::with_parent(
            self.inner.ids.allocate(),
            name,
            State::empty(),
            self.inner.subject.clone(),
        );
        let conduit = Conduit::new(
            subject,
            self.inner.clone(),
            composer,
            flow_template,
            self.inner.error_sink.clone(),
        );
        self.inner.conduits.lock().push(conduit.clone());
        conduit
    }

    /// A pipe that dispatches synchronously on the calling thread: the
    /// cost of `emit` is exactly the cost of the channel's flow and its
    /// subscribers, with no queueing — the "inline" pipe kind.
    pub fn inline_pipe<T>(&self, channel: Arc<Channel<T>>) -> Arc<dyn Pipe<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        Arc::new(InlinePipe { channel })
    }

    /// A pipe that enqueues the emission onto the channel's pinned lane and
    /// returns immediately — the "async" pipe kind: the calling thread never
    /// runs flow or subscriber code.
    pub fn async_pipe<T>(&self, channel: Arc<Channel<T>>) -> SubstratesResult<Arc<dyn Pipe<T>>>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.inner.ensure_open()?;
        let lane_index = self.inner.lane_index_for(channel.subject());
        Ok(Arc::new(AsyncPipe {
            channel,
            inner: self.inner.clone(),
            lane_index,
        }))
    }

    /// Blocks the calling thread until every emission enqueued on every
    /// lane before this call — and every cyclic emission those trigger in
    /// turn — has been delivered. Each lane is driven by
    /// its own barrier loop: send a marker behind the current queue, wait
    /// for its ack, then check whether new work landed on that lane while
    /// the marker was in flight (a subscriber emitting back into the
    /// circuit mid-delivery). If so, the marker alone wasn't enough — round
    /// again. The loop terminates once a round observes no new enqueues.
    pub fn await_quiescence(&self, deadline: Option<Duration>) -> SubstratesResult<()> {
        let start = Instant::now();
        for lane in &self.inner.lanes {
            loop {
                let before = lane.enqueued.load(Ordering::Acquire);
                let (tx, rx) = bounded(1);
                lane.try_send(WorkItem::Barrier(tx))?;
                match deadline {
                    None => rx.recv().map_err(|_| {
                        SubstratesError::internal(
                            "circuit lane disconnected while awaiting barrier",
                        )
                    })?,
                    Some(budget) => {
                        let remaining = budget.saturating_sub(start.elapsed());
                        match rx.recv_timeout(remaining) {
                            Ok(()) => {}
                            Err(RecvTimeoutError::Timeout) => {
                                return Err(SubstratesError::quiescence_timeout(budget));
                            }
                            Err(RecvTimeoutError::Disconnected) => {
                                return Err(SubstratesError::internal(
                                    "circuit lane disconnected while awaiting barrier",
                                ))
                            }
                        }
                    }
                }
                let after = lane.enqueued.load(Ordering::Acquire);
                if after == before {
                    break;
                }
            }
        }
        Ok(())
    }

    /// Schedules an arbitrary unit of work onto one of this circuit's lanes,
    /// round-robin. Used internally by conduits that need lane-affine
    /// background work; not part of the emission path.
    pub(crate) fn schedule<F>(&self, work: F) -> SubstratesResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.ensure_open()?;
        let index = self.inner.any_lane();
        self.inner.lanes[index].try_send(WorkItem::Run(Box::new(work)))
    }
}

impl Substrate for Circuit {
    fn subject(&self) -> &Subject {
        &self.inner.subject
    }
}

impl Resource for Circuit {
    /// `CLOSING -> CLOSED`: stops accepting new async emissions, drains
    /// every lane's already-queued work to completion, joins the lane
    /// threads, then closes every conduit built on this circuit. Idempotent.
    fn close(&self) {
        if self
            .inner
            .state
            .compare_exchange(OPEN, CLOSING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        for lane in &self.inner.lanes {
            if let Some(handle) = lane.handle.lock().take() {
                lane.send_shutdown();
                let _ = handle.join();
            }
        }

        for conduit in self.inner.conduits.lock().drain(..) {
            conduit.close();
        }

        self.inner.state.store(CLOSED, Ordering::Release);
    }
}

struct InlinePipe<T> {
    channel: Arc<Channel<T>>,
}

impl<T: Clone + Send + Sync + 'static> Pipe<T> for InlinePipe<T> {
    fn emit(&self, value: T) -> SubstratesResult<()> {
        self.channel.dispatch(value);
        Ok(())
    }
}

struct AsyncPipe<T> {
    channel: Arc<Channel<T>>,
    inner: Arc<CircuitInner>,
    lane_index: usize,
}

impl<T: Clone + Send + Sync + 'static> Pipe<T> for AsyncPipe<T> {
    fn emit(&self, value: T) -> SubstratesResult<()> {
        self.inner.ensure_open()?;
        let channel = self.channel.clone();
        self.inner.lanes[self.lane_index].try_send(WorkItem::Run(Box::new(move || {
            channel.dispatch(value);
        })))
    }
}
