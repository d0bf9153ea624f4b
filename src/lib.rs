//! # Substrates
//!
//! A high-throughput, in-process observability core: hierarchical circuits,
//! channels, and flow pipelines for emitting typed values from producers to
//! subscribers with predictable, low per-emission cost.
//!
//! ## Key components
//!
//! - [`Cortex`] — the process-wide bootstrap into circuits, scopes, and names.
//! - [`circuit::Circuit`] — a scheduling domain of one or more lane threads.
//! - [`conduit::Conduit`] — a typed, name-keyed container of channels.
//! - [`channel::Channel`] — an addressable emission site bound to a [`Subject`].
//! - [`pipe::Pipe`] — the `emit(T)` entry point, inline or lane-queued.
//! - [`flow::Flow`] / [`flow::FlowTemplate`] — the declarative per-channel
//!   transformation pipeline (guard, diff, sample, sift, reduce, ...).
//! - [`subscriber::Subscriber`] / [`subscriber::Subscription`] — per-emission
//!   observers with idempotent unsubscribe.
//! - [`reservoir::Reservoir`] / [`reservoir::Tap`] — buffered capture of
//!   processed emissions.
//! - [`Scope`] — a tree of lifetime brackets with cascading, idempotent close.
//! - [`Subject`] / [`Name`] / [`State`] — the hierarchical identity and
//!   attribute model attached to every emission site.
//!
//! This crate never returns emission-time failures (a panicking subscriber,
//! a misbehaving operator) from `Pipe::emit`; those are routed to a
//! circuit's error sink instead. Configuration and validation errors — a
//! malformed [`Name`] segment, an out-of-range `sample(rate)` — surface
//! synchronously to the call that made the mistake. See [`error`].

pub mod channel;
pub mod circuit;
pub mod conduit;
pub mod config;
pub mod cortex;
pub mod error;
pub mod flow;
pub mod id;
pub mod name;
pub mod pipe;
pub mod reservoir;
pub mod scope;
pub mod state;
pub mod subject;
pub mod subscriber;

pub use channel::Channel;
pub use circuit::{Circuit, ErrorSink};
pub use conduit::{Composer, Conduit};
pub use config::{CircuitConfig, CortexConfig};
pub use cortex::Cortex;
pub use error::{SubstratesError, SubstratesResult};
pub use flow::{Flow, FlowOp, FlowTemplate};
pub use id::{Id, IdAllocator};
pub use name::Name;
pub use pipe::{Capture, EmptyPipe, FunctionPipe, Inlet, Pipe};
pub use reservoir::{Reservoir, Tap};
pub use scope::{ReleaseHandle, Scope};
pub use state::{Slot, SlotValue, State};
pub use subject::{Resource, Subject, Substrate};
pub use subscriber::{FnSubscriber, Subscriber, Subscription};
