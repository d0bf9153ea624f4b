//! `Cortex`: the process-wide bootstrap into circuits, scopes, and names.
//!
//! A single bootstrap object that constructs circuits rather than memoizing
//! them by name (see DESIGN.md's Open Question resolution): a named circuit
//! is a distinct scheduling domain each time it's requested, so two
//! `circuit(Some("x"))` calls get two independent lane pools rather than
//! silently sharing one.

use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::warn;

use crate::circuit::{Circuit, ErrorSink};
use crate::config::CortexConfig;
use crate::error::{SubstratesError, SubstratesResult};
use crate::id::IdAllocator;
use crate::name::Name;
use crate::scope::Scope;
use crate::state::State;
use crate::subject::{Resource, Substrate, Subject};

fn default_error_sink() -> ErrorSink {
    Arc::new(|err: SubstratesError| {
        warn!(%err, "unhandled substrates delivery failure");
    })
}

/// The process-wide bootstrap object. Owns the root `Scope`, the top-level
/// `Id` space, and tracks every circuit it has constructed so `close()` can
/// tear them all down.
pub struct Cortex {
    subject: Subject,
    scope: Arc<Scope>,
    ids: IdAllocator,
    config: CortexConfig,
    circuits: Mutex<Vec<Circuit>>,
    error_sink: ErrorSink,
}

static GLOBAL: Lazy<Cortex> = Lazy::new(|| Cortex::bootstrap(CortexConfig::default()));

impl Cortex {
    fn bootstrap(config: CortexConfig) -> Cortex {
        let ids = IdAllocator::new();
        let subject = Subject::new(ids.allocate(), Name::of("cortex").expect("static name"), State::empty());
        Cortex {
            subject,
            scope: Scope::root(None),
            ids,
            config,
            circuits: Mutex::new(Vec::new()),
            error_sink: default_error_sink(),
        }
    }

    /// The single process-wide Cortex, lazily constructed on first access.
    pub fn global() -> &'static Cortex {
        &GLOBAL
    }

    /// An independent Cortex instance with its own root scope, Id space,
    /// and circuit registry — distinct from [`Cortex::global`]. Intended for
    /// tests and embeddings that need isolation from the process singleton.
    pub fn new_standalone() -> Cortex {
        Cortex::bootstrap(CortexConfig::default())
    }

    pub fn with_config(config: CortexConfig) -> Cortex {
        Cortex::bootstrap(config)
    }

    /// Interns a dotted path (`"a.b.c"`) as a `Name`.
    pub fn name(&self, path: &str) -> SubstratesResult<Name> {
        Name::parse(path).map_err(SubstratesError::invalid_argument)
    }

    /// Opens a scope bound to the Cortex's root scope.
    pub fn scope(&self, name: Option<Name>) -> Arc<Scope> {
        self.scope.open(name)
    }

    /// The empty `State`, the starting point for `State::add` composition.
    pub fn state(&self) -> State {
        State::empty()
    }

    /// Constructs a new circuit using the Cortex's default `CircuitConfig`.
    /// Every call returns an independent circuit with its own lane pool,
    /// even when called twice with the same name.
    pub fn circuit(&self, name: Option<Name>) -> Circuit {
        self.circuit_with_config(name, self.config.default_circuit.clone())
    }

    pub fn circuit_with_config(
        &self,
        name: Option<Name>,
        config: crate::config::CircuitConfig,
    ) -> Circuit {
        let name = name.unwrap_or_else(|| {
            Name::of(format!("circuit-{}", self.ids.allocate())).expect("generated name is valid")
        });
        let subject = Subject::with_parent(
            self.ids.allocate(),
            name,
            State::empty(),
            self.subject.clone(),
        );
        let circuit = Circuit::new(subject, config, self.error_sink.clone());
        self.circuits.lock().push(circuit.clone());
        circuit
    }

    pub fn config(&self) -> &CortexConfig {
        &self.config
    }
}

impl Substrate for Cortex {
    fn subject(&self) -> &Subject {
        &self.subject
    }
}

impl Resource for Cortex {
    /// Idempotent: closes every circuit this Cortex has constructed, then
    /// its root scope. `Scope::close` is itself idempotent, so repeated
    /// calls are safe even though `circuits.lock().drain(..)` only runs
    /// once (subsequent calls simply close an already-empty root scope).
    fn close(&self) {
        for circuit in self.circuits.lock().drain(..) {
            circuit.close();
        }
        for failure in self.scope.close() {
            (self.error_sink)(failure);
        }
    }
}
