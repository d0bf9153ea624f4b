//! `Scope`: a node in a tree of lifetime brackets with idempotent,
//! cascading close.
//!
//! Closing a scope closes all child scopes first, then invokes all
//! registered releases in reverse-registration order. Built around an
//! explicit child list and an explicit `OPEN → CLOSING → CLOSED` state
//! machine.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use parking_lot::Mutex;
use tracing::warn;

use crate::error::SubstratesError;
use crate::name::Name;
use crate::subject::Resource;

const OPEN: u8 = 0;
const CLOSING: u8 = 1;
const CLOSED: u8 = 2;

/// A release action registered on a `Scope`.
type Release = Box<dyn FnOnce() + Send>;

/// A handle returned by [`Scope::register`]. Closing it runs the release
/// exactly once, even if the owning scope closes first.
pub struct ReleaseHandle {
    slot: Arc<Mutex<Option<Release>>>,
}

impl ReleaseHandle {
    pub fn close(&self) {
        if let Some(release) = self.slot.lock().take() {
            release();
        }
    }
}

/// A node in the scope tree.
pub struct Scope {
    name: Option<Name>,
    parent: Option<Arc<Scope>>,
    state: AtomicU8,
    children: Mutex<Vec<Arc<Scope>>>,
    releases: Mutex<Vec<Arc<Mutex<Option<Release>>>>>,
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("name", &self.name)
            .field("state", &self.state.load(Ordering::Acquire))
            .finish()
    }
}

impl Scope {
    /// Creates a detached root scope (used by the Cortex for its own root
    /// and, in tests, for standalone scope trees).
    pub fn root(name: Option<Name>) -> Arc<Scope> {
        Arc::new(Scope {
            name,
            parent: None,
            state: AtomicU8::new(OPEN),
            children: Mutex::new(Vec::new()),
            releases: Mutex::new(Vec::new()),
        })
    }

    pub fn name(&self) -> Option<&Name> {
        self.name.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.state.load(Ordering::Acquire) != OPEN
    }

    /// Opens a child scope bound to this scope's lifetime. If this scope is
    /// already closing or closed, the child is created and immediately
    /// closed, matching the spirit of "closed propagates downward".
    pub fn open(self: &Arc<Self>, name: Option<Name>) -> Arc<Scope> {
        let child = Arc::new(Scope {
            name,
            parent: Some(self.clone()),
            state: AtomicU8::new(OPEN),
            children: Mutex::new(Vec::new()),
            releases: Mutex::new(Vec::new()),
        });
        if self.is_closed() {
            child.close();
            return child;
        }
        self.children.lock().push(child.clone());
        child
    }

    /// Registers a release action. On a closed scope the release runs
    /// synchronously, immediately.
    pub fn register<F>(&self, release: F) -> ReleaseHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let slot = Arc::new(Mutex::new(Some(Box::new(release) as Release)));
        if self.is_closed() {
            if let Some(r) = slot.lock().take() {
                r();
            }
            return ReleaseHandle { slot };
        }
        self.releases.lock().push(slot.clone());
        ReleaseHandle { slot }
    }

    /// Registers a [`Resource`] whose `close` is invoked as the release
    /// action.
    pub fn register_resource(&self, resource: Arc<dyn Resource>) -> ReleaseHandle {
        self.register(move || resource.close())
    }

    /// Idempotent. Closes all child scopes first (in insertion order), then
    /// runs all registered releases in reverse-registration order. Both
    /// phases continue past individual panics so teardown always completes;
    /// every panic encountered along the way is captured and returned as a
    /// composite report rather than discarded, per §7's aggregation
    /// requirement. A scope with a still-open parent also removes itself
    /// from that parent's child list, so a directly-closed child doesn't
    /// linger there until the parent itself closes.
    pub fn close(&self) -> Vec<SubstratesError> {
        if self
            .state
            .compare_exchange(OPEN, CLOSING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Vec::new();
        }

        let mut failures = Vec::new();

        let children = std::mem::take(&mut *self.children.lock());
        for child in children {
            match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| child.close())) {
                Ok(child_failures) => failures.extend(child_failures),
                Err(payload) => {
                    failures.push(SubstratesError::callback_failure(panic_message(payload)))
                }
            }
        }

        let releases = std::mem::take(&mut *self.releases.lock());
        for slot in releases.into_iter().rev() {
            if let Some(release) = slot.lock().take() {
                if let Err(payload) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(release))
                {
                    failures.push(SubstratesError::callback_failure(panic_message(payload)));
                }
            }
        }

        self.remove_from_parent();
        self.state.store(CLOSED, Ordering::Release);
        failures
    }

    /// Drops `self` from its parent's child list, by pointer identity, when
    /// the parent is still open. A parent mid-close (or already closed) has
    /// either already drained its own child list or has nothing left to
    /// drop `self` from, so this is a no-op in that case — avoiding both a
    /// redundant lock and a self-deadlock when called from the parent's own
    /// cascade.
    fn remove_from_parent(&self) {
        if let Some(parent) = &self.parent {
            if !parent.is_closed() {
                let self_ptr = self as *const Scope;
                parent.children.lock().retain(|c| Arc::as_ptr(c) != self_ptr);
            }
        }
    }
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

impl Resource for Scope {
    /// Routes any aggregated close failures to `tracing` — the `Resource`
    /// trait's `close` has no return channel of its own. Callers that need
    /// the composite report directly should call the inherent
    /// `Scope::close`, which returns it.
    fn close(&self) {
        let failures = Scope::close(self);
        if !failures.is_empty() {
            warn!(
                count = failures.len(),
                "scope close aggregated {} failure(s) during teardown",
                failures.len()
            );
        }
    }
}
