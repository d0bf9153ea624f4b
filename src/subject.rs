//! `Subject`: the immutable `(Name, Id, State)` triple attached to every
//! emission.
//!
//! Carries `new`/`with_id`/`with_parent`/`enclosure`/`depth`/`path`/`within`
//! accessors for walking and comparing the ancestry chain. There is no
//! separate `SubjectType` tag; identity is carried entirely by `Id`.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::id::Id;
use crate::name::Name;
use crate::state::State;

#[derive(Clone)]
pub struct Subject {
    id: Id,
    name: Name,
    state: State,
    parent: Option<Arc<Subject>>,
}

impl Subject {
    pub fn new(id: Id, name: Name, state: State) -> Subject {
        Subject {
            id,
            name,
            state,
            parent: None,
        }
    }

    pub fn with_parent(id: Id, name: Name, state: State, parent: Subject) -> Subject {
        Subject {
            id,
            name,
            state,
            parent: Some(Arc::new(parent)),
        }
    }

    pub fn id(&self) -> Id {
        self.id
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    /// The immediate parent subject, the "enclosure".
    pub fn enclosure(&self) -> Option<&Subject> {
        self.parent.as_deref()
    }

    /// The outermost ancestor subject (or `self` if there is none).
    pub fn extremity(&self) -> &Subject {
        match &self.parent {
            None => self,
            Some(parent) => parent.extremity(),
        }
    }

    /// Number of ancestors, including self.
    pub fn depth(&self) -> usize {
        1 + self.parent.as_ref().map(|p| p.depth()).unwrap_or(0)
    }

    /// `true` iff `other` is this subject or an ancestor of it.
    pub fn within(&self, other: &Subject) -> bool {
        if self == other {
            return true;
        }
        self.parent.as_ref().is_some_and(|p| p.within(other))
    }

    /// The dotted path of this subject's name.
    pub fn path(&self) -> String {
        self.name.to_path()
    }

    pub fn ancestors(&self) -> Vec<&Subject> {
        let mut out = Vec::new();
        let mut current = self.enclosure();
        while let Some(parent) = current {
            out.push(parent);
            current = parent.enclosure();
        }
        out
    }
}

impl PartialEq for Subject {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Subject {}

impl PartialOrd for Subject {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Subject {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl fmt::Debug for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subject")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path())
    }
}

/// Anything identified by a `Subject`.
pub trait Substrate {
    fn subject(&self) -> &Subject;
}

/// Anything with a releasable lifetime, registered onto a `Scope`.
/// `close` takes `&self` rather than `&mut self`: resources here are always
/// shared via `Arc` on the delivery path, and a `&mut self` close would need
/// `Arc::get_mut`, which silently fails once any other owner exists.
pub trait Resource: Send + Sync {
    fn close(&self);
}
