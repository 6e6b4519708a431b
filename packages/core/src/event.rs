//! Change events fired around collection mutations.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::collection::{Collection, CollectionId, CollectionRef};
use crate::element::{ElementRef, Origin};
use crate::path::Path;

/// What happened (or is about to happen) to an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    WillAdd,
    Added,
    WillChange,
    Changed,
    WillRemove,
    Removed,
}

impl EventKind {
    /// Pre-notifications may be vetoed; post-notifications may not.
    pub fn is_pre(self) -> bool {
        matches!(
            self,
            EventKind::WillAdd | EventKind::WillChange | EventKind::WillRemove
        )
    }

    /// The post-notification that follows this kind.
    pub fn post(self) -> EventKind {
        match self {
            EventKind::WillAdd | EventKind::Added => EventKind::Added,
            EventKind::WillChange | EventKind::Changed => EventKind::Changed,
            EventKind::WillRemove | EventKind::Removed => EventKind::Removed,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventKind::WillAdd => "willAdd",
            EventKind::Added => "added",
            EventKind::WillChange => "willChange",
            EventKind::Changed => "changed",
            EventKind::WillRemove => "willRemove",
            EventKind::Removed => "removed",
        };
        f.write_str(s)
    }
}

/// A change notification.
///
/// `primary` links an event to the one that caused it: decorators set it
/// when re-publishing a source event, propagation sets it when re-firing a
/// descendant's event on an ancestor. Events derived from the same original
/// share a delivery trail so a collection never handles one twice.
#[derive(Clone)]
pub struct ChangeEvent {
    kind: EventKind,
    source: Origin,
    source_id: CollectionId,
    source_path: Path,
    name: String,
    element: Option<ElementRef>,
    old: Option<ElementRef>,
    primary: Option<Arc<ChangeEvent>>,
    trail: Arc<Mutex<Vec<CollectionId>>>,
}

impl ChangeEvent {
    pub fn new(kind: EventKind, source: &dyn Collection, name: impl Into<String>) -> Self {
        Self {
            kind,
            source: source.handle(),
            source_id: source.id(),
            source_path: source.path(),
            name: name.into(),
            element: None,
            old: None,
            primary: None,
            trail: Arc::default(),
        }
    }

    #[must_use]
    pub fn with_element(mut self, element: Option<ElementRef>) -> Self {
        self.element = element;
        self
    }

    #[must_use]
    pub fn with_old(mut self, old: Option<ElementRef>) -> Self {
        self.old = old;
        self
    }

    #[must_use]
    pub fn caused_by(mut self, primary: Option<Arc<ChangeEvent>>) -> Self {
        self.primary = primary;
        self
    }

    /// Same event under another kind, with a fresh delivery trail.
    #[must_use]
    pub fn with_kind(&self, kind: EventKind) -> Self {
        Self {
            kind,
            trail: Arc::default(),
            ..self.clone()
        }
    }

    /// Copy of this event for delivery to an ancestor. The copy points at the
    /// originating event and shares this event's delivery trail.
    pub fn propagated(self: &Arc<Self>) -> Arc<ChangeEvent> {
        let primary = self.primary.clone().unwrap_or_else(|| Arc::clone(self));
        Arc::new(ChangeEvent {
            primary: Some(primary),
            ..(**self).clone()
        })
    }

    /// This event as re-published by `source`, a decorator over the
    /// collection that fired it. Shares this event's delivery trail, so an
    /// ancestor reachable through both collections hears it once.
    pub fn republished(&self, source: &dyn Collection) -> ChangeEvent {
        ChangeEvent {
            source: source.handle(),
            source_id: source.id(),
            source_path: source.path(),
            primary: Some(Arc::new(self.clone())),
            ..self.clone()
        }
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// The collection that fired the event, if it is still alive.
    pub fn source(&self) -> Option<CollectionRef> {
        self.source.get()
    }

    pub fn source_id(&self) -> CollectionId {
        self.source_id
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    /// Name of the affected element within the source collection.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Full path of the affected element.
    pub fn path(&self) -> Path {
        self.source_path.child(&self.name)
    }

    /// The new element, for adds and changes.
    pub fn element(&self) -> Option<&ElementRef> {
        self.element.as_ref()
    }

    /// The previous element, for changes and removals.
    pub fn old(&self) -> Option<&ElementRef> {
        self.old.as_ref()
    }

    pub fn primary(&self) -> Option<&Arc<ChangeEvent>> {
        self.primary.as_ref()
    }

    /// Follow `primary` links to the first event of the chain.
    pub fn root_cause(&self) -> &ChangeEvent {
        let mut current = self;
        while let Some(primary) = current.primary.as_deref() {
            current = primary;
        }
        current
    }

    /// True if any event in the `primary` chain was fired by `id`.
    pub fn is_caused_by(&self, id: CollectionId) -> bool {
        let mut current = self.primary.as_deref();
        while let Some(event) = current {
            if event.source_id == id {
                return true;
            }
            current = event.primary.as_deref();
        }
        false
    }

    /// Record delivery to `id`. Returns false if it was already delivered.
    pub fn mark_delivered(&self, id: CollectionId) -> bool {
        let mut trail = self.trail.lock();
        if trail.contains(&id) {
            false
        } else {
            trail.push(id);
            true
        }
    }
}

impl fmt::Debug for ChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeEvent")
            .field("kind", &self.kind)
            .field("path", &self.path())
            .field("has_primary", &self.primary.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pre_and_post_kinds() {
        assert!(EventKind::WillAdd.is_pre());
        assert!(!EventKind::Removed.is_pre());
        assert_eq!(EventKind::WillChange.post(), EventKind::Changed);
        assert_eq!(EventKind::Removed.post(), EventKind::Removed);
        assert_eq!(EventKind::WillRemove.to_string(), "willRemove");
    }
}
