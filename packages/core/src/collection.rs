//! The collection contract shared by the kernel and every decorator.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::context::Context;
use crate::element::{Descriptor, Element, ElementRef, ElementType, Origin};
use crate::error::Error;
use crate::event::ChangeEvent;
use crate::listener::{Listener, ListenerId, Listeners, Veto};
use crate::path::Path;
use crate::query::QuerySystem;
use crate::registry::Registry;

/// Shared handle to a collection.
pub type CollectionRef = Arc<dyn Collection>;

/// Immutable, shareable list of child names. Collections replace the whole
/// list when it changes; readers never observe a partial rebuild.
pub type NameList = Arc<Vec<String>>;

/// Process-unique identity of a collection instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionId(u64);

static NEXT_COLLECTION_ID: AtomicU64 = AtomicU64::new(1);

impl CollectionId {
    pub fn next() -> Self {
        CollectionId(NEXT_COLLECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An element that owns named child elements.
///
/// Operations that may reach back into the resolver take a [`Context`];
/// [`CollectionExt`] provides context-free shorthands that start a new call
/// chain.
pub trait Collection: Element {
    fn id(&self) -> CollectionId;

    /// This collection as a plain element.
    fn into_element(self: Arc<Self>) -> ElementRef;

    /// Non-owning handle to hand out as the origin of children and events.
    fn handle(&self) -> Origin;

    fn size(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Declared type of the children.
    fn child_type(&self) -> ElementType;

    fn is_mutable(&self) -> bool;

    fn is_acceptable(&self, element_type: &ElementType) -> bool {
        self.child_type().accepts(element_type)
    }

    fn contains(&self, name: &str) -> bool;

    fn get_in(&self, cx: &Context, name: &str) -> Result<Option<ElementRef>, Error>;

    /// Store `element` under its own name. Returns the element it replaced.
    fn put_in(&self, cx: &Context, element: ElementRef) -> Result<Option<ElementRef>, Error>;

    /// Remove the named child. Returns the removed element if it could be
    /// fetched.
    fn remove_in(&self, cx: &Context, name: &str) -> Result<Option<ElementRef>, Error>;

    /// Drop any cached copy of the named child without touching storage.
    fn release(&self, _name: &str) {}

    fn name_list(&self) -> NameList;

    fn descriptor_of(&self, name: &str) -> Option<Descriptor>;

    fn is_valid(&self) -> bool {
        true
    }

    /// Try to bring an invalid collection back into service.
    fn reinitialize(&self, _cx: &Context) -> Result<(), Error> {
        Ok(())
    }

    /// Release backend resources. Idempotent.
    fn close(&self);

    fn add_listener(&self, listener: Arc<dyn Listener>) -> ListenerId;

    fn remove_listener(&self, id: ListenerId) -> bool;

    /// Whether descendant events re-fire on this collection.
    fn is_propagating(&self) -> bool;

    /// Deliver an event that happened at or below this collection to this
    /// collection's listeners, then continue towards the root.
    fn propagate(&self, cx: &Context, event: &Arc<ChangeEvent>);

    fn query_system(&self) -> Option<Arc<dyn QuerySystem>> {
        None
    }

    /// Target of a symbolic link collection.
    fn link_target(&self) -> Option<Path> {
        None
    }
}

impl fmt::Debug for dyn Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("id", &self.id())
            .field("path", &self.path())
            .finish()
    }
}

/// Context-free shorthands; each call starts its own call chain.
pub trait CollectionExt: Collection {
    fn get(&self, name: &str) -> Result<Option<ElementRef>, Error> {
        self.get_in(&Context::new(), name)
    }

    fn put(&self, element: ElementRef) -> Result<Option<ElementRef>, Error> {
        self.put_in(&Context::new(), element)
    }

    fn remove(&self, name: &str) -> Result<Option<ElementRef>, Error> {
        self.remove_in(&Context::new(), name)
    }

    /// Fetch a child that must itself be a collection.
    fn get_collection(&self, name: &str) -> Result<Option<CollectionRef>, Error> {
        match self.get(name)? {
            None => Ok(None),
            Some(element) => match element.into_collection() {
                Some(collection) => Ok(Some(collection)),
                None => Err(Error::InvalidType {
                    path: self.path().child(name),
                    message: "not a collection".to_string(),
                }),
            },
        }
    }
}

impl<T: Collection + ?Sized> CollectionExt for T {}

/// Identity, placement and listener state every collection carries.
pub struct CollectionCore {
    id: CollectionId,
    name: String,
    origin: Origin,
    this: Weak<dyn Collection>,
    listeners: Listeners,
    propagating: bool,
    registry: Arc<Registry>,
}

impl CollectionCore {
    /// `this` is the collection's own weak handle, as handed out by
    /// `Arc::new_cyclic`.
    pub fn new(
        name: impl Into<String>,
        origin: Origin,
        this: Weak<dyn Collection>,
        propagating: bool,
        registry: Arc<Registry>,
    ) -> Self {
        Self {
            id: CollectionId::next(),
            name: name.into(),
            origin,
            this,
            listeners: Listeners::new(),
            propagating,
            registry,
        }
    }

    pub fn id(&self) -> CollectionId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn origin(&self) -> Option<CollectionRef> {
        self.origin.get()
    }

    pub fn handle(&self) -> Origin {
        Origin::from_weak(self.this.clone())
    }

    pub fn this(&self) -> Option<CollectionRef> {
        self.this.upgrade()
    }

    pub fn path(&self) -> Path {
        match self.origin() {
            Some(origin) => origin.path().child(&self.name),
            None => Path::root(&self.name),
        }
    }

    pub fn listeners(&self) -> &Listeners {
        &self.listeners
    }

    pub fn is_propagating(&self) -> bool {
        self.propagating
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn fire_pre(&self, cx: &Context, event: &ChangeEvent) -> Result<(), Veto> {
        self.listeners.fire_pre(cx, event)
    }

    /// Post-notify local listeners, then hand the event to the parent.
    pub fn fire_post(&self, cx: &Context, event: ChangeEvent) {
        let event = Arc::new(event);
        event.mark_delivered(self.id);
        self.listeners.fire_post(cx, &event);
        self.propagate_upward(cx, &event);
    }

    /// The body of [`Collection::propagate`] for collections built on a core.
    pub fn propagate(&self, cx: &Context, event: &Arc<ChangeEvent>) {
        if !event.mark_delivered(self.id) {
            return;
        }
        self.listeners.fire_post(cx, event);
        self.propagate_upward(cx, event);
    }

    /// Re-fire on the structural parent when it propagates and this
    /// collection is not itself still being constructed in this chain.
    pub fn propagate_upward(&self, cx: &Context, event: &Arc<ChangeEvent>) {
        let Some(parent) = self.origin() else {
            return;
        };
        if !parent.is_propagating() {
            return;
        }
        let path = self.path();
        if cx.is_resolving(&path) {
            tracing::trace!(path = %path, "skipping propagation while under construction");
            return;
        }
        parent.propagate(cx, &event.propagated());
    }
}
