//! A view exposing only the children of a primary that pass a filter.
//!
//! The listing is rebuilt eagerly whenever the primary reports a change, and
//! replaced as a whole so readers see either the old or the new list. A
//! change that makes an element stop passing is reported as a removal, and
//! one that makes it start passing as an addition: listeners never hear about
//! elements outside the view.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use arbor_core::{
    ChangeEvent, Collection, CollectionConfig, CollectionCore, CollectionId, CollectionRef,
    Context, Descriptor, Element, ElementRef, ElementType, Error, EventKind, Listener,
    ListenerError, ListenerId, NameList, Origin, Path, QuerySystem,
};
use parking_lot::{Mutex, ReentrantMutex, RwLock};

use crate::filter::Filter;
use crate::forward::{self, Forward, Relay};

#[derive(Default)]
struct Listing {
    names: NameList,
    sorted: bool,
}

impl Listing {
    fn contains(&self, name: &str) -> bool {
        if self.sorted {
            self.names
                .binary_search_by(|entry| entry.as_str().cmp(name))
                .is_ok()
        } else {
            self.names.iter().any(|n| n == name)
        }
    }
}

pub struct Filtered {
    core: CollectionCore,
    primary: CollectionRef,
    filter: Arc<dyn Filter>,
    listing: RwLock<Listing>,
    /// Held from computing a listing until it is installed.
    rebuild: ReentrantMutex<()>,
    forward: Mutex<Option<ListenerId>>,
    registered: AtomicBool,
}

impl Filtered {
    pub fn new(
        config: CollectionConfig,
        primary: CollectionRef,
        filter: Arc<dyn Filter>,
    ) -> Result<Arc<Self>, Error> {
        forward::check_name(&config)?;
        let parent = config.resolve_parent()?;
        let registry = config.registry_or_global();
        let filtered = Arc::new_cyclic(|this: &Weak<Filtered>| {
            let this: Weak<dyn Collection> = this.clone();
            Filtered {
                core: CollectionCore::new(
                    config.name.clone(),
                    parent,
                    this,
                    config.propagate,
                    Arc::clone(&registry),
                ),
                primary,
                filter,
                listing: RwLock::new(Listing::default()),
                rebuild: ReentrantMutex::new(()),
                forward: Mutex::new(None),
                registered: AtomicBool::new(false),
            }
        });

        filtered.recompute(&Context::new());
        let id = filtered.primary.add_listener(Forward::new(&filtered));
        *filtered.forward.lock() = Some(id);

        let registered =
            forward::finish(&config, &registry, Arc::clone(&filtered) as CollectionRef)?;
        filtered.registered.store(registered, Ordering::Release);
        Ok(filtered)
    }

    pub fn primary(&self) -> &CollectionRef {
        &self.primary
    }

    /// Whether the current listing is known to be sorted.
    pub fn is_sorted(&self) -> bool {
        self.listing.read().sorted
    }

    /// Rebuild the listing from the primary.
    pub fn recompute(&self, cx: &Context) {
        let _rebuild = self.rebuild.lock();
        let listing = match self.filter.query(self.primary.as_ref()) {
            Some((names, sorted)) => Listing { names, sorted },
            None => self.scan(cx),
        };
        tracing::trace!(path = %self.core.path(), size = listing.names.len(), sorted = listing.sorted, "listing rebuilt");
        *self.listing.write() = listing;
    }

    fn scan(&self, cx: &Context) -> Listing {
        let mut names: Vec<String> = Vec::new();
        let mut sorted = true;
        for name in self.primary.name_list().iter() {
            match self.primary.get_in(cx, name) {
                Ok(Some(element)) if self.filter.accepts(element.as_ref()) => {
                    if names.last().is_some_and(|last| last > name) {
                        sorted = false;
                    }
                    names.push(name.clone());
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(path = %self.primary.path().child(name), error = %e, "skipping element while filtering");
                }
            }
        }
        Listing {
            names: Arc::new(names),
            sorted,
        }
    }

    fn passes(&self, element: &ElementRef) -> bool {
        self.filter.accepts(element.as_ref())
    }

    fn fire_synthesized(
        &self,
        cx: &Context,
        pre: EventKind,
        cause: &ChangeEvent,
        element: Option<ElementRef>,
        old: Option<ElementRef>,
    ) {
        let cause = Arc::new(cause.clone());
        let event = ChangeEvent::new(pre, self, cause.name())
            .with_element(element)
            .with_old(old)
            .caused_by(Some(cause));
        if let Err(veto) = self.core.fire_pre(cx, &event) {
            tracing::debug!(path = %event.path(), reason = %veto.reason, "veto of a synthesized event ignored");
        }
        self.core.fire_post(cx, event.with_kind(pre.post()));
    }
}

impl Relay for Filtered {
    fn relay(&self, cx: &Context, event: &ChangeEvent) -> Result<(), ListenerError> {
        if event.kind().is_pre() {
            return Ok(());
        }
        if forward::pass_descendant(&self.core, self.primary.id(), cx, event) {
            return Ok(());
        }
        let name = event.name();
        let (was_listed, listed) = {
            let _rebuild = self.rebuild.lock();
            let was_listed = !name.is_empty() && self.listing.read().contains(name);
            self.recompute(cx);
            (was_listed, !name.is_empty() && self.listing.read().contains(name))
        };

        if name.is_empty() {
            self.core.fire_post(cx, event.republished(self));
            return Ok(());
        }

        match event.kind() {
            EventKind::Added => {
                if listed {
                    self.core.fire_post(cx, event.republished(self));
                }
            }
            EventKind::Changed => match (was_listed, listed) {
                (true, true) => self.core.fire_post(cx, event.republished(self)),
                (true, false) => {
                    let old = event.old().or(event.element()).cloned();
                    self.fire_synthesized(cx, EventKind::WillRemove, event, None, old);
                }
                (false, true) => {
                    self.fire_synthesized(
                        cx,
                        EventKind::WillAdd,
                        event,
                        event.element().cloned(),
                        None,
                    );
                }
                (false, false) => {}
            },
            EventKind::Removed => {
                if was_listed {
                    self.core.fire_post(cx, event.republished(self));
                }
            }
            _ => {}
        }
        Ok(())
    }
}

impl Element for Filtered {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn origin(&self) -> Option<CollectionRef> {
        self.core.origin()
    }

    fn element_type(&self) -> ElementType {
        ElementType::COLLECTION
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn path(&self) -> Path {
        self.core.path()
    }

    fn descriptor(&self) -> Descriptor {
        Descriptor::new(ElementType::COLLECTION, false)
    }

    fn into_collection(self: Arc<Self>) -> Option<CollectionRef> {
        Some(self)
    }
}

impl Collection for Filtered {
    fn id(&self) -> CollectionId {
        self.core.id()
    }

    fn into_element(self: Arc<Self>) -> ElementRef {
        self
    }

    fn handle(&self) -> Origin {
        self.core.handle()
    }

    fn size(&self) -> usize {
        self.listing.read().names.len()
    }

    fn child_type(&self) -> ElementType {
        self.primary.child_type()
    }

    fn is_mutable(&self) -> bool {
        self.primary.is_mutable()
    }

    fn is_acceptable(&self, element_type: &ElementType) -> bool {
        self.primary.is_acceptable(element_type)
    }

    fn contains(&self, name: &str) -> bool {
        self.listing.read().contains(name)
    }

    fn get_in(&self, cx: &Context, name: &str) -> Result<Option<ElementRef>, Error> {
        if !self.contains(name) {
            return Ok(None);
        }
        Ok(self
            .primary
            .get_in(cx, name)?
            .filter(|element| self.passes(element)))
    }

    /// Writes through to the primary. An element that does not pass is
    /// stored but stays invisible here.
    fn put_in(&self, cx: &Context, element: ElementRef) -> Result<Option<ElementRef>, Error> {
        let previous = self.primary.put_in(cx, element)?;
        Ok(previous.filter(|element| self.passes(element)))
    }

    fn remove_in(&self, cx: &Context, name: &str) -> Result<Option<ElementRef>, Error> {
        if !self.contains(name) {
            return Ok(None);
        }
        self.primary.remove_in(cx, name)
    }

    fn release(&self, name: &str) {
        self.primary.release(name);
    }

    fn name_list(&self) -> NameList {
        Arc::clone(&self.listing.read().names)
    }

    fn descriptor_of(&self, name: &str) -> Option<Descriptor> {
        if self.contains(name) {
            self.primary.descriptor_of(name)
        } else {
            None
        }
    }

    fn is_valid(&self) -> bool {
        self.primary.is_valid()
    }

    fn reinitialize(&self, cx: &Context) -> Result<(), Error> {
        self.primary.reinitialize(cx)?;
        self.recompute(cx);
        Ok(())
    }

    fn close(&self) {
        if let Some(id) = self.forward.lock().take() {
            self.primary.remove_listener(id);
        }
        *self.listing.write() = Listing::default();
        if self.registered.swap(false, Ordering::AcqRel) {
            self.core
                .registry()
                .release_root(self.core.name(), self.core.id());
        }
    }

    fn add_listener(&self, listener: Arc<dyn Listener>) -> ListenerId {
        self.core.listeners().add(listener)
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        self.core.listeners().remove(id)
    }

    fn is_propagating(&self) -> bool {
        self.core.is_propagating()
    }

    fn propagate(&self, cx: &Context, event: &Arc<ChangeEvent>) {
        self.core.propagate(cx, event);
    }

    fn query_system(&self) -> Option<Arc<dyn QuerySystem>> {
        None
    }
}
