//! A view converting the elements of a primary collection to another type.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use arbor_core::{
    ChangeEvent, Collection, CollectionConfig, CollectionCore, CollectionId, CollectionRef,
    Context, Descriptor, Element, ElementCache, ElementRef, ElementType, Error, EventKind,
    Listener, ListenerError, ListenerId, NameList, Origin, Path, QuerySystem,
};
use parking_lot::Mutex;

use crate::forward::{self, Forward, Relay};

/// Two-way conversion between the primary's elements and the view's.
pub trait Converter: Send + Sync {
    /// Type of the converted elements.
    fn output_type(&self) -> ElementType;

    /// Convert a primary element. `origin` is the view's handle, for the
    /// converted element to carry as its owner.
    fn to_output(&self, input: ElementRef, origin: &Origin) -> Result<ElementRef, Error>;

    /// Convert a view element back for storage in the primary.
    fn to_input(&self, output: ElementRef) -> Result<ElementRef, Error>;
}

/// Presents a primary collection of one element type as another.
///
/// Converted elements are cached. Events from the primary are re-fired
/// translated, except those caused by a mutation issued through this view,
/// which the view announces itself once the primary confirms it.
pub struct Transformed {
    core: CollectionCore,
    primary: CollectionRef,
    converter: Arc<dyn Converter>,
    cache: Mutex<Box<dyn ElementCache>>,
    /// Pre-notifications of this view whose primary mutation was reported
    /// done, waiting to be claimed by the call that issued them.
    landed: Mutex<Vec<Arc<ChangeEvent>>>,
    forward: Mutex<Option<ListenerId>>,
    registered: AtomicBool,
}

impl Transformed {
    pub fn new(
        config: CollectionConfig,
        primary: CollectionRef,
        converter: Arc<dyn Converter>,
    ) -> Result<Arc<Self>, Error> {
        forward::check_name(&config)?;
        let parent = config.resolve_parent()?;
        let registry = config.registry_or_global();
        let transformed = Arc::new_cyclic(|this: &Weak<Transformed>| {
            let this: Weak<dyn Collection> = this.clone();
            Transformed {
                core: CollectionCore::new(
                    config.name.clone(),
                    parent,
                    this,
                    config.propagate,
                    Arc::clone(&registry),
                ),
                primary,
                converter,
                cache: Mutex::new(config.cache_policy().build()),
                landed: Mutex::new(Vec::new()),
                forward: Mutex::new(None),
                registered: AtomicBool::new(false),
            }
        });

        let id = transformed
            .primary
            .add_listener(Forward::new(&transformed));
        *transformed.forward.lock() = Some(id);

        let registered =
            forward::finish(&config, &registry, Arc::clone(&transformed) as CollectionRef)?;
        transformed.registered.store(registered, Ordering::Release);
        Ok(transformed)
    }

    pub fn primary(&self) -> &CollectionRef {
        &self.primary
    }

    pub fn cached_len(&self) -> usize {
        self.cache.lock().len()
    }

    fn convert(&self, name: &str, input: ElementRef) -> Result<ElementRef, Error> {
        let output = self.converter.to_output(input, &self.core.handle())?;
        if output.name() != name {
            return Err(Error::NameMismatch {
                path: self.core.path().child(name),
                found: output.name().to_string(),
            });
        }
        Ok(output)
    }

    /// Converted form of an element carried by a primary event.
    fn translate(&self, name: &str, input: Option<&ElementRef>) -> Option<ElementRef> {
        let input = Arc::clone(input?);
        match self.convert(name, input) {
            Ok(output) => Some(output),
            Err(e) => {
                tracing::warn!(path = %self.core.path().child(name), error = %e, "could not convert event payload");
                None
            }
        }
    }

    /// The nearest event of this view in `event`'s cause chain.
    fn own_cause(&self, event: &ChangeEvent) -> Option<Arc<ChangeEvent>> {
        let mut next = event.primary();
        while let Some(cause) = next {
            if cause.source_id() == self.core.id() {
                return Some(Arc::clone(cause));
            }
            next = cause.primary();
        }
        None
    }

    /// Whether the primary reported the mutation announced by `pre`.
    fn claim(&self, pre: &Arc<ChangeEvent>) -> bool {
        let mut landed = self.landed.lock();
        let before = landed.len();
        landed.retain(|event| !Arc::ptr_eq(event, pre));
        landed.len() != before
    }

    fn lookup_best_effort(&self, cx: &Context, name: &str) -> Option<ElementRef> {
        match self.get_in(cx, name) {
            Ok(element) => element,
            Err(e) => {
                tracing::warn!(path = %self.core.path().child(name), error = %e, "could not fetch previous value");
                None
            }
        }
    }
}

impl Relay for Transformed {
    fn relay(&self, cx: &Context, event: &ChangeEvent) -> Result<(), ListenerError> {
        if forward::pass_descendant(&self.core, self.primary.id(), cx, event) {
            return Ok(());
        }
        if event.is_caused_by(self.core.id()) {
            if !event.kind().is_pre() {
                if let Some(cause) = self.own_cause(event) {
                    self.landed.lock().push(cause);
                }
            }
            return Ok(());
        }
        let name = event.name();
        let kind = event.kind();

        // The cached conversion is the previous value as this view saw it.
        let previous = if matches!(kind, EventKind::Changed | EventKind::Removed) {
            self.cache.lock().remove(name)
        } else {
            None
        };
        let old = previous.or_else(|| self.translate(name, event.old()));
        let element = self.translate(name, event.element());

        let translated = event
            .republished(self)
            .with_element(element)
            .with_old(old);
        if kind.is_pre() {
            return self.core.fire_pre(cx, &translated).map_err(ListenerError::from);
        }
        self.core.fire_post(cx, translated);
        Ok(())
    }
}

impl Element for Transformed {
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
            .with_property("child_type", self.converter.output_type().as_str())
    }

    fn into_collection(self: Arc<Self>) -> Option<CollectionRef> {
        Some(self)
    }
}

impl Collection for Transformed {
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
        self.primary.size()
    }

    fn child_type(&self) -> ElementType {
        self.converter.output_type()
    }

    fn is_mutable(&self) -> bool {
        self.primary.is_mutable()
    }

    fn contains(&self, name: &str) -> bool {
        self.primary.contains(name)
    }

    fn get_in(&self, cx: &Context, name: &str) -> Result<Option<ElementRef>, Error> {
        let cached = self.cache.lock().get(name);
        if let Some(element) = cached {
            return Ok(Some(element));
        }
        let Some(input) = self.primary.get_in(cx, name)? else {
            return Ok(None);
        };
        let output = self
            .convert(name, input)
            .map_err(|e| Error::get_failed(self.core.path().child(name), e))?;
        self.cache
            .lock()
            .insert(name.to_string(), Arc::clone(&output));
        Ok(Some(output))
    }

    fn put_in(&self, cx: &Context, element: ElementRef) -> Result<Option<ElementRef>, Error> {
        let name = element.name().to_string();
        if name.is_empty() {
            return Err(Error::InvalidName {
                path: self.core.path(),
                name,
            });
        }
        let element_type = element.element_type();
        if !self.is_acceptable(&element_type) {
            return Err(Error::InvalidType {
                path: self.core.path().child(&name),
                message: format!("{} is not accepted by {}", element_type, self.child_type()),
            });
        }

        let exists = self.primary.contains(&name);
        let previous = if exists {
            self.lookup_best_effort(cx, &name)
        } else {
            None
        };
        let kind = if exists {
            EventKind::WillChange
        } else {
            EventKind::WillAdd
        };
        let pre = ChangeEvent::new(kind, self, name.as_str())
            .with_element(Some(Arc::clone(&element)))
            .with_old(previous.clone())
            .caused_by(cx.cause().cloned());
        if self.core.fire_pre(cx, &pre).is_err() {
            return Ok(None);
        }

        let input = self
            .converter
            .to_input(Arc::clone(&element))
            .map_err(|e| Error::put_failed(self.core.path().child(&name), e))?;
        let pre = Arc::new(pre);
        self.primary.put_in(&cx.caused_by(Arc::clone(&pre)), input)?;
        if !self.claim(&pre) {
            tracing::debug!(path = %self.core.path().child(&name), "write through view did not reach the primary");
            return Ok(None);
        }
        self.cache.lock().insert(name, element);

        self.core.fire_post(cx, pre.with_kind(kind.post()));
        Ok(previous)
    }

    fn remove_in(&self, cx: &Context, name: &str) -> Result<Option<ElementRef>, Error> {
        if !self.primary.contains(name) {
            return Ok(None);
        }
        let pre = ChangeEvent::new(EventKind::WillRemove, self, name).caused_by(cx.cause().cloned());
        if self.core.fire_pre(cx, &pre).is_err() {
            return Ok(None);
        }

        let old = self.lookup_best_effort(cx, name);
        let pre = Arc::new(pre);
        self.primary.remove_in(&cx.caused_by(Arc::clone(&pre)), name)?;
        if !self.claim(&pre) {
            return Ok(None);
        }
        self.cache.lock().remove(name);

        self.core
            .fire_post(cx, pre.with_kind(EventKind::Removed).with_old(old.clone()));
        Ok(old)
    }

    fn release(&self, name: &str) {
        self.cache.lock().remove(name);
    }

    fn name_list(&self) -> NameList {
        self.primary.name_list()
    }

    fn descriptor_of(&self, name: &str) -> Option<Descriptor> {
        let cached = self.cache.lock().get(name);
        if let Some(element) = cached {
            return Some(element.descriptor());
        }
        self.primary.descriptor_of(name).map(|descriptor| Descriptor {
            element_type: self.converter.output_type(),
            ..descriptor
        })
    }

    fn is_valid(&self) -> bool {
        self.primary.is_valid()
    }

    fn reinitialize(&self, cx: &Context) -> Result<(), Error> {
        self.primary.reinitialize(cx)?;
        self.cache.lock().clear();
        Ok(())
    }

    fn close(&self) {
        if let Some(id) = self.forward.lock().take() {
            self.primary.remove_listener(id);
        }
        self.cache.lock().clear();
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
        self.primary.query_system()
    }
}
