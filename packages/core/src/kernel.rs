//! The collection kernel: caching, the mutation protocol and lifecycle,
//! layered over a storage [`Backend`].
//!
//! Every mutation runs pre-notify → backend mutation → cache update →
//! post-notify. A veto from a pre-notify listener aborts before the backend
//! is touched. Post-notifications propagate to the structural parent.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;

use crate::cache::ElementCache;
use crate::collection::{Collection, CollectionCore, CollectionId, CollectionRef, NameList};
use crate::config::{CollectionConfig, ImmutablePolicy};
use crate::context::Context;
use crate::element::{Descriptor, Element, ElementRef, ElementType, Origin};
use crate::error::Error;
use crate::event::{ChangeEvent, EventKind};
use crate::listener::{Listener, ListenerId};
use crate::path::Path;
use crate::query::QuerySystem;

/// Storage behind a [`Kernel`].
///
/// The kernel wraps `fetch` with caching and name validation, and wraps
/// `store`/`erase` with notification and cache maintenance. Backends never
/// fire events themselves.
pub trait Backend: Send + Sync + 'static {
    fn size(&self) -> usize {
        self.names().map(|names| names.len()).unwrap_or(0)
    }

    fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Declared type of the children.
    fn element_type(&self) -> ElementType {
        ElementType::ANY
    }

    fn is_mutable(&self) -> bool {
        true
    }

    fn is_acceptable(&self, element_type: &ElementType) -> bool {
        self.element_type().accepts(element_type)
    }

    fn contains(&self, name: &str) -> bool;

    /// Materialize the named child. `origin` is the handle new elements
    /// should carry as their owner.
    fn fetch(&self, cx: &Context, name: &str, origin: &Origin) -> Result<Option<ElementRef>, Error>;

    fn store(&self, cx: &Context, element: &ElementRef, is_new: bool) -> Result<(), Error>;

    fn erase(&self, cx: &Context, name: &str) -> Result<(), Error>;

    /// Child names in the backend's order.
    fn names(&self) -> Result<NameList, Error>;

    /// Cheap summary of a child, if the backend can give one without
    /// materializing it.
    fn descriptor(&self, _name: &str) -> Option<Descriptor> {
        None
    }

    /// Re-read the backing name list. Called by [`Collection::reinitialize`].
    fn refresh(&self) -> Result<(), Error> {
        self.names().map(|_| ())
    }

    /// Release backend resources. Called once.
    fn close(&self) {}

    fn query_system(&self) -> Option<Arc<dyn QuerySystem>> {
        None
    }
}

/// A collection backed by `B`.
pub struct Kernel<B: Backend> {
    core: CollectionCore,
    backend: B,
    cache: Mutex<Box<dyn ElementCache>>,
    mutable: bool,
    immutable_policy: ImmutablePolicy,
    valid: AtomicBool,
    closed: AtomicBool,
    registered: AtomicBool,
    query: OnceLock<Option<Arc<dyn QuerySystem>>>,
    image: Option<String>,
    node_image: Option<String>,
}

impl<B: Backend> Kernel<B> {
    /// Build a collection from `config`, instantiate its configured
    /// listener and register it as a root if asked to.
    pub fn new(config: CollectionConfig, backend: B) -> Result<Arc<Self>, Error> {
        if config.name.is_empty() {
            let parent = config
                .parent
                .get()
                .map(|p| p.path())
                .unwrap_or_else(Path::empty);
            return Err(Error::InvalidName {
                path: parent,
                name: config.name,
            });
        }

        let parent = config.resolve_parent()?;
        let registry = config.registry_or_global();
        let kernel = Arc::new_cyclic(|this: &Weak<Kernel<B>>| {
            let this: Weak<dyn Collection> = this.clone();
            Kernel {
                core: CollectionCore::new(
                    config.name.clone(),
                    parent,
                    this,
                    config.propagate,
                    Arc::clone(&registry),
                ),
                backend,
                cache: Mutex::new(config.cache_policy().build()),
                mutable: config.mutable,
                immutable_policy: config.immutable_policy,
                valid: AtomicBool::new(true),
                closed: AtomicBool::new(false),
                registered: AtomicBool::new(false),
                query: OnceLock::new(),
                image: config.image.clone(),
                node_image: config.node_image.clone(),
            }
        });

        if let Some(key) = &config.listener {
            let listener = registry.listener_factories().create(key, &config)?;
            kernel.core.listeners().add(listener);
        }

        if config.register_root {
            registry.register(Arc::clone(&kernel) as CollectionRef)?;
            kernel.registered.store(true, Ordering::Release);
        }

        tracing::debug!(
            path = %kernel.core.path(),
            caching = %config.caching,
            mutable = config.mutable,
            root = config.register_root,
            "collection created"
        );
        Ok(kernel)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn core(&self) -> &CollectionCore {
        &self.core
    }

    pub fn image(&self) -> Option<&str> {
        self.image.as_deref()
    }

    pub fn node_image(&self) -> Option<&str> {
        self.node_image.as_deref()
    }

    /// Number of materialized children currently held in the cache.
    pub fn cached_len(&self) -> usize {
        self.cache.lock().len()
    }

    /// Drop every cached child.
    pub fn release_all(&self) {
        self.cache.lock().clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Take the collection out of service until [`Collection::reinitialize`]
    /// succeeds.
    pub fn invalidate(&self, reason: &Error) {
        if self.valid.swap(false, Ordering::AcqRel) {
            tracing::warn!(path = %self.core.path(), reason = %reason, "collection invalidated");
        }
        self.release_all();
    }

    fn ensure_open(&self) -> Result<(), Error> {
        if self.is_closed() {
            Err(Error::Closed {
                path: self.core.path(),
            })
        } else {
            Ok(())
        }
    }

    fn check_name(&self, name: &str, element: &ElementRef) -> Result<(), Error> {
        if element.name() == name {
            Ok(())
        } else {
            let path = self.core.path().child(name);
            tracing::error!(path = %path, found = %element.name(), "element name does not match its key");
            Err(Error::NameMismatch {
                path,
                found: element.name().to_string(),
            })
        }
    }

    fn refuse(&self, operation: &str, name: &str) -> Result<Option<ElementRef>, Error> {
        let path = self.core.path();
        match self.immutable_policy {
            ImmutablePolicy::Ignore => {
                tracing::error!(path = %path, name = %name, operation, "mutation of immutable collection ignored");
                Ok(None)
            }
            ImmutablePolicy::Reject => Err(Error::Immutable { path }),
        }
    }

    /// Fetch a value only to decorate an event; failures are logged.
    fn lookup_best_effort(&self, cx: &Context, name: &str) -> Option<ElementRef> {
        match self.get_in(cx, name) {
            Ok(element) => element,
            Err(e) => {
                tracing::warn!(path = %self.core.path().child(name), error = %e, "could not fetch previous value");
                None
            }
        }
    }

    fn cached(&self, name: &str) -> Option<ElementRef> {
        self.cache.lock().get(name)
    }
}

impl<B: Backend> Element for Kernel<B> {
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
            .with_property("child_type", self.backend.element_type().as_str())
    }

    fn into_collection(self: Arc<Self>) -> Option<CollectionRef> {
        Some(self)
    }
}

impl<B: Backend> Collection for Kernel<B> {
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
        if self.is_valid() {
            self.backend.size()
        } else {
            0
        }
    }

    fn child_type(&self) -> ElementType {
        self.backend.element_type()
    }

    fn is_mutable(&self) -> bool {
        self.mutable && self.backend.is_mutable()
    }

    fn is_acceptable(&self, element_type: &ElementType) -> bool {
        self.backend.is_acceptable(element_type)
    }

    fn contains(&self, name: &str) -> bool {
        self.is_valid() && (self.cached(name).is_some() || self.backend.contains(name))
    }

    fn get_in(&self, cx: &Context, name: &str) -> Result<Option<ElementRef>, Error> {
        self.ensure_open()?;
        if !self.is_valid() {
            return Ok(None);
        }

        if let Some(element) = self.cached(name) {
            self.check_name(name, &element)?;
            return Ok(Some(element));
        }

        let fetched = self
            .backend
            .fetch(cx, name, &self.core.handle())
            .map_err(|e| match e {
                Error::Creating { .. } => e,
                e => {
                    let path = self.core.path().child(name);
                    tracing::error!(path = %path, error = %e, "fetch failed");
                    Error::get_failed(path, e)
                }
            })?;

        match fetched {
            None => Ok(None),
            Some(element) => {
                self.check_name(name, &element)?;
                self.cache.lock().insert(name.to_string(), Arc::clone(&element));
                Ok(Some(element))
            }
        }
    }

    fn put_in(&self, cx: &Context, element: ElementRef) -> Result<Option<ElementRef>, Error> {
        self.ensure_open()?;
        let name = element.name().to_string();
        if name.is_empty() {
            return Err(Error::InvalidName {
                path: self.core.path(),
                name,
            });
        }
        if !self.is_mutable() {
            return self.refuse("put", &name);
        }
        let element_type = element.element_type();
        if !self.is_acceptable(&element_type) {
            return Err(Error::InvalidType {
                path: self.core.path().child(&name),
                message: format!("{} is not accepted by {}", element_type, self.child_type()),
            });
        }

        let exists = self.contains(&name);
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

        self.backend
            .store(cx, &element, !exists)
            .map_err(|e| {
                let path = self.core.path().child(&name);
                tracing::error!(path = %path, error = %e, "store failed");
                Error::put_failed(path, e)
            })?;
        self.cache.lock().insert(name, Arc::clone(&element));

        self.core.fire_post(cx, pre.with_kind(kind.post()));
        Ok(previous)
    }

    fn remove_in(&self, cx: &Context, name: &str) -> Result<Option<ElementRef>, Error> {
        self.ensure_open()?;
        if !self.is_mutable() {
            return self.refuse("remove", name);
        }
        if !self.contains(name) {
            return Ok(None);
        }

        let pre = ChangeEvent::new(EventKind::WillRemove, self, name).caused_by(cx.cause().cloned());
        if self.core.fire_pre(cx, &pre).is_err() {
            return Ok(None);
        }

        let old = self.lookup_best_effort(cx, name);
        self.backend.erase(cx, name).map_err(|e| {
            let path = self.core.path().child(name);
            tracing::error!(path = %path, error = %e, "erase failed");
            Error::remove_failed(path, e)
        })?;
        self.cache.lock().remove(name);

        self.core
            .fire_post(cx, pre.with_kind(EventKind::Removed).with_old(old.clone()));
        Ok(old)
    }

    fn release(&self, name: &str) {
        self.cache.lock().remove(name);
    }

    fn name_list(&self) -> NameList {
        if !self.is_valid() {
            return NameList::default();
        }
        match self.backend.names() {
            Ok(names) => names,
            Err(e) => {
                self.invalidate(&e);
                NameList::default()
            }
        }
    }

    fn descriptor_of(&self, name: &str) -> Option<Descriptor> {
        if !self.is_valid() {
            return None;
        }
        if let Some(element) = self.cached(name) {
            return Some(element.descriptor());
        }
        if let Some(descriptor) = self.backend.descriptor(name) {
            return Some(descriptor);
        }
        self.lookup_best_effort(&Context::new(), name)
            .map(|element| element.descriptor())
    }

    fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire) && !self.is_closed()
    }

    fn reinitialize(&self, cx: &Context) -> Result<(), Error> {
        self.ensure_open()?;
        if self.valid.load(Ordering::Acquire) {
            return Ok(());
        }
        if let Err(e) = self.backend.refresh() {
            tracing::warn!(path = %self.core.path(), error = %e, "reinitialization failed");
            return Err(e);
        }
        self.release_all();
        self.valid.store(true, Ordering::Release);
        tracing::info!(path = %self.core.path(), "collection reinitialized");

        self.core
            .fire_post(cx, ChangeEvent::new(EventKind::Changed, self, ""));
        Ok(())
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // Only children that are materialized right now get closed.
        let children = {
            let mut cache = self.cache.lock();
            let values = cache.values();
            cache.clear();
            values
        };
        for child in children {
            if let Some(collection) = child.into_collection() {
                collection.close();
            }
        }
        self.backend.close();
        if self.registered.swap(false, Ordering::AcqRel) {
            self.core
                .registry()
                .release_root(self.core.name(), self.core.id());
        }
        tracing::debug!(path = %self.core.path(), "collection closed");
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
        self.query
            .get_or_init(|| self.backend.query_system())
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheStrategy;
    use crate::collection::CollectionExt;
    use crate::element::Leaf;
    use crate::error::ErrorKind;
    use crate::registry::Registry;
    use crate::testing::{
        FailingListener, PanickingListener, RecordingListener, TestBackend, VetoListener,
    };
    use serde_json::json;

    fn registry() -> Arc<Registry> {
        Arc::new(Registry::new())
    }

    fn collection(name: &str, registry: &Arc<Registry>) -> Arc<Kernel<TestBackend>> {
        Kernel::new(
            CollectionConfig::new(name).registry(Arc::clone(registry)),
            TestBackend::new(),
        )
        .unwrap()
    }

    fn leaf(name: &str) -> ElementRef {
        Leaf::new(name, json!(name)).into_ref()
    }

    #[test]
    fn put_then_get_returns_same_element() {
        let registry = registry();
        let docs = collection("docs", &registry);
        let a = leaf("a");

        assert!(docs.put(Arc::clone(&a)).unwrap().is_none());
        let fetched = docs.get("a").unwrap().unwrap();

        assert!(Arc::ptr_eq(&a, &fetched));
        assert_eq!(docs.backend().fetches(), 0);
        assert_eq!(docs.size(), 1);
    }

    #[test]
    fn get_caches_fetched_elements() {
        let registry = registry();
        let docs = collection("docs", &registry);
        docs.backend().insert(leaf("a"));

        let first = docs.get("a").unwrap().unwrap();
        let second = docs.get("a").unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(docs.backend().fetches(), 1);
        assert_eq!(docs.cached_len(), 1);

        docs.release("a");
        docs.get("a").unwrap();
        assert_eq!(docs.backend().fetches(), 2);
    }

    #[test]
    fn no_cache_fetches_every_time() {
        let registry = registry();
        let docs = Kernel::new(
            CollectionConfig::new("docs")
                .caching(CacheStrategy::None)
                .registry(Arc::clone(&registry)),
            TestBackend::new(),
        )
        .unwrap();
        docs.backend().insert(leaf("a"));

        docs.get("a").unwrap();
        docs.get("a").unwrap();
        assert_eq!(docs.backend().fetches(), 2);
        assert_eq!(docs.cached_len(), 0);
    }

    #[test]
    fn fetched_name_must_match() {
        let registry = registry();
        let docs = collection("docs", &registry);
        docs.backend().insert_as("a", leaf("b"));

        let err = docs.get("a").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NameMismatch);
        assert_eq!(docs.cached_len(), 0);
    }

    #[test]
    fn fetch_failure_is_wrapped_with_path() {
        let registry = registry();
        let docs = collection("docs", &registry);
        docs.backend().insert(leaf("a"));
        docs.backend().fail_fetch(true);

        let err = docs.get("a").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::GetFailed);
        assert_eq!(err.path(), Some(&Path::parse("docs/a").unwrap()));
        assert_eq!(err.root_cause().kind(), ErrorKind::Backend);
    }

    #[test]
    fn mutation_protocol_order() {
        let registry = registry();
        let docs = collection("docs", &registry);
        let recorder = RecordingListener::new();
        docs.add_listener(recorder.clone());

        docs.put(leaf("a")).unwrap();
        let previous = docs.put(leaf("a")).unwrap();
        assert!(previous.is_some());
        docs.remove("a").unwrap();

        assert_eq!(
            recorder.kinds(),
            vec![
                EventKind::WillAdd,
                EventKind::Added,
                EventKind::WillChange,
                EventKind::Changed,
                EventKind::WillRemove,
                EventKind::Removed,
            ]
        );
        assert!(recorder
            .events()
            .iter()
            .all(|e| e.path == Path::parse("docs/a").unwrap()));
    }

    #[test]
    fn changed_event_carries_previous_value() {
        let registry = registry();
        let docs = collection("docs", &registry);
        let first = leaf("a");
        docs.put(Arc::clone(&first)).unwrap();

        let recorder = RecordingListener::new();
        docs.add_listener(recorder.clone());
        docs.put(leaf("a")).unwrap();

        let events = recorder.events();
        assert_eq!(events.len(), 2);
        assert!(events[1].had_old);
    }

    #[test]
    fn veto_aborts_put_without_touching_backend() {
        let registry = registry();
        let docs = collection("docs", &registry);
        docs.add_listener(Arc::new(VetoListener::all()));

        assert!(docs.put(leaf("a")).unwrap().is_none());
        assert!(!docs.contains("a"));
        assert_eq!(docs.backend().stores(), 0);
        assert_eq!(docs.backend().fetches(), 0);
    }

    #[test]
    fn veto_aborts_remove() {
        let registry = registry();
        let docs = collection("docs", &registry);
        docs.put(leaf("a")).unwrap();
        docs.add_listener(Arc::new(VetoListener::only(EventKind::WillRemove)));

        assert!(docs.remove("a").unwrap().is_none());
        assert!(docs.contains("a"));
        assert_eq!(docs.backend().erases(), 0);
    }

    #[test]
    fn failing_listeners_are_isolated() {
        let registry = registry();
        let docs = collection("docs", &registry);
        let recorder = RecordingListener::new();
        docs.add_listener(Arc::new(FailingListener));
        docs.add_listener(Arc::new(PanickingListener));
        docs.add_listener(recorder.clone());

        assert!(docs.put(leaf("a")).unwrap().is_none());
        assert!(docs.contains("a"));
        assert_eq!(recorder.kinds(), vec![EventKind::WillAdd, EventKind::Added]);
    }

    #[test]
    fn remove_missing_is_noop() {
        let registry = registry();
        let docs = collection("docs", &registry);
        let recorder = RecordingListener::new();
        docs.add_listener(recorder.clone());

        assert!(docs.remove("ghost").unwrap().is_none());
        assert!(recorder.kinds().is_empty());
    }

    #[test]
    fn empty_name_is_rejected() {
        let registry = registry();
        let docs = collection("docs", &registry);
        let err = docs.put(leaf("")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidName);
    }

    #[test]
    fn immutable_ignore_logs_and_returns() {
        let registry = registry();
        let docs = Kernel::new(
            CollectionConfig::new("docs")
                .mutable(false)
                .registry(Arc::clone(&registry)),
            TestBackend::new(),
        )
        .unwrap();

        assert!(docs.put(leaf("a")).unwrap().is_none());
        assert!(!docs.contains("a"));
        assert_eq!(docs.backend().stores(), 0);
    }

    #[test]
    fn immutable_reject_fails() {
        let registry = registry();
        let docs = Kernel::new(
            CollectionConfig::new("docs")
                .mutable(false)
                .immutable_policy(ImmutablePolicy::Reject)
                .registry(Arc::clone(&registry)),
            TestBackend::new(),
        )
        .unwrap();

        assert_eq!(docs.put(leaf("a")).unwrap_err().kind(), ErrorKind::Immutable);
        assert_eq!(docs.remove("a").unwrap_err().kind(), ErrorKind::Immutable);
    }

    #[test]
    fn unacceptable_type_is_rejected() {
        let registry = registry();
        let docs = Kernel::new(
            CollectionConfig::new("docs").registry(Arc::clone(&registry)),
            TestBackend::new().with_type(ElementType::from_static("doc")),
        )
        .unwrap();

        let image = Leaf::new("pic", json!(null))
            .with_type(ElementType::new("doc.image"))
            .into_ref();
        assert!(docs.put(image).is_ok());

        let other = Leaf::new("x", json!(null)).into_ref();
        assert_eq!(docs.put(other).unwrap_err().kind(), ErrorKind::InvalidType);
    }

    #[test]
    fn events_propagate_to_parent() {
        let registry = registry();
        let root = collection("root", &registry);
        let root_ref: CollectionRef = root.clone();
        let child = Kernel::new(
            CollectionConfig::new("child")
                .parent(&root_ref)
                .registry(Arc::clone(&registry)),
            TestBackend::new(),
        )
        .unwrap();

        let at_root = RecordingListener::new();
        root.add_listener(at_root.clone());
        child.put(leaf("a")).unwrap();

        let events = at_root.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Added);
        assert_eq!(events[0].path, Path::parse("root/child/a").unwrap());
        assert!(events[0].has_primary);
    }

    #[test]
    fn non_propagating_parent_hears_nothing() {
        let registry = registry();
        let root = Kernel::new(
            CollectionConfig::new("root")
                .propagate(false)
                .registry(Arc::clone(&registry)),
            TestBackend::new(),
        )
        .unwrap();
        let root_ref: CollectionRef = root.clone();
        let child = Kernel::new(
            CollectionConfig::new("child")
                .parent(&root_ref)
                .registry(Arc::clone(&registry)),
            TestBackend::new(),
        )
        .unwrap();

        let at_root = RecordingListener::new();
        root.add_listener(at_root.clone());
        child.put(leaf("a")).unwrap();
        assert!(at_root.kinds().is_empty());
    }

    #[test]
    fn collection_under_construction_does_not_propagate() {
        let registry = registry();
        let root = collection("root", &registry);
        let root_ref: CollectionRef = root.clone();
        let child = Kernel::new(
            CollectionConfig::new("child")
                .parent(&root_ref)
                .registry(Arc::clone(&registry)),
            TestBackend::new(),
        )
        .unwrap();
        let at_root = RecordingListener::new();
        root.add_listener(at_root.clone());
        let at_child = RecordingListener::new();
        child.add_listener(at_child.clone());

        let cx = Context::new();
        let building = cx.enter(&child.path()).unwrap();
        child.put_in(&cx, leaf("a")).unwrap();
        assert!(at_root.kinds().is_empty());
        assert_eq!(at_child.kinds(), vec![EventKind::WillAdd, EventKind::Added]);

        drop(building);
        child.put_in(&cx, leaf("b")).unwrap();
        assert_eq!(at_root.kinds(), vec![EventKind::Added]);
    }

    #[test]
    fn parent_path_is_resolved_at_construction() {
        let registry = registry();
        let docs = Kernel::new(
            CollectionConfig::new("docs")
                .root(true)
                .registry(Arc::clone(&registry)),
            TestBackend::new(),
        )
        .unwrap();
        let config = CollectionConfig::from_properties(
            &[("name", "drafts"), ("parent", "docs")]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            &crate::config::Templates::new(),
        )
        .unwrap()
        .registry(Arc::clone(&registry));
        let drafts = Kernel::new(config, TestBackend::new()).unwrap();
        assert_eq!(drafts.path(), Path::parse("docs/drafts").unwrap());

        let at_docs = RecordingListener::new();
        docs.add_listener(at_docs.clone());
        drafts.put(leaf("a")).unwrap();
        assert_eq!(at_docs.kinds(), vec![EventKind::Added]);
    }

    #[test]
    fn missing_parent_fails_creation() {
        let registry = registry();
        let err = Kernel::new(
            CollectionConfig::new("drafts")
                .parent_path(Path::parse("nowhere").unwrap())
                .registry(Arc::clone(&registry)),
            TestBackend::new(),
        )
        .err()
        .unwrap();
        assert_eq!(err.kind(), ErrorKind::CreateFailed);
        assert_eq!(err.path(), Some(&Path::parse("nowhere/drafts").unwrap()));
        assert_eq!(err.root_cause().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn backend_failure_invalidates_and_reinitialize_recovers() {
        let registry = registry();
        let docs = collection("docs", &registry);
        docs.put(leaf("a")).unwrap();
        docs.backend().fail_names(true);

        assert!(docs.name_list().is_empty());
        assert!(!docs.is_valid());
        assert_eq!(docs.size(), 0);
        assert!(!docs.contains("a"));

        assert!(docs.reinitialize(&Context::new()).is_err());
        assert!(!docs.is_valid());

        let recorder = RecordingListener::new();
        docs.add_listener(recorder.clone());
        docs.backend().fail_names(false);
        docs.reinitialize(&Context::new()).unwrap();

        assert!(docs.is_valid());
        assert_eq!(*docs.name_list(), vec!["a".to_string()]);
        let events = recorder.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Changed);
        assert_eq!(events[0].path, Path::parse("docs").unwrap());
    }

    #[test]
    fn close_unregisters_root_and_closes_cached_children() {
        let registry = registry();
        let root = Kernel::new(
            CollectionConfig::new("root")
                .root(true)
                .registry(Arc::clone(&registry)),
            TestBackend::new(),
        )
        .unwrap();
        let root_ref: CollectionRef = root.clone();
        let child = Kernel::new(
            CollectionConfig::new("child")
                .parent(&root_ref)
                .registry(Arc::clone(&registry)),
            TestBackend::new(),
        )
        .unwrap();
        root.put(child.clone()).unwrap();
        assert!(registry.root("root").is_some());

        root.close();
        root.close();

        assert!(registry.root("root").is_none());
        assert!(child.is_closed());
        assert!(root.backend().is_closed());
        assert_eq!(root.get("child").unwrap_err().kind(), ErrorKind::Closed);
    }

    #[test]
    fn closing_replaced_root_leaves_replacement() {
        let registry = registry();
        let first = Kernel::new(
            CollectionConfig::new("root")
                .root(true)
                .registry(Arc::clone(&registry)),
            TestBackend::new(),
        )
        .unwrap();
        let second = Kernel::new(
            CollectionConfig::new("root")
                .root(true)
                .registry(Arc::clone(&registry)),
            TestBackend::new(),
        )
        .unwrap();

        first.close();
        let current = registry.root("root").unwrap();
        assert_eq!(current.id(), second.id());
    }

    #[test]
    fn configured_listener_comes_from_factories() {
        let registry = registry();
        let recorder = RecordingListener::new();
        let shared = recorder.clone();
        registry
            .listener_factories()
            .register("recorder", move |_: &CollectionConfig| {
                Ok(shared.clone() as Arc<dyn Listener>)
            });

        let docs = Kernel::new(
            CollectionConfig::new("docs")
                .listener("recorder")
                .registry(Arc::clone(&registry)),
            TestBackend::new(),
        )
        .unwrap();
        docs.put(leaf("a")).unwrap();
        assert_eq!(recorder.kinds(), vec![EventKind::WillAdd, EventKind::Added]);

        let err = Kernel::new(
            CollectionConfig::new("other")
                .listener("missing")
                .registry(Arc::clone(&registry)),
            TestBackend::new(),
        )
        .err()
        .unwrap();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn descriptor_falls_back_to_materializing() {
        let registry = registry();
        let docs = collection("docs", &registry);
        docs.backend().insert(
            Leaf::new("a", json!(1))
                .with_property("color", "red")
                .into_ref(),
        );

        let descriptor = docs.descriptor_of("a").unwrap();
        assert_eq!(descriptor.property("color"), Some("red"));
        assert_eq!(docs.backend().fetches(), 1);
        assert!(docs.descriptor_of("missing").is_none());
    }

    #[test]
    fn empty_collection_name_is_rejected() {
        let registry = registry();
        let err = Kernel::new(
            CollectionConfig::new("").registry(registry),
            TestBackend::new(),
        )
        .err()
        .unwrap();
        assert_eq!(err.kind(), ErrorKind::InvalidName);
    }
}
