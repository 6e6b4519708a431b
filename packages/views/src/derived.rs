//! A plain view over a primary collection with its own sorted name list.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use arbor_core::{
    ChangeEvent, Collection, CollectionConfig, CollectionCore, CollectionId, CollectionRef,
    Context, Descriptor, Element, ElementRef, ElementType, Error, Listener, ListenerError,
    ListenerId, NameList, Origin, Path, QuerySystem,
};
use parking_lot::{Mutex, RwLock};

use crate::forward::{self, Forward, Relay};

/// Name list computed at a given primary size.
struct Sorted {
    at_size: usize,
    names: NameList,
}

/// Delegates everything to its primary and keeps a locally sorted name
/// list, recomputed whenever the primary's size changes.
///
/// With a sort index the order comes from the primary's query system; without
/// one (or when the index is missing) it is the primary's own order.
pub struct Derived {
    core: CollectionCore,
    primary: CollectionRef,
    sort_index: Option<String>,
    sorted: RwLock<Option<Sorted>>,
    forward: Mutex<Option<ListenerId>>,
    registered: AtomicBool,
}

impl Derived {
    pub fn new(config: CollectionConfig, primary: CollectionRef) -> Result<Arc<Self>, Error> {
        Self::build(config, primary, None)
    }

    /// A view ordered by the primary's `index`.
    pub fn sorted_by(
        config: CollectionConfig,
        primary: CollectionRef,
        index: impl Into<String>,
    ) -> Result<Arc<Self>, Error> {
        Self::build(config, primary, Some(index.into()))
    }

    fn build(
        config: CollectionConfig,
        primary: CollectionRef,
        sort_index: Option<String>,
    ) -> Result<Arc<Self>, Error> {
        forward::check_name(&config)?;
        let parent = config.resolve_parent()?;
        let registry = config.registry_or_global();
        let derived = Arc::new_cyclic(|this: &Weak<Derived>| {
            let this: Weak<dyn Collection> = this.clone();
            Derived {
                core: CollectionCore::new(
                    config.name.clone(),
                    parent,
                    this,
                    config.propagate,
                    Arc::clone(&registry),
                ),
                primary,
                sort_index,
                sorted: RwLock::new(None),
                forward: Mutex::new(None),
                registered: AtomicBool::new(false),
            }
        });

        let id = derived.primary.add_listener(Forward::new(&derived));
        *derived.forward.lock() = Some(id);

        let registered = forward::finish(&config, &registry, Arc::clone(&derived) as CollectionRef)?;
        derived.registered.store(registered, Ordering::Release);
        Ok(derived)
    }

    pub fn primary(&self) -> &CollectionRef {
        &self.primary
    }

    /// Drop the cached name list.
    pub fn invalidate(&self) {
        *self.sorted.write() = None;
    }

    fn compute(&self) -> NameList {
        if let Some(index) = &self.sort_index {
            let ordered = self
                .primary
                .query_system()
                .and_then(|query| query.sorted(index));
            match ordered {
                Some(names) => return names,
                None => {
                    tracing::debug!(path = %self.core.path(), index = %index, "sort index unavailable, using source order");
                }
            }
        }
        self.primary.name_list()
    }
}

impl Relay for Derived {
    fn relay(&self, cx: &Context, event: &ChangeEvent) -> Result<(), ListenerError> {
        if forward::pass_descendant(&self.core, self.primary.id(), cx, event) {
            return Ok(());
        }
        let republished = event.republished(self);
        if event.kind().is_pre() {
            return self.core.fire_pre(cx, &republished).map_err(ListenerError::from);
        }
        self.invalidate();
        self.core.fire_post(cx, republished);
        Ok(())
    }
}

impl Element for Derived {
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

impl Collection for Derived {
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
        self.primary.child_type()
    }

    fn is_mutable(&self) -> bool {
        self.primary.is_mutable()
    }

    fn is_acceptable(&self, element_type: &ElementType) -> bool {
        self.primary.is_acceptable(element_type)
    }

    fn contains(&self, name: &str) -> bool {
        self.primary.contains(name)
    }

    fn get_in(&self, cx: &Context, name: &str) -> Result<Option<ElementRef>, Error> {
        self.primary.get_in(cx, name)
    }

    fn put_in(&self, cx: &Context, element: ElementRef) -> Result<Option<ElementRef>, Error> {
        let result = self.primary.put_in(cx, element);
        self.invalidate();
        result
    }

    fn remove_in(&self, cx: &Context, name: &str) -> Result<Option<ElementRef>, Error> {
        let result = self.primary.remove_in(cx, name);
        self.invalidate();
        result
    }

    fn release(&self, name: &str) {
        self.primary.release(name);
    }

    fn name_list(&self) -> NameList {
        let size = self.primary.size();
        if let Some(sorted) = self.sorted.read().as_ref() {
            if sorted.at_size == size {
                return Arc::clone(&sorted.names);
            }
        }

        let mut slot = self.sorted.write();
        if let Some(sorted) = slot.as_ref() {
            if sorted.at_size == size {
                return Arc::clone(&sorted.names);
            }
        }
        let names = self.compute();
        *slot = Some(Sorted {
            at_size: size,
            names: Arc::clone(&names),
        });
        names
    }

    fn descriptor_of(&self, name: &str) -> Option<Descriptor> {
        self.primary.descriptor_of(name)
    }

    fn is_valid(&self) -> bool {
        self.primary.is_valid()
    }

    fn reinitialize(&self, cx: &Context) -> Result<(), Error> {
        let result = self.primary.reinitialize(cx);
        self.invalidate();
        result
    }

    fn close(&self) {
        if let Some(id) = self.forward.lock().take() {
            self.primary.remove_listener(id);
        }
        self.invalidate();
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

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::testing::{RecordingListener, TestBackend, VetoListener};
    use arbor_core::{CollectionExt, EventKind, Kernel, Leaf, Registry};
    use serde_json::json;

    fn primary(registry: &Arc<Registry>) -> Arc<Kernel<TestBackend>> {
        Kernel::new(
            CollectionConfig::new("primary").registry(Arc::clone(registry)),
            TestBackend::new(),
        )
        .unwrap()
    }

    fn leaf(name: &str) -> ElementRef {
        Leaf::new(name, json!(null)).into_ref()
    }

    #[test]
    fn delegates_to_primary() {
        let registry = Arc::new(Registry::new());
        let primary = primary(&registry);
        let view = Derived::new(
            CollectionConfig::new("view").registry(Arc::clone(&registry)),
            primary.clone(),
        )
        .unwrap();

        view.put(leaf("a")).unwrap();
        assert!(primary.contains("a"));
        assert_eq!(view.size(), 1);
        assert!(view.get("a").unwrap().is_some());
        assert_eq!(*view.name_list(), vec!["a".to_string()]);

        view.remove("a").unwrap();
        assert!(!primary.contains("a"));
        assert!(view.name_list().is_empty());
    }

    #[test]
    fn name_list_follows_primary_size() {
        let registry = Arc::new(Registry::new());
        let primary = primary(&registry);
        let view = Derived::new(
            CollectionConfig::new("view").registry(Arc::clone(&registry)),
            primary.clone(),
        )
        .unwrap();

        primary.put(leaf("b")).unwrap();
        assert_eq!(*view.name_list(), vec!["b".to_string()]);
        primary.put(leaf("a")).unwrap();
        assert_eq!(*view.name_list(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn sort_index_falls_back_to_source_order() {
        let registry = Arc::new(Registry::new());
        let primary = primary(&registry);
        for name in ["bb", "a", "ccc"] {
            primary.put(leaf(name)).unwrap();
        }

        let view = Derived::sorted_by(
            CollectionConfig::new("view").registry(Arc::clone(&registry)),
            primary.clone(),
            "length",
        )
        .unwrap();
        assert_eq!(
            *view.name_list(),
            vec!["a".to_string(), "bb".to_string(), "ccc".to_string()]
        );
    }

    #[test]
    fn forwards_primary_events_with_primary_link() {
        let registry = Arc::new(Registry::new());
        let primary = primary(&registry);
        let view = Derived::new(
            CollectionConfig::new("view").registry(Arc::clone(&registry)),
            primary.clone(),
        )
        .unwrap();
        let recorder = RecordingListener::new();
        view.add_listener(recorder.clone());

        primary.put(leaf("a")).unwrap();

        let events = recorder.events();
        assert_eq!(
            events.iter().map(|e| e.kind).collect::<Vec<_>>(),
            vec![EventKind::WillAdd, EventKind::Added]
        );
        assert!(events.iter().all(|e| e.has_primary));
        assert_eq!(events[1].path, Path::parse("view/a").unwrap());
    }

    #[test]
    fn veto_on_view_aborts_primary_put() {
        let registry = Arc::new(Registry::new());
        let primary = primary(&registry);
        let view = Derived::new(
            CollectionConfig::new("view").registry(Arc::clone(&registry)),
            primary.clone(),
        )
        .unwrap();
        view.add_listener(Arc::new(VetoListener::all()));

        view.put(leaf("a")).unwrap();
        assert!(!primary.contains("a"));
    }

    #[test]
    fn close_detaches_from_primary() {
        let registry = Arc::new(Registry::new());
        let primary = primary(&registry);
        let view = Derived::new(
            CollectionConfig::new("view").registry(Arc::clone(&registry)),
            primary.clone(),
        )
        .unwrap();
        let recorder = RecordingListener::new();
        view.add_listener(recorder.clone());
        assert_eq!(primary.core().listeners().len(), 1);

        view.close();
        assert!(primary.core().listeners().is_empty());
        primary.put(leaf("a")).unwrap();
        assert!(recorder.kinds().is_empty());
    }

    #[test]
    fn descendant_events_keep_their_path() {
        let registry = Arc::new(Registry::new());
        let primary = primary(&registry);
        let parent: CollectionRef = primary.clone();
        let nested = Kernel::new(
            CollectionConfig::new("nested")
                .parent(&parent)
                .registry(Arc::clone(&registry)),
            TestBackend::new(),
        )
        .unwrap();
        let view = Derived::new(
            CollectionConfig::new("view").registry(Arc::clone(&registry)),
            primary.clone(),
        )
        .unwrap();
        let recorder = RecordingListener::new();
        view.add_listener(recorder.clone());

        nested.put(leaf("x")).unwrap();

        let events = recorder.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Added);
        assert_eq!(events[0].path, Path::parse("primary/nested/x").unwrap());
        assert!(view.name_list().is_empty());
    }

    #[test]
    fn relayed_events_stay_in_the_callers_chain() {
        let registry = Arc::new(Registry::new());
        let primary = primary(&registry);
        let outer = Kernel::new(
            CollectionConfig::new("outer").registry(Arc::clone(&registry)),
            TestBackend::new(),
        )
        .unwrap();
        let outer_ref: CollectionRef = outer.clone();
        let view = Derived::new(
            CollectionConfig::new("view")
                .parent(&outer_ref)
                .registry(Arc::clone(&registry)),
            primary.clone(),
        )
        .unwrap();
        let above = RecordingListener::new();
        outer.add_listener(above.clone());
        let own = RecordingListener::new();
        view.add_listener(own.clone());

        let cx = Context::new();
        let building = cx.enter(&view.path()).unwrap();
        primary.put_in(&cx, leaf("a")).unwrap();
        assert_eq!(own.kinds(), vec![EventKind::WillAdd, EventKind::Added]);
        assert!(above.kinds().is_empty());

        drop(building);
        primary.put(leaf("b")).unwrap();
        assert_eq!(above.kinds(), vec![EventKind::Added]);
    }
}
