//! Symbolic-link collections.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use arbor_core::{
    ChangeEvent, Collection, CollectionConfig, CollectionCore, CollectionId, CollectionRef,
    Context, Descriptor, Element, ElementRef, ElementType, Error, Listener, ListenerError,
    ListenerId, NameList, Origin, Path, QuerySystem, Registry,
};
use parking_lot::Mutex;

use crate::forward::{self, Forward, Relay};

struct Resolved {
    target: CollectionRef,
    listener: ListenerId,
}

/// A collection standing in for the collection at another path.
///
/// The target is resolved through the registry on first use and every
/// operation is delegated to it. The link keeps no cache and no name list of
/// its own. Post-notifications of the target are re-propagated from the
/// link's position in the tree.
pub struct SymbolicLink {
    core: CollectionCore,
    this: Weak<SymbolicLink>,
    target: Path,
    resolved: Mutex<Option<Resolved>>,
    closed: AtomicBool,
    registered: AtomicBool,
}

impl SymbolicLink {
    pub fn new(config: CollectionConfig, target: Path) -> Result<Arc<Self>, Error> {
        forward::check_name(&config)?;
        let parent = config.resolve_parent()?;
        let registry = config.registry_or_global();
        let link = Arc::new_cyclic(|this: &Weak<SymbolicLink>| {
            let handle: Weak<dyn Collection> = this.clone();
            SymbolicLink {
                core: CollectionCore::new(
                    config.name.clone(),
                    parent,
                    handle,
                    config.propagate,
                    Arc::clone(&registry),
                ),
                this: this.clone(),
                target,
                resolved: Mutex::new(None),
                closed: AtomicBool::new(false),
                registered: AtomicBool::new(false),
            }
        });

        let registered = forward::finish(&config, &registry, Arc::clone(&link) as CollectionRef)?;
        link.registered.store(registered, Ordering::Release);
        Ok(link)
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    fn registry(&self) -> &Arc<Registry> {
        self.core.registry()
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.lock().is_some()
    }

    /// The target collection, resolving it on first use.
    pub fn resolve(&self, cx: &Context) -> Result<CollectionRef, Error> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed {
                path: self.core.path(),
            });
        }
        if let Some(resolved) = self.resolved.lock().as_ref() {
            return Ok(Arc::clone(&resolved.target));
        }

        let target = self
            .registry()
            .resolve_collection_in(cx, &self.target, true)
            .map_err(|e| {
                tracing::warn!(link = %self.core.path(), target = %self.target, error = %e, "unresolved symbolic link");
                Error::SymbolicLink {
                    link: self.core.path(),
                    target: self.target.clone(),
                    source: Some(Box::new(e)),
                }
            })?;

        let mut slot = self.resolved.lock();
        if let Some(resolved) = slot.as_ref() {
            return Ok(Arc::clone(&resolved.target));
        }
        let listener = match self.this.upgrade() {
            Some(this) => target.add_listener(Forward::new(&this)),
            None => return Ok(target),
        };
        *slot = Some(Resolved {
            target: Arc::clone(&target),
            listener,
        });
        tracing::debug!(link = %self.core.path(), target = %self.target, "symbolic link resolved");
        Ok(target)
    }

    /// Forget the resolved target; the next access resolves again.
    pub fn unresolve(&self) {
        if let Some(resolved) = self.resolved.lock().take() {
            resolved.target.remove_listener(resolved.listener);
        }
    }

    fn current(&self) -> Option<CollectionRef> {
        match self.resolve(&Context::new()) {
            Ok(target) => Some(target),
            Err(e) => {
                tracing::debug!(link = %self.core.path(), error = %e, "link unavailable");
                None
            }
        }
    }
}

impl Relay for SymbolicLink {
    fn relay(&self, cx: &Context, event: &ChangeEvent) -> Result<(), ListenerError> {
        let target = self.resolved.lock().as_ref().map(|r| r.target.id());
        let Some(target) = target else {
            return Ok(());
        };
        if forward::pass_descendant(&self.core, target, cx, event) {
            return Ok(());
        }
        if !event.kind().is_pre() {
            self.core.fire_post(cx, event.republished(self));
        }
        Ok(())
    }
}

impl Element for SymbolicLink {
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
        Descriptor::new(ElementType::COLLECTION, false).with_property("target", self.target.as_str())
    }

    fn into_collection(self: Arc<Self>) -> Option<CollectionRef> {
        Some(self)
    }
}

impl Collection for SymbolicLink {
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
        self.current().map_or(0, |target| target.size())
    }

    fn child_type(&self) -> ElementType {
        self.current()
            .map_or(ElementType::ANY, |target| target.child_type())
    }

    fn is_mutable(&self) -> bool {
        self.current().is_some_and(|target| target.is_mutable())
    }

    fn is_acceptable(&self, element_type: &ElementType) -> bool {
        self.current()
            .is_some_and(|target| target.is_acceptable(element_type))
    }

    fn contains(&self, name: &str) -> bool {
        self.current().is_some_and(|target| target.contains(name))
    }

    fn get_in(&self, cx: &Context, name: &str) -> Result<Option<ElementRef>, Error> {
        self.resolve(cx)?.get_in(cx, name)
    }

    fn put_in(&self, cx: &Context, element: ElementRef) -> Result<Option<ElementRef>, Error> {
        self.resolve(cx)?.put_in(cx, element)
    }

    fn remove_in(&self, cx: &Context, name: &str) -> Result<Option<ElementRef>, Error> {
        self.resolve(cx)?.remove_in(cx, name)
    }

    fn release(&self, name: &str) {
        if let Some(target) = self.current() {
            target.release(name);
        }
    }

    fn name_list(&self) -> NameList {
        self.current()
            .map(|target| target.name_list())
            .unwrap_or_default()
    }

    fn descriptor_of(&self, name: &str) -> Option<Descriptor> {
        self.current()?.descriptor_of(name)
    }

    fn is_valid(&self) -> bool {
        self.current().is_some_and(|target| target.is_valid())
    }

    fn reinitialize(&self, cx: &Context) -> Result<(), Error> {
        self.unresolve();
        self.resolve(cx)?.reinitialize(cx)
    }

    /// Detach from the target. The target itself stays open.
    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.unresolve();
        if self.registered.swap(false, Ordering::AcqRel) {
            self.registry()
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
        self.current()?.query_system()
    }

    fn link_target(&self) -> Option<Path> {
        Some(self.target.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::testing::{RecordingListener, TestBackend};
    use arbor_core::{path, CollectionExt, ErrorKind, EventKind, Kernel, Leaf};
    use serde_json::json;

    fn root(registry: &Arc<Registry>, name: &str) -> Arc<Kernel<TestBackend>> {
        Kernel::new(
            CollectionConfig::new(name)
                .root(true)
                .registry(Arc::clone(registry)),
            TestBackend::new(),
        )
        .unwrap()
    }

    fn leaf(name: &str) -> ElementRef {
        Leaf::new(name, json!(name)).into_ref()
    }

    #[test]
    fn delegates_to_resolved_target() {
        let registry = Arc::new(Registry::new());
        let data = root(&registry, "data");
        data.put(leaf("a")).unwrap();

        let link = SymbolicLink::new(
            CollectionConfig::new("shortcut").registry(Arc::clone(&registry)),
            path!("data"),
        )
        .unwrap();
        assert!(!link.is_resolved());

        let via_link = link.get("a").unwrap().unwrap();
        let direct = registry.resolve(&path!("data/a"), true).unwrap();
        assert!(Arc::ptr_eq(&via_link, &direct));
        assert!(link.is_resolved());
        assert_eq!(*link.name_list(), vec!["a".to_string()]);

        link.put(leaf("b")).unwrap();
        assert!(data.contains("b"));
    }

    #[test]
    fn resolver_follows_links_mid_path() {
        let registry = Arc::new(Registry::new());
        let data = root(&registry, "data");
        data.put(leaf("a")).unwrap();
        let _link = SymbolicLink::new(
            CollectionConfig::new("alias")
                .root(true)
                .registry(Arc::clone(&registry)),
            path!("data"),
        )
        .unwrap();

        let found = registry.resolve(&path!("alias/a"), true).unwrap();
        assert!(Arc::ptr_eq(&found, &data.get("a").unwrap().unwrap()));

        let terminal = registry.resolve_collection(&path!("alias"), true).unwrap();
        assert_eq!(terminal.id(), data.id());
        let unfollowed = registry.resolve_collection(&path!("alias"), false).unwrap();
        assert_eq!(unfollowed.link_target(), Some(path!("data")));
    }

    #[test]
    fn dangling_link_reports_link_and_target() {
        let registry = Arc::new(Registry::new());
        let link = SymbolicLink::new(
            CollectionConfig::new("broken").registry(Arc::clone(&registry)),
            path!("nowhere/at/all"),
        )
        .unwrap();

        let err = link.get("a").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SymbolicLink);
        assert_eq!(err.root_cause().kind(), ErrorKind::NotFound);
        match err {
            Error::SymbolicLink { link, target, .. } => {
                assert_eq!(link, path!("broken"));
                assert_eq!(target, path!("nowhere/at/all"));
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(link.size(), 0);
        assert!(!link.is_valid());
    }

    #[test]
    fn link_cycle_is_detected() {
        let registry = Arc::new(Registry::new());
        let _a = SymbolicLink::new(
            CollectionConfig::new("a")
                .root(true)
                .registry(Arc::clone(&registry)),
            path!("b"),
        )
        .unwrap();
        let _b = SymbolicLink::new(
            CollectionConfig::new("b")
                .root(true)
                .registry(Arc::clone(&registry)),
            path!("a"),
        )
        .unwrap();

        let err = registry.resolve(&path!("a/x"), true).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SymbolicLink);
        assert_eq!(err.root_cause().kind(), ErrorKind::Creating);
    }

    #[test]
    fn target_events_propagate_through_link() {
        let registry = Arc::new(Registry::new());
        let data = root(&registry, "data");
        let link = SymbolicLink::new(
            CollectionConfig::new("shortcut").registry(Arc::clone(&registry)),
            path!("data"),
        )
        .unwrap();
        let recorder = RecordingListener::new();
        link.add_listener(recorder.clone());
        link.resolve(&Context::new()).unwrap();

        data.put(leaf("a")).unwrap();

        let events = recorder.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Added);
        assert_eq!(events[0].path, path!("shortcut/a"));
        assert!(events[0].has_primary);
    }

    #[test]
    fn events_below_the_target_pass_unchanged() {
        let registry = Arc::new(Registry::new());
        let data = root(&registry, "data");
        let inbox = Kernel::new(
            CollectionConfig::new("inbox")
                .parent_path(path!("data"))
                .registry(Arc::clone(&registry)),
            TestBackend::new(),
        )
        .unwrap();
        let link = SymbolicLink::new(
            CollectionConfig::new("shortcut").registry(Arc::clone(&registry)),
            path!("data"),
        )
        .unwrap();
        let recorder = RecordingListener::new();
        link.add_listener(recorder.clone());
        link.resolve(&Context::new()).unwrap();

        inbox.put(leaf("a")).unwrap();

        let events = recorder.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].path, path!("data/inbox/a"));
        assert!(data.name_list().is_empty());
    }

    #[test]
    fn close_detaches_but_keeps_target_open() {
        let registry = Arc::new(Registry::new());
        let data = root(&registry, "data");
        let link = SymbolicLink::new(
            CollectionConfig::new("shortcut").registry(Arc::clone(&registry)),
            path!("data"),
        )
        .unwrap();
        link.resolve(&Context::new()).unwrap();
        assert_eq!(data.core().listeners().len(), 1);

        link.close();
        assert!(data.core().listeners().is_empty());
        assert!(!data.is_closed());
        assert_eq!(link.get("a").unwrap_err().kind(), ErrorKind::Closed);
    }
}
