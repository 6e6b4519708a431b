//! Listeners, a scripted backend and a backend contract suite for tests.
//!
//! Compiled for this crate's tests and, through the `test-utils` feature,
//! for the tests of crates building on it.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::collection::NameList;
use crate::context::Context;
use crate::element::{ElementRef, ElementType, Origin};
use crate::error::Error;
use crate::event::{ChangeEvent, EventKind};
use crate::kernel::Backend;
use crate::listener::{Listener, ListenerError};
use crate::path::Path;

/// What a [`RecordingListener`] saw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub kind: EventKind,
    pub path: Path,
    pub name: String,
    pub has_primary: bool,
    pub had_element: bool,
    pub had_old: bool,
}

/// Records every event it receives.
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().clone()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events.lock().iter().map(|e| e.kind).collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    fn record(&self, event: &ChangeEvent) -> Result<(), ListenerError> {
        self.events.lock().push(RecordedEvent {
            kind: event.kind(),
            path: event.path(),
            name: event.name().to_string(),
            has_primary: event.primary().is_some(),
            had_element: event.element().is_some(),
            had_old: event.old().is_some(),
        });
        Ok(())
    }
}

impl Listener for RecordingListener {
    fn will_add(&self, event: &ChangeEvent) -> Result<(), ListenerError> {
        self.record(event)
    }

    fn added(&self, event: &ChangeEvent) -> Result<(), ListenerError> {
        self.record(event)
    }

    fn will_change(&self, event: &ChangeEvent) -> Result<(), ListenerError> {
        self.record(event)
    }

    fn changed(&self, event: &ChangeEvent) -> Result<(), ListenerError> {
        self.record(event)
    }

    fn will_remove(&self, event: &ChangeEvent) -> Result<(), ListenerError> {
        self.record(event)
    }

    fn removed(&self, event: &ChangeEvent) -> Result<(), ListenerError> {
        self.record(event)
    }
}

/// Vetoes pre-notifications, either all of them or one kind.
pub struct VetoListener {
    only: Option<EventKind>,
}

impl VetoListener {
    pub fn all() -> Self {
        Self { only: None }
    }

    pub fn only(kind: EventKind) -> Self {
        Self { only: Some(kind) }
    }

    fn check(&self, event: &ChangeEvent) -> Result<(), ListenerError> {
        match self.only {
            Some(kind) if kind != event.kind() => Ok(()),
            _ => Err(ListenerError::veto(format!("{} refused", event.kind()))),
        }
    }
}

impl Listener for VetoListener {
    fn will_add(&self, event: &ChangeEvent) -> Result<(), ListenerError> {
        self.check(event)
    }

    fn will_change(&self, event: &ChangeEvent) -> Result<(), ListenerError> {
        self.check(event)
    }

    fn will_remove(&self, event: &ChangeEvent) -> Result<(), ListenerError> {
        self.check(event)
    }
}

/// Fails every callback with an ordinary error.
pub struct FailingListener;

impl Listener for FailingListener {
    fn will_add(&self, _event: &ChangeEvent) -> Result<(), ListenerError> {
        Err(ListenerError::failed("will_add failed"))
    }

    fn added(&self, _event: &ChangeEvent) -> Result<(), ListenerError> {
        Err(ListenerError::failed("added failed"))
    }

    fn removed(&self, _event: &ChangeEvent) -> Result<(), ListenerError> {
        Err(ListenerError::failed("removed failed"))
    }
}

/// Panics in `added`.
pub struct PanickingListener;

impl Listener for PanickingListener {
    fn added(&self, _event: &ChangeEvent) -> Result<(), ListenerError> {
        panic!("listener blew up");
    }
}

/// In-memory backend that counts calls and fails on request.
pub struct TestBackend {
    entries: RwLock<BTreeMap<String, ElementRef>>,
    element_type: ElementType,
    fetches: AtomicUsize,
    stores: AtomicUsize,
    erases: AtomicUsize,
    fail_fetch: AtomicBool,
    fail_names: AtomicBool,
    closed: AtomicBool,
}

impl Default for TestBackend {
    fn default() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            element_type: ElementType::ANY,
            fetches: AtomicUsize::new(0),
            stores: AtomicUsize::new(0),
            erases: AtomicUsize::new(0),
            fail_fetch: AtomicBool::new(false),
            fail_names: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }
}

impl TestBackend {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_type(mut self, element_type: ElementType) -> Self {
        self.element_type = element_type;
        self
    }

    /// Seed an element without going through a collection.
    pub fn insert(&self, element: ElementRef) {
        let name = element.name().to_string();
        self.insert_as(&name, element);
    }

    /// Seed an element under an arbitrary key.
    pub fn insert_as(&self, key: &str, element: ElementRef) {
        self.entries.write().insert(key.to_string(), element);
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn stores(&self) -> usize {
        self.stores.load(Ordering::SeqCst)
    }

    pub fn erases(&self) -> usize {
        self.erases.load(Ordering::SeqCst)
    }

    pub fn fail_fetch(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    pub fn fail_names(&self, fail: bool) {
        self.fail_names.store(fail, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Backend for TestBackend {
    fn element_type(&self) -> ElementType {
        self.element_type.clone()
    }

    fn contains(&self, name: &str) -> bool {
        self.entries.read().contains_key(name)
    }

    fn fetch(&self, _cx: &Context, name: &str, _origin: &Origin) -> Result<Option<ElementRef>, Error> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(Error::backend("fetch refused"));
        }
        Ok(self.entries.read().get(name).cloned())
    }

    fn store(&self, _cx: &Context, element: &ElementRef, _is_new: bool) -> Result<(), Error> {
        self.stores.fetch_add(1, Ordering::SeqCst);
        self.insert(Arc::clone(element));
        Ok(())
    }

    fn erase(&self, _cx: &Context, name: &str) -> Result<(), Error> {
        self.erases.fetch_add(1, Ordering::SeqCst);
        self.entries.write().remove(name);
        Ok(())
    }

    fn names(&self) -> Result<NameList, Error> {
        if self.fail_names.load(Ordering::SeqCst) {
            return Err(Error::backend("listing refused"));
        }
        Ok(Arc::new(self.entries.read().keys().cloned().collect()))
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Checks every [`Backend`] implementation should pass, run against a
/// fresh backend from `factory` wrapped in a kernel on a private registry.
pub mod backend_suite {
    use super::*;
    use crate::collection::{Collection, CollectionExt};
    use crate::config::CollectionConfig;
    use crate::element::Leaf;
    use crate::kernel::Kernel;
    use crate::registry::Registry;
    use serde_json::json;

    fn kernel<B: Backend>(backend: B) -> Arc<Kernel<B>> {
        Kernel::new(
            CollectionConfig::new("suite").registry(Arc::new(Registry::new())),
            backend,
        )
        .unwrap()
    }

    pub fn put_get_remove_works<B: Backend>(factory: fn() -> B) {
        let collection = kernel(factory());
        assert!(collection.is_empty());

        collection
            .put(Leaf::new("one", json!(1)).into_ref())
            .unwrap();
        collection
            .put(Leaf::new("two", json!(2)).into_ref())
            .unwrap();
        assert_eq!(collection.size(), 2);
        assert!(collection.contains("one"));

        collection.release_all();
        let one = collection.get("one").unwrap().unwrap();
        assert_eq!(one.name(), "one");
        assert_eq!(
            one.as_any().downcast_ref::<Leaf>().map(|l| l.value().clone()),
            Some(json!(1))
        );

        assert!(collection.remove("one").unwrap().is_some());
        assert!(!collection.contains("one"));
        assert!(collection.get("one").unwrap().is_none());
        assert_eq!(collection.size(), 1);
    }

    pub fn names_follow_mutations<B: Backend>(factory: fn() -> B) {
        let collection = kernel(factory());
        for name in ["c", "a", "b"] {
            collection
                .put(Leaf::new(name, json!(null)).into_ref())
                .unwrap();
        }
        let mut names = collection.name_list().to_vec();
        names.sort();
        assert_eq!(names, vec!["a", "b", "c"]);

        collection.remove("b").unwrap();
        assert!(!collection.name_list().contains(&"b".to_string()));
    }

    pub fn replace_returns_previous<B: Backend>(factory: fn() -> B) {
        let collection = kernel(factory());
        collection
            .put(Leaf::new("x", json!("old")).into_ref())
            .unwrap();
        let previous = collection
            .put(Leaf::new("x", json!("new")).into_ref())
            .unwrap()
            .unwrap();
        assert_eq!(
            previous.as_any().downcast_ref::<Leaf>().map(|l| l.value().clone()),
            Some(json!("old"))
        );
        assert_eq!(collection.size(), 1);
    }

    pub fn close_is_idempotent<B: Backend>(factory: fn() -> B) {
        let collection = kernel(factory());
        collection.close();
        collection.close();
        assert!(collection.is_closed());
        assert!(collection.get("anything").is_err());
    }
}
