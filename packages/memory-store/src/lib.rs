//! In-memory backend for Arbor collections.
//!
//! Children are kept in insertion order. Leaves are stored as plain records
//! (type, JSON value, string properties) and materialized on fetch with the
//! owning collection as their origin; any other element is kept as is.
//!
//! Every string property is indexed, which gives collections built on this
//! backend a [`QuerySystem`] for sorted listings and property lookups.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use arbor_core::{CollectionConfig, CollectionExt, Collection, Kernel, Leaf, Registry};
//! use arbor_memory::MemoryBackend;
//! use serde_json::json;
//!
//! let registry = Arc::new(Registry::new());
//! let fruit = Kernel::new(
//!     CollectionConfig::new("fruit").registry(registry),
//!     MemoryBackend::new(),
//! )
//! .unwrap();
//!
//! fruit.put(Leaf::new("pear", json!(3)).with_property("color", "green").into_ref()).unwrap();
//! fruit.put(Leaf::new("apple", json!(5)).with_property("color", "red").into_ref()).unwrap();
//!
//! assert_eq!(*fruit.name_list(), vec!["pear".to_string(), "apple".to_string()]);
//! let red = fruit.query_system().unwrap().lookup("color", "red").unwrap();
//! assert_eq!(*red, vec!["apple".to_string()]);
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use arbor_core::{
    Backend, Context, Descriptor, Element, ElementRef, ElementType, Error, Leaf, NameList,
    Origin, QuerySystem,
};
use parking_lot::RwLock;

/// Name of the index ordering children by name.
pub const NAME_INDEX: &str = "name";

enum Entry {
    Record {
        element_type: ElementType,
        value: serde_json::Value,
        properties: BTreeMap<String, String>,
    },
    Element(ElementRef),
}

impl Entry {
    fn capture(element: &ElementRef) -> Self {
        match element.as_any().downcast_ref::<Leaf>() {
            Some(leaf) => Entry::Record {
                element_type: leaf.element_type(),
                value: leaf.value().clone(),
                properties: leaf.descriptor().properties,
            },
            None => Entry::Element(Arc::clone(element)),
        }
    }

    fn properties(&self) -> BTreeMap<String, String> {
        match self {
            Entry::Record { properties, .. } => properties.clone(),
            Entry::Element(element) => element.descriptor().properties,
        }
    }

    fn descriptor(&self) -> Descriptor {
        match self {
            Entry::Record {
                element_type,
                properties,
                ..
            } => Descriptor {
                element_type: element_type.clone(),
                leaf: true,
                properties: properties.clone(),
            },
            Entry::Element(element) => element.descriptor(),
        }
    }

    fn materialize(&self, name: &str, origin: &Origin) -> ElementRef {
        match self {
            Entry::Record {
                element_type,
                value,
                properties,
            } => {
                let mut leaf = Leaf::new(name, value.clone())
                    .with_type(element_type.clone())
                    .in_collection(origin.clone());
                for (key, value) in properties {
                    leaf = leaf.with_property(key, value);
                }
                leaf.into_ref()
            }
            Entry::Element(element) => Arc::clone(element),
        }
    }
}

/// Property key -> property value -> names carrying it.
#[derive(Default)]
struct PropertyIndex {
    by_key: BTreeMap<String, BTreeMap<String, BTreeSet<String>>>,
}

impl PropertyIndex {
    fn insert(&mut self, name: &str, properties: &BTreeMap<String, String>) {
        for (key, value) in properties {
            self.by_key
                .entry(key.clone())
                .or_default()
                .entry(value.clone())
                .or_default()
                .insert(name.to_string());
        }
    }

    fn remove(&mut self, name: &str, properties: &BTreeMap<String, String>) {
        for (key, value) in properties {
            let Some(values) = self.by_key.get_mut(key) else {
                continue;
            };
            if let Some(names) = values.get_mut(value) {
                names.remove(name);
                if names.is_empty() {
                    values.remove(value);
                }
            }
            if values.is_empty() {
                self.by_key.remove(key);
            }
        }
    }
}

#[derive(Default)]
struct State {
    order: Vec<String>,
    entries: BTreeMap<String, Entry>,
    index: PropertyIndex,
}

/// Insertion-ordered in-memory storage.
///
/// Clones share the same storage, so a test can keep a handle to a backend
/// after moving it into a [`Kernel`](arbor_core::Kernel).
#[derive(Clone)]
pub struct MemoryBackend {
    state: Arc<RwLock<State>>,
    element_type: ElementType,
    mutable: bool,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self {
            state: Arc::new(RwLock::new(State::default())),
            element_type: ElementType::ANY,
            mutable: true,
        }
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict children to `element_type` and its subtypes.
    #[must_use]
    pub fn with_type(mut self, element_type: ElementType) -> Self {
        self.element_type = element_type;
        self
    }

    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.mutable = false;
        self
    }

    /// Add or replace a child directly, bypassing any collection. Useful for
    /// seeding read-only backends.
    pub fn insert(&self, element: ElementRef) {
        let name = element.name().to_string();
        self.write_entry(&name, Entry::capture(&element));
    }

    pub fn len(&self) -> usize {
        self.state.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn write_entry(&self, name: &str, entry: Entry) {
        let mut guard = self.state.write();
        let state = &mut *guard;
        let properties = entry.properties();
        let previous = state.entries.insert(name.to_string(), entry);
        match previous {
            Some(previous) => state.index.remove(name, &previous.properties()),
            None => state.order.push(name.to_string()),
        }
        state.index.insert(name, &properties);
    }
}

impl Backend for MemoryBackend {
    fn size(&self) -> usize {
        self.len()
    }

    fn element_type(&self) -> ElementType {
        self.element_type.clone()
    }

    fn is_mutable(&self) -> bool {
        self.mutable
    }

    fn contains(&self, name: &str) -> bool {
        self.state.read().entries.contains_key(name)
    }

    fn fetch(&self, _cx: &Context, name: &str, origin: &Origin) -> Result<Option<ElementRef>, Error> {
        let state = self.state.read();
        Ok(state
            .entries
            .get(name)
            .map(|entry| entry.materialize(name, origin)))
    }

    fn store(&self, _cx: &Context, element: &ElementRef, is_new: bool) -> Result<(), Error> {
        tracing::trace!(name = element.name(), is_new, "memory store");
        self.write_entry(element.name(), Entry::capture(element));
        Ok(())
    }

    fn erase(&self, _cx: &Context, name: &str) -> Result<(), Error> {
        let mut guard = self.state.write();
        let state = &mut *guard;
        let previous = state.entries.remove(name);
        if let Some(previous) = previous {
            state.index.remove(name, &previous.properties());
            state.order.retain(|existing| existing != name);
        }
        Ok(())
    }

    fn names(&self) -> Result<NameList, Error> {
        Ok(Arc::new(self.state.read().order.clone()))
    }

    fn descriptor(&self, name: &str) -> Option<Descriptor> {
        self.state.read().entries.get(name).map(Entry::descriptor)
    }

    fn query_system(&self) -> Option<Arc<dyn QuerySystem>> {
        Some(Arc::new(MemoryQuery {
            state: Arc::clone(&self.state),
        }))
    }
}

/// Query system over a [`MemoryBackend`]: a name index plus one index per
/// property key in use.
pub struct MemoryQuery {
    state: Arc<RwLock<State>>,
}

impl QuerySystem for MemoryQuery {
    fn indexes(&self) -> Vec<String> {
        let state = self.state.read();
        std::iter::once(NAME_INDEX.to_string())
            .chain(state.index.by_key.keys().cloned())
            .collect()
    }

    /// Children with the property come first, ordered by value then name;
    /// the rest follow in name order.
    fn sorted(&self, index: &str) -> Option<NameList> {
        let state = self.state.read();
        if index == NAME_INDEX {
            return Some(Arc::new(state.entries.keys().cloned().collect()));
        }

        let values = state.index.by_key.get(index)?;
        let mut names: Vec<String> = values.values().flatten().cloned().collect();
        let indexed: BTreeSet<&String> = names.iter().collect();
        let rest: Vec<String> = state
            .entries
            .keys()
            .filter(|name| !indexed.contains(name))
            .cloned()
            .collect();
        names.extend(rest);
        Some(Arc::new(names))
    }

    fn lookup(&self, index: &str, value: &str) -> Option<NameList> {
        let state = self.state.read();
        if index == NAME_INDEX {
            let hit = state.entries.contains_key(value);
            return Some(Arc::new(if hit { vec![value.to_string()] } else { Vec::new() }));
        }

        let values = state.index.by_key.get(index)?;
        let names = values
            .get(value)
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default();
        Some(Arc::new(names))
    }
}
