//! Elements, element types, descriptors and origin back-references.

use std::any::Any;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};

use crate::collection::{Collection, CollectionRef};
use crate::path::Path;

/// Shared handle to an element.
pub type ElementRef = Arc<dyn Element>;

/// Name of an element type.
///
/// Types are dotted names forming a hierarchy: `doc` accepts `doc.image`
/// but not `docs`. [`ElementType::ANY`] accepts everything.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementType(Cow<'static, str>);

impl ElementType {
    pub const ANY: ElementType = ElementType(Cow::Borrowed("*"));
    pub const LEAF: ElementType = ElementType(Cow::Borrowed("leaf"));
    pub const COLLECTION: ElementType = ElementType(Cow::Borrowed("collection"));

    pub const fn from_static(name: &'static str) -> Self {
        ElementType(Cow::Borrowed(name))
    }

    pub fn new(name: impl Into<String>) -> Self {
        ElementType(Cow::Owned(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if an element of type `other` may be stored where `self` is
    /// declared.
    pub fn accepts(&self, other: &ElementType) -> bool {
        if *self == Self::ANY || self == other {
            return true;
        }
        other
            .as_str()
            .strip_prefix(self.as_str())
            .is_some_and(|rest| rest.starts_with('.'))
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ElementType({})", self.0)
    }
}

/// Cheap summary of an element, available without materializing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    pub element_type: ElementType,
    pub leaf: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
}

impl Descriptor {
    pub fn new(element_type: ElementType, leaf: bool) -> Self {
        Self {
            element_type,
            leaf,
            properties: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

/// Non-owning reference from an element to the collection that owns it.
///
/// Ownership always runs collection → children; the origin never keeps its
/// collection alive.
#[derive(Clone, Default)]
pub struct Origin(Option<Weak<dyn Collection>>);

impl Origin {
    /// A detached origin (roots, free-standing elements).
    pub fn none() -> Self {
        Origin(None)
    }

    pub fn of(collection: &CollectionRef) -> Self {
        Origin(Some(Arc::downgrade(collection)))
    }

    pub(crate) fn from_weak(weak: Weak<dyn Collection>) -> Self {
        Origin(Some(weak))
    }

    /// The owning collection, if there is one and it is still alive.
    pub fn get(&self) -> Option<CollectionRef> {
        self.0.as_ref().and_then(Weak::upgrade)
    }

    pub fn is_none(&self) -> bool {
        self.0.is_none()
    }
}

impl fmt::Debug for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(collection) => write!(f, "Origin({})", collection.path()),
            None if self.0.is_some() => f.write_str("Origin(<dropped>)"),
            None => f.write_str("Origin(none)"),
        }
    }
}

/// A uniquely named entity stored in a collection.
///
/// Beyond its name and origin an element is opaque to the kernel. Concrete
/// payloads are reached through [`Element::as_any`].
pub trait Element: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn origin(&self) -> Option<CollectionRef>;

    fn element_type(&self) -> ElementType;

    fn as_any(&self) -> &dyn Any;

    /// Canonical path: the origin's path plus this name, or a root path for
    /// detached elements.
    fn path(&self) -> Path {
        match self.origin() {
            Some(origin) => origin.path().child(self.name()),
            None => Path::root(self.name()),
        }
    }

    fn descriptor(&self) -> Descriptor {
        Descriptor::new(self.element_type(), true)
    }

    /// The collection view of this element, if it is one.
    fn into_collection(self: Arc<Self>) -> Option<CollectionRef> {
        None
    }
}

impl fmt::Debug for dyn Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Element")
            .field("name", &self.name())
            .field("type", &self.element_type())
            .finish()
    }
}

/// A plain leaf element: a name, a JSON payload and string properties.
pub struct Leaf {
    name: String,
    origin: Origin,
    element_type: ElementType,
    value: serde_json::Value,
    properties: BTreeMap<String, String>,
}

impl Leaf {
    pub fn new(name: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            origin: Origin::none(),
            element_type: ElementType::LEAF,
            value,
            properties: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn in_collection(mut self, origin: Origin) -> Self {
        self.origin = origin;
        self
    }

    #[must_use]
    pub fn with_type(mut self, element_type: ElementType) -> Self {
        self.element_type = element_type;
        self
    }

    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn value(&self) -> &serde_json::Value {
        &self.value
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn into_ref(self) -> ElementRef {
        Arc::new(self)
    }
}

impl Element for Leaf {
    fn name(&self) -> &str {
        &self.name
    }

    fn origin(&self) -> Option<CollectionRef> {
        self.origin.get()
    }

    fn element_type(&self) -> ElementType {
        self.element_type.clone()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn descriptor(&self) -> Descriptor {
        Descriptor {
            element_type: self.element_type.clone(),
            leaf: true,
            properties: self.properties.clone(),
        }
    }
}
