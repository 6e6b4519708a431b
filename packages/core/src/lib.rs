//! Arbor core: the repository kernel
//!
//! A hierarchical, path-addressed object repository:
//! - `Path`: escaped, slash-delimited address of an element
//! - `Registry`: root name → root collection, and the path resolver
//! - `Kernel`: caching, mutation protocol and lifecycle over a `Backend`
//! - `ChangeEvent`/`Listener`: pre/post notifications with veto and
//!   propagation to ancestors
//!
//! Decorator collections live in `arbor-views`; an in-memory backend lives
//! in `arbor-memory`.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use arbor_core::{path, CollectionConfig, CollectionExt, Element, Kernel, Leaf, Registry};
//! # use arbor_core::{Backend, Context, ElementRef, Error, NameList, Origin};
//! # use parking_lot::RwLock;
//! # use std::collections::BTreeMap;
//! # #[derive(Default)]
//! # struct Map(RwLock<BTreeMap<String, ElementRef>>);
//! # impl Backend for Map {
//! #     fn contains(&self, name: &str) -> bool { self.0.read().contains_key(name) }
//! #     fn fetch(&self, _: &Context, name: &str, _: &Origin) -> Result<Option<ElementRef>, Error> {
//! #         Ok(self.0.read().get(name).cloned())
//! #     }
//! #     fn store(&self, _: &Context, e: &ElementRef, _: bool) -> Result<(), Error> {
//! #         self.0.write().insert(e.name().to_string(), e.clone());
//! #         Ok(())
//! #     }
//! #     fn erase(&self, _: &Context, name: &str) -> Result<(), Error> {
//! #         self.0.write().remove(name);
//! #         Ok(())
//! #     }
//! #     fn names(&self) -> Result<NameList, Error> {
//! #         Ok(Arc::new(self.0.read().keys().cloned().collect()))
//! #     }
//! # }
//!
//! let registry = Arc::new(Registry::new());
//! let docs = Kernel::new(
//!     CollectionConfig::new("docs").root(true).registry(registry.clone()),
//!     Map::default(),
//! )?;
//! docs.put(Leaf::new("readme", serde_json::json!("hello")).into_ref())?;
//!
//! let readme = registry.resolve(&path!("docs/readme"), true)?;
//! assert_eq!(readme.name(), "readme");
//! # Ok::<(), arbor_core::Error>(())
//! ```

mod cache;
mod collection;
mod config;
mod context;
mod element;
mod error;
mod event;
mod factory;
mod kernel;
mod listener;
mod path;
mod query;
mod registry;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use cache::{
    BoundedLru, CachePolicy, CacheStrategy, ElementCache, NoCache, Unbounded, SOFT_CAPACITY,
    WEAK_CAPACITY,
};
pub use collection::{Collection, CollectionCore, CollectionExt, CollectionId, CollectionRef, NameList};
pub use config::{CollectionConfig, ImmutablePolicy, Templates};
pub use context::{Context, ResolveGuard};
pub use element::{Descriptor, Element, ElementRef, ElementType, Leaf, Origin};
pub use error::{BoxError, Error, ErrorKind, Result};
pub use event::{ChangeEvent, EventKind};
pub use factory::{Factories, Factory};
pub use kernel::{Backend, Kernel};
pub use listener::{dispatch, Listener, ListenerError, ListenerId, Listeners, Veto};
pub use path::{escape, unescape, Path, PathError};
pub use query::QuerySystem;
pub use registry::{Authorizer, Registry, RegistryOp};
