//! Arbor: a hierarchical, path-addressed object repository.
//!
//! Elements live in named collections, collections nest, and every element
//! has a global [`Path`]. Top-level collections are registered as roots in a
//! [`Registry`], which resolves paths to elements. Collections announce every
//! mutation to their listeners before it happens (a listener may veto it) and
//! after, and re-fire those notifications on their ancestors.
//!
//! The pieces come from three layers, re-exported here:
//! - `arbor-core`: paths, the registry, the [`Kernel`] collection over a
//!   [`Backend`], events, caching and configuration
//! - `arbor-views`: decorator collections ([`Derived`], [`Filtered`],
//!   [`Transformed`], [`SymbolicLink`])
//! - `arbor-memory`: the in-memory [`MemoryBackend`]
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use arbor::{path, CollectionConfig, CollectionExt, Collection, Filtered, Kernel, Leaf,
//!     MemoryBackend, NameFilter, Registry};
//! use serde_json::json;
//!
//! let registry = Arc::new(Registry::new());
//! let fruit = Kernel::new(
//!     CollectionConfig::new("fruit").root(true).registry(registry.clone()),
//!     MemoryBackend::new(),
//! )?;
//! let a_fruit = Filtered::new(
//!     CollectionConfig::new("a-fruit").registry(registry.clone()),
//!     fruit.clone(),
//!     Arc::new(NameFilter::prefix("a")),
//! )?;
//!
//! fruit.put(Leaf::new("apple", json!({"weight": 150})).into_ref())?;
//! fruit.put(Leaf::new("banana", json!({"weight": 120})).into_ref())?;
//!
//! assert_eq!(*a_fruit.name_list(), vec!["apple".to_string()]);
//! assert!(registry.exists(&path!("fruit/banana")));
//! # Ok::<(), arbor::Error>(())
//! ```

pub use arbor_core::*;
pub use arbor_memory::{MemoryBackend, MemoryQuery, NAME_INDEX};
pub use arbor_views::{
    Converter, Derived, Filter, Filtered, FnFilter, NameFilter, PropertyFilter, SymbolicLink,
    Transformed,
};
