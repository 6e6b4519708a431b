//! The root registry and the path resolver.
//!
//! The registry maps root names to root collections. Resolution walks a path
//! from its root through successive collections, optionally replacing
//! symbolic links by their targets along the way. Every resolution enters its
//! complete path into the call chain's [`Context`], so a fetch that loops
//! back to the path it is constructing fails with [`Error::Creating`]
//! instead of recursing forever.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use lazy_static::lazy_static;
use parking_lot::RwLock;

use crate::collection::{CollectionId, CollectionRef};
use crate::context::Context;
use crate::element::ElementRef;
use crate::error::Error;
use crate::factory::Factories;
use crate::listener::Listener;
use crate::path::Path;

/// Registry mutations subject to authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryOp {
    Register,
    Unregister,
}

impl fmt::Display for RegistryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryOp::Register => f.write_str("register"),
            RegistryOp::Unregister => f.write_str("unregister"),
        }
    }
}

/// Decides whether a registry mutation may proceed.
pub trait Authorizer: Send + Sync {
    fn authorize(&self, op: RegistryOp, root: &str) -> bool;
}

impl<F> Authorizer for F
where
    F: Fn(RegistryOp, &str) -> bool + Send + Sync,
{
    fn authorize(&self, op: RegistryOp, root: &str) -> bool {
        self(op, root)
    }
}

lazy_static! {
    static ref GLOBAL: Arc<Registry> = Arc::new(Registry::new());
}

/// Root name → root collection, plus the factories configuration refers to.
#[derive(Default)]
pub struct Registry {
    roots: RwLock<BTreeMap<String, CollectionRef>>,
    authorizer: RwLock<Option<Arc<dyn Authorizer>>>,
    listeners: Factories<dyn Listener>,
}

impl Registry {
    /// A private registry, independent of the process-wide one.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry.
    pub fn global() -> Arc<Registry> {
        Arc::clone(&GLOBAL)
    }

    pub fn set_authorizer(&self, authorizer: Option<Arc<dyn Authorizer>>) {
        *self.authorizer.write() = authorizer;
    }

    fn authorize(&self, op: RegistryOp, root: &str) -> Result<(), Error> {
        let authorizer = self.authorizer.read().clone();
        match authorizer {
            Some(authorizer) if !authorizer.authorize(op, root) => {
                tracing::warn!(root = %root, op = %op, "registry mutation refused");
                Err(Error::AccessDenied {
                    path: Path::root(root),
                    operation: op.to_string(),
                })
            }
            _ => Ok(()),
        }
    }

    /// Register a root under its own name.
    ///
    /// An existing root of the same name is replaced and returned; two
    /// racing registrations of one name leave whichever ran last.
    pub fn register(&self, root: CollectionRef) -> Result<Option<CollectionRef>, Error> {
        let name = root.name().to_string();
        self.authorize(RegistryOp::Register, &name)?;
        let previous = self.roots.write().insert(name.clone(), root);
        if previous.is_some() {
            tracing::warn!(root = %name, "replaced existing root");
        }
        Ok(previous)
    }

    pub fn unregister(&self, name: &str) -> Result<Option<CollectionRef>, Error> {
        self.authorize(RegistryOp::Unregister, name)?;
        Ok(self.roots.write().remove(name))
    }

    /// Drop the root `name` only if it is still `root`. Used by collections
    /// closing themselves.
    pub fn release_root(&self, name: &str, root: CollectionId) {
        let mut roots = self.roots.write();
        if roots.get(name).is_some_and(|r| r.id() == root) {
            roots.remove(name);
        }
    }

    pub fn root(&self, name: &str) -> Option<CollectionRef> {
        self.roots.read().get(name).cloned()
    }

    pub fn roots(&self) -> Vec<String> {
        self.roots.read().keys().cloned().collect()
    }

    /// Listener factories, keyed by the names configuration uses.
    pub fn listener_factories(&self) -> &Factories<dyn Listener> {
        &self.listeners
    }

    /// Resolve `path` in a new call chain.
    pub fn resolve(&self, path: &Path, follow_links: bool) -> Result<ElementRef, Error> {
        self.resolve_in(&Context::new(), path, follow_links)
    }

    /// Resolve `path` as part of the call chain `cx`.
    pub fn resolve_in(
        &self,
        cx: &Context,
        path: &Path,
        follow_links: bool,
    ) -> Result<ElementRef, Error> {
        let _guard = cx.enter(path)?;

        let mut names = path.components();
        let root_name = names.next().ok_or_else(|| Error::NotFound {
            path: path.clone(),
        })?;
        let mut walked = Path::root(&root_name);
        let root = self.root(&root_name).ok_or_else(|| Error::NotFound {
            path: walked.clone(),
        })?;

        let mut current: ElementRef = root.into_element();
        for name in names {
            let collection = self.enter_collection(cx, current, &walked, follow_links)?;
            walked = walked.child(&name);
            current = collection
                .get_in(cx, &name)?
                .ok_or_else(|| Error::NotFound {
                    path: walked.clone(),
                })?;
        }

        if follow_links {
            if let Some(collection) = Arc::clone(&current).into_collection() {
                if collection.link_target().is_some() {
                    return Ok(self.follow_link(cx, collection)?.into_element());
                }
            }
        }
        Ok(current)
    }

    /// Resolve a path that must end at a collection.
    pub fn resolve_collection(&self, path: &Path, follow_links: bool) -> Result<CollectionRef, Error> {
        self.resolve_collection_in(&Context::new(), path, follow_links)
    }

    pub fn resolve_collection_in(
        &self,
        cx: &Context,
        path: &Path,
        follow_links: bool,
    ) -> Result<CollectionRef, Error> {
        self.resolve_in(cx, path, follow_links)?
            .into_collection()
            .ok_or_else(|| Error::InvalidType {
                path: path.clone(),
                message: "not a collection".to_string(),
            })
    }

    pub fn exists(&self, path: &Path) -> bool {
        self.resolve(path, false).is_ok()
    }

    /// First free variant of `path`; see [`Path::uniq_with`].
    pub fn uniq(&self, path: &Path) -> Path {
        path.uniq_with(|candidate| self.exists(candidate))
    }

    fn enter_collection(
        &self,
        cx: &Context,
        element: ElementRef,
        at: &Path,
        follow_links: bool,
    ) -> Result<CollectionRef, Error> {
        let collection = element.into_collection().ok_or_else(|| Error::InvalidType {
            path: at.clone(),
            message: "not a collection".to_string(),
        })?;
        if follow_links && collection.link_target().is_some() {
            self.follow_link(cx, collection)
        } else {
            Ok(collection)
        }
    }

    fn follow_link(&self, cx: &Context, link: CollectionRef) -> Result<CollectionRef, Error> {
        let Some(target) = link.link_target() else {
            return Ok(link);
        };
        let link_path = link.path();
        let resolved = self
            .resolve_in(cx, &target, true)
            .map_err(|e| Error::SymbolicLink {
                link: link_path.clone(),
                target: target.clone(),
                source: Some(Box::new(e)),
            })?;
        resolved.into_collection().ok_or_else(|| Error::SymbolicLink {
            link: link_path,
            target: target.clone(),
            source: Some(Box::new(Error::InvalidType {
                path: target,
                message: "link target is not a collection".to_string(),
            })),
        })
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("roots", &self.roots())
            .finish()
    }
}
