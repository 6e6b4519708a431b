//! Plumbing shared by the decorators: the listener they attach to their
//! primary, and construction checks.

use std::sync::{Arc, Weak};

use arbor_core::{
    ChangeEvent, CollectionConfig, CollectionCore, CollectionId, CollectionRef, Context, Error,
    Listener, ListenerError, Path, Registry,
};

/// A decorator's reaction to an event fired by its primary.
pub(crate) trait Relay: Send + Sync + 'static {
    fn relay(&self, cx: &Context, event: &ChangeEvent) -> Result<(), ListenerError>;
}

/// Listener attached to a primary on behalf of a decorator.
///
/// Holds the decorator weakly; the primary's listener list must not keep its
/// own views alive.
pub(crate) struct Forward<T: Relay>(Weak<T>);

impl<T: Relay> Forward<T> {
    pub(crate) fn new(target: &Arc<T>) -> Arc<Self> {
        Arc::new(Forward(Arc::downgrade(target)))
    }
}

impl<T: Relay> Listener for Forward<T> {
    fn deliver(&self, cx: &Context, event: &ChangeEvent) -> Result<(), ListenerError> {
        match self.0.upgrade() {
            Some(target) => target.relay(cx, event),
            None => Ok(()),
        }
    }
}

/// Hand an event fired below `primary` to the decorator's listeners and
/// ancestors as it is. Returns false for the primary's own events.
pub(crate) fn pass_descendant(
    core: &CollectionCore,
    primary: CollectionId,
    cx: &Context,
    event: &ChangeEvent,
) -> bool {
    if event.source_id() == primary {
        return false;
    }
    if !event.kind().is_pre() {
        core.propagate(cx, &Arc::new(event.clone()));
    }
    true
}

pub(crate) fn check_name(config: &CollectionConfig) -> Result<(), Error> {
    if config.name.is_empty() {
        let parent = config
            .parent
            .get()
            .map(|p| p.path())
            .unwrap_or_else(Path::empty);
        return Err(Error::InvalidName {
            path: parent,
            name: String::new(),
        });
    }
    Ok(())
}

/// Attach the configured listener and register as a root if asked to.
/// Returns whether the collection was registered.
pub(crate) fn finish(
    config: &CollectionConfig,
    registry: &Registry,
    collection: CollectionRef,
) -> Result<bool, Error> {
    if let Some(key) = &config.listener {
        let listener = registry.listener_factories().create(key, config)?;
        collection.add_listener(listener);
    }
    if config.register_root {
        registry.register(collection)?;
        return Ok(true);
    }
    Ok(false)
}
