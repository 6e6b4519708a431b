//! Named factories resolved from configuration keys.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::CollectionConfig;
use crate::error::Error;

/// Builds a `T` for the collection being configured.
pub type Factory<T> = Box<dyn Fn(&CollectionConfig) -> Result<Arc<T>, Error> + Send + Sync>;

/// Configuration key → factory table.
///
/// Configuration names things such as a collection's listener by key; the
/// key is looked up here when the collection is constructed.
pub struct Factories<T: ?Sized> {
    entries: RwLock<BTreeMap<String, Factory<T>>>,
}

impl<T: ?Sized> Default for Factories<T> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
        }
    }
}

impl<T: ?Sized> Factories<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory, replacing any previous one under `key`.
    pub fn register<F>(&self, key: impl Into<String>, factory: F)
    where
        F: Fn(&CollectionConfig) -> Result<Arc<T>, Error> + Send + Sync + 'static,
    {
        self.entries.write().insert(key.into(), Box::new(factory));
    }

    pub fn unregister(&self, key: &str) -> bool {
        self.entries.write().remove(key).is_some()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    pub fn create(&self, key: &str, config: &CollectionConfig) -> Result<Arc<T>, Error> {
        let entries = self.entries.read();
        let factory = entries
            .get(key)
            .ok_or_else(|| Error::config(format!("no factory registered for '{}'", key)))?;
        factory(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    trait Greeter: Send + Sync {
        fn greet(&self) -> String;
    }

    struct Named(String);

    impl Greeter for Named {
        fn greet(&self) -> String {
            format!("hello from {}", self.0)
        }
    }

    #[test]
    fn create_by_key() {
        let factories: Factories<dyn Greeter> = Factories::new();
        factories.register("named", |config: &CollectionConfig| {
            Ok(Arc::new(Named(config.name.clone())) as Arc<dyn Greeter>)
        });

        let greeter = factories
            .create("named", &CollectionConfig::new("docs"))
            .unwrap();
        assert_eq!(greeter.greet(), "hello from docs");
        assert_eq!(factories.keys(), vec!["named".to_string()]);
    }

    #[test]
    fn unknown_key_is_config_error() {
        let factories: Factories<dyn Greeter> = Factories::new();
        let err = factories
            .create("missing", &CollectionConfig::new("docs"))
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn unregister_removes() {
        let factories: Factories<dyn Greeter> = Factories::new();
        factories.register("named", |_: &CollectionConfig| {
            Ok(Arc::new(Named("x".into())) as Arc<dyn Greeter>)
        });
        assert!(factories.unregister("named"));
        assert!(!factories.contains("named"));
        assert!(!factories.unregister("named"));
    }
}
