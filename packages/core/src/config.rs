//! Collection configuration.
//!
//! A collection is built from a [`CollectionConfig`], either assembled in
//! code with the builder methods or read from the plain-text key/value
//! surface used by configuration files. String values may contain the
//! template tokens `$configPath$` and `$filePath$`, which are substituted
//! before anything is parsed.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cache::{CachePolicy, CacheStrategy};
use crate::collection::CollectionRef;
use crate::element::Origin;
use crate::error::Error;
use crate::path::Path;
use crate::registry::Registry;

/// What a collection does when asked to mutate while immutable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImmutablePolicy {
    /// Log an error and return without doing anything.
    #[default]
    Ignore,
    /// Fail with [`Error::Immutable`].
    Reject,
}

impl FromStr for ImmutablePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ignore" => Ok(ImmutablePolicy::Ignore),
            "reject" => Ok(ImmutablePolicy::Reject),
            other => Err(Error::config(format!(
                "unknown immutable policy '{}'",
                other
            ))),
        }
    }
}

/// Values for the `$configPath$` and `$filePath$` template tokens.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Templates {
    pub config_path: Option<String>,
    pub file_path: Option<String>,
}

impl Templates {
    pub const CONFIG_PATH: &'static str = "$configPath$";
    pub const FILE_PATH: &'static str = "$filePath$";

    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn config_path(mut self, path: impl Into<String>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn file_path(mut self, path: impl Into<String>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    /// Replace every known token in `value`. Tokens without a value are left
    /// as they are.
    pub fn substitute(&self, value: &str) -> String {
        let mut out = value.to_string();
        if let Some(config_path) = &self.config_path {
            out = out.replace(Self::CONFIG_PATH, config_path);
        }
        if let Some(file_path) = &self.file_path {
            out = out.replace(Self::FILE_PATH, file_path);
        }
        out
    }
}

/// Everything a collection needs at construction.
#[derive(Clone)]
pub struct CollectionConfig {
    pub name: String,
    pub parent: Origin,
    /// Parent to look up in the registry at construction, used when
    /// `parent` is not set.
    pub parent_path: Option<Path>,
    pub caching: CacheStrategy,
    /// Overrides the LRU bound of `weak`/`soft` caching.
    pub cache_capacity: Option<usize>,
    pub mutable: bool,
    /// Register the collection as a root under its name.
    pub register_root: bool,
    /// Re-fire descendant events on this collection.
    pub propagate: bool,
    pub immutable_policy: ImmutablePolicy,
    /// Listener factory key, resolved through the registry.
    pub listener: Option<String>,
    pub image: Option<String>,
    pub node_image: Option<String>,
    /// Entries without a dedicated field, passed through to the backend.
    pub properties: BTreeMap<String, String>,
    /// Registry to resolve factories in and register with. `None` means the
    /// process-wide one.
    pub registry: Option<Arc<Registry>>,
}

impl CollectionConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: Origin::none(),
            parent_path: None,
            caching: CacheStrategy::default(),
            cache_capacity: None,
            mutable: true,
            register_root: false,
            propagate: true,
            immutable_policy: ImmutablePolicy::default(),
            listener: None,
            image: None,
            node_image: None,
            properties: BTreeMap::new(),
            registry: None,
        }
    }

    #[must_use]
    pub fn parent(mut self, parent: &CollectionRef) -> Self {
        self.parent = Origin::of(parent);
        self
    }

    #[must_use]
    pub fn in_collection(mut self, origin: Origin) -> Self {
        self.parent = origin;
        self
    }

    #[must_use]
    pub fn parent_path(mut self, path: Path) -> Self {
        self.parent_path = Some(path);
        self
    }

    #[must_use]
    pub fn caching(mut self, caching: CacheStrategy) -> Self {
        self.caching = caching;
        self
    }

    #[must_use]
    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = Some(capacity);
        self
    }

    #[must_use]
    pub fn mutable(mut self, mutable: bool) -> Self {
        self.mutable = mutable;
        self
    }

    #[must_use]
    pub fn root(mut self, register: bool) -> Self {
        self.register_root = register;
        self
    }

    #[must_use]
    pub fn propagate(mut self, propagate: bool) -> Self {
        self.propagate = propagate;
        self
    }

    #[must_use]
    pub fn immutable_policy(mut self, policy: ImmutablePolicy) -> Self {
        self.immutable_policy = policy;
        self
    }

    #[must_use]
    pub fn listener(mut self, key: impl Into<String>) -> Self {
        self.listener = Some(key.into());
        self
    }

    #[must_use]
    pub fn property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn cache_policy(&self) -> CachePolicy {
        CachePolicy::for_strategy(self.caching, self.cache_capacity)
    }

    pub fn registry_or_global(&self) -> Arc<Registry> {
        self.registry.clone().unwrap_or_else(Registry::global)
    }

    /// The structural parent. An explicit `parent` wins; otherwise
    /// `parent_path` is resolved through the registry.
    pub fn resolve_parent(&self) -> Result<Origin, Error> {
        if !self.parent.is_none() {
            return Ok(self.parent.clone());
        }
        let Some(path) = &self.parent_path else {
            return Ok(Origin::none());
        };
        let parent = self
            .registry_or_global()
            .resolve_collection(path, true)
            .map_err(|e| Error::create_failed(path.child(&self.name), e))?;
        Ok(Origin::of(&parent))
    }

    /// Read the plain-text configuration surface.
    pub fn from_properties(
        entries: &BTreeMap<String, String>,
        templates: &Templates,
    ) -> Result<Self, Error> {
        let name = entries
            .get("name")
            .map(|v| templates.substitute(v))
            .ok_or_else(|| Error::config("missing 'name'"))?;
        let mut config = CollectionConfig::new(name);

        for (key, raw) in entries {
            let value = templates.substitute(raw);
            match key.as_str() {
                "name" => {}
                "parent" => {
                    config.parent_path = match non_empty(value) {
                        Some(path) => Some(Path::parse(&path).map_err(|e| {
                            Error::config(format!("invalid parent '{}': {}", path, e))
                        })?),
                        None => None,
                    }
                }
                "caching" => config.caching = value.parse()?,
                "cache_capacity" => {
                    config.cache_capacity = Some(value.trim().parse().map_err(|_| {
                        Error::config(format!("invalid cache_capacity '{}'", value))
                    })?)
                }
                "mutable" => config.mutable = parse_bool(key, &value)?,
                "root" => config.register_root = parse_bool(key, &value)?,
                "propagate" => config.propagate = parse_bool(key, &value)?,
                "immutable_policy" => config.immutable_policy = value.parse()?,
                "listener" => config.listener = non_empty(value),
                "image" => config.image = non_empty(value),
                "node_image" => config.node_image = non_empty(value),
                _ => {
                    config.properties.insert(key.clone(), value);
                }
            }
        }
        Ok(config)
    }

    /// Read the same surface from a JSON object. Scalar values are accepted
    /// in their natural JSON form or as strings.
    pub fn from_json(json: &str, templates: &Templates) -> Result<Self, Error> {
        let value: serde_json::Value = serde_json::from_str(json)
            .map_err(|e| Error::config(format!("invalid configuration JSON: {}", e)))?;
        let object = value
            .as_object()
            .ok_or_else(|| Error::config("configuration must be a JSON object"))?;

        let mut entries = BTreeMap::new();
        for (key, value) in object {
            let text = match value {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Bool(b) => b.to_string(),
                serde_json::Value::Number(n) => n.to_string(),
                serde_json::Value::Null => continue,
                other => {
                    return Err(Error::config(format!(
                        "'{}' must be a scalar, got {}",
                        key, other
                    )))
                }
            };
            entries.insert(key.clone(), text);
        }
        Self::from_properties(&entries, templates)
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, Error> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        _ => Err(Error::config(format!(
            "'{}' expects a boolean, got '{}'",
            key, value
        ))),
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

impl fmt::Debug for CollectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionConfig")
            .field("name", &self.name)
            .field("parent", &self.parent)
            .field("parent_path", &self.parent_path)
            .field("caching", &self.caching)
            .field("cache_capacity", &self.cache_capacity)
            .field("mutable", &self.mutable)
            .field("register_root", &self.register_root)
            .field("propagate", &self.propagate)
            .field("immutable_policy", &self.immutable_policy)
            .field("listener", &self.listener)
            .field("properties", &self.properties)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use collection_literals::btree;
    use std::num::NonZeroUsize;

    fn entries(pairs: BTreeMap<&str, &str>) -> BTreeMap<String, String> {
        pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults() {
        let config = CollectionConfig::new("docs");
        assert_eq!(config.caching, CacheStrategy::Weak);
        assert!(config.mutable);
        assert!(!config.register_root);
        assert!(config.propagate);
        assert_eq!(config.immutable_policy, ImmutablePolicy::Ignore);
        assert!(config.parent.is_none());
        assert!(config.parent_path.is_none());
    }

    #[test]
    fn parent_key_names_a_path() {
        let config = CollectionConfig::from_properties(
            &entries(btree! { "name" => "drafts", "parent" => "$configPath$/docs" }),
            &Templates::new().config_path("site"),
        )
        .unwrap();
        assert_eq!(config.parent_path, Some(Path::parse("site/docs").unwrap()));
        assert!(!config.properties.contains_key("parent"));

        let blank = CollectionConfig::from_properties(
            &entries(btree! { "name" => "drafts", "parent" => " " }),
            &Templates::new(),
        )
        .unwrap();
        assert!(blank.parent_path.is_none());
    }

    #[test]
    fn no_parent_configured() {
        let config = CollectionConfig::new("docs").registry(Arc::new(Registry::new()));
        assert!(config.resolve_parent().unwrap().is_none());
    }

    #[test]
    fn reads_plain_text_surface() {
        let config = CollectionConfig::from_properties(
            &entries(btree! {
                "name" => "docs",
                "caching" => "soft",
                "cache_capacity" => "16",
                "mutable" => "no",
                "root" => "true",
                "immutable_policy" => "reject",
                "listener" => "audit",
                "image" => "folder.png",
                "directory" => "/srv/docs",
            }),
            &Templates::new(),
        )
        .unwrap();

        assert_eq!(config.name, "docs");
        assert_eq!(config.caching, CacheStrategy::Soft);
        assert_eq!(
            config.cache_policy(),
            CachePolicy::BoundedLru(NonZeroUsize::new(16).unwrap())
        );
        assert!(!config.mutable);
        assert!(config.register_root);
        assert_eq!(config.immutable_policy, ImmutablePolicy::Reject);
        assert_eq!(config.listener.as_deref(), Some("audit"));
        assert_eq!(config.image.as_deref(), Some("folder.png"));
        assert_eq!(
            config.properties.get("directory").map(String::as_str),
            Some("/srv/docs")
        );
    }

    #[test]
    fn substitutes_templates_everywhere() {
        let templates = Templates::new()
            .config_path("/etc/arbor")
            .file_path("/etc/arbor/docs.conf");
        let config = CollectionConfig::from_properties(
            &entries(btree! {
                "name" => "docs",
                "directory" => "$configPath$/data",
                "source" => "$filePath$",
                "untouched" => "$other$",
            }),
            &templates,
        )
        .unwrap();

        assert_eq!(config.properties["directory"], "/etc/arbor/data");
        assert_eq!(config.properties["source"], "/etc/arbor/docs.conf");
        assert_eq!(config.properties["untouched"], "$other$");
    }

    #[test]
    fn missing_name_is_rejected() {
        let err = CollectionConfig::from_properties(
            &entries(btree! { "caching" => "hard" }),
            &Templates::new(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn bad_values_are_rejected() {
        for (key, value) in [
            ("caching", "sometimes"),
            ("mutable", "maybe"),
            ("cache_capacity", "-1"),
            ("immutable_policy", "explode"),
            ("parent", "docs\\x"),
        ] {
            let mut map = entries(btree! { "name" => "docs" });
            map.insert(key.to_string(), value.to_string());
            let err = CollectionConfig::from_properties(&map, &Templates::new()).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Config, "{} = {}", key, value);
        }
    }

    #[test]
    fn reads_json() {
        let config = CollectionConfig::from_json(
            r#"{"name": "docs", "caching": "none", "mutable": false, "cache_capacity": 3, "listener": null}"#,
            &Templates::new(),
        )
        .unwrap();
        assert_eq!(config.caching, CacheStrategy::None);
        assert_eq!(config.cache_policy(), CachePolicy::NoCache);
        assert!(!config.mutable);
        assert_eq!(config.cache_capacity, Some(3));
        assert!(config.listener.is_none());
    }

    #[test]
    fn json_must_be_flat_object() {
        assert!(CollectionConfig::from_json("[1, 2]", &Templates::new()).is_err());
        assert!(
            CollectionConfig::from_json(r#"{"name": "x", "nested": {}}"#, &Templates::new())
                .is_err()
        );
    }
}
