//! Predicates for [`Filtered`](crate::Filtered) views.

use std::sync::Arc;

use arbor_core::{Collection, Element, NameList};

/// A predicate over elements, with an optional bulk query.
pub trait Filter: Send + Sync {
    fn accepts(&self, element: &dyn Element) -> bool;

    /// Names in `primary` that pass, without testing elements one by one.
    /// The flag says whether the names are sorted.
    fn query(&self, _primary: &dyn Collection) -> Option<(NameList, bool)> {
        None
    }
}

/// Passes elements whose name satisfies a predicate. Never materializes
/// elements to build a listing.
pub struct NameFilter {
    predicate: Box<dyn Fn(&str) -> bool + Send + Sync>,
}

impl NameFilter {
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Box::new(predicate),
        }
    }

    pub fn prefix(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        Self::new(move |name| name.starts_with(&prefix))
    }
}

impl Filter for NameFilter {
    fn accepts(&self, element: &dyn Element) -> bool {
        (self.predicate)(element.name())
    }

    fn query(&self, primary: &dyn Collection) -> Option<(NameList, bool)> {
        let names: Vec<String> = primary
            .name_list()
            .iter()
            .filter(|name| (self.predicate)(name))
            .cloned()
            .collect();
        let sorted = names.windows(2).all(|pair| pair[0] <= pair[1]);
        Some((Arc::new(names), sorted))
    }
}

/// Passes elements whose descriptor carries `key = value`.
///
/// Uses the primary's `key` index for the listing when there is one.
pub struct PropertyFilter {
    key: String,
    value: String,
}

impl PropertyFilter {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl Filter for PropertyFilter {
    fn accepts(&self, element: &dyn Element) -> bool {
        element.descriptor().property(&self.key) == Some(self.value.as_str())
    }

    fn query(&self, primary: &dyn Collection) -> Option<(NameList, bool)> {
        let names = primary.query_system()?.lookup(&self.key, &self.value)?;
        Some((names, true))
    }
}

/// Passes elements accepted by a closure.
pub struct FnFilter<F>(pub F);

impl<F> Filter for FnFilter<F>
where
    F: Fn(&dyn Element) -> bool + Send + Sync,
{
    fn accepts(&self, element: &dyn Element) -> bool {
        (self.0)(element)
    }
}
