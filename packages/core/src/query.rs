//! Optional index/query provider a backend may expose.

use crate::collection::NameList;

/// Named indexes over a collection's children.
///
/// Built lazily by the kernel the first time something asks for it. When a
/// collection has none, callers fall back to source order and linear scans.
pub trait QuerySystem: Send + Sync {
    /// Names of the indexes this system maintains.
    fn indexes(&self) -> Vec<String>;

    /// All child names ordered by `index`, or `None` if there is no such
    /// index.
    fn sorted(&self, index: &str) -> Option<NameList>;

    /// Names whose `index` value equals `value`, in name order, or `None` if
    /// there is no such index.
    fn lookup(&self, index: &str, value: &str) -> Option<NameList>;
}
