//! Arbor views: decorator collections
//!
//! Each decorator wraps a primary collection and re-exports a modified view
//! of it:
//! - [`Derived`]: the primary as is, with its own (optionally index-sorted)
//!   name list
//! - [`Filtered`]: only the children passing a [`Filter`]
//! - [`Transformed`]: children converted on the way out and back in by a
//!   [`Converter`]
//! - [`SymbolicLink`]: the collection at another path, resolved on first use
//!
//! Decorators subscribe to their primary and re-fire its events as their
//! own, with the original event reachable through
//! [`ChangeEvent::primary`](arbor_core::ChangeEvent::primary). A veto raised
//! on the pre-notification of a `Derived` or `Transformed` view aborts the
//! primary's mutation.

mod derived;
mod filter;
mod filtered;
mod forward;
mod symlink;
mod transformed;

pub use derived::Derived;
pub use filter::{Filter, FnFilter, NameFilter, PropertyFilter};
pub use filtered::Filtered;
pub use symlink::SymbolicLink;
pub use transformed::{Converter, Transformed};
