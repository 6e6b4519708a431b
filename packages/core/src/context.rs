//! Call-chain context: the reentrancy guard and the causing event.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use crate::error::Error;
use crate::event::ChangeEvent;
use crate::path::Path;

/// State threaded through one logical call chain.
///
/// The in-flight set records every path currently being resolved further
/// up the chain. Clones share it, so a context handed to a backend's fetch
/// sees the resolutions of its callers. Independent chains use independent
/// contexts and never block each other.
#[derive(Clone, Default)]
pub struct Context {
    in_flight: Rc<RefCell<Vec<Path>>>,
    cause: Option<Arc<ChangeEvent>>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Same chain, with mutations tagged as caused by `event`.
    #[must_use]
    pub fn caused_by(&self, event: Arc<ChangeEvent>) -> Context {
        Context {
            in_flight: Rc::clone(&self.in_flight),
            cause: Some(event),
        }
    }

    pub fn cause(&self) -> Option<&Arc<ChangeEvent>> {
        self.cause.as_ref()
    }

    pub fn is_resolving(&self, path: &Path) -> bool {
        self.in_flight.borrow().contains(path)
    }

    pub fn in_flight(&self) -> Vec<Path> {
        self.in_flight.borrow().clone()
    }

    /// Mark `path` as in flight until the guard drops.
    ///
    /// Fails with [`Error::Creating`] if the same chain is already resolving
    /// exactly this path.
    pub fn enter(&self, path: &Path) -> Result<ResolveGuard, Error> {
        let mut in_flight = self.in_flight.borrow_mut();
        if in_flight.contains(path) {
            return Err(Error::Creating { path: path.clone() });
        }
        in_flight.push(path.clone());
        Ok(ResolveGuard {
            in_flight: Rc::clone(&self.in_flight),
            path: path.clone(),
        })
    }
}

/// Removes its path from the in-flight set on drop.
pub struct ResolveGuard {
    in_flight: Rc<RefCell<Vec<Path>>>,
    path: Path,
}

impl Drop for ResolveGuard {
    fn drop(&mut self) {
        let mut in_flight = self.in_flight.borrow_mut();
        if let Some(i) = in_flight.iter().rposition(|p| *p == self.path) {
            in_flight.remove(i);
        }
    }
}
