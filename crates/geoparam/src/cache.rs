//! Scoped caching of parametrized tensors.
//!
//! Outside a scope every read of a parametrized attribute runs the manifold
//! map again. Inside a scope the first read in a graph records its node and
//! later reads in the same graph return that node, so a weight read by
//! several layers is computed once and its gradient accumulates in one place.
//!
//! Scopes nest. Each binding counts how many scopes are open over it and
//! forgets its node when the outermost one closes, including when the scope
//! is left by unwinding.
//!
//! ```
//! use geoparam::prelude::*;
//!
//! let mut linear = Linear::new(3, 3, true);
//! attach::orthogonal(&mut linear, "weight", OrthogonalConfig::default()).unwrap();
//!
//! let graph = Graph::new();
//! let scope = cached(&linear);
//! let a = linear.module().get(&graph, "weight").unwrap();
//! let b = linear.module().get(&graph, "weight").unwrap();
//! assert_eq!(a, b);
//! drop(scope);
//! ```

use crate::module::Host;
use geoparam_autodiff::{Graph, GraphId, NodeId};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use tracing::trace;

/// Cache state of one binding.
#[derive(Debug, Default)]
pub struct ScopedCache {
    depth: Cell<usize>,
    entry: RefCell<Option<(GraphId, NodeId)>>,
}

impl ScopedCache {
    pub(crate) fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Whether at least one scope is open over this binding.
    pub fn is_active(&self) -> bool {
        self.depth.get() > 0
    }

    /// Whether a node is currently stored.
    pub fn is_filled(&self) -> bool {
        self.entry.borrow().is_some()
    }

    fn enter(&self) {
        self.depth.set(self.depth.get() + 1);
    }

    fn exit(&self) {
        let depth = self.depth.get().saturating_sub(1);
        self.depth.set(depth);
        if depth == 0 {
            self.clear();
        }
    }

    pub(crate) fn lookup(&self, graph: &Graph) -> Option<NodeId> {
        if !self.is_active() {
            return None;
        }
        match *self.entry.borrow() {
            Some((id, node)) if id == graph.id() => Some(node),
            _ => None,
        }
    }

    pub(crate) fn store(&self, graph: &Graph, node: NodeId) {
        if self.is_active() {
            *self.entry.borrow_mut() = Some((graph.id(), node));
        }
    }

    pub(crate) fn clear(&self) {
        self.entry.borrow_mut().take();
    }
}

/// Guard returned by [`cached`]; closes the scope when dropped.
#[must_use = "the cache scope closes as soon as the guard is dropped"]
#[derive(Debug)]
pub struct CacheScope {
    caches: Vec<Rc<ScopedCache>>,
}

impl CacheScope {
    /// Number of bindings covered by this scope.
    pub fn len(&self) -> usize {
        self.caches.len()
    }

    /// Whether the host had no parametrized attributes.
    pub fn is_empty(&self) -> bool {
        self.caches.is_empty()
    }
}

impl Drop for CacheScope {
    fn drop(&mut self) {
        for cache in &self.caches {
            cache.exit();
        }
        trace!(bindings = self.caches.len(), "cache scope closed");
    }
}

/// Opens a cache scope over every parametrization reachable from `host`.
///
/// Bindings registered after the scope opened are not covered by it.
pub fn cached<H: Host + ?Sized>(host: &H) -> CacheScope {
    let caches = host.module().caches();
    for cache in &caches {
        cache.enter();
    }
    trace!(bindings = caches.len(), "cache scope opened");
    CacheScope { caches }
}

/// Runs `f` inside a cache scope over `host`.
pub fn with_cache<H, F, R>(host: &mut H, f: F) -> R
where
    H: Host + ?Sized,
    F: FnOnce(&mut H) -> R,
{
    let _scope = cached(&*host);
    f(host)
}
