//! Route storage and dispatch ordering.
//!
//! # Responsibilities
//! - Hold handler descriptors keyed by pattern, request context and verb
//! - Produce the deterministic specificity ordering dispatch walks
//!
//! # Design Decisions
//! - Registration is last-write-wins for the same pattern/context/verb
//! - The sort is computed lazily and cached until the table changes; equal
//!   specificity resolves to the most recently registered pattern

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::dispatch::handler::RouteHandler;
use crate::routing::pattern::{specificity, RequestKind};

/// Everything needed to serve one verb of one route.
#[derive(Clone)]
pub struct RouteEntry {
    pub handler: Arc<dyn RouteHandler>,
    /// Response cache lifetime in seconds; 0 disables caching.
    pub ttl: u64,
    /// Output pacing in KiB/s; 0 disables throttling.
    pub kbps: u64,
    pub alias: Option<String>,
}

/// All registrations sharing one URL template.
pub struct PatternRoutes {
    pub pattern: String,
    pub contexts: BTreeMap<RequestKind, BTreeMap<String, RouteEntry>>,
}

#[derive(Default)]
pub struct RouteTable {
    routes: Vec<PatternRoutes>,
    order: Mutex<Option<Vec<usize>>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn register(
        &mut self,
        pattern: &str,
        kind: RequestKind,
        verb: &str,
        entry: RouteEntry,
    ) {
        let routes = match self
            .routes
            .iter_mut()
            .position(|r| r.pattern == pattern)
        {
            Some(idx) => &mut self.routes[idx],
            None => {
                self.routes.push(PatternRoutes {
                    pattern: pattern.to_string(),
                    contexts: BTreeMap::new(),
                });
                self.routes.last_mut().expect("just pushed")
            }
        };
        routes
            .contexts
            .entry(kind)
            .or_default()
            .insert(verb.to_string(), entry);
        *self.order.lock() = None;
    }

    pub fn get(&self, idx: usize) -> &PatternRoutes {
        &self.routes[idx]
    }

    /// Indices in dispatch order: descending specificity, ties going to the
    /// most recent registration.
    pub fn sorted(&self) -> Vec<usize> {
        let mut cached = self.order.lock();
        if let Some(order) = cached.as_ref() {
            return order.clone();
        }
        let mut order: Vec<usize> = (0..self.routes.len()).collect();
        let keys: Vec<String> = self
            .routes
            .iter()
            .map(|r| specificity(&r.pattern))
            .collect();
        order.sort_by(|&a, &b| keys[b].cmp(&keys[a]).then(b.cmp(&a)));
        *cached = Some(order.clone());
        order
    }
}
