//! Capability registry: the directory of named handlers.
//!
//! The registry is built once by the service composition root, filled
//! during startup, and then frozen behind an `Arc` so every request
//! reads it concurrently without locking. There is no global instance;
//! whoever needs it is handed a reference.
//!
//! # Lifecycle
//!
//! | Phase | Calls |
//! |-------|-------|
//! | Startup | [`new`](CapabilityRegistry::new), [`register`](CapabilityRegistry::register) |
//! | Serving | [`get`](CapabilityRegistry::get), [`find`](CapabilityRegistry::find), [`list_all`](CapabilityRegistry::list_all), [`experts`](CapabilityRegistry::experts) |
//! | Re-initialization / tests | [`clear`](CapabilityRegistry::clear) |
//!
//! Writes take `&mut self`, so once the registry is shared no one can
//! register into it. Handlers cannot be removed individually.

use std::collections::HashMap;
use std::sync::Arc;

use concierge_core::{Error, Result};

use crate::handlers::{Handler, HandlerInfo, HandlerKind};

pub struct CapabilityRegistry {
    handlers: Vec<Arc<dyn Handler>>,
    by_name: HashMap<String, usize>,
}

impl CapabilityRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    /// Register a handler under its own [`name`](Handler::name).
    ///
    /// # Errors
    ///
    /// [`Error::DuplicateName`] if the name is already taken; the existing
    /// handler is kept.
    pub fn register(&mut self, handler: Arc<dyn Handler>) -> Result<()> {
        let name = handler.name().to_string();
        if self.by_name.contains_key(&name) {
            return Err(Error::DuplicateName(name));
        }
        self.by_name.insert(name, self.handlers.len());
        self.handlers.push(handler);
        Ok(())
    }

    /// Look up a handler, or [`Error::NotFound`].
    pub fn get(&self, name: &str) -> Result<&Arc<dyn Handler>> {
        self.find(name)
            .ok_or_else(|| Error::NotFound(format!("handler '{}'", name)))
    }

    pub fn find(&self, name: &str) -> Option<&Arc<dyn Handler>> {
        self.by_name.get(name).map(|&i| &self.handlers[i])
    }

    /// Every handler, in registration order.
    pub fn list_all(&self) -> &[Arc<dyn Handler>] {
        &self.handlers
    }

    /// Handlers a router may delegate to (every kind except router),
    /// in registration order.
    pub fn experts(&self) -> impl Iterator<Item = &Arc<dyn Handler>> {
        self.handlers
            .iter()
            .filter(|h| h.kind() != HandlerKind::Router)
    }

    pub fn infos(&self) -> Vec<HandlerInfo> {
        self.handlers.iter().map(|h| HandlerInfo::of(h.as_ref())).collect()
    }

    /// Remove every handler.
    pub fn clear(&mut self) {
        self.handlers.clear();
        self.by_name.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}
