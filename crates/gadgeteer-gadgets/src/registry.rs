//! Gadget registry, last-writer-wins by name

use crate::gadget::Gadget;
use dashmap::DashMap;
use std::sync::{Arc, Mutex};

/// Named gadget collection. Registration order is preserved so the catalog
/// renders deterministically.
#[derive(Default)]
pub struct GadgetRegistry {
    gadgets: DashMap<String, Arc<dyn Gadget>>,
    order: Mutex<Vec<String>>,
}

impl GadgetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a gadget. A gadget with the same name replaces the previous
    /// one and moves to the end of the catalog order.
    pub fn register(&self, gadget: impl Gadget + 'static) {
        self.register_arc(Arc::new(gadget));
    }

    pub fn register_arc(&self, gadget: Arc<dyn Gadget>) {
        let name = gadget.name().to_string();
        let mut order = self.order.lock().unwrap();
        order.retain(|n| n != &name);
        order.push(name.clone());
        self.gadgets.insert(name, gadget);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Gadget>> {
        self.gadgets.get(name).map(|g| g.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.gadgets.contains_key(name)
    }

    /// All gadgets in registration order.
    pub fn all(&self) -> Vec<Arc<dyn Gadget>> {
        self.order
            .lock()
            .unwrap()
            .iter()
            .filter_map(|name| self.get(name))
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.order.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.gadgets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gadgets.is_empty()
    }
}
