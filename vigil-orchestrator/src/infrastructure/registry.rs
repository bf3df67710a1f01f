//! Adapter registry

use std::collections::HashMap;
use std::sync::Arc;

use vigil_core::domain::ScannerAdapter;

/// Registered adapters, keyed by name, iterated in registration order
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn ScannerAdapter>>,
    order: Vec<String>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn from_adapters(adapters: impl IntoIterator<Item = Arc<dyn ScannerAdapter>>) -> Self {
        let mut registry = Self::new();
        for adapter in adapters {
            registry.register(adapter);
        }
        registry
    }

    /// Register an adapter, replacing any previous one with the same name
    pub fn register(&mut self, adapter: Arc<dyn ScannerAdapter>) {
        let name = adapter.name().to_string();
        if self.adapters.insert(name.clone(), adapter).is_none() {
            self.order.push(name);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ScannerAdapter>> {
        self.adapters.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.adapters.contains_key(name)
    }

    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ScannerAdapter>> {
        self.order.iter().filter_map(|name| self.adapters.get(name))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_adapters::{AdapterKind, builtin_adapters};
    use vigil_core::Config;

    #[test]
    fn test_preserves_registration_order() {
        let registry = AdapterRegistry::from_adapters(builtin_adapters(&Config::default()));
        let expected: Vec<&str> = AdapterKind::ALL.iter().map(|k| k.name()).collect();
        assert_eq!(registry.names(), expected.as_slice());
        assert_eq!(registry.iter().count(), registry.len());
    }

    #[test]
    fn test_reregistering_replaces_without_duplicating() {
        let mut registry = AdapterRegistry::new();
        registry.register(Arc::new(vigil_adapters::SecretsAdapter::new()));
        registry.register(Arc::new(vigil_adapters::SecretsAdapter::new()));
        assert_eq!(registry.len(), 1);
        assert!(registry.contains("secrets"));
        assert!(registry.get("nmap").is_none());
    }
}
