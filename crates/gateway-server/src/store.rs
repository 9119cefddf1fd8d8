//! Registry store: the name → registration map shared by every component.

use crate::types::ServiceRegistration;
use dashmap::DashMap;

/// Storage contract for registrations. One entry per name; `set` overwrites.
pub trait RegistryStore: Send + Sync {
    fn set(&self, name: &str, registration: ServiceRegistration);

    fn get(&self, name: &str) -> Option<ServiceRegistration>;

    /// Remove a registration. Returns whether it existed.
    fn delete(&self, name: &str) -> bool;

    /// Every registration, sorted by name
    fn list(&self) -> Vec<ServiceRegistration>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Concurrent in-memory store.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    services: DashMap<String, ServiceRegistration>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RegistryStore for InMemoryStore {
    fn set(&self, name: &str, registration: ServiceRegistration) {
        self.services.insert(name.to_string(), registration);
    }

    fn get(&self, name: &str) -> Option<ServiceRegistration> {
        self.services.get(name).map(|entry| entry.value().clone())
    }

    fn delete(&self, name: &str) -> bool {
        self.services.remove(name).is_some()
    }

    fn list(&self) -> Vec<ServiceRegistration> {
        let mut services: Vec<_> = self
            .services
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        services.sort_by(|a, b| a.name.cmp(&b.name));
        services
    }

    fn len(&self) -> usize {
        self.services.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ServiceMetadata;

    fn registration(name: &str, port: u16) -> ServiceRegistration {
        ServiceRegistration {
            name: name.to_string(),
            host: "localhost".to_string(),
            port,
            version: "v1".to_string(),
            semantic_version: None,
            health_endpoint: format!("/{}/v1/health", name),
            timestamp: None,
            metadata: ServiceMetadata::default(),
        }
    }

    #[test]
    fn test_set_get_overwrite() {
        let store = InMemoryStore::new();
        assert!(store.is_empty());

        store.set("posts", registration("posts", 4000));
        store.set("posts", registration("posts", 4001));

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("posts").map(|r| r.port), Some(4001));
        assert!(store.get("users").is_none());
    }

    #[test]
    fn test_delete_reports_existence() {
        let store = InMemoryStore::new();
        store.set("posts", registration("posts", 4000));

        assert!(store.delete("posts"));
        assert!(!store.delete("posts"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_list_sorted_by_name() {
        let store = InMemoryStore::new();
        for name in ["users", "auth", "posts"] {
            store.set(name, registration(name, 4000));
        }

        let names: Vec<_> = store.list().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["auth", "posts", "users"]);
    }
}
