//! A small in-process stand-in for the service registry the callback
//! dispatcher needs to resolve a tenant's caller-service name into a base
//! URL. Production service discovery (etcd/Consul) is out of scope; this
//! repo only needs the resolution contract, satisfied here from static
//! config.

use std::collections::HashMap;

pub trait ServiceRegistry: Send + Sync {
    fn resolve(&self, name: &str) -> Option<String>;
}

#[derive(Debug, Clone, Default)]
pub struct StaticServiceRegistry {
    endpoints: HashMap<String, String>,
}

impl StaticServiceRegistry {
    pub fn new(endpoints: HashMap<String, String>) -> Self {
        Self { endpoints }
    }

    pub fn with_endpoint(mut self, name: impl Into<String>, base_url: impl Into<String>) -> Self {
        self.endpoints.insert(name.into(), base_url.into());
        self
    }
}

impl ServiceRegistry for StaticServiceRegistry {
    fn resolve(&self, name: &str) -> Option<String> {
        self.endpoints.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_registered_endpoint() {
        let registry = StaticServiceRegistry::default().with_endpoint("biz-svc", "http://biz.internal:8080");
        assert_eq!(registry.resolve("biz-svc"), Some("http://biz.internal:8080".to_string()));
    }

    #[test]
    fn unregistered_name_resolves_to_none() {
        let registry = StaticServiceRegistry::default();
        assert_eq!(registry.resolve("missing"), None);
    }
}
