use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use portlink_channel::{ChannelProtocol, Handler, HandlerResolver, HandlerSet};

/// Path-keyed registry of service handler sets.
///
/// The serving side of an endpoint: register methods under a service path,
/// bind the registry to a channel, and inbound requests route by
/// `(path, method)`. Requests for an unregistered path or method get a
/// method-not-found reply from the channel.
pub struct ServiceRegistry {
    services: RwLock<HashMap<String, Arc<HandlerSet>>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self {
            services: RwLock::new(HashMap::new()),
        }
    }

    /// The handler set at `path`, created on first use.
    pub fn service(&self, path: impl Into<String>) -> Arc<HandlerSet> {
        let path = path.into();
        let mut services = self
            .services
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            services
                .entry(path)
                .or_insert_with(|| Arc::new(HandlerSet::new())),
        )
    }

    pub fn get(&self, path: &str) -> Option<Arc<HandlerSet>> {
        self.services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
    }

    /// Unregister the service at `path`.
    pub fn remove(&self, path: &str) -> Option<Arc<HandlerSet>> {
        self.services
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path)
    }

    /// Registered service paths, sorted.
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        paths.sort_unstable();
        paths
    }

    /// Install this registry as the channel's handler resolver.
    pub fn bind(self: &Arc<Self>, channel: &ChannelProtocol) {
        channel.bind_resolver(Arc::clone(self) as Arc<dyn HandlerResolver>);
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerResolver for ServiceRegistry {
    fn resolve(&self, path: &str, method: &str) -> Option<Handler> {
        let Some(service) = self.get(path) else {
            tracing::debug!(path, method, "request for unregistered service path");
            return None;
        };
        service.get_handler(method)
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("paths", &self.paths())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;

    #[test]
    fn service_is_created_on_first_use_and_shared() {
        let registry = ServiceRegistry::new();
        let a = registry.service("calc");
        let b = registry.service("calc");
        assert!(Arc::ptr_eq(&a, &b));

        a.register_fn("one", |_| Ok(json!(1)));
        assert!(b.get_handler("one").is_some());
        assert_eq!(registry.paths(), vec!["calc".to_string()]);
    }

    #[test]
    fn resolve_routes_by_path_and_method() {
        let registry = ServiceRegistry::new();
        registry
            .service("calc")
            .register_fn("add", |ctx| {
                let sum: i64 = ctx.args().iter().filter_map(Value::as_i64).sum();
                Ok(json!(sum))
            });

        assert!(registry.resolve("calc", "add").is_some());
        assert!(registry.resolve("calc", "sub").is_none());
        assert!(registry.resolve("other", "add").is_none());
    }

    #[test]
    fn removed_service_no_longer_resolves() {
        let registry = ServiceRegistry::new();
        registry.service("tmp").register_fn("ping", |_| Ok(Value::Null));

        assert!(registry.remove("tmp").is_some());
        assert!(registry.resolve("tmp", "ping").is_none());
        assert!(registry.remove("tmp").is_none());
    }
}
