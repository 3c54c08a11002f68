use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

use super::error::{EngineError, EngineResult};
use super::provider::{Provider, ProviderFactory};

/// Process-wide name -> factory mapping.
///
/// Writes happen only at process start (via [`Registry::register`], normally
/// called from [`crate::debrid::drivers::register_all`]); runtime lookups
/// take a read lock. Provider names are compared case-insensitively; the
/// registry itself stores lower-cased keys.
pub struct Registry {
    factories: RwLock<HashMap<String, ProviderFactory>>,
}

static REGISTRY: OnceLock<Registry> = OnceLock::new();

impl Registry {
    fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    pub fn global() -> &'static Registry {
        REGISTRY.get_or_init(Registry::new)
    }

    pub fn register(
        &self,
        name: &str,
        factory: impl Fn(String, &HashMap<String, String>) -> Box<dyn Provider> + Send + Sync + 'static,
    ) {
        let mut factories = self.factories.write().expect("registry lock poisoned");
        factories.insert(name.to_ascii_lowercase(), Box::new(factory));
    }

    /// Returns a new provider instance, or [`EngineErrorKind::NotRegistered`]
    /// on a lookup miss. Never substitutes a default provider.
    pub fn create(
        &self,
        name: &str,
        api_key: String,
        options: &HashMap<String, String>,
    ) -> EngineResult<Box<dyn Provider>> {
        let key = name.to_ascii_lowercase();
        let factories = self.factories.read().expect("registry lock poisoned");
        let factory = factories
            .get(&key)
            .ok_or_else(|| EngineError::not_registered(&key))?;
        Ok(factory(api_key, options))
    }

    pub fn is_registered(&self, name: &str) -> bool {
        let factories = self.factories.read().expect("registry lock poisoned");
        factories.contains_key(&name.to_ascii_lowercase())
    }
}
