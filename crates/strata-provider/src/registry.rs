use std::collections::HashMap;
use std::sync::Arc;

use crate::driver::Provider;
use crate::error::ProviderError;

/// Dispatches plan/apply calls to the [`Provider`] registered for a resource
/// type string (e.g. `"vm"`, `"dns_record"`).
///
/// This is the registry option from spec.md §9: a name keyed to a
/// capability object conforming to the provider contract, rather than a
/// closed enum of known provider kinds — new provider types register
/// themselves without a code change here.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    /// Registers a provider for a resource type. Returns `&mut self` for chaining.
    pub fn register(&mut self, r#type: impl Into<String>, provider: Arc<dyn Provider>) -> &mut Self {
        self.providers.insert(r#type.into(), provider);
        self
    }

    /// Resolves the provider registered for `type`.
    pub fn for_type(&self, r#type: &str) -> Result<Arc<dyn Provider>, ProviderError> {
        self.providers
            .get(r#type)
            .cloned()
            .ok_or_else(|| ProviderError::NotConfigured(r#type.to_string()))
    }

    /// Returns the resource types with a registered provider.
    pub fn registered_types(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::NullProvider;

    #[test]
    fn resolves_registered_type() {
        let mut registry = ProviderRegistry::new();
        registry.register("vm", Arc::new(NullProvider::new()));
        assert!(registry.for_type("vm").is_ok());
    }

    #[test]
    fn unregistered_type_errors() {
        let registry = ProviderRegistry::new();
        assert!(matches!(
            registry.for_type("vm"),
            Err(ProviderError::NotConfigured(_))
        ));
    }
}
