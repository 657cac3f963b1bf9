//! Ambient environment for effects

use std::collections::HashMap;
use std::sync::Arc;

use crate::types::Val;

/// Immutable, string-keyed service map
///
/// Cloning is cheap; `with` copies the map so earlier holders never observe
/// later bindings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Context {
    services: Arc<HashMap<String, Val>>,
}

impl Context {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_map(services: HashMap<String, Val>) -> Self {
        Self {
            services: Arc::new(services),
        }
    }

    pub fn with(&self, key: impl Into<String>, value: impl Into<Val>) -> Self {
        let mut services = (*self.services).clone();
        services.insert(key.into(), value.into());
        Self::from_map(services)
    }

    /// Bindings of `other` win over bindings of `self`
    pub fn merge(&self, other: &Context) -> Self {
        let mut services = (*self.services).clone();
        services.extend(other.services.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self::from_map(services)
    }

    pub fn get(&self, key: &str) -> Option<&Val> {
        self.services.get(key)
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}
