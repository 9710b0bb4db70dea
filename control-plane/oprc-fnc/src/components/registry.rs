use std::collections::HashMap;
use std::sync::Arc;

use kube::Client;
use thiserror::Error;

use super::{Component, IstioComponent, NginxIngressComponent};
use crate::config::ComponentsConfig;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("component {0} already registered")]
    Duplicate(String),
    #[error("component {0} not found")]
    NotFound(String),
}

/// Named table of add-ons, keyed case-insensitively.
#[derive(Default)]
pub struct ComponentRegistry {
    components: HashMap<String, Arc<dyn Component>>,
}

fn normalize(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in nginx and istio add-ons.
    pub fn builtin(
        client: Client,
        cfg: &ComponentsConfig,
    ) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        registry.register(
            "nginx",
            Arc::new(NginxIngressComponent::new(
                client.clone(),
                cfg.nginx_manifest_urls(),
            )),
        )?;
        registry.register(
            "istio",
            Arc::new(IstioComponent::new(
                client,
                cfg.istio_release_url.clone(),
            )),
        )?;
        Ok(registry)
    }

    pub fn register(
        &mut self,
        name: &str,
        component: Arc<dyn Component>,
    ) -> Result<(), RegistryError> {
        let key = normalize(name);
        if self.components.contains_key(&key) {
            return Err(RegistryError::Duplicate(key));
        }
        self.components.insert(key, component);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Component>, RegistryError> {
        let key = normalize(name);
        self.components
            .get(&key)
            .cloned()
            .ok_or(RegistryError::NotFound(key))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.components.keys().cloned().collect();
        names.sort();
        names
    }
}
