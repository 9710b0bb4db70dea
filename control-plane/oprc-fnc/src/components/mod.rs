//! Pluggable ingress / service-mesh add-ons.

pub mod istio;
pub mod manifests;
pub mod nginx;
pub mod registry;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

pub use istio::IstioComponent;
pub use nginx::NginxIngressComponent;
pub use registry::{ComponentRegistry, RegistryError};

#[derive(Debug, Error)]
pub enum ComponentError {
    #[error("kubernetes api error: {0}")]
    Kube(#[from] kube::Error),
    #[error("download failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid manifest: {0}")]
    Manifest(String),
}

/// An add-on the controller can provision and check on.
#[async_trait]
pub trait Component: Send + Sync {
    /// Registry key.
    fn name(&self) -> &str;

    /// Namespace the add-on runs in.
    fn namespace(&self) -> &str;

    /// Provision the add-on. Safe to call when it is already present.
    async fn install(
        self: Arc<Self>,
    ) -> Result<Arc<dyn Component>, ComponentError>;

    async fn is_running(&self) -> Result<bool, ComponentError>;

    /// The ingress view of this add-on, when it can front functions.
    fn as_ingress(&self) -> Option<&dyn IngressComponent> {
        None
    }
}

/// Add-ons that accept routed traffic on behalf of functions.
pub trait IngressComponent: Component {
    /// Service (in [`Component::namespace`]) through which traffic enters.
    fn service_name(&self) -> &str;
}

/// Check readiness, folding check errors into "not running".
pub async fn is_ready(component: &dyn Component) -> bool {
    match component.is_running().await {
        Ok(running) => running,
        Err(e) => {
            tracing::debug!(component = %component.name(), error = %e, "readiness check failed; treating as not running");
            false
        }
    }
}
