use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::Addons;
use crate::cluster::NamespaceClient;
use crate::components::{
    Component, ComponentError, ComponentRegistry, RegistryError, is_ready,
};
use crate::config::FnConfig;

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("component {0} cannot act as an ingress")]
    NotIngress(String),
    #[error("installing component {name} failed: {source}")]
    Install {
        name: String,
        #[source]
        source: ComponentError,
    },
    #[error("shutdown requested while bringing up component {0}")]
    Cancelled(String),
}

fn configured(name: &str) -> Option<&str> {
    Some(name.trim()).filter(|n| !n.is_empty())
}

/// Bring up the configured ingress and mesh add-ons, then create the
/// functions namespace. Returns [`BootstrapError::Cancelled`] as soon as
/// `shutdown` fires.
pub async fn bootstrap(
    registry: &ComponentRegistry,
    cfg: &FnConfig,
    namespaces: &dyn NamespaceClient,
    shutdown: &CancellationToken,
) -> Result<Addons, BootstrapError> {
    let poll = cfg.components.ready_poll_interval();
    let timeout = cfg.components.ready_timeout();

    let ingress = match configured(&cfg.ingress) {
        Some(name) => {
            let component = registry.get(name)?;
            if component.as_ingress().is_none() {
                return Err(BootstrapError::NotIngress(name.to_string()));
            }
            Some(ensure_running(component, poll, timeout, shutdown).await?)
        }
        None => None,
    };

    let mesh = match configured(&cfg.mesh) {
        Some(name) => {
            let component = registry.get(name)?;
            Some(ensure_running(component, poll, timeout, shutdown).await?)
        }
        None => None,
    };

    match namespaces.create_namespace(&cfg.functions_namespace).await {
        Ok(()) => info!(namespace = %cfg.functions_namespace, "functions namespace created"),
        Err(e) => warn!(namespace = %cfg.functions_namespace, error = %e, "creating functions namespace failed"),
    }

    Ok(Addons { ingress, mesh })
}

/// Install `component` unless it already runs, then wait up to `timeout`
/// for it to come up. Timing out is not fatal; `shutdown` firing is.
pub async fn ensure_running(
    component: Arc<dyn Component>,
    poll: Duration,
    timeout: Duration,
    shutdown: &CancellationToken,
) -> Result<Arc<dyn Component>, BootstrapError> {
    let name = component.name().to_string();
    if is_ready(&*component).await {
        info!(component = %name, "component already running");
        return Ok(component);
    }

    info!(component = %name, namespace = %component.namespace(), "installing component");
    let installed = tokio::select! {
        biased;
        _ = shutdown.cancelled() => return Err(BootstrapError::Cancelled(name)),
        res = component.install() => res.map_err(|source| BootstrapError::Install {
            name: name.clone(),
            source,
        })?,
    };

    let wait = async {
        while !is_ready(&*installed).await {
            tokio::time::sleep(poll).await;
        }
    };
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => {
            warn!(component = %name, "shutdown while waiting for component");
            return Err(BootstrapError::Cancelled(name));
        }
        res = tokio::time::timeout(timeout, wait) => match res {
            Ok(()) => info!(component = %name, "component ready"),
            Err(_) => warn!(component = %name, ?timeout, "component not ready before timeout; continuing"),
        },
    }
    Ok(installed)
}
