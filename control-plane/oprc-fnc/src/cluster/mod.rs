//! Cluster access used by the reconciliation engine.
//!
//! The controller only talks to the API server through these traits so the
//! engine can run against an in-memory cluster in tests.

mod api;

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use kube::Client;
use thiserror::Error;

pub use api::{KubeFunctions, KubeNamespaces, KubeObjects};

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("kubernetes api error: {0}")]
    Kube(#[from] kube::Error),
}

impl ClusterError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::Kube(kube::Error::Api(ae)) if ae.code == 404)
    }
}

/// CRUD on one namespaced native kind.
#[async_trait]
pub trait ObjectClient<K>: Send + Sync
where
    K: Send + Sync + 'static,
{
    /// `Ok(None)` when the object does not exist.
    async fn get(&self, ns: &str, name: &str) -> Result<Option<K>, ClusterError>;

    async fn create(&self, ns: &str, obj: &K) -> Result<K, ClusterError>;

    /// Full replace; `obj` must carry the resourceVersion it was read at.
    async fn replace(
        &self,
        ns: &str,
        name: &str,
        obj: &K,
    ) -> Result<K, ClusterError>;

    async fn delete(&self, ns: &str, name: &str) -> Result<(), ClusterError>;
}

#[async_trait]
pub trait NamespaceClient: Send + Sync {
    async fn create_namespace(&self, name: &str) -> Result<(), ClusterError>;
}

/// Writes the controller makes onto ManagedFunction objects themselves.
#[async_trait]
pub trait FunctionClient: Send + Sync {
    /// Record the observed address in `status.url`.
    async fn write_url(
        &self,
        ns: &str,
        name: &str,
        url: &str,
    ) -> Result<(), ClusterError>;

    /// Overwrite `metadata.finalizers`.
    async fn set_finalizers(
        &self,
        ns: &str,
        name: &str,
        finalizers: &[String],
    ) -> Result<(), ClusterError>;
}

/// Handles for every kind the engine reads or writes.
#[derive(Clone)]
pub struct Cluster {
    pub deployments: Arc<dyn ObjectClient<Deployment>>,
    pub autoscalers: Arc<dyn ObjectClient<HorizontalPodAutoscaler>>,
    pub services: Arc<dyn ObjectClient<Service>>,
    pub ingresses: Arc<dyn ObjectClient<Ingress>>,
    pub namespaces: Arc<dyn NamespaceClient>,
    pub functions: Arc<dyn FunctionClient>,
}

impl Cluster {
    pub fn from_client(client: Client) -> Self {
        Self {
            deployments: Arc::new(KubeObjects::<Deployment>::new(
                client.clone(),
            )),
            autoscalers: Arc::new(KubeObjects::<HorizontalPodAutoscaler>::new(
                client.clone(),
            )),
            services: Arc::new(KubeObjects::<Service>::new(client.clone())),
            ingresses: Arc::new(KubeObjects::<Ingress>::new(client.clone())),
            namespaces: Arc::new(KubeNamespaces::new(client.clone())),
            functions: Arc::new(KubeFunctions::new(client)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16, reason: &str) -> ClusterError {
        ClusterError::Kube(kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".into(),
            message: format!("{reason} from the api server"),
            reason: reason.into(),
            code,
        }))
    }

    #[test]
    fn only_api_404_counts_as_not_found() {
        assert!(api_error(404, "NotFound").is_not_found());
        assert!(!api_error(409, "AlreadyExists").is_not_found());
        assert!(!api_error(500, "InternalError").is_not_found());
    }
}
