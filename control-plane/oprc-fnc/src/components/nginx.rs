use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::Client;
use kube::api::{Api, ListParams};
use tracing::{info, instrument};

use super::manifests::{apply_documents, fetch_manifests};
use super::{Component, ComponentError, IngressComponent};

const NAMESPACE: &str = "ingress-nginx";
const SERVICE: &str = "ingress-nginx";

/// ingress-nginx controller, installed from its upstream manifests.
pub struct NginxIngressComponent {
    client: Client,
    http: reqwest::Client,
    manifest_urls: Vec<String>,
}

impl NginxIngressComponent {
    pub fn new(client: Client, manifest_urls: Vec<String>) -> Self {
        Self {
            client,
            http: reqwest::Client::new(),
            manifest_urls,
        }
    }
}

#[async_trait]
impl Component for NginxIngressComponent {
    fn name(&self) -> &str {
        "nginx"
    }

    fn namespace(&self) -> &str {
        NAMESPACE
    }

    #[instrument(skip_all, fields(component = "nginx"))]
    async fn install(
        self: Arc<Self>,
    ) -> Result<Arc<dyn Component>, ComponentError> {
        let docs = fetch_manifests(&self.http, &self.manifest_urls).await?;
        info!(documents = docs.len(), "installing ingress-nginx");
        apply_documents(&self.client, &docs, NAMESPACE).await?;
        Ok(self)
    }

    /// Running once the first controller pod reports phase Running.
    async fn is_running(&self) -> Result<bool, ComponentError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), NAMESPACE);
        let list = pods.list(&ListParams::default()).await?;
        Ok(list
            .items
            .first()
            .and_then(|p| p.status.as_ref())
            .and_then(|s| s.phase.as_deref())
            == Some("Running"))
    }

    fn as_ingress(&self) -> Option<&dyn IngressComponent> {
        Some(self)
    }
}

impl IngressComponent for NginxIngressComponent {
    fn service_name(&self) -> &str {
        SERVICE
    }
}
