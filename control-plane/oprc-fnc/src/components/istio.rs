use std::io::Read;
use std::sync::Arc;

use async_trait::async_trait;
use flate2::read::GzDecoder;
use k8s_openapi::api::apps::v1::Deployment;
use kube::Client;
use kube::api::Api;
use tar::Archive;
use tracing::{info, instrument};

use super::manifests::{apply_documents, parse_documents};
use super::{Component, ComponentError};

const NAMESPACE: &str = "istio-system";
const PILOT: &str = "istio-pilot";

/// Manifests inside the release archive, in apply order.
pub const RELEASE_MANIFESTS: [&str; 2] = [
    "install/kubernetes/helm/istio/templates/crds.yaml",
    "install/kubernetes/istio-demo.yaml",
];

/// Istio service mesh, installed from a release archive.
pub struct IstioComponent {
    client: Client,
    http: reqwest::Client,
    release_url: String,
}

impl IstioComponent {
    pub fn new(client: Client, release_url: String) -> Self {
        Self {
            client,
            http: reqwest::Client::new(),
            release_url,
        }
    }
}

/// Pull the files whose archive path ends with one of `wanted` out of a
/// `.tar.gz`, returned in `wanted` order.
pub fn extract_manifests(
    archive: &[u8],
    wanted: &[&str],
) -> Result<Vec<String>, ComponentError> {
    let mut found: Vec<Option<String>> = vec![None; wanted.len()];
    let mut tar = Archive::new(GzDecoder::new(archive));
    for entry in tar.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.to_string_lossy().into_owned();
        if let Some(idx) = wanted.iter().position(|w| path.ends_with(w)) {
            let mut text = String::new();
            entry.read_to_string(&mut text)?;
            found[idx] = Some(text);
        }
    }
    found
        .into_iter()
        .zip(wanted)
        .map(|(f, w)| {
            f.ok_or_else(|| {
                ComponentError::Manifest(format!("{} missing from archive", w))
            })
        })
        .collect()
}

#[async_trait]
impl Component for IstioComponent {
    fn name(&self) -> &str {
        "istio"
    }

    fn namespace(&self) -> &str {
        NAMESPACE
    }

    #[instrument(skip_all, fields(component = "istio"))]
    async fn install(
        self: Arc<Self>,
    ) -> Result<Arc<dyn Component>, ComponentError> {
        let archive = self
            .http
            .get(&self.release_url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        info!(url = %self.release_url, bytes = archive.len(), "downloaded istio release");

        let texts = tokio::task::spawn_blocking(move || {
            extract_manifests(&archive, &RELEASE_MANIFESTS)
        })
        .await
        .map_err(|e| ComponentError::Manifest(e.to_string()))??;

        for text in texts {
            let docs = parse_documents(&text)?;
            apply_documents(&self.client, &docs, NAMESPACE).await?;
        }
        Ok(self)
    }

    /// Running once the pilot deployment reports exactly one available
    /// replica.
    async fn is_running(&self) -> Result<bool, ComponentError> {
        let deployments: Api<Deployment> =
            Api::namespaced(self.client.clone(), NAMESPACE);
        Ok(deployments
            .get_opt(PILOT)
            .await?
            .and_then(|d| d.status)
            .and_then(|s| s.available_replicas)
            == Some(1))
    }
}
