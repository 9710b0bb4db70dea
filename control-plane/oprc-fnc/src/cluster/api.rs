use std::fmt::Debug;
use std::marker::PhantomData;

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, DeleteParams, ObjectMeta, Patch, PatchParams, PostParams};
use kube::{Client, Resource};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, trace};

use super::{ClusterError, FunctionClient, NamespaceClient, ObjectClient};
use crate::crd::ManagedFunction;

/// [`ObjectClient`] backed by `kube::Api`.
pub struct KubeObjects<K> {
    client: Client,
    _marker: PhantomData<fn() -> K>,
}

impl<K> KubeObjects<K> {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<K> ObjectClient<K> for KubeObjects<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + DeserializeOwned
        + Serialize
        + Debug
        + Send
        + Sync
        + 'static,
{
    async fn get(&self, ns: &str, name: &str) -> Result<Option<K>, ClusterError> {
        let api: Api<K> = Api::namespaced(self.client.clone(), ns);
        Ok(api.get_opt(name).await?)
    }

    async fn create(&self, ns: &str, obj: &K) -> Result<K, ClusterError> {
        let api: Api<K> = Api::namespaced(self.client.clone(), ns);
        let created = api.create(&PostParams::default(), obj).await?;
        trace!(%ns, kind = %K::kind(&()), "created");
        Ok(created)
    }

    async fn replace(
        &self,
        ns: &str,
        name: &str,
        obj: &K,
    ) -> Result<K, ClusterError> {
        let api: Api<K> = Api::namespaced(self.client.clone(), ns);
        Ok(api.replace(name, &PostParams::default(), obj).await?)
    }

    async fn delete(&self, ns: &str, name: &str) -> Result<(), ClusterError> {
        let api: Api<K> = Api::namespaced(self.client.clone(), ns);
        api.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }
}

pub struct KubeNamespaces {
    client: Client,
}

impl KubeNamespaces {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NamespaceClient for KubeNamespaces {
    async fn create_namespace(&self, name: &str) -> Result<(), ClusterError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        api.create(&PostParams::default(), &ns).await?;
        Ok(())
    }
}

pub struct KubeFunctions {
    client: Client,
}

impl KubeFunctions {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl FunctionClient for KubeFunctions {
    async fn write_url(
        &self,
        ns: &str,
        name: &str,
        url: &str,
    ) -> Result<(), ClusterError> {
        let api: Api<ManagedFunction> = Api::namespaced(self.client.clone(), ns);
        let patch = json!({
            "status": {
                "url": url,
                "lastUpdated": Utc::now().to_rfc3339(),
            }
        });
        api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        debug!(%ns, %name, %url, "status url patched");
        Ok(())
    }

    async fn set_finalizers(
        &self,
        ns: &str,
        name: &str,
        finalizers: &[String],
    ) -> Result<(), ClusterError> {
        let api: Api<ManagedFunction> = Api::namespaced(self.client.clone(), ns);
        let patch = json!({"metadata": {"finalizers": finalizers}});
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        debug!(%ns, %name, ?finalizers, "finalizers patched");
        Ok(())
    }
}
