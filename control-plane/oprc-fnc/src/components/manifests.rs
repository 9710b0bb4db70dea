//! Fetching and server-side applying add-on manifests.

use kube::Client;
use kube::api::{Api, DynamicObject, GroupVersionKind, Patch, PatchParams};
use kube::discovery::{Discovery, Scope};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use super::ComponentError;

const FIELD_MANAGER: &str = "oprc-fnc";

/// Download a manifest bundle as text.
pub async fn fetch_text(
    http: &reqwest::Client,
    url: &str,
) -> Result<String, ComponentError> {
    let body = http
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;
    debug!(%url, bytes = body.len(), "fetched manifest bundle");
    Ok(body)
}

/// Download every bundle in `urls` and parse it into documents, keeping
/// the order of `urls`.
pub async fn fetch_manifests(
    http: &reqwest::Client,
    urls: &[String],
) -> Result<Vec<Value>, ComponentError> {
    let mut docs = Vec::new();
    for url in urls {
        let text = fetch_text(http, url).await?;
        docs.extend(parse_documents(&text)?);
    }
    Ok(docs)
}

/// Split a multi-document YAML stream into JSON objects, dropping empty
/// documents and expanding `kind: List`.
pub fn parse_documents(text: &str) -> Result<Vec<Value>, ComponentError> {
    let mut docs = Vec::new();
    for de in serde_yaml::Deserializer::from_str(text) {
        let doc = Value::deserialize(de)
            .map_err(|e| ComponentError::Manifest(e.to_string()))?;
        if doc.is_null() {
            continue;
        }
        if !doc.is_object() {
            return Err(ComponentError::Manifest(format!(
                "expected a mapping, found {}",
                doc
            )));
        }
        if kind_of(&doc) == "List" {
            if let Some(items) = doc.get("items").and_then(Value::as_array) {
                docs.extend(items.iter().cloned());
            }
        } else {
            docs.push(doc);
        }
    }
    Ok(docs)
}

/// Apply order: lower first.
pub fn kind_priority(kind: &str) -> u8 {
    match kind {
        "Namespace" => 0,
        "CustomResourceDefinition" => 1,
        "ServiceAccount" => 2,
        "ClusterRole" | "Role" => 3,
        "ClusterRoleBinding" | "RoleBinding" => 4,
        "ConfigMap" | "Secret" => 5,
        "Service" => 6,
        "Deployment" | "DaemonSet" | "StatefulSet" => 7,
        _ => 10,
    }
}

pub fn kind_of(doc: &Value) -> &str {
    doc.get("kind").and_then(Value::as_str).unwrap_or("")
}

/// Server-side apply `docs`. Namespaces and CRDs go first, then discovery
/// is refreshed so the remaining documents can use freshly defined kinds.
/// Namespaced objects without a namespace land in `default_ns`.
pub async fn apply_documents(
    client: &Client,
    docs: &[Value],
    default_ns: &str,
) -> Result<(), ComponentError> {
    let (mut foundational, mut rest): (Vec<&Value>, Vec<&Value>) =
        docs.iter().partition(|d| {
            matches!(kind_of(d), "Namespace" | "CustomResourceDefinition")
        });
    foundational.sort_by_key(|d| kind_priority(kind_of(d)));
    rest.sort_by_key(|d| kind_priority(kind_of(d)));

    let params = PatchParams::apply(FIELD_MANAGER).force();
    for group in [foundational, rest] {
        if group.is_empty() {
            continue;
        }
        let discovery = Discovery::new(client.clone()).run().await?;
        for doc in group {
            apply_one(client, &discovery, doc, default_ns, &params).await?;
        }
    }
    info!(count = docs.len(), "applied manifests");
    Ok(())
}

async fn apply_one(
    client: &Client,
    discovery: &Discovery,
    doc: &Value,
    default_ns: &str,
    params: &PatchParams,
) -> Result<(), ComponentError> {
    let kind = kind_of(doc);
    let api_version = doc
        .get("apiVersion")
        .and_then(Value::as_str)
        .ok_or_else(|| ComponentError::Manifest("missing apiVersion".into()))?;
    let name = doc
        .pointer("/metadata/name")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            ComponentError::Manifest(format!("{} without metadata.name", kind))
        })?;

    let (group, version) = api_version.split_once('/').unwrap_or(("", api_version));
    let gvk = GroupVersionKind::gvk(group, version, kind);
    let (ar, caps) = discovery.resolve_gvk(&gvk).ok_or_else(|| {
        ComponentError::Manifest(format!("unknown kind {}/{}", api_version, kind))
    })?;

    let api: Api<DynamicObject> = match caps.scope {
        Scope::Namespaced => {
            let ns = doc
                .pointer("/metadata/namespace")
                .and_then(Value::as_str)
                .unwrap_or(default_ns);
            Api::namespaced_with(client.clone(), ns, &ar)
        }
        Scope::Cluster => Api::all_with(client.clone(), &ar),
    };
    api.patch(name, params, &Patch::Apply(doc)).await?;
    debug!(%kind, %name, "applied manifest");
    Ok(())
}
