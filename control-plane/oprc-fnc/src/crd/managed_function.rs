use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const DEFAULT_MIN_REPLICAS: i32 = 1;
pub const DEFAULT_MAX_REPLICAS: i32 = 1000;

#[derive(
    CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq,
)]
#[kube(
    group = "oaas.io",
    version = "v1",
    kind = "ManagedFunction",
    plural = "managedfunctions",
    shortname = "mfn",
    namespaced,
    status = "ManagedFunctionStatus",
    printcolumn = r#"{"name":"Image","type":"string","jsonPath":".spec.image"}"#,
    printcolumn = r#"{"name":"URL","type":"string","jsonPath":".status.url"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ManagedFunctionSpec {
    /// Container image run by the function workload
    pub image: String,
    /// "public" (default) or "private"; compared case-insensitively
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_policy: Option<String>,
    /// Lower replica bound; values <= 1 fall back to 1
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<i32>,
    /// Upper replica bound; values <= 1 fall back to 1000
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<i32>,
    /// URL path routed through the ingress add-on, when one is running
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_route: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManagedFunctionStatus {
    /// Externally reachable address, written by the controller
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessPolicy {
    Public,
    Private,
}

impl ManagedFunctionSpec {
    pub fn access(&self) -> AccessPolicy {
        match self.access_policy.as_deref() {
            Some(p) if p.trim().eq_ignore_ascii_case("private") => {
                AccessPolicy::Private
            }
            _ => AccessPolicy::Public,
        }
    }

    /// Non-empty route path, if any.
    pub fn route(&self) -> Option<&str> {
        self.ingress_route.as_deref().filter(|r| !r.is_empty())
    }

    /// Effective (min, max) replica bounds.
    ///
    /// A bound <= 1 is treated as unset. `max` is raised to `min` so the
    /// autoscaler never receives an inverted range.
    pub fn replica_bounds(&self) -> (i32, i32) {
        let min = self
            .min
            .filter(|m| *m > 1)
            .unwrap_or(DEFAULT_MIN_REPLICAS);
        let max = self
            .max
            .filter(|m| *m > 1)
            .unwrap_or(DEFAULT_MAX_REPLICAS);
        (min, max.max(min))
    }
}

impl ManagedFunction {
    pub fn current_url(&self) -> Option<&str> {
        self.status.as_ref().and_then(|s| s.url.as_deref())
    }
}
