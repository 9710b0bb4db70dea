use std::time::Duration;

use envconfig::Envconfig;

pub const DEFAULT_NGINX_MANIFESTS: &str = "https://raw.githubusercontent.com/kubernetes/ingress-nginx/master/deploy/mandatory.yaml,https://raw.githubusercontent.com/kubernetes/ingress-nginx/master/deploy/provider/cloud-generic.yaml";

pub const DEFAULT_ISTIO_RELEASE: &str = "https://github.com/istio/istio/releases/download/1.0.0/istio-1.0.0-linux.tar.gz";

#[derive(Envconfig, Clone, Debug)]
pub struct FnConfig {
    #[envconfig(from = "HTTP_PORT", default = "8088")]
    pub http_port: u16,

    /// Registry name of the ingress add-on; empty disables ingress routing.
    /// Env: INGRESS
    #[envconfig(from = "INGRESS", default = "")]
    pub ingress: String,

    /// Registry name of the service-mesh add-on; empty disables it.
    /// Env: MESH
    #[envconfig(from = "MESH", default = "")]
    pub mesh: String,

    /// Namespace holding every object derived from a ManagedFunction.
    #[envconfig(from = "OPRC_FNC_NAMESPACE", default = "managed-functions")]
    pub functions_namespace: String,

    /// Functions reconciled concurrently.
    #[envconfig(from = "OPRC_FNC_WORKERS", default = "2")]
    pub workers: usize,

    /// Backed-off retries per function before it waits for its next change.
    #[envconfig(from = "OPRC_FNC_MAX_RETRIES", default = "5")]
    pub max_retries: u32,

    /// Address convergence poll interval in milliseconds.
    #[envconfig(from = "OPRC_FNC_ADDRESS_POLL_MS", default = "1000")]
    pub address_poll_ms: u64,

    #[envconfig(nested)]
    pub workload: WorkloadConfig,

    #[envconfig(nested)]
    pub components: ComponentsConfig,
}

#[derive(Envconfig, Clone, Debug)]
pub struct WorkloadConfig {
    /// Taint key tolerated by function pods (burst / virtual-node pools).
    #[envconfig(from = "OPRC_FNC_TOLERATION_KEY", default = "azure.com/aci")]
    pub toleration_key: String,

    /// Optional ingressClassName set on route rules.
    #[envconfig(from = "OPRC_FNC_INGRESS_CLASS")]
    pub ingress_class: Option<String>,
}

#[derive(Envconfig, Clone, Debug)]
pub struct ComponentsConfig {
    /// Comma-separated manifest URLs applied when installing nginx.
    #[envconfig(
        from = "OPRC_FNC_NGINX_MANIFESTS",
        default = "https://raw.githubusercontent.com/kubernetes/ingress-nginx/master/deploy/mandatory.yaml,https://raw.githubusercontent.com/kubernetes/ingress-nginx/master/deploy/provider/cloud-generic.yaml"
    )]
    pub nginx_manifests: String,

    #[envconfig(
        from = "OPRC_FNC_ISTIO_RELEASE_URL",
        default = "https://github.com/istio/istio/releases/download/1.0.0/istio-1.0.0-linux.tar.gz"
    )]
    pub istio_release_url: String,

    #[envconfig(from = "OPRC_FNC_COMPONENT_READY_POLL_SECS", default = "5")]
    pub ready_poll_secs: u64,

    #[envconfig(from = "OPRC_FNC_COMPONENT_READY_TIMEOUT_SECS", default = "300")]
    pub ready_timeout_secs: u64,
}

impl FnConfig {
    pub fn address_poll_interval(&self) -> Duration {
        Duration::from_millis(self.address_poll_ms.max(1))
    }

    /// Reconcile concurrency, never below one.
    pub fn worker_count(&self) -> usize {
        self.workers.max(1)
    }
}

impl ComponentsConfig {
    pub fn nginx_manifest_urls(&self) -> Vec<String> {
        split_list(&self.nginx_manifests)
    }

    pub fn ready_poll_interval(&self) -> Duration {
        Duration::from_secs(self.ready_poll_secs.max(1))
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
