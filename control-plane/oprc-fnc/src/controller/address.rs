//! Address convergence: publish a function's reachable URL once its
//! endpoint gets an address.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::Service;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::key::ObjectKey;
use crate::cluster::{FunctionClient, ObjectClient};
use crate::components::IngressComponent;
use crate::crd::{AccessPolicy, ManagedFunctionSpec};
use crate::templates::service_name;

/// How the address of the target Service is read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AddressMode {
    /// Through the ingress add-on; `route` is appended to the URL.
    Routed { route: String },
    /// Private function: the Service's cluster IP.
    ClusterInternal,
    /// Public function: the Service's load-balancer address.
    LoadBalanced,
}

/// The Service whose address becomes the function URL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddressTarget {
    pub namespace: String,
    pub service: String,
    pub mode: AddressMode,
}

impl AddressTarget {
    /// Routed functions are reached through the ingress add-on's Service,
    /// everything else through `<name>-service` in `functions_ns`.
    pub fn for_function(
        functions_ns: &str,
        name: &str,
        spec: &ManagedFunctionSpec,
        ingress: Option<&dyn IngressComponent>,
    ) -> Self {
        match (spec.route(), ingress) {
            (Some(route), Some(ing)) => Self {
                namespace: ing.namespace().to_string(),
                service: ing.service_name().to_string(),
                mode: AddressMode::Routed {
                    route: route.to_string(),
                },
            },
            _ => Self {
                namespace: functions_ns.to_string(),
                service: service_name(name),
                mode: match spec.access() {
                    AccessPolicy::Private => AddressMode::ClusterInternal,
                    AccessPolicy::Public => AddressMode::LoadBalanced,
                },
            },
        }
    }
}

/// Current address of `svc`, if it has one yet.
pub fn resolve_address(svc: &Service, mode: &AddressMode) -> Option<String> {
    match mode {
        AddressMode::ClusterInternal => svc
            .spec
            .as_ref()
            .and_then(|s| s.cluster_ip.as_deref())
            .filter(|ip| !ip.is_empty() && *ip != "None")
            .map(str::to_string),
        AddressMode::Routed { .. } | AddressMode::LoadBalanced => {
            let first = svc
                .status
                .as_ref()
                .and_then(|s| s.load_balancer.as_ref())
                .and_then(|lb| lb.ingress.as_ref())
                .and_then(|i| i.first())?;
            first
                .ip
                .as_deref()
                .filter(|ip| !ip.is_empty())
                .or(first.hostname.as_deref().filter(|h| !h.is_empty()))
                .map(str::to_string)
        }
    }
}

pub fn compose_url(address: &str, mode: &AddressMode) -> String {
    match mode {
        AddressMode::Routed { route } => format!("http://{}{}", address, route),
        _ => format!("http://{}", address),
    }
}

/// One function's convergence loop.
pub struct Convergence {
    pub key: ObjectKey,
    pub target: AddressTarget,
    /// Last URL written; seeded from the resource's current status.
    pub last_written: Option<String>,
    pub services: Arc<dyn ObjectClient<Service>>,
    pub writer: Arc<dyn FunctionClient>,
    pub interval: Duration,
}

impl Convergence {
    /// Read the target once and write the URL if it changed. Returns the
    /// URL written, if any.
    pub async fn tick(&mut self) -> Option<String> {
        let svc = match self
            .services
            .get(&self.target.namespace, &self.target.service)
            .await
        {
            Ok(Some(svc)) => svc,
            Ok(None) => {
                debug!(key = %self.key, service = %self.target.service, "target service not found yet");
                return None;
            }
            Err(e) => {
                warn!(key = %self.key, error = %e, "reading target service failed");
                return None;
            }
        };
        let address = resolve_address(&svc, &self.target.mode)?;
        let url = compose_url(&address, &self.target.mode);
        if self.last_written.as_deref() == Some(url.as_str()) {
            return None;
        }
        match self
            .writer
            .write_url(&self.key.namespace, &self.key.name, &url)
            .await
        {
            Ok(()) => {
                info!(key = %self.key, %url, "function url updated");
                self.last_written = Some(url.clone());
                Some(url)
            }
            Err(e) => {
                warn!(key = %self.key, error = %e, "writing function url failed");
                None
            }
        }
    }

    pub async fn run(mut self, token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
        debug!(key = %self.key, "address convergence stopped");
    }
}

/// Running convergence tasks, one per function key.
#[derive(Clone)]
pub struct AddressTracker {
    tasks: Arc<Mutex<HashMap<ObjectKey, CancellationToken>>>,
    shutdown: CancellationToken,
}

impl AddressTracker {
    /// Tasks stop when `shutdown` is cancelled.
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            tasks: Arc::new(Mutex::new(HashMap::new())),
            shutdown,
        }
    }

    /// Spawn `conv`, replacing any task already running for its key.
    pub async fn start(&self, conv: Convergence) {
        let token = self.shutdown.child_token();
        let key = conv.key.clone();
        if let Some(prev) = self.tasks.lock().await.insert(key.clone(), token.clone()) {
            prev.cancel();
        }
        debug!(%key, target = %conv.target.service, "address convergence started");
        tokio::spawn(conv.run(token));
    }

    /// Stop the task for `key`. Returns whether one was running.
    pub async fn cancel(&self, key: &ObjectKey) -> bool {
        match self.tasks.lock().await.remove(key) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn cancel_all(&self) {
        for (_, token) in self.tasks.lock().await.drain() {
            token.cancel();
        }
    }

    pub async fn is_tracking(&self, key: &ObjectKey) -> bool {
        self.tasks.lock().await.contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{
        LoadBalancerIngress, LoadBalancerStatus, ServiceSpec, ServiceStatus,
    };

    fn svc(cluster_ip: Option<&str>, lb: Vec<LoadBalancerIngress>) -> Service {
        Service {
            spec: Some(ServiceSpec {
                cluster_ip: cluster_ip.map(str::to_string),
                ..Default::default()
            }),
            status: Some(ServiceStatus {
                load_balancer: Some(LoadBalancerStatus { ingress: Some(lb) }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn lb(ip: Option<&str>, hostname: Option<&str>) -> LoadBalancerIngress {
        LoadBalancerIngress {
            ip: ip.map(str::to_string),
            hostname: hostname.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn cluster_internal_uses_cluster_ip() {
        let s = svc(Some("10.0.0.7"), vec![lb(Some("1.2.3.4"), None)]);
        assert_eq!(
            resolve_address(&s, &AddressMode::ClusterInternal).as_deref(),
            Some("10.0.0.7")
        );
        let headless = svc(Some("None"), vec![]);
        assert_eq!(resolve_address(&headless, &AddressMode::ClusterInternal), None);
        let empty = svc(Some(""), vec![]);
        assert_eq!(resolve_address(&empty, &AddressMode::ClusterInternal), None);
    }

    #[test]
    fn load_balanced_prefers_ip_then_hostname() {
        let s = svc(None, vec![lb(Some("1.2.3.4"), Some("lb.example.com"))]);
        assert_eq!(
            resolve_address(&s, &AddressMode::LoadBalanced).as_deref(),
            Some("1.2.3.4")
        );
        let s = svc(None, vec![lb(None, Some("lb.example.com"))]);
        assert_eq!(
            resolve_address(&s, &AddressMode::LoadBalanced).as_deref(),
            Some("lb.example.com")
        );
        let pending = svc(Some("10.0.0.7"), vec![]);
        assert_eq!(resolve_address(&pending, &AddressMode::LoadBalanced), None);
    }

    #[test]
    fn url_appends_route_only_when_routed() {
        assert_eq!(
            compose_url("1.2.3.4", &AddressMode::LoadBalanced),
            "http://1.2.3.4"
        );
        assert_eq!(
            compose_url(
                "1.2.3.4",
                &AddressMode::Routed {
                    route: "/hello".into()
                }
            ),
            "http://1.2.3.4/hello"
        );
    }

    #[test]
    fn target_follows_route_and_access() {
        let mut spec = ManagedFunctionSpec {
            image: "img".into(),
            access_policy: Some("Private".into()),
            min: None,
            max: None,
            ingress_route: Some("/f".into()),
        };
        let t = AddressTarget::for_function("fns", "f", &spec, None);
        assert_eq!(t.service, "f-service");
        assert_eq!(t.namespace, "fns");
        assert_eq!(t.mode, AddressMode::ClusterInternal);

        spec.access_policy = None;
        let t = AddressTarget::for_function("fns", "f", &spec, None);
        assert_eq!(t.mode, AddressMode::LoadBalanced);
    }
}
