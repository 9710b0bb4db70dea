#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use envconfig::Envconfig;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::core::v1::{
    LoadBalancerIngress, LoadBalancerStatus, Service, ServiceStatus,
};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::{Resource, ResourceExt};
use oprc_fnc::cluster::{
    Cluster, ClusterError, FunctionClient, NamespaceClient, ObjectClient,
};
use oprc_fnc::components::{Component, ComponentError, IngressComponent};
use oprc_fnc::config::FnConfig;
use oprc_fnc::controller::{Addons, ControllerContext, FINALIZER, ObjectKey};
use oprc_fnc::crd::{ManagedFunction, ManagedFunctionSpec};
use tokio_util::sync::CancellationToken;

// DNS-1123 safe numeric suffix for unique names
pub const DIGITS: [char; 10] =
    ['0', '1', '2', '3', '4', '5', '6', '7', '8', '9'];
pub fn uniq(prefix: &str) -> String {
    format!("{prefix}-{}", nanoid::nanoid!(6, &DIGITS))
}

pub const FNS: &str = "managed-functions";

fn api_error(code: u16, reason: &str, message: String) -> ClusterError {
    ClusterError::Kube(kube::Error::Api(kube::core::ErrorResponse {
        status: "Failure".into(),
        message,
        reason: reason.into(),
        code,
    }))
}

pub fn server_error() -> ClusterError {
    api_error(500, "InternalError", "injected failure".into())
}

/// What the API server answers for a missing object.
pub fn not_found(kind: &str, name: &str) -> ClusterError {
    api_error(404, "NotFound", format!("{kind} \"{name}\" not found"))
}

/// What the API server answers when creating an object that exists.
pub fn conflict(kind: &str, name: &str) -> ClusterError {
    api_error(409, "AlreadyExists", format!("{kind} \"{name}\" already exists"))
}

/// In-memory stand-in for one namespaced kind.
pub struct MemoryObjects<K> {
    kind: &'static str,
    objects: Mutex<HashMap<(String, String), K>>,
    failing: AtomicBool,
    writes: AtomicUsize,
}

impl<K> MemoryObjects<K>
where
    K: Resource + Clone + Send + Sync + 'static,
{
    pub fn new(kind: &'static str) -> Arc<Self> {
        Arc::new(Self {
            kind,
            objects: Mutex::new(HashMap::new()),
            failing: AtomicBool::new(false),
            writes: AtomicUsize::new(0),
        })
    }

    /// Make every call fail with a 500.
    pub fn fail(&self, on: bool) {
        self.failing.store(on, Ordering::SeqCst);
    }

    pub fn insert(&self, ns: &str, obj: K) {
        self.objects
            .lock()
            .unwrap()
            .insert((ns.to_string(), obj.name_any()), obj);
    }

    pub fn peek(&self, ns: &str, name: &str) -> Option<K> {
        self.objects
            .lock()
            .unwrap()
            .get(&(ns.to_string(), name.to_string()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    /// Successful create/replace/delete calls so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), ClusterError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(server_error())
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl<K> ObjectClient<K> for MemoryObjects<K>
where
    K: Resource + Clone + Send + Sync + 'static,
{
    async fn get(&self, ns: &str, name: &str) -> Result<Option<K>, ClusterError> {
        self.check()?;
        Ok(self.peek(ns, name))
    }

    async fn create(&self, ns: &str, obj: &K) -> Result<K, ClusterError> {
        self.check()?;
        let name = obj.name_any();
        let mut objects = self.objects.lock().unwrap();
        let key = (ns.to_string(), name.clone());
        if objects.contains_key(&key) {
            return Err(conflict(self.kind, &name));
        }
        let mut stored = obj.clone();
        stored.meta_mut().resource_version = Some("1".into());
        objects.insert(key, stored.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(stored)
    }

    async fn replace(
        &self,
        ns: &str,
        name: &str,
        obj: &K,
    ) -> Result<K, ClusterError> {
        self.check()?;
        let mut objects = self.objects.lock().unwrap();
        let key = (ns.to_string(), name.to_string());
        let Some(current) = objects.get(&key) else {
            return Err(not_found(self.kind, name));
        };
        let next = current
            .meta()
            .resource_version
            .as_deref()
            .and_then(|rv| rv.parse::<u64>().ok())
            .unwrap_or(0)
            + 1;
        let mut stored = obj.clone();
        stored.meta_mut().resource_version = Some(next.to_string());
        objects.insert(key, stored.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(stored)
    }

    async fn delete(&self, ns: &str, name: &str) -> Result<(), ClusterError> {
        self.check()?;
        let removed = self
            .objects
            .lock()
            .unwrap()
            .remove(&(ns.to_string(), name.to_string()));
        match removed {
            Some(_) => {
                self.writes.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            None => Err(not_found(self.kind, name)),
        }
    }
}

#[derive(Default)]
pub struct MemoryNamespaces {
    pub created: Mutex<HashSet<String>>,
}

#[async_trait]
impl NamespaceClient for MemoryNamespaces {
    async fn create_namespace(&self, name: &str) -> Result<(), ClusterError> {
        if !self.created.lock().unwrap().insert(name.to_string()) {
            return Err(conflict("Namespace", name));
        }
        Ok(())
    }
}

/// Records every URL and finalizer list written back onto a function.
#[derive(Default)]
pub struct RecordingStatus {
    pub writes: Mutex<Vec<(ObjectKey, String)>>,
    pub finalizers: Mutex<HashMap<ObjectKey, Vec<String>>>,
    pub failing: AtomicBool,
}

impl RecordingStatus {
    pub fn urls(&self) -> Vec<String> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .map(|(_, url)| url.clone())
            .collect()
    }

    /// Last finalizer list patched onto `ns/name`.
    pub fn finalizers_of(&self, ns: &str, name: &str) -> Option<Vec<String>> {
        self.finalizers
            .lock()
            .unwrap()
            .get(&ObjectKey::new(ns, name))
            .cloned()
    }
}

#[async_trait]
impl FunctionClient for RecordingStatus {
    async fn write_url(
        &self,
        ns: &str,
        name: &str,
        url: &str,
    ) -> Result<(), ClusterError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(server_error());
        }
        self.writes
            .lock()
            .unwrap()
            .push((ObjectKey::new(ns, name), url.to_string()));
        Ok(())
    }

    async fn set_finalizers(
        &self,
        ns: &str,
        name: &str,
        finalizers: &[String],
    ) -> Result<(), ClusterError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(server_error());
        }
        self.finalizers
            .lock()
            .unwrap()
            .insert(ObjectKey::new(ns, name), finalizers.to_vec());
        Ok(())
    }
}

/// Handles on every fake backing a [`Cluster`].
pub struct FakeCluster {
    pub deployments: Arc<MemoryObjects<Deployment>>,
    pub autoscalers: Arc<MemoryObjects<HorizontalPodAutoscaler>>,
    pub services: Arc<MemoryObjects<Service>>,
    pub ingresses: Arc<MemoryObjects<Ingress>>,
    pub namespaces: Arc<MemoryNamespaces>,
    pub status: Arc<RecordingStatus>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self {
            deployments: MemoryObjects::new("Deployment"),
            autoscalers: MemoryObjects::new("HorizontalPodAutoscaler"),
            services: MemoryObjects::new("Service"),
            ingresses: MemoryObjects::new("Ingress"),
            namespaces: Arc::new(MemoryNamespaces::default()),
            status: Arc::new(RecordingStatus::default()),
        }
    }

    pub fn cluster(&self) -> Cluster {
        Cluster {
            deployments: self.deployments.clone(),
            autoscalers: self.autoscalers.clone(),
            services: self.services.clone(),
            ingresses: self.ingresses.clone(),
            namespaces: self.namespaces.clone(),
            functions: self.status.clone(),
        }
    }
}

/// Add-on whose readiness is driven by the test.
pub struct FakeComponent {
    name: String,
    namespace: String,
    service: Option<String>,
    pub running: AtomicBool,
    pub ready_after_install: bool,
    pub fail_install: bool,
    pub status_error: bool,
    pub installs: AtomicUsize,
}

impl FakeComponent {
    pub fn mesh(name: &str, running: bool) -> Self {
        Self {
            name: name.to_string(),
            namespace: format!("{name}-system"),
            service: None,
            running: AtomicBool::new(running),
            ready_after_install: true,
            fail_install: false,
            status_error: false,
            installs: AtomicUsize::new(0),
        }
    }

    pub fn ingress(name: &str, running: bool) -> Self {
        Self {
            service: Some(format!("{name}-controller")),
            namespace: format!("{name}-ns"),
            ..Self::mesh(name, running)
        }
    }

    pub fn set_running(&self, on: bool) {
        self.running.store(on, Ordering::SeqCst);
    }

    pub fn install_count(&self) -> usize {
        self.installs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Component for FakeComponent {
    fn name(&self) -> &str {
        &self.name
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn install(
        self: Arc<Self>,
    ) -> Result<Arc<dyn Component>, ComponentError> {
        self.installs.fetch_add(1, Ordering::SeqCst);
        if self.fail_install {
            return Err(ComponentError::Manifest("install refused".into()));
        }
        if self.ready_after_install {
            self.set_running(true);
        }
        Ok(self)
    }

    async fn is_running(&self) -> Result<bool, ComponentError> {
        if self.status_error {
            return Err(ComponentError::Manifest("status check failed".into()));
        }
        Ok(self.running.load(Ordering::SeqCst))
    }

    fn as_ingress(&self) -> Option<&dyn IngressComponent> {
        if self.service.is_some() { Some(self) } else { None }
    }
}

impl IngressComponent for FakeComponent {
    fn service_name(&self) -> &str {
        self.service.as_deref().unwrap_or_default()
    }
}

pub fn config(pairs: &[(&str, &str)]) -> FnConfig {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    FnConfig::init_from_hashmap(&map).expect("config")
}

pub fn context(
    fake: &FakeCluster,
    ingress: Option<Arc<FakeComponent>>,
) -> ControllerContext {
    let cfg = config(&[("OPRC_FNC_ADDRESS_POLL_MS", "10")]);
    let addons = Addons {
        ingress: ingress.map(|c| c as Arc<dyn Component>),
        mesh: None,
    };
    ControllerContext::new(fake.cluster(), addons, cfg, &CancellationToken::new())
}

pub fn function(
    ns: &str,
    name: &str,
    image: &str,
    access: Option<&str>,
    route: Option<&str>,
) -> ManagedFunction {
    let mut obj = ManagedFunction::new(
        name,
        ManagedFunctionSpec {
            image: image.into(),
            access_policy: access.map(str::to_string),
            min: None,
            max: None,
            ingress_route: route.map(str::to_string),
        },
    );
    obj.metadata.namespace = Some(ns.into());
    obj.metadata.resource_version = Some("1".into());
    obj.metadata.generation = Some(1);
    obj.metadata.finalizers = Some(vec![FINALIZER.to_string()]);
    obj
}

/// `obj` as the API server shows it once a delete has been requested.
pub fn deleting(mut obj: ManagedFunction) -> ManagedFunction {
    obj.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
    obj
}

/// Give `svc` a load-balancer address.
pub fn with_lb(mut svc: Service, ip: Option<&str>, hostname: Option<&str>) -> Service {
    svc.status = Some(ServiceStatus {
        load_balancer: Some(LoadBalancerStatus {
            ingress: Some(vec![LoadBalancerIngress {
                ip: ip.map(str::to_string),
                hostname: hostname.map(str::to_string),
                ..Default::default()
            }]),
        }),
        ..Default::default()
    });
    svc
}
