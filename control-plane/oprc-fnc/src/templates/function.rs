//! Desired-state translation: ManagedFunction spec → native objects.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::autoscaling::v2::{
    CrossVersionObjectReference, HorizontalPodAutoscaler,
    HorizontalPodAutoscalerSpec, MetricSpec, MetricTarget,
    ResourceMetricSource,
};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, PodSpec, PodTemplateSpec, Service, ServicePort,
    ServiceSpec, Toleration,
};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend,
    IngressRule, IngressServiceBackend, IngressSpec, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
    LabelSelector, ObjectMeta,
};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::crd::{AccessPolicy, ManagedFunctionSpec};

pub const FUNCTION_PORT: i32 = 80;
pub const CPU_TARGET_UTILIZATION: i32 = 60;
pub const MANAGED_BY: &str = "oprc-fnc";

pub const CLUSTER_IP: &str = "ClusterIP";
pub const LOAD_BALANCER: &str = "LoadBalancer";

pub fn deployment_name(function: &str) -> String {
    format!("{}-deployment", function)
}

pub fn service_name(function: &str) -> String {
    format!("{}-service", function)
}

pub fn ingress_name(function: &str) -> String {
    format!("{}-ingress", function)
}

pub fn autoscaler_name(function: &str) -> String {
    function.to_string()
}

/// Exposure mode of the function's Service.
pub fn service_type(access: AccessPolicy, routed: bool) -> &'static str {
    if routed || access == AccessPolicy::Private {
        CLUSTER_IP
    } else {
        LOAD_BALANCER
    }
}

#[derive(Clone, Debug)]
pub struct RenderContext<'a> {
    pub name: &'a str,
    pub namespace: &'a str,
    pub spec: &'a ManagedFunctionSpec,
    /// Ingress add-on is ready and the function carries a route.
    pub routed: bool,
    pub toleration_key: &'a str,
    pub ingress_class: Option<&'a str>,
}

#[derive(Clone, Debug)]
pub struct RenderedFunction {
    pub deployment: Deployment,
    pub autoscaler: HorizontalPodAutoscaler,
    pub service: Service,
    pub ingress: Option<Ingress>,
}

fn labels(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app".to_string(), name.to_string()),
        (
            "app.kubernetes.io/managed-by".to_string(),
            MANAGED_BY.to_string(),
        ),
    ])
}

fn selector(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([("app".to_string(), name.to_string())])
}

fn meta(ctx: &RenderContext<'_>, name: String) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: Some(ctx.namespace.to_string()),
        labels: Some(labels(ctx.name)),
        ..Default::default()
    }
}

pub fn render_function(ctx: &RenderContext<'_>) -> RenderedFunction {
    RenderedFunction {
        deployment: render_deployment(ctx),
        autoscaler: render_autoscaler(ctx),
        service: render_service(ctx),
        ingress: ctx
            .spec
            .route()
            .filter(|_| ctx.routed)
            .map(|route| render_ingress(ctx, route)),
    }
}

pub fn render_deployment(ctx: &RenderContext<'_>) -> Deployment {
    let container = Container {
        name: ctx.name.to_string(),
        image: Some(ctx.spec.image.clone()),
        ports: Some(vec![ContainerPort {
            name: Some("http".to_string()),
            protocol: Some("TCP".to_string()),
            container_port: FUNCTION_PORT,
            ..Default::default()
        }]),
        ..Default::default()
    };

    Deployment {
        metadata: meta(ctx, deployment_name(ctx.name)),
        spec: Some(DeploymentSpec {
            // Scaling belongs to the autoscaler from here on.
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(selector(ctx.name)),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels(ctx.name)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    tolerations: Some(vec![Toleration {
                        key: Some(ctx.toleration_key.to_string()),
                        operator: Some("Exists".to_string()),
                        effect: Some("NoSchedule".to_string()),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn render_autoscaler(ctx: &RenderContext<'_>) -> HorizontalPodAutoscaler {
    let (min, max) = ctx.spec.replica_bounds();
    HorizontalPodAutoscaler {
        metadata: meta(ctx, autoscaler_name(ctx.name)),
        spec: Some(HorizontalPodAutoscalerSpec {
            scale_target_ref: CrossVersionObjectReference {
                api_version: Some("apps/v1".to_string()),
                kind: "Deployment".to_string(),
                name: deployment_name(ctx.name),
            },
            min_replicas: Some(min),
            max_replicas: max,
            metrics: Some(vec![MetricSpec {
                type_: "Resource".to_string(),
                resource: Some(ResourceMetricSource {
                    name: "cpu".to_string(),
                    target: MetricTarget {
                        type_: "Utilization".to_string(),
                        average_utilization: Some(CPU_TARGET_UTILIZATION),
                        ..Default::default()
                    },
                }),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn render_service(ctx: &RenderContext<'_>) -> Service {
    Service {
        metadata: meta(ctx, service_name(ctx.name)),
        spec: Some(ServiceSpec {
            selector: Some(selector(ctx.name)),
            ports: Some(vec![ServicePort {
                name: Some("http".to_string()),
                protocol: Some("TCP".to_string()),
                port: FUNCTION_PORT,
                target_port: Some(IntOrString::Int(FUNCTION_PORT)),
                ..Default::default()
            }]),
            type_: Some(
                service_type(ctx.spec.access(), ctx.routed).to_string(),
            ),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn render_ingress(ctx: &RenderContext<'_>, route: &str) -> Ingress {
    let mut metadata = meta(ctx, ingress_name(ctx.name));
    metadata.annotations = Some(BTreeMap::from([
        (
            "nginx.ingress.kubernetes.io/rewrite-target".to_string(),
            "/".to_string(),
        ),
        (
            "nginx.ingress.kubernetes.io/ssl-redirect".to_string(),
            "false".to_string(),
        ),
    ]));

    Ingress {
        metadata,
        spec: Some(IngressSpec {
            ingress_class_name: ctx.ingress_class.map(str::to_string),
            rules: Some(vec![IngressRule {
                host: None,
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath {
                        path: Some(route.to_string()),
                        path_type: "Prefix".to_string(),
                        backend: IngressBackend {
                            service: Some(IngressServiceBackend {
                                name: service_name(ctx.name),
                                port: Some(ServiceBackendPort {
                                    number: Some(FUNCTION_PORT),
                                    name: None,
                                }),
                            }),
                            resource: None,
                        },
                    }],
                }),
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn deployment_image(dep: &Deployment) -> Option<&str> {
    dep.spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref())
        .and_then(|p| p.containers.first())
        .and_then(|c| c.image.as_deref())
}

/// Point the first container at `image`. Returns false when the workload
/// has no container to patch.
pub fn set_deployment_image(dep: &mut Deployment, image: &str) -> bool {
    match dep
        .spec
        .as_mut()
        .and_then(|s| s.template.spec.as_mut())
        .and_then(|p| p.containers.first_mut())
    {
        Some(c) => {
            c.image = Some(image.to_string());
            true
        }
        None => false,
    }
}

pub fn autoscaler_bounds(hpa: &HorizontalPodAutoscaler) -> Option<(i32, i32)> {
    hpa.spec
        .as_ref()
        .map(|s| (s.min_replicas.unwrap_or(1), s.max_replicas))
}

pub fn set_autoscaler_bounds(
    hpa: &mut HorizontalPodAutoscaler,
    (min, max): (i32, i32),
) {
    let spec = hpa.spec.get_or_insert_with(Default::default);
    spec.min_replicas = Some(min);
    spec.max_replicas = max;
}

pub fn ingress_path(ing: &Ingress) -> Option<&str> {
    ing.spec
        .as_ref()
        .and_then(|s| s.rules.as_ref())
        .and_then(|r| r.first())
        .and_then(|r| r.http.as_ref())
        .and_then(|h| h.paths.first())
        .and_then(|p| p.path.as_deref())
}

/// Rewrite the path of the first rule. Returns false when the rule has no
/// HTTP path to patch.
pub fn set_ingress_path(ing: &mut Ingress, route: &str) -> bool {
    match ing
        .spec
        .as_mut()
        .and_then(|s| s.rules.as_mut())
        .and_then(|r| r.first_mut())
        .and_then(|r| r.http.as_mut())
        .and_then(|h| h.paths.first_mut())
    {
        Some(p) => {
            p.path = Some(route.to_string());
            true
        }
        None => false,
    }
}

pub fn current_service_type(svc: &Service) -> &str {
    svc.spec
        .as_ref()
        .and_then(|s| s.type_.as_deref())
        .unwrap_or(CLUSTER_IP)
}

/// Switch the exposure mode. Moving to ClusterIP drops node ports, which
/// the API server rejects on that type.
pub fn set_service_type(svc: &mut Service, type_: &str) {
    let spec = svc.spec.get_or_insert_with(Default::default);
    spec.type_ = Some(type_.to_string());
    if type_ == CLUSTER_IP {
        if let Some(ports) = spec.ports.as_mut() {
            for p in ports.iter_mut() {
                p.node_port = None;
            }
        }
        spec.external_traffic_policy = None;
        spec.allocate_load_balancer_node_ports = None;
    }
}
