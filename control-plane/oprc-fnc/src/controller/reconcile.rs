use std::sync::Arc;

use k8s_openapi::api::apps::v1::Deployment;
use kube::Resource;
use kube::runtime::controller::Action;
use tracing::{debug, error, info, instrument, warn};

use super::address::{AddressTarget, Convergence};
use super::key::ObjectKey;
use super::retry::retry_action;
use super::{ControllerContext, ReconcileErr};
use crate::cluster::ClusterError;
use crate::components::IngressComponent;
use crate::crd::ManagedFunction;
use crate::templates::{
    RenderContext, autoscaler_bounds, autoscaler_name, current_service_type,
    deployment_image, deployment_name, ingress_name, ingress_path,
    render_autoscaler, render_deployment, render_function, render_ingress,
    render_service, service_name, service_type, set_autoscaler_bounds,
    set_deployment_image, set_ingress_path, set_service_type,
};

/// Held on every ManagedFunction until its derived objects are gone.
pub const FINALIZER: &str = "oaas.io/function-finalizer";

fn failed(
    action: &'static str,
    kind: &'static str,
    name: &str,
) -> impl FnOnce(ClusterError) -> ReconcileErr {
    let name = name.to_string();
    move |source| ReconcileErr::Cluster {
        action,
        kind,
        name,
        source,
    }
}

pub fn has_finalizer(obj: &ManagedFunction) -> bool {
    obj.meta()
        .finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|x| x == FINALIZER))
}

/// Controller entry point.
pub async fn reconcile(
    obj: Arc<ManagedFunction>,
    ctx: Arc<ControllerContext>,
) -> Result<Action, ReconcileErr> {
    reconcile_function(&ctx, &obj).await?;
    ctx.retries.reset(&ObjectKey::of(&obj));
    Ok(Action::await_change())
}

/// Requeue a failed function with backoff until `max_retries` consecutive
/// failures, then leave it until its next change.
pub fn error_policy(
    obj: Arc<ManagedFunction>,
    err: &ReconcileErr,
    ctx: Arc<ControllerContext>,
) -> Action {
    let key = ObjectKey::of(&obj);
    let attempt = ctx.retries.increment(&key);
    let action = retry_action(attempt, ctx.cfg.max_retries);
    if action == Action::await_change() {
        error!(%key, retries = attempt - 1, error = %err, "reconcile failed; dropping key");
        ctx.retries.reset(&key);
    } else {
        warn!(%key, attempt, error = %err, "reconcile failed; retrying");
    }
    action
}

/// Converge the cluster onto `obj`. A function being deleted has its
/// derived objects removed before the finalizer is released.
#[instrument(skip_all, fields(key = %ObjectKey::of(obj)))]
pub async fn reconcile_function(
    ctx: &ControllerContext,
    obj: &ManagedFunction,
) -> Result<(), ReconcileErr> {
    let key = ObjectKey::of(obj);
    if obj.meta().deletion_timestamp.is_some() {
        if has_finalizer(obj) {
            delete(ctx, &key).await?;
            set_finalizers(ctx, &key, obj, false).await?;
        }
        return Ok(());
    }
    if !has_finalizer(obj) {
        set_finalizers(ctx, &key, obj, true).await?;
    }
    apply(ctx, &key, obj).await
}

async fn set_finalizers(
    ctx: &ControllerContext,
    key: &ObjectKey,
    obj: &ManagedFunction,
    held: bool,
) -> Result<(), ReconcileErr> {
    let mut finals: Vec<String> = obj
        .meta()
        .finalizers
        .iter()
        .flatten()
        .filter(|f| f.as_str() != FINALIZER)
        .cloned()
        .collect();
    if held {
        finals.push(FINALIZER.to_string());
    }
    ctx.cluster
        .functions
        .set_finalizers(&key.namespace, &key.name, &finals)
        .await
        .map_err(failed("patch", "ManagedFunction", &key.name))?;
    debug!(held, "finalizer updated");
    Ok(())
}

async fn apply(
    ctx: &ControllerContext,
    key: &ObjectKey,
    obj: &ManagedFunction,
) -> Result<(), ReconcileErr> {
    let ns = &ctx.cfg.functions_namespace;
    let dep_name = deployment_name(&key.name);
    match ctx.cluster.deployments.get(ns, &dep_name).await {
        Ok(Some(dep)) => update(ctx, key, obj, dep).await,
        Ok(None) => create(ctx, key, obj).await,
        Err(e) => Err(failed("get", "Deployment", &dep_name)(e)),
    }
}

fn render_ctx<'a>(
    ctx: &'a ControllerContext,
    key: &'a ObjectKey,
    obj: &'a ManagedFunction,
    routed: bool,
) -> RenderContext<'a> {
    RenderContext {
        name: &key.name,
        namespace: &ctx.cfg.functions_namespace,
        spec: &obj.spec,
        routed,
        toleration_key: &ctx.cfg.workload.toleration_key,
        ingress_class: ctx.cfg.workload.ingress_class.as_deref(),
    }
}

#[instrument(skip_all)]
async fn create(
    ctx: &ControllerContext,
    key: &ObjectKey,
    obj: &ManagedFunction,
) -> Result<(), ReconcileErr> {
    let ns = &ctx.cfg.functions_namespace;
    let ingress = ctx.addons.ready_ingress().await;
    let routed = ingress.is_some() && obj.spec.route().is_some();
    let rendered = render_function(&render_ctx(ctx, key, obj, routed));
    let c = &ctx.cluster;

    c.deployments
        .create(ns, &rendered.deployment)
        .await
        .map_err(failed("create", "Deployment", &deployment_name(&key.name)))?;
    c.autoscalers
        .create(ns, &rendered.autoscaler)
        .await
        .map_err(failed("create", "HorizontalPodAutoscaler", &autoscaler_name(&key.name)))?;
    c.services
        .create(ns, &rendered.service)
        .await
        .map_err(failed("create", "Service", &service_name(&key.name)))?;
    if let Some(ing) = &rendered.ingress {
        c.ingresses
            .create(ns, ing)
            .await
            .map_err(failed("create", "Ingress", &ingress_name(&key.name)))?;
    }
    info!(%ns, image = %obj.spec.image, routed, "function resources created");

    converge(ctx, key, obj, ingress).await;
    Ok(())
}

#[instrument(skip_all)]
async fn update(
    ctx: &ControllerContext,
    key: &ObjectKey,
    obj: &ManagedFunction,
    dep: Deployment,
) -> Result<(), ReconcileErr> {
    let ns = &ctx.cfg.functions_namespace;
    let name = &key.name;
    let spec = &obj.spec;
    let ingress = ctx.addons.ready_ingress().await;
    let route = spec.route().filter(|_| ingress.is_some());
    let rctx = render_ctx(ctx, key, obj, route.is_some());
    let c = &ctx.cluster;

    let dep_name = deployment_name(name);
    if deployment_image(&dep) != Some(spec.image.as_str()) {
        let mut desired = dep.clone();
        if !set_deployment_image(&mut desired, &spec.image) {
            desired = render_deployment(&rctx);
            desired.metadata.resource_version = dep.metadata.resource_version.clone();
        }
        c.deployments
            .replace(ns, &dep_name, &desired)
            .await
            .map_err(failed("replace", "Deployment", &dep_name))?;
        info!(image = %spec.image, "workload image updated");
    }

    let hpa_name = autoscaler_name(name);
    let bounds = spec.replica_bounds();
    match c
        .autoscalers
        .get(ns, &hpa_name)
        .await
        .map_err(failed("get", "HorizontalPodAutoscaler", &hpa_name))?
    {
        Some(mut hpa) => {
            if autoscaler_bounds(&hpa) != Some(bounds) {
                set_autoscaler_bounds(&mut hpa, bounds);
                c.autoscalers
                    .replace(ns, &hpa_name, &hpa)
                    .await
                    .map_err(failed("replace", "HorizontalPodAutoscaler", &hpa_name))?;
                info!(min = bounds.0, max = bounds.1, "autoscaler bounds updated");
            }
        }
        None => {
            c.autoscalers
                .create(ns, &render_autoscaler(&rctx))
                .await
                .map_err(failed("create", "HorizontalPodAutoscaler", &hpa_name))?;
            info!("autoscaler recreated");
        }
    }

    let ing_name = ingress_name(name);
    if let Some(route) = route {
        match c
            .ingresses
            .get(ns, &ing_name)
            .await
            .map_err(failed("get", "Ingress", &ing_name))?
        {
            Some(mut ing) => {
                if ingress_path(&ing) != Some(route) {
                    if !set_ingress_path(&mut ing, route) {
                        let rv = ing.metadata.resource_version.clone();
                        ing = render_ingress(&rctx, route);
                        ing.metadata.resource_version = rv;
                    }
                    c.ingresses
                        .replace(ns, &ing_name, &ing)
                        .await
                        .map_err(failed("replace", "Ingress", &ing_name))?;
                    info!(%route, "route rule updated");
                }
            }
            None => {
                c.ingresses
                    .create(ns, &render_ingress(&rctx, route))
                    .await
                    .map_err(failed("create", "Ingress", &ing_name))?;
                info!(%route, "route rule created");
            }
        }
    } else if ingress.is_some() {
        match c.ingresses.delete(ns, &ing_name).await {
            Ok(()) => info!("route rule removed"),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(failed("delete", "Ingress", &ing_name)(e)),
        }
    }

    let svc_name = service_name(name);
    let desired_type = service_type(spec.access(), route.is_some());
    match c
        .services
        .get(ns, &svc_name)
        .await
        .map_err(failed("get", "Service", &svc_name))?
    {
        Some(mut svc) => {
            if current_service_type(&svc) != desired_type {
                set_service_type(&mut svc, desired_type);
                c.services
                    .replace(ns, &svc_name, &svc)
                    .await
                    .map_err(failed("replace", "Service", &svc_name))?;
                info!(service_type = desired_type, "service exposure updated");
            }
        }
        None => {
            c.services
                .create(ns, &render_service(&rctx))
                .await
                .map_err(failed("create", "Service", &svc_name))?;
            info!("service recreated");
        }
    }

    converge(ctx, key, obj, ingress).await;
    Ok(())
}

async fn converge(
    ctx: &ControllerContext,
    key: &ObjectKey,
    obj: &ManagedFunction,
    ingress: Option<&dyn IngressComponent>,
) {
    let target = AddressTarget::for_function(
        &ctx.cfg.functions_namespace,
        &key.name,
        &obj.spec,
        ingress,
    );
    ctx.addresses
        .start(Convergence {
            key: key.clone(),
            target,
            last_written: obj.current_url().map(str::to_string),
            services: ctx.cluster.services.clone(),
            writer: ctx.cluster.functions.clone(),
            interval: ctx.cfg.address_poll_interval(),
        })
        .await;
}

fn settle(kind: &str, name: &str, res: Result<(), ClusterError>) -> bool {
    match res {
        Ok(()) => {
            info!(%kind, %name, "deleted");
            true
        }
        Err(e) if e.is_not_found() => {
            debug!(%kind, %name, "already absent");
            true
        }
        Err(e) => {
            warn!(%kind, %name, error = %e, "delete failed");
            false
        }
    }
}

#[instrument(skip_all)]
async fn delete(
    ctx: &ControllerContext,
    key: &ObjectKey,
) -> Result<(), ReconcileErr> {
    ctx.addresses.cancel(key).await;

    let ns = &ctx.cfg.functions_namespace;
    let c = &ctx.cluster;
    let dep = deployment_name(&key.name);
    let hpa = autoscaler_name(&key.name);
    let svc = service_name(&key.name);

    let mut outcomes = vec![
        settle("Deployment", &dep, c.deployments.delete(ns, &dep).await),
        settle("HorizontalPodAutoscaler", &hpa, c.autoscalers.delete(ns, &hpa).await),
        settle("Service", &svc, c.services.delete(ns, &svc).await),
    ];
    if ctx.addons.ready_ingress().await.is_some() {
        let ing = ingress_name(&key.name);
        outcomes.push(settle("Ingress", &ing, c.ingresses.delete(ns, &ing).await));
    }

    match outcomes.iter().filter(|ok| !**ok).count() {
        0 => Ok(()),
        failed => Err(ReconcileErr::Cleanup {
            key: key.clone(),
            failed,
        }),
    }
}
