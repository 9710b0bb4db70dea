pub mod address;
pub mod bootstrap;
pub mod key;
pub mod reconcile;
pub mod retry;

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use futures_util::StreamExt;
use kube::Resource;
use kube::api::Api;
use kube::runtime::{Config, Controller, WatchStreamExt, reflector, watcher};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cluster::{Cluster, ClusterError};
use crate::components::{Component, IngressComponent, is_ready};
use crate::config::FnConfig;
use crate::crd::ManagedFunction;

pub use address::{AddressMode, AddressTarget, AddressTracker, Convergence};
pub use bootstrap::{BootstrapError, bootstrap};
pub use key::ObjectKey;
pub use reconcile::{FINALIZER, error_policy, reconcile, reconcile_function};
pub use retry::{RetryTracker, backoff};

#[derive(thiserror::Error, Debug)]
pub enum ReconcileErr {
    #[error("{action} {kind} {name}: {source}")]
    Cluster {
        action: &'static str,
        kind: &'static str,
        name: String,
        #[source]
        source: ClusterError,
    },
    #[error("cleanup of {key} left {failed} object(s) behind")]
    Cleanup { key: ObjectKey, failed: usize },
}

/// Add-ons adopted at startup.
#[derive(Default)]
pub struct Addons {
    pub ingress: Option<Arc<dyn Component>>,
    pub mesh: Option<Arc<dyn Component>>,
}

impl Addons {
    /// The ingress add-on, when one is configured and currently ready.
    pub async fn ready_ingress(&self) -> Option<&dyn IngressComponent> {
        let ingress = self.ingress.as_deref()?;
        if is_ready(ingress).await {
            ingress.as_ingress()
        } else {
            None
        }
    }
}

pub struct ControllerContext {
    pub cluster: Cluster,
    pub addons: Addons,
    pub cfg: FnConfig,
    pub retries: RetryTracker,
    pub addresses: AddressTracker,
}

impl ControllerContext {
    pub fn new(
        cluster: Cluster,
        addons: Addons,
        cfg: FnConfig,
        shutdown: &CancellationToken,
    ) -> Self {
        Self {
            cluster,
            addons,
            cfg,
            retries: RetryTracker::new(),
            addresses: AddressTracker::new(shutdown.child_token()),
        }
    }
}

/// Fingerprint of what should wake the reconciler. The generation only
/// moves on spec writes, so status patches and relists hash the same.
pub fn spec_revision(obj: &ManagedFunction) -> Option<u64> {
    let meta = obj.meta();
    let mut h = DefaultHasher::new();
    (meta.generation?, meta.deletion_timestamp.is_some()).hash(&mut h);
    Some(h.finish())
}

/// Watch ManagedFunctions in every namespace and reconcile them until
/// `shutdown` fires.
pub async fn run_controller(
    ctx: Arc<ControllerContext>,
    api: Api<ManagedFunction>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let (reader, writer) = reflector::store();
    let stream = watcher(api, watcher::Config::default())
        .default_backoff()
        .reflect(writer)
        .applied_objects()
        .predicate_filter(spec_revision);

    let workers = ctx.cfg.worker_count();
    info!(workers, "controller started");
    Controller::for_stream(stream, reader)
        .with_config(
            Config::default().concurrency(u16::try_from(workers).unwrap_or(u16::MAX)),
        )
        .graceful_shutdown_on(shutdown.clone().cancelled_owned())
        .run(reconcile, error_policy, ctx.clone())
        .for_each(|res| async move {
            match res {
                Ok((obj_ref, action)) => {
                    debug!(function = %obj_ref, ?action, "reconciled")
                }
                Err(e) => warn!(error = %e, "reconcile error"),
            }
        })
        .await;

    ctx.addresses.cancel_all().await;
    info!("controller stopped");
    Ok(())
}
