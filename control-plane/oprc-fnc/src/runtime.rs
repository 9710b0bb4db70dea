use std::net::SocketAddr;
use std::sync::Arc;

use kube::{Api, Client};
use tokio::{task::JoinHandle, try_join};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    cluster::Cluster,
    components::ComponentRegistry,
    config::FnConfig,
    controller::{BootstrapError, ControllerContext, bootstrap, run_controller},
    web::run_http_server,
};

/// Compute the HTTP bind address based on config.
pub fn compute_http_addr(cfg: &FnConfig) -> SocketAddr {
    ([0, 0, 0, 0], cfg.http_port).into()
}

/// Spawn the controller loop.
pub fn spawn_controller(
    ctx: Arc<ControllerContext>,
    client: Client,
    shutdown: CancellationToken,
) -> JoinHandle<anyhow::Result<()>> {
    tokio::spawn(async move {
        run_controller(ctx, Api::all(client), shutdown).await
    })
}

/// Spawn the health server. A server failure cancels `shutdown` so the
/// controller exits too.
pub fn spawn_http(
    addr: SocketAddr,
    shutdown: CancellationToken,
) -> JoinHandle<anyhow::Result<()>> {
    tokio::spawn(async move {
        let res = run_http_server(addr, shutdown.clone()).await;
        if res.is_err() {
            shutdown.cancel();
        }
        res
    })
}

/// Cancel `shutdown` on SIGINT or SIGTERM.
pub fn spawn_signal_handler(shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received");
        shutdown.cancel();
    })
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "SIGTERM handler unavailable; waiting for ctrl-c");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

/// Bootstrap add-ons, then run the controller and HTTP server until a
/// shutdown signal.
pub async fn run_all(client: Client, cfg: FnConfig) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    let cluster = Cluster::from_client(client.clone());
    let registry = ComponentRegistry::builtin(client.clone(), &cfg.components)?;
    info!(components = ?registry.names(), "component registry ready");
    let addons =
        match bootstrap(&registry, &cfg, cluster.namespaces.as_ref(), &shutdown)
            .await
        {
            Ok(addons) => addons,
            Err(BootstrapError::Cancelled(component)) => {
                info!(%component, "shutdown during bootstrap; exiting");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

    let http_addr = compute_http_addr(&cfg);
    let ctx = Arc::new(ControllerContext::new(cluster, addons, cfg, &shutdown));

    let controller = spawn_controller(ctx, client, shutdown.clone());
    let http = spawn_http(http_addr, shutdown);

    let (c_res, h_res) = try_join!(controller, http)?;
    c_res?;
    h_res?;
    Ok(())
}
