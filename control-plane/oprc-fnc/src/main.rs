use envconfig::Envconfig;
use kube::Client;
use oprc_fnc::{config::FnConfig, init_tracing, runtime};
use tracing::info;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    init_tracing("info");

    // rustls needs an explicit provider when more than one is compiled in.
    if let Err(e) = rustls::crypto::CryptoProvider::install_default(
        rustls::crypto::aws_lc_rs::default_provider(),
    ) {
        tracing::debug!(
            ?e,
            "CryptoProvider already installed or incompatible; proceeding"
        );
    }

    let cfg = FnConfig::init_from_env()?;
    info!(?cfg, "Starting function controller");

    let client = Client::try_default().await?;
    runtime::run_all(client, cfg).await
}
