//! Armada controller entry point.

use std::sync::Arc;

use armada_k8s::cache::ClusterCache;
use armada_k8s::config::ControllerConfig;
use armada_k8s::controller::{ApiServerProbe, Controller, ProviderRegistry};
use armada_k8s::crd::Cluster;
use armada_k8s::platform::{KubePlatform, PlatformClient};
use armada_k8s::Error;
use kube::runtime::watcher;
use kube::Api;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    info!("starting armada controller v{}", env!("CARGO_PKG_VERSION"));

    let config = ControllerConfig::from_env();
    let kube_client = kube::Client::try_default().await.map_err(Error::Api)?;
    info!("connected to the platform control-plane");

    let platform: Arc<dyn PlatformClient> = Arc::new(KubePlatform::new(
        kube_client.clone(),
        config.client_qps,
        config.client_burst,
    ));
    let cache = Arc::new(ClusterCache::new());

    // Deployments link their provider crates and register them here before
    // the controller starts.
    let registry = Arc::new(ProviderRegistry::new());

    let stop = CancellationToken::new();
    {
        let stop = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("received shutdown signal");
            }
            stop.cancel();
        });
    }

    let controller = Controller::new(
        platform,
        cache,
        registry,
        Arc::new(ApiServerProbe::default()),
        &config,
        stop,
    );
    Arc::clone(&controller)
        .spawn_informer(Api::<Cluster>::all(kube_client), watcher::Config::default());
    Arc::clone(&controller).spawn_resync(config.resync_period);
    controller.run(config.workers).await
}
