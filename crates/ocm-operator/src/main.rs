//! OCM registration operator

mod config;
mod runner;

use clap::Parser;
use kube::CustomResourceExt;
use ocm_common::crd::{ClusterManager, Klusterlet};
use ocm_common::kube_utils::create_client;
use ocm_common::telemetry::init_tracing;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use config::{Cli, Command, OperatorConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        for crd in [ClusterManager::crd(), Klusterlet::crd()] {
            let yaml = serde_yaml::to_string(&crd)
                .map_err(|e| anyhow::anyhow!("failed to serialize CRD: {e}"))?;
            println!("---\n{yaml}");
        }
        return Ok(());
    }

    let config = OperatorConfig::from(&cli);
    init_tracing(&config.telemetry())?;

    let Some(mode) = cli.command else {
        anyhow::bail!("no mode given, expected `hub` or `klusterlet`");
    };

    let client = create_client(config.kubeconfig.as_deref()).await?;
    let token = CancellationToken::new();
    tokio::spawn(cancel_on_signal(token.clone()));

    info!(?mode, workers = config.workers, "starting controllers");
    let controllers = match mode {
        Command::Hub => runner::build_hub_controllers(client, &config, token)?,
        Command::Klusterlet => runner::build_klusterlet_controllers(client, &config, token)?,
    };
    futures::future::join_all(controllers).await;

    info!("all controllers stopped");
    Ok(())
}

/// Cancel `token` on SIGINT or SIGTERM
async fn cancel_on_signal(token: CancellationToken) {
    let interrupt = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
    token.cancel();
}
