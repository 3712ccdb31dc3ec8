//! Convoy Operator - reconciles Application CRDs into Deployments and Services

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use convoy_application::{error_policy, reconcile, ApplicationContext, ReconcilerConfig};
use convoy_common::crd::Application;
use convoy_common::DEFAULT_FILES_CONFIG_MAP;

/// Watch timeout, kept below the API server's idle cutoff
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Convoy - reconciles multi-component Applications
#[derive(Parser, Debug)]
#[command(name = "convoy-operator", version, about, long_about = None)]
struct Cli {
    /// Print the Application CRD manifest and exit
    #[arg(long)]
    crd: bool,

    /// ConfigMap holding the file store, looked up per namespace
    #[arg(long, env = "CONVOY_FILES_CONFIG_MAP", default_value = DEFAULT_FILES_CONFIG_MAP)]
    files_config_map: String,

    /// Resync interval in seconds for fully rolled out Applications
    #[arg(long, env = "CONVOY_REQUEUE_SECS", default_value_t = 300)]
    requeue_secs: u64,
}

impl Cli {
    fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            files_config_map: self.files_config_map.clone(),
            requeue_interval: Duration::from_secs(self.requeue_secs),
            ..ReconcilerConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: Failed to install aws-lc-rs crypto provider: {:?}", e);
        std::process::exit(1);
    }

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&Application::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    run_controller(cli.reconciler_config()).await
}

async fn run_controller(config: ReconcilerConfig) -> anyhow::Result<()> {
    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    tracing::info!(
        files_config_map = %config.files_config_map,
        requeue_secs = config.requeue_interval.as_secs(),
        "Starting Application controller"
    );

    let ctx = Arc::new(ApplicationContext::from_client(client.clone(), config));
    let applications: Api<Application> = Api::all(client.clone());
    let deployments: Api<Deployment> = Api::all(client.clone());
    let services: Api<Service> = Api::all(client);

    Controller::new(
        applications,
        WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
    )
    .owns(
        deployments,
        WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
    )
    .owns(services, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
    .shutdown_on_signal()
    .run(reconcile, error_policy, ctx)
    .for_each(log_reconcile_result("Application"))
    .await;

    tracing::info!("Application controller stopped");
    Ok(())
}

fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
