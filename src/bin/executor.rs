use kube::config::KubeConfigOptions;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::util::SubscriberInitExt as _;
use tracing_subscriber::{fmt, layer::SubscriberExt as _};

use tf_controller::executor::{self, ExecutorConfig};

#[tokio::main]
async fn main() {
    setup_tracing();

    let config = ExecutorConfig::from_env().unwrap_or_else(|e| {
        tracing::error!("invalid executor configuration: {e}");
        std::process::exit(1);
    });

    let kubernetes_client = kube::client::Client::try_from(discover_kubernetes_config().await)
        .expect("failed to build Kubernetes client");

    if let Err(e) = executor::run(kubernetes_client, config).await {
        tracing::error!("executor run failed: {e}");
        std::process::exit(1);
    }
}

fn setup_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .try_init()
        .expect("tracing-subscriber setup failed");
}

async fn discover_kubernetes_config() -> kube::Config {
    let from_default_kubeconfig = kube::Config::from_kubeconfig(&KubeConfigOptions::default()).await;

    if let Ok(config) = from_default_kubeconfig {
        return config;
    }

    let from_incluster_env = kube::Config::incluster_env();

    if let Ok(config) = from_incluster_env {
        return config;
    }

    panic!("Failed to find a suitable Kubernetes client config.");
}
