use clap::Parser;
use futures_util::StreamExt as _;
use kube::CustomResourceExt as _;
use kube::config::KubeConfigOptions;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::util::SubscriberInitExt as _;
use tracing_subscriber::{fmt, layer::SubscriberExt as _};

use tf_controller::backend::{self, BackendContext};
use tf_controller::controllers::{module_reconciler, state_reconciler};
use tf_controller::resources::{Execution, Module, State};

#[derive(Parser, Debug)]
#[command(name = "tf-controller", about = "Runs Terraform/IaC modules as Kubernetes jobs")]
struct Cli {
    /// Number of worker threads driving the reconcilers.
    #[arg(long, env = "THREADS", default_value_t = 2)]
    threads: usize,

    /// Enables debug-level tracing.
    #[arg(long, env = "DEBUG")]
    debug: bool,

    /// Path to a kubeconfig file; falls back to in-cluster config when unset.
    #[arg(long, env = "KUBECONFIG")]
    kubeconfig: Option<String>,

    /// Namespace the backend façade reads/writes state secrets in.
    #[arg(long, env = "NAMESPACE", default_value = "default")]
    namespace: String,

    /// Address the remote-backend HTTP façade listens on.
    #[arg(long, env = "API_ADDRESS", default_value = "0.0.0.0:8080")]
    api_address: String,

    /// Overrides the API server URL instead of using the one from the discovered kubeconfig.
    #[arg(long, env = "MASTERURL")]
    masterurl: Option<String>,

    /// TLS certificate for the backend façade. Requires `--api-key-file`.
    #[arg(long, env = "API_CERT_FILE")]
    api_cert_file: Option<String>,

    /// TLS private key for the backend façade. Requires `--api-cert-file`.
    #[arg(long, env = "API_KEY_FILE")]
    api_key_file: Option<String>,

    /// Prints the CRD manifests to stdout and exits.
    #[arg(long)]
    crd: bool,
}

fn main() {
    let cli = Cli::parse();

    if cli.crd {
        print_crds();
        return;
    }

    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(cli.threads)
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
        .block_on(run(cli));
}

fn print_crds() {
    for crd in [
        serde_yaml::to_string(&Module::crd()).unwrap(),
        serde_yaml::to_string(&State::crd()).unwrap(),
        serde_yaml::to_string(&Execution::crd()).unwrap(),
    ] {
        println!("---\n{crd}");
    }
}

async fn run(cli: Cli) {
    setup_tracing(cli.debug);

    if cli.api_cert_file.is_some() != cli.api_key_file.is_some() {
        panic!("--api-cert-file and --api-key-file must be set together");
    }
    if cli.api_cert_file.is_some() {
        warn!("TLS termination for the backend façade is not implemented; serving plaintext");
    }

    let mut config = discover_kubernetes_config(cli.kubeconfig.as_deref()).await;
    if let Some(masterurl) = cli.masterurl {
        config.cluster_url = masterurl.parse().expect("invalid --masterurl");
    }

    let kubernetes_client =
        kube::client::Client::try_from(config).expect("failed to build Kubernetes client");

    let module_controller = module_reconciler::new(kubernetes_client.clone());
    let state_controller = state_reconciler::new(kubernetes_client.clone());

    let backend_context = BackendContext::new(kubernetes_client, cli.namespace);
    let app = backend::router(backend_context);

    let listener = tokio::net::TcpListener::bind(&cli.api_address)
        .await
        .unwrap_or_else(|e| panic!("failed to bind {}: {e}", cli.api_address));

    tokio::join!(
        drive(module_controller, "module"),
        drive(state_controller, "state"),
        serve(listener, app),
    );
}

async fn drive<S, T, E>(stream: S, label: &str)
where
    S: futures_util::Stream<Item = Result<T, E>>,
    E: std::fmt::Debug,
{
    tokio::pin!(stream);
    while let Some(result) = stream.next().await {
        match result {
            Ok(_) => debug!("{label} reconciler tick"),
            Err(e) => warn!("{label} reconciler failed: {e:?}"),
        }
    }
}

async fn serve(listener: tokio::net::TcpListener, app: axum::Router) {
    let app = app.layer(tower_http::trace::TraceLayer::new_for_http());
    if let Err(e) = axum::serve(listener, app).await {
        warn!("backend HTTP server stopped: {e:?}");
    }
}

fn setup_tracing(debug: bool) {
    let default_filter = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .try_init()
        .expect("tracing-subscriber setup failed");
}

async fn discover_kubernetes_config(kubeconfig: Option<&str>) -> kube::Config {
    if let Some(path) = kubeconfig {
        // SAFETY: single-threaded at this point in startup, before the reconcilers spawn.
        unsafe {
            std::env::set_var("KUBECONFIG", path);
        }
    }

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
