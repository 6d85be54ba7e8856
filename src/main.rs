use clap::{Parser, ValueEnum};
use request_reconciler::{
    Controller, ControllerError, HttpExecutor, MemoryStore, Reconciler, ReconcilerConfig,
    Request, ResourceId,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("read manifest {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("resource {0} is not in the manifest")]
    UnknownResource(ResourceId),

    #[error(transparent)]
    Controller(#[from] ControllerError),
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

#[derive(Parser)]
#[command(
    name = "request-reconciler",
    about = "Reconcile declarative HTTP request resources and print their status"
)]
struct Cli {
    /// YAML manifest of request resources (multiple documents allowed)
    #[arg(long)]
    manifest: PathBuf,

    /// Only reconcile these resources (namespace/name); default is all
    #[arg(long = "resource")]
    resources: Vec<ResourceId>,

    /// Output format for the reconciled resources
    #[arg(long, value_enum, default_value = "yaml")]
    output: OutputFormat,

    /// Timeout for each outbound HTTP call, in seconds
    #[arg(long, default_value_t = 30, env = "REQUEST_RECONCILER_REQUEST_TIMEOUT")]
    request_timeout_secs: u64,

    /// Passes to run concurrently across distinct resources
    #[arg(long, default_value_t = 8)]
    concurrency: usize,

    /// Redeliveries of a retryable failure before giving up
    #[arg(long, default_value_t = 5)]
    max_requeues: u32,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run().await {
        Ok(0) => ExitCode::from(0),
        Ok(failed) => {
            error!(failed, "some resources could not be reconciled");
            ExitCode::from(1)
        }
        Err(e) => {
            error!(error = %e, "reconciler error");
            ExitCode::from(2)
        }
    }
}

fn load_manifest(path: &Path) -> Result<Vec<Request>, CliError> {
    let text = std::fs::read_to_string(path).map_err(|source| CliError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut requests = Vec::new();
    for doc in serde_yaml::Deserializer::from_str(&text) {
        let value = serde_yaml::Value::deserialize(doc)?;
        if value.is_null() {
            continue;
        }
        requests.push(serde_yaml::from_value(value)?);
    }
    Ok(requests)
}

/// Returns the number of resources that failed.
async fn run() -> Result<usize, CliError> {
    let cli = Cli::parse();

    let requests = load_manifest(&cli.manifest)?;
    info!(resources = requests.len(), manifest = %cli.manifest.display(), "loaded manifest");

    let store = Arc::new(MemoryStore::new());
    for request in requests {
        store.insert(request);
    }

    let targets: Vec<ResourceId> = if cli.resources.is_empty() {
        store.list().iter().map(Request::id).collect()
    } else {
        for id in &cli.resources {
            if store.get(id).is_none() {
                return Err(CliError::UnknownResource(id.clone()));
            }
        }
        cli.resources.clone()
    };

    let request_timeout = Duration::from_secs(cli.request_timeout_secs);
    let config = ReconcilerConfig {
        request_timeout,
        action_timeout: request_timeout + Duration::from_secs(5),
        concurrency: cli.concurrency,
        max_requeues: cli.max_requeues,
        ..ReconcilerConfig::default()
    };

    let executor = Arc::new(HttpExecutor::new(config.request_timeout));
    let reconciler = Arc::new(Reconciler::new(store.clone(), executor, config));
    let report = Controller::new(reconciler).reconcile_all(targets).await?;

    for (id, reason) in &report.failed {
        error!(resource = %id, reason = %reason, "reconcile failed");
    }

    let reconciled = store.list();
    let rendered = match cli.output {
        OutputFormat::Yaml => serde_yaml::to_string(&reconciled)?,
        OutputFormat::Json => serde_json::to_string_pretty(&reconciled)?,
    };
    println!("{rendered}");

    Ok(report.failed.len())
}
