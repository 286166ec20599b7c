use std::{fmt, future::Future, io, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use coverage_core::transform::{CoverageTransformer, DEFAULT_GROUP_PREFIX};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::{
    fetch::{HttpArtifactSource, DEFAULT_REPORT_URL},
    refresh::{RefreshLoop, SharedCharts},
    server::{DashboardServer, ServerError, DEFAULT_TITLE},
    store::{AggregateStore, ObjectStoreAggregateStore, StoreSpec},
    update::{UpdateJob, UpdateSummary},
};

/// How long shutdown waits for an in-flight refresh tick.
const REFRESH_STOP_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser, Debug, Clone)]
#[command(
    name = "coverage-dashboard",
    author,
    version,
    about = "Daily coverage aggregation and live coverage trend dashboard",
    long_about = None
)]
pub struct Cli {
    #[command(flatten)]
    pub store: StoreArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    /// Blob container holding the aggregate and its archives
    #[arg(long, env = "BLOB_CONTAINER_NAME", global = true)]
    pub container: Option<String>,

    /// Azure storage connection string
    #[arg(long, env = "STORAGE_CONNECTION_STRING", hide_env_values = true, global = true)]
    pub connection_string: Option<String>,

    /// Store location override (az://container/prefix, file:///path, memory://)
    #[arg(long, env = "COVERAGE_STORE_URL", global = true)]
    pub store_url: Option<String>,

    /// Key prefix inside the container
    #[arg(long, default_value = "", global = true)]
    pub prefix: String,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Fetch today's report and append it to the aggregate
    Update(UpdateArgs),
    /// Serve the coverage dashboard
    Serve(ServeArgs),
}

#[derive(Args, Debug, Clone)]
pub struct UpdateArgs {
    /// URL of the latest raw coverage report
    #[arg(long, env = "COVERAGE_REPORT_URL", default_value = DEFAULT_REPORT_URL)]
    pub report_url: String,

    /// Prefix stripped from report group names
    #[arg(long, default_value = DEFAULT_GROUP_PREFIX)]
    pub group_prefix: String,
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Address to bind the dashboard to
    #[arg(long, default_value = "127.0.0.1:8050")]
    pub address: SocketAddr,

    /// Seconds between aggregate reloads
    #[arg(long, default_value_t = 3600, value_parser = clap::value_parser!(u64).range(1..))]
    pub refresh_interval: u64,

    /// Seconds between browser polls for new charts
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u64).range(1..))]
    pub poll_interval: u64,

    /// Page title
    #[arg(long, default_value = DEFAULT_TITLE)]
    pub title: String,
}

#[derive(Clone)]
pub struct StoreConfig {
    pub container: Option<String>,
    pub connection_string: Option<String>,
    pub store_url: Option<String>,
    pub prefix: String,
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("container", &self.container)
            .field(
                "connection_string",
                &self.connection_string.as_ref().map(|_| "<redacted>"),
            )
            .field("store_url", &self.store_url)
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl From<StoreArgs> for StoreConfig {
    fn from(value: StoreArgs) -> Self {
        Self {
            container: value.container,
            connection_string: value.connection_string,
            store_url: value.store_url,
            prefix: value.prefix,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UpdateConfig {
    pub store: StoreConfig,
    pub report_url: String,
    pub group_prefix: String,
}

#[derive(Debug, Clone)]
pub struct ServeConfig {
    pub store: StoreConfig,
    pub address: SocketAddr,
    pub refresh_interval: Duration,
    pub poll_interval: Duration,
    pub title: String,
}

#[derive(Debug, Clone)]
pub enum AppConfig {
    Update(UpdateConfig),
    Serve(ServeConfig),
}

impl From<Cli> for AppConfig {
    fn from(value: Cli) -> Self {
        let store = StoreConfig::from(value.store);
        match value.command {
            Command::Update(args) => AppConfig::Update(UpdateConfig {
                store,
                report_url: args.report_url,
                group_prefix: args.group_prefix,
            }),
            Command::Serve(args) => AppConfig::Serve(ServeConfig {
                store,
                address: args.address,
                refresh_interval: Duration::from_secs(args.refresh_interval),
                poll_interval: Duration::from_secs(args.poll_interval),
                title: args.title,
            }),
        }
    }
}

pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .try_init();
}

pub async fn run(config: AppConfig) -> Result<()> {
    match config {
        AppConfig::Update(config) => run_update(config).await.map(|_| ()),
        AppConfig::Serve(config) => run_serve(config, shutdown_signal()).await,
    }
}

/// Open the configured store: an explicit `--store-url` wins, otherwise the
/// Azure container named by `--container`.
///
/// `--prefix` applies to a store URL only when the URL names no prefix of its
/// own; for `file://` URLs it is a subdirectory of the given path.
pub fn open_store(config: &StoreConfig) -> Result<Arc<dyn AggregateStore>> {
    let store = match (&config.store_url, &config.container) {
        (Some(url), Some(container)) => anyhow::bail!(
            "container {container} conflicts with store URL {url}: name the container in the URL"
        ),
        (Some(url), None) => {
            let spec = StoreSpec::parse(url)
                .with_context(|| format!("invalid coverage store URL {url}"))?;
            if !spec.is_file() && !spec.prefix.is_empty() && !config.prefix.is_empty() {
                anyhow::bail!(
                    "prefix {} conflicts with the prefix already in store URL {url}",
                    config.prefix
                );
            }
            if spec.is_memory() {
                warn!("Using an in-memory coverage store, nothing survives a restart");
            }

            let store =
                ObjectStoreAggregateStore::from_spec(&spec, config.connection_string.as_deref())
                    .with_context(|| format!("failed to open coverage store at {url}"))?;
            if config.prefix.is_empty() {
                store
            } else {
                store.with_prefix(&config.prefix)
            }
        }
        (None, Some(container)) => {
            let connection_string = config
                .connection_string
                .as_deref()
                .context("STORAGE_CONNECTION_STRING is required to reach the blob container")?;
            ObjectStoreAggregateStore::azure(connection_string, container, &config.prefix)
                .with_context(|| format!("failed to open blob container {container}"))?
        }
        (None, None) => anyhow::bail!(
            "no coverage store configured: set BLOB_CONTAINER_NAME or COVERAGE_STORE_URL"
        ),
    };
    Ok(Arc::new(store))
}

pub async fn run_update(config: UpdateConfig) -> Result<UpdateSummary> {
    let store = open_store(&config.store)?;
    let source = Arc::new(HttpArtifactSource::new(config.report_url.clone()));

    info!(
        report_url = source.url(),
        store = ?config.store,
        "Starting coverage update"
    );

    let job = UpdateJob::new(
        source,
        store,
        CoverageTransformer::new(config.group_prefix.clone()),
    );

    let today = chrono::Local::now().date_naive();
    job.run(today).await
}

/// Serve the dashboard until `signal` resolves.
///
/// The listener is bound before the refresh loop starts, so an address in use
/// fails without touching storage.
pub async fn run_serve<F>(config: ServeConfig, signal: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    let store = open_store(&config.store)?;
    let listener = DashboardServer::bind(config.address).map_err(handle_serve_error)?;

    let refresh = Arc::new(RefreshLoop::new(
        store,
        Arc::new(SharedCharts::new()),
        config.refresh_interval,
    ));
    let (stop_tx, stop_rx) = watch::channel(false);
    let refresh_interval = refresh.interval();
    let refresh_task = refresh.clone().spawn(stop_rx);

    let server = DashboardServer::new(refresh, config.title.clone(), config.poll_interval);

    info!(
        address = %config.address,
        refresh_interval_secs = refresh_interval.as_secs(),
        poll_interval_secs = config.poll_interval.as_secs(),
        "Starting coverage dashboard",
    );

    let served = server.serve_with_shutdown(listener, signal).await;

    let _ = stop_tx.send(true);
    let abort = refresh_task.abort_handle();
    match tokio::time::timeout(REFRESH_STOP_GRACE, refresh_task).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(error = %err, "Refresh loop ended abnormally"),
        Err(_) => {
            warn!("Refresh tick still running at shutdown, aborting it");
            abort.abort();
        }
    }

    if let Err(err) = served {
        return Err(handle_serve_error(err));
    }

    info!("Coverage dashboard shutdown complete");
    Ok(())
}

fn handle_serve_error(err: ServerError) -> anyhow::Error {
    error!(error = %err, "Coverage dashboard terminated with error");
    err.into()
}

/// Resolve on SIGINT or SIGTERM, whichever arrives first.
pub async fn shutdown_signal() {
    wait_for_shutdown(tokio::signal::ctrl_c(), terminate()).await;
}

#[cfg(unix)]
async fn terminate() -> io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    signal(SignalKind::terminate())?.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn terminate() -> io::Result<()> {
    std::future::pending().await
}

async fn wait_for_shutdown<I, T>(interrupt: I, terminate: T)
where
    I: Future<Output = io::Result<()>>,
    T: Future<Output = io::Result<()>>,
{
    tokio::select! {
        _ = listen_for("SIGINT", interrupt) => {},
        _ = listen_for("SIGTERM", terminate) => {},
    }
}

/// Completes when `signal` fires. A listener that cannot be installed never
/// completes, so it cannot trigger a shutdown on its own.
async fn listen_for<F>(name: &'static str, signal: F)
where
    F: Future<Output = io::Result<()>>,
{
    match signal.await {
        Ok(()) => info!(signal = name, "Received shutdown signal"),
        Err(err) => {
            error!(signal = name, error = %err, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    }
}
