//! provisiond binary - accepts provisioning requests over HTTP

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use provisiond::pipeline::CommandRewriter;
use provisiond::{
    CliEnvironmentProvisioner, Config, EventPublisher, FileCredentialProvider, GitSourceFetcher,
    Intake, LocalRecordStore, LogEventPublisher, NatsEventPublisher, Orchestrator,
    PostProvisionPipeline, ProcessRunner, ProvisioningQueue, RecordStore, ShellProcessRunner,
    StatusReporter,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse_config();

    if config.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(EnvFilter::from_default_env())
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .init();
    }

    config.validate().context("invalid configuration")?;

    info!("Starting provisiond");
    info!("Configuration:");
    info!("  Port: {}", config.port);
    info!("  Workspace root: {}", config.workspace_root.display());
    info!("  Queue capacity: {}", config.queue_capacity);
    info!("  Tool: {} ({})", config.tool, config.target_flag);
    info!("  Init script: {}", config.init_script.display());
    info!("  Policy dir: {}", config.policy_dir.display());
    match config.command_timeout() {
        Some(timeout) => info!("  Command timeout: {}s", timeout.as_secs()),
        None => info!("  Command timeout: none"),
    }
    match config.records_path() {
        Some(path) => info!("  Record store: {}", path.display()),
        None => info!("  Record store: in-memory"),
    }

    tokio::fs::create_dir_all(&config.workspace_root)
        .await
        .with_context(|| {
            format!(
                "creating workspace root {}",
                config.workspace_root.display()
            )
        })?;

    let runner: Arc<dyn ProcessRunner> =
        Arc::new(ShellProcessRunner::with_timeout(config.command_timeout()));
    let credentials = Arc::new(FileCredentialProvider::new(config.credentials_file.clone()));

    let events: Arc<dyn EventPublisher> = match &config.nats_url {
        Some(url) => Arc::new(
            NatsEventPublisher::connect(
                url,
                config.nats_creds_path.as_deref(),
                config.event_subject_prefix.clone(),
            )
            .await?,
        ),
        None => {
            info!("No NATS URL configured; events are logged only");
            Arc::new(LogEventPublisher)
        }
    };

    let store: Arc<dyn RecordStore> = match config.records_path() {
        Some(path) => {
            if let Some(dir) = path.parent() {
                tokio::fs::create_dir_all(dir)
                    .await
                    .with_context(|| format!("creating state dir {}", dir.display()))?;
            }
            Arc::new(LocalRecordStore::open(path)?)
        }
        None => Arc::new(LocalRecordStore::in_memory()),
    };

    let tool = config.tool_settings();
    let provisioner = Arc::new(CliEnvironmentProvisioner::new(
        tool.clone(),
        runner.clone(),
        credentials.clone(),
        events.clone(),
    ));
    let queue = ProvisioningQueue::new(config.queue_capacity, provisioner)?;
    let pipeline = Arc::new(PostProvisionPipeline::new(
        config.pipeline_settings(),
        CommandRewriter::from_settings(&tool),
        runner.clone(),
        events,
    ));
    let reporter = StatusReporter::new(store, config.reporter_settings());
    let fetcher = Arc::new(GitSourceFetcher::new(runner));

    let orchestrator = Orchestrator::new(
        config.workspace_root.clone(),
        fetcher,
        queue,
        pipeline,
        reporter,
    );
    let intake = Arc::new(Intake::new(credentials, orchestrator));

    let app = provisiond::server::routes(intake);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .await
        .context("HTTP server failed")?;
    Ok(())
}
