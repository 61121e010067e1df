//! `storex` binary: serves metrics of a single storage backend selected by a subcommand.

use std::{env, sync::Arc};

use anyhow::Context as _;
use storex::Orchestrator;
use storex_exporter::MetricsExporter;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, LogFormat, Options};

mod cli;

fn init_tracing(cli: &Cli) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .with_context(|| format!("invalid log level `{}`", cli.log_level))?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = match cli.log_format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    result.map_err(|err| anyhow::anyhow!("failed installing tracing subscriber: {err}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let Options { cli, registry } = match Options::try_parse_from(env::args_os()) {
        Ok(options) => options,
        Err(err) => match err.downcast::<clap::Error>() {
            Ok(err) => err.exit(),
            Err(err) => return Err(err),
        },
    };
    init_tracing(&cli)?;

    let kind = cli.backend.kind();
    let client = cli
        .backend
        .client()
        .with_context(|| format!("failed creating {kind} client"))?;
    let orchestrator = Orchestrator::new(kind.namespace(), client, &registry);

    let (stop_sender, mut stop_receiver) = watch::channel(());
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received Ctrl+C, stopping");
        stop_sender.send_replace(());
    });

    let bind_address = cli.listen_address;
    let server = MetricsExporter::new(Arc::new(orchestrator))
        .with_telemetry_path(&cli.telemetry_path)
        .with_graceful_shutdown(async move {
            stop_receiver.changed().await.ok();
        })
        .bind(bind_address)
        .await
        .with_context(|| format!("failed binding to `{bind_address}`"))?;
    println!("local_addr={}", server.local_addr());
    // ^ Print the local server address so that it can be used in integration tests
    tracing::info!(
        backend = %kind,
        local_addr = %server.local_addr(),
        "Serving metrics on `{}`",
        cli.telemetry_path
    );
    server.start().await.context("metrics server failed")
}
