//! Command-line interface of the `storex` binary.

use std::{
    ffi::OsString,
    net::SocketAddr,
    num::NonZeroUsize,
    sync::Arc,
    time::Duration,
};

use anyhow::Context as _;
use clap::{value_parser, Arg, ArgAction, Args, Command, CommandFactory, FromArgMatches, Parser};
use storex::{
    client::{BackendClient, ClientConfig},
    CollectorRegistry,
};
use storex_backends::{
    console_agent::ConsoleAgentClient, e37::E37Client, gdas::GdasClient, harbor::HarborClient,
    hw_obs::HwObsClient, xsky::XskyClient, BackendKind,
};
use storex_exporter::DEFAULT_TELEMETRY_PATH;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Prometheus exporter for storage systems.
#[derive(Debug, Parser)]
#[command(name = "storex", version)]
pub(crate) struct Cli {
    /// Address to listen on for web interface and telemetry. A leading `:` means all interfaces.
    #[arg(
        long = "web.listen-address",
        global = true,
        default_value = "0.0.0.0:8080",
        value_parser = parse_listen_address
    )]
    pub listen_address: SocketAddr,
    /// Path under which to expose metrics.
    #[arg(long = "web.telemetry-path", global = true, default_value = DEFAULT_TELEMETRY_PATH)]
    pub telemetry_path: String,
    /// Default log directive; overridden by `RUST_LOG`.
    #[arg(long = "log-level", global = true, default_value = "info")]
    pub log_level: String,
    /// Log output format.
    #[arg(long = "log-format", global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
    #[command(subcommand)]
    pub backend: BackendCommand,
}

fn parse_listen_address(raw: &str) -> Result<SocketAddr, String> {
    let address = if raw.starts_with(':') {
        format!("0.0.0.0{raw}")
    } else {
        raw.to_owned()
    };
    address
        .parse()
        .map_err(|err| format!("invalid listen address `{raw}`: {err}"))
}

/// Connection options shared by all backends.
#[derive(Debug, Args)]
pub(crate) struct ConnectionArgs {
    /// Per-request timeout, e.g. `1600ms` or `60s` [default: 60s for console agent, 1600ms else]
    #[arg(long = "time-out", value_parser = humantime::parse_duration)]
    timeout: Option<Duration>,
    /// Skip TLS certificate verification.
    #[arg(
        long,
        action = ArgAction::Set,
        num_args = 0..=1,
        default_value_t = true,
        default_missing_value = "true"
    )]
    insecure: bool,
    /// Maximum number of concurrent per-item requests within a collector.
    #[arg(long, default_value = "10")]
    concurrency: NonZeroUsize,
}

impl ConnectionArgs {
    fn client_config(&self, kind: BackendKind, server: &str) -> anyhow::Result<ClientConfig> {
        let default_timeout = match kind {
            BackendKind::ConsoleAgent => Duration::from_secs(60),
            _ => ClientConfig::DEFAULT_TIMEOUT,
        };
        let config = ClientConfig::new(server)
            .with_context(|| format!("invalid {kind} server address `{server}`"))?;
        Ok(config
            .with_timeout(self.timeout.unwrap_or(default_timeout))
            .with_insecure(self.insecure)
            .with_concurrency(self.concurrency.get()))
    }
}

#[derive(Debug, Args)]
pub(crate) struct GdasArgs {
    /// HTTP API address of the Gdas server (prefix with `https://` to connect over HTTPS).
    #[arg(long = "gdas-server", default_value = "https://172.38.30.193:8003")]
    server: String,
    /// Gdas username.
    #[arg(long = "gdas-user", default_value = "system")]
    user: String,
    /// Gdas password.
    #[arg(
        long = "gdas-pass",
        env = "STOREX_GDAS_PASS",
        hide_env_values = true,
        default_value = ""
    )]
    pass: String,
    #[command(flatten)]
    connection: ConnectionArgs,
}

#[derive(Debug, Args)]
pub(crate) struct XskyArgs {
    /// HTTP API address of the Xsky server.
    #[arg(long = "xsky-server", default_value = "http://10.20.5.98:8056")]
    server: String,
    /// Xsky username.
    #[arg(long = "xsky-user", default_value = "admin")]
    user: String,
    /// Xsky password.
    #[arg(
        long = "xsky-pass",
        env = "STOREX_XSKY_PASS",
        hide_env_values = true,
        default_value = "admin"
    )]
    pass: String,
    #[command(flatten)]
    connection: ConnectionArgs,
}

#[derive(Debug, Args)]
pub(crate) struct ConsoleAgentArgs {
    /// HTTP API address of the console agent.
    #[arg(long = "console-agent-server", default_value = "http://172.38.40.210:9097")]
    server: String,
    /// Shared secret used to sign requests.
    #[arg(
        long = "secret-key",
        env = "STOREX_SECRET_KEY",
        hide_env_values = true,
        default_value = "obs123456"
    )]
    secret_key: String,
    #[command(flatten)]
    connection: ConnectionArgs,
}

#[derive(Debug, Args)]
pub(crate) struct HwObsArgs {
    /// HTTP API address of the Huawei OBS management node.
    #[arg(long = "hw-obs-server", default_value = "https://172.20.6.100:8088")]
    server: String,
    /// Huawei OBS username.
    #[arg(long = "hw-obs-user", default_value = "admin")]
    user: String,
    /// Huawei OBS password.
    #[arg(
        long = "hw-obs-pass",
        env = "STOREX_HW_OBS_PASS",
        hide_env_values = true,
        default_value = ""
    )]
    pass: String,
    #[command(flatten)]
    connection: ConnectionArgs,
}

#[derive(Debug, Args)]
pub(crate) struct E37Args {
    /// HTTP API address of the E37 dashboard.
    #[arg(long = "e37-server", default_value = "https://172.38.30.2:8443")]
    server: String,
    /// E37 username.
    #[arg(long = "e37-user", default_value = "admin")]
    user: String,
    /// E37 password.
    #[arg(
        long = "e37-pass",
        env = "STOREX_E37_PASS",
        hide_env_values = true,
        default_value = "admin"
    )]
    pass: String,
    #[command(flatten)]
    connection: ConnectionArgs,
}

#[derive(Debug, Args)]
pub(crate) struct HarborArgs {
    /// HTTP API address of Harbor, including the `/api/v2.0` prefix.
    #[arg(long = "harbor-server", default_value = "http://172.19.42.218/api/v2.0")]
    server: String,
    /// Harbor username.
    #[arg(long = "harbor-user", default_value = "admin")]
    user: String,
    /// Harbor password.
    #[arg(
        long = "harbor-pass",
        env = "STOREX_HARBOR_PASS",
        hide_env_values = true,
        default_value = "Harbor12345"
    )]
    pass: String,
    #[command(flatten)]
    connection: ConnectionArgs,
}

/// Backend to export metrics for.
#[derive(Debug, clap::Subcommand)]
pub(crate) enum BackendCommand {
    /// Export metrics of a Gdas optical storage cluster.
    Gdas(GdasArgs),
    /// Export metrics of an Xsky distributed storage cluster.
    Xsky(XskyArgs),
    /// Export metrics of a Gdas cluster through the console agent.
    ConsoleAgent(ConsoleAgentArgs),
    /// Export metrics of Huawei OBS object storage.
    HwObs(HwObsArgs),
    /// Export metrics of E37 object storage.
    E37(E37Args),
    /// Export metrics of a Harbor registry.
    Harbor(HarborArgs),
}

impl BackendCommand {
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Gdas(_) => BackendKind::Gdas,
            Self::Xsky(_) => BackendKind::Xsky,
            Self::ConsoleAgent(_) => BackendKind::ConsoleAgent,
            Self::HwObs(_) => BackendKind::HwObs,
            Self::E37(_) => BackendKind::E37,
            Self::Harbor(_) => BackendKind::Harbor,
        }
    }

    fn client_config(&self) -> anyhow::Result<ClientConfig> {
        let (server, connection) = match self {
            Self::Gdas(args) => (&args.server, &args.connection),
            Self::Xsky(args) => (&args.server, &args.connection),
            Self::ConsoleAgent(args) => (&args.server, &args.connection),
            Self::HwObs(args) => (&args.server, &args.connection),
            Self::E37(args) => (&args.server, &args.connection),
            Self::Harbor(args) => (&args.server, &args.connection),
        };
        connection.client_config(self.kind(), server)
    }

    /// Creates an authenticated client for the selected backend.
    pub fn client(&self) -> anyhow::Result<Arc<dyn BackendClient>> {
        let config = self.client_config()?;
        tracing::debug!(backend = %self.kind(), ?config, "Creating backend client");
        Ok(match self {
            Self::Gdas(args) => Arc::new(GdasClient::new(&config, &args.user, &args.pass)?),
            Self::Xsky(args) => Arc::new(XskyClient::new(&config, &args.user, &args.pass)?),
            Self::ConsoleAgent(args) => {
                Arc::new(ConsoleAgentClient::new(&config, args.secret_key.as_str())?)
            }
            Self::HwObs(args) => Arc::new(HwObsClient::new(&config, &args.user, &args.pass)?),
            Self::E37(args) => Arc::new(E37Client::new(&config, &args.user, &args.pass)?),
            Self::Harbor(args) => Arc::new(HarborClient::new(&config, &args.user, &args.pass)?),
        })
    }
}

fn collector_flag_id(collector_name: &str) -> String {
    format!("collect.{collector_name}")
}

/// Adds a `--collect.<name>` flag for every collector in `registry`.
fn with_collector_flags(mut command: Command, registry: &CollectorRegistry) -> Command {
    for (collector, enabled) in registry.entries() {
        let id = collector_flag_id(collector.name());
        command = command.arg(
            Arg::new(id.clone())
                .long(id)
                .help(collector.help())
                .help_heading("Collectors")
                .value_parser(value_parser!(bool))
                .num_args(0..=1)
                .default_value(if enabled { "true" } else { "false" })
                .default_missing_value("true"),
        );
    }
    command
}

/// Parsed command-line options together with the collector registry of the selected backend.
#[derive(Debug)]
pub(crate) struct Options {
    pub cli: Cli,
    pub registry: CollectorRegistry,
}

impl Options {
    /// Parses options from the provided args. Errors produced by `clap` (including help and version
    /// requests) are returned as [`clap::Error`] wrapped in `anyhow`.
    pub fn try_parse_from<I, T>(args: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let mut command = Cli::command();
        for kind in BackendKind::ALL {
            let registry = kind.collectors()?;
            command = command.mut_subcommand(kind.command_name(), |backend| {
                with_collector_flags(backend, &registry)
            });
        }

        let matches = command.try_get_matches_from(args)?;
        let cli = Cli::from_arg_matches(&matches)?;
        let kind = cli.backend.kind();
        let mut registry = kind.collectors()?;
        let backend_matches = matches
            .subcommand_matches(kind.command_name())
            .with_context(|| format!("no matches for `{kind}` subcommand"))?;

        let names: Vec<_> = registry.entries().map(|(collector, _)| collector.name()).collect();
        for name in names {
            if let Some(&enabled) = backend_matches.get_one::<bool>(&collector_flag_id(name)) {
                registry.set_enabled(name, enabled)?;
            }
        }
        Ok(Self { cli, registry })
    }
}
