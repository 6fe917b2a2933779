mod config;

use clap::{Args, Parser, Subcommand};
use config::{Config, ConfigError, LoggingConfig, MetricsConfig};
use metrics_exporter_statsd::StatsdBuilder;
use reconciler::event::{EventError, Notification, PubSubMessage};
use reconciler::reconciler::{Action, decide};
use reconciler::service::{HandleError, handle_message};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "budget-sync", about = "Keeps project billing, budgets and labels in sync")]
struct Cli {
    /// Path to the YAML config file
    #[arg(long, short, default_value = "budget-sync.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Serve push deliveries and the admin endpoints
    Serve,
    /// Handle a single message, as one function invocation would
    Handle(MessageArgs),
    /// Print the decoded message and the action it would cause, without calling any API
    Decode(MessageArgs),
}

#[derive(Args)]
struct MessageArgs {
    /// Base64 encoded message data
    #[arg(long)]
    data: String,

    /// Message attribute, may be repeated
    #[arg(long = "attribute", value_name = "KEY=VALUE", value_parser = parse_attribute)]
    attributes: Vec<(String, String)>,
}

impl MessageArgs {
    fn into_message(self) -> PubSubMessage {
        let mut message = PubSubMessage::new(self.data);
        message.attributes.extend(self.attributes);
        message
    }
}

fn parse_attribute(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_owned(), value.to_owned())),
        _ => Err(format!("expected KEY=VALUE, got {s:?}")),
    }
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Service(#[from] reconciler::ReconcilerServiceError),
    #[error(transparent)]
    Handle(#[from] HandleError),
    #[error("could not decode message: {0}")]
    Event(#[from] EventError),
    #[error("invalid sentry DSN: {0}")]
    InvalidDsn(#[from] sentry::types::ParseDsnError),
    #[error("could not create statsd exporter: {0}")]
    Statsd(#[from] metrics_exporter_statsd::StatsdError),
    #[error("could not install metrics recorder: {0}")]
    MetricsRecorder(String),
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = cli_main(cli) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn cli_main(cli: Cli) -> Result<(), CliError> {
    let message = match cli.command {
        CliCommand::Decode(args) => return decode(args.into_message()),
        CliCommand::Handle(args) => Some(args.into_message()),
        CliCommand::Serve => None,
    };

    let config = Config::from_file(&cli.config)?;
    let _sentry = init_logging(config.common.logging.as_ref())?;
    init_metrics(config.common.metrics.as_ref())?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    match message {
        Some(message) => rt.block_on(handle(config.reconciler, message)),
        None => {
            tracing::info!("starting budget-sync");
            Ok(rt.block_on(reconciler::run(config.reconciler))?)
        }
    }
}

async fn handle(
    config: reconciler::config::Config,
    message: PubSubMessage,
) -> Result<(), CliError> {
    let reconciler = reconciler::build(&config)?;
    let outcome = handle_message(&reconciler, &message).await?;
    println!("{outcome:?}");
    Ok(())
}

fn decode(message: PubSubMessage) -> Result<(), CliError> {
    let notification = message.decode()?;
    println!("{notification:#?}");

    if let Notification::ProjectChange(event) = &notification {
        match decide(event) {
            Action::Provision => println!("action: provision"),
            Action::Teardown { budget_id } => println!("action: teardown budget {budget_id}"),
            Action::Skip(reason) => println!("action: none ({})", reason.as_str()),
        }
    }
    Ok(())
}

fn init_logging(
    logging: Option<&LoggingConfig>,
) -> Result<Option<sentry::ClientInitGuard>, CliError> {
    let level = logging
        .and_then(|l| l.level.as_deref())
        .unwrap_or("info");
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let guard = match logging.and_then(|l| l.sentry_dsn.as_deref()) {
        Some(dsn) => Some(sentry::init(sentry::ClientOptions {
            dsn: Some(dsn.parse()?),
            release: sentry::release_name!(),
            ..Default::default()
        })),
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(guard.as_ref().map(|_| sentry::integrations::tracing::layer()))
        .init();

    Ok(guard)
}

fn init_metrics(metrics_config: Option<&MetricsConfig>) -> Result<(), CliError> {
    let Some(metrics_config) = metrics_config else {
        return Ok(());
    };

    let recorder = StatsdBuilder::from(metrics_config.statsd_host.clone(), metrics_config.statsd_port)
        .build(Some(metrics_config.prefix.as_str()))?;
    metrics::set_global_recorder(recorder)
        .map_err(|e| CliError::MetricsRecorder(e.to_string()))?;
    shared::metrics_defs::describe_all(reconciler::metrics_defs::ALL_METRICS);

    tracing::info!(
        host = %metrics_config.statsd_host,
        port = metrics_config.statsd_port,
        "statsd metrics enabled"
    );
    Ok(())
}
