use clap::Parser;
use shotfarm_worker::cli::Cli;
use shotfarm_worker::config::WorkerConfig;
use shotfarm_worker::service::{self, RunOptions};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "shotfarm_worker=info,shotfarm_remote=info,shotfarm_core=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let config = match WorkerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid worker configuration");
            std::process::exit(2);
        }
    };

    tracing::info!(
        dispatcher = %config.dispatcher_endpoint(),
        manifest = ?cli.manifest,
        local = cli.local,
        "Shotfarm worker starting",
    );

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl-C");
            signal_cancel.cancel();
        }
    });

    let exit = service::run(&config, RunOptions::from(cli), cancel).await;
    tracing::info!(?exit, "Shotfarm worker stopped");
    std::process::exit(exit.exit_code());
}
