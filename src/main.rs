use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use metabuild_worker::cli::{ops, Cli, Commands};
use metabuild_worker::config::WorkerConfig;
use metabuild_worker::error::Result;

/// `RUST_LOG` wins; otherwise the configured level.
fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn dispatch(config: &WorkerConfig, command: Commands) -> Result<bool> {
    match command {
        Commands::Run { jobs } => {
            let summary = ops::handle_run_command(config, &jobs).await?;
            for (job_id, e) in &summary.failures {
                error!(job_id = %job_id, code = e.code(), error = %e, "job not completed");
            }
            info!(
                received = summary.received,
                completed = summary.completed,
                failed = summary.failed,
                malformed = summary.malformed,
                "run finished"
            );
            Ok(summary.failed == 0 && summary.malformed == 0)
        }
        Commands::Ping => ops::handle_ping_command(config).await.map(|_| true),
        Commands::EncodeCid { cid } => ops::handle_encode_cid_command(&cid).map(|_| true),
        Commands::TokenUri { contract, token_id } => {
            ops::handle_token_uri_command(config, &contract, &token_id).await.map(|_| true)
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut config = match WorkerConfig::load_or_default(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(2);
        }
    };
    config.apply_env();
    init_tracing(&config.worker.log_level);

    // no subcommand: behave like the queue consumer reading stdin
    let command = cli.command.unwrap_or(Commands::Run { jobs: "-".to_string() });
    match dispatch(&config, command).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!(code = e.code(), error = %e, "command failed");
            std::process::exit(1);
        }
    }
}
