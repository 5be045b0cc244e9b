mod cmd;
mod config;
mod error;
mod http;
mod station;

use clap::Parser;
use config::{Cli, Settings};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    let settings = match Settings::new(&cli) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = cmd::serve::run(settings).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
