use anyhow::Context;
use clap::Parser;
use scep2acme::{
    config::CliArgs,
    observability::{init_logging, log_config_info},
    Config,
};
use tokio_util::sync::CancellationToken;
use tracing::info;

fn install_rustls_provider() {
    use rustls::crypto::{ring, CryptoProvider};

    if CryptoProvider::get_default().is_none() {
        // Fails only if another thread installed a provider first.
        let _ = ring::default_provider().install_default();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    install_rustls_provider();

    // Load .env file if it exists; this must happen before flags are parsed
    // because every flag can come from the environment.
    if let Err(e) = dotenvy::dotenv() {
        if !e.to_string().contains("not found") {
            eprintln!("Warning: Error loading .env file: {}", e);
        }
    }

    let config = Config::from_args(CliArgs::parse()).context("invalid configuration")?;
    init_logging(&config.logging);
    log_config_info(&config);

    let shutdown = CancellationToken::new();
    let interrupt = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
            interrupt.cancel();
        }
    });

    scep2acme::run(config, shutdown).await.context("scep2acme failed")?;
    info!("scep2acme stopped");
    Ok(())
}
