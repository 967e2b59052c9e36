use std::process::ExitCode;

use anyhow::{Context, Result};
use renderer::FractalConfig;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    initialise_tracing();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:?}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let config = FractalConfig::default();
    tracing::debug!(?config, "starting fractal window");
    renderer::run(&config).context("fractal window failed")
}

fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
