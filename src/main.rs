use clap::Parser;
use std::sync::Arc;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::prelude::*;

/// Arguments to configure this runtime of the engine before it is started.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(long, env, default_value = "INFO")]
    log_level: LevelFilter,
}

/// Initializes the engine process and serves the IPC loop.
///
/// This initializes the logging and starts the multithreaded tokio runtime. The actual tunnel
/// lifecycle is driven entirely by the front-end through stdin/stdout; the process exits cleanly
/// when stdin closes.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    // parse the arguments and configuration
    let args = Args::parse();

    // initialize logging; stdout belongs to the IPC envelope
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(std::io::stderr)
                .with_filter(args.log_level),
        )
        .init();

    // initialize the engine state
    let engine = Arc::new(minewire::Engine::new());

    // serve the IPC loop blocking
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async { minewire::ipc::serve(engine).await })?;

    Ok(())
}
