//! provd - Main Entry Point
//!
//! Starts the kernel, the dispatch loop, the remote services and the query
//! pipe, then reads control commands from stdin until `shutdown`.
//!
//! Usage: `provd [config.toml]`

use anyhow::Context;
use provd::{
    backend::Registry,
    config::{self, KernelConfig},
    net, ControlSurface, Dispatcher, Kernel,
};
use std::io::{self, BufReader};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() -> anyhow::Result<()> {
    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = KernelConfig::load_or_default(config_path.as_deref());

    // Initialize logging: console plus a daily rolling file
    let log_dir = match &config.log_dir {
        Some(dir) => dir.clone(),
        None => config::ensure_app_data_dir().context("Failed to create data directory")?,
    };
    let file_appender = tracing_appender::rolling::daily(&log_dir, "provd.log");
    let (file_writer, _log_guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,provd=debug")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();

    tracing::info!("Starting provd as {}", config.host_id);

    let pipeline_path = config.pipeline_config_path();
    let query_pipe = config.query_pipe.clone();
    let kernel = Arc::new(Kernel::new(config, Registry::with_builtins()));

    let dispatcher = Dispatcher::spawn(kernel.clone()).context("Failed to start dispatch loop")?;
    let query_service =
        net::spawn_query_service(kernel.clone()).context("Failed to start query service")?;
    let sketch_service =
        net::spawn_sketch_service(kernel.clone()).context("Failed to start sketch service")?;

    let control = Arc::new(ControlSurface::new(kernel.clone()));

    // Restore the pipeline saved by the last shutdown
    if let Some(path) = pipeline_path.filter(|p| p.exists()) {
        tracing::info!("Loading pipeline from {}", path.display());
        let mut sink = io::sink();
        control.execute(&format!("config load {}", path.display()), &mut sink);
    }

    if let Some(pipe) = query_pipe {
        let control = control.clone();
        std::thread::Builder::new()
            .name("query-pipe".into())
            .spawn(move || {
                if let Err(e) = control.serve_query_pipe(&pipe) {
                    tracing::error!("Query pipe stopped: {}", e);
                }
            })
            .context("Failed to start query pipe")?;
    }

    control.run(BufReader::new(io::stdin()), io::stdout());

    if !kernel.is_shutting_down() {
        // stdin closed without a shutdown command
        kernel.shutdown();
    }
    kernel.wait_for_termination(None);

    let _ = dispatcher.join();
    let _ = query_service.thread.join();
    let _ = sketch_service.thread.join();
    tracing::info!("provd stopped");
    Ok(())
}
