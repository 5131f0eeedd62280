//! Oryx service process.
//!
//! Loads its configuration, then runs until it receives `SIGINT` or `SIGTERM`. Sending `SIGHUP`, or modifying the
//! configuration file, reloads the configuration.

#![deny(missing_docs)]
use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use oryx_app::prelude::*;
use tracing::{info, warn};

#[cfg(target_os = "linux")]
mod jemalloc;

#[cfg(target_os = "linux")]
#[global_allocator]
static ALLOC: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

/// Oryx service process.
#[derive(Parser)]
#[command(about, version)]
struct Cli {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "conf", default_value = "conf/oryx.json")]
    conf: PathBuf,

    /// Path to write the process ID to while running.
    #[arg(long)]
    pid_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let logger = Arc::new(LoggerAdapter::global());
    let server = ServerBuilder::new(Arc::new(ConfigStore::new()))
        .with_logger(Arc::clone(&logger))
        .with_reclaimer(heap_reclaimer())
        .build();

    if let Err(e) = server.parse_config(&cli.conf).await {
        fatal_and_exit(format!("failed to parse configuration '{}': {}", cli.conf.display(), e));
    }

    if let Err(e) = server.prepare_logger().await {
        fatal_and_exit(format!("failed to prepare logger: {}", e));
    }

    if server.store().current().daemon {
        warn!("Daemon mode is not supported. Running in the foreground.");
    }

    let pid_file = match cli.pid_file.as_deref().map(PidFile::create).transpose() {
        Ok(pid_file) => pid_file,
        Err(e) => fatal_and_exit(format!("failed to create PID file: {}", e)),
    };

    if let Err(e) = server.initialize().await {
        fatal_and_exit(format!("failed to initialize server: {}", e));
    }

    server.run().await;
    server.close().await;
    drop(pid_file);

    info!("Oryx stopped.");
    logger.close();
}

#[cfg(target_os = "linux")]
fn heap_reclaimer() -> Arc<dyn HeapReclaimer> {
    Arc::new(jemalloc::JemallocReclaimer)
}

#[cfg(not(target_os = "linux"))]
fn heap_reclaimer() -> Arc<dyn HeapReclaimer> {
    Arc::new(oryx_core::runtime::NoopReclaimer)
}
