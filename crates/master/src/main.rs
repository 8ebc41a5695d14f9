// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! forged: the Forge build master daemon.
//!
//! Loads the TOML configuration, opens the journal-backed store, starts
//! the engine, and serves two sockets: TCP for workers, a Unix socket
//! for the control (trigger) surface. SIGINT/SIGTERM begin a graceful
//! shutdown: no new claims, running builds get the configured grace
//! period, stragglers are interrupted.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod config;
mod control;
mod workers;

use config::{ConfigError, MasterConfig};
use forge_core::SystemClock;
use forge_engine::{Engine, TracingReporter};
use forge_store::{JournalStore, Retrying, RetryPolicy};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::{TcpListener, UnixListener};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Debug, Error)]
enum MasterError {
    #[error("usage: forged <config.toml>")]
    Usage,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("another forged is already running (lock held on {0})")]
    AlreadyRunning(PathBuf),
    #[error(transparent)]
    Store(#[from] forge_store::StoreError),
    #[error(transparent)]
    Engine(#[from] forge_engine::EngineError),
    #[error("engine configuration: {0}")]
    EngineConfig(#[from] forge_engine::ConfigError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();
}

/// Take the single-instance lock, leaving our pid behind for operators.
fn take_instance_lock(path: &PathBuf) -> Result<File, MasterError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).write(true).truncate(false).open(path)?;
    file.try_lock_exclusive().map_err(|_| MasterError::AlreadyRunning(path.clone()))?;
    file.set_len(0)?;
    writeln!(file, "{}", std::process::id())?;
    Ok(file)
}

async fn run() -> Result<(), MasterError> {
    let config_path = std::env::args().nth(1).ok_or(MasterError::Usage)?;
    let config = MasterConfig::load(std::path::Path::new(&config_path))?;

    std::fs::create_dir_all(&config.state_dir)?;
    // Held for the life of the process; released by the OS on exit.
    let _instance_lock = take_instance_lock(&config.lock_path())?;

    let store = JournalStore::open(config.journal_path())?;
    let store = Arc::new(Retrying::new(store, RetryPolicy::default()));

    let engine = Engine::new(
        config.engine.clone(),
        store,
        Arc::new(TracingReporter),
        SystemClock,
    )?;
    let restored = engine.restore_pending().await?;
    if restored > 0 {
        info!(restored, "restored pending requests from journal");
    }

    let worker_listener = TcpListener::bind(&config.worker_listen).await?;
    if config.control_socket.exists() {
        std::fs::remove_file(&config.control_socket)?;
    }
    let control_listener = UnixListener::bind(&config.control_socket)?;

    let shutdown = CancellationToken::new();
    let workers_task =
        tokio::spawn(workers::run(engine.clone(), worker_listener, shutdown.clone()));
    let control_task =
        tokio::spawn(control::run(engine.clone(), control_listener, shutdown.clone()));

    info!(master = engine.master_name(), "forged ready");
    wait_for_signal().await;

    info!("signal received, shutting down");
    engine.shutdown(config.shutdown_grace).await;
    shutdown.cancel();
    let _ = workers_task.await;
    let _ = control_task.await;
    let _ = std::fs::remove_file(&config.control_socket);
    Ok(())
}

async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            error!(error = %e, "cannot install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(e) = run().await {
        error!("{e}");
        eprintln!("forged: {e}");
        std::process::exit(1);
    }
}
