// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use rhionx_ledger::config::{LedgerConfig, LogFormat};
use rhionx_ledger::fees::FeePolicy;
use rhionx_ledger::providers::memory::{
    InMemoryCustody, InMemoryIdentity, InMemoryKyc, InMemoryVault, RecordingNotifier,
    StaticRateTable,
};
use rhionx_ledger::reconciliation::ReconciliationWorker;
use rhionx_ledger::storage::LedgerDatabase;
use rhionx_ledger::{Collaborators, SettlementEngine};

fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(fmt::layer().json().with_target(true)).init(),
        LogFormat::Pretty => registry.with(fmt::layer().with_target(false)).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = LedgerConfig::from_env().context("invalid configuration")?;
    init_logging(config.log_format);

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("cannot create {}", config.data_dir.display()))?;
    let db_path = config.db_path();
    let db = LedgerDatabase::open(&db_path)
        .with_context(|| format!("cannot open ledger at {}", db_path.display()))?;
    info!(path = %db_path.display(), "Ledger database opened");

    let fees = match &config.fee_schedule_path {
        Some(path) => FeePolicy::from_json_file(path)
            .with_context(|| format!("cannot load fee schedule {}", path.display()))?,
        None => FeePolicy::default(),
    };
    let rates = match &config.exchange_rates_path {
        Some(path) => StaticRateTable::from_json_file(path)
            .with_context(|| format!("cannot load exchange rates {}", path.display()))?,
        None => StaticRateTable::new(),
    };

    // Development wiring: every collaborator is in-process.
    let providers = Collaborators {
        identity: Arc::new(InMemoryIdentity::new()),
        kyc: Arc::new(InMemoryKyc::new()),
        vault: Arc::new(InMemoryVault::new()),
        notifier: Arc::new(RecordingNotifier::new()),
        rates: Arc::new(rates),
        custody: Arc::new(InMemoryCustody::new()),
    };
    let engine = Arc::new(
        SettlementEngine::new(Arc::new(db), fees, providers).with_otp_ttl(config.otp_ttl),
    );

    let shutdown = CancellationToken::new();
    let worker = ReconciliationWorker::new(engine.clone())
        .with_interval(config.reconciliation_interval);
    let worker_handle = tokio::spawn(worker.run(shutdown.clone()));

    info!("Rhionx ledger running; press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    info!("Shutdown requested");
    shutdown.cancel();
    worker_handle.await.context("reconciliation worker panicked")?;
    Ok(())
}
