// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Reconciliation Worker
//!
//! Background task that retries internal transfers whose sender debit
//! committed but whose recipient credit failed. Each sweep replays every
//! unresolved reconciliation event through the settlement engine; a credit
//! that lands resolves its event in the same write transaction.
//!
//! ## Shutdown
//!
//! Uses `tokio_util::sync::CancellationToken` for graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::DEFAULT_RECONCILIATION_INTERVAL;
use crate::settlement::SettlementEngine;

pub struct ReconciliationWorker {
    engine: Arc<SettlementEngine>,
    interval: Duration,
}

impl ReconciliationWorker {
    pub fn new(engine: Arc<SettlementEngine>) -> Self {
        Self {
            engine,
            interval: DEFAULT_RECONCILIATION_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run sweeps until the cancellation token is triggered.
    ///
    /// ```rust,ignore
    /// tokio::spawn(worker.run(shutdown.clone()));
    /// ```
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Reconciliation worker starting"
        );

        loop {
            if shutdown.is_cancelled() {
                info!("Reconciliation worker shutting down");
                return;
            }

            self.sweep().await;

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {},
                _ = shutdown.cancelled() => {
                    info!("Reconciliation worker shutting down");
                    return;
                }
            }
        }
    }

    async fn sweep(&self) {
        match self.engine.reconcile_pending().await {
            Ok(report) if report.attempted == 0 => debug!("Reconciliation: nothing pending"),
            Ok(report) => info!(
                attempted = report.attempted,
                resolved = report.resolved,
                still_failing = report.still_failing,
                "Reconciliation sweep finished"
            ),
            Err(e) => warn!(error = %e, "Reconciliation sweep failed"),
        }
    }
}
