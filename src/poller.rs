// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Deposit Poller
//!
//! Background task that asks the payment gateway about every pending
//! deposit, so deposits settle even when the webhook is never delivered.
//!
//! Each sweep goes through [`DepositReconciler::refresh_status`], the same
//! idempotent path as webhooks, so a deposit confirmed by both is credited
//! once.
//!
//! Uses `tokio_util::sync::CancellationToken` for graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::gateway::PaymentGateway;
use crate::ledger::Ledger;

pub struct DepositPoller {
    ledger: Arc<Ledger>,
    gateway: Arc<dyn PaymentGateway>,
    poll_interval: Duration,
}

/// Outcome counts of one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepSummary {
    pub checked: usize,
    pub settled: usize,
    pub failed: usize,
}

impl DepositPoller {
    pub fn new(ledger: Arc<Ledger>, gateway: Arc<dyn PaymentGateway>, poll_interval: Duration) -> Self {
        Self {
            ledger,
            gateway,
            poll_interval,
        }
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// ```rust,ignore
    /// tokio::spawn(poller.run(shutdown.clone()));
    /// ```
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.poll_interval.as_secs(),
            "deposit poller starting"
        );

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            self.poll_step().await;

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {},
                _ = shutdown.cancelled() => break,
            }
        }
        info!("deposit poller shutting down");
    }

    /// One sweep over the pending deposits.
    pub async fn poll_step(&self) -> SweepSummary {
        let mut summary = SweepSummary::default();
        let pending = match self.ledger.deposits().pending_deposits().await {
            Ok(pending) => pending,
            Err(e) => {
                warn!(error = %e, "deposit poller: failed to list pending deposits");
                return summary;
            }
        };
        if pending.is_empty() {
            return summary;
        }

        debug!(count = pending.len(), "deposit poller: checking pending deposits");
        for deposit in &pending {
            summary.checked += 1;
            match self
                .ledger
                .deposits()
                .refresh_status(&deposit.reference, self.gateway.as_ref())
                .await
            {
                Ok(outcome) if outcome.transitioned => {
                    summary.settled += 1;
                    info!(
                        reference = %outcome.transaction.reference,
                        status = ?outcome.transaction.status,
                        "deposit poller: deposit settled"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    summary.failed += 1;
                    warn!(
                        reference = %deposit.reference,
                        error = %e,
                        "deposit poller: failed to refresh deposit"
                    );
                }
            }
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerConfig;
    use crate::ledger::testing::StubGateway;
    use crate::models::TransactionStatus;

    fn ledger() -> (Arc<Ledger>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::open(&LedgerConfig::with_data_dir(dir.path())).unwrap();
        (Arc::new(ledger), dir)
    }

    #[tokio::test]
    async fn sweep_settles_confirmed_deposits_once() {
        let (ledger, _dir) = ledger();
        let gateway = Arc::new(StubGateway::new());
        let deposits = ledger.deposits();
        deposits.record_deposit_intent("alice", 500, "REF_A", None).await.unwrap();
        deposits.record_deposit_intent("bob", 700, "REF_B", None).await.unwrap();
        deposits.record_deposit_intent("carol", 900, "REF_C", None).await.unwrap();
        gateway.set_verification("REF_A", "success", 500, None);
        gateway.set_verification("REF_B", "failed", 700, None);
        // REF_C is unknown to the gateway.

        let poller = DepositPoller::new(ledger.clone(), gateway.clone(), Duration::from_secs(30));
        let summary = poller.poll_step().await;
        assert_eq!(
            summary,
            SweepSummary {
                checked: 3,
                settled: 2,
                failed: 1
            }
        );

        assert_eq!(ledger.store().get_balance("alice").await.unwrap(), 500);
        assert_eq!(ledger.store().get_balance("bob").await.unwrap(), 0);
        assert_eq!(
            deposits.transaction("REF_B").await.unwrap().status,
            TransactionStatus::Failed
        );
        assert_eq!(
            deposits.transaction("REF_C").await.unwrap().status,
            TransactionStatus::Pending
        );

        let again = poller.poll_step().await;
        assert_eq!(again.checked, 1);
        assert_eq!(again.settled, 0);
        assert_eq!(ledger.store().get_balance("alice").await.unwrap(), 500);
    }

    #[tokio::test]
    async fn run_stops_on_cancellation() {
        let (ledger, _dir) = ledger();
        let poller = DepositPoller::new(ledger, Arc::new(StubGateway::new()), Duration::from_secs(3_600));
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(poller.run(shutdown.clone()));
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
