use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use reqflow_db::repositories::{NotificationLedger, RepositoryError};

use crate::channel::DeliveryChannel;
use crate::transport::OutboundEmail;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RetryReport {
    pub total_failed: usize,
    pub retry_succeeded: usize,
    pub retry_failed: usize,
}

/// Re-attempts failed ledger rows up to a bounded retry count.
///
/// Rows are processed sequentially within a sweep, and each row is claimed
/// first (`claim_for_retry` flips `Failed -> Pending`), so a concurrent
/// sweep sees an in-flight row as already claimed and skips it. The row's
/// already-rendered subject and body are re-sent verbatim; content never
/// changes across retries. A row that exhausts `max_retries` stays `Failed`
/// permanently and is visible only through audit queries.
pub struct RetrySweeper {
    channel: Arc<DeliveryChannel>,
    ledger: Arc<dyn NotificationLedger>,
    max_retries: u32,
}

impl RetrySweeper {
    pub fn new(
        channel: Arc<DeliveryChannel>,
        ledger: Arc<dyn NotificationLedger>,
        max_retries: u32,
    ) -> Self {
        Self { channel, ledger, max_retries }
    }

    pub fn default_max_retries(&self) -> u32 {
        self.max_retries
    }

    pub async fn run_once(&self) -> Result<RetryReport, RepositoryError> {
        self.run_with_limit(self.max_retries).await
    }

    pub async fn run_with_limit(&self, max_retries: u32) -> Result<RetryReport, RepositoryError> {
        let rows = self.ledger.query_failed_retryable(max_retries).await?;
        let mut report =
            RetryReport { total_failed: rows.len(), retry_succeeded: 0, retry_failed: 0 };

        for row in rows {
            if !self.ledger.claim_for_retry(&row.id).await? {
                continue;
            }

            let Some(email) = row.recipient_email.clone() else {
                // In-app rows never fail delivery; settle any stray row.
                self.ledger.mark_sent(&row.id, None).await?;
                report.retry_succeeded += 1;
                continue;
            };

            let outbound =
                OutboundEmail { to: email, subject: row.subject.clone(), body: row.body.clone() };

            match self.channel.send(&outbound).await {
                Ok(receipt) => {
                    self.ledger.mark_sent(&row.id, receipt.message_id.as_deref()).await?;
                    report.retry_succeeded += 1;
                }
                Err(delivery_error) => {
                    self.ledger.mark_failed(&row.id, &delivery_error.to_string()).await?;
                    report.retry_failed += 1;
                }
            }
        }

        info!(
            event_name = "notify.sweeper.completed",
            total_failed = report.total_failed,
            retry_succeeded = report.retry_succeeded,
            retry_failed = report.retry_failed,
            "retry sweep finished"
        );

        Ok(report)
    }

    /// Runs the sweep on a fixed cadence until the task is aborted.
    pub fn spawn(self: Arc<Self>, interval_secs: u64) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; skip it so a fresh boot does
            // not race the bootstrap path.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if let Err(error) = self.run_once().await {
                    warn!(error = %error, "retry sweep failed; will try again next interval");
                }
            }
        })
    }
}
