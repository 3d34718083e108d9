use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use crate::transport::{MailTransport, OutboundEmail, ProviderReceipt, TransportError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("delivery attempt timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("primary transport failed: {primary}; fallback transport failed: {fallback}")]
    FallbackExhausted { primary: String, fallback: String },
}

/// Wraps the outbound transport pair. Each `send` is one atomic, independent
/// attempt: a hard timeout bounds the primary try, and on primary failure
/// the fallback transport is tried exactly once under the same timeout.
/// Further retries are the sweeper's job, not this layer's, and the channel
/// never touches the ledger.
pub struct DeliveryChannel {
    primary: Arc<dyn MailTransport>,
    fallback: Option<Arc<dyn MailTransport>>,
    send_timeout: Duration,
}

impl DeliveryChannel {
    pub fn new(
        primary: Arc<dyn MailTransport>,
        fallback: Option<Arc<dyn MailTransport>>,
        send_timeout: Duration,
    ) -> Self {
        Self { primary, fallback, send_timeout }
    }

    pub async fn send(&self, email: &OutboundEmail) -> Result<ProviderReceipt, DeliveryError> {
        let primary_error = match self.attempt(&self.primary, email).await {
            Ok(receipt) => return Ok(receipt),
            Err(error) => error,
        };

        let Some(fallback) = &self.fallback else {
            return Err(primary_error);
        };

        warn!(
            to = %email.to,
            error = %primary_error,
            "primary mail transport failed; attempting fallback"
        );

        match self.attempt(fallback, email).await {
            Ok(receipt) => Ok(receipt),
            Err(fallback_error) => Err(DeliveryError::FallbackExhausted {
                primary: primary_error.to_string(),
                fallback: fallback_error.to_string(),
            }),
        }
    }

    async fn attempt(
        &self,
        transport: &Arc<dyn MailTransport>,
        email: &OutboundEmail,
    ) -> Result<ProviderReceipt, DeliveryError> {
        match tokio::time::timeout(self.send_timeout, transport.send(email)).await {
            Ok(result) => result.map_err(DeliveryError::from),
            Err(_) => Err(DeliveryError::Timeout { timeout_secs: self.send_timeout.as_secs() }),
        }
    }
}
