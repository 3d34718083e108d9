use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use reqflow_core::config::MailConfig;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProviderReceipt {
    pub message_id: Option<String>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport failed to connect: {0}")]
    Connect(String),
    #[error("transport rejected the message: {0}")]
    Rejected(String),
    #[error("transport send failed: {0}")]
    Send(String),
}

/// One synchronous delivery attempt against an outbound mail path. A
/// transport never buffers, never retries, and never touches the ledger;
/// bounded retries belong to the sweeper and timeouts to the channel.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, email: &OutboundEmail) -> Result<ProviderReceipt, TransportError>;
}

#[derive(Default)]
pub struct NoopMailTransport;

#[async_trait]
impl MailTransport for NoopMailTransport {
    async fn send(&self, _email: &OutboundEmail) -> Result<ProviderReceipt, TransportError> {
        Ok(ProviderReceipt::default())
    }
}

#[derive(Serialize)]
struct RelayRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    body: &'a str,
}

#[derive(Deserialize)]
struct RelayResponse {
    message_id: Option<String>,
}

/// HTTP JSON mail relay. Posts one message per call to
/// `http://{host}:{port}/api/v1/messages` with optional basic auth.
pub struct HttpRelayTransport {
    client: reqwest::Client,
    endpoint: String,
    sender: String,
    username: Option<String>,
    password: Option<String>,
}

impl HttpRelayTransport {
    pub fn from_config(config: &MailConfig, host: &str) -> Result<Self, TransportError> {
        use secrecy::ExposeSecret;

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.send_timeout_secs))
            .build()
            .map_err(|error| TransportError::Connect(error.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!("http://{host}:{}/api/v1/messages", config.port),
            sender: config.sender.clone(),
            username: config.username.clone(),
            password: config.password.as_ref().map(|value| value.expose_secret().to_string()),
        })
    }

    pub fn primary(config: &MailConfig) -> Result<Self, TransportError> {
        Self::from_config(config, &config.host)
    }

    pub fn fallback(config: &MailConfig) -> Result<Option<Self>, TransportError> {
        config
            .fallback_host
            .as_deref()
            .map(|host| Self::from_config(config, host))
            .transpose()
    }
}

#[async_trait]
impl MailTransport for HttpRelayTransport {
    async fn send(&self, email: &OutboundEmail) -> Result<ProviderReceipt, TransportError> {
        let payload = RelayRequest {
            from: &self.sender,
            to: &email.to,
            subject: &email.subject,
            body: &email.body,
        };

        let mut request = self.client.post(&self.endpoint).json(&payload);
        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            request = request.basic_auth(username, Some(password));
        }

        let response = request.send().await.map_err(|error| {
            if error.is_connect() {
                TransportError::Connect(error.to_string())
            } else {
                TransportError::Send(error.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(TransportError::Rejected(format!(
                "relay returned {status}: {detail}"
            )));
        }

        let parsed = response
            .json::<RelayResponse>()
            .await
            .map_err(|error| TransportError::Send(format!("invalid relay response: {error}")))?;

        Ok(ProviderReceipt { message_id: parsed.message_id })
    }
}
