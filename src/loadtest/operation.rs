//! The unit of work driven by virtual users.
//!
//! Anything implementing [`Operation`] can be put under load. Async closures
//! returning `Result<(), OperationError>` implement it automatically, and
//! [`HttpProbe`] adapts a `reqwest` GET into an operation for the CLI.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::loadtest::error::OperationError;

/// Default per-request timeout for [`HttpProbe`].
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest error body kept in an [`OperationError::Http`].
const MAX_ERROR_BODY_CHARS: usize = 256;

/// A zero-argument unit of work invoked repeatedly by each virtual user.
///
/// `Ok(())` is recorded as a successful sample, `Err` as a failed sample
/// whose `error_kind` is [`OperationError::kind`]. Timeouts are the
/// operation's own responsibility; the engine never interrupts a call.
#[async_trait]
pub trait Operation: Send + Sync {
    /// Executes the operation once.
    async fn execute(&self) -> Result<(), OperationError>;
}

#[async_trait]
impl<F, Fut> Operation for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), OperationError>> + Send + 'static,
{
    async fn execute(&self) -> Result<(), OperationError> {
        (self)().await
    }
}

/// HTTP GET against a fixed URL, one request per invocation.
///
/// Non-2xx statuses become [`OperationError::Http`]; client errors are
/// classified with [`OperationError::classify_reqwest`]. Clone the probe (or
/// share it behind an `Arc`) to reuse the underlying connection pool.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpProbe {
    /// Creates a probe with a fresh client and [`DEFAULT_PROBE_TIMEOUT`].
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), url)
    }

    /// Creates a probe that reuses an existing client.
    pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    /// Sets the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the target URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns the per-request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl Operation for HttpProbe {
    async fn execute(&self) -> Result<(), OperationError> {
        let response = self
            .client
            .get(&self.url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| OperationError::classify_reqwest(&e))?;

        let status = response.status();
        if status.is_success() {
            // Read the body so the measured duration covers the full response.
            response
                .bytes()
                .await
                .map_err(|e| OperationError::classify_reqwest(&e))?;
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(OperationError::Http {
                status: status.as_u16(),
                body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            })
        }
    }
}
