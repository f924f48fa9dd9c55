//! Exponential backoff around a completion provider

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{CompletionProvider, CompletionSettings};
use crate::config::RetryPolicy;
use crate::error::CollaboratorError;

/// Retries transient errors (`Unavailable`, `RateLimited`) of the wrapped
/// provider. `Malformed` is returned at once.
pub struct Retrying<P> {
    inner: P,
    policy: RetryPolicy,
}

impl<P> Retrying<P> {
    pub fn new(inner: P, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl<P> CompletionProvider for Retrying<P>
where
    P: CompletionProvider,
{
    async fn complete(
        &self,
        prompt: &str,
        settings: &CompletionSettings,
    ) -> Result<String, CollaboratorError> {
        let mut attempt = 0;
        loop {
            match self.inner.complete(prompt, settings).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_transient() && attempt < self.policy.max_retries => {
                    attempt += 1;
                    let delay = self.policy.delay_for_attempt(attempt);
                    warn!(
                        provider = self.inner.name(),
                        attempt,
                        error = %e,
                        "Completion failed, will retry"
                    );
                    debug!(delay_ms = delay.as_millis() as u64, "Backing off");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
