//! Retry with exponential backoff and ordered provider fallback.
//!
//! [`with_retry`] re-runs a fallible async operation with exponential
//! backoff and jitter, honouring the `retry-after` interval carried by rate
//! limit errors.  [`FallbackModel`] chains several providers behind a single
//! [`Model`] so transient upstream failures roll over to the next provider.
//!
//! # Example
//!
//! ```rust,no_run
//! use agentllm::retry::{with_retry, RetryOptions};
//!
//! # async fn example() -> agentllm::error::Result<()> {
//! let options = RetryOptions::default().with_max_retries(2);
//! let value = with_retry(&options, || async {
//!     Ok::<_, agentllm::error::AgentError>(42)
//! })
//! .await?;
//! assert_eq!(value, 42);
//! # Ok(())
//! # }
//! ```

use crate::agentllm::error::{is_retryable, AgentError, Result};
use crate::agentllm::model::{
    GenerateOptions, Message, Model, ModelCapabilities, ModelResponse, RequestOptions, ToolSchema,
};
use crate::agentllm::stream::EventStream;
use async_trait::async_trait;
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// Backoff configuration.
#[derive(Debug, Clone)]
pub struct RetryOptions {
    /// Extra attempts after the first (total attempts = `1 + max_retries`).
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryOptions {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Delay before the retry following `attempt` (0-based).
    ///
    /// Exponential growth capped at `max_delay`, with a uniform jitter of
    /// one quarter of the capped delay in either direction.  A rate limit
    /// error carrying a positive `retry-after` overrides the schedule and
    /// sleeps exactly that long.
    fn delay_for(&self, attempt: u32, error: &AgentError) -> Duration {
        if let AgentError::RateLimited {
            retry_after: Some(seconds),
            ..
        } = error
        {
            if *seconds > 0 {
                return Duration::from_secs(*seconds);
            }
        }

        let base = self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_millis() as f64);
        let jitter_range = capped * 0.25;
        let jitter = rand::thread_rng().gen_range(-jitter_range..=jitter_range);
        Duration::from_millis((capped + jitter).max(0.0) as u64)
    }
}

/// Run `operation` up to `1 + max_retries` times.
///
/// Non-retryable errors (per [`is_retryable`]) are returned immediately;
/// after the final attempt the last error is returned.
pub async fn with_retry<F, Fut, T>(options: &RetryOptions, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error: Option<AgentError> = None;

    for attempt in 0..=options.max_retries {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if !is_retryable(&error) {
                    return Err(error);
                }
                if attempt < options.max_retries {
                    let delay = options.delay_for(attempt, &error);
                    log::debug!(
                        "retryable failure (attempt {}/{}), sleeping {:?}: {}",
                        attempt + 1,
                        options.max_retries + 1,
                        delay,
                        error
                    );
                    sleep(delay).await;
                }
                last_error = Some(error);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| AgentError::other("retry loop produced no error")))
}

/// An ordered chain of providers behind one [`Model`].
///
/// Every provider attempt is itself wrapped in [`with_retry`]; when a
/// provider still fails, the chain moves on to the next one.  When the whole
/// chain fails the last error is surfaced.
pub struct FallbackModel {
    providers: Vec<Arc<dyn Model>>,
    retry_options: RetryOptions,
    display_name: String,
}

impl FallbackModel {
    /// Build a chain. An empty provider list is a configuration error.
    pub fn new(providers: Vec<Arc<dyn Model>>) -> Result<Self> {
        if providers.is_empty() {
            return Err(AgentError::config(
                "fallback chain requires at least one provider",
            ));
        }
        let display_name = format!(
            "fallback({})",
            providers
                .iter()
                .map(|p| p.provider_name().to_string())
                .collect::<Vec<_>>()
                .join(",")
        );
        Ok(Self {
            providers,
            retry_options: RetryOptions::default(),
            display_name,
        })
    }

    pub fn with_retry_options(mut self, options: RetryOptions) -> Self {
        self.retry_options = options;
        self
    }

    async fn run_chain<'a, F, Fut, T>(&'a self, mut call: F) -> Result<T>
    where
        F: FnMut(&'a Arc<dyn Model>) -> Fut,
        Fut: Future<Output = Result<T>> + 'a,
    {
        let mut last_error: Option<AgentError> = None;
        for provider in &self.providers {
            match with_retry(&self.retry_options, || call(provider)).await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    log::warn!(
                        "provider {} failed, trying next in chain: {}",
                        provider.provider_name(),
                        error
                    );
                    last_error = Some(error);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| AgentError::other("fallback chain produced no error")))
    }
}

#[async_trait]
impl Model for FallbackModel {
    async fn generate(
        &self,
        messages: &[Message],
        options: &GenerateOptions,
        request: &RequestOptions,
    ) -> Result<ModelResponse> {
        self.run_chain(|provider| provider.generate(messages, options, request))
            .await
    }

    async fn generate_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        options: &GenerateOptions,
        request: &RequestOptions,
    ) -> Result<ModelResponse> {
        self.run_chain(|provider| provider.generate_with_tools(messages, tools, options, request))
            .await
    }

    async fn stream(
        &self,
        messages: &[Message],
        options: &GenerateOptions,
        request: &RequestOptions,
    ) -> Result<EventStream> {
        self.run_chain(|provider| provider.stream(messages, options, request))
            .await
    }

    fn model_name(&self) -> &str {
        self.providers[0].model_name()
    }

    fn provider_name(&self) -> &str {
        &self.display_name
    }

    fn capabilities(&self) -> ModelCapabilities {
        self.providers[0].capabilities()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_with_retry_first_attempt_succeeds() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let options = RetryOptions::default();
        let value = with_retry(&options, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, AgentError>(7) }
        })
        .await
        .unwrap();
        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_with_retry_recovers_after_transient_failures() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let options = RetryOptions::default()
            .with_max_retries(3)
            .with_initial_delay(Duration::from_millis(1));
        let value = with_retry(&options, move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err(AgentError::timeout("transient"))
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_gives_up_after_budget() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let options = RetryOptions::default()
            .with_max_retries(2)
            .with_initial_delay(Duration::from_millis(1));
        let result: Result<()> = with_retry(&options, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(AgentError::timeout("always")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_stops_on_non_retryable() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let options = RetryOptions::default().with_max_retries(5);
        let result: Result<()> = with_retry(&options, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async {
                Err(AgentError::InvalidRequest {
                    message: "bad body".into(),
                    provider: None,
                })
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_delay_honours_retry_after() {
        let options = RetryOptions::default();
        let error = AgentError::RateLimited {
            message: "slow".into(),
            retry_after: Some(42),
            provider: None,
        };
        assert_eq!(options.delay_for(0, &error), Duration::from_secs(42));
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let options = RetryOptions::default()
            .with_initial_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(400));
        let error = AgentError::timeout("t");
        // Jitter is +-25%, so bounds are generous.
        let d0 = options.delay_for(0, &error).as_millis();
        let d3 = options.delay_for(3, &error).as_millis();
        assert!(d0 <= 125, "d0 = {}", d0);
        assert!((300..=500).contains(&d3), "d3 = {}", d3);
    }

    struct FlakyModel {
        name: &'static str,
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl Model for FlakyModel {
        async fn generate(
            &self,
            _messages: &[Message],
            _options: &GenerateOptions,
            _request: &RequestOptions,
        ) -> Result<ModelResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(AgentError::Provider {
                    message: "boom".into(),
                    status_code: Some(500),
                    provider: Some(self.name.to_string()),
                })
            } else {
                Ok(ModelResponse::text(format!("from {}", self.name)))
            }
        }

        async fn generate_with_tools(
            &self,
            messages: &[Message],
            _tools: &[ToolSchema],
            options: &GenerateOptions,
            request: &RequestOptions,
        ) -> Result<ModelResponse> {
            self.generate(messages, options, request).await
        }

        async fn stream(
            &self,
            _messages: &[Message],
            _options: &GenerateOptions,
            _request: &RequestOptions,
        ) -> Result<EventStream> {
            Ok(EventStream::empty())
        }

        fn model_name(&self) -> &str {
            "flaky"
        }

        fn provider_name(&self) -> &str {
            self.name
        }
    }

    fn flaky(name: &'static str, fail: bool) -> (Arc<dyn Model>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Arc::new(FlakyModel {
                name,
                calls: calls.clone(),
                fail,
            }),
            calls,
        )
    }

    #[tokio::test]
    async fn test_fallback_moves_to_second_provider() {
        let (p1, p1_calls) = flaky("p1", true);
        let (p2, p2_calls) = flaky("p2", false);
        let chain = FallbackModel::new(vec![p1, p2]).unwrap().with_retry_options(
            RetryOptions::default()
                .with_max_retries(1)
                .with_initial_delay(Duration::from_millis(1)),
        );

        let response = chain
            .generate(
                &[Message::user("hi")],
                &GenerateOptions::default(),
                &RequestOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(response.text.as_deref(), Some("from p2"));
        // p1 retried (2 calls), then p2 succeeded once.
        assert_eq!(p1_calls.load(Ordering::SeqCst), 2);
        assert_eq!(p2_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fallback_surfaces_last_error() {
        let (p1, _) = flaky("p1", true);
        let (p2, _) = flaky("p2", true);
        let chain = FallbackModel::new(vec![p1, p2]).unwrap().with_retry_options(
            RetryOptions::default()
                .with_max_retries(0)
                .with_initial_delay(Duration::from_millis(1)),
        );

        let error = chain
            .generate(
                &[Message::user("hi")],
                &GenerateOptions::default(),
                &RequestOptions::default(),
            )
            .await
            .unwrap_err();
        match error {
            AgentError::Provider { provider, .. } => assert_eq!(provider.as_deref(), Some("p2")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_fallback_name_and_empty_list() {
        let (p1, _) = flaky("p1", false);
        let (p2, _) = flaky("p2", false);
        let chain = FallbackModel::new(vec![p1, p2]).unwrap();
        assert_eq!(chain.provider_name(), "fallback(p1,p2)");
        assert!(FallbackModel::new(Vec::new()).is_err());
    }
}
