//! Token-bucket rate limiting and per-session token budgets.
//!
//! [`TokenBucket`] is the pure refill arithmetic; [`RateLimiter`] wraps a
//! [`Model`] so every call first acquires a bucket token, queueing FIFO when
//! the bucket is empty.  A background drain task wakes queued callers as the
//! bucket refills.  An optional shared [`TokenBudget`] caps the total tokens
//! a session may consume across all calls.
//!
//! # Example
//!
//! ```rust,no_run
//! use agentllm::rate_limit::{RateLimiter, RateLimiterOptions};
//! use agentllm::clients::{create_model, ModelConfig};
//! use std::time::Duration;
//!
//! # fn main() -> agentllm::error::Result<()> {
//! let model = create_model("openai:gpt-4o-mini", ModelConfig::default())?;
//! let limited = RateLimiter::new(
//!     model,
//!     RateLimiterOptions::new(10, 10, Duration::from_secs(60)),
//! );
//! # let _ = limited;
//! # Ok(())
//! # }
//! ```

use crate::agentllm::error::{AgentError, Result};
use crate::agentllm::model::{
    GenerateOptions, Message, Model, ModelCapabilities, ModelResponse, RequestOptions, ToolSchema,
    Usage,
};
use crate::agentllm::stream::EventStream;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Classic token bucket with lazy refill.
///
/// On every inspection, whole elapsed refill intervals each add
/// `refill_rate` tokens, capped at `max_tokens`; the refill clock advances
/// only by the consumed intervals so partial intervals are never lost.
#[derive(Debug)]
pub struct TokenBucket {
    max_tokens: usize,
    refill_rate: usize,
    refill_interval: Duration,
    tokens: usize,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(max_tokens: usize, refill_rate: usize, refill_interval: Duration) -> Self {
        Self {
            max_tokens,
            refill_rate,
            refill_interval,
            tokens: max_tokens,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let interval_ms = self.refill_interval.as_millis().max(1);
        let elapsed_ms = self.last_refill.elapsed().as_millis();
        let intervals = (elapsed_ms / interval_ms) as u32;
        if intervals == 0 {
            return;
        }
        self.tokens = (self.tokens + self.refill_rate * intervals as usize).min(self.max_tokens);
        self.last_refill += self.refill_interval * intervals;
    }

    /// Take `n` tokens if available.
    pub fn consume(&mut self, n: usize) -> bool {
        self.refill();
        if self.tokens >= n {
            self.tokens -= n;
            true
        } else {
            false
        }
    }

    /// Time until `n` tokens will be available (zero when they already are).
    pub fn wait_time(&mut self, n: usize) -> Duration {
        self.refill();
        if self.tokens >= n {
            return Duration::ZERO;
        }
        if self.refill_rate == 0 {
            // Never refills; report one interval as a best effort.
            return self.refill_interval;
        }
        let missing = n - self.tokens;
        let intervals = (missing + self.refill_rate - 1) / self.refill_rate;
        let since_last = self.last_refill.elapsed();
        let target = self.refill_interval * intervals as u32;
        target.checked_sub(since_last).unwrap_or(Duration::ZERO)
    }

    /// Currently available tokens after a lazy refill.
    pub fn available(&mut self) -> usize {
        self.refill();
        self.tokens
    }
}

/// A hard cap on total token consumption, shared across calls.
#[derive(Debug)]
pub struct TokenBudget {
    max_tokens: usize,
    used: Mutex<usize>,
}

impl TokenBudget {
    pub fn new(max_tokens: usize) -> Self {
        Self {
            max_tokens,
            used: Mutex::new(0),
        }
    }

    /// Charge `n` tokens. Fails with a rate limit error when the budget
    /// would be exceeded; the budget is left unchanged on failure.
    pub fn record(&self, n: usize) -> Result<()> {
        let mut used = self.used.lock().unwrap();
        if *used + n > self.max_tokens {
            return Err(AgentError::RateLimited {
                message: format!(
                    "token budget exceeded: {} used + {} requested > {} allowed",
                    *used, n, self.max_tokens
                ),
                retry_after: None,
                provider: None,
            });
        }
        *used += n;
        Ok(())
    }

    pub fn used(&self) -> usize {
        *self.used.lock().unwrap()
    }

    pub fn remaining(&self) -> usize {
        self.max_tokens - self.used()
    }
}

/// Configuration for [`RateLimiter`].
#[derive(Debug, Clone)]
pub struct RateLimiterOptions {
    pub max_tokens: usize,
    pub refill_rate: usize,
    pub refill_interval: Duration,
    /// How long a queued caller waits before timing out. `None` waits
    /// indefinitely.
    pub acquire_timeout: Option<Duration>,
}

impl RateLimiterOptions {
    pub fn new(max_tokens: usize, refill_rate: usize, refill_interval: Duration) -> Self {
        Self {
            max_tokens,
            refill_rate,
            refill_interval,
            acquire_timeout: None,
        }
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }
}

struct Waiter {
    id: u64,
    tx: oneshot::Sender<()>,
}

struct LimiterState {
    bucket: TokenBucket,
    queue: VecDeque<Waiter>,
    next_waiter_id: u64,
    drain_running: bool,
    disposed: bool,
}

/// A [`Model`] wrapper that throttles calls through a [`TokenBucket`].
///
/// Acquisition is immediate while tokens remain; otherwise the caller joins
/// a FIFO queue serviced by a drain task that polls once per refill
/// interval.  Waiters are removed from the queue when they time out or their
/// request is aborted, and [`RateLimiter::dispose`] rejects everything still
/// queued.
pub struct RateLimiter {
    inner: Arc<dyn Model>,
    state: Arc<Mutex<LimiterState>>,
    options: RateLimiterOptions,
    budget: Option<Arc<TokenBudget>>,
}

impl RateLimiter {
    pub fn new(inner: Arc<dyn Model>, options: RateLimiterOptions) -> Self {
        let bucket = TokenBucket::new(
            options.max_tokens,
            options.refill_rate,
            options.refill_interval,
        );
        Self {
            inner,
            state: Arc::new(Mutex::new(LimiterState {
                bucket,
                queue: VecDeque::new(),
                next_waiter_id: 0,
                drain_running: false,
                disposed: false,
            })),
            options,
            budget: None,
        }
    }

    /// Charge recorded usage against a shared budget.
    pub fn with_budget(mut self, budget: Arc<TokenBudget>) -> Self {
        self.budget = Some(budget);
        self
    }

    /// Stop the drain task and reject all queued waiters.
    pub fn dispose(&self) {
        let mut state = self.state.lock().unwrap();
        state.disposed = true;
        // Dropping the senders wakes the waiters with a disposal error.
        state.queue.clear();
    }

    fn remove_waiter(&self, id: u64) {
        let mut state = self.state.lock().unwrap();
        state.queue.retain(|w| w.id != id);
    }

    fn spawn_drain_if_needed(&self, state: &mut LimiterState) {
        if state.drain_running {
            return;
        }
        state.drain_running = true;

        let shared = self.state.clone();
        let interval = self.options.refill_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; skip it so waiters sleep at
            // least part of one interval.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let mut state = shared.lock().unwrap();
                if state.disposed {
                    state.drain_running = false;
                    return;
                }
                while !state.queue.is_empty() && state.bucket.consume(1) {
                    if let Some(waiter) = state.queue.pop_front() {
                        let _ = waiter.tx.send(());
                    }
                }
                if state.queue.is_empty() {
                    state.drain_running = false;
                    return;
                }
            }
        });
    }

    /// Take one bucket token, queueing when none are available.
    async fn acquire(&self, request: &RequestOptions) -> Result<()> {
        request.check_aborted()?;

        let (id, rx) = {
            let mut state = self.state.lock().unwrap();
            if state.disposed {
                return Err(AgentError::other("rate limiter has been disposed"));
            }
            if state.bucket.consume(1) {
                return Ok(());
            }
            let (tx, rx) = oneshot::channel();
            let id = state.next_waiter_id;
            state.next_waiter_id += 1;
            state.queue.push_back(Waiter { id, tx });
            self.spawn_drain_if_needed(&mut state);
            (id, rx)
        };

        let granted = async {
            rx.await
                .map_err(|_| AgentError::other("rate limiter has been disposed"))
        };

        match (&request.signal, self.options.acquire_timeout) {
            (Some(signal), Some(timeout)) => tokio::select! {
                result = granted => result,
                _ = signal.cancelled() => {
                    self.remove_waiter(id);
                    Err(AgentError::aborted(
                        signal.reason().unwrap_or_else(|| "acquire was aborted".to_string()),
                    ))
                }
                _ = tokio::time::sleep(timeout) => {
                    self.remove_waiter(id);
                    Err(AgentError::timeout(format!(
                        "rate limiter acquisition timed out after {:?}",
                        timeout
                    )))
                }
            },
            (Some(signal), None) => tokio::select! {
                result = granted => result,
                _ = signal.cancelled() => {
                    self.remove_waiter(id);
                    Err(AgentError::aborted(
                        signal.reason().unwrap_or_else(|| "acquire was aborted".to_string()),
                    ))
                }
            },
            (None, Some(timeout)) => tokio::select! {
                result = granted => result,
                _ = tokio::time::sleep(timeout) => {
                    self.remove_waiter(id);
                    Err(AgentError::timeout(format!(
                        "rate limiter acquisition timed out after {:?}",
                        timeout
                    )))
                }
            },
            (None, None) => granted.await,
        }
    }

    fn charge_budget(&self, usage: &Usage) -> Result<()> {
        if let Some(budget) = &self.budget {
            budget.record(usage.total_tokens)?;
        }
        Ok(())
    }
}

#[async_trait]
impl Model for RateLimiter {
    async fn generate(
        &self,
        messages: &[Message],
        options: &GenerateOptions,
        request: &RequestOptions,
    ) -> Result<ModelResponse> {
        self.acquire(request).await?;
        let response = self.inner.generate(messages, options, request).await?;
        self.charge_budget(&response.usage)?;
        Ok(response)
    }

    async fn generate_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        options: &GenerateOptions,
        request: &RequestOptions,
    ) -> Result<ModelResponse> {
        self.acquire(request).await?;
        let response = self
            .inner
            .generate_with_tools(messages, tools, options, request)
            .await?;
        self.charge_budget(&response.usage)?;
        Ok(response)
    }

    async fn stream(
        &self,
        messages: &[Message],
        options: &GenerateOptions,
        request: &RequestOptions,
    ) -> Result<EventStream> {
        self.acquire(request).await?;
        self.inner.stream(messages, options, request).await
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn provider_name(&self) -> &str {
        self.inner.provider_name()
    }

    fn capabilities(&self) -> ModelCapabilities {
        self.inner.capabilities()
    }
}
