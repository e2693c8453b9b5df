//! Onion-model middleware around the agent engine's lifecycle.
//!
//! A [`Middleware`] may intercept any of five lifecycle hooks. The stack
//! executes middlewares in registration order on the way in and unwinds in
//! reverse order on the way out: each hook receives a mutable context plus a
//! [`Next`] continuation, and returning without calling `next` short-circuits
//! the remaining middlewares and the engine's downstream work.  Context
//! mutations are visible to the engine when the chain returns.
//!
//! # Example
//!
//! ```rust
//! use agentllm::middleware::{BeforeGenerateContext, Middleware, MiddlewareStack, Next};
//! use agentllm::model::Message;
//! use async_trait::async_trait;
//! use std::sync::Arc;
//!
//! struct InjectContext;
//!
//! #[async_trait]
//! impl Middleware for InjectContext {
//!     async fn before_generate(
//!         &self,
//!         ctx: &mut BeforeGenerateContext,
//!         next: Next<'_>,
//!     ) -> agentllm::error::Result<()> {
//!         ctx.messages.push(Message::system("Today is a holiday."));
//!         next.before_generate(ctx).await
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> agentllm::error::Result<()> {
//! let mut stack = MiddlewareStack::new();
//! stack.use_middleware(Arc::new(InjectContext));
//!
//! let mut ctx = BeforeGenerateContext {
//!     messages: vec![Message::user("hi")],
//!     tools: Vec::new(),
//!     iteration: 0,
//! };
//! stack.run_before_generate(&mut ctx).await?;
//! assert_eq!(ctx.messages.len(), 2);
//! # Ok(())
//! # }
//! ```

use crate::agentllm::error::{AgentError, Result};
use crate::agentllm::model::{Message, ModelResponse, ToolCall, ToolSchema};
use async_trait::async_trait;
use std::sync::Arc;

/// Context for the hook before each model call.
#[derive(Debug, Clone)]
pub struct BeforeGenerateContext {
    /// Conversation sent to the model. Middlewares may inject or rewrite
    /// messages.
    pub messages: Vec<Message>,
    /// Tools offered to the model for this call.
    pub tools: Vec<ToolSchema>,
    /// Zero-based engine iteration.
    pub iteration: usize,
}

/// Context for the hook after each model call.
#[derive(Debug, Clone)]
pub struct AfterGenerateContext {
    /// The model's response. Mutations (e.g. rewriting the text) are
    /// adopted by the engine.
    pub response: ModelResponse,
    pub messages: Vec<Message>,
    pub iteration: usize,
}

/// Context for the hook before each tool execution.
#[derive(Debug, Clone)]
pub struct BeforeToolCallContext {
    pub tool_call: ToolCall,
    /// Whether the registry knows this tool.
    pub tool_known: bool,
    /// Set to true to skip execution; `result` then stands in for the tool
    /// output.
    pub skip: bool,
    pub result: Option<String>,
}

/// Context for the hook after each tool execution.
#[derive(Debug, Clone)]
pub struct AfterToolCallContext {
    pub tool_call: ToolCall,
    pub result: String,
    pub error: Option<String>,
}

/// Context for the error hook.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub error: AgentError,
    /// Advisory flag middlewares can set once they have dealt with the
    /// error; the engine still rethrows.
    pub handled: bool,
}

/// Continuation into the rest of the chain.
///
/// The position index advances linearly; each call consumes the
/// continuation, so a hook can invoke the remainder of the chain at most
/// once.
pub struct Next<'a> {
    chain: &'a [Arc<dyn Middleware>],
    index: usize,
}

macro_rules! next_hook {
    ($fn_name:ident, $ctx:ty) => {
        pub async fn $fn_name(mut self, ctx: &mut $ctx) -> Result<()> {
            match self.chain.get(self.index) {
                Some(middleware) => {
                    let middleware = middleware.clone();
                    self.index += 1;
                    middleware.$fn_name(ctx, self).await
                }
                None => Ok(()),
            }
        }
    };
}

impl<'a> Next<'a> {
    next_hook!(before_generate, BeforeGenerateContext);
    next_hook!(after_generate, AfterGenerateContext);
    next_hook!(before_tool_call, BeforeToolCallContext);
    next_hook!(after_tool_call, AfterToolCallContext);
    next_hook!(on_error, ErrorContext);
}

/// Lifecycle interceptor. Every hook defaults to a pass-through, so a
/// middleware only writes the hooks it cares about.
#[async_trait]
pub trait Middleware: Send + Sync {
    fn name(&self) -> &str {
        "middleware"
    }

    async fn before_generate(&self, ctx: &mut BeforeGenerateContext, next: Next<'_>) -> Result<()> {
        next.before_generate(ctx).await
    }

    async fn after_generate(&self, ctx: &mut AfterGenerateContext, next: Next<'_>) -> Result<()> {
        next.after_generate(ctx).await
    }

    async fn before_tool_call(
        &self,
        ctx: &mut BeforeToolCallContext,
        next: Next<'_>,
    ) -> Result<()> {
        next.before_tool_call(ctx).await
    }

    async fn after_tool_call(&self, ctx: &mut AfterToolCallContext, next: Next<'_>) -> Result<()> {
        next.after_tool_call(ctx).await
    }

    async fn on_error(&self, ctx: &mut ErrorContext, next: Next<'_>) -> Result<()> {
        next.on_error(ctx).await
    }
}

/// Ordered middleware collection with per-hook entry points.
#[derive(Default, Clone)]
pub struct MiddlewareStack {
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a middleware to the chain.
    pub fn use_middleware(&mut self, middleware: Arc<dyn Middleware>) {
        self.middlewares.push(middleware);
    }

    /// Snapshot copy of the registered middlewares.
    pub fn all(&self) -> Vec<Arc<dyn Middleware>> {
        self.middlewares.clone()
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    fn entry(&self) -> Next<'_> {
        Next {
            chain: &self.middlewares,
            index: 0,
        }
    }

    pub async fn run_before_generate(&self, ctx: &mut BeforeGenerateContext) -> Result<()> {
        self.entry().before_generate(ctx).await
    }

    pub async fn run_after_generate(&self, ctx: &mut AfterGenerateContext) -> Result<()> {
        self.entry().after_generate(ctx).await
    }

    pub async fn run_before_tool_call(&self, ctx: &mut BeforeToolCallContext) -> Result<()> {
        self.entry().before_tool_call(ctx).await
    }

    pub async fn run_after_tool_call(&self, ctx: &mut AfterToolCallContext) -> Result<()> {
        self.entry().after_tool_call(ctx).await
    }

    pub async fn run_on_error(&self, ctx: &mut ErrorContext) -> Result<()> {
        self.entry().on_error(ctx).await
    }
}

impl std::fmt::Debug for MiddlewareStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.middlewares.iter().map(|m| m.name()).collect();
        f.debug_struct("MiddlewareStack")
            .field("middlewares", &names)
            .finish()
    }
}
