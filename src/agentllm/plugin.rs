//! Named bundles of middlewares and tools installed onto an agent.
//!
//! A [`Plugin`] contributes middlewares and tools plus optional install and
//! uninstall callbacks.  Plugins registered in an agent's configuration are
//! wired in synchronously at construction; their `on_install` callbacks are
//! deferred and run once before the first run.  Installing through
//! [`Agent::use_plugin`](crate::agent::Agent::use_plugin) runs `on_install`
//! immediately.

use crate::agentllm::error::{AgentError, Result};
use crate::agentllm::middleware::{Middleware, MiddlewareStack};
use crate::agentllm::tool_registry::{Tool, ToolRegistry};
use async_trait::async_trait;
use std::sync::Arc;

/// A named extension bundle.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> &str {
        "0.0.0"
    }

    /// Middlewares pushed onto the agent's stack at install time.
    fn middlewares(&self) -> Vec<Arc<dyn Middleware>> {
        Vec::new()
    }

    /// Tools registered into the agent's registry at install time.
    fn tools(&self) -> Vec<Tool> {
        Vec::new()
    }

    /// Runs once after installation (deferred to the first run for plugins
    /// that were registered via configuration).
    async fn on_install(&self) -> Result<()> {
        Ok(())
    }

    async fn on_uninstall(&self) -> Result<()> {
        Ok(())
    }
}

/// Tracks installed plugins and their deferred install callbacks.
#[derive(Default)]
pub struct PluginManager {
    installed: Vec<Arc<dyn Plugin>>,
    pending_install: Vec<Arc<dyn Plugin>>,
}

impl PluginManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wire a plugin's middlewares and tools into the agent and queue its
    /// `on_install` callback. Duplicate plugin names are rejected.
    pub fn register(
        &mut self,
        plugin: Arc<dyn Plugin>,
        stack: &mut MiddlewareStack,
        registry: &mut ToolRegistry,
    ) -> Result<()> {
        if self.installed.iter().any(|p| p.name() == plugin.name()) {
            return Err(AgentError::Plugin {
                message: format!("Plugin \"{}\" is already installed.", plugin.name()),
            });
        }

        for middleware in plugin.middlewares() {
            stack.use_middleware(middleware);
        }
        for tool in plugin.tools() {
            registry.register(tool)?;
        }

        log::debug!("installed plugin {} v{}", plugin.name(), plugin.version());
        self.pending_install.push(plugin.clone());
        self.installed.push(plugin);
        Ok(())
    }

    /// Run all queued `on_install` callbacks, in installation order.
    pub async fn run_pending_installs(&mut self) -> Result<()> {
        let pending: Vec<Arc<dyn Plugin>> = self.pending_install.drain(..).collect();
        for plugin in pending {
            plugin.on_install().await.map_err(|e| AgentError::Plugin {
                message: format!("plugin \"{}\" failed to install: {}", plugin.name(), e),
            })?;
        }
        Ok(())
    }

    /// Names of installed plugins, in installation order.
    pub fn names(&self) -> Vec<String> {
        self.installed.iter().map(|p| p.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.installed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.installed.is_empty()
    }
}
