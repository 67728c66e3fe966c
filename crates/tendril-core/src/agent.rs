//! Everything an interaction needs from its surroundings.

use crate::battery::Battery;
use crate::config::{Config, Limits};
use crate::history::{build_history, HistoryMode};
use crate::interaction::Interaction;
use crate::prompts::Prompts;
use std::sync::Arc;
use tendril_provider::{ModelSelection, ResponseGateway, TokenCountRequest, ToolSchema};
use tendril_tools::{ToolRegistry, ToolsConfig};
use tracing::warn;

/// Builds the tool registry for one interaction.
pub type RegistryFactory = Arc<dyn Fn() -> ToolRegistry + Send + Sync>;

/// The gateway, model selection, prompts and limits an interaction runs
/// against.
///
/// The model selection lives here rather than in any global. A one-shot
/// override is consumed by the turn that gets a successful completion.
pub struct AgentEnv {
    pub gateway: Arc<dyn ResponseGateway>,
    pub selection: ModelSelection,
    pub prompts: Prompts,
    pub limits: Limits,
    registry: RegistryFactory,
}

impl AgentEnv {
    /// An environment with default prompts and limits and the built-in
    /// tools.
    pub fn new(gateway: Arc<dyn ResponseGateway>) -> Self {
        Self {
            gateway,
            selection: ModelSelection::default(),
            prompts: Prompts::default(),
            limits: Limits::default(),
            registry: builtin_registry(ToolsConfig::default()),
        }
    }

    /// An environment configured from `config`.
    pub fn from_config(gateway: Arc<dyn ResponseGateway>, config: &Config) -> Self {
        Self {
            gateway,
            selection: ModelSelection::fixed(config.model()),
            prompts: config.prompts(),
            limits: config.limits(),
            registry: builtin_registry(config.tools()),
        }
    }

    /// Replace how tool registries are built.
    pub fn with_registry<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> ToolRegistry + Send + Sync + 'static,
    {
        self.registry = Arc::new(factory);
        self
    }

    pub fn with_selection(mut self, selection: ModelSelection) -> Self {
        self.selection = selection;
        self
    }

    pub fn with_prompts(mut self, prompts: Prompts) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// A fresh registry for one interaction.
    pub fn open_registry(&self) -> ToolRegistry {
        (self.registry)()
    }

    /// Count what the next request would send and turn it into a battery
    /// reading. A failed count yields [`Battery::CountingFailed`].
    pub async fn measure_battery(
        &self,
        previous: &[Interaction],
        current: &Interaction,
        tools: &[ToolSchema],
    ) -> Battery {
        let messages = build_history(previous, current, &self.prompts.suffix, HistoryMode::TokenCount);
        let request = TokenCountRequest {
            model: self.selection.current(),
            system: self.prompts.system.clone(),
            messages,
            tools: tools.to_vec(),
        };
        let count = self.gateway.count_tokens(request).await;
        let battery = Battery::from_count(count, self.limits.max_input_tokens);
        if battery == Battery::CountingFailed {
            warn!("Token counting failed, battery unknown");
        }
        battery
    }
}

fn builtin_registry(tools: ToolsConfig) -> RegistryFactory {
    Arc::new(move || ToolRegistry::open(&tools))
}
