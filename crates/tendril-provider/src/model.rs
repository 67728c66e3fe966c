//! Model catalogue and model selection.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Size of the input context window, in tokens.
pub const MAX_INPUT_TOKENS: u32 = 200_000;

/// Default `max_tokens` for a completion.
pub const DEFAULT_OUTPUT_TOKENS: u32 = 16_384;

/// Default extended-thinking budget.
pub const THINKING_BUDGET: u32 = 4096;

/// The models tendril knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    #[default]
    Sonnet,
    Opus,
}

impl ModelTier {
    /// Concrete model id sent to the API.
    pub fn model_id(&self) -> &'static str {
        match self {
            ModelTier::Sonnet => "claude-sonnet-4-20250514",
            ModelTier::Opus => "claude-opus-4-20250514",
        }
    }

    /// Price relative to the Sonnet base rate.
    pub fn price_multiplier(&self) -> f64 {
        match self {
            ModelTier::Sonnet => 1.0,
            ModelTier::Opus => 5.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelTier::Sonnet => "sonnet",
            ModelTier::Opus => "opus",
        }
    }
}

impl fmt::Display for ModelTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sonnet" => Ok(ModelTier::Sonnet),
            "opus" => Ok(ModelTier::Opus),
            other => Err(format!("unknown model '{other}', expected 'sonnet' or 'opus'")),
        }
    }
}

/// Which model the next request goes to.
///
/// A `OneShot` selection serves exactly one successful completion and then
/// falls back to `then`. The caller decides when a completion counts as
/// consumed and calls [`ModelSelection::consume`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ModelSelection {
    Fixed { model: ModelTier },
    OneShot { once: ModelTier, then: ModelTier },
}

impl Default for ModelSelection {
    fn default() -> Self {
        ModelSelection::fixed(ModelTier::default())
    }
}

impl ModelSelection {
    pub fn fixed(model: ModelTier) -> Self {
        ModelSelection::Fixed { model }
    }

    /// Use `once` for the next completion only, then return to the current
    /// default.
    pub fn one_shot(self, once: ModelTier) -> Self {
        ModelSelection::OneShot {
            once,
            then: self.default_model(),
        }
    }

    /// Model for the next request.
    pub fn current(&self) -> ModelTier {
        match self {
            ModelSelection::Fixed { model } => *model,
            ModelSelection::OneShot { once, .. } => *once,
        }
    }

    /// Model used once any one-shot override is spent.
    pub fn default_model(&self) -> ModelTier {
        match self {
            ModelSelection::Fixed { model } => *model,
            ModelSelection::OneShot { then, .. } => *then,
        }
    }

    /// Mark one completion as served. Resets a one-shot override.
    pub fn consume(&mut self) {
        if let ModelSelection::OneShot { then, .. } = *self {
            *self = ModelSelection::fixed(then);
        }
    }

    pub fn is_one_shot(&self) -> bool {
        matches!(self, ModelSelection::OneShot { .. })
    }
}
