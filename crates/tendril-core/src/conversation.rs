//! The persisted history log.

use crate::agent::AgentEnv;
use crate::error::{CoreError, CoreResult};
use crate::interaction::Interaction;
use crate::render::RenderSink;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Every interaction so far, oldest first.
///
/// Interactions are only ever appended. Loading rebuilds the log from its
/// JSON document; nothing else carries over between runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Conversation {
    interactions: Vec<Interaction>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interactions(&self) -> &[Interaction] {
        &self.interactions
    }

    pub fn len(&self) -> usize {
        self.interactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interactions.is_empty()
    }

    pub fn last(&self) -> Option<&Interaction> {
        self.interactions.last()
    }

    /// Load a saved conversation. A missing file is an empty conversation.
    pub async fn load(path: &Path) -> CoreResult<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "No saved conversation");
            return Ok(Self::new());
        }
        let content = tokio::fs::read_to_string(path).await?;
        let conversation: Self =
            serde_json::from_str(&content).map_err(|e| CoreError::InvalidSession {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        info!(
            path = %path.display(),
            interactions = conversation.len(),
            "Loaded conversation"
        );
        Ok(conversation)
    }

    /// Save as pretty JSON, creating parent directories as needed.
    pub async fn save(&self, path: &Path) -> CoreResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        debug!(path = %path.display(), "Saved conversation");
        Ok(())
    }

    /// Run a new interaction for `message` against the log and append it.
    pub async fn run_message(
        &mut self,
        message: impl Into<String>,
        env: &mut AgentEnv,
        sink: &mut dyn RenderSink,
        cancel: &CancellationToken,
    ) -> &Interaction {
        let mut interaction = Interaction::new(message);
        interaction
            .run(env, &self.interactions, sink, cancel)
            .await;
        self.interactions.push(interaction);
        &self.interactions[self.interactions.len() - 1]
    }

    /// Replay every stored interaction.
    pub fn render(&self, sink: &mut dyn RenderSink) {
        for interaction in &self.interactions {
            interaction.render(sink);
        }
    }
}
