//! Agent definitions and the on-disk agent catalog.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// File holding an agent's business logic.
pub const AGENT_SOURCE_FILE: &str = "agent.py";

/// Presence of this file marks an agent as containerized.
pub const CONTAINER_DESCRIPTOR_FILE: &str = "Dockerfile";

/// How an agent invocation is isolated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationMode {
    /// Plain child process on the host.
    Direct,
    /// Named container instance.
    Container,
}

/// A resolved agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentDefinition {
    pub name: String,
    pub source_path: PathBuf,
    /// Container build file, if the agent ships one.
    pub container_descriptor: Option<PathBuf>,
}

impl AgentDefinition {
    #[must_use]
    pub const fn isolation(&self) -> IsolationMode {
        if self.container_descriptor.is_some() {
            IsolationMode::Container
        } else {
            IsolationMode::Direct
        }
    }

    /// Directory holding the agent files (the image build context).
    #[must_use]
    pub fn dir(&self) -> &Path {
        self.source_path.parent().unwrap_or_else(|| Path::new("."))
    }
}

/// Catalog error.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Agent '{0}' not found")]
    NotFound(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Read-only view over the agents directory.
#[derive(Debug, Clone)]
pub struct AgentCatalog {
    root: PathBuf,
}

impl AgentCatalog {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve an agent by name.
    ///
    /// Names that could escape the agents directory are treated as unknown.
    pub async fn resolve(&self, name: &str) -> Result<AgentDefinition, CatalogError> {
        if !is_valid_name(name) {
            return Err(CatalogError::NotFound(name.to_string()));
        }

        let dir = self.root.join(name);
        let source_path = dir.join(AGENT_SOURCE_FILE);
        if !tokio::fs::try_exists(&source_path).await.unwrap_or(false) {
            tracing::debug!(agent = name, path = %source_path.display(), "Agent source missing");
            return Err(CatalogError::NotFound(name.to_string()));
        }

        let descriptor = dir.join(CONTAINER_DESCRIPTOR_FILE);
        let container_descriptor = tokio::fs::try_exists(&descriptor)
            .await
            .unwrap_or(false)
            .then_some(descriptor);

        Ok(AgentDefinition {
            name: name.to_string(),
            source_path,
            container_descriptor,
        })
    }

    /// List the names of all agents with a source file, sorted.
    pub async fn list(&self) -> Result<Vec<String>, CatalogError> {
        let mut names = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if is_valid_name(&name)
                && tokio::fs::try_exists(entry.path().join(AGENT_SOURCE_FILE))
                    .await
                    .unwrap_or(false)
            {
                names.push(name);
            }
        }

        names.sort();
        Ok(names)
    }
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !name.contains("..")
}
