//! Entrypoint synthesis.
//!
//! An entrypoint is a standalone script made of three parts: a header that
//! imports the fixed `agent_runtime` module, literal data binding an
//! `Environment` to one conversation, and the agent source appended
//! verbatim. The agent code sees the capability surface as the global `env`.

use std::{
    io::{self, Write},
    path::{Path, PathBuf},
};

use agent_relay_core::{Conversation, RelayConfig, TempArtifacts};
use thiserror::Error;
use tokio::sync::OnceCell;

use crate::protocol::encode_payload;

/// Import name of the runtime module.
pub const RUNTIME_MODULE: &str = "agent_runtime";

const RUNTIME_SOURCE: &str = include_str!("runtime/agent_runtime.py");

/// Synthesis error.
#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("Agent source {path} is unavailable: {source}")]
    SourceUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to serialize conversation: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Failed to write entrypoint: {0}")]
    Io(#[from] io::Error),
}

/// Builds per-invocation entrypoints in the work directory.
#[derive(Debug)]
pub struct EntrypointSynthesizer {
    work_dir: PathBuf,
    api_base_url: String,
    auth_token: String,
    default_model: String,
    runtime: OnceCell<PathBuf>,
}

impl EntrypointSynthesizer {
    #[must_use]
    pub fn new(
        work_dir: impl Into<PathBuf>,
        api_base_url: impl Into<String>,
        auth_token: impl Into<String>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            work_dir: work_dir.into(),
            api_base_url: api_base_url.into(),
            auth_token: auth_token.into(),
            default_model: default_model.into(),
            runtime: OnceCell::new(),
        }
    }

    #[must_use]
    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(
            config.work_dir.clone(),
            config.api_base_url.clone(),
            config.auth_token.clone(),
            config.default_model.clone(),
        )
    }

    #[must_use]
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Where the runtime module lives once installed.
    #[must_use]
    pub fn runtime_path(&self) -> PathBuf {
        self.work_dir.join(format!("{RUNTIME_MODULE}.py"))
    }

    /// Install the runtime module into the work directory (once per synthesizer).
    ///
    /// # Errors
    /// Returns error if the work directory or module file cannot be written.
    pub async fn install_runtime(&self) -> Result<&Path, SynthesisError> {
        let path = self
            .runtime
            .get_or_try_init(|| async {
                let work_dir = self.work_dir.clone();
                let target = self.runtime_path();
                blocking(move || {
                    std::fs::create_dir_all(&work_dir)?;
                    // Atomic replace so concurrently starting agents never import a partial file.
                    let mut staged = tempfile::Builder::new()
                        .prefix(".agent_runtime")
                        .tempfile_in(&work_dir)?;
                    staged.write_all(RUNTIME_SOURCE.as_bytes())?;
                    staged.persist(&target).map_err(|e| e.error)?;
                    Ok(target)
                })
                .await
            })
            .await?;
        tracing::debug!(path = %path.display(), "Runtime module installed");
        Ok(path.as_path())
    }

    /// Render the entrypoint script text.
    ///
    /// # Errors
    /// Returns error if the conversation cannot be serialized.
    pub fn render(
        &self,
        agent_source: &str,
        conversation: &Conversation,
        max_tokens: u32,
    ) -> Result<String, SynthesisError> {
        let messages = conversation.to_json()?;
        Ok(format!(
            "# Generated entrypoint. Agent source follows the runtime binding.\n\
             import json\n\
             from {RUNTIME_MODULE} import Environment\n\
             \n\
             env = Environment(\n    \
                 messages=json.loads({messages}),\n    \
                 api_base_url={base_url},\n    \
                 auth_token={token},\n    \
                 default_model={model},\n    \
                 max_tokens={max_tokens},\n\
             )\n\
             \n\
             {agent_source}\n",
            messages = encode_payload(&messages),
            base_url = encode_payload(&self.api_base_url),
            token = encode_payload(&self.auth_token),
            model = encode_payload(&self.default_model),
        ))
    }

    /// Write a new entrypoint for one invocation.
    ///
    /// The returned artifacts own the file; the caller decides when to release it.
    ///
    /// # Errors
    /// Returns `SourceUnavailable` if the agent source cannot be read, or an
    /// I/O error if the entrypoint cannot be written.
    pub async fn synthesize(
        &self,
        agent_source_path: &Path,
        conversation: &Conversation,
        max_tokens: u32,
    ) -> Result<TempArtifacts, SynthesisError> {
        let agent_source = tokio::fs::read_to_string(agent_source_path)
            .await
            .map_err(|source| SynthesisError::SourceUnavailable {
                path: agent_source_path.to_path_buf(),
                source,
            })?;

        self.install_runtime().await?;
        let script = self.render(&agent_source, conversation, max_tokens)?;

        let work_dir = self.work_dir.clone();
        let path = blocking(move || {
            let mut file = tempfile::Builder::new()
                .prefix("agent_")
                .suffix(".py")
                .tempfile_in(&work_dir)?;
            file.write_all(script.as_bytes())?;
            file.flush()?;
            let (_, path) = file.keep().map_err(|e| e.error)?;
            Ok(path)
        })
        .await?;

        tracing::debug!(
            entrypoint = %path.display(),
            messages = conversation.len(),
            "Entrypoint synthesized"
        );
        Ok(TempArtifacts::new(path))
    }
}

async fn blocking<T, F>(f: F) -> Result<T, SynthesisError>
where
    F: FnOnce() -> io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(io::Error::other)?
        .map_err(SynthesisError::from)
}
