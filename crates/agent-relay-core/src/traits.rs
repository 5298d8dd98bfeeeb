//! Session lifecycle states and the launcher seam.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    AgentDefinition, SessionKey,
    handle::{ExecutionHandle, OutputStreams, TempArtifacts},
};

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Resources allocated, execution unit not yet confirmed live.
    Starting,
    /// Output stream open and being read.
    Streaming,
    /// Producer finished; reading remaining stderr and exit status.
    Draining,
    /// Containerized turn finished; container kept for a follow-up turn.
    Idle,
    /// All resources released.
    Closed,
}

impl SessionState {
    /// Whether a turn is in flight that new requests should attach to.
    #[must_use]
    pub const fn is_turn_active(self) -> bool {
        matches!(self, Self::Starting | Self::Streaming | Self::Draining)
    }
}

/// What to launch.
pub struct LaunchSpec {
    pub agent: AgentDefinition,
    pub key: SessionKey,
    /// Synthesized files; ownership passes to the launcher.
    pub artifacts: TempArtifacts,
}

/// A running execution unit.
pub struct LaunchedUnit {
    pub handle: ExecutionHandle,
    pub output: OutputStreams,
    pub artifacts: TempArtifacts,
}

/// Launch error.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("Spawn failed: {0}")]
    SpawnFailed(String),
    #[error("Executable not found: {0}")]
    ExecutableNotFound(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Command build error: {0}")]
    CommandBuild(String),
}

/// Starts execution units.
///
/// On error the launcher has already released the artifacts it was given.
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self, spec: LaunchSpec) -> Result<LaunchedUnit, LaunchError>;
}
