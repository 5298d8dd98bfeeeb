//! Execution handles and the temporary files a session owns.

use std::{io, path::PathBuf, process::ExitStatus, time::Duration};

use command_group::AsyncGroupChild;
use tokio::{io::AsyncRead, process::Command};

/// Boxed byte source for captured output.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Captured stdout and stderr of a launched unit.
pub struct OutputStreams {
    pub stdout: BoxedReader,
    pub stderr: BoxedReader,
}

impl OutputStreams {
    #[must_use]
    pub fn new(
        stdout: impl AsyncRead + Send + Unpin + 'static,
        stderr: impl AsyncRead + Send + Unpin + 'static,
    ) -> Self {
        Self {
            stdout: Box::new(stdout),
            stderr: Box::new(stderr),
        }
    }

    /// Take the pipes of a spawned child.
    ///
    /// # Errors
    /// Returns error if the child was spawned without piped output.
    pub fn take_from(child: &mut AsyncGroupChild) -> io::Result<Self> {
        let inner = child.inner();
        let stdout = inner
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("stdout was not captured"))?;
        let stderr = inner
            .stderr
            .take()
            .ok_or_else(|| io::Error::other("stderr was not captured"))?;
        Ok(Self::new(stdout, stderr))
    }
}

/// A named container plus the process following its logs.
pub struct ContainerHandle {
    pub name: String,
    /// Container CLI used for teardown.
    pub docker: String,
    follower: Option<AsyncGroupChild>,
}

impl ContainerHandle {
    #[must_use]
    pub fn new(name: impl Into<String>, docker: impl Into<String>, follower: AsyncGroupChild) -> Self {
        Self {
            name: name.into(),
            docker: docker.into(),
            follower: Some(follower),
        }
    }

    /// Stop following logs. The container itself keeps running.
    pub async fn detach(&mut self) {
        if let Some(mut follower) = self.follower.take() {
            if let Err(e) = follower.kill().await {
                tracing::debug!(container = %self.name, "Log follower already gone: {e}");
            }
        }
    }

    /// Force-remove the container.
    ///
    /// # Errors
    /// Returns error if the container CLI cannot be run or reports failure.
    pub async fn remove(&mut self) -> io::Result<()> {
        self.detach().await;
        let output = Command::new(&self.docker)
            .args(["rm", "-f", &self.name])
            .kill_on_drop(true)
            .output()
            .await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(io::Error::other(format!(
                "{} rm -f {} failed: {}",
                self.docker,
                self.name,
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

/// Ownership of whatever is executing an agent turn.
pub enum ExecutionHandle {
    /// Direct child process (own process group).
    Process(AsyncGroupChild),
    /// Detached container.
    Container(ContainerHandle),
}

impl ExecutionHandle {
    #[must_use]
    pub fn container_name(&self) -> Option<&str> {
        match self {
            Self::Process(_) => None,
            Self::Container(c) => Some(&c.name),
        }
    }

    /// Wait for a direct process to exit, killing it after `grace`.
    ///
    /// Containers are left running; only their log follower is stopped.
    pub async fn finish(&mut self, grace: Duration) -> io::Result<Option<ExitStatus>> {
        match self {
            Self::Process(child) => {
                if let Ok(status) = tokio::time::timeout(grace, child.wait()).await {
                    return status.map(Some);
                }
                tracing::warn!("Agent process did not exit after output ended, killing it");
                child.kill().await?;
                Ok(None)
            }
            Self::Container(container) => {
                container.detach().await;
                Ok(None)
            }
        }
    }

    /// Kill the process group, or stop and remove the container.
    pub async fn terminate(&mut self) -> io::Result<()> {
        match self {
            Self::Process(child) => {
                if child.try_wait()?.is_some() {
                    return Ok(());
                }
                match child.kill().await {
                    Ok(()) => Ok(()),
                    // Exited between the check and the kill.
                    Err(_) if matches!(child.try_wait(), Ok(Some(_))) => Ok(()),
                    Err(e) => Err(e),
                }
            }
            Self::Container(container) => container.remove().await,
        }
    }
}

/// Temporary files produced for one launch.
///
/// Releasing is idempotent; files already gone are not an error.
#[derive(Debug, Default)]
pub struct TempArtifacts {
    entrypoint: Option<PathBuf>,
    manifest: Option<PathBuf>,
}

impl TempArtifacts {
    #[must_use]
    pub const fn new(entrypoint: PathBuf) -> Self {
        Self {
            entrypoint: Some(entrypoint),
            manifest: None,
        }
    }

    pub fn set_manifest(&mut self, manifest: PathBuf) {
        self.manifest = Some(manifest);
    }

    #[must_use]
    pub const fn entrypoint(&self) -> Option<&PathBuf> {
        self.entrypoint.as_ref()
    }

    #[must_use]
    pub const fn manifest(&self) -> Option<&PathBuf> {
        self.manifest.as_ref()
    }

    #[must_use]
    pub const fn is_released(&self) -> bool {
        self.entrypoint.is_none() && self.manifest.is_none()
    }

    /// Delete all owned files.
    ///
    /// # Errors
    /// Returns the first removal error other than "not found"; the path is
    /// kept so a later call can retry.
    pub fn release(&mut self) -> io::Result<()> {
        for slot in [&mut self.entrypoint, &mut self.manifest] {
            if let Some(path) = slot.as_ref() {
                match std::fs::remove_file(path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e),
                }
                *slot = None;
            }
        }
        Ok(())
    }
}
