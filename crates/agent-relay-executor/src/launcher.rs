//! Starting entrypoints as direct processes or containers.

use std::{
    io::{self, Write},
    path::{Path, PathBuf},
    process::Stdio,
};

use agent_relay_core::{
    ContainerHandle, ExecutionHandle, IsolationMode, LaunchError, LaunchSpec, LaunchedUnit,
    Launcher, OutputStreams, RelayConfig, SessionKey, TempArtifacts,
};
use async_trait::async_trait;
use command_group::AsyncCommandGroup;

use crate::{
    command::{CommandBuildError, CommandBuilder},
    docker::{DEPENDENCY_MANIFEST, DockerCli, ImageBuilder, Mounts},
    entrypoint::RUNTIME_MODULE,
};

impl From<CommandBuildError> for LaunchError {
    fn from(err: CommandBuildError) -> Self {
        match err {
            CommandBuildError::NotFound(program) => Self::ExecutableNotFound(program),
            other => Self::CommandBuild(other.to_string()),
        }
    }
}

/// Launches agents the way their definition asks for.
#[derive(Debug, Clone)]
pub struct AgentLauncher {
    python: CommandBuilder,
    docker: DockerCli,
    images: ImageBuilder,
    base_image: String,
}

impl AgentLauncher {
    #[must_use]
    pub fn new(python: impl Into<String>, docker: impl Into<String>, base_image: impl Into<String>) -> Self {
        let docker = DockerCli::new(docker);
        Self {
            python: CommandBuilder::new(python).params(["-u"]),
            images: ImageBuilder::new(docker.clone()),
            docker,
            base_image: base_image.into(),
        }
    }

    #[must_use]
    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(config.python.clone(), config.docker.clone(), config.base_image.clone())
    }

    #[must_use]
    pub const fn images(&self) -> &ImageBuilder {
        &self.images
    }

    async fn launch_direct(&self, entrypoint: &Path) -> Result<(ExecutionHandle, OutputStreams), LaunchError> {
        let mut command = self
            .python
            .build_with(&[entrypoint.display().to_string()])?
            .into_command()
            .await?;
        command
            .env("PYTHONUNBUFFERED", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = entrypoint.parent() {
            command.current_dir(dir);
        }

        let mut child = command
            .group_spawn()
            .map_err(|e| LaunchError::SpawnFailed(e.to_string()))?;
        let output = OutputStreams::take_from(&mut child)?;
        tracing::info!(pid = ?child.id(), "Agent process started");
        Ok((ExecutionHandle::Process(child), output))
    }

    async fn launch_container(
        &self,
        spec: &LaunchSpec,
        artifacts: &mut TempArtifacts,
    ) -> Result<(ExecutionHandle, OutputStreams), LaunchError> {
        let entrypoint = artifacts
            .entrypoint()
            .cloned()
            .ok_or_else(|| LaunchError::SpawnFailed("no entrypoint to mount".into()))?;

        let manifest = write_manifest(&entrypoint).await?;
        artifacts.set_manifest(manifest.clone());

        let mounts = Mounts {
            runtime: absolute(&runtime_beside(&entrypoint))?,
            entrypoint: absolute(&entrypoint)?,
            manifest: absolute(&manifest)?,
        };

        let name = DockerCli::container_name(&spec.key);
        self.docker.remove_container(&name).await;

        let image = self.select_image(spec).await;
        let id = self
            .docker
            .run_detached(&name, &image, &mounts)
            .await
            .map_err(|e| LaunchError::SpawnFailed(e.to_string()))?;
        tracing::info!(container = %name, %image, %id, "Container started");

        let mut follower = match self.docker.follow_logs(&name).await {
            Ok(follower) => follower,
            Err(e) => {
                self.docker.remove_container(&name).await;
                return Err(LaunchError::SpawnFailed(format!("log follower: {e}")));
            }
        };
        let output = match OutputStreams::take_from(&mut follower) {
            Ok(output) => output,
            Err(e) => {
                let _ = follower.kill().await;
                self.docker.remove_container(&name).await;
                return Err(e.into());
            }
        };

        let handle = ContainerHandle::new(name, self.docker.program(), follower);
        Ok((ExecutionHandle::Container(handle), output))
    }

    /// The agent's own image if built, else the base image plus a background build.
    async fn select_image(&self, spec: &LaunchSpec) -> String {
        let image = DockerCli::image_name(&spec.agent.name);
        if self.docker.image_exists(&image).await {
            return image;
        }
        tracing::info!(
            agent = %spec.agent.name,
            base = %self.base_image,
            "Agent image not built yet, using base image"
        );
        self.images.spawn_build(&spec.agent);
        self.base_image.clone()
    }
}

#[async_trait]
impl Launcher for AgentLauncher {
    async fn launch(&self, mut spec: LaunchSpec) -> Result<LaunchedUnit, LaunchError> {
        let mut artifacts = std::mem::take(&mut spec.artifacts);

        let mode = spec.agent.isolation();
        tracing::info!(agent = %spec.agent.name, session = %spec.key, ?mode, "Launching agent");

        let launched = match mode {
            IsolationMode::Direct => match artifacts.entrypoint().cloned() {
                Some(entrypoint) => self.launch_direct(&entrypoint).await,
                None => Err(LaunchError::SpawnFailed("no entrypoint to run".into())),
            },
            IsolationMode::Container => self.launch_container(&spec, &mut artifacts).await,
        };

        match launched {
            Ok((handle, output)) => Ok(LaunchedUnit {
                handle,
                output,
                artifacts,
            }),
            Err(e) => {
                tracing::error!(agent = %spec.agent.name, "Launch failed: {e}");
                release_quietly(&mut artifacts, &spec.key);
                Err(e)
            }
        }
    }
}

/// The runtime module sits next to every entrypoint.
fn runtime_beside(entrypoint: &Path) -> PathBuf {
    entrypoint
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(format!("{RUNTIME_MODULE}.py"))
}

fn absolute(path: &Path) -> Result<PathBuf, LaunchError> {
    Ok(std::path::absolute(path)?)
}

async fn write_manifest(entrypoint: &Path) -> Result<PathBuf, LaunchError> {
    let dir = entrypoint
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();
    let path = tokio::task::spawn_blocking(move || -> io::Result<PathBuf> {
        let mut file = tempfile::Builder::new()
            .prefix("agent_req_")
            .suffix(".txt")
            .tempfile_in(&dir)?;
        file.write_all(DEPENDENCY_MANIFEST.as_bytes())?;
        file.flush()?;
        let (_, path) = file.keep().map_err(|e| e.error)?;
        Ok(path)
    })
    .await
    .map_err(io::Error::other)??;
    Ok(path)
}

fn release_quietly(artifacts: &mut TempArtifacts, key: &SessionKey) {
    if let Err(e) = artifacts.release() {
        tracing::warn!(session = %key, "Failed to delete temp files: {e}");
    }
}

#[cfg(test)]
mod tests {
    use agent_relay_core::AgentDefinition;
    use tokio::io::AsyncReadExt;

    use super::*;

    fn direct_agent(dir: &Path) -> AgentDefinition {
        AgentDefinition {
            name: "echo".into(),
            source_path: dir.join("echo/agent.py"),
            container_descriptor: None,
        }
    }

    fn spec_for(agent: AgentDefinition, entrypoint: PathBuf) -> LaunchSpec {
        LaunchSpec {
            agent,
            key: SessionKey::new("user-token", "echo"),
            artifacts: TempArtifacts::new(entrypoint),
        }
    }

    #[tokio::test]
    async fn test_direct_launch_captures_output() {
        let dir = tempfile::tempdir().unwrap();
        let entry = dir.path().join("agent_test.sh");
        std::fs::write(&entry, "echo 'DATA:\"hi\"'\necho oops >&2\necho DONE\n").unwrap();

        // `sh` stands in for the interpreter; `-u` is harmless for it.
        let launcher = AgentLauncher::new("sh", "docker", "python:3.9-slim");
        let mut unit = launcher
            .launch(spec_for(direct_agent(dir.path()), entry.clone()))
            .await
            .unwrap();

        let mut out = String::new();
        unit.output.stdout.read_to_string(&mut out).await.unwrap();
        let mut err = String::new();
        unit.output.stderr.read_to_string(&mut err).await.unwrap();
        assert_eq!(out, "DATA:\"hi\"\nDONE\n");
        assert_eq!(err, "oops\n");
        assert!(unit.handle.container_name().is_none());
        assert_eq!(unit.artifacts.entrypoint(), Some(&entry));

        unit.handle.finish(std::time::Duration::from_secs(5)).await.unwrap();
        unit.artifacts.release().unwrap();
    }

    #[tokio::test]
    async fn test_failed_launch_releases_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let entry = dir.path().join("agent_test.py");
        std::fs::write(&entry, "pass").unwrap();

        let launcher = AgentLauncher::new("no-such-python-xyz", "docker", "python:3.9-slim");
        let err = launcher
            .launch(spec_for(direct_agent(dir.path()), entry.clone()))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, LaunchError::ExecutableNotFound(_)));
        assert!(!entry.exists());
    }

    #[tokio::test]
    async fn test_failed_container_launch_releases_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let entry = dir.path().join("agent_test.py");
        std::fs::write(&entry, "pass").unwrap();
        let agent = AgentDefinition {
            container_descriptor: Some(dir.path().join("echo/Dockerfile")),
            ..direct_agent(dir.path())
        };

        // Every CLI call fails, so `run` is rejected after the manifest is written.
        let launcher = AgentLauncher::new("python3", "false", "python:3.9-slim");
        let err = launcher.launch(spec_for(agent, entry.clone())).await.err().unwrap();
        assert!(matches!(err, LaunchError::SpawnFailed(_)));
        assert!(!entry.exists());

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().starts_with("agent_req_"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
