//! Container CLI plumbing: naming, run arguments, log following and
//! background image builds.

use std::{
    collections::HashSet,
    io,
    path::{Path, PathBuf},
    process::Stdio,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use agent_relay_core::{AgentDefinition, SessionKey};
use command_group::{AsyncCommandGroup, AsyncGroupChild};
use tokio::process::Command;

use crate::command::{CommandBuildError, CommandBuilder};

/// Working directory inside the container.
pub const CONTAINER_APP_DIR: &str = "/app";

/// Pinned dependencies every containerized agent gets.
pub const DEPENDENCY_MANIFEST: &str = "openai==1.2.0\nhttpx==0.27.2\n";

/// Limit for short CLI calls (`image inspect`, `rm -f`, `run -d`).
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

const CONTAINER_COMMAND: &str =
    "pip install --quiet -r requirements.txt && python -u /app/entrypoint.py";

/// Host files mounted into a container.
#[derive(Debug, Clone)]
pub struct Mounts {
    pub entrypoint: PathBuf,
    pub manifest: PathBuf,
    pub runtime: PathBuf,
}

/// Thin wrapper over the container CLI.
#[derive(Debug, Clone)]
pub struct DockerCli {
    program: String,
    call_timeout: Duration,
}

impl DockerCli {
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    #[must_use]
    pub const fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Container name for a session: stable per (agent, identity prefix).
    #[must_use]
    pub fn container_name(key: &SessionKey) -> String {
        let prefix = key.identity_prefix();
        let prefix = if prefix.is_empty() { "anon".to_string() } else { prefix };
        format!("agent-{}-{prefix}", sanitize(key.agent()))
    }

    /// Image an agent's container descriptor builds into.
    #[must_use]
    pub fn image_name(agent: &str) -> String {
        format!("agent-{}:latest", sanitize(agent))
    }

    /// Arguments for `docker run`, detached.
    #[must_use]
    pub fn run_args(name: &str, image: &str, mounts: &Mounts) -> Vec<String> {
        let mount = |host: &Path, target: &str| {
            format!("{}:{CONTAINER_APP_DIR}/{target}:ro", host.display())
        };
        vec![
            "run".into(),
            "-d".into(),
            "--name".into(),
            name.into(),
            "-e".into(),
            "PYTHONUNBUFFERED=1".into(),
            "-v".into(),
            mount(&mounts.entrypoint, "entrypoint.py"),
            "-v".into(),
            mount(&mounts.manifest, "requirements.txt"),
            "-v".into(),
            mount(&mounts.runtime, "agent_runtime.py"),
            "-w".into(),
            CONTAINER_APP_DIR.into(),
            image.into(),
            "sh".into(),
            "-c".into(),
            CONTAINER_COMMAND.into(),
        ]
    }

    async fn command(&self, args: &[String]) -> Result<Command, CommandBuildError> {
        let mut command = CommandBuilder::new(self.program.as_str())
            .build_with(args)?
            .into_command()
            .await?;
        command.stdin(Stdio::null()).kill_on_drop(true);
        Ok(command)
    }

    async fn output(&self, args: &[String]) -> io::Result<std::process::Output> {
        self.command(args)
            .await
            .map_err(io::Error::other)?
            .output()
            .await
    }

    /// Like `output`, but a call still running after `call_timeout` is
    /// killed and reported as `TimedOut`.
    async fn bounded_output(&self, args: &[String]) -> io::Result<std::process::Output> {
        tokio::time::timeout(self.call_timeout, self.output(args))
            .await
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!(
                        "{} {} timed out after {:?}",
                        self.program,
                        args.first().map_or("", String::as_str),
                        self.call_timeout
                    ),
                )
            })?
    }

    /// Whether an image is available locally.
    pub async fn image_exists(&self, image: &str) -> bool {
        let args = ["image".to_string(), "inspect".to_string(), image.to_string()];
        match self.bounded_output(&args).await {
            Ok(output) => output.status.success(),
            Err(e) => {
                tracing::warn!(image, "Image inspection failed: {e}");
                false
            }
        }
    }

    /// Force-remove a container if it exists.
    pub async fn remove_container(&self, name: &str) {
        let args = ["rm".to_string(), "-f".to_string(), name.to_string()];
        match self.bounded_output(&args).await {
            Ok(output) if output.status.success() => {
                tracing::debug!(container = name, "Removed existing container");
            }
            Ok(output) => tracing::debug!(
                container = name,
                "No container to remove: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ),
            Err(e) => tracing::warn!(container = name, "Container removal failed: {e}"),
        }
    }

    /// Start a detached container and return its id.
    ///
    /// # Errors
    /// Returns error if the CLI cannot be run or rejects the request.
    pub async fn run_detached(&self, name: &str, image: &str, mounts: &Mounts) -> io::Result<String> {
        let output = self.bounded_output(&Self::run_args(name, image, mounts)).await?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(io::Error::other(format!(
                "{} run failed: {}",
                self.program,
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }

    /// Spawn `logs -f` for a container with piped output.
    ///
    /// # Errors
    /// Returns error if the follower cannot be spawned.
    pub async fn follow_logs(&self, name: &str) -> io::Result<AsyncGroupChild> {
        let args = ["logs".to_string(), "-f".to_string(), name.to_string()];
        self.command(&args)
            .await
            .map_err(io::Error::other)?
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .group_spawn()
    }

    /// Build an image from an agent directory, waiting for completion.
    ///
    /// # Errors
    /// Returns error if the build cannot be run or fails.
    pub async fn build_image(&self, image: &str, context: &Path) -> io::Result<()> {
        let args = [
            "build".to_string(),
            "-t".to_string(),
            image.to_string(),
            context.display().to_string(),
        ];
        let output = self.output(&args).await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(io::Error::other(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ))
        }
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect()
}

/// Runs image builds in the background, at most one per image.
#[derive(Debug, Clone)]
pub struct ImageBuilder {
    docker: DockerCli,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl ImageBuilder {
    #[must_use]
    pub fn new(docker: DockerCli) -> Self {
        Self {
            docker,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    #[must_use]
    pub fn is_building(&self, image: &str) -> bool {
        self.lock().contains(image)
    }

    /// Start building an agent's image unless a build is already running.
    ///
    /// Returns whether a new build was started. The build is never awaited
    /// here; a later launch observes it through the image check.
    pub fn spawn_build(&self, agent: &AgentDefinition) -> bool {
        let image = DockerCli::image_name(&agent.name);
        if !self.lock().insert(image.clone()) {
            tracing::debug!(%image, "Image build already in progress");
            return false;
        }

        let guard = InFlight {
            set: Arc::clone(&self.in_flight),
            image: image.clone(),
        };
        let docker = self.docker.clone();
        let context = agent.dir().to_path_buf();
        tracing::info!(%image, "Building image in background");
        tokio::spawn(async move {
            match docker.build_image(&guard.image, &context).await {
                Ok(()) => tracing::info!(image = %guard.image, "Image build finished"),
                Err(e) => tracing::error!(image = %guard.image, "Image build failed: {e}"),
            }
        });
        true
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Clears the in-flight mark when the build task ends, panics included.
struct InFlight {
    set: Arc<Mutex<HashSet<String>>>,
    image: String,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.image);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_container_name_uses_identity_prefix() {
        let key = SessionKey::new("3F9a-b7c2d4e5f6a7b8c9d0", "Research_Bot");
        assert_eq!(DockerCli::container_name(&key), "agent-research_bot-3f9ab7c2d4e5");

        let anonymous = SessionKey::new("---", "bot");
        assert_eq!(DockerCli::container_name(&anonymous), "agent-bot-anon");
    }

    #[test]
    fn test_image_name() {
        assert_eq!(DockerCli::image_name("My Agent"), "agent-my-agent:latest");
    }

    #[test]
    fn test_run_args_mount_everything_read_only() {
        let mounts = Mounts {
            entrypoint: PathBuf::from("/w/agent_1.py"),
            manifest: PathBuf::from("/w/agent_req_1.txt"),
            runtime: PathBuf::from("/w/agent_runtime.py"),
        };
        let args = DockerCli::run_args("agent-x-abc", "python:3.9-slim", &mounts);
        assert_eq!(&args[..4], ["run", "-d", "--name", "agent-x-abc"]);
        assert!(args.contains(&"/w/agent_1.py:/app/entrypoint.py:ro".to_string()));
        assert!(args.contains(&"/w/agent_req_1.txt:/app/requirements.txt:ro".to_string()));
        assert!(args.contains(&"/w/agent_runtime.py:/app/agent_runtime.py:ro".to_string()));
        assert_eq!(args.last().unwrap(), CONTAINER_COMMAND);
    }

    #[tokio::test]
    async fn test_one_build_per_image() {
        let dir = tempfile::tempdir().unwrap();
        // Stand-in CLI whose builds take a while.
        let builder = ImageBuilder::new(DockerCli::new("sh -c 'sleep 1' fake-docker"));
        let agent = AgentDefinition {
            name: "slow".into(),
            source_path: dir.path().join("slow/agent.py"),
            container_descriptor: Some(dir.path().join("slow/Dockerfile")),
        };

        assert!(builder.spawn_build(&agent));
        assert!(!builder.spawn_build(&agent));
        assert!(builder.is_building("agent-slow:latest"));

        tokio::time::timeout(Duration::from_secs(10), async {
            while builder.is_building("agent-slow:latest") {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await
        .unwrap();
        assert!(builder.spawn_build(&agent));
    }

    #[tokio::test]
    async fn test_hung_cli_calls_time_out() {
        let docker = DockerCli::new("sh -c 'sleep 30' fake-docker")
            .with_call_timeout(Duration::from_millis(100));
        let mounts = Mounts {
            entrypoint: PathBuf::from("/w/agent_1.py"),
            manifest: PathBuf::from("/w/agent_req_1.txt"),
            runtime: PathBuf::from("/w/agent_runtime.py"),
        };

        tokio::time::timeout(Duration::from_secs(5), async {
            assert!(!docker.image_exists("agent-x:latest").await);
            docker.remove_container("agent-x-abc").await;
            let err = docker
                .run_detached("agent-x-abc", "python:3.9-slim", &mounts)
                .await
                .unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        })
        .await
        .unwrap();
    }
}
