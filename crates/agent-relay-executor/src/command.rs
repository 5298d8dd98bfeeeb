//! Command building utilities.

use std::path::PathBuf;

use thiserror::Error;
use tokio::process::Command;

use crate::resolve::resolve_executable_path;

/// Command build error.
#[derive(Debug, Error)]
pub enum CommandBuildError {
    #[error("Base command cannot be parsed: {0}")]
    InvalidBase(String),
    #[error("Base command is empty after parsing")]
    EmptyCommand,
    #[error("Executable not found: {0}")]
    NotFound(String),
}

/// Parsed command parts (program + args).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandParts {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandParts {
    #[must_use]
    pub const fn new(program: String, args: Vec<String>) -> Self {
        Self { program, args }
    }

    /// Resolve the program to an absolute path.
    ///
    /// # Errors
    /// Returns error if executable not found.
    pub async fn into_resolved(self) -> Result<(PathBuf, Vec<String>), CommandBuildError> {
        let Self { program, args } = self;
        let executable = resolve_executable_path(&program)
            .await
            .ok_or(CommandBuildError::NotFound(program))?;
        Ok((executable, args))
    }

    /// Resolve the program and build a ready-to-configure command.
    ///
    /// # Errors
    /// Returns error if executable not found.
    pub async fn into_command(self) -> Result<Command, CommandBuildError> {
        let (executable, args) = self.into_resolved().await?;
        let mut command = Command::new(executable);
        command.args(args);
        Ok(command)
    }
}

/// Builder for commands whose base comes from configuration
/// (e.g. `python3`, `uv run python`, `podman`).
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    /// Base command line, split shell-style.
    pub base: String,
    /// Parameters appended after the base.
    pub params: Vec<String>,
}

impl CommandBuilder {
    #[must_use]
    pub fn new<S: Into<String>>(base: S) -> Self {
        Self {
            base: base.into(),
            params: Vec::new(),
        }
    }

    /// Append parameters.
    #[must_use]
    pub fn params<I>(mut self, more: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.params.extend(more.into_iter().map(Into::into));
        self
    }

    /// Build the command with no trailing arguments.
    ///
    /// # Errors
    /// Returns error if the base command is invalid or empty.
    pub fn build(&self) -> Result<CommandParts, CommandBuildError> {
        self.build_with(&[])
    }

    /// Build the command with extra trailing arguments.
    ///
    /// # Errors
    /// Returns error if the base command is invalid or empty.
    pub fn build_with(&self, trailing: &[String]) -> Result<CommandParts, CommandBuildError> {
        let mut parts = split_command_line(&self.base)?;
        parts.extend(self.params.iter().cloned());
        parts.extend(trailing.iter().cloned());

        if parts.is_empty() {
            return Err(CommandBuildError::EmptyCommand);
        }

        let program = parts.remove(0);
        Ok(CommandParts::new(program, parts))
    }
}

fn split_command_line(input: &str) -> Result<Vec<String>, CommandBuildError> {
    #[cfg(windows)]
    {
        let parts = winsplit::split(input);
        if parts.is_empty() {
            Err(CommandBuildError::EmptyCommand)
        } else {
            Ok(parts)
        }
    }

    #[cfg(not(windows))]
    {
        shlex::split(input).ok_or_else(|| CommandBuildError::InvalidBase(input.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_with_arguments() {
        let parts = tokio_test::assert_ok!(
            CommandBuilder::new("uv run python")
                .params(["-u"])
                .build_with(&["/tmp/agent_x.py".to_string()])
        );
        assert_eq!(parts.program, "uv");
        assert_eq!(parts.args, vec!["run", "python", "-u", "/tmp/agent_x.py"]);
    }

    #[test]
    fn test_quoted_base() {
        let parts =
            tokio_test::assert_ok!(CommandBuilder::new("'/opt/my python/bin/python3'").build());
        assert_eq!(parts.program, "/opt/my python/bin/python3");
        assert!(parts.args.is_empty());
    }

    #[test]
    fn test_invalid_and_empty_base() {
        assert!(matches!(
            CommandBuilder::new("python \"unterminated").build(),
            Err(CommandBuildError::InvalidBase(_))
        ));
        assert!(matches!(
            CommandBuilder::new("   ").build(),
            Err(CommandBuildError::EmptyCommand)
        ));
    }

    #[tokio::test]
    async fn test_unresolvable_program() {
        let parts = CommandBuilder::new("no-such-interpreter-xyz").build().unwrap();
        assert!(matches!(
            parts.into_resolved().await,
            Err(CommandBuildError::NotFound(name)) if name == "no-such-interpreter-xyz"
        ));
    }
}
