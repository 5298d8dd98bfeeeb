//! Execution side of the relay.
//!
//! Provides:
//! - `EntrypointSynthesizer` - builds the script that binds a conversation to agent code
//! - `AgentLauncher` - starts entrypoints as child processes or containers
//! - `protocol` - the agent stdout wire format and its translation into events
//! - Command building utilities

pub mod command;
pub mod docker;
pub mod entrypoint;
pub mod launcher;
pub mod protocol;
pub mod resolve;

pub use command::{CommandBuildError, CommandBuilder, CommandParts};
pub use docker::{DockerCli, ImageBuilder};
pub use entrypoint::{EntrypointSynthesizer, RUNTIME_MODULE, SynthesisError};
pub use launcher::AgentLauncher;
pub use protocol::{ProtocolTranslator, classify_stderr, translate};
pub use resolve::resolve_executable_path;
