//! Core types for relaying agent script output.
//!
//! This crate provides the fundamental building blocks:
//! - `Conversation` / `AgentCatalog` - what gets run
//! - `ProtocolEvent` - typed events relayed to clients
//! - `EventStore` - broadcast + history so late subscribers see a whole turn
//! - `ExecutionHandle` / `TempArtifacts` - resources a session owns
//! - `Launcher` trait - the seam between sessions and execution

pub mod agent;
pub mod config;
pub mod context;
pub mod conversation;
pub mod event;
pub mod event_store;
pub mod handle;
pub mod traits;

pub use agent::{AgentCatalog, AgentDefinition, CatalogError, IsolationMode};
pub use config::{ConfigError, RelayConfig};
pub use context::{SessionKey, StreamRequest};
pub use conversation::{Conversation, Message, Role};
pub use event::{ErrorKind, ProtocolEvent};
pub use event_store::EventStore;
pub use handle::{ContainerHandle, ExecutionHandle, OutputStreams, TempArtifacts};
pub use traits::{LaunchError, LaunchSpec, LaunchedUnit, Launcher, SessionState};
