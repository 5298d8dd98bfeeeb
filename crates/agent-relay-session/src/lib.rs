//! Session orchestration for agent turns.
//!
//! Provides:
//! - `SessionRegistry` - one live session per (identity, agent)
//! - `SessionManager` - resolve, synthesize, launch and drive a turn
//! - `ReapSweeper` - periodic reclamation of idle sessions

pub mod manager;
pub mod reaper;
pub mod registry;
pub mod session;

pub use manager::{RelayError, SessionManager};
pub use reaper::{ReapSweeper, SweepReport};
pub use registry::{Claim, SessionRegistry};
pub use session::{Session, SessionResources, Teardown};
