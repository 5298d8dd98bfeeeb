//! Agent stdout wire protocol and its translation into events.

pub mod stderr;
pub mod translator;
pub mod wire;

pub use stderr::{StderrDiagnosis, classify_stderr};
pub use translator::{LineOutcome, ProtocolTranslator, translate};
pub use wire::{TERMINAL_MARKER, decode_payload, encode_payload};
