//! Typed events produced from agent output.

use serde::{Deserialize, Serialize};

/// Category of an in-band error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A runtime module could not be imported.
    MissingModule,
    /// A file the agent needed does not exist.
    MissingFile,
    /// The completion service rejected the request.
    UpstreamRequestError,
    /// The completion service could not be reached.
    ConnectivityError,
    /// The execution unit could not be started.
    LaunchFailed,
    /// stderr output that matched no known signature.
    Unclassified,
}

impl ErrorKind {
    /// Stable label used on the wire.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::MissingModule => "missing_module",
            Self::MissingFile => "missing_file",
            Self::UpstreamRequestError => "upstream_request_error",
            Self::ConnectivityError => "connectivity_error",
            Self::LaunchFailed => "launch_failed",
            Self::Unclassified => "unclassified",
        }
    }

    /// Human-readable description shown to the end user.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::MissingModule => {
                "Missing Python module in agent runtime. Check logs for details."
            }
            Self::MissingFile => "File not found in agent runtime. Check logs for details.",
            Self::UpstreamRequestError => {
                "API request error. Check token format and permissions."
            }
            Self::ConnectivityError => {
                "Connection error. Check network settings and API endpoints."
            }
            Self::LaunchFailed => "Agent could not be started. Check logs for details.",
            Self::Unclassified => "Agent execution error. Check logs for details.",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Event emitted while relaying one agent turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProtocolEvent {
    /// Fragment of the currently open reply.
    ContentChunk { text: String },
    /// Start of a separate reply.
    NewMessageBoundary { text: String },
    /// Diagnostic note; never part of the reply content.
    DebugNote { text: String },
    /// The turn finished.
    Completion { total_chars: usize },
    /// Something went wrong while the stream was open.
    Error { kind: ErrorKind, detail: String },
}

impl ProtocolEvent {
    #[must_use]
    pub fn content(text: impl Into<String>) -> Self {
        Self::ContentChunk { text: text.into() }
    }

    #[must_use]
    pub fn new_message(text: impl Into<String>) -> Self {
        Self::NewMessageBoundary { text: text.into() }
    }

    #[must_use]
    pub fn debug(text: impl Into<String>) -> Self {
        Self::DebugNote { text: text.into() }
    }

    #[must_use]
    pub fn error(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self::Error {
            kind,
            detail: detail.into(),
        }
    }

    #[must_use]
    pub const fn is_completion(&self) -> bool {
        matches!(self, Self::Completion { .. })
    }

    /// Approximate size, for history accounting.
    #[must_use]
    pub fn approx_bytes(&self) -> usize {
        const OVERHEAD: usize = 16;
        match self {
            Self::ContentChunk { text }
            | Self::NewMessageBoundary { text }
            | Self::DebugNote { text } => OVERHEAD + text.len(),
            Self::Error { detail, .. } => OVERHEAD + detail.len(),
            Self::Completion { .. } => OVERHEAD,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_are_stable() {
        assert_eq!(ErrorKind::MissingModule.label(), "missing_module");
        assert_eq!(ErrorKind::Unclassified.to_string(), "unclassified");
        let json = serde_json::to_string(&ErrorKind::ConnectivityError).unwrap();
        assert_eq!(json, "\"connectivity_error\"");
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let json = serde_json::to_value(ProtocolEvent::Completion { total_chars: 7 }).unwrap();
        assert_eq!(json["type"], "completion");
        assert_eq!(json["total_chars"], 7);
    }
}
