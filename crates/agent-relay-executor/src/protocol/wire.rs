//! Line format written by entrypoints on stdout.
//!
//! Each payload is a JSON string literal, so arbitrary text (newlines,
//! quotes, control characters, non-ASCII) always fits on one line.

/// Content chunk of the open reply.
pub const DATA_PREFIX: &str = "DATA:";
/// Start of a separate reply.
pub const NEW_MESSAGE_PREFIX: &str = "NEW_MESSAGE:";
/// Diagnostic note, raw text.
pub const DEBUG_PREFIX: &str = "DEBUG:";
/// Written alone on a line when the agent finishes its turn.
pub const TERMINAL_MARKER: &str = "DONE";

/// Encode a payload as a single-line JSON string literal.
#[must_use]
pub fn encode_payload(text: &str) -> String {
    serde_json::Value::String(text.to_owned()).to_string()
}

/// Decode a payload produced by [`encode_payload`] (or Python's `json.dumps`).
///
/// # Errors
/// Returns error if the payload is not a JSON string literal.
pub fn decode_payload(payload: &str) -> Result<String, serde_json::Error> {
    serde_json::from_str::<String>(payload.trim())
}

/// Format a full `DATA:` line (without the trailing newline).
#[must_use]
pub fn data_line(text: &str) -> String {
    format!("{DATA_PREFIX}{}", encode_payload(text))
}

/// Format a full `NEW_MESSAGE:` line (without the trailing newline).
#[must_use]
pub fn new_message_line(text: &str) -> String {
    format!("{NEW_MESSAGE_PREFIX}{}", encode_payload(text))
}
