//! Turns agent output lines into protocol events.

use std::{collections::VecDeque, future::Future};

use agent_relay_core::{ErrorKind, ProtocolEvent};
use futures::Stream;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

use super::{
    stderr::classify_stderr,
    wire::{DATA_PREFIX, DEBUG_PREFIX, NEW_MESSAGE_PREFIX, TERMINAL_MARKER, decode_payload},
};

/// Log progress every this many streamed characters.
const PROGRESS_LOG_CHARS: usize = 500;

/// Result of translating one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineOutcome {
    Event(ProtocolEvent),
    /// The terminal marker; no further lines belong to this turn.
    Terminal,
    /// Blank line.
    Skip,
}

/// Stateful line classifier for one turn.
#[derive(Debug, Default)]
pub struct ProtocolTranslator {
    total_chars: usize,
    /// Whether the previous classified line was unprefixed content.
    after_bare_line: bool,
}

impl ProtocolTranslator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Characters emitted as content or new-message text so far.
    #[must_use]
    pub const fn total_chars(&self) -> usize {
        self.total_chars
    }

    /// Classify one output line (trailing newline optional).
    pub fn translate_line(&mut self, raw: &str) -> LineOutcome {
        let line = raw.trim_end_matches(['\n', '\r']);
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return LineOutcome::Skip;
        }

        if let Some(rest) = trimmed.strip_prefix(NEW_MESSAGE_PREFIX) {
            self.after_bare_line = false;
            let text = decode_or_raw(rest);
            self.count(&text);
            return LineOutcome::Event(ProtocolEvent::NewMessageBoundary { text });
        }

        if let Some(rest) = trimmed.strip_prefix(DATA_PREFIX) {
            let mut text = decode_or_raw(rest);
            if self.after_bare_line {
                text.insert(0, '\n');
            }
            self.after_bare_line = false;
            self.count(&text);
            return LineOutcome::Event(ProtocolEvent::ContentChunk { text });
        }

        if let Some(rest) = trimmed.strip_prefix(DEBUG_PREFIX) {
            self.after_bare_line = false;
            let note = rest.trim();
            tracing::debug!(note, "Agent debug note");
            return LineOutcome::Event(ProtocolEvent::debug(note));
        }

        if trimmed == TERMINAL_MARKER {
            self.after_bare_line = false;
            return LineOutcome::Terminal;
        }

        // Agent code printing straight to stdout.
        let body = line.trim_end();
        let text = if self.after_bare_line {
            format!("\n{body}")
        } else {
            body.to_string()
        };
        self.after_bare_line = true;
        self.count(&text);
        LineOutcome::Event(ProtocolEvent::ContentChunk { text })
    }

    /// Closing events once output has ended: an optional error, then completion.
    #[must_use]
    pub fn finish(&self, stderr: &str) -> Vec<ProtocolEvent> {
        let mut events = Vec::with_capacity(2);
        if let Some(diagnosis) = classify_stderr(stderr) {
            tracing::error!(kind = %diagnosis.kind, "Agent error: {stderr}");
            events.push(ProtocolEvent::error(diagnosis.kind, diagnosis.detail()));
        } else if !stderr.trim().is_empty() {
            tracing::debug!("Ignoring benign agent stderr: {stderr}");
        }
        tracing::info!(
            total_chars = self.total_chars,
            "Agent streaming completed"
        );
        events.push(ProtocolEvent::Completion {
            total_chars: self.total_chars,
        });
        events
    }

    fn count(&mut self, text: &str) {
        let added = text.chars().count();
        let before = self.total_chars;
        self.total_chars += added;
        if before / PROGRESS_LOG_CHARS != self.total_chars / PROGRESS_LOG_CHARS {
            tracing::info!("Streamed {} characters so far", self.total_chars);
        }
    }
}

fn decode_or_raw(rest: &str) -> String {
    decode_payload(rest).unwrap_or_else(|e| {
        tracing::debug!("Payload is not an encoded string ({e}), passing through raw");
        rest.to_string()
    })
}

struct TranslateState<R, F, T> {
    reader: BufReader<R>,
    stderr: Option<F>,
    on_line: T,
    translator: ProtocolTranslator,
    pending: VecDeque<ProtocolEvent>,
    buf: Vec<u8>,
    done: bool,
}

impl<R, F, T> TranslateState<R, F, T>
where
    F: Future<Output = String>,
{
    async fn close(&mut self) {
        let stderr = match self.stderr.take() {
            Some(stderr) => stderr.await,
            None => String::new(),
        };
        self.pending.extend(self.translator.finish(&stderr));
        self.done = true;
    }
}

/// Lazily translate an output stream into events.
///
/// The sequence ends after the terminal marker or end of output, always
/// with an optional stderr-derived `Error` followed by `Completion`.
/// `stderr` is awaited only once stdout is done. `on_line` runs for every
/// line read, blank ones included.
pub fn translate<R, F, T>(stdout: R, stderr: F, on_line: T) -> impl Stream<Item = ProtocolEvent>
where
    R: AsyncRead + Unpin,
    F: Future<Output = String>,
    T: FnMut(),
{
    let state = TranslateState {
        reader: BufReader::new(stdout),
        stderr: Some(stderr),
        on_line,
        translator: ProtocolTranslator::new(),
        pending: VecDeque::new(),
        buf: Vec::with_capacity(256),
        done: false,
    };

    futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(event) = st.pending.pop_front() {
                return Some((event, st));
            }
            if st.done {
                return None;
            }

            st.buf.clear();
            match st.reader.read_until(b'\n', &mut st.buf).await {
                Ok(0) => st.close().await,
                Ok(_) => {
                    (st.on_line)();
                    let outcome = {
                        let line = String::from_utf8_lossy(&st.buf);
                        st.translator.translate_line(&line)
                    };
                    match outcome {
                        LineOutcome::Event(event) => st.pending.push_back(event),
                        LineOutcome::Terminal => {
                            tracing::info!("Agent marked task as done");
                            st.close().await;
                        }
                        LineOutcome::Skip => {}
                    }
                }
                Err(e) => {
                    tracing::error!("Error reading agent output: {e}");
                    st.pending.push_back(ProtocolEvent::error(
                        ErrorKind::Unclassified,
                        format!("Agent output stream failed: {e}"),
                    ));
                    st.close().await;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use futures::StreamExt;

    use super::*;

    fn lines(translator: &mut ProtocolTranslator, input: &[&str]) -> Vec<LineOutcome> {
        input.iter().map(|l| translator.translate_line(l)).collect()
    }

    fn content(text: &str) -> LineOutcome {
        LineOutcome::Event(ProtocolEvent::content(text))
    }

    async fn run(stdout: &'static str, stderr: &'static str) -> Vec<ProtocolEvent> {
        translate(stdout.as_bytes(), async move { stderr.to_string() }, || {})
            .collect()
            .await
    }

    #[tokio::test]
    async fn test_data_lines_then_terminal() {
        let events = run("DATA:\"a\"\nDATA:\"b\"\nDONE\n", "").await;
        assert_eq!(
            events,
            vec![
                ProtocolEvent::content("a"),
                ProtocolEvent::content("b"),
                ProtocolEvent::Completion { total_chars: 2 },
            ]
        );
    }

    #[tokio::test]
    async fn test_lines_after_terminal_are_not_read() {
        let events = run("DATA:\"a\"\nDONE\nDATA:\"late\"\n", "").await;
        assert_eq!(
            events,
            vec![
                ProtocolEvent::content("a"),
                ProtocolEvent::Completion { total_chars: 1 },
            ]
        );
    }

    #[tokio::test]
    async fn test_end_of_output_without_marker_still_completes() {
        let events = run("DATA:\"partial\"\n", "").await;
        assert_eq!(events.last(), Some(&ProtocolEvent::Completion { total_chars: 7 }));
    }

    #[tokio::test]
    async fn test_stderr_error_precedes_completion() {
        let events = run(
            "DATA:\"x\"\n",
            "Traceback (most recent call last):\nModuleNotFoundError: No module named 'openai'\n",
        )
        .await;
        assert_eq!(events.len(), 3);
        assert!(matches!(
            &events[1],
            ProtocolEvent::Error {
                kind: ErrorKind::MissingModule,
                ..
            }
        ));
        assert_eq!(events[2], ProtocolEvent::Completion { total_chars: 1 });
    }

    #[tokio::test]
    async fn test_pip_warnings_produce_no_error_event() {
        let events = run(
            "DONE\n",
            "WARNING: Running pip as the 'root' user can result in broken permissions\n",
        )
        .await;
        assert_eq!(events, vec![ProtocolEvent::Completion { total_chars: 0 }]);
    }

    #[tokio::test]
    async fn test_on_line_runs_for_every_line() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let events: Vec<_> = translate(
            "DEBUG: hi\n\nDATA:\"a\"\nDONE\n".as_bytes(),
            async { String::new() },
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        )
        .collect()
        .await;
        assert_eq!(seen.load(Ordering::SeqCst), 4);
        assert_eq!(events[0], ProtocolEvent::debug("hi"));
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_not_fatal() {
        let stdout: &'static [u8] = b"caf\xe9\nDONE\n";
        let events: Vec<_> = translate(stdout, async { String::new() }, || {})
            .collect()
            .await;
        assert_eq!(events[0], ProtocolEvent::content("caf\u{fffd}"));
        assert!(events[1].is_completion());
    }

    #[test]
    fn test_multiline_payload_decodes() {
        let mut t = ProtocolTranslator::new();
        assert_eq!(
            t.translate_line("DATA:\"first\\nsecond \\u00e9\"\n"),
            content("first\nsecond é")
        );
        assert_eq!(t.total_chars(), 14);
    }

    #[test]
    fn test_new_message_boundary() {
        let mut t = ProtocolTranslator::new();
        assert_eq!(
            t.translate_line("NEW_MESSAGE:\"Processing your request...\""),
            LineOutcome::Event(ProtocolEvent::new_message("Processing your request..."))
        );
        assert_eq!(t.total_chars(), 26);
    }

    #[test]
    fn test_undecodable_payload_passes_through_raw() {
        let mut t = ProtocolTranslator::new();
        assert_eq!(t.translate_line("DATA:raw text"), content("raw text"));
        assert_eq!(
            t.translate_line("NEW_MESSAGE:{broken"),
            LineOutcome::Event(ProtocolEvent::new_message("{broken"))
        );
    }

    #[test]
    fn test_bare_lines_join_with_newline() {
        let mut t = ProtocolTranslator::new();
        assert_eq!(lines(&mut t, &["1", "2", "3"]), vec![
            content("1"),
            content("\n2"),
            content("\n3")
        ]);
    }

    #[test]
    fn test_prefixed_then_bare_has_no_separator() {
        let mut t = ProtocolTranslator::new();
        assert_eq!(lines(&mut t, &["DATA:\"a\"", "b", "c"]), vec![
            content("a"),
            content("b"),
            content("\nc")
        ]);
    }

    #[test]
    fn test_bare_then_prefixed_gets_separator() {
        let mut t = ProtocolTranslator::new();
        assert_eq!(lines(&mut t, &["x", "DATA:\"y\"", "DATA:\"z\""]), vec![
            content("x"),
            content("\ny"),
            content("z")
        ]);
    }

    #[test]
    fn test_blank_lines_keep_adjacency() {
        let mut t = ProtocolTranslator::new();
        assert_eq!(lines(&mut t, &["p1", "", "p2"]), vec![
            content("p1"),
            LineOutcome::Skip,
            content("\np2")
        ]);
    }

    #[test]
    fn test_classified_lines_reset_adjacency() {
        let mut t = ProtocolTranslator::new();
        let out = lines(&mut t, &["x", "DEBUG: note", "y", "NEW_MESSAGE:\"m\"", "DATA:\"z\""]);
        assert_eq!(out[2], content("y"));
        assert_eq!(out[4], content("z"));
    }

    #[test]
    fn test_terminal_marker_must_be_exact() {
        let mut t = ProtocolTranslator::new();
        assert_eq!(t.translate_line("DONE\r\n"), LineOutcome::Terminal);
        assert_eq!(t.translate_line("DONE!"), content("DONE!"));
    }

    #[test]
    fn test_bare_line_keeps_indentation() {
        let mut t = ProtocolTranslator::new();
        assert_eq!(t.translate_line("    indented   \n"), content("    indented"));
    }
}
