//! Session output sink
//!
//! Receives raw chunks from a running process and writes a cleaned-up
//! rendition into the session's transcript. Chunks may split lines and
//! UTF-8 sequences anywhere, so each stream carries its undecoded tail and
//! the stdout filter carries its line position from one chunk to the next.

use std::sync::{Arc, Mutex, MutexGuard};

use super::transcript::Transcript;
use crate::toolchain::SessionKind;

/// Banner written when a reactor process comes up
pub const REACTOR_BANNER: &str = "starting reactor\n";

/// Which output stream a chunk came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Position of the stdout filter within the current line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum LineState {
    /// Nothing of the current line has been seen yet
    #[default]
    Start,
    /// Inside a line that is being kept
    Body,
    /// Dropping a leading run of REPL prompt markers
    Stripping,
    /// Reactor line started with `|`, waiting for the next character
    PendingBar,
    /// Dropping a reactor continuation line
    Suppressed,
}

/// Per-process decoding state
#[derive(Debug, Default)]
struct StreamState {
    line: LineState,
    stdout_tail: Vec<u8>,
    stderr_tail: Vec<u8>,
}

impl StreamState {
    fn tail(&mut self, stream: OutputStream) -> &mut Vec<u8> {
        match stream {
            OutputStream::Stdout => &mut self.stdout_tail,
            OutputStream::Stderr => &mut self.stderr_tail,
        }
    }
}

/// Transforms session output and appends it to a transcript
pub struct OutputSink {
    kind: SessionKind,
    transcript: Arc<dyn Transcript>,
    state: Mutex<StreamState>,
}

impl OutputSink {
    pub fn new(kind: SessionKind, transcript: Arc<dyn Transcript>) -> Self {
        Self {
            kind,
            transcript,
            state: Mutex::new(StreamState::default()),
        }
    }

    /// Prepare the transcript for a freshly spawned process
    pub fn begin(&self) {
        *self.state() = StreamState::default();
        self.transcript.show();
        if self.kind == SessionKind::Reactor {
            self.transcript.append(REACTOR_BANNER);
        }
    }

    /// Handle one chunk of process output
    pub fn on_chunk(&self, stream: OutputStream, bytes: &[u8]) {
        let mut state = self.state();
        let text = decode(state.tail(stream), bytes);
        let filtered = match stream {
            OutputStream::Stderr => text,
            OutputStream::Stdout => self.filter(&mut state.line, &text),
        };
        drop(state);
        if !filtered.is_empty() {
            self.transcript.append(&filtered);
        }
    }

    /// Flush whatever a stream held back once it reaches end of file
    pub fn finish(&self, stream: OutputStream) {
        let mut state = self.state();
        let tail = std::mem::take(state.tail(stream));
        let text = String::from_utf8_lossy(&tail).into_owned();
        let mut filtered = match stream {
            OutputStream::Stderr => text,
            OutputStream::Stdout => self.filter(&mut state.line, &text),
        };
        if stream == OutputStream::Stdout {
            if state.line == LineState::PendingBar {
                filtered.push('|');
            }
            state.line = LineState::Start;
        }
        drop(state);
        if !filtered.is_empty() {
            self.transcript.append(&filtered);
        }
    }

    /// Append text verbatim, bypassing the output filters
    pub fn echo(&self, text: &str) {
        self.transcript.append(text);
    }

    /// Clear and release the transcript once the process is gone
    pub fn release(&self) {
        *self.state() = StreamState::default();
        self.transcript.clear();
        self.transcript.dispose();
    }

    fn filter(&self, line: &mut LineState, text: &str) -> String {
        match self.kind {
            SessionKind::Repl => strip_prompts(line, text),
            SessionKind::Reactor => drop_continuations(line, text),
        }
    }

    fn state(&self) -> MutexGuard<'_, StreamState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Decode `bytes` after the carried `tail`, keeping an incomplete trailing
/// sequence in `tail` for the next chunk. Invalid bytes become U+FFFD.
fn decode(tail: &mut Vec<u8>, bytes: &[u8]) -> String {
    tail.extend_from_slice(bytes);
    let mut out = String::with_capacity(tail.len());
    let mut rest: &[u8] = tail;
    loop {
        match std::str::from_utf8(rest) {
            Ok(valid) => {
                out.push_str(valid);
                rest = &[];
                break;
            }
            Err(e) => {
                let (valid, after) = rest.split_at(e.valid_up_to());
                out.push_str(&String::from_utf8_lossy(valid));
                match e.error_len() {
                    Some(len) => {
                        out.push(char::REPLACEMENT_CHARACTER);
                        rest = &after[len..];
                    }
                    None => {
                        rest = after;
                        break;
                    }
                }
            }
        }
    }
    let carried = rest.to_vec();
    *tail = carried;
    out
}

fn is_prompt_marker(ch: char) -> bool {
    ch == '>' || ch == '|'
}

/// Remove leading `>`/`|` prompt runs (with their whitespace) from each line
fn strip_prompts(state: &mut LineState, text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match *state {
            LineState::Start if is_prompt_marker(ch) => *state = LineState::Stripping,
            LineState::Stripping if is_prompt_marker(ch) || ch.is_whitespace() => {}
            _ => {
                out.push(ch);
                *state = if ch == '\n' {
                    LineState::Start
                } else {
                    LineState::Body
                };
            }
        }
    }
    out
}

/// Drop lines that begin with the `| ` continuation marker
fn drop_continuations(state: &mut LineState, text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match *state {
            LineState::Start if ch == '|' => *state = LineState::PendingBar,
            LineState::PendingBar if ch == ' ' => *state = LineState::Suppressed,
            LineState::Suppressed => {
                if ch == '\n' {
                    *state = LineState::Start;
                }
            }
            pending => {
                if pending == LineState::PendingBar {
                    out.push('|');
                }
                out.push(ch);
                *state = if ch == '\n' {
                    LineState::Start
                } else {
                    LineState::Body
                };
            }
        }
    }
    out
}
