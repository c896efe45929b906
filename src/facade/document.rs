//! Editor documents
//!
//! The text an editor command wants to send, as seen at the moment the
//! command ran.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Language id of documents the REPL accepts
pub const ELM_LANGUAGE_ID: &str = "elm";

/// Read access to an editor document
pub trait TextSource: Send + Sync {
    /// Editor language id, e.g. `elm`
    fn language_id(&self) -> &str;

    /// Path of the document on disk, if it has one
    fn file_name(&self) -> Option<&Path>;

    /// The full line the cursor is on, without its line break
    fn line_at_cursor(&self) -> String;

    /// Currently selected text; empty when nothing is selected
    fn selection_text(&self) -> String;

    fn full_text(&self) -> String;
}

/// Character range within a document, end exclusive
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TextRange {
    pub start: usize,
    pub end: usize,
}

/// Snapshot of an editor document sent over the wire
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentSnapshot {
    pub language_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<PathBuf>,
    pub text: String,
    /// Zero-based line of the cursor
    #[serde(default)]
    pub cursor_line: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection: Option<TextRange>,
}

#[cfg(test)]
impl DocumentSnapshot {
    /// An Elm document with no file, cursor on the first line
    pub fn elm(text: impl Into<String>) -> Self {
        Self {
            language_id: ELM_LANGUAGE_ID.to_string(),
            file_name: None,
            text: text.into(),
            cursor_line: 0,
            selection: None,
        }
    }

    pub fn with_file_name(mut self, file_name: impl Into<PathBuf>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    pub fn with_cursor_line(mut self, line: usize) -> Self {
        self.cursor_line = line;
        self
    }

    pub fn with_selection(mut self, start: usize, end: usize) -> Self {
        self.selection = Some(TextRange { start, end });
        self
    }
}

impl TextSource for DocumentSnapshot {
    fn language_id(&self) -> &str {
        &self.language_id
    }

    fn file_name(&self) -> Option<&Path> {
        self.file_name.as_deref()
    }

    fn line_at_cursor(&self) -> String {
        self.text
            .split('\n')
            .nth(self.cursor_line)
            .map(|line| line.trim_end_matches('\r').to_string())
            .unwrap_or_default()
    }

    fn selection_text(&self) -> String {
        let Some(range) = self.selection else {
            return String::new();
        };
        let (start, end) = if range.start <= range.end {
            (range.start, range.end)
        } else {
            (range.end, range.start)
        };
        self.text.chars().skip(start).take(end - start).collect()
    }

    fn full_text(&self) -> String {
        self.text.clone()
    }
}
