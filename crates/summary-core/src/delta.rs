//! Editor deltas relayed over the presence channel.
//!
//! Uses the row/column shape the browser editor emits so deltas from the web
//! UI can be applied here unchanged. Rows and columns are zero-based, and
//! columns count characters, not bytes.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeltaError {
    #[error("Position out of range: row {row}, column {column}")]
    OutOfRange { row: usize, column: usize },

    #[error("Range end precedes start")]
    InvalidRange,
}

pub type Result<T> = std::result::Result<T, DeltaError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub row: usize,
    pub column: usize,
}

impl Position {
    pub fn new(row: usize, column: usize) -> Self {
        Self { row, column }
    }

    /// Position of a byte offset inside `text`.
    fn at_offset(text: &str, offset: usize) -> Self {
        let before = &text[..offset];
        let row = before.matches('\n').count();
        let line_start = before.rfind('\n').map(|i| i + 1).unwrap_or(0);
        Self {
            row,
            column: before[line_start..].chars().count(),
        }
    }

    /// Byte offset of this position inside `text`.
    fn offset_in(&self, text: &str) -> Result<usize> {
        let out_of_range = DeltaError::OutOfRange {
            row: self.row,
            column: self.column,
        };

        let mut line_start = 0;
        for (row, line) in text.split('\n').enumerate() {
            if row == self.row {
                return line
                    .char_indices()
                    .map(|(i, _)| i)
                    .chain(std::iter::once(line.len()))
                    .nth(self.column)
                    .map(|i| line_start + i)
                    .ok_or(out_of_range);
            }
            line_start += line.len() + 1;
        }
        Err(out_of_range)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeltaAction {
    Insert,
    Remove,
}

/// A single insert or remove.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    pub action: DeltaAction,
    pub start: Position,
    pub end: Position,
    /// Inserted or removed text, split on newlines.
    pub lines: Vec<String>,
}

impl Delta {
    /// Insert `text` at `at`.
    pub fn insert(at: Position, text: &str) -> Self {
        let lines: Vec<String> = text.split('\n').map(str::to_string).collect();
        let end = match lines.len() {
            1 => Position::new(at.row, at.column + text.chars().count()),
            n => Position::new(at.row + n - 1, lines[n - 1].chars().count()),
        };
        Self {
            action: DeltaAction::Insert,
            start: at,
            end,
            lines,
        }
    }

    /// Remove the text between `start` and `end` of `text`.
    pub fn remove(text: &str, start: Position, end: Position) -> Result<Self> {
        let from = start.offset_in(text)?;
        let to = end.offset_in(text)?;
        if to < from {
            return Err(DeltaError::InvalidRange);
        }
        Ok(Self {
            action: DeltaAction::Remove,
            start,
            end,
            lines: text[from..to].split('\n').map(str::to_string).collect(),
        })
    }

    /// Text carried by the delta.
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    /// Apply to `text` in place.
    ///
    /// Removes go by range; `lines` of a remove is informational only.
    pub fn apply_to(&self, text: &mut String) -> Result<()> {
        let from = self.start.offset_in(text)?;
        match self.action {
            DeltaAction::Insert => {
                text.insert_str(from, &self.text());
            }
            DeltaAction::Remove => {
                let to = self.end.offset_in(text)?;
                if to < from {
                    return Err(DeltaError::InvalidRange);
                }
                text.replace_range(from..to, "");
            }
        }
        Ok(())
    }

    /// Deltas turning `old` into `new`: at most one remove then one insert
    /// covering the changed middle segment.
    pub fn diff(old: &str, new: &str) -> Vec<Delta> {
        let prefix = old
            .char_indices()
            .zip(new.chars())
            .find(|((_, a), b)| a != b)
            .map(|((i, _), _)| i)
            .unwrap_or_else(|| old.len().min(new.len()));
        // Keep the prefix on a char boundary of both strings
        let prefix = (0..=prefix)
            .rev()
            .find(|&i| old.is_char_boundary(i) && new.is_char_boundary(i))
            .unwrap_or(0);

        let old_rest = &old[prefix..];
        let new_rest = &new[prefix..];
        let suffix: usize = old_rest
            .chars()
            .rev()
            .zip(new_rest.chars().rev())
            .take_while(|(a, b)| a == b)
            .map(|(a, _)| a.len_utf8())
            .sum();
        let suffix = suffix.min(old_rest.len()).min(new_rest.len());

        let removed = &old_rest[..old_rest.len() - suffix];
        let inserted = &new_rest[..new_rest.len() - suffix];
        let start = Position::at_offset(old, prefix);

        let mut deltas = Vec::new();
        if !removed.is_empty() {
            deltas.push(Self {
                action: DeltaAction::Remove,
                start,
                end: Position::at_offset(old, prefix + removed.len()),
                lines: removed.split('\n').map(str::to_string).collect(),
            });
        }
        if !inserted.is_empty() {
            deltas.push(Self::insert(start, inserted));
        }
        deltas
    }
}
