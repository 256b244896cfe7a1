//! Structured diagnostics collected while parsing a document.
//!
//! A [`Report`] can carry any number of entries; only `Error` entries make it
//! fatal. Non-fatal reports are logged and the parse result is kept.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warn,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => f.write_str("info"),
            Severity::Warn => f.write_str("warning"),
            Severity::Error => f.write_str("error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub severity: Severity,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Report {
    entries: Vec<Entry>,
}

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.entries.push(Entry {
            severity: Severity::Error,
            message: message.into(),
        });
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.entries.push(Entry {
            severity: Severity::Warn,
            message: message.into(),
        });
    }

    pub fn merge(&mut self, other: Report) {
        self.entries.extend(other.entries);
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// A report is fatal when any entry is an error.
    pub fn is_fatal(&self) -> bool {
        self.entries
            .iter()
            .any(|e| e.severity == Severity::Error)
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.entries.is_empty() {
            return f.write_str("<empty>");
        }
        for (idx, entry) in self.entries.iter().enumerate() {
            if idx > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", entry.severity, entry.message)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warnings_are_not_fatal() {
        let mut report = Report::new();
        report.warn("unused key");
        assert!(!report.is_fatal());

        report.error("missing path");
        assert!(report.is_fatal());
    }

    #[test]
    fn display_joins_entries() {
        let mut report = Report::new();
        report.warn("a");
        report.error("b");
        assert_eq!(report.to_string(), "warning: a; error: b");
        assert_eq!(Report::new().to_string(), "<empty>");
    }
}
