//! A single reported placement issue.

use crate::code::DiagnosticCode;
use crate::severity::Severity;
use serde::{Deserialize, Serialize};

/// One issue raised by a placement stage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Code, which also fixes the severity.
    pub code: DiagnosticCode,
    /// One-line description.
    pub message: String,
    /// The unit, cell, site or region concerned, e.g. `unit carry_3`.
    pub subject: Option<String>,
    /// Extra context lines.
    pub notes: Vec<String>,
    /// Suggested remedies, usually a configuration option to change.
    pub help: Vec<String>,
}

impl Diagnostic {
    /// Creates a diagnostic without subject, notes or help.
    pub fn new(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            subject: None,
            notes: Vec::new(),
            help: Vec::new(),
        }
    }

    /// Severity of the code.
    pub fn severity(&self) -> Severity {
        self.code.severity
    }

    /// Sets the subject.
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Adds a note line.
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    /// Adds a help line.
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help.push(help.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::Stage;

    #[test]
    fn severity_follows_code() {
        let d = Diagnostic::new(DiagnosticCode::error(301, Stage::Legalize), "no site");
        assert!(d.severity().is_error());
        let w = Diagnostic::new(DiagnosticCode::warning(303, Stage::Optimize), "stall");
        assert_eq!(w.severity(), Severity::Warning);
    }

    #[test]
    fn builder_collects_context() {
        let d = Diagnostic::new(DiagnosticCode::error(302, Stage::Pack), "fits no slice")
            .with_subject("unit ff_12")
            .with_note("control set differs from both halves")
            .with_help("relax the clustering hint");
        assert_eq!(d.subject.as_deref(), Some("unit ff_12"));
        assert_eq!((d.notes.len(), d.help.len()), (1, 1));
    }

    #[test]
    fn serde_roundtrip() {
        let d = Diagnostic::new(DiagnosticCode::warning(304, Stage::Spread), "zero capacity").with_subject("region 0");
        let json = serde_json::to_string(&d).unwrap();
        let back: Diagnostic = serde_json::from_str(&json).unwrap();
        assert_eq!(back, d);
    }
}
