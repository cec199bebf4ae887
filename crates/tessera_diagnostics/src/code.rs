//! Diagnostic codes and the placement stage that owns each one.

use crate::severity::Severity;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The placement stage a diagnostic comes from.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub enum Stage {
    /// Building units, nets and resource bindings from the design.
    Model,
    /// Quadratic wirelength optimization.
    Optimize,
    /// Density spreading.
    Spread,
    /// Macro and CLB legalization.
    Legalize,
    /// Slice packing.
    Pack,
    /// The orchestrator's own budget and schedule.
    Schedule,
}

impl Stage {
    /// Lowercase stage name.
    pub fn name(self) -> &'static str {
        match self {
            Stage::Model => "model",
            Stage::Optimize => "optimize",
            Stage::Spread => "spread",
            Stage::Legalize => "legalize",
            Stage::Pack => "pack",
            Stage::Schedule => "schedule",
        }
    }
}

/// A diagnostic code such as `E301`.
///
/// The severity is part of the code, so every diagnostic carrying it has
/// the same severity. Codes order by severity first, then number.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct DiagnosticCode {
    /// Severity of every diagnostic with this code.
    pub severity: Severity,
    /// Number shown after the severity letter.
    pub number: u16,
    /// Stage that raises the code.
    pub stage: Stage,
}

impl DiagnosticCode {
    /// An error code.
    pub const fn error(number: u16, stage: Stage) -> Self {
        Self {
            severity: Severity::Error,
            number,
            stage,
        }
    }

    /// A warning code.
    pub const fn warning(number: u16, stage: Stage) -> Self {
        Self {
            severity: Severity::Warning,
            number,
            stage,
        }
    }
}

impl fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:03}", self.severity.prefix(), self.number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_pads_number() {
        assert_eq!(DiagnosticCode::error(301, Stage::Legalize).to_string(), "E301");
        assert_eq!(DiagnosticCode::warning(7, Stage::Model).to_string(), "W007");
    }

    #[test]
    fn errors_sort_after_warnings() {
        let mut codes = vec![
            DiagnosticCode::error(302, Stage::Pack),
            DiagnosticCode::warning(305, Stage::Schedule),
            DiagnosticCode::warning(303, Stage::Optimize),
        ];
        codes.sort();
        let shown: Vec<String> = codes.iter().map(ToString::to_string).collect();
        assert_eq!(shown, ["W303", "W305", "E302"]);
    }

    #[test]
    fn serde_roundtrip() {
        let code = DiagnosticCode::warning(304, Stage::Spread);
        let json = serde_json::to_string(&code).unwrap();
        let back: DiagnosticCode = serde_json::from_str(&json).unwrap();
        assert_eq!(code, back);
        assert_eq!(back.stage.name(), "spread");
    }
}
