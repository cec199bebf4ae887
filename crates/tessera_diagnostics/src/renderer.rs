//! Text rendering of a run's diagnostics.

use crate::code::DiagnosticCode;
use crate::diagnostic::Diagnostic;
use crate::severity::Severity;
use std::cmp::Reverse;
use std::collections::BTreeMap;

/// Renders diagnostics as rustc-style text:
///
/// ```text
/// error[E301]: no legal site within the largest search radius
///   --> unit bram_cascade_0
///    = note: 2 of 3 BRAM units were matched
///    = help: raise `legalize.max_expansions`
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalRenderer {
    /// Wrap the header in ANSI colors.
    pub color: bool,
}

impl TerminalRenderer {
    /// Creates a renderer.
    pub fn new(color: bool) -> Self {
        Self { color }
    }

    /// Renders one diagnostic, ending with a newline.
    pub fn render(&self, diag: &Diagnostic) -> String {
        let mut out = format!("{}: {}\n", self.header(diag), diag.message);
        if let Some(subject) = &diag.subject {
            out.push_str(&format!("  --> {subject}\n"));
        }
        for note in &diag.notes {
            out.push_str(&format!("   = note: {note}\n"));
        }
        for help in &diag.help {
            out.push_str(&format!("   = help: {help}\n"));
        }
        out
    }

    /// One line counting diagnostics per code, errors first, e.g.
    /// `2 errors, 1 warning: E301 x2 (legalize), W303 x1 (optimize)`.
    pub fn summary(&self, counts: &BTreeMap<DiagnosticCode, usize>) -> String {
        let total = |severity: Severity| -> usize {
            counts.iter().filter(|(c, _)| c.severity == severity).map(|(_, &n)| n).sum()
        };
        let plural = |n: usize, word: &str| if n == 1 { format!("1 {word}") } else { format!("{n} {word}s") };
        let mut ordered: Vec<(&DiagnosticCode, &usize)> = counts.iter().collect();
        ordered.sort_by_key(|(code, _)| (Reverse(code.severity), code.number));
        let codes: Vec<String> = ordered
            .into_iter()
            .map(|(code, n)| format!("{code} x{n} ({})", code.stage.name()))
            .collect();
        let head = format!("{}, {}", plural(total(Severity::Error), "error"), plural(total(Severity::Warning), "warning"));
        if codes.is_empty() {
            head
        } else {
            format!("{head}: {}", codes.join(", "))
        }
    }

    /// Forwards each diagnostic to `log` at its severity's level, followed
    /// by the summary when there was anything to report.
    pub fn log_run(&self, diags: &[Diagnostic], counts: &BTreeMap<DiagnosticCode, usize>) {
        for diag in diags {
            log::log!(diag.severity().log_level(), "{}", self.render(diag).trim_end());
        }
        if !counts.is_empty() {
            log::info!("placement diagnostics: {}", self.summary(counts));
        }
    }

    fn header(&self, diag: &Diagnostic) -> String {
        let label = format!("{}[{}]", diag.severity(), diag.code);
        if !self.color {
            return label;
        }
        let color = match diag.severity() {
            Severity::Error => "31",
            Severity::Warning => "33",
        };
        format!("\x1b[1;{color}m{label}\x1b[0m")
    }
}
