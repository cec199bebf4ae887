//! Placement diagnostics.
//!
//! A [`DiagnosticCode`] fixes both the severity and the placement stage of
//! an issue, so `E301` is always a legalization error. Stages report into a
//! shared [`DiagnosticSink`] from any thread; once a run finishes,
//! [`TerminalRenderer`] turns the run's diagnostics into text lines and a
//! per-code summary and forwards them to the `log` facade.

#![warn(missing_docs)]

pub mod code;
pub mod diagnostic;
pub mod renderer;
pub mod severity;
pub mod sink;

pub use code::{DiagnosticCode, Stage};
pub use diagnostic::Diagnostic;
pub use renderer::TerminalRenderer;
pub use severity::Severity;
pub use sink::{DiagnosticSink, SinkMark};
