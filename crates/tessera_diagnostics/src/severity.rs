//! Severity of a placement diagnostic.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How serious a diagnostic is.
///
/// Warnings mark degraded results the placer recovered from; errors mark
/// units left without a legal home. Ordered by seriousness.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub enum Severity {
    /// The run continued with a degraded result.
    Warning,
    /// A unit could not be legally placed or packed.
    Error,
}

impl Severity {
    /// Letter that starts codes of this severity.
    pub fn prefix(self) -> char {
        match self {
            Severity::Warning => 'W',
            Severity::Error => 'E',
        }
    }

    /// Returns `true` for [`Severity::Error`].
    pub fn is_error(self) -> bool {
        self == Severity::Error
    }

    /// Level used when the diagnostic is forwarded to `log`.
    pub fn log_level(self) -> log::Level {
        match self {
            Severity::Warning => log::Level::Warn,
            Severity::Error => log::Level::Error,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Warning => "warning",
            Severity::Error => "error",
        })
    }
}
