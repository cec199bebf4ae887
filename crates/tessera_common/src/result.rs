//! Common result and error types for the Tessera workspace.

/// The standard result type for fallible internal operations.
///
/// `Ok` contains the result value (which may be partial or degraded after
/// recovery). `Err` indicates a broken invariant in the input or a bug in
/// the placer, not a recoverable placement problem. Recoverable problems are
/// reported through the diagnostic sink and the placement status, and the
/// operation still returns `Ok`.
pub type TesseraResult<T> = Result<T, InternalError>;

/// An internal error indicating a violated invariant, not a placement-quality issue.
///
/// These errors should never occur when the netlist provider honours its
/// contract. If one does occur, the input or the placer has a logic error.
#[derive(Debug, thiserror::Error)]
#[error("internal placer error: {message}")]
pub struct InternalError {
    /// Description of the internal error.
    pub message: String,
}

impl InternalError {
    /// Creates a new internal error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for InternalError {
    fn from(message: String) -> Self {
        Self { message }
    }
}
