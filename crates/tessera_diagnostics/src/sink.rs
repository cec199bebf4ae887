//! Collection point for diagnostics raised by parallel placement stages.

use crate::code::DiagnosticCode;
use crate::diagnostic::Diagnostic;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

/// Position in a sink's history, used to pick out one run's diagnostics
/// when a sink is shared between runs.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
pub struct SinkMark(usize);

/// Thread-safe, append-only diagnostic store.
///
/// Diagnostics keep their emission order. The error count is kept apart
/// from the list so that checking for errors never takes the lock.
#[derive(Debug, Default)]
pub struct DiagnosticSink {
    diagnostics: Mutex<Vec<Diagnostic>>,
    errors: AtomicUsize,
}

impl DiagnosticSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `diag`.
    pub fn emit(&self, diag: Diagnostic) {
        if diag.severity().is_error() {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
        self.lock().push(diag);
    }

    /// Records every diagnostic of `diags`, keeping their order.
    pub fn emit_all(&self, diags: impl IntoIterator<Item = Diagnostic>) {
        let diags: Vec<Diagnostic> = diags.into_iter().collect();
        let errors = diags.iter().filter(|d| d.severity().is_error()).count();
        self.errors.fetch_add(errors, Ordering::Relaxed);
        self.lock().extend(diags);
    }

    /// Returns `true` once any error has been recorded.
    pub fn has_errors(&self) -> bool {
        self.error_count() > 0
    }

    /// Errors recorded so far.
    pub fn error_count(&self) -> usize {
        self.errors.load(Ordering::Relaxed)
    }

    /// The current end of the history.
    pub fn mark(&self) -> SinkMark {
        SinkMark(self.lock().len())
    }

    /// Copies of every diagnostic recorded so far.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.since(SinkMark(0))
    }

    /// Copies of the diagnostics recorded after `mark`.
    pub fn since(&self, mark: SinkMark) -> Vec<Diagnostic> {
        self.lock().get(mark.0..).map(<[Diagnostic]>::to_vec).unwrap_or_default()
    }

    /// How many diagnostics after `mark` carry each code.
    pub fn counts_since(&self, mark: SinkMark) -> BTreeMap<DiagnosticCode, usize> {
        let mut counts = BTreeMap::new();
        for diag in self.lock().get(mark.0..).unwrap_or_default() {
            *counts.entry(diag.code).or_insert(0) += 1;
        }
        counts
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Diagnostic>> {
        self.diagnostics.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::Stage;
    use std::sync::Arc;
    use std::thread;

    const E301: DiagnosticCode = DiagnosticCode::error(301, Stage::Legalize);
    const W303: DiagnosticCode = DiagnosticCode::warning(303, Stage::Optimize);

    #[test]
    fn warnings_are_not_errors() {
        let sink = DiagnosticSink::new();
        sink.emit(Diagnostic::new(W303, "stall"));
        assert!(!sink.has_errors());
        assert_eq!(sink.diagnostics().len(), 1);
    }

    #[test]
    fn marks_separate_runs() {
        let sink = DiagnosticSink::new();
        sink.emit(Diagnostic::new(W303, "first run"));
        let mark = sink.mark();
        sink.emit_all([Diagnostic::new(E301, "a"), Diagnostic::new(E301, "b"), Diagnostic::new(W303, "c")]);

        let run = sink.since(mark);
        assert_eq!(run.len(), 3);
        assert_eq!(run[0].message, "a");
        assert_eq!(sink.counts_since(mark), BTreeMap::from([(W303, 1), (E301, 2)]));
        assert_eq!(sink.error_count(), 2);
        assert!(sink.since(sink.mark()).is_empty());
    }

    #[test]
    fn concurrent_emits_are_all_kept() {
        let sink = Arc::new(DiagnosticSink::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let sink = Arc::clone(&sink);
                thread::spawn(move || {
                    for _ in 0..50 {
                        sink.emit(Diagnostic::new(E301, "no site"));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(sink.error_count(), 400);
        assert_eq!(sink.counts_since(SinkMark::default())[&E301], 400);
    }
}
