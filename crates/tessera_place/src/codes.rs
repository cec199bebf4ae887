//! Diagnostic codes emitted by the placer.

use tessera_diagnostics::{DiagnosticCode, Stage};

/// A unit found no legal site after every radius expansion.
pub const LEGALIZATION_FAILURE: DiagnosticCode = DiagnosticCode::error(301, Stage::Legalize);
/// A unit could not join any packing cluster.
pub const PACKING_CONFLICT: DiagnosticCode = DiagnosticCode::error(302, Stage::Pack);
/// The quadratic solver diverged or did not converge.
pub const NUMERICAL_STALL: DiagnosticCode = DiagnosticCode::warning(303, Stage::Optimize);
/// A spread region had demand but no capacity.
pub const ZERO_CAPACITY_REGION: DiagnosticCode = DiagnosticCode::warning(304, Stage::Spread);
/// The iteration or time budget ran out before convergence.
pub const BUDGET_EXHAUSTED: DiagnosticCode = DiagnosticCode::warning(305, Stage::Schedule);
/// A resource was substituted through the alias table.
pub const RESOURCE_ALIASED: DiagnosticCode = DiagnosticCode::warning(306, Stage::Model);
/// A clustering hint named a cell that already belongs to another group.
pub const IGNORED_CLUSTER_HINT: DiagnosticCode = DiagnosticCode::warning(307, Stage::Model);
