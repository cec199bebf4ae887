//! What a placement run reports back besides the positions themselves.

use crate::ids::UnitId;
use crate::placer::PlacerState;
use crate::spread::ZeroCapacityRegion;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    /// Every unit was legalized; packing may still report conflicts.
    Converged,
    /// Legalization failures outlived the retry budget.
    Infeasible,
}

/// Why a unit could not be placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// No free site was found within the largest search radius.
    InfeasibleCandidate,
    /// The unit fit no CLB site, even after rip-up.
    PackingConflict,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::InfeasibleCandidate => f.write_str("infeasible candidate"),
            FailureKind::PackingConflict => f.write_str("packing conflict"),
        }
    }
}

/// A unit left without a legal site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementFailure {
    /// The unit.
    pub unit: UnitId,
    /// Its name.
    pub name: String,
    /// The failure.
    pub kind: FailureKind,
}

/// Legal displacement measured at one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDisplacement {
    /// Outer iteration.
    pub iteration: u32,
    /// State that legalized.
    pub state: PlacerState,
    /// Summed displacement.
    pub total: f64,
    /// Largest single displacement.
    pub max: f64,
}

/// Summary of one placement run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementStatus {
    /// Final outcome.
    pub outcome: Outcome,
    /// Wirelength of the final placement.
    pub final_hpwl: f64,
    /// Outer iterations run.
    pub iterations: u32,
    /// HPWL after every wirelength solve.
    pub hpwl_history: Vec<f64>,
    /// Displacement after every legalization.
    pub displacement_history: Vec<StageDisplacement>,
    /// Units without a legal site.
    pub failures: Vec<PlacementFailure>,
    /// Spread regions that had demand but no capacity.
    pub zero_capacity_regions: Vec<ZeroCapacityRegion>,
    /// Quadratic solves that failed and were rolled back.
    pub stalls: u32,
    /// Set when the iteration or time budget ran out.
    pub budget_exhausted: bool,
}

impl PlacementStatus {
    /// Returns `true` when the run converged.
    pub fn is_converged(&self) -> bool {
        self.outcome == Outcome::Converged
    }

    /// Number of failures of one kind.
    pub fn failure_count(&self, kind: FailureKind) -> usize {
        self.failures.iter().filter(|f| f.kind == kind).count()
    }
}
