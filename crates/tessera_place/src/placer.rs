//! The global placement state machine.
//!
//! ```text
//! Init -> Optimize <-> Spread
//!           |  ^         |
//!           v  |         v
//!          Legalize <----+
//!           |
//!           v
//!        Converged -> Packing -> Done
//! ```
//!
//! Optimize runs bound-to-bound solves pulled by pseudo-nets. Spread moves
//! units out of overflowing bins and records the anchors those pseudo-nets
//! aim at. Legalize computes legal targets without committing them, except
//! for macros, which are locked once they settle. Converged commits every
//! unit to a site and Packing fills the slice slots. Any state may end in
//! Infeasible when legalization keeps failing.

use crate::codes;
use crate::ids::UnitId;
use crate::legalize::{bind_fixed_units, ClbLegalizer, LegalizationResult, LegalizeMode, MacroLegalizer, SiteIndex};
use crate::model::{BinGrids, ClbSlots, LegalFamily, PlacementInfo};
use crate::packing::Packer;
use crate::qp::{ConjugateGradient, QuadraticSolver};
use crate::spread::Spreader;
use crate::status::{Outcome, PlacementFailure, PlacementStatus, StageDisplacement};
use crate::wirelength::{PseudoNetSet, WirelengthOptimizer};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;
use tessera_common::Point;
use tessera_config::PlacerConfig;
use tessera_device::{CompatiblePlacementTable, Device};
use tessera_diagnostics::{Diagnostic, DiagnosticSink};

/// A state of the placement loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlacerState {
    /// Grids not built yet.
    Init,
    /// Quadratic wirelength solves.
    Optimize,
    /// Density spreading.
    Spread,
    /// Trial legalization.
    Legalize,
    /// Final legalization and commit.
    Converged,
    /// Slice packing.
    Packing,
    /// Finished with every unit legalized.
    Done,
    /// Finished with units that found no site.
    Infeasible,
}

impl PlacerState {
    /// Returns `true` for the two final states.
    pub fn is_terminal(self) -> bool {
        matches!(self, PlacerState::Done | PlacerState::Infeasible)
    }
}

impl fmt::Display for PlacerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlacerState::Init => "init",
            PlacerState::Optimize => "optimize",
            PlacerState::Spread => "spread",
            PlacerState::Legalize => "legalize",
            PlacerState::Converged => "converged",
            PlacerState::Packing => "packing",
            PlacerState::Done => "done",
            PlacerState::Infeasible => "infeasible",
        };
        f.write_str(name)
    }
}

/// Drives one placement run over a [`PlacementInfo`].
pub struct GlobalPlacer<'a, S: QuadraticSolver = ConjugateGradient> {
    device: &'a Device,
    table: &'a CompatiblePlacementTable,
    config: &'a PlacerConfig,
    sink: &'a DiagnosticSink,
    index: SiteIndex,
    optimizer: WirelengthOptimizer<S>,
    spreader: Spreader,
    grids: BinGrids,
    state: PlacerState,
    started: Instant,
    iterations: u32,
    pseudo_weight: f64,
    progress: f64,
    lower_hpwl: f64,
    best_hpwl: f64,
    hpwl_stall: u32,
    has_spread: bool,
    settled_spreads: u32,
    last_overflow: Option<f64>,
    last_displacement: Option<f64>,
    failed_rounds: u32,
    legal_targets: Vec<(UnitId, Point)>,
    status: PlacementStatus,
}

impl<'a> GlobalPlacer<'a, ConjugateGradient> {
    /// Creates a placer with the conjugate-gradient backend.
    pub fn new(
        device: &'a Device,
        table: &'a CompatiblePlacementTable,
        config: &'a PlacerConfig,
        sink: &'a DiagnosticSink,
    ) -> Self {
        Self::with_optimizer(device, table, config, sink, WirelengthOptimizer::new(&config.wirelength))
    }
}

impl<'a, S: QuadraticSolver> GlobalPlacer<'a, S> {
    /// Creates a placer around a custom wirelength optimizer.
    pub fn with_optimizer(
        device: &'a Device,
        table: &'a CompatiblePlacementTable,
        config: &'a PlacerConfig,
        sink: &'a DiagnosticSink,
        optimizer: WirelengthOptimizer<S>,
    ) -> Self {
        Self {
            device,
            table,
            config,
            sink,
            index: SiteIndex::new(device, SiteIndex::DEFAULT_BUCKET),
            optimizer,
            spreader: Spreader::new(&config.spread, config.global.seed),
            grids: BinGrids::default(),
            state: PlacerState::Init,
            started: Instant::now(),
            iterations: 0,
            pseudo_weight: config.global.initial_pseudo_net_weight,
            progress: 0.0,
            lower_hpwl: 0.0,
            best_hpwl: f64::INFINITY,
            hpwl_stall: 0,
            has_spread: false,
            settled_spreads: 0,
            last_overflow: None,
            last_displacement: None,
            failed_rounds: 0,
            legal_targets: Vec::new(),
            status: PlacementStatus {
                outcome: Outcome::Converged,
                final_hpwl: 0.0,
                iterations: 0,
                hpwl_history: Vec::new(),
                displacement_history: Vec::new(),
                failures: Vec::new(),
                zero_capacity_regions: Vec::new(),
                stalls: 0,
                budget_exhausted: false,
            },
        }
    }

    /// The current state.
    pub fn state(&self) -> PlacerState {
        self.state
    }

    /// The status gathered so far.
    pub fn status(&self) -> &PlacementStatus {
        &self.status
    }

    /// Current pseudo-net weight.
    pub fn pseudo_weight(&self) -> f64 {
        self.pseudo_weight
    }

    /// Runs until a terminal state and returns the status.
    pub fn run(mut self, info: &mut PlacementInfo) -> PlacementStatus {
        self.started = Instant::now();
        while !self.state.is_terminal() {
            self.step(info);
        }
        self.finish(info)
    }

    /// Executes the current state and moves to the next one.
    pub fn step(&mut self, info: &mut PlacementInfo) -> PlacerState {
        let next = match self.state {
            PlacerState::Init => self.init(info),
            PlacerState::Optimize => self.optimize(info),
            PlacerState::Spread => self.spread(info),
            PlacerState::Legalize => self.legalize(info),
            PlacerState::Converged => self.converge(info),
            PlacerState::Packing => self.pack(info),
            terminal => terminal,
        };
        if next != self.state {
            log::debug!("placer: {} -> {}", self.state, next);
        }
        self.state = next;
        next
    }

    fn finish(mut self, info: &mut PlacementInfo) -> PlacementStatus {
        self.status.outcome = match self.state {
            PlacerState::Infeasible => Outcome::Infeasible,
            _ => Outcome::Converged,
        };
        self.status.iterations = self.iterations;
        self.status.final_hpwl = info.total_hpwl();
        log::info!(
            "placement {:?} after {} iterations: hpwl {:.3}, {} failures, {} stalls",
            self.status.outcome,
            self.status.iterations,
            self.status.final_hpwl,
            self.status.failures.len(),
            self.status.stalls
        );
        self.status
    }

    fn init(&mut self, info: &mut PlacementInfo) -> PlacerState {
        let spread = &self.config.spread;
        self.grids = BinGrids::new(info, self.device, self.table, spread.bin_width, spread.bin_height);
        bind_fixed_units(info, self.device, &self.index, ClbSlots::capacity(&self.config.legalize));
        self.solve(info, &PseudoNetSet::new());
        self.lower_hpwl = info.total_hpwl();
        log::info!(
            "initial solve: hpwl {:.3} over {} units, {} grids",
            self.lower_hpwl,
            info.units().len(),
            self.grids.grids.len()
        );
        PlacerState::Optimize
    }

    /// Solves once, rolling back on failure. Returns `false` on a stall.
    fn solve(&mut self, info: &mut PlacementInfo, pseudo: &PseudoNetSet) -> bool {
        let saved = info.positions();
        match self.optimizer.optimize(info, pseudo) {
            Ok(_) => true,
            Err(err) => {
                info.restore_positions(&saved);
                self.status.stalls += 1;
                log::warn!("wirelength solve rolled back: {err}");
                self.sink.emit(
                    Diagnostic::new(codes::NUMERICAL_STALL, format!("quadratic solve failed: {err}"))
                        .with_note("positions were restored to the previous iteration"),
                );
                false
            }
        }
    }

    fn budget_spent(&self) -> bool {
        let config = self.config;
        let global = &config.global;
        self.iterations >= global.max_iterations
            || global
                .time_budget_secs
                .is_some_and(|limit| self.started.elapsed().as_secs_f64() >= limit)
    }

    fn optimize(&mut self, info: &mut PlacementInfo) -> PlacerState {
        let config = self.config;
        let global = &config.global;
        if self.budget_spent() {
            self.status.budget_exhausted = true;
            log::warn!("placement budget exhausted after {} iterations", self.iterations);
            self.sink.emit(
                Diagnostic::new(
                    codes::BUDGET_EXHAUSTED,
                    format!("budget exhausted after {} iterations", self.iterations),
                )
                .with_help("raise `global.max_iterations` or `global.time_budget_secs`"),
            );
            return PlacerState::Converged;
        }
        if self.hpwl_stall >= global.hpwl_stall_iterations {
            log::info!("hpwl flat for {} iterations, converging", self.hpwl_stall);
            return PlacerState::Converged;
        }
        self.iterations += 1;

        let mut pseudo = PseudoNetSet::new();
        pseudo.add_anchors(info, self.pseudo_weight, self.progress);
        let factor = self.config.wirelength.legal_pseudo_net_factor;
        for &(unit, target) in &self.legal_targets {
            let u = info.unit(unit);
            if u.is_movable() {
                pseudo.push(unit, target, self.pseudo_weight * factor * u.weight);
            }
        }

        info.record_last_positions();
        for _ in 0..global.qp_passes.max(1) {
            if !self.solve(info, &pseudo) {
                return if self.has_spread {
                    PlacerState::Legalize
                } else {
                    PlacerState::Spread
                };
            }
        }
        self.lower_hpwl = info.total_hpwl();
        self.grids.rebuild(info);
        let overflow = self.grids.global_overflow_ratio(self.config.spread.target_utilization);
        let moved: f64 = info.units().iter().map(|u| u.position.manhattan(u.last_position)).sum();
        log::debug!(
            "iteration {}: hpwl {:.3}, overflow {:.4}, pseudo weight {:.5}, moved {:.3}",
            self.iterations,
            self.lower_hpwl,
            overflow,
            self.pseudo_weight,
            moved
        );
        if overflow > global.overflow_threshold {
            PlacerState::Spread
        } else {
            PlacerState::Legalize
        }
    }

    fn spread(&mut self, info: &mut PlacementInfo) -> PlacerState {
        let config = self.config;
        let global = &config.global;
        let forget = if self.progress > 0.5 {
            1.0 - 0.8 * self.progress
        } else {
            1.0
        };
        let report = self.spreader.spread(info, &mut self.grids, forget);
        self.has_spread = true;

        for region in report.zero_capacity {
            if self.status.zero_capacity_regions.contains(&region) {
                continue;
            }
            self.sink.emit(
                Diagnostic::new(
                    codes::ZERO_CAPACITY_REGION,
                    format!("{:.1} units of demand in a region without capacity", region.demand),
                )
                .with_subject(format!(
                    "region ({:.1}, {:.1})..({:.1}, {:.1})",
                    region.area.left, region.area.bottom, region.area.right, region.area.top
                )),
            );
            self.status.zero_capacity_regions.push(region);
        }

        // a pass that cannot reduce overflow any further counts as settled
        let settled = report.overflow_ratio <= global.overflow_threshold
            || self
                .last_overflow
                .is_some_and(|prev| report.overflow_ratio >= prev * (1.0 - global.hpwl_tolerance));
        self.last_overflow = Some(report.overflow_ratio);
        self.settled_spreads = if settled { self.settled_spreads + 1 } else { 0 };

        let upper = info.total_hpwl();
        self.update_schedule(upper);
        if self.settled_spreads >= global.spread_stable_window {
            PlacerState::Legalize
        } else {
            PlacerState::Optimize
        }
    }

    fn movable(info: &PlacementInfo, family: LegalFamily) -> Vec<UnitId> {
        info.units()
            .iter()
            .filter(|u| u.family == family && u.is_movable())
            .map(|u| u.id)
            .collect()
    }

    fn legalize(&mut self, info: &mut PlacementInfo) -> PlacerState {
        let config = self.config;
        let global = &config.global;
        let legal = &config.legalize;
        let mut failures: Vec<PlacementFailure> = Vec::new();
        let mut targets: Vec<(UnitId, Point)> = Vec::new();
        let mut total = 0.0;
        let mut max = 0.0_f64;

        let macros = Self::movable(info, LegalFamily::Exclusive);
        if !macros.is_empty() {
            let legalizer = MacroLegalizer::new(self.device, &self.index, legal);
            let rough = legalizer.legalize(info, &macros, LegalizeMode::Rough);
            let average = rough.total_displacement / macros.len() as f64;
            if rough.is_complete() && average < global.lock_displacement {
                let exact = legalizer.legalize(info, &macros, LegalizeMode::Exact);
                exact.commit(info, ClbSlots::capacity(legal));
                log::info!("locked {} macros, average displacement {average:.3}", exact.assignments.len());
                accumulate(&exact, &mut total, &mut max, &mut failures);
            } else {
                targets.extend(rough.assignments.iter().map(|a| (a.unit, a.position)));
                accumulate(&rough, &mut total, &mut max, &mut failures);
            }
        }

        let shared = Self::movable(info, LegalFamily::Shared);
        if !shared.is_empty() {
            let result = ClbLegalizer::new(self.device, &self.index, legal).legalize(info, &shared, LegalizeMode::Rough);
            targets.extend(result.assignments.iter().map(|a| (a.unit, a.position)));
            accumulate(&result, &mut total, &mut max, &mut failures);
        }

        self.status.displacement_history.push(StageDisplacement {
            iteration: self.iterations,
            state: PlacerState::Legalize,
            total,
            max,
        });

        let saved = info.positions();
        for &(unit, target) in &targets {
            info.set_position(unit, target);
        }
        let upper = info.total_hpwl();
        info.restore_positions(&saved);
        self.legal_targets = targets;
        self.update_schedule(upper);

        if !failures.is_empty() {
            self.failed_rounds += 1;
            log::debug!("legalization round left {} units without a site", failures.len());
            if self.failed_rounds > global.legalize_retry_budget {
                self.fail(failures);
                return PlacerState::Infeasible;
            }
            return PlacerState::Optimize;
        }
        self.failed_rounds = 0;

        let improving = match self.last_displacement {
            Some(prev) if prev > 0.0 => (prev - total) / prev > global.displacement_tolerance,
            Some(_) => false,
            None => true,
        };
        self.last_displacement = Some(total);
        if improving {
            PlacerState::Optimize
        } else {
            PlacerState::Converged
        }
    }

    fn converge(&mut self, info: &mut PlacementInfo) -> PlacerState {
        let config = self.config;
        let legal = &config.legalize;
        let mut failures = Vec::new();
        let mut total = 0.0;
        let mut max = 0.0_f64;

        let macros = Self::movable(info, LegalFamily::Exclusive);
        if !macros.is_empty() {
            let result = MacroLegalizer::new(self.device, &self.index, legal).legalize(info, &macros, LegalizeMode::Exact);
            result.commit(info, ClbSlots::capacity(legal));
            accumulate(&result, &mut total, &mut max, &mut failures);
        }
        let shared = Self::movable(info, LegalFamily::Shared);
        if !shared.is_empty() {
            let result = ClbLegalizer::new(self.device, &self.index, legal).legalize(info, &shared, LegalizeMode::Exact);
            result.commit(info, ClbSlots::capacity(legal));
            accumulate(&result, &mut total, &mut max, &mut failures);
        }
        self.status.displacement_history.push(StageDisplacement {
            iteration: self.iterations,
            state: PlacerState::Converged,
            total,
            max,
        });
        log::info!("final legalization: displacement {total:.3} (max {max:.3})");

        if failures.is_empty() {
            PlacerState::Packing
        } else {
            self.fail(failures);
            PlacerState::Infeasible
        }
    }

    fn pack(&mut self, info: &mut PlacementInfo) -> PlacerState {
        let report = Packer::new(self.device, &self.index, &self.config.packing).pack(info);
        self.sink.emit_all(report.failures.iter().map(|failure| {
            Diagnostic::new(codes::PACKING_CONFLICT, "unit fits no slice after rip-up")
                .with_subject(format!("unit {}", failure.name))
        }));
        self.status.failures.extend(report.failures);

        let snapped: Vec<(UnitId, Point)> = info
            .units()
            .iter()
            .filter(|u| u.packed)
            .filter_map(|u| {
                let site = self.device.site(u.site?)?;
                Some((u.id, site.position))
            })
            .collect();
        for (unit, position) in snapped {
            info.set_position(unit, position);
        }
        log::info!("packed {} units into {} sites", report.packed_units, report.sites_used);
        PlacerState::Done
    }

    fn fail(&mut self, failures: Vec<PlacementFailure>) {
        self.sink.emit_all(failures.iter().map(|failure| {
            Diagnostic::new(codes::LEGALIZATION_FAILURE, "no legal site within the largest search radius")
                .with_subject(format!("unit {}", failure.name))
                .with_help("raise `legalize.max_expansions` or free sites of this type")
        }));
        self.status.failures.extend(failures);
    }

    /// Records the upper-bound HPWL and updates progress, pseudo-net weight
    /// and the stall counter.
    fn update_schedule(&mut self, upper: f64) {
        let config = self.config;
        let global = &config.global;
        self.progress = progress(self.lower_hpwl, upper);
        self.status.hpwl_history.push(upper);

        let p = self.progress;
        if self.pseudo_weight < global.fast_growth_limit {
            self.pseudo_weight *= global.fast_growth;
        } else {
            self.pseudo_weight *= global.early_growth * (1.0 - p) + global.late_growth * p;
        }
        let history = &self.status.hpwl_history;
        let n = history.len();
        if n >= 3 && history[n - 1] > history[n - 2] && history[n - 2] > history[n - 3] {
            self.pseudo_weight *= 0.75;
        }
        if p > 0.85 && flat_window(history, global.hpwl_window, global.hpwl_tolerance) {
            self.pseudo_weight *= 2.0;
        }

        if upper < self.best_hpwl * (1.0 - global.hpwl_tolerance) {
            self.best_hpwl = upper;
            self.hpwl_stall = 0;
        } else {
            self.hpwl_stall += 1;
        }
    }
}

fn accumulate(result: &LegalizationResult, total: &mut f64, max: &mut f64, failures: &mut Vec<PlacementFailure>) {
    *total += result.total_displacement;
    *max = max.max(result.max_displacement);
    failures.extend(result.failures.iter().cloned());
}

/// How close the lower bound is to the upper bound, flattened toward one.
fn progress(lower: f64, upper: f64) -> f64 {
    let ratio = if upper > 0.0 { lower / upper } else { 1.0 };
    ratio.clamp(0.0, 0.999).powf(0.6)
}

/// Returns `true` if the RMS deviation of the last `window` values is below
/// `tolerance` relative to their minimum.
fn flat_window(history: &[f64], window: usize, tolerance: f64) -> bool {
    if window == 0 || history.len() < window {
        return false;
    }
    let tail = &history[history.len() - window..];
    let mean = tail.iter().sum::<f64>() / window as f64;
    let rms = (tail.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / window as f64).sqrt();
    let min = tail.iter().copied().fold(f64::INFINITY, f64::min);
    min > 0.0 && rms / min < tolerance
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::design::{CellKind, Design};
    use crate::qp::{SolveError, SparseSystem};
    use tessera_device::{DeviceBuilder, SiteType};

    fn slices() -> Device {
        DeviceBuilder::new("t", 4.0).columns(SiteType::SliceL, 4, 1.0).build()
    }

    fn build(design: &Design, device: &Device, table: &CompatiblePlacementTable) -> PlacementInfo {
        PlacementInfo::build(design, device, table, None, None, &DiagnosticSink::new()).unwrap()
    }

    #[test]
    fn two_unit_net_collapses() {
        let device = slices();
        let table = CompatiblePlacementTable::ultrascale();
        let mut d = Design::new("top");
        let a = d.add("a", CellKind::Lut { inputs: 2 });
        let b = d.add("b", CellKind::Lut { inputs: 2 });
        d.set_initial_position(a, Point::new(0.0, 0.0));
        d.set_initial_position(b, Point::new(3.0, 3.0));
        d.connect("n", a, &[b]);
        let mut info = build(&d, &device, &table);
        let config = PlacerConfig::default();
        let sink = DiagnosticSink::new();
        let mut placer = GlobalPlacer::new(&device, &table, &config, &sink);

        assert_eq!(placer.step(&mut info), PlacerState::Optimize);
        let pa = info.unit(UnitId::from_raw(0)).position;
        let pb = info.unit(UnitId::from_raw(1)).position;
        assert!(pa.manhattan(pb) < 1e-6);
        assert!((pa.x - 1.5).abs() < 1e-6 && (pa.y - 1.5).abs() < 1e-6);
        assert!(info.total_hpwl() < 1e-6);
    }

    #[test]
    fn chain_places_and_packs() {
        let device = slices();
        let table = CompatiblePlacementTable::ultrascale();
        let mut d = Design::new("top");
        let cells: Vec<_> = (0..8)
            .map(|i| {
                let c = d.add(format!("l{i}"), CellKind::Lut { inputs: 4 });
                d.set_initial_position(c, Point::new(f64::from(i % 4), f64::from(i / 2)));
                c
            })
            .collect();
        for pair in cells.windows(2) {
            d.connect(format!("n{}", pair[0]), pair[0], &[pair[1]]);
        }
        let mut info = build(&d, &device, &table);
        let config = PlacerConfig::default();
        let sink = DiagnosticSink::new();
        let status = GlobalPlacer::new(&device, &table, &config, &sink).run(&mut info);

        assert!(status.is_converged());
        assert!(status.failures.is_empty());
        assert!(!sink.has_errors());
        assert_eq!(info.units().len(), 8);
        for unit in info.units() {
            let site = unit.site.expect("every unit is bound");
            assert!(unit.packed);
            assert_eq!(unit.position, device.site(site).unwrap().position);
        }
        let packed: usize = info.occupancy().slot_assignments().values().map(|s| s.cells().len()).sum();
        assert_eq!(packed, 8);
        assert!(!status.displacement_history.is_empty());
    }

    #[test]
    fn three_dsps_on_two_sites_fail_once() {
        let device = DeviceBuilder::new("t", 2.0).column(SiteType::Dsp, 1.0).build();
        let table = CompatiblePlacementTable::ultrascale();
        let mut d = Design::new("top");
        for i in 0..3 {
            let c = d.add(format!("dsp{i}"), CellKind::Dsp48);
            d.set_initial_position(c, Point::new(0.0, f64::from(i) * 0.5));
        }
        let mut info = build(&d, &device, &table);
        let mut config = PlacerConfig::default();
        config.global.max_iterations = 20;
        config.global.legalize_retry_budget = 1;
        let sink = DiagnosticSink::new();
        let status = GlobalPlacer::new(&device, &table, &config, &sink).run(&mut info);

        assert_eq!(status.outcome, Outcome::Infeasible);
        assert_eq!(status.failure_count(crate::status::FailureKind::InfeasibleCandidate), 1);
        assert_eq!(sink.error_count(), 1);
    }

    #[test]
    fn exhausted_budget_still_legalizes() {
        let device = slices();
        let table = CompatiblePlacementTable::ultrascale();
        let mut d = Design::new("top");
        let a = d.add("a", CellKind::Lut { inputs: 2 });
        let b = d.add("b", CellKind::Lut { inputs: 2 });
        d.set_initial_position(a, Point::new(0.0, 0.0));
        d.set_initial_position(b, Point::new(3.0, 3.0));
        d.connect("n", a, &[b]);
        let mut info = build(&d, &device, &table);
        let mut config = PlacerConfig::default();
        config.global.max_iterations = 0;
        let sink = DiagnosticSink::new();
        let status = GlobalPlacer::new(&device, &table, &config, &sink).run(&mut info);

        assert!(status.budget_exhausted);
        assert!(status.is_converged());
        assert!(sink.diagnostics().iter().any(|d| d.code == codes::BUDGET_EXHAUSTED));
        assert!(info.units().iter().all(|u| u.site.is_some()));
    }

    struct Failing;

    impl QuadraticSolver for Failing {
        fn solve(&self, _: &SparseSystem, _: &mut [f64]) -> Result<usize, SolveError> {
            Err(SolveError::Diverged { iterations: 0 })
        }
    }

    #[test]
    fn numerical_stall_rolls_back_and_spreads() {
        let device = slices();
        let table = CompatiblePlacementTable::ultrascale();
        let mut d = Design::new("top");
        let a = d.add("a", CellKind::Lut { inputs: 2 });
        let b = d.add("b", CellKind::Lut { inputs: 2 });
        d.set_initial_position(a, Point::new(0.0, 0.0));
        d.set_initial_position(b, Point::new(3.0, 3.0));
        d.connect("n", a, &[b]);
        let mut info = build(&d, &device, &table);
        let config = PlacerConfig::default();
        let sink = DiagnosticSink::new();
        let optimizer = WirelengthOptimizer::with_solver(&config.wirelength, Failing);
        let mut placer = GlobalPlacer::with_optimizer(&device, &table, &config, &sink, optimizer);

        placer.step(&mut info);
        assert_eq!(placer.step(&mut info), PlacerState::Spread);
        assert_eq!(info.unit(UnitId::from_raw(1)).position, Point::new(3.0, 3.0));
        assert_eq!(placer.status().stalls, 2);
        assert!(sink.diagnostics().iter().all(|d| d.code == codes::NUMERICAL_STALL));
    }

    #[test]
    fn schedule_grows_weight_and_progress() {
        let device = slices();
        let table = CompatiblePlacementTable::ultrascale();
        let config = PlacerConfig::default();
        let sink = DiagnosticSink::new();
        let mut placer = GlobalPlacer::new(&device, &table, &config, &sink);
        placer.lower_hpwl = 5.0;
        placer.update_schedule(10.0);
        assert!((placer.pseudo_weight() - 0.001 * 1.825).abs() < 1e-12);
        assert!((placer.progress - 0.5_f64.powf(0.6)).abs() < 1e-12);

        let w = placer.pseudo_weight();
        placer.update_schedule(12.0);
        placer.update_schedule(14.0);
        // two rises in a row damp the growth
        assert!(placer.pseudo_weight() < w * 1.825 * 1.825);
    }

    #[test]
    fn progress_and_flatness() {
        assert!((progress(1.0, 1.0) - 0.999_f64.powf(0.6)).abs() < 1e-12);
        assert_eq!(progress(0.0, 4.0), 0.0);
        assert!(flat_window(&[10.0, 10.0, 10.01], 3, 0.01));
        assert!(!flat_window(&[10.0, 12.0, 14.0], 3, 0.01));
        assert!(!flat_window(&[10.0], 3, 0.01));
    }
}
