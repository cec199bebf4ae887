//! Bound-to-bound quadratic wirelength optimization.
//!
//! Every net is linearized around the current placement: the two boundary
//! pins along an axis are tied together, and each inner pin is tied to both
//! boundaries, with spring weights inversely proportional to the current
//! distance. Pseudo-nets pull units toward spreading anchors or legal
//! positions. The x and y systems are independent and are solved in
//! parallel.

use crate::ids::UnitId;
use crate::model::{Axis, PlacementInfo};
use crate::qp::{ConjugateGradient, QuadraticSolver, SolveError, SparseSystem};
use tessera_common::Point;
use tessera_config::WirelengthConfig;

/// A spring from one unit to a fixed target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PseudoNet {
    /// The pulled unit.
    pub unit: UnitId,
    /// Where it is pulled to.
    pub target: Point,
    /// Strength before dividing by the current distance.
    pub strength: f64,
}

/// Pseudo-nets for one solve.
#[derive(Debug, Clone, Default)]
pub struct PseudoNetSet {
    nets: Vec<PseudoNet>,
}

impl PseudoNetSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a pseudo-net.
    pub fn push(&mut self, unit: UnitId, target: Point, strength: f64) {
        self.nets.push(PseudoNet {
            unit,
            target,
            strength,
        });
    }

    /// Adds one pseudo-net per movable unit that has a spreading anchor.
    ///
    /// Strength grows with the unit's net count, and more steeply as the
    /// placement progresses.
    pub fn add_anchors(&mut self, info: &PlacementInfo, pseudo_weight: f64, progress: f64) {
        let exponent = 0.5 + 0.45 * progress;
        for unit in info.units() {
            if !unit.is_movable() {
                continue;
            }
            if let Some(target) = unit.anchor {
                let nets = (unit.nets.len() as f64).max(1.0);
                self.push(unit.id, target, pseudo_weight * unit.weight * nets.powf(exponent));
            }
        }
    }

    /// Number of pseudo-nets.
    pub fn len(&self) -> usize {
        self.nets.len()
    }

    /// Returns `true` if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.nets.is_empty()
    }

    /// Iterates over the pseudo-nets.
    pub fn iter(&self) -> impl Iterator<Item = &PseudoNet> {
        self.nets.iter()
    }
}

/// Summary of one optimization pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptimizeStats {
    /// Movable units solved for.
    pub unknowns: usize,
    /// Solver iterations along x.
    pub iterations_x: usize,
    /// Solver iterations along y.
    pub iterations_y: usize,
    /// HPWL after the pass.
    pub hpwl: f64,
}

/// Multiplier applied to the B2B weight of a net with `degree` pins.
pub fn degree_factor(degree: usize) -> f64 {
    match degree {
        0..=9 => 1.0,
        10..=19 => 1.2,
        20..=49 => 1.6,
        50..=99 => 1.8,
        100..=199 => 2.1,
        _ => 2.5,
    }
}

/// Builds and solves the B2B systems.
pub struct WirelengthOptimizer<S: QuadraticSolver = ConjugateGradient> {
    config: WirelengthConfig,
    solver: S,
}

impl WirelengthOptimizer<ConjugateGradient> {
    /// Creates an optimizer with the conjugate-gradient backend.
    pub fn new(config: &WirelengthConfig) -> Self {
        let solver = ConjugateGradient {
            max_iterations: config.solver_max_iterations,
            tolerance: config.solver_tolerance,
        };
        Self::with_solver(config, solver)
    }
}

impl<S: QuadraticSolver> WirelengthOptimizer<S> {
    /// Creates an optimizer with a custom backend.
    pub fn with_solver(config: &WirelengthConfig, solver: S) -> Self {
        Self {
            config: config.clone(),
            solver,
        }
    }

    /// Runs one B2B pass and moves every movable unit.
    ///
    /// Positions are written only if both axes solve; on error the
    /// placement is unchanged.
    pub fn optimize(&self, info: &mut PlacementInfo, pseudo: &PseudoNetSet) -> Result<OptimizeStats, SolveError> {
        info.refresh_bounds();
        let mut index: Vec<Option<usize>> = vec![None; info.units().len()];
        let mut movable = Vec::new();
        for unit in info.units() {
            if unit.is_movable() {
                index[unit.id.index()] = Some(movable.len());
                movable.push(unit.id);
            }
        }
        if movable.is_empty() {
            return Ok(OptimizeStats {
                unknowns: 0,
                iterations_x: 0,
                iterations_y: 0,
                hpwl: info.total_hpwl(),
            });
        }

        let view: &PlacementInfo = info;
        let (x, y) = rayon::join(
            || self.solve_axis(view, &index, &movable, Axis::X, pseudo),
            || self.solve_axis(view, &index, &movable, Axis::Y, pseudo),
        );
        let (xs, iterations_x) = x?;
        let (ys, iterations_y) = y?;

        let outline = info.outline();
        for (k, &id) in movable.iter().enumerate() {
            info.set_position(id, outline.clamp(Point::new(xs[k], ys[k])));
        }
        let hpwl = info.total_hpwl();
        log::debug!(
            "b2b pass: {} unknowns, {iterations_x}/{iterations_y} iterations, {} pseudo-nets, hpwl {hpwl:.3}",
            movable.len(),
            pseudo.len()
        );
        Ok(OptimizeStats {
            unknowns: movable.len(),
            iterations_x,
            iterations_y,
            hpwl,
        })
    }

    fn solve_axis(
        &self,
        info: &PlacementInfo,
        index: &[Option<usize>],
        movable: &[UnitId],
        axis: Axis,
        pseudo: &PseudoNetSet,
    ) -> Result<(Vec<f64>, usize), SolveError> {
        let system = self.build_system(info, index, movable.len(), axis, pseudo);
        let mut coords: Vec<f64> = movable
            .iter()
            .map(|&id| axis.of(info.unit(id).position))
            .collect();
        let iterations = self.solver.solve(&system, &mut coords)?;
        Ok((coords, iterations))
    }

    /// Assembles the system of one axis.
    pub fn build_system(
        &self,
        info: &PlacementInfo,
        index: &[Option<usize>],
        unknowns: usize,
        axis: Axis,
        pseudo: &PseudoNetSet,
    ) -> SparseSystem {
        let scale = match axis {
            Axis::X => 1.0,
            Axis::Y => self.config.y2x_ratio,
        };
        let min_distance = self.config.min_distance;
        let units = info.units();
        let mut system = SparseSystem::new(unknowns);

        for net in info.nets() {
            let degree = net.degree();
            if degree < 2 || degree > self.config.ignore_net_degree || net.unit_count < 2 {
                continue;
            }
            if !net.pins.iter().any(|p| index[p.unit.index()].is_some()) {
                continue;
            }
            let Some(bounds) = net
                .bounds()
                .copied()
                .or_else(|| net.compute_bounds(|u| units[u.index()].position))
            else {
                continue;
            };
            let base = 2.0 * net.weight / (degree - 1) as f64 * degree_factor(degree) * scale;
            let (lo, hi) = bounds.extremes(axis);

            let mut tie = |a: usize, b: usize| {
                let pa = &net.pins[a];
                let pb = &net.pins[b];
                if pa.unit == pb.unit {
                    return;
                }
                let oa = axis.offset(pa);
                let ob = axis.offset(pb);
                let ca = axis.of(units[pa.unit.index()].position) + oa;
                let cb = axis.of(units[pb.unit.index()].position) + ob;
                let w = base / min_distance.max((ca - cb).abs());
                match (index[pa.unit.index()], index[pb.unit.index()]) {
                    (Some(i), Some(j)) => system.connect(i, j, w, oa, ob),
                    (Some(i), None) => system.anchor(i, w, cb, oa),
                    (None, Some(j)) => system.anchor(j, w, ca, ob),
                    (None, None) => {}
                }
            };
            if lo != hi {
                tie(lo, hi);
            }
            for k in 0..degree {
                if k != lo && k != hi {
                    tie(k, lo);
                    tie(k, hi);
                }
            }
        }

        for p in pseudo.iter() {
            if let Some(i) = index.get(p.unit.index()).copied().flatten() {
                let target = axis.of(p.target);
                let current = axis.of(units[p.unit.index()].position);
                let w = p.strength * scale / min_distance.max((current - target).abs());
                system.anchor(i, w, target, 0.0);
            }
        }
        system
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::design::{CellKind, Design};
    use tessera_device::{CompatiblePlacementTable, DeviceBuilder, SiteType};
    use tessera_diagnostics::DiagnosticSink;

    fn build(design: &Design) -> PlacementInfo {
        let device = DeviceBuilder::new("t", 10.0)
            .columns(SiteType::SliceL, 10, 1.0)
            .build();
        PlacementInfo::build(
            design,
            &device,
            &CompatiblePlacementTable::ultrascale(),
            None,
            None,
            &DiagnosticSink::new(),
        )
        .unwrap()
    }

    #[test]
    fn degree_factors() {
        assert_eq!(degree_factor(2), 1.0);
        assert_eq!(degree_factor(10), 1.2);
        assert_eq!(degree_factor(49), 1.6);
        assert_eq!(degree_factor(50), 1.8);
        assert_eq!(degree_factor(150), 2.1);
        assert_eq!(degree_factor(5000), 2.5);
    }

    #[test]
    fn two_units_on_one_net_meet() {
        let mut d = Design::new("top");
        let a = d.add("a", CellKind::Lut { inputs: 2 });
        let b = d.add("b", CellKind::Lut { inputs: 2 });
        d.set_initial_position(a, Point::new(1.0, 2.0));
        d.set_initial_position(b, Point::new(7.0, 6.0));
        d.connect("n", a, &[b]);
        let mut info = build(&d);
        let opt = WirelengthOptimizer::new(&WirelengthConfig::default());
        let stats = opt.optimize(&mut info, &PseudoNetSet::new()).unwrap();
        let pa = info.unit(info.cell(a).unit).position;
        let pb = info.unit(info.cell(b).unit).position;
        assert!((pa.x - pb.x).abs() < 1e-6);
        assert!((pa.y - pb.y).abs() < 1e-6);
        assert!(stats.hpwl < 1e-6);
        assert_eq!(stats.unknowns, 2);
    }

    #[test]
    fn free_unit_moves_to_fixed_neighbour() {
        let mut d = Design::new("top");
        let a = d.add("a", CellKind::Lut { inputs: 2 });
        let pad = d.add("pad", CellKind::Lut { inputs: 1 });
        d.fix_cell(pad, Point::new(8.0, 3.0));
        d.set_initial_position(a, Point::new(1.0, 1.0));
        d.connect("n", pad, &[a]);
        let mut info = build(&d);
        let opt = WirelengthOptimizer::new(&WirelengthConfig::default());
        opt.optimize(&mut info, &PseudoNetSet::new()).unwrap();
        let pa = info.unit(info.cell(a).unit).position;
        assert!((pa.x - 8.0).abs() < 1e-6);
        assert!((pa.y - 3.0).abs() < 1e-6);
        assert_eq!(info.unit(info.cell(pad).unit).position, Point::new(8.0, 3.0));
    }

    #[test]
    fn pseudo_net_pulls_toward_target() {
        let mut d = Design::new("top");
        let a = d.add("a", CellKind::Lut { inputs: 2 });
        d.set_initial_position(a, Point::new(2.0, 2.0));
        let mut info = build(&d);
        let id = info.cell(a).unit;
        let mut pseudo = PseudoNetSet::new();
        pseudo.push(id, Point::new(6.0, 4.0), 1.0);
        let opt = WirelengthOptimizer::new(&WirelengthConfig::default());
        opt.optimize(&mut info, &pseudo).unwrap();
        let p = info.unit(id).position;
        assert!((p.x - 6.0).abs() < 1e-6 && (p.y - 4.0).abs() < 1e-6);
    }

    #[test]
    fn anchors_only_for_movable_units() {
        let mut d = Design::new("top");
        let a = d.add("a", CellKind::Lut { inputs: 2 });
        let b = d.add("b", CellKind::Lut { inputs: 2 });
        d.fix_cell(b, Point::new(1.0, 1.0));
        let mut info = build(&d);
        for id in [info.cell(a).unit, info.cell(b).unit] {
            info.unit_mut(id).anchor = Some(Point::new(3.0, 3.0));
        }
        let mut set = PseudoNetSet::new();
        set.add_anchors(&info, 0.01, 0.0);
        assert_eq!(set.len(), 1);
        let net = set.iter().next().unwrap();
        assert_eq!(net.unit, info.cell(a).unit);
        assert!((net.strength - 0.01).abs() < 1e-12);
    }

    #[test]
    fn failed_solve_leaves_positions() {
        struct Failing;
        impl QuadraticSolver for Failing {
            fn solve(&self, _: &SparseSystem, _: &mut [f64]) -> Result<usize, SolveError> {
                Err(SolveError::Diverged { iterations: 0 })
            }
        }
        let mut d = Design::new("top");
        let a = d.add("a", CellKind::Lut { inputs: 2 });
        let b = d.add("b", CellKind::Lut { inputs: 2 });
        d.set_initial_position(a, Point::new(1.0, 1.0));
        d.set_initial_position(b, Point::new(5.0, 5.0));
        d.connect("n", a, &[b]);
        let mut info = build(&d);
        let before = info.positions();
        let opt = WirelengthOptimizer::with_solver(&WirelengthConfig::default(), Failing);
        assert!(opt.optimize(&mut info, &PseudoNetSet::new()).is_err());
        assert_eq!(info.positions(), before);
    }

    #[test]
    fn huge_nets_are_ignored() {
        let mut d = Design::new("top");
        let a = d.add("a", CellKind::Lut { inputs: 2 });
        let b = d.add("b", CellKind::Lut { inputs: 2 });
        d.set_initial_position(a, Point::new(1.0, 1.0));
        d.set_initial_position(b, Point::new(5.0, 5.0));
        d.connect("clk", a, &[b]);
        let mut info = build(&d);
        let config = WirelengthConfig {
            ignore_net_degree: 1,
            ..WirelengthConfig::default()
        };
        let opt = WirelengthOptimizer::new(&config);
        opt.optimize(&mut info, &PseudoNetSet::new()).unwrap();
        assert_eq!(info.unit(info.cell(a).unit).position, Point::new(1.0, 1.0));
    }
}
