//! Density spreading by recursive bin partitioning.
//!
//! For every class grid, overflowing bins seed rectangular spread regions
//! that grow until their capacity covers their demand. Each region is then
//! bisected recursively: the box is cut at its capacity midpoint and its
//! units are divided so that each side receives demand in proportion to its
//! capacity, using a weighted quickselect. Regions are disjoint and are
//! processed in parallel; every region draws its pivots from its own
//! seeded generator, so the result does not depend on scheduling.

use crate::ids::UnitId;
use crate::model::{Axis, BinGrid, BinGrids, PlacementInfo};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tessera_common::{Point, Rect};
use tessera_config::SpreadConfig;
use tessera_device::BelClassId;

/// A spread region that had movable demand but no room for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZeroCapacityRegion {
    /// Class of the grid.
    pub class: BelClassId,
    /// Covered area.
    pub area: Rect,
    /// Movable demand inside.
    pub demand: f64,
}

/// Outcome of one spreading call.
#[derive(Debug, Clone, Default)]
pub struct SpreadReport {
    /// Spreading loops run, summed over grids.
    pub loops: u32,
    /// Global overflow ratio after spreading.
    pub overflow_ratio: f64,
    /// Regions skipped for lack of capacity.
    pub zero_capacity: Vec<ZeroCapacityRegion>,
    /// Grids that stopped because overflow stopped improving.
    pub stalled_grids: usize,
    /// Grids skipped because they had already converged.
    pub skipped_grids: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Region {
    c0: usize,
    r0: usize,
    c1: usize,
    r1: usize,
    capacity: f64,
    demand: f64,
}

#[derive(Debug, Clone, Copy)]
struct Item {
    id: UnitId,
    weight: f64,
    position: Point,
}

/// Spreads units of every class grid.
pub struct Spreader {
    config: SpreadConfig,
    seed: u64,
}

impl Spreader {
    /// Creates a spreader; `seed` feeds every region's pivot generator.
    pub fn new(config: &SpreadConfig, seed: u64) -> Self {
        Self {
            config: config.clone(),
            seed,
        }
    }

    /// Spreads all grids and records the new anchors.
    ///
    /// Each spread position is blended with the unit's previous spread
    /// target by `forget_ratio` before it becomes the unit's position,
    /// anchor, and spread target.
    pub fn spread(&self, info: &mut PlacementInfo, grids: &mut BinGrids, forget_ratio: f64) -> SpreadReport {
        let cfg = &self.config;
        let mut positions = info.positions();
        let mut touched = vec![false; positions.len()];
        let mut report = SpreadReport::default();

        for grid in &mut grids.grids {
            grid.rebuild_at(info, &positions);
            let ratio = grid.overflow_ratio(cfg.target_utilization);
            if ratio < cfg.overflow_tolerance {
                grid.stable_calls += 1;
                if grid.stable_calls > cfg.stable_passes {
                    report.skipped_grids += 1;
                    continue;
                }
            } else {
                grid.stable_calls = 0;
            }
            for unit in info.units() {
                if unit.primary_class == grid.class && unit.is_movable() {
                    touched[unit.id.index()] = true;
                }
            }
            let (loops, stalled) = self.spread_grid(info, grid, &mut positions, &mut report.zero_capacity);
            report.loops += loops;
            if stalled {
                report.stalled_grids += 1;
            }
        }

        let outline = info.outline();
        for (index, &hit) in touched.iter().enumerate() {
            if !hit {
                continue;
            }
            let id = UnitId::from_raw(index as u32);
            let spread = positions[index];
            let blended = match info.unit(id).spread_target {
                Some(previous) => spread.blend(previous, forget_ratio),
                None => spread,
            };
            let blended = outline.clamp(blended);
            info.set_position(id, blended);
            let unit = info.unit_mut(id);
            unit.anchor = Some(blended);
            unit.spread_target = Some(blended);
        }

        grids.rebuild(info);
        report.overflow_ratio = grids.global_overflow_ratio(cfg.target_utilization);
        log::debug!(
            "spread: {} loops, overflow {:.4}, {} stalled, {} skipped",
            report.loops,
            report.overflow_ratio,
            report.stalled_grids,
            report.skipped_grids
        );
        report
    }

    fn spread_grid(
        &self,
        info: &PlacementInfo,
        grid: &mut BinGrid,
        positions: &mut [Point],
        zero: &mut Vec<ZeroCapacityRegion>,
    ) -> (u32, bool) {
        let cfg = &self.config;
        let target = cfg.target_utilization;
        let mut history: Vec<f64> = Vec::new();

        for iteration in 0..cfg.max_loops {
            grid.rebuild_at(info, positions);
            if iteration > 0 && cfg.counter_reset > 0 && iteration % cfg.counter_reset == 0 {
                for bin in &mut grid.bins {
                    bin.overflow_passes = 0;
                    bin.clean_passes = 0;
                }
            }
            self.update_counters(grid);

            let over = grid.overflow_bins(target, cfg.overflow_tolerance);
            if over.is_empty() {
                return (iteration, false);
            }
            let total = grid.total_overflow(target);
            let window = cfg.stall_window as usize;
            if window > 0 && history.len() >= window {
                let past = history[history.len() - window];
                if past - total < cfg.stall_improvement * past {
                    log::debug!("spread stalled on class {} at overflow {total:.3}", grid.class);
                    return (iteration, true);
                }
            }
            history.push(total);

            let mut work = Vec::new();
            for region in grow_regions(grid, &over, target) {
                if region.capacity > 0.0 {
                    work.push(region);
                    continue;
                }
                let area = region_rect(grid, &region);
                if !zero.iter().any(|z| z.class == grid.class && z.area == area) {
                    zero.push(ZeroCapacityRegion {
                        class: grid.class,
                        area,
                        demand: region.demand,
                    });
                }
            }
            if work.is_empty() {
                return (iteration + 1, false);
            }

            let view: &BinGrid = grid;
            let current: &[Point] = positions;
            let moved: Vec<Vec<(UnitId, Point)>> = work
                .par_iter()
                .map(|region| {
                    let seed = region_seed(self.seed, view.class, region, iteration);
                    spread_region(view, info, current, region, seed)
                })
                .collect();
            for (id, p) in moved.into_iter().flatten() {
                positions[id.index()] = p;
            }
        }
        (cfg.max_loops, false)
    }

    fn update_counters(&self, grid: &mut BinGrid) {
        let cfg = &self.config;
        for bin in &mut grid.bins {
            if bin.utilization(cfg.target_utilization) > 1.0 + cfg.overflow_tolerance {
                bin.overflow_passes += 1;
                bin.clean_passes = 0;
                if bin.overflow_passes > cfg.overflow_strikes {
                    bin.shrink_ratio = (bin.shrink_ratio - cfg.shrink_step).max(cfg.shrink_floor);
                }
            } else {
                bin.clean_passes += 1;
                bin.overflow_passes = 0;
                if bin.clean_passes > cfg.clean_strikes {
                    bin.shrink_ratio = 1.0;
                }
            }
        }
    }
}

fn region_seed(seed: u64, class: BelClassId, region: &Region, iteration: u32) -> u64 {
    let mut h = seed ^ 0x9e37_79b9_7f4a_7c15;
    for word in [
        class.as_raw() as u64,
        region.c0 as u64,
        region.r0 as u64,
        iteration as u64,
    ] {
        h = (h ^ word).wrapping_mul(0x100_0000_01b3);
        h ^= h >> 29;
    }
    h
}

fn region_rect(grid: &BinGrid, region: &Region) -> Rect {
    let lo = &grid.bins[grid.index(region.c0, region.r0)].rect;
    let hi = &grid.bins[grid.index(region.c1, region.r1)].rect;
    lo.union(hi)
}

/// Grows one region per uncovered overflow bin, one side at a time.
///
/// Each step adds the adjacent strip with the most free capacity that does
/// not touch an earlier region.
fn grow_regions(grid: &BinGrid, over: &[usize], target: f64) -> Vec<Region> {
    let mut covered = vec![false; grid.bins.len()];
    let mut regions = Vec::new();

    for &start in over {
        if covered[start] {
            continue;
        }
        let (c, r) = (grid.bins[start].col, grid.bins[start].row);
        let (mut c0, mut r0, mut c1, mut r1) = (c, r, c, r);
        let (mut capacity, mut demand) = grid.window_totals(c0, r0, c1, r1, target);

        while capacity <= 0.0 || demand > capacity {
            let mut best: Option<(f64, (usize, usize, usize, usize))> = None;
            let candidates = [
                (c0 > 0).then(|| (c0 - 1, r0, c0 - 1, r1)),
                (c1 + 1 < grid.cols).then(|| (c1 + 1, r0, c1 + 1, r1)),
                (r0 > 0).then(|| (c0, r0 - 1, c1, r0 - 1)),
                (r1 + 1 < grid.rows).then(|| (c0, r1 + 1, c1, r1 + 1)),
            ];
            for strip in candidates.into_iter().flatten() {
                let (sc0, sr0, sc1, sr1) = strip;
                let blocked = (sr0..=sr1).any(|row| (sc0..=sc1).any(|col| covered[grid.index(col, row)]));
                if blocked {
                    continue;
                }
                let (gain, _) = grid.window_totals(sc0, sr0, sc1, sr1, target);
                if best.map_or(true, |(g, _)| gain > g) {
                    best = Some((gain, strip));
                }
            }
            let Some((_, (sc0, sr0, sc1, sr1))) = best else {
                break;
            };
            c0 = c0.min(sc0);
            r0 = r0.min(sr0);
            c1 = c1.max(sc1);
            r1 = r1.max(sr1);
            (capacity, demand) = grid.window_totals(c0, r0, c1, r1, target);
        }

        for row in r0..=r1 {
            for col in c0..=c1 {
                covered[grid.index(col, row)] = true;
            }
        }
        regions.push(Region {
            c0,
            r0,
            c1,
            r1,
            capacity,
            demand,
        });
    }
    regions
}

/// Spreads the movable units of one region, returning their new positions.
fn spread_region(
    grid: &BinGrid,
    info: &PlacementInfo,
    positions: &[Point],
    region: &Region,
    seed: u64,
) -> Vec<(UnitId, Point)> {
    let mut items = Vec::new();
    for row in region.r0..=region.r1 {
        for col in region.c0..=region.c1 {
            for &id in &grid.bins[grid.index(col, row)].units {
                let unit = info.unit(id);
                if unit.is_movable() {
                    items.push(Item {
                        id,
                        weight: unit.primary_demand,
                        position: positions[id.index()],
                    });
                }
            }
        }
    }
    items.sort_by_key(|it| it.id);

    let target = 1.0;
    let mut rng = StdRng::seed_from_u64(seed);
    let mut out = Vec::with_capacity(items.len());
    let mut stack = vec![(region.c0, region.r0, region.c1, region.r1, items)];

    while let Some((c0, r0, c1, r1, mut items)) = stack.pop() {
        if items.is_empty() {
            continue;
        }
        let lo_rect = grid.bins[grid.index(c0, r0)].rect;
        let hi_rect = grid.bins[grid.index(c1, r1)].rect;
        let rect = lo_rect.union(&hi_rect);
        let ncols = c1 - c0 + 1;
        let nrows = r1 - r0 + 1;

        if ncols == 1 && nrows == 1 {
            let n = items.len() as f64;
            let mx = rect.width() / (n + 1.0);
            let my = rect.height() / (n + 1.0);
            rescale(&mut items, Axis::X, rect.left + mx, rect.right - mx);
            rescale(&mut items, Axis::Y, rect.bottom + my, rect.top - my);
            out.extend(items.iter().map(|it| (it.id, it.position)));
            continue;
        }

        let axis = if ncols >= nrows { Axis::X } else { Axis::Y };
        let slices: Vec<f64> = match axis {
            Axis::X => (c0..=c1).map(|c| grid.window_totals(c, r0, c, r1, target).0).collect(),
            Axis::Y => (r0..=r1).map(|r| grid.window_totals(c0, r, c1, r, target).0).collect(),
        };
        let total: f64 = slices.iter().sum();
        let mut k = 1;
        let mut best = f64::INFINITY;
        let mut cum = 0.0;
        for split in 1..slices.len() {
            cum += slices[split - 1];
            let diff = (cum - total / 2.0).abs();
            if diff < best {
                best = diff;
                k = split;
            }
        }
        let left_cap: f64 = slices[..k].iter().sum();
        let fraction = if total > 0.0 {
            left_cap / total
        } else {
            k as f64 / slices.len() as f64
        };

        let demand: f64 = items.iter().map(|it| it.weight).sum();
        let split = weighted_split(&mut items, axis, fraction * demand, &mut rng);
        let mut right = items.split_off(split);
        let (left_box, right_box, cut, lo, hi) = match axis {
            Axis::X => {
                let cut = grid.bins[grid.index(c0 + k, r0)].rect.left;
                (
                    (c0, r0, c0 + k - 1, r1),
                    (c0 + k, r0, c1, r1),
                    cut,
                    rect.left,
                    rect.right,
                )
            }
            Axis::Y => {
                let cut = grid.bins[grid.index(c0, r0 + k)].rect.bottom;
                (
                    (c0, r0, c1, r0 + k - 1),
                    (c0, r0 + k, c1, r1),
                    cut,
                    rect.bottom,
                    rect.top,
                )
            }
        };
        rescale(&mut items, axis, lo, cut);
        rescale(&mut right, axis, cut, hi);
        stack.push((right_box.0, right_box.1, right_box.2, right_box.3, right));
        stack.push((left_box.0, left_box.1, left_box.2, left_box.3, items));
    }
    out
}

fn compare(a: &Item, b: &Item, axis: Axis) -> Ordering {
    axis.of(a.position)
        .total_cmp(&axis.of(b.position))
        .then(a.id.cmp(&b.id))
}

/// Reorders `items` so the first `k` are the lowest along `axis` and carry
/// demand as close to `target` as one item allows. Returns `k`.
fn weighted_split(items: &mut [Item], axis: Axis, target: f64, rng: &mut StdRng) -> usize {
    let mut lo = 0;
    let mut hi = items.len();
    let mut acc = 0.0;
    while lo < hi {
        let pivot = rng.gen_range(lo..hi);
        items.swap(pivot, hi - 1);
        let mut store = lo;
        for i in lo..hi - 1 {
            if compare(&items[i], &items[hi - 1], axis) == Ordering::Less {
                items.swap(i, store);
                store += 1;
            }
        }
        items.swap(store, hi - 1);

        let left = acc + items[lo..store].iter().map(|it| it.weight).sum::<f64>();
        if left >= target {
            hi = store;
            continue;
        }
        let with_pivot = left + items[store].weight;
        if with_pivot >= target {
            return if with_pivot - target < target - left {
                store + 1
            } else {
                store
            };
        }
        acc = with_pivot;
        lo = store + 1;
    }
    lo
}

/// Maps the items' coordinates along `axis` linearly onto `[lo, hi]`.
///
/// Items sharing one coordinate are spaced evenly in ID order instead.
fn rescale(items: &mut [Item], axis: Axis, lo: f64, hi: f64) {
    if items.is_empty() {
        return;
    }
    let (min, max) = items.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(a, b), it| {
        let c = axis.of(it.position);
        (a.min(c), b.max(c))
    });
    let set = |p: &mut Point, v: f64| match axis {
        Axis::X => p.x = v,
        Axis::Y => p.y = v,
    };
    if max - min > 1e-9 {
        for it in items.iter_mut() {
            let c = axis.of(it.position);
            set(&mut it.position, lo + (c - min) / (max - min) * (hi - lo));
        }
    } else {
        items.sort_by(|a, b| compare(a, b, axis));
        let n = items.len() as f64;
        for (k, it) in items.iter_mut().enumerate() {
            set(&mut it.position, lo + (hi - lo) * (k as f64 + 1.0) / (n + 1.0));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::design::{CellKind, Design};
    use tessera_device::{CompatiblePlacementTable, Device, DeviceBuilder, SiteType};
    use tessera_diagnostics::DiagnosticSink;

    fn one_slot_table() -> CompatiblePlacementTable {
        let mut t = CompatiblePlacementTable::new();
        t.add_class("SLICE_LUT", vec![SiteType::SliceL], 1.0);
        t.add_resource("LUT6", "SLICE_LUT", 1.0);
        t
    }

    fn four_luts_at_one_point() -> (Device, CompatiblePlacementTable, PlacementInfo) {
        let device = DeviceBuilder::new("t", 4.0)
            .columns(SiteType::SliceL, 4, 1.0)
            .build();
        let table = one_slot_table();
        let mut d = Design::new("top");
        for i in 0..4 {
            let c = d.add(format!("l{i}"), CellKind::Lut { inputs: 6 });
            d.set_initial_position(c, Point::new(0.5, 0.5));
        }
        let info = PlacementInfo::build(&d, &device, &table, None, None, &DiagnosticSink::new()).unwrap();
        (device, table, info)
    }

    fn config() -> SpreadConfig {
        SpreadConfig {
            bin_width: 2.0,
            bin_height: 1.0,
            target_utilization: 0.5,
            ..SpreadConfig::default()
        }
    }

    fn items(coords: &[f64]) -> Vec<Item> {
        coords
            .iter()
            .enumerate()
            .map(|(i, &x)| Item {
                id: UnitId::from_raw(i as u32),
                weight: 1.0,
                position: Point::new(x, 0.0),
            })
            .collect()
    }

    #[test]
    fn four_luts_end_one_per_bin() {
        let (device, table, mut info) = four_luts_at_one_point();
        let cfg = config();
        let mut grids = BinGrids::new(&info, &device, &table, cfg.bin_width, cfg.bin_height);
        assert_eq!(grids.grids[0].bins[0].capacity, 2.0);
        let report = Spreader::new(&cfg, 1).spread(&mut info, &mut grids, 1.0);
        assert!(report.zero_capacity.is_empty());
        assert_eq!(report.overflow_ratio, 0.0);
        for bin in &grids.grids[0].bins {
            assert!(bin.demand <= 1.0, "bin ({}, {}) holds {}", bin.col, bin.row, bin.demand);
        }
        for unit in info.units() {
            assert!(device.outline().contains(unit.position));
            assert_eq!(unit.anchor, Some(unit.position));
            assert_eq!(unit.spread_target, Some(unit.position));
        }
    }

    #[test]
    fn spreading_is_deterministic() {
        let (device, table, info) = four_luts_at_one_point();
        let cfg = config();
        let run = || {
            let mut info = info.clone();
            let mut grids = BinGrids::new(&info, &device, &table, cfg.bin_width, cfg.bin_height);
            Spreader::new(&cfg, 9).spread(&mut info, &mut grids, 1.0);
            info.positions()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn forget_ratio_blends_with_previous_target() {
        let (device, table, mut info) = four_luts_at_one_point();
        let cfg = config();
        let id = UnitId::from_raw(0);
        info.unit_mut(id).spread_target = Some(Point::new(0.0, 0.0));
        let mut grids = BinGrids::new(&info, &device, &table, cfg.bin_width, cfg.bin_height);
        let mut probe = info.clone();
        let mut probe_grids = grids.clone();
        Spreader::new(&cfg, 1).spread(&mut probe, &mut probe_grids, 1.0);
        let raw = probe.unit(id).position;
        Spreader::new(&cfg, 1).spread(&mut info, &mut grids, 0.5);
        let blended = info.unit(id).position;
        assert!((blended.x - raw.x * 0.5).abs() < 1e-9);
        assert!((blended.y - raw.y * 0.5).abs() < 1e-9);
    }

    #[test]
    fn converged_grid_is_skipped() {
        let (device, table, mut info) = four_luts_at_one_point();
        let cfg = SpreadConfig {
            stable_passes: 1,
            ..config()
        };
        let mut grids = BinGrids::new(&info, &device, &table, cfg.bin_width, cfg.bin_height);
        let spreader = Spreader::new(&cfg, 1);
        spreader.spread(&mut info, &mut grids, 1.0);
        assert_eq!(spreader.spread(&mut info, &mut grids, 1.0).skipped_grids, 0);
        assert_eq!(spreader.spread(&mut info, &mut grids, 1.0).skipped_grids, 1);
    }

    #[test]
    fn zero_capacity_region_is_reported() {
        let device = DeviceBuilder::new("t", 2.0)
            .columns(SiteType::SliceL, 2, 1.0)
            .build();
        let table = one_slot_table();
        let mut d = Design::new("top");
        for i in 0..2 {
            let c = d.add(format!("l{i}"), CellKind::Lut { inputs: 6 });
            d.set_initial_position(c, Point::new(0.5, 0.5));
        }
        let blocker = d.add("fixed", CellKind::Lut { inputs: 6 });
        d.fix_cell(blocker, Point::new(1.5, 1.5));
        let mut info = PlacementInfo::build(&d, &device, &table, None, None, &DiagnosticSink::new()).unwrap();
        let cfg = SpreadConfig {
            bin_width: 2.0,
            bin_height: 2.0,
            target_utilization: 0.25,
            max_loops: 3,
            ..SpreadConfig::default()
        };
        let mut grids = BinGrids::new(&info, &device, &table, cfg.bin_width, cfg.bin_height);
        let report = Spreader::new(&cfg, 1).spread(&mut info, &mut grids, 1.0);
        assert_eq!(report.zero_capacity.len(), 1);
        assert_eq!(report.zero_capacity[0].demand, 2.0);
    }

    #[test]
    fn weighted_split_balances_demand() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut v = items(&[5.0, 1.0, 4.0, 2.0, 3.0, 0.0]);
        let k = weighted_split(&mut v, Axis::X, 3.0, &mut rng);
        assert_eq!(k, 3);
        let mut left: Vec<f64> = v[..k].iter().map(|it| it.position.x).collect();
        left.sort_by(f64::total_cmp);
        assert_eq!(left, vec![0.0, 1.0, 2.0]);
    }

    #[test]
    fn weighted_split_extremes() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut v = items(&[1.0, 2.0]);
        assert_eq!(weighted_split(&mut v, Axis::X, 0.0, &mut rng), 0);
        assert_eq!(weighted_split(&mut v, Axis::X, 10.0, &mut rng), 2);
    }

    #[test]
    fn rescale_linear_and_degenerate() {
        let mut v = items(&[1.0, 3.0, 2.0]);
        rescale(&mut v, Axis::X, 10.0, 14.0);
        let xs: Vec<f64> = v.iter().map(|it| it.position.x).collect();
        assert_eq!(xs, vec![10.0, 14.0, 12.0]);

        let mut same = items(&[2.0, 2.0, 2.0]);
        rescale(&mut same, Axis::X, 0.0, 4.0);
        let xs: Vec<f64> = same.iter().map(|it| it.position.x).collect();
        assert_eq!(xs, vec![1.0, 2.0, 3.0]);
    }
}
