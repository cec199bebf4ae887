//! Per-class density bins.
//!
//! Each BEL class gets its own grid of bins over the device outline. A bin's
//! capacity is the number of class slots offered by the sites whose origin
//! falls inside it. Demand is recomputed from scratch from unit positions
//! whenever it is needed; grids are never patched incrementally.

use crate::ids::UnitId;
use crate::model::info::PlacementInfo;
use crate::model::unit::PlacementUnit;
use rayon::prelude::*;
use tessera_common::{Point, Rect};
use tessera_device::{BelClassId, CompatiblePlacementTable, Device};

/// One density bin.
#[derive(Debug, Clone)]
pub struct Bin {
    /// Column in the grid.
    pub col: usize,
    /// Row in the grid.
    pub row: usize,
    /// Covered area.
    pub rect: Rect,
    /// Class slots inside the bin.
    pub capacity: f64,
    /// Demand from units that cannot move.
    pub determined: f64,
    /// Demand from every unit of the class.
    pub demand: f64,
    /// Units counted in `demand`.
    pub units: Vec<UnitId>,
    /// Multiplier applied to capacity for chronically overflowing bins.
    pub shrink_ratio: f64,
    /// Consecutive passes the bin overflowed.
    pub overflow_passes: u32,
    /// Consecutive passes the bin was within capacity.
    pub clean_passes: u32,
}

impl Bin {
    /// Capacity after shrinking and the utilization target.
    pub fn effective_capacity(&self, target: f64) -> f64 {
        self.capacity * self.shrink_ratio * target
    }

    /// Demand over effective capacity; infinite when demand meets no capacity.
    pub fn utilization(&self, target: f64) -> f64 {
        let cap = self.effective_capacity(target);
        if cap > 0.0 {
            self.demand / cap
        } else if self.demand > 0.0 {
            f64::INFINITY
        } else {
            0.0
        }
    }

    /// Demand above effective capacity.
    pub fn overflow(&self, target: f64) -> f64 {
        (self.demand - self.effective_capacity(target)).max(0.0)
    }
}

/// The bin grid of one BEL class.
#[derive(Debug, Clone)]
pub struct BinGrid {
    /// Class the grid counts.
    pub class: BelClassId,
    /// Number of bin columns.
    pub cols: usize,
    /// Number of bin rows.
    pub rows: usize,
    /// Bin width.
    pub bin_width: f64,
    /// Bin height.
    pub bin_height: f64,
    /// Bins in row-major order.
    pub bins: Vec<Bin>,
    /// Consecutive spreading calls that found the grid within tolerance.
    pub stable_calls: u32,
}

impl BinGrid {
    /// Creates the grid for `class` and fills in capacities.
    pub fn new(
        device: &Device,
        table: &CompatiblePlacementTable,
        class: BelClassId,
        bin_width: f64,
        bin_height: f64,
    ) -> Self {
        let outline = device.outline();
        let cols = ((outline.width() / bin_width).ceil() as usize).max(1);
        let rows = ((outline.height() / bin_height).ceil() as usize).max(1);
        let mut bins = Vec::with_capacity(cols * rows);
        for row in 0..rows {
            for col in 0..cols {
                let left = outline.left + col as f64 * bin_width;
                let bottom = outline.bottom + row as f64 * bin_height;
                bins.push(Bin {
                    col,
                    row,
                    rect: Rect::new(
                        left,
                        bottom,
                        (left + bin_width).min(outline.right),
                        (bottom + bin_height).min(outline.top),
                    ),
                    capacity: 0.0,
                    determined: 0.0,
                    demand: 0.0,
                    units: Vec::new(),
                    shrink_ratio: 1.0,
                    overflow_passes: 0,
                    clean_passes: 0,
                });
            }
        }
        let mut grid = Self {
            class,
            cols,
            rows,
            bin_width,
            bin_height,
            bins,
            stable_calls: 0,
        };
        for site in device.sites() {
            let slots = table.slots_at(class, site.site_type);
            if slots > 0.0 {
                let i = grid.bin_index(site.position);
                grid.bins[i].capacity += slots;
            }
        }
        grid
    }

    /// Row-major index of the bin at `(col, row)`.
    pub fn index(&self, col: usize, row: usize) -> usize {
        row * self.cols + col
    }

    /// Column and row containing `p`, clamped to the grid.
    pub fn cell_of(&self, p: Point) -> (usize, usize) {
        let col = (p.x / self.bin_width).floor().max(0.0) as usize;
        let row = (p.y / self.bin_height).floor().max(0.0) as usize;
        (col.min(self.cols - 1), row.min(self.rows - 1))
    }

    /// Index of the bin containing `p`, clamped to the grid.
    pub fn bin_index(&self, p: Point) -> usize {
        let (col, row) = self.cell_of(p);
        self.index(col, row)
    }

    /// Recomputes demand from the current unit positions.
    pub fn rebuild(&mut self, info: &PlacementInfo) {
        self.fill(info, |u| u.position);
    }

    /// Recomputes demand from working positions indexed by unit.
    pub fn rebuild_at(&mut self, info: &PlacementInfo, positions: &[Point]) {
        self.fill(info, |u| positions[u.id.index()]);
    }

    fn fill(&mut self, info: &PlacementInfo, position_of: impl Fn(&PlacementUnit) -> Point) {
        for bin in &mut self.bins {
            bin.demand = 0.0;
            bin.determined = 0.0;
            bin.units.clear();
        }
        for unit in info.units() {
            if unit.primary_class != self.class {
                continue;
            }
            let i = self.bin_index(position_of(unit));
            let bin = &mut self.bins[i];
            bin.demand += unit.primary_demand;
            if !unit.is_movable() {
                bin.determined += unit.primary_demand;
            }
            bin.units.push(unit.id);
        }
    }

    /// Total demand.
    pub fn total_demand(&self) -> f64 {
        self.bins.iter().map(|b| b.demand).sum()
    }

    /// Total overflow.
    pub fn total_overflow(&self, target: f64) -> f64 {
        self.bins.iter().map(|b| b.overflow(target)).sum()
    }

    /// Overflow over demand, or zero for an empty grid.
    pub fn overflow_ratio(&self, target: f64) -> f64 {
        let demand = self.total_demand();
        if demand > 0.0 {
            self.total_overflow(target) / demand
        } else {
            0.0
        }
    }

    /// Bins whose utilization exceeds `1 + tolerance`, most utilized first.
    pub fn overflow_bins(&self, target: f64, tolerance: f64) -> Vec<usize> {
        let mut over: Vec<(usize, f64)> = self
            .bins
            .iter()
            .enumerate()
            .map(|(i, b)| (i, b.utilization(target)))
            .filter(|&(_, u)| u > 1.0 + tolerance)
            .collect();
        over.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        over.into_iter().map(|(i, _)| i).collect()
    }

    /// Capacity left for movable units and movable demand, summed over an
    /// inclusive bin rectangle.
    pub fn window_totals(&self, c0: usize, r0: usize, c1: usize, r1: usize, target: f64) -> (f64, f64) {
        let mut cap = 0.0;
        let mut demand = 0.0;
        for row in r0..=r1 {
            for col in c0..=c1 {
                let bin = &self.bins[self.index(col, row)];
                cap += (bin.effective_capacity(target) - bin.determined).max(0.0);
                demand += bin.demand - bin.determined;
            }
        }
        (cap, demand)
    }
}

/// Bin grids for every class that has units.
#[derive(Debug, Clone, Default)]
pub struct BinGrids {
    /// Grids in class order.
    pub grids: Vec<BinGrid>,
}

impl BinGrids {
    /// Creates grids for the classes used by `info`.
    pub fn new(
        info: &PlacementInfo,
        device: &Device,
        table: &CompatiblePlacementTable,
        bin_width: f64,
        bin_height: f64,
    ) -> Self {
        let mut classes: Vec<BelClassId> = info.units().iter().map(|u| u.primary_class).collect();
        classes.sort_unstable();
        classes.dedup();
        let grids = classes
            .into_iter()
            .map(|c| BinGrid::new(device, table, c, bin_width, bin_height))
            .collect();
        Self { grids }
    }

    /// Rebuilds every grid.
    pub fn rebuild(&mut self, info: &PlacementInfo) {
        self.grids.par_iter_mut().for_each(|g| g.rebuild(info));
    }

    /// Overflow over demand across every grid.
    pub fn global_overflow_ratio(&self, target: f64) -> f64 {
        let demand: f64 = self.grids.iter().map(BinGrid::total_demand).sum();
        if demand > 0.0 {
            self.grids.iter().map(|g| g.total_overflow(target)).sum::<f64>() / demand
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::design::{CellKind, Design};
    use tessera_device::{DeviceBuilder, SiteType};
    use tessera_diagnostics::DiagnosticSink;

    fn setup(positions: &[(f64, f64)]) -> (Device, CompatiblePlacementTable, PlacementInfo) {
        let device = DeviceBuilder::new("t", 4.0)
            .columns(SiteType::SliceL, 4, 1.0)
            .build();
        let table = CompatiblePlacementTable::ultrascale();
        let mut d = Design::new("top");
        for (i, &(x, y)) in positions.iter().enumerate() {
            let c = d.add(format!("l{i}"), CellKind::Lut { inputs: 6 });
            d.set_initial_position(c, Point::new(x, y));
        }
        let info = PlacementInfo::build(&d, &device, &table, None, None, &DiagnosticSink::new()).unwrap();
        (device, table, info)
    }

    #[test]
    fn capacity_from_sites() {
        let (device, table, _) = setup(&[]);
        let lut = table.class_id("SLICE_LUT").unwrap();
        let grid = BinGrid::new(&device, &table, lut, 2.0, 2.0);
        assert_eq!((grid.cols, grid.rows), (2, 2));
        // four sites per bin, eight LUT slots each
        for bin in &grid.bins {
            assert_eq!(bin.capacity, 32.0);
        }
    }

    #[test]
    fn rebuild_counts_demand() {
        let (device, table, info) = setup(&[(0.5, 0.5), (0.5, 0.5), (3.0, 3.0)]);
        let lut = table.class_id("SLICE_LUT").unwrap();
        let mut grid = BinGrid::new(&device, &table, lut, 2.0, 2.0);
        grid.rebuild(&info);
        assert_eq!(grid.bins[0].demand, 2.0);
        assert_eq!(grid.bins[3].demand, 1.0);
        assert_eq!(grid.total_demand(), 3.0);
        assert_eq!(grid.bins[0].units.len(), 2);
    }

    #[test]
    fn overflow_ordering() {
        let (device, table, info) = setup(&[(0.5, 0.5), (0.5, 0.5), (0.5, 0.5), (3.0, 3.0), (3.0, 3.0)]);
        let lut = table.class_id("SLICE_LUT").unwrap();
        let mut grid = BinGrid::new(&device, &table, lut, 2.0, 2.0);
        for bin in &mut grid.bins {
            bin.capacity = 1.0;
        }
        grid.rebuild(&info);
        assert_eq!(grid.overflow_bins(1.0, 0.05), vec![0, 3]);
        assert_eq!(grid.total_overflow(1.0), 3.0);
        assert_eq!(grid.overflow_ratio(1.0), 3.0 / 5.0);
    }

    #[test]
    fn zero_capacity_with_demand_is_infinite() {
        let bin = Bin {
            col: 0,
            row: 0,
            rect: Rect::default(),
            capacity: 0.0,
            determined: 0.0,
            demand: 1.0,
            units: vec![],
            shrink_ratio: 1.0,
            overflow_passes: 0,
            clean_passes: 0,
        };
        assert!(bin.utilization(1.0).is_infinite());
    }

    #[test]
    fn grids_only_for_used_classes() {
        let (device, table, info) = setup(&[(0.5, 0.5)]);
        let grids = BinGrids::new(&info, &device, &table, 2.0, 2.0);
        assert_eq!(grids.grids.len(), 1);
        assert_eq!(grids.global_overflow_ratio(1.0), 0.0);
    }
}
