//! Analytical placement core for heterogeneous FPGA fabrics.
//!
//! Given a technology-mapped [`Design`] and a [`Device`], this crate places
//! every cell on a concrete site and packs small cells into slice slots.
//!
//! # Pipeline
//!
//! 1. **Model**: group cells into [`PlacementUnit`]s and build
//!    [`PlacementNet`]s, bin grids, and the occupancy table
//! 2. **Optimize**: bound-to-bound quadratic wirelength solves
//! 3. **Spread**: recursive bin partitioning to remove overflow
//! 4. **Legalize**: minimum-cost matching onto sites, refined by dynamic
//!    programming along columns
//! 5. **Pack**: concurrent per-site cluster queues fill slice slots
//!
//! Steps 2-4 repeat under [`GlobalPlacer`] until legal displacement stops
//! shrinking or the budget runs out.
//!
//! # Usage
//!
//! ```ignore
//! use tessera_place::place;
//!
//! let (info, status) = place(&design, &device, &table, None, None, &config, &sink)?;
//! assert!(status.is_converged());
//! ```

#![warn(missing_docs)]

pub mod codes;
pub mod design;
pub mod ids;
pub mod legalize;
pub mod matching;
pub mod model;
pub mod packing;
pub mod placer;
pub mod qp;
pub mod spread;
pub mod status;
pub mod wirelength;

pub use design::{CellKind, ClusterHint, Design, MacroHint, MacroKind, NetWeights};
pub use ids::{CellId, ControlSetId, DesignNetId, NetId, UnitId};
pub use model::{ClbSlots, PlacementInfo, PlacementNet, PlacementUnit, SiteOccupancy};
pub use packing::{PackingReport, SlotAssignment};
pub use placer::{GlobalPlacer, PlacerState};
pub use status::{FailureKind, Outcome, PlacementFailure, PlacementStatus};

use tessera_common::TesseraResult;
use tessera_config::PlacerConfig;
use tessera_device::{CompatiblePlacementTable, Device};
use tessera_diagnostics::{DiagnosticSink, TerminalRenderer};

/// Builds the placement model for `design` and runs the placer on it.
///
/// Recoverable problems are reported through `sink` and the returned
/// [`PlacementStatus`]; only broken input, such as a cell type with no site
/// on `device`, returns an error. When `config.global.threads` is set the
/// run uses a dedicated thread pool of that size. The diagnostics this run
/// added to `sink` are also forwarded to `log` with a per-code summary.
pub fn place(
    design: &Design,
    device: &Device,
    table: &CompatiblePlacementTable,
    clusters: Option<&[ClusterHint]>,
    weights: Option<&NetWeights>,
    config: &PlacerConfig,
    sink: &DiagnosticSink,
) -> TesseraResult<(PlacementInfo, PlacementStatus)> {
    let mark = sink.mark();
    let run = || -> TesseraResult<(PlacementInfo, PlacementStatus)> {
        let mut info = PlacementInfo::build(design, device, table, clusters, weights, sink)?;
        let status = GlobalPlacer::new(device, table, config, sink).run(&mut info);
        Ok((info, status))
    };
    let result = match config.global.threads {
        Some(threads) => match rayon::ThreadPoolBuilder::new().num_threads(threads).build() {
            Ok(pool) => pool.install(run),
            Err(err) => {
                log::warn!("could not start a {threads}-thread pool ({err}); using the global pool");
                run()
            }
        },
        None => run(),
    };
    TerminalRenderer::default().log_run(&sink.since(mark), &sink.counts_since(mark));
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_common::Point;
    use tessera_device::{DeviceBuilder, SiteType};

    fn logic_design() -> Design {
        let mut d = Design::new("top");
        let cs = d.control_set("clk", None, None);
        let mut cells = Vec::new();
        for i in 0..6 {
            let lut = d.add(format!("lut{i}"), CellKind::Lut { inputs: 4 });
            d.set_initial_position(lut, Point::new(f64::from(i % 3), f64::from(i)));
            cells.push(lut);
        }
        for i in 0..4 {
            let ff = d.add(format!("ff{i}"), CellKind::Ff);
            d.set_control_set(ff, cs);
            d.set_initial_position(ff, Point::new(3.0, f64::from(i)));
            d.connect(format!("q{i}"), cells[i as usize], &[ff]);
            cells.push(ff);
        }
        for i in 0..5 {
            d.connect(format!("n{i}"), cells[i], &[cells[i + 1]]);
        }
        d
    }

    #[test]
    fn places_every_cell_exactly_once() {
        let device = DeviceBuilder::new("t", 6.0)
            .columns(SiteType::SliceL, 3, 1.0)
            .column(SiteType::SliceM, 1.0)
            .build();
        let table = CompatiblePlacementTable::ultrascale();
        let design = logic_design();
        let mut config = PlacerConfig::default();
        config.global.threads = Some(2);
        let sink = DiagnosticSink::new();

        let (info, status) = place(&design, &device, &table, None, None, &config, &sink).unwrap();
        assert!(status.is_converged());
        assert!(status.failures.is_empty());
        assert!(status.final_hpwl.is_finite());

        let mut seen: Vec<CellId> = info
            .occupancy()
            .slot_assignments()
            .values()
            .flat_map(SlotAssignment::cells)
            .collect();
        seen.sort_unstable();
        let all: Vec<CellId> = (0..design.cell_count() as u32).map(CellId::from_raw).collect();
        assert_eq!(seen, all);

        for unit in info.units() {
            let site = device.site(unit.site.unwrap()).unwrap();
            assert_eq!(unit.position, site.position);
        }
    }

    #[test]
    fn lut_ff_pairs_fill_one_slice() {
        let device = DeviceBuilder::new("t", 1.0).column(SiteType::SliceL, 1.0).build();
        let table = CompatiblePlacementTable::ultrascale();
        let mut design = Design::new("top");
        let cs = design.control_set("clk", None, None);
        for i in 0..8 {
            let lut = design.add(format!("lut{i}"), CellKind::Lut { inputs: 4 });
            let ff = design.add(format!("ff{i}"), CellKind::Ff);
            design.set_control_set(ff, cs);
            design.connect(format!("d{i}"), lut, &[ff]);
        }
        let sink = DiagnosticSink::new();

        let (info, status) = place(&design, &device, &table, None, None, &PlacerConfig::default(), &sink).unwrap();
        assert!(status.is_converged(), "{:?}", status.failures);
        assert!(status.failures.is_empty());
        let site = device.site_at(0, 0).unwrap();
        assert_eq!(info.occupancy().units_at(site).len(), info.units().len());
        let packed = info.occupancy().slots(site).map(SlotAssignment::cells).unwrap_or_default();
        assert_eq!(packed.len(), 16);
    }

    #[test]
    fn unknown_resource_is_an_error() {
        let device = DeviceBuilder::new("t", 2.0).column(SiteType::SliceL, 1.0).build();
        let table = CompatiblePlacementTable::ultrascale();
        let mut design = Design::new("top");
        design.add("dsp", CellKind::Dsp48);
        let sink = DiagnosticSink::new();
        let result = place(&design, &device, &table, None, None, &PlacerConfig::default(), &sink);
        assert!(result.is_err());
    }
}
