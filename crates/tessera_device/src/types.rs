//! Core fabric types: site types, sites, columns, and clock regions.

use crate::ids::{ClockRegionId, SiteId};
use serde::{Deserialize, Serialize};
use std::fmt;
use tessera_common::{Point, Rect};

/// The functional type of a placement site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SiteType {
    /// A logic slice with LUTs, flip-flops, wide muxes, and a carry chain.
    SliceL,
    /// A logic slice whose LUTs can also act as distributed RAM.
    SliceM,
    /// A DSP multiply-accumulate block.
    Dsp,
    /// A block RAM.
    Bram,
    /// An I/O pad.
    Io,
}

impl SiteType {
    /// Returns `true` for the CLB-class slice types.
    pub fn is_clb(self) -> bool {
        matches!(self, SiteType::SliceL | SiteType::SliceM)
    }

    /// Returns the name used in site names, e.g. `SLICEL`.
    pub fn prefix(self) -> &'static str {
        match self {
            SiteType::SliceL => "SLICEL",
            SiteType::SliceM => "SLICEM",
            SiteType::Dsp => "DSP",
            SiteType::Bram => "RAMB36",
            SiteType::Io => "IOB",
        }
    }
}

impl fmt::Display for SiteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// A physical placement site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Site {
    /// The unique ID of this site.
    pub id: SiteId,
    /// The vendor-style site name, e.g. `SLICEL_X3Y12`.
    pub name: String,
    /// The functional type of this site.
    pub site_type: SiteType,
    /// Site origin in device coordinates.
    pub position: Point,
    /// Index of the [`SiteColumn`] holding this site.
    pub column: u32,
    /// Row of this site within its column, counted from the bottom.
    pub row: u32,
    /// The clock region containing this site.
    pub clock_region: ClockRegionId,
}

/// A vertical run of same-typed sites with a fixed pitch.
///
/// Multi-site macros (carry chains, BRAM/DSP cascades) occupy consecutive
/// rows of one column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteColumn {
    /// Column index.
    pub index: u32,
    /// Horizontal coordinate of every site in the column.
    pub x: f64,
    /// Type of every site in the column.
    pub site_type: SiteType,
    /// Vertical distance between consecutive rows.
    pub pitch: f64,
    /// Sites ordered by row.
    pub sites: Vec<SiteId>,
}

/// A rectangular clock region.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClockRegion {
    /// The unique ID of this region.
    pub id: ClockRegionId,
    /// Region column in the clock-region grid.
    pub col: u32,
    /// Region row in the clock-region grid.
    pub row: u32,
    /// Covered area.
    pub bounds: Rect,
}
