//! Placement units: the movable entities of the optimization.

use crate::design::{CellKind, MacroKind};
use crate::ids::{CellId, NetId, UnitId};
use serde::{Deserialize, Serialize};
use tessera_common::Point;
use tessera_config::LegalizeConfig;
use tessera_device::{BelClassId, SiteId, SiteType};

/// Counts of the primitive resources inside a unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceCounts {
    /// Look-up tables, including LUTs used as logic inside LUTRAM macros.
    pub luts: u32,
    /// Flip-flops.
    pub ffs: u32,
    /// Carry elements.
    pub carries: u32,
    /// F7/F8 muxes.
    pub muxes: u32,
    /// LUTs used as distributed memory.
    pub lutrams: u32,
    /// Block RAMs.
    pub brams: u32,
    /// DSP blocks.
    pub dsps: u32,
    /// I/O buffers.
    pub ios: u32,
}

impl ResourceCounts {
    /// Counts one more cell of the given kind.
    pub fn add(&mut self, kind: CellKind) {
        match kind {
            CellKind::Lut { .. } | CellKind::LutRam { as_memory: false } => self.luts += 1,
            CellKind::LutRam { as_memory: true } => self.lutrams += 1,
            CellKind::Ff => self.ffs += 1,
            CellKind::Carry8 => self.carries += 1,
            CellKind::MuxF7 | CellKind::MuxF8 => self.muxes += 1,
            CellKind::Ramb18 | CellKind::Ramb36 => self.brams += 1,
            CellKind::Dsp48 => self.dsps += 1,
            CellKind::Io => self.ios += 1,
        }
    }

    /// Total primitive count.
    pub fn total(&self) -> u32 {
        self.luts
            + self.ffs
            + self.carries
            + self.muxes
            + self.lutrams
            + self.brams
            + self.dsps
            + self.ios
    }
}

/// LUT-side and FF-side slots of one CLB site.
///
/// Used both for what a unit needs and for what a site offers; a unit fits
/// when neither side exceeds the site's free slots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClbSlots {
    /// LUT sites.
    pub luts: u32,
    /// Flip-flop positions.
    pub ffs: u32,
}

impl ClbSlots {
    /// Creates a slot count.
    pub const fn new(luts: u32, ffs: u32) -> Self {
        Self { luts, ffs }
    }

    /// What one CLB site offers under `config`.
    pub fn capacity(config: &LegalizeConfig) -> Self {
        Self::new(config.clb_slots, config.clb_ff_slots)
    }

    /// Returns `true` if `self` fits inside `free` on both sides.
    pub fn fits_in(self, free: Self) -> bool {
        self.luts <= free.luts && self.ffs <= free.ffs
    }

    /// Sum of both sides.
    pub fn plus(self, other: Self) -> Self {
        Self::new(self.luts + other.luts, self.ffs + other.ffs)
    }

    /// Difference of both sides, floored at zero.
    pub fn minus(self, other: Self) -> Self {
        Self::new(self.luts.saturating_sub(other.luts), self.ffs.saturating_sub(other.ffs))
    }

    /// How many copies of `demand` fit, counting each side on its own.
    ///
    /// A side `demand` does not use places no limit on it.
    pub fn copies_of(self, demand: Self) -> u32 {
        let lut = if demand.luts > 0 { self.luts / demand.luts } else { u32::MAX };
        let ff = if demand.ffs > 0 { self.ffs / demand.ffs } else { u32::MAX };
        lut.min(ff)
    }
}

/// A member cell of a macro and its fixed offset from the macro anchor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MacroCell {
    /// Member cell.
    pub cell: CellId,
    /// Horizontal offset.
    pub dx: f64,
    /// Vertical offset.
    pub dy: f64,
}

/// The rigid shape of a macro unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacroShape {
    /// Structural kind.
    pub kind: MacroKind,
    /// Member cells; offsets never change after creation.
    pub cells: Vec<MacroCell>,
    /// Consecutive site rows the footprint covers.
    pub span: u32,
}

/// Variant payload of a [`PlacementUnit`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UnitKind {
    /// A single primitive cell.
    Unpacked {
        /// The cell.
        cell: CellId,
    },
    /// A rigid group of cells.
    Macro(MacroShape),
}

/// Which legalizer handles a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LegalFamily {
    /// Needs sites to itself: BRAM, DSP, I/O, carry chains, LUTRAM.
    Exclusive,
    /// Shares CLB sites with other units: LUTs, flip-flops, muxes, clusters.
    Shared,
}

/// A movable (or fixed) entity of the placement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacementUnit {
    /// Arena index.
    pub id: UnitId,
    /// Cell or macro name.
    pub name: String,
    /// Variant payload.
    pub kind: UnitKind,
    /// Current coordinate of the unit anchor.
    pub position: Point,
    /// Coordinate before the latest stage, for displacement tracking.
    pub last_position: Point,
    /// Pseudo-net target recorded by spreading or legalization.
    pub anchor: Option<Point>,
    /// Previous spreading result, blended in through the forget ratio.
    pub spread_target: Option<Point>,
    /// Pre-placed by the design; never moves.
    pub fixed: bool,
    /// Committed to a legal site by the orchestrator; no longer optimized.
    pub locked: bool,
    /// Multiplier on this unit's pseudo-net strength.
    pub weight: f64,
    /// Contained primitives.
    pub resources: ResourceCounts,
    /// Nets touching the unit, sorted and deduplicated.
    pub nets: Vec<NetId>,
    /// BEL class the unit is spread and legalized by.
    pub primary_class: BelClassId,
    /// Occupation of the unit in its primary class.
    pub primary_demand: f64,
    /// Site types able to host the unit, in preference order.
    pub site_types: Vec<SiteType>,
    /// Legalizer responsible for this unit.
    pub family: LegalFamily,
    /// Set once the packer has mapped the unit's cells to slots.
    pub packed: bool,
    /// Anchor site after legalization or packing.
    pub site: Option<SiteId>,
}

impl PlacementUnit {
    /// Returns `true` if the quadratic solve may move this unit.
    pub fn is_movable(&self) -> bool {
        !self.fixed && !self.locked
    }

    /// Returns `true` for macro units.
    pub fn is_macro(&self) -> bool {
        matches!(self.kind, UnitKind::Macro(_))
    }

    /// The macro kind, if any.
    pub fn macro_kind(&self) -> Option<MacroKind> {
        match &self.kind {
            UnitKind::Macro(shape) => Some(shape.kind),
            UnitKind::Unpacked { .. } => None,
        }
    }

    /// Site rows the unit covers.
    pub fn span(&self) -> u32 {
        match &self.kind {
            UnitKind::Macro(shape) => shape.span,
            UnitKind::Unpacked { .. } => 1,
        }
    }

    /// Required anchor-row alignment.
    pub fn row_alignment(&self) -> u32 {
        match &self.kind {
            UnitKind::Macro(shape) => shape.kind.row_alignment(shape.span),
            UnitKind::Unpacked { .. } => 1,
        }
    }

    /// Member cells with their offsets; an unpacked unit has offset zero.
    pub fn cells(&self) -> Vec<MacroCell> {
        match &self.kind {
            UnitKind::Unpacked { cell } => vec![MacroCell {
                cell: *cell,
                dx: 0.0,
                dy: 0.0,
            }],
            UnitKind::Macro(shape) => shape.cells.clone(),
        }
    }

    /// Number of member cells.
    pub fn cell_count(&self) -> usize {
        match &self.kind {
            UnitKind::Unpacked { .. } => 1,
            UnitKind::Macro(shape) => shape.cells.len(),
        }
    }

    /// Slots the unit takes on one CLB site.
    ///
    /// LUTs and LUTRAMs take LUT sites, flip-flops take FF positions. A unit
    /// with neither, such as a lone mux, still takes one LUT site.
    pub fn clb_slot_demand(&self) -> ClbSlots {
        let r = &self.resources;
        let luts = r.luts + r.lutrams;
        if luts == 0 && r.ffs == 0 {
            ClbSlots::new(1, 0)
        } else {
            ClbSlots::new(luts, r.ffs)
        }
    }

    /// Returns `true` if the unit may only sit on SLICEM sites.
    pub fn needs_slicem(&self) -> bool {
        self.resources.lutrams > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare_unit(kind: UnitKind) -> PlacementUnit {
        PlacementUnit {
            id: UnitId::from_raw(0),
            name: "u".into(),
            kind,
            position: Point::default(),
            last_position: Point::default(),
            anchor: None,
            spread_target: None,
            fixed: false,
            locked: false,
            weight: 1.0,
            resources: ResourceCounts::default(),
            nets: Vec::new(),
            primary_class: BelClassId::from_raw(0),
            primary_demand: 1.0,
            site_types: vec![SiteType::SliceL],
            family: LegalFamily::Shared,
            packed: false,
            site: None,
        }
    }

    #[test]
    fn resource_counts_by_kind() {
        let mut r = ResourceCounts::default();
        r.add(CellKind::Lut { inputs: 3 });
        r.add(CellKind::LutRam { as_memory: false });
        r.add(CellKind::LutRam { as_memory: true });
        r.add(CellKind::Ff);
        r.add(CellKind::MuxF8);
        assert_eq!(r.luts, 2);
        assert_eq!(r.lutrams, 1);
        assert_eq!(r.muxes, 1);
        assert_eq!(r.total(), 5);
    }

    #[test]
    fn movable_flags() {
        let mut u = bare_unit(UnitKind::Unpacked {
            cell: CellId::from_raw(0),
        });
        assert!(u.is_movable());
        u.locked = true;
        assert!(!u.is_movable());
        u.locked = false;
        u.fixed = true;
        assert!(!u.is_movable());
    }

    #[test]
    fn unpacked_cells_have_zero_offset() {
        let u = bare_unit(UnitKind::Unpacked {
            cell: CellId::from_raw(7),
        });
        let cells = u.cells();
        assert_eq!(cells.len(), 1);
        assert_eq!(cells[0].cell, CellId::from_raw(7));
        assert_eq!((cells[0].dx, cells[0].dy), (0.0, 0.0));
        assert_eq!(u.span(), 1);
    }

    #[test]
    fn bram_cascade_alignment() {
        let u = bare_unit(UnitKind::Macro(MacroShape {
            kind: MacroKind::BramCascade,
            cells: vec![],
            span: 2,
        }));
        assert_eq!(u.row_alignment(), 2);
        assert!(u.is_macro());
        assert_eq!(u.macro_kind(), Some(MacroKind::BramCascade));
    }

    #[test]
    fn slot_demand() {
        let mut u = bare_unit(UnitKind::Unpacked {
            cell: CellId::from_raw(0),
        });
        assert_eq!(u.clb_slot_demand(), ClbSlots::new(1, 0));
        u.resources.ffs = 1;
        assert_eq!(u.clb_slot_demand(), ClbSlots::new(0, 1));
        u.resources.luts = 2;
        u.resources.ffs = 6;
        assert_eq!(u.clb_slot_demand(), ClbSlots::new(2, 6));
    }

    #[test]
    fn slot_sides_are_independent() {
        let site = ClbSlots::new(8, 16);
        assert_eq!(site.copies_of(ClbSlots::new(1, 0)), 8);
        assert_eq!(site.copies_of(ClbSlots::new(0, 1)), 16);
        assert_eq!(site.copies_of(ClbSlots::new(1, 1)), 8);
        let used = ClbSlots::new(8, 0);
        assert!(ClbSlots::new(0, 1).fits_in(site.minus(used)));
        assert!(!ClbSlots::new(1, 0).fits_in(site.minus(used)));
        assert_eq!(used.plus(ClbSlots::new(0, 16)), site);
    }
}
