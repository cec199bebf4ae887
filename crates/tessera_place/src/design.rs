//! The technology-mapped design handed to the placer.
//!
//! A [`Design`] is the netlist provider's view of the circuit: primitive
//! cells, the nets between their pins, deduplicated flip-flop control sets,
//! and the rigid macros (carry chains, cascades, wide muxes) that must move
//! as one. Optional inputs from other collaborators travel separately:
//! [`ClusterHint`]s from the initial clustering pass and [`NetWeights`] from
//! timing analysis.

use crate::ids::{CellId, ControlSetId, DesignNetId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tessera_common::Point;

/// The primitive type of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CellKind {
    /// A look-up table with the given number of used inputs (1-6).
    Lut {
        /// Used input count.
        inputs: u8,
    },
    /// A flip-flop.
    Ff,
    /// An eight-bit carry element.
    Carry8,
    /// A mux combining two LUT outputs.
    MuxF7,
    /// A mux combining two F7 outputs.
    MuxF8,
    /// A LUT configured as distributed RAM or shift register.
    LutRam {
        /// `false` when the cell only uses the LUT function and may sit in
        /// any slice.
        as_memory: bool,
    },
    /// A half block RAM.
    Ramb18,
    /// A full block RAM.
    Ramb36,
    /// A DSP multiply-accumulate block.
    Dsp48,
    /// An I/O buffer.
    Io,
}

impl CellKind {
    /// The resource name looked up in the compatibility table.
    pub fn resource_name(self) -> String {
        match self {
            CellKind::Lut { inputs } => format!("LUT{}", inputs.clamp(1, 6)),
            CellKind::Ff => "FF".to_string(),
            CellKind::Carry8 => "CARRY8".to_string(),
            CellKind::MuxF7 => "MUXF7".to_string(),
            CellKind::MuxF8 => "MUXF8".to_string(),
            CellKind::LutRam { .. } => "LUTRAM".to_string(),
            CellKind::Ramb18 => "RAMB18".to_string(),
            CellKind::Ramb36 => "RAMB36".to_string(),
            CellKind::Dsp48 => "DSP48".to_string(),
            CellKind::Io => "IO".to_string(),
        }
    }

    /// Returns `true` for anything occupying a slice LUT site.
    pub fn is_lut_like(self) -> bool {
        matches!(self, CellKind::Lut { .. } | CellKind::LutRam { .. })
    }

    /// Rank used to pick the class a multi-cell unit is spread and legalized by.
    pub(crate) fn primary_rank(self) -> u8 {
        match self {
            CellKind::Carry8 => 0,
            CellKind::Ramb36 | CellKind::Ramb18 => 1,
            CellKind::Dsp48 => 2,
            CellKind::LutRam { as_memory: true } => 3,
            CellKind::Io => 4,
            CellKind::Lut { .. } | CellKind::LutRam { as_memory: false } => 5,
            CellKind::Ff => 6,
            CellKind::MuxF7 | CellKind::MuxF8 => 7,
        }
    }
}

/// Pin direction relative to its cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PinDirection {
    /// Signal flows into the cell.
    Input,
    /// Signal is driven by the cell.
    Output,
}

/// A primitive cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cell {
    /// Assigned by [`Design::add_cell`].
    pub id: CellId,
    /// Hierarchical instance name.
    pub name: String,
    /// Primitive type.
    pub kind: CellKind,
    /// Control set for flip-flops.
    pub control_set: Option<ControlSetId>,
    /// Pre-placed location; the owning unit becomes fixed.
    pub fixed: Option<Point>,
    /// Starting coordinate; units without one start at the device centre.
    pub initial: Option<Point>,
}

impl Cell {
    /// Creates an unplaced cell without a control set.
    pub fn new(name: impl Into<String>, kind: CellKind) -> Self {
        Self {
            id: CellId::from_raw(0),
            name: name.into(),
            kind,
            control_set: None,
            fixed: None,
            initial: None,
        }
    }
}

/// The clock, reset, and enable signals shared by a group of flip-flops.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ControlSet {
    /// Clock signal name.
    pub clock: String,
    /// Set/reset signal name.
    pub reset: Option<String>,
    /// Clock-enable signal name.
    pub enable: Option<String>,
    /// Dense key shared by every control set with the same clock and reset.
    ///
    /// Flip-flops in one half of a slice must agree on this key.
    pub clock_reset: u32,
}

/// A pin on a design net.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesignPin {
    /// Owning cell.
    pub cell: CellId,
    /// Direction of the pin.
    pub direction: PinDirection,
}

/// A design net.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesignNet {
    /// Assigned by [`Design::add_net`].
    pub id: DesignNetId,
    /// Net name.
    pub name: String,
    /// Connected pins, driver first by convention.
    pub pins: Vec<DesignPin>,
}

/// The structural kind of a rigid macro.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MacroKind {
    /// CARRY8 cells stacked in consecutive slices, with their LUTs and FFs.
    CarryChain,
    /// Two LUTs feeding a MUXF7.
    Mux7,
    /// Four LUTs, two MUXF7, and a MUXF8.
    Mux8,
    /// Distributed RAM occupying SLICEM LUTs.
    LutRam,
    /// Block RAMs chained through dedicated cascade routing.
    BramCascade,
    /// DSP blocks chained through dedicated cascade routing.
    DspCascade,
    /// A pseudo-macro supplied by the clustering pass.
    Cluster,
}

impl MacroKind {
    /// Whether the macro needs a site to itself rather than sharing a slice.
    pub fn is_exclusive(self) -> bool {
        matches!(
            self,
            MacroKind::CarryChain
                | MacroKind::LutRam
                | MacroKind::BramCascade
                | MacroKind::DspCascade
        )
    }

    /// Row alignment of the anchor site for a footprint `span` rows tall.
    pub fn row_alignment(self, span: u32) -> u32 {
        match self {
            MacroKind::BramCascade if span > 1 => 2,
            _ => 1,
        }
    }
}

/// A rigid group of cells with fixed offsets from the macro anchor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MacroHint {
    /// Macro name.
    pub name: String,
    /// Structural kind.
    pub kind: MacroKind,
    /// Member cells with their `(dx, dy)` offsets.
    pub cells: Vec<(CellId, f64, f64)>,
}

/// An optional grouping from the clustering pass; members move together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterHint {
    /// Cluster name.
    pub name: String,
    /// Member cells.
    pub cells: Vec<CellId>,
}

/// Multiplicative per-net weights from timing analysis, keyed by net name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetWeights(pub BTreeMap<String, f64>);

impl NetWeights {
    /// The weight of a net, defaulting to 1.
    pub fn weight(&self, net: &str) -> f64 {
        self.0.get(net).copied().unwrap_or(1.0)
    }
}

/// The technology-mapped netlist.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Design {
    /// Design name.
    pub name: String,
    /// All cells, indexed by [`CellId`].
    pub cells: Vec<Cell>,
    /// All nets, indexed by [`DesignNetId`].
    pub nets: Vec<DesignNet>,
    /// Deduplicated control sets, indexed by [`ControlSetId`].
    pub control_sets: Vec<ControlSet>,
    /// Rigid macros.
    pub macros: Vec<MacroHint>,
    #[serde(skip)]
    control_set_index: HashMap<(String, Option<String>, Option<String>), ControlSetId>,
    #[serde(skip)]
    clock_reset_index: HashMap<(String, Option<String>), u32>,
}

impl Design {
    /// Creates an empty design.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Adds a cell and returns its ID.
    pub fn add_cell(&mut self, mut cell: Cell) -> CellId {
        let id = CellId::from_raw(self.cells.len() as u32);
        cell.id = id;
        self.cells.push(cell);
        id
    }

    /// Adds a cell of the given kind and returns its ID.
    pub fn add(&mut self, name: impl Into<String>, kind: CellKind) -> CellId {
        self.add_cell(Cell::new(name, kind))
    }

    /// Returns the control set for these signals, creating it on first use.
    pub fn control_set(
        &mut self,
        clock: &str,
        reset: Option<&str>,
        enable: Option<&str>,
    ) -> ControlSetId {
        let key = (
            clock.to_string(),
            reset.map(str::to_string),
            enable.map(str::to_string),
        );
        if let Some(&id) = self.control_set_index.get(&key) {
            return id;
        }
        let half_key = (key.0.clone(), key.1.clone());
        let next = self.clock_reset_index.len() as u32;
        let clock_reset = *self.clock_reset_index.entry(half_key).or_insert(next);
        let id = ControlSetId::from_raw(self.control_sets.len() as u32);
        self.control_sets.push(ControlSet {
            clock: key.0.clone(),
            reset: key.1.clone(),
            enable: key.2.clone(),
            clock_reset,
        });
        self.control_set_index.insert(key, id);
        id
    }

    /// Assigns a control set to a flip-flop.
    pub fn set_control_set(&mut self, cell: CellId, control_set: ControlSetId) {
        self.cells[cell.index()].control_set = Some(control_set);
    }

    /// Pins a cell to a fixed location.
    pub fn fix_cell(&mut self, cell: CellId, at: Point) {
        self.cells[cell.index()].fixed = Some(at);
    }

    /// Sets the starting coordinate of a cell.
    pub fn set_initial_position(&mut self, cell: CellId, at: Point) {
        self.cells[cell.index()].initial = Some(at);
    }

    /// Adds a net over the given pins and returns its ID.
    pub fn add_net(&mut self, name: impl Into<String>, pins: Vec<DesignPin>) -> DesignNetId {
        let id = DesignNetId::from_raw(self.nets.len() as u32);
        self.nets.push(DesignNet {
            id,
            name: name.into(),
            pins,
        });
        id
    }

    /// Adds a net driven by `driver` and read by every cell in `sinks`.
    pub fn connect(&mut self, name: impl Into<String>, driver: CellId, sinks: &[CellId]) -> DesignNetId {
        let mut pins = vec![DesignPin {
            cell: driver,
            direction: PinDirection::Output,
        }];
        pins.extend(sinks.iter().map(|&cell| DesignPin {
            cell,
            direction: PinDirection::Input,
        }));
        self.add_net(name, pins)
    }

    /// Adds a rigid macro.
    pub fn add_macro(&mut self, hint: MacroHint) {
        self.macros.push(hint);
    }

    /// Returns the cell with the given ID.
    pub fn cell(&self, id: CellId) -> &Cell {
        &self.cells[id.index()]
    }

    /// Returns the net with the given ID.
    pub fn net(&self, id: DesignNetId) -> &DesignNet {
        &self.nets[id.index()]
    }

    /// Returns the number of cells.
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }
}
