//! The shared placement state every stage reads and writes.

use crate::codes;
use crate::design::{CellKind, ClusterHint, ControlSet, Design, MacroKind, NetWeights, PinDirection};
use crate::ids::{CellId, ControlSetId, NetId, UnitId};
use crate::model::net::{NetPin, PlacementNet};
use crate::model::occupancy::SiteOccupancy;
use crate::model::unit::{LegalFamily, MacroCell, MacroShape, PlacementUnit, ResourceCounts, UnitKind};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tessera_common::{InternalError, Point, Rect, TesseraResult};
use tessera_device::{BelClassId, CompatiblePlacementTable, Device};
use tessera_diagnostics::{Diagnostic, DiagnosticSink};

/// LUT-like cells a clustering hint may put in one unit.
const CLUSTER_MAX_LUTS: u32 = 8;
/// Flip-flops a clustering hint may put in one unit.
const CLUSTER_MAX_FFS: u32 = 16;

/// Per-cell data resolved against the device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellInfo {
    /// Instance name.
    pub name: String,
    /// Primitive type after alias resolution.
    pub kind: CellKind,
    /// Flip-flop control set.
    pub control_set: Option<ControlSetId>,
    /// Resource the cell resolved to.
    pub resource: String,
    /// BEL class of that resource.
    pub class: BelClassId,
    /// Slot occupation within the class.
    pub occupation: f64,
    /// Owning unit.
    pub unit: UnitId,
    /// Offset of the cell inside its unit.
    pub offset: (f64, f64),
    /// Nets the cell reads, sorted.
    pub inputs: Vec<NetId>,
}

/// Units, nets, and site occupancy for one placement run.
///
/// Units and nets are created once by [`PlacementInfo::build`] and live for
/// the whole run. Positions change only through [`set_position`], which
/// keeps the net bounding-box caches honest.
///
/// [`set_position`]: PlacementInfo::set_position
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacementInfo {
    units: Vec<PlacementUnit>,
    nets: Vec<PlacementNet>,
    cells: Vec<CellInfo>,
    control_sets: Vec<ControlSet>,
    outline: Rect,
    class_capacity: Vec<f64>,
    occupancy: SiteOccupancy,
}

struct Group {
    name: String,
    kind: MacroKind,
    cells: Vec<MacroCell>,
}

impl PlacementInfo {
    /// Builds units and nets from a design.
    ///
    /// Every cell must resolve to a BEL class with capacity on `device`,
    /// following aliases where needed. Macros must not share cells. A
    /// clustering hint naming a cell that is already grouped, or a cell a
    /// cluster cannot hold, has that cell skipped with a warning.
    pub fn build(
        design: &Design,
        device: &Device,
        table: &CompatiblePlacementTable,
        clusters: Option<&[ClusterHint]>,
        weights: Option<&NetWeights>,
        sink: &DiagnosticSink,
    ) -> TesseraResult<Self> {
        let class_capacity = class_capacity(device, table);
        let usable = |class: BelClassId| class_capacity.get(class.index()).copied().unwrap_or(0.0) > 0.0;

        let mut cells = Vec::with_capacity(design.cells.len());
        for cell in &design.cells {
            let requested = match cell.kind {
                CellKind::LutRam { as_memory: false } => {
                    let name = cell.kind.resource_name();
                    table.alias(&name).map(str::to_string).unwrap_or(name)
                }
                kind => kind.resource_name(),
            };
            let resolved = table.resolve(&requested, usable).ok_or_else(|| {
                InternalError::new(format!(
                    "cell `{}`: resource {requested} has no usable site on device `{}`",
                    cell.name,
                    device.name()
                ))
            })?;
            if resolved.aliased {
                sink.emit(
                    Diagnostic::new(
                        codes::RESOURCE_ALIASED,
                        format!(
                            "resource {requested} has no capacity on this device, placing as {}",
                            resolved.resource
                        ),
                    )
                    .with_subject(format!("cell {}", cell.name)),
                );
            }
            if let Some(cs) = cell.control_set {
                if cs.index() >= design.control_sets.len() {
                    return Err(InternalError::new(format!(
                        "cell `{}` references unknown control set {cs}",
                        cell.name
                    )));
                }
            }
            let kind = match cell.kind {
                CellKind::LutRam { as_memory: true } if resolved.resource != "LUTRAM" => {
                    CellKind::LutRam { as_memory: false }
                }
                kind => kind,
            };
            cells.push(CellInfo {
                name: cell.name.clone(),
                kind,
                control_set: cell.control_set,
                resource: resolved.resource.to_string(),
                class: resolved.class,
                occupation: resolved.occupation,
                unit: UnitId::from_raw(u32::MAX),
                offset: (0.0, 0.0),
                inputs: Vec::new(),
            });
        }

        let groups = collect_groups(design, &cells, clusters, sink)?;
        let mut owner: Vec<Option<usize>> = vec![None; cells.len()];
        for (g, group) in groups.iter().enumerate() {
            for m in &group.cells {
                owner[m.cell.index()] = Some(g);
            }
        }

        let outline = device.outline();
        let mut units: Vec<PlacementUnit> = Vec::new();
        let mut group_unit: Vec<Option<UnitId>> = vec![None; groups.len()];
        for index in 0..cells.len() {
            let cell = CellId::from_raw(index as u32);
            let (name, kind) = match owner[index] {
                Some(g) if group_unit[g].is_some() => continue,
                Some(g) => {
                    group_unit[g] = Some(UnitId::from_raw(units.len() as u32));
                    let group = &groups[g];
                    (
                        group.name.clone(),
                        UnitKind::Macro(MacroShape {
                            kind: group.kind,
                            cells: group.cells.clone(),
                            span: 1,
                        }),
                    )
                }
                None => (cells[index].name.clone(), UnitKind::Unpacked { cell }),
            };
            let id = UnitId::from_raw(units.len() as u32);
            let unit = make_unit(id, name, kind, design, &cells, table, device, outline);
            for m in unit.cells() {
                cells[m.cell.index()].unit = id;
                cells[m.cell.index()].offset = (m.dx, m.dy);
            }
            units.push(unit);
        }

        let mut nets = Vec::with_capacity(design.nets.len());
        for (index, net) in design.nets.iter().enumerate() {
            let id = NetId::from_raw(index as u32);
            let mut pins = Vec::with_capacity(net.pins.len());
            for pin in &net.pins {
                let info = cells.get_mut(pin.cell.index()).ok_or_else(|| {
                    InternalError::new(format!("net `{}` references unknown cell {}", net.name, pin.cell))
                })?;
                if pin.direction == PinDirection::Input {
                    info.inputs.push(id);
                }
                pins.push(NetPin {
                    unit: info.unit,
                    cell: pin.cell,
                    dx: info.offset.0,
                    dy: info.offset.1,
                    direction: pin.direction,
                });
                units[info.unit.index()].nets.push(id);
            }
            let weight = weights.map_or(1.0, |w| w.weight(&net.name));
            nets.push(PlacementNet::new(id, net.name.clone(), pins, weight));
        }
        for unit in &mut units {
            unit.nets.sort_unstable();
            unit.nets.dedup();
        }
        for cell in &mut cells {
            cell.inputs.sort_unstable();
            cell.inputs.dedup();
        }

        log::info!(
            "placement model for `{}`: {} cells in {} units, {} nets",
            design.name,
            cells.len(),
            units.len(),
            nets.len()
        );

        Ok(Self {
            units,
            nets,
            cells,
            control_sets: design.control_sets.clone(),
            outline,
            class_capacity,
            occupancy: SiteOccupancy::new(device.sites().len()),
        })
    }

    /// All units, indexed by [`UnitId`].
    pub fn units(&self) -> &[PlacementUnit] {
        &self.units
    }

    /// The unit with the given ID.
    pub fn unit(&self, id: UnitId) -> &PlacementUnit {
        &self.units[id.index()]
    }

    /// Mutable access for flag and anchor updates. Positions must go
    /// through [`PlacementInfo::set_position`].
    pub(crate) fn unit_mut(&mut self, id: UnitId) -> &mut PlacementUnit {
        &mut self.units[id.index()]
    }

    /// Looks a unit up by name.
    pub fn find_unit(&self, name: &str) -> Option<UnitId> {
        self.units.iter().find(|u| u.name == name).map(|u| u.id)
    }

    /// All nets, indexed by [`NetId`].
    pub fn nets(&self) -> &[PlacementNet] {
        &self.nets
    }

    /// The net with the given ID.
    pub fn net(&self, id: NetId) -> &PlacementNet {
        &self.nets[id.index()]
    }

    /// Resolved cells, indexed by [`CellId`].
    pub fn cells(&self) -> &[CellInfo] {
        &self.cells
    }

    /// The resolved cell with the given ID.
    pub fn cell(&self, id: CellId) -> &CellInfo {
        &self.cells[id.index()]
    }

    /// The control set with the given ID.
    pub fn control_set(&self, id: ControlSetId) -> &ControlSet {
        &self.control_sets[id.index()]
    }

    /// The half-slice key of a cell's control set, if it has one.
    pub fn clock_reset_of(&self, cell: CellId) -> Option<u32> {
        self.cells[cell.index()]
            .control_set
            .map(|cs| self.control_sets[cs.index()].clock_reset)
    }

    /// The device outline.
    pub fn outline(&self) -> Rect {
        self.outline
    }

    /// Total device slots of a BEL class.
    pub fn class_capacity(&self, class: BelClassId) -> f64 {
        self.class_capacity.get(class.index()).copied().unwrap_or(0.0)
    }

    /// Moves a unit and invalidates the bounds of every net it touches.
    pub fn set_position(&mut self, id: UnitId, position: Point) {
        let unit = &mut self.units[id.index()];
        unit.position = position;
        for &net in &unit.nets {
            self.nets[net.index()].invalidate();
        }
    }

    /// Recomputes every stale net bounding box in parallel.
    pub fn refresh_bounds(&mut self) {
        let units = &self.units;
        self.nets.par_iter_mut().for_each(|net| net.refresh(units));
    }

    /// Total half-perimeter wirelength, refreshing stale boxes first.
    pub fn total_hpwl(&mut self) -> f64 {
        self.refresh_bounds();
        self.hpwl()
    }

    /// Total half-perimeter wirelength without touching the caches.
    pub fn hpwl(&self) -> f64 {
        self.nets.iter().map(|n| n.hpwl(&self.units)).sum()
    }

    /// Current positions of all units.
    pub fn positions(&self) -> Vec<Point> {
        self.units.iter().map(|u| u.position).collect()
    }

    /// Restores positions saved by [`PlacementInfo::positions`].
    pub fn restore_positions(&mut self, positions: &[Point]) {
        for (i, &p) in positions.iter().enumerate().take(self.units.len()) {
            if self.units[i].position != p {
                self.set_position(UnitId::from_raw(i as u32), p);
            }
        }
    }

    /// Copies every position into `last_position`.
    pub fn record_last_positions(&mut self) {
        for unit in &mut self.units {
            unit.last_position = unit.position;
        }
    }

    /// Site occupancy.
    pub fn occupancy(&self) -> &SiteOccupancy {
        &self.occupancy
    }

    /// Mutable site occupancy.
    pub fn occupancy_mut(&mut self) -> &mut SiteOccupancy {
        &mut self.occupancy
    }

    /// Every cell owned by some unit, sorted.
    pub fn owned_cells(&self) -> Vec<CellId> {
        let mut cells: Vec<CellId> = self
            .units
            .iter()
            .flat_map(|u| u.cells().into_iter().map(|m| m.cell))
            .collect();
        cells.sort_unstable();
        cells
    }
}

fn class_capacity(device: &Device, table: &CompatiblePlacementTable) -> Vec<f64> {
    (0..table.classes().len())
        .map(|i| {
            let class = BelClassId::from_raw(i as u32);
            device
                .sites()
                .iter()
                .map(|s| table.slots_at(class, s.site_type))
                .sum()
        })
        .collect()
}

fn collect_groups(
    design: &Design,
    cells: &[CellInfo],
    clusters: Option<&[ClusterHint]>,
    sink: &DiagnosticSink,
) -> TesseraResult<Vec<Group>> {
    let mut taken = vec![false; cells.len()];
    let mut groups = Vec::new();

    for hint in &design.macros {
        let mut members = Vec::with_capacity(hint.cells.len());
        for &(cell, dx, dy) in &hint.cells {
            let slot = taken.get_mut(cell.index()).ok_or_else(|| {
                InternalError::new(format!("macro `{}` references unknown cell {cell}", hint.name))
            })?;
            if *slot {
                return Err(InternalError::new(format!(
                    "cell `{}` belongs to more than one macro",
                    cells[cell.index()].name
                )));
            }
            *slot = true;
            members.push(MacroCell { cell, dx, dy });
        }
        if !members.is_empty() {
            groups.push(Group {
                name: hint.name.clone(),
                kind: hint.kind,
                cells: members,
            });
        }
    }

    for hint in clusters.unwrap_or(&[]) {
        let mut members = Vec::new();
        let mut counts = ResourceCounts::default();
        for &cell in &hint.cells {
            let info = cells.get(cell.index()).ok_or_else(|| {
                InternalError::new(format!("cluster `{}` references unknown cell {cell}", hint.name))
            })?;
            let mut trial = counts;
            trial.add(info.kind);
            let reason = if taken[cell.index()] {
                Some("already belongs to another group")
            } else if !clusterable(info.kind) {
                Some("cannot share a logic slice")
            } else if trial.luts + trial.lutrams > CLUSTER_MAX_LUTS || trial.ffs > CLUSTER_MAX_FFS {
                Some("would overfill one slice")
            } else {
                None
            };
            if let Some(reason) = reason {
                sink.emit(
                    Diagnostic::new(
                        codes::IGNORED_CLUSTER_HINT,
                        format!("cell `{}` {reason}, left out of cluster", info.name),
                    )
                    .with_subject(format!("cluster {}", hint.name)),
                );
                continue;
            }
            counts = trial;
            taken[cell.index()] = true;
            members.push(MacroCell {
                cell,
                dx: 0.0,
                dy: 0.0,
            });
        }
        if members.len() < 2 {
            for m in &members {
                taken[m.cell.index()] = false;
            }
            continue;
        }
        groups.push(Group {
            name: hint.name.clone(),
            kind: MacroKind::Cluster,
            cells: members,
        });
    }

    Ok(groups)
}

fn clusterable(kind: CellKind) -> bool {
    matches!(
        kind,
        CellKind::Lut { .. }
            | CellKind::LutRam { as_memory: false }
            | CellKind::Ff
            | CellKind::MuxF7
            | CellKind::MuxF8
    )
}

#[allow(clippy::too_many_arguments)]
fn make_unit(
    id: UnitId,
    name: String,
    mut kind: UnitKind,
    design: &Design,
    cells: &[CellInfo],
    table: &CompatiblePlacementTable,
    device: &Device,
    outline: Rect,
) -> PlacementUnit {
    let members = match &kind {
        UnitKind::Unpacked { cell } => vec![MacroCell {
            cell: *cell,
            dx: 0.0,
            dy: 0.0,
        }],
        UnitKind::Macro(shape) => shape.cells.clone(),
    };

    let mut resources = ResourceCounts::default();
    for m in &members {
        resources.add(cells[m.cell.index()].kind);
    }

    let primary = members
        .iter()
        .min_by_key(|m| (cells[m.cell.index()].kind.primary_rank(), m.cell))
        .map_or(members[0].cell, |m| m.cell);
    let primary_kind = cells[primary.index()].kind;
    let primary_class = cells[primary.index()].class;
    let primary_demand = members
        .iter()
        .map(|m| &cells[m.cell.index()])
        .filter(|c| c.class == primary_class)
        .map(|c| c.occupation)
        .sum();
    let site_types = table
        .class(primary_class)
        .map(|c| c.site_types.clone())
        .unwrap_or_default();

    let exclusive_macro = matches!(&kind, UnitKind::Macro(s) if s.kind.is_exclusive());
    let family = if exclusive_macro
        || matches!(
            primary_kind,
            CellKind::Carry8
                | CellKind::Ramb18
                | CellKind::Ramb36
                | CellKind::Dsp48
                | CellKind::Io
                | CellKind::LutRam { as_memory: true }
        ) {
        LegalFamily::Exclusive
    } else {
        LegalFamily::Shared
    };

    if let UnitKind::Macro(shape) = &mut kind {
        if family == LegalFamily::Exclusive {
            let pitch = device
                .columns()
                .iter()
                .find(|c| site_types.contains(&c.site_type))
                .map_or(1.0, |c| c.pitch);
            let max_dy = members.iter().map(|m| m.dy).fold(0.0_f64, f64::max);
            shape.span = (max_dy / pitch).round() as u32 + 1;
        }
    }

    let fixed = members.iter().find_map(|m| {
        design.cells[m.cell.index()]
            .fixed
            .map(|p| p.offset(-m.dx, -m.dy))
    });
    let initial = members.iter().find_map(|m| {
        design.cells[m.cell.index()]
            .initial
            .map(|p| p.offset(-m.dx, -m.dy))
    });
    let centre = Point::new(
        (outline.left + outline.right) / 2.0,
        (outline.bottom + outline.top) / 2.0,
    );
    let position = match fixed {
        Some(p) => p,
        None => outline.clamp(initial.unwrap_or(centre)),
    };

    PlacementUnit {
        id,
        name,
        kind,
        position,
        last_position: position,
        anchor: None,
        spread_target: None,
        fixed: fixed.is_some(),
        locked: false,
        weight: 1.0,
        resources,
        nets: Vec::new(),
        primary_class,
        primary_demand,
        site_types,
        family,
        packed: false,
        site: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::design::MacroHint;
    use tessera_device::{DeviceBuilder, SiteType};

    fn device() -> Device {
        DeviceBuilder::new("t", 8.0)
            .columns(SiteType::SliceL, 3, 1.0)
            .column(SiteType::SliceM, 1.0)
            .column(SiteType::Bram, 2.0)
            .build()
    }

    fn build(design: &Design, clusters: Option<&[ClusterHint]>) -> (PlacementInfo, DiagnosticSink) {
        let sink = DiagnosticSink::new();
        let info = PlacementInfo::build(
            design,
            &device(),
            &CompatiblePlacementTable::ultrascale(),
            clusters,
            None,
            &sink,
        )
        .unwrap();
        (info, sink)
    }

    #[test]
    fn one_unit_per_loose_cell() {
        let mut d = Design::new("top");
        let a = d.add("a", CellKind::Lut { inputs: 4 });
        let b = d.add("b", CellKind::Ff);
        d.connect("n", a, &[b]);
        let (info, sink) = build(&d, None);
        assert_eq!(info.units().len(), 2);
        assert_eq!(info.nets().len(), 1);
        assert_eq!(info.cell(b).inputs, vec![NetId::from_raw(0)]);
        assert!(info.cell(a).inputs.is_empty());
        assert_eq!(info.owned_cells(), vec![a, b]);
        assert!(sink.diagnostics().is_empty());
    }

    #[test]
    fn macro_preserves_offsets_and_span() {
        let mut d = Design::new("top");
        let r0 = d.add("r0", CellKind::Ramb36);
        let r1 = d.add("r1", CellKind::Ramb36);
        d.add_macro(MacroHint {
            name: "casc".into(),
            kind: MacroKind::BramCascade,
            cells: vec![(r0, 0.0, 0.0), (r1, 0.0, 2.0)],
        });
        let (info, _) = build(&d, None);
        assert_eq!(info.units().len(), 1);
        let u = &info.units()[0];
        assert_eq!(u.family, LegalFamily::Exclusive);
        assert_eq!(u.span(), 2);
        assert_eq!(u.row_alignment(), 2);
        assert_eq!(u.primary_demand, 2.0);
        assert_eq!(info.cell(r1).offset, (0.0, 2.0));
    }

    #[test]
    fn duplicate_macro_cell_is_an_error() {
        let mut d = Design::new("top");
        let a = d.add("a", CellKind::Carry8);
        for name in ["m0", "m1"] {
            d.add_macro(MacroHint {
                name: name.into(),
                kind: MacroKind::CarryChain,
                cells: vec![(a, 0.0, 0.0)],
            });
        }
        let sink = DiagnosticSink::new();
        let err = PlacementInfo::build(
            &d,
            &device(),
            &CompatiblePlacementTable::ultrascale(),
            None,
            None,
            &sink,
        )
        .unwrap_err();
        assert!(err.message.contains("more than one macro"));
    }

    #[test]
    fn cluster_conflict_is_skipped_with_warning() {
        let mut d = Design::new("top");
        let a = d.add("a", CellKind::Lut { inputs: 2 });
        let b = d.add("b", CellKind::Ff);
        let c = d.add("c", CellKind::Ff);
        let hints = vec![
            ClusterHint {
                name: "c0".into(),
                cells: vec![a, b],
            },
            ClusterHint {
                name: "c1".into(),
                cells: vec![b, c],
            },
        ];
        let (info, sink) = build(&d, Some(&hints));
        // c1 keeps only `c`, so it dissolves into a loose cell
        assert_eq!(info.units().len(), 2);
        assert_eq!(info.cell(a).unit, info.cell(b).unit);
        let diags = sink.diagnostics();
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].code, codes::IGNORED_CLUSTER_HINT);
        assert_eq!(info.owned_cells(), vec![a, b, c]);
    }

    #[test]
    fn lutram_aliases_without_slicem() {
        let dev = DeviceBuilder::new("l", 4.0)
            .column(SiteType::SliceL, 1.0)
            .build();
        let mut d = Design::new("top");
        let r = d.add("ram", CellKind::LutRam { as_memory: true });
        let sink = DiagnosticSink::new();
        let info = PlacementInfo::build(
            &d,
            &dev,
            &CompatiblePlacementTable::ultrascale(),
            None,
            None,
            &sink,
        )
        .unwrap();
        assert_eq!(info.cell(r).resource, "LUT6");
        assert_eq!(info.units()[0].family, LegalFamily::Shared);
        assert!(!info.units()[0].needs_slicem());
        assert_eq!(sink.diagnostics()[0].code, codes::RESOURCE_ALIASED);
    }

    #[test]
    fn unresolvable_cell_is_an_error() {
        let dev = DeviceBuilder::new("l", 4.0)
            .column(SiteType::SliceL, 1.0)
            .build();
        let mut d = Design::new("top");
        d.add("mul", CellKind::Dsp48);
        let sink = DiagnosticSink::new();
        assert!(PlacementInfo::build(
            &d,
            &dev,
            &CompatiblePlacementTable::ultrascale(),
            None,
            None,
            &sink
        )
        .is_err());
    }

    #[test]
    fn set_position_invalidates_bounds() {
        let mut d = Design::new("top");
        let a = d.add("a", CellKind::Lut { inputs: 1 });
        let b = d.add("b", CellKind::Lut { inputs: 1 });
        d.set_initial_position(a, Point::new(0.0, 0.0));
        d.set_initial_position(b, Point::new(1.0, 0.0));
        d.connect("n", a, &[b]);
        let (mut info, _) = build(&d, None);
        assert_eq!(info.total_hpwl(), 1.0);
        assert!(info.net(NetId::from_raw(0)).bounds().is_some());
        info.set_position(info.cell(b).unit, Point::new(3.0, 2.0));
        assert!(info.net(NetId::from_raw(0)).bounds().is_none());
        assert_eq!(info.total_hpwl(), 5.0);
    }

    #[test]
    fn fixed_cells_make_fixed_units() {
        let mut d = Design::new("top");
        let io = d.add("pad", CellKind::Lut { inputs: 1 });
        d.fix_cell(io, Point::new(2.0, 3.0));
        let (info, _) = build(&d, None);
        let u = &info.units()[0];
        assert!(u.fixed);
        assert_eq!(u.position, Point::new(2.0, 3.0));
    }

    #[test]
    fn net_weights_apply() {
        let mut d = Design::new("top");
        let a = d.add("a", CellKind::Ff);
        let b = d.add("b", CellKind::Ff);
        d.connect("crit", a, &[b]);
        let mut w = NetWeights::default();
        w.0.insert("crit".into(), 4.0);
        let sink = DiagnosticSink::new();
        let info = PlacementInfo::build(
            &d,
            &device(),
            &CompatiblePlacementTable::ultrascale(),
            None,
            Some(&w),
            &sink,
        )
        .unwrap();
        assert_eq!(info.net(NetId::from_raw(0)).weight, 4.0);
    }
}
