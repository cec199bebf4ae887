//! Placement nets with cached bounding boxes.

use crate::design::PinDirection;
use crate::ids::{CellId, NetId, UnitId};
use crate::model::unit::PlacementUnit;
use serde::{Deserialize, Serialize};
use tessera_common::Point;

/// A coordinate axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    /// Horizontal.
    X,
    /// Vertical.
    Y,
}

impl Axis {
    /// Projects a point onto this axis.
    pub fn of(self, p: Point) -> f64 {
        match self {
            Axis::X => p.x,
            Axis::Y => p.y,
        }
    }

    /// Projects a pin offset onto this axis.
    pub fn offset(self, pin: &NetPin) -> f64 {
        match self {
            Axis::X => pin.dx,
            Axis::Y => pin.dy,
        }
    }
}

/// One pin of a placement net.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NetPin {
    /// Unit owning the pin's cell.
    pub unit: UnitId,
    /// The cell the pin belongs to.
    pub cell: CellId,
    /// Horizontal offset of the cell inside the unit.
    pub dx: f64,
    /// Vertical offset of the cell inside the unit.
    pub dy: f64,
    /// Pin direction.
    pub direction: PinDirection,
}

/// Bounding box of a net as pin indices plus the coordinates they span.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NetBounds {
    /// Pin with the smallest x.
    pub left: usize,
    /// Pin with the largest x.
    pub right: usize,
    /// Pin with the smallest y.
    pub bottom: usize,
    /// Pin with the largest y.
    pub top: usize,
    /// Smallest x.
    pub x_lo: f64,
    /// Largest x.
    pub x_hi: f64,
    /// Smallest y.
    pub y_lo: f64,
    /// Largest y.
    pub y_hi: f64,
}

impl NetBounds {
    /// Half-perimeter of the box.
    pub fn hpwl(&self) -> f64 {
        (self.x_hi - self.x_lo) + (self.y_hi - self.y_lo)
    }

    /// Lower and upper pin indices along an axis.
    pub fn extremes(&self, axis: Axis) -> (usize, usize) {
        match axis {
            Axis::X => (self.left, self.right),
            Axis::Y => (self.bottom, self.top),
        }
    }
}

/// A net between placement units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacementNet {
    /// Arena index; equal to the design net index.
    pub id: NetId,
    /// Net name.
    pub name: String,
    /// Pins in design order.
    pub pins: Vec<NetPin>,
    /// Timing weight.
    pub weight: f64,
    /// Number of distinct units among the pins.
    pub unit_count: usize,
    #[serde(skip)]
    bounds: Option<NetBounds>,
}

impl PlacementNet {
    /// Creates a net with an empty bounds cache.
    pub fn new(id: NetId, name: impl Into<String>, pins: Vec<NetPin>, weight: f64) -> Self {
        let mut units: Vec<UnitId> = pins.iter().map(|p| p.unit).collect();
        units.sort_unstable();
        units.dedup();
        Self {
            id,
            name: name.into(),
            pins,
            weight,
            unit_count: units.len(),
            bounds: None,
        }
    }

    /// Number of pins.
    pub fn degree(&self) -> usize {
        self.pins.len()
    }

    /// Coordinate of pin `index` given the current unit positions.
    pub fn pin_position(&self, index: usize, units: &[PlacementUnit]) -> Point {
        let pin = &self.pins[index];
        units[pin.unit.index()].position.offset(pin.dx, pin.dy)
    }

    /// Cached bounds; `None` after a connected unit moved.
    pub fn bounds(&self) -> Option<&NetBounds> {
        self.bounds.as_ref()
    }

    pub(crate) fn invalidate(&mut self) {
        self.bounds = None;
    }

    pub(crate) fn refresh(&mut self, units: &[PlacementUnit]) {
        if self.bounds.is_none() {
            self.bounds = self.compute_bounds(|unit| units[unit.index()].position);
        }
    }

    /// Computes bounds with positions supplied by `position_of`.
    ///
    /// Ties keep the lowest pin index. Returns `None` for pinless nets.
    pub fn compute_bounds(&self, position_of: impl Fn(UnitId) -> Point) -> Option<NetBounds> {
        let first = self.pins.first()?;
        let p0 = position_of(first.unit).offset(first.dx, first.dy);
        let mut b = NetBounds {
            left: 0,
            right: 0,
            bottom: 0,
            top: 0,
            x_lo: p0.x,
            x_hi: p0.x,
            y_lo: p0.y,
            y_hi: p0.y,
        };
        for (i, pin) in self.pins.iter().enumerate().skip(1) {
            let p = position_of(pin.unit).offset(pin.dx, pin.dy);
            if p.x < b.x_lo {
                b.x_lo = p.x;
                b.left = i;
            }
            if p.x > b.x_hi {
                b.x_hi = p.x;
                b.right = i;
            }
            if p.y < b.y_lo {
                b.y_lo = p.y;
                b.bottom = i;
            }
            if p.y > b.y_hi {
                b.y_hi = p.y;
                b.top = i;
            }
        }
        Some(b)
    }

    /// HPWL from the cache, or computed from `units` when stale.
    pub fn hpwl(&self, units: &[PlacementUnit]) -> f64 {
        match &self.bounds {
            Some(b) => b.hpwl(),
            None => self
                .compute_bounds(|unit| units[unit.index()].position)
                .map_or(0.0, |b| b.hpwl()),
        }
    }
}
