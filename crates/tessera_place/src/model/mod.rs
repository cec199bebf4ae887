//! The spatial data model shared by every placement stage.

pub mod bins;
pub mod info;
pub mod net;
pub mod occupancy;
pub mod unit;

pub use bins::{Bin, BinGrid, BinGrids};
pub use info::{CellInfo, PlacementInfo};
pub use net::{Axis, NetBounds, NetPin, PlacementNet};
pub use occupancy::SiteOccupancy;
pub use unit::{ClbSlots, LegalFamily, MacroCell, MacroShape, PlacementUnit, ResourceCounts, UnitKind};
