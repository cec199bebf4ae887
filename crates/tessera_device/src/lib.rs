//! Fabric model consumed by the placement core.
//!
//! A [`Device`] is an immutable collection of [`Site`]s arranged in typed
//! columns and partitioned into clock regions. The placer never creates or
//! destroys sites; it only records which units occupy them. The
//! [`CompatiblePlacementTable`] maps logical resource names (`LUT6`, `FF`,
//! `RAMB36`, ...) onto the BEL classes and site types that can host them.
//!
//! Devices are normally produced by a netlist/device provider. For tests and
//! small experiments, [`DeviceBuilder`] lays out a regular column grid:
//!
//! ```
//! use tessera_device::{DeviceBuilder, SiteType};
//!
//! let device = DeviceBuilder::new("demo", 10.0)
//!     .columns(SiteType::SliceL, 3, 1.0)
//!     .column(SiteType::Bram, 5.0)
//!     .build();
//! assert_eq!(device.count_of_type(SiteType::SliceL), 30);
//! assert_eq!(device.count_of_type(SiteType::Bram), 2);
//! ```

#![warn(missing_docs)]

pub mod compat;
pub mod device;
pub mod ids;
pub mod types;

pub use compat::{BelClass, CompatiblePlacementTable, ResolvedResource, ResourceEntry};
pub use device::{Device, DeviceBuilder};
pub use ids::{BelClassId, ClockRegionId, SiteId};
pub use types::{ClockRegion, Site, SiteColumn, SiteType};
