//! Opaque ID newtypes for placement entities.
//!
//! Design-side IDs ([`CellId`], [`DesignNetId`], [`ControlSetId`]) index the
//! provider's [`Design`](crate::design::Design). Placement-side IDs
//! ([`UnitId`], [`NetId`]) index the arenas of
//! [`PlacementInfo`](crate::model::PlacementInfo). All are thin `u32`
//! wrappers that are `Copy`, `Hash`, and `Serialize`/`Deserialize`.

use serde::{Deserialize, Serialize};

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
        pub struct $name(u32);

        impl $name {
            /// Creates an ID from a raw `u32` index.
            pub fn from_raw(index: u32) -> Self {
                Self(index)
            }

            /// Returns the raw `u32` index.
            pub fn as_raw(self) -> u32 {
                self.0
            }

            /// Returns the index as a `usize` for arena access.
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id!(
    /// Opaque, copyable ID for a primitive cell in the design.
    CellId
);

define_id!(
    /// Opaque, copyable ID for a net in the design.
    DesignNetId
);

define_id!(
    /// Opaque, copyable ID for a deduplicated flip-flop control set.
    ControlSetId
);

define_id!(
    /// Opaque, copyable ID for a placement unit.
    UnitId
);

define_id!(
    /// Opaque, copyable ID for a placement net.
    NetId
);
