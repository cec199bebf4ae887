//! Resource-type compatibility between logical cells and physical sites.
//!
//! Every primitive cell names a logical resource (`LUT6`, `FF`, `RAMB36`...).
//! The table maps each resource onto a BEL class, which is the unit the bin
//! grids count capacity in, and onto the ordered site types that can host
//! it. An alias table lists substitutes for resources whose own class is
//! unusable, such as distributed RAM that is not used as memory and can
//! behave as an ordinary LUT.

use crate::ids::BelClassId;
use crate::types::SiteType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A group of interchangeable BEL slots counted together for density.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BelClass {
    /// Class name, e.g. `SLICE_LUT`.
    pub name: String,
    /// Site types providing slots of this class, in preference order.
    pub site_types: Vec<SiteType>,
    /// Slots of this class in one site.
    pub slots_per_site: f64,
}

/// How one logical resource maps onto the fabric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceEntry {
    /// BEL class that hosts the resource.
    pub class: BelClassId,
    /// Fraction of one class slot a cell of this resource consumes.
    pub occupation: f64,
}

/// A resource lookup after alias resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedResource<'a> {
    /// The resource name actually used.
    pub resource: &'a str,
    /// The BEL class of that resource.
    pub class: BelClassId,
    /// Slot occupation per cell.
    pub occupation: f64,
    /// `true` if an alias replaced the requested resource.
    pub aliased: bool,
}

/// Static mapping from logical resource names to BEL classes and site types.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompatiblePlacementTable {
    classes: Vec<BelClass>,
    resources: BTreeMap<String, ResourceEntry>,
    aliases: BTreeMap<String, String>,
}

impl CompatiblePlacementTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a BEL class, returning its ID. Re-registering a name
    /// replaces its site types and slot count.
    pub fn add_class(
        &mut self,
        name: impl Into<String>,
        site_types: Vec<SiteType>,
        slots_per_site: f64,
    ) -> BelClassId {
        let name = name.into();
        if let Some(id) = self.class_id(&name) {
            self.classes[id.index()] = BelClass {
                name,
                site_types,
                slots_per_site,
            };
            return id;
        }
        let id = BelClassId::from_raw(self.classes.len() as u32);
        self.classes.push(BelClass {
            name,
            site_types,
            slots_per_site,
        });
        id
    }

    /// Maps a resource onto a registered class. Returns `false` if the
    /// class is unknown.
    pub fn add_resource(&mut self, name: impl Into<String>, class: &str, occupation: f64) -> bool {
        match self.class_id(class) {
            Some(class) => {
                self.resources
                    .insert(name.into(), ResourceEntry { class, occupation });
                true
            }
            None => false,
        }
    }

    /// Declares `substitute` as the fallback resource for `resource`.
    pub fn add_alias(&mut self, resource: impl Into<String>, substitute: impl Into<String>) {
        self.aliases.insert(resource.into(), substitute.into());
    }

    /// Looks up a class by name.
    pub fn class_id(&self, name: &str) -> Option<BelClassId> {
        self.classes
            .iter()
            .position(|c| c.name == name)
            .map(|i| BelClassId::from_raw(i as u32))
    }

    /// Returns the class with the given ID.
    pub fn class(&self, id: BelClassId) -> Option<&BelClass> {
        self.classes.get(id.index())
    }

    /// Returns all classes, indexed by [`BelClassId`].
    pub fn classes(&self) -> &[BelClass] {
        &self.classes
    }

    /// Returns the direct entry for a resource, ignoring aliases.
    pub fn resource(&self, name: &str) -> Option<&ResourceEntry> {
        self.resources.get(name)
    }

    /// Returns the alias registered for a resource.
    pub fn alias(&self, name: &str) -> Option<&str> {
        self.aliases.get(name).map(String::as_str)
    }

    /// Site types able to host a resource, in preference order.
    pub fn site_types(&self, name: &str) -> &[SiteType] {
        self.resource(name)
            .and_then(|r| self.class(r.class))
            .map(|c| c.site_types.as_slice())
            .unwrap_or(&[])
    }

    /// Slots of `class` offered by one site of `site_type`.
    pub fn slots_at(&self, class: BelClassId, site_type: SiteType) -> f64 {
        match self.class(class) {
            Some(c) if c.site_types.contains(&site_type) => c.slots_per_site,
            _ => 0.0,
        }
    }

    /// Resolves a resource, following the alias chain while `usable` rejects
    /// the candidate class. Returns `None` if no usable entry is reachable.
    pub fn resolve<'a>(
        &'a self,
        name: &'a str,
        usable: impl Fn(BelClassId) -> bool,
    ) -> Option<ResolvedResource<'a>> {
        let mut current = name;
        let mut aliased = false;
        for _ in 0..=self.aliases.len() {
            if let Some(entry) = self.resources.get(current) {
                if usable(entry.class) {
                    return Some(ResolvedResource {
                        resource: current,
                        class: entry.class,
                        occupation: entry.occupation,
                        aliased,
                    });
                }
            }
            current = self.aliases.get(current)?.as_str();
            aliased = true;
        }
        None
    }

    /// The default table for UltraScale-style slices.
    ///
    /// A slice offers eight LUT sites (two LUTs each when fractured), sixteen
    /// flip-flops, four F7 and two F8 muxes, and one CARRY8. LUTs with five or
    /// fewer inputs count half a slot because two of them may share a site.
    pub fn ultrascale() -> Self {
        let slices = vec![SiteType::SliceL, SiteType::SliceM];
        let mut table = Self::new();
        table.add_class("SLICE_LUT", slices.clone(), 8.0);
        table.add_class("SLICE_FF", slices.clone(), 16.0);
        table.add_class("CARRY", slices.clone(), 1.0);
        table.add_class("MUXF7", slices.clone(), 4.0);
        table.add_class("MUXF8", slices, 2.0);
        table.add_class("SLICEM_LUT", vec![SiteType::SliceM], 8.0);
        table.add_class("BRAM", vec![SiteType::Bram], 1.0);
        table.add_class("DSP", vec![SiteType::Dsp], 1.0);
        table.add_class("IO", vec![SiteType::Io], 1.0);

        for inputs in 1..=5 {
            table.add_resource(format!("LUT{inputs}"), "SLICE_LUT", 0.5);
        }
        table.add_resource("LUT6", "SLICE_LUT", 1.0);
        table.add_resource("FF", "SLICE_FF", 1.0);
        table.add_resource("CARRY8", "CARRY", 1.0);
        table.add_resource("MUXF7", "MUXF7", 1.0);
        table.add_resource("MUXF8", "MUXF8", 1.0);
        table.add_resource("LUTRAM", "SLICEM_LUT", 1.0);
        table.add_resource("RAMB18", "BRAM", 1.0);
        table.add_resource("RAMB36", "BRAM", 1.0);
        table.add_resource("DSP48", "DSP", 1.0);
        table.add_resource("IO", "IO", 1.0);
        table.add_alias("LUTRAM", "LUT6");
        table
    }
}
