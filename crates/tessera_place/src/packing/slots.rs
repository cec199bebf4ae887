//! Final mapping of a site's cells onto its BEL slots.
//!
//! A slice has eight LUT sites (A..H), each holding a six-input LUT or two
//! LUTs sharing at most five distinct inputs, sixteen flip-flops in four
//! control-set groups, four MUXF7, two MUXF8 and one carry. The mapping is
//! also the packer's feasibility test: a set of cells fits a site exactly
//! when [`map_cells`] finds a mapping for it.

use crate::design::{CellKind, MacroKind};
use crate::ids::{CellId, ControlSetId, NetId};
use crate::model::PlacementInfo;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tessera_device::SiteType;

/// LUT sites per slice.
pub const LUT_SITES: usize = 8;
/// Distinct inputs two LUTs may share in one LUT site.
pub const SHARED_LUT_INPUTS: usize = 5;
const FF_GROUP: usize = 4;

/// One LUT site.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LutSlot {
    /// The six-input position.
    pub six: Option<CellId>,
    /// The five-input position, used only when two LUTs share the site.
    pub five: Option<CellId>,
}

/// Cells mapped to the slots of one slice.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotAssignment {
    /// LUT sites A..H.
    pub luts: [LutSlot; LUT_SITES],
    /// Two flip-flops behind each LUT site.
    pub ffs: [[Option<CellId>; 2]; LUT_SITES],
    /// F7 muxes, one per LUT pair.
    pub muxf7: [Option<CellId>; 4],
    /// F8 muxes, one per LUT quad.
    pub muxf8: [Option<CellId>; 2],
    /// The carry element.
    pub carry: Option<CellId>,
}

impl SlotAssignment {
    /// Every mapped cell, in slot order.
    pub fn cells(&self) -> Vec<CellId> {
        let mut out = Vec::new();
        for lut in &self.luts {
            out.extend(lut.six);
            out.extend(lut.five);
        }
        for pair in &self.ffs {
            out.extend(pair.iter().flatten());
        }
        out.extend(self.muxf7.iter().flatten());
        out.extend(self.muxf8.iter().flatten());
        out.extend(self.carry);
        out
    }

    /// LUT sites with at least one cell.
    pub fn used_lut_sites(&self) -> usize {
        self.luts.iter().filter(|l| l.six.is_some() || l.five.is_some()).count()
    }

    fn lut_free(&self, k: usize) -> bool {
        self.luts[k].six.is_none() && self.luts[k].five.is_none()
    }

    fn first_free_lut(&self) -> Option<usize> {
        (0..LUT_SITES).find(|&k| self.lut_free(k))
    }
}

/// A cell headed for a slice, with the macro it came from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Member {
    pub cell: CellId,
    pub kind: CellKind,
    /// Kind and raw unit ID of the owning macro.
    pub group: Option<(MacroKind, u32)>,
    /// Position inside the owning macro.
    pub order: usize,
}

fn in_macro(m: &Member, kind: MacroKind) -> bool {
    matches!(m.group, Some((k, _)) if k == kind)
}

/// Maps `members` onto a slice of type `site_type`, or returns `None` if
/// they do not fit.
pub(crate) fn map_cells(members: &[Member], info: &PlacementInfo, site_type: SiteType) -> Option<SlotAssignment> {
    let mut s = SlotAssignment::default();
    let mut sorted: Vec<&Member> = members.iter().collect();
    sorted.sort_by_key(|m| (m.group.map(|g| g.1), m.order, m.cell));

    // carry and its LUTs in macro order
    let carries: Vec<&&Member> = sorted.iter().filter(|m| m.kind == CellKind::Carry8).collect();
    if carries.len() > 1 {
        return None;
    }
    s.carry = carries.first().map(|m| m.cell);
    let carry_luts: Vec<&&Member> = sorted
        .iter()
        .filter(|m| m.kind.is_lut_like() && in_macro(m, MacroKind::CarryChain))
        .collect();
    if carry_luts.len() > LUT_SITES {
        return None;
    }
    for (k, m) in carry_luts.iter().enumerate() {
        s.luts[k].six = Some(m.cell);
    }

    for m in sorted.iter().filter(|m| m.kind == (CellKind::LutRam { as_memory: true })) {
        if site_type != SiteType::SliceM {
            return None;
        }
        let k = s.first_free_lut()?;
        s.luts[k].six = Some(m.cell);
    }

    map_wide_muxes(&sorted, &mut s)?;
    map_plain_luts(&sorted, info, &mut s)?;
    map_ffs(&sorted, info, &mut s)?;
    Some(s)
}

fn macro_groups<'a>(sorted: &[&'a Member], kind: MacroKind) -> Vec<Vec<&'a Member>> {
    let mut groups: Vec<(u32, Vec<&Member>)> = Vec::new();
    for m in sorted.iter().copied().filter(|m| in_macro(m, kind)) {
        let id = m.group.map_or(0, |g| g.1);
        match groups.last_mut() {
            Some((last, list)) if *last == id => list.push(m),
            _ => groups.push((id, vec![m])),
        }
    }
    groups.into_iter().map(|(_, list)| list).collect()
}

fn map_wide_muxes(sorted: &[&Member], s: &mut SlotAssignment) -> Option<()> {
    for group in macro_groups(sorted, MacroKind::Mux8) {
        let luts: Vec<CellId> = group.iter().filter(|m| m.kind.is_lut_like()).map(|m| m.cell).collect();
        let f7: Vec<CellId> = group.iter().filter(|m| m.kind == CellKind::MuxF7).map(|m| m.cell).collect();
        let f8: Vec<CellId> = group.iter().filter(|m| m.kind == CellKind::MuxF8).map(|m| m.cell).collect();
        if luts.len() > 4 || f7.len() > 2 || f8.len() > 1 {
            return None;
        }
        let q = (0..2).find(|&q| {
            (4 * q..4 * q + 4).all(|k| s.lut_free(k))
                && s.muxf8[q].is_none()
                && s.muxf7[2 * q].is_none()
                && s.muxf7[2 * q + 1].is_none()
        })?;
        for (k, &cell) in luts.iter().enumerate() {
            s.luts[4 * q + k].six = Some(cell);
        }
        for (k, &cell) in f7.iter().enumerate() {
            s.muxf7[2 * q + k] = Some(cell);
        }
        s.muxf8[q] = f8.first().copied();
    }

    for group in macro_groups(sorted, MacroKind::Mux7) {
        let luts: Vec<CellId> = group.iter().filter(|m| m.kind.is_lut_like()).map(|m| m.cell).collect();
        let f7: Vec<CellId> = group.iter().filter(|m| m.kind == CellKind::MuxF7).map(|m| m.cell).collect();
        if luts.len() > 2 || f7.len() > 1 {
            return None;
        }
        let p = (0..4).find(|&p| s.lut_free(2 * p) && s.lut_free(2 * p + 1) && s.muxf7[p].is_none())?;
        for (k, &cell) in luts.iter().enumerate() {
            s.luts[2 * p + k].six = Some(cell);
        }
        s.muxf7[p] = f7.first().copied();
    }

    // muxes outside wide-mux macros take any free position
    for m in sorted.iter().filter(|m| !in_macro(m, MacroKind::Mux7) && !in_macro(m, MacroKind::Mux8)) {
        match m.kind {
            CellKind::MuxF7 => {
                let p = (0..4).find(|&p| s.muxf7[p].is_none())?;
                s.muxf7[p] = Some(m.cell);
            }
            CellKind::MuxF8 => {
                let q = (0..2).find(|&q| s.muxf8[q].is_none())?;
                s.muxf8[q] = Some(m.cell);
            }
            _ => {}
        }
    }
    Some(())
}

fn is_plain_lut(m: &Member) -> bool {
    m.kind.is_lut_like()
        && m.kind != (CellKind::LutRam { as_memory: true })
        && !in_macro(m, MacroKind::CarryChain)
        && !in_macro(m, MacroKind::Mux7)
        && !in_macro(m, MacroKind::Mux8)
}

fn is_pairable(m: &Member) -> bool {
    matches!(m.kind, CellKind::Lut { inputs } if inputs < 6)
}

fn map_plain_luts(sorted: &[&Member], info: &PlacementInfo, s: &mut SlotAssignment) -> Option<()> {
    let mut plain: Vec<&Member> = sorted.iter().copied().filter(|m| is_plain_lut(m)).collect();
    plain.sort_by_key(|m| m.cell);
    let (pairable, singles): (Vec<&Member>, Vec<&Member>) = plain.into_iter().partition(|m| is_pairable(m));
    let free = (0..LUT_SITES).filter(|&k| s.lut_free(k)).count();
    let demand = singles.len() + pairable.len();
    if demand <= free {
        for m in singles.iter().chain(&pairable) {
            let k = s.first_free_lut()?;
            s.luts[k].six = Some(m.cell);
        }
        return Some(());
    }

    let needed = demand - free;
    let inputs: Vec<&[NetId]> = pairable.iter().map(|m| info.cell(m.cell).inputs.as_slice()).collect();
    let pairs = pair_luts(&inputs, needed)?;
    let mut paired = vec![false; pairable.len()];
    for &(a, b) in &pairs {
        paired[a] = true;
        paired[b] = true;
        let k = s.first_free_lut()?;
        let (big, small) = if lut_inputs(pairable[a]) >= lut_inputs(pairable[b]) {
            (a, b)
        } else {
            (b, a)
        };
        s.luts[k].six = Some(pairable[big].cell);
        s.luts[k].five = Some(pairable[small].cell);
    }
    let rest = pairable.iter().enumerate().filter(|(i, _)| !paired[*i]).map(|(_, m)| m);
    for m in singles.iter().chain(rest) {
        let k = s.first_free_lut()?;
        s.luts[k].six = Some(m.cell);
    }
    Some(())
}

fn lut_inputs(m: &Member) -> u8 {
    match m.kind {
        CellKind::Lut { inputs } => inputs,
        _ => 6,
    }
}

fn shared_inputs(a: &[NetId], b: &[NetId]) -> usize {
    let (mut i, mut j, mut n) = (0, 0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                i += 1;
                j += 1;
            }
        }
        n += 1;
    }
    n + (a.len() - i) + (b.len() - j)
}

/// Pairs LUTs whose combined distinct inputs fit one LUT site, returning
/// at least `needed` pairs or `None`.
///
/// Greedy pairing in index order runs first; when it falls short, an exact
/// maximum pairing over subsets decides.
pub(crate) fn pair_luts(inputs: &[&[NetId]], needed: usize) -> Option<Vec<(usize, usize)>> {
    let n = inputs.len();
    let compatible = |a: usize, b: usize| shared_inputs(inputs[a], inputs[b]) <= SHARED_LUT_INPUTS;

    let mut used = vec![false; n];
    let mut greedy = Vec::new();
    for a in 0..n {
        if used[a] {
            continue;
        }
        if let Some(b) = (a + 1..n).find(|&b| !used[b] && compatible(a, b)) {
            used[a] = true;
            used[b] = true;
            greedy.push((a, b));
        }
    }
    if greedy.len() >= needed {
        return Some(greedy);
    }
    if n > 2 * LUT_SITES {
        return None;
    }

    fn best(mask: u32, n: usize, ok: &dyn Fn(usize, usize) -> bool, memo: &mut HashMap<u32, Vec<(usize, usize)>>) -> Vec<(usize, usize)> {
        let Some(a) = (0..n).find(|&i| mask & (1 << i) != 0) else {
            return Vec::new();
        };
        if let Some(hit) = memo.get(&mask) {
            return hit.clone();
        }
        let rest = mask & !(1 << a);
        let mut out = best(rest, n, ok, memo);
        for b in (a + 1..n).filter(|&b| rest & (1 << b) != 0 && ok(a, b)) {
            let mut with = best(rest & !(1 << b), n, ok, memo);
            if with.len() + 1 > out.len() {
                with.push((a, b));
                out = with;
            }
        }
        memo.insert(mask, out.clone());
        out
    }

    let mut memo = HashMap::new();
    let mut exact = best((1u32 << n) - 1, n, &compatible, &mut memo);
    exact.sort_unstable();
    (exact.len() >= needed).then_some(exact)
}

fn map_ffs(sorted: &[&Member], info: &PlacementInfo, s: &mut SlotAssignment) -> Option<()> {
    let mut ffs: Vec<(Option<ControlSetId>, CellId)> = sorted
        .iter()
        .filter(|m| m.kind == CellKind::Ff)
        .map(|m| (info.cell(m.cell).control_set, m.cell))
        .collect();
    if ffs.len() > 2 * LUT_SITES {
        return None;
    }
    ffs.sort();

    // groups of up to four flip-flops sharing a full control set
    let mut groups: Vec<(u32, Vec<CellId>)> = Vec::new();
    let mut start = 0;
    while start < ffs.len() {
        let cs = ffs[start].0;
        let end = ffs[start..].iter().position(|f| f.0 != cs).map_or(ffs.len(), |p| start + p);
        let half_key = info.clock_reset_of(ffs[start].1).unwrap_or(u32::MAX);
        for chunk in ffs[start..end].chunks(FF_GROUP) {
            groups.push((half_key, chunk.iter().map(|f| f.1).collect()));
        }
        start = end;
    }
    groups.sort_by_key(|g| g.0);

    // each half holds two groups with one clock and reset
    let mut half_key: [Option<u32>; 2] = [None; 2];
    let mut half_used = [0usize; 2];
    for (key, cells) in groups {
        let h = (0..2)
            .find(|&h| half_key[h] == Some(key) && half_used[h] < 2)
            .or_else(|| (0..2).find(|&h| half_used[h] == 0))?;
        half_key[h] = Some(key);
        let g = 2 * h + half_used[h];
        half_used[h] += 1;
        for (k, cell) in cells.into_iter().enumerate() {
            s.ffs[2 * g + k / 2][k % 2] = Some(cell);
        }
    }
    Some(())
}
