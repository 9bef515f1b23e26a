//! Collapsing a cone of chained lookup tables into one table.

use ecoweave_netlist::{
    CellId, Design, HierPin, InstId, NetId, Netlist, PinName, Primitive, SiteInstId, LOGIC_KINDS,
};
use ecoweave_netlist::device::BelClass;
use indexmap::IndexMap;

use crate::error::{EcoError, Result};
use crate::lut_equation::{configure_lut, lut_table, Expr, MAX_LUT_SIZE};
use crate::placement::{centroid_of_points, find_empty_site_near};
use crate::surgery::{connect_pins, disconnect_pins, EcoConfig, NetPins};

/// The lookup tables behind one input pin and the nets entering them.
#[derive(Debug)]
struct Cone {
    expr: Expr,
    /// Boundary nets in slot order, keyed by parent net. The value is the
    /// net a cone pin saw it as.
    boundary: IndexMap<NetId, NetId>,
    /// Every table in the cone with its function over the boundary slots,
    /// one bit per row of a six-input table.
    tables: IndexMap<InstId, u64>,
}

/// The lookup table driving `net`, if its only leaf source is one.
fn lut_driver(netlist: &Netlist, net: NetId) -> Option<InstId> {
    match netlist.leaf_sources(net).as_slice() {
        [source] if netlist.is_lut(source.inst) => Some(source.inst),
        _ => None,
    }
}

/// Rows of a six-input table in which slot `slot` is high.
fn slot_rows(slot: usize) -> u64 {
    (0..64u32)
        .filter(|row| row >> slot & 1 == 1)
        .fold(0, |rows, row| rows | 1u64 << row)
}

struct ConeWalk<'a> {
    netlist: &'a Netlist,
    stack: Vec<InstId>,
    boundary: IndexMap<NetId, NetId>,
    tables: IndexMap<InstId, u64>,
}

impl ConeWalk<'_> {
    /// Function of `lut` over the boundary slots. Inputs are taken in pin
    /// order, so slots are numbered as they are first reached.
    fn visit(&mut self, lut: InstId) -> Result<u64> {
        if let Some(rows) = self.tables.get(&lut) {
            return Ok(*rows);
        }
        let (size, init) = lut_table(self.netlist, lut)?;
        self.stack.push(lut);
        let mut inputs = Vec::with_capacity(size as usize);
        for i in 0..size {
            let pin = HierPin::named(lut, &format!("I{i}"));
            let net = self
                .netlist
                .net_of(&pin)
                .ok_or_else(|| EcoError::Unconnected(self.netlist.pin_path(&pin)))?;
            let rows = match lut_driver(self.netlist, net) {
                Some(driver) if !self.stack.contains(&driver) => self.visit(driver)?,
                _ => self.boundary_slot(net)?,
            };
            inputs.push(rows);
        }
        self.stack.pop();

        let rows = (0..64u32)
            .filter(|&row| {
                let index = inputs
                    .iter()
                    .enumerate()
                    .fold(0u32, |index, (i, rows)| index | ((rows >> row & 1) as u32) << i);
                init >> index & 1 == 1
            })
            .fold(0, |acc, row| acc | 1u64 << row);
        self.tables.insert(lut, rows);
        Ok(rows)
    }

    fn boundary_slot(&mut self, net: NetId) -> Result<u64> {
        let key = self.netlist.parent_net(net);
        let slot = match self.boundary.get_index_of(&key) {
            Some(slot) => slot,
            None if self.boundary.len() < MAX_LUT_SIZE as usize => {
                self.boundary.insert(key, net);
                self.boundary.len() - 1
            }
            None => {
                return Err(EcoError::TooManyInputs {
                    found: self.boundary.len() + 1,
                })
            }
        };
        Ok(slot_rows(slot))
    }
}

fn collect_cone(netlist: &Netlist, root: InstId) -> Result<Cone> {
    let mut walk = ConeWalk {
        netlist,
        stack: Vec::new(),
        boundary: IndexMap::new(),
        tables: IndexMap::new(),
    };
    let rows = walk.visit(root)?;
    let size = walk.boundary.len().max(1) as u8;
    Ok(Cone {
        expr: Expr::from_table(rows, size),
        boundary: walk.boundary,
        tables: walk.tables,
    })
}

/// Other cells reading the site wire that `pin` is placed on.
fn shared_site_sinks(design: &Design, pin: &HierPin) -> Vec<HierPin> {
    let Some(cell) = design.physical_cell(pin.inst) else {
        return Vec::new();
    };
    let Some((si, wire)) = design.cell_pin_wire(cell, &pin.pin.to_string()) else {
        return Vec::new();
    };
    let template = design.template(si);
    template
        .wire_sinks(&wire)
        .iter()
        .filter(|r| template.bel(&r.bel).is_some_and(|b| b.class != BelClass::Mux))
        .filter_map(|r| bel_pin_user(design, si, &r.bel, &r.pin))
        .filter(|user| user.inst != pin.inst)
        .collect()
}

fn bel_pin_user(design: &Design, si: SiteInstId, bel: &str, physical: &str) -> Option<HierPin> {
    let cell = design.cell(*design.site_inst(si).cells.get(bel)?);
    let logical = cell
        .pin_map
        .iter()
        .find(|(_, p)| p.as_str() == physical)
        .map(|(l, _)| l)?;
    Some(HierPin::new(cell.inst, logical.parse::<PinName>().ok()?))
}

/// Replaces the lookup-table cone feeding `input` by a single new table.
///
/// Returns `None` when the pin is not driven by a lookup table or the cone
/// holds only one table. Fails before touching the design when the cone has
/// more inputs than a table can take. The tables left without loads are
/// not removed.
pub fn fuse_lut_input_cone(
    design: &mut Design,
    input: &HierPin,
    config: &EcoConfig,
) -> Result<Option<CellId>> {
    if !design.netlist.is_input(input) {
        return Err(EcoError::NotAnInput(design.netlist.pin_path(input)));
    }
    let net = design
        .netlist
        .net_of(input)
        .ok_or_else(|| EcoError::Unconnected(design.netlist.pin_path(input)))?;
    let Some(root) = lut_driver(&design.netlist, net) else {
        log::debug!("{} is not driven by a LUT", design.netlist.pin_path(input));
        return Ok(None);
    };
    let cone = collect_cone(&design.netlist, root)?;
    if cone.tables.len() < 2 {
        log::debug!("Nothing to fuse in front of {}", design.netlist.pin_path(input));
        return Ok(None);
    }
    let scope = design
        .netlist
        .inst(input.inst)
        .parent
        .ok_or_else(|| EcoError::NotAnInput(design.netlist.pin_path(input)))?;

    let points: Vec<_> = cone
        .boundary
        .values()
        .flat_map(|n| design.netlist.leaf_sources(*n))
        .filter_map(|src| design.physical_cell(src.inst))
        .filter_map(|c| design.cell_loc(c))
        .collect();
    let site = if points.is_empty() {
        None
    } else {
        centroid_of_points(design.device(), &points, LOGIC_KINDS)
            .and_then(|home| find_empty_site_near(design, home, None))
    };

    let size = cone.boundary.len().max(1) as u8;
    let type_name = design.netlist.ensure_primitive(Primitive::Lut(size));
    let n = design.netlist.unique_suffix();
    let name = design.netlist.unique_inst_name(scope, &format!("optimized_lut{n}"));
    let lut = design.netlist.create_instance(scope, &name, &type_name)?;
    let init = configure_lut(&mut design.netlist, lut, &cone.expr)?;
    let cell = design.create_cell(lut)?;
    match site {
        Some(site) => design.place_cell(cell, site, "A6LUT")?,
        None => log::debug!("No placed cone inputs, leaving {} unplaced", name),
    }

    let migrated: Vec<HierPin> = std::iter::once(input.clone())
        .chain(
            shared_site_sinks(design, input)
                .into_iter()
                .filter(|p| design.netlist.net_of(p) == Some(net)),
        )
        .collect();
    disconnect_pins(design, &migrated, None)?;

    let out_name = design.netlist.unique_net_name(scope, &name);
    let out_net = design.netlist.create_net(scope, &out_name)?;
    let mut batch = NetPins::new();
    for (slot, boundary_net) in cone.boundary.values().enumerate() {
        batch
            .entry(*boundary_net)
            .or_default()
            .push(HierPin::named(lut, &format!("I{slot}")));
    }
    batch.insert(
        out_net,
        std::iter::once(HierPin::named(lut, "O")).chain(migrated).collect(),
    );
    connect_pins(design, &batch, None, config)?;

    log::info!(
        "Fused {} LUTs in front of {} into {} ({} = {})",
        cone.tables.len(),
        design.netlist.pin_path(input),
        name,
        init,
        cone.expr
    );
    Ok(Some(cell))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lut_equation::{init_from_equation, LUT_INIT};
    use ecoweave_netlist::{CellType, PortDirection};

    fn lut(nl: &mut Netlist, name: &str, equation: &str, size: u8) -> InstId {
        let ty = nl.ensure_primitive(Primitive::Lut(size));
        let top = nl.top();
        let inst = nl.create_instance(top, name, &ty).unwrap();
        nl.set_property(inst, LUT_INIT, init_from_equation(equation, size).unwrap());
        inst
    }

    fn wire(nl: &mut Netlist, name: &str, pins: &[(InstId, &str)]) -> NetId {
        let top = nl.top();
        let net = nl.create_net(top, name).unwrap();
        for (inst, port) in pins {
            nl.connect(net, HierPin::named(*inst, port)).unwrap();
        }
        net
    }

    #[test]
    fn reconvergent_net_takes_one_slot() {
        // a feeds both x and y; z = x & y
        let mut nl = Netlist::new("top", CellType::hierarchical("top"));
        nl.add_top_port("a", PortDirection::Input, None);
        nl.add_top_port("b", PortDirection::Input, None);
        let top = nl.top();
        let x = lut(&mut nl, "x", "O=!I0", 1);
        let y = lut(&mut nl, "y", "O=I0 ^ I1", 2);
        let z = lut(&mut nl, "z", "O=I0 & I1", 2);
        let a = wire(&mut nl, "a", &[(top, "a"), (x, "I0"), (y, "I0")]);
        let b = wire(&mut nl, "b", &[(top, "b"), (y, "I1")]);
        wire(&mut nl, "x_o", &[(x, "O"), (z, "I0")]);
        wire(&mut nl, "y_o", &[(y, "O"), (z, "I1")]);
        nl.rebuild_parent_nets();

        let cone = collect_cone(&nl, z).unwrap();
        assert_eq!(cone.tables.len(), 3);
        assert_eq!(cone.boundary.values().copied().collect::<Vec<_>>(), vec![a, b]);
        // !a & (a ^ b) == !a & b
        assert_eq!(cone.expr.truth_table(2), 0b0100);
    }

    #[test]
    fn shared_tables_are_evaluated_once() {
        // t_i = t_{i-1} ^ !t_{i-1} read through both inputs
        let mut nl = Netlist::new("top", CellType::hierarchical("top"));
        nl.add_top_port("a", PortDirection::Input, None);
        let top = nl.top();
        let mut prev = (top, "a".to_string());
        let mut chain = Vec::new();
        for i in 0..16 {
            let t = lut(&mut nl, &format!("t{i}"), "O=I0 & !I1 + I1", 2);
            wire(&mut nl, &format!("n{i}"), &[(prev.0, prev.1.as_str()), (t, "I0"), (t, "I1")]);
            prev = (t, "O".to_string());
            chain.push(t);
        }
        nl.rebuild_parent_nets();

        let cone = collect_cone(&nl, chain[15]).unwrap();
        assert_eq!(cone.tables.keys().copied().collect::<Vec<_>>(), chain);
        assert_eq!(cone.boundary.len(), 1);
        // x & !x + x == x
        assert_eq!(cone.expr.truth_table(1), 0b10);
    }

    #[test]
    fn unconnected_cone_input_is_an_error() {
        let mut nl = Netlist::new("top", CellType::hierarchical("top"));
        let x = lut(&mut nl, "x", "O=I0 & I1", 2);
        nl.add_top_port("a", PortDirection::Input, None);
        let top = nl.top();
        wire(&mut nl, "a", &[(top, "a"), (x, "I0")]);
        assert!(matches!(collect_cone(&nl, x), Err(EcoError::Unconnected(p)) if p == "x/I1"));
    }
}
