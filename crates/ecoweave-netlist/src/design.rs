//! Physical implementation state layered over the logical [`Netlist`].
//!
//! Cells, site instances, terminal pins and physical nets are kept in
//! arenas keyed by stable ids. A physical net is named after the
//! hierarchical path of the logical net that holds its driver, which is the
//! only link between the two halves of the model.

use std::path::Path;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use crate::device::{BelClass, Device, GridLoc, PinDir, SiteTemplate, WireDriver};
use crate::error::{NetlistError, Result};
use crate::ids::{CellId, IdAllocator, InstId, PhysNetId, SiteId, SiteInstId, SitePinId};
use crate::netlist::{HierPin, Netlist, PortDirection, Primitive};

pub const GND_NET: &str = "GLOBAL_LOGIC0";
pub const VCC_NET: &str = "GLOBAL_LOGIC1";

/// Terminals scheduled for removal, keyed by the net they still sit on.
pub type PendingRemovals = IndexMap<PhysNetId, IndexSet<SitePinId>>;

/// High-level semantic classification of a physical net.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NetKind {
    /// Standard signal net.
    Normal,
    /// Dedicated ground.
    Ground,
    /// Dedicated power.
    Power,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PipIntent {
    General,
    /// Last hop into an input site pin.
    PinFeed,
    /// Detour through an input site pin back into the fabric.
    PinBounce,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SitePinRef {
    pub site: SiteId,
    pub pin: String,
}

/// One programmable interconnect point of a route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pip {
    pub tile: GridLoc,
    pub start: String,
    pub end: String,
    pub intent: PipIntent,
    pub site_pin: Option<SitePinRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysNet {
    pub name: String,
    pub kind: NetKind,
    pub pips: Vec<Pip>,
    pub pins: Vec<SitePinId>,
    pub source: Option<SitePinId>,
    pub alt_source: Option<SitePinId>,
}

impl PhysNet {
    pub fn is_static(&self) -> bool {
        self.kind != NetKind::Normal
    }
}

/// Terminal pin: a physical net bound to one pin of one site instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SitePinInst {
    pub name: String,
    pub site_inst: Option<SiteInstId>,
    pub net: Option<PhysNetId>,
    pub output: bool,
    pub routed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteInst {
    pub name: String,
    pub site: SiteId,
    /// BEL name to placed cell.
    pub cells: IndexMap<String, CellId>,
    /// Site pin name to terminal.
    pub pins: IndexMap<String, SitePinId>,
    /// At most one net per site wire.
    pub wire_nets: IndexMap<String, PhysNetId>,
    /// Routing multiplexer to its selected input pin.
    pub used_muxes: IndexMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    pub name: String,
    pub inst: InstId,
    pub site_inst: Option<SiteInstId>,
    pub bel: Option<String>,
    /// Logical pin name to physical BEL pin name.
    pub pin_map: IndexMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Design {
    pub name: String,
    device: Arc<Device>,
    pub netlist: Netlist,
    cells: IndexMap<CellId, Cell>,
    cell_names: IndexMap<String, CellId>,
    site_insts: IndexMap<SiteInstId, SiteInst>,
    site_inst_at: IndexMap<SiteId, SiteInstId>,
    site_pins: IndexMap<SitePinId, SitePinInst>,
    nets: IndexMap<PhysNetId, PhysNet>,
    net_names: IndexMap<String, PhysNetId>,
    gnd: PhysNetId,
    vcc: PhysNetId,
    ids: IdAllocator,
}

type SiteHop = (String, Option<(String, String)>);

impl Design {
    pub fn new(name: impl Into<String>, device: Arc<Device>, netlist: Netlist) -> Self {
        let mut design = Self {
            name: name.into(),
            device,
            netlist,
            cells: IndexMap::new(),
            cell_names: IndexMap::new(),
            site_insts: IndexMap::new(),
            site_inst_at: IndexMap::new(),
            site_pins: IndexMap::new(),
            nets: IndexMap::new(),
            net_names: IndexMap::new(),
            gnd: PhysNetId::from_raw(0),
            vcc: PhysNetId::from_raw(0),
            ids: IdAllocator::default(),
        };
        design.gnd = design.insert_net(GND_NET, NetKind::Ground);
        design.vcc = design.insert_net(VCC_NET, NetKind::Power);
        design
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    // --- snapshots ---

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    // --- cells ---

    pub fn cell(&self, id: CellId) -> &Cell {
        &self.cells[&id]
    }

    pub fn get_cell(&self, id: CellId) -> Option<&Cell> {
        self.cells.get(&id)
    }

    pub fn cells(&self) -> impl Iterator<Item = (CellId, &Cell)> {
        self.cells.iter().map(|(id, c)| (*id, c))
    }

    pub fn cell_by_name(&self, name: &str) -> Option<CellId> {
        self.cell_names.get(name).copied()
    }

    /// Physical cell implementing a leaf logical instance.
    pub fn physical_cell(&self, inst: InstId) -> Option<CellId> {
        self.netlist.get_inst(inst)?;
        self.cell_by_name(&self.netlist.inst_path(inst))
    }

    pub fn create_cell(&mut self, inst: InstId) -> Result<CellId> {
        let name = self.netlist.inst_path(inst);
        if self.cell_names.contains_key(&name) {
            return Err(NetlistError::CellExists(name));
        }
        let id = CellId::from_raw(self.ids.next_raw());
        self.cells.insert(
            id,
            Cell {
                name: name.clone(),
                inst,
                site_inst: None,
                bel: None,
                pin_map: IndexMap::new(),
            },
        );
        self.cell_names.insert(name, id);
        Ok(id)
    }

    pub fn place_cell(&mut self, cell: CellId, site: SiteId, bel: &str) -> Result<()> {
        let site_def = self.device.site(site);
        let template = site_def.kind.template();
        let bel_def = template.bel(bel).ok_or_else(|| NetlistError::BelNotFound {
            site: site_def.name.clone(),
            bel: bel.to_string(),
        })?;
        let c = self.cell(cell);
        let pin_map = default_pin_map(self.netlist.primitive(c.inst), bel_def.class, bel)
            .ok_or_else(|| NetlistError::IncompatibleBel {
                cell: c.name.clone(),
                bel: bel.to_string(),
            })?;
        if c.site_inst.is_some() {
            self.unplace_cell(cell);
        }
        let si = self.create_site_inst(site);
        if let Some(occupant) = self.site_inst(si).cells.get(bel) {
            let occupant = self.cell(*occupant).name.clone();
            self.prune_site_inst(si);
            return Err(NetlistError::BelOccupied {
                site: self.device.site(site).name.clone(),
                bel: bel.to_string(),
                occupant,
            });
        }
        if let Some(s) = self.site_insts.get_mut(&si) {
            s.cells.insert(bel.to_string(), cell);
        }
        if let Some(c) = self.cells.get_mut(&cell) {
            c.site_inst = Some(si);
            c.bel = Some(bel.to_string());
            c.pin_map = pin_map;
        }
        Ok(())
    }

    pub fn unplace_cell(&mut self, cell: CellId) {
        let Some(c) = self.cells.get_mut(&cell) else {
            return;
        };
        let (Some(si), Some(bel)) = (c.site_inst.take(), c.bel.take()) else {
            return;
        };
        if let Some(s) = self.site_insts.get_mut(&si) {
            s.cells.shift_remove(&bel);
        }
        self.prune_site_inst(si);
    }

    pub fn remove_cell(&mut self, cell: CellId) {
        self.unplace_cell(cell);
        if let Some(c) = self.cells.shift_remove(&cell) {
            self.cell_names.shift_remove(&c.name);
        }
    }

    pub fn cell_loc(&self, cell: CellId) -> Option<GridLoc> {
        let si = self.get_cell(cell)?.site_inst?;
        Some(self.site_inst_loc(si))
    }

    /// Site instance and site wire of a cell's logical pin.
    pub fn cell_pin_wire(&self, cell: CellId, logical: &str) -> Option<(SiteInstId, String)> {
        let c = self.get_cell(cell)?;
        let si = c.site_inst?;
        let physical = c.pin_map.get(logical)?;
        let wire = self
            .template(si)
            .bel_pin_wire(c.bel.as_deref()?, physical)?;
        Some((si, wire.to_string()))
    }

    fn cell_pin_at(&self, si: SiteInstId, bel: &str, physical: &str) -> Option<HierPin> {
        let cell = self.cell(*self.site_inst(si).cells.get(bel)?);
        let logical = cell
            .pin_map
            .iter()
            .find(|(_, p)| p.as_str() == physical)
            .map(|(l, _)| l)?;
        Some(HierPin::new(cell.inst, logical.parse().ok()?))
    }

    // --- site instances ---

    pub fn site_inst(&self, id: SiteInstId) -> &SiteInst {
        &self.site_insts[&id]
    }

    pub fn site_insts(&self) -> impl Iterator<Item = (SiteInstId, &SiteInst)> {
        self.site_insts.iter().map(|(id, s)| (*id, s))
    }

    pub fn site_inst_at(&self, site: SiteId) -> Option<SiteInstId> {
        self.site_inst_at.get(&site).copied()
    }

    pub fn site_inst_loc(&self, si: SiteInstId) -> GridLoc {
        self.device.site(self.site_inst(si).site).loc
    }

    pub fn template(&self, si: SiteInstId) -> &'static SiteTemplate {
        self.device.site(self.site_inst(si).site).kind.template()
    }

    pub fn create_site_inst(&mut self, site: SiteId) -> SiteInstId {
        if let Some(si) = self.site_inst_at(site) {
            return si;
        }
        let id = SiteInstId::from_raw(self.ids.next_raw());
        self.site_insts.insert(
            id,
            SiteInst {
                name: self.device.site(site).name.clone(),
                site,
                cells: IndexMap::new(),
                pins: IndexMap::new(),
                wire_nets: IndexMap::new(),
                used_muxes: IndexMap::new(),
            },
        );
        self.site_inst_at.insert(site, id);
        id
    }

    fn prune_site_inst(&mut self, si: SiteInstId) {
        let empty = self
            .site_insts
            .get(&si)
            .is_some_and(|s| s.cells.is_empty() && s.pins.is_empty());
        if empty {
            if let Some(s) = self.site_insts.shift_remove(&si) {
                self.site_inst_at.shift_remove(&s.site);
            }
        }
    }

    pub fn wire_net(&self, si: SiteInstId, wire: &str) -> Option<PhysNetId> {
        self.site_insts.get(&si)?.wire_nets.get(wire).copied()
    }

    // --- physical nets ---

    fn insert_net(&mut self, name: &str, kind: NetKind) -> PhysNetId {
        let id = PhysNetId::from_raw(self.ids.next_raw());
        self.nets.insert(
            id,
            PhysNet {
                name: name.to_string(),
                kind,
                pips: Vec::new(),
                pins: Vec::new(),
                source: None,
                alt_source: None,
            },
        );
        self.net_names.insert(name.to_string(), id);
        id
    }

    pub fn net(&self, id: PhysNetId) -> &PhysNet {
        &self.nets[&id]
    }

    pub fn get_net(&self, id: PhysNetId) -> Option<&PhysNet> {
        self.nets.get(&id)
    }

    pub fn nets(&self) -> impl Iterator<Item = (PhysNetId, &PhysNet)> {
        self.nets.iter().map(|(id, n)| (*id, n))
    }

    pub fn net_by_name(&self, name: &str) -> Option<PhysNetId> {
        self.net_names.get(name).copied()
    }

    pub fn gnd_net(&self) -> PhysNetId {
        self.gnd
    }

    pub fn vcc_net(&self) -> PhysNetId {
        self.vcc
    }

    pub fn create_net(&mut self, name: &str, kind: NetKind) -> Result<PhysNetId> {
        if self.net_names.contains_key(name) {
            return Err(NetlistError::NetExists(name.to_string()));
        }
        Ok(self.insert_net(name, kind))
    }

    pub fn get_or_create_net(&mut self, name: &str) -> PhysNetId {
        match self.net_by_name(name) {
            Some(id) => id,
            None => self.insert_net(name, NetKind::Normal),
        }
    }

    pub fn set_net_kind(&mut self, net: PhysNetId, kind: NetKind) {
        if let Some(n) = self.nets.get_mut(&net) {
            n.kind = kind;
        }
    }

    pub fn add_pip(&mut self, net: PhysNetId, pip: Pip) {
        if let Some(n) = self.nets.get_mut(&net) {
            n.pips.push(pip);
        }
    }

    /// Drops all routing of a net and marks its terminals unrouted.
    pub fn unroute_net(&mut self, net: PhysNetId) {
        let Some(n) = self.nets.get_mut(&net) else {
            return;
        };
        n.pips.clear();
        for pin in n.pins.clone() {
            if let Some(p) = self.site_pins.get_mut(&pin) {
                p.routed = false;
            }
        }
    }

    pub fn sink_count(&self, net: PhysNetId) -> usize {
        self.net(net)
            .pins
            .iter()
            .filter(|p| !self.site_pin(**p).output)
            .count()
    }

    /// Whether the logical net behind `net` is fed from a top-level port
    /// rather than a leaf driver.
    pub fn is_driven_by_hier_port(&self, net: PhysNetId) -> bool {
        self.netlist
            .net_by_path(&self.net(net).name)
            .map(|logical| self.netlist.leaf_sources(logical).is_empty())
            .unwrap_or(false)
    }

    // --- terminals ---

    pub fn site_pin(&self, id: SitePinId) -> &SitePinInst {
        &self.site_pins[&id]
    }

    pub fn get_site_pin(&self, id: SitePinId) -> Option<&SitePinInst> {
        self.site_pins.get(&id)
    }

    pub fn site_pin_loc(&self, id: SitePinId) -> Option<GridLoc> {
        Some(self.site_inst_loc(self.get_site_pin(id)?.site_inst?))
    }

    pub fn create_pin(&mut self, net: PhysNetId, si: SiteInstId, name: &str) -> Result<SitePinId> {
        let s = self.site_inst(si);
        let def = self
            .template(si)
            .site_pin(name)
            .ok_or_else(|| NetlistError::PinNotFound(format!("{}/{}", s.name, name)))?;
        if s.pins.contains_key(name) {
            return Err(NetlistError::SitePinExists {
                site: s.name.clone(),
                pin: name.to_string(),
            });
        }
        let id = SitePinId::from_raw(self.ids.next_raw());
        self.site_pins.insert(
            id,
            SitePinInst {
                name: name.to_string(),
                site_inst: Some(si),
                net: None,
                output: def.dir == PinDir::Output,
                routed: false,
            },
        );
        if let Some(s) = self.site_insts.get_mut(&si) {
            s.pins.insert(name.to_string(), id);
        }
        self.add_pin(net, id);
        Ok(id)
    }

    pub fn add_pin(&mut self, net: PhysNetId, pin: SitePinId) {
        let Some(p) = self.site_pins.get_mut(&pin) else {
            return;
        };
        p.net = Some(net);
        let output = p.output;
        let Some(n) = self.nets.get_mut(&net) else {
            return;
        };
        if !n.pins.contains(&pin) {
            n.pins.push(pin);
        }
        if output {
            if n.source.is_none() {
                n.source = Some(pin);
            } else if n.source != Some(pin) && n.alt_source.is_none() {
                n.alt_source = Some(pin);
            }
        }
    }

    /// Removes a terminal from its net. With `preserve_routing` only the
    /// dead routing branch that led to the terminal is pruned.
    pub fn remove_pin(&mut self, net: PhysNetId, pin: SitePinId, preserve_routing: bool) {
        let pin_ref = self.site_pin_ref(pin);
        if let Some(p) = self.site_pins.get_mut(&pin) {
            if p.net == Some(net) {
                p.net = None;
                p.routed = false;
            }
        }
        let Some(n) = self.nets.get_mut(&net) else {
            return;
        };
        n.pins.retain(|p| *p != pin);
        if n.source == Some(pin) {
            n.source = n.alt_source.take();
        } else if n.alt_source == Some(pin) {
            n.alt_source = None;
        }
        if !preserve_routing {
            self.unroute_net(net);
        } else if let Some(pin_ref) = pin_ref {
            prune_branch(&mut n.pips, &pin_ref);
        }
    }

    fn site_pin_ref(&self, pin: SitePinId) -> Option<SitePinRef> {
        let p = self.get_site_pin(pin)?;
        Some(SitePinRef {
            site: self.site_inst(p.site_inst?).site,
            pin: p.name.clone(),
        })
    }

    /// Unbinds a terminal from its site instance, keeping it in the arena.
    pub fn detach_site_pin(&mut self, pin: SitePinId) {
        let Some(p) = self.site_pins.get_mut(&pin) else {
            return;
        };
        let Some(si) = p.site_inst.take() else {
            return;
        };
        let name = p.name.clone();
        if let Some(s) = self.site_insts.get_mut(&si) {
            if s.pins.get(&name) == Some(&pin) {
                s.pins.shift_remove(&name);
            }
        }
    }

    pub fn attach_site_pin(&mut self, si: SiteInstId, pin: SitePinId) {
        let Some(p) = self.site_pins.get_mut(&pin) else {
            return;
        };
        p.site_inst = Some(si);
        let name = p.name.clone();
        if let Some(s) = self.site_insts.get_mut(&si) {
            s.pins.insert(name, pin);
        }
    }

    /// Removes a terminal entirely: from its net, its site and the arena.
    pub fn delete_site_pin(&mut self, pin: SitePinId) {
        let Some(p) = self.get_site_pin(pin).cloned() else {
            return;
        };
        if let Some(net) = p.net {
            self.remove_pin(net, pin, true);
        }
        if let Some(si) = p.site_inst {
            let template = self.template(si);
            if !p.output {
                self.unroute_downstream(si, &p.name);
            } else if let Some(WireDriver::Mux(mux)) = template.wire_driver(&p.name) {
                if let Some(s) = self.site_insts.get_mut(&si) {
                    s.wire_nets.shift_remove(&p.name);
                    s.used_muxes.shift_remove(mux);
                }
            }
            self.detach_site_pin(pin);
            self.site_pins.shift_remove(&pin);
            self.prune_site_inst(si);
        } else {
            self.site_pins.shift_remove(&pin);
        }
    }

    // --- intra-site routing ---

    fn site_path(&self, si: SiteInstId, from: &str, to: &str, follow_used: bool) -> Option<Vec<SiteHop>> {
        self.site_path_at(si, from, to, follow_used, 0)
    }

    fn site_path_at(
        &self,
        si: SiteInstId,
        from: &str,
        to: &str,
        follow_used: bool,
        depth: usize,
    ) -> Option<Vec<SiteHop>> {
        if from == to {
            return Some(vec![(to.to_string(), None)]);
        }
        if depth > 4 {
            return None;
        }
        let template = self.template(si);
        let Some(WireDriver::Mux(mux)) = template.wire_driver(to) else {
            return None;
        };
        let used = self.site_inst(si).used_muxes.get(mux);
        for input in template.bel(mux)?.inputs() {
            if follow_used && used.is_some_and(|u| *u != input.name) {
                continue;
            }
            if let Some(mut path) = self.site_path_at(si, from, &input.wire, follow_used, depth + 1) {
                path.push((to.to_string(), Some((mux.clone(), input.name.clone()))));
                return Some(path);
            }
        }
        None
    }

    /// Routes `net` inside a site from wire `from` to wire `to`, selecting
    /// multiplexer inputs on the way. Returns false if no path exists.
    pub fn route_site(&mut self, si: SiteInstId, net: PhysNetId, from: &str, to: &str) -> bool {
        let Some(path) = self.site_path(si, from, to, false) else {
            return false;
        };
        let Some(s) = self.site_insts.get_mut(&si) else {
            return false;
        };
        for (wire, mux) in path {
            s.wire_nets.insert(wire, net);
            if let Some((mux, input)) = mux {
                s.used_muxes.insert(mux, input);
            }
        }
        true
    }

    /// Clears the nets and multiplexer selections along the path from
    /// `from` to `to`. Returns false if no path exists.
    pub fn unroute_site(&mut self, si: SiteInstId, from: &str, to: &str) -> bool {
        let Some(path) = self
            .site_path(si, from, to, true)
            .or_else(|| self.site_path(si, from, to, false))
        else {
            return false;
        };
        let Some(s) = self.site_insts.get_mut(&si) else {
            return false;
        };
        for (wire, mux) in path {
            s.wire_nets.shift_remove(&wire);
            if let Some((mux, _)) = mux {
                s.used_muxes.shift_remove(&mux);
            }
        }
        true
    }

    fn unroute_downstream(&mut self, si: SiteInstId, wire: &str) {
        let template = self.template(si);
        let Some(s) = self.site_insts.get_mut(&si) else {
            return;
        };
        s.wire_nets.shift_remove(wire);
        let mut frontier = vec![wire.to_string()];
        while let Some(w) = frontier.pop() {
            for sink in template.wire_sinks(&w) {
                if s.used_muxes.get(&sink.bel) == Some(&sink.pin) {
                    s.used_muxes.shift_remove(&sink.bel);
                    if let Some(out) = template.mux_output_wire(&sink.bel) {
                        s.wire_nets.shift_remove(out);
                        frontier.push(out.to_string());
                    }
                }
            }
        }
    }

    fn unroute_upstream(&mut self, si: SiteInstId, wire: &str) {
        let template = self.template(si);
        let Some(s) = self.site_insts.get_mut(&si) else {
            return;
        };
        let mut cur = wire.to_string();
        loop {
            match template.wire_driver(&cur) {
                Some(WireDriver::Mux(mux)) => {
                    s.wire_nets.shift_remove(&cur);
                    let Some(input) = s.used_muxes.shift_remove(mux) else {
                        break;
                    };
                    match template.bel(mux).and_then(|b| b.pin(&input)) {
                        Some(pin) => cur = pin.wire.clone(),
                        None => break,
                    }
                }
                _ => break,
            }
        }
    }

    /// Site pin names able to feed `wire`, and the wires walked to find
    /// them. With `follow_routing` only the selected multiplexer inputs are
    /// followed.
    pub fn input_site_pins(&self, si: SiteInstId, wire: &str, follow_routing: bool) -> (Vec<String>, Vec<String>) {
        let template = self.template(si);
        let s = self.site_inst(si);
        let mut names = Vec::new();
        let mut wires = Vec::new();
        let mut stack = vec![wire.to_string()];
        while let Some(w) = stack.pop() {
            if wires.contains(&w) {
                continue;
            }
            wires.push(w.clone());
            match template.wire_driver(&w) {
                Some(WireDriver::SitePin(name)) => names.push(name.clone()),
                Some(WireDriver::Mux(mux)) => {
                    let Some(bel) = template.bel(mux) else {
                        continue;
                    };
                    let used = s.used_muxes.get(mux).filter(|_| follow_routing);
                    let inputs: Vec<&str> = bel
                        .inputs()
                        .filter(|i| used.map_or(true, |u| *u == i.name))
                        .map(|i| i.wire.as_str())
                        .collect();
                    stack.extend(inputs.into_iter().rev().map(str::to_string));
                }
                _ => {}
            }
        }
        (names, wires)
    }

    /// Output site pin names reachable from `wire`, the direct one first.
    pub fn output_site_pins(&self, si: SiteInstId, wire: &str, follow_routing: bool) -> Vec<String> {
        let template = self.template(si);
        let s = self.site_inst(si);
        let mut names = Vec::new();
        if template.site_pin(wire).is_some_and(|p| p.dir == PinDir::Output) {
            names.push(wire.to_string());
        }
        for sink in template.wire_sinks(wire) {
            let Some(out) = template.mux_output_wire(&sink.bel) else {
                continue;
            };
            if follow_routing && s.used_muxes.get(&sink.bel).is_some_and(|u| *u != sink.pin) {
                continue;
            }
            if template.site_pin(out).is_some_and(|p| p.dir == PinDir::Output) {
                names.push(out.to_string());
            }
        }
        names
    }

    /// Existing terminals currently serving a cell's logical pin.
    pub fn cell_site_pins(&self, cell: CellId, logical: &str) -> Vec<SitePinId> {
        let Some((si, wire)) = self.cell_pin_wire(cell, logical) else {
            return Vec::new();
        };
        let names = if self.cell_pin_is_output(cell, logical) {
            self.output_site_pins(si, &wire, true)
        } else {
            self.input_site_pins(si, &wire, true).0
        };
        let s = self.site_inst(si);
        names.iter().filter_map(|n| s.pins.get(n).copied()).collect()
    }

    pub fn cell_pin_is_output(&self, cell: CellId, logical: &str) -> bool {
        let inst = self.cell(cell).inst;
        logical
            .parse()
            .map(|pin| self.netlist.port_direction(&HierPin::new(inst, pin)) == Some(PortDirection::Output))
            .unwrap_or(false)
    }

    /// Logical pins served by a terminal through the current in-site routing.
    pub fn site_pin_users(&self, pin: SitePinId) -> Vec<HierPin> {
        let Some(p) = self.get_site_pin(pin) else {
            return Vec::new();
        };
        let Some(si) = p.site_inst else {
            return Vec::new();
        };
        let template = self.template(si);
        let s = self.site_inst(si);
        let mut users = Vec::new();
        if p.output {
            let mut wire = p.name.clone();
            for _ in 0..4 {
                match template.wire_driver(&wire) {
                    Some(WireDriver::Bel { bel, pin }) => {
                        users.extend(self.cell_pin_at(si, bel, pin));
                        break;
                    }
                    Some(WireDriver::Mux(mux)) => {
                        let next = s
                            .used_muxes
                            .get(mux)
                            .and_then(|input| template.bel(mux)?.pin(input));
                        match next {
                            Some(input) => wire = input.wire.clone(),
                            None => break,
                        }
                    }
                    _ => break,
                }
            }
        } else {
            let mut frontier = vec![p.name.clone()];
            while let Some(wire) = frontier.pop() {
                for sink in template.wire_sinks(&wire) {
                    match template.bel(&sink.bel).map(|b| b.class) {
                        Some(BelClass::Mux) => {
                            if s.used_muxes.get(&sink.bel) == Some(&sink.pin) {
                                frontier.extend(template.mux_output_wire(&sink.bel).map(str::to_string));
                            }
                        }
                        Some(_) => users.extend(self.cell_pin_at(si, &sink.bel, &sink.pin)),
                        None => {}
                    }
                }
            }
        }
        users
    }

    /// BEL output wire driving an output terminal through the current
    /// in-site routing.
    pub fn site_pin_driver_wire(&self, pin: SitePinId) -> Option<String> {
        let p = self.get_site_pin(pin)?;
        let si = p.site_inst?;
        let template = self.template(si);
        let mut wire = p.name.clone();
        for _ in 0..4 {
            match template.wire_driver(&wire)? {
                WireDriver::Bel { .. } => return Some(wire),
                WireDriver::Mux(mux) => {
                    let input = self.site_inst(si).used_muxes.get(mux)?;
                    wire = template.bel(mux)?.pin(input)?.wire.clone();
                }
                WireDriver::SitePin(_) => return None,
            }
        }
        None
    }

    // --- removal ---

    /// Removes a terminal now, or records it in `pending` so a later
    /// connect in the same batch can reuse it.
    pub fn handle_pin_removal(&mut self, pin: SitePinId, pending: Option<&mut PendingRemovals>) {
        let net = self.get_site_pin(pin).and_then(|p| p.net);
        match (pending, net) {
            (Some(pending), Some(net)) => {
                pending.entry(net).or_default().insert(pin);
            }
            _ => self.delete_site_pin(pin),
        }
    }

    pub fn apply_pending_removals(&mut self, pending: &mut PendingRemovals) {
        for (_, pins) in pending.drain(..) {
            for pin in pins {
                self.delete_site_pin(pin);
            }
        }
    }

    /// Unplaces a cell together with the terminals only it uses.
    pub fn fully_unplace_cell(&mut self, cell: CellId, mut pending: Option<&mut PendingRemovals>) {
        let Some(c) = self.get_cell(cell).cloned() else {
            return;
        };
        let Some(si) = c.site_inst else {
            return;
        };
        for logical in c.pin_map.keys() {
            for pin in self.cell_site_pins(cell, logical) {
                let shared = !self.site_pin(pin).output
                    && self.site_pin_users(pin).iter().any(|u| u.inst != c.inst);
                if !shared {
                    self.handle_pin_removal(pin, pending.as_deref_mut());
                }
            }
            let Some((_, wire)) = self.cell_pin_wire(cell, logical) else {
                continue;
            };
            if self.cell_pin_is_output(cell, logical) {
                if let Some(s) = self.site_insts.get_mut(&si) {
                    if !s.pins.contains_key(&wire) {
                        s.wire_nets.shift_remove(&wire);
                    }
                }
            } else {
                self.unroute_upstream(si, &wire);
            }
        }
        self.unplace_cell(cell);
    }
}

fn default_pin_map(primitive: Option<Primitive>, class: BelClass, bel: &str) -> Option<IndexMap<String, String>> {
    let mut map = IndexMap::new();
    match (primitive?, class) {
        (Primitive::Lut(k), BelClass::Lut) => {
            let is_lut5 = bel.ends_with("5LUT");
            if is_lut5 && k > 5 {
                return None;
            }
            for i in 0..k {
                map.insert(format!("I{i}"), format!("A{}", i + 1));
            }
            map.insert("O".to_string(), if is_lut5 { "O5" } else { "O6" }.to_string());
        }
        (flop, BelClass::Flop) if flop.is_flop() => {
            map.insert("C".to_string(), "CK".to_string());
            map.insert("CE".to_string(), "CE".to_string());
            map.insert(flop.reset_pin()?.to_string(), "SR".to_string());
            map.insert("D".to_string(), "D".to_string());
            map.insert("Q".to_string(), "Q".to_string());
        }
        _ => return None,
    }
    Some(map)
}

fn prune_branch(pips: &mut Vec<Pip>, pin: &SitePinRef) {
    let Some(index) = pips
        .iter()
        .position(|p| p.intent == PipIntent::PinFeed && p.site_pin.as_ref() == Some(pin))
    else {
        return;
    };
    let removed = pips.remove(index);
    let mut node = (removed.tile, removed.start);
    loop {
        if pips.iter().any(|p| p.tile == node.0 && p.start == node.1) {
            break;
        }
        match pips.iter().position(|p| p.tile == node.0 && p.end == node.1) {
            Some(i) => {
                let up = pips.remove(i);
                node = (up.tile, up.start);
            }
            None => break,
        }
    }
}
