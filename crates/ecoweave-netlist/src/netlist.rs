//! Logical (hierarchical) netlist.
//!
//! The structure mirrors an unfolded hierarchical design: every instance
//! lives in one arena keyed by [`InstId`], every net in another keyed by
//! [`NetId`]. A net is owned by the instance whose scope it lives in and
//! lists its endpoints as [`HierPin`]s. An endpoint on the owner itself is a
//! boundary port seen from the inside; an endpoint on a child is seen from
//! the outside.

use std::collections::{HashSet, VecDeque};
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{NetlistError, Result};
use crate::ids::{IdAllocator, InstId, NetId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortDirection {
    Input,
    Output,
    Inout,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortDef {
    pub name: String,
    pub direction: PortDirection,
    /// Bus width; `None` for a scalar port.
    pub width: Option<u32>,
}

/// Library primitives the engine knows how to place and configure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Primitive {
    Lut(u8),
    Fdre,
    Fdse,
    Fdce,
    Fdpe,
    Gnd,
    Vcc,
}

impl Primitive {
    pub fn type_name(&self) -> String {
        match self {
            Primitive::Lut(k) => format!("LUT{k}"),
            Primitive::Fdre => "FDRE".to_string(),
            Primitive::Fdse => "FDSE".to_string(),
            Primitive::Fdce => "FDCE".to_string(),
            Primitive::Fdpe => "FDPE".to_string(),
            Primitive::Gnd => "GND".to_string(),
            Primitive::Vcc => "VCC".to_string(),
        }
    }

    pub fn from_type_name(name: &str) -> Option<Self> {
        match name {
            "FDRE" => Some(Primitive::Fdre),
            "FDSE" => Some(Primitive::Fdse),
            "FDCE" => Some(Primitive::Fdce),
            "FDPE" => Some(Primitive::Fdpe),
            "GND" => Some(Primitive::Gnd),
            "VCC" => Some(Primitive::Vcc),
            _ => {
                let k: u8 = name.strip_prefix("LUT")?.parse().ok()?;
                (1..=6).contains(&k).then_some(Primitive::Lut(k))
            }
        }
    }

    pub fn lut_size(&self) -> Option<u8> {
        match self {
            Primitive::Lut(k) => Some(*k),
            _ => None,
        }
    }

    pub fn is_flop(&self) -> bool {
        matches!(
            self,
            Primitive::Fdre | Primitive::Fdse | Primitive::Fdce | Primitive::Fdpe
        )
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, Primitive::Gnd | Primitive::Vcc)
    }

    /// Synchronous or asynchronous set/reset pin of a flip-flop.
    pub fn reset_pin(&self) -> Option<&'static str> {
        match self {
            Primitive::Fdre => Some("R"),
            Primitive::Fdse => Some("S"),
            Primitive::Fdce => Some("CLR"),
            Primitive::Fdpe => Some("PRE"),
            _ => None,
        }
    }

    pub fn output_pin(&self) -> &'static str {
        match self {
            Primitive::Lut(_) => "O",
            Primitive::Gnd => "G",
            Primitive::Vcc => "P",
            _ => "Q",
        }
    }

    fn ports(&self) -> Vec<PortDef> {
        let port = |name: &str, direction| PortDef {
            name: name.to_string(),
            direction,
            width: None,
        };
        match self {
            Primitive::Lut(k) => (0..*k)
                .map(|i| port(&format!("I{i}"), PortDirection::Input))
                .chain(std::iter::once(port("O", PortDirection::Output)))
                .collect(),
            Primitive::Gnd => vec![port("G", PortDirection::Output)],
            Primitive::Vcc => vec![port("P", PortDirection::Output)],
            flop => {
                let reset = flop.reset_pin().unwrap_or("R");
                vec![
                    port("C", PortDirection::Input),
                    port("CE", PortDirection::Input),
                    port(reset, PortDirection::Input),
                    port("D", PortDirection::Input),
                    port("Q", PortDirection::Output),
                ]
            }
        }
    }
}

/// A cell definition in the library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellType {
    pub name: String,
    pub ports: IndexMap<String, PortDef>,
    pub primitive: Option<Primitive>,
    /// Leaf types without a primitive are black boxes.
    pub leaf: bool,
}

impl CellType {
    pub fn hierarchical(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ports: IndexMap::new(),
            primitive: None,
            leaf: false,
        }
    }

    pub fn black_box(name: impl Into<String>) -> Self {
        Self {
            leaf: true,
            ..Self::hierarchical(name)
        }
    }

    pub fn primitive(primitive: Primitive) -> Self {
        Self {
            name: primitive.type_name(),
            ports: primitive
                .ports()
                .into_iter()
                .map(|p| (p.name.clone(), p))
                .collect(),
            primitive: Some(primitive),
            leaf: true,
        }
    }

    pub fn with_port(mut self, name: &str, direction: PortDirection) -> Self {
        self.ports.insert(
            name.to_string(),
            PortDef {
                name: name.to_string(),
                direction,
                width: None,
            },
        );
        self
    }

    pub fn with_bus(mut self, name: &str, direction: PortDirection, width: u32) -> Self {
        self.ports.insert(
            name.to_string(),
            PortDef {
                name: name.to_string(),
                direction,
                width: Some(width),
            },
        );
        self
    }
}

/// Port name plus optional bus index, rendered as `port` or `port[bit]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct PinName {
    pub port: String,
    pub bit: Option<u32>,
}

impl PinName {
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            bit: None,
        }
    }

    pub fn bit(port: impl Into<String>, bit: u32) -> Self {
        Self {
            port: port.into(),
            bit: Some(bit),
        }
    }
}

impl std::fmt::Display for PinName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.bit {
            Some(bit) => write!(f, "{}[{}]", self.port, bit),
            None => write!(f, "{}", self.port),
        }
    }
}

impl FromStr for PinName {
    type Err = NetlistError;

    fn from_str(s: &str) -> Result<Self> {
        match s.strip_suffix(']').and_then(|rest| rest.split_once('[')) {
            Some((port, bit)) => {
                let bit = bit
                    .parse()
                    .map_err(|_| NetlistError::PinNotFound(s.to_string()))?;
                Ok(PinName::bit(port, bit))
            }
            None if !s.is_empty() => Ok(PinName::new(s)),
            None => Err(NetlistError::PinNotFound(s.to_string())),
        }
    }
}

impl From<PinName> for String {
    fn from(p: PinName) -> Self {
        p.to_string()
    }
}

impl TryFrom<String> for PinName {
    type Error = NetlistError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

/// A port instance: one pin of one cell instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HierPin {
    pub inst: InstId,
    pub pin: PinName,
}

impl HierPin {
    pub fn new(inst: InstId, pin: PinName) -> Self {
        Self { inst, pin }
    }

    pub fn named(inst: InstId, port: &str) -> Self {
        Self::new(inst, PinName::new(port))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub name: String,
    pub parent: Option<InstId>,
    pub cell_type: String,
    pub children: IndexMap<String, InstId>,
    /// Nets owned by this instance's scope.
    pub nets: IndexMap<String, NetId>,
    /// Pin to net in the parent scope.
    pub port_nets: IndexMap<PinName, NetId>,
    /// Pin to net in this instance's own scope.
    pub inner_port_nets: IndexMap<PinName, NetId>,
    pub properties: IndexMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalNet {
    pub name: String,
    pub owner: InstId,
    pub pins: Vec<HierPin>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Netlist {
    pub name: String,
    library: IndexMap<String, CellType>,
    instances: IndexMap<InstId, Instance>,
    nets: IndexMap<NetId, LogicalNet>,
    top: InstId,
    ids: IdAllocator,
    unique_counter: u32,
    /// Canonical representative of every net, see [`Netlist::rebuild_parent_nets`].
    parent_nets: IndexMap<NetId, NetId>,
    #[serde(default)]
    parent_net_generation: u64,
}

impl Netlist {
    pub fn new(name: impl Into<String>, top_type: CellType) -> Self {
        let name = name.into();
        let mut ids = IdAllocator::default();
        let top = InstId::from_raw(ids.next_raw());
        let mut library = IndexMap::new();
        let top_type_name = top_type.name.clone();
        library.insert(top_type_name.clone(), top_type);
        let mut instances = IndexMap::new();
        instances.insert(
            top,
            Instance {
                name: name.clone(),
                parent: None,
                cell_type: top_type_name,
                children: IndexMap::new(),
                nets: IndexMap::new(),
                port_nets: IndexMap::new(),
                inner_port_nets: IndexMap::new(),
                properties: IndexMap::new(),
            },
        );
        Self {
            name,
            library,
            instances,
            nets: IndexMap::new(),
            top,
            ids,
            unique_counter: 0,
            parent_nets: IndexMap::new(),
            parent_net_generation: 0,
        }
    }

    pub fn top(&self) -> InstId {
        self.top
    }

    // --- library ---

    pub fn add_cell_type(&mut self, cell_type: CellType) -> &mut Self {
        self.library.insert(cell_type.name.clone(), cell_type);
        self
    }

    /// Adds the primitive to the library if missing and returns its type name.
    pub fn ensure_primitive(&mut self, primitive: Primitive) -> String {
        let name = primitive.type_name();
        self.library
            .entry(name.clone())
            .or_insert_with(|| CellType::primitive(primitive));
        name
    }

    pub fn cell_type(&self, name: &str) -> Option<&CellType> {
        self.library.get(name)
    }

    pub fn add_top_port(&mut self, name: &str, direction: PortDirection, width: Option<u32>) {
        let top_type = self.inst(self.top).cell_type.clone();
        if let Some(ty) = self.library.get_mut(&top_type) {
            ty.ports.insert(
                name.to_string(),
                PortDef {
                    name: name.to_string(),
                    direction,
                    width,
                },
            );
        }
    }

    // --- instances ---

    pub fn inst(&self, id: InstId) -> &Instance {
        &self.instances[&id]
    }

    pub fn get_inst(&self, id: InstId) -> Option<&Instance> {
        self.instances.get(&id)
    }

    pub fn instances(&self) -> impl Iterator<Item = (InstId, &Instance)> {
        self.instances.iter().map(|(id, inst)| (*id, inst))
    }

    pub fn type_of(&self, inst: InstId) -> &CellType {
        &self.library[&self.inst(inst).cell_type]
    }

    pub fn primitive(&self, inst: InstId) -> Option<Primitive> {
        self.type_of(inst).primitive
    }

    pub fn is_leaf(&self, inst: InstId) -> bool {
        self.type_of(inst).leaf
    }

    pub fn is_lut(&self, inst: InstId) -> bool {
        matches!(self.primitive(inst), Some(Primitive::Lut(_)))
    }

    pub fn set_property(&mut self, inst: InstId, key: &str, value: impl Into<String>) {
        if let Some(i) = self.instances.get_mut(&inst) {
            i.properties.insert(key.to_string(), value.into());
        }
    }

    pub fn property(&self, inst: InstId, key: &str) -> Option<&str> {
        self.inst(inst).properties.get(key).map(String::as_str)
    }

    pub fn create_instance(&mut self, parent: InstId, name: &str, cell_type: &str) -> Result<InstId> {
        if !self.library.contains_key(cell_type) {
            return Err(NetlistError::UnknownCellType(cell_type.to_string()));
        }
        if self.is_leaf(parent) {
            return Err(NetlistError::LeafScope(self.inst_path(parent)));
        }
        if self.inst(parent).children.contains_key(name) {
            return Err(NetlistError::InstanceExists(self.join_path(parent, name)));
        }
        let id = InstId::from_raw(self.ids.next_raw());
        self.instances.insert(
            id,
            Instance {
                name: name.to_string(),
                parent: Some(parent),
                cell_type: cell_type.to_string(),
                children: IndexMap::new(),
                nets: IndexMap::new(),
                port_nets: IndexMap::new(),
                inner_port_nets: IndexMap::new(),
                properties: IndexMap::new(),
            },
        );
        if let Some(p) = self.instances.get_mut(&parent) {
            p.children.insert(name.to_string(), id);
        }
        Ok(id)
    }

    /// Deletes an instance, its descendants and every net they own.
    pub fn remove_instance(&mut self, inst: InstId) {
        let Some(instance) = self.instances.get(&inst) else {
            return;
        };
        let outer: Vec<(PinName, NetId)> = instance
            .port_nets
            .iter()
            .map(|(p, n)| (p.clone(), *n))
            .collect();
        let parent = instance.parent;
        let name = instance.name.clone();
        for (pin, net) in outer {
            self.disconnect(net, &HierPin::new(inst, pin));
        }
        self.purge(inst);
        if let Some(p) = parent.and_then(|p| self.instances.get_mut(&p)) {
            p.children.shift_remove(&name);
        }
    }

    fn purge(&mut self, inst: InstId) {
        let Some(instance) = self.instances.shift_remove(&inst) else {
            return;
        };
        for child in instance.children.values() {
            self.purge(*child);
        }
        for net in instance.nets.values() {
            self.nets.shift_remove(net);
            self.parent_nets.shift_remove(net);
        }
    }

    /// Leaf instances at or below `inst`.
    pub fn leaf_descendants(&self, inst: InstId) -> Vec<InstId> {
        let mut out = Vec::new();
        let mut queue = VecDeque::from([inst]);
        while let Some(cur) = queue.pop_front() {
            if self.is_leaf(cur) {
                out.push(cur);
            } else {
                queue.extend(self.inst(cur).children.values().copied());
            }
        }
        out
    }

    // --- nets ---

    pub fn net(&self, id: NetId) -> &LogicalNet {
        &self.nets[&id]
    }

    pub fn get_net(&self, id: NetId) -> Option<&LogicalNet> {
        self.nets.get(&id)
    }

    pub fn nets(&self) -> impl Iterator<Item = (NetId, &LogicalNet)> {
        self.nets.iter().map(|(id, net)| (*id, net))
    }

    pub fn create_net(&mut self, scope: InstId, name: &str) -> Result<NetId> {
        if self.is_leaf(scope) {
            return Err(NetlistError::LeafScope(self.inst_path(scope)));
        }
        if self.inst(scope).nets.contains_key(name) {
            return Err(NetlistError::NetExists(self.join_path(scope, name)));
        }
        let id = NetId::from_raw(self.ids.next_raw());
        self.nets.insert(
            id,
            LogicalNet {
                name: name.to_string(),
                owner: scope,
                pins: Vec::new(),
            },
        );
        if let Some(s) = self.instances.get_mut(&scope) {
            s.nets.insert(name.to_string(), id);
        }
        Ok(id)
    }

    /// Attaches `pin` to `net`. The pin must be a boundary port of the net's
    /// scope or a port of one of its direct children. A pin already attached
    /// on the same side to another net is moved.
    pub fn connect(&mut self, net: NetId, pin: HierPin) -> Result<()> {
        let owner = self.net(net).owner;
        self.check_port(&pin)?;
        let inner = if pin.inst == owner {
            true
        } else if self.inst(pin.inst).parent == Some(owner) {
            false
        } else {
            return Err(NetlistError::NotInScope {
                pin: self.pin_path(&pin),
                net: self.net_path(net),
            });
        };
        let previous = if inner {
            self.inst(pin.inst).inner_port_nets.get(&pin.pin).copied()
        } else {
            self.inst(pin.inst).port_nets.get(&pin.pin).copied()
        };
        if let Some(prev) = previous.filter(|p| *p != net) {
            self.disconnect(prev, &pin);
        }
        if let Some(i) = self.instances.get_mut(&pin.inst) {
            if inner {
                i.inner_port_nets.insert(pin.pin.clone(), net);
            } else {
                i.port_nets.insert(pin.pin.clone(), net);
            }
        }
        if let Some(n) = self.nets.get_mut(&net) {
            if !n.pins.contains(&pin) {
                n.pins.push(pin);
            }
        }
        Ok(())
    }

    /// Detaches `pin` from `net`; returns whether it was attached.
    pub fn disconnect(&mut self, net: NetId, pin: &HierPin) -> bool {
        let Some(n) = self.nets.get_mut(&net) else {
            return false;
        };
        let before = n.pins.len();
        n.pins.retain(|p| p != pin);
        let removed = n.pins.len() != before;
        let owner = n.owner;
        if let Some(i) = self.instances.get_mut(&pin.inst) {
            let side = if pin.inst == owner {
                &mut i.inner_port_nets
            } else {
                &mut i.port_nets
            };
            if side.get(&pin.pin) == Some(&net) {
                side.shift_remove(&pin.pin);
            }
        }
        removed
    }

    fn check_port(&self, pin: &HierPin) -> Result<()> {
        let ty = self.type_of(pin.inst);
        let ok = ty.ports.get(&pin.pin.port).is_some_and(|def| match (def.width, pin.pin.bit) {
            (None, None) => true,
            (Some(w), Some(b)) => b < w,
            _ => false,
        });
        if ok {
            Ok(())
        } else {
            Err(NetlistError::PortNotFound {
                port: pin.pin.to_string(),
                cell_type: ty.name.clone(),
            })
        }
    }

    pub fn port_direction(&self, pin: &HierPin) -> Option<PortDirection> {
        self.type_of(pin.inst)
            .ports
            .get(&pin.pin.port)
            .map(|p| p.direction)
    }

    pub fn is_output(&self, pin: &HierPin) -> bool {
        self.port_direction(pin) == Some(PortDirection::Output)
    }

    pub fn is_input(&self, pin: &HierPin) -> bool {
        self.port_direction(pin) == Some(PortDirection::Input)
    }

    /// Net seen by `pin` in the scope where it is used as an endpoint.
    pub fn net_of(&self, pin: &HierPin) -> Option<NetId> {
        let inst = self.get_inst(pin.inst)?;
        if pin.inst == self.top {
            inst.inner_port_nets.get(&pin.pin).copied()
        } else {
            inst.port_nets.get(&pin.pin).copied()
        }
    }

    /// Net on the inside of a hierarchical, non-top instance pin.
    pub fn internal_net(&self, pin: &HierPin) -> Option<NetId> {
        if pin.inst == self.top || self.is_leaf(pin.inst) {
            return None;
        }
        self.inst(pin.inst).inner_port_nets.get(&pin.pin).copied()
    }

    // --- paths ---

    pub fn inst_path(&self, inst: InstId) -> String {
        let mut parts = Vec::new();
        let mut cur = Some(inst);
        while let Some(id) = cur {
            let i = self.inst(id);
            if i.parent.is_some() {
                parts.push(i.name.as_str());
            }
            cur = i.parent;
        }
        parts.reverse();
        parts.join("/")
    }

    fn join_path(&self, scope: InstId, name: &str) -> String {
        let prefix = self.inst_path(scope);
        if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{prefix}/{name}")
        }
    }

    pub fn net_path(&self, net: NetId) -> String {
        let n = self.net(net);
        self.join_path(n.owner, &n.name)
    }

    pub fn pin_path(&self, pin: &HierPin) -> String {
        self.join_path(pin.inst, &pin.pin.to_string())
    }

    pub fn inst_by_path(&self, path: &str) -> Result<InstId> {
        let mut cur = self.top;
        for part in path.split('/').filter(|p| !p.is_empty()) {
            cur = *self
                .inst(cur)
                .children
                .get(part)
                .ok_or_else(|| NetlistError::InstanceNotFound(path.to_string()))?;
        }
        Ok(cur)
    }

    pub fn net_by_path(&self, path: &str) -> Result<NetId> {
        let (scope, name) = path.rsplit_once('/').unwrap_or(("", path));
        let scope = self
            .inst_by_path(scope)
            .map_err(|_| NetlistError::NetNotFound(path.to_string()))?;
        self.inst(scope)
            .nets
            .get(name)
            .copied()
            .ok_or_else(|| NetlistError::NetNotFound(path.to_string()))
    }

    pub fn pin_by_path(&self, path: &str) -> Result<HierPin> {
        let (inst, pin) = path.rsplit_once('/').unwrap_or(("", path));
        let inst = self
            .inst_by_path(inst)
            .map_err(|_| NetlistError::PinNotFound(path.to_string()))?;
        let pin = HierPin::new(inst, pin.parse()?);
        self.check_port(&pin)
            .map_err(|_| NetlistError::PinNotFound(path.to_string()))?;
        Ok(pin)
    }

    // --- leaf expansion ---

    /// Leaf endpoints reachable from `net` across hierarchy boundaries.
    pub fn leaf_pins(&self, net: NetId, sources: bool, sinks: bool) -> Vec<HierPin> {
        self.leaf_pins_from(net, &mut HashSet::new(), sources, sinks)
    }

    pub fn leaf_sources(&self, net: NetId) -> Vec<HierPin> {
        self.leaf_pins(net, true, false)
    }

    /// Like [`Netlist::leaf_pins`], with nets already in `visited` treated as
    /// walls the expansion does not cross.
    pub fn leaf_pins_from(
        &self,
        net: NetId,
        visited: &mut HashSet<NetId>,
        sources: bool,
        sinks: bool,
    ) -> Vec<HierPin> {
        let mut out = Vec::new();
        let mut stack = vec![net];
        while let Some(cur) = stack.pop() {
            if !visited.insert(cur) {
                continue;
            }
            let Some(n) = self.nets.get(&cur) else {
                continue;
            };
            for pin in &n.pins {
                if pin.inst == n.owner {
                    if let Some(outer) = self.inst(pin.inst).port_nets.get(&pin.pin) {
                        stack.push(*outer);
                    }
                } else if self.is_leaf(pin.inst) {
                    let is_source = self.is_output(pin);
                    if (is_source && sources) || (!is_source && sinks) {
                        out.push(pin.clone());
                    }
                } else if let Some(inner) = self.inst(pin.inst).inner_port_nets.get(&pin.pin) {
                    stack.push(*inner);
                }
            }
        }
        out
    }

    /// Every net electrically joined to `net` through hierarchy ports.
    fn net_component(&self, net: NetId) -> Vec<NetId> {
        let mut seen = HashSet::from([net]);
        let mut order = vec![net];
        let mut queue = VecDeque::from([net]);
        while let Some(cur) = queue.pop_front() {
            let n = self.net(cur);
            for pin in &n.pins {
                let next = if pin.inst == n.owner {
                    self.inst(pin.inst).port_nets.get(&pin.pin)
                } else if !self.is_leaf(pin.inst) {
                    self.inst(pin.inst).inner_port_nets.get(&pin.pin)
                } else {
                    None
                };
                if let Some(next) = next {
                    if seen.insert(*next) {
                        order.push(*next);
                        queue.push_back(*next);
                    }
                }
            }
        }
        order
    }

    // --- parent nets ---

    /// Recomputes the canonical (parent) net of every net. Call once after a
    /// batch of logical edits; queries in between see the previous mapping.
    pub fn rebuild_parent_nets(&mut self) {
        let mut index = IndexMap::new();
        let ids: Vec<NetId> = self.nets.keys().copied().collect();
        for net in ids {
            if index.contains_key(&net) {
                continue;
            }
            let component = self.net_component(net);
            let canonical = self.pick_canonical(&component);
            for member in component {
                index.insert(member, canonical);
            }
        }
        self.parent_nets = index;
        self.parent_net_generation += 1;
    }

    /// Number of times the parent-net index has been rebuilt.
    pub fn parent_net_generation(&self) -> u64 {
        self.parent_net_generation
    }

    fn pick_canonical(&self, component: &[NetId]) -> NetId {
        let drives = |net: &NetId| {
            self.net(*net)
                .pins
                .iter()
                .any(|p| p.inst != self.net(*net).owner && self.is_leaf(p.inst) && self.is_output(p))
        };
        let top_input = |net: &NetId| {
            self.net(*net)
                .pins
                .iter()
                .any(|p| p.inst == self.top && self.is_input(p))
        };
        component
            .iter()
            .find(|n| drives(n))
            .or_else(|| component.iter().find(|n| top_input(n)))
            .copied()
            .or_else(|| {
                component
                    .iter()
                    .copied()
                    .min_by_key(|n| {
                        let path = self.net_path(*n);
                        (path.len(), path)
                    })
            })
            .unwrap_or(component[0])
    }

    pub fn parent_net(&self, net: NetId) -> NetId {
        self.parent_nets.get(&net).copied().unwrap_or(net)
    }

    /// Nets sharing `net`'s parent net, `net` included.
    pub fn net_aliases(&self, net: NetId) -> Vec<NetId> {
        let parent = self.parent_net(net);
        let aliases: Vec<NetId> = self
            .parent_nets
            .iter()
            .filter(|(_, p)| **p == parent)
            .map(|(n, _)| *n)
            .collect();
        if aliases.contains(&net) {
            aliases
        } else {
            vec![net]
        }
    }

    // --- hierarchy-crossing connections ---

    pub fn unique_suffix(&mut self) -> u32 {
        self.unique_counter += 1;
        self.unique_counter
    }

    pub fn unique_net_name(&self, scope: InstId, base: &str) -> String {
        let nets = &self.inst(scope).nets;
        if !nets.contains_key(base) {
            return base.to_string();
        }
        (1..)
            .map(|i| format!("{base}_{i}"))
            .find(|n| !nets.contains_key(n))
            .unwrap_or_else(|| base.to_string())
    }

    pub fn unique_inst_name(&self, scope: InstId, base: &str) -> String {
        let children = &self.inst(scope).children;
        if !children.contains_key(base) {
            return base.to_string();
        }
        (1..)
            .map(|i| format!("{base}_{i}"))
            .find(|n| !children.contains_key(n))
            .unwrap_or_else(|| base.to_string())
    }

    fn common_ancestor(&self, a: InstId, b: InstId) -> InstId {
        let mut ancestors = HashSet::new();
        let mut cur = Some(a);
        while let Some(id) = cur {
            ancestors.insert(id);
            cur = self.inst(id).parent;
        }
        let mut cur = b;
        while !ancestors.contains(&cur) {
            match self.inst(cur).parent {
                Some(p) => cur = p,
                None => break,
            }
        }
        cur
    }

    fn add_pass_through_port(
        &mut self,
        scope: InstId,
        base: &str,
        direction: PortDirection,
    ) -> Result<PinName> {
        let type_name = self.inst(scope).cell_type.clone();
        let ty = self
            .library
            .get_mut(&type_name)
            .ok_or_else(|| NetlistError::UnknownCellType(type_name.clone()))?;
        let mut name = base.to_string();
        let mut i = 1;
        while ty.ports.contains_key(&name) {
            name = format!("{base}_{i}");
            i += 1;
        }
        ty.ports.insert(
            name.clone(),
            PortDef {
                name: name.clone(),
                direction,
                width: None,
            },
        );
        Ok(PinName::new(name))
    }

    /// Connects `pin` to `net` even when they live in different scopes,
    /// adding ports and pass-through nets named after `base` on every level
    /// between them.
    pub fn connect_thru_hier(&mut self, net: NetId, pin: HierPin, base: &str) -> Result<()> {
        let net_scope = self.net(net).owner;
        let pin_scope = if pin.inst == net_scope {
            net_scope
        } else {
            self.inst(pin.inst)
                .parent
                .ok_or_else(|| NetlistError::NotInScope {
                    pin: self.pin_path(&pin),
                    net: self.net_path(net),
                })?
        };
        if pin_scope == net_scope {
            return self.connect(net, pin);
        }
        let lca = self.common_ancestor(net_scope, pin_scope);
        let pin_drives = self.is_output(&pin);
        let (net_side, pin_side) = if pin_drives {
            (PortDirection::Input, PortDirection::Output)
        } else {
            (PortDirection::Output, PortDirection::Input)
        };

        let mut current = net;
        let mut scope = net_scope;
        while scope != lca {
            let port = HierPin::new(scope, self.add_pass_through_port(scope, base, net_side)?);
            self.connect(current, port.clone())?;
            let parent = self
                .inst(scope)
                .parent
                .ok_or_else(|| NetlistError::InstanceNotFound(self.inst_path(scope)))?;
            let outer = self.create_net(parent, &self.unique_net_name(parent, base))?;
            self.connect(outer, port)?;
            current = outer;
            scope = parent;
        }

        let mut dangling = pin;
        let mut scope = pin_scope;
        while scope != lca {
            let port = HierPin::new(scope, self.add_pass_through_port(scope, base, pin_side)?);
            let inner = self.create_net(scope, &self.unique_net_name(scope, base))?;
            self.connect(inner, dangling)?;
            self.connect(inner, port.clone())?;
            dangling = port;
            scope = self
                .inst(scope)
                .parent
                .ok_or_else(|| NetlistError::InstanceNotFound(self.inst_path(scope)))?;
        }
        self.connect(current, dangling)
    }

    /// Net driven by a ground or power pseudo-cell inside `scope`, created
    /// on first use.
    pub fn constant_net(&mut self, scope: InstId, primitive: Primitive) -> Result<NetId> {
        let name = match primitive {
            Primitive::Vcc => "<const1>",
            _ => "<const0>",
        };
        if let Some(net) = self.inst(scope).nets.get(name) {
            return Ok(*net);
        }
        let type_name = self.ensure_primitive(primitive);
        let driver = match self.inst(scope).children.get(name) {
            Some(id) => *id,
            None => self.create_instance(scope, name, &type_name)?,
        };
        let net = self.create_net(scope, name)?;
        self.connect(net, HierPin::named(driver, primitive.output_pin()))?;
        Ok(net)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// top
    ///  ├─ src (FDRE)    Q -> n0
    ///  └─ sub (hier)    in <- n0
    ///       └─ lut (LUT1) I0 <- sub/inner
    fn two_level() -> (Netlist, InstId, InstId, InstId, NetId, NetId) {
        let mut nl = Netlist::new("top", CellType::hierarchical("top"));
        let fdre = nl.ensure_primitive(Primitive::Fdre);
        let lut1 = nl.ensure_primitive(Primitive::Lut(1));
        nl.add_cell_type(CellType::hierarchical("sub_t").with_port("in", PortDirection::Input));
        let top = nl.top();
        let src = nl.create_instance(top, "src", &fdre).unwrap();
        let sub = nl.create_instance(top, "sub", "sub_t").unwrap();
        let lut = nl.create_instance(sub, "lut", &lut1).unwrap();
        let n0 = nl.create_net(top, "n0").unwrap();
        nl.connect(n0, HierPin::named(src, "Q")).unwrap();
        nl.connect(n0, HierPin::named(sub, "in")).unwrap();
        let inner = nl.create_net(sub, "inner").unwrap();
        nl.connect(inner, HierPin::named(sub, "in")).unwrap();
        nl.connect(inner, HierPin::named(lut, "I0")).unwrap();
        (nl, src, sub, lut, n0, inner)
    }

    #[test]
    fn pin_names_parse_and_render() {
        assert_eq!("D".parse::<PinName>().unwrap(), PinName::new("D"));
        assert_eq!("data[3]".parse::<PinName>().unwrap(), PinName::bit("data", 3));
        assert_eq!(PinName::bit("data", 3).to_string(), "data[3]");
        assert!("".parse::<PinName>().is_err());
    }

    #[test]
    fn paths_resolve_both_ways() {
        let (nl, _, _, lut, _, inner) = two_level();
        assert_eq!(nl.inst_path(lut), "sub/lut");
        assert_eq!(nl.inst_by_path("sub/lut").unwrap(), lut);
        assert_eq!(nl.net_path(inner), "sub/inner");
        assert_eq!(nl.net_by_path("sub/inner").unwrap(), inner);
        let pin = nl.pin_by_path("sub/lut/I0").unwrap();
        assert_eq!(pin, HierPin::named(lut, "I0"));
        assert!(matches!(
            nl.pin_by_path("sub/lut/I7"),
            Err(NetlistError::PinNotFound(_))
        ));
        assert!(matches!(
            nl.inst_by_path("nope"),
            Err(NetlistError::InstanceNotFound(p)) if p == "nope"
        ));
    }

    #[test]
    fn leaf_expansion_crosses_hierarchy() {
        let (nl, src, _, lut, n0, inner) = two_level();
        assert_eq!(nl.leaf_pins(n0, false, true), vec![HierPin::named(lut, "I0")]);
        assert_eq!(nl.leaf_sources(inner), vec![HierPin::named(src, "Q")]);
        let mut walls = HashSet::from([n0]);
        assert!(nl.leaf_pins_from(inner, &mut walls, true, false).is_empty());
    }

    #[test]
    fn parent_net_is_driver_side() {
        let (mut nl, _, _, _, n0, inner) = two_level();
        nl.rebuild_parent_nets();
        assert_eq!(nl.parent_net(inner), n0);
        assert_eq!(nl.parent_net(n0), n0);
        let mut aliases = nl.net_aliases(inner);
        aliases.sort();
        assert_eq!(aliases, vec![n0, inner]);
    }

    #[test]
    fn connect_through_hierarchy_adds_ports() {
        let (mut nl, _, sub, _, n0, _) = two_level();
        let lut1 = nl.ensure_primitive(Primitive::Lut(1));
        let deep = nl.create_instance(sub, "deep", &lut1).unwrap();
        let d_pin = HierPin::named(deep, "I0");
        nl.connect_thru_hier(n0, d_pin.clone(), "n0_pt").unwrap();
        let inside = nl.net_of(&d_pin).unwrap();
        assert_eq!(nl.net(inside).owner, sub);
        assert!(nl.type_of(sub).ports.contains_key("n0_pt"));
        assert!(nl.leaf_pins(n0, false, true).contains(&d_pin));
    }

    #[test]
    fn remove_instance_detaches_and_purges() {
        let (mut nl, _, sub, lut, n0, inner) = two_level();
        nl.remove_instance(sub);
        assert!(nl.get_inst(sub).is_none());
        assert!(nl.get_inst(lut).is_none());
        assert!(nl.get_net(inner).is_none());
        assert_eq!(nl.net(n0).pins.len(), 1);
        assert!(!nl.inst(nl.top()).children.contains_key("sub"));
    }

    #[test]
    fn constant_net_is_reused() {
        let (mut nl, _, sub, _, _, _) = two_level();
        let a = nl.constant_net(sub, Primitive::Gnd).unwrap();
        let b = nl.constant_net(sub, Primitive::Gnd).unwrap();
        assert_eq!(a, b);
        let driver = nl.leaf_sources(a);
        assert_eq!(driver.len(), 1);
        assert_eq!(nl.primitive(driver[0].inst), Some(Primitive::Gnd));
    }
}
