//! Netlist surgery: connect, disconnect, create and remove while keeping the
//! logical hierarchy and the placed-and-routed implementation in step.
//!
//! Every operation takes an optional [`PendingRemovals`] map. Terminals
//! that would be removed are parked there instead, so that a later connect
//! in the same batch can move them rather than rebuild them. The caller
//! applies what is left with [`Design::apply_pending_removals`].

use std::collections::HashSet;

use ecoweave_netlist::device::WireDriver;
use ecoweave_netlist::{
    CellId, Design, HierPin, InstId, NetId, NetKind, Netlist, PendingRemovals, PhysNetId,
    Primitive, SiteId, SiteInstId, SitePinId,
};
use indexmap::IndexMap;

use crate::error::{EcoError, Result};

/// Placeholder net parking the wires of unplugged constant sources.
pub const USED_NET: &str = "USED_NET";

/// Requested endpoints per logical net.
pub type NetPins = IndexMap<NetId, Vec<HierPin>>;

/// Surgery options shared by a batch.
#[derive(Debug, Clone, Default)]
pub struct EcoConfig {
    /// Instance-name prefix for which a terminal-sharing conflict is only
    /// reported as a warning.
    pub warn_if_cell_inst_starts_with: Option<String>,
}

impl EcoConfig {
    pub const WARN_PREFIX_ENV: &'static str = "ECOWEAVE_WARN_IF_CELL_INST_STARTS_WITH";

    pub fn from_env() -> Self {
        Self {
            warn_if_cell_inst_starts_with: std::env::var(Self::WARN_PREFIX_ENV)
                .ok()
                .filter(|v| !v.is_empty()),
        }
    }
}

/// Physical cell of a leaf, `None` for constant pseudo-cells and black boxes.
fn physical_leaf(design: &Design, leaf: &HierPin) -> Result<Option<CellId>> {
    if let Some(cell) = design.physical_cell(leaf.inst) {
        return Ok(Some(cell));
    }
    match design.netlist.primitive(leaf.inst) {
        None => Ok(None),
        Some(p) if p.is_constant() => Ok(None),
        Some(_) => Err(EcoError::PhysicalCellMissing(
            design.netlist.pin_path(leaf),
        )),
    }
}

fn is_source(netlist: &Netlist, pin: &HierPin) -> bool {
    pin.inst != netlist.top() && netlist.is_output(pin)
}

// --- disconnect ---

fn affected_leaves(netlist: &Netlist, pin: &HierPin, net: NetId) -> Vec<HierPin> {
    let input = netlist.is_input(pin);
    match netlist.internal_net(pin) {
        None if netlist.is_leaf(pin.inst) => {
            if input {
                vec![pin.clone()]
            } else {
                netlist.leaf_pins(net, true, true)
            }
        }
        None => Vec::new(),
        Some(internal) => {
            let leaves = netlist.leaf_pins_from(internal, &mut HashSet::from([net]), true, true);
            if !input && leaves.iter().any(|l| netlist.is_output(l)) {
                netlist.leaf_pins_from(net, &mut HashSet::from([internal]), true, true)
            } else {
                leaves
            }
        }
    }
}

/// Detaches each pin from its net, removing (or parking in `pending`) the
/// terminals of every affected leaf. The parent-net index is rebuilt once
/// at the end.
pub fn disconnect_pins(
    design: &mut Design,
    pins: &[HierPin],
    mut pending: Option<&mut PendingRemovals>,
) -> Result<()> {
    if pins.is_empty() {
        return Ok(());
    }
    for pin in pins {
        let Some(net) = design.netlist.net_of(pin) else {
            log::debug!(
                "Pin {} is not connected, nothing to disconnect",
                design.netlist.pin_path(pin)
            );
            continue;
        };
        let input = design.netlist.is_input(pin);
        for leaf in affected_leaves(&design.netlist, pin, net) {
            if input && !design.netlist.is_input(&leaf) {
                continue;
            }
            let Some(cell) = physical_leaf(design, &leaf)? else {
                continue;
            };
            for spi in design.cell_site_pins(cell, &leaf.pin.to_string()) {
                design.handle_pin_removal(spi, pending.as_deref_mut());
            }
        }
        design.netlist.disconnect(net, pin);
    }
    design.netlist.rebuild_parent_nets();
    Ok(())
}

pub fn disconnect_pin_paths(
    design: &mut Design,
    paths: &[&str],
    pending: Option<&mut PendingRemovals>,
) -> Result<()> {
    let pins = paths
        .iter()
        .map(|p| design.netlist.pin_by_path(p))
        .collect::<Result<Vec<_>, _>>()?;
    disconnect_pins(design, &pins, pending)
}

// --- connect ---

fn attach_logical(netlist: &mut Netlist, net: NetId, pin: &HierPin) -> Result<()> {
    let owner = netlist.net(net).owner;
    let same_scope = pin.inst == owner || netlist.inst(pin.inst).parent == Some(owner);
    if same_scope {
        if netlist.net_of(pin) != Some(net) || !netlist.net(net).pins.contains(pin) {
            netlist.connect(net, pin.clone())?;
        }
    } else {
        let suffix = netlist.unique_suffix();
        let base = format!("{}_{}", netlist.net(net).name, suffix);
        netlist.connect_thru_hier(net, pin.clone(), &base)?;
    }
    Ok(())
}

/// Connects the requested pins to their nets. At most one pin per net may
/// be an output; it replaces the net's current driver.
///
/// All logical edits happen first, the parent-net index is rebuilt once,
/// then each net's physical implementation is brought in line.
pub fn connect_pins(
    design: &mut Design,
    net_pins: &NetPins,
    mut pending: Option<&mut PendingRemovals>,
    config: &EcoConfig,
) -> Result<()> {
    if net_pins.is_empty() {
        return Ok(());
    }
    let mut sources: IndexMap<NetId, HierPin> = IndexMap::new();
    let mut sinks: IndexMap<NetId, Vec<HierPin>> = IndexMap::new();
    for (net, pins) in net_pins {
        let entry = sinks.entry(*net).or_default();
        for pin in pins {
            if is_source(&design.netlist, pin) {
                if sources.insert(*net, pin.clone()).is_some() {
                    return Err(EcoError::MultipleSources {
                        net: design.netlist.net_path(*net),
                    });
                }
            } else {
                entry.push(pin.clone());
            }
        }
    }

    for (net, source) in &sources {
        replace_logical_source(design, *net, source, pending.as_deref_mut())?;
    }
    for (net, pins) in &sinks {
        for pin in pins {
            attach_logical(&mut design.netlist, *net, pin)?;
        }
    }
    design.netlist.rebuild_parent_nets();

    for net in sources.keys() {
        connect_source_physical(design, *net, pending.as_deref_mut())?;
    }
    for net in sinks.keys() {
        connect_net_physical(design, *net, pending.as_deref_mut(), config)?;
    }
    Ok(())
}

/// Path form of [`connect_pins`]: `(net path, [pin paths])`.
pub fn connect_pin_paths(
    design: &mut Design,
    requests: &[(&str, Vec<&str>)],
    pending: Option<&mut PendingRemovals>,
    config: &EcoConfig,
) -> Result<()> {
    let mut net_pins = NetPins::new();
    for (net, pins) in requests {
        let net = design.netlist.net_by_path(net)?;
        let entry = net_pins.entry(net).or_default();
        for pin in pins {
            entry.push(design.netlist.pin_by_path(pin)?);
        }
    }
    connect_pins(design, &net_pins, pending, config)
}

fn replace_logical_source(
    design: &mut Design,
    net: NetId,
    source: &HierPin,
    mut pending: Option<&mut PendingRemovals>,
) -> Result<()> {
    for old in design.netlist.leaf_sources(net) {
        if old == *source {
            continue;
        }
        log::warn!(
            "Net '{}' already has an output pin '{}'. Replacing with new pin '{}'.",
            design.netlist.net_path(net),
            design.netlist.pin_path(&old),
            design.netlist.pin_path(source)
        );
        if let (Some(p), Some(cell)) = (pending.as_deref_mut(), design.physical_cell(old.inst)) {
            for spi in design.cell_site_pins(cell, &old.pin.to_string()) {
                design.handle_pin_removal(spi, Some(&mut *p));
            }
        }
        if let Some(old_net) = design.netlist.net_of(&old) {
            design.netlist.disconnect(old_net, &old);
        }
    }
    attach_logical(&mut design.netlist, net, source)
}

fn forget_pending_sources(design: &Design, net: PhysNetId, pending: Option<&mut PendingRemovals>) {
    let Some(set) = pending.and_then(|p| p.get_mut(&net)) else {
        return;
    };
    let n = design.net(net);
    for spi in [n.source, n.alt_source].into_iter().flatten() {
        set.shift_remove(&spi);
    }
}

/// Unroutes and unplugs the source terminals of `net`. The terminal in
/// `keep` is only detached from its site so that it can be re-attached.
fn fully_unroute_sources(design: &mut Design, net: PhysNetId, keep: Option<SitePinId>) {
    let n = design.net(net);
    let sources: Vec<SitePinId> = [n.source, n.alt_source].into_iter().flatten().collect();
    for spi in sources {
        let pin = design.site_pin(spi).clone();
        if let (Some(si), Some(wire)) = (pin.site_inst, design.site_pin_driver_wire(spi)) {
            design.unroute_site(si, &wire, &pin.name);
        }
        design.remove_pin(net, spi, true);
        if keep == Some(spi) {
            design.detach_site_pin(spi);
        } else {
            design.delete_site_pin(spi);
        }
    }
}

fn convert_to_static(design: &mut Design, old: PhysNetId, kind: NetKind) {
    design.set_net_kind(old, kind);
    let parked = design.get_or_create_net(USED_NET);
    design.unroute_net(old);
    let n = design.net(old);
    let sources: Vec<SitePinId> = [n.alt_source, n.source].into_iter().flatten().collect();
    for spi in sources {
        let pin = design.site_pin(spi).clone();
        let Some(si) = pin.site_inst else {
            continue;
        };
        let site: SiteId = design.site_inst(si).site;
        for user in design.site_pin_users(spi) {
            let wire = design
                .physical_cell(user.inst)
                .and_then(|cell| design.cell_pin_wire(cell, &user.pin.to_string()));
            if let Some((_, wire)) = wire {
                design.unroute_site(si, &wire, &pin.name);
            }
        }
        design.remove_pin(old, spi, false);
        design.delete_site_pin(spi);
        if let Some(si) = design.site_inst_at(site) {
            design.route_site(si, parked, &pin.name, &pin.name);
        }
    }
}

fn connect_source_physical(
    design: &mut Design,
    net: NetId,
    mut pending: Option<&mut PendingRemovals>,
) -> Result<()> {
    let sources = design.netlist.leaf_sources(net);
    let [source] = sources.as_slice() else {
        return Err(EcoError::NotExactlyOneSource {
            net: design.netlist.net_path(net),
            found: sources.len(),
        });
    };
    let source = source.clone();
    let logical = source.pin.to_string();

    let cell = match (design.physical_cell(source.inst), design.netlist.primitive(source.inst)) {
        (Some(cell), _) => cell,
        (None, Some(constant @ (Primitive::Gnd | Primitive::Vcc))) => {
            let kind = if constant == Primitive::Vcc {
                NetKind::Power
            } else {
                NetKind::Ground
            };
            if let Some(old) = design.net_by_name(&design.netlist.net_path(net)) {
                if !design.net(old).is_static() {
                    convert_to_static(design, old, kind);
                }
            }
            return Ok(());
        }
        (None, _) => {
            return Err(EcoError::PhysicalCellMissing(
                design.netlist.pin_path(&source),
            ))
        }
    };

    let parent = design
        .netlist
        .net_of(&source)
        .ok_or_else(|| EcoError::Unconnected(design.netlist.pin_path(&source)))?;
    let name = design.netlist.net_path(parent);
    let phys = design.get_or_create_net(&name);
    let site_pins = design.cell_site_pins(cell, &logical);
    if site_pins.is_empty() {
        forget_pending_sources(design, phys, pending.as_deref_mut());
        fully_unroute_sources(design, phys, None);
        if design.cell(cell).site_inst.is_some() {
            create_exit_pin(design, &source, phys)?;
        } else {
            log::debug!("Source cell {} is unplaced, connecting logically only", design.cell(cell).name);
        }
        return Ok(());
    }

    let Some((si, bel_wire)) = design.cell_pin_wire(cell, &logical) else {
        return Err(EcoError::UnplacedCell(design.cell(cell).name.clone()));
    };
    for spi in site_pins {
        let old = design.site_pin(spi).net;
        if old == Some(phys) {
            continue;
        }
        if let Some(old) = old {
            if let Some(set) = pending.as_deref_mut().and_then(|p| p.get_mut(&old)) {
                set.shift_remove(&spi);
            }
            fully_unroute_sources(design, old, Some(spi));
        }
        forget_pending_sources(design, phys, pending.as_deref_mut());
        fully_unroute_sources(design, phys, None);
        let spi_name = design.site_pin(spi).name.clone();
        design.attach_site_pin(si, spi);
        design.add_pin(phys, spi);
        if !design.route_site(si, phys, &bel_wire, &spi_name) {
            log::warn!("Unable to route {} to {} inside {}", bel_wire, spi_name, design.site_inst(si).name);
        }
    }
    Ok(())
}

fn connect_net_physical(
    design: &mut Design,
    net: NetId,
    mut pending: Option<&mut PendingRemovals>,
    config: &EcoConfig,
) -> Result<()> {
    let (drivers, loads): (Vec<HierPin>, Vec<HierPin>) = design
        .netlist
        .leaf_pins(net, true, true)
        .into_iter()
        .partition(|l| design.netlist.is_output(l));
    let mut source: Option<(HierPin, Option<CellId>)> = None;
    let mut phys: Option<PhysNetId> = None;
    for leaf in &drivers {
        if source.is_some() {
            return Err(EcoError::MultipleSources {
                net: design.netlist.net_path(net),
            });
        }
        match design.physical_cell(leaf.inst) {
            Some(cell) => {
                let parent = design
                    .netlist
                    .net_of(leaf)
                    .ok_or_else(|| EcoError::Unconnected(design.netlist.pin_path(leaf)))?;
                let name = design.netlist.net_path(parent);
                phys = Some(design.get_or_create_net(&name));
                source = Some((leaf.clone(), Some(cell)));
            }
            None => {
                phys = match design.netlist.primitive(leaf.inst) {
                    Some(Primitive::Gnd) => Some(design.gnd_net()),
                    Some(Primitive::Vcc) => Some(design.vcc_net()),
                    None => {
                        log::debug!(
                            "Net {} is driven by black box {}, skipping physical connection",
                            design.netlist.net_path(net),
                            design.netlist.inst_path(leaf.inst)
                        );
                        return Ok(());
                    }
                    Some(_) => {
                        return Err(EcoError::PhysicalCellMissing(
                            design.netlist.pin_path(leaf),
                        ))
                    }
                };
                source = Some((leaf.clone(), None));
            }
        }
    }
    let parent = design.netlist.parent_net(net);
    let phys = match phys {
        Some(p) => p,
        None => {
            let name = design.netlist.net_path(parent);
            design.get_or_create_net(&name)
        }
    };
    let source_loc = source
        .as_ref()
        .and_then(|(pin, cell)| design.cell_pin_wire((*cell)?, &pin.pin.to_string()));

    for leaf in &loads {
        let Some(cell) = physical_leaf(design, leaf)? else {
            continue;
        };
        let logical = leaf.pin.to_string();
        let Some((si, sink_wire)) = design.cell_pin_wire(cell, &logical) else {
            log::debug!("Sink {} is unplaced, connecting logically only", design.cell(cell).name);
            continue;
        };
        let site_pins = design.cell_site_pins(cell, &logical);
        if !site_pins.is_empty() {
            for spi in site_pins {
                move_sink_terminal(
                    design,
                    spi,
                    leaf,
                    parent,
                    phys,
                    (si, sink_wire.as_str()),
                    pending.as_deref_mut(),
                    config,
                )?;
            }
            continue;
        }
        if let Some((source_si, source_wire)) = &source_loc {
            if *source_si == si && design.route_site(si, phys, source_wire, &sink_wire) {
                continue;
            }
        }
        create_exit_pin(design, leaf, phys)?;
    }

    let n = design.net(phys);
    if n.source.is_none() && !n.pins.is_empty() && !n.is_static() {
        if let Some((pin, Some(cell))) = &source {
            if design.cell(*cell).site_inst.is_some() {
                create_exit_pin(design, pin, phys)?;
            }
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn move_sink_terminal(
    design: &mut Design,
    spi: SitePinId,
    leaf: &HierPin,
    parent: NetId,
    phys: PhysNetId,
    (si, sink_wire): (SiteInstId, &str),
    pending: Option<&mut PendingRemovals>,
    config: &EcoConfig,
) -> Result<()> {
    let spi_name = design.site_pin(spi).name.clone();
    for other in design.site_pin_users(spi) {
        if other == *leaf {
            continue;
        }
        let other_parent = design
            .netlist
            .net_of(&other)
            .map(|n| design.netlist.parent_net(n));
        if other_parent.map_or(true, |p| p == parent) {
            continue;
        }
        let other_name = design.netlist.inst_path(other.inst);
        let site_pin = format!("{}/{}", design.site_inst(si).name, spi_name);
        match &config.warn_if_cell_inst_starts_with {
            Some(prefix) if other_name.starts_with(prefix.as_str()) => log::warn!(
                "Site pin {} used to connect {} is also used by {} on another net",
                site_pin,
                design.netlist.pin_path(leaf),
                design.netlist.pin_path(&other)
            ),
            _ => {
                return Err(EcoError::SitePinConflict {
                    site_pin,
                    pin: design.netlist.pin_path(leaf),
                    other: design.netlist.pin_path(&other),
                })
            }
        }
    }

    let old = design.site_pin(spi).net;
    if let (Some(p), Some(old)) = (pending, old) {
        if let Some(set) = p.get_mut(&old) {
            set.shift_remove(&spi);
        }
    }
    if old == Some(phys) {
        return Ok(());
    }
    let site = design.site_inst(si).name.clone();
    if !design.unroute_site(si, &spi_name, sink_wire) {
        return Err(EcoError::IntraSiteRouting {
            action: "unroute",
            site,
            from: spi_name,
            to: sink_wire.to_string(),
        });
    }
    if let Some(old) = old {
        design.remove_pin(old, spi, true);
        if design.sink_count(old) == 0 && !design.net(old).pips.is_empty() {
            design.unroute_net(old);
        }
    }
    if !design.route_site(si, phys, &spi_name, sink_wire) {
        return Err(EcoError::IntraSiteRouting {
            action: "route",
            site,
            from: spi_name,
            to: sink_wire.to_string(),
        });
    }
    design.add_pin(phys, spi);
    Ok(())
}

// --- exit pins ---

/// Physical nets whose logical nets share `net`'s parent net.
fn physical_aliases(design: &Design, net: PhysNetId) -> Vec<PhysNetId> {
    let mut aliases = vec![net];
    if let Ok(logical) = design.netlist.net_by_path(&design.net(net).name) {
        for alias in design.netlist.net_aliases(logical) {
            if let Some(p) = design.net_by_name(&design.netlist.net_path(alias)) {
                if !aliases.contains(&p) {
                    aliases.push(p);
                }
            }
        }
    }
    aliases
}

/// Creates the terminal that takes `pin` of a placed cell out of (or into)
/// its site on `net`.
pub fn create_exit_pin(design: &mut Design, pin: &HierPin, net: PhysNetId) -> Result<SitePinId> {
    let cell = physical_leaf(design, pin)?
        .ok_or_else(|| EcoError::PhysicalCellMissing(design.netlist.pin_path(pin)))?;
    let logical = pin.pin.to_string();
    let (si, wire) = design
        .cell_pin_wire(cell, &logical)
        .ok_or_else(|| EcoError::UnplacedCell(design.cell(cell).name.clone()))?;
    if design.cell_pin_is_output(cell, &logical) {
        return route_out_source(design, cell, pin, si, &wire, net);
    }

    let (mut names, wires) = design.input_site_pins(si, &wire, true);
    if names.is_empty() {
        let template = design.template(si);
        for w in &wires {
            let Some(WireDriver::Mux(mux)) = template.wire_driver(w) else {
                continue;
            };
            let Some(input) = design.site_inst(si).used_muxes.get(mux).cloned() else {
                continue;
            };
            let Some(input_wire) = template.bel(mux).and_then(|b| b.pin(&input)).map(|p| p.wire.clone()) else {
                continue;
            };
            let displaced = design.wire_net(si, &input_wire);
            if !design.unroute_site(si, &input_wire, &wire) {
                return Err(EcoError::IntraSiteRouting {
                    action: "unroute",
                    site: design.site_inst(si).name.clone(),
                    from: input_wire,
                    to: wire,
                });
            }
            if let Some(displaced) = displaced {
                design.route_site(si, displaced, &input_wire, &input_wire);
            }
            names = design.input_site_pins(si, &wire, true).0;
            break;
        }
    }

    let mut aliases: Option<Vec<PhysNetId>> = None;
    let mut chosen = None;
    for name in &names {
        if design.site_inst(si).pins.contains_key(name) {
            continue;
        }
        if let Some(existing) = design.wire_net(si, name) {
            if !design.is_driven_by_hier_port(existing) {
                let aliases = aliases.get_or_insert_with(|| physical_aliases(design, net));
                if !aliases.contains(&existing) {
                    continue;
                }
            }
        }
        chosen = Some(design.create_pin(net, si, name)?);
        break;
    }
    let spi = chosen.ok_or_else(|| EcoError::NoExitPin {
        pin: design.netlist.pin_path(pin),
        site: design.site_inst(si).name.clone(),
    })?;

    let spi_name = design.site_pin(spi).name.clone();
    let site = design.site_inst(si).name.clone();
    if !design.unroute_site(si, &spi_name, &wire) {
        return Err(EcoError::IntraSiteRouting {
            action: "unroute",
            site,
            from: spi_name,
            to: wire,
        });
    }
    if !design.route_site(si, net, &spi_name, &wire) {
        return Err(EcoError::IntraSiteRouting {
            action: "route",
            site,
            from: spi_name,
            to: wire,
        });
    }
    log::debug!("Created exit pin {}/{} for {}", site, spi_name, design.netlist.pin_path(pin));
    Ok(spi)
}

fn route_out_source(
    design: &mut Design,
    cell: CellId,
    pin: &HierPin,
    si: SiteInstId,
    wire: &str,
    net: PhysNetId,
) -> Result<SitePinId> {
    let names = design.output_site_pins(si, wire, true);
    let free = names
        .iter()
        .find(|n| !design.site_inst(si).pins.contains_key(n.as_str()))
        .cloned();
    let name = match free {
        Some(name) => name,
        None => {
            let c = design.cell(cell);
            let is_o5 = c.pin_map.get(&pin.pin.to_string()).is_some_and(|p| p == "O5");
            let letter = c.bel.as_deref().and_then(|b| b.chars().next());
            match letter {
                Some(letter) if is_o5 && names.is_empty() => free_lut_output_mux(design, si, letter)?,
                _ => {
                    return Err(EcoError::NoExitPin {
                        pin: design.netlist.pin_path(pin),
                        site: design.site_inst(si).name.clone(),
                    })
                }
            }
        }
    };
    let spi = design.create_pin(net, si, &name)?;
    if !design.route_site(si, net, wire, &name) {
        log::warn!("Unable to route {} to {} inside {}", wire, name, design.site_inst(si).name);
    }
    Ok(spi)
}

/// The output multiplexer of a LUT pair currently forwards the 6-input
/// output; move that signal to the direct output pin so the multiplexer can
/// carry the 5-input output instead. Returns the multiplexer pin name.
fn free_lut_output_mux(design: &mut Design, si: SiteInstId, letter: char) -> Result<String> {
    let direct = format!("{letter}_O");
    let mux_pin = format!("{letter}MUX");
    if !design.unroute_site(si, &direct, &mux_pin) {
        return Err(EcoError::IntraSiteRouting {
            action: "unroute",
            site: design.site_inst(si).name.clone(),
            from: direct,
            to: mux_pin,
        });
    }
    let mut lut6_net = None;
    if let Some(spi) = design.site_inst(si).pins.get(&mux_pin).copied() {
        lut6_net = design.site_pin(spi).net;
        design.delete_site_pin(spi);
    }
    match design.site_inst(si).pins.get(&direct).copied() {
        Some(spi) => {
            if let Some(net) = design.site_pin(spi).net.or(lut6_net) {
                design.route_site(si, net, &direct, &direct);
            }
        }
        None => {
            if let Some(net) = lut6_net {
                design.create_pin(net, si, &direct)?;
                design.route_site(si, net, &direct, &direct);
            }
        }
    }
    log::debug!(
        "Moved {} off {} to free it for the 5-input output",
        direct,
        mux_pin
    );
    Ok(mux_pin)
}

// --- create / remove ---

/// Removes instances logically and physically.
pub fn remove_cell_instances(
    design: &mut Design,
    insts: &[InstId],
    mut pending: Option<&mut PendingRemovals>,
) -> Result<()> {
    for inst in insts {
        let outer: Vec<_> = design
            .netlist
            .inst(*inst)
            .port_nets
            .iter()
            .map(|(pin, net)| (pin.clone(), *net))
            .collect();
        for (pin, net) in outer {
            design.netlist.disconnect(net, &HierPin::new(*inst, pin));
        }
        for leaf in design.netlist.leaf_descendants(*inst) {
            if design.netlist.primitive(leaf).map_or(true, |p| p.is_constant()) {
                continue;
            }
            let cell = design
                .physical_cell(leaf)
                .ok_or_else(|| EcoError::PhysicalCellMissing(design.netlist.inst_path(leaf)))?;
            design.fully_unplace_cell(cell, pending.as_deref_mut());
            design.remove_cell(cell);
        }
    }
    for inst in insts {
        design.netlist.remove_instance(*inst);
    }
    Ok(())
}

pub fn remove_cell_paths(
    design: &mut Design,
    paths: &[&str],
    pending: Option<&mut PendingRemovals>,
) -> Result<()> {
    let insts = paths
        .iter()
        .map(|p| design.netlist.inst_by_path(p))
        .collect::<Result<Vec<_>, _>>()?;
    remove_cell_instances(design, &insts, pending)
}

/// Creates logical instances of `cell_type` at `paths` plus unplaced
/// physical cells for their leaves.
pub fn create_cell_instances(design: &mut Design, cell_type: &str, paths: &[&str]) -> Result<Vec<InstId>> {
    let mut created = Vec::new();
    for path in paths {
        let (parent, name) = path.rsplit_once('/').unwrap_or(("", path));
        let parent = design.netlist.inst_by_path(parent)?;
        let inst = design.netlist.create_instance(parent, name, cell_type)?;
        for leaf in design.netlist.leaf_descendants(inst) {
            if design.netlist.primitive(leaf).is_some_and(|p| !p.is_constant()) {
                design.create_cell(leaf)?;
            }
        }
        created.push(inst);
    }
    Ok(created)
}

/// Creates empty logical and physical nets at `paths`.
pub fn create_nets(design: &mut Design, paths: &[&str]) -> Result<Vec<NetId>> {
    let mut created = Vec::new();
    for path in paths {
        if design.net_by_name(path).is_some() {
            return Err(ecoweave_netlist::NetlistError::NetExists(path.to_string()).into());
        }
        let (scope, name) = path.rsplit_once('/').unwrap_or(("", path));
        let scope = design.netlist.inst_by_path(scope)?;
        let net = design.netlist.create_net(scope, name)?;
        design.create_net(path, NetKind::Normal)?;
        created.push(net);
    }
    Ok(created)
}

/// Places a new cell between an input pin and the net currently driving it.
#[allow(clippy::too_many_arguments)]
pub fn insert_inline_cell_on_input(
    design: &mut Design,
    input: &HierPin,
    primitive: Primitive,
    site: SiteId,
    bel: &str,
    in_pin: &str,
    out_pin: &str,
    config: &EcoConfig,
) -> Result<CellId> {
    if !design.netlist.is_input(input) {
        return Err(EcoError::NotAnInput(design.netlist.pin_path(input)));
    }
    let net = design
        .netlist
        .net_of(input)
        .ok_or_else(|| EcoError::Unconnected(design.netlist.pin_path(input)))?;
    let scope = design
        .netlist
        .inst(input.inst)
        .parent
        .ok_or_else(|| EcoError::NotAnInput(design.netlist.pin_path(input)))?;

    let n = design.netlist.unique_suffix();
    let type_name = design.netlist.ensure_primitive(primitive);
    let net_name = design.netlist.unique_net_name(scope, &format!("inline_net_{n}"));
    let new_net = design.netlist.create_net(scope, &net_name)?;
    let inst_name = design
        .netlist
        .unique_inst_name(scope, &format!("inline_{}_{n}", type_name.to_lowercase()));
    let inst = design.netlist.create_instance(scope, &inst_name, &type_name)?;
    let cell = design.create_cell(inst)?;
    design.place_cell(cell, site, bel)?;

    disconnect_pins(design, std::slice::from_ref(input), None)?;
    let mut batch = NetPins::new();
    batch.insert(net, vec![HierPin::named(inst, in_pin)]);
    batch.insert(new_net, vec![HierPin::named(inst, out_pin), input.clone()]);
    connect_pins(design, &batch, None, config)?;
    log::debug!(
        "Inserted {} in front of {}",
        design.netlist.inst_path(inst),
        design.netlist.pin_path(input)
    );
    Ok(cell)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_reads_prefix_from_env() {
        std::env::set_var(EcoConfig::WARN_PREFIX_ENV, "shell_");
        let config = EcoConfig::from_env();
        std::env::remove_var(EcoConfig::WARN_PREFIX_ENV);
        assert_eq!(config.warn_if_cell_inst_starts_with.as_deref(), Some("shell_"));
        assert!(EcoConfig::default().warn_if_cell_inst_starts_with.is_none());
    }
}
