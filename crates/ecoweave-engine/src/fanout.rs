//! Splitting a high fan-out net by replicating its driver.

use ecoweave_netlist::{
    CellId, Design, GridLoc, HierPin, NetId, PendingRemovals, PhysNetId, Primitive, LOGIC_KINDS,
};
use indexmap::{IndexMap, IndexSet};
use itertools::Itertools;

use crate::error::{EcoError, Result};
use crate::kmeans::kmeans_clustering;
use crate::placement::{centroid_of_points, spiral_from, SpareCapacityFinder};
use crate::surgery::{connect_pins, disconnect_pins, EcoConfig, NetPins};

#[derive(Debug, Clone)]
pub struct FanoutConfig {
    /// Upper bound on k-means rounds.
    pub max_iterations: usize,
    /// Only place replicas in sites nothing uses yet.
    pub only_use_empty_sites: bool,
    pub seed: u64,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            only_use_empty_sites: true,
            seed: 0x5eed,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FanoutResult {
    /// Original driver first, then its replicas.
    pub sources: Vec<CellId>,
    /// Logical output net of each entry of `sources`.
    pub nets: Vec<NetId>,
    /// Sinks reconnected to each net.
    pub assignments: IndexMap<NetId, Vec<HierPin>>,
}

/// Physical nets on the control pins of a placed flop.
struct FlopControls {
    clk: Option<PhysNetId>,
    ce: Option<PhysNetId>,
    sr: Option<PhysNetId>,
}

fn flop_controls(design: &Design, cell: CellId, reset_pin: &str) -> FlopControls {
    let net_on = |logical: &str| {
        design
            .cell_pin_wire(cell, logical)
            .and_then(|(si, wire)| design.wire_net(si, &wire))
    };
    FlopControls {
        clk: net_on("C"),
        ce: net_on("CE"),
        sr: net_on(reset_pin),
    }
}

/// Splits the fan-out of `net` across `split_count` drivers: the original
/// plus `split_count - 1` replicas placed near the sinks' centroid. Sinks
/// are clustered by location and each cluster moves to the nearest unused
/// driver, nearest pairs first.
pub fn cut_fanout(
    design: &mut Design,
    net: PhysNetId,
    split_count: usize,
    config: &FanoutConfig,
    eco: &EcoConfig,
) -> Result<FanoutResult> {
    let net_name = design.net(net).name.clone();
    let logical = design.netlist.net_by_path(&net_name)?;
    let (sources, sinks): (Vec<HierPin>, Vec<HierPin>) = design
        .netlist
        .leaf_pins(logical, true, true)
        .into_iter()
        .partition(|p| design.netlist.is_output(p));
    let source = sources
        .into_iter()
        .next()
        .ok_or_else(|| EcoError::NoSource(net_name.clone()))?;
    let driver = source.inst;
    let primitive = design
        .netlist
        .primitive(driver)
        .filter(|p| p.is_flop() || p.lut_size().is_some())
        .ok_or_else(|| EcoError::UnsupportedDriver {
            cell: design.netlist.inst_path(driver),
            cell_type: design.netlist.inst(driver).cell_type.clone(),
        })?;
    let driver_cell = design
        .physical_cell(driver)
        .ok_or_else(|| EcoError::PhysicalCellMissing(design.netlist.inst_path(driver)))?;
    let driver_site = design
        .cell(driver_cell)
        .site_inst
        .map(|si| design.site_inst(si).site)
        .ok_or_else(|| EcoError::UnplacedCell(design.cell(driver_cell).name.clone()))?;
    let source_net = design
        .netlist
        .net_of(&source)
        .ok_or_else(|| EcoError::Unconnected(design.netlist.pin_path(&source)))?;
    let scope = design
        .netlist
        .inst(driver)
        .parent
        .ok_or_else(|| EcoError::UnsupportedDriver {
            cell: design.netlist.inst_path(driver),
            cell_type: design.netlist.inst(driver).cell_type.clone(),
        })?;

    let controls = primitive
        .reset_pin()
        .map(|reset| flop_controls(design, driver_cell, reset));
    let input_nets: Vec<(String, Option<NetId>)> = design
        .netlist
        .type_of(driver)
        .ports
        .keys()
        .filter(|port| design.netlist.is_input(&HierPin::named(driver, port)))
        .map(|port| (port.clone(), design.netlist.net_of(&HierPin::named(driver, port))))
        .collect();

    // Unplaced sinks stay where they are.
    let mut by_loc: IndexMap<GridLoc, Vec<HierPin>> = IndexMap::new();
    for sink in sinks {
        let loc = design.physical_cell(sink.inst).and_then(|c| design.cell_loc(c));
        match loc {
            Some(loc) => by_loc.entry(loc).or_default().push(sink),
            None => log::debug!("Sink {} is unplaced, leaving it on {}", design.netlist.pin_path(&sink), net_name),
        }
    }
    let sink_locs: Vec<GridLoc> = by_loc
        .iter()
        .flat_map(|(loc, pins)| std::iter::repeat(*loc).take(pins.len()))
        .collect();
    let home = centroid_of_points(design.device(), &sink_locs, LOGIC_KINDS).unwrap_or(driver_site);
    let mut spiral = spiral_from(design.device(), home, None);
    let mut finder = SpareCapacityFinder::new(design);
    let driver_name = design.netlist.inst(driver).name.clone();
    let cell_type = design.netlist.inst(driver).cell_type.clone();
    let properties = design.netlist.inst(driver).properties.clone();
    let out_pin = primitive.output_pin();

    let mut result = FanoutResult {
        sources: vec![driver_cell],
        nets: vec![source_net],
        assignments: IndexMap::new(),
    };
    let mut wiring = NetPins::new();
    for i in 0..split_count.saturating_sub(1) {
        let copy_name = design
            .netlist
            .unique_inst_name(scope, &format!("{driver_name}_copy{i}"));
        let placement = spiral.by_ref().find_map(|site| {
            if !design.device().site(site).kind.is_logic() {
                return None;
            }
            match design.site_inst_at(site) {
                None => Some((site, if primitive.is_flop() { "AFF" } else { "A6LUT" }.to_string())),
                Some(_) if config.only_use_empty_sites => None,
                Some(si) => match &controls {
                    Some(c) => c
                        .clk
                        .and_then(|clk| finder.find_unused_flop(design, si, clk, c.ce, c.sr, None))
                        .map(|bel| (site, bel)),
                    None => finder.find_unused_lut6(design, si).map(|bel| (site, bel)),
                },
            }
        });
        let (site, bel) = placement.ok_or_else(|| EcoError::NoPlacement(copy_name.clone()))?;

        let copy = design.netlist.create_instance(scope, &copy_name, &cell_type)?;
        for (key, value) in &properties {
            design.netlist.set_property(copy, key, value.clone());
        }
        let cell = design.create_cell(copy)?;
        design.place_cell(cell, site, &bel)?;
        log::debug!("Placed replica {} at {}/{}", copy_name, design.device().site(site).name, bel);

        for (port, input) in &input_nets {
            let target = match (input, port.as_str()) {
                (Some(n), _) => Some(*n),
                (None, "CE") if primitive.is_flop() => Some(design.netlist.constant_net(scope, Primitive::Vcc)?),
                (None, p) if Some(p) == primitive.reset_pin() => {
                    Some(design.netlist.constant_net(scope, Primitive::Gnd)?)
                }
                (None, _) => None,
            };
            if let Some(target) = target {
                wiring.entry(target).or_default().push(HierPin::named(copy, port));
            }
        }
        let base = format!("{}_copy{i}", design.netlist.net(source_net).name);
        let out_name = design.netlist.unique_net_name(scope, &base);
        let out_net = design.netlist.create_net(scope, &out_name)?;
        wiring.insert(out_net, vec![HierPin::named(copy, out_pin)]);
        result.sources.push(cell);
        result.nets.push(out_net);
    }
    connect_pins(design, &wiring, None, eco)?;

    // Cluster distinct sink locations.
    let points: Vec<GridLoc> = by_loc.keys().copied().collect();
    let mut rng = fastrand::Rng::with_seed(config.seed);
    let clusters: Vec<_> = kmeans_clustering(&points, split_count, config.max_iterations, &mut rng)
        .into_iter()
        .filter(|c| !c.points.is_empty())
        .collect();

    let source_locs: Vec<Option<GridLoc>> = result.sources.iter().map(|c| design.cell_loc(*c)).collect();
    let pairs = clusters
        .iter()
        .enumerate()
        .cartesian_product(source_locs.iter().enumerate())
        .filter_map(|((ci, cluster), (si, loc))| Some((loc.as_ref()?.manhattan(&cluster.centroid), ci, si)))
        .sorted();
    let mut cluster_taken: IndexSet<usize> = IndexSet::new();
    let mut source_taken: IndexSet<usize> = IndexSet::new();
    let mut assignments = NetPins::new();
    for (_, ci, si) in pairs {
        if cluster_taken.contains(&ci) || source_taken.contains(&si) {
            continue;
        }
        cluster_taken.insert(ci);
        source_taken.insert(si);
        let pins: Vec<HierPin> = clusters[ci]
            .points
            .iter()
            .flat_map(|p| by_loc.get(p).into_iter().flatten().cloned())
            .collect();
        assignments.entry(result.nets[si]).or_default().extend(pins);
    }

    // sinks kept by the original driver are left untouched
    let moves: NetPins = assignments
        .iter()
        .filter(|(n, _)| **n != source_net)
        .map(|(n, pins)| (*n, pins.clone()))
        .collect();
    let moved: Vec<HierPin> = moves.values().flatten().cloned().collect();
    let mut pending = PendingRemovals::new();
    disconnect_pins(design, &moved, Some(&mut pending))?;
    connect_pins(design, &moves, Some(&mut pending), eco)?;
    design.apply_pending_removals(&mut pending);

    log::info!(
        "Split fan-out of {} across {} drivers, {} sinks moved",
        net_name,
        result.sources.len(),
        moved.len()
    );
    result.assignments = assignments;
    Ok(result)
}
