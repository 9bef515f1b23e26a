#![allow(dead_code)]

use std::sync::Arc;

use ecoweave_engine::lut_equation::{init_from_equation, LUT_INIT};
use ecoweave_engine::{connect_pins, EcoConfig, NetPins};
use ecoweave_netlist::{
    CellType, Design, Device, HierPin, InstId, NetId, Netlist, PortDirection, Primitive, SiteId,
    SiteKind,
};

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Builds small placed-and-routed designs on an all-logic grid. Nets are
/// wired through the engine so the physical side is realized as well.
pub struct DesignBuilder {
    pub design: Design,
}

impl DesignBuilder {
    pub fn new(width: i32, height: i32) -> Self {
        init_logger();
        let device = Arc::new(Device::grid("testgrid", width, height, |_| {
            Some(SiteKind::SliceL)
        }));
        let netlist = Netlist::new("top", CellType::hierarchical("top"));
        Self {
            design: Design::new("top", device, netlist),
        }
    }

    fn add_leaf(&mut self, name: &str, primitive: Primitive, placement: Option<(&str, &str)>) -> InstId {
        let ty = self.design.netlist.ensure_primitive(primitive);
        let top = self.design.netlist.top();
        let inst = self.design.netlist.create_instance(top, name, &ty).unwrap();
        let cell = self.design.create_cell(inst).unwrap();
        if let Some((site, bel)) = placement {
            let site = site_id(&self.design, site);
            self.design.place_cell(cell, site, bel).unwrap();
        }
        inst
    }

    /// A `size`-input LUT computing `equation`, placed on the A LUT of `site`.
    pub fn lut(&mut self, name: &str, equation: &str, size: u8, site: Option<&str>) -> InstId {
        let inst = self.add_leaf(name, Primitive::Lut(size), site.map(|s| (s, "A6LUT")));
        let init = init_from_equation(equation, size).unwrap();
        self.design.netlist.set_property(inst, LUT_INIT, init);
        inst
    }

    pub fn flop(&mut self, name: &str, site: Option<&str>) -> InstId {
        self.add_leaf(name, Primitive::Fdre, site.map(|s| (s, "AFF")))
    }

    pub fn place_at(&mut self, name: &str, primitive: Primitive, site: &str, bel: &str) -> InstId {
        self.add_leaf(name, primitive, Some((site, bel)))
    }

    /// Top-level input port and the net behind it.
    pub fn input(&mut self, port: &str) -> NetId {
        self.design.netlist.add_top_port(port, PortDirection::Input, None);
        let top = self.design.netlist.top();
        let net = self.design.netlist.create_net(top, port).unwrap();
        self.design.netlist.connect(net, HierPin::named(top, port)).unwrap();
        net
    }

    pub fn connect(&mut self, net: NetId, pins: &[(InstId, &str)]) {
        let mut batch = NetPins::new();
        batch.insert(net, pins.iter().map(|(i, p)| HierPin::named(*i, p)).collect());
        connect_pins(&mut self.design, &batch, None, &EcoConfig::default()).unwrap();
    }

    pub fn net(&mut self, name: &str, pins: &[(InstId, &str)]) -> NetId {
        let top = self.design.netlist.top();
        let net = self.design.netlist.create_net(top, name).unwrap();
        self.connect(net, pins);
        net
    }

    pub fn build(self) -> Design {
        self.design
    }
}

pub fn site_id(design: &Design, name: &str) -> SiteId {
    design
        .device()
        .site_by_name(name)
        .unwrap_or_else(|| panic!("no site {name}"))
}

pub fn site_name(design: &Design, inst: InstId) -> Option<String> {
    let cell = design.physical_cell(inst)?;
    let si = design.cell(cell).site_inst?;
    Some(design.site_inst(si).name.clone())
}

/// Leaf loads of `net`, rendered as sorted paths.
pub fn sink_paths(design: &Design, net: NetId) -> Vec<String> {
    let mut paths: Vec<String> = design
        .netlist
        .leaf_pins(net, false, true)
        .iter()
        .map(|p| design.netlist.pin_path(p))
        .collect();
    paths.sort();
    paths
}

/// Every placed load of `net` either has a terminal on the matching
/// physical net or shares a site with the source.
pub fn assert_loads_terminated(design: &Design, net: NetId) {
    let name = design.netlist.net_path(design.netlist.parent_net(net));
    let phys = design.net_by_name(&name).unwrap_or_else(|| panic!("no physical net {name}"));
    let source_site = design
        .netlist
        .leaf_sources(net)
        .first()
        .and_then(|s| site_name(design, s.inst));
    for load in design.netlist.leaf_pins(net, false, true) {
        let Some(cell) = design.physical_cell(load.inst) else {
            continue;
        };
        if design.cell(cell).site_inst.is_none() {
            continue;
        }
        let pins = design.cell_site_pins(cell, &load.pin.to_string());
        if pins.is_empty() {
            assert_eq!(
                site_name(design, load.inst),
                source_site,
                "{} has no terminal",
                design.netlist.pin_path(&load)
            );
        }
        for spi in pins {
            assert_eq!(
                design.site_pin(spi).net,
                Some(phys),
                "{} terminates on the wrong net",
                design.netlist.pin_path(&load)
            );
        }
    }
}
