mod common;

use std::collections::HashSet;

use common::{assert_loads_terminated, sink_paths, site_name, DesignBuilder};
use ecoweave_engine::{cut_fanout, EcoConfig, EcoError, FanoutConfig};
use ecoweave_netlist::{Design, HierPin, Primitive};

/// `drv` at the center of a 16x16 grid drives `q` into twelve flops in
/// three corners.
fn twelve_sinks() -> Design {
    let mut b = DesignBuilder::new(16, 16);
    let clk = b.input("clk");
    let drv = b.flop("drv", Some("SLICE_X8Y8"));
    let corners = [(1, 1), (13, 1), (7, 13)];
    let mut pins = vec![(drv, "Q")];
    let mut clocked = vec![(drv, "C")];
    for (c, (x0, y0)) in corners.iter().enumerate() {
        for (i, (dx, dy)) in [(0, 0), (1, 0), (0, 1), (1, 1)].iter().enumerate() {
            let site = format!("SLICE_X{}Y{}", x0 + dx, y0 + dy);
            let sink = b.flop(&format!("sink{c}_{i}"), Some(site.as_str()));
            pins.push((sink, "D"));
            clocked.push((sink, "C"));
        }
    }
    b.net("q", &pins);
    b.connect(clk, &clocked);
    b.build()
}

#[test]
fn twelve_sinks_split_three_ways() {
    let mut design = twelve_sinks();
    let q = design.netlist.net_by_path("q").unwrap();
    let before = sink_paths(&design, q);
    assert_eq!(before.len(), 12);
    let phys = design.net_by_name("q").unwrap();

    let result = cut_fanout(
        &mut design,
        phys,
        3,
        &FanoutConfig::default(),
        &EcoConfig::default(),
    )
    .unwrap();

    assert_eq!(result.sources.len(), 3);
    assert_eq!(result.nets.len(), 3);
    assert_eq!(result.nets[0], q);

    let mut seen = HashSet::new();
    let mut reconnected: Vec<String> = Vec::new();
    for (net, pins) in &result.assignments {
        assert!(result.nets.contains(net));
        for pin in pins {
            assert!(seen.insert(pin.clone()), "{pin:?} assigned twice");
            assert_eq!(design.netlist.net_of(pin), Some(*net));
            reconnected.push(design.netlist.pin_path(pin));
        }
    }
    reconnected.sort();
    assert_eq!(reconnected, before);

    let mut after: Vec<String> = result
        .nets
        .iter()
        .flat_map(|n| sink_paths(&design, *n))
        .collect();
    after.sort();
    assert_eq!(after, before);

    for (i, net) in result.nets.iter().enumerate() {
        assert_eq!(design.netlist.leaf_sources(*net).len(), 1);
        assert_loads_terminated(&design, *net);
        if i > 0 {
            assert_eq!(design.netlist.net(*net).name, format!("q_copy{}", i - 1));
        }
    }
}

#[test]
fn replicas_copy_the_driver() {
    let mut design = twelve_sinks();
    let phys = design.net_by_name("q").unwrap();
    let drv = design.netlist.inst_by_path("drv").unwrap();
    design.netlist.set_property(drv, "INIT", "1'b1");

    let result = cut_fanout(&mut design, phys, 3, &FanoutConfig::default(), &EcoConfig::default()).unwrap();
    let clk = design.netlist.net_by_path("clk").unwrap();
    for (i, cell) in result.sources.iter().enumerate().skip(1) {
        let inst = design.cell(*cell).inst;
        assert_eq!(design.netlist.inst(inst).name, format!("drv_copy{}", i - 1));
        assert_eq!(design.netlist.primitive(inst), Some(Primitive::Fdre));
        assert_eq!(design.netlist.property(inst, "INIT"), Some("1'b1"));
        assert_eq!(design.netlist.net_of(&HierPin::named(inst, "C")), Some(clk));
        assert_eq!(design.cell(*cell).bel.as_deref(), Some("AFF"));

        let ce = design.netlist.net_of(&HierPin::named(inst, "CE")).unwrap();
        assert_eq!(design.netlist.net(ce).name, "<const1>");
        let r = design.netlist.net_of(&HierPin::named(inst, "R")).unwrap();
        assert_eq!(design.netlist.net(r).name, "<const0>");

        // replicas go to sites nothing used before
        let si = design.cell(*cell).site_inst.unwrap();
        assert_eq!(design.site_inst(si).cells.len(), 1);
        assert_ne!(site_name(&design, inst).as_deref(), Some("SLICE_X8Y8"));
    }
}

#[test]
fn split_of_one_changes_nothing() {
    let mut design = twelve_sinks();
    let phys = design.net_by_name("q").unwrap();
    let before = design.to_json().unwrap();
    let result = cut_fanout(&mut design, phys, 1, &FanoutConfig::default(), &EcoConfig::default()).unwrap();
    assert_eq!(result.sources.len(), 1);
    assert_eq!(result.assignments.values().map(Vec::len).sum::<usize>(), 12);
    assert_eq!(design.to_json().unwrap(), before);
}

#[test]
fn port_driven_net_has_nothing_to_replicate() {
    let mut b = DesignBuilder::new(4, 4);
    let d = b.input("d");
    let sink = b.flop("sink", Some("SLICE_X1Y1"));
    b.connect(d, &[(sink, "D")]);
    let mut design = b.build();
    let phys = design.net_by_name("d").unwrap();
    let err = cut_fanout(&mut design, phys, 2, &FanoutConfig::default(), &EcoConfig::default()).unwrap_err();
    assert!(matches!(err, EcoError::NoSource(n) if n == "d"));
}

/// LUT `drv` at X4Y4 inverts input `a` into four corner flops; a flop
/// already sits at X3Y3, the centroid of `q`.
fn lut_driver_with_busy_centroid() -> Design {
    let mut b = DesignBuilder::new(8, 8);
    let a = b.input("a");
    let drv = b.lut("drv", "O=!I0", 1, Some("SLICE_X4Y4"));
    b.connect(a, &[(drv, "I0")]);
    b.flop("blocker", Some("SLICE_X3Y3"));
    let mut pins = vec![(drv, "O")];
    let sinks: Vec<_> = ["SLICE_X0Y0", "SLICE_X1Y0", "SLICE_X7Y7", "SLICE_X6Y7"]
        .iter()
        .enumerate()
        .map(|(i, s)| b.flop(&format!("ff{i}"), Some(*s)))
        .collect();
    pins.extend(sinks.iter().map(|s| (*s, "D")));
    b.net("q", &pins);
    b.build()
}

#[test]
fn lut_replica_shares_a_used_site_when_allowed() {
    let mut design = lut_driver_with_busy_centroid();
    let phys = design.net_by_name("q").unwrap();
    let config = FanoutConfig {
        only_use_empty_sites: false,
        ..FanoutConfig::default()
    };
    let result = cut_fanout(&mut design, phys, 2, &config, &EcoConfig::default()).unwrap();

    let copy = design.cell(result.sources[1]).inst;
    assert_eq!(design.netlist.primitive(copy), Some(Primitive::Lut(1)));
    assert_eq!(
        design.netlist.property(copy, "INIT"),
        design.netlist.property(design.netlist.inst_by_path("drv").unwrap(), "INIT")
    );
    let a = design.netlist.net_by_path("a").unwrap();
    assert_eq!(design.netlist.net_of(&HierPin::named(copy, "I0")), Some(a));
    assert_eq!(site_name(&design, copy).as_deref(), Some("SLICE_X3Y3"));
    assert_eq!(design.cell(result.sources[1]).bel.as_deref(), Some("A6LUT"));

    let mut after: Vec<String> = result.nets.iter().flat_map(|n| sink_paths(&design, *n)).collect();
    after.sort();
    assert_eq!(after, vec!["ff0/D", "ff1/D", "ff2/D", "ff3/D"]);
}

#[test]
fn lut_replica_avoids_used_sites_by_default() {
    let mut design = lut_driver_with_busy_centroid();
    let phys = design.net_by_name("q").unwrap();
    let result = cut_fanout(&mut design, phys, 2, &FanoutConfig::default(), &EcoConfig::default()).unwrap();
    let copy = design.cell(result.sources[1]).inst;
    let site = site_name(&design, copy).unwrap();
    assert_ne!(site, "SLICE_X3Y3");
    assert_ne!(site, "SLICE_X4Y4");
}

#[test]
fn replicas_start_from_the_sinks_not_the_driver() {
    let mut b = DesignBuilder::new(16, 16);
    let a = b.input("a");
    let drv = b.lut("drv", "O=I0", 1, Some("SLICE_X15Y15"));
    b.connect(a, &[(drv, "I0")]);
    let mut pins = vec![(drv, "O")];
    for (i, site) in ["SLICE_X1Y1", "SLICE_X3Y1", "SLICE_X1Y3", "SLICE_X3Y3"].iter().enumerate() {
        pins.push((b.flop(&format!("ff{i}"), Some(*site)), "D"));
    }
    b.net("q", &pins);
    let mut design = b.build();
    let phys = design.net_by_name("q").unwrap();

    let result = cut_fanout(&mut design, phys, 2, &FanoutConfig::default(), &EcoConfig::default()).unwrap();
    let copy = design.cell(result.sources[1]).inst;
    assert_eq!(site_name(&design, copy).as_deref(), Some("SLICE_X2Y2"));
}
