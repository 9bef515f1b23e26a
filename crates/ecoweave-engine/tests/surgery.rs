mod common;

use common::{assert_loads_terminated, sink_paths, site_id, site_name, DesignBuilder};
use ecoweave_engine::{
    connect_pin_paths, connect_pins, create_cell_instances, create_nets, disconnect_pin_paths,
    disconnect_pins, insert_inline_cell_on_input, remove_cell_paths, EcoConfig, EcoError, NetPins,
};
use ecoweave_engine::surgery::{create_exit_pin, USED_NET};
use ecoweave_engine::lut_equation::{init_from_equation, LUT_INIT};
use ecoweave_netlist::{
    CellType, Design, HierPin, InstId, NetId, NetKind, PendingRemovals, Primitive,
};

/// `drv` at X1Y1 drives `q` into `l0` (X5Y5) and `l1` (X6Y5).
fn driver_and_two_loads() -> (Design, InstId, InstId, InstId, NetId) {
    let mut b = DesignBuilder::new(10, 10);
    let drv = b.flop("drv", Some("SLICE_X1Y1"));
    let l0 = b.lut("l0", "O=!I0", 1, Some("SLICE_X5Y5"));
    let l1 = b.lut("l1", "O=I0", 1, Some("SLICE_X6Y5"));
    let q = b.net("q", &[(drv, "Q"), (l0, "I0"), (l1, "I0")]);
    (b.build(), drv, l0, l1, q)
}

/// Terminal names of every site instance with the nets they carry.
fn terminals(design: &Design) -> Vec<String> {
    let mut out: Vec<String> = design
        .site_insts()
        .flat_map(|(_, si)| {
            si.pins.iter().map(move |(name, spi)| {
                let net = design.site_pin(*spi).net.map(|n| design.net(n).name.clone());
                format!("{}/{} {:?}", si.name, name, net)
            })
        })
        .collect();
    out.sort();
    out
}

#[test]
fn connect_realizes_source_and_loads() {
    let (design, drv, _, _, q) = driver_and_two_loads();
    let phys = design.net_by_name("q").unwrap();
    let source = design.net(phys).source.expect("source terminal");
    assert_eq!(design.site_pin(source).name, "AQ");
    assert_eq!(site_name(&design, drv).as_deref(), Some("SLICE_X1Y1"));
    assert_loads_terminated(&design, q);
    insta::assert_snapshot!(terminals(&design).join("\n"), @r###"
    SLICE_X1Y1/AQ Some("q")
    SLICE_X5Y5/A1 Some("q")
    SLICE_X6Y5/A1 Some("q")
    "###);
}

#[test]
fn round_trip_with_pending_removals_keeps_terminals() {
    let (mut design, _, l0, l1, q) = driver_and_two_loads();
    let before = terminals(&design);
    let pins = vec![HierPin::named(l0, "I0"), HierPin::named(l1, "I0")];

    let mut pending = PendingRemovals::new();
    disconnect_pins(&mut design, &pins, Some(&mut pending)).unwrap();
    assert!(sink_paths(&design, q).is_empty());
    assert_eq!(pending.values().map(|p| p.len()).sum::<usize>(), 2);

    let mut batch = NetPins::new();
    batch.insert(q, pins);
    connect_pins(&mut design, &batch, Some(&mut pending), &EcoConfig::default()).unwrap();
    assert!(pending.values().all(|p| p.is_empty()));
    design.apply_pending_removals(&mut pending);

    assert_eq!(terminals(&design), before);
    assert_eq!(sink_paths(&design, q), vec!["l0/I0", "l1/I0"]);
}

#[test]
fn round_trip_without_pending_rebuilds_terminals() {
    let (mut design, _, _, _, q) = driver_and_two_loads();
    let before = terminals(&design);
    disconnect_pin_paths(&mut design, &["l0/I0", "l1/I0"], None).unwrap();
    assert_eq!(terminals(&design), vec![r#"SLICE_X1Y1/AQ Some("q")"#.to_string()]);

    connect_pin_paths(
        &mut design,
        &[("q", vec!["l0/I0", "l1/I0"])],
        None,
        &EcoConfig::default(),
    )
    .unwrap();
    assert_eq!(terminals(&design), before);
    assert_loads_terminated(&design, q);
}

#[test]
fn two_sources_on_one_net_are_rejected() {
    let (mut design, _, _, _, _) = driver_and_two_loads();
    let err = connect_pin_paths(
        &mut design,
        &[("q", vec!["l0/O", "l1/O"])],
        None,
        &EcoConfig::default(),
    )
    .unwrap_err();
    assert!(matches!(err, EcoError::MultipleSources { net } if net == "q"));
}

#[test]
fn new_source_replaces_the_old_one() {
    let (mut design, drv, l0, _, q) = driver_and_two_loads();
    let mut batch = NetPins::new();
    batch.insert(q, vec![HierPin::named(l0, "O")]);
    connect_pins(&mut design, &batch, None, &EcoConfig::default()).unwrap();

    assert_eq!(design.netlist.leaf_sources(q), vec![HierPin::named(l0, "O")]);
    assert_eq!(design.netlist.net_of(&HierPin::named(drv, "Q")), None);
    let phys = design.net_by_name("q").unwrap();
    let source = design.net(phys).source.expect("source terminal");
    assert_eq!(design.site_pin(source).name, "A_O");
}

#[test]
fn load_inside_a_submodule_gets_a_pass_through() {
    let (mut design, drv, _, _, q) = driver_and_two_loads();
    let nl = &mut design.netlist;
    nl.add_cell_type(CellType::hierarchical("sub_t"));
    let lut1 = nl.ensure_primitive(Primitive::Lut(1));
    let top = nl.top();
    let sub = nl.create_instance(top, "sub", "sub_t").unwrap();
    let inner = nl.create_instance(sub, "inner", &lut1).unwrap();
    nl.set_property(inner, LUT_INIT, init_from_equation("O=I0", 1).unwrap());
    let cell = design.create_cell(inner).unwrap();
    design.place_cell(cell, site_id(&design, "SLICE_X7Y7"), "A6LUT").unwrap();

    let mut batch = NetPins::new();
    batch.insert(q, vec![HierPin::named(inner, "I0")]);
    connect_pins(&mut design, &batch, None, &EcoConfig::default()).unwrap();

    let inner_net = design.netlist.net_of(&HierPin::named(inner, "I0")).unwrap();
    assert_ne!(inner_net, q);
    assert!(design.netlist.net_path(inner_net).starts_with("sub/q_"));
    assert_eq!(design.netlist.parent_net(inner_net), q);
    assert_eq!(design.netlist.leaf_sources(inner_net), vec![HierPin::named(drv, "Q")]);
    assert_eq!(sink_paths(&design, q), vec!["l0/I0", "l1/I0", "sub/inner/I0"]);
    assert_loads_terminated(&design, q);
}

#[test]
fn parent_nets_rebuild_once_per_batch() {
    let mut b = DesignBuilder::new(10, 10);
    let d0 = b.flop("d0", Some("SLICE_X1Y1"));
    let d1 = b.flop("d1", Some("SLICE_X2Y1"));
    let loads: Vec<InstId> = (0..4)
        .map(|i| {
            let site = format!("SLICE_X{}Y5", i + 4);
            b.lut(&format!("l{i}"), "O=I0", 1, Some(&site))
        })
        .collect();
    let q0 = b.net("q0", &[(d0, "Q"), (loads[0], "I0"), (loads[1], "I0")]);
    let q1 = b.net("q1", &[(d1, "Q"), (loads[2], "I0"), (loads[3], "I0")]);
    let mut design = b.build();
    let start = design.netlist.parent_net_generation();

    let pins: Vec<HierPin> = loads.iter().map(|l| HierPin::named(*l, "I0")).collect();
    disconnect_pins(&mut design, &pins, None).unwrap();
    assert_eq!(design.netlist.parent_net_generation(), start + 1);

    let mut batch = NetPins::new();
    batch.insert(q0, pins[2..].to_vec());
    batch.insert(q1, pins[..2].to_vec());
    connect_pins(&mut design, &batch, None, &EcoConfig::default()).unwrap();
    assert_eq!(design.netlist.parent_net_generation(), start + 2);

    assert_eq!(sink_paths(&design, q0), vec!["l2/I0", "l3/I0"]);
    assert_eq!(sink_paths(&design, q1), vec!["l0/I0", "l1/I0"]);
    assert_loads_terminated(&design, q0);
    assert_loads_terminated(&design, q1);
}

#[test]
fn shared_terminal_conflict_can_be_downgraded() {
    let mut b = DesignBuilder::new(6, 6);
    let d0 = b.flop("d0", Some("SLICE_X0Y0"));
    let d1 = b.flop("d1", Some("SLICE_X1Y0"));
    let upper = b.place_at("shell_upper", Primitive::Lut(1), "SLICE_X3Y3", "A6LUT");
    let lower = b.place_at("lower", Primitive::Lut(1), "SLICE_X3Y3", "A5LUT");
    b.net("n0", &[(d0, "Q"), (upper, "I0")]);
    let n1 = b.design.netlist.create_net(b.design.netlist.top(), "n1").unwrap();
    b.connect(n1, &[(d1, "Q")]);
    let mut design = b.build();

    let mut batch = NetPins::new();
    batch.insert(n1, vec![HierPin::named(lower, "I0")]);
    let err = connect_pins(&mut design.clone(), &batch, None, &EcoConfig::default()).unwrap_err();
    assert!(matches!(
        err,
        EcoError::SitePinConflict { ref site_pin, ref other, .. }
            if site_pin == "SLICE_X3Y3/A1" && other == "shell_upper/I0"
    ));

    let lenient = EcoConfig {
        warn_if_cell_inst_starts_with: Some("shell_".to_string()),
    };
    connect_pins(&mut design, &batch, None, &lenient).unwrap();
    assert_eq!(sink_paths(&design, n1), vec!["lower/I0"]);
}

#[test]
fn inline_cell_sits_between_net_and_pin() {
    let (mut design, _, l0, _, q) = driver_and_two_loads();
    let site = site_id(&design, "SLICE_X3Y3");
    let pin = HierPin::named(l0, "I0");
    let cell = insert_inline_cell_on_input(
        &mut design,
        &pin,
        Primitive::Lut(1),
        site,
        "A6LUT",
        "I0",
        "O",
        &EcoConfig::default(),
    )
    .unwrap();

    let inline = design.cell(cell).inst;
    let inline_path = design.netlist.inst_path(inline);
    assert!(inline_path.starts_with("inline_lut1_"), "{inline_path}");
    assert_eq!(sink_paths(&design, q), vec![format!("{inline_path}/I0"), "l1/I0".to_string()]);
    let new_net = design.netlist.net_of(&pin).unwrap();
    assert!(design.netlist.net(new_net).name.starts_with("inline_net_"));
    assert_eq!(design.netlist.leaf_sources(new_net), vec![HierPin::named(inline, "O")]);
    assert_loads_terminated(&design, q);
    assert_loads_terminated(&design, new_net);

    let err = insert_inline_cell_on_input(
        &mut design,
        &HierPin::named(l0, "O"),
        Primitive::Lut(1),
        site,
        "B6LUT",
        "I0",
        "O",
        &EcoConfig::default(),
    )
    .unwrap_err();
    assert!(matches!(err, EcoError::NotAnInput(p) if p == "l0/O"));
}

#[test]
fn removed_cells_release_their_terminals() {
    let (mut design, _, _, _, q) = driver_and_two_loads();
    remove_cell_paths(&mut design, &["l0"], None).unwrap();
    assert!(design.netlist.inst_by_path("l0").is_err());
    assert!(design.cell_by_name("l0").is_none());
    assert_eq!(sink_paths(&design, q), vec!["l1/I0"]);
    assert!(terminals(&design).iter().all(|t| !t.starts_with("SLICE_X5Y5/")));
}

#[test]
fn created_cells_and_nets_start_unplaced_and_empty() {
    let (mut design, _, _, _, _) = driver_and_two_loads();
    let insts = create_cell_instances(&mut design, "FDRE", &["spare0", "spare1"]).unwrap();
    assert_eq!(insts.len(), 2);
    let cell = design.physical_cell(insts[1]).unwrap();
    assert_eq!(design.cell(cell).site_inst, None);

    let nets = create_nets(&mut design, &["spare_net"]).unwrap();
    assert!(design.netlist.net(nets[0]).pins.is_empty());
    assert!(design.net_by_name("spare_net").is_some());
    assert!(create_nets(&mut design, &["spare_net"]).is_err());
}

#[test]
fn lut5_output_takes_over_the_output_mux() {
    let mut b = DesignBuilder::new(4, 4);
    b.place_at("l6", Primitive::Lut(2), "SLICE_X2Y2", "A6LUT");
    let l5 = b.place_at("l5", Primitive::Lut(2), "SLICE_X2Y2", "A5LUT");
    let mut design = b.build();
    let si = design.site_inst_at(site_id(&design, "SLICE_X2Y2")).unwrap();

    // the 6-input output leaves through the multiplexed pin
    let n6 = design.create_net("n6", NetKind::Normal).unwrap();
    design.create_pin(n6, si, "AMUX").unwrap();
    assert!(design.route_site(si, n6, "A_O", "AMUX"));

    let n5 = design.create_net("n5", NetKind::Normal).unwrap();
    let spi = create_exit_pin(&mut design, &HierPin::named(l5, "O"), n5).unwrap();
    assert_eq!(design.site_pin(spi).name, "AMUX");
    assert_eq!(design.site_pin(spi).net, Some(n5));
    assert_eq!(
        design.site_inst(si).used_muxes.get("OUTMUXA").map(String::as_str),
        Some("D5")
    );

    let direct = design.net(n6).source.expect("direct output terminal");
    assert_eq!(design.site_pin(direct).name, "A_O");
    assert_eq!(design.wire_net(si, "A_O"), Some(n6));
}

#[test]
fn flop_fed_inside_its_site_gets_a_bypass_terminal() {
    let mut b = DesignBuilder::new(4, 4);
    b.place_at("lut", Primitive::Lut(1), "SLICE_X1Y1", "A6LUT");
    let ff = b.flop("ff", Some("SLICE_X1Y1"));
    let mut design = b.build();
    let si = design.site_inst_at(site_id(&design, "SLICE_X1Y1")).unwrap();

    let local = design.create_net("local", NetKind::Normal).unwrap();
    assert!(design.route_site(si, local, "A_O", "FFMUXA1_OUT"));

    let ext = design.create_net("ext", NetKind::Normal).unwrap();
    let spi = create_exit_pin(&mut design, &HierPin::named(ff, "D"), ext).unwrap();
    assert_eq!(design.site_pin(spi).name, "AX");
    assert_eq!(
        design.site_inst(si).used_muxes.get("FFMUXA1").map(String::as_str),
        Some("BYP")
    );
    assert_eq!(design.wire_net(si, "FFMUXA1_OUT"), Some(ext));
    // the displaced LUT output keeps its net
    assert_eq!(design.wire_net(si, "A_O"), Some(local));
}

#[test]
fn occupied_terminal_leaves_no_exit() {
    let mut b = DesignBuilder::new(4, 4);
    let lut = b.lut("lut", "O=I0", 1, Some("SLICE_X0Y0"));
    let mut design = b.build();
    let si = design.site_inst_at(site_id(&design, "SLICE_X0Y0")).unwrap();
    let other = design.create_net("other", NetKind::Normal).unwrap();
    design.create_pin(other, si, "A1").unwrap();

    let net = design.create_net("wanted", NetKind::Normal).unwrap();
    let err = create_exit_pin(&mut design, &HierPin::named(lut, "I0"), net).unwrap_err();
    assert!(matches!(
        err,
        EcoError::NoExitPin { ref pin, ref site } if pin == "lut/I0" && site == "SLICE_X0Y0"
    ));
}

#[test]
fn ground_source_turns_the_net_static() {
    let (mut design, drv, l0, l1, q) = driver_and_two_loads();
    let top = design.netlist.top();
    let gnd_type = design.netlist.ensure_primitive(Primitive::Gnd);
    let gnd = design.netlist.create_instance(top, "tie_gnd", &gnd_type).unwrap();
    let phys = design.net_by_name("q").unwrap();

    let mut batch = NetPins::new();
    batch.insert(q, vec![HierPin::named(gnd, "G")]);
    connect_pins(&mut design, &batch, None, &EcoConfig::default()).unwrap();

    assert_eq!(design.netlist.leaf_sources(q), vec![HierPin::named(gnd, "G")]);
    assert_eq!(design.net(phys).kind, NetKind::Ground);

    // the old driver's output is parked, not left dangling
    let si = design.site_inst_at(site_id(&design, "SLICE_X1Y1")).unwrap();
    assert!(!design.site_inst(si).pins.contains_key("AQ"));
    assert_eq!(design.wire_net(si, "AQ"), design.net_by_name(USED_NET));
    assert_eq!(design.netlist.net_of(&HierPin::named(drv, "Q")), None);

    for load in [l0, l1] {
        let cell = design.physical_cell(load).unwrap();
        let pins = design.cell_site_pins(cell, "I0");
        assert_eq!(pins.len(), 1);
        assert_eq!(design.site_pin(pins[0]).net, Some(design.gnd_net()));
    }
}

#[test]
fn undriven_and_unplaced_loads() {
    let (mut design, _, _, l1, q) = driver_and_two_loads();
    let before = terminals(&design);

    let spare = create_cell_instances(&mut design, "FDRE", &["spare"]).unwrap()[0];
    let mut batch = NetPins::new();
    batch.insert(q, vec![HierPin::named(spare, "D")]);
    connect_pins(&mut design, &batch, None, &EcoConfig::default()).unwrap();
    assert_eq!(sink_paths(&design, q), vec!["l0/I0", "l1/I0", "spare/D"]);
    assert_eq!(terminals(&design), before);

    let floating = create_nets(&mut design, &["floating"]).unwrap()[0];
    connect_pin_paths(
        &mut design,
        &[("floating", vec!["l1/I0"])],
        None,
        &EcoConfig::default(),
    )
    .unwrap();
    assert_eq!(sink_paths(&design, floating), vec!["l1/I0"]);
    let phys = design.net_by_name("floating").unwrap();
    assert_eq!(design.net(phys).source, None);
    let cell = design.physical_cell(l1).unwrap();
    let pins = design.cell_site_pins(cell, "I0");
    assert_eq!(pins.len(), 1);
    assert_eq!(design.site_pin(pins[0]).net, Some(phys));
}
