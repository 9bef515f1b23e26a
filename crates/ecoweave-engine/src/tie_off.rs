//! Driving top-level input ports from constant lookup tables.

use ecoweave_netlist::{CellId, Design, HierPin, NetlistError, PinName, Primitive, SiteId};

use crate::error::{EcoError, Result};
use crate::lut_equation::{init_string, LUT_INIT};
use crate::placement::{Region, SpareCapacityFinder};
use crate::surgery::{connect_pins, EcoConfig, NetPins};

/// Marks lookup tables inserted as constant drivers.
pub const ECO_TIE_OFF: &str = "ECO_TIE_OFF";

#[derive(Debug, Clone, Default)]
pub struct TieOffConfig {
    /// Constant driven onto the port.
    pub value: bool,
    pub region: Option<Region>,
}

/// Inserts constant drivers one port at a time, placing each near the
/// previous one.
#[derive(Debug)]
pub struct TieOffInserter {
    hint: Option<SiteId>,
    config: TieOffConfig,
    eco: EcoConfig,
    finder: SpareCapacityFinder,
}

impl TieOffInserter {
    pub fn new(design: &Design, hint: Option<SiteId>, config: TieOffConfig, eco: EcoConfig) -> Self {
        Self {
            hint,
            config,
            eco,
            finder: SpareCapacityFinder::new(design),
        }
    }

    /// Site of the last placed tie-off, where the next search starts.
    pub fn hint(&self) -> Option<SiteId> {
        self.hint
    }

    fn home(&self, design: &Design) -> Option<SiteId> {
        self.hint.or_else(|| {
            design
                .device()
                .sites()
                .find(|(_, s)| s.kind.is_logic())
                .map(|(id, _)| id)
        })
    }

    /// Drives the net behind top-level input `port` (bit `bit` of a bus)
    /// from a new single-input table holding the configured constant.
    pub fn insert_tie_off(&mut self, design: &mut Design, port: &str, bit: Option<u32>) -> Result<CellId> {
        let top = design.netlist.top();
        let pin = HierPin::new(
            top,
            PinName {
                port: port.to_string(),
                bit,
            },
        );
        if design.netlist.port_direction(&pin).is_none() {
            return Err(NetlistError::PortNotFound {
                port: pin.pin.to_string(),
                cell_type: design.netlist.inst(top).cell_type.clone(),
            }
            .into());
        }
        if !design.netlist.is_input(&pin) {
            return Err(EcoError::NotAnInput(design.netlist.pin_path(&pin)));
        }
        let label = match bit {
            Some(b) => format!("{port}_{b}"),
            None => port.to_string(),
        };

        let net = match design.netlist.net_of(&pin) {
            Some(net) => net,
            None => {
                let name = design.netlist.unique_net_name(top, &format!("tie_off_net_{label}"));
                let net = design.netlist.create_net(top, &name)?;
                design.netlist.connect(net, pin.clone())?;
                net
            }
        };

        let home = self
            .home(design)
            .ok_or_else(|| EcoError::NoPlacement(format!("tie_off_lut_{label}")))?;
        let (site, bel) = self
            .finder
            .find_lut6_near(design, home, self.config.region.clone())
            .ok_or_else(|| EcoError::NoPlacement(format!("tie_off_lut_{label}")))?;

        let lut1 = design.netlist.ensure_primitive(Primitive::Lut(1));
        let name = design.netlist.unique_inst_name(top, &format!("tie_off_lut_{label}"));
        let lut = design.netlist.create_instance(top, &name, &lut1)?;
        let table = if self.config.value { 0b11 } else { 0b00 };
        design.netlist.set_property(lut, LUT_INIT, init_string(table, 1));
        design.netlist.set_property(lut, ECO_TIE_OFF, "TRUE");
        let cell = design.create_cell(lut)?;
        design.place_cell(cell, site, &bel)?;

        let mut batch = NetPins::new();
        batch.insert(net, vec![HierPin::named(lut, "O")]);
        connect_pins(design, &batch, None, &self.eco)?;

        self.hint = Some(site);
        log::debug!(
            "Tied {} to {} with {} at {}/{}",
            design.netlist.pin_path(&pin),
            u8::from(self.config.value),
            name,
            design.device().site(site).name,
            bel
        );
        Ok(cell)
    }
}
