//! Device topology: a grid of sites and the fixed shape of a logic site.
//!
//! The device is immutable once built. Sites sit on an integer grid with at
//! most one site per location; neighbor queries stay inside the family of the
//! origin site so that a spiral search over logic sites never lands on a block
//! RAM column.

use std::collections::HashMap;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::ids::SiteId;

/// Grid coordinate of a site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GridLoc {
    pub x: i32,
    pub y: i32,
}

impl GridLoc {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Manhattan distance between two locations.
    pub fn manhattan(&self, other: &GridLoc) -> i32 {
        (self.x - other.x).abs() + (self.y - other.y).abs()
    }

    /// Index of the square ring around `other` this location lies on.
    pub fn ring(&self, other: &GridLoc) -> i32 {
        (self.x - other.x).abs().max((self.y - other.y).abs())
    }
}

impl std::fmt::Display for GridLoc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "X{}Y{}", self.x, self.y)
    }
}

/// Resource kind of a site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SiteKind {
    SliceL,
    SliceM,
    Bram,
    Dsp,
    Iob,
}

impl SiteKind {
    /// Logic slices of both flavours share one family.
    pub fn family(&self) -> SiteKind {
        match self {
            SiteKind::SliceM => SiteKind::SliceL,
            other => *other,
        }
    }

    pub fn is_logic(&self) -> bool {
        self.family() == SiteKind::SliceL
    }

    fn name_prefix(&self) -> &'static str {
        match self {
            SiteKind::SliceL | SiteKind::SliceM => "SLICE",
            SiteKind::Bram => "RAMB36",
            SiteKind::Dsp => "DSP48E2",
            SiteKind::Iob => "IOB",
        }
    }

    /// Internal shape shared by every site of this kind.
    pub fn template(&self) -> &'static SiteTemplate {
        if self.is_logic() {
            &LOGIC_SITE
        } else {
            &EMPTY_SITE
        }
    }
}

/// All logic site kinds, handy for centroid queries.
pub const LOGIC_KINDS: &[SiteKind] = &[SiteKind::SliceL, SiteKind::SliceM];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Site {
    pub name: String,
    pub kind: SiteKind,
    pub loc: GridLoc,
}

/// Serialized form of a [`Device`]; lookup indices are rebuilt on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DeviceRecord {
    name: String,
    sites: Vec<Site>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "DeviceRecord", into = "DeviceRecord")]
pub struct Device {
    name: String,
    sites: Vec<Site>,
    by_loc: HashMap<GridLoc, SiteId>,
    by_name: HashMap<String, SiteId>,
}

impl From<DeviceRecord> for Device {
    fn from(record: DeviceRecord) -> Self {
        Device::new(record.name, record.sites)
    }
}

impl From<Device> for DeviceRecord {
    fn from(device: Device) -> Self {
        DeviceRecord {
            name: device.name,
            sites: device.sites,
        }
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.sites == other.sites
    }
}

impl Device {
    pub fn new(name: impl Into<String>, sites: Vec<Site>) -> Self {
        let mut by_loc = HashMap::new();
        let mut by_name = HashMap::new();
        for (index, site) in sites.iter().enumerate() {
            let id = SiteId::from_raw(index as u32);
            if by_loc.insert(site.loc, id).is_some() {
                log::warn!("Two sites share location {}; keeping {}", site.loc, site.name);
            }
            by_name.insert(site.name.clone(), id);
        }
        Self {
            name: name.into(),
            sites,
            by_loc,
            by_name,
        }
    }

    /// Builds a `width` x `height` grid; `kind_at` decides which locations
    /// hold a site and of which kind.
    pub fn grid(
        name: impl Into<String>,
        width: i32,
        height: i32,
        kind_at: impl Fn(GridLoc) -> Option<SiteKind>,
    ) -> Self {
        let mut sites = Vec::new();
        for y in 0..height {
            for x in 0..width {
                let loc = GridLoc::new(x, y);
                if let Some(kind) = kind_at(loc) {
                    sites.push(Site {
                        name: format!("{}_X{}Y{}", kind.name_prefix(), x, y),
                        kind,
                        loc,
                    });
                }
            }
        }
        Device::new(name, sites)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn site(&self, id: SiteId) -> &Site {
        &self.sites[id.as_raw() as usize]
    }

    pub fn sites(&self) -> impl Iterator<Item = (SiteId, &Site)> {
        self.sites
            .iter()
            .enumerate()
            .map(|(i, s)| (SiteId::from_raw(i as u32), s))
    }

    pub fn site_count(&self) -> usize {
        self.sites.len()
    }

    pub fn site_by_name(&self, name: &str) -> Option<SiteId> {
        self.by_name.get(name).copied()
    }

    pub fn site_at(&self, loc: GridLoc) -> Option<SiteId> {
        self.by_loc.get(&loc).copied()
    }

    pub fn kind_at(&self, loc: GridLoc) -> Option<SiteKind> {
        self.site_at(loc).map(|id| self.site(id).kind)
    }

    /// Site at offset `(dx, dy)` from `origin`, if one of the same family exists.
    pub fn neighbor_site(&self, origin: SiteId, dx: i32, dy: i32) -> Option<SiteId> {
        let from = self.site(origin);
        let loc = GridLoc::new(from.loc.x + dx, from.loc.y + dy);
        self.site_at(loc)
            .filter(|id| self.site(*id).kind.family() == from.kind.family())
    }

    /// Inclusive bounding box of all site locations.
    pub fn extent(&self) -> Option<(GridLoc, GridLoc)> {
        let first = self.sites.first()?.loc;
        let (mut lo, mut hi) = (first, first);
        for site in &self.sites {
            lo.x = lo.x.min(site.loc.x);
            lo.y = lo.y.min(site.loc.y);
            hi.x = hi.x.max(site.loc.x);
            hi.y = hi.y.max(site.loc.y);
        }
        Some((lo, hi))
    }
}

// --- Site template ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PinDir {
    Input,
    Output,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BelClass {
    Lut,
    Flop,
    /// Configurable routing element: exactly one input is selected at a time.
    Mux,
}

#[derive(Debug, Clone)]
pub struct BelPinDef {
    pub name: String,
    pub dir: PinDir,
    pub wire: String,
}

#[derive(Debug, Clone)]
pub struct BelDef {
    pub name: String,
    pub class: BelClass,
    pub pins: Vec<BelPinDef>,
}

impl BelDef {
    pub fn pin(&self, name: &str) -> Option<&BelPinDef> {
        self.pins.iter().find(|p| p.name == name)
    }

    pub fn inputs(&self) -> impl Iterator<Item = &BelPinDef> {
        self.pins.iter().filter(|p| p.dir == PinDir::Input)
    }

    pub fn output(&self) -> Option<&BelPinDef> {
        self.pins.iter().find(|p| p.dir == PinDir::Output)
    }
}

/// What drives a site wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireDriver {
    SitePin(String),
    Bel { bel: String, pin: String },
    Mux(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BelPinRef {
    pub bel: String,
    pub pin: String,
}

/// Site pins are named after the site wire they sit on.
#[derive(Debug, Clone)]
pub struct SitePinDef {
    pub name: String,
    pub dir: PinDir,
}

#[derive(Debug, Default)]
pub struct SiteTemplate {
    bels: IndexMap<String, BelDef>,
    site_pins: IndexMap<String, SitePinDef>,
    drivers: HashMap<String, WireDriver>,
    sinks: HashMap<String, Vec<BelPinRef>>,
}

/// Slot letters of a logic site, lower half first.
pub const SLOT_LETTERS: [char; 8] = ['A', 'B', 'C', 'D', 'E', 'F', 'G', 'H'];

/// Control-set suffix of the half a slot letter belongs to.
pub fn half_index(letter: char) -> u8 {
    if letter > 'D' {
        2
    } else {
        1
    }
}

static LOGIC_SITE: Lazy<SiteTemplate> = Lazy::new(SiteTemplate::logic_site);
static EMPTY_SITE: Lazy<SiteTemplate> = Lazy::new(SiteTemplate::default);

impl SiteTemplate {
    fn logic_site() -> Self {
        let mut t = SiteTemplate::default();
        for half in 1..=2 {
            for ctrl in ["CLK", "CE", "SR"] {
                t.add_site_pin(&format!("{ctrl}{half}"), PinDir::Input);
            }
        }
        for l in SLOT_LETTERS {
            let h = half_index(l);
            for i in 1..=6 {
                t.add_site_pin(&format!("{l}{i}"), PinDir::Input);
            }
            t.add_site_pin(&format!("{l}X"), PinDir::Input);
            t.add_site_pin(&format!("{l}_I"), PinDir::Input);
            for out in ["_O", "MUX", "Q", "Q2"] {
                t.add_site_pin(&format!("{l}{out}"), PinDir::Output);
            }

            let o6 = format!("{l}_O");
            let o5 = format!("{l}5LUT_O5");
            let mut lut6 = vec![];
            for i in 1..=6 {
                lut6.push(input(&format!("A{i}"), &format!("{l}{i}")));
            }
            let lut5 = lut6[..5].to_vec();
            lut6.push(output("O6", &o6));
            t.add_bel(&format!("{l}6LUT"), BelClass::Lut, lut6);
            let mut lut5 = lut5;
            lut5.push(output("O5", &o5));
            t.add_bel(&format!("{l}5LUT"), BelClass::Lut, lut5);

            let ff1_d = format!("FFMUX{l}1_OUT");
            let ff2_d = format!("FFMUX{l}2_OUT");
            t.add_bel(
                &format!("FFMUX{l}1"),
                BelClass::Mux,
                vec![
                    input("BYP", &format!("{l}X")),
                    input("D6", &o6),
                    input("D5", &o5),
                    output("OUT", &ff1_d),
                ],
            );
            t.add_bel(
                &format!("FFMUX{l}2"),
                BelClass::Mux,
                vec![
                    input("BYP", &format!("{l}_I")),
                    input("D6", &o6),
                    input("D5", &o5),
                    output("OUT", &ff2_d),
                ],
            );
            t.add_bel(
                &format!("OUTMUX{l}"),
                BelClass::Mux,
                vec![input("D6", &o6), input("D5", &o5), output("OUT", &format!("{l}MUX"))],
            );
            for (bel, d, q) in [("FF", &ff1_d, "Q"), ("FF2", &ff2_d, "Q2")] {
                t.add_bel(
                    &format!("{l}{bel}"),
                    BelClass::Flop,
                    vec![
                        input("D", d),
                        input("CK", &format!("CLK{h}")),
                        input("CE", &format!("CE{h}")),
                        input("SR", &format!("SR{h}")),
                        output("Q", &format!("{l}{q}")),
                    ],
                );
            }
        }
        t
    }

    fn add_site_pin(&mut self, name: &str, dir: PinDir) {
        if dir == PinDir::Input {
            self.drivers
                .insert(name.to_string(), WireDriver::SitePin(name.to_string()));
        }
        self.site_pins.insert(
            name.to_string(),
            SitePinDef {
                name: name.to_string(),
                dir,
            },
        );
    }

    fn add_bel(&mut self, name: &str, class: BelClass, pins: Vec<BelPinDef>) {
        for pin in &pins {
            match pin.dir {
                PinDir::Input => self
                    .sinks
                    .entry(pin.wire.clone())
                    .or_default()
                    .push(BelPinRef {
                        bel: name.to_string(),
                        pin: pin.name.clone(),
                    }),
                PinDir::Output => {
                    let driver = if class == BelClass::Mux {
                        WireDriver::Mux(name.to_string())
                    } else {
                        WireDriver::Bel {
                            bel: name.to_string(),
                            pin: pin.name.clone(),
                        }
                    };
                    self.drivers.insert(pin.wire.clone(), driver);
                }
            }
        }
        self.bels.insert(
            name.to_string(),
            BelDef {
                name: name.to_string(),
                class,
                pins,
            },
        );
    }

    pub fn bel(&self, name: &str) -> Option<&BelDef> {
        self.bels.get(name)
    }

    pub fn bels(&self) -> impl Iterator<Item = &BelDef> {
        self.bels.values()
    }

    pub fn bel_pin_wire(&self, bel: &str, pin: &str) -> Option<&str> {
        self.bel(bel)?.pin(pin).map(|p| p.wire.as_str())
    }

    pub fn wire_driver(&self, wire: &str) -> Option<&WireDriver> {
        self.drivers.get(wire)
    }

    /// BEL and multiplexer input pins fed by `wire`.
    pub fn wire_sinks(&self, wire: &str) -> &[BelPinRef] {
        self.sinks.get(wire).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn site_pin(&self, name: &str) -> Option<&SitePinDef> {
        self.site_pins.get(name)
    }

    /// Output wire of a routing multiplexer.
    pub fn mux_output_wire(&self, mux: &str) -> Option<&str> {
        self.bel(mux)
            .filter(|b| b.class == BelClass::Mux)?
            .output()
            .map(|p| p.wire.as_str())
    }

    /// First input site pin that can reach `bel`/`pin` through multiplexers.
    pub fn site_pin_source(&self, bel: &str, pin: &str) -> Option<String> {
        let wire = self.bel_pin_wire(bel, pin)?;
        self.site_pin_feeding(wire, 0)
    }

    fn site_pin_feeding(&self, wire: &str, depth: usize) -> Option<String> {
        if depth > 4 {
            return None;
        }
        match self.wire_driver(wire)? {
            WireDriver::SitePin(name) => Some(name.clone()),
            WireDriver::Bel { .. } => None,
            WireDriver::Mux(mux) => self
                .bel(mux)?
                .inputs()
                .find_map(|input| self.site_pin_feeding(&input.wire, depth + 1)),
        }
    }

    /// Clock-enable and set/reset wires of a flip-flop BEL.
    pub fn flop_control_wires(&self, flop: &str) -> Option<(&str, &str)> {
        let bel = self.bel(flop).filter(|b| b.class == BelClass::Flop)?;
        Some((bel.pin("CE")?.wire.as_str(), bel.pin("SR")?.wire.as_str()))
    }
}

fn input(name: &str, wire: &str) -> BelPinDef {
    BelPinDef {
        name: name.to_string(),
        dir: PinDir::Input,
        wire: wire.to_string(),
    }
}

fn output(name: &str, wire: &str) -> BelPinDef {
    BelPinDef {
        name: name.to_string(),
        dir: PinDir::Output,
        wire: wire.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mixed_device() -> Device {
        Device::grid("test", 4, 3, |loc| match loc.x {
            2 => Some(SiteKind::Bram),
            1 => Some(SiteKind::SliceM),
            _ => Some(SiteKind::SliceL),
        })
    }

    #[test]
    fn grid_names_and_lookup() {
        let device = mixed_device();
        assert_eq!(device.site_count(), 12);
        let id = device.site_by_name("SLICE_X3Y1").unwrap();
        assert_eq!(device.site(id).loc, GridLoc::new(3, 1));
        assert_eq!(device.kind_at(GridLoc::new(2, 0)), Some(SiteKind::Bram));
        assert_eq!(device.kind_at(GridLoc::new(9, 9)), None);
    }

    #[test]
    fn neighbor_stays_in_family() {
        let device = mixed_device();
        let origin = device.site_by_name("SLICE_X0Y0").unwrap();
        assert_eq!(
            device.neighbor_site(origin, 1, 0),
            device.site_by_name("SLICE_X1Y0")
        );
        assert_eq!(device.neighbor_site(origin, 2, 0), None);
        assert_eq!(device.neighbor_site(origin, -1, 0), None);
    }

    #[test]
    fn device_serde_rebuilds_indices() {
        let device = mixed_device();
        let json = serde_json::to_string(&device).unwrap();
        let back: Device = serde_json::from_str(&json).unwrap();
        assert_eq!(back, device);
        assert_eq!(
            back.site_at(GridLoc::new(3, 2)),
            device.site_by_name("SLICE_X3Y2")
        );
    }

    #[test]
    fn logic_template_shape() {
        let t = SiteKind::SliceL.template();
        assert_eq!(t.bel_pin_wire("C6LUT", "A3"), Some("C3"));
        assert_eq!(t.bel_pin_wire("C5LUT", "O5"), Some("C5LUT_O5"));
        assert_eq!(t.site_pin_source("AFF", "D").as_deref(), Some("AX"));
        assert_eq!(t.site_pin_source("AFF2", "D").as_deref(), Some("A_I"));
        assert_eq!(t.flop_control_wires("EFF"), Some(("CE2", "SR2")));
        assert_eq!(t.flop_control_wires("DFF"), Some(("CE1", "SR1")));
        assert_eq!(t.mux_output_wire("OUTMUXB"), Some("BMUX"));
        assert_eq!(
            t.wire_driver("FFMUXA1_OUT"),
            Some(&WireDriver::Mux("FFMUXA1".to_string()))
        );
        assert!(SiteKind::Bram.template().bel("AFF").is_none());
    }

    #[test]
    fn lut_output_feeds_direct_pin_and_muxes() {
        let t = SiteKind::SliceL.template();
        let sinks: Vec<&str> = t.wire_sinks("A_O").iter().map(|s| s.bel.as_str()).collect();
        assert_eq!(sinks, vec!["FFMUXA1", "FFMUXA2", "OUTMUXA"]);
        assert!(t.site_pin("A_O").is_some());
    }
}
