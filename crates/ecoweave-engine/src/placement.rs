//! Incremental search for free placement resources near a hint location.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use ecoweave_netlist::device::half_index;
use ecoweave_netlist::{
    Design, Device, GridLoc, PendingRemovals, PhysNetId, PipIntent, SiteId, SiteInstId, SiteKind,
    SitePinRef, SLOT_LETTERS,
};

/// Upper bound on spiral steps before giving up on finding another site.
const SPIRAL_WATCHDOG: u32 = 1_000_000;

/// Set of inclusive grid rectangles used to bound a search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Region {
    rects: Vec<(GridLoc, GridLoc)>,
    /// Match locations outside the rectangles instead of inside.
    pub exclude: bool,
}

impl Region {
    pub fn new(exclude: bool) -> Self {
        Self {
            rects: Vec::new(),
            exclude,
        }
    }

    pub fn with_rect(mut self, a: GridLoc, b: GridLoc) -> Self {
        let lo = GridLoc::new(a.x.min(b.x), a.y.min(b.y));
        let hi = GridLoc::new(a.x.max(b.x), a.y.max(b.y));
        self.rects.push((lo, hi));
        self
    }

    pub fn contains(&self, loc: GridLoc) -> bool {
        let inside = self
            .rects
            .iter()
            .any(|(lo, hi)| (lo.x..=hi.x).contains(&loc.x) && (lo.y..=hi.y).contains(&loc.y));
        inside != self.exclude
    }
}

/// Outward square spiral over the sites of the home site's family.
///
/// The home site is always yielded first. Each further step moves one
/// location along the current stride; strides turn left and grow by one
/// every second turn.
#[derive(Debug, Clone)]
pub struct Spiral {
    device: Arc<Device>,
    home: SiteId,
    region: Option<Region>,
    next: Option<SiteId>,
    dx: i32,
    dy: i32,
    ix: i32,
    iy: i32,
    steps: i32,
    limit: i32,
    watchdog: u32,
}

pub fn spiral_from(device: &Arc<Device>, home: SiteId, region: Option<Region>) -> Spiral {
    Spiral {
        device: Arc::clone(device),
        home,
        region,
        next: Some(home),
        dx: 0,
        dy: 0,
        ix: -1,
        iy: 0,
        steps: 0,
        limit: 1,
        watchdog: 0,
    }
}

impl Iterator for Spiral {
    type Item = SiteId;

    fn next(&mut self) -> Option<SiteId> {
        let current = self.next.take()?;
        while self.watchdog < SPIRAL_WATCHDOG {
            self.watchdog += 1;
            self.dx += self.ix;
            self.dy += self.iy;
            self.steps += 1;
            if self.steps == self.limit {
                (self.ix, self.iy) = (-self.iy, self.ix);
                self.steps = 0;
                if self.iy == 0 {
                    self.limit += 1;
                }
            }
            let Some(site) = self.device.neighbor_site(self.home, self.dx, self.dy) else {
                continue;
            };
            let loc = self.device.site(site).loc;
            if self.region.as_ref().map_or(true, |r| r.contains(loc)) {
                self.next = Some(site);
                break;
            }
        }
        Some(current)
    }
}

/// Site of a matching kind nearest (Manhattan) to the integer mean of
/// `points`.
pub fn centroid_of_points(device: &Device, points: &[GridLoc], kinds: &[SiteKind]) -> Option<SiteId> {
    if points.is_empty() {
        return None;
    }
    let n = points.len() as i64;
    let sx: i64 = points.iter().map(|p| p.x as i64).sum();
    let sy: i64 = points.iter().map(|p| p.y as i64).sum();
    let mean = GridLoc::new((sx / n) as i32, (sy / n) as i32);

    let (lo, hi) = device.extent()?;
    let max_ring = [lo, hi, GridLoc::new(lo.x, hi.y), GridLoc::new(hi.x, lo.y)]
        .iter()
        .map(|corner| corner.ring(&mean))
        .max()
        .unwrap_or(0);
    let mut best: Option<(i32, SiteId)> = None;
    for r in 0..=max_ring {
        if best.is_some_and(|(d, _)| r > d) {
            break;
        }
        for y in mean.y - r..=mean.y + r {
            for x in mean.x - r..=mean.x + r {
                let loc = GridLoc::new(x, y);
                if loc.ring(&mean) != r {
                    continue;
                }
                let Some(site) = device.site_at(loc) else {
                    continue;
                };
                if !kinds.contains(&device.site(site).kind) {
                    continue;
                }
                let d = loc.manhattan(&mean);
                if best.map_or(true, |(bd, _)| d < bd) {
                    best = Some((d, site));
                }
            }
        }
    }
    best.map(|(_, site)| site)
}

/// Centroid of every terminal of a physical net.
pub fn centroid_of_net(design: &Design, net: PhysNetId, kinds: &[SiteKind]) -> Option<SiteId> {
    let points: Vec<GridLoc> = design
        .net(net)
        .pins
        .iter()
        .filter_map(|p| design.site_pin_loc(*p))
        .collect();
    centroid_of_points(design.device(), &points, kinds)
}

/// Per-batch search session remembering exhausted sites.
///
/// A site found without a free LUT pair is never offered again; the same
/// holds for flip-flops per clock, enable and reset nets. Terminals consumed
/// by bounce detours are collected once at construction.
#[derive(Debug, Default)]
pub struct SpareCapacityFinder {
    lut_less: HashSet<SiteId>,
    /// Keyed by clock, enable and reset net.
    flop_less: HashMap<(PhysNetId, PhysNetId, PhysNetId), HashSet<SiteId>>,
    blocked_bounces: HashSet<SitePinRef>,
}

impl SpareCapacityFinder {
    pub fn new(design: &Design) -> Self {
        let blocked_bounces = design
            .nets()
            .flat_map(|(_, net)| net.pips.iter())
            .filter(|pip| pip.intent == PipIntent::PinBounce)
            .filter_map(|pip| pip.site_pin.clone())
            .collect();
        Self {
            blocked_bounces,
            ..Default::default()
        }
    }

    pub fn is_bounce_blocked(&self, pin: &SitePinRef) -> bool {
        self.blocked_bounces.contains(pin)
    }

    /// First primary flip-flop BEL of `si` able to take a new flop clocked
    /// by `clk`. Absent enable and reset default to the power and ground
    /// nets. Searches given `pending` removals are neither answered from
    /// nor recorded in the memo.
    pub fn find_unused_flop(
        &mut self,
        design: &Design,
        si: SiteInstId,
        clk: PhysNetId,
        ce: Option<PhysNetId>,
        sr: Option<PhysNetId>,
        pending: Option<&PendingRemovals>,
    ) -> Option<String> {
        let s = design.site_inst(si);
        let want_ce = ce.unwrap_or_else(|| design.vcc_net());
        let want_sr = sr.unwrap_or_else(|| design.gnd_net());
        let key = (clk, want_ce, want_sr);
        if pending.is_none() && self.flop_less.get(&key).is_some_and(|sites| sites.contains(&s.site)) {
            log::debug!("{} already known to have no free flop for these controls", s.name);
            return None;
        }
        let template = design.template(si);
        for letter in SLOT_LETTERS {
            let bel = format!("{letter}FF");
            if s.cells.contains_key(&bel) {
                continue;
            }
            let Some(bypass) = template.site_pin_source(&bel, "D") else {
                continue;
            };
            if s.pins.contains_key(&bypass) {
                continue;
            }
            if self.blocked_bounces.contains(&SitePinRef {
                site: s.site,
                pin: bypass,
            }) {
                continue;
            }
            let clk_pin = format!("CLK{}", half_index(letter));
            if let Some(spi) = s.pins.get(&clk_pin) {
                if let Some(existing) = design.site_pin(*spi).net.filter(|n| *n != clk) {
                    let leaving = pending
                        .and_then(|p| p.get(&existing))
                        .is_some_and(|pins| pins.contains(spi));
                    if !leaving {
                        continue;
                    }
                }
            }
            let Some((ce_wire, sr_wire)) = template.flop_control_wires(&bel) else {
                continue;
            };
            if design.wire_net(si, ce_wire).is_some_and(|n| n != want_ce) {
                continue;
            }
            if design.wire_net(si, sr_wire).is_some_and(|n| n != want_sr) {
                continue;
            }
            return Some(bel);
        }
        if pending.is_none() {
            self.flop_less.entry(key).or_default().insert(s.site);
        }
        None
    }

    /// First LUT pair of `si` with both halves free and nothing on its
    /// output; returns the 6-input BEL name.
    pub fn find_unused_lut6(&mut self, design: &Design, si: SiteInstId) -> Option<String> {
        let s = design.site_inst(si);
        if self.lut_less.contains(&s.site) {
            log::debug!("{} already known to have no free LUT", s.name);
            return None;
        }
        for letter in SLOT_LETTERS {
            let lut6 = format!("{letter}6LUT");
            if s.cells.contains_key(&lut6) || s.cells.contains_key(&format!("{letter}5LUT")) {
                continue;
            }
            let output = format!("{letter}_O");
            if s.pins.contains_key(&output) || design.wire_net(si, &output).is_some() {
                continue;
            }
            return Some(lut6);
        }
        self.lut_less.insert(s.site);
        None
    }

    /// Spirals out from `home` for a flip-flop slot; a site nobody uses yet
    /// offers its first flop.
    #[allow(clippy::too_many_arguments)]
    pub fn find_flop_near(
        &mut self,
        design: &Design,
        home: SiteId,
        region: Option<Region>,
        clk: PhysNetId,
        ce: Option<PhysNetId>,
        sr: Option<PhysNetId>,
        pending: Option<&PendingRemovals>,
    ) -> Option<(SiteId, String)> {
        spiral_from(design.device(), home, region).find_map(|site| {
            if !design.device().site(site).kind.is_logic() {
                return None;
            }
            match design.site_inst_at(site) {
                None => Some((site, "AFF".to_string())),
                Some(si) => self
                    .find_unused_flop(design, si, clk, ce, sr, pending)
                    .map(|bel| (site, bel)),
            }
        })
    }

    /// Spirals out from `home` for a free LUT pair.
    pub fn find_lut6_near(&mut self, design: &Design, home: SiteId, region: Option<Region>) -> Option<(SiteId, String)> {
        spiral_from(design.device(), home, region).find_map(|site| {
            if !design.device().site(site).kind.is_logic() {
                return None;
            }
            match design.site_inst_at(site) {
                None => Some((site, "A6LUT".to_string())),
                Some(si) => self.find_unused_lut6(design, si).map(|bel| (site, bel)),
            }
        })
    }
}

/// First site of the spiral with no site instance at all.
pub fn find_empty_site_near(design: &Design, home: SiteId, region: Option<Region>) -> Option<SiteId> {
    spiral_from(design.device(), home, region)
        .find(|site| design.device().site(*site).kind.is_logic() && design.site_inst_at(*site).is_none())
}
