//! Device grid and dual logical/physical netlist model.
//!
//! The central structure is [`Design`], which owns:
//!
//! * a shared, immutable [`Device`] – the grid of sites and the fixed
//!   internal shape of a logic site;
//! * a [`Netlist`] – the hierarchical logical description (instances,
//!   ports, nets);
//! * the physical state – placed cells, site instances with their in-site
//!   routing, terminal pins and routed physical nets.
//!
//! Every structure is serialisable with `serde` so that a design can be
//! stored or transferred as a JSON snapshot.

pub mod design;
pub mod device;
pub mod error;
pub mod ids;
pub mod netlist;

pub use design::{
    Cell, Design, NetKind, PendingRemovals, PhysNet, Pip, PipIntent, SiteInst, SitePinInst,
    SitePinRef, GND_NET, VCC_NET,
};
pub use device::{Device, GridLoc, Site, SiteKind, LOGIC_KINDS, SLOT_LETTERS};
pub use error::{NetlistError, Result};
pub use ids::{CellId, InstId, NetId, PhysNetId, SiteId, SiteInstId, SitePinId};
pub use netlist::{
    CellType, HierPin, Instance, LogicalNet, Netlist, PinName, PortDef, PortDirection, Primitive,
};
