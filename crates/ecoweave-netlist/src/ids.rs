//! Opaque arena identifiers.
//!
//! Every entity of the netlist model lives in an `IndexMap` keyed by one of
//! these `u32` newtypes. References between entities are always ids, never
//! owning handles, so removing an entity is one map deletion plus index
//! cleanup.

use serde::{Deserialize, Serialize};

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
        pub struct $name(u32);

        impl $name {
            /// Creates an id from a raw `u32` index.
            pub fn from_raw(index: u32) -> Self {
                Self(index)
            }

            /// Returns the raw `u32` index.
            pub fn as_raw(self) -> u32 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id!(
    /// A site of the device grid.
    SiteId
);

define_id!(
    /// A logical cell instance (leaf or hierarchical).
    InstId
);

define_id!(
    /// A logical net inside one hierarchy scope.
    NetId
);

define_id!(
    /// A placed or unplaced physical cell.
    CellId
);

define_id!(
    /// A site in use by the design.
    SiteInstId
);

define_id!(
    /// A terminal pin binding a physical net to a site pin.
    SitePinId
);

define_id!(
    /// A physical (routed) net.
    PhysNetId
);

/// Monotonic id source shared by the arenas of one model.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdAllocator {
    next: u32,
}

impl IdAllocator {
    pub fn next_raw(&mut self) -> u32 {
        let id = self.next;
        self.next += 1;
        id
    }
}
