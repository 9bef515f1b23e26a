//! Engineering-change operations on a placed and routed design.
//!
//! [`surgery`] holds the primitives: connecting and disconnecting pins,
//! creating and removing cells, with the physical implementation kept in
//! step with the logical netlist. [`placement`] finds free resources near a
//! location. The remaining modules are recipes built from the two:
//!
//! * [`fanout`] replicates the driver of a high fan-out net;
//! * [`lut_fusion`] collapses a chain of lookup tables into one;
//! * [`tie_off`] drives top-level inputs from constant tables.

pub mod error;
pub mod fanout;
pub mod kmeans;
pub mod lut_equation;
pub mod lut_fusion;
pub mod placement;
pub mod surgery;
pub mod tie_off;

pub use error::{EcoError, Result};
pub use fanout::{cut_fanout, FanoutConfig, FanoutResult};
pub use kmeans::{kmeans_clustering, Cluster};
pub use lut_equation::{equation_from_init, init_from_equation, Expr};
pub use lut_fusion::fuse_lut_input_cone;
pub use placement::{find_empty_site_near, spiral_from, Region, SpareCapacityFinder};
pub use surgery::{
    connect_pin_paths, connect_pins, create_cell_instances, create_nets, disconnect_pin_paths,
    disconnect_pins, insert_inline_cell_on_input, remove_cell_instances, remove_cell_paths,
    EcoConfig, NetPins,
};
pub use tie_off::{TieOffConfig, TieOffInserter};
