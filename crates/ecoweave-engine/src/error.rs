use ecoweave_netlist::NetlistError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EcoError {
    #[error(transparent)]
    Netlist(#[from] NetlistError),

    #[error("More than one source pin found on net {net}")]
    MultipleSources { net: String },

    #[error("Net {net} must have exactly one source, found {found}")]
    NotExactlyOneSource { net: String, found: usize },

    #[error("Physical cell corresponding to {0} not found")]
    PhysicalCellMissing(String),

    #[error("Cell {0} is not placed")]
    UnplacedCell(String),

    #[error("Site pin {site_pin} cannot be used to connect {pin} since it is also used by {other} on another net")]
    SitePinConflict {
        site_pin: String,
        pin: String,
        other: String,
    },

    #[error("Unable to {action} intra-site path {from} -> {to} in {site}")]
    IntraSiteRouting {
        action: &'static str,
        site: String,
        from: String,
        to: String,
    },

    #[error("Unable to route pin {pin} out of site {site}")]
    NoExitPin { pin: String, site: String },

    #[error("Unsupported LUT optimization: cone has {found} inputs, 6 maximum")]
    TooManyInputs { found: usize },

    #[error("Unsupported driver {cell} of type {cell_type}")]
    UnsupportedDriver { cell: String, cell_type: String },

    #[error("Pin {0} is not an input")]
    NotAnInput(String),

    #[error("Pin {0} is not connected to a net")]
    Unconnected(String),

    #[error("Net {0} has no source")]
    NoSource(String),

    #[error("No free placement found for {0}")]
    NoPlacement(String),

    #[error("Invalid LUT equation '{equation}': {reason}")]
    Equation { equation: String, reason: String },
}

pub type Result<T, E = EcoError> = std::result::Result<T, E>;
