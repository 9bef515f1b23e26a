use thiserror::Error;

/// Topology and model errors raised by the netlist model.
#[derive(Debug, Error)]
pub enum NetlistError {
    #[error("Instance not found: {0}")]
    InstanceNotFound(String),

    #[error("Net not found: {0}")]
    NetNotFound(String),

    #[error("Pin not found: {0}")]
    PinNotFound(String),

    #[error("Port '{port}' not found on cell type '{cell_type}'")]
    PortNotFound { port: String, cell_type: String },

    #[error("Unknown cell type: {0}")]
    UnknownCellType(String),

    #[error("Physical cell not found: {0}")]
    CellNotFound(String),

    #[error("Site not found: {0}")]
    SiteNotFound(String),

    #[error("Instance '{0}' already exists")]
    InstanceExists(String),

    #[error("Net '{0}' already exists")]
    NetExists(String),

    #[error("Cell '{0}' already exists")]
    CellExists(String),

    #[error("BEL {bel} of site {site} is already occupied by {occupant}")]
    BelOccupied {
        site: String,
        bel: String,
        occupant: String,
    },

    #[error("BEL {bel} does not exist in site {site}")]
    BelNotFound { site: String, bel: String },

    #[error("Cell '{cell}' cannot be placed on BEL {bel}")]
    IncompatibleBel { cell: String, bel: String },

    #[error("Site pin {pin} of {site} is already in use")]
    SitePinExists { site: String, pin: String },

    #[error("Pin {pin} is not visible from the scope of net {net}")]
    NotInScope { pin: String, net: String },

    #[error("Instance '{0}' is a leaf and cannot own nets or children")]
    LeafScope(String),

    #[error("Failed to (de)serialize design snapshot: {0}")]
    Snapshot(#[from] serde_json::Error),

    #[error("Failed to access design snapshot: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = NetlistError> = std::result::Result<T, E>;
