//! Constants defining standard object indices and special values
//!
//!

/// Object indices for standard objects
pub mod object_ids {
    /// First RPDO communication parameter record
    pub const RPDO_COMM_BASE: u16 = 0x1400;
    /// First TPDO communication parameter record
    pub const TPDO_COMM_BASE: u16 = 0x1800;
}

/// Sub indices of the PDO communication and mapping parameter objects
pub mod pdo_subs {
    /// Highest sub index / number of mapped objects
    pub const COUNT: u8 = 0;
    /// COB-ID used by the PDO
    pub const COB_ID: u8 = 1;
    /// Transmission type
    pub const TRANSMISSION_TYPE: u8 = 2;
    /// Inhibit time, in multiples of 100us
    pub const INHIBIT_TIME: u8 = 3;
    /// Event timer, in ms
    pub const EVENT_TIMER: u8 = 5;
    /// SYNC start value
    pub const SYNC_START: u8 = 6;
}

/// Special values used to access standard objects
pub mod values {
    /// Number of PDO slots which can exist for each direction
    pub const MAX_PDO_SLOTS: u16 = 512;
    /// Offset from a PDO communication object to its mapping object
    pub const PDO_MAP_OFFSET: u16 = 0x200;
    /// Maximum number of objects which can be mapped to a single classic CAN PDO
    pub const MAX_PDO_MAPPINGS: usize = 8;
    /// COB-ID bit which marks a PDO as invalid (disabled)
    pub const COB_ID_INVALID: u32 = 1 << 31;
}
