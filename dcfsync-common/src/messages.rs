//! CAN message types

use snafu::Snafu;

/// A CAN identifier, either 11-bit standard or 29-bit extended
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CanId {
    /// A 29-bit extended ID
    Extended(u32),
    /// An 11-bit standard ID
    Std(u16),
}

impl CanId {
    /// Create an extended ID
    pub const fn extended(id: u32) -> CanId {
        CanId::Extended(id)
    }

    /// Create a standard ID
    pub const fn std(id: u16) -> CanId {
        CanId::Std(id)
    }

    /// Get the raw ID value
    pub fn raw(&self) -> u32 {
        match self {
            CanId::Extended(id) => *id,
            CanId::Std(id) => *id as u32,
        }
    }

    /// Returns true if this is an extended ID
    pub fn is_extended(&self) -> bool {
        match self {
            CanId::Extended(_) => true,
            CanId::Std(_) => false,
        }
    }
}

const MAX_DATA_LENGTH: usize = 8;

/// A classic CAN data frame
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CanMessage {
    /// Frame payload. Only the first `dlc` bytes are valid.
    pub data: [u8; MAX_DATA_LENGTH],
    /// Number of valid payload bytes
    pub dlc: u8,
    /// Frame identifier
    pub id: CanId,
}

impl Default for CanMessage {
    fn default() -> Self {
        Self {
            data: [0; MAX_DATA_LENGTH],
            dlc: 0,
            id: CanId::Std(0),
        }
    }
}

impl CanMessage {
    /// Create a new message
    ///
    /// Data longer than 8 bytes is truncated.
    pub fn new(id: CanId, data: &[u8]) -> Self {
        let dlc = data.len().min(MAX_DATA_LENGTH);
        let mut buf = [0u8; MAX_DATA_LENGTH];
        buf[0..dlc].copy_from_slice(&data[0..dlc]);

        Self {
            id,
            dlc: dlc as u8,
            data: buf,
        }
    }

    /// Get the message ID
    pub fn id(&self) -> CanId {
        self.id
    }

    /// Get the valid portion of the payload
    pub fn data(&self) -> &[u8] {
        &self.data[0..self.dlc as usize]
    }
}

/// Bus level errors reported by a CAN controller
#[derive(Clone, Copy, Debug, PartialEq, Eq, Snafu)]
pub enum CanError {
    /// The controller detected a protocol violation (bit, stuff, form or CRC error)
    Protocol,
    /// No acknowledgement was received
    Ack,
    /// The controller went bus-off
    BusOff,
    /// A generic bus error
    Bus,
    /// Any other error, identified by its raw error class bits
    #[snafu(display("CAN error (class bits {bits:#x})"))]
    Other {
        /// The raw error bits
        bits: u32,
    },
}

impl CanError {
    /// Decode a CAN error from the error class bits reported by the driver
    pub fn from_raw(bits: u32) -> Self {
        if bits & 0x08 != 0 {
            CanError::Protocol
        } else if bits & 0x20 != 0 {
            CanError::Ack
        } else if bits & 0x40 != 0 {
            CanError::BusOff
        } else if bits & 0x80 != 0 {
            CanError::Bus
        } else {
            CanError::Other { bits }
        }
    }
}

/// The default base ID for sending SDO requests (server node ID is added)
pub const SDO_REQ_BASE: u16 = 0x600;
/// The default base ID for sending SDO responses (server node ID is added)
pub const SDO_RESP_BASE: u16 = 0x580;

/// Returns true if the message ID is an SDO request addressed to `node_id`
pub fn is_std_sdo_request(can_id: CanId, node_id: u8) -> bool {
    if let CanId::Std(id) = can_id {
        let base = id & 0xff80;
        let msg_id = id & 0x7f;
        if base == SDO_REQ_BASE && msg_id == node_id as u16 {
            return true;
        }
    }
    false
}

/// Errors which can occur when interpreting a CAN message
#[derive(Debug, Clone, Copy, PartialEq, Snafu)]
pub enum MessageError {
    /// The message payload is shorter than required
    MessageTooShort,
    /// The message contents could not be interpreted
    #[snafu(display("Malformed message with ID {cob_id:?}"))]
    MalformedMsg {
        /// ID of the offending message
        cob_id: CanId,
    },
    /// A command specifier field contained an unknown value
    #[snafu(display("Unexpected command specifier: {value}"))]
    InvalidCommandSpecifier {
        /// The raw specifier value
        value: u8,
    },
}
