//! Model of the PDO communication and mapping parameters of a node
//!
//! Each direction has up to 512 slots. Slot `n` (1-based) is described by a communication record
//! at `base + n - 1` and a mapping array at `base + n - 1 + 0x200`. A slot exists only when its
//! communication record is present in the object dictionary.
//!
//! These objects describe live communication channels, so they are never downloaded one entry at a
//! time. Instead [PdoMappingModel::save] writes each slot as a unit, disabling the PDO while its
//! mapping is changed.
use std::{collections::BTreeSet, time::Duration};

use dcfsync_common::{
    constants::{
        object_ids::{RPDO_COMM_BASE, TPDO_COMM_BASE},
        pdo_subs,
        values::{COB_ID_INVALID, MAX_PDO_MAPPINGS, MAX_PDO_SLOTS, PDO_MAP_OFFSET},
    },
    objects::ObjectId,
};
use snafu::{OptionExt, ResultExt};

use crate::{
    node::Node,
    object_dict::ObjectDictionary,
    sdo_client::SdoTransfer,
    sync::{PdoSnafu, SyncError, UnsupportedOperationSnafu},
};

const LOG_TARGET: &str = "dcfsync::pdo";

/// The direction of a PDO, from the point of view of the device
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PdoDirection {
    /// RPDO, received by the device
    Receive,
    /// TPDO, transmitted by the device
    Transmit,
}

impl PdoDirection {
    /// Index of the first communication record
    pub fn comm_base(&self) -> u16 {
        match self {
            PdoDirection::Receive => RPDO_COMM_BASE,
            PdoDirection::Transmit => TPDO_COMM_BASE,
        }
    }
}

impl core::fmt::Display for PdoDirection {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            PdoDirection::Receive => write!(f, "RPDO"),
            PdoDirection::Transmit => write!(f, "TPDO"),
        }
    }
}

/// A single object mapped into a PDO
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PdoMapEntry {
    /// Index of the mapped object
    pub index: u16,
    /// Sub index of the mapped object
    pub sub: u8,
    /// Size of the mapped object in bits
    pub bits: u8,
}

impl PdoMapEntry {
    /// Encode as the 32-bit value stored in a mapping array
    pub fn to_raw(&self) -> u32 {
        ((self.index as u32) << 16) | ((self.sub as u32) << 8) | self.bits as u32
    }

    /// Decode from the 32-bit value stored in a mapping array
    pub fn from_raw(raw: u32) -> Self {
        Self {
            index: (raw >> 16) as u16,
            sub: (raw >> 8) as u8,
            bits: raw as u8,
        }
    }
}

/// The configuration of one PDO
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PdoSlot {
    /// 1-based slot number
    pub number: u16,
    /// Index of the communication record
    pub com_index: u16,
    /// Index of the mapping array
    pub map_index: u16,
    /// COB-ID, including the valid/RTR/frame flags
    pub cob_id: u32,
    /// Transmission type, if the record defines it
    pub transmission_type: Option<u8>,
    /// Inhibit time in units of 100us, if the record defines it
    pub inhibit_time: Option<u16>,
    /// Event timer in ms, if the record defines it
    pub event_timer: Option<u16>,
    /// SYNC start value, if the record defines it
    pub sync_start: Option<u8>,
    /// Mapped objects. Empty when the mapping array is not defined.
    pub mappings: Vec<PdoMapEntry>,
    /// Whether the mapping array is present in the dictionary
    pub has_mapping: bool,
}

impl PdoSlot {
    /// Returns true if the PDO is enabled
    pub fn enabled(&self) -> bool {
        self.cob_id & COB_ID_INVALID == 0
    }
}

fn u32_from_le(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    let n = bytes.len().min(4);
    buf[..n].copy_from_slice(&bytes[..n]);
    u32::from_le_bytes(buf)
}

/// The slots of one PDO direction, and the sequence for transferring them to and from a node
#[derive(Clone, Debug, PartialEq)]
pub struct PdoMappingModel {
    direction: PdoDirection,
    slots: Vec<PdoSlot>,
}

impl PdoMappingModel {
    /// Scan the dictionary for the slots of `direction`
    ///
    /// The in-memory state of each slot is initialized from the dictionary values.
    pub fn from_dictionary(od: &ObjectDictionary, direction: PdoDirection) -> Self {
        let value = |index: u16, sub: u8| od.get(index, sub).and_then(|e| e.value.as_u64());

        let mut slots = Vec::new();
        for n in 0..MAX_PDO_SLOTS {
            let com_index = direction.comm_base() + n;
            if !od.contains(com_index) {
                continue;
            }
            let map_index = com_index + PDO_MAP_OFFSET;
            let has_mapping = od.contains(map_index);
            let count = value(map_index, pdo_subs::COUNT).unwrap_or(0) as usize;
            let mappings = (1..=count.min(MAX_PDO_MAPPINGS) as u8)
                .map(|sub| PdoMapEntry::from_raw(value(map_index, sub).unwrap_or(0) as u32))
                .collect();

            slots.push(PdoSlot {
                number: n + 1,
                com_index,
                map_index,
                cob_id: value(com_index, pdo_subs::COB_ID)
                    .map(|v| v as u32)
                    .unwrap_or(COB_ID_INVALID),
                transmission_type: value(com_index, pdo_subs::TRANSMISSION_TYPE).map(|v| v as u8),
                inhibit_time: value(com_index, pdo_subs::INHIBIT_TIME).map(|v| v as u16),
                event_timer: value(com_index, pdo_subs::EVENT_TIMER).map(|v| v as u16),
                sync_start: value(com_index, pdo_subs::SYNC_START).map(|v| v as u8),
                mappings,
                has_mapping,
            });
        }
        log::debug!(target: LOG_TARGET, "Found {} {direction} slots", slots.len());
        Self { direction, slots }
    }

    /// The direction of the modeled PDOs
    pub fn direction(&self) -> PdoDirection {
        self.direction
    }

    /// All existing slots, in slot order
    pub fn slots(&self) -> &[PdoSlot] {
        &self.slots
    }

    /// Get a slot by its 1-based number
    pub fn slot(&self, number: u16) -> Option<&PdoSlot> {
        self.slots.iter().find(|s| s.number == number)
    }

    /// Mutable access to a slot by its 1-based number
    pub fn slot_mut(&mut self, number: u16) -> Option<&mut PdoSlot> {
        self.slots.iter_mut().find(|s| s.number == number)
    }

    /// The set of object indices managed by this model
    pub fn managed_indices(&self) -> BTreeSet<u16> {
        self.slots
            .iter()
            .flat_map(|s| [s.com_index, s.map_index])
            .collect()
    }

    fn write(
        &self,
        sdo: &mut dyn SdoTransfer,
        slot: &PdoSlot,
        index: u16,
        sub: u8,
        data: &[u8],
        timeout: Duration,
    ) -> Result<(), SyncError> {
        sdo.download(index, sub, data, timeout).context(PdoSnafu {
            direction: self.direction,
            slot: slot.number,
            id: ObjectId { index, sub },
        })
    }

    fn read(
        &self,
        sdo: &mut dyn SdoTransfer,
        slot: &PdoSlot,
        index: u16,
        sub: u8,
        timeout: Duration,
    ) -> Result<u32, SyncError> {
        sdo.upload(index, sub, timeout)
            .map(|data| u32_from_le(&data))
            .context(PdoSnafu {
                direction: self.direction,
                slot: slot.number,
                id: ObjectId { index, sub },
            })
    }

    /// Write the complete configuration of every slot to a node
    ///
    /// Each PDO is disabled while its parameters and mapping are updated, and the final COB-ID is
    /// written last. Communication fields without a value are not written.
    pub fn save(&self, sdo: &mut dyn SdoTransfer, timeout: Duration) -> Result<(), SyncError> {
        for slot in &self.slots {
            log::info!(target: LOG_TARGET, "Saving {} {}", self.direction, slot.number);
            let com = slot.com_index;
            let disabled = slot.cob_id | COB_ID_INVALID;
            self.write(sdo, slot, com, pdo_subs::COB_ID, &disabled.to_le_bytes(), timeout)?;
            if let Some(tt) = slot.transmission_type {
                self.write(sdo, slot, com, pdo_subs::TRANSMISSION_TYPE, &[tt], timeout)?;
            }
            if let Some(inhibit) = slot.inhibit_time {
                let data = inhibit.to_le_bytes();
                self.write(sdo, slot, com, pdo_subs::INHIBIT_TIME, &data, timeout)?;
            }
            if let Some(timer) = slot.event_timer {
                let data = timer.to_le_bytes();
                self.write(sdo, slot, com, pdo_subs::EVENT_TIMER, &data, timeout)?;
            }
            if let Some(start) = slot.sync_start {
                self.write(sdo, slot, com, pdo_subs::SYNC_START, &[start], timeout)?;
            }

            if slot.has_mapping {
                let map = slot.map_index;
                self.write(sdo, slot, map, pdo_subs::COUNT, &[0], timeout)?;
                for (i, entry) in slot.mappings.iter().enumerate() {
                    let data = entry.to_raw().to_le_bytes();
                    self.write(sdo, slot, map, i as u8 + 1, &data, timeout)?;
                }
                let count = slot.mappings.len() as u8;
                self.write(sdo, slot, map, pdo_subs::COUNT, &[count], timeout)?;
            }

            self.write(sdo, slot, com, pdo_subs::COB_ID, &slot.cob_id.to_le_bytes(), timeout)?;
        }
        Ok(())
    }

    /// Read the complete configuration of every slot from a node
    ///
    /// A slot is only updated once all of its fields were read.
    pub fn load(&mut self, sdo: &mut dyn SdoTransfer, timeout: Duration) -> Result<(), SyncError> {
        for i in 0..self.slots.len() {
            let slot = &self.slots[i];
            let com = slot.com_index;
            let mut updated = slot.clone();

            updated.cob_id = self.read(sdo, slot, com, pdo_subs::COB_ID, timeout)?;
            if slot.transmission_type.is_some() {
                let tt = self.read(sdo, slot, com, pdo_subs::TRANSMISSION_TYPE, timeout)?;
                updated.transmission_type = Some(tt as u8);
            }
            if slot.inhibit_time.is_some() {
                let inhibit = self.read(sdo, slot, com, pdo_subs::INHIBIT_TIME, timeout)?;
                updated.inhibit_time = Some(inhibit as u16);
            }
            if slot.event_timer.is_some() {
                let timer = self.read(sdo, slot, com, pdo_subs::EVENT_TIMER, timeout)?;
                updated.event_timer = Some(timer as u16);
            }
            if slot.sync_start.is_some() {
                let start = self.read(sdo, slot, com, pdo_subs::SYNC_START, timeout)?;
                updated.sync_start = Some(start as u8);
            }
            if slot.has_mapping {
                let map = slot.map_index;
                let count = self.read(sdo, slot, map, pdo_subs::COUNT, timeout)? as usize;
                updated.mappings.clear();
                for sub in 1..=count.min(MAX_PDO_MAPPINGS) as u8 {
                    let raw = self.read(sdo, slot, map, sub, timeout)?;
                    updated.mappings.push(PdoMapEntry::from_raw(raw));
                }
            }
            self.slots[i] = updated;
        }
        Ok(())
    }

    /// Disable transmission of every PDO on a live node
    ///
    /// Fails with [SyncError::UnsupportedOperation] if the node has no PDO control.
    pub fn stop(&self, node: &mut dyn Node, timeout: Duration) -> Result<(), SyncError> {
        let control = node.pdo_control().context(UnsupportedOperationSnafu {
            operation: "stop PDOs",
        })?;
        for slot in &self.slots {
            control
                .disable_pdo(slot.com_index, slot.cob_id, timeout)
                .context(PdoSnafu {
                    direction: self.direction,
                    slot: slot.number,
                    id: ObjectId {
                        index: slot.com_index,
                        sub: pdo_subs::COB_ID,
                    },
                })?;
        }
        Ok(())
    }
}

/// Union of the managed indices of several models
pub fn managed_indices<'a>(models: impl IntoIterator<Item = &'a PdoMappingModel>) -> BTreeSet<u16> {
    models
        .into_iter()
        .flat_map(|m| m.managed_indices())
        .collect()
}
