//! SDO protocol message definitions and codec
//!
//! Only expedited and segmented transfers are supported. Block transfers are not used by any
//! dcfsync component.
use crate::messages::{CanId, CanMessage, MessageError};

/// Specifies the possible server command specifier (SCS) values in SDO response packets
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServerCommand {
    /// Upload segment response
    SegmentUpload = 0,
    /// Download segment confirmation
    SegmentDownload = 1,
    /// Initiate upload response
    Upload = 2,
    /// Acknowledge a download command
    Download = 3,
    /// Abort transfer
    Abort = 4,
}

impl TryFrom<u8> for ServerCommand {
    type Error = MessageError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use ServerCommand::*;
        match value {
            0 => Ok(SegmentUpload),
            1 => Ok(SegmentDownload),
            2 => Ok(Upload),
            3 => Ok(Download),
            4 => Ok(Abort),
            _ => Err(MessageError::InvalidCommandSpecifier { value }),
        }
    }
}

/// Specifies the possible client command specifier (CCS) values in SDO request packets
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientCommand {
    /// Download segment
    DownloadSegment = 0,
    /// Initiate a download
    InitiateDownload = 1,
    /// Initiate an upload
    InitiateUpload = 2,
    /// Request the next upload segment
    ReqUploadSegment = 3,
    /// Abort transfer
    Abort = 4,
}

impl TryFrom<u8> for ClientCommand {
    type Error = MessageError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use ClientCommand::*;
        match value {
            0 => Ok(DownloadSegment),
            1 => Ok(InitiateDownload),
            2 => Ok(InitiateUpload),
            3 => Ok(ReqUploadSegment),
            4 => Ok(Abort),
            _ => Err(MessageError::InvalidCommandSpecifier { value }),
        }
    }
}

/// Standard SDO abort codes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum AbortCode {
    /// Toggle bit not alternated
    ToggleNotAlternated = 0x0503_0000,
    /// SDO protocol timed out
    SdoTimeout = 0x0504_0000,
    /// Client/server command specifier not valid or unknown
    InvalidCommandSpecifier = 0x0504_0001,
    /// Out of memory
    OutOfMemory = 0x0504_0005,
    /// Unsupported access to an object
    UnsupportedAccess = 0x0601_0000,
    /// Attempt to read a write only object
    WriteOnly = 0x0601_0001,
    /// Attempt to write a read only object
    ReadOnly = 0x0601_0002,
    /// Object does not exist in the dictionary
    NoSuchObject = 0x0602_0000,
    /// Object cannot be mapped to the PDO
    UnnallowedPdo = 0x0604_0041,
    /// The number and length of objects would exceed PDO length
    PdoTooLong = 0x0604_0042,
    /// General parameter incompatibility
    IncompatibleParameter = 0x0604_0043,
    /// Access failed due to hardware error
    HardwareError = 0x0606_0000,
    /// Data type does not match, length of service parameter does not match
    DataTypeMismatch = 0x0607_0010,
    /// Data type does not match, length of service parameter too high
    DataTypeMismatchLengthHigh = 0x0607_0012,
    /// Data type does not match, length of service parameter too low
    DataTypeMismatchLengthLow = 0x0607_0013,
    /// Sub-index does not exist
    NoSuchSubIndex = 0x0609_0011,
    /// Invalid value for parameter (download only)
    InvalidValue = 0x0609_0030,
    /// Value of parameter too high (download only)
    ValueTooHigh = 0x0609_0031,
    /// Value of parameter too low (download only)
    ValueTooLow = 0x0609_0032,
    /// Resource not available
    ResourceNotAvailable = 0x060A_0023,
    /// General error
    GeneralError = 0x0800_0000,
    /// Data cannot be transferred or stored to the application
    CantStore = 0x0800_0020,
    /// Data cannot be transferred or stored to the application because of local control
    CantStoreLocalControl = 0x0800_0021,
    /// Data cannot be transferred or stored to the application because of the device state
    CantStoreDeviceState = 0x0800_0022,
    /// No object dictionary is present
    NoObjectDict = 0x0800_0023,
    /// No data available
    NoData = 0x0800_0024,
}

impl TryFrom<u32> for AbortCode {
    type Error = ();

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        use AbortCode::*;
        const ALL: [AbortCode; 26] = [
            ToggleNotAlternated,
            SdoTimeout,
            InvalidCommandSpecifier,
            OutOfMemory,
            UnsupportedAccess,
            WriteOnly,
            ReadOnly,
            NoSuchObject,
            UnnallowedPdo,
            PdoTooLong,
            IncompatibleParameter,
            HardwareError,
            DataTypeMismatch,
            DataTypeMismatchLengthHigh,
            DataTypeMismatchLengthLow,
            NoSuchSubIndex,
            InvalidValue,
            ValueTooHigh,
            ValueTooLow,
            ResourceNotAvailable,
            GeneralError,
            CantStore,
            CantStoreLocalControl,
            CantStoreDeviceState,
            NoObjectDict,
            NoData,
        ];
        ALL.into_iter().find(|code| *code as u32 == value).ok_or(())
    }
}

impl core::fmt::Display for AbortCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        use AbortCode::*;
        let text = match self {
            ToggleNotAlternated => "Toggle bit not alternated",
            SdoTimeout => "SDO protocol timed out",
            InvalidCommandSpecifier => "Command specifier not valid or unknown",
            OutOfMemory => "Out of memory",
            UnsupportedAccess => "Unsupported access to an object",
            WriteOnly => "Attempt to read a write only object",
            ReadOnly => "Attempt to write a read only object",
            NoSuchObject => "Object does not exist in the object dictionary",
            UnnallowedPdo => "Object cannot be mapped to the PDO",
            PdoTooLong => "The number and length of the objects to be mapped would exceed PDO length",
            IncompatibleParameter => "General parameter incompatibility reason",
            HardwareError => "Access failed due to a hardware error",
            DataTypeMismatch => "Data type does not match, length of service parameter does not match",
            DataTypeMismatchLengthHigh => "Data type does not match, length of service parameter too high",
            DataTypeMismatchLengthLow => "Data type does not match, length of service parameter too low",
            NoSuchSubIndex => "Sub-index does not exist",
            InvalidValue => "Invalid value for parameter",
            ValueTooHigh => "Value of parameter written too high",
            ValueTooLow => "Value of parameter written too low",
            ResourceNotAvailable => "Resource not available",
            GeneralError => "General error",
            CantStore => "Data cannot be transferred or stored to the application",
            CantStoreLocalControl => "Data cannot be stored because of local control",
            CantStoreDeviceState => "Data cannot be stored because of the present device state",
            NoObjectDict => "Object dictionary not present",
            NoData => "No data available",
        };
        write!(f, "{text} ({:#010x})", *self as u32)
    }
}

/// An SDO request, sent from client to server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdoRequest {
    /// Begin a download
    InitiateDownload {
        /// Number of unused bytes in data
        n: u8,
        /// Expedited
        e: bool,
        /// size valid
        s: bool,
        /// Object index
        index: u16,
        /// Object sub-index
        sub: u8,
        /// data (value on expedited, size when e=0 and s=1)
        data: [u8; 4],
    },
    /// A segment of a segmented download
    DownloadSegment {
        /// Toggle flag
        t: bool,
        /// Number of unused bytes in data
        n: u8,
        /// When set, indicates there are no more segments to be sent
        c: bool,
        /// Segment data
        data: [u8; 7],
    },
    /// Begin an upload
    InitiateUpload {
        /// Object index
        index: u16,
        /// Object sub-index
        sub: u8,
    },
    /// Request the next segment of a segmented upload
    ReqUploadSegment {
        /// Toggle flag
        t: bool,
    },
    /// Abort the transfer in progress
    Abort {
        /// Object index
        index: u16,
        /// Object sub-index
        sub: u8,
        /// Raw abort code
        abort_code: u32,
    },
}

impl SdoRequest {
    /// Create an abort message
    pub fn abort(index: u16, sub: u8, abort_code: AbortCode) -> Self {
        SdoRequest::Abort {
            index,
            sub,
            abort_code: abort_code as u32,
        }
    }

    /// Create an initiate download message for a segmented transfer
    pub fn initiate_download(index: u16, sub: u8, size: Option<u32>) -> Self {
        let data = size.unwrap_or(0).to_le_bytes();

        SdoRequest::InitiateDownload {
            n: 0,
            e: false,
            s: size.is_some(),
            index,
            sub,
            data,
        }
    }

    /// Create a download segment message
    ///
    /// `segment_data` must be at most 7 bytes long.
    pub fn download_segment(toggle: bool, last_segment: bool, segment_data: &[u8]) -> Self {
        let mut data = [0; 7];
        data[0..segment_data.len()].copy_from_slice(segment_data);
        SdoRequest::DownloadSegment {
            t: toggle,
            n: 7 - segment_data.len() as u8,
            c: last_segment,
            data,
        }
    }

    /// Create an expedited download message
    ///
    /// `data` must be at most 4 bytes long.
    pub fn expedited_download(index: u16, sub: u8, data: &[u8]) -> Self {
        let mut msg_data = [0; 4];
        msg_data[0..data.len()].copy_from_slice(data);

        SdoRequest::InitiateDownload {
            n: (4 - data.len()) as u8,
            e: true,
            s: true,
            index,
            sub,
            data: msg_data,
        }
    }

    /// Create an initiate upload message
    pub fn initiate_upload(index: u16, sub: u8) -> Self {
        SdoRequest::InitiateUpload { index, sub }
    }

    /// Create an upload segment request
    pub fn upload_segment_request(toggle: bool) -> Self {
        SdoRequest::ReqUploadSegment { t: toggle }
    }

    /// Serialize the request into a CAN message with the given ID
    pub fn to_can_message(self, id: CanId) -> CanMessage {
        let mut payload = [0; 8];

        match self {
            SdoRequest::InitiateDownload {
                n,
                e,
                s,
                index,
                sub,
                data,
            } => {
                payload[0] = (ClientCommand::InitiateDownload as u8) << 5
                    | ((n & 0x3) << 2)
                    | ((e as u8) << 1)
                    | s as u8;
                payload[1..3].copy_from_slice(&index.to_le_bytes());
                payload[3] = sub;
                payload[4..8].copy_from_slice(&data);
            }
            SdoRequest::DownloadSegment { t, n, c, data } => {
                payload[0] = (ClientCommand::DownloadSegment as u8) << 5
                    | (t as u8) << 4
                    | (n & 7) << 1
                    | (c as u8);
                payload[1..8].copy_from_slice(&data);
            }
            SdoRequest::InitiateUpload { index, sub } => {
                payload[0] = (ClientCommand::InitiateUpload as u8) << 5;
                payload[1..3].copy_from_slice(&index.to_le_bytes());
                payload[3] = sub;
            }
            SdoRequest::ReqUploadSegment { t } => {
                payload[0] = (ClientCommand::ReqUploadSegment as u8) << 5 | (t as u8) << 4;
            }
            SdoRequest::Abort {
                index,
                sub,
                abort_code,
            } => {
                payload[0] = (ClientCommand::Abort as u8) << 5;
                payload[1..3].copy_from_slice(&index.to_le_bytes());
                payload[3] = sub;
                payload[4..8].copy_from_slice(&abort_code.to_le_bytes());
            }
        }
        CanMessage::new(id, &payload)
    }
}

fn read_index(value: &[u8]) -> (u16, u8) {
    (u16::from_le_bytes([value[1], value[2]]), value[3])
}

fn read_array<const N: usize>(value: &[u8], start: usize) -> [u8; N] {
    let mut out = [0; N];
    out.copy_from_slice(&value[start..start + N]);
    out
}

impl TryFrom<&[u8]> for SdoRequest {
    type Error = MessageError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        if value.len() < 8 {
            return Err(MessageError::MessageTooShort);
        }
        let ccs: ClientCommand = (value[0] >> 5).try_into()?;

        match ccs {
            ClientCommand::DownloadSegment => {
                let t = (value[0] & (1 << 4)) != 0;
                let n = (value[0] >> 1) & 0x7;
                let c = (value[0] & (1 << 0)) != 0;
                Ok(SdoRequest::DownloadSegment {
                    t,
                    n,
                    c,
                    data: read_array(value, 1),
                })
            }
            ClientCommand::InitiateDownload => {
                let n = (value[0] >> 2) & 0x3;
                let e = (value[0] & (1 << 1)) != 0;
                let s = (value[0] & (1 << 0)) != 0;
                let (index, sub) = read_index(value);
                Ok(SdoRequest::InitiateDownload {
                    n,
                    e,
                    s,
                    index,
                    sub,
                    data: read_array(value, 4),
                })
            }
            ClientCommand::InitiateUpload => {
                let (index, sub) = read_index(value);
                Ok(SdoRequest::InitiateUpload { index, sub })
            }
            ClientCommand::ReqUploadSegment => {
                let t = ((value[0] >> 4) & 1) != 0;
                Ok(SdoRequest::ReqUploadSegment { t })
            }
            ClientCommand::Abort => {
                let (index, sub) = read_index(value);
                let abort_code = u32::from_le_bytes(read_array(value, 4));
                Ok(SdoRequest::Abort {
                    index,
                    sub,
                    abort_code,
                })
            }
        }
    }
}

/// An SDO response, sent from server to client
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SdoResponse {
    /// Response to an initiate upload request
    ConfirmUpload {
        /// Number of unused bytes in data
        n: u8,
        /// Expedited flag
        e: bool,
        /// size flag
        s: bool,
        /// Object index
        index: u16,
        /// Object sub-index
        sub: u8,
        /// Value if e=1, or size if s=1
        data: [u8; 4],
    },
    /// A segment of a segmented upload
    UploadSegment {
        /// Toggle flag
        t: bool,
        /// Number of unused bytes in data
        n: u8,
        /// Set on the last segment
        c: bool,
        /// Segment data
        data: [u8; 7],
    },
    /// Response to an initiate download request
    ConfirmDownload {
        /// Object index
        index: u16,
        /// Object sub-index
        sub: u8,
    },
    /// Response to a download segment
    ConfirmDownloadSegment {
        /// Toggle flag
        t: bool,
    },
    /// The server aborted the transfer
    Abort {
        /// Object index
        index: u16,
        /// Object sub-index
        sub: u8,
        /// Raw abort code
        abort_code: u32,
    },
}

impl TryFrom<CanMessage> for SdoResponse {
    type Error = MessageError;

    fn try_from(msg: CanMessage) -> Result<Self, Self::Error> {
        let data = msg.data();
        if data.len() < 8 {
            return Err(MessageError::MessageTooShort);
        }
        let command: ServerCommand = (data[0] >> 5).try_into()?;
        match command {
            ServerCommand::SegmentUpload => {
                let t = (data[0] & (1 << 4)) != 0;
                let n = (data[0] >> 1) & 7;
                let c = (data[0] & (1 << 0)) != 0;
                Ok(SdoResponse::UploadSegment {
                    t,
                    n,
                    c,
                    data: read_array(data, 1),
                })
            }
            ServerCommand::SegmentDownload => {
                let t = (data[0] & (1 << 4)) != 0;
                Ok(SdoResponse::ConfirmDownloadSegment { t })
            }
            ServerCommand::Upload => {
                let n = (data[0] >> 2) & 0x3;
                let e = (data[0] & (1 << 1)) != 0;
                let s = (data[0] & (1 << 0)) != 0;
                let (index, sub) = read_index(data);
                Ok(SdoResponse::ConfirmUpload {
                    n,
                    e,
                    s,
                    index,
                    sub,
                    data: read_array(data, 4),
                })
            }
            ServerCommand::Download => {
                let (index, sub) = read_index(data);
                Ok(SdoResponse::ConfirmDownload { index, sub })
            }
            ServerCommand::Abort => {
                let (index, sub) = read_index(data);
                let abort_code = u32::from_le_bytes(read_array(data, 4));
                Ok(SdoResponse::Abort {
                    index,
                    sub,
                    abort_code,
                })
            }
        }
    }
}

impl SdoResponse {
    /// Create an expedited upload response
    ///
    /// `data` must be at most 4 bytes long.
    pub fn expedited_upload(index: u16, sub: u8, data: &[u8]) -> SdoResponse {
        let mut msg_data = [0; 4];
        msg_data[0..data.len()].copy_from_slice(data);

        SdoResponse::ConfirmUpload {
            index,
            sub,
            e: true,
            s: true,
            n: 4 - data.len() as u8,
            data: msg_data,
        }
    }

    /// Create a response to begin a segmented upload of `size` bytes
    pub fn upload_acknowledge(index: u16, sub: u8, size: u32) -> SdoResponse {
        SdoResponse::ConfirmUpload {
            n: 0,
            e: false,
            s: true,
            index,
            sub,
            data: size.to_le_bytes(),
        }
    }

    /// Create an upload segment response
    ///
    /// `data` must be at most 7 bytes long.
    pub fn upload_segment(t: bool, c: bool, data: &[u8]) -> SdoResponse {
        let n = (7 - data.len()) as u8;
        let mut buf = [0; 7];
        buf[0..data.len()].copy_from_slice(data);
        SdoResponse::UploadSegment { t, n, c, data: buf }
    }

    /// Create a download confirmation
    pub fn download_acknowledge(index: u16, sub: u8) -> SdoResponse {
        SdoResponse::ConfirmDownload { index, sub }
    }

    /// Create a download segment confirmation
    pub fn download_segment_acknowledge(t: bool) -> SdoResponse {
        SdoResponse::ConfirmDownloadSegment { t }
    }

    /// Create an abort response
    pub fn abort(index: u16, sub: u8, abort_code: AbortCode) -> SdoResponse {
        let abort_code = abort_code as u32;
        SdoResponse::Abort {
            index,
            sub,
            abort_code,
        }
    }

    /// Serialize the response into a CAN message with the given ID
    pub fn to_can_message(self, id: CanId) -> CanMessage {
        let mut payload = [0; 8];

        match self {
            SdoResponse::ConfirmUpload {
                n,
                e,
                s,
                index,
                sub,
                data,
            } => {
                payload[0] = (ServerCommand::Upload as u8) << 5
                    | ((n & 0x3) << 2)
                    | ((e as u8) << 1)
                    | (s as u8);
                payload[1..3].copy_from_slice(&index.to_le_bytes());
                payload[3] = sub;
                payload[4..8].copy_from_slice(&data);
            }
            SdoResponse::ConfirmDownload { index, sub } => {
                payload[0] = (ServerCommand::Download as u8) << 5;
                payload[1..3].copy_from_slice(&index.to_le_bytes());
                payload[3] = sub;
            }
            SdoResponse::UploadSegment { t, n, c, data } => {
                payload[0] = (ServerCommand::SegmentUpload as u8) << 5
                    | (t as u8) << 4
                    | (n & 7) << 1
                    | c as u8;
                payload[1..8].copy_from_slice(&data);
            }
            SdoResponse::Abort {
                index,
                sub,
                abort_code,
            } => {
                payload[0] = (ServerCommand::Abort as u8) << 5;
                payload[1..3].copy_from_slice(&index.to_le_bytes());
                payload[3] = sub;
                payload[4..8].copy_from_slice(&abort_code.to_le_bytes());
            }
            SdoResponse::ConfirmDownloadSegment { t } => {
                payload[0] = (ServerCommand::SegmentDownload as u8) << 5 | (t as u8) << 4;
            }
        }
        CanMessage::new(id, &payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expedited_download_encoding() {
        let msg = SdoRequest::expedited_download(0x2001, 3, &[0x39, 0x30])
            .to_can_message(CanId::Std(0x601));
        // ccs=1, n=2, e=1, s=1
        assert_eq!(0x2b, msg.data[0]);
        assert_eq!(&[0x01, 0x20, 0x03, 0x39, 0x30, 0, 0], &msg.data[1..8]);

        let parsed = SdoRequest::try_from(msg.data()).unwrap();
        assert_eq!(
            SdoRequest::expedited_download(0x2001, 3, &[0x39, 0x30]),
            parsed
        );
    }

    #[test]
    fn test_upload_response_decoding() {
        let msg = CanMessage::new(
            CanId::Std(0x581),
            &[0x4b, 0x00, 0x10, 0x00, 0x34, 0x12, 0x00, 0x00],
        );
        let resp = SdoResponse::try_from(msg).unwrap();
        assert_eq!(
            SdoResponse::ConfirmUpload {
                n: 2,
                e: true,
                s: true,
                index: 0x1000,
                sub: 0,
                data: [0x34, 0x12, 0, 0]
            },
            resp
        );
    }

    #[test]
    fn test_abort_code_lookup() {
        assert_eq!(Ok(AbortCode::NoSuchObject), AbortCode::try_from(0x0602_0000));
        assert_eq!(Err(()), AbortCode::try_from(0x1234_5678));
        assert!(AbortCode::ReadOnly.to_string().contains("0x06010002"));
    }

    #[test]
    fn test_short_and_invalid_messages() {
        assert_eq!(
            Err(MessageError::MessageTooShort),
            SdoRequest::try_from(&[0x40u8, 0, 0][..])
        );
        let msg = CanMessage::new(CanId::Std(0x581), &[0xe0, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(
            Err(MessageError::InvalidCommandSpecifier { value: 7 }),
            SdoResponse::try_from(msg)
        );
    }
}
