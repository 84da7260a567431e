//! Object Definitions
//!

/// A container for the address of a subobject
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId {
    /// Object index
    pub index: u16,
    /// Sub index
    pub sub: u8,
}

impl core::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:04x}:{:02x}", self.index, self.sub)
    }
}

/// Object Code value
///
/// Defines the type of an object
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum ObjectCode {
    /// An empty object
    Null = 0,
    /// A large chunk of data
    Domain = 2,
    /// Unused
    DefType = 5,
    /// Unused
    DefStruct = 6,
    /// An object which has a single sub object
    #[default]
    Var = 7,
    /// An array of sub-objects all with the same data type
    Array = 8,
    /// A collection of sub-objects with varying types
    Record = 9,
}

impl TryFrom<u8> for ObjectCode {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ObjectCode::Null),
            2 => Ok(ObjectCode::Domain),
            5 => Ok(ObjectCode::DefType),
            6 => Ok(ObjectCode::DefStruct),
            7 => Ok(ObjectCode::Var),
            8 => Ok(ObjectCode::Array),
            9 => Ok(ObjectCode::Record),
            _ => Err(()),
        }
    }
}

/// Access type enum
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum AccessType {
    /// Read-only
    #[default]
    Ro,
    /// Write-only
    Wo,
    /// Read-write
    Rw,
    /// Read-write, only readable via TPDO
    Rwr,
    /// Read-write, only writable via RPDO
    Rww,
    /// Read-only, and also will never be changed, even internally by the device
    Const,
}

impl AccessType {
    /// Returns true if an object with this access type can be read
    pub fn is_readable(&self) -> bool {
        matches!(
            self,
            AccessType::Ro | AccessType::Rw | AccessType::Rwr | AccessType::Rww | AccessType::Const
        )
    }

    /// Returns true if an object with this access type can be written
    pub fn is_writable(&self) -> bool {
        matches!(
            self,
            AccessType::Rw | AccessType::Wo | AccessType::Rwr | AccessType::Rww
        )
    }
}

/// Error returned when parsing an unknown access type string
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvalidAccessTypeError(pub String);

impl core::fmt::Display for InvalidAccessTypeError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Invalid AccessType: '{}'", self.0)
    }
}

impl core::error::Error for InvalidAccessTypeError {}

impl core::str::FromStr for AccessType {
    type Err = InvalidAccessTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ro" => Ok(AccessType::Ro),
            "wo" => Ok(AccessType::Wo),
            "rw" => Ok(AccessType::Rw),
            "rwr" => Ok(AccessType::Rwr),
            "rww" => Ok(AccessType::Rww),
            "const" => Ok(AccessType::Const),
            _ => Err(InvalidAccessTypeError(s.to_string())),
        }
    }
}

/// Indicate the type of data stored in an object
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum DataType {
    Boolean,
    Int8,
    Int16,
    Int32,
    #[default]
    UInt8,
    UInt16,
    UInt32,
    Real32,
    VisibleString,
    OctetString,
    UnicodeString,
    Domain,
    Real64,
    Int64,
    UInt64,
    Other(u16),
}

impl From<u16> for DataType {
    fn from(value: u16) -> Self {
        use DataType::*;
        match value {
            0x1 => Boolean,
            0x2 => Int8,
            0x3 => Int16,
            0x4 => Int32,
            0x5 => UInt8,
            0x6 => UInt16,
            0x7 => UInt32,
            0x8 => Real32,
            0x9 => VisibleString,
            0xa => OctetString,
            0xb => UnicodeString,
            0xf => Domain,
            0x11 => Real64,
            0x15 => Int64,
            0x1b => UInt64,
            _ => Other(value),
        }
    }
}

impl From<DataType> for u16 {
    fn from(value: DataType) -> Self {
        use DataType::*;
        match value {
            Boolean => 0x1,
            Int8 => 0x2,
            Int16 => 0x3,
            Int32 => 0x4,
            UInt8 => 0x5,
            UInt16 => 0x6,
            UInt32 => 0x7,
            Real32 => 0x8,
            VisibleString => 0x9,
            OctetString => 0xa,
            UnicodeString => 0xb,
            Domain => 0xf,
            Real64 => 0x11,
            Int64 => 0x15,
            UInt64 => 0x1b,
            Other(code) => code,
        }
    }
}

impl DataType {
    /// Returns true if data type is one of the string types
    pub fn is_str(&self) -> bool {
        matches!(
            self,
            Self::VisibleString | Self::OctetString | Self::UnicodeString
        )
    }

    /// Returns the fixed encoded size of the type in bytes, or None for variable length types
    pub fn fixed_size(&self) -> Option<usize> {
        use DataType::*;
        match self {
            Boolean | Int8 | UInt8 => Some(1),
            Int16 | UInt16 => Some(2),
            Int32 | UInt32 | Real32 => Some(4),
            Int64 | UInt64 | Real64 => Some(8),
            VisibleString | OctetString | UnicodeString | Domain | Other(_) => None,
        }
    }

    /// Returns true for the signed integer types
    pub fn is_signed(&self) -> bool {
        matches!(self, Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64)
    }
}
