//! In-memory model of a device object dictionary
//!
//! The dictionary is an ordered list of [Object]s, kept in the order they were defined by the
//! schema file. Every object, whether a [Object::Variable], [Object::Record] or [Object::Array],
//! exposes the [Entry]s it contains through [Object::entries], so callers can walk the whole
//! parameter space without caring about the container kind.
use std::collections::HashMap;

use dcfsync_common::objects::{AccessType, DataType, ObjectId};
use snafu::Snafu;

/// A value held by an [Entry]
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Value {
    /// No value was supplied
    #[default]
    None,
    /// A boolean
    Bool(bool),
    /// A signed integer
    Int(i64),
    /// An unsigned integer
    UInt(u64),
    /// A floating point number
    Float(f64),
    /// A text string
    Str(String),
    /// Raw bytes, for octet strings and domains
    Bytes(Vec<u8>),
}

impl Value {
    /// Returns true if no value is stored
    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    /// Get the value as an unsigned integer, if it is an integer that fits
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::UInt(v) => Some(*v),
            Value::Int(v) => u64::try_from(*v).ok(),
            Value::Bool(b) => Some(*b as u64),
            _ => None,
        }
    }
}

impl core::fmt::Display for Value {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Value::None => write!(f, "<none>"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::UInt(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Str(v) => write!(f, "{v:?}"),
            Value::Bytes(v) => write!(f, "{v:02x?}"),
        }
    }
}

/// Error raised when converting between a [Value] and its raw wire encoding
#[derive(Clone, Debug, PartialEq, Snafu)]
pub enum EncodingError {
    /// The entry holds no value
    #[snafu(display("Object {id} has no value"))]
    MissingValue {
        /// Address of the entry
        id: ObjectId,
    },
    /// The value variant does not fit the declared data type
    #[snafu(display("Object {id} holds {value}, which cannot be encoded as {data_type:?}"))]
    TypeMismatch {
        /// Address of the entry
        id: ObjectId,
        /// Declared data type
        data_type: DataType,
        /// The offending value
        value: Value,
    },
    /// An integer value is outside the range of the declared data type
    #[snafu(display("Object {id} value {value} is out of range for {data_type:?}"))]
    OutOfRange {
        /// Address of the entry
        id: ObjectId,
        /// Declared data type
        data_type: DataType,
        /// The offending value
        value: Value,
    },
    /// Raw data is too short for the data type
    #[snafu(display("Expected {expected} bytes for {data_type:?}, got {actual}"))]
    LengthMismatch {
        /// Declared data type
        data_type: DataType,
        /// Required length
        expected: usize,
        /// Received length
        actual: usize,
    },
}

/// Returned by [ObjectDictionary::set_value] when the addressed entry does not exist
#[derive(Clone, Copy, Debug, PartialEq, Eq, Snafu)]
#[snafu(display("No entry at {id}"))]
pub struct NoSuchEntryError {
    /// The requested address
    pub id: ObjectId,
}

/// A single addressable value in the object dictionary
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Entry {
    /// Parameter name from the schema
    pub name: String,
    /// Object index
    pub index: u16,
    /// Sub index
    pub sub: u8,
    /// Declared data type, which determines the raw encoding
    pub data_type: DataType,
    /// Access policy
    pub access: AccessType,
    /// Skip this entry when scanning a device
    pub refuse_read_on_scan: bool,
    /// Skip this entry when downloading a configuration
    pub refuse_write_on_download: bool,
    /// Current value
    pub value: Value,
}

impl Entry {
    /// Create an entry with default flags and no value
    pub fn new(name: &str, index: u16, sub: u8, data_type: DataType, access: AccessType) -> Self {
        Self {
            name: name.to_string(),
            index,
            sub,
            data_type,
            access,
            ..Default::default()
        }
    }

    /// Set the value, builder style
    pub fn with_value(mut self, value: Value) -> Self {
        self.value = value;
        self
    }

    /// The address of this entry
    pub fn id(&self) -> ObjectId {
        ObjectId {
            index: self.index,
            sub: self.sub,
        }
    }

    /// Returns true if the access type permits reading
    pub fn readable(&self) -> bool {
        self.access.is_readable()
    }

    /// Returns true if the access type permits writing
    pub fn writable(&self) -> bool {
        self.access.is_writable()
    }

    /// Encode the current value into its raw, little-endian wire format
    pub fn encode_raw(&self) -> Result<Vec<u8>, EncodingError> {
        encode_raw(self.id(), self.data_type, &self.value)
    }
}

/// An object in the dictionary
#[derive(Clone, Debug, PartialEq)]
pub enum Object {
    /// A single entry, addressed at sub index 0
    Variable(Entry),
    /// A collection of entries with differing types
    Record {
        /// Object index
        index: u16,
        /// Object name
        name: String,
        /// Sub entries, in definition order
        entries: Vec<Entry>,
    },
    /// A collection of entries sharing one type
    Array {
        /// Object index
        index: u16,
        /// Object name
        name: String,
        /// Sub entries, in definition order
        entries: Vec<Entry>,
    },
}

impl Object {
    /// The object index
    pub fn index(&self) -> u16 {
        match self {
            Object::Variable(entry) => entry.index,
            Object::Record { index, .. } | Object::Array { index, .. } => *index,
        }
    }

    /// The object name
    pub fn name(&self) -> &str {
        match self {
            Object::Variable(entry) => &entry.name,
            Object::Record { name, .. } | Object::Array { name, .. } => name,
        }
    }

    /// All entries contained in the object
    pub fn entries(&self) -> &[Entry] {
        match self {
            Object::Variable(entry) => core::slice::from_ref(entry),
            Object::Record { entries, .. } | Object::Array { entries, .. } => entries,
        }
    }

    /// Mutable access to the contained entries
    pub fn entries_mut(&mut self) -> &mut [Entry] {
        match self {
            Object::Variable(entry) => core::slice::from_mut(entry),
            Object::Record { entries, .. } | Object::Array { entries, .. } => entries,
        }
    }

    /// Find an entry by sub index
    pub fn entry(&self, sub: u8) -> Option<&Entry> {
        self.entries().iter().find(|e| e.sub == sub)
    }

    fn entry_mut(&mut self, sub: u8) -> Option<&mut Entry> {
        self.entries_mut().iter_mut().find(|e| e.sub == sub)
    }
}

/// An ordered, indexed collection of objects
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ObjectDictionary {
    objects: Vec<Object>,
    lookup: HashMap<u16, usize>,
}

impl ObjectDictionary {
    /// Create an empty dictionary
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an object
    ///
    /// An object with the same index replaces the existing one, keeping its position.
    pub fn insert(&mut self, object: Object) {
        match self.lookup.get(&object.index()) {
            Some(&pos) => self.objects[pos] = object,
            None => {
                self.lookup.insert(object.index(), self.objects.len());
                self.objects.push(object);
            }
        }
    }

    /// All objects, in definition order
    pub fn objects(&self) -> &[Object] {
        &self.objects
    }

    /// Number of objects
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Returns true if the dictionary has no objects
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Get an object by index
    pub fn object(&self, index: u16) -> Option<&Object> {
        self.lookup.get(&index).map(|&pos| &self.objects[pos])
    }

    /// Returns true if an object exists at `index`
    pub fn contains(&self, index: u16) -> bool {
        self.lookup.contains_key(&index)
    }

    /// The entries of the object at `index`, in definition order
    ///
    /// Returns an empty slice when the object does not exist.
    pub fn entries_of(&self, index: u16) -> &[Entry] {
        self.object(index).map(|o| o.entries()).unwrap_or(&[])
    }

    /// Get a single entry
    pub fn get(&self, index: u16, sub: u8) -> Option<&Entry> {
        self.object(index)?.entry(sub)
    }

    /// Replace the value of an entry
    pub fn set_value(&mut self, index: u16, sub: u8, value: Value) -> Result<(), NoSuchEntryError> {
        let entry = self
            .lookup
            .get(&index)
            .and_then(|&pos| self.objects[pos].entry_mut(sub))
            .ok_or(NoSuchEntryError {
                id: ObjectId { index, sub },
            })?;
        entry.value = value;
        Ok(())
    }
}

fn mismatch(id: ObjectId, data_type: DataType, value: &Value) -> EncodingError {
    EncodingError::TypeMismatch {
        id,
        data_type,
        value: value.clone(),
    }
}

fn out_of_range(id: ObjectId, data_type: DataType, value: &Value) -> EncodingError {
    EncodingError::OutOfRange {
        id,
        data_type,
        value: value.clone(),
    }
}

/// Encode a value as the raw little-endian representation of `data_type`
pub fn encode_raw(id: ObjectId, data_type: DataType, value: &Value) -> Result<Vec<u8>, EncodingError> {
    if value.is_none() {
        return MissingValueSnafu { id }.fail();
    }

    let unsigned = |max: u64| -> Result<u64, EncodingError> {
        let v = match value {
            Value::UInt(v) => *v,
            Value::Int(v) => u64::try_from(*v).map_err(|_| out_of_range(id, data_type, value))?,
            _ => return Err(mismatch(id, data_type, value)),
        };
        if v > max {
            return Err(out_of_range(id, data_type, value));
        }
        Ok(v)
    };
    let signed = |min: i64, max: i64| -> Result<i64, EncodingError> {
        let v = match value {
            Value::Int(v) => *v,
            Value::UInt(v) => i64::try_from(*v).map_err(|_| out_of_range(id, data_type, value))?,
            _ => return Err(mismatch(id, data_type, value)),
        };
        if v < min || v > max {
            return Err(out_of_range(id, data_type, value));
        }
        Ok(v)
    };
    let float = || -> Result<f64, EncodingError> {
        match value {
            Value::Float(v) => Ok(*v),
            _ => Err(mismatch(id, data_type, value)),
        }
    };

    let raw = match data_type {
        DataType::Boolean => match value {
            Value::Bool(b) => vec![*b as u8],
            _ => return Err(mismatch(id, data_type, value)),
        },
        DataType::UInt8 => vec![unsigned(u8::MAX as u64)? as u8],
        DataType::UInt16 => (unsigned(u16::MAX as u64)? as u16).to_le_bytes().to_vec(),
        DataType::UInt32 => (unsigned(u32::MAX as u64)? as u32).to_le_bytes().to_vec(),
        DataType::UInt64 => unsigned(u64::MAX)?.to_le_bytes().to_vec(),
        DataType::Int8 => (signed(i8::MIN as i64, i8::MAX as i64)? as i8)
            .to_le_bytes()
            .to_vec(),
        DataType::Int16 => (signed(i16::MIN as i64, i16::MAX as i64)? as i16)
            .to_le_bytes()
            .to_vec(),
        DataType::Int32 => (signed(i32::MIN as i64, i32::MAX as i64)? as i32)
            .to_le_bytes()
            .to_vec(),
        DataType::Int64 => signed(i64::MIN, i64::MAX)?.to_le_bytes().to_vec(),
        DataType::Real32 => (float()? as f32).to_le_bytes().to_vec(),
        DataType::Real64 => float()?.to_le_bytes().to_vec(),
        DataType::VisibleString => match value {
            Value::Str(s) => s.as_bytes().to_vec(),
            _ => return Err(mismatch(id, data_type, value)),
        },
        DataType::UnicodeString => match value {
            Value::Str(s) => s.encode_utf16().flat_map(|c| c.to_le_bytes()).collect(),
            _ => return Err(mismatch(id, data_type, value)),
        },
        DataType::OctetString | DataType::Domain | DataType::Other(_) => match value {
            Value::Bytes(b) => b.clone(),
            _ => return Err(mismatch(id, data_type, value)),
        },
    };
    Ok(raw)
}

/// Decode raw bytes received from a device into a [Value]
///
/// Fixed width types accept longer input and ignore the excess, as some devices pad expedited
/// responses without indicating their size.
pub fn decode_raw(data_type: DataType, raw: &[u8]) -> Result<Value, EncodingError> {
    fn arr<const N: usize>(b: &[u8]) -> [u8; N] {
        let mut out = [0; N];
        out.copy_from_slice(&b[..N]);
        out
    }
    let fixed = |n: usize| -> Result<usize, EncodingError> {
        if raw.len() < n {
            return LengthMismatchSnafu {
                data_type,
                expected: n,
                actual: raw.len(),
            }
            .fail();
        }
        Ok(n)
    };

    let value = match data_type {
        DataType::Boolean => Value::Bool(raw[fixed(1)? - 1] != 0),
        DataType::UInt8 => Value::UInt(raw[fixed(1)? - 1] as u64),
        DataType::UInt16 => Value::UInt(u16::from_le_bytes(arr(&raw[..fixed(2)?])) as u64),
        DataType::UInt32 => Value::UInt(u32::from_le_bytes(arr(&raw[..fixed(4)?])) as u64),
        DataType::UInt64 => Value::UInt(u64::from_le_bytes(arr(&raw[..fixed(8)?]))),
        DataType::Int8 => Value::Int(raw[fixed(1)? - 1] as i8 as i64),
        DataType::Int16 => Value::Int(i16::from_le_bytes(arr(&raw[..fixed(2)?])) as i64),
        DataType::Int32 => Value::Int(i32::from_le_bytes(arr(&raw[..fixed(4)?])) as i64),
        DataType::Int64 => Value::Int(i64::from_le_bytes(arr(&raw[..fixed(8)?]))),
        DataType::Real32 => Value::Float(f32::from_le_bytes(arr(&raw[..fixed(4)?])) as f64),
        DataType::Real64 => Value::Float(f64::from_le_bytes(arr(&raw[..fixed(8)?]))),
        DataType::VisibleString => Value::Str(String::from_utf8_lossy(raw).into_owned()),
        DataType::UnicodeString => {
            if raw.len() % 2 != 0 {
                return LengthMismatchSnafu {
                    data_type,
                    expected: raw.len() + 1,
                    actual: raw.len(),
                }
                .fail();
            }
            let units: Vec<u16> = raw
                .chunks_exact(2)
                .map(|c| u16::from_le_bytes([c[0], c[1]]))
                .collect();
            Value::Str(String::from_utf16_lossy(&units))
        }
        DataType::OctetString | DataType::Domain | DataType::Other(_) => Value::Bytes(raw.to_vec()),
    };
    Ok(value)
}
