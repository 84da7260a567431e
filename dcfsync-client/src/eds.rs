//! Build an [ObjectDictionary] from an EDS or DCF document
use dcfsync_common::{
    objects::{AccessType, DataType, InvalidAccessTypeError, ObjectCode},
    NodeId,
};
use snafu::{OptionExt, ResultExt, Snafu};

use crate::{
    document::{decode_hex, ConfigDocument, Section},
    object_dict::{Entry, Object, ObjectDictionary, Value},
};

/// Object list sections, in the order their objects are defined
const OBJECT_LISTS: [(&str, bool); 3] = [
    ("MandatoryObjects", true),
    ("OptionalObjects", false),
    ("ManufacturerObjects", false),
];

/// Error returned when a document does not describe a valid object dictionary
#[derive(Debug, Snafu)]
pub enum LoadError {
    /// A required section is missing
    #[snafu(display("Missing required section '{section}'"))]
    MissingSection {
        /// Section name
        section: String,
    },
    /// A required key is missing
    #[snafu(display("Missing required field '{key}' in '{section}'"))]
    MissingKey {
        /// Section name
        section: String,
        /// Key name
        key: String,
    },
    /// A numeric field could not be parsed
    #[snafu(display("Invalid number '{value}' for '{key}' in '{section}'"))]
    InvalidNumber {
        /// Section name
        section: String,
        /// Key name
        key: String,
        /// The offending text
        value: String,
    },
    /// The AccessType field has an unknown value
    #[snafu(display("Bad access type in '{section}': {source}"))]
    InvalidAccess {
        /// Section name
        section: String,
        /// The underlying error
        source: InvalidAccessTypeError,
    },
    /// A default or parameter value cannot be represented in the entry's data type
    #[snafu(display("Invalid value '{value}' for {data_type:?} in '{section}'"))]
    InvalidValue {
        /// Section name
        section: String,
        /// Declared data type
        data_type: DataType,
        /// The offending text
        value: String,
    },
}

type Result<T> = std::result::Result<T, LoadError>;

struct SectionReader<'a> {
    map: &'a Section,
    name: String,
}

impl<'a> SectionReader<'a> {
    fn from_doc<D: ConfigDocument + ?Sized>(doc: &'a D, name: &str) -> Result<Self> {
        Self::from_doc_opt(doc, name).context(MissingSectionSnafu { section: name })
    }

    fn from_doc_opt<D: ConfigDocument + ?Sized>(doc: &'a D, name: &str) -> Option<Self> {
        Some(Self {
            map: doc.section(name)?,
            name: name.to_string(),
        })
    }

    fn get_opt(&self, key: &str) -> Option<&'a str> {
        self.map.get(key).map(str::trim).filter(|s| !s.is_empty())
    }

    fn get_str(&self, key: &str) -> Result<&'a str> {
        self.get_opt(key).context(MissingKeySnafu {
            section: &self.name,
            key,
        })
    }

    fn parse_u32(&self, key: &str, value: &str) -> Result<u32> {
        parse_int(value)
            .and_then(|v| u32::try_from(v).ok())
            .context(InvalidNumberSnafu {
                section: &self.name,
                key,
                value,
            })
    }

    /// Read a required integer field, in decimal or `0x` prefixed hex
    fn get_u32(&self, key: &str) -> Result<u32> {
        self.parse_u32(key, self.get_str(key)?)
    }

    fn get_u32_opt(&self, key: &str) -> Result<Option<u32>> {
        self.get_opt(key).map(|v| self.parse_u32(key, v)).transpose()
    }

    /// Flags are stored as 0 or 1, and default to false when missing
    fn get_flag(&self, key: &str) -> Result<bool> {
        Ok(self.get_u32_opt(key)?.unwrap_or(0) != 0)
    }
}

/// Parse an integer in decimal, or hex with a `0x` prefix
fn parse_int(text: &str) -> Option<i128> {
    let text = text.trim();
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let value = match digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        Some(hex) => i128::from_str_radix(hex, 16).ok()?,
        None => digits.parse::<i128>().ok()?,
    };
    Some(if negative { -value } else { value })
}

/// Evaluate an integer literal, which may reference the node ID as `$NODEID+<n>` or `<n>+$NODEID`
fn parse_int_literal(text: &str, node_id: NodeId) -> Option<i128> {
    let mut total = 0;
    for term in text.split('+') {
        let term = term.trim();
        if term.eq_ignore_ascii_case("$NODEID") {
            total += node_id.raw() as i128;
        } else {
            total += parse_int(term)?;
        }
    }
    Some(total)
}

/// Convert a value literal from an EDS/DCF file into a [Value] of the given type
///
/// Empty literals produce [Value::None].
pub fn parse_value(data_type: DataType, text: &str, node_id: NodeId) -> Option<Value> {
    let text = text.trim();
    if text.is_empty() {
        return Some(Value::None);
    }

    let value = match data_type {
        DataType::Boolean => Value::Bool(parse_int_literal(text, node_id)? != 0),
        DataType::UInt8 | DataType::UInt16 | DataType::UInt32 | DataType::UInt64 => {
            Value::UInt(u64::try_from(parse_int_literal(text, node_id)?).ok()?)
        }
        DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64 => {
            let mut v = parse_int_literal(text, node_id)?;
            // Hex literals for signed types are two's complement bit patterns
            let bits = data_type.fixed_size()? as u32 * 8;
            let max = 1i128 << (bits - 1);
            let is_hex = text.contains("0x") || text.contains("0X");
            if is_hex && v >= max && v < max << 1 {
                v -= max << 1;
            }
            Value::Int(i64::try_from(v).ok()?)
        }
        DataType::Real32 | DataType::Real64 => Value::Float(text.parse().ok()?),
        DataType::VisibleString | DataType::UnicodeString => Value::Str(text.to_string()),
        DataType::OctetString | DataType::Domain | DataType::Other(_) => {
            Value::Bytes(decode_hex(text).ok()?)
        }
    };
    Some(value)
}

fn read_entry(section: &SectionReader, index: u16, sub: u8, node_id: NodeId) -> Result<Entry> {
    let data_type = DataType::from(section.get_u32("DataType")? as u16);
    let access: AccessType = section
        .get_str("AccessType")?
        .parse()
        .context(InvalidAccessSnafu {
            section: &section.name,
        })?;

    // A non-empty ParameterValue, as found in DCF files, overrides the default
    let literal = section
        .get_opt("ParameterValue")
        .or_else(|| section.get_opt("DefaultValue"))
        .unwrap_or("");
    let value = parse_value(data_type, literal, node_id).context(InvalidValueSnafu {
        section: &section.name,
        data_type,
        value: literal,
    })?;

    Ok(Entry {
        name: section.get_opt("ParameterName").unwrap_or_default().to_string(),
        index,
        sub,
        data_type,
        access,
        refuse_read_on_scan: section.get_flag("RefuseReadOnScan")?,
        refuse_write_on_download: section.get_flag("RefuseWriteOnDownload")?,
        value,
    })
}

fn read_object<D: ConfigDocument + ?Sized>(doc: &D, index: u16, node_id: NodeId) -> Result<Object> {
    let section = SectionReader::from_doc(doc, &format!("{index:04X}"))?;
    let object_type = section
        .get_u32_opt("ObjectType")?
        .and_then(|code| ObjectCode::try_from(code as u8).ok())
        .unwrap_or_default();
    let name = section.get_opt("ParameterName").unwrap_or_default().to_string();

    if !matches!(object_type, ObjectCode::Array | ObjectCode::Record) {
        return Ok(Object::Variable(read_entry(&section, index, 0, node_id)?));
    }

    let sub_number = section.get_u32_opt("SubNumber")?.unwrap_or(0) as usize;
    let mut entries = Vec::with_capacity(sub_number);
    for sub in 0..=255u8 {
        if entries.len() >= sub_number {
            break;
        }
        // Not all subs are necessarily defined; e.g. there may be a sub1 and a sub3, but no sub2
        let Some(sub_section) = SectionReader::from_doc_opt(doc, &format!("{index:04X}sub{sub:X}"))
        else {
            continue;
        };
        entries.push(read_entry(&sub_section, index, sub, node_id)?);
    }

    Ok(match object_type {
        ObjectCode::Array => Object::Array {
            index,
            name,
            entries,
        },
        _ => Object::Record {
            index,
            name,
            entries,
        },
    })
}

/// Build the object dictionary described by an EDS or DCF document
///
/// `node_id` is substituted wherever a value literal references `$NODEID`.
pub fn load_object_dictionary<D: ConfigDocument + ?Sized>(
    doc: &D,
    node_id: NodeId,
) -> Result<ObjectDictionary> {
    let mut od = ObjectDictionary::new();
    for (list_name, required) in OBJECT_LISTS {
        let list = if required {
            SectionReader::from_doc(doc, list_name)?
        } else {
            match SectionReader::from_doc_opt(doc, list_name) {
                Some(list) => list,
                None => continue,
            }
        };
        let count = list.get_u32("SupportedObjects")?;
        for i in 1..=count {
            let key = i.to_string();
            let index = list.get_u32(&key)?;
            let index = u16::try_from(index).ok().context(InvalidNumberSnafu {
                section: list_name,
                key: &key,
                value: format!("{index:#x}"),
            })?;
            od.insert(read_object(doc, index, node_id)?);
        }
    }
    log::debug!("Loaded {} objects from document", od.len());
    Ok(od)
}
