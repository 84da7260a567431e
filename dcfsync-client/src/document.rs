//! Configuration documents (EDS/DCF files)
//!
//! A [ConfigDocument] is an ordered collection of named [Section]s, each holding an ordered list of
//! keys with optional values. Keys are stored exactly as written: they are never case folded, and
//! comments and blank lines survive a read/write round trip.
//!
//! Lookups by section name or key fall back to an ASCII case-insensitive match when there is no
//! exact match, because EDS/DCF files written by different tools disagree on case (`[1a00]` vs.
//! `[1A00]`). When an existing section or key is updated, the spelling found in the file is kept.
use std::path::Path;

use snafu::{OptionExt, ResultExt, Snafu};

/// Error returned when loading or saving a document
#[derive(Debug, Snafu)]
pub enum DocumentError {
    /// IO error reading or writing the document file
    #[snafu(display("IO error accessing {path}: {source}"))]
    Io {
        /// Path of the file
        path: String,
        /// The underlying error
        source: std::io::Error,
    },
    /// The document text could not be parsed
    #[snafu(display("Syntax error on line {line}: {message}"))]
    Syntax {
        /// 1-based line number
        line: usize,
        /// Description of the problem
        message: String,
    },
    /// A hex payload string is not valid
    #[snafu(display("Invalid hex value '{value}': {source}"))]
    InvalidHex {
        /// The offending string
        value: String,
        /// The underlying error
        source: hex::FromHexError,
    },
}

#[derive(Clone, Debug, PartialEq)]
enum Line {
    Entry { key: String, value: Option<String> },
    /// Comment or blank line, stored verbatim
    Trivia(String),
}

impl Line {
    fn is_blank(&self) -> bool {
        matches!(self, Line::Trivia(s) if s.trim().is_empty())
    }
}

/// An ordered set of key/value pairs within a document
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Section {
    lines: Vec<Line>,
}

impl Section {
    /// Create an empty section
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, key: &str) -> Option<usize> {
        let keys = || {
            self.lines.iter().enumerate().filter_map(|(i, line)| match line {
                Line::Entry { key, .. } => Some((i, key)),
                Line::Trivia(_) => None,
            })
        };
        keys()
            .find(|(_, k)| k.as_str() == key)
            .or_else(|| keys().find(|(_, k)| k.eq_ignore_ascii_case(key)))
            .map(|(i, _)| i)
    }

    /// Returns true if the key is present, with or without a value
    pub fn contains_key(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    /// Get the value stored for a key
    ///
    /// Returns None if the key is missing or has no value
    pub fn get(&self, key: &str) -> Option<&str> {
        match &self.lines[self.position(key)?] {
            Line::Entry { value, .. } => value.as_deref(),
            Line::Trivia(_) => None,
        }
    }

    /// Set the value of a key, appending it if it does not yet exist
    pub fn set<K: Into<String>>(&mut self, key: K, value: Option<String>) {
        let key = key.into();
        if let Some(pos) = self.position(&key) {
            if let Line::Entry { value: v, .. } = &mut self.lines[pos] {
                *v = value;
            }
            return;
        }
        // New keys go before any trailing blank lines so section spacing is kept
        let insert_at = self
            .lines
            .iter()
            .rposition(|line| !line.is_blank())
            .map(|i| i + 1)
            .unwrap_or(0);
        self.lines.insert(insert_at, Line::Entry { key, value });
    }

    /// Iterate over the key/value pairs, in document order
    pub fn entries(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.lines.iter().filter_map(|line| match line {
            Line::Entry { key, value } => Some((key.as_str(), value.as_deref())),
            Line::Trivia(_) => None,
        })
    }

    fn push_trivia(&mut self, text: &str) {
        self.lines.push(Line::Trivia(text.to_string()));
    }
}

impl<K: Into<String>> FromIterator<(K, Option<String>)> for Section {
    fn from_iter<T: IntoIterator<Item = (K, Option<String>)>>(iter: T) -> Self {
        let mut section = Section::new();
        for (key, value) in iter {
            section.set(key, value);
        }
        section
    }
}

/// The interface used by the synchronization engine to access a configuration document
pub trait ConfigDocument {
    /// Get a section by name
    fn section(&self, name: &str) -> Option<&Section>;

    /// Replace the contents of a section, creating it at the end of the document if needed
    fn set_section(&mut self, name: &str, section: Section);

    /// Names of all sections, in document order
    fn section_names(&self) -> Vec<&str>;

    /// Parse `text` and merge its sections into this document
    fn read_all(&mut self, text: &str) -> Result<(), DocumentError>;

    /// Serialize the whole document
    fn write_all(&self) -> String;

    /// Get a single value
    fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.section(section)?.get(key)
    }

    /// Set a single value, creating the section if needed
    fn set(&mut self, section: &str, key: &str, value: Option<String>) {
        let mut updated = self.section(section).cloned().unwrap_or_default();
        updated.set(key, value);
        self.set_section(section, updated);
    }
}

/// An INI style document, as used by EDS and DCF files
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IniDocument {
    /// Trivia before the first section header
    preamble: Vec<String>,
    sections: Vec<(String, Section)>,
}

impl IniDocument {
    /// Create an empty document
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a document from a string
    pub fn parse(text: &str) -> Result<Self, DocumentError> {
        let mut doc = Self::new();
        doc.read_all(text)?;
        Ok(doc)
    }

    /// Read a document from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, DocumentError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).context(IoSnafu {
            path: path.to_string_lossy(),
        })?;
        Self::parse(&text)
    }

    /// Write the document to a file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), DocumentError> {
        let path = path.as_ref();
        std::fs::write(path, self.write_all()).context(IoSnafu {
            path: path.to_string_lossy(),
        })
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.sections
            .iter()
            .position(|(n, _)| n == name)
            .or_else(|| {
                self.sections
                    .iter()
                    .position(|(n, _)| n.eq_ignore_ascii_case(name))
            })
    }
}

impl ConfigDocument for IniDocument {
    fn section(&self, name: &str) -> Option<&Section> {
        self.position(name).map(|i| &self.sections[i].1)
    }

    fn set_section(&mut self, name: &str, section: Section) {
        match self.position(name) {
            Some(i) => self.sections[i].1 = section,
            None => {
                // Separate the new section from the previous one by a blank line
                if let Some((_, last)) = self.sections.last_mut() {
                    if !last.lines.last().is_some_and(Line::is_blank) {
                        last.push_trivia("");
                    }
                }
                self.sections.push((name.to_string(), section));
            }
        }
    }

    fn section_names(&self) -> Vec<&str> {
        self.sections.iter().map(|(n, _)| n.as_str()).collect()
    }

    fn read_all(&mut self, text: &str) -> Result<(), DocumentError> {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        let mut current: Option<usize> = None;

        for (i, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                match current {
                    Some(idx) => self.sections[idx].1.push_trivia(raw),
                    None => self.preamble.push(raw.to_string()),
                }
                continue;
            }

            if let Some(header) = line.strip_prefix('[') {
                let name = header.strip_suffix(']').context(SyntaxSnafu {
                    line: i + 1,
                    message: "unterminated section header",
                })?;
                let name = name.trim();
                let idx = match self.position(name) {
                    Some(idx) => idx,
                    None => {
                        self.sections.push((name.to_string(), Section::new()));
                        self.sections.len() - 1
                    }
                };
                current = Some(idx);
                continue;
            }

            let idx = current.context(SyntaxSnafu {
                line: i + 1,
                message: "key found before any section header",
            })?;
            let (key, value) = match line.split_once('=') {
                Some((k, v)) => (k.trim(), Some(v.trim().to_string())),
                None => (line, None),
            };
            self.sections[idx].1.set(key, value);
        }
        Ok(())
    }

    fn write_all(&self) -> String {
        let mut out = String::new();
        for line in &self.preamble {
            out.push_str(line);
            out.push('\n');
        }
        for (name, section) in &self.sections {
            out.push('[');
            out.push_str(name);
            out.push_str("]\n");
            for line in &section.lines {
                match line {
                    Line::Entry { key, value } => {
                        out.push_str(key);
                        if let Some(value) = value {
                            out.push('=');
                            out.push_str(value);
                        }
                    }
                    Line::Trivia(text) => out.push_str(text),
                }
                out.push('\n');
            }
        }
        out
    }
}

/// Format raw bytes as a `0x` prefixed hex string
pub fn encode_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Parse a hex string, with or without a `0x` prefix, into raw bytes
pub fn decode_hex(value: &str) -> Result<Vec<u8>, DocumentError> {
    let trimmed = value.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    hex::decode(digits).context(InvalidHexSnafu { value })
}
