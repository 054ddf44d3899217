//! Opcode reference extraction from the ref.x86asm.net XML edition
//!
//! The reference groups primary opcodes under `<one-byte>` and `<two-byte>`
//! sections. Each `<pri_opcd value="XX">` is flattened into a single
//! description string keyed by its normalized hex value.

use anyhow::{Context, Result};
use log::{debug, info};
use roxmltree::{Document, Node, ParsingOptions};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

const ONE_BYTE_SECTION: &str = "one-byte";
const TWO_BYTE_SECTION: &str = "two-byte";

#[derive(Debug)]
pub enum ReferenceError {
    /// The document is not well-formed XML.
    Xml(roxmltree::Error),
    /// A required `<one-byte>` or `<two-byte>` section is absent.
    MissingSection(&'static str),
    /// A `<pri_opcd>` element without a `value` attribute.
    MissingValue,
    /// A `value` attribute that is not a hex number.
    InvalidOpcode(String),
}

impl fmt::Display for ReferenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Xml(e) => write!(f, "malformed XML: {}", e),
            Self::MissingSection(name) => write!(f, "missing <{}> section", name),
            Self::MissingValue => f.write_str("<pri_opcd> without a value attribute"),
            Self::InvalidOpcode(value) => write!(f, "invalid opcode value '{}'", value),
        }
    }
}

impl std::error::Error for ReferenceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Xml(e) => Some(e),
            _ => None,
        }
    }
}

/// Render an opcode attribute as `0x` plus lowercase hex, at least two digits.
pub fn normalize_opcode(value: &str) -> Result<String, ReferenceError> {
    let trimmed = value.trim();
    let parsed = u32::from_str_radix(trimmed, 16)
        .map_err(|_| ReferenceError::InvalidOpcode(value.to_string()))?;
    Ok(format!("0x{:02x}", parsed))
}

/// One `<pri_opcd>` element, flattened
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpcodeRecord {
    pub key: String,
    pub mnemonic: String,
    pub src: String,
    pub dst: String,
    pub note: String,
}

impl OpcodeRecord {
    pub fn from_node(node: Node) -> Result<Self, ReferenceError> {
        let value = node
            .attribute("value")
            .ok_or(ReferenceError::MissingValue)?;
        let key = normalize_opcode(value)?;

        let syntax = first_descendant(node, "syntax");
        let note = first_descendant(node, "note");

        Ok(Self {
            key,
            mnemonic: text_of(first_descendant(node, "mnem")),
            src: text_of(syntax.and_then(|s| first_descendant(s, "src"))),
            dst: text_of(syntax.and_then(|s| first_descendant(s, "dst"))),
            note: text_of(note.and_then(|n| first_descendant(n, "brief"))),
        })
    }

    /// Empty fields are kept, so adjacent separators are expected.
    pub fn description(&self) -> String {
        format!("{} {} {} {}", self.mnemonic, self.src, self.dst, self.note)
    }
}

fn first_descendant<'a, 'input>(node: Node<'a, 'input>, tag: &str) -> Option<Node<'a, 'input>> {
    node.descendants()
        .skip(1)
        .find(|n| n.is_element() && n.has_tag_name(tag))
}

/// Text of an element on one line: indentation-only nodes are dropped and
/// remaining whitespace runs collapse to a single space.
fn text_of(node: Option<Node>) -> String {
    let Some(node) = node else {
        return String::new();
    };
    let joined = node
        .descendants()
        .filter(|n| n.is_text())
        .filter_map(|n| n.text())
        .filter(|t| !t.trim().is_empty())
        .collect::<String>();
    joined.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalized opcode key to description, sorted by key
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct OpcodeMap(BTreeMap<String, String>);

impl OpcodeMap {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn insert(&mut self, key: String, description: String) -> Option<String> {
        self.0.insert(key, description)
    }

    fn from_section(section: Node, name: &str) -> Result<Self, ReferenceError> {
        let mut map = Self::default();
        for op in section
            .descendants()
            .filter(|n| n.is_element() && n.has_tag_name("pri_opcd"))
        {
            let record = OpcodeRecord::from_node(op)?;
            let description = record.description();
            if let Some(previous) = map.insert(record.key.clone(), description) {
                debug!("{}: {} redefined, dropping '{}'", name, record.key, previous);
            }
        }
        Ok(map)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for OpcodeMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Both opcode tables of a reference document
#[derive(Debug, Clone, Default)]
pub struct Reference {
    pub one_byte: OpcodeMap,
    pub two_byte: OpcodeMap,
}

impl Reference {
    /// Write both tables as JSON objects, for inspection only.
    pub fn dump(&self, one_byte_path: &Path, two_byte_path: &Path) -> Result<()> {
        write_json(&self.one_byte, one_byte_path)?;
        write_json(&self.two_byte, two_byte_path)?;
        info!(
            "Dumped opcode tables to {} and {}",
            one_byte_path.display(),
            two_byte_path.display()
        );
        Ok(())
    }
}

fn write_json(map: &OpcodeMap, path: &Path) -> Result<()> {
    let content = serde_json::to_string(map)?;
    fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

pub fn parse_reference(xml: &str) -> Result<Reference, ReferenceError> {
    let options = ParsingOptions {
        allow_dtd: true,
        ..ParsingOptions::default()
    };
    let doc = Document::parse_with_options(xml, options).map_err(ReferenceError::Xml)?;

    let section = |name: &'static str| {
        doc.descendants()
            .find(|n| n.is_element() && n.has_tag_name(name))
            .ok_or(ReferenceError::MissingSection(name))
    };

    let one_byte = OpcodeMap::from_section(section(ONE_BYTE_SECTION)?, ONE_BYTE_SECTION)?;
    let two_byte = OpcodeMap::from_section(section(TWO_BYTE_SECTION)?, TWO_BYTE_SECTION)?;

    Ok(Reference { one_byte, two_byte })
}

pub fn load_reference(path: &Path) -> Result<Reference> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read reference: {}", path.display()))?;
    let reference = parse_reference(&content)
        .with_context(|| format!("Failed to parse reference: {}", path.display()))?;

    info!(
        "Loaded {} one-byte and {} two-byte opcodes from {}",
        reference.one_byte.len(),
        reference.two_byte.len(),
        path.display()
    );
    Ok(reference)
}
