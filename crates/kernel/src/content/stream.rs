//! Content streams: ordered, heterogeneous sequences of typed blocks.
//!
//! The durable form is a JSON array of `{"type", "value", "id"}` entries.
//! Entries whose type is not registered (or not allowed where they appear)
//! are kept verbatim as [`OpaqueBlock`]s and written back byte-for-byte,
//! so removing a block type from the schema never corrupts stored content.
//! A value that does not match a *known* type's shape fails the parse, as does
//! an untagged entry inside a known choice or nested stream.

use std::collections::HashMap;

use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_json::value::RawValue;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use super::block_types::{BlockShape, BlockType, BlockTypeRegistry, LeafKind, SchemaError};

/// Errors raised while loading or editing a content stream.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ContentError {
    /// A block of a known type does not match its declared shape.
    #[error("malformed block at index {index} ({path}): {reason}")]
    MalformedBlock {
        index: usize,
        path: String,
        reason: String,
    },

    /// The document is not a JSON array of entries.
    #[error("invalid content document: {0}")]
    InvalidDocument(String),

    /// Mutation addressed a position outside the stream.
    #[error("block index {index} out of range (stream has {len} entries)")]
    IndexOutOfRange { index: usize, len: usize },

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// The value of a block, shaped like its block type.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockValue {
    Leaf(Value),
    /// Present children in schema order; absent optional children are omitted.
    Struct(Vec<(String, Block)>),
    List(Vec<Block>),
    Choice(Box<StreamEntry>),
    Stream(Vec<StreamEntry>),
}

/// A block instance: its type name, value and optional editor id.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub block_type: String,
    pub value: BlockValue,
    pub id: Option<String>,
}

impl Block {
    pub fn new(block_type: &str, value: BlockValue) -> Self {
        Self {
            block_type: block_type.to_string(),
            value,
            id: None,
        }
    }

    /// A leaf block holding a scalar JSON value.
    pub fn leaf(block_type: &str, value: impl Into<Value>) -> Self {
        Self::new(block_type, BlockValue::Leaf(value.into()))
    }

    /// A struct block from `(child name, child block)` pairs.
    pub fn structure(block_type: &str, children: Vec<(&str, Block)>) -> Self {
        Self::new(
            block_type,
            BlockValue::Struct(
                children
                    .into_iter()
                    .map(|(name, block)| (name.to_string(), block))
                    .collect(),
            ),
        )
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Named child of a struct block.
    pub fn child(&self, name: &str) -> Option<&Block> {
        match &self.value {
            BlockValue::Struct(children) => children
                .iter()
                .find(|(child, _)| child == name)
                .map(|(_, block)| block),
            _ => None,
        }
    }

    /// String value of a leaf block.
    pub fn as_str(&self) -> Option<&str> {
        match &self.value {
            BlockValue::Leaf(value) => value.as_str(),
            _ => None,
        }
    }

    /// Reference value of a leaf block.
    pub fn as_uuid(&self) -> Option<Uuid> {
        self.as_str().and_then(|s| Uuid::parse_str(s).ok())
    }

    /// Items of a list block.
    pub fn items(&self) -> &[Block] {
        match &self.value {
            BlockValue::List(items) => items,
            _ => &[],
        }
    }

    /// Entries of a nested stream block.
    pub fn entries(&self) -> &[StreamEntry] {
        match &self.value {
            BlockValue::Stream(entries) => entries,
            _ => &[],
        }
    }

    fn collect<'a>(&'a self, out: &mut Vec<&'a Block>) {
        out.push(self);
        match &self.value {
            BlockValue::Leaf(_) => {}
            BlockValue::Struct(children) => {
                for (_, child) in children {
                    child.collect(out);
                }
            }
            BlockValue::List(items) => {
                for item in items {
                    item.collect(out);
                }
            }
            BlockValue::Choice(entry) => {
                if let Some(block) = entry.as_block() {
                    block.collect(out);
                }
            }
            BlockValue::Stream(entries) => {
                for block in entries.iter().filter_map(StreamEntry::as_block) {
                    block.collect(out);
                }
            }
        }
    }
}

/// An entry that could not be resolved against the schema, kept verbatim.
#[derive(Debug, Clone)]
pub struct OpaqueBlock {
    /// The entry's `type` tag, if it had a readable one.
    pub type_name: Option<String>,
    /// The entire entry exactly as it was stored.
    pub raw: Box<RawValue>,
}

impl PartialEq for OpaqueBlock {
    fn eq(&self, other: &Self) -> bool {
        self.type_name == other.type_name && self.raw.get() == other.raw.get()
    }
}

/// One position in a stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEntry {
    Known(Block),
    Opaque(OpaqueBlock),
}

impl StreamEntry {
    pub fn as_block(&self) -> Option<&Block> {
        match self {
            StreamEntry::Known(block) => Some(block),
            StreamEntry::Opaque(_) => None,
        }
    }

    pub fn is_opaque(&self) -> bool {
        matches!(self, StreamEntry::Opaque(_))
    }

    /// The entry's type tag, whether or not it is registered.
    pub fn type_name(&self) -> Option<&str> {
        match self {
            StreamEntry::Known(block) => Some(&block.block_type),
            StreamEntry::Opaque(opaque) => opaque.type_name.as_deref(),
        }
    }
}

impl From<Block> for StreamEntry {
    fn from(block: Block) -> Self {
        StreamEntry::Known(block)
    }
}

/// Ordered sequence of top-level blocks owned by one content item.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContentStream {
    entries: Vec<StreamEntry>,
}

impl ContentStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a stored stream, accepting any registered top-level type.
    pub fn parse(text: &str, registry: &BlockTypeRegistry) -> Result<Self, ContentError> {
        parse_document(text, registry, None)
    }

    /// Parse a stored stream whose entries must be children of `stream_type`.
    ///
    /// Registered types that the stream does not allow are preserved as
    /// opaque entries.
    pub fn parse_for(
        text: &str,
        registry: &BlockTypeRegistry,
        stream_type: &str,
    ) -> Result<Self, ContentError> {
        let allowed = match &registry.resolve(stream_type)?.shape {
            BlockShape::Stream { children } => children.as_slice(),
            _ => {
                return Err(ContentError::InvalidDocument(format!(
                    "block type '{stream_type}' is not a stream"
                )));
            }
        };
        parse_document(text, registry, Some(allowed))
    }

    /// Write the stream back to its durable JSON form.
    pub fn serialize(&self) -> Result<String, ContentError> {
        serde_json::to_string(self).map_err(|e| ContentError::InvalidDocument(e.to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[StreamEntry] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, StreamEntry> {
        self.entries.iter()
    }

    /// Append a block, assigning an id if it has none.
    pub fn push(&mut self, registry: &BlockTypeRegistry, block: Block) -> Result<(), ContentError> {
        let block = validate_block(registry, block, self.entries.len())?;
        self.entries.push(StreamEntry::Known(block));
        Ok(())
    }

    /// Insert a block before `index` (`index == len` appends).
    pub fn insert(
        &mut self,
        registry: &BlockTypeRegistry,
        index: usize,
        block: Block,
    ) -> Result<(), ContentError> {
        if index > self.entries.len() {
            return Err(self.out_of_range(index));
        }
        let block = validate_block(registry, block, index)?;
        self.entries.insert(index, StreamEntry::Known(block));
        Ok(())
    }

    /// Replace the entry at `index`, returning the previous one.
    pub fn replace(
        &mut self,
        registry: &BlockTypeRegistry,
        index: usize,
        block: Block,
    ) -> Result<StreamEntry, ContentError> {
        if index >= self.entries.len() {
            return Err(self.out_of_range(index));
        }
        let block = validate_block(registry, block, index)?;
        Ok(std::mem::replace(
            &mut self.entries[index],
            StreamEntry::Known(block),
        ))
    }

    /// Remove and return the entry at `index`.
    pub fn remove(&mut self, index: usize) -> Result<StreamEntry, ContentError> {
        if index >= self.entries.len() {
            return Err(self.out_of_range(index));
        }
        Ok(self.entries.remove(index))
    }

    /// Move the entry at `from` so that it ends up at position `to`.
    pub fn move_block(&mut self, from: usize, to: usize) -> Result<(), ContentError> {
        let len = self.entries.len();
        if from >= len {
            return Err(self.out_of_range(from));
        }
        if to >= len {
            return Err(self.out_of_range(to));
        }
        let entry = self.entries.remove(from);
        self.entries.insert(to, entry);
        Ok(())
    }

    fn out_of_range(&self, index: usize) -> ContentError {
        ContentError::IndexOutOfRange {
            index,
            len: self.entries.len(),
        }
    }

    /// Top-level known blocks of the given type, in stream order.
    pub fn blocks_of_type<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Block> + 'a {
        self.entries
            .iter()
            .filter_map(StreamEntry::as_block)
            .filter(move |block| block.block_type == name)
    }

    /// Every known block at any depth, depth-first in document order.
    pub fn walk(&self) -> Vec<&Block> {
        let mut out = Vec::new();
        for block in self.entries.iter().filter_map(StreamEntry::as_block) {
            block.collect(&mut out);
        }
        out
    }

    /// Distinct image ids referenced anywhere in the stream, in first-use order.
    pub fn image_refs(&self, registry: &BlockTypeRegistry) -> Vec<Uuid> {
        let mut refs: Vec<Uuid> = Vec::new();
        for block in self.walk() {
            let is_image = matches!(leaf_kind(registry, block), Some(LeafKind::ImageRef));
            if let Some(id) = block.as_uuid().filter(|_| is_image)
                && !refs.contains(&id)
            {
                refs.push(id);
            }
        }
        refs
    }

    /// First non-empty prose in the stream, for teasers.
    ///
    /// Rich text is preferred; plain text (headings, captions) is the fallback.
    pub fn first_text(&self, registry: &BlockTypeRegistry) -> Option<&str> {
        let blocks = self.walk();
        let text_of = |wanted: fn(&LeafKind) -> bool| {
            blocks.iter().copied().find_map(|block| {
                leaf_kind(registry, block)
                    .filter(|kind| wanted(kind))
                    .and_then(|_| block.as_str())
                    .filter(|s| !s.trim().is_empty())
            })
        };
        text_of(|kind| matches!(kind, LeafKind::RichText))
            .or_else(|| text_of(|kind| matches!(kind, LeafKind::Text { .. })))
    }
}

impl<'a> IntoIterator for &'a ContentStream {
    type Item = &'a StreamEntry;
    type IntoIter = std::slice::Iter<'a, StreamEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl FromIterator<StreamEntry> for ContentStream {
    fn from_iter<I: IntoIterator<Item = StreamEntry>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

fn leaf_kind<'r>(registry: &'r BlockTypeRegistry, block: &Block) -> Option<&'r LeafKind> {
    registry.get(&block.block_type).and_then(BlockType::leaf_kind)
}

// ---------------------------------------------------------------------------
// Serialization
// ---------------------------------------------------------------------------

impl Serialize for Block {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = if self.id.is_some() { 3 } else { 2 };
        let mut map = serializer.serialize_map(Some(len))?;
        map.serialize_entry("type", &self.block_type)?;
        map.serialize_entry("value", &self.value)?;
        if let Some(id) = &self.id {
            map.serialize_entry("id", id)?;
        }
        map.end()
    }
}

impl Serialize for BlockValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            BlockValue::Leaf(value) => value.serialize(serializer),
            BlockValue::Struct(children) => {
                let mut map = serializer.serialize_map(Some(children.len()))?;
                for (name, child) in children {
                    map.serialize_entry(name, &child.value)?;
                }
                map.end()
            }
            BlockValue::List(items) => serializer.collect_seq(items.iter().map(|b| &b.value)),
            BlockValue::Choice(entry) => entry.serialize(serializer),
            BlockValue::Stream(entries) => serializer.collect_seq(entries),
        }
    }
}

impl Serialize for StreamEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            StreamEntry::Known(block) => block.serialize(serializer),
            StreamEntry::Opaque(opaque) => opaque.raw.serialize(serializer),
        }
    }
}

impl Serialize for ContentStream {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(&self.entries)
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct RawEntry {
    #[serde(rename = "type")]
    type_name: String,
    value: Option<Box<RawValue>>,
    id: Option<String>,
}

fn parse_document(
    text: &str,
    registry: &BlockTypeRegistry,
    allowed: Option<&[String]>,
) -> Result<ContentStream, ContentError> {
    if text.trim().is_empty() {
        return Ok(ContentStream::new());
    }

    let raw_entries: Vec<Box<RawValue>> = serde_json::from_str(text)
        .map_err(|e| ContentError::InvalidDocument(e.to_string()))?;

    let mut entries = Vec::with_capacity(raw_entries.len());
    for (index, raw) in raw_entries.iter().enumerate() {
        let parser = Parser { registry, index };
        entries.push(parser.entry(raw, allowed, &mut Vec::new())?);
    }
    Ok(ContentStream { entries })
}

/// Re-validate a block built in memory by round-tripping it through the parser.
fn validate_block(
    registry: &BlockTypeRegistry,
    mut block: Block,
    index: usize,
) -> Result<Block, ContentError> {
    registry.resolve(&block.block_type)?;
    if block.id.is_none() {
        block.id = Some(Uuid::now_v7().to_string());
    }

    let text =
        serde_json::to_string(&block).map_err(|e| ContentError::InvalidDocument(e.to_string()))?;
    let raw =
        RawValue::from_string(text).map_err(|e| ContentError::InvalidDocument(e.to_string()))?;

    match (Parser { registry, index }).entry(&raw, None, &mut Vec::new())? {
        StreamEntry::Known(parsed) => Ok(parsed),
        StreamEntry::Opaque(_) => Err(SchemaError::UnknownType(block.block_type).into()),
    }
}

struct Parser<'r> {
    registry: &'r BlockTypeRegistry,
    /// Top-level position reported in errors.
    index: usize,
}

impl Parser<'_> {
    fn malformed(&self, path: &[String], reason: impl Into<String>) -> ContentError {
        ContentError::MalformedBlock {
            index: self.index,
            path: path.join("."),
            reason: reason.into(),
        }
    }

    /// Parse one top-level `{"type", "value", "id"}` entry.
    ///
    /// Entries without a readable type tag are kept as opaque blocks.
    fn entry(
        &self,
        raw: &RawValue,
        allowed: Option<&[String]>,
        path: &mut Vec<String>,
    ) -> Result<StreamEntry, ContentError> {
        let entry: RawEntry = match serde_json::from_str(raw.get()) {
            Ok(entry) => entry,
            Err(e) => {
                debug!(error = %e, "preserving unreadable stream entry");
                return Ok(StreamEntry::Opaque(OpaqueBlock {
                    type_name: None,
                    raw: raw.to_owned(),
                }));
            }
        };
        self.tagged(entry, raw, allowed, path)
    }

    /// Parse a tagged entry inside a known Choice or Stream value.
    ///
    /// The container is known, so an entry without a type tag is corrupt.
    fn nested_entry(
        &self,
        raw: &RawValue,
        allowed: &[String],
        path: &mut Vec<String>,
    ) -> Result<StreamEntry, ContentError> {
        let entry: RawEntry = serde_json::from_str(raw.get())
            .map_err(|e| self.malformed(path, format!("expected a tagged entry: {e}")))?;
        self.tagged(entry, raw, Some(allowed), path)
    }

    fn tagged(
        &self,
        entry: RawEntry,
        raw: &RawValue,
        allowed: Option<&[String]>,
        path: &mut Vec<String>,
    ) -> Result<StreamEntry, ContentError> {
        let permitted = allowed.is_none_or(|names| names.contains(&entry.type_name));
        let Some(block_type) = self.registry.get(&entry.type_name).filter(|_| permitted) else {
            debug!(block_type = %entry.type_name, "preserving unrecognised block");
            return Ok(StreamEntry::Opaque(OpaqueBlock {
                type_name: Some(entry.type_name),
                raw: raw.to_owned(),
            }));
        };

        path.push(entry.type_name.clone());
        let value = self.value(block_type, entry.value.as_deref(), true, path)?;
        path.pop();

        Ok(StreamEntry::Known(Block {
            block_type: entry.type_name,
            value,
            id: entry.id,
        }))
    }

    fn value(
        &self,
        block_type: &BlockType,
        raw: Option<&RawValue>,
        required: bool,
        path: &mut Vec<String>,
    ) -> Result<BlockValue, ContentError> {
        let Some(raw) = raw else {
            return Err(self.malformed(path, "missing value"));
        };

        match &block_type.shape {
            BlockShape::Leaf { kind } => {
                let value: Value = serde_json::from_str(raw.get())
                    .map_err(|e| self.malformed(path, e.to_string()))?;
                validate_leaf(kind, &value, required).map_err(|reason| self.malformed(path, reason))?;
                Ok(BlockValue::Leaf(value))
            }
            BlockShape::Struct { children } => {
                let fields: HashMap<String, Box<RawValue>> = serde_json::from_str(raw.get())
                    .map_err(|e| self.malformed(path, format!("expected an object: {e}")))?;

                let mut parsed = Vec::with_capacity(children.len());
                for child in children {
                    path.push(child.name.clone());
                    let present = fields.get(&child.name).map(Box::as_ref).filter(|r| !is_null(r));
                    match present {
                        Some(child_raw) => {
                            let child_type = self.registry.resolve(&child.block_type)?;
                            let value = self.value(child_type, Some(child_raw), child.required, path)?;
                            parsed.push((child.name.clone(), Block::new(&child.block_type, value)));
                        }
                        None if child.required => {
                            return Err(self.malformed(path, "missing required child"));
                        }
                        None => {}
                    }
                    path.pop();
                }
                Ok(BlockValue::Struct(parsed))
            }
            BlockShape::List { child } => {
                let items: Vec<Box<RawValue>> = serde_json::from_str(raw.get())
                    .map_err(|e| self.malformed(path, format!("expected an array: {e}")))?;
                let child_type = self.registry.resolve(child)?;

                let mut parsed = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    path.push(format!("[{i}]"));
                    let value = self.value(child_type, Some(item), true, path)?;
                    parsed.push(Block::new(child, value));
                    path.pop();
                }
                Ok(BlockValue::List(parsed))
            }
            BlockShape::Choice { options } => {
                let entry = self.nested_entry(raw, options, path)?;
                Ok(BlockValue::Choice(Box::new(entry)))
            }
            BlockShape::Stream { children } => {
                let items: Vec<Box<RawValue>> = serde_json::from_str(raw.get())
                    .map_err(|e| self.malformed(path, format!("expected an array: {e}")))?;

                let mut parsed = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    path.push(format!("[{i}]"));
                    parsed.push(self.nested_entry(item, children, path)?);
                    path.pop();
                }
                Ok(BlockValue::Stream(parsed))
            }
        }
    }
}

fn is_null(raw: &RawValue) -> bool {
    raw.get().trim() == "null"
}

fn validate_leaf(kind: &LeafKind, value: &Value, required: bool) -> Result<(), String> {
    if value.is_null() {
        return if required {
            Err("value is required".to_string())
        } else {
            Ok(())
        };
    }

    match kind {
        LeafKind::Text { max_length } => {
            let text = expect_str(value, required)?;
            if let Some(max) = max_length
                && text.chars().count() > *max
            {
                return Err(format!("text longer than {max} characters"));
            }
            Ok(())
        }
        LeafKind::RichText | LeafKind::RawHtml => expect_str(value, required).map(|_| ()),
        LeafKind::Url | LeafKind::Embed => {
            let text = expect_str(value, required)?;
            if text.is_empty() {
                return Ok(());
            }
            let url = url::Url::parse(text).map_err(|e| format!("invalid URL: {e}"))?;
            match url.scheme() {
                "http" | "https" => Ok(()),
                other => Err(format!("unsupported URL scheme '{other}'")),
            }
        }
        LeafKind::Integer => value
            .as_i64()
            .map(|_| ())
            .ok_or_else(|| "expected an integer".to_string()),
        LeafKind::Boolean => value
            .as_bool()
            .map(|_| ())
            .ok_or_else(|| "expected a boolean".to_string()),
        LeafKind::Date => {
            let text = expect_str(value, required)?;
            chrono::NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .map(|_| ())
                .map_err(|e| format!("invalid date: {e}"))
        }
        LeafKind::ImageRef | LeafKind::PageRef | LeafKind::DocumentRef => {
            let text = value
                .as_str()
                .ok_or_else(|| "expected a reference id".to_string())?;
            Uuid::parse_str(text)
                .map(|_| ())
                .map_err(|e| format!("invalid reference id: {e}"))
        }
        LeafKind::Select { options } => {
            let text = expect_str(value, required)?;
            if options.iter().any(|o| o == text) {
                Ok(())
            } else {
                Err(format!("'{text}' is not one of: {}", options.join(", ")))
            }
        }
    }
}

fn expect_str(value: &Value, required: bool) -> Result<&str, String> {
    let text = value
        .as_str()
        .ok_or_else(|| "expected a string".to_string())?;
    if required && text.is_empty() {
        return Err("value is required".to_string());
    }
    Ok(text)
}
