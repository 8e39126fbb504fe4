//! Block type schema and registry.
//!
//! Provides:
//! - `BlockType`: Structural descriptor for one block type (leaf, struct, list, choice, stream)
//! - `BlockTypeRegistryBuilder`: Mutable registration phase with duplicate and cycle checks
//! - `BlockTypeRegistry`: Frozen, shareable registry used on the read path

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors raised while declaring or resolving block types.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchemaError {
    /// A block type with this name is already registered.
    #[error("block type '{0}' is already registered")]
    DuplicateType(String),

    /// Registering the block type would make it contain itself.
    #[error("block type '{name}' would contain itself (cycle: {})", .path.join(" -> "))]
    CyclicSchema { name: String, path: Vec<String> },

    /// No block type is registered under this name.
    #[error("unknown block type '{0}'")]
    UnknownType(String),

    /// Editor metadata could not be produced.
    #[error("cannot describe block type '{name}': {reason}")]
    Metadata { name: String, reason: String },
}

/// Scalar kinds a leaf block can hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum LeafKind {
    /// Plain single-line text.
    Text { max_length: Option<usize> },
    /// HTML produced by the rich text editor.
    RichText,
    /// HTML inserted verbatim.
    RawHtml,
    /// Absolute http(s) URL.
    Url,
    /// URL of an embeddable resource (video, tweet, ...).
    Embed,
    Integer,
    Boolean,
    /// Calendar date, `YYYY-MM-DD`.
    Date,
    /// Reference to an image source by id.
    ImageRef,
    /// Reference to a page by id.
    PageRef,
    /// Reference to a document by id.
    DocumentRef,
    /// One of a fixed set of options.
    Select { options: Vec<String> },
}

/// A named child slot of a struct block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChildBlock {
    /// Key of the child inside the struct value.
    pub name: String,
    /// Registered block type of the child.
    pub block_type: String,
    /// Whether the key must be present (and non-null).
    pub required: bool,
}

impl ChildBlock {
    /// A child that must always be present.
    pub fn required(name: &str, block_type: &str) -> Self {
        Self {
            name: name.to_string(),
            block_type: block_type.to_string(),
            required: true,
        }
    }

    /// A child that may be absent or null.
    pub fn optional(name: &str, block_type: &str) -> Self {
        Self {
            name: name.to_string(),
            block_type: block_type.to_string(),
            required: false,
        }
    }
}

/// Structural shape of a block type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "shape")]
pub enum BlockShape {
    /// A single scalar value.
    Leaf { kind: LeafKind },
    /// Fixed, ordered set of named children.
    Struct { children: Vec<ChildBlock> },
    /// Ordered sequence of blocks of one type.
    List { child: String },
    /// Exactly one block, tagged with one of the allowed types.
    Choice { options: Vec<String> },
    /// Ordered sequence of tagged blocks drawn from the allowed types.
    Stream { children: Vec<String> },
}

/// Definition of a single block type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockType {
    /// Unique machine name (e.g. "paragraph", "aligned_image").
    pub name: String,
    /// Human-readable label for the editor.
    pub label: String,
    /// Editor icon name.
    pub icon: Option<String>,
    /// Help text shown next to the editing widget.
    pub help_text: Option<String>,
    /// Structural shape.
    #[serde(flatten)]
    pub shape: BlockShape,
}

impl BlockType {
    fn with_shape(name: &str, shape: BlockShape) -> Self {
        Self {
            name: name.to_string(),
            label: default_label(name),
            icon: None,
            help_text: None,
            shape,
        }
    }

    /// Declare a leaf block type.
    pub fn leaf(name: &str, kind: LeafKind) -> Self {
        Self::with_shape(name, BlockShape::Leaf { kind })
    }

    /// Declare a struct block type.
    pub fn structure(name: &str, children: Vec<ChildBlock>) -> Self {
        Self::with_shape(name, BlockShape::Struct { children })
    }

    /// Declare a list block type.
    pub fn list(name: &str, child: &str) -> Self {
        Self::with_shape(
            name,
            BlockShape::List {
                child: child.to_string(),
            },
        )
    }

    /// Declare a choice block type.
    pub fn choice(name: &str, options: &[&str]) -> Self {
        Self::with_shape(
            name,
            BlockShape::Choice {
                options: options.iter().map(|s| s.to_string()).collect(),
            },
        )
    }

    /// Declare a stream block type.
    pub fn stream(name: &str, children: &[&str]) -> Self {
        Self::with_shape(
            name,
            BlockShape::Stream {
                children: children.iter().map(|s| s.to_string()).collect(),
            },
        )
    }

    /// Override the editor label.
    pub fn with_label(mut self, label: &str) -> Self {
        self.label = label.to_string();
        self
    }

    /// Set the editor icon.
    pub fn with_icon(mut self, icon: &str) -> Self {
        self.icon = Some(icon.to_string());
        self
    }

    /// Set the editor help text.
    pub fn with_help_text(mut self, help_text: &str) -> Self {
        self.help_text = Some(help_text.to_string());
        self
    }

    /// Leaf kind, if this is a leaf block.
    pub fn leaf_kind(&self) -> Option<&LeafKind> {
        match &self.shape {
            BlockShape::Leaf { kind } => Some(kind),
            _ => None,
        }
    }

    /// Names of all block types this type directly contains.
    pub fn child_type_names(&self) -> Vec<&str> {
        match &self.shape {
            BlockShape::Leaf { .. } => Vec::new(),
            BlockShape::Struct { children } => {
                children.iter().map(|c| c.block_type.as_str()).collect()
            }
            BlockShape::List { child } => vec![child.as_str()],
            BlockShape::Choice { options } => options.iter().map(String::as_str).collect(),
            BlockShape::Stream { children } => children.iter().map(String::as_str).collect(),
        }
    }
}

/// "aligned_image" -> "Aligned image".
fn default_label(name: &str) -> String {
    let spaced = name.replace('_', " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Registration phase of the block schema.
///
/// Children may be referenced before they are registered; dangling
/// references are reported by [`BlockTypeRegistryBuilder::freeze`].
#[derive(Debug, Default)]
pub struct BlockTypeRegistryBuilder {
    types: HashMap<String, Arc<BlockType>>,
    order: Vec<String>,
}

impl BlockTypeRegistryBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a block type under its unique name.
    pub fn register(&mut self, block_type: BlockType) -> Result<(), SchemaError> {
        if self.types.contains_key(&block_type.name) {
            return Err(SchemaError::DuplicateType(block_type.name));
        }

        if let Some(path) = self.find_cycle(&block_type) {
            return Err(SchemaError::CyclicSchema {
                name: block_type.name,
                path,
            });
        }

        debug!(block_type = %block_type.name, "registered block type");
        self.order.push(block_type.name.clone());
        self.types
            .insert(block_type.name.clone(), Arc::new(block_type));
        Ok(())
    }

    /// Look up a registered block type.
    pub fn resolve(&self, name: &str) -> Result<&BlockType, SchemaError> {
        self.types
            .get(name)
            .map(Arc::as_ref)
            .ok_or_else(|| SchemaError::UnknownType(name.to_string()))
    }

    /// Depth-first walk from the candidate's children through already
    /// registered types. Any cycle must pass through the most recently
    /// registered member, so checking the candidate is sufficient.
    fn find_cycle(&self, candidate: &BlockType) -> Option<Vec<String>> {
        let mut stack: Vec<(&str, Vec<String>)> = candidate
            .child_type_names()
            .into_iter()
            .map(|child| (child, vec![candidate.name.clone(), child.to_string()]))
            .collect();
        let mut seen: HashSet<&str> = HashSet::new();

        while let Some((name, path)) = stack.pop() {
            if name == candidate.name {
                return Some(path);
            }
            if !seen.insert(name) {
                continue;
            }
            if let Some(existing) = self.types.get(name) {
                for child in existing.child_type_names() {
                    let mut next = path.clone();
                    next.push(child.to_string());
                    stack.push((child, next));
                }
            }
        }
        None
    }

    /// Finish registration and produce the immutable registry.
    pub fn freeze(self) -> Result<BlockTypeRegistry, SchemaError> {
        for name in &self.order {
            let Some(block_type) = self.types.get(name) else {
                continue;
            };
            for child in block_type.child_type_names() {
                if !self.types.contains_key(child) {
                    return Err(SchemaError::UnknownType(child.to_string()));
                }
            }
        }

        info!(count = self.types.len(), "block schema frozen");
        Ok(BlockTypeRegistry {
            inner: Arc::new(RegistryInner {
                types: self.types,
                order: self.order,
            }),
        })
    }
}

/// Immutable registry of block types.
///
/// Cloning is cheap; the registry is shared across requests without locking.
#[derive(Debug, Clone)]
pub struct BlockTypeRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Debug)]
struct RegistryInner {
    types: HashMap<String, Arc<BlockType>>,
    order: Vec<String>,
}

impl BlockTypeRegistry {
    /// Start a new registration phase.
    pub fn builder() -> BlockTypeRegistryBuilder {
        BlockTypeRegistryBuilder::new()
    }

    /// Look up a block type by name.
    pub fn resolve(&self, name: &str) -> Result<&BlockType, SchemaError> {
        self.get(name)
            .ok_or_else(|| SchemaError::UnknownType(name.to_string()))
    }

    /// Look up a block type by name, if registered.
    pub fn get(&self, name: &str) -> Option<&BlockType> {
        self.inner.types.get(name).map(Arc::as_ref)
    }

    /// Check whether a block type is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.inner.types.contains_key(name)
    }

    /// Return the number of registered block types.
    pub fn len(&self) -> usize {
        self.inner.types.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.types.is_empty()
    }

    /// Registered type names in registration order.
    pub fn type_names(&self) -> &[String] {
        &self.inner.order
    }

    /// Editor metadata for one block type.
    pub fn describe(&self, name: &str) -> Result<Value, SchemaError> {
        metadata(self.resolve(name)?)
    }

    /// Editor metadata for every registered block type, in registration order.
    pub fn describe_all(&self) -> Value {
        Value::Array(
            self.inner
                .order
                .iter()
                .filter_map(|name| self.get(name))
                .filter_map(|bt| match metadata(bt) {
                    Ok(value) => Some(value),
                    Err(e) => {
                        warn!(error = %e, "skipping block type in schema description");
                        None
                    }
                })
                .collect(),
        )
    }
}

fn metadata(block_type: &BlockType) -> Result<Value, SchemaError> {
    serde_json::to_value(block_type).map_err(|e| SchemaError::Metadata {
        name: block_type.name.clone(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn text(name: &str) -> BlockType {
        BlockType::leaf(name, LeafKind::Text { max_length: None })
    }

    #[test]
    fn register_and_resolve() {
        let mut builder = BlockTypeRegistry::builder();
        builder.register(text("char")).unwrap();
        builder
            .register(BlockType::structure(
                "pullquote",
                vec![ChildBlock::required("quote", "char")],
            ))
            .unwrap();

        let registry = builder.freeze().unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.resolve("pullquote").unwrap().label, "Pullquote");
        assert_eq!(registry.type_names(), &["char", "pullquote"]);
    }

    #[test]
    fn duplicate_name_rejected() {
        let mut builder = BlockTypeRegistry::builder();
        builder.register(text("char")).unwrap();
        let err = builder.register(text("char")).unwrap_err();
        assert_eq!(err, SchemaError::DuplicateType("char".to_string()));
    }

    #[test]
    fn self_containment_rejected() {
        let mut builder = BlockTypeRegistry::builder();
        let err = builder
            .register(BlockType::list("nested", "nested"))
            .unwrap_err();
        assert!(matches!(err, SchemaError::CyclicSchema { ref name, .. } if name == "nested"));
    }

    #[test]
    fn transitive_cycle_rejected() {
        let mut builder = BlockTypeRegistry::builder();
        builder.register(BlockType::list("a", "b")).unwrap();
        builder.register(BlockType::stream("b", &["c"])).unwrap();
        let err = builder
            .register(BlockType::structure(
                "c",
                vec![ChildBlock::required("inner", "a")],
            ))
            .unwrap_err();

        match err {
            SchemaError::CyclicSchema { name, path } => {
                assert_eq!(name, "c");
                assert_eq!(path, vec!["c", "a", "b", "c"]);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn diamond_is_not_a_cycle() {
        let mut builder = BlockTypeRegistry::builder();
        builder.register(text("char")).unwrap();
        builder.register(BlockType::list("left", "char")).unwrap();
        builder.register(BlockType::list("right", "char")).unwrap();
        builder
            .register(BlockType::choice("top", &["left", "right"]))
            .unwrap();
        assert!(builder.freeze().is_ok());
    }

    #[test]
    fn dangling_reference_fails_freeze() {
        let mut builder = BlockTypeRegistry::builder();
        builder.register(BlockType::list("gallery", "image")).unwrap();
        let err = builder.freeze().unwrap_err();
        assert_eq!(err, SchemaError::UnknownType("image".to_string()));
    }

    #[test]
    fn resolve_unknown_type() {
        let registry = BlockTypeRegistry::builder().freeze().unwrap();
        assert!(registry.is_empty());
        assert_eq!(
            registry.resolve("carousel").unwrap_err(),
            SchemaError::UnknownType("carousel".to_string())
        );
    }

    #[test]
    fn describe_exposes_editor_metadata() {
        let mut builder = BlockTypeRegistry::builder();
        builder
            .register(
                BlockType::leaf(
                    "alignment",
                    LeafKind::Select {
                        options: vec!["left".to_string(), "right".to_string()],
                    },
                )
                .with_icon("image")
                .with_help_text("How the image sits in the text"),
            )
            .unwrap();
        let registry = builder.freeze().unwrap();

        let meta = registry.describe("alignment").unwrap();
        assert_eq!(meta["name"], "alignment");
        assert_eq!(meta["shape"], "leaf");
        assert_eq!(meta["kind"]["type"], "select");
        assert_eq!(meta["kind"]["options"][1], "right");
        assert_eq!(meta["icon"], "image");
        assert_eq!(registry.describe_all().as_array().unwrap().len(), 1);

        assert_eq!(
            registry.describe("carousel").unwrap_err(),
            SchemaError::UnknownType("carousel".to_string())
        );
    }

    #[test]
    fn every_standard_type_has_metadata() {
        let registry = BlockTypeRegistry::standard().unwrap();
        for name in registry.type_names() {
            let meta = registry.describe(name).unwrap();
            assert_eq!(meta["name"], name.as_str());
            assert!(meta["shape"].is_string(), "{name} has no shape");
        }
        assert_eq!(
            registry.describe_all().as_array().unwrap().len(),
            registry.len()
        );
    }

    #[test]
    fn default_labels_are_humanised() {
        assert_eq!(default_label("aligned_image"), "Aligned image");
        assert_eq!(default_label("h2"), "H2");
        assert_eq!(default_label(""), "");
    }
}
