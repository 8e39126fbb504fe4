//! Structured page content.
//!
//! This module provides:
//! - BlockTypeRegistry: Block schema, frozen after start-up
//! - ContentStream: Ordered heterogeneous blocks with lossless JSON round-trips
//! - RendererRegistry: Lazy per-block HTML rendering
//! - LinkFields: Page → document → external link resolution

pub mod block_render;
pub mod block_types;
pub mod link;
pub mod standard;
pub mod stream;

pub use block_render::{
    ImageCredits, RenderContext, RenderError, RenderedStream, RendererRegistry, render,
};
pub use block_types::{
    BlockShape, BlockType, BlockTypeRegistry, BlockTypeRegistryBuilder, ChildBlock, LeafKind,
    SchemaError,
};
pub use link::{LinkFields, LinkResolver, MenuEntry, StaticLinkResolver, menu_entries, resolve_link};
pub use standard::{MENU_ITEM, MENU_STREAM, MENU_SUBITEM, STORY_STREAM};
pub use stream::{Block, BlockValue, ContentError, ContentStream, OpaqueBlock, StreamEntry};
