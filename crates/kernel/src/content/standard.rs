//! The site's built-in block schema.
//!
//! Story pages use the `story` stream; navigation uses the `menu` stream.
//! Link fields on pages and menu items share the `link` struct.

use super::block_types::{
    BlockType, BlockTypeRegistry, ChildBlock, LeafKind, SchemaError,
};

/// Top-level stream used by blog and story page bodies.
pub const STORY_STREAM: &str = "story";

/// Top-level stream used by the main navigation.
pub const MENU_STREAM: &str = "menu";

/// Entry type of the `menu` stream.
pub const MENU_ITEM: &str = "items";

/// Entry type of a menu item's `subitems` stream.
pub const MENU_SUBITEM: &str = "subitem";

/// Alignment options for inline images.
pub const IMAGE_ALIGNMENTS: &[&str] = &["left", "right", "half", "full"];

impl BlockTypeRegistry {
    /// Build and freeze the standard site schema.
    pub fn standard() -> Result<Self, SchemaError> {
        let mut builder = Self::builder();
        for block_type in standard_types() {
            builder.register(block_type)?;
        }
        builder.freeze()
    }
}

fn plain_text() -> LeafKind {
    LeafKind::Text { max_length: None }
}

/// Block types in dependency order; leaves first.
fn standard_types() -> Vec<BlockType> {
    vec![
        // Shared leaves
        BlockType::leaf("char", plain_text()).with_icon("title"),
        BlockType::leaf("rich_text", LeafKind::RichText).with_label("Rich text"),
        BlockType::leaf("image", LeafKind::ImageRef).with_icon("image"),
        BlockType::leaf("page", LeafKind::PageRef).with_icon("doc-empty-inverse"),
        BlockType::leaf("document", LeafKind::DocumentRef).with_icon("doc-full"),
        BlockType::leaf("url", LeafKind::Url).with_label("URL"),
        BlockType::leaf(
            "image_alignment",
            LeafKind::Select {
                options: IMAGE_ALIGNMENTS.iter().map(|s| s.to_string()).collect(),
            },
        )
        .with_label("Alignment"),
        // Story blocks
        BlockType::leaf("h2", plain_text())
            .with_icon("title")
            .with_label("Heading 2"),
        BlockType::leaf("h3", plain_text())
            .with_icon("title")
            .with_label("Heading 3"),
        BlockType::leaf("h4", plain_text())
            .with_icon("title")
            .with_label("Heading 4"),
        BlockType::leaf("intro", LeafKind::RichText).with_icon("pilcrow"),
        BlockType::leaf("paragraph", LeafKind::RichText).with_icon("pilcrow"),
        BlockType::structure(
            "aligned_image",
            vec![
                ChildBlock::required("image", "image"),
                ChildBlock::required("alignment", "image_alignment"),
                ChildBlock::required("caption", "char"),
                ChildBlock::optional("attribution", "char"),
            ],
        )
        .with_icon("image")
        .with_label("Aligned image"),
        BlockType::structure("wide_image", vec![ChildBlock::required("image", "image")])
            .with_icon("image")
            .with_label("Wide image"),
        BlockType::structure(
            "bustout",
            vec![
                ChildBlock::required("image", "image"),
                ChildBlock::required("text", "rich_text"),
            ],
        )
        .with_icon("pick"),
        BlockType::structure(
            "pullquote",
            vec![
                ChildBlock::required("quote", "char"),
                ChildBlock::required("attribution", "char"),
            ],
        )
        .with_icon("openquote"),
        BlockType::list("image_list", "image").with_label("Images"),
        BlockType::structure("photo_grid", vec![ChildBlock::required("images", "image_list")])
            .with_icon("grip")
            .with_label("Photo grid"),
        BlockType::leaf("raw_html", LeafKind::RawHtml)
            .with_icon("code")
            .with_label("Raw HTML")
            .with_help_text("Inserted without sanitising. Use with care."),
        BlockType::leaf("embed", LeafKind::Embed).with_icon("code"),
        BlockType::stream(
            STORY_STREAM,
            &[
                "h2",
                "h3",
                "h4",
                "intro",
                "paragraph",
                "aligned_image",
                "wide_image",
                "bustout",
                "pullquote",
                "photo_grid",
                "raw_html",
                "embed",
            ],
        ),
        // Links
        BlockType::structure(
            "link",
            vec![
                ChildBlock::optional("link_external", "url"),
                ChildBlock::optional("link_page", "page"),
                ChildBlock::optional("link_document", "document"),
            ],
        )
        .with_icon("link"),
        // Navigation. Stream entries are tagged with these type names.
        BlockType::leaf(MENU_SUBITEM, LeafKind::PageRef).with_label("Subitem"),
        BlockType::stream("menu_subitems", &[MENU_SUBITEM]).with_label("Subitems"),
        BlockType::structure(
            MENU_ITEM,
            vec![
                ChildBlock::required("page", "page"),
                ChildBlock::optional("subitems", "menu_subitems"),
            ],
        )
        .with_label("Menu item"),
        BlockType::stream(MENU_STREAM, &[MENU_ITEM]),
    ]
}
