//! Rendering content streams to HTML fragments.
//!
//! Renderers are looked up by block type name. Rendering a stream yields one
//! fragment per entry, lazily and in stream order; opaque entries render to
//! an empty fragment. A known type without a renderer is logged once and
//! renders empty, so one misconfigured type never breaks a page.
//!
//! Image credits looked up from the image library can be attached to a
//! rendered stream; image blocks without their own attribution show them.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashSet;
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

use super::block_types::{BlockShape, BlockTypeRegistry, SchemaError};
use super::stream::{Block, ContentStream, StreamEntry};
use crate::media::UrlSigner;
use crate::markup::html_escape;

/// Renderer configuration problems found at start-up.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("no renderer registered for block types: {}", .0.join(", "))]
    MissingRenderers(Vec<String>),

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// Renders one block to an HTML fragment.
pub trait BlockRenderer: Send + Sync {
    fn render(&self, block: &Block, ctx: &RenderContext<'_>) -> String;
}

impl<F> BlockRenderer for F
where
    F: Fn(&Block, &RenderContext<'_>) -> String + Send + Sync,
{
    fn render(&self, block: &Block, ctx: &RenderContext<'_>) -> String {
        self(block, ctx)
    }
}

/// Image source id → credit line.
pub type ImageCredits = HashMap<Uuid, String>;

/// Handed to renderers so they can render nested blocks.
pub struct RenderContext<'a> {
    renderers: &'a RendererRegistry,
    credits: Option<&'a ImageCredits>,
}

impl<'a> RenderContext<'a> {
    /// Library credit of an image, if one was supplied for this render.
    pub fn credit(&self, id: Uuid) -> Option<&'a str> {
        self.credits?.get(&id).map(String::as_str)
    }

    pub fn render_block(&self, block: &Block) -> String {
        self.renderers.render_block(block, self)
    }

    pub fn render_entry(&self, entry: &StreamEntry) -> String {
        match entry {
            StreamEntry::Known(block) => self.render_block(block),
            StreamEntry::Opaque(_) => String::new(),
        }
    }

    /// Concatenated fragments of a nested stream.
    pub fn render_entries(&self, entries: &[StreamEntry]) -> String {
        entries.iter().map(|e| self.render_entry(e)).collect()
    }
}

/// Block type name → renderer.
#[derive(Default)]
pub struct RendererRegistry {
    renderers: HashMap<String, Arc<dyn BlockRenderer>>,
    reported_missing: DashSet<String>,
}

impl RendererRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the renderer for a block type.
    pub fn register(&mut self, name: &str, renderer: impl BlockRenderer + 'static) -> &mut Self {
        self.renderers.insert(name.to_string(), Arc::new(renderer));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.renderers.contains_key(name)
    }

    /// Check that every block type a stream may contain has a renderer.
    pub fn verify(&self, schema: &BlockTypeRegistry, stream_type: &str) -> Result<(), RenderError> {
        let missing: Vec<String> = match &schema.resolve(stream_type)?.shape {
            BlockShape::Stream { children } => children
                .iter()
                .filter(|name| !self.contains(name))
                .cloned()
                .collect(),
            _ if self.contains(stream_type) => Vec::new(),
            _ => vec![stream_type.to_string()],
        };

        if missing.is_empty() {
            Ok(())
        } else {
            Err(RenderError::MissingRenderers(missing))
        }
    }

    fn render_block(&self, block: &Block, ctx: &RenderContext<'_>) -> String {
        match self.renderers.get(&block.block_type) {
            Some(renderer) => renderer.render(block, ctx),
            None => {
                if self.reported_missing.insert(block.block_type.clone()) {
                    error!(block_type = %block.block_type, "no renderer registered for block type");
                }
                String::new()
            }
        }
    }

    /// Default HTML renderers for the standard story blocks.
    ///
    /// Image blocks link to the signed dynamic image endpoint.
    pub fn html(signer: UrlSigner) -> Self {
        let mut registry = Self::new();
        for level in ["h2", "h3", "h4"] {
            registry.register(level, move |block: &Block, _: &RenderContext<'_>| {
                format!("<{level}>{}</{level}>", html_escape(block.as_str().unwrap_or("")))
            });
        }
        registry
            .register("intro", |block: &Block, _: &RenderContext<'_>| {
                format!(
                    "<div class=\"intro\">{}</div>",
                    sanitize_rich_text(block.as_str().unwrap_or(""))
                )
            })
            .register("paragraph", |block: &Block, _: &RenderContext<'_>| {
                sanitize_rich_text(block.as_str().unwrap_or(""))
            })
            .register("raw_html", |block: &Block, _: &RenderContext<'_>| {
                block.as_str().unwrap_or("").to_string()
            })
            .register("embed", |block: &Block, _: &RenderContext<'_>| {
                render_embed(block.as_str().unwrap_or(""))
            })
            .register("pullquote", |block: &Block, _: &RenderContext<'_>| {
                render_pullquote(block)
            });

        let images = ImageRenderer { signer };
        let aligned = images.clone();
        registry.register("aligned_image", move |block: &Block, ctx: &RenderContext<'_>| {
            aligned.aligned(block, ctx)
        });
        let wide = images.clone();
        registry.register("wide_image", move |block: &Block, ctx: &RenderContext<'_>| {
            wide.wide(block, ctx)
        });
        let bustout = images.clone();
        registry.register("bustout", move |block: &Block, _: &RenderContext<'_>| {
            bustout.bustout(block)
        });
        registry.register("photo_grid", move |block: &Block, _: &RenderContext<'_>| {
            images.grid(block)
        });
        registry
    }
}

impl std::fmt::Debug for RendererRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.renderers.keys().collect();
        names.sort();
        f.debug_struct("RendererRegistry")
            .field("renderers", &names)
            .finish()
    }
}

/// A rendered view of a stream. Cheap to create; iterate as often as needed.
#[derive(Clone, Copy)]
pub struct RenderedStream<'a> {
    stream: &'a ContentStream,
    renderers: &'a RendererRegistry,
    credits: Option<&'a ImageCredits>,
}

/// Render a stream with the given renderers.
pub fn render<'a>(stream: &'a ContentStream, renderers: &'a RendererRegistry) -> RenderedStream<'a> {
    RenderedStream {
        stream,
        renderers,
        credits: None,
    }
}

impl<'a> RenderedStream<'a> {
    /// Use these library credits for images without an attribution.
    pub fn with_credits(mut self, credits: &'a ImageCredits) -> Self {
        self.credits = Some(credits);
        self
    }

    /// Fresh iterator over the fragments, starting at the first entry.
    pub fn iter(&self) -> Fragments<'a> {
        Fragments {
            entries: self.stream.iter(),
            renderers: self.renderers,
            credits: self.credits,
        }
    }

    pub fn len(&self) -> usize {
        self.stream.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stream.is_empty()
    }

    /// All fragments concatenated.
    pub fn to_html(&self) -> String {
        self.iter().collect()
    }
}

impl<'a> IntoIterator for RenderedStream<'a> {
    type Item = String;
    type IntoIter = Fragments<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator of rendered fragments, one per stream entry.
pub struct Fragments<'a> {
    entries: std::slice::Iter<'a, StreamEntry>,
    renderers: &'a RendererRegistry,
    credits: Option<&'a ImageCredits>,
}

impl Iterator for Fragments<'_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        let entry = self.entries.next()?;
        let ctx = RenderContext {
            renderers: self.renderers,
            credits: self.credits,
        };
        Some(ctx.render_entry(entry))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.entries.size_hint()
    }
}

impl ExactSizeIterator for Fragments<'_> {}

// ---------------------------------------------------------------------------
// Default renderers
// ---------------------------------------------------------------------------

/// Sanitize editor-produced rich text.
fn sanitize_rich_text(input: &str) -> String {
    ammonia::clean(input)
}

fn render_pullquote(block: &Block) -> String {
    let quote = html_escape(block.child("quote").and_then(Block::as_str).unwrap_or(""));
    match block.child("attribution").and_then(Block::as_str) {
        Some(attribution) if !attribution.is_empty() => format!(
            "<blockquote class=\"pullquote\"><p>{quote}</p><cite>{}</cite></blockquote>",
            html_escape(attribution)
        ),
        _ => format!("<blockquote class=\"pullquote\"><p>{quote}</p></blockquote>"),
    }
}

#[derive(Clone)]
struct ImageRenderer {
    signer: UrlSigner,
}

impl ImageRenderer {
    fn img(&self, image: &Block, filter: &str, alt: &str) -> String {
        match image.as_uuid() {
            Some(id) => format!(
                "<img src=\"{}\" alt=\"{}\">",
                html_escape(&self.signer.url(id, filter)),
                html_escape(alt)
            ),
            None => String::new(),
        }
    }

    fn figure(&self, image: &Block, class: &str, filter: &str, caption: &str, attribution: &str) -> String {
        let mut html = format!(
            "<figure class=\"image image--{}\">{}",
            html_escape(class),
            self.img(image, filter, caption)
        );
        if !caption.is_empty() || !attribution.is_empty() {
            html.push_str("<figcaption>");
            html.push_str(&html_escape(caption));
            if !attribution.is_empty() {
                if !caption.is_empty() {
                    html.push(' ');
                }
                html.push_str(&format!(
                    "<span class=\"attribution\">{}</span>",
                    html_escape(attribution)
                ));
            }
            html.push_str("</figcaption>");
        }
        html.push_str("</figure>");
        html
    }

    /// The block's own attribution, else the image's library credit.
    fn attribution<'a>(block: &'a Block, image: &Block, ctx: &RenderContext<'a>) -> &'a str {
        block
            .child("attribution")
            .and_then(Block::as_str)
            .filter(|a| !a.is_empty())
            .or_else(|| image.as_uuid().and_then(|id| ctx.credit(id)))
            .unwrap_or("")
    }

    fn aligned(&self, block: &Block, ctx: &RenderContext<'_>) -> String {
        let Some(image) = block.child("image") else {
            return String::new();
        };
        let alignment = block
            .child("alignment")
            .and_then(Block::as_str)
            .unwrap_or("full");
        let filter = match alignment {
            "left" | "right" => "width-400",
            "half" => "width-800",
            _ => "width-1280",
        };
        let caption = block.child("caption").and_then(Block::as_str).unwrap_or("");
        let attribution = Self::attribution(block, image, ctx);
        self.figure(image, alignment, filter, caption, attribution)
    }

    fn wide(&self, block: &Block, ctx: &RenderContext<'_>) -> String {
        let Some(image) = block.child("image") else {
            return String::new();
        };
        let attribution = Self::attribution(block, image, ctx);
        self.figure(image, "wide", "width-1920", "", attribution)
    }

    fn bustout(&self, block: &Block) -> String {
        let image = block
            .child("image")
            .map(|image| self.img(image, "fill-800x600", ""))
            .unwrap_or_default();
        let text = block.child("text").and_then(Block::as_str).unwrap_or("");
        format!(
            "<section class=\"bustout\"><figure>{image}</figure>\
             <div class=\"bustout__text\">{}</div></section>",
            sanitize_rich_text(text)
        )
    }

    fn grid(&self, block: &Block) -> String {
        let images: String = block
            .child("images")
            .map(Block::items)
            .unwrap_or_default()
            .iter()
            .map(|image| self.img(image, "fill-400x400", ""))
            .collect();
        format!("<div class=\"photo-grid\">{images}</div>")
    }
}

/// Embed sources rendered as iframes; everything else becomes a link.
const EMBED_WHITELIST: &[&str] = &[
    "youtube.com/watch",
    "youtube.com/embed/",
    "youtu.be/",
    "vimeo.com/",
    "player.vimeo.com/",
];

fn is_whitelisted_embed(url: &str) -> bool {
    let normalised = url
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_start_matches("www.");

    EMBED_WHITELIST
        .iter()
        .any(|pattern| normalised.starts_with(pattern))
}

fn render_embed(url: &str) -> String {
    if url.is_empty() {
        return String::new();
    }
    let escaped = html_escape(url);
    if is_whitelisted_embed(url) {
        format!(
            "<div class=\"embed-responsive\">\
             <iframe src=\"{escaped}\" frameborder=\"0\" allowfullscreen></iframe></div>"
        )
    } else if url.starts_with("https://") || url.starts_with("http://") {
        format!("<a href=\"{escaped}\">{escaped}</a>")
    } else {
        format!("<span>{escaped}</span>")
    }
}
