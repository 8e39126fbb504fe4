//! Link fields and navigation menus.
//!
//! A `link` struct may carry an internal page, a document and an external
//! URL. On read the page wins, then the document, then the external URL;
//! a reference that no longer resolves falls through to the next one.

use std::collections::HashMap;

use uuid::Uuid;

use super::stream::{Block, ContentStream, StreamEntry};

/// Looks up public addresses of pages and documents.
pub trait LinkResolver: Send + Sync {
    fn page_url(&self, id: Uuid) -> Option<String>;

    fn document_url(&self, id: Uuid) -> Option<String>;
}

/// The three mutually exclusive targets of a link struct.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkFields {
    pub page: Option<Uuid>,
    pub document: Option<Uuid>,
    pub external: Option<String>,
}

impl LinkFields {
    /// Read the `link_page`, `link_document` and `link_external` children.
    pub fn from_block(block: &Block) -> Self {
        Self {
            page: block.child("link_page").and_then(Block::as_uuid),
            document: block.child("link_document").and_then(Block::as_uuid),
            external: block
                .child("link_external")
                .and_then(Block::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        }
    }

    pub fn resolve(&self, resolver: &dyn LinkResolver) -> Option<String> {
        self.page
            .and_then(|id| resolver.page_url(id))
            .or_else(|| self.document.and_then(|id| resolver.document_url(id)))
            .or_else(|| self.external.clone())
    }
}

/// Resolve a `link` block to an address.
pub fn resolve_link(block: &Block, resolver: &dyn LinkResolver) -> Option<String> {
    LinkFields::from_block(block).resolve(resolver)
}

/// One top-level navigation entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuEntry {
    pub url: String,
    pub children: Vec<String>,
}

/// Flatten a `menu` stream into resolved entries.
///
/// Items whose page cannot be resolved are skipped, as are opaque entries.
pub fn menu_entries(menu: &ContentStream, resolver: &dyn LinkResolver) -> Vec<MenuEntry> {
    menu.iter()
        .filter_map(StreamEntry::as_block)
        .filter_map(|item| {
            let url = item
                .child("page")
                .and_then(Block::as_uuid)
                .and_then(|id| resolver.page_url(id))?;
            let children = item
                .child("subitems")
                .map(|sub| {
                    sub.entries()
                        .iter()
                        .filter_map(StreamEntry::as_block)
                        .filter_map(|page| page.as_uuid().and_then(|id| resolver.page_url(id)))
                        .collect()
                })
                .unwrap_or_default();
            Some(MenuEntry { url, children })
        })
        .collect()
}

/// Resolver backed by fixed maps.
#[derive(Debug, Clone, Default)]
pub struct StaticLinkResolver {
    pages: HashMap<Uuid, String>,
    documents: HashMap<Uuid, String>,
}

impl StaticLinkResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, id: Uuid, url: &str) -> Self {
        self.pages.insert(id, url.to_string());
        self
    }

    pub fn with_document(mut self, id: Uuid, url: &str) -> Self {
        self.documents.insert(id, url.to_string());
        self
    }
}

impl LinkResolver for StaticLinkResolver {
    fn page_url(&self, id: Uuid) -> Option<String> {
        self.pages.get(&id).cloned()
    }

    fn document_url(&self, id: Uuid) -> Option<String> {
        self.documents.get(&id).cloned()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::content::BlockTypeRegistry;
    use serde_json::json;

    fn link(value: serde_json::Value) -> Block {
        let registry = BlockTypeRegistry::standard().unwrap();
        let doc = json!([{"type": "link", "value": value}]).to_string();
        let stream = ContentStream::parse(&doc, &registry).unwrap();
        stream.entries()[0].as_block().unwrap().clone()
    }

    #[test]
    fn page_beats_external() {
        let page = Uuid::now_v7();
        let resolver = StaticLinkResolver::new().with_page(page, "/blog/");
        let block = link(json!({
            "link_page": page.to_string(),
            "link_external": "https://example.com/"
        }));
        assert_eq!(resolve_link(&block, &resolver).as_deref(), Some("/blog/"));
    }

    #[test]
    fn document_beats_external() {
        let doc = Uuid::now_v7();
        let resolver = StaticLinkResolver::new().with_document(doc, "/documents/report.pdf");
        let block = link(json!({
            "link_document": doc.to_string(),
            "link_external": "https://example.com/"
        }));
        assert_eq!(
            resolve_link(&block, &resolver).as_deref(),
            Some("/documents/report.pdf")
        );
    }

    #[test]
    fn unresolvable_page_falls_through() {
        let block = link(json!({
            "link_page": Uuid::now_v7().to_string(),
            "link_external": "https://example.com/"
        }));
        assert_eq!(
            resolve_link(&block, &StaticLinkResolver::new()).as_deref(),
            Some("https://example.com/")
        );
    }

    #[test]
    fn empty_link_resolves_to_nothing() {
        let block = link(json!({"link_external": ""}));
        assert_eq!(LinkFields::from_block(&block), LinkFields::default());
        assert_eq!(resolve_link(&block, &StaticLinkResolver::new()), None);
    }

    #[test]
    fn menu_entries_resolve_pages() {
        let registry = BlockTypeRegistry::standard().unwrap();
        let (home, about, team) = (Uuid::now_v7(), Uuid::now_v7(), Uuid::now_v7());
        let resolver = StaticLinkResolver::new()
            .with_page(home, "/")
            .with_page(about, "/about/")
            .with_page(team, "/about/team/");
        let doc = json!([
            {"type": "items", "value": {"page": home.to_string()}},
            {"type": "items", "value": {
                "page": about.to_string(),
                "subitems": [
                    {"type": "subitem", "value": team.to_string()},
                    {"type": "subitem", "value": Uuid::now_v7().to_string()}
                ]
            }},
            {"type": "items", "value": {"page": Uuid::now_v7().to_string()}}
        ]);
        let menu = ContentStream::parse_for(&doc.to_string(), &registry, "menu").unwrap();

        let entries = menu_entries(&menu, &resolver);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].url, "/");
        assert!(entries[0].children.is_empty());
        assert_eq!(entries[1].children, vec!["/about/team/".to_string()]);
    }
}
