//! Dated, tagged listings and syndication feeds.

pub mod feed;
pub mod pages;
pub mod query;
pub mod service;
pub mod types;

pub use feed::{FeedFormat, FeedMeta, render_feed};
pub use pages::{MemoryPageStore, PageStore, PgPageStore};
pub use query::{
    ListingError, ListingFilter, MAX_PAGE_SIZE, PageRequest, clamp_page_size, listing_order,
    paginate, select,
};
pub use service::{FeedKind, FeedService, FeedSettings, summarize};
pub use types::{BlogPage, FeedItem, Listable, ListingPage, PageInfo};
