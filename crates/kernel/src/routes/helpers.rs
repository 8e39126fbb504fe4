//! Shared helpers for route handlers.

pub use crate::markup::{html_escape, xml_escape};
