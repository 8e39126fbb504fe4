//! Folio Kernel Library
//!
//! Structured page content, on-demand image renditions and blog feeds.
//! The main entry point for running the server is the `folio` binary.

pub mod config;
pub mod content;
pub mod db;
pub mod error;
pub mod listing;
pub mod markup;
pub mod media;
pub mod routes;
pub mod state;
