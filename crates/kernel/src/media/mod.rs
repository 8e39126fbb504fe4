//! Image sources and on-demand renditions.
//!
//! This module provides:
//! - RenditionSpec: Parsed filter strings (`fill-300x200`, `width-640|format-png`, ...)
//! - geometry: Focal-point-aware crop planning
//! - RenditionEngine: Derives, stores and caches renditions exactly once per key
//! - SourceStore / RenditionIndex: Persistence for originals and the key → artifact map
//! - UrlSigner: Signed URLs for the dynamic image endpoint

pub mod engine;
pub mod geometry;
pub mod rendition;
pub mod signature;
pub mod source;
pub mod spec;
pub mod storage;

use thiserror::Error;
use uuid::Uuid;

pub use engine::{DeletionReport, RenditionEngine};
pub use rendition::{MemoryRenditionIndex, PgRenditionIndex, Rendition, RenditionIndex, RenditionKey};
pub use signature::UrlSigner;
pub use source::{ImageSource, MemorySourceStore, PgSourceStore, SourceStore};
pub use spec::{FocalPoint, OutputFormat, RenditionSpec, ResizeMode};
pub use storage::{FileStorage, LocalFileStorage};

/// Errors reported by the image subsystem.
///
/// `Clone` so a single failed derivation can be handed to every caller
/// that was waiting on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MediaError {
    #[error("image source {0} not found")]
    SourceNotFound(Uuid),

    #[error("invalid rendition filter '{spec}': {reason}")]
    InvalidSpec { spec: String, reason: String },

    #[error("rendition derivation failed: {0}")]
    Derivation(String),

    #[error("media storage error: {0}")]
    Storage(String),
}

impl MediaError {
    pub(crate) fn storage(err: anyhow::Error) -> Self {
        MediaError::Storage(format!("{err:#}"))
    }
}
