//! Source adapters: one per upstream image index.

use async_trait::async_trait;

use crate::capabilities::{SourceConfigSchema, SourceDescriptor};
use crate::error::SourceError;
use crate::federated::{SearchOutcome, TagLookup};

pub mod http;

#[cfg(feature = "danbooru")]
pub mod danbooru;
#[cfg(feature = "e621")]
pub mod e621;
#[cfg(feature = "gelbooru")]
pub mod gelbooru;
#[cfg(feature = "moebooru")]
pub mod moebooru;
#[cfg(feature = "zerochan")]
pub mod zerochan;

/// Common contract every upstream content index is wrapped in.
///
/// Adapters never fail across this boundary: transport errors, bad statuses
/// and malformed payloads all come back as a typed status next to (possibly
/// empty) results.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn descriptor(&self) -> &SourceDescriptor;

    fn id(&self) -> &str {
        &self.descriptor().id
    }

    /// Fetch one page of items tagged `tag`.
    ///
    /// `page` is 0-based; adapters translate it to the upstream's numbering.
    async fn search(&self, tag: &str, page: u32, limit: u32, allow_restricted: bool)
        -> SearchOutcome;

    /// Prefix lookup against the source's tag index.
    async fn lookup_tags(&self, prefix: &str, limit: u32) -> TagLookup {
        let _ = (prefix, limit);
        TagLookup::failed(SourceError::Permanent(format!(
            "{} has no tag index",
            self.id()
        )))
    }

    /// Settings this adapter reads from the configuration file.
    fn config_schema(&self) -> SourceConfigSchema {
        SourceConfigSchema::base()
    }
}
