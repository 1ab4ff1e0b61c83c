//! Recording search, caching, thumbnails, and the media browse tree.

pub mod browse;
pub mod catalog;
pub mod thumbs;

pub use browse::{BrowseNode, MediaBrowseTree};
pub use catalog::{LastEventSummary, VodCatalog, summary_task};
pub use thumbs::ThumbnailStore;
