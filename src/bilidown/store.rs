// SPDX-License-Identifier: GPL-2.0-or-later
//
// Persistent-state interface only — no implementation. A real backend
// (sqlite, sled, whatever) is out of scope; this is the seam it would
// sit behind. Schema version 3, four tables: history (completed
// downloads), queue (pending/in-progress requests), thumbnails (cover
// image cache), assets (other cached attachments).

use thiserror::Error;

pub const SCHEMA_VERSION: u32 = 3;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("not found")]
    NotFound,

    #[error("schema version mismatch: got {got}, want {want}")]
    SchemaMismatch { got: u32, want: u32 },
}

/// One completed download, keyed by its output filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub filename: String,
    pub bvid: Option<String>,
    pub ep_id: Option<String>,
    pub cid: u64,
    pub completed_at_unix: i64,
}

/// One request waiting to be driven through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub request_id: String,
    pub bvid: Option<String>,
    pub ep_id: Option<String>,
    pub cid: Option<u64>,
    pub quality: u32,
}

/// A cached cover image, keyed by the `cid`/`bvid` it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThumbnailEntry {
    pub key: String,
    pub bytes: Vec<u8>,
}

/// Any other cached attachment (subtitle track, chapter list, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetEntry {
    pub key: String,
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// The four KV tables a real backend would provide. Every method is
/// `async` so a future sqlite/sled implementation can do its own IO
/// without forcing callers onto a blocking thread pool.
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    async fn schema_version(&self) -> Result<u32, StoreError>;

    async fn history_put(&self, entry: HistoryEntry) -> Result<(), StoreError>;
    async fn history_get(&self, filename: &str) -> Result<Option<HistoryEntry>, StoreError>;

    async fn queue_put(&self, entry: QueueEntry) -> Result<(), StoreError>;
    async fn queue_pop(&self, request_id: &str) -> Result<Option<QueueEntry>, StoreError>;

    async fn thumbnail_put(&self, entry: ThumbnailEntry) -> Result<(), StoreError>;
    async fn thumbnail_get(&self, key: &str) -> Result<Option<ThumbnailEntry>, StoreError>;

    async fn asset_put(&self, entry: AssetEntry) -> Result<(), StoreError>;
    async fn asset_get(&self, key: &str) -> Result<Option<AssetEntry>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn schema_version_is_three() {
        assert_eq!(SCHEMA_VERSION, 3);
    }
}
