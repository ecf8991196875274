//! Blob operation.
//!
//! - [`BlobId`]
//! - [`InputBlob`]
//! - [`OutputBlob`]
//! - [`InlineBlob`]
//! - [`InlineBlobCache`]
//!
//! A blob is read segment by segment, each segment a round trip. From protocol 19 the server
//! may instead send small blobs ahead of the execute or fetch response, those are kept in the
//! [`InlineBlobCache`] of the connection until opened.
use bytes::Bytes;

use crate::{
    Result,
    protocol::{ProtocolError, buffer::InfoReader, info},
};

mod cache;
mod inline;
mod remote;

pub use cache::InlineBlobCache;
pub use inline::InlineBlob;
pub use remote::{OutputBlob, RemoteBlob};

/// Max length of one segment sent in `op_put_segment`.
pub const MAX_SEGMENT_SIZE: usize = 32765;

/// Id of a blob, valid within the transaction that produced it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct BlobId(pub i64);

impl BlobId {
    pub fn get(self) -> i64 {
        self.0
    }
}

impl From<i64> for BlobId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// Reference point of a blob seek.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeekMode {
    Absolute = 0,
    Relative = 1,
    FromEnd = 2,
}

/// Blob metadata from blob info items.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlobInfo {
    pub num_segments: i64,
    pub max_segment: i64,
    pub total_length: i64,
    pub blob_type: i64,
}

impl BlobInfo {
    /// Items requested to fill [`BlobInfo`].
    pub const ITEMS: [u8; 4] = [
        info::BLOB_NUM_SEGMENTS,
        info::BLOB_MAX_SEGMENT,
        info::BLOB_TOTAL_LENGTH,
        info::BLOB_TYPE,
    ];

    /// Parse blob info reply, unknown items are skipped.
    pub fn parse(data: Bytes) -> Result<BlobInfo, ProtocolError> {
        let mut reader = InfoReader::new(data);
        let mut blob_info = BlobInfo::default();
        while let Some(item) = reader.next_item() {
            match item {
                info::BLOB_NUM_SEGMENTS => blob_info.num_segments = reader.int(item)?,
                info::BLOB_MAX_SEGMENT => blob_info.max_segment = reader.int(item)?,
                info::BLOB_TOTAL_LENGTH => blob_info.total_length = reader.int(item)?,
                info::BLOB_TYPE => blob_info.blob_type = reader.int(item)?,
                info::TRUNCATED => break,
                _ => {
                    reader.value(item)?;
                }
            }
        }
        Ok(blob_info)
    }
}

/// Blob opened for reading.
///
/// Either a server side blob or a blob delivered inline.
#[derive(Debug)]
pub enum InputBlob {
    Remote(RemoteBlob),
    Inline(InlineBlob),
}

impl InputBlob {
    pub fn blob_id(&self) -> BlobId {
        match self {
            Self::Remote(b) => b.blob_id(),
            Self::Inline(b) => b.blob_id(),
        }
    }

    /// Returns `true` if the blob was served from the inline cache.
    pub fn is_inline(&self) -> bool {
        matches!(self, Self::Inline(_))
    }

    pub fn is_eof(&self) -> bool {
        match self {
            Self::Remote(b) => b.is_eof(),
            Self::Inline(b) => b.is_eof(),
        }
    }

    /// Read a segment of at most `max` bytes, empty at end of blob.
    pub async fn get_segment(&mut self, max: i32) -> Result<Bytes> {
        match self {
            Self::Remote(b) => b.get_segment(max).await,
            Self::Inline(b) => b.get_segment(max),
        }
    }

    /// Read the remaining content.
    pub async fn read_all(&mut self) -> Result<Vec<u8>> {
        match self {
            Self::Remote(b) => b.read_all().await,
            Self::Inline(b) => b.read_all(),
        }
    }

    /// Move the read position, returns the new position.
    pub async fn seek(&mut self, offset: i32, mode: SeekMode) -> Result<i32> {
        match self {
            Self::Remote(b) => b.seek(offset, mode).await,
            Self::Inline(b) => b.seek(offset, mode),
        }
    }

    pub async fn info(&mut self) -> Result<BlobInfo> {
        let data = match self {
            Self::Remote(b) => b.info(&BlobInfo::ITEMS).await?,
            Self::Inline(b) => b.info()?,
        };
        Ok(BlobInfo::parse(data)?)
    }

    pub async fn close(&mut self) -> Result<()> {
        match self {
            Self::Remote(b) => b.close().await,
            Self::Inline(b) => {
                b.close();
                Ok(())
            }
        }
    }

    pub async fn cancel(&mut self) -> Result<()> {
        match self {
            Self::Remote(b) => b.cancel().await,
            Self::Inline(b) => {
                b.cancel();
                Ok(())
            }
        }
    }
}
