use bytes::{Bytes, BytesMut};
use std::sync::atomic::{AtomicI32, Ordering};

use super::{BlobId, BlobInfo, SeekMode};
use crate::{
    Result,
    exception::{ExceptionBuilder, codes},
    protocol::{ProtocolError, backend::InlineBlobPacket, info},
    xdr,
};

/// First local handle, above any server blob handle.
const FIRST_LOCAL_HANDLE: i32 = 0x1_0000;

static NEXT_HANDLE: AtomicI32 = AtomicI32::new(FIRST_LOCAL_HANDLE);

fn successor(handle: i32) -> i32 {
    match handle {
        i32::MAX => FIRST_LOCAL_HANDLE,
        handle => handle + 1,
    }
}

fn next_handle() -> i32 {
    let previous = NEXT_HANDLE.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |h| Some(successor(h)));
    // the closure never returns `None`
    match previous {
        Ok(handle) | Err(handle) => handle,
    }
}

/// Blob delivered whole by `op_inline_blob`.
///
/// Reading never touches the network. The handle is local and never sent to the server.
#[derive(Debug)]
pub struct InlineBlob {
    transaction: i32,
    blob_id: BlobId,
    info: Bytes,
    data: Bytes,
    length: usize,
    handle: i32,
    position: usize,
    open: bool,
}

impl InlineBlob {
    /// Create closed blob with given content.
    pub fn new(transaction: i32, blob_id: BlobId, info: Bytes, data: Bytes) -> Self {
        let length = BlobInfo::parse(info.clone())
            .ok()
            .and_then(|i| usize::try_from(i.total_length).ok())
            .filter(|&len| len > 0)
            .unwrap_or(data.len());
        Self {
            transaction,
            blob_id,
            info,
            data,
            length,
            handle: next_handle(),
            position: 0,
            open: false,
        }
    }

    /// Decode `op_inline_blob`, the segments are joined into one buffer.
    pub fn from_packet(packet: InlineBlobPacket) -> Result<Self, ProtocolError> {
        let mut data = BytesMut::with_capacity(packet.data.len());
        for segment in xdr::segments(packet.data) {
            data.extend_from_slice(&segment?);
        }
        Ok(Self::new(packet.transaction, BlobId(packet.blob_id), packet.info, data.freeze()))
    }

    pub fn transaction(&self) -> i32 {
        self.transaction
    }

    pub fn blob_id(&self) -> BlobId {
        self.blob_id
    }

    /// Local handle, always above 65535.
    pub fn handle(&self) -> i32 {
        self.handle
    }

    /// Blob length, from blob info when present.
    pub fn length(&self) -> usize {
        self.length
    }

    /// Size of the blob content.
    pub fn data_len(&self) -> usize {
        self.data.len()
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Returns `true` if closed or the whole content is read.
    pub fn is_eof(&self) -> bool {
        !self.open || self.position >= self.data.len()
    }

    /// Open for reading, from the start.
    ///
    /// # Errors
    ///
    /// Returns `isc_no_segstr_close` if already open.
    pub fn open(&mut self) -> Result<()> {
        if self.open {
            return Err(ExceptionBuilder::new().exception(codes::NO_SEGSTR_CLOSE).into_error());
        }
        self.open = true;
        self.position = 0;
        Ok(())
    }

    /// Read at most `max` bytes from the current position.
    ///
    /// Returns empty bytes at end of blob.
    pub fn get_segment(&mut self, max: i32) -> Result<Bytes> {
        if max <= 0 {
            return Err(ExceptionBuilder::new()
                .exception(codes::BLOB_GET_SEGMENT_NEGATIVE)
                .number_parameter(max.into())
                .into_error());
        }
        self.ensure_open()?;
        let end = self.data.len().min(self.position.saturating_add(max as usize));
        let segment = self.data.slice(self.position..end);
        self.position = end;
        Ok(segment)
    }

    /// Read the remaining content.
    pub fn read_all(&mut self) -> Result<Vec<u8>> {
        self.ensure_open()?;
        let rest = self.data[self.position..].to_vec();
        self.position = self.data.len();
        Ok(rest)
    }

    /// Move the read position, clamped to the blob bounds.
    pub fn seek(&mut self, offset: i32, mode: SeekMode) -> Result<i32> {
        self.ensure_open()?;
        let base = match mode {
            SeekMode::Absolute => 0,
            SeekMode::Relative => self.position as i64,
            SeekMode::FromEnd => self.data.len() as i64,
        };
        let target = (base + i64::from(offset)).clamp(0, self.data.len() as i64);
        self.position = target as usize;
        Ok(i32::try_from(target).unwrap_or(i32::MAX))
    }

    /// Raw blob info, `[isc_info_end]` if the server sent none.
    pub fn info(&self) -> Result<Bytes> {
        self.ensure_open()?;
        match self.info.is_empty() {
            true => Ok(Bytes::from_static(&[info::END])),
            false => Ok(self.info.clone()),
        }
    }

    /// Always fails, inline blobs are read only.
    pub fn put_segment(&mut self, _: &[u8]) -> Result<()> {
        Err(ExceptionBuilder::new().exception(codes::SEGSTR_NO_WRITE).into_error())
    }

    pub fn close(&mut self) {
        self.open = false;
    }

    pub fn cancel(&mut self) {
        self.close();
    }

    /// Closed copy sharing the content, with its own handle.
    pub fn copy(&self) -> InlineBlob {
        InlineBlob {
            handle: next_handle(),
            position: 0,
            open: false,
            info: self.info.clone(),
            data: self.data.clone(),
            ..*self
        }
    }

    fn ensure_open(&self) -> Result<()> {
        match self.open {
            true => Ok(()),
            false => Err(ExceptionBuilder::new().exception(codes::BAD_SEGSTR_HANDLE).into_error()),
        }
    }
}
