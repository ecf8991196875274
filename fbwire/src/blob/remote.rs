use bytes::{Bytes, BytesMut};
use std::sync::Arc;

use super::{BlobId, MAX_SEGMENT_SIZE, SeekMode};
use crate::{
    Result,
    common::verbose,
    database::{DatabaseInner, PendingOp},
    exception::{ExceptionBuilder, codes},
    protocol::{DEFAULT_INFO_SIZE, frontend},
    xdr,
};

/// `op_get_segment` response object when the end of blob is reached.
const SEGSTR_EOF: i32 = 2;

/// Length prefix of each segment in a segment reply.
const SEGMENT_HEADER: i32 = 2;

fn closed_blob() -> crate::Error {
    ExceptionBuilder::new().exception(codes::BAD_SEGSTR_HANDLE).into_error()
}

/// Server side blob opened for reading.
///
/// Dropping an open blob closes it with the next request on the connection.
pub struct RemoteBlob {
    db: Arc<DatabaseInner>,
    transaction: i32,
    blob_id: BlobId,
    handle: i32,
    eof: bool,
    open: bool,
}

impl RemoteBlob {
    pub(crate) fn new(db: Arc<DatabaseInner>, transaction: i32, blob_id: BlobId, handle: i32) -> Self {
        Self { db, transaction, blob_id, handle, eof: false, open: true }
    }

    pub fn transaction(&self) -> i32 {
        self.transaction
    }

    pub fn blob_id(&self) -> BlobId {
        self.blob_id
    }

    /// Server handle.
    pub fn handle(&self) -> i32 {
        self.handle
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn is_eof(&self) -> bool {
        !self.open || self.eof
    }

    /// Read at most `max` bytes, a single request of at most [`MAX_SEGMENT_SIZE`].
    ///
    /// Returns empty bytes at end of blob.
    pub async fn get_segment(&mut self, max: i32) -> Result<Bytes> {
        if max <= 0 {
            return Err(ExceptionBuilder::new()
                .exception(codes::BLOB_GET_SEGMENT_NEGATIVE)
                .number_parameter(max.into())
                .into_error());
        }
        if !self.open {
            return Err(closed_blob());
        }
        if self.eof {
            return Ok(Bytes::new());
        }

        let len = SEGMENT_HEADER + max.min(MAX_SEGMENT_SIZE as i32);
        let response = self
            .db
            .roundtrip(frontend::GetSegment { blob: self.handle, len })
            .await?;
        if response.handle == SEGSTR_EOF {
            verbose!("blob {:?} end reached", self.blob_id);
            self.eof = true;
        }

        let mut data = BytesMut::with_capacity(response.data.len());
        for segment in xdr::segments(response.data) {
            match segment {
                Ok(segment) => data.extend_from_slice(&segment),
                Err(err) => return self.db.check(Err(err.into())),
            }
        }
        Ok(data.freeze())
    }

    /// Read until the end of blob.
    pub async fn read_all(&mut self) -> Result<Vec<u8>> {
        let mut content = Vec::new();
        while !self.is_eof() {
            let segment = self.get_segment(MAX_SEGMENT_SIZE as i32).await?;
            content.extend_from_slice(&segment);
        }
        if !self.open {
            return Err(closed_blob());
        }
        Ok(content)
    }

    /// Move the read position of a stream blob, returns the new position.
    pub async fn seek(&mut self, offset: i32, mode: SeekMode) -> Result<i32> {
        if !self.open {
            return Err(closed_blob());
        }
        let response = self
            .db
            .roundtrip(frontend::SeekBlob { blob: self.handle, mode: mode as i32, offset })
            .await?;
        self.eof = false;
        Ok(i32::try_from(response.object_id).unwrap_or(i32::MAX))
    }

    /// Request blob info `items`, returns the raw info reply.
    pub async fn info(&mut self, items: &[u8]) -> Result<Bytes> {
        if !self.open {
            return Err(closed_blob());
        }
        let response = self
            .db
            .roundtrip(frontend::InfoBlob { handle: self.handle, items, buffer_len: DEFAULT_INFO_SIZE })
            .await?;
        Ok(response.data)
    }

    /// Close the blob, does nothing if already closed.
    pub async fn close(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        self.db.roundtrip_lazy(frontend::CloseBlob { handle: self.handle }).await
    }

    /// Release the blob without completing it.
    pub async fn cancel(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        self.db.roundtrip_lazy(frontend::CancelBlob { handle: self.handle }).await
    }
}

impl Drop for RemoteBlob {
    fn drop(&mut self) {
        if self.open {
            self.db.queue(PendingOp::CloseBlob(self.handle));
        }
    }
}

impl std::fmt::Debug for RemoteBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteBlob")
            .field("blob_id", &self.blob_id)
            .field("handle", &self.handle)
            .field("eof", &self.eof)
            .field("open", &self.open)
            .finish()
    }
}

/// Blob created for writing.
///
/// The blob id is only valid after [`OutputBlob::close`], dropping an open blob cancels it.
pub struct OutputBlob {
    db: Arc<DatabaseInner>,
    transaction: i32,
    blob_id: BlobId,
    handle: i32,
    open: bool,
}

impl OutputBlob {
    pub(crate) fn new(db: Arc<DatabaseInner>, transaction: i32, blob_id: BlobId, handle: i32) -> Self {
        Self { db, transaction, blob_id, handle, open: true }
    }

    pub fn transaction(&self) -> i32 {
        self.transaction
    }

    /// Id to bind as parameter once closed.
    pub fn blob_id(&self) -> BlobId {
        self.blob_id
    }

    pub fn handle(&self) -> i32 {
        self.handle
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Write `data`, split into segments of at most [`MAX_SEGMENT_SIZE`] bytes.
    ///
    /// Every segment is sent before any response is read, the first failure is returned.
    ///
    /// # Errors
    ///
    /// Empty `data` fails with `blob_put_segment_empty`.
    pub async fn put_segment(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Err(ExceptionBuilder::new().exception(codes::BLOB_PUT_SEGMENT_EMPTY).into_error());
        }
        if !self.open {
            return Err(closed_blob());
        }

        let db = &*self.db;
        let mut ch = db.lock().await?;
        let result = async {
            let mut count = 0;
            for chunk in data.chunks(MAX_SEGMENT_SIZE) {
                ch.send(frontend::PutSegment { blob: self.handle, data: chunk })?;
                count += 1;
            }
            ch.stream.flush().await?;

            let mut first = None;
            for _ in 0..count {
                match db.read_response(&mut ch).await {
                    Ok(_) => {}
                    Err(err) if err.is_fatal() => return Err(err),
                    Err(err) => {
                        first.get_or_insert(err);
                    }
                }
            }
            first.map_or(Ok(()), Err)
        }
        .await;
        ch.finish(result)
    }

    /// Complete the blob, does nothing if already closed.
    pub async fn close(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        self.db.roundtrip_lazy(frontend::CloseBlob { handle: self.handle }).await
    }

    /// Discard the blob.
    pub async fn cancel(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        self.db.roundtrip_lazy(frontend::CancelBlob { handle: self.handle }).await
    }
}

impl Drop for OutputBlob {
    fn drop(&mut self) {
        if self.open {
            self.db.queue(PendingOp::CancelBlob(self.handle));
        }
    }
}

impl std::fmt::Debug for OutputBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputBlob")
            .field("blob_id", &self.blob_id)
            .field("handle", &self.handle)
            .field("open", &self.open)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use bytes::BufMut;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;
    use crate::{
        Config, Database,
        database::test::{database, err_response, ok_response, read_ints},
        protocol::op,
        xdr::XdrBuf,
    };

    async fn open(db: &Database, server: &mut tokio::io::DuplexStream) -> RemoteBlob {
        let mut buf = BytesMut::new();
        ok_response(&mut buf, 4, 0, b"");
        ok_response(&mut buf, 21, 0, b"");
        server.write_all(&buf).await.unwrap();

        let tx = db.start_transaction().await.unwrap();
        let blob = db.open_blob(&tx, BlobId(99), &[]).await.unwrap();
        std::mem::forget(tx);
        match blob {
            super::super::InputBlob::Remote(blob) => blob,
            _ => panic!("expected remote blob"),
        }
    }

    fn segments(parts: &[&[u8]]) -> Vec<u8> {
        let mut data = BytesMut::new();
        for part in parts {
            xdr::put_segment(&mut data, part).unwrap();
        }
        data.to_vec()
    }

    /// Skip what the client sent so far.
    async fn drain(server: &mut tokio::io::DuplexStream) {
        let mut buf = [0; 4096];
        let _ = tokio::time::timeout(std::time::Duration::from_millis(50), server.read(&mut buf)).await;
    }

    #[tokio::test]
    async fn read_segments_until_eof() {
        let (db, mut server) = database(15, Config::default());
        let mut blob = open(&db, &mut server).await;
        drain(&mut server).await;

        let mut buf = BytesMut::new();
        ok_response(&mut buf, 1, 0, &segments(&[b"hello ", b"wor"]));
        ok_response(&mut buf, SEGSTR_EOF, 0, &segments(&[b"ld"]));
        server.write_all(&buf).await.unwrap();

        assert_eq!(blob.read_all().await.unwrap(), b"hello world");
        assert!(blob.is_eof());
        assert!(blob.get_segment(10).await.unwrap().is_empty());

        let sent = read_ints(&mut server, 3).await;
        assert_eq!(sent, [op::GET_SEGMENT, 21, SEGMENT_HEADER + MAX_SEGMENT_SIZE as i32]);
    }

    #[tokio::test]
    async fn segment_request_length() {
        let (db, mut server) = database(15, Config::default());
        let mut blob = open(&db, &mut server).await;
        drain(&mut server).await;

        let mut buf = BytesMut::new();
        ok_response(&mut buf, 1, 0, &segments(&[b"ab"]));
        server.write_all(&buf).await.unwrap();
        assert_eq!(&blob.get_segment(2).await.unwrap()[..], b"ab");
        assert_eq!(read_ints(&mut server, 3).await, [op::GET_SEGMENT, 21, 4]);

        assert_eq!(blob.get_segment(-5).await.unwrap_err().code(), Some(codes::BLOB_GET_SEGMENT_NEGATIVE));
    }

    #[tokio::test]
    async fn seek_and_close() {
        let (db, mut server) = database(15, Config::default());
        let mut blob = open(&db, &mut server).await;
        drain(&mut server).await;

        let mut buf = BytesMut::new();
        ok_response(&mut buf, 0, 10, b"");
        server.write_all(&buf).await.unwrap();
        assert_eq!(blob.seek(10, SeekMode::Absolute).await.unwrap(), 10);
        assert_eq!(read_ints(&mut server, 4).await, [op::SEEK_BLOB, 21, 0, 10]);

        // lazy close, the response is read with the next request
        blob.close().await.unwrap();
        assert!(!blob.is_open());
        assert_eq!(blob.get_segment(1).await.unwrap_err().code(), Some(codes::BAD_SEGSTR_HANDLE));
        blob.close().await.unwrap();

        let mut buf = BytesMut::new();
        ok_response(&mut buf, 0, 0, b"");
        ok_response(&mut buf, 0, 0, b"");
        server.write_all(&buf).await.unwrap();
        db.ping().await.unwrap();
        assert_eq!(read_ints(&mut server, 3).await, [op::CLOSE_BLOB, 21, op::PING]);
    }

    #[tokio::test]
    async fn dropped_blob_closed_with_next_request() {
        let (db, mut server) = database(15, Config::default());
        let blob = open(&db, &mut server).await;
        drain(&mut server).await;
        drop(blob);

        let mut buf = BytesMut::new();
        ok_response(&mut buf, 0, 0, b"");
        ok_response(&mut buf, 0, 0, b"");
        server.write_all(&buf).await.unwrap();
        db.ping().await.unwrap();
        assert_eq!(read_ints(&mut server, 3).await, [op::CLOSE_BLOB, 21, op::PING]);
    }

    #[tokio::test]
    async fn put_large_segment() {
        let (db, mut server) = database(15, Config::default());
        let mut buf = BytesMut::new();
        ok_response(&mut buf, 4, 0, b"");
        ok_response(&mut buf, 30, 77, b"");
        server.write_all(&buf).await.unwrap();

        let tx = db.start_transaction().await.unwrap();
        let mut blob = db.create_blob(&tx, &[]).await.unwrap();
        std::mem::forget(tx);
        assert_eq!(blob.blob_id(), BlobId(77));
        drain(&mut server).await;

        let data = vec![7u8; MAX_SEGMENT_SIZE + 10];
        let mut buf = BytesMut::new();
        ok_response(&mut buf, 0, 0, b"");
        ok_response(&mut buf, 0, 0, b"");
        server.write_all(&buf).await.unwrap();
        blob.put_segment(&data).await.unwrap();

        let mut sent = BytesMut::new();
        // two messages of op, handle, length and padded data
        while sent.len() < 12 + MAX_SEGMENT_SIZE + 3 + 12 + 12 {
            let mut chunk = [0; 8192];
            let n = server.read(&mut chunk).await.unwrap();
            sent.put_slice(&chunk[..n]);
        }
        let mut sent = sent.freeze();
        assert_eq!(sent.get_xdr_i32().unwrap(), op::PUT_SEGMENT);
        assert_eq!(sent.get_xdr_i32().unwrap(), 30);
        assert_eq!(sent.get_xdr_buffer().unwrap().len(), MAX_SEGMENT_SIZE);
        assert_eq!(sent.get_xdr_i32().unwrap(), op::PUT_SEGMENT);
        assert_eq!(sent.get_xdr_i32().unwrap(), 30);
        assert_eq!(sent.get_xdr_buffer().unwrap().len(), 10);

        assert_eq!(blob.put_segment(b"").await.unwrap_err().code(), Some(codes::BLOB_PUT_SEGMENT_EMPTY));
    }

    #[tokio::test]
    async fn put_segment_first_error() {
        let (db, mut server) = database(15, Config::default());
        let mut buf = BytesMut::new();
        ok_response(&mut buf, 4, 0, b"");
        ok_response(&mut buf, 30, 77, b"");
        server.write_all(&buf).await.unwrap();
        let tx = db.start_transaction().await.unwrap();
        let mut blob = db.create_blob(&tx, &[]).await.unwrap();
        std::mem::forget(tx);
        drain(&mut server).await;

        let data = vec![1u8; MAX_SEGMENT_SIZE + 1];
        let mut buf = BytesMut::new();
        err_response(&mut buf, codes::SEGMENT);
        err_response(&mut buf, codes::IO_ERROR);
        ok_response(&mut buf, 0, 0, b"");
        server.write_all(&buf).await.unwrap();

        let err = blob.put_segment(&data).await.unwrap_err();
        assert_eq!(err.code(), Some(codes::SEGMENT));
        assert!(db.is_valid());
        db.ping().await.unwrap();
    }
}
