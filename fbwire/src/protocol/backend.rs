//! Server messages.
//!
//! Messages are read field by field from the stream since their layout is only known after the
//! operation code. Row data following [`FetchResponse`] and [`SqlResponse`] is read by the
//! statement which knows the row layout.
use bytes::Bytes;

use super::{ProtocolError, op};
use crate::{Result, exception::FbException, stream::WireStream};

/// `op_response`, the generic response.
#[derive(Debug)]
pub struct Response {
    /// Object handle, such as statement, transaction or blob.
    pub handle: i32,
    /// Object id, such as the id of a created blob.
    pub object_id: i64,
    pub data: Bytes,
    pub status: Option<FbException>,
}

impl Response {
    pub async fn read(stream: &mut WireStream) -> Result<Response> {
        let handle = stream.read_i32().await?;
        let object_id = stream.read_i64().await?;
        let data = stream.read_buffer().await?;
        let status = stream.read_status_vector().await?;
        Ok(Response { handle, object_id, data, status })
    }

    /// Fails with the server error, if any.
    pub fn into_result(self) -> Result<Response> {
        match self.status {
            Some(err) => Err(err.into()),
            None => Ok(self),
        }
    }
}

/// `op_fetch_response`, precedes each fetched row.
#[derive(Debug, Clone, Copy)]
pub struct FetchResponse {
    pub status: i32,
    pub count: i32,
}

impl FetchResponse {
    pub async fn read(stream: &mut WireStream) -> Result<FetchResponse> {
        let status = stream.read_i32().await?;
        let count = stream.read_i32().await?;
        Ok(FetchResponse { status, count })
    }
}

/// `op_sql_response`, precedes the singleton row of `op_execute2`.
#[derive(Debug, Clone, Copy)]
pub struct SqlResponse {
    pub count: i32,
}

impl SqlResponse {
    pub async fn read(stream: &mut WireStream) -> Result<SqlResponse> {
        Ok(SqlResponse { count: stream.read_i32().await? })
    }
}

/// `op_inline_blob`, a whole blob sent ahead of the execute or fetch response.
#[derive(Debug)]
pub struct InlineBlobPacket {
    pub transaction: i32,
    pub blob_id: i64,
    pub info: Bytes,
    /// Segment stream.
    pub data: Bytes,
}

impl InlineBlobPacket {
    pub async fn read(stream: &mut WireStream) -> Result<InlineBlobPacket> {
        let transaction = stream.read_i32().await?;
        let blob_id = stream.read_i64().await?;
        let info = stream.read_buffer().await?;
        let data = stream.read_buffer().await?;
        Ok(InlineBlobPacket { transaction, blob_id, info, data })
    }
}

/// `op_accept`, `op_cond_accept` and `op_accept_data`.
#[derive(Debug)]
pub struct Accept {
    pub operation: i32,
    pub version: i32,
    pub architecture: i32,
    /// Accepted type, compression flag included.
    pub ptype: i32,
    /// Authentication data, present in `op_cond_accept` and `op_accept_data`.
    pub auth: Option<AcceptData>,
}

/// Authentication part of [`Accept`].
#[derive(Debug)]
pub struct AcceptData {
    pub data: Bytes,
    pub plugin: String,
    pub authenticated: bool,
    pub keys: Bytes,
}

impl Accept {
    pub async fn read(operation: i32, stream: &mut WireStream) -> Result<Accept> {
        let version = stream.read_i32().await?;
        let architecture = stream.read_i32().await?;
        let ptype = stream.read_i32().await?;
        let auth = match operation {
            op::COND_ACCEPT | op::ACCEPT_DATA => Some(AcceptData {
                data: stream.read_buffer().await?,
                plugin: stream.read_string().await?,
                authenticated: stream.read_i32().await? == 1,
                keys: stream.read_buffer().await?,
            }),
            _ => None,
        };
        Ok(Accept { operation, version, architecture, ptype, auth })
    }
}

/// `op_cont_auth` sent by the server.
#[derive(Debug)]
pub struct ContAuth {
    pub data: Bytes,
    pub plugin: String,
    pub plugin_list: Bytes,
    pub keys: Bytes,
}

impl ContAuth {
    pub async fn read(stream: &mut WireStream) -> Result<ContAuth> {
        Ok(ContAuth {
            data: stream.read_buffer().await?,
            plugin: stream.read_string().await?,
            plugin_list: stream.read_buffer().await?,
            keys: stream.read_buffer().await?,
        })
    }
}

/// Any server message.
#[derive(Debug)]
pub enum BackendMessage {
    Response(Response),
    Fetch(FetchResponse),
    Sql(SqlResponse),
    InlineBlob(InlineBlobPacket),
    Accept(Accept),
    ContAuth(ContAuth),
    /// `op_crypt_key_callback` with the plugin data.
    CryptKeyCallback(Bytes),
    TrustedAuth,
    Reject,
}

impl BackendMessage {
    /// Read the next message, `op_dummy` is skipped.
    pub async fn read(stream: &mut WireStream) -> Result<BackendMessage> {
        let operation = stream.read_operation().await?;
        Self::read_operation(operation, stream).await
    }

    /// Read the message body of given `operation`.
    pub async fn read_operation(operation: i32, stream: &mut WireStream) -> Result<BackendMessage> {
        let message = match operation {
            op::RESPONSE => Self::Response(Response::read(stream).await?),
            op::FETCH_RESPONSE => Self::Fetch(FetchResponse::read(stream).await?),
            op::SQL_RESPONSE => Self::Sql(SqlResponse::read(stream).await?),
            op::INLINE_BLOB => Self::InlineBlob(InlineBlobPacket::read(stream).await?),
            op::ACCEPT | op::COND_ACCEPT | op::ACCEPT_DATA => {
                Self::Accept(Accept::read(operation, stream).await?)
            }
            op::CONT_AUTH => Self::ContAuth(ContAuth::read(stream).await?),
            op::CRYPT_KEY_CALLBACK => Self::CryptKeyCallback(stream.read_buffer().await?),
            op::TRUSTED_AUTH => {
                stream.read_buffer().await?;
                Self::TrustedAuth
            }
            op::REJECT => Self::Reject,
            found => return Err(ProtocolError::unknown(found).into()),
        };
        Ok(message)
    }

    /// Operation code of the message.
    pub fn operation(&self) -> i32 {
        match self {
            Self::Response(_) => op::RESPONSE,
            Self::Fetch(_) => op::FETCH_RESPONSE,
            Self::Sql(_) => op::SQL_RESPONSE,
            Self::InlineBlob(_) => op::INLINE_BLOB,
            Self::Accept(accept) => accept.operation,
            Self::ContAuth(_) => op::CONT_AUTH,
            Self::CryptKeyCallback(_) => op::CRYPT_KEY_CALLBACK,
            Self::TrustedAuth => op::TRUSTED_AUTH,
            Self::Reject => op::REJECT,
        }
    }

    /// Name of the message operation.
    pub fn name(&self) -> &'static str {
        op::name(self.operation())
    }
}

#[cfg(test)]
mod test {
    use bytes::BytesMut;
    use tokio::io::AsyncWriteExt;

    use super::*;
    use crate::{
        exception::{arg, codes},
        stream::test::pair,
        xdr::XdrBufMut,
    };

    #[tokio::test]
    async fn generic_response() {
        let (mut stream, mut server) = pair(None);

        let mut buf = BytesMut::new();
        buf.put_xdr_i32(op::DUMMY);
        buf.put_xdr_i32(op::RESPONSE);
        buf.put_xdr_i32(7);
        buf.put_xdr_i64(0x1_0000_0002);
        buf.put_xdr_buffer(b"abc").unwrap();
        buf.put_xdr_i32(arg::GDS);
        buf.put_xdr_i32(codes::BAD_STMT_HANDLE);
        buf.put_xdr_i32(arg::END);
        server.write_all(&buf).await.unwrap();

        let BackendMessage::Response(response) = BackendMessage::read(&mut stream).await.unwrap() else {
            panic!("expected response");
        };
        assert_eq!(response.handle, 7);
        assert_eq!(response.object_id, 0x1_0000_0002);
        assert_eq!(&response.data[..], b"abc");

        let err = response.into_result().unwrap_err();
        assert_eq!(err.code(), Some(codes::BAD_STMT_HANDLE));
    }

    #[tokio::test]
    async fn cond_accept() {
        let (mut stream, mut server) = pair(None);

        let mut buf = BytesMut::new();
        buf.put_xdr_i32(op::COND_ACCEPT);
        buf.put_xdr_i32(0x8013);
        buf.put_xdr_i32(1);
        buf.put_xdr_i32(5);
        buf.put_xdr_buffer(b"salt").unwrap();
        buf.put_xdr_string("Srp256").unwrap();
        buf.put_xdr_i32(0);
        buf.put_xdr_buffer(b"").unwrap();
        server.write_all(&buf).await.unwrap();

        let BackendMessage::Accept(accept) = BackendMessage::read(&mut stream).await.unwrap() else {
            panic!("expected accept");
        };
        assert_eq!(accept.version, 0x8013);
        let auth = accept.auth.unwrap();
        assert_eq!(auth.plugin, "Srp256");
        assert!(!auth.authenticated);
    }

    #[tokio::test]
    async fn unknown_operation() {
        let (mut stream, mut server) = pair(None);
        server.write_all(&[0, 0, 0x01, 0x00]).await.unwrap();

        let err = BackendMessage::read(&mut stream).await.unwrap_err();
        assert!(matches!(err.kind(), crate::ErrorKind::Protocol(ProtocolError::Unexpected { found: 256, .. })));
    }
}
