//! Client messages.
//!
//! Each message writes its fields after the operation code, see [`write`].
use bytes::{BufMut, BytesMut};

use super::{
    CONNECT_VERSION3, ARCH_GENERIC, ExecuteContext, P_REQ_ASYNC, ProtocolCollection, Revision, op,
};
use crate::{ext::UsizeExt, row::EncodeError, xdr::XdrBufMut};

/// A type that can be encoded as client message.
pub trait FrontendProtocol {
    /// Operation code written before the message.
    const OPCODE: i32;

    /// Write the message fields.
    ///
    /// On error `buf` may hold a partial message.
    fn encode(self, buf: &mut BytesMut) -> Result<(), EncodeError>;
}

/// Write the operation code followed by the message.
///
/// On error `buf` is left as it was.
pub fn write<F: FrontendProtocol>(message: F, buf: &mut BytesMut) -> Result<(), EncodeError> {
    let start = buf.len();
    buf.put_xdr_i32(F::OPCODE);
    let result = message.encode(buf);
    if result.is_err() {
        buf.truncate(start);
    }
    result
}

/// `op_connect`, offers protocol versions and identifies the user.
pub struct Connect<'a> {
    pub database: &'a str,
    pub user_id: &'a [u8],
    pub protocols: &'a ProtocolCollection,
}

impl FrontendProtocol for Connect<'_> {
    const OPCODE: i32 = op::CONNECT;

    fn encode(self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        buf.put_xdr_i32(op::ATTACH);
        buf.put_xdr_i32(CONNECT_VERSION3);
        buf.put_xdr_i32(ARCH_GENERIC);
        buf.put_xdr_string(self.database)?;
        buf.put_xdr_i32(self.protocols.len().to_i32()?);
        buf.put_xdr_buffer(self.user_id)?;
        for protocol in self.protocols.iter() {
            protocol.write(buf);
        }
        Ok(())
    }
}

/// `op_attach`
pub struct Attach<'a> {
    pub database: &'a str,
    pub dpb: &'a [u8],
}

impl FrontendProtocol for Attach<'_> {
    const OPCODE: i32 = op::ATTACH;

    fn encode(self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        buf.put_xdr_i32(0);
        buf.put_xdr_string(self.database)?;
        buf.put_xdr_buffer(self.dpb)?;
        Ok(())
    }
}

/// `op_cont_auth`
pub struct ContAuth<'a> {
    pub data: &'a [u8],
    pub plugin_name: &'a str,
    /// Only sent the first time, empty afterwards.
    pub plugin_list: &'a str,
    pub keys: &'a [u8],
}

impl FrontendProtocol for ContAuth<'_> {
    const OPCODE: i32 = op::CONT_AUTH;

    fn encode(self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        buf.put_xdr_buffer(self.data)?;
        buf.put_xdr_string(self.plugin_name)?;
        buf.put_xdr_string(self.plugin_list)?;
        buf.put_xdr_buffer(self.keys)?;
        Ok(())
    }
}

/// `op_crypt_key_callback` reply, wire crypt is never enabled so the data is empty.
pub struct CryptKeyCallback<'a> {
    pub data: &'a [u8],
}

impl FrontendProtocol for CryptKeyCallback<'_> {
    const OPCODE: i32 = op::CRYPT_KEY_CALLBACK;

    fn encode(self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        buf.put_xdr_buffer(self.data)?;
        Ok(())
    }
}

macro_rules! handle_message {
    ($($(#[$meta:meta])* $name:ident = $op:path;)*) => {$(
        $(#[$meta])*
        pub struct $name {
            pub handle: i32,
        }

        impl FrontendProtocol for $name {
            const OPCODE: i32 = $op;

            fn encode(self, buf: &mut BytesMut) -> Result<(), EncodeError> {
                buf.put_xdr_i32(self.handle);
                Ok(())
            }
        }
    )*};
}

handle_message! {
    /// `op_detach`
    Detach = op::DETACH;
    /// `op_commit`
    Commit = op::COMMIT;
    /// `op_rollback`
    Rollback = op::ROLLBACK;
    /// `op_commit_retaining`
    CommitRetaining = op::COMMIT_RETAINING;
    /// `op_rollback_retaining`
    RollbackRetaining = op::ROLLBACK_RETAINING;
    /// `op_allocate_statement`, the handle is the database handle.
    AllocateStatement = op::ALLOCATE_STATEMENT;
    /// `op_close_blob`
    CloseBlob = op::CLOSE_BLOB;
    /// `op_cancel_blob`
    CancelBlob = op::CANCEL_BLOB;
    /// `op_cancel`, the handle is the cancel kind.
    Cancel = op::CANCEL;
}

/// `op_disconnect`
pub struct Disconnect;

impl FrontendProtocol for Disconnect {
    const OPCODE: i32 = op::DISCONNECT;

    fn encode(self, _: &mut BytesMut) -> Result<(), EncodeError> {
        Ok(())
    }
}

/// `op_ping`
pub struct Ping;

impl FrontendProtocol for Ping {
    const OPCODE: i32 = op::PING;

    fn encode(self, _: &mut BytesMut) -> Result<(), EncodeError> {
        Ok(())
    }
}

/// `op_transaction`
pub struct StartTransaction<'a> {
    pub database: i32,
    pub tpb: &'a [u8],
}

impl FrontendProtocol for StartTransaction<'_> {
    const OPCODE: i32 = op::TRANSACTION;

    fn encode(self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        buf.put_xdr_i32(self.database);
        buf.put_xdr_buffer(self.tpb)?;
        Ok(())
    }
}

/// `op_prepare2`, first phase of two phase commit.
pub struct PrepareTransaction<'a> {
    pub transaction: i32,
    pub message: &'a [u8],
}

impl FrontendProtocol for PrepareTransaction<'_> {
    const OPCODE: i32 = op::PREPARE2;

    fn encode(self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        buf.put_xdr_i32(self.transaction);
        buf.put_xdr_buffer(self.message)?;
        Ok(())
    }
}

/// Info request, generic over the info operation.
pub struct Info<'a, const OP: i32> {
    pub handle: i32,
    pub items: &'a [u8],
    pub buffer_len: i32,
}

/// `op_info_database`
pub type InfoDatabase<'a> = Info<'a, { op::INFO_DATABASE }>;
/// `op_info_sql`
pub type InfoSql<'a> = Info<'a, { op::INFO_SQL }>;
/// `op_info_blob`
pub type InfoBlob<'a> = Info<'a, { op::INFO_BLOB }>;
/// `op_info_cursor`
pub type InfoCursor<'a> = Info<'a, { op::INFO_CURSOR }>;

impl<const OP: i32> FrontendProtocol for Info<'_, OP> {
    const OPCODE: i32 = OP;

    fn encode(self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        buf.put_xdr_i32(self.handle);
        // incarnation
        buf.put_xdr_i32(0);
        buf.put_xdr_buffer(self.items)?;
        buf.put_xdr_i32(self.buffer_len);
        Ok(())
    }
}

/// `op_prepare_statement`
pub struct PrepareStatement<'a> {
    pub transaction: i32,
    pub statement: i32,
    pub dialect: i32,
    pub sql: &'a str,
    pub items: &'a [u8],
    pub buffer_len: i32,
}

impl FrontendProtocol for PrepareStatement<'_> {
    const OPCODE: i32 = op::PREPARE_STATEMENT;

    fn encode(self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        buf.put_xdr_i32(self.transaction);
        buf.put_xdr_i32(self.statement);
        buf.put_xdr_i32(self.dialect);
        buf.put_xdr_string(self.sql)?;
        buf.put_xdr_buffer(self.items)?;
        buf.put_xdr_i32(self.buffer_len);
        Ok(())
    }
}

/// `op_exec_immediate`
pub struct ExecImmediate<'a> {
    pub transaction: i32,
    pub database: i32,
    pub dialect: i32,
    pub sql: &'a str,
    pub items: &'a [u8],
    pub buffer_len: i32,
}

impl FrontendProtocol for ExecImmediate<'_> {
    const OPCODE: i32 = op::EXEC_IMMEDIATE;

    fn encode(self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        buf.put_xdr_i32(self.transaction);
        buf.put_xdr_i32(self.database);
        buf.put_xdr_i32(self.dialect);
        buf.put_xdr_string(self.sql)?;
        buf.put_xdr_buffer(self.items)?;
        buf.put_xdr_i32(self.buffer_len);
        Ok(())
    }
}

/// `op_free_statement`
pub struct FreeStatement {
    pub statement: i32,
    pub option: i32,
}

impl FrontendProtocol for FreeStatement {
    const OPCODE: i32 = op::FREE_STATEMENT;

    fn encode(self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        buf.put_xdr_i32(self.statement);
        buf.put_xdr_i32(self.option);
        Ok(())
    }
}

/// Fields shared by `op_execute` and `op_execute2`.
pub struct ExecuteFields<'a> {
    pub statement: i32,
    pub transaction: i32,
    /// Parameter BLR, empty without parameters.
    pub blr: &'a [u8],
    /// Encoded parameter row, `None` without parameters.
    pub message: Option<&'a [u8]>,
    pub revision: &'static Revision,
    pub context: ExecuteContext,
}

impl ExecuteFields<'_> {
    fn encode_head(&self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        buf.put_xdr_i32(self.statement);
        buf.put_xdr_i32(self.transaction);
        buf.put_xdr_buffer(self.blr)?;
        // message number
        buf.put_xdr_i32(0);
        match self.message {
            Some(message) => {
                buf.put_xdr_i32(1);
                buf.put_slice(message);
            }
            None => buf.put_xdr_i32(0),
        }
        Ok(())
    }

    fn encode_tail(&self, buf: &mut BytesMut) {
        self.revision.write_execute_tail(&self.context, buf);
    }
}

/// `op_execute`
pub struct Execute<'a> {
    pub fields: ExecuteFields<'a>,
}

impl FrontendProtocol for Execute<'_> {
    const OPCODE: i32 = op::EXECUTE;

    fn encode(self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        self.fields.encode_head(buf)?;
        self.fields.encode_tail(buf);
        Ok(())
    }
}

/// `op_execute2`, for statements with a singleton result.
pub struct Execute2<'a> {
    pub fields: ExecuteFields<'a>,
    /// Output BLR, empty without output fields.
    pub out_blr: &'a [u8],
}

impl FrontendProtocol for Execute2<'_> {
    const OPCODE: i32 = op::EXECUTE2;

    fn encode(self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        self.fields.encode_head(buf)?;
        buf.put_xdr_buffer(self.out_blr)?;
        // out message number
        buf.put_xdr_i32(0);
        self.fields.encode_tail(buf);
        Ok(())
    }
}

/// `op_fetch`
pub struct Fetch<'a> {
    pub statement: i32,
    pub blr: &'a [u8],
    pub fetch_size: i32,
}

impl FrontendProtocol for Fetch<'_> {
    const OPCODE: i32 = op::FETCH;

    fn encode(self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        buf.put_xdr_i32(self.statement);
        buf.put_xdr_buffer(self.blr)?;
        // message number
        buf.put_xdr_i32(0);
        buf.put_xdr_i32(self.fetch_size);
        Ok(())
    }
}

/// `op_fetch_scroll`
pub struct FetchScroll<'a> {
    pub statement: i32,
    pub blr: &'a [u8],
    pub fetch_size: i32,
    pub fetch_type: i32,
    pub position: i32,
}

impl FrontendProtocol for FetchScroll<'_> {
    const OPCODE: i32 = op::FETCH_SCROLL;

    fn encode(self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        buf.put_xdr_i32(self.statement);
        buf.put_xdr_buffer(self.blr)?;
        // message number
        buf.put_xdr_i32(0);
        buf.put_xdr_i32(self.fetch_size);
        buf.put_xdr_i32(self.fetch_type);
        buf.put_xdr_i32(self.position);
        Ok(())
    }
}

/// `op_open_blob`
pub struct OpenBlob {
    pub transaction: i32,
    pub blob_id: i64,
}

impl FrontendProtocol for OpenBlob {
    const OPCODE: i32 = op::OPEN_BLOB;

    fn encode(self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        buf.put_xdr_i32(self.transaction);
        buf.put_xdr_i64(self.blob_id);
        Ok(())
    }
}

/// `op_open_blob2`, with blob parameter buffer.
pub struct OpenBlob2<'a> {
    pub bpb: &'a [u8],
    pub transaction: i32,
    pub blob_id: i64,
}

impl FrontendProtocol for OpenBlob2<'_> {
    const OPCODE: i32 = op::OPEN_BLOB2;

    fn encode(self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        buf.put_xdr_buffer(self.bpb)?;
        buf.put_xdr_i32(self.transaction);
        buf.put_xdr_i64(self.blob_id);
        Ok(())
    }
}

/// `op_create_blob2`
pub struct CreateBlob2<'a> {
    pub bpb: &'a [u8],
    pub transaction: i32,
}

impl FrontendProtocol for CreateBlob2<'_> {
    const OPCODE: i32 = op::CREATE_BLOB2;

    fn encode(self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        buf.put_xdr_buffer(self.bpb)?;
        buf.put_xdr_i32(self.transaction);
        buf.put_xdr_i64(0);
        Ok(())
    }
}

/// `op_get_segment`
pub struct GetSegment {
    pub blob: i32,
    pub len: i32,
}

impl FrontendProtocol for GetSegment {
    const OPCODE: i32 = op::GET_SEGMENT;

    fn encode(self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        buf.put_xdr_i32(self.blob);
        buf.put_xdr_i32(self.len);
        // segment, always empty
        buf.put_xdr_i32(0);
        Ok(())
    }
}

/// `op_put_segment`
pub struct PutSegment<'a> {
    pub blob: i32,
    pub data: &'a [u8],
}

impl FrontendProtocol for PutSegment<'_> {
    const OPCODE: i32 = op::PUT_SEGMENT;

    fn encode(self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        buf.put_xdr_i32(self.blob);
        buf.put_xdr_i32(self.data.len().to_i32()?);
        buf.put_xdr_buffer(self.data)?;
        Ok(())
    }
}

/// `op_seek_blob`
pub struct SeekBlob {
    pub blob: i32,
    pub mode: i32,
    pub offset: i32,
}

impl FrontendProtocol for SeekBlob {
    const OPCODE: i32 = op::SEEK_BLOB;

    fn encode(self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        buf.put_xdr_i32(self.blob);
        buf.put_xdr_i32(self.mode);
        buf.put_xdr_i32(self.offset);
        Ok(())
    }
}

/// `op_connect_request`, asks the server for the auxiliary event connection.
pub struct ConnectRequest {
    pub database: i32,
}

impl FrontendProtocol for ConnectRequest {
    const OPCODE: i32 = op::CONNECT_REQUEST;

    fn encode(self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        buf.put_xdr_i32(P_REQ_ASYNC);
        buf.put_xdr_i32(self.database);
        // partner
        buf.put_xdr_i32(0);
        Ok(())
    }
}

/// `op_que_events`, sent over the main connection with the auxiliary handle.
pub struct QueEvents<'a> {
    pub aux_handle: i32,
    pub epb: &'a [u8],
    pub local_id: i32,
}

impl FrontendProtocol for QueEvents<'_> {
    const OPCODE: i32 = op::QUE_EVENTS;

    fn encode(self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        buf.put_xdr_i32(self.aux_handle);
        buf.put_xdr_buffer(self.epb)?;
        // ast routine and argument
        buf.put_xdr_i64(0);
        buf.put_xdr_i32(self.local_id);
        Ok(())
    }
}

/// `op_cancel_events`
pub struct CancelEvents {
    pub database: i32,
    pub local_id: i32,
}

impl FrontendProtocol for CancelEvents {
    const OPCODE: i32 = op::CANCEL_EVENTS;

    fn encode(self, buf: &mut BytesMut) -> Result<(), EncodeError> {
        buf.put_xdr_i32(self.database);
        buf.put_xdr_i32(self.local_id);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::protocol::ProtocolDescriptor;

    fn encoded<F: FrontendProtocol>(message: F) -> BytesMut {
        let mut buf = BytesMut::new();
        write(message, &mut buf).unwrap();
        buf
    }

    struct Oversized;

    impl FrontendProtocol for Oversized {
        const OPCODE: i32 = op::PING;

        fn encode(self, buf: &mut BytesMut) -> Result<(), EncodeError> {
            buf.put_xdr_i32(7);
            Err(EncodeError::Overflow { len: 1 << 31, max: i32::MAX as usize })
        }
    }

    #[test]
    fn failed_encode_leaves_buffer() {
        let mut buf = BytesMut::new();
        write(Ping, &mut buf).unwrap();
        assert!(matches!(write(Oversized, &mut buf), Err(EncodeError::Overflow { .. })));
        assert_eq!(&buf[..], &op::PING.to_be_bytes());
    }

    #[test]
    fn que_events_layout() {
        let buf = encoded(QueEvents { aux_handle: 4, epb: &[1, 1, b'E', 0, 0, 0, 0], local_id: 9 });

        let mut expected = BytesMut::new();
        for i in [op::QUE_EVENTS, 4, 7] {
            expected.put_i32(i);
        }
        expected.put_slice(&[1, 1, b'E', 0, 0, 0, 0, 0]);
        expected.put_i64(0);
        expected.put_i32(9);
        assert_eq!(buf, expected);

        let buf = encoded(ConnectRequest { database: 3 });
        assert_eq!(&buf[..], &[0, 0, 0, 53, 0, 0, 0, 1, 0, 0, 0, 3, 0, 0, 0, 0]);
    }

    #[test]
    fn connect_layout() {
        let protocols = ProtocolCollection::of(ProtocolDescriptor::of(10));
        let buf = encoded(Connect { database: "db", user_id: &[9, 1, b'A'], protocols: &protocols });

        let mut expected = BytesMut::new();
        for i in [op::CONNECT, op::ATTACH, 3, 1] {
            expected.put_i32(i);
        }
        expected.put_slice(b"\0\0\0\x02db\0\0");
        expected.put_i32(1);
        expected.put_slice(b"\0\0\0\x03\x09\x01A\0");
        for i in [10, 1, 2, 3, 1] {
            expected.put_i32(i);
        }
        assert_eq!(buf, expected);
    }

    #[test]
    fn execute_tail_by_revision() {
        let context = ExecuteContext { timeout_millis: 0, cursor_flags: 1, max_inline_blob_size: 64 };

        let v15 = encoded(Execute {
            fields: ExecuteFields {
                statement: 1,
                transaction: 2,
                blr: &[],
                message: None,
                revision: Revision::of(15).unwrap(),
                context,
            },
        });
        // opcode, stmt, tx, blr, message number, message count
        assert_eq!(v15.len(), 6 * 4);

        let v19 = encoded(Execute {
            fields: ExecuteFields {
                statement: 1,
                transaction: 2,
                blr: &[],
                message: None,
                revision: Revision::of(19).unwrap(),
                context,
            },
        });
        assert_eq!(v19.len(), 9 * 4);
        assert_eq!(&v19[v19.len() - 8..], &[0, 0, 0, 1, 0, 0, 0, 64]);
    }

    #[test]
    fn execute2_out_blr_before_tail() {
        let buf = encoded(Execute2 {
            fields: ExecuteFields {
                statement: 1,
                transaction: 2,
                blr: &[1, 2],
                message: Some(&[0, 0, 0, 7]),
                revision: Revision::of(16).unwrap(),
                context: ExecuteContext { timeout_millis: 5, ..Default::default() },
            },
            out_blr: &[3],
        });

        let mut expected = BytesMut::new();
        for i in [op::EXECUTE2, 1, 2] {
            expected.put_i32(i);
        }
        expected.put_slice(b"\0\0\0\x02\x01\x02\0\0");
        expected.put_i32(0);
        expected.put_i32(1);
        expected.put_i32(7);
        expected.put_slice(b"\0\0\0\x01\x03\0\0\0");
        expected.put_i32(0);
        expected.put_i32(5);
        assert_eq!(buf, expected);
    }

    #[test]
    fn info_request() {
        let buf = encoded(InfoCursor { handle: 3, items: &[10, 1], buffer_len: 16 });
        let mut expected = BytesMut::new();
        for i in [op::INFO_CURSOR, 3, 0] {
            expected.put_i32(i);
        }
        expected.put_slice(b"\0\0\0\x02\x0a\x01\0\0");
        expected.put_i32(16);
        assert_eq!(buf, expected);
    }
}
