//! Firebird Wire Protocol
//!
//! ## Messaging Overview
//!
//! Unlike length framed protocols, a message is a plain sequence of [XDR][crate::xdr] items
//! whose first item is the operation code. The receiver knows the layout of each operation,
//! which for some operations depends on the negotiated protocol version.
//!
//! ```text
//! ┏━━━━━━━━━━━━━━━━━━━┳━━━━━━━━━━━━━━━━━━━━━━━┓
//! ┃     Operation     ┃       XDR items       ┃
//! ┣━━━━━━━━━━━━━━━━━━━╋━━━━━━━━━━━━━━━━━━━━━━━┫
//! ┃        i32        ┃          ..           ┃
//! ┣━━━━━━━━━━━━━━━━━━━╋━━━━━━━━━━━━━━━━━━━━━━━┫
//! ┃ 00 | 00 | 00 | 13 ┃ handle | dpb | ..     ┃
//! ┗━━━━━━━━━━━━━━━━━━━┻━━━━━━━━━━━━━━━━━━━━━━━┛
//! ```
//!
//! Connection starts with `op_connect` listing the supported [`ProtocolDescriptor`]s, the
//! server picks one and every later message follows that version.
use std::fmt;

pub mod op;
mod descriptor;
pub mod buffer;
pub mod frontend;
pub mod backend;

pub use descriptor::{Capability, ExecuteContext, ExecuteTail, ProtocolCollection, ProtocolDescriptor, Revision};
pub use frontend::FrontendProtocol;
pub use backend::BackendMessage;

/// `op_connect` version.
pub const CONNECT_VERSION3: i32 = 3;

/// Generic architecture, the only one a client should request.
pub const ARCH_GENERIC: i32 = 1;

/// Remote procedure call, no batching.
pub const PTYPE_RPC: i32 = 2;
/// Batch send, asynchronous.
pub const PTYPE_BATCH_SEND: i32 = 3;
/// Lazy send, responses of some operations are deferred.
pub const PTYPE_LAZY_SEND: i32 = 5;
/// Mask of accepted type.
pub const PTYPE_MASK: i32 = 0xFF;
/// Compression flag in accepted type.
pub const PFLAG_COMPRESS: i32 = 0x100;

/// Flag of protocol versions from 11 onward.
pub const FB_PROTOCOL_FLAG: i32 = 0x8000;
/// Mask for the version number.
pub const FB_PROTOCOL_MASK: i32 = !FB_PROTOCOL_FLAG & 0xFFFF;

/// Statement handle used by pipelined allocate and prepare.
pub const INVALID_OBJECT: i32 = 0xFFFF;

/// Statement dialect.
pub const SQL_DIALECT_CURRENT: i32 = 3;

/// Prepare and info reply buffer length.
pub const DEFAULT_INFO_SIZE: i32 = 32767;

/// `op_free_statement` option.
pub mod dsql {
    /// Close cursor.
    pub const CLOSE: i32 = 1;
    /// Release statement.
    pub const DROP: i32 = 2;
}

/// `op_fetch_response` status.
pub mod fetch_status {
    /// Rows follow.
    pub const OK: i32 = 0;
    /// No more rows.
    pub const NO_MORE_ROWS: i32 = 100;
}

/// User identification items of `op_connect`.
pub mod cnct {
    pub const USER: u8 = 1;
    pub const HOST: u8 = 4;
    pub const USER_VERIFICATION: u8 = 6;
    pub const SPECIFIC_DATA: u8 = 7;
    pub const PLUGIN_NAME: u8 = 8;
    pub const LOGIN: u8 = 9;
    pub const PLUGIN_LIST: u8 = 10;
    pub const CLIENT_CRYPT: u8 = 11;

    /// Wire crypt disabled.
    pub const WIRE_CRYPT_DISABLED: i32 = 0;
}

/// Database parameter block items.
pub mod dpb {
    pub const VERSION1: u8 = 1;
    /// Same items as version 1 with 32 bit lengths, from protocol 13.
    pub const VERSION2: u8 = 2;
    pub const USER_NAME: u8 = 28;
    pub const PASSWORD: u8 = 29;
    pub const PASSWORD_ENC: u8 = 30;
    pub const LC_CTYPE: u8 = 48;
    pub const SQL_ROLE_NAME: u8 = 60;
    pub const CONNECT_TIMEOUT: u8 = 57;
    pub const SQL_DIALECT: u8 = 63;
    pub const PROCESS_ID: u8 = 71;
    pub const PROCESS_NAME: u8 = 74;
    pub const UTF8_FILENAME: u8 = 77;
    pub const SPECIFIC_AUTH_DATA: u8 = 84;
    pub const AUTH_PLUGIN_LIST: u8 = 85;
    pub const AUTH_PLUGIN_NAME: u8 = 86;
}

/// Transaction parameter block items.
pub mod tpb {
    pub const VERSION3: u8 = 3;
    pub const CONSISTENCY: u8 = 1;
    pub const CONCURRENCY: u8 = 2;
    pub const WAIT: u8 = 6;
    pub const NOWAIT: u8 = 7;
    pub const READ: u8 = 8;
    pub const WRITE: u8 = 9;
    pub const READ_COMMITTED: u8 = 15;
    pub const REC_VERSION: u8 = 17;
    pub const NO_REC_VERSION: u8 = 18;
}

/// Blob parameter block items.
pub mod bpb {
    pub const VERSION1: u8 = 1;
    pub const SOURCE_TYPE: u8 = 1;
    pub const TARGET_TYPE: u8 = 2;
    pub const TYPE: u8 = 3;
    pub const TYPE_SEGMENTED: u8 = 0;
    pub const TYPE_STREAM: u8 = 1;
}

/// Event parameter block.
pub mod epb {
    pub const VERSION1: u8 = 1;
}

/// `op_connect_request` type, the auxiliary connection for events.
pub const P_REQ_ASYNC: i32 = 1;

/// Info request and reply items.
pub mod info {
    pub const END: u8 = 1;
    pub const TRUNCATED: u8 = 2;
    pub const ERROR: u8 = 3;

    pub const SQL_SELECT: u8 = 4;
    pub const SQL_BIND: u8 = 5;
    pub const SQL_NUM_VARIABLES: u8 = 6;
    pub const SQL_DESCRIBE_VARS: u8 = 7;
    pub const SQL_DESCRIBE_END: u8 = 8;
    pub const SQL_SQLDA_SEQ: u8 = 9;
    pub const SQL_TYPE: u8 = 11;
    pub const SQL_SUB_TYPE: u8 = 12;
    pub const SQL_SCALE: u8 = 13;
    pub const SQL_LENGTH: u8 = 14;
    pub const SQL_NULL_IND: u8 = 15;
    pub const SQL_FIELD: u8 = 16;
    pub const SQL_RELATION: u8 = 17;
    pub const SQL_OWNER: u8 = 18;
    pub const SQL_ALIAS: u8 = 19;
    pub const SQL_SQLDA_START: u8 = 20;
    pub const SQL_STMT_TYPE: u8 = 21;

    pub const BLOB_NUM_SEGMENTS: u8 = 4;
    pub const BLOB_MAX_SEGMENT: u8 = 5;
    pub const BLOB_TOTAL_LENGTH: u8 = 6;
    pub const BLOB_TYPE: u8 = 7;

    /// Cursor info, number of records in a scrollable cursor.
    pub const CURSOR_RECORD_COUNT: u8 = 10;
}

/// An error when translating bytes from the server.
///
/// Any protocol error leaves the stream in unknown position, the connection is unusable
/// afterwards.
pub enum ProtocolError {
    /// Unexpected operation code.
    Unexpected {
        expect: Option<i32>,
        found: i32,
        phase: Option<&'static str>,
    },
    /// Buffer shorter than the item being read.
    Truncated { expected: usize, remaining: usize },
    /// Negative opaque buffer length.
    InvalidLength(i32),
    /// Segment length exceeding remaining data.
    CorruptSegment { len: usize, remaining: usize },
    /// Server accepted a version not offered by the client.
    UnsupportedVersion { version: i32, architecture: i32, ptype: i32 },
    /// Malformed info buffer.
    InvalidInfo { item: u8, reason: &'static str },
}

impl std::error::Error for ProtocolError { }

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ProtocolError::Unexpected { expect, found, phase } => {
                let found = op::name(found);
                match expect {
                    Some(expect) => write!(f, "Expected operation `{}` found `{found}`", op::name(expect))?,
                    None => write!(f, "Unexpected operation `{found}`")?,
                }
                if let Some(phase) = phase {
                    write!(f, " in `{phase}`")?
                }
                Ok(())
            },
            ProtocolError::Truncated { expected, remaining } => {
                write!(f, "Truncated message, expected {expected} bytes, remaining {remaining}")
            },
            ProtocolError::InvalidLength(len) => write!(f, "Invalid buffer length {len}"),
            ProtocolError::CorruptSegment { len, remaining } => {
                write!(f, "Corrupt segment stream, segment of {len} bytes with {remaining} remaining")
            },
            ProtocolError::UnsupportedVersion { version, architecture, ptype } => write!(
                f,
                "Unsupported or unexpected protocol version {:#x} \
                (architecture {architecture}, type {ptype}) accepted by server",
                version
            ),
            ProtocolError::InvalidInfo { item, reason } => {
                write!(f, "Invalid info item {item}: {reason}")
            },
        }
    }
}

impl fmt::Debug for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl ProtocolError {
    pub(crate) fn unknown(found: i32) -> ProtocolError {
        Self::Unexpected { expect: None, found, phase: None }
    }

    pub(crate) fn unexpected(expect: i32, found: i32) -> ProtocolError {
        Self::Unexpected { expect: Some(expect), found, phase: None }
    }

    pub(crate) fn unexpected_phase(found: i32, phase: &'static str) -> ProtocolError {
        Self::Unexpected { expect: None, found, phase: Some(phase) }
    }

    pub(crate) fn truncated(expected: usize, remaining: usize) -> ProtocolError {
        Self::Truncated { expected, remaining }
    }

    pub(crate) fn invalid_info(item: u8, reason: &'static str) -> ProtocolError {
        Self::InvalidInfo { item, reason }
    }
}
