//! Error codes.
//!
//! Server codes share the `isc_` numbering of the engine. Client codes are raised locally by
//! this crate and live in the `337248256..` block, which the engine never uses.

// engine codes

pub const ARITH_EXCEPT: i32 = 335544321;
pub const BAD_DB_FORMAT: i32 = 335544323;
pub const BAD_DB_HANDLE: i32 = 335544324;
pub const BAD_DPB_CONTENT: i32 = 335544325;
pub const BAD_DPB_FORM: i32 = 335544326;
pub const BAD_SEGSTR_HANDLE: i32 = 335544328;
pub const BAD_TRANS_HANDLE: i32 = 335544332;
pub const BUG_CHECK: i32 = 335544333;
pub const DB_CORRUPT: i32 = 335544335;
pub const IO_ERROR: i32 = 335544344;
pub const METADATA_CORRUPT: i32 = 335544346;
pub const NO_SEGSTR_CLOSE: i32 = 335544355;
pub const OPEN_TRANS: i32 = 335544357;
pub const PORT_LEN: i32 = 335544358;
pub const REQ_SYNC: i32 = 335544364;
pub const REQ_WRONG_DB: i32 = 335544365;
pub const SEGMENT: i32 = 335544366;
pub const SEGSTR_EOF: i32 = 335544367;
pub const SEGSTR_NO_WRITE: i32 = 335544371;
pub const SYS_REQUEST: i32 = 335544373;
pub const UNAVAILABLE: i32 = 335544375;
pub const WISH_LIST: i32 = 335544378;
pub const WRONG_ODS: i32 = 335544379;
pub const RANDOM: i32 = 335544382;
pub const CONNECT_REJECT: i32 = 335544421;
pub const SQLERR: i32 = 335544436;
pub const LOGIN: i32 = 335544472;
pub const BAD_STMT_HANDLE: i32 = 335544485;
pub const SHUTDOWN: i32 = 335544528;
pub const DSQL_ERROR: i32 = 335544569;
pub const DSQL_COMMAND_ERR: i32 = 335544570;
pub const DSQL_CURSOR_ERR: i32 = 335544572;
pub const DSQL_FIELD_ERR: i32 = 335544578;
pub const DSQL_RELATION_ERR: i32 = 335544580;
pub const CONN_LOST: i32 = 335544648;
pub const NETWORK_ERROR: i32 = 335544721;
pub const NET_CONNECT_ERR: i32 = 335544722;
pub const NET_READ_ERR: i32 = 335544726;
pub const NET_WRITE_ERR: i32 = 335544727;
pub const CANCELLED: i32 = 335544794;
pub const DSQL_LINE_COL_ERROR: i32 = 335544851;
pub const DSQL_UNKNOWN_POS: i32 = 335544852;
pub const WIRECRYPT_INCOMPATIBLE: i32 = 335545064;
pub const MISS_WIRECRYPT: i32 = 335545065;
pub const WIRECRYPT_KEY: i32 = 335545066;
pub const WIRECRYPT_PLUGIN: i32 = 335545067;
pub const CURSOR_NOT_OPEN: i32 = 335545092;
pub const CFG_STMT_TIMEOUT: i32 = 335545218;
pub const ATT_STMT_TIMEOUT: i32 = 335545219;
pub const REQ_STMT_TIMEOUT: i32 = 335545220;

// client codes

pub const CONNECTION_INVALID: i32 = 337248256;
pub const BLOB_GET_SEGMENT_NEGATIVE: i32 = 337248257;
pub const BLOB_PUT_SEGMENT_EMPTY: i32 = 337248258;
pub const FEATURE_UNSUPPORTED: i32 = 337248259;
pub const PARAMETER_COUNT: i32 = 337248260;
pub const BLOB_CACHE_CLOSED: i32 = 337248261;
pub const STATEMENT_CLOSED: i32 = 337248262;
pub const TRANSACTION_NOT_ACTIVE: i32 = 337248263;
pub const AUTH_FAILED: i32 = 337248264;

/// Codes treated as connection fatal unless configured otherwise.
pub const DEFAULT_FATAL: [i32; 15] = [
    BAD_DB_FORMAT,
    BAD_DB_HANDLE,
    BAD_DPB_CONTENT,
    BAD_DPB_FORM,
    BUG_CHECK,
    DB_CORRUPT,
    IO_ERROR,
    METADATA_CORRUPT,
    OPEN_TRANS,
    PORT_LEN,
    REQ_SYNC,
    REQ_WRONG_DB,
    SYS_REQUEST,
    UNAVAILABLE,
    WRONG_ODS,
];
