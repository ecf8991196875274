//! Message catalogue and SQLSTATE mapping.
use super::codes::*;

/// Rendered in place of a parameter the template refers to but was not supplied.
pub const MISSING_PARAMETER: &str = "(null)";

const UNKNOWN_CODE: &str = "No message for code @1 found.";

/// Returns message template of given code.
pub fn template(code: i32) -> Option<&'static str> {
    let template = match code {
        ARITH_EXCEPT => "arithmetic exception, numeric overflow, or string truncation",
        BAD_DB_FORMAT => "file @1 is not a valid database",
        BAD_DB_HANDLE => "invalid database handle (no active connection)",
        BAD_DPB_CONTENT => "bad parameters on attach or create database",
        BAD_DPB_FORM => "unrecognized database parameter block",
        BAD_SEGSTR_HANDLE => "invalid BLOB handle",
        BAD_TRANS_HANDLE => "invalid transaction handle (expecting explicit transaction start)",
        BUG_CHECK => "internal Firebird consistency check (@1)",
        DB_CORRUPT => "database file appears corrupt (@1)",
        IO_ERROR => "I/O error during \"@1\" operation for file \"@2\"",
        METADATA_CORRUPT => "metadata is corrupt",
        NO_SEGSTR_CLOSE => "BLOB was not closed",
        OPEN_TRANS => "cannot disconnect database with open transactions (@1 active)",
        PORT_LEN => "message length error (encountered @1, expected @2)",
        REQ_SYNC => "request synchronization error",
        REQ_WRONG_DB => "request referenced an unavailable database",
        SEGMENT => "segment buffer length shorter than expected",
        SEGSTR_EOF => "attempted retrieval of more segments than exist",
        SEGSTR_NO_WRITE => "attempted write to read-only BLOB",
        SYS_REQUEST => "operating system directive @1 failed",
        UNAVAILABLE => "unavailable database",
        WISH_LIST => "feature is not supported",
        WRONG_ODS => "unsupported on-disk structure for file @1; found @2.@3, support @4.@5",
        RANDOM => "@1",
        CONNECT_REJECT => "connection rejected by remote interface",
        SQLERR => "Dynamic SQL Error",
        LOGIN => "Your user name and password are not defined. Ask your database administrator to set up a Firebird login.",
        BAD_STMT_HANDLE => "invalid statement handle",
        SHUTDOWN => "database @1 shutdown",
        DSQL_ERROR => "Dynamic SQL Error",
        DSQL_COMMAND_ERR => "Invalid command",
        DSQL_CURSOR_ERR => "Invalid cursor reference",
        DSQL_FIELD_ERR => "Column unknown",
        DSQL_RELATION_ERR => "Table unknown",
        CONN_LOST => "connection lost to database",
        NETWORK_ERROR => "Unable to complete network request to host \"@1\".",
        NET_CONNECT_ERR => "Failed to establish a connection.",
        NET_READ_ERR => "Error reading data from the connection.",
        NET_WRITE_ERR => "Error writing data to the connection.",
        CANCELLED => "operation was cancelled",
        DSQL_LINE_COL_ERROR => "At line @1, column @2",
        DSQL_UNKNOWN_POS => "At unknown line and column",
        WIRECRYPT_INCOMPATIBLE => "Incompatible wire encryption levels requested on client and server",
        MISS_WIRECRYPT => "Client attempted to attach unencrypted but wire encryption is required",
        WIRECRYPT_KEY => "Client attempted to start wire encryption using unknown key @1",
        WIRECRYPT_PLUGIN => "Client attempted to start wire encryption using unsupported plugin @1",
        CURSOR_NOT_OPEN => "Cursor is not open",
        CFG_STMT_TIMEOUT => "Statement level timeout expired.",
        ATT_STMT_TIMEOUT => "Attachment level timeout expired.",
        REQ_STMT_TIMEOUT => "Statement timeout expired.",

        CONNECTION_INVALID => "connection invalid, it was closed by a fatal error (@1)",
        BLOB_GET_SEGMENT_NEGATIVE => "get_segment called with size @1, should be > 0",
        BLOB_PUT_SEGMENT_EMPTY => "put_segment called with empty data",
        FEATURE_UNSUPPORTED => "@1 is not supported by protocol version @2",
        PARAMETER_COUNT => "expected @1 parameters, received @2",
        BLOB_CACHE_CLOSED => "inline blob cache is closed",
        STATEMENT_CLOSED => "statement is already freed",
        TRANSACTION_NOT_ACTIVE => "transaction @1 is not active",
        AUTH_FAILED => "authentication failed: @1",
        _ => return None,
    };
    Some(template)
}

/// Returns the SQLSTATE associated with given code.
pub fn sql_state(code: i32) -> Option<&'static str> {
    let state = match code {
        NETWORK_ERROR | NET_READ_ERR | NET_WRITE_ERR | CONN_LOST => "08006",
        NET_CONNECT_ERR | UNAVAILABLE => "08001",
        CONNECT_REJECT => "08004",
        BAD_DB_HANDLE | CONNECTION_INVALID => "08003",
        LOGIN | AUTH_FAILED => "28000",
        CANCELLED => "HY008",
        CURSOR_NOT_OPEN | DSQL_CURSOR_ERR => "24000",
        SQLERR | DSQL_ERROR | DSQL_COMMAND_ERR => "42000",
        DSQL_RELATION_ERR => "42S02",
        DSQL_FIELD_ERR => "42S22",
        ARITH_EXCEPT => "22000",
        CFG_STMT_TIMEOUT | ATT_STMT_TIMEOUT | REQ_STMT_TIMEOUT => "HYT00",
        BAD_TRANS_HANDLE | TRANSACTION_NOT_ACTIVE => "25000",
        BAD_SEGSTR_HANDLE | BAD_STMT_HANDLE | STATEMENT_CLOSED => "HY000",
        WISH_LIST | FEATURE_UNSUPPORTED => "0A000",
        PARAMETER_COUNT => "07001",
        _ => return None,
    };
    Some(state)
}

/// Render message of given code with `params` substituted into `@n` placeholders.
pub fn render(code: i32, params: &[String]) -> String {
    match template(code) {
        Some(template) => substitute(template, params),
        None => {
            let mut buf = itoa::Buffer::new();
            substitute(UNKNOWN_CODE, &[buf.format(code).to_owned()])
        }
    }
}

/// Substitute `@n` placeholders, one-based.
///
/// A placeholder without supplied parameter renders [`MISSING_PARAMETER`].
pub fn substitute(template: &str, params: &[String]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut read = template;

    while let Some(at) = read.find('@') {
        out.push_str(&read[..at]);
        read = &read[at + 1..];

        let digits = read.bytes().take_while(u8::is_ascii_digit).count();
        if digits == 0 {
            out.push('@');
            continue;
        }

        let nth = read[..digits].parse::<usize>().unwrap_or(0);
        match nth.checked_sub(1).and_then(|i| params.get(i)) {
            Some(param) => out.push_str(param),
            None => out.push_str(MISSING_PARAMETER),
        }
        read = &read[digits..];
    }

    out.push_str(read);
    out
}
