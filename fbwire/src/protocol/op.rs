//! Operation codes.
//!
//! Every message starts with one of these as a 32 bit integer.

macro_rules! opcodes {
    ($($name:ident = $value:literal,)*) => {
        $(pub const $name: i32 = $value;)*

        /// Get operation name from its code.
        ///
        /// Returns `"unknown"` for unknown code.
        pub fn name(op: i32) -> &'static str {
            match op {
                $($value => stringify!($name),)*
                _ => "unknown",
            }
        }
    };
}

opcodes! {
    CONNECT = 1,
    EXIT = 2,
    ACCEPT = 3,
    REJECT = 4,
    DISCONNECT = 6,
    RESPONSE = 9,
    ATTACH = 19,
    CREATE = 20,
    DETACH = 21,
    TRANSACTION = 29,
    COMMIT = 30,
    ROLLBACK = 31,
    OPEN_BLOB = 35,
    GET_SEGMENT = 36,
    PUT_SEGMENT = 37,
    CANCEL_BLOB = 38,
    CLOSE_BLOB = 39,
    INFO_DATABASE = 40,
    INFO_BLOB = 43,
    QUE_EVENTS = 48,
    CANCEL_EVENTS = 49,
    COMMIT_RETAINING = 50,
    PREPARE2 = 51,
    EVENT = 52,
    CONNECT_REQUEST = 53,
    OPEN_BLOB2 = 56,
    CREATE_BLOB2 = 57,
    SEEK_BLOB = 61,
    ALLOCATE_STATEMENT = 62,
    EXECUTE = 63,
    EXEC_IMMEDIATE = 64,
    FETCH = 65,
    FETCH_RESPONSE = 66,
    FREE_STATEMENT = 67,
    PREPARE_STATEMENT = 68,
    INFO_SQL = 70,
    DUMMY = 71,
    EXECUTE2 = 76,
    SQL_RESPONSE = 78,
    ROLLBACK_RETAINING = 86,
    TRUSTED_AUTH = 90,
    CANCEL = 91,
    CONT_AUTH = 92,
    PING = 93,
    ACCEPT_DATA = 94,
    CRYPT = 96,
    CRYPT_KEY_CALLBACK = 97,
    COND_ACCEPT = 98,
    FETCH_SCROLL = 112,
    INFO_CURSOR = 113,
    INLINE_BLOB = 114,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn op_name() {
        assert_eq!(name(INLINE_BLOB), "INLINE_BLOB");
        assert_eq!(name(COND_ACCEPT), "COND_ACCEPT");
        assert_eq!(name(-1), "unknown");
    }
}
