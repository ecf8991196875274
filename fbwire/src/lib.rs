//! Firebird Wire Protocol Client
//!
//! # Examples
//!
//! ```no_run
//! use fbwire::{Database, Params};
//!
//! # async fn app() -> fbwire::Result<()> {
//! let db = Database::connect_env().await?;
//! let mut tx = db.start_transaction().await?;
//!
//! let stmt = db.prepare(&tx, "select rdb$relation_name from rdb$relations where rdb$system_flag = ?").await?;
//! stmt.execute(&tx, &Params::new().bind(1i32)).await?;
//!
//! loop {
//!     let rows = stmt.fetch(100).await?;
//!     if rows.is_empty() {
//!         break;
//!     }
//!     for row in rows {
//!         let name: String = row.try_get(0)?;
//!         println!("{}", name.trim_end());
//!     }
//! }
//!
//! tx.commit().await?;
//! db.detach().await?;
//! # Ok(())
//! # }
//! ```
//!
//! Blobs of a row are fetched with the row when the server sends them inline:
//!
//! ```no_run
//! # async fn app(db: fbwire::Database, tx: &fbwire::Transaction, id: fbwire::BlobId) -> fbwire::Result<()> {
//! let mut blob = db.open_blob(tx, id, &[]).await?;
//! let data = blob.read_all().await?;
//! # Ok(())
//! # }
//! ```

mod common;
mod net;
mod ext;

// Protocol
pub mod xdr;
pub mod protocol;
pub mod exception;
pub mod auth;
mod stream;

// Encoding
pub mod row;
pub mod blob;

// Operation
pub mod statement;
pub mod transaction;
pub mod event;

// Connection
pub mod connection;
mod database;

mod error;


pub use row::{Column, Decode, DecodeError, FromRow, Param, Params, RowValue};
pub use blob::{BlobId, InputBlob, OutputBlob};

pub use statement::{CancelHandle, CursorFlag, ExecuteResult, FetchType, Statement, StatementType};
pub use transaction::{Transaction, TransactionState};
pub use database::{CancelKind, Database};
pub use event::EventHandle;
pub use connection::{Config, Connection, FatalErrors};
pub use error::{Error, ErrorKind, Result};
