//! The [`Transaction`] type.
use std::{fmt, sync::Arc};

use crate::{
    Result,
    common::verbose,
    database::{DatabaseInner, PendingOp},
    exception::{ExceptionBuilder, codes},
    protocol::frontend,
};

/// State of a [`Transaction`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    /// First phase of a two phase commit completed.
    Prepared,
    Committed,
    RolledBack,
}

/// An RAII implementation of transaction scope.
///
/// To begin a transaction, use [`Database::start_transaction`][crate::Database::start_transaction].
///
/// To commit transaction, use [`Transaction::commit`].
///
/// If not committed, when this structure is dropped, transaction will be rolled back with the
/// next request on the connection.
///
/// # Example
///
/// ```no_run
/// # async fn test(db: fbwire::Database) -> fbwire::Result<()> {
/// let mut tx = db.start_transaction().await?;
///
/// db.execute_immediate(&tx, "insert into post(name) values('foo')").await?;
///
/// tx.commit().await?;
/// # Ok(())
/// # }
/// ```
pub struct Transaction {
    db: Arc<DatabaseInner>,
    handle: i32,
    state: TransactionState,
}

impl Transaction {
    pub(crate) fn new(db: Arc<DatabaseInner>, handle: i32) -> Self {
        Self { db, handle, state: TransactionState::Active }
    }

    /// Server handle.
    pub fn handle(&self) -> i32 {
        self.handle
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// Fails with `transaction_not_active` unless active.
    pub(crate) fn ensure_active(&self) -> Result<()> {
        match self.state {
            TransactionState::Active => Ok(()),
            _ => Err(ExceptionBuilder::new()
                .exception(codes::TRANSACTION_NOT_ACTIVE)
                .number_parameter(self.handle.into())
                .into_error()),
        }
    }

    fn ensure_pending(&self) -> Result<()> {
        match self.state {
            TransactionState::Active | TransactionState::Prepared => Ok(()),
            _ => self.ensure_active(),
        }
    }

    fn end(&mut self, state: TransactionState) {
        verbose!("transaction {} {state:?}", self.handle);
        self.state = state;
        self.db.cache().remove_transaction(self.handle);
    }

    /// Commit transaction.
    pub async fn commit(&mut self) -> Result<()> {
        self.ensure_pending()?;
        self.db.roundtrip(frontend::Commit { handle: self.handle }).await?;
        self.end(TransactionState::Committed);
        Ok(())
    }

    /// Roll back transaction.
    pub async fn rollback(&mut self) -> Result<()> {
        self.ensure_pending()?;
        self.db.roundtrip(frontend::Rollback { handle: self.handle }).await?;
        self.end(TransactionState::RolledBack);
        Ok(())
    }

    /// Prepare for two phase commit, [`Transaction::commit`] or [`Transaction::rollback`]
    /// completes it.
    pub async fn prepare(&mut self, message: &[u8]) -> Result<()> {
        self.ensure_active()?;
        self.db
            .roundtrip(frontend::PrepareTransaction { transaction: self.handle, message })
            .await?;
        self.state = TransactionState::Prepared;
        self.db.cache().remove_transaction(self.handle);
        Ok(())
    }

    /// Commit and keep the transaction context open.
    pub async fn commit_retaining(&mut self) -> Result<()> {
        self.ensure_active()?;
        self.db.roundtrip(frontend::CommitRetaining { handle: self.handle }).await?;
        Ok(())
    }

    /// Roll back and keep the transaction context open.
    pub async fn rollback_retaining(&mut self) -> Result<()> {
        self.ensure_active()?;
        self.db.roundtrip(frontend::RollbackRetaining { handle: self.handle }).await?;
        Ok(())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if matches!(self.state, TransactionState::Active | TransactionState::Prepared) {
            self.db.cache().remove_transaction(self.handle);
            self.db.queue(PendingOp::Rollback(self.handle));
        }
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("handle", &self.handle)
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use bytes::BytesMut;
    use tokio::io::AsyncWriteExt;

    use super::*;
    use crate::{
        Config,
        blob::{BlobId, InlineBlob},
        database::test::{database, err_response, ok_response, read_ints},
        protocol::op,
    };

    #[tokio::test]
    async fn commit_ends_transaction() {
        let (db, mut server) = database(15, Config::default());
        let mut buf = BytesMut::new();
        ok_response(&mut buf, 9, 0, b"");
        ok_response(&mut buf, 0, 0, b"");
        server.write_all(&buf).await.unwrap();

        let mut tx = db.start_transaction().await.unwrap();
        db.blob_cache()
            .add(9, InlineBlob::new(9, BlobId(1), Default::default(), Default::default()))
            .unwrap();
        assert!(db.blob_cache().contains(9, BlobId(1)));

        tx.commit().await.unwrap();
        assert_eq!(tx.state(), TransactionState::Committed);
        assert!(!db.blob_cache().contains(9, BlobId(1)));

        let err = tx.commit().await.unwrap_err();
        assert_eq!(err.code(), Some(codes::TRANSACTION_NOT_ACTIVE));
        assert!(err.to_string().contains('9'));
        assert!(tx.commit_retaining().await.is_err());
        drop(tx);

        // nothing queued for an ended transaction
        let mut buf = BytesMut::new();
        ok_response(&mut buf, 0, 0, b"");
        server.write_all(&buf).await.unwrap();
        db.ping().await.unwrap();
    }

    #[tokio::test]
    async fn failed_commit_stays_active() {
        let (db, mut server) = database(15, Config::default());
        let mut buf = BytesMut::new();
        ok_response(&mut buf, 9, 0, b"");
        err_response(&mut buf, codes::DSQL_ERROR);
        ok_response(&mut buf, 0, 0, b"");
        server.write_all(&buf).await.unwrap();

        let mut tx = db.start_transaction().await.unwrap();
        assert!(tx.commit().await.is_err());
        assert!(tx.is_active());
        tx.rollback().await.unwrap();
        assert_eq!(tx.state(), TransactionState::RolledBack);
    }

    #[tokio::test]
    async fn two_phase() {
        let (db, mut server) = database(15, Config::default());
        let mut buf = BytesMut::new();
        ok_response(&mut buf, 9, 0, b"");
        ok_response(&mut buf, 0, 0, b"");
        ok_response(&mut buf, 0, 0, b"");
        server.write_all(&buf).await.unwrap();

        let mut tx = db.start_transaction().await.unwrap();
        tx.prepare(b"").await.unwrap();
        assert_eq!(tx.state(), TransactionState::Prepared);
        assert!(tx.commit_retaining().await.is_err());
        tx.commit().await.unwrap();
        assert_eq!(tx.state(), TransactionState::Committed);
    }

    #[tokio::test]
    async fn dropped_transaction_rolled_back() {
        let (db, mut server) = database(15, Config::default());
        let mut buf = BytesMut::new();
        ok_response(&mut buf, 9, 0, b"");
        server.write_all(&buf).await.unwrap();
        let tx = db.start_transaction().await.unwrap();
        let _ = read_ints(&mut server, 3).await;
        drop(tx);

        let mut buf = BytesMut::new();
        ok_response(&mut buf, 0, 0, b"");
        ok_response(&mut buf, 0, 0, b"");
        server.write_all(&buf).await.unwrap();
        db.ping().await.unwrap();

        // rest of the tpb sent with op_transaction
        let tpb_len = 5;
        let _ = read_ints(&mut server, (tpb_len + 3) / 4).await;
        assert_eq!(read_ints(&mut server, 3).await, [op::ROLLBACK, 9, op::PING]);
    }
}
