use std::{
    collections::{HashMap, HashSet},
    sync::{Mutex, MutexGuard, PoisonError},
};

use super::{BlobId, InlineBlob};
use crate::{
    Result,
    common::verbose,
    exception::{ExceptionBuilder, codes},
};

/// Inline blobs of one connection, waiting to be opened.
///
/// Blobs are keyed by transaction and blob id, and only accepted for transactions which are
/// still active. A blob is handed out at most once, [`InlineBlobCache::take`] removes it.
#[derive(Debug)]
pub struct InlineBlobCache {
    max_inline_size: usize,
    max_cache_size: usize,
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    blobs: HashMap<(i32, BlobId), InlineBlob>,
    transactions: HashSet<i32>,
    size: usize,
    closed: bool,
}

impl InlineBlobCache {
    /// Cache accepting blobs up to `max_inline_size` bytes, `max_cache_size` bytes in total.
    ///
    /// A `max_cache_size` of 0 disables the cache.
    pub fn new(max_inline_size: u32, max_cache_size: usize) -> Self {
        Self {
            max_inline_size: max_inline_size as usize,
            max_cache_size,
            state: Mutex::default(),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Total size budget, `-1` if disabled.
    pub fn max_size(&self) -> i64 {
        match self.max_cache_size {
            0 => -1,
            size => i64::try_from(size).unwrap_or(i64::MAX),
        }
    }

    /// Current total size of cached blobs.
    pub fn size(&self) -> usize {
        self.state().size
    }

    pub fn len(&self) -> usize {
        self.state().blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().blobs.is_empty()
    }

    /// Mark `transaction` active, blobs of inactive transactions are rejected.
    pub fn register_transaction(&self, transaction: i32) {
        let mut state = self.state();
        if !state.closed {
            state.transactions.insert(transaction);
        }
    }

    /// Add a blob of `transaction`.
    ///
    /// Returns `false` if the blob is rejected: the transaction is not active or not the one of
    /// the blob, the key is already present, or the blob does not fit the size limits.
    ///
    /// # Errors
    ///
    /// Returns `blob_cache_closed` after [`InlineBlobCache::close`].
    pub fn add(&self, transaction: i32, blob: InlineBlob) -> Result<bool> {
        let mut state = self.state();
        if state.closed {
            return Err(ExceptionBuilder::new().exception(codes::BLOB_CACHE_CLOSED).into_error());
        }

        let len = blob.data_len();
        let key = (transaction, blob.blob_id());
        let accepted = self.max_cache_size != 0
            && blob.transaction() == transaction
            && state.transactions.contains(&transaction)
            && len <= self.max_inline_size
            && !state.blobs.contains_key(&key)
            && state.size + len <= self.max_cache_size;

        if !accepted {
            verbose!("inline blob {:?} of transaction {transaction} rejected", blob.blob_id());
            return Ok(false);
        }

        state.size += len;
        state.blobs.insert(key, blob);
        Ok(true)
    }

    /// Remove and return the blob, if present.
    pub fn take(&self, transaction: i32, blob_id: BlobId) -> Option<InlineBlob> {
        let mut state = self.state();
        let blob = state.blobs.remove(&(transaction, blob_id))?;
        state.size -= blob.data_len();
        Some(blob)
    }

    pub fn contains(&self, transaction: i32, blob_id: BlobId) -> bool {
        self.state().blobs.contains_key(&(transaction, blob_id))
    }

    /// Drop the blobs of an ended transaction, later blobs of it are rejected.
    pub fn remove_transaction(&self, transaction: i32) {
        let mut state = self.state();
        state.transactions.remove(&transaction);
        state.blobs.retain(|&(tx, _), _| tx != transaction);
        state.size = state.blobs.values().map(InlineBlob::data_len).sum();
    }

    /// Drop every blob.
    pub fn clear(&self) {
        let mut state = self.state();
        state.blobs.clear();
        state.transactions.clear();
        state.size = 0;
    }

    /// Drop every blob and reject later additions.
    pub fn close(&self) {
        let mut state = self.state();
        state.blobs.clear();
        state.transactions.clear();
        state.size = 0;
        state.closed = true;
    }
}

#[cfg(test)]
mod test {
    use bytes::Bytes;
    use std::sync::Arc;

    use super::*;

    const TX: i32 = 5;

    fn blob(id: i64, len: usize) -> InlineBlob {
        InlineBlob::new(TX, BlobId(id), Bytes::new(), Bytes::from(vec![b'x'; len]))
    }

    fn cache(max_inline: u32, max_cache: usize) -> InlineBlobCache {
        let cache = InlineBlobCache::new(max_inline, max_cache);
        cache.register_transaction(TX);
        cache
    }

    #[test]
    fn take_once() {
        let cache = cache(100, 1000);
        assert!(cache.add(TX, blob(1, 100)).unwrap());
        assert_eq!(cache.size(), 100);

        let taken = cache.take(TX, BlobId(1)).unwrap();
        assert_eq!(taken.data_len(), 100);
        assert!(cache.take(TX, BlobId(1)).is_none());
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn max_inline_size_boundary() {
        let cache = cache(100, 1000);
        assert!(cache.add(TX, blob(1, 100)).unwrap());
        assert!(!cache.add(TX, blob(2, 101)).unwrap());
        assert!(!cache.contains(TX, BlobId(2)));
    }

    #[test]
    fn cache_size_budget() {
        let cache = cache(1000, 100);
        assert!(cache.add(TX, blob(1, 100)).unwrap());
        assert!(cache.add(TX, blob(2, 0)).unwrap());
        assert!(!cache.add(TX, blob(3, 1)).unwrap());
        assert_eq!(cache.len(), 2);

        let cache = self::cache(1000, 100);
        assert!(!cache.add(TX, blob(1, 101)).unwrap());
    }

    #[test]
    fn disabled() {
        let cache = cache(100, 0);
        assert_eq!(cache.max_size(), -1);
        assert!(!cache.add(TX, blob(1, 0)).unwrap());
        assert_eq!(self::cache(1, 10).max_size(), 10);
    }

    #[test]
    fn duplicate_rejected() {
        let cache = cache(100, 1000);
        assert!(cache.add(TX, blob(1, 10)).unwrap());
        assert!(!cache.add(TX, blob(1, 20)).unwrap());
        assert_eq!(cache.size(), 10);
    }

    #[test]
    fn transaction_must_be_active_and_match() {
        let cache = InlineBlobCache::new(100, 1000);
        assert!(!cache.add(TX, blob(1, 10)).unwrap());

        cache.register_transaction(TX);
        cache.register_transaction(TX + 1);
        assert!(!cache.add(TX + 1, blob(1, 10)).unwrap());
        assert!(cache.add(TX, blob(1, 10)).unwrap());
    }

    #[test]
    fn ended_transaction() {
        let cache = cache(100, 1000);
        cache.register_transaction(TX + 1);
        cache.add(TX, blob(1, 10)).unwrap();
        cache
            .add(TX + 1, InlineBlob::new(TX + 1, BlobId(1), Bytes::new(), Bytes::from_static(b"ab")))
            .unwrap();

        cache.remove_transaction(TX);
        assert!(!cache.contains(TX, BlobId(1)));
        assert!(cache.contains(TX + 1, BlobId(1)));
        assert_eq!(cache.size(), 2);
        assert!(!cache.add(TX, blob(2, 10)).unwrap());
    }

    #[test]
    fn closed() {
        let cache = cache(100, 1000);
        cache.add(TX, blob(1, 10)).unwrap();
        cache.close();
        assert!(cache.is_empty());
        let err = cache.add(TX, blob(2, 10)).unwrap_err();
        assert_eq!(err.code(), Some(codes::BLOB_CACHE_CLOSED));
    }

    #[test]
    fn concurrent_take() {
        let cache = Arc::new(cache(100, 100_000));
        for id in 0..64 {
            assert!(cache.add(TX, blob(id, 1)).unwrap());
        }

        let handles = (0..4)
            .map(|_| {
                let cache = cache.clone();
                std::thread::spawn(move || (0..64).filter(|&id| cache.take(TX, BlobId(id)).is_some()).count())
            })
            .collect::<Vec<_>>();

        let taken: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(taken, 64);
        assert!(cache.is_empty());
    }
}
