//! Bounded cache of open output writers.

use std::hash::Hash;
use std::num::NonZeroUsize;

use lru::LruCache;

use crate::error::{PartitionError, Result};

/// A writer that holds an open file until closed.
pub trait PooledWriter {
    /// Flush buffered output and release the file.
    fn close(self) -> Result<()>;
}

/// At most `capacity` open writers, evicting (and closing) the least
/// recently used one before a new writer is admitted.
pub struct WriterCache<K: Hash + Eq, W: PooledWriter> {
    writers: LruCache<K, W>,
    capacity: usize,
}

impl<K: Hash + Eq + Clone, W: PooledWriter> WriterCache<K, W> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        WriterCache {
            writers: LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.writers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writers.is_empty()
    }

    /// The writer for `key`, marked most recently used. `open` is called
    /// when the key has no open writer.
    pub fn get_or_open(&mut self, key: &K, open: impl FnOnce() -> Result<W>) -> Result<&mut W> {
        if !self.writers.contains(key) {
            if self.writers.len() >= self.capacity {
                if let Some((_, evicted)) = self.writers.pop_lru() {
                    evicted.close()?;
                }
            }
            self.writers.put(key.clone(), open()?);
        }
        self.writers
            .get_mut(key)
            .ok_or_else(|| PartitionError::Internal("writer vanished from cache".to_string()))
    }

    /// Close every open writer, least recently used first.
    pub fn close_all(&mut self) -> Result<()> {
        while let Some((_, writer)) = self.writers.pop_lru() {
            writer.close()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct MockWriter {
        key: u32,
        closed: Rc<RefCell<Vec<u32>>>,
    }

    impl PooledWriter for MockWriter {
        fn close(self) -> Result<()> {
            self.closed.borrow_mut().push(self.key);
            Ok(())
        }
    }

    fn touch(cache: &mut WriterCache<u32, MockWriter>, key: u32, closed: &Rc<RefCell<Vec<u32>>>) {
        let closed = closed.clone();
        let w = cache
            .get_or_open(&key, || Ok(MockWriter { key, closed }))
            .unwrap();
        assert_eq!(w.key, key);
    }

    #[test]
    fn evicts_least_recently_touched() {
        let closed = Rc::new(RefCell::new(Vec::new()));
        let mut cache = WriterCache::new(3);
        for key in [1, 2, 3] {
            touch(&mut cache, key, &closed);
        }
        assert!(closed.borrow().is_empty());
        touch(&mut cache, 4, &closed);
        assert_eq!(*closed.borrow(), [1]);
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn retouching_prevents_eviction() {
        let closed = Rc::new(RefCell::new(Vec::new()));
        let mut cache = WriterCache::new(3);
        for key in [1, 2, 3, 1] {
            touch(&mut cache, key, &closed);
        }
        touch(&mut cache, 4, &closed);
        assert_eq!(*closed.borrow(), [2]);
        // an evicted writer is reopened on demand
        touch(&mut cache, 2, &closed);
        assert_eq!(*closed.borrow(), [2, 3]);
        cache.close_all().unwrap();
        assert_eq!(*closed.borrow(), [2, 3, 1, 4, 2]);
        assert!(cache.is_empty());
    }

    #[test]
    fn zero_capacity_holds_one() {
        let closed = Rc::new(RefCell::new(Vec::new()));
        let mut cache = WriterCache::new(0);
        touch(&mut cache, 1, &closed);
        touch(&mut cache, 1, &closed);
        touch(&mut cache, 2, &closed);
        assert_eq!(*closed.borrow(), [1]);
    }
}
