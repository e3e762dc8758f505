use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::{Column, KeyValueStore, PrefixVisitor, StoreError, WriteBatch, WriteOp};

type MemoryStoreMap = BTreeMap<(Column, Vec<u8>), Vec<u8>>;

/// Process-local store, used by tests and by nodes that keep the coin set in RAM.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryStoreMap>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self, column: Column) -> Result<usize, StoreError> {
        Ok(self.read()?.keys().filter(|(entry, _)| *entry == column).count())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryStoreMap>, StoreError> {
        self.inner
            .read()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryStoreMap>, StoreError> {
        self.inner
            .write()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".to_string()))
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.read()?.get(&(column, key.to_vec())).cloned())
    }

    fn for_each_prefix<'a>(
        &self,
        column: Column,
        prefix: &[u8],
        visitor: &mut PrefixVisitor<'a>,
    ) -> Result<(), StoreError> {
        let guard = self.read()?;
        let start = (column, prefix.to_vec());
        for ((entry_column, key), value) in guard.range(start..) {
            if *entry_column != column || !key.starts_with(prefix) {
                break;
            }
            visitor(key.as_slice(), value.as_slice())?;
        }
        Ok(())
    }

    fn write_batch(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        let mut guard = self.write()?;
        for op in batch.iter() {
            match op {
                WriteOp::Put { column, key, value } => {
                    guard.insert(
                        (*column, key.as_slice().to_vec()),
                        value.as_slice().to_vec(),
                    );
                }
                WriteOp::Delete { column, key } => {
                    guard.remove(&(*column, key.as_slice().to_vec()));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_applies_in_order() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        batch.put(Column::Coins, [1u8, 2], vec![9u8]);
        batch.put(Column::Meta, [1u8, 2], vec![7u8]);
        batch.delete(Column::Coins, [1u8, 2]);
        batch.put(Column::Coins, [1u8, 3], vec![5u8]);
        store.write_batch(&batch).expect("write");

        assert_eq!(store.get(Column::Coins, &[1, 2]).expect("get"), None);
        assert_eq!(store.get(Column::Meta, &[1, 2]).expect("get"), Some(vec![7]));
        assert_eq!(store.len(Column::Coins).expect("len"), 1);
    }

    #[test]
    fn prefix_walk_stays_in_column() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        batch.put(Column::Coins, [0xaau8, 0], vec![0u8]);
        batch.put(Column::Coins, [0xaau8, 1], vec![1u8]);
        batch.put(Column::Coins, [0xabu8, 0], vec![2u8]);
        batch.put(Column::Meta, [0xaau8, 2], vec![3u8]);
        store.write_batch(&batch).expect("write");

        let mut seen = Vec::new();
        store
            .for_each_prefix(Column::Coins, &[0xaa], &mut |_, value| {
                seen.push(value[0]);
                Ok(())
            })
            .expect("walk");
        assert_eq!(seen, vec![0, 1]);
    }
}
