use crate::core::error::{DiskContext, RunnerError};
use ride_common::{
    block::{BlockHeaderWithVrf, Height},
    remote::RemoteData,
    serializer::Serializer,
};
use std::marker::PhantomData;

// One versioned key-value store over a sled tree.
//
// Every record is stored under `key_bytes ++ big-endian height`, so all
// versions of one key are contiguous and a backwards seek from
// `(key, max_height)` yields the effective value. Key encodings must be
// prefix-free (fixed size or length-prefixed), otherwise one key's range
// would swallow another's.
pub struct VersionedTree<K, V> {
    tree: sled::Tree,
    context: DiskContext,
    _phantom: PhantomData<(K, V)>,
}

fn versioned_key(key_bytes: &[u8], height: Height) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(key_bytes.len() + 8);
    bytes.extend_from_slice(key_bytes);
    bytes.extend_from_slice(&height.to_be_bytes());
    bytes
}

impl<K: Serializer, V: Serializer> VersionedTree<K, V> {
    pub fn new(db: &sled::Db, name: &str, context: DiskContext) -> Result<Self, RunnerError> {
        Ok(VersionedTree {
            tree: db.open_tree(name)?,
            context,
            _phantom: PhantomData,
        })
    }

    // Effective value at `max_height`: the record with the greatest stored
    // height <= max_height, Unknown when none is stored
    pub fn get(&self, max_height: Height, key: &K) -> Result<RemoteData<V>, RunnerError> {
        let key_bytes = key.to_bytes();
        let upper = versioned_key(&key_bytes, max_height);
        match self.tree.range(key_bytes..=upper).next_back() {
            Some(entry) => {
                let (_, value) = entry?;
                RemoteData::from_bytes(&value).map_err(RunnerError::corrupted(self.context))
            }
            None => Ok(RemoteData::Unknown),
        }
    }

    // Append a record at `height`; overwriting an existing (key, height) is
    // legal and the last write wins. Unknown is never persisted.
    pub fn set(&self, height: Height, key: &K, value: &RemoteData<V>) -> Result<(), RunnerError> {
        if !value.loaded() {
            trace!("skipping unknown write at height {}", height);
            return Ok(());
        }
        self.tree
            .insert(versioned_key(&key.to_bytes(), height), value.to_bytes())?;
        Ok(())
    }

    // Delete all records with height >= `from_height` and return the record a
    // subsequent read would observe
    pub fn remove_from(&self, from_height: Height, key: &K) -> Result<RemoteData<V>, RunnerError> {
        let key_bytes = key.to_bytes();
        let lower = versioned_key(&key_bytes, from_height);
        let upper = versioned_key(&key_bytes, Height::MAX);

        let mut batch = sled::Batch::default();
        for entry in self.tree.range(lower..=upper) {
            let (stored_key, _) = entry?;
            batch.remove(stored_key);
        }
        self.tree.apply_batch(batch)?;

        self.get(Height::MAX, key)
    }
}

// Block headers are dense from the lowest stored height, keyed by height alone
pub struct HeadersTree {
    tree: sled::Tree,
}

impl HeadersTree {
    pub fn new(db: &sled::Db) -> Result<Self, RunnerError> {
        Ok(HeadersTree {
            tree: db.open_tree("block_headers")?,
        })
    }

    pub fn get(&self, height: Height) -> Result<Option<BlockHeaderWithVrf>, RunnerError> {
        match self.tree.get(height.to_be_bytes())? {
            Some(value) => Ok(Some(
                BlockHeaderWithVrf::from_bytes(&value)
                    .map_err(RunnerError::corrupted(DiskContext::BlockHeader))?,
            )),
            None => Ok(None),
        }
    }

    pub fn set(&self, height: Height, header: &BlockHeaderWithVrf) -> Result<(), RunnerError> {
        self.tree
            .insert(height.to_be_bytes(), header.to_bytes())?;
        Ok(())
    }

    pub fn get_last_height(&self) -> Result<Option<Height>, RunnerError> {
        match self.tree.last()? {
            Some((key, _)) => {
                let bytes: [u8; 8] = key
                    .as_ref()
                    .try_into()
                    .map_err(|_| RunnerError::Corrupted {
                        context: DiskContext::BlockHeader,
                        source: ride_common::serializer::ReaderError::InvalidSize,
                    })?;
                Ok(Some(Height::from_be_bytes(bytes)))
            }
            None => Ok(None),
        }
    }

    pub fn get_range(
        &self,
        from: Height,
        to: Height,
    ) -> Result<Vec<(Height, BlockHeaderWithVrf)>, RunnerError> {
        let mut headers = Vec::new();
        for entry in self.tree.range(from.to_be_bytes()..=to.to_be_bytes()) {
            let (key, value) = entry?;
            let bytes: [u8; 8] = key
                .as_ref()
                .try_into()
                .map_err(|_| RunnerError::Corrupted {
                    context: DiskContext::BlockHeader,
                    source: ride_common::serializer::ReaderError::InvalidSize,
                })?;
            let header = BlockHeaderWithVrf::from_bytes(&value)
                .map_err(RunnerError::corrupted(DiskContext::BlockHeader))?;
            headers.push((Height::from_be_bytes(bytes), header));
        }
        Ok(headers)
    }

    // Strip all headers (and their VRF hit sources) at height >= `from_height`
    pub fn remove_from(&self, from_height: Height) -> Result<(), RunnerError> {
        let mut batch = sled::Batch::default();
        for entry in self
            .tree
            .range(from_height.to_be_bytes()..=Height::MAX.to_be_bytes())
        {
            let (key, _) = entry?;
            batch.remove(key);
        }
        self.tree.apply_batch(batch)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    fn open_db(dir: &TempDir) -> sled::Db {
        sled::open(dir.path()).unwrap()
    }

    #[test]
    fn test_versioned_get_returns_effective_record() {
        let dir = TempDir::new("versioned").unwrap();
        let db = open_db(&dir);
        let tree: VersionedTree<String, u64> =
            VersionedTree::new(&db, "test", DiskContext::AccountData).unwrap();

        let key = "k".to_string();
        tree.set(2, &key, &RemoteData::Cached(20)).unwrap();
        tree.set(5, &key, &RemoteData::Cached(50)).unwrap();

        assert_eq!(tree.get(1, &key).unwrap(), RemoteData::Unknown);
        assert_eq!(tree.get(2, &key).unwrap(), RemoteData::Cached(20));
        assert_eq!(tree.get(4, &key).unwrap(), RemoteData::Cached(20));
        assert_eq!(tree.get(9, &key).unwrap(), RemoteData::Cached(50));
    }

    #[test]
    fn test_versioned_overwrite_same_height_wins() {
        let dir = TempDir::new("versioned").unwrap();
        let db = open_db(&dir);
        let tree: VersionedTree<String, u64> =
            VersionedTree::new(&db, "test", DiskContext::AccountData).unwrap();

        let key = "k".to_string();
        tree.set(3, &key, &RemoteData::Cached(1)).unwrap();
        tree.set(3, &key, &RemoteData::Cached(2)).unwrap();
        assert_eq!(tree.get(3, &key).unwrap(), RemoteData::Cached(2));
    }

    #[test]
    fn test_versioned_remove_from_reverts_to_previous() {
        let dir = TempDir::new("versioned").unwrap();
        let db = open_db(&dir);
        let tree: VersionedTree<String, u64> =
            VersionedTree::new(&db, "test", DiskContext::AccountData).unwrap();

        let key = "k".to_string();
        tree.set(2, &key, &RemoteData::Cached(20)).unwrap();
        tree.set(5, &key, &RemoteData::Cached(50)).unwrap();
        tree.set(7, &key, &RemoteData::Absent).unwrap();

        let restored = tree.remove_from(5, &key).unwrap();
        assert_eq!(restored, RemoteData::Cached(20));
        assert_eq!(tree.get(Height::MAX, &key).unwrap(), RemoteData::Cached(20));

        let restored = tree.remove_from(0, &key).unwrap();
        assert_eq!(restored, RemoteData::Unknown);
    }

    #[test]
    fn test_versioned_keys_do_not_leak_between_entries() {
        let dir = TempDir::new("versioned").unwrap();
        let db = open_db(&dir);
        let tree: VersionedTree<String, u64> =
            VersionedTree::new(&db, "test", DiskContext::AccountData).unwrap();

        tree.set(1, &"a".to_string(), &RemoteData::Cached(1)).unwrap();
        tree.set(1, &"ab".to_string(), &RemoteData::Cached(2)).unwrap();

        assert_eq!(
            tree.get(Height::MAX, &"a".to_string()).unwrap(),
            RemoteData::Cached(1)
        );
        tree.remove_from(0, &"a".to_string()).unwrap();
        assert_eq!(
            tree.get(Height::MAX, &"ab".to_string()).unwrap(),
            RemoteData::Cached(2)
        );
    }
}
