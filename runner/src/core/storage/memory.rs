use crate::core::{error::RunnerError, requests::RequestTag, storage::persistent::VersionedTree};
use ride_common::{block::Height, remote::RemoteData, serializer::Serializer};
use std::{
    collections::{HashMap, HashSet},
    future::Future,
    hash::Hash as StdHash,
    sync::Mutex,
};
use tokio::sync::RwLock;

// Request tags whose dependencies changed under one mutation
pub type AffectedTags = HashSet<RequestTag>;

// Hot cache over one versioned tree, with a tag set per key.
//
// Tags are added lazily whenever a key is read through a tagged view and are
// never removed: once a request has observed a key it is considered dependent
// on it for the rest of the run. Every mutation answers with the tag set of
// the touched key when its effective value actually changed.
pub struct TaggedStorage<K, V> {
    label: &'static str,
    hot: RwLock<HashMap<K, RemoteData<V>>>,
    tags: Mutex<HashMap<K, HashSet<RequestTag>>>,
    disk: VersionedTree<K, V>,
}

impl<K, V> TaggedStorage<K, V>
where
    K: Serializer + Eq + StdHash + Clone,
    V: Serializer + PartialEq + Clone,
{
    pub fn new(label: &'static str, disk: VersionedTree<K, V>) -> Self {
        TaggedStorage {
            label,
            hot: RwLock::new(HashMap::new()),
            tags: Mutex::new(HashMap::new()),
            disk,
        }
    }

    fn register_tag(&self, key: &K, tag: Option<&RequestTag>) {
        if let Some(tag) = tag {
            let mut tags = self.tags.lock().expect("tags lock poisoned");
            tags.entry(key.clone()).or_default().insert(tag.clone());
        }
    }

    fn tags_of(&self, key: &K) -> AffectedTags {
        let tags = self.tags.lock().expect("tags lock poisoned");
        tags.get(key).cloned().unwrap_or_default()
    }

    // The value mutation comparisons run against: hot when loaded, otherwise
    // the persistent top record. Unknown means the key was never observed.
    async fn effective(&self, key: &K) -> Result<RemoteData<V>, RunnerError> {
        let hot = {
            let map = self.hot.read().await;
            map.get(key).cloned().unwrap_or(RemoteData::Unknown)
        };
        if hot.loaded() {
            return Ok(hot);
        }
        self.disk.get(Height::MAX, key)
    }

    // Read at `height`, registering `tag` as a dependency of the key.
    // Misses fall through to the persistent tier and then to `load` (the
    // blockchain), populating both tiers on the way back.
    pub async fn get<F>(
        &self,
        height: Height,
        key: &K,
        tag: Option<&RequestTag>,
        load: F,
    ) -> Result<Option<V>, RunnerError>
    where
        F: Future<Output = Result<RemoteData<V>, RunnerError>>,
    {
        self.register_tag(key, tag);

        {
            let hot = self.hot.read().await;
            if let Some(value) = hot.get(key) {
                if value.loaded() {
                    return Ok(value.clone().into_option());
                }
            }
        }

        let stored = self.disk.get(height, key)?;
        if stored.loaded() {
            let mut hot = self.hot.write().await;
            hot.insert(key.clone(), stored.clone());
            return Ok(stored.into_option());
        }

        trace!("{}: loading key from the blockchain", self.label);
        // Everything the node answers is authoritative, including absence
        let remote = load.await?.or(RemoteData::Absent);
        self.disk.set(height, key, &remote)?;
        let mut hot = self.hot.write().await;
        hot.insert(key.clone(), remote.clone());
        Ok(remote.into_option())
    }

    // Write the post-event value of a key at `height`. Answers the key's tag
    // set when the effective value changed; restating an identical value is
    // not a change. A previously unobserved key (Unknown everywhere) never
    // produces tags, this is the first load, not a change.
    pub async fn append(
        &self,
        height: Height,
        key: &K,
        value: RemoteData<V>,
    ) -> Result<AffectedTags, RunnerError> {
        let previous = self.effective(key).await?;

        self.disk.set(height, key, &value)?;
        {
            let mut hot = self.hot.write().await;
            hot.insert(key.clone(), value.clone());
        }

        if previous.loaded() && previous != value {
            Ok(self.tags_of(key))
        } else {
            Ok(AffectedTags::new())
        }
    }

    // Undo a single block/micro-block append of this key: strip the record at
    // `height` (and above) and refresh the hot tier from what remains
    pub async fn undo_append(
        &self,
        height: Height,
        key: &K,
    ) -> Result<AffectedTags, RunnerError> {
        let previous = self.effective(key).await?;
        let restored = self.disk.remove_from(height, key)?;

        {
            let mut hot = self.hot.write().await;
            if restored.loaded() {
                hot.insert(key.clone(), restored.clone());
            } else {
                hot.remove(key);
            }
        }

        if previous.loaded() && previous != restored {
            Ok(self.tags_of(key))
        } else {
            Ok(AffectedTags::new())
        }
    }

    // Apply the authoritative post-rollback value delivered by the stream:
    // strip everything above `to_height` and restate the value there
    pub async fn rollback(
        &self,
        to_height: Height,
        key: &K,
        value: RemoteData<V>,
    ) -> Result<AffectedTags, RunnerError> {
        let previous = self.effective(key).await?;

        self.disk.remove_from(to_height + 1, key)?;
        self.disk.set(to_height, key, &value)?;
        {
            let mut hot = self.hot.write().await;
            if value.loaded() {
                hot.insert(key.clone(), value.clone());
            } else {
                hot.remove(key);
            }
        }

        if previous.loaded() && previous != value {
            Ok(self.tags_of(key))
        } else {
            Ok(AffectedTags::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{error::DiskContext, requests::RequestKey};
    use std::sync::Arc;
    use tempdir::TempDir;

    fn storage(dir: &TempDir) -> TaggedStorage<String, u64> {
        let db = sled::open(dir.path()).unwrap();
        let tree = VersionedTree::new(&db, "test", DiskContext::AccountData).unwrap();
        TaggedStorage::new("test", tree)
    }

    fn tag(name: &str) -> RequestTag {
        Arc::new(RequestKey::for_tests(name))
    }

    async fn absent() -> Result<RemoteData<u64>, RunnerError> {
        Ok(RemoteData::Absent)
    }

    #[tokio::test]
    async fn test_append_emits_tags_of_read_keys() {
        let dir = TempDir::new("tagged").unwrap();
        let storage = storage(&dir);
        let tag = tag("r1");
        let key = "x".to_string();

        // register a dependency first
        assert_eq!(
            storage.get(1, &key, Some(&tag), absent()).await.unwrap(),
            None
        );

        let affected = storage
            .append(2, &key, RemoteData::Cached(1))
            .await
            .unwrap();
        assert!(affected.contains(&tag));
    }

    #[tokio::test]
    async fn test_append_identical_value_is_not_a_change() {
        let dir = TempDir::new("tagged").unwrap();
        let storage = storage(&dir);
        let tag = tag("r1");
        let key = "x".to_string();

        storage
            .append(1, &key, RemoteData::Cached(5))
            .await
            .unwrap();
        storage.get(1, &key, Some(&tag), absent()).await.unwrap();

        let affected = storage
            .append(2, &key, RemoteData::Cached(5))
            .await
            .unwrap();
        assert!(affected.is_empty());
    }

    #[tokio::test]
    async fn test_first_load_emits_no_tags() {
        let dir = TempDir::new("tagged").unwrap();
        let storage = storage(&dir);

        // nothing read this key before, the append is a first sighting
        let affected = storage
            .append(1, &"x".to_string(), RemoteData::Cached(1))
            .await
            .unwrap();
        assert!(affected.is_empty());
    }

    #[tokio::test]
    async fn test_absence_transition_counts_as_change() {
        let dir = TempDir::new("tagged").unwrap();
        let storage = storage(&dir);
        let tag = tag("r1");
        let key = "x".to_string();

        storage.get(1, &key, Some(&tag), absent()).await.unwrap();
        storage
            .append(1, &key, RemoteData::Cached(1))
            .await
            .unwrap();
        let affected = storage.append(2, &key, RemoteData::Absent).await.unwrap();
        assert!(affected.contains(&tag));
    }

    #[tokio::test]
    async fn test_undo_append_restores_previous_value() {
        let dir = TempDir::new("tagged").unwrap();
        let storage = storage(&dir);
        let tag = tag("r1");
        let key = "x".to_string();

        storage
            .append(1, &key, RemoteData::Cached(10))
            .await
            .unwrap();
        storage.get(1, &key, Some(&tag), absent()).await.unwrap();
        storage
            .append(2, &key, RemoteData::Cached(20))
            .await
            .unwrap();

        let affected = storage.undo_append(2, &key).await.unwrap();
        assert!(affected.contains(&tag));
        assert_eq!(
            storage.get(5, &key, None, absent()).await.unwrap(),
            Some(10)
        );
    }

    #[tokio::test]
    async fn test_rollback_restates_authoritative_value() {
        let dir = TempDir::new("tagged").unwrap();
        let storage = storage(&dir);
        let tag = tag("r1");
        let key = "x".to_string();

        storage
            .append(1, &key, RemoteData::Cached(0))
            .await
            .unwrap();
        storage.get(1, &key, Some(&tag), absent()).await.unwrap();
        storage
            .append(3, &key, RemoteData::Cached(1))
            .await
            .unwrap();

        let affected = storage
            .rollback(2, &key, RemoteData::Cached(0))
            .await
            .unwrap();
        assert!(affected.contains(&tag));
        assert_eq!(
            storage.get(5, &key, None, absent()).await.unwrap(),
            Some(0)
        );
    }

    #[tokio::test]
    async fn test_append_compares_against_persistent_when_hot_is_cold() {
        let dir = TempDir::new("tagged").unwrap();
        let db = sled::open(dir.path()).unwrap();
        let tree: VersionedTree<String, u64> =
            VersionedTree::new(&db, "test", DiskContext::AccountData).unwrap();
        tree.set(1, &"x".to_string(), &RemoteData::Cached(1)).unwrap();

        let storage: TaggedStorage<String, u64> = TaggedStorage::new("test", tree);
        let tag = tag("r1");
        storage
            .get(1, &"x".to_string(), Some(&tag), absent())
            .await
            .unwrap();

        // drop the hot tier to simulate a restart with a warm disk
        storage.hot.write().await.clear();

        let affected = storage
            .append(2, &"x".to_string(), RemoteData::Cached(2))
            .await
            .unwrap();
        assert!(affected.contains(&tag));
    }
}
