//! In-memory object storage inventory.

use crate::remote::lock;
use async_trait::async_trait;
use logmirror::{MirrorError, Result, StorageLister, StorageObject};
use std::collections::BTreeMap;
use std::sync::Mutex;

#[derive(Default)]
pub struct FakeStorage {
    buckets: Mutex<BTreeMap<String, BTreeMap<String, String>>>,
    failing: Mutex<bool>,
}

impl FakeStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, bucket: &str, key: &str, content: &[u8]) {
        lock(&self.buckets)
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), crate::md5_hex(content));
    }

    /// Make every listing fail
    pub fn set_failing(&self, failing: bool) {
        *lock(&self.failing) = failing;
    }
}

#[async_trait]
impl StorageLister for FakeStorage {
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<StorageObject>> {
        if *lock(&self.failing) {
            return Err(MirrorError::command("aws", "Unable to locate credentials"));
        }
        let buckets = lock(&self.buckets);
        Ok(buckets
            .get(bucket)
            .map(|objects| {
                objects
                    .iter()
                    .filter(|(key, _)| key.starts_with(prefix))
                    .map(|(key, digest)| StorageObject {
                        key: key.clone(),
                        digest: digest.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}
