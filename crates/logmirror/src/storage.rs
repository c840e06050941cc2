//! Object-storage inventory.

use crate::error::Result;
use crate::exec;
use crate::listing::{file_name, Listing};
use async_trait::async_trait;
use serde::Deserialize;

/// One stored object and its content digest (ETag without quotes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageObject {
    pub key: String,
    pub digest: String,
}

#[async_trait]
pub trait StorageLister: Send + Sync {
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<StorageObject>>;
}

/// Lists objects through `aws s3api list-objects-v2`
#[derive(Debug, Clone)]
pub struct AwsCliLister {
    program: String,
}

impl AwsCliLister {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListObjectsOutput {
    #[serde(rename = "Contents", default)]
    contents: Vec<ObjectEntry>,
}

#[derive(Debug, Deserialize)]
struct ObjectEntry {
    #[serde(rename = "Key")]
    key: String,
    #[serde(rename = "ETag")]
    etag: String,
}

#[async_trait]
impl StorageLister for AwsCliLister {
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<StorageObject>> {
        // Bucket names are lowercase; configs sometimes are not
        let args = vec![
            "s3api".to_string(),
            "list-objects-v2".to_string(),
            "--bucket".to_string(),
            bucket.to_lowercase(),
            "--prefix".to_string(),
            prefix.to_string(),
            "--output".to_string(),
            "json".to_string(),
        ];
        let output = exec::capture(&self.program, &args).await?;
        parse_list_objects(&output)
    }
}

pub(crate) fn parse_list_objects(output: &str) -> Result<Vec<StorageObject>> {
    // The CLI prints nothing at all for an empty prefix
    if output.trim().is_empty() {
        return Ok(Vec::new());
    }
    let parsed: ListObjectsOutput = serde_json::from_str(output)?;
    Ok(parsed
        .contents
        .into_iter()
        .map(|entry| StorageObject {
            key: entry.key,
            digest: entry.etag.trim_matches('"').to_lowercase(),
        })
        .collect())
}

/// Objects keyed by full key, for the audit trail
pub fn by_key(objects: &[StorageObject]) -> Listing {
    objects
        .iter()
        .map(|o| (o.key.clone(), o.digest.clone()))
        .collect()
}

/// Objects keyed by the last key component, comparable with local gzip names
pub fn by_file_name(objects: &[StorageObject]) -> Listing {
    objects
        .iter()
        .map(|o| (file_name(&o.key).to_string(), o.digest.clone()))
        .collect()
}
