//! Filesystem storage.
//!
//! Layout: `{root}/jobs/{job_id}/{product_code}/data.json`.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

use crate::error::StorageResult;
use crate::traits::storage::{CrawledRecord, Storage};
use crate::types::job::JobId;
use crate::types::url::CrawlUrl;

const DATA_FILE: &str = "data.json";

pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn job_dir(&self, job_id: &JobId) -> PathBuf {
        self.root.join("jobs").join(job_id.to_string())
    }

    /// Path the payload for `url` is written to.
    pub fn data_path(&self, url: &CrawlUrl) -> PathBuf {
        self.job_dir(url.job_id())
            .join(url.product_code())
            .join(DATA_FILE)
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn append(&self, url: &CrawlUrl, data: &Value) -> StorageResult<()> {
        let path = self.data_path(url);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).await?;
        }

        // Write then rename so readers never see a partial file.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(data)?).await?;
        fs::rename(&tmp, &path).await?;

        debug!(url_id = %url.url_id(), path = %path.display(), "crawled data written");
        Ok(())
    }

    async fn crawled_data(&self, job_id: &JobId) -> StorageResult<Vec<CrawledRecord>> {
        let mut entries = match fs::read_dir(self.job_dir(job_id)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = BTreeMap::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let code = entry.file_name().to_string_lossy().into_owned();
            let bytes = match fs::read(entry.path().join(DATA_FILE)).await {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    warn!(job_id = %job_id, code = %code, "product directory without data");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            records.insert(code, serde_json::from_slice::<Value>(&bytes)?);
        }

        Ok(records
            .into_iter()
            .map(|(code, data)| BTreeMap::from([(code, data)]))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::job::OwnerId;
    use crate::types::url::UrlPolicy;
    use serde_json::json;
    use tempfile::TempDir;

    fn url(job: JobId, code: &str) -> CrawlUrl {
        CrawlUrl::new(
            &format!("https://www.amazon.com/dp/{code}"),
            job,
            OwnerId::new("u1"),
            &UrlPolicy::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_append_writes_layout() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileStorage::new(temp_dir.path());
        let job = JobId::new();
        let url = url(job, "B0931VRJT5");

        storage.append(&url, &json!({ "title": "Lamp" })).await.unwrap();

        let expected = temp_dir
            .path()
            .join("jobs")
            .join(job.to_string())
            .join("B0931VRJT5")
            .join("data.json");
        assert_eq!(storage.data_path(&url), expected);
        let written: Value = serde_json::from_slice(&std::fs::read(expected).unwrap()).unwrap();
        assert_eq!(written["title"], "Lamp");
    }

    #[tokio::test]
    async fn test_crawled_data_sorted_and_overwritten() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileStorage::new(temp_dir.path());
        let job = JobId::new();

        storage.append(&url(job, "B0931VRJT6"), &json!(2)).await.unwrap();
        storage.append(&url(job, "B0931VRJT5"), &json!(0)).await.unwrap();
        storage.append(&url(job, "B0931VRJT5"), &json!(1)).await.unwrap();

        let data = storage.crawled_data(&job).await.unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(data[0]["B0931VRJT5"], json!(1));
        assert_eq!(data[1]["B0931VRJT6"], json!(2));
    }

    #[tokio::test]
    async fn test_unknown_job_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileStorage::new(temp_dir.path());
        assert!(storage.crawled_data(&JobId::new()).await.unwrap().is_empty());
    }
}
