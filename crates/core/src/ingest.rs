use crate::error::{PipelineError, StoreError};
use crate::extractor::{DocumentParser, FileType};
use crate::models::Document;
use crate::traits::ObjectStorage;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Object storage over a local directory; each bucket is a sub-directory.
#[derive(Debug, Clone)]
pub struct FilesystemStorage {
    root: PathBuf,
}

impl FilesystemStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(bucket).join(key);
        let escapes = relative
            .components()
            .any(|component| !matches!(component, Component::Normal(_)));
        if escapes {
            return Err(StoreError::Request(format!(
                "object path {bucket}/{key} leaves the storage root"
            )));
        }
        Ok(self.root.join(relative))
    }

    /// Every file under the bucket, as keys relative to it, sorted.
    pub fn list_keys(&self, bucket: &str) -> Result<Vec<String>, StoreError> {
        let bucket_dir = self.object_path(bucket, "")?;
        if !bucket_dir.is_dir() {
            return Err(StoreError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: String::new(),
            });
        }

        let mut keys = Vec::new();
        for entry in WalkDir::new(&bucket_dir)
            .into_iter()
            .filter_map(|item| item.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            if let Ok(relative) = entry.path().strip_prefix(&bucket_dir) {
                keys.push(relative.to_string_lossy().replace('\\', "/"));
            }
        }

        keys.sort_unstable();
        Ok(keys)
    }
}

#[async_trait]
impl ObjectStorage for FilesystemStorage {
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.object_path(bucket, key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(error) if error.kind() == ErrorKind::NotFound => Err(StoreError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }),
            Err(error) => Err(StoreError::Io(error)),
        }
    }
}

/// Fetches each key and parses it into documents, in key order.
pub async fn load_documents(
    storage: &dyn ObjectStorage,
    parser: &dyn DocumentParser,
    bucket: &str,
    keys: &[String],
) -> Result<Vec<Document>, PipelineError> {
    let mut documents = Vec::new();

    for key in keys {
        let file_type = FileType::from_file_name(key)?;
        let bytes = storage
            .get(bucket, key)
            .await
            .map_err(|source| PipelineError::store("fetch", &format!("{bucket}/{key}"), source))?;
        let parsed = parser.parse(&bytes, file_type, key)?;
        debug!(bucket, key, documents = parsed.len(), "parsed object");
        documents.extend(parsed);
    }

    info!(bucket, files = keys.len(), documents = documents.len(), "documents loaded");
    Ok(documents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::FileParser;
    use std::fs;
    use tempfile::tempdir;

    #[tokio::test]
    async fn reads_objects_from_bucket_directory() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::create_dir(dir.path().join("manuals"))?;
        fs::write(dir.path().join("manuals").join("pump.txt"), b"The pump hums.")?;

        let storage = FilesystemStorage::new(dir.path());
        let bytes = storage.get("manuals", "pump.txt").await?;

        assert_eq!(bytes, b"The pump hums.");
        Ok(())
    }

    #[tokio::test]
    async fn missing_object_is_reported_by_key() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let storage = FilesystemStorage::new(dir.path());

        let result = storage.get("manuals", "absent.txt").await;

        assert!(matches!(
            result,
            Err(StoreError::ObjectNotFound { ref key, .. }) if key == "absent.txt"
        ));
        Ok(())
    }

    #[tokio::test]
    async fn keys_cannot_escape_the_root() {
        let storage = FilesystemStorage::new("/tmp/storage");
        let result = storage.get("manuals", "../secret.txt").await;
        assert!(matches!(result, Err(StoreError::Request(_))));
    }

    #[test]
    fn list_keys_is_recursive_and_sorted() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let nested = dir.path().join("manuals").join("nested");
        fs::create_dir_all(&nested)?;
        fs::write(dir.path().join("manuals").join("b.txt"), b"b")?;
        fs::write(nested.join("a.md"), b"a")?;

        let keys = FilesystemStorage::new(dir.path()).list_keys("manuals")?;

        assert_eq!(keys, vec!["b.txt".to_string(), "nested/a.md".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn load_documents_parses_every_key() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::create_dir(dir.path().join("manuals"))?;
        fs::write(dir.path().join("manuals").join("a.txt"), b"The pump hums.")?;
        fs::write(dir.path().join("manuals").join("b.md"), b"Invoices are due.")?;
        let storage = FilesystemStorage::new(dir.path());

        let documents = load_documents(
            &storage,
            &FileParser,
            "manuals",
            &["a.txt".to_string(), "b.md".to_string()],
        )
        .await?;

        assert_eq!(documents.len(), 2);
        assert_eq!(documents[0].source_metadata.file_name, "a.txt");
        assert_eq!(documents[1].text, "Invoices are due.");
        Ok(())
    }

    #[tokio::test]
    async fn unsupported_key_fails_before_fetching() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let storage = FilesystemStorage::new(dir.path());

        let result = load_documents(&storage, &FileParser, "manuals", &["x.docx".to_string()]).await;

        assert!(matches!(result, Err(PipelineError::Parsing(_))));
        Ok(())
    }
}
