//! Object bucket backends for image bytes.

use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use log::debug;
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;

use crate::errors::{Error, Result, ValidationError};

/// A flat key/value object store. Writes must be durable when `put` returns.
pub trait ObjectBucket: Send + Sync {
    fn name(&self) -> &str;
    fn put(&self, key: &str, bytes: &[u8], mime_type: &str) -> Result<()>;
    fn get(&self, key: &str) -> Result<Vec<u8>>;
    /// Deleting a missing object is not an error.
    fn delete(&self, key: &str) -> Result<()>;
}

/// Bucket reached over the object REST convention shared by GCS, S3 and
/// most compatible stores: `{endpoint}/{bucket}/{key}`.
pub struct HttpBucket {
    client: Client,
    endpoint: String,
    bucket: String,
    token: Option<String>,
}

impl HttpBucket {
    pub fn new(client: Client, endpoint: &str, bucket: &str, token: Option<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            bucket: bucket.to_string(),
            token,
        }
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint, self.bucket, key.trim_start_matches('/'))
    }

    fn authorized(
        &self,
        request: reqwest::blocking::RequestBuilder,
    ) -> reqwest::blocking::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn unavailable(&self, action: &str, key: &str, detail: impl std::fmt::Display) -> Error {
        Error::StorageUnavailable(format!(
            "{} {}/{} failed: {}",
            action, self.bucket, key, detail
        ))
    }
}

impl ObjectBucket for HttpBucket {
    fn name(&self) -> &str {
        &self.bucket
    }

    fn put(&self, key: &str, bytes: &[u8], mime_type: &str) -> Result<()> {
        debug!("PUT {} ({} bytes)", self.object_url(key), bytes.len());
        let response = self
            .authorized(self.client.put(self.object_url(key)))
            .header(CONTENT_TYPE, mime_type)
            .body(bytes.to_vec())
            .send()
            .map_err(|e| self.unavailable("PUT", key, e))?;
        if !response.status().is_success() {
            return Err(self.unavailable("PUT", key, response.status()));
        }
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>> {
        let response = self
            .authorized(self.client.get(self.object_url(key)))
            .send()
            .map_err(|e| self.unavailable("GET", key, e))?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(Error::not_found("image object", key)),
            status if status.is_success() => response
                .bytes()
                .map(|b| b.to_vec())
                .map_err(|e| self.unavailable("GET", key, e)),
            status => Err(self.unavailable("GET", key, status)),
        }
    }

    fn delete(&self, key: &str) -> Result<()> {
        let response = self
            .authorized(self.client.delete(self.object_url(key)))
            .send()
            .map_err(|e| self.unavailable("DELETE", key, e))?;
        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(self.unavailable("DELETE", key, status))
        }
    }
}

/// Bucket backed by a local directory, one file per object.
pub struct DirectoryBucket {
    name: String,
    root: PathBuf,
}

impl DirectoryBucket {
    pub fn new(root: impl Into<PathBuf>, name: &str) -> Result<Self> {
        let root = root.into().join(name);
        fs::create_dir_all(&root).map_err(|e| {
            Error::StorageUnavailable(format!("creating bucket dir '{}': {}", root.display(), e))
        })?;
        Ok(Self {
            name: name.to_string(),
            root,
        })
    }

    fn object_path(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(ValidationError::InvalidInput(format!("invalid object key '{}'", key)).into());
        }
        Ok(self.root.join(relative))
    }
}

impl ObjectBucket for DirectoryBucket {
    fn name(&self) -> &str {
        &self.name
    }

    fn put(&self, key: &str, bytes: &[u8], _mime_type: &str) -> Result<()> {
        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let staging = path.with_extension("partial");
        {
            let mut file = fs::File::create(&staging)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        fs::rename(&staging, &path)?;
        debug!("Wrote object {} ({} bytes)", path.display(), bytes.len());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.object_path(key)?;
        fs::read(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::not_found("image object", key),
            _ => e.into(),
        })
    }

    fn delete(&self, key: &str) -> Result<()> {
        let path = self.object_path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_object_url() {
        let bucket = HttpBucket::new(Client::new(), "https://storage.example.com/", "imgs", None);
        assert_eq!(
            bucket.object_url("t1/a.png"),
            "https://storage.example.com/imgs/t1/a.png"
        );
        assert_eq!(bucket.name(), "imgs");
    }

    #[test]
    fn test_unreachable_http_bucket_is_storage_unavailable() {
        let bucket = HttpBucket::new(Client::new(), "http://127.0.0.1:1", "b", None);
        for err in [
            bucket.put("t/a.png", b"abc", "image/png").unwrap_err(),
            bucket.get("t/a.png").unwrap_err(),
            bucket.delete("t/a.png").unwrap_err(),
        ] {
            assert!(matches!(err, Error::StorageUnavailable(_)));
        }
    }

    #[test]
    fn test_http_bucket_status_mapping() {
        let mut server = mockito::Server::new();
        let put = server
            .mock("PUT", "/imgs/t1/a.png")
            .match_header("authorization", "Bearer secret")
            .match_header("content-type", "image/png")
            .with_status(200)
            .create();
        let get_missing = server.mock("GET", "/imgs/t1/gone.png").with_status(404).create();
        let delete_missing = server
            .mock("DELETE", "/imgs/t1/gone.png")
            .with_status(404)
            .create();
        let put_rejected = server.mock("PUT", "/imgs/t1/b.png").with_status(503).create();

        let bucket = HttpBucket::new(
            Client::new(),
            &server.url(),
            "imgs",
            Some("secret".to_string()),
        );
        bucket.put("t1/a.png", b"abc", "image/png").unwrap();
        assert!(bucket.get("t1/gone.png").unwrap_err().is_not_found());
        bucket.delete("t1/gone.png").unwrap();
        assert!(matches!(
            bucket.put("t1/b.png", b"abc", "image/png").unwrap_err(),
            Error::StorageUnavailable(_)
        ));

        put.assert();
        get_missing.assert();
        delete_missing.assert();
        put_rejected.assert();
    }

    #[test]
    fn test_directory_bucket_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let bucket = DirectoryBucket::new(dir.path(), "images").unwrap();

        bucket.put("thread-1/a.png", b"abc", "image/png").unwrap();
        assert!(dir.path().join("images/thread-1/a.png").exists());
        assert_eq!(bucket.get("thread-1/a.png").unwrap(), b"abc");

        bucket.delete("thread-1/a.png").unwrap();
        assert!(bucket.get("thread-1/a.png").unwrap_err().is_not_found());
        // second delete is a no-op
        bucket.delete("thread-1/a.png").unwrap();
    }

    #[test]
    fn test_directory_bucket_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let bucket = DirectoryBucket::new(dir.path(), "images").unwrap();

        for key in ["../outside.png", "/etc/passwd", ""] {
            let err = bucket.put(key, b"x", "image/png").unwrap_err();
            assert!(matches!(
                err,
                Error::Validation(ValidationError::InvalidInput(_))
            ));
        }
    }
}
