//! Local dependency cache and the fetch collaborator that fills it.
//!
//! The cache directory is shared across runs on the same machine with
//! last-write-wins semantics; concurrent runs may race on a download.

use std::ffi::OsString;
use std::future::Future;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use log::{debug, info};
use tokio::io::AsyncWriteExt;

use crate::error::FetchError;

/// Stream of downloaded bytes.
pub type ByteStream = BoxStream<'static, Result<Bytes, FetchError>>;

/// Source of dependency artifacts.
pub trait Fetcher: Send + Sync {
    /// Start downloading `url`.
    fn fetch(&self, url: &str) -> impl Future<Output = Result<ByteStream, FetchError>> + Send;
}

/// Plain HTTP(S) GET with reqwest.
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<ByteStream, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| FetchError::Request {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let owned_url = url.to_string();
        Ok(response
            .bytes_stream()
            .map(move |chunk| {
                chunk.map_err(|source| FetchError::Request {
                    url: owned_url.clone(),
                    source,
                })
            })
            .boxed())
    }
}

/// Directory of downloaded artifacts.
#[derive(Debug, Clone)]
pub struct DependencyCache {
    dir: PathBuf,
}

impl DependencyCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where artifact `name` lives.
    pub fn path_of(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Make sure `name` is cached, downloading it from `url` on a miss.
    ///
    /// A present file is trusted as-is; there is no partial-file detection.
    /// Returns whether a download happened.
    pub async fn ensure<F: Fetcher>(
        &self,
        fetcher: &F,
        name: &str,
        url: &str,
    ) -> Result<bool, FetchError> {
        let path = self.path_of(name);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            debug!("{} already cached at {}", name, path.display());
            return Ok(false);
        }

        info!("{} not cached, downloading from {}", name, url);
        self.refresh(fetcher, name, url).await?;
        Ok(true)
    }

    /// Download `url` into the cache as `name`, overwriting any existing file.
    ///
    /// The download lands in a hidden sibling file first and is renamed into
    /// place only once the stream finished, so a failed transfer never leaves
    /// a truncated artifact behind.
    pub async fn refresh<F: Fetcher>(
        &self,
        fetcher: &F,
        name: &str,
        url: &str,
    ) -> Result<PathBuf, FetchError> {
        let path = self.path_of(name);
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| io_error(&self.dir, e))?;

        let partial = partial_path(&path);
        let written = match download(fetcher, url, &partial).await {
            Ok(written) => written,
            Err(e) => {
                if let Err(rm) = tokio::fs::remove_file(&partial).await {
                    debug!("could not remove {}: {}", partial.display(), rm);
                }
                return Err(e);
            }
        };
        tokio::fs::rename(&partial, &path)
            .await
            .map_err(|e| io_error(&path, e))?;

        debug!("wrote {} bytes to {}", written, path.display());
        Ok(path)
    }
}

async fn download<F: Fetcher>(fetcher: &F, url: &str, dest: &Path) -> Result<usize, FetchError> {
    let mut stream = fetcher.fetch(url).await?;
    let mut file = tokio::fs::File::create(dest)
        .await
        .map_err(|e| io_error(dest, e))?;

    let mut written = 0usize;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        written += chunk.len();
        file.write_all(&chunk).await.map_err(|e| io_error(dest, e))?;
    }
    file.flush().await.map_err(|e| io_error(dest, e))?;
    Ok(written)
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(".");
    name.push(path.file_name().unwrap_or_default());
    name.push(".part");
    path.with_file_name(name)
}

fn io_error(path: &Path, source: std::io::Error) -> FetchError {
    FetchError::Io {
        path: path.display().to_string(),
        source,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use futures_util::stream;

    use super::*;

    /// Serves fixed bytes and records every requested URL.
    #[derive(Default)]
    pub(crate) struct RecordingFetcher {
        pub(crate) urls: Mutex<Vec<String>>,
    }

    impl RecordingFetcher {
        pub(crate) fn calls(&self) -> usize {
            self.urls.lock().unwrap().len()
        }
    }

    impl Fetcher for RecordingFetcher {
        async fn fetch(&self, url: &str) -> Result<ByteStream, FetchError> {
            self.urls.lock().unwrap().push(url.to_string());
            let chunks = vec![
                Ok(Bytes::from_static(b"artifact ")),
                Ok(Bytes::from(url.to_string())),
            ];
            Ok(stream::iter(chunks).boxed())
        }
    }

    #[tokio::test]
    async fn test_miss_fetches_once() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DependencyCache::new(dir.path());
        let fetcher = RecordingFetcher::default();

        assert!(cache.ensure(&fetcher, "agent.tgz", "http://dl/agent.tgz").await.unwrap());
        assert_eq!(fetcher.calls(), 1);
        assert_eq!(
            std::fs::read_to_string(cache.path_of("agent.tgz")).unwrap(),
            "artifact http://dl/agent.tgz"
        );

        assert!(!cache.ensure(&fetcher, "agent.tgz", "http://dl/agent.tgz").await.unwrap());
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_refresh_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DependencyCache::new(dir.path().join("nested"));
        std::fs::create_dir_all(cache.dir()).unwrap();
        std::fs::write(cache.path_of("a.sh"), "stale content that is longer").unwrap();

        let fetcher = RecordingFetcher::default();
        cache.refresh(&fetcher, "a.sh", "u").await.unwrap();
        assert_eq!(std::fs::read_to_string(cache.path_of("a.sh")).unwrap(), "artifact u");
    }

    #[tokio::test]
    async fn test_stream_error_propagates() {
        struct Broken;
        impl Fetcher for Broken {
            async fn fetch(&self, url: &str) -> Result<ByteStream, FetchError> {
                Err(FetchError::Status {
                    url: url.to_string(),
                    status: 404,
                })
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let cache = DependencyCache::new(dir.path());
        let err = cache.ensure(&Broken, "x", "http://dl/x").await.unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 404, .. }));
        assert!(!cache.path_of("x").exists());
    }

    /// Sends one good chunk, then fails mid-transfer.
    struct Interrupted;

    impl Fetcher for Interrupted {
        async fn fetch(&self, url: &str) -> Result<ByteStream, FetchError> {
            let chunks = vec![
                Ok(Bytes::from_static(b"half an arti")),
                Err(FetchError::Status {
                    url: url.to_string(),
                    status: 502,
                }),
            ];
            Ok(stream::iter(chunks).boxed())
        }
    }

    #[tokio::test]
    async fn test_interrupted_download_is_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DependencyCache::new(dir.path());

        let err = cache
            .ensure(&Interrupted, "agent.tgz", "http://dl/agent.tgz")
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 502, .. }));
        assert!(!cache.path_of("agent.tgz").exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        let fetcher = RecordingFetcher::default();
        assert!(cache.ensure(&fetcher, "agent.tgz", "http://dl/agent.tgz").await.unwrap());
        assert_eq!(fetcher.calls(), 1);
        assert_eq!(
            std::fs::read_to_string(cache.path_of("agent.tgz")).unwrap(),
            "artifact http://dl/agent.tgz"
        );
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DependencyCache::new(dir.path());
        std::fs::write(cache.path_of("a.sh"), "previous").unwrap();

        assert!(cache.refresh(&Interrupted, "a.sh", "u").await.is_err());
        assert_eq!(std::fs::read_to_string(cache.path_of("a.sh")).unwrap(), "previous");
        assert!(!dir.path().join(".a.sh.part").exists());
    }
}
