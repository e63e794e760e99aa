//! Network fetcher.
//!
//! The only network-facing part of the build. [`HttpFetcher`] drives an
//! async `reqwest` client on a private runtime so the pipeline itself stays
//! blocking and strictly sequential.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Fetch failure. Never retried.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP {status} fetching {url}")]
    Http { url: String, status: u16 },

    #[error("failed to fetch {url}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to write {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Provenance of a completed download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchReport {
    pub url: String,
    pub path: PathBuf,
    pub bytes: u64,
    /// Hex SHA-256 of the downloaded content.
    pub sha256: String,
}

/// Retrieves a URL to a local path.
pub trait Fetcher {
    fn fetch(&self, url: &str, dest: &Path) -> Result<FetchReport, FetchError>;
}

/// HTTP(S) fetcher.
pub struct HttpFetcher {
    client: reqwest::Client,
    runtime: tokio::runtime::Runtime,
}

impl HttpFetcher {
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("mozmill-env/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(Self { client, runtime })
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<FetchReport, FetchError> {
        let transport = |source| FetchError::Transport {
            url: url.to_string(),
            source,
        };
        let io = |path: &Path| {
            let path = path.to_path_buf();
            move |source| FetchError::Io { path, source }
        };

        let mut response = self.client.get(url).send().await.map_err(transport)?;
        if !response.status().is_success() {
            return Err(FetchError::Http {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io(parent))?;
        }

        // Stream into a sibling file so an interrupted download never
        // looks like a cached asset.
        let mut part_name = dest.file_name().unwrap_or_default().to_os_string();
        part_name.push(".part");
        let part = dest.with_file_name(part_name);

        let mut file = tokio::fs::File::create(&part).await.map_err(io(&part))?;
        let mut hasher = Sha256::new();
        let mut bytes = 0u64;

        while let Some(chunk) = response.chunk().await.map_err(transport)? {
            hasher.update(&chunk);
            bytes += chunk.len() as u64;
            file.write_all(&chunk).await.map_err(io(&part))?;
        }
        file.flush().await.map_err(io(&part))?;
        drop(file);

        tokio::fs::rename(&part, dest).await.map_err(io(dest))?;
        debug!(url = %url, bytes, "download complete");

        Ok(FetchReport {
            url: url.to_string(),
            path: dest.to_path_buf(),
            bytes,
            sha256: hex::encode(hasher.finalize()),
        })
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str, dest: &Path) -> Result<FetchReport, FetchError> {
        self.runtime.block_on(self.download(url, dest))
    }
}
