//! Plain-text provenance index for downloaded assets.
//!
//! One record per asset, records separated by blank lines:
//!
//! ```text
//! Filename: virtualenv.zip
//! Download url: https://codeload.github.com/pypa/virtualenv/zip/1.10.1
//! SHA256: 3f1c...
//! ```

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::Path;

use super::Asset;

/// One entry of the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRecord {
    pub filename: String,
    pub url: String,
    pub sha256: String,
}

impl IndexRecord {
    /// Record for `asset`; cached files are hashed, downloads reuse their fetch hash.
    pub fn for_asset(asset: &Asset) -> Result<Self> {
        let sha256 = match &asset.sha256 {
            Some(sha256) => sha256.clone(),
            None => hash_file(&asset.path)
                .with_context(|| format!("hashing {}", asset.path.display()))?,
        };
        Ok(Self {
            filename: asset.filename.clone(),
            url: asset.url.clone(),
            sha256,
        })
    }

    fn render(&self) -> String {
        format!(
            "Filename: {}\nDownload url: {}\nSHA256: {}\n\n\n",
            self.filename, self.url, self.sha256
        )
    }
}

/// Write `index.txt` for `assets`, replacing any previous index.
pub fn write_index(path: &Path, assets: &[Asset]) -> Result<Vec<IndexRecord>> {
    let records = assets
        .iter()
        .map(IndexRecord::for_asset)
        .collect::<Result<Vec<_>>>()?;

    let content: String = records.iter().map(IndexRecord::render).collect();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content).with_context(|| format!("writing {}", path.display()))?;

    Ok(records)
}

/// Hex SHA-256 of a file's content.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 64 * 1024];

    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deps::Placement;
    use tempfile::tempdir;

    fn asset(path: &Path, name: &str, url: &str) -> Asset {
        Asset {
            id: name.to_string(),
            filename: name.to_string(),
            url: url.to_string(),
            version: None,
            path: path.to_path_buf(),
            placement: Placement::Keep,
            fetched: false,
            sha256: None,
        }
    }

    #[test]
    fn test_hash_file_known_value() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("abc");
        fs::write(&path, "abc").unwrap();

        assert_eq!(
            hash_file(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_index_blocks_are_blank_line_separated() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.zip");
        let b = dir.path().join("b.7z");
        fs::write(&a, "a").unwrap();
        fs::write(&b, "b").unwrap();
        let index = dir.path().join("assets/index.txt");

        let records = write_index(
            &index,
            &[asset(&a, "a.zip", "http://x/a.zip"), asset(&b, "b.7z", "http://x/b.7z")],
        )
        .unwrap();

        let content = fs::read_to_string(&index).unwrap();
        let blocks: Vec<&str> = content
            .split("\n\n")
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .collect();

        assert_eq!(records.len(), 2);
        assert_eq!(blocks.len(), 2);
        assert!(blocks[0].starts_with("Filename: a.zip\nDownload url: http://x/a.zip\nSHA256: "));
        assert!(blocks[1].contains(&records[1].sha256));
    }

    #[test]
    fn test_downloaded_asset_keeps_fetch_hash() {
        let dir = tempdir().unwrap();
        let fetched = Asset {
            fetched: true,
            sha256: Some("feedface".to_string()),
            ..asset(&dir.path().join("gone.zip"), "gone.zip", "http://x/gone.zip")
        };

        let record = IndexRecord::for_asset(&fetched).unwrap();

        assert_eq!(record.sha256, "feedface");
    }
}
