//! Filesystem sink for extracted XML
//!
//! Layout: one subtree per chain with `Stores/`, `Price/`, `PriceFull/`,
//! `Promo/`, `PromoFull/` leaf folders; file names are
//! `{store}_{type}_{timestamp}.xml`, sanitized. The caller controls the
//! overwrite policy; nothing is replaced silently.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::catalog::FileCategory;
use crate::extract::XmlPayload;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to create {0}: {1}")]
    CreateDir(PathBuf, #[source] std::io::Error),

    #[error("Failed to write {0}: {1}")]
    Write(PathBuf, #[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Metadata returned after a save
#[derive(Debug, Clone)]
pub struct SavedFile {
    pub path: PathBuf,
    pub size: usize,
    /// False when the file already existed and overwriting was off.
    pub written: bool,
}

/// Download directory owner. One instance per run, shared by all chains;
/// each chain only ever touches its own subtree.
#[derive(Debug, Clone)]
pub struct DownloadStore {
    base_dir: PathBuf,
    overwrite: bool,
}

impl DownloadStore {
    pub fn new(base_dir: impl Into<PathBuf>, overwrite: bool) -> Self {
        Self {
            base_dir: base_dir.into(),
            overwrite,
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Persist one extracted XML payload.
    ///
    /// `store` is `None` for chain-wide files; `stamp` is the raw portal
    /// timestamp token carried on the descriptor.
    pub fn save(
        &self,
        chain_id: &str,
        category: FileCategory,
        store: Option<&str>,
        stamp: &str,
        payload: &XmlPayload,
    ) -> Result<SavedFile> {
        let dir = self
            .base_dir
            .join(sanitize_component(chain_id))
            .join(category.dir_name());
        fs::create_dir_all(&dir).map_err(|e| StoreError::CreateDir(dir.clone(), e))?;

        let file_name = format!(
            "{}_{}_{}.xml",
            sanitize_component(store.unwrap_or("000")),
            category.dir_name(),
            sanitize_component(stamp),
        );
        let path = dir.join(file_name);

        if path.exists() && !self.overwrite {
            tracing::debug!(path = %path.display(), "File exists, skipping");
            return Ok(SavedFile {
                path,
                size: payload.data.len(),
                written: false,
            });
        }

        fs::write(&path, &payload.data).map_err(|e| StoreError::Write(path.clone(), e))?;

        tracing::info!(path = %path.display(), size = payload.data.len(), "Saved XML");

        Ok(SavedFile {
            path,
            size: payload.data.len(),
            written: true,
        })
    }
}

/// Replace characters that are invalid in file names on common filesystems.
/// Empty input maps to a single underscore.
pub fn sanitize_component(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn payload(data: &[u8]) -> XmlPayload {
        XmlPayload {
            name: None,
            data: data.to_vec(),
        }
    }

    #[test]
    fn test_save_layout() {
        let temp_dir = TempDir::new().unwrap();
        let store = DownloadStore::new(temp_dir.path(), false);

        let saved = store
            .save("mega-retail", FileCategory::PriceFull, Some("5"), "202501010830", &payload(b"<Prices/>"))
            .unwrap();

        assert!(saved.written);
        assert_eq!(
            saved.path,
            temp_dir
                .path()
                .join("mega-retail/PriceFull/5_PriceFull_202501010830.xml")
        );
        assert_eq!(fs::read(&saved.path).unwrap(), b"<Prices/>");
    }

    #[test]
    fn test_chain_wide_store_token() {
        let temp_dir = TempDir::new().unwrap();
        let store = DownloadStore::new(temp_dir.path(), false);

        let saved = store
            .save("mega", FileCategory::Stores, None, "202501010700", &payload(b"<Stores/>"))
            .unwrap();

        assert!(saved.path.ends_with("mega/Stores/000_Stores_202501010700.xml"));
    }

    #[test]
    fn test_no_silent_overwrite() {
        let temp_dir = TempDir::new().unwrap();
        let store = DownloadStore::new(temp_dir.path(), false);

        let first = store
            .save("mega", FileCategory::Price, Some("1"), "202501010800", &payload(b"<A/>"))
            .unwrap();
        assert!(first.written);

        let second = store
            .save("mega", FileCategory::Price, Some("1"), "202501010800", &payload(b"<B/>"))
            .unwrap();
        assert!(!second.written);
        assert_eq!(fs::read(&second.path).unwrap(), b"<A/>");
    }

    #[test]
    fn test_overwrite_when_asked() {
        let temp_dir = TempDir::new().unwrap();
        let store = DownloadStore::new(temp_dir.path(), true);

        store
            .save("mega", FileCategory::Price, Some("1"), "202501010800", &payload(b"<A/>"))
            .unwrap();
        let second = store
            .save("mega", FileCategory::Price, Some("1"), "202501010800", &payload(b"<B/>"))
            .unwrap();

        assert!(second.written);
        assert_eq!(fs::read(&second.path).unwrap(), b"<B/>");
    }

    #[test]
    fn test_sanitize_component() {
        assert_eq!(sanitize_component("5"), "5");
        assert_eq!(sanitize_component("a/b:c?d"), "a_b_c_d");
        assert_eq!(sanitize_component(""), "_");
    }
}
