//! Filesystem store adapters.
//!
//! Single-process adapters for tests and small embeddings: records live as
//! files grouped by key namespace, with sidecar `.ver` files carrying the
//! CAS version. These do not provide the atomicity of a real distributed
//! backend and must only be used under the single-writer contract they are
//! tested with.

use crate::{
    error::{Error, Result},
    store::traits::{BlobStore, DelCond, FenceToken, MetaStore, Page, PutCond, PutOutcome, Record},
};
use bytes::Bytes;
use std::{
    fs,
    path::{Path, PathBuf},
};

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

fn unhex(name: &str) -> Option<Vec<u8>> {
    if name.len() % 2 != 0 {
        return None;
    }
    (0..name.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&name[i..i + 2], 16).ok())
        .collect()
}

/// The ascii namespace of a key (`logs`, `meta`, ...), used to group files.
fn key_group(key: &[u8]) -> String {
    let end = key.iter().position(|&b| b == b'/').unwrap_or(key.len());
    let group: String = key[..end]
        .iter()
        .map(|&b| if b.is_ascii_alphanumeric() || b == b'_' { b as char } else { '_' })
        .collect();
    if group.is_empty() {
        "misc".to_owned()
    } else {
        group
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| Error::Backend(format!("read {}: {e}", path.display())))
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| Error::Backend(format!("mkdir {}: {e}", parent.display())))?;
    }
    fs::write(path, bytes).map_err(|e| Error::Backend(format!("write {}: {e}", path.display())))
}

fn list_keys(root: &Path, prefix: &[u8], cursor: Option<Vec<u8>>, limit: usize) -> Result<Page> {
    let mut keys = Vec::new();
    let groups = match fs::read_dir(root) {
        Ok(groups) => groups,
        Err(_) => return Ok(Page::default()),
    };
    for group in groups {
        let group = group.map_err(|e| Error::Backend(format!("read dir: {e}")))?;
        let entries = fs::read_dir(group.path())
            .map_err(|e| Error::Backend(format!("read group dir: {e}")))?;
        for entry in entries {
            let entry = entry.map_err(|e| Error::Backend(format!("read entry: {e}")))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.ends_with(".ver") {
                continue;
            }
            if let Some(key) = unhex(name) {
                if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }
    }
    keys.sort();
    let start = cursor.unwrap_or_default();
    let mut page = Page::default();
    for key in keys {
        if !start.is_empty() && key <= start {
            continue;
        }
        page.keys.push(key);
        if page.keys.len() == limit {
            page.next_cursor = page.keys.last().cloned();
            break;
        }
    }
    Ok(page)
}

/// Filesystem-backed [`MetaStore`].
#[derive(Debug, Clone)]
pub struct FsMetaStore {
    root: PathBuf,
}

impl FsMetaStore {
    /// Open (creating if needed) a meta store rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().join("meta");
        fs::create_dir_all(&root)
            .map_err(|e| Error::Backend(format!("create meta root: {e}")))?;
        Ok(Self { root })
    }

    fn value_path(&self, key: &[u8]) -> PathBuf {
        self.root.join(key_group(key)).join(hex(key))
    }

    fn version_path(&self, key: &[u8]) -> PathBuf {
        self.root.join(key_group(key)).join(format!("{}.ver", hex(key)))
    }

    fn read_version(&self, key: &[u8]) -> Result<Option<u64>> {
        let path = self.version_path(key);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = read_file(&path)?;
        let bytes: [u8; 8] =
            bytes.as_slice().try_into().map_err(|_| Error::Decode("fs version bytes"))?;
        Ok(Some(u64::from_be_bytes(bytes)))
    }
}

#[async_trait::async_trait]
impl MetaStore for FsMetaStore {
    async fn get(&self, key: &[u8]) -> Result<Option<Record>> {
        let path = self.value_path(key);
        if !path.exists() {
            return Ok(None);
        }
        let value = Bytes::from(read_file(&path)?);
        let version = self.read_version(key)?.unwrap_or(1);
        Ok(Some(Record { value, version }))
    }

    async fn put(
        &self,
        key: &[u8],
        value: Bytes,
        cond: PutCond,
        _fence: FenceToken,
    ) -> Result<PutOutcome> {
        let current = self.read_version(key)?;
        let exists = self.value_path(key).exists();
        let current = if exists { current.or(Some(1)) } else { None };
        let allowed = match (cond, current) {
            (PutCond::Any, _) => true,
            (PutCond::IfAbsent, None) => true,
            (PutCond::IfAbsent, Some(_)) => false,
            (PutCond::IfVersion(expected), Some(version)) => version == expected,
            (PutCond::IfVersion(_), None) => false,
        };
        if !allowed {
            return Ok(PutOutcome::NotApplied { current });
        }
        let version = current.map_or(1, |v| v + 1);
        write_file(&self.value_path(key), &value)?;
        write_file(&self.version_path(key), &version.to_be_bytes())?;
        Ok(PutOutcome::Applied { version })
    }

    async fn delete(&self, key: &[u8], cond: DelCond, _fence: FenceToken) -> Result<()> {
        let current = if self.value_path(key).exists() {
            self.read_version(key)?.or(Some(1))
        } else {
            None
        };
        let matches = match (cond, current) {
            (DelCond::Any, _) => true,
            (DelCond::IfVersion(expected), Some(version)) => version == expected,
            (DelCond::IfVersion(_), None) => false,
        };
        if matches {
            let _ = fs::remove_file(self.value_path(key));
            let _ = fs::remove_file(self.version_path(key));
        }
        Ok(())
    }

    async fn list_prefix(
        &self,
        prefix: &[u8],
        cursor: Option<Vec<u8>>,
        limit: usize,
    ) -> Result<Page> {
        list_keys(&self.root, prefix, cursor, limit)
    }
}

/// Filesystem-backed [`BlobStore`] with write-once enforcement.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Open (creating if needed) a blob store rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().join("blobs");
        fs::create_dir_all(&root)
            .map_err(|e| Error::Backend(format!("create blob root: {e}")))?;
        Ok(Self { root })
    }

    fn blob_path(&self, key: &[u8]) -> PathBuf {
        self.root.join(key_group(key)).join(hex(key))
    }
}

#[async_trait::async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, key: &[u8], value: Bytes) -> Result<()> {
        let path = self.blob_path(key);
        if path.exists() {
            let existing = read_file(&path)?;
            if existing == value {
                return Ok(());
            }
            return Err(Error::Corruption(format!(
                "blob key {} rewritten with different contents",
                String::from_utf8_lossy(key)
            )));
        }
        write_file(&path, &value)
    }

    async fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        let path = self.blob_path(key);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(Bytes::from(read_file(&path)?)))
    }

    async fn delete(&self, key: &[u8]) -> Result<()> {
        let _ = fs::remove_file(self.blob_path(key));
        Ok(())
    }

    async fn list_prefix(
        &self,
        prefix: &[u8],
        cursor: Option<Vec<u8>>,
        limit: usize,
    ) -> Result<Page> {
        list_keys(&self.root, prefix, cursor, limit)
    }
}
