//! A directory-tree cache: one file per address.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Component, Path, PathBuf};

use cps_common::{Error, Result};
use tracing::debug;

use super::cache::KeyValueCache;

const TMP_SUFFIX: &str = ".tmp";

/// Stores each address as a file below `root`; `/` in an address maps to a
/// directory separator. Writes go to a temporary file that is renamed into
/// place.
#[derive(Debug, Clone)]
pub struct FileCache {
    root: PathBuf,
}

impl FileCache {
    /// Open (creating if needed) a cache rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, address: &str) -> Result<PathBuf> {
        let relative = Path::new(address);
        let plain = !address.is_empty()
            && !address.ends_with(TMP_SUFFIX)
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !plain {
            return Err(Error::decoding(format!("address {address:?} is not a relative path")));
        }
        Ok(self.root.join(relative))
    }

    fn collect(&self, dir: &Path, out: &mut Vec<String>) -> Result<()> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                self.collect(&path, out)?;
            } else if let Ok(relative) = path.strip_prefix(&self.root) {
                let address = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if !address.ends_with(TMP_SUFFIX) {
                    out.push(address);
                }
            }
        }
        Ok(())
    }
}

impl KeyValueCache for FileCache {
    fn get(&self, address: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.path_of(address)?) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, address: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_of(address)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut tmp_name = path.as_os_str().to_owned();
        tmp_name.push(TMP_SUFFIX);
        let tmp_path = PathBuf::from(tmp_name);
        {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)?;
            file.write_all(bytes)?;
            file.flush()?;
        }
        fs::rename(&tmp_path, &path)?;
        debug!(address, bytes = bytes.len(), "stream written");
        Ok(())
    }

    fn remove(&self, address: &str) -> Result<bool> {
        match fs::remove_file(self.path_of(address)?) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn list_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        // Only walk the deepest directory the prefix pins down.
        let start = match prefix.rfind('/') {
            Some(i) => self.root.join(&prefix[..i]),
            None => self.root.clone(),
        };
        let mut addresses = Vec::new();
        self.collect(&start, &mut addresses)?;
        addresses.retain(|a| a.starts_with(prefix));
        addresses.sort();
        Ok(addresses)
    }
}
