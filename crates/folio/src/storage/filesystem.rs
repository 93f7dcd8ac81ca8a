use std::io::Write;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::StorageError;

/// Writes published output under a root directory.
///
/// Sitewide file paths are absolute; they are re-rooted under
/// `output_directory`, which is `/` in production and a scratch directory in
/// tests or staging.
#[derive(Debug, Clone)]
pub struct FileStorage {
    output_directory: PathBuf,
}

impl FileStorage {
    pub fn new<P: AsRef<Path>>(output_directory: P) -> Self {
        Self {
            output_directory: output_directory.as_ref().to_path_buf(),
        }
    }

    pub fn output_directory(&self) -> &Path {
        &self.output_directory
    }

    /// Filesystem location of a sitewide file path.
    pub fn path_for(&self, sitewide_file_path: &str) -> PathBuf {
        self.output_directory
            .join(sitewide_file_path.trim_start_matches('/'))
    }

    /// Replaces the file at `sitewide_file_path` with `content`.
    ///
    /// The content goes to a uniquely named sibling first and is renamed
    /// over the target, so readers never see a half-written page.
    pub fn write(&self, sitewide_file_path: &str, content: &[u8]) -> Result<PathBuf, StorageError> {
        let target = self.path_for(sitewide_file_path);
        if let Some(parent) = target.parent() {
            self.ensure_directory(parent)?;
        }

        let file_name = target
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("output");
        let staging = target.with_file_name(format!(".{}.{}.tmp", file_name, Uuid::new_v4()));

        let write_err = |path: &Path, source: std::io::Error| StorageError::WriteFile {
            path: path.to_path_buf(),
            source,
        };

        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&staging)
            .map_err(|e| write_err(&staging, e))?;
        if let Err(e) = file.write_all(content).and_then(|_| file.sync_all()) {
            let _ = std::fs::remove_file(&staging);
            return Err(write_err(&target, e));
        }
        drop(file);

        if let Err(e) = std::fs::rename(&staging, &target) {
            let _ = std::fs::remove_file(&staging);
            return Err(write_err(&target, e));
        }

        log::debug!("Wrote {} bytes to {}", content.len(), target.display());
        Ok(target)
    }

    /// Removes a published file. Returns false when it was already gone.
    pub fn remove(&self, sitewide_file_path: &str) -> Result<bool, StorageError> {
        let target = self.path_for(sitewide_file_path);
        match std::fs::remove_file(&target) {
            Ok(()) => {
                log::debug!("Removed {}", target.display());
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::RemoveFile {
                path: target,
                source: e,
            }),
        }
    }

    pub fn exists(&self, sitewide_file_path: &str) -> bool {
        self.path_for(sitewide_file_path).is_file()
    }

    fn ensure_directory(&self, path: &Path) -> Result<(), StorageError> {
        if !path.exists() {
            std::fs::create_dir_all(path).map_err(|e| StorageError::CreateDirectory {
                path: path.to_path_buf(),
                source: e,
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_creates_nested_directories() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileStorage::new(temp_dir.path());

        let path = storage
            .write("/var/www/blog/archive/2021/06/hello/index.html", b"<p>hi</p>")
            .unwrap();

        assert!(path.starts_with(temp_dir.path()));
        assert_eq!(std::fs::read(&path).unwrap(), b"<p>hi</p>");
        assert!(storage.exists("/var/www/blog/archive/2021/06/hello/index.html"));
    }

    #[test]
    fn test_write_replaces_existing_content() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileStorage::new(temp_dir.path());

        storage.write("/blog/index.html", b"first").unwrap();
        let path = storage.write("/blog/index.html", b"second").unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"second");
        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_remove_tolerates_missing_files() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileStorage::new(temp_dir.path());

        storage.write("/blog/old.html", b"old").unwrap();
        assert!(storage.remove("/blog/old.html").unwrap());
        assert!(!storage.remove("/blog/old.html").unwrap());
        assert!(!storage.exists("/blog/old.html"));
    }

    #[test]
    fn test_write_fails_when_parent_is_a_file() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileStorage::new(temp_dir.path());
        std::fs::write(temp_dir.path().join("blocked"), b"x").unwrap();

        let result = storage.write("/blocked/index.html", b"y");
        assert!(matches!(
            result,
            Err(StorageError::CreateDirectory { .. }) | Err(StorageError::WriteFile { .. })
        ));
    }

    #[test]
    fn test_output_directory_accessor() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileStorage::new(temp_dir.path());

        assert_eq!(storage.output_directory(), temp_dir.path());
    }
}
