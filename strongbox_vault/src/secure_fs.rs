//! Strongbox Vault - Secure Filesystem Operations
//!
//! Atomic writes and zero-before-unlink deletes under a root directory.
//! Paths are relative and `/`-separated; callers validate them first.

use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use rand::RngCore;

/// Secure Filesystem Handler
#[derive(Debug, Clone)]
pub struct SecureFs {
    root: PathBuf,
}

impl SecureFs {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn full_path(&self, relative: &str) -> PathBuf {
        relative
            .split('/')
            .fold(self.root.clone(), |path, segment| path.join(segment))
    }

    /// Write a file atomically: unique temp file, fsync, rename
    pub fn write_file(&self, relative_path: &str, data: &[u8]) -> io::Result<()> {
        let path = self.full_path(relative_path);
        let parent = path
            .parent()
            .ok_or_else(|| io::Error::new(ErrorKind::InvalidInput, "path has no parent"))?;
        fs::create_dir_all(parent)?;

        let mut suffix = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut suffix);
        let temp_path = parent.join(format!(".tmp-{}", hex::encode(suffix)));

        let result = (|| {
            let mut file = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&temp_path)?;
            file.write_all(data)?;
            file.sync_all()?;
            fs::rename(&temp_path, &path)
        })();

        if result.is_err() {
            let _ = fs::remove_file(&temp_path);
        }
        result
    }

    pub fn read_file(&self, relative_path: &str) -> io::Result<Vec<u8>> {
        let mut file = File::open(self.full_path(relative_path))?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        Ok(data)
    }

    /// Overwrite with zeros, then unlink. `NotFound` if absent.
    pub fn delete_file(&self, relative_path: &str) -> io::Result<()> {
        let path = self.full_path(relative_path);
        let size = fs::metadata(&path)?.len() as usize;

        if size > 0 {
            if let Ok(mut file) = OpenOptions::new().write(true).open(&path) {
                let zeros = vec![0u8; size.min(1024 * 1024)]; // Max 1MB chunks
                let mut remaining = size;
                while remaining > 0 {
                    let to_write = remaining.min(zeros.len());
                    if file.write_all(&zeros[..to_write]).is_err() {
                        break;
                    }
                    remaining -= to_write;
                }
                let _ = file.sync_all();
            }
        }

        fs::remove_file(&path)
    }

    pub fn exists(&self, relative_path: &str) -> bool {
        self.full_path(relative_path).is_file()
    }

    /// Relative paths of every file below `relative_dir`, sorted.
    /// A missing directory lists as empty.
    pub fn list_files(&self, relative_dir: &str) -> io::Result<Vec<String>> {
        let trimmed = relative_dir.trim_end_matches('/');
        let dir = if trimmed.is_empty() {
            self.root.clone()
        } else {
            self.full_path(trimmed)
        };

        let mut files = Vec::new();
        if dir.is_dir() {
            Self::collect(&dir, trimmed, &mut files)?;
        }
        files.sort();
        Ok(files)
    }

    fn collect(dir: &Path, prefix: &str, out: &mut Vec<String>) -> io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name.starts_with(".tmp-") {
                continue;
            }
            let relative = if prefix.is_empty() {
                name
            } else {
                format!("{prefix}/{name}")
            };

            if entry.file_type()?.is_dir() {
                Self::collect(&entry.path(), &relative, out)?;
            } else {
                out.push(relative);
            }
        }
        Ok(())
    }
}
