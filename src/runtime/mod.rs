//! Runtime abstraction for local system operations.
//!
//! This module provides a trait-based abstraction over the filesystem calls
//! the collector, the archive codec and the flows make, enabling dependency
//! injection and testability.
//!
//! # Structure
//!
//! - `path` - Lexical path utilities (normalize, absolutize)
//! - `fs` - File system operations (read, write, directory, permissions)

mod fs;
pub mod path;

use anyhow::Result;
use std::io::{Read, Seek, Write};
use std::path::{Path, PathBuf};

pub use path::{absolutize, normalize_path};

/// A readable, seekable handle (archives need random access).
pub trait ReadSeek: Read + Seek {}
impl<T: Read + Seek> ReadSeek for T {}

/// A writable, seekable handle.
pub trait WriteSeek: Write + Seek {}
impl<T: Write + Seek> WriteSeek for T {}

/// Kind of a directory entry, as reported without following symlinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    File,
    Dir,
    Symlink,
    Other,
}

#[cfg_attr(test, mockall::automock)]
pub trait Runtime: Send + Sync {
    // Process
    fn current_dir(&self) -> Result<PathBuf>;

    // File System
    fn read(&self, path: &Path) -> Result<Vec<u8>>;
    fn read_to_string(&self, path: &Path) -> Result<String>;
    fn write(&self, path: &Path, contents: &[u8]) -> Result<()>;
    fn create_dir_all(&self, path: &Path) -> Result<()>;
    fn remove_file(&self, path: &Path) -> Result<()>;
    fn exists(&self, path: &Path) -> bool;
    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>>;

    /// Entry kind from `lstat`; a symlink is reported as `Symlink`, never as its target.
    fn file_kind(&self, path: &Path) -> Result<FileKind>;

    /// Create (or truncate) a file for writing.
    fn create_file(&self, path: &Path) -> Result<Box<dyn WriteSeek + Send>>;
    fn open(&self, path: &Path) -> Result<Box<dyn ReadSeek + Send>>;

    /// Unix permission bits of a file. `None` on non-Unix platforms.
    fn permissions(&self, path: &Path) -> Option<u32>;

    /// Set file permissions (mode) on Unix systems. No-op on Windows.
    fn set_permissions(&self, path: &Path, mode: u32) -> Result<()>;
}

pub struct RealRuntime;

impl Runtime for RealRuntime {
    fn current_dir(&self) -> Result<PathBuf> {
        self.current_dir_impl()
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        self.read_impl(path)
    }

    fn read_to_string(&self, path: &Path) -> Result<String> {
        self.read_to_string_impl(path)
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        self.write_impl(path, contents)
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        self.create_dir_all_impl(path)
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        self.remove_file_impl(path)
    }

    fn exists(&self, path: &Path) -> bool {
        self.exists_impl(path)
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        self.read_dir_impl(path)
    }

    fn file_kind(&self, path: &Path) -> Result<FileKind> {
        self.file_kind_impl(path)
    }

    fn create_file(&self, path: &Path) -> Result<Box<dyn WriteSeek + Send>> {
        self.create_file_impl(path)
    }

    fn open(&self, path: &Path) -> Result<Box<dyn ReadSeek + Send>> {
        self.open_impl(path)
    }

    fn permissions(&self, path: &Path) -> Option<u32> {
        self.permissions_impl(path)
    }

    fn set_permissions(&self, path: &Path, mode: u32) -> Result<()> {
        self.set_permissions_impl(path, mode)
    }
}
