mod zip;

use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::runtime::Runtime;

pub use zip::ZipCodec;

/// Extension appended to every packed archive.
pub const ARCHIVE_EXTENSION: &str = "zip";

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("invalid root path")]
    InvalidRootPath,
    #[error("invalid archive name")]
    InvalidArchiveName,
    #[error("invalid or empty file name")]
    InvalidFileName,
    #[error("failed to create archive")]
    FailedToCreateArchive,
    #[error("failed to open file")]
    FailedToOpenFile,
    #[error("failed to archive file")]
    FailedToArchiveFile,
    #[error("failed to create compressed file")]
    FailedToCreateCompressedFile,
    #[error("failed to create directory")]
    FailedToCreateDirectory,
    #[error("failed to create file")]
    FailedToCreateFile,
    #[error("failed to extract file")]
    FailedToExtractFile,
}

/// Builds and extracts path-relocatable archives.
///
/// Entry names are paths relative to the root given to `pack`; `unpack`
/// recreates them under an arbitrary destination. Entries are trusted:
/// apart from stripping leading `./`, `.\`, `/` and `\`, entry names are
/// not checked for `..` segments.
pub trait ArchiveCodec: Send + Sync {
    /// Pack `files` (each under `root`) into `<archive_stem>.<ext>` and return that path.
    fn pack<R: Runtime>(
        &self,
        runtime: &R,
        root: &Path,
        archive_stem: &Path,
        files: &[PathBuf],
    ) -> Result<PathBuf, ArchiveError>;

    /// Extract every entry of `archive` under `destination`.
    fn unpack<R: Runtime>(
        &self,
        runtime: &R,
        archive: &Path,
        destination: &Path,
    ) -> Result<(), ArchiveError>;
}

/// `path` with surrounding whitespace removed, or `None` if nothing is left.
pub(crate) fn trimmed(path: &Path) -> Option<PathBuf> {
    let trimmed = match path.to_str() {
        Some(s) => PathBuf::from(s.trim()),
        None => path.to_path_buf(),
    };
    (!trimmed.as_os_str().is_empty()).then_some(trimmed)
}

/// Strip leading `./`, `.\`, `/` and `\` sequences from an entry name.
pub(crate) fn normalize_entry_name(name: &str) -> &str {
    let mut rest = name.trim();
    loop {
        if let Some(r) = rest.strip_prefix("./").or_else(|| rest.strip_prefix(".\\")) {
            rest = r;
        } else if let Some(r) = rest.strip_prefix(['/', '\\']) {
            rest = r;
        } else {
            return rest;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trimmed() {
        assert_eq!(trimmed(Path::new("  a/b ")), Some(PathBuf::from("a/b")));
        assert_eq!(trimmed(Path::new("   ")), None);
        assert_eq!(trimmed(Path::new("")), None);
    }

    #[test]
    fn test_normalize_entry_name() {
        assert_eq!(normalize_entry_name("./bin/tool"), "bin/tool");
        assert_eq!(normalize_entry_name("/abs/file"), "abs/file");
        assert_eq!(normalize_entry_name(".\\win\\file"), "win\\file");
        assert_eq!(normalize_entry_name("\\/./x"), "x");
        assert_eq!(normalize_entry_name(".env"), ".env");
        assert_eq!(normalize_entry_name("./"), "");
        assert_eq!(normalize_entry_name("/"), "");
    }
}
