//! Remote store layout.
//!
//! ```text
//! <name>/<ver>/<name>.zip        archive
//! <name>/latest            -> <ver>/<name>.zip
//! meta/<name>/<ver>/meta         manifest (JSON)
//! meta/<name>/latest       -> <ver>/meta
//! ```
//!
//! Remote paths always use `/`, whatever the local platform.

use std::path::{Path, PathBuf};

use crate::archive::ARCHIVE_EXTENSION;

use super::version::Version;

const META_DIR: &str = "meta";
const META_FILE: &str = "meta";
const LATEST: &str = "latest";

pub fn archive_file_name(name: &str) -> String {
    format!("{}.{}", name, ARCHIVE_EXTENSION)
}

pub fn remote_archive(name: &str, version: &Version) -> String {
    format!("{}/{}/{}", name, version, archive_file_name(name))
}

pub fn latest_archive_link(name: &str) -> String {
    format!("{}/{}", name, LATEST)
}

/// Target of the archive "latest" link, relative to the link's directory.
pub fn archive_link_target(name: &str, version: &Version) -> String {
    format!("{}/{}", version, archive_file_name(name))
}

pub fn remote_manifest(name: &str, version: &Version) -> String {
    format!("{}/{}/{}/{}", META_DIR, name, version, META_FILE)
}

pub fn latest_manifest_link(name: &str) -> String {
    format!("{}/{}/{}", META_DIR, name, LATEST)
}

pub fn manifest_link_target(version: &Version) -> String {
    format!("{}/{}", version, META_FILE)
}

/// Version segment of a resolved link target: the name of its parent directory.
///
/// Works for relative (`1.2/pkg.zip`) and absolute (`/srv/pkg/1.2/pkg.zip`) targets.
pub fn version_segment(link_target: &str) -> Option<&str> {
    let mut segments = link_target
        .split(['/', '\\'])
        .filter(|s| !s.is_empty() && *s != ".");
    segments.next_back()?;
    segments.next_back()
}

/// Local archive path (without extension) inside a scratch directory.
pub fn local_archive_stem(scratch: &Path, name: &str, version: &Version) -> PathBuf {
    scratch.join(name).join(version.to_string()).join(name)
}

pub fn local_manifest(scratch: &Path, name: &str, version: &Version) -> PathBuf {
    scratch.join(name).join(version.to_string()).join(META_FILE)
}
