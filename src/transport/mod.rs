//! Remote store transport.
//!
//! [`Session`] owns at most one authenticated connection and the file-transfer
//! sub-session opened on it. The wire protocol sits behind three seams:
//!
//! - [`Connector`] dials and authenticates an [`Endpoint`]
//! - [`Connection`] is a live, authenticated connection
//! - [`RemoteFs`] is the file-transfer sub-session (paths are `/`-separated)
//!
//! The [`ssh`] module implements them over SSH/SFTP.

mod endpoint;
mod session;
pub mod ssh;

use std::io::Read;
use thiserror::Error;

pub use endpoint::Endpoint;
pub use session::{ConnectionGuard, Session};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("invalid ssh host")]
    InvalidHost,
    #[error("invalid port")]
    InvalidPort,
    #[error("invalid username")]
    InvalidUser,
    #[error("invalid password")]
    InvalidPassword,
    #[error("no auth data")]
    NoAuthData,
    #[error("invalid auth data")]
    InvalidAuthData,
    #[error("unable to connect to the server")]
    ConnectionFailure,
    #[error("not connected to the server")]
    NotConnected,
    #[error("failed to open source file")]
    FailedToOpenSource,
    #[error("failed to upload file")]
    FailedToUploadFile,
    #[error("failed to open destination file")]
    FailedToOpenDestination,
    #[error("cannot read directory")]
    CannotReadDirectory,
    #[error("failed to download file")]
    FailedToDownloadFile,
    #[error("failed to create link")]
    FailedToCreateLink,
    #[error("failed to resolve link")]
    FailedToResolveLink,
}

#[cfg_attr(test, mockall::automock)]
pub trait Connector: Send + Sync {
    fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Connection>, TransportError>;
}

#[cfg_attr(test, mockall::automock)]
pub trait Connection: Send {
    /// Open the file-transfer sub-session.
    fn open_fs(&mut self) -> anyhow::Result<Box<dyn RemoteFs>>;
    fn close(&mut self) -> anyhow::Result<()>;
}

/// File-transfer operations on the remote store.
///
/// Errors carry the backend's cause; [`Session`] maps them to [`TransportError`].
pub trait RemoteFs: Send {
    fn create_dir_all(&mut self, path: &str) -> anyhow::Result<()>;
    /// Create (or truncate) `path` and copy `source` into it.
    fn write_file(&mut self, path: &str, source: &mut dyn Read) -> anyhow::Result<u64>;
    /// Open `path` for reading. An error here means the source could not be opened.
    fn open_file(&mut self, path: &str) -> anyhow::Result<Box<dyn Read + Send>>;
    /// `true` when `path` is a directory, not following a final symlink.
    fn is_dir(&mut self, path: &str) -> anyhow::Result<bool>;
    fn exists(&mut self, path: &str) -> anyhow::Result<bool>;
    fn symlink(&mut self, target: &str, link: &str) -> anyhow::Result<()>;
    fn read_link(&mut self, link: &str) -> anyhow::Result<String>;
    /// Move `from` to `to`, replacing `to` when the server allows it.
    fn rename(&mut self, from: &str, to: &str) -> anyhow::Result<()>;
    /// Remove a file or link. Removing a missing entry is not an error.
    fn remove(&mut self, path: &str) -> anyhow::Result<()>;
}

/// Parent directory of a `/`-separated remote path, if it has one.
pub(crate) fn remote_parent(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&trimmed[..idx]),
        None => None,
    }
}
