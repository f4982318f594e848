use log::{debug, info, warn};
use std::fs::File;
use std::io::{self, Write};
use std::ops::Deref;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{Connection, Connector, Endpoint, RemoteFs, TransportError, remote_parent};

#[derive(Default)]
struct State {
    connection: Option<Box<dyn Connection>>,
    fs: Option<Box<dyn RemoteFs>>,
}

impl State {
    /// File-transfer sub-session, opened on first use.
    fn fs(&mut self) -> Result<&mut (dyn RemoteFs + 'static), TransportError> {
        let connection = self
            .connection
            .as_mut()
            .ok_or(TransportError::NotConnected)?;
        if self.fs.is_none() {
            let fs = connection.open_fs().map_err(|e| {
                warn!("Failed to open file-transfer session: {:#}", e);
                TransportError::ConnectionFailure
            })?;
            self.fs = Some(fs);
        }
        self.fs
            .as_deref_mut()
            .ok_or(TransportError::ConnectionFailure)
    }
}

/// One connection to the remote store, shared by reference between flows.
///
/// Every operation holds the session lock for its whole duration, so connect,
/// close and data transfers never overlap.
pub struct Session {
    endpoint: Endpoint,
    connector: Box<dyn Connector>,
    state: Mutex<State>,
}

impl Session {
    pub fn new(endpoint: Endpoint, connector: Box<dyn Connector>) -> Self {
        Self {
            endpoint,
            connector,
            state: Mutex::new(State::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connection.is_some()
    }

    /// Validate the endpoint and connect. Does nothing when already connected.
    pub fn connect(&self) -> Result<(), TransportError> {
        self.endpoint.validate()?;

        let mut state = self.lock();
        if state.connection.is_some() {
            debug!("Already connected to {}", self.endpoint.host);
            return Ok(());
        }

        debug!("Connecting to {}:{}...", self.endpoint.host, self.endpoint.port);
        let connection = self.connector.connect(&self.endpoint)?;
        state.connection = Some(connection);
        info!("Connected to {}:{}", self.endpoint.host, self.endpoint.port);
        Ok(())
    }

    /// Connect and return a guard that closes the session when dropped.
    pub fn scoped_connect(&self) -> Result<ConnectionGuard<'_>, TransportError> {
        self.connect()?;
        Ok(ConnectionGuard { session: self })
    }

    /// Tear down the file-transfer sub-session, then the connection.
    ///
    /// Closing a disconnected session is a no-op. The session is disconnected
    /// afterwards even when the underlying close fails.
    pub fn close(&self) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.fs = None;
        if let Some(mut connection) = state.connection.take() {
            connection.close().map_err(|e| {
                warn!("Failed to close connection: {:#}", e);
                TransportError::ConnectionFailure
            })?;
            info!("Disconnected from {}", self.endpoint.host);
        }
        Ok(())
    }

    /// Copy `local` to `remote`, creating the remote parent directories.
    #[tracing::instrument(skip(self))]
    pub fn upload(&self, remote: &str, local: &Path) -> Result<(), TransportError> {
        let mut state = self.lock();
        let fs = state.fs()?;

        let mut source = File::open(local).map_err(|e| {
            debug!("Failed to open {:?}: {}", local, e);
            TransportError::FailedToOpenSource
        })?;

        if let Some(parent) = remote_parent(remote) {
            fs.create_dir_all(parent).map_err(|e| {
                debug!("Failed to create remote directory {}: {:#}", parent, e);
                TransportError::FailedToUploadFile
            })?;
        }

        let bytes = fs.write_file(remote, &mut source).map_err(|e| {
            debug!("Failed to upload {:?} to {}: {:#}", local, remote, e);
            TransportError::FailedToUploadFile
        })?;
        debug!("Uploaded {} bytes to {}", bytes, remote);
        Ok(())
    }

    /// Copy `remote` to a newly created `local` file.
    #[tracing::instrument(skip(self))]
    pub fn download(&self, remote: &str, local: &Path) -> Result<(), TransportError> {
        let mut state = self.lock();
        let fs = state.fs()?;

        let is_dir = fs.is_dir(remote).map_err(|e| {
            debug!("Failed to stat {}: {:#}", remote, e);
            TransportError::FailedToOpenSource
        })?;
        if is_dir {
            return Err(TransportError::CannotReadDirectory);
        }

        let mut source = fs.open_file(remote).map_err(|e| {
            debug!("Failed to open {}: {:#}", remote, e);
            TransportError::FailedToOpenSource
        })?;

        let mut destination = File::create(local).map_err(|e| {
            debug!("Failed to create {:?}: {}", local, e);
            TransportError::FailedToOpenDestination
        })?;

        let bytes = io::copy(&mut source, &mut destination)
            .and_then(|bytes| destination.flush().map(|_| bytes))
            .map_err(|e| {
                debug!("Failed to download {} to {:?}: {}", remote, local, e);
                TransportError::FailedToDownloadFile
            })?;
        debug!("Downloaded {} bytes from {}", bytes, remote);
        Ok(())
    }

    /// Point `link` at `target`, replacing whatever link is already there.
    ///
    /// The new link is staged next to `link` and renamed over it, so a failure
    /// leaves the previous link in place.
    pub fn create_symbolic_link(&self, link: &str, target: &str) -> Result<(), TransportError> {
        let mut state = self.lock();
        let fs = state.fs()?;
        let staged = format!("{}{}", link, STAGED_SUFFIX);

        fs.remove(&staged)
            .and_then(|_| fs.symlink(target, &staged))
            .map_err(|e| {
                debug!("Failed to stage link {} -> {}: {:#}", staged, target, e);
                TransportError::FailedToCreateLink
            })?;

        if let Err(e) = fs.rename(&staged, link) {
            debug!("Rename of {} over {} failed: {:#}", staged, link, e);
            if let Err(e) = swap_link(fs, &staged, link) {
                debug!("Failed to link {} -> {}: {:#}", link, target, e);
                if let Err(e) = fs.remove(&staged) {
                    warn!("Failed to remove staged link {}: {:#}", staged, e);
                }
                return Err(TransportError::FailedToCreateLink);
            }
        }
        debug!("Linked {} -> {}", link, target);
        Ok(())
    }

    pub fn resolve_link(&self, link: &str) -> Result<String, TransportError> {
        let mut state = self.lock();
        let fs = state.fs()?;

        fs.read_link(link).map_err(|e| {
            debug!("Failed to read link {}: {:#}", link, e);
            TransportError::FailedToResolveLink
        })
    }

    pub fn exists(&self, path: &str) -> Result<bool, TransportError> {
        let mut state = self.lock();
        let fs = state.fs()?;

        fs.exists(path).map_err(|e| {
            debug!("Failed to stat {}: {:#}", path, e);
            TransportError::FailedToOpenSource
        })
    }
}

const STAGED_SUFFIX: &str = ".new";

/// Replace `link` with `staged` on servers whose rename will not overwrite.
///
/// The previous link target is put back when the second rename fails.
fn swap_link<F: RemoteFs + ?Sized>(fs: &mut F, staged: &str, link: &str) -> anyhow::Result<()> {
    let previous = fs.read_link(link).ok();
    fs.remove(link)?;
    if let Err(e) = fs.rename(staged, link) {
        if let Some(previous) = previous {
            if let Err(restore) = fs.symlink(&previous, link) {
                warn!("Failed to restore link {} -> {}: {:#}", link, previous, restore);
            }
        }
        return Err(e);
    }
    Ok(())
}

/// Closes its session when dropped. Close failures are logged.
pub struct ConnectionGuard<'a> {
    session: &'a Session,
}

impl Deref for ConnectionGuard<'_> {
    type Target = Session;

    fn deref(&self) -> &Session {
        self.session
    }
}

impl Drop for ConnectionGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.session.close() {
            warn!("Failed to close connection to {}: {}", self.session.endpoint.host, e);
        }
    }
}
