//! SSH/SFTP backend for [`Session`](super::Session).

use anyhow::{Context, Result, bail};
use log::{debug, warn};
use ssh2::{CheckResult, ErrorCode, KnownHostFileKind, RenameFlags, Sftp};
use std::io::{self, Read};
use std::net::{SocketAddr, TcpStream};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retry::{MAX_RETRIES, NonRetryableError, RETRY_DELAY, with_retry};

use super::{Connection, Connector, Endpoint, RemoteFs, TransportError};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const DIR_MODE: i32 = 0o755;

/// libssh2: the private key could not be read or parsed.
const LIBSSH2_ERROR_FILE: i32 = -16;
/// SFTP status: no such file.
const LIBSSH2_FX_NO_SUCH_FILE: i32 = 2;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum HostKeyPolicy {
    /// Accept whatever host key the server presents.
    #[default]
    AcceptAny,
    /// Require the host key to match an entry of this OpenSSH known_hosts file.
    KnownHosts(PathBuf),
}

pub struct SshConnector {
    host_keys: HostKeyPolicy,
    auth_attempts: usize,
    retry_delay: Duration,
}

impl SshConnector {
    pub fn new(host_keys: HostKeyPolicy) -> Self {
        Self {
            host_keys,
            auth_attempts: MAX_RETRIES,
            retry_delay: RETRY_DELAY,
        }
    }

    fn verify_host_key(
        &self,
        session: &ssh2::Session,
        endpoint: &Endpoint,
        port: u16,
    ) -> Result<(), TransportError> {
        let HostKeyPolicy::KnownHosts(path) = &self.host_keys else {
            debug!("Host key verification disabled, accepting key of {}", endpoint.host);
            return Ok(());
        };

        let (key, _) = session.host_key().ok_or_else(|| {
            warn!("Server {} did not present a host key", endpoint.host);
            TransportError::ConnectionFailure
        })?;
        let mut known_hosts = session.known_hosts().map_err(|e| {
            warn!("Failed to initialise known hosts: {}", e);
            TransportError::ConnectionFailure
        })?;
        known_hosts
            .read_file(path, KnownHostFileKind::OpenSSH)
            .map_err(|e| {
                warn!("Failed to read known hosts file {:?}: {}", path, e);
                TransportError::ConnectionFailure
            })?;

        let problem = match known_hosts.check_port(&endpoint.host, port, key) {
            CheckResult::Match => return Ok(()),
            CheckResult::Mismatch => "does not match the known hosts entry",
            CheckResult::NotFound => "is not in the known hosts file",
            CheckResult::Failure => "could not be checked",
        };
        warn!("Host key of {} {}", endpoint.host, problem);
        Err(TransportError::ConnectionFailure)
    }

    fn authenticate(&self, session: &ssh2::Session, endpoint: &Endpoint) -> Result<(), TransportError> {
        let result = with_retry("SSH authentication", self.auth_attempts, self.retry_delay, || {
            if endpoint.uses_key() {
                authenticate_with_key(session, endpoint)
            } else {
                session
                    .userauth_password(&endpoint.user, &endpoint.password)
                    .map_err(auth_error)
            }
        });

        match result {
            Ok(()) if session.authenticated() => Ok(()),
            Ok(()) => {
                warn!("Server accepted no credentials for {}", endpoint.user);
                Err(TransportError::ConnectionFailure)
            }
            Err(e) => {
                warn!("SSH authentication failed: {:#}", e);
                match e.downcast_ref::<NonRetryableError>() {
                    Some(NonRetryableError::InvalidCredentials(_)) => {
                        Err(TransportError::InvalidAuthData)
                    }
                    _ => Err(TransportError::ConnectionFailure),
                }
            }
        }
    }
}

impl Connector for SshConnector {
    #[tracing::instrument(skip(self))]
    fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Connection>, TransportError> {
        let port = endpoint.port_number()?;
        let address = SocketAddr::new(endpoint.ip()?, port);

        let tcp = TcpStream::connect_timeout(&address, CONNECT_TIMEOUT).map_err(|e| {
            warn!("Failed to connect to {}: {}", address, e);
            TransportError::ConnectionFailure
        })?;

        let mut session = ssh2::Session::new().map_err(|e| {
            warn!("Failed to create SSH session: {}", e);
            TransportError::ConnectionFailure
        })?;
        session.set_tcp_stream(tcp);
        session.handshake().map_err(|e| {
            warn!("SSH handshake with {} failed: {}", address, e);
            TransportError::ConnectionFailure
        })?;

        self.verify_host_key(&session, endpoint, port)?;
        self.authenticate(&session, endpoint)?;

        Ok(Box::new(SshConnection { session }))
    }
}

fn authenticate_with_key(session: &ssh2::Session, endpoint: &Endpoint) -> Result<()> {
    let key = std::str::from_utf8(&endpoint.private_key).map_err(|_| {
        NonRetryableError::InvalidCredentials("private key is not PEM text".to_string())
    })?;
    userauth_key(session, &endpoint.user, key)
}

#[cfg(unix)]
fn userauth_key(session: &ssh2::Session, user: &str, key: &str) -> Result<()> {
    session
        .userauth_pubkey_memory(user, None, key, None)
        .map_err(auth_error)
}

#[cfg(not(unix))]
fn userauth_key(session: &ssh2::Session, user: &str, key: &str) -> Result<()> {
    use std::io::Write;

    let mut file = tempfile::NamedTempFile::new().context("Failed to stage private key")?;
    file.write_all(key.as_bytes())
        .context("Failed to stage private key")?;
    session
        .userauth_pubkey_file(user, None, file.path(), None)
        .map_err(auth_error)
}

/// A key libssh2 cannot parse will not parse on the next attempt either.
fn auth_error(e: ssh2::Error) -> anyhow::Error {
    match e.code() {
        ErrorCode::Session(LIBSSH2_ERROR_FILE) => {
            NonRetryableError::InvalidCredentials(e.to_string()).into()
        }
        _ => anyhow::Error::from(e),
    }
}

fn is_not_found(e: &ssh2::Error) -> bool {
    matches!(e.code(), ErrorCode::SFTP(LIBSSH2_FX_NO_SUCH_FILE))
}

struct SshConnection {
    session: ssh2::Session,
}

impl Connection for SshConnection {
    fn open_fs(&mut self) -> Result<Box<dyn RemoteFs>> {
        let sftp = self.session.sftp().context("Failed to start SFTP subsystem")?;
        Ok(Box::new(SshFs { sftp }))
    }

    fn close(&mut self) -> Result<()> {
        self.session
            .disconnect(None, "pm session closed", None)
            .context("Failed to disconnect")
    }
}

struct SshFs {
    sftp: Sftp,
}

impl RemoteFs for SshFs {
    fn create_dir_all(&mut self, path: &str) -> Result<()> {
        let mut current = String::new();
        if path.starts_with('/') {
            current.push('/');
        }
        for part in path.split('/').filter(|p| !p.is_empty()) {
            if !current.is_empty() && !current.ends_with('/') {
                current.push('/');
            }
            current.push_str(part);

            match self.sftp.stat(Path::new(&current)) {
                Ok(stat) if stat.is_dir() => {}
                Ok(_) => bail!("{} exists and is not a directory", current),
                Err(_) => self
                    .sftp
                    .mkdir(Path::new(&current), DIR_MODE)
                    .with_context(|| format!("Failed to create directory {}", current))?,
            }
        }
        Ok(())
    }

    fn write_file(&mut self, path: &str, source: &mut dyn Read) -> Result<u64> {
        let mut file = self
            .sftp
            .create(Path::new(path))
            .with_context(|| format!("Failed to create {}", path))?;
        io::copy(source, &mut file).with_context(|| format!("Failed to write {}", path))
    }

    fn open_file(&mut self, path: &str) -> Result<Box<dyn Read + Send>> {
        let file = self
            .sftp
            .open(Path::new(path))
            .with_context(|| format!("Failed to open {}", path))?;
        Ok(Box::new(file))
    }

    fn is_dir(&mut self, path: &str) -> Result<bool> {
        let stat = self
            .sftp
            .lstat(Path::new(path))
            .with_context(|| format!("Failed to stat {}", path))?;
        Ok(stat.is_dir())
    }

    fn exists(&mut self, path: &str) -> Result<bool> {
        match self.sftp.lstat(Path::new(path)) {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(e).with_context(|| format!("Failed to stat {}", path)),
        }
    }

    fn symlink(&mut self, target: &str, link: &str) -> Result<()> {
        // ssh2 creates the link at its second argument, pointing at the first.
        self.sftp
            .symlink(Path::new(target), Path::new(link))
            .with_context(|| format!("Failed to link {} -> {}", link, target))
    }

    fn read_link(&mut self, link: &str) -> Result<String> {
        let target = self
            .sftp
            .readlink(Path::new(link))
            .with_context(|| format!("Failed to read link {}", link))?;
        Ok(target.to_string_lossy().replace('\\', "/"))
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        let flags = RenameFlags::OVERWRITE | RenameFlags::ATOMIC | RenameFlags::NATIVE;
        self.sftp
            .rename(Path::new(from), Path::new(to), Some(flags))
            .with_context(|| format!("Failed to rename {} to {}", from, to))
    }

    fn remove(&mut self, path: &str) -> Result<()> {
        match self.sftp.unlink(Path::new(path)) {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    fn endpoint(port: u16) -> Endpoint {
        Endpoint {
            host: "127.0.0.1".to_string(),
            port: port.to_string(),
            user: "pm".to_string(),
            password: "secret".to_string(),
            private_key: Vec::new(),
        }
    }

    #[test]
    fn test_default_policy_accepts_any_key() {
        assert_eq!(HostKeyPolicy::default(), HostKeyPolicy::AcceptAny);
    }

    #[test]
    fn test_connect_refused() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let result = SshConnector::new(HostKeyPolicy::AcceptAny).connect(&endpoint(port));
        assert!(matches!(result, Err(TransportError::ConnectionFailure)));
    }

    #[test]
    fn test_handshake_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            if let Ok((stream, _)) = listener.accept() {
                drop(stream);
            }
        });

        let result = SshConnector::new(HostKeyPolicy::AcceptAny).connect(&endpoint(port));
        assert!(matches!(result, Err(TransportError::ConnectionFailure)));
        server.join().unwrap();
    }

    #[test]
    fn test_connect_rejects_invalid_host() {
        let mut e = endpoint(22);
        e.host = "localhost".to_string();
        let result = SshConnector::new(HostKeyPolicy::AcceptAny).connect(&e);
        assert!(matches!(result, Err(TransportError::InvalidHost)));
    }

    #[test]
    fn test_unparseable_key_is_not_retried() {
        let err = auth_error(ssh2::Error::new(
            ErrorCode::Session(LIBSSH2_ERROR_FILE),
            "Unable to extract public key from private key",
        ));
        assert!(matches!(
            err.downcast_ref::<NonRetryableError>(),
            Some(NonRetryableError::InvalidCredentials(_))
        ));

        let err = auth_error(ssh2::Error::new(
            ErrorCode::Session(-18),
            "Authentication failed",
        ));
        assert!(err.downcast_ref::<NonRetryableError>().is_none());
    }

    #[test]
    fn test_not_found_classification() {
        assert!(is_not_found(&ssh2::Error::new(
            ErrorCode::SFTP(LIBSSH2_FX_NO_SUCH_FILE),
            "no such file"
        )));
        assert!(!is_not_found(&ssh2::Error::new(
            ErrorCode::SFTP(3),
            "permission denied"
        )));
    }
}
