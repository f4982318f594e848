use anyhow::{Context, Result};
use log::debug;
use std::path::PathBuf;

use crate::{
    archive::ZipCodec,
    collector::CollectOptions,
    package::ResolvePolicy,
    runtime::Runtime,
    transport::{
        Connector, Endpoint, Session,
        ssh::{HostKeyPolicy, SshConnector},
    },
};

/// Remote endpoint and tuning options, as given on the command line.
#[derive(Clone, Default)]
pub struct RemoteSettings {
    pub host: String,
    pub port: String,
    pub user: String,
    pub password: Option<String>,
    pub key_file: Option<PathBuf>,
    pub known_hosts: Option<PathBuf>,
    pub verify_versions: bool,
    pub workers: usize,
}

pub struct Config<R: Runtime, C> {
    pub runtime: R,
    pub session: Session,
    pub codec: C,
    pub collect_options: CollectOptions,
    pub resolve_policy: ResolvePolicy,
}

impl<R: Runtime> Config<R, ZipCodec> {
    /// Configuration talking SSH/SFTP to the configured endpoint.
    pub fn new(runtime: R, settings: &RemoteSettings) -> Result<Self> {
        let host_keys = match &settings.known_hosts {
            Some(path) => HostKeyPolicy::KnownHosts(path.clone()),
            None => HostKeyPolicy::AcceptAny,
        };
        Self::with_connector(runtime, settings, Box::new(SshConnector::new(host_keys)))
    }

    pub fn with_connector(
        runtime: R,
        settings: &RemoteSettings,
        connector: Box<dyn Connector>,
    ) -> Result<Self> {
        let endpoint = endpoint(&runtime, settings)?;
        debug!("Remote endpoint: {:?}", endpoint);

        Ok(Self {
            runtime,
            session: Session::new(endpoint, connector),
            codec: ZipCodec,
            collect_options: CollectOptions {
                max_workers: settings.workers,
            },
            resolve_policy: ResolvePolicy {
                verify_requested: settings.verify_versions,
            },
        })
    }
}

fn endpoint<R: Runtime>(runtime: &R, settings: &RemoteSettings) -> Result<Endpoint> {
    let private_key = match &settings.key_file {
        Some(path) => {
            let key = runtime
                .read(path)
                .with_context(|| format!("Failed to read private key {:?}", path))?;
            debug!("Using private key from {:?} ({} bytes)", path, key.len());
            trim_end_bytes(key)
        }
        None => Vec::new(),
    };

    Ok(Endpoint {
        host: settings.host.trim_end().to_string(),
        port: settings.port.trim_end().to_string(),
        user: settings.user.trim_end().to_string(),
        password: settings
            .password
            .as_deref()
            .map(str::trim_end)
            .unwrap_or_default()
            .to_string(),
        private_key,
    })
}

fn trim_end_bytes(mut bytes: Vec<u8>) -> Vec<u8> {
    let len = bytes.trim_ascii_end().len();
    bytes.truncate(len);
    bytes
}
