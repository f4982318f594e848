use anyhow::{Result, anyhow, bail};
use log::debug;
use std::path::{Path, PathBuf};

use crate::{
    application::{CreateAction, CreateReport, FetchedPackage, UpdateAction},
    archive::ArchiveCodec,
    package::{PackageList, Packet},
    runtime::{FileKind, Runtime, absolutize},
};

pub mod config;

use config::{Config, RemoteSettings};

/// Publish the packet described by `packet_file`.
#[tracing::instrument(skip(runtime, settings))]
pub fn create<R: Runtime>(runtime: R, packet_file: &Path, settings: &RemoteSettings) -> Result<()> {
    let data = read_description(&runtime, packet_file)?;
    println!("Parsing packet description.");
    let packet = Packet::parse(&data)?;

    let config = Config::new(runtime, settings)?;
    run_create(&packet, &config)?;
    Ok(())
}

pub fn run_create<R: Runtime, C: ArchiveCodec>(
    packet: &Packet,
    config: &Config<R, C>,
) -> Result<CreateReport> {
    let action = CreateAction::new(
        &config.runtime,
        &config.session,
        &config.codec,
        config.collect_options,
    );
    action.run(packet)
}

/// Fetch the packages listed in `packages_file` into `destination` (default: current directory).
#[tracing::instrument(skip(runtime, settings))]
pub fn update<R: Runtime>(
    runtime: R,
    packages_file: &Path,
    destination: Option<&Path>,
    settings: &RemoteSettings,
) -> Result<()> {
    let data = read_description(&runtime, packages_file)?;
    println!("Parsing package description.");
    let list = PackageList::parse(&data)?;
    let destination = destination_dir(&runtime, destination)?;

    let config = Config::new(runtime, settings)?;
    run_update(&list, &destination, &config)?;
    Ok(())
}

pub fn run_update<R: Runtime, C: ArchiveCodec>(
    list: &PackageList,
    destination: &Path,
    config: &Config<R, C>,
) -> Result<Vec<FetchedPackage>> {
    let action = UpdateAction::new(
        &config.runtime,
        &config.session,
        &config.codec,
        config.resolve_policy,
    );
    action.run(list, destination)
}

/// Read a description file, which must be an existing regular file.
fn read_description<R: Runtime>(runtime: &R, path: &Path) -> Result<String> {
    match runtime.file_kind(path) {
        Ok(FileKind::File) => {}
        Ok(kind) => {
            debug!("{:?} is a {:?}", path, kind);
            bail!("Unsupported file type");
        }
        Err(e) => {
            debug!("{:#}", e);
            if runtime.exists(path) {
                bail!("Failed to check information about file {}", path.display());
            }
            bail!("Could not find file {}", path.display());
        }
    }

    runtime
        .read_to_string(path)
        .map_err(|_| anyhow!("Failed to open file {}", path.display()))
}

fn destination_dir<R: Runtime>(runtime: &R, destination: Option<&Path>) -> Result<PathBuf> {
    let cwd = runtime.current_dir()?;
    match destination {
        None => Ok(cwd),
        Some(dir) => absolutize(&cwd, dir)
            .ok_or_else(|| anyhow!("Invalid destination directory {:?}", dir)),
    }
}
