//! Create action - publishes a packet to the remote store.
//!
//! This action coordinates:
//! - Collecting the packet's local files
//! - Packing them into an archive in a scratch directory
//! - Writing the dependency manifest next to it
//! - Uploading both and repointing the "latest" links

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{debug, info, warn};

use crate::archive::ArchiveCodec;
use crate::cleanup::ScratchDir;
use crate::collector::{self, CollectOptions};
use crate::package::{Packet, Version, layout};
use crate::runtime::Runtime;
use crate::transport::Session;

/// What a successful create published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateReport {
    pub name: String,
    pub version: Version,
    /// Number of files in the archive.
    pub files: usize,
    pub remote_archive: String,
    pub remote_manifest: String,
}

pub struct CreateAction<'a, R: Runtime, C: ArchiveCodec> {
    runtime: &'a R,
    session: &'a Session,
    codec: &'a C,
    collect_options: CollectOptions,
}

impl<'a, R: Runtime, C: ArchiveCodec> CreateAction<'a, R, C> {
    pub fn new(
        runtime: &'a R,
        session: &'a Session,
        codec: &'a C,
        collect_options: CollectOptions,
    ) -> Self {
        Self {
            runtime,
            session,
            codec,
            collect_options,
        }
    }

    /// Publish `packet`.
    ///
    /// The "latest" links are only repointed once both the archive and the
    /// manifest are uploaded, so a failed create stays invisible to updates.
    #[tracing::instrument(skip(self, packet), fields(name = %packet.name, version = %packet.version))]
    pub fn run(&self, packet: &Packet) -> Result<CreateReport> {
        let version = packet.parsed_version()?;

        println!("Collecting local files.");
        let collected = collector::collect(self.runtime, &packet.targets, self.collect_options)?;
        debug!(
            "Collected {} file(s) under {:?}",
            collected.files.len(),
            collected.common_root
        );

        let scratch = ScratchDir::new(self.runtime)?;

        println!("Creating archive.");
        let archive = self.codec.pack(
            self.runtime,
            &collected.common_root,
            &layout::local_archive_stem(scratch.path(), &packet.name, &version),
            &collected.files,
        )?;
        let manifest = self.write_manifest(scratch.path(), packet, &version)?;

        let session = self.session.scoped_connect()?;

        println!("Uploading files...");
        let remote_archive = layout::remote_archive(&packet.name, &version);
        session.upload(&remote_archive, &archive)?;

        let remote_manifest = layout::remote_manifest(&packet.name, &version);
        session.upload(&remote_manifest, &manifest)?;

        self.repoint_latest(&session, &packet.name, &version)?;

        info!("Published {} {}", packet.name, version);
        Ok(CreateReport {
            name: packet.name.clone(),
            version,
            files: collected.files.len(),
            remote_archive,
            remote_manifest,
        })
    }

    /// Move the manifest link, then the archive link that updates resolve
    /// through. When the archive link cannot be moved, the manifest link is
    /// pointed back at its previous target.
    fn repoint_latest(&self, session: &Session, name: &str, version: &Version) -> Result<()> {
        let manifest_link = layout::latest_manifest_link(name);
        let previous_manifest = session.resolve_link(&manifest_link).ok();

        session.create_symbolic_link(&manifest_link, &layout::manifest_link_target(version))?;

        if let Err(e) = session.create_symbolic_link(
            &layout::latest_archive_link(name),
            &layout::archive_link_target(name, version),
        ) {
            if let Some(previous) = previous_manifest {
                if let Err(restore) = session.create_symbolic_link(&manifest_link, &previous) {
                    warn!("Failed to restore {} -> {}: {}", manifest_link, previous, restore);
                }
            }
            return Err(e.into());
        }
        Ok(())
    }

    fn write_manifest(&self, scratch: &Path, packet: &Packet, version: &Version) -> Result<PathBuf> {
        let path = layout::local_manifest(scratch, &packet.name, version);
        let mut json =
            serde_json::to_vec(&packet.packets).context("Failed to encode package manifest")?;
        json.push(b'\n');

        if let Some(parent) = path.parent() {
            self.runtime.create_dir_all(parent)?;
        }
        self.runtime
            .write(&path, &json)
            .with_context(|| format!("Failed to write package manifest {:?}", path))?;
        Ok(path)
    }
}
