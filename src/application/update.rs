//! Update action - fetches packages from the remote store.
//!
//! For every requested package, in order: resolve the version against the
//! remote "latest" link, download the archive into a scratch directory and
//! extract it under `<destination>/<name>`. Dependencies recorded in the
//! fetched package's manifest are not followed.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{debug, info};

use crate::archive::ArchiveCodec;
use crate::cleanup::ScratchDir;
use crate::package::{Dependency, PackageList, ResolvePolicy, Version, VersionResolver, layout};
use crate::runtime::Runtime;
use crate::transport::Session;

/// A package placed on disk by an update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPackage {
    pub name: String,
    pub version: Version,
    pub location: PathBuf,
}

pub struct UpdateAction<'a, R: Runtime, C: ArchiveCodec> {
    runtime: &'a R,
    session: &'a Session,
    codec: &'a C,
    policy: ResolvePolicy,
}

impl<'a, R: Runtime, C: ArchiveCodec> UpdateAction<'a, R, C> {
    pub fn new(runtime: &'a R, session: &'a Session, codec: &'a C, policy: ResolvePolicy) -> Self {
        Self {
            runtime,
            session,
            codec,
            policy,
        }
    }

    /// Fetch every package of `list` into `destination`.
    ///
    /// Stops at the first package that cannot be resolved or fetched; packages
    /// already extracted stay in place.
    #[tracing::instrument(skip(self, list))]
    pub fn run(&self, list: &PackageList, destination: &Path) -> Result<Vec<FetchedPackage>> {
        let session = self.session.scoped_connect()?;

        self.runtime
            .create_dir_all(destination)
            .with_context(|| format!("failed to create destination directory {:?}", destination))?;
        let scratch = ScratchDir::new(self.runtime)?;
        let resolver = VersionResolver::new(&*session, self.policy);

        let mut fetched = Vec::with_capacity(list.packages.len());
        for dependency in &list.packages {
            let version = self.resolve(&resolver, dependency)?;

            println!(
                "Fetching package '{}' of version '{}'",
                dependency.name, version
            );
            let archive = self.download(&session, scratch.path(), &dependency.name, &version)?;

            println!("Extracting package {}", dependency.name);
            let location = destination.join(&dependency.name);
            self.codec.unpack(self.runtime, &archive, &location)?;

            info!("Fetched {} {} into {:?}", dependency.name, version, location);
            fetched.push(FetchedPackage {
                name: dependency.name.clone(),
                version,
                location,
            });
        }

        Ok(fetched)
    }

    fn resolve(
        &self,
        resolver: &VersionResolver<'_, Session>,
        dependency: &Dependency,
    ) -> Result<Version> {
        let constraint = dependency.constraint()?;
        let version = resolver.resolve(&dependency.name, &constraint)?;
        debug!(
            "Resolved {} {} to {}",
            dependency.name, constraint, version
        );
        Ok(version)
    }

    fn download(
        &self,
        session: &Session,
        scratch: &Path,
        name: &str,
        version: &Version,
    ) -> Result<PathBuf> {
        let local_dir = scratch.join(name).join(version.to_string());
        self.runtime
            .create_dir_all(&local_dir)
            .with_context(|| format!("failed to create destination directory {:?}", local_dir))?;

        let local = local_dir.join(layout::archive_file_name(name));
        session.download(&layout::remote_archive(name, version), &local)?;
        Ok(local)
    }
}
