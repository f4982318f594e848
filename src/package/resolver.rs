//! Version resolution against the remote "latest" links.
//!
//! Resolution is per package and single-level: the resolver only ever offers
//! the requested version or whatever "latest" points at. It never searches
//! the published versions in between, and never follows nested dependencies.

use log::debug;
use thiserror::Error;

use crate::transport::{Session, TransportError};

use super::layout;
use super::version::{Version, VersionConstraint};

/// Link and existence queries the resolver needs from the remote store.
#[cfg_attr(test, mockall::automock)]
pub trait RemoteLinks {
    fn resolve_link(&self, link: &str) -> Result<String, TransportError>;
    fn exists(&self, path: &str) -> Result<bool, TransportError>;
}

impl RemoteLinks for Session {
    fn resolve_link(&self, link: &str) -> Result<String, TransportError> {
        Session::resolve_link(self, link)
    }

    fn exists(&self, path: &str) -> Result<bool, TransportError> {
        Session::exists(self, path)
    }
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("failed to find satisfying version ('latest') of a package '{package}'")]
    LatestUnavailable {
        package: String,
        #[source]
        source: TransportError,
    },
    #[error("latest link of package '{package}' points at unexpected target '{target}'")]
    BadLatestTarget { package: String, target: String },
    #[error("failed to find satisfying version ('{constraint}') of a package '{package}'")]
    NoSatisfyingVersion {
        package: String,
        constraint: VersionConstraint,
    },
    #[error("version '{version}' of a package '{package}' is not on the server")]
    MissingVersion { package: String, version: Version },
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ResolvePolicy {
    /// Check that a caller-supplied exact or ceiling version exists before using it.
    pub verify_requested: bool,
}

pub struct VersionResolver<'a, L: RemoteLinks> {
    links: &'a L,
    policy: ResolvePolicy,
}

impl<'a, L: RemoteLinks> VersionResolver<'a, L> {
    pub fn new(links: &'a L, policy: ResolvePolicy) -> Self {
        Self { links, policy }
    }

    /// Version the package's "latest" link points at.
    pub fn resolve_latest(&self, package: &str) -> Result<Version, ResolveError> {
        let target = self
            .links
            .resolve_link(&layout::latest_archive_link(package))
            .map_err(|source| ResolveError::LatestUnavailable {
                package: package.to_string(),
                source,
            })?;
        debug!("Latest link of {} -> {}", package, target);

        layout::version_segment(&target)
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| ResolveError::BadLatestTarget {
                package: package.to_string(),
                target,
            })
    }

    /// Resolve a constraint to a concrete version.
    ///
    /// - `Latest` resolves through the "latest" link.
    /// - `Exact(v)` is `v`.
    /// - `AtMost(v)` is `v` when `v <= latest`, otherwise `latest`.
    /// - `AtLeast(v)` is `latest` when `latest >= v`, otherwise no version satisfies.
    pub fn resolve(
        &self,
        package: &str,
        constraint: &VersionConstraint,
    ) -> Result<Version, ResolveError> {
        match *constraint {
            VersionConstraint::Latest => self.resolve_latest(package),
            VersionConstraint::Exact(requested) => self.verified(package, requested),
            VersionConstraint::AtMost(ceiling) => {
                let latest = self.resolve_latest(package)?;
                if ceiling <= latest {
                    self.verified(package, ceiling)
                } else {
                    Ok(latest)
                }
            }
            VersionConstraint::AtLeast(floor) => {
                let latest = self.resolve_latest(package)?;
                if latest >= floor {
                    Ok(latest)
                } else {
                    Err(ResolveError::NoSatisfyingVersion {
                        package: package.to_string(),
                        constraint: *constraint,
                    })
                }
            }
        }
    }

    fn verified(&self, package: &str, version: Version) -> Result<Version, ResolveError> {
        if !self.policy.verify_requested {
            return Ok(version);
        }
        if self.links.exists(&layout::remote_archive(package, &version))? {
            Ok(version)
        } else {
            Err(ResolveError::MissingVersion {
                package: package.to_string(),
                version,
            })
        }
    }
}
