pub mod layout;
mod manifest;
mod resolver;
pub mod version;

pub use manifest::{Dependency, ManifestError, PackageList, Packet, Target};
pub use resolver::{RemoteLinks, ResolveError, ResolvePolicy, VersionResolver};
pub use version::{Version, VersionConstraint, VersionError};
