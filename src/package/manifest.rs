//! Packet and package descriptions.
//!
//! A *packet* description drives `create`: what to archive and which
//! packages it depends on. A *package list* drives `update`: which packages
//! to fetch, optionally constrained by version.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::version::{Version, VersionConstraint};

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("invalid {kind} description format: {message}")]
    InvalidFormat { kind: &'static str, message: String },
    #[error("invalid {kind} description: {reason}")]
    Invalid { kind: &'static str, reason: String },
}

/// A local inclusion root. The final segment of `path` is an include glob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Target {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude: Option<String>,
}

/// A package reference with an optional version constraint (`""`, `1.2`, `<=1.2`, `>=1.2`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Dependency {
    pub name: String,
    #[serde(rename = "ver", alias = "version", default, skip_serializing_if = "String::is_empty")]
    pub version: String,
}

impl Dependency {
    pub fn constraint(&self) -> Result<VersionConstraint, ManifestError> {
        self.version
            .parse()
            .map_err(|_| invalid("package", format!("bad version constraint {:?}", self.version)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Packet {
    pub name: String,
    #[serde(rename = "ver", alias = "version")]
    pub version: String,
    pub targets: Vec<Target>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub packets: Vec<Dependency>,
}

impl Packet {
    /// Decode and validate a packet description.
    pub fn parse(data: &str) -> Result<Self, ManifestError> {
        let packet: Packet =
            serde_json::from_str(data).map_err(|e| ManifestError::InvalidFormat {
                kind: "packet",
                message: e.to_string(),
            })?;
        packet.validate()?;
        Ok(packet)
    }

    pub fn validate(&self) -> Result<(), ManifestError> {
        const KIND: &str = "packet";
        validate_name(KIND, &self.name)?;
        if !is_plain_version(&self.version) {
            return Err(invalid(KIND, format!("bad version {:?}", self.version)));
        }
        if self.targets.is_empty() {
            return Err(invalid(KIND, "at least one target is required"));
        }
        for target in &self.targets {
            if target.path.is_empty() {
                return Err(invalid(KIND, "target path must not be empty"));
            }
            if target.exclude.as_deref() == Some("") {
                return Err(invalid(KIND, "target exclude must not be empty when present"));
            }
        }
        for dependency in &self.packets {
            validate_dependency(KIND, dependency)?;
        }
        Ok(())
    }

    /// Parsed packet version. Valid after [`Packet::validate`].
    pub fn parsed_version(&self) -> Result<Version, ManifestError> {
        self.version
            .parse()
            .map_err(|_| invalid("packet", format!("bad version {:?}", self.version)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackageList {
    pub packages: Vec<Dependency>,
}

impl PackageList {
    /// Decode and validate a package list.
    pub fn parse(data: &str) -> Result<Self, ManifestError> {
        let list: PackageList =
            serde_json::from_str(data).map_err(|e| ManifestError::InvalidFormat {
                kind: "package",
                message: e.to_string(),
            })?;
        list.validate()?;
        Ok(list)
    }

    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.packages.is_empty() {
            return Err(invalid("package", "at least one package is required"));
        }
        self.packages
            .iter()
            .try_for_each(|d| validate_dependency("package", d))
    }
}

fn invalid(kind: &'static str, reason: impl Into<String>) -> ManifestError {
    ManifestError::Invalid {
        kind,
        reason: reason.into(),
    }
}

// Names become remote path segments.
fn validate_name(kind: &'static str, name: &str) -> Result<(), ManifestError> {
    if name.is_empty() {
        return Err(invalid(kind, "name must not be empty"));
    }
    if name == "." || name == ".." || name.contains(['/', '\\']) || name == "meta" {
        return Err(invalid(kind, format!("name {:?} is not a valid package name", name)));
    }
    Ok(())
}

fn validate_dependency(kind: &'static str, dependency: &Dependency) -> Result<(), ManifestError> {
    validate_name(kind, &dependency.name)?;
    let raw = dependency
        .version
        .strip_prefix("<=")
        .or_else(|| dependency.version.strip_prefix(">="))
        .unwrap_or(&dependency.version);
    if !dependency.version.is_empty() && !is_plain_version(raw) {
        return Err(invalid(
            kind,
            format!(
                "bad version constraint {:?} for {}",
                dependency.version, dependency.name
            ),
        ));
    }
    Ok(())
}

fn is_plain_version(s: &str) -> bool {
    s.parse::<Version>().is_ok()
}
