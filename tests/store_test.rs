//! Create and update against a package store kept in a local directory.
#![cfg(unix)]

use anyhow::Result;
use pm::commands::config::{Config, RemoteSettings};
use pm::commands::{run_create, run_update};
use pm::package::{PackageList, Packet, Version};
use pm::runtime::RealRuntime;
use pm::transport::{Connection, Connector, Endpoint, RemoteFs, TransportError};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tempfile::{TempDir, tempdir};

/// Serves the remote store out of a local directory.
///
/// Writes and links to a path starting with `fail_on` are refused.
struct DirConnector {
    root: PathBuf,
    fail_on: Option<String>,
}

impl Connector for DirConnector {
    fn connect(&self, _endpoint: &Endpoint) -> Result<Box<dyn Connection>, TransportError> {
        Ok(Box::new(DirConnection {
            root: self.root.clone(),
            fail_on: self.fail_on.clone(),
        }))
    }
}

struct DirConnection {
    root: PathBuf,
    fail_on: Option<String>,
}

impl Connection for DirConnection {
    fn open_fs(&mut self) -> Result<Box<dyn RemoteFs>> {
        Ok(Box::new(DirFs {
            root: self.root.clone(),
            fail_on: self.fail_on.clone(),
        }))
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

struct DirFs {
    root: PathBuf,
    fail_on: Option<String>,
}

impl DirFs {
    fn path(&self, remote: &str) -> PathBuf {
        self.root.join(remote.trim_start_matches('/'))
    }

    fn check(&self, remote: &str) -> Result<()> {
        match &self.fail_on {
            Some(prefix) if remote.starts_with(prefix.as_str()) => {
                anyhow::bail!("permission denied: {}", remote)
            }
            _ => Ok(()),
        }
    }
}

impl RemoteFs for DirFs {
    fn create_dir_all(&mut self, path: &str) -> Result<()> {
        Ok(fs::create_dir_all(self.path(path))?)
    }

    fn write_file(&mut self, path: &str, source: &mut dyn Read) -> Result<u64> {
        self.check(path)?;
        let mut file = File::create(self.path(path))?;
        Ok(io::copy(source, &mut file)?)
    }

    fn open_file(&mut self, path: &str) -> Result<Box<dyn Read + Send>> {
        Ok(Box::new(File::open(self.path(path))?))
    }

    fn is_dir(&mut self, path: &str) -> Result<bool> {
        Ok(fs::symlink_metadata(self.path(path))?.is_dir())
    }

    fn exists(&mut self, path: &str) -> Result<bool> {
        Ok(fs::symlink_metadata(self.path(path)).is_ok())
    }

    fn symlink(&mut self, target: &str, link: &str) -> Result<()> {
        self.check(link)?;
        Ok(std::os::unix::fs::symlink(target, self.path(link))?)
    }

    fn read_link(&mut self, link: &str) -> Result<String> {
        Ok(fs::read_link(self.path(link))?
            .to_string_lossy()
            .into_owned())
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        Ok(fs::rename(self.path(from), self.path(to))?)
    }

    fn remove(&mut self, path: &str) -> Result<()> {
        match fs::remove_file(self.path(path)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

struct Fixture {
    _dir: TempDir,
    store: PathBuf,
    source: PathBuf,
    dest: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempdir().unwrap();
        let store = dir.path().join("store");
        let source = dir.path().join("source");
        let dest = dir.path().join("dest");
        fs::create_dir_all(&store).unwrap();
        fs::create_dir_all(&source).unwrap();
        Self {
            store,
            source,
            dest,
            _dir: dir,
        }
    }

    fn config(&self, verify_versions: bool) -> Config<RealRuntime, pm::archive::ZipCodec> {
        self.config_failing_on(verify_versions, None)
    }

    fn config_failing_on(
        &self,
        verify_versions: bool,
        fail_on: Option<&str>,
    ) -> Config<RealRuntime, pm::archive::ZipCodec> {
        let settings = RemoteSettings {
            host: "127.0.0.1".to_string(),
            port: "22".to_string(),
            user: "pm".to_string(),
            password: Some("secret".to_string()),
            verify_versions,
            workers: 2,
            ..Default::default()
        };
        Config::with_connector(
            RealRuntime,
            &settings,
            Box::new(DirConnector {
                root: self.store.clone(),
                fail_on: fail_on.map(String::from),
            }),
        )
        .unwrap()
    }

    fn write_source(&self, name: &str, content: &str) {
        let path = self.source.join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn publish(&self, version: &str) {
        let report = run_create(&self.packet(version), &self.config(false)).unwrap();
        assert_eq!(report.version, version.parse::<Version>().unwrap());
    }

    fn packet(&self, version: &str) -> Packet {
        Packet::parse(&format!(
            r#"{{
                "name": "tools",
                "ver": "{version}",
                "targets": [
                    {{"path": "{src}/bin/*"}},
                    {{"path": "{src}/lib/*", "exclude": "*.tmp"}},
                    {{"path": "{src}/README"}}
                ],
                "packets": [{{"name": "libs", "ver": ">=0.1"}}]
            }}"#,
            version = version,
            src = self.source.display()
        ))
        .unwrap()
    }

    fn fetch(&self, constraint: &str, verify: bool) -> Result<Vec<pm::application::FetchedPackage>> {
        let list = PackageList::parse(&format!(
            r#"{{"packages": [{{"name": "tools", "ver": "{}"}}]}}"#,
            constraint
        ))
        .unwrap();
        run_update(&list, &self.dest, &self.config(verify))
    }

    fn fetched(&self, name: &str) -> String {
        fs::read_to_string(self.dest.join("tools").join(name)).unwrap()
    }
}

fn link_target(path: &Path) -> String {
    fs::read_link(path).unwrap().to_string_lossy().into_owned()
}

#[test_log::test]
fn test_create_publishes_archive_manifest_and_links() {
    let fx = Fixture::new();
    fx.write_source("bin/tool", "#!/bin/sh\necho 1.0");
    fx.write_source("lib/libx.so", "lib");
    fx.write_source("lib/scratch.tmp", "ignored");
    fx.write_source("README", "readme");

    fx.publish("1.0");

    assert!(fx.store.join("tools/1.0/tools.zip").is_file());
    assert_eq!(link_target(&fx.store.join("tools/latest")), "1.0/tools.zip");
    assert_eq!(
        fs::read_to_string(fx.store.join("meta/tools/1.0/meta")).unwrap(),
        "[{\"name\":\"libs\",\"ver\":\">=0.1\"}]\n"
    );
    assert_eq!(link_target(&fx.store.join("meta/tools/latest")), "1.0/meta");
    assert!(fx.store.join("tools/latest").exists(), "latest link must resolve");
}

#[test_log::test]
fn test_update_fetches_latest() {
    let fx = Fixture::new();
    fx.write_source("bin/tool", "v1.0");
    fx.write_source("lib/libx.so", "lib");
    fx.write_source("lib/scratch.tmp", "ignored");
    fx.write_source("README", "readme");
    fx.publish("1.0");

    let fetched = fx.fetch("", false).unwrap();

    assert_eq!(fetched.len(), 1);
    assert_eq!(fetched[0].version, Version::new(1, 0));
    assert_eq!(fetched[0].location, fx.dest.join("tools"));
    assert_eq!(fx.fetched("bin/tool"), "v1.0");
    assert_eq!(fx.fetched("lib/libx.so"), "lib");
    assert_eq!(fx.fetched("README"), "readme");
    assert!(!fx.dest.join("tools/lib/scratch.tmp").exists());
}

#[test]
fn test_republish_moves_latest_and_constraints_pick_versions() {
    let fx = Fixture::new();
    fx.write_source("README", "readme");
    fx.write_source("bin/tool", "v1.0");
    fx.publish("1.0");
    fx.write_source("bin/tool", "v1.1");
    fx.publish("1.1");

    assert_eq!(link_target(&fx.store.join("tools/latest")), "1.1/tools.zip");
    assert_eq!(link_target(&fx.store.join("meta/tools/latest")), "1.1/meta");

    let fetched = fx.fetch("<=1.0", false).unwrap();
    assert_eq!(fetched[0].version, Version::new(1, 0));
    assert_eq!(fx.fetched("bin/tool"), "v1.0");

    let fetched = fx.fetch("<=3.0", false).unwrap();
    assert_eq!(fetched[0].version, Version::new(1, 1));
    assert_eq!(fx.fetched("bin/tool"), "v1.1");

    let fetched = fx.fetch(">=1.1", false).unwrap();
    assert_eq!(fetched[0].version, Version::new(1, 1));

    let fetched = fx.fetch("1.0", false).unwrap();
    assert_eq!(fetched[0].version, Version::new(1, 0));
    assert_eq!(fx.fetched("bin/tool"), "v1.0");
}

#[test]
fn test_floor_above_latest_fails() {
    let fx = Fixture::new();
    fx.write_source("README", "readme");
    fx.publish("1.0");

    let err = fx.fetch(">=2.0", false).unwrap_err();
    assert_eq!(
        err.to_string(),
        "failed to find satisfying version ('>=2.0') of a package 'tools'"
    );
    assert!(!fx.dest.join("tools").exists());
}

#[test]
fn test_unknown_package_fails() {
    let fx = Fixture::new();

    let err = fx.fetch("", false).unwrap_err();
    assert!(err.to_string().contains("('latest')"), "{}", err);
}

#[test]
fn test_missing_exact_version() {
    let fx = Fixture::new();
    fx.write_source("README", "readme");
    fx.publish("1.0");

    let err = fx.fetch("1.7", false).unwrap_err();
    assert_eq!(err.to_string(), "failed to open source file");

    let err = fx.fetch("1.7", true).unwrap_err();
    assert_eq!(
        err.to_string(),
        "version '1.7' of a package 'tools' is not on the server"
    );
}

fn assert_latest_is(fx: &Fixture, version: &str) {
    assert_eq!(
        link_target(&fx.store.join("tools/latest")),
        format!("{}/tools.zip", version)
    );
    assert_eq!(
        link_target(&fx.store.join("meta/tools/latest")),
        format!("{}/meta", version)
    );
}

#[test_log::test]
fn test_failed_upload_keeps_previous_release() {
    let fx = Fixture::new();
    fx.write_source("bin/tool", "v1.0");
    fx.publish("1.0");

    fx.write_source("bin/tool", "v1.1");
    let config = fx.config_failing_on(false, Some("meta/tools/1.1"));
    let err = run_create(&fx.packet("1.1"), &config).unwrap_err();
    assert_eq!(err.to_string(), "failed to upload file");

    assert_latest_is(&fx, "1.0");
    let fetched = fx.fetch("", false).unwrap();
    assert_eq!(fetched[0].version, Version::new(1, 0));
    assert_eq!(fx.fetched("bin/tool"), "v1.0");
}

#[test_log::test]
fn test_failed_archive_link_keeps_previous_release() {
    let fx = Fixture::new();
    fx.write_source("bin/tool", "v1.0");
    fx.publish("1.0");

    fx.write_source("bin/tool", "v1.1");
    let config = fx.config_failing_on(false, Some("tools/latest"));
    let err = run_create(&fx.packet("1.1"), &config).unwrap_err();
    assert_eq!(err.to_string(), "failed to create link");

    assert_latest_is(&fx, "1.0");
    assert!(fx.store.join("tools/1.1/tools.zip").is_file());
    assert!(!fx.store.join("tools/latest.new").exists());
    assert!(!fx.store.join("meta/tools/latest.new").exists());

    let fetched = fx.fetch("", false).unwrap();
    assert_eq!(fetched[0].version, Version::new(1, 0));
    assert_eq!(fx.fetched("bin/tool"), "v1.0");
}

#[test]
fn test_declared_version_text_names_remote_paths() {
    let fx = Fixture::new();
    fx.write_source("README", "readme");
    fx.publish("1.02");

    assert!(fx.store.join("tools/1.02/tools.zip").is_file());
    assert!(fx.store.join("meta/tools/1.02/meta").is_file());
    assert_latest_is(&fx, "1.02");

    let fetched = fx.fetch("", false).unwrap();
    assert_eq!(fetched[0].version.to_string(), "1.02");
    assert_eq!(fx.fetched("README"), "readme");

    let fetched = fx.fetch("1.02", true).unwrap();
    assert_eq!(fetched[0].version.to_string(), "1.02");
}
