use anyhow::{Context, Result};
use log::{debug, warn};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use crate::runtime::Runtime;

const SCRATCH_PREFIX: &str = "tmp";

/// Scratch directory owned by a single flow.
///
/// Created as `tmp*` under the current directory when possible, otherwise in
/// the system temp directory. The directory and everything under it is
/// removed when the value is dropped, on success and on error alike.
pub struct ScratchDir {
    dir: Option<TempDir>,
    path: PathBuf,
}

impl ScratchDir {
    pub fn new<R: Runtime>(runtime: &R) -> Result<Self> {
        let in_cwd = runtime.current_dir().and_then(|cwd| {
            tempfile::Builder::new()
                .prefix(SCRATCH_PREFIX)
                .tempdir_in(&cwd)
                .with_context(|| format!("Failed to create scratch directory in {:?}", cwd))
        });

        let dir = match in_cwd {
            Ok(dir) => dir,
            Err(e) => {
                debug!("{:#}; falling back to the system temp directory", e);
                tempfile::Builder::new()
                    .prefix(SCRATCH_PREFIX)
                    .tempdir()
                    .context("Failed to create scratch directory")?
            }
        };

        let path = dir.path().to_path_buf();
        debug!("Created scratch directory {:?}", path);
        Ok(Self {
            dir: Some(dir),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            debug!("Cleaning up: {:?}", self.path);
            if let Err(e) = dir.close() {
                warn!("Failed to remove scratch directory {:?}: {}", self.path, e);
            }
        }
    }
}
