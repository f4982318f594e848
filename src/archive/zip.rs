use log::{debug, info};
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::runtime::{Runtime, WriteSeek};

use super::{ARCHIVE_EXTENSION, ArchiveCodec, ArchiveError, normalize_entry_name, trimmed};

/// Deflate-compressed `.zip` archives.
pub struct ZipCodec;

impl ArchiveCodec for ZipCodec {
    #[tracing::instrument(skip(self, runtime, files))]
    fn pack<R: Runtime>(
        &self,
        runtime: &R,
        root: &Path,
        archive_stem: &Path,
        files: &[PathBuf],
    ) -> Result<PathBuf, ArchiveError> {
        let root = trimmed(root).ok_or(ArchiveError::InvalidRootPath)?;
        let stem = trimmed(archive_stem).ok_or(ArchiveError::InvalidArchiveName)?;

        let mut archive_path = stem.into_os_string();
        archive_path.push(".");
        archive_path.push(ARCHIVE_EXTENSION);
        let archive_path = PathBuf::from(archive_path);

        if let Some(parent) = archive_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            runtime.create_dir_all(parent).map_err(|e| {
                debug!("Failed to create {:?}: {:#}", parent, e);
                ArchiveError::FailedToCreateArchive
            })?;
        }

        let file = runtime.create_file(&archive_path).map_err(|e| {
            debug!("Failed to create {:?}: {:#}", archive_path, e);
            ArchiveError::FailedToCreateArchive
        })?;

        debug!("Packing {} file(s) into {:?}...", files.len(), archive_path);
        if let Err(e) = self.write_entries(runtime, file, &root, files) {
            // Never leave a half-written archive behind.
            if let Err(remove_err) = runtime.remove_file(&archive_path) {
                debug!("Failed to remove partial archive {:?}: {:#}", archive_path, remove_err);
            }
            return Err(e);
        }

        info!("Packed {:?}.", archive_path);
        Ok(archive_path)
    }

    #[tracing::instrument(skip(self, runtime))]
    fn unpack<R: Runtime>(
        &self,
        runtime: &R,
        archive: &Path,
        destination: &Path,
    ) -> Result<(), ArchiveError> {
        let archive = trimmed(archive).ok_or(ArchiveError::InvalidArchiveName)?;
        let destination = trimmed(destination).ok_or(ArchiveError::InvalidFileName)?;

        debug!("Extracting {:?} to {:?}...", archive, destination);
        let reader = runtime.open(&archive).map_err(|e| {
            debug!("Failed to open archive {:?}: {:#}", archive, e);
            ArchiveError::FailedToOpenFile
        })?;
        let mut zip = ZipArchive::new(reader).map_err(|e| {
            debug!("Failed to parse ZIP archive {:?}: {}", archive, e);
            ArchiveError::FailedToOpenFile
        })?;

        for i in 0..zip.len() {
            let mut entry = zip.by_index(i).map_err(|e| {
                debug!("Failed to read ZIP entry {}: {}", i, e);
                ArchiveError::FailedToExtractFile
            })?;

            let name = normalize_entry_name(entry.name()).to_string();
            if name.is_empty() {
                return Err(ArchiveError::InvalidFileName);
            }
            let full_path = destination.join(&name);

            if entry.is_dir() {
                runtime
                    .create_dir_all(&full_path)
                    .map_err(|_| ArchiveError::FailedToCreateDirectory)?;
                continue;
            }

            if let Some(parent) = full_path.parent() {
                runtime
                    .create_dir_all(parent)
                    .map_err(|_| ArchiveError::FailedToCreateDirectory)?;
            }

            {
                let mut dest_file = runtime.create_file(&full_path).map_err(|e| {
                    debug!("Failed to create {:?}: {:#}", full_path, e);
                    ArchiveError::FailedToCreateFile
                })?;
                io::copy(&mut entry, &mut dest_file).map_err(|e| {
                    debug!("Failed to extract {:?}: {}", full_path, e);
                    ArchiveError::FailedToExtractFile
                })?;
                dest_file
                    .flush()
                    .map_err(|_| ArchiveError::FailedToExtractFile)?;
            }

            if let Some(mode) = entry.unix_mode()
                && let Err(e) = runtime.set_permissions(&full_path, mode & 0o7777)
            {
                debug!("Failed to set permissions on {:?}: {:#}", full_path, e);
            }
        }

        info!("Extraction complete.");
        Ok(())
    }
}

impl ZipCodec {
    fn write_entries<R: Runtime>(
        &self,
        runtime: &R,
        file: Box<dyn WriteSeek + Send>,
        root: &Path,
        files: &[PathBuf],
    ) -> Result<(), ArchiveError> {
        let mut writer = ZipWriter::new(file);

        for file_name in files {
            let file_name = trimmed(file_name).ok_or(ArchiveError::InvalidFileName)?;

            let mut source = runtime.open(&file_name).map_err(|e| {
                debug!("Failed to open {:?}: {:#}", file_name, e);
                ArchiveError::FailedToOpenFile
            })?;

            let relative = file_name.strip_prefix(&root).map_err(|_| {
                debug!("{:?} is not under {:?}", file_name, root);
                ArchiveError::FailedToArchiveFile
            })?;
            let entry_name = entry_name(relative).ok_or(ArchiveError::FailedToArchiveFile)?;

            let mut options =
                SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
            if let Some(mode) = runtime.permissions(&file_name) {
                options = options.unix_permissions(mode);
            }

            writer.start_file(entry_name, options).map_err(|e| {
                debug!("Failed to add {:?}: {}", file_name, e);
                ArchiveError::FailedToCreateCompressedFile
            })?;
            io::copy(&mut source, &mut writer).map_err(|e| {
                debug!("Failed to compress {:?}: {}", file_name, e);
                ArchiveError::FailedToCreateCompressedFile
            })?;
        }

        writer.finish().map_err(|e| {
            debug!("Failed to finish archive: {}", e);
            ArchiveError::FailedToCreateArchive
        })?;
        Ok(())
    }
}

/// `/`-separated entry name of a path relative to the archive root.
fn entry_name(relative: &Path) -> Option<String> {
    let parts: Vec<String> = relative
        .components()
        .map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Option<_>>()?;
    (!parts.is_empty()).then(|| parts.join("/"))
}
