use anyhow::{Context, Result};
use async_trait::async_trait;
use cairn_core::{ArchiveRequest, Archiver, CoreError};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::task;
use tracing::debug;
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Writes backups as deflated zip files. The archive is assembled in a temp
/// file next to the destination and only renamed into place once complete.
#[derive(Clone, Copy, Debug, Default)]
pub struct ZipArchiver;

#[async_trait]
impl Archiver for ZipArchiver {
    async fn archive(&self, request: &ArchiveRequest) -> Result<(), CoreError> {
        let base = request.base.clone();
        let sources = request.sources.clone();
        let dest = request.dest.clone();
        let entries = task::spawn_blocking(move || write_zip(&base, &sources, &dest))
            .await
            .map_err(|e| CoreError::Io(format!("archive task: {e}")))?
            .map_err(|e| CoreError::Io(format!("{e:#}")))?;
        debug!(entries, dest = %request.dest.display(), "wrote archive");
        Ok(())
    }
}

fn write_zip(base: &Path, sources: &[PathBuf], dest: &Path) -> Result<usize> {
    let dir = dest.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    let tmp = NamedTempFile::new_in(dir).with_context(|| format!("temp file in {}", dir.display()))?;

    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut zip = ZipWriter::new(tmp);
    let mut entries = 0usize;

    for source in sources {
        for entry in WalkDir::new(source).follow_links(false) {
            let entry = entry.with_context(|| format!("walk {}", source.display()))?;
            let name = entry_name(base, entry.path())?;
            if entry.file_type().is_dir() {
                zip.add_directory(format!("{name}/"), options)?;
            } else if entry.file_type().is_file() {
                zip.start_file(name, options)?;
                let mut f = File::open(entry.path())
                    .with_context(|| format!("open {}", entry.path().display()))?;
                io::copy(&mut f, &mut zip).with_context(|| format!("copy {}", entry.path().display()))?;
            } else {
                continue;
            }
            entries += 1;
        }
    }

    let tmp = zip.finish().context("finish archive")?;
    tmp.persist(dest)
        .map_err(|e| e.error)
        .with_context(|| format!("persist {}", dest.display()))?;
    Ok(entries)
}

/// Archive entry name: path relative to `base`, always `/` separated.
fn entry_name(base: &Path, path: &Path) -> Result<String> {
    let rel = path
        .strip_prefix(base)
        .with_context(|| format!("{} is outside {}", path.display(), base.display()))?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    Ok(parts.join("/"))
}
